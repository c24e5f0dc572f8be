//! # Episodic memory orchestrator
//!
//! Composes the per-user event buffers, the retention policy, the unit store
//! and the summarizer/embedder collaborators into the memory use cases:
//!
//! - configure a user and record interactions
//! - decide when a buffer is ready and build a proposal from it
//! - confirm or discard the proposal
//! - retrieve context (every hit counts as a reuse)
//! - revisit, sweep and prune
//!
//! All operations for one user are serialized on that user's session lock.
//! Collaborators are never called while the lock is held.

use crate::embedding::{BagOfWordsEmbedder, Embedder, HashEmbedder};
use crate::error::{MemoryError, Result};
use crate::index::InMemoryIndex;
use crate::pulses::{Pulse, RetentionPulses};
use crate::retention::{RetentionConfig, RetentionPolicy};
use crate::sessions::SessionTable;
use crate::storage_traits::{StoreStats, UnitStore};
use crate::store::SqliteUnitStore;
use crate::summarizer::{Summarizer, TranscriptSummarizer};
use crate::types::{
    EpisodeProposal, EpisodicUnit, InteractionEvent, Metadata, ScoredEpisode, UserMemoryConfig,
};
use chrono::{DateTime, Duration, Utc};
use std::path::Path;
use std::sync::Arc;

/// Embedding width used by `Orchestrator::open`
pub const DURABLE_EMBEDDING_DIM: usize = 256;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub retention: RetentionConfig,
    /// Settings for users never configured explicitly
    pub user_defaults: UserMemoryConfig,
    /// Number of session shards
    pub shard_count: usize,
    /// Results returned by `retrieve_context` when the caller passes none
    pub default_top_k: usize,
    /// How long an expired episode stays reactivatable before pruning
    pub prune_grace: Duration,
    /// Character limit for the reference transcript summarizer
    pub summary_max_chars: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retention: RetentionConfig::default(),
            user_defaults: UserMemoryConfig::default(),
            shard_count: 16,
            default_top_k: 5,
            prune_grace: Duration::zero(),
            summary_max_chars: 600,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        self.retention.validate()?;
        if self.shard_count == 0 {
            return Err(MemoryError::Configuration("shard_count must be positive".into()));
        }
        if self.prune_grace < Duration::zero() {
            return Err(MemoryError::Configuration("prune_grace must not be negative".into()));
        }
        Ok(())
    }
}

/// Builder for orchestrator config
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: OrchestratorConfig::default(),
        }
    }

    pub fn retention(mut self, retention: RetentionConfig) -> Self {
        self.config.retention = retention;
        self
    }

    pub fn user_defaults(mut self, defaults: UserMemoryConfig) -> Self {
        self.config.user_defaults = defaults;
        self
    }

    pub fn shard_count(mut self, shards: usize) -> Self {
        self.config.shard_count = shards;
        self
    }

    pub fn default_top_k(mut self, top_k: usize) -> Self {
        self.config.default_top_k = top_k;
        self
    }

    pub fn prune_grace(mut self, grace: Duration) -> Self {
        self.config.prune_grace = grace;
        self
    }

    pub fn summary_max_chars(mut self, max_chars: usize) -> Self {
        self.config.summary_max_chars = max_chars;
        self
    }

    pub fn build(self) -> Result<OrchestratorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for OrchestratorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The episodic memory core. Construct one and share it (e.g. in an `Arc`).
pub struct Orchestrator {
    sessions: SessionTable,
    retention: RetentionPolicy,
    store: Arc<dyn UnitStore>,
    summarizer: Arc<dyn Summarizer>,
    embedder: Arc<dyn Embedder>,
    pulses: RetentionPulses,
    config: OrchestratorConfig,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("store", &self.store.backend_name())
            .field("summarizer", &self.summarizer.name())
            .field("embedder", &self.embedder.name())
            .field("config", &self.config)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn UnitStore>,
        summarizer: Arc<dyn Summarizer>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        config.validate()?;
        let retention = RetentionPolicy::new(config.retention)?;

        Ok(Self {
            sessions: SessionTable::new(config.shard_count, config.user_defaults),
            retention,
            store,
            summarizer,
            embedder,
            pulses: RetentionPulses::default(),
            config,
        })
    }

    /// In-process store with the reference summarizer and embedder
    pub fn in_memory(config: OrchestratorConfig) -> Result<Self> {
        let summarizer = TranscriptSummarizer::new(config.summary_max_chars);
        Self::new(
            config,
            Arc::new(InMemoryIndex::new()),
            Arc::new(summarizer),
            Arc::new(BagOfWordsEmbedder::new()),
        )
    }

    /// SQLite store under `data_dir` with the reference summarizer and a
    /// fixed-dimension embedder, so vectors stay comparable across restarts
    pub async fn open(data_dir: impl AsRef<Path>, config: OrchestratorConfig) -> Result<Self> {
        let store = SqliteUnitStore::open(data_dir).await?;
        let summarizer = TranscriptSummarizer::new(config.summary_max_chars);
        Self::new(
            config,
            Arc::new(store),
            Arc::new(summarizer),
            Arc::new(HashEmbedder::new(DURABLE_EMBEDDING_DIM)),
        )
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn retention(&self) -> &RetentionPolicy {
        &self.retention
    }

    pub fn store(&self) -> &Arc<dyn UnitStore> {
        &self.store
    }

    pub fn pulses(&self) -> &RetentionPulses {
        &self.pulses
    }

    // ─── Users and events ────────────────────────────────────────────────────

    /// Replace a user's settings wholesale. Buffered events are kept.
    pub async fn configure_user(&self, user_id: &str, config: UserMemoryConfig) {
        let session = self.sessions.get_or_create(user_id).await;
        session.lock().await.configure(config);
        tracing::debug!(user_id, ?config, "user configured");
    }

    /// Flip only the opt-in flag
    pub async fn set_opt_in(&self, user_id: &str, opted_in: bool) {
        let session = self.sessions.get_or_create(user_id).await;
        session.lock().await.set_opt_in(opted_in);
        tracing::debug!(user_id, opted_in, "opt-in changed");
    }

    /// Read-modify-write a user's settings under that user's lock
    pub async fn update_user_config<F>(&self, user_id: &str, update: F) -> UserMemoryConfig
    where
        F: FnOnce(UserMemoryConfig) -> UserMemoryConfig,
    {
        let session = self.sessions.get_or_create(user_id).await;
        let mut buffer = session.lock().await;
        let config = update(*buffer.config());
        buffer.configure(config);
        tracing::debug!(user_id, ?config, "user configured");
        config
    }

    pub async fn user_config(&self, user_id: &str) -> UserMemoryConfig {
        let session = self.sessions.get_or_create(user_id).await;
        let config = *session.lock().await.config();
        config
    }

    /// Buffer one interaction. Returns false when the user opted out.
    pub async fn record_interaction(
        &self,
        user_id: &str,
        input_text: &str,
        output_text: &str,
        metadata: Metadata,
        now: DateTime<Utc>,
    ) -> bool {
        let session = self.sessions.get_or_create(user_id).await;
        let mut buffer = session.lock().await;
        let event = InteractionEvent::new(user_id, input_text, output_text, metadata, now);
        let recorded = buffer.record(event);
        if recorded {
            tracing::debug!(user_id, buffered = buffer.len(), "interaction recorded");
        }
        recorded
    }

    /// Number of events waiting in a user's buffer
    pub async fn buffered_events(&self, user_id: &str) -> usize {
        match self.sessions.get(user_id).await {
            Some(session) => session.lock().await.len(),
            None => 0,
        }
    }

    pub async fn should_propose_episode(&self, user_id: &str, now: DateTime<Utc>) -> bool {
        let session = self.sessions.get_or_create(user_id).await;
        let ready = session.lock().await.should_propose(now);
        ready
    }

    // ─── Proposal and confirmation ───────────────────────────────────────────

    /// Summarize and embed everything buffered for the user.
    ///
    /// The buffer is swapped for an empty one before the collaborators run, so
    /// no event can end up in two proposals. If a collaborator fails the
    /// events are put back at the front of the buffer and the error returned.
    pub async fn build_episode_proposal(
        &self,
        user_id: &str,
        topic: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Option<EpisodeProposal>> {
        let session = self.sessions.get_or_create(user_id).await;

        let events = {
            let mut buffer = session.lock().await;
            if !buffer.is_opted_in() || buffer.is_empty() {
                return Ok(None);
            }
            buffer.take()
        };

        match self.summarize_and_embed(&events).await {
            Ok((summary, embedding)) => {
                tracing::info!(user_id, events = events.len(), "episode proposal built");
                Ok(Some(EpisodeProposal::new(
                    user_id, events, summary, embedding, topic, now,
                )))
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "proposal build failed, restoring buffer");
                session.lock().await.restore(events);
                Err(e)
            }
        }
    }

    async fn summarize_and_embed(&self, events: &[InteractionEvent]) -> Result<(String, Vec<f32>)> {
        let summary = self.summarizer.summarize(events).await?;
        let embedding = self.embedder.embed(&summary).await?;
        Ok((summary, embedding))
    }

    /// Persist a proposal the user accepted; drop it otherwise.
    pub async fn confirm_episode(
        &self,
        proposal: EpisodeProposal,
        user_confirmed: bool,
        importance: Option<f32>,
        now: DateTime<Utc>,
    ) -> Result<Option<EpisodicUnit>> {
        if !user_confirmed {
            tracing::debug!(user_id = %proposal.user_id, "proposal discarded");
            self.pulses
                .emit(Pulse::ProposalDiscarded {
                    user_id: proposal.user_id.clone(),
                    event_count: proposal.events.len(),
                    timestamp: now,
                })
                .await;
            return Ok(None);
        }

        let session = self.sessions.get_or_create(&proposal.user_id).await;
        let mut unit = EpisodicUnit::from_proposal(proposal, importance, now);
        self.retention.initialize(&mut unit, now);

        {
            let _guard = session.lock().await;
            self.store.add(&unit).await?;
        }

        tracing::info!(
            user_id = %unit.user_id,
            episode_id = %unit.episode_id,
            ttl = %unit.ttl,
            "episode stored"
        );
        self.pulses
            .emit(Pulse::EpisodeStored {
                user_id: unit.user_id.clone(),
                episode_id: unit.episode_id.clone(),
                ttl: unit.ttl,
                timestamp: now,
            })
            .await;

        Ok(Some(unit))
    }

    // ─── Retrieval ───────────────────────────────────────────────────────────

    /// Most similar live episodes for a query. Each hit is a reuse, so the
    /// returned units already carry their extended TTL and visit count.
    pub async fn retrieve_context(
        &self,
        user_id: &str,
        query_text: &str,
        top_k: Option<usize>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScoredEpisode>> {
        let session = self.sessions.get_or_create(user_id).await;
        if !session.lock().await.is_opted_in() {
            return Ok(Vec::new());
        }

        let top_k = top_k.unwrap_or(self.config.default_top_k);
        let query_embedding = self.embedder.embed(query_text).await?;

        let hits = {
            let _guard = session.lock().await;
            let candidates = self.store.query(user_id, &query_embedding, top_k, now).await?;
            let mut hits = Vec::with_capacity(candidates.len());
            for mut hit in candidates {
                if self.reuse(&mut hit.unit, now).await? {
                    hit.rank = hits.len() + 1;
                    hits.push(hit);
                }
            }
            hits
        };

        tracing::debug!(user_id, hits = hits.len(), "context retrieved");
        Ok(hits)
    }

    /// Reuse one episode by id, even if it is dormant or expired (but not yet
    /// pruned). This is how dormant episodes come back.
    pub async fn revisit_episode(
        &self,
        user_id: &str,
        episode_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<EpisodicUnit>> {
        let session = self.sessions.get_or_create(user_id).await;
        let _guard = session.lock().await;

        let Some(mut unit) = self.store.get(user_id, episode_id).await? else {
            return Ok(None);
        };
        Ok(self.reuse(&mut unit, now).await?.then_some(unit))
    }

    /// Apply and persist one reuse. Returns false if the unit vanished from
    /// the store in the meantime, in which case nothing is emitted.
    async fn reuse(&self, unit: &mut EpisodicUnit, now: DateTime<Utc>) -> Result<bool> {
        let outcome = self.retention.on_reuse(unit, now);
        match self.store.update(unit).await {
            Ok(()) => {}
            Err(MemoryError::NotFound(episode_id)) => {
                tracing::warn!(user_id = %unit.user_id, %episode_id, "reused episode no longer stored");
                return Ok(false);
            }
            Err(e) => return Err(e),
        }
        self.pulses
            .emit(Pulse::EpisodeReused {
                user_id: unit.user_id.clone(),
                episode_id: unit.episode_id.clone(),
                visits: outcome.visits,
                ttl: unit.ttl,
                reactivated: outcome.reactivated,
                timestamp: now,
            })
            .await;
        Ok(true)
    }

    /// All stored episodes of a user, without counting as reuse
    pub async fn list_episodes(&self, user_id: &str) -> Result<Vec<EpisodicUnit>> {
        self.store.list_user(user_id).await
    }

    // ─── Maintenance ─────────────────────────────────────────────────────────

    /// Move every active episode past its TTL to dormant
    pub async fn sweep_lifecycle(&self, now: DateTime<Utc>) -> Result<usize> {
        let candidates = self.store.expired_active(now).await?;
        let mut dormant = 0;

        for mut unit in candidates {
            let session = self.sessions.get_or_create(&unit.user_id).await;
            let _guard = session.lock().await;

            // Re-read under the lock: a concurrent reuse may have renewed it
            let Some(current) = self.store.get(&unit.user_id, &unit.episode_id).await? else {
                continue;
            };
            unit = current;

            if self.retention.check_lifecycle(&mut unit, now) {
                self.store.update(&unit).await?;
                dormant += 1;
                self.pulses
                    .emit(Pulse::EpisodeDormant {
                        user_id: unit.user_id.clone(),
                        episode_id: unit.episode_id.clone(),
                        timestamp: now,
                    })
                    .await;
            }
        }

        Ok(dormant)
    }

    /// Permanently delete episodes expired for longer than the prune grace
    pub async fn prune_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now
            .checked_sub_signed(self.config.prune_grace)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        // Per user, under the session lock, so a prune never lands between a
        // retrieval's query and its reuse updates
        let mut pruned = 0;
        for user_id in self.store.users().await? {
            let session = self.sessions.get_or_create(&user_id).await;
            let _guard = session.lock().await;
            pruned += self.store.delete_expired_for(&user_id, cutoff).await?;
        }

        if pruned > 0 {
            tracing::info!(pruned, "expired episodes pruned");
        }
        self.pulses
            .emit(Pulse::EpisodesPruned {
                count: pruned,
                timestamp: now,
            })
            .await;
        Ok(pruned)
    }

    pub async fn stats(&self, now: DateTime<Utc>) -> Result<StoreStats> {
        self.store.stats(now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EpisodeStatus, UserId};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    fn orchestrator_with(store: Arc<dyn UnitStore>, config: OrchestratorConfig) -> Orchestrator {
        Orchestrator::new(
            config,
            store,
            Arc::new(TranscriptSummarizer::default()),
            Arc::new(BagOfWordsEmbedder::new()),
        )
        .unwrap()
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::in_memory(OrchestratorConfig::default()).unwrap()
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(MemoryError::Embedding("provider unreachable".into()))
        }
    }

    /// Wraps the in-memory index and, once armed, parks the next `query`
    /// after it has collected its hits until released
    #[derive(Default)]
    struct PausingStore {
        inner: InMemoryIndex,
        armed: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl UnitStore for PausingStore {
        fn backend_name(&self) -> &'static str {
            "pausing"
        }

        async fn add(&self, unit: &EpisodicUnit) -> Result<()> {
            self.inner.add(unit).await
        }

        async fn get(&self, user_id: &str, episode_id: &str) -> Result<Option<EpisodicUnit>> {
            self.inner.get(user_id, episode_id).await
        }

        async fn update(&self, unit: &EpisodicUnit) -> Result<()> {
            self.inner.update(unit).await
        }

        async fn query(
            &self,
            user_id: &str,
            query_embedding: &[f32],
            top_k: usize,
            now: DateTime<Utc>,
        ) -> Result<Vec<ScoredEpisode>> {
            let hits = self.inner.query(user_id, query_embedding, top_k, now).await?;
            if self.armed.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(hits)
        }

        async fn expired_active(&self, now: DateTime<Utc>) -> Result<Vec<EpisodicUnit>> {
            self.inner.expired_active(now).await
        }

        async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize> {
            self.inner.delete_expired(now).await
        }

        async fn delete_expired_for(&self, user_id: &str, now: DateTime<Utc>) -> Result<usize> {
            self.inner.delete_expired_for(user_id, now).await
        }

        async fn users(&self) -> Result<Vec<UserId>> {
            self.inner.users().await
        }

        async fn list_user(&self, user_id: &str) -> Result<Vec<EpisodicUnit>> {
            self.inner.list_user(user_id).await
        }

        async fn stats(&self, now: DateTime<Utc>) -> Result<StoreStats> {
            self.inner.stats(now).await
        }
    }

    async fn store_episode(dream: &Orchestrator, user: &str, input: &str, now: DateTime<Utc>) -> EpisodicUnit {
        dream
            .record_interaction(user, input, "noted", Metadata::new(), now)
            .await;
        let proposal = dream
            .build_episode_proposal(user, None, now)
            .await
            .unwrap()
            .unwrap();
        dream
            .confirm_episode(proposal, true, None, now)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn end_to_end_scenario() {
        let dream = orchestrator();
        let t0 = Utc::now();
        dream
            .configure_user("u1", UserMemoryConfig::new(true, 2, 600))
            .await;

        dream
            .record_interaction("u1", "I enjoy programming in Python", "Great choice", Metadata::new(), t0)
            .await;
        assert!(!dream.should_propose_episode("u1", t0).await);
        dream
            .record_interaction("u1", "The project is called DREAM", "Nice name", Metadata::new(), t0)
            .await;
        assert!(dream.should_propose_episode("u1", t0).await);

        let proposal = dream
            .build_episode_proposal("u1", Some("projects".into()), t0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(proposal.events.len(), 2);
        assert!(!proposal.summary.is_empty());
        assert_eq!(dream.buffered_events("u1").await, 0);

        let unit = dream
            .confirm_episode(proposal, true, Some(0.9), t0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(unit.visits, 0);
        assert_eq!(unit.ttl, unit.created_at + Duration::days(7));
        assert_eq!(unit.importance, Some(0.9));

        let t1 = t0 + Duration::hours(3);
        let hits = dream
            .retrieve_context("u1", "what project am I programming", None, t1)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].unit.episode_id, unit.episode_id);
        assert_eq!(hits[0].unit.visits, 1);
        assert_eq!(hits[0].unit.ttl, t1 + Duration::days(14));
        assert!(hits[0].score > 0.0);

        let stored = dream.list_episodes("u1").await.unwrap();
        assert_eq!(stored[0].visits, 1);
    }

    #[tokio::test]
    async fn proposal_snapshot_equals_buffer_and_clears_it() {
        let dream = orchestrator();
        let now = Utc::now();
        for i in 0..3 {
            dream
                .record_interaction("u1", &format!("q{i}"), &format!("a{i}"), Metadata::new(), now)
                .await;
        }

        let proposal = dream
            .build_episode_proposal("u1", None, now)
            .await
            .unwrap()
            .unwrap();
        let inputs: Vec<&str> = proposal.events.iter().map(|e| e.input_text.as_str()).collect();
        assert_eq!(inputs, vec!["q0", "q1", "q2"]);
        assert_eq!(dream.buffered_events("u1").await, 0);
        assert!(dream
            .build_episode_proposal("u1", None, now)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn opted_out_user_is_ignored_everywhere() {
        let dream = orchestrator();
        let now = Utc::now();
        store_episode(&dream, "u1", "remember this", now).await;

        dream.set_opt_in("u1", false).await;
        assert!(
            !dream
                .record_interaction("u1", "secret", "ok", Metadata::new(), now)
                .await
        );
        assert_eq!(dream.buffered_events("u1").await, 0);
        assert!(dream
            .build_episode_proposal("u1", None, now)
            .await
            .unwrap()
            .is_none());
        assert!(dream
            .retrieve_context("u1", "remember this", None, now)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn discarding_never_stores_anything() {
        let dream = orchestrator();
        let now = Utc::now();
        let mut pulses = dream.pulses().subscribe();

        for _ in 0..3 {
            dream
                .record_interaction("u1", "hello", "hi", Metadata::new(), now)
                .await;
            let proposal = dream
                .build_episode_proposal("u1", None, now)
                .await
                .unwrap()
                .unwrap();
            assert!(dream
                .confirm_episode(proposal, false, Some(1.0), now)
                .await
                .unwrap()
                .is_none());
        }

        assert_eq!(dream.stats(now).await.unwrap().total_units, 0);
        assert!(matches!(
            pulses.recv().await.unwrap(),
            Pulse::ProposalDiscarded { event_count: 1, .. }
        ));
    }

    #[tokio::test]
    async fn collaborator_failure_restores_buffer_and_propagates() {
        let dream = Orchestrator::new(
            OrchestratorConfig::default(),
            Arc::new(InMemoryIndex::new()),
            Arc::new(TranscriptSummarizer::default()),
            Arc::new(FailingEmbedder),
        )
        .unwrap();
        let now = Utc::now();
        dream
            .record_interaction("u1", "first", "ok", Metadata::new(), now)
            .await;

        let err = dream
            .build_episode_proposal("u1", None, now)
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Embedding(_)));
        assert_eq!(dream.buffered_events("u1").await, 1);
    }

    #[tokio::test]
    async fn expired_episode_is_invisible_then_pruned() {
        let dream = orchestrator();
        let now = Utc::now();
        let unit = store_episode(&dream, "u1", "old memory about gardens", now).await;

        let later = now + Duration::days(7);
        assert!(dream
            .retrieve_context("u1", "gardens", None, later)
            .await
            .unwrap()
            .is_empty());

        assert_eq!(dream.prune_expired(later).await.unwrap(), 1);
        assert!(dream.list_episodes("u1").await.unwrap().is_empty());
        assert!(dream
            .revisit_episode("u1", &unit.episode_id, later)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn dormant_episode_reactivates_on_revisit() {
        let dream = orchestrator();
        let now = Utc::now();
        let unit = store_episode(&dream, "u1", "trip to lisbon", now).await;

        let later = now + Duration::days(8);
        assert_eq!(dream.sweep_lifecycle(later).await.unwrap(), 1);
        assert_eq!(dream.sweep_lifecycle(later).await.unwrap(), 0);
        let stored = dream.list_episodes("u1").await.unwrap();
        assert_eq!(stored[0].status, EpisodeStatus::Dormant);

        let revived = dream
            .revisit_episode("u1", &unit.episode_id, later)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(revived.status, EpisodeStatus::Active);
        assert_eq!(revived.visits, 1);
        assert!(revived.ttl > later);

        let hits = dream
            .retrieve_context("u1", "lisbon", None, later)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].unit.visits, 2);
    }

    #[tokio::test]
    async fn prune_grace_keeps_dormant_episodes_reactivatable() {
        let config = OrchestratorConfigBuilder::new()
            .prune_grace(Duration::days(30))
            .build()
            .unwrap();
        let dream = orchestrator_with(Arc::new(InMemoryIndex::new()), config);
        let now = Utc::now();
        let unit = store_episode(&dream, "u1", "favourite colour is green", now).await;

        let expired = now + Duration::days(10);
        assert_eq!(dream.prune_expired(expired).await.unwrap(), 0);
        assert!(dream
            .revisit_episode("u1", &unit.episode_id, expired)
            .await
            .unwrap()
            .is_some());

        let much_later = expired + Duration::days(14 + 30);
        assert_eq!(dream.prune_expired(much_later).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn retrieval_is_partitioned_by_user_and_respects_top_k() {
        let dream = orchestrator();
        let now = Utc::now();
        for topic in ["rust borrow checker", "rust async runtimes", "rust macros"] {
            store_episode(&dream, "u1", topic, now).await;
        }
        store_episode(&dream, "u2", "rust embedded", now).await;

        let hits = dream
            .retrieve_context("u1", "rust", Some(2), now)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.unit.user_id == "u1"));
        assert_eq!(hits[0].rank, 1);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn works_against_sqlite_backend() {
        let dir = tempfile::tempdir().unwrap();
        let dream = Orchestrator::open(dir.path(), OrchestratorConfig::default())
            .await
            .unwrap();
        let now = Utc::now();

        let unit = store_episode(&dream, "u1", "sqlite keeps my memories", now).await;
        let hits = dream
            .retrieve_context("u1", "memories", None, now + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(hits[0].unit.episode_id, unit.episode_id);
        assert_eq!(dream.list_episodes("u1").await.unwrap()[0].visits, 1);
    }

    #[tokio::test]
    async fn concurrent_recording_and_building_never_duplicates_events() {
        let dream = Arc::new(orchestrator());
        let now = Utc::now();

        let writer = {
            let dream = Arc::clone(&dream);
            tokio::spawn(async move {
                for i in 0..200 {
                    dream
                        .record_interaction("u1", &format!("e{i}"), "ok", Metadata::new(), now)
                        .await;
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut seen = Vec::new();
        for _ in 0..50 {
            if let Some(p) = dream.build_episode_proposal("u1", None, now).await.unwrap() {
                seen.extend(p.events.into_iter().map(|e| e.input_text));
            }
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
        if let Some(p) = dream.build_episode_proposal("u1", None, now).await.unwrap() {
            seen.extend(p.events.into_iter().map(|e| e.input_text));
        }

        let expected: Vec<String> = (0..200).map(|i| format!("e{i}")).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn prune_waits_for_an_in_flight_retrieval() {
        let store = Arc::new(PausingStore::default());
        let dream = Arc::new(orchestrator_with(store.clone(), OrchestratorConfig::default()));
        let now = Utc::now();
        let unit = store_episode(&dream, "u1", "paused lookup", now).await;

        store.armed.store(true, Ordering::SeqCst);
        let retrieval = {
            let dream = Arc::clone(&dream);
            let at = unit.ttl - Duration::milliseconds(1);
            tokio::spawn(async move { dream.retrieve_context("u1", "paused lookup", None, at).await })
        };
        store.entered.notified().await;

        let mut prune = {
            let dream = Arc::clone(&dream);
            let at = unit.ttl;
            tokio::spawn(async move { dream.prune_expired(at).await })
        };
        let blocked = tokio::time::timeout(std::time::Duration::from_millis(50), &mut prune).await;
        assert!(blocked.is_err());

        store.release.notify_one();
        let hits = retrieval.await.unwrap().unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].unit.visits, 1);

        // The reuse renewed the TTL before the prune got the lock
        assert_eq!(prune.await.unwrap().unwrap(), 0);
        assert_eq!(dream.list_episodes("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn hits_deleted_behind_the_orchestrator_are_skipped() {
        let store = Arc::new(PausingStore::default());
        let dream = Arc::new(orchestrator_with(store.clone(), OrchestratorConfig::default()));
        let now = Utc::now();
        let unit = store_episode(&dream, "u1", "short lived", now).await;
        let mut pulses = dream.pulses().subscribe();

        store.armed.store(true, Ordering::SeqCst);
        let retrieval = {
            let dream = Arc::clone(&dream);
            tokio::spawn(async move { dream.retrieve_context("u1", "short lived", None, now).await })
        };
        store.entered.notified().await;
        assert_eq!(store.inner.delete_expired(unit.ttl).await.unwrap(), 1);
        store.release.notify_one();

        let hits = retrieval.await.unwrap().unwrap();
        assert!(hits.is_empty());
        assert!(pulses.try_recv().is_err());
    }

    #[tokio::test]
    async fn update_user_config_merges_under_one_lock() {
        let dream = orchestrator();
        dream.set_opt_in("u1", false).await;

        let config = dream
            .update_user_config("u1", |current| UserMemoryConfig {
                max_buffer_events: 3,
                ..current
            })
            .await;
        assert!(!config.opted_in);
        assert_eq!(config.max_buffer_events, 3);
        assert_eq!(config.max_buffer_age_secs, 600);
        assert_eq!(dream.user_config("u1").await, config);
    }

    #[test]
    fn config_builder_validates() {
        assert!(OrchestratorConfigBuilder::new().shard_count(0).build().is_err());
        assert!(OrchestratorConfigBuilder::new()
            .prune_grace(Duration::seconds(-1))
            .build()
            .is_err());
        let cfg = OrchestratorConfigBuilder::new()
            .default_top_k(3)
            .summary_max_chars(100)
            .build()
            .unwrap();
        assert_eq!(cfg.default_top_k, 3);
        assert_eq!(cfg.summary_max_chars, 100);
    }
}
