use dream::{EpisodeProposal, Orchestrator};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub const DEFAULT_PROPOSAL_TTL: Duration = Duration::from_secs(3600);

pub struct AppState {
    pub dream: Arc<Orchestrator>,
    pub pending: PendingProposals,
}

impl AppState {
    pub fn new(dream: Arc<Orchestrator>) -> Self {
        Self::with_proposal_ttl(dream, DEFAULT_PROPOSAL_TTL)
    }

    pub fn with_proposal_ttl(dream: Arc<Orchestrator>, proposal_ttl: Duration) -> Self {
        Self {
            dream,
            pending: PendingProposals::new(proposal_ttl),
        }
    }
}

/// Proposals awaiting the user's answer, keyed by proposal id.
///
/// Unanswered proposals expire after `ttl`; their events are gone, exactly as
/// if the user had declined.
pub struct PendingProposals {
    ttl: Duration,
    entries: Mutex<HashMap<String, (EpisodeProposal, Instant)>>,
}

impl PendingProposals {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Park a proposal, dropping any that have expired
    pub async fn insert(&self, proposal: EpisodeProposal) {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, (_, parked)| parked.elapsed() < self.ttl);
        let evicted = before - entries.len();
        if evicted > 0 {
            tracing::debug!(evicted, "expired pending proposals dropped");
        }
        entries.insert(proposal.id.clone(), (proposal, Instant::now()));
    }

    /// Remove and return a live proposal belonging to `user_id`
    pub async fn take(&self, user_id: &str, proposal_id: &str) -> Option<EpisodeProposal> {
        let mut entries = self.entries.lock().await;
        match entries.get(proposal_id) {
            Some((p, _)) if p.user_id == user_id => {}
            _ => return None,
        }
        let (proposal, parked) = entries.remove(proposal_id)?;
        (parked.elapsed() < self.ttl).then_some(proposal)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
