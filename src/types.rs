//! Episodic memory types: interactions, proposals and stored units

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Identifier of the user that owns buffers and episodes
pub type UserId = String;

/// Unique identifier for episodic units
pub type EpisodeId = String;

/// Free-form metadata attached to an interaction
pub type Metadata = HashMap<String, serde_json::Value>;

/// One recorded user/agent turn. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionEvent {
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
    pub input_text: String,
    pub output_text: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: Metadata,
}

impl InteractionEvent {
    pub fn new(
        user_id: impl Into<UserId>,
        input_text: impl Into<String>,
        output_text: impl Into<String>,
        metadata: Metadata,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            timestamp: now,
            input_text: input_text.into(),
            output_text: output_text.into(),
            metadata,
        }
    }
}

/// Per-user buffering settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserMemoryConfig {
    /// Whether anything is buffered or retained for this user
    pub opted_in: bool,
    /// Buffer length that makes an episode ready
    pub max_buffer_events: usize,
    /// Age of the oldest buffered event that makes an episode ready
    pub max_buffer_age_secs: u64,
}

impl UserMemoryConfig {
    pub fn new(opted_in: bool, max_buffer_events: usize, max_buffer_age_secs: u64) -> Self {
        Self {
            opted_in,
            max_buffer_events,
            max_buffer_age_secs,
        }
    }

    /// Maximum buffer age as a duration
    pub fn max_buffer_age(&self) -> Duration {
        i64::try_from(self.max_buffer_age_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }
}

impl Default for UserMemoryConfig {
    fn default() -> Self {
        Self {
            opted_in: true,
            max_buffer_events: 8,
            max_buffer_age_secs: 600,
        }
    }
}

/// A summarized candidate episode awaiting the user's decision.
///
/// Consumed exactly once by confirmation; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpisodeProposal {
    pub id: String,
    pub user_id: UserId,
    pub events: Vec<InteractionEvent>,
    pub summary: String,
    pub embedding: Vec<f32>,
    pub topic: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl EpisodeProposal {
    pub fn new(
        user_id: impl Into<UserId>,
        events: Vec<InteractionEvent>,
        summary: impl Into<String>,
        embedding: Vec<f32>,
        topic: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            events,
            summary: summary.into(),
            embedding,
            topic,
            created_at: now,
        }
    }
}

/// Lifecycle state of a stored episode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    /// Live and within its TTL (or not yet swept)
    Active,
    /// Soft-deleted after expiry; reactivated by a revisit
    Dormant,
}

impl EpisodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodeStatus::Active => "active",
            EpisodeStatus::Dormant => "dormant",
        }
    }
}

impl std::fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EpisodeStatus {
    type Err = crate::error::MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(EpisodeStatus::Active),
            "dormant" => Ok(EpisodeStatus::Dormant),
            other => Err(crate::error::MemoryError::Validation(format!(
                "unknown episode status '{other}'"
            ))),
        }
    }
}

/// The durable memory record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpisodicUnit {
    pub user_id: UserId,
    pub episode_id: EpisodeId,
    pub summary: String,
    pub embedding: Vec<f32>,
    /// When the user confirmed the episode
    pub created_at: DateTime<Utc>,
    /// Absolute expiry; the unit is expired once `now >= ttl`
    pub ttl: DateTime<Utc>,
    /// Number of reuses. Only ever increases.
    pub visits: u32,
    pub status: EpisodeStatus,
    pub topic: Option<String>,
    /// Importance score (0.0 - 1.0)
    pub importance: Option<f32>,
}

impl EpisodicUnit {
    /// Build a unit from a confirmed proposal. TTL is provisional until the
    /// retention policy initializes it.
    pub fn from_proposal(proposal: EpisodeProposal, importance: Option<f32>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: proposal.user_id,
            episode_id: format!("eu_{}", Uuid::new_v4().simple()),
            summary: proposal.summary,
            embedding: proposal.embedding,
            created_at: now,
            ttl: now,
            visits: 0,
            status: EpisodeStatus::Active,
            topic: proposal.topic,
            importance: importance.map(|i| i.clamp(0.0, 1.0)),
        }
    }

    /// Expiry predicate shared by queries, sweeps and pruning
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.ttl
    }

    pub fn is_dormant(&self) -> bool {
        self.status == EpisodeStatus::Dormant
    }

    /// Time left before expiry, zero once expired
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        if self.is_expired(now) {
            Duration::zero()
        } else {
            self.ttl - now
        }
    }
}

/// Query hit: a unit with its similarity to the query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredEpisode {
    pub unit: EpisodicUnit,
    /// Cosine similarity to the query embedding
    pub score: f32,
    /// Rank in results (1-based)
    pub rank: usize,
}
