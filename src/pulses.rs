//! Retention pulses - event bus for episode lifecycle changes
//!
//! Subscribers see every episode that is stored, reused, made dormant or
//! pruned, which is enough to drive dashboards or audit logs without polling
//! the store.
//!
//! Example:
//! ```rust,no_run
//! use dream::{RetentionPulses, Pulse};
//!
//! #[tokio::main]
//! async fn main() {
//!     let pulses = RetentionPulses::default();
//!     let mut subscriber = pulses.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(pulse) = subscriber.recv().await {
//!             println!("{}", pulse.description());
//!         }
//!     });
//! }
//! ```

use crate::types::{EpisodeId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// A lifecycle event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Pulse {
    /// A confirmed episode entered the store
    EpisodeStored {
        user_id: UserId,
        episode_id: EpisodeId,
        ttl: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// An episode was reused and its TTL extended
    EpisodeReused {
        user_id: UserId,
        episode_id: EpisodeId,
        visits: u32,
        ttl: DateTime<Utc>,
        reactivated: bool,
        timestamp: DateTime<Utc>,
    },

    /// An episode's TTL passed and it was soft-deleted
    EpisodeDormant {
        user_id: UserId,
        episode_id: EpisodeId,
        timestamp: DateTime<Utc>,
    },

    /// Expired episodes were permanently removed
    EpisodesPruned {
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// The user declined a proposal; its events are gone
    ProposalDiscarded {
        user_id: UserId,
        event_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A maintenance pass finished
    MaintenanceCompleted {
        dormant: usize,
        pruned: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl Pulse {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Pulse::EpisodeStored { timestamp, .. }
            | Pulse::EpisodeReused { timestamp, .. }
            | Pulse::EpisodeDormant { timestamp, .. }
            | Pulse::EpisodesPruned { timestamp, .. }
            | Pulse::ProposalDiscarded { timestamp, .. }
            | Pulse::MaintenanceCompleted { timestamp, .. } => *timestamp,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Pulse::EpisodeStored { user_id, .. }
            | Pulse::EpisodeReused { user_id, .. }
            | Pulse::EpisodeDormant { user_id, .. }
            | Pulse::ProposalDiscarded { user_id, .. } => Some(user_id),
            _ => None,
        }
    }

    pub fn episode_id(&self) -> Option<&str> {
        match self {
            Pulse::EpisodeStored { episode_id, .. }
            | Pulse::EpisodeReused { episode_id, .. }
            | Pulse::EpisodeDormant { episode_id, .. } => Some(episode_id),
            _ => None,
        }
    }

    /// Get a human-readable description
    pub fn description(&self) -> String {
        match self {
            Pulse::EpisodeStored { episode_id, ttl, .. } => {
                format!("Episode {} stored (expires {})", episode_id, ttl.to_rfc3339())
            }
            Pulse::EpisodeReused {
                episode_id,
                visits,
                reactivated,
                ..
            } => {
                if *reactivated {
                    format!("Episode {} reactivated (visits: {})", episode_id, visits)
                } else {
                    format!("Episode {} reused (visits: {})", episode_id, visits)
                }
            }
            Pulse::EpisodeDormant { episode_id, .. } => {
                format!("Episode {} is dormant", episode_id)
            }
            Pulse::EpisodesPruned { count, .. } => format!("Pruned {} expired episodes", count),
            Pulse::ProposalDiscarded {
                user_id,
                event_count,
                ..
            } => {
                format!(
                    "Proposal for {} discarded ({} events dropped)",
                    user_id, event_count
                )
            }
            Pulse::MaintenanceCompleted {
                dormant, pruned, ..
            } => {
                format!("Maintenance: {} dormant, {} pruned", dormant, pruned)
            }
        }
    }
}

/// Types of pulses (for stats)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PulseType {
    EpisodeStored,
    EpisodeReused,
    EpisodeDormant,
    EpisodesPruned,
    ProposalDiscarded,
    MaintenanceCompleted,
}

impl From<&Pulse> for PulseType {
    fn from(pulse: &Pulse) -> Self {
        match pulse {
            Pulse::EpisodeStored { .. } => PulseType::EpisodeStored,
            Pulse::EpisodeReused { .. } => PulseType::EpisodeReused,
            Pulse::EpisodeDormant { .. } => PulseType::EpisodeDormant,
            Pulse::EpisodesPruned { .. } => PulseType::EpisodesPruned,
            Pulse::ProposalDiscarded { .. } => PulseType::ProposalDiscarded,
            Pulse::MaintenanceCompleted { .. } => PulseType::MaintenanceCompleted,
        }
    }
}

/// Configuration for the pulse bus
#[derive(Debug, Clone)]
pub struct PulseConfig {
    /// Channel capacity (buffer size)
    pub channel_capacity: usize,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1000,
        }
    }
}

/// Statistics for pulse monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PulseStats {
    pub total_emitted: u64,
    pub last_emitted: Option<DateTime<Utc>>,
    pub by_type: HashMap<PulseType, u64>,
}

/// Event bus for retention changes
#[derive(Debug, Clone)]
pub struct RetentionPulses {
    sender: broadcast::Sender<Pulse>,
    stats: Arc<RwLock<PulseStats>>,
}

impl RetentionPulses {
    pub fn new(config: PulseConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));

        Self {
            sender,
            stats: Arc::new(RwLock::new(PulseStats::default())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Pulse> {
        self.sender.subscribe()
    }

    pub async fn emit(&self, pulse: Pulse) {
        {
            let mut stats = self.stats.write().await;
            stats.total_emitted += 1;
            stats.last_emitted = Some(pulse.timestamp());
            *stats.by_type.entry((&pulse).into()).or_insert(0) += 1;
        }

        // No subscribers is the common case, not an error
        if self.sender.send(pulse).is_err() {
            tracing::trace!("pulse emitted with no subscribers");
        }
    }

    pub async fn stats(&self) -> PulseStats {
        self.stats.read().await.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for RetentionPulses {
    fn default() -> Self {
        Self::new(PulseConfig::default())
    }
}
