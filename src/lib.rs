//! # DREAM - Episodic memory with adaptive retention
//!
//! Conversational interactions are buffered per user, condensed into
//! episode proposals, stored on user confirmation, and retrieved by
//! similarity. Every reuse doubles an episode's time-to-live (up to a cap),
//! so what keeps getting used keeps getting remembered.
//!
//! ```rust,no_run
//! use chrono::Utc;
//! use dream::{Metadata, Orchestrator, OrchestratorConfig};
//!
//! # async fn run() -> dream::Result<()> {
//! let dream = Orchestrator::in_memory(OrchestratorConfig::default())?;
//! let now = Utc::now();
//!
//! dream.record_interaction("u1", "I love hiking", "Noted!", Metadata::new(), now).await;
//! if let Some(proposal) = dream.build_episode_proposal("u1", None, now).await? {
//!     dream.confirm_episode(proposal, true, Some(0.8), now).await?;
//! }
//!
//! for hit in dream.retrieve_context("u1", "hiking", None, now).await? {
//!     println!("{} ({:.2})", hit.unit.summary, hit.score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod embedding;
pub mod error;
pub mod index;
pub mod maintenance;
pub mod orchestrator;
pub mod pulses;
pub mod retention;
pub mod sessions;
pub mod storage_traits;
pub mod store;
pub mod summarizer;
pub mod types;
pub mod vector_search;

pub use buffer::EventBuffer;
pub use embedding::{BagOfWordsEmbedder, Embedder, HashEmbedder};
pub use error::{MemoryError, Result};
pub use index::InMemoryIndex;
pub use maintenance::{
    run_maintenance, spawn_maintenance, MaintenanceConfig, MaintenanceConfigBuilder,
    MaintenanceReport,
};
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, OrchestratorConfigBuilder, DURABLE_EMBEDDING_DIM,
};
pub use pulses::{Pulse, PulseConfig, PulseStats, PulseType, RetentionPulses};
pub use retention::{RetentionConfig, RetentionConfigBuilder, RetentionPolicy, ReuseOutcome};
pub use sessions::{shard_for_user, SessionHandle, SessionTable};
pub use storage_traits::{StoreStats, UnitStore};
pub use store::SqliteUnitStore;
pub use summarizer::{Summarizer, TranscriptSummarizer};
pub use types::{
    EpisodeId, EpisodeProposal, EpisodeStatus, EpisodicUnit, InteractionEvent, Metadata,
    ScoredEpisode, UserId, UserMemoryConfig,
};
pub use vector_search::{cosine_similarity, rank_units};
