use dream::{EpisodeProposal, EpisodicUnit, Metadata, ScoredEpisode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct UserConfigRequest {
    pub opted_in: bool,
    pub max_buffer_events: Option<usize>,
    pub max_buffer_age_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct InteractionRequest {
    pub input_text: String,
    pub output_text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Serialize)]
pub struct InteractionResponse {
    pub recorded: bool,
    pub buffered: usize,
    pub ready: bool,
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub buffered: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProposeRequest {
    pub topic: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProposalResponse {
    pub proposal_id: String,
    pub summary: String,
    pub topic: Option<String>,
    pub event_count: usize,
    pub created_at: String,
}

impl From<&EpisodeProposal> for ProposalResponse {
    fn from(p: &EpisodeProposal) -> Self {
        Self {
            proposal_id: p.id.clone(),
            summary: p.summary.clone(),
            topic: p.topic.clone(),
            event_count: p.events.len(),
            created_at: p.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub confirmed: bool,
    pub importance: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub stored: bool,
    pub episode: Option<EpisodeResponse>,
}

#[derive(Debug, Deserialize)]
pub struct ContextQuery {
    pub query: String,
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct EpisodeResponse {
    pub episode_id: String,
    pub summary: String,
    pub topic: Option<String>,
    pub visits: u32,
    pub status: String,
    pub importance: Option<f32>,
    pub created_at: String,
    pub ttl: String,
}

impl From<EpisodicUnit> for EpisodeResponse {
    fn from(u: EpisodicUnit) -> Self {
        Self {
            episode_id: u.episode_id,
            summary: u.summary,
            topic: u.topic,
            visits: u.visits,
            status: u.status.to_string(),
            importance: u.importance,
            created_at: u.created_at.to_rfc3339(),
            ttl: u.ttl.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ContextHit {
    pub rank: usize,
    pub score: f32,
    pub episode: EpisodeResponse,
}

impl From<ScoredEpisode> for ContextHit {
    fn from(hit: ScoredEpisode) -> Self {
        Self {
            rank: hit.rank,
            score: hit.score,
            episode: hit.unit.into(),
        }
    }
}
