use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use dream::{run_maintenance, MaintenanceConfig, MaintenanceReport, MemoryError, UserMemoryConfig};
use std::sync::Arc;

use crate::models::{
    ConfirmRequest, ConfirmResponse, ContextHit, ContextQuery, EpisodeResponse,
    InteractionRequest, InteractionResponse, ProposalResponse, ProposeRequest, ReadyResponse,
    UserConfigRequest,
};
use crate::state::AppState;

fn status_for(e: &MemoryError) -> StatusCode {
    match e {
        MemoryError::NotFound(_) => StatusCode::NOT_FOUND,
        MemoryError::Validation(_) | MemoryError::Configuration(_) => StatusCode::BAD_REQUEST,
        MemoryError::DuplicateEpisode(_) => StatusCode::CONFLICT,
        MemoryError::Summarization(_) | MemoryError::Embedding(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn health_check() -> StatusCode {
    StatusCode::OK
}

pub async fn configure_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(payload): Json<UserConfigRequest>,
) -> Json<UserMemoryConfig> {
    let config = state
        .dream
        .update_user_config(&user_id, |current| {
            UserMemoryConfig::new(
                payload.opted_in,
                payload.max_buffer_events.unwrap_or(current.max_buffer_events),
                payload
                    .max_buffer_age_secs
                    .unwrap_or(current.max_buffer_age_secs),
            )
        })
        .await;
    Json(config)
}

pub async fn record_interaction(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(payload): Json<InteractionRequest>,
) -> Json<InteractionResponse> {
    let now = Utc::now();
    let recorded = state
        .dream
        .record_interaction(
            &user_id,
            &payload.input_text,
            &payload.output_text,
            payload.metadata,
            now,
        )
        .await;

    Json(InteractionResponse {
        recorded,
        buffered: state.dream.buffered_events(&user_id).await,
        ready: state.dream.should_propose_episode(&user_id, now).await,
    })
}

pub async fn episode_ready(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Json<ReadyResponse> {
    Json(ReadyResponse {
        ready: state.dream.should_propose_episode(&user_id, Utc::now()).await,
        buffered: state.dream.buffered_events(&user_id).await,
    })
}

pub async fn propose_episode(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    payload: Option<Json<ProposeRequest>>,
) -> Result<Json<Option<ProposalResponse>>, StatusCode> {
    let Json(request) = payload.unwrap_or_default();

    match state
        .dream
        .build_episode_proposal(&user_id, request.topic, Utc::now())
        .await
    {
        Ok(Some(proposal)) => {
            let response = ProposalResponse::from(&proposal);
            state.pending.insert(proposal).await;
            Ok(Json(Some(response)))
        }
        Ok(None) => Ok(Json(None)),
        Err(e) => {
            tracing::error!("Failed to build proposal: {}", e);
            Err(status_for(&e))
        }
    }
}

pub async fn confirm_episode(
    State(state): State<Arc<AppState>>,
    Path((user_id, proposal_id)): Path<(String, String)>,
    Json(payload): Json<ConfirmRequest>,
) -> Result<Json<ConfirmResponse>, StatusCode> {
    // Take it out first: a proposal is answered at most once
    let Some(proposal) = state.pending.take(&user_id, &proposal_id).await else {
        return Err(StatusCode::NOT_FOUND);
    };

    match state
        .dream
        .confirm_episode(proposal, payload.confirmed, payload.importance, Utc::now())
        .await
    {
        Ok(unit) => Ok(Json(ConfirmResponse {
            stored: unit.is_some(),
            episode: unit.map(EpisodeResponse::from),
        })),
        Err(e) => {
            tracing::error!("Failed to confirm episode: {}", e);
            Err(status_for(&e))
        }
    }
}

pub async fn retrieve_context(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(params): Query<ContextQuery>,
) -> Result<Json<Vec<ContextHit>>, StatusCode> {
    match state
        .dream
        .retrieve_context(&user_id, &params.query, params.top_k, Utc::now())
        .await
    {
        Ok(hits) => Ok(Json(hits.into_iter().map(ContextHit::from).collect())),
        Err(e) => {
            tracing::error!("Context retrieval failed: {}", e);
            Err(status_for(&e))
        }
    }
}

pub async fn revisit_episode(
    State(state): State<Arc<AppState>>,
    Path((user_id, episode_id)): Path<(String, String)>,
) -> Result<Json<EpisodeResponse>, StatusCode> {
    match state
        .dream
        .revisit_episode(&user_id, &episode_id, Utc::now())
        .await
    {
        Ok(Some(unit)) => Ok(Json(unit.into())),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Revisit failed: {}", e);
            Err(status_for(&e))
        }
    }
}

pub async fn run_maintenance_now(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MaintenanceReport>, StatusCode> {
    match run_maintenance(&state.dream, &MaintenanceConfig::default(), Utc::now()).await {
        Ok(report) => Ok(Json(report)),
        Err(e) => {
            tracing::error!("Maintenance failed: {}", e);
            Err(status_for(&e))
        }
    }
}
