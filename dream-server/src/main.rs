use axum::{
    routing::{get, post, put},
    Router,
};
use clap::Parser;
use dream::{
    spawn_maintenance, MaintenanceConfigBuilder, Orchestrator, OrchestratorConfigBuilder,
    RetentionConfigBuilder,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod models;
mod state;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "dream-server")]
#[command(about = "HTTP API for DREAM episodic memory")]
#[command(version)]
struct Args {
    /// Listen address
    #[arg(long, env = "DREAM_ADDR", default_value = "0.0.0.0:3000")]
    addr: SocketAddr,

    /// SQLite data directory
    #[arg(long, env = "DREAM_DATA_DIR", default_value = "./dream_data")]
    data_dir: PathBuf,

    /// Keep episodes in process memory only
    #[arg(long, env = "DREAM_IN_MEMORY")]
    in_memory: bool,

    #[arg(long, env = "DREAM_BASE_TTL_DAYS", default_value = "7")]
    base_ttl_days: u64,

    #[arg(long, env = "DREAM_MAX_TTL_DAYS", default_value = "365")]
    max_ttl_days: u64,

    /// Days an expired episode stays reactivatable before it is deleted
    #[arg(long, env = "DREAM_PRUNE_GRACE_DAYS", default_value = "0")]
    prune_grace_days: u32,

    /// Seconds an unanswered proposal is kept before it is dropped
    #[arg(long, env = "DREAM_PROPOSAL_TTL_SECS", default_value = "3600")]
    proposal_ttl_secs: u64,

    /// Seconds between background maintenance passes
    #[arg(long, env = "DREAM_MAINTENANCE_INTERVAL_SECS", default_value = "3600")]
    maintenance_interval_secs: u64,
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health_check))
        .route("/v1/users/:user_id/config", put(api::configure_user))
        .route("/v1/users/:user_id/interactions", post(api::record_interaction))
        .route("/v1/users/:user_id/episodes/ready", get(api::episode_ready))
        .route("/v1/users/:user_id/episodes/propose", post(api::propose_episode))
        .route("/v1/users/:user_id/episodes/:id/confirm", post(api::confirm_episode))
        .route("/v1/users/:user_id/episodes/:id/revisit", post(api::revisit_episode))
        .route("/v1/users/:user_id/context", get(api::retrieve_context))
        .route("/v1/maintenance", post(api::run_maintenance_now))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,dream=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let retention = RetentionConfigBuilder::new()
        .base_ttl_days(args.base_ttl_days)
        .max_ttl_days(args.max_ttl_days)
        .build()?;
    let config = OrchestratorConfigBuilder::new()
        .retention(retention)
        .prune_grace(chrono::Duration::days(i64::from(args.prune_grace_days)))
        .build()?;

    tracing::info!("Initializing DREAM...");
    let dream = if args.in_memory {
        Orchestrator::in_memory(config)?
    } else {
        Orchestrator::open(&args.data_dir, config).await?
    };
    let dream = Arc::new(dream);

    let maintenance = MaintenanceConfigBuilder::new()
        .interval(Duration::from_secs(args.maintenance_interval_secs.max(1)))
        .build();
    let maintenance_task = spawn_maintenance(Arc::clone(&dream), maintenance);

    let app = router(Arc::new(AppState::with_proposal_ttl(
        dream,
        Duration::from_secs(args.proposal_ttl_secs),
    )));

    tracing::info!("DREAM server listening on {}", args.addr);
    let listener = tokio::net::TcpListener::bind(args.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    maintenance_task.abort();
    Ok(())
}
