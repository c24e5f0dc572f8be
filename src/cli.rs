//! DREAM CLI - Command line interface for the episodic memory store
//!
//! Usage:
//!   dream demo                       Scripted run of a full episode lifecycle
//!   dream simulate --days 365        Naive vs. adaptive retention storage curve
//!   dream list <user>                List a user's stored episodes
//!   dream stats                      Show statistics
//!   dream prune                      Sweep dormant episodes and prune expired ones

use chrono::{Duration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use dream::{
    run_maintenance, EpisodeStatus, EpisodicUnit, MaintenanceConfigBuilder, Metadata, Orchestrator,
    OrchestratorConfig, OrchestratorConfigBuilder, RetentionConfigBuilder, RetentionPolicy,
    UserMemoryConfig,
};
use rand::{rngs::StdRng, SeedableRng};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "dream")]
#[command(about = "DREAM - Episodic memory with adaptive retention")]
#[command(version)]
struct Cli {
    /// Path to data directory
    #[arg(short, long, env = "DREAM_DATA_DIR", default_value = "./dream_data")]
    data_dir: PathBuf,

    /// TTL of a never-reused episode, in days
    #[arg(long, env = "DREAM_BASE_TTL_DAYS", default_value = "7")]
    base_ttl_days: u64,

    /// Upper bound for any TTL, in days
    #[arg(long, env = "DREAM_MAX_TTL_DAYS", default_value = "365")]
    max_ttl_days: u64,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted record / propose / confirm / retrieve session
    Demo {
        /// Storage backend
        #[arg(short, long, value_enum, default_value = "memory")]
        backend: Backend,
    },

    /// Simulate storage growth with and without adaptive retention
    Simulate {
        /// Simulated days
        #[arg(long, default_value = "365")]
        days: u32,

        /// New episodes per day
        #[arg(long, default_value = "5")]
        episodes_per_day: u32,

        /// Seed for the revisit schedule
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// List one user's episodes
    List {
        /// User id
        user: String,
    },

    /// Get statistics
    Stats,

    /// Sweep expired episodes to dormant and delete them
    Prune {
        /// Keep expired episodes for this many extra days
        #[arg(long, default_value = "0")]
        grace_days: i64,

        /// Only mark dormant, delete nothing
        #[arg(long)]
        sweep_only: bool,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Backend {
    Memory,
    Sqlite,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "info,dream=debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let retention = RetentionConfigBuilder::new()
        .base_ttl_days(cli.base_ttl_days)
        .max_ttl_days(cli.max_ttl_days)
        .build()?;

    match cli.command {
        Commands::Demo { backend } => {
            let config = OrchestratorConfigBuilder::new().retention(retention).build()?;
            cmd_demo(&cli.data_dir, backend, config).await
        }
        Commands::Simulate {
            days,
            episodes_per_day,
            seed,
        } => cmd_simulate(RetentionPolicy::new(retention)?, days, episodes_per_day, seed),
        Commands::List { user } => {
            let config = OrchestratorConfigBuilder::new().retention(retention).build()?;
            cmd_list(&cli.data_dir, config, &user).await
        }
        Commands::Stats => {
            let config = OrchestratorConfigBuilder::new().retention(retention).build()?;
            cmd_stats(&cli.data_dir, config).await
        }
        Commands::Prune {
            grace_days,
            sweep_only,
        } => {
            let config = OrchestratorConfigBuilder::new()
                .retention(retention)
                .prune_grace(
                    Duration::try_days(grace_days)
                        .ok_or_else(|| anyhow::anyhow!("grace of {grace_days} days is out of range"))?,
                )
                .build()?;
            cmd_prune(&cli.data_dir, config, sweep_only).await
        }
    }
}

async fn cmd_demo(
    data_dir: &Path,
    backend: Backend,
    config: OrchestratorConfig,
) -> anyhow::Result<()> {
    let dream = match backend {
        Backend::Memory => Orchestrator::in_memory(config)?,
        Backend::Sqlite => Orchestrator::open(data_dir, config).await?,
    };
    let user = "u1";
    let t0 = Utc::now();

    println!("{}", "DREAM demo".bold().underline());
    println!("  Backend: {}", dream.store().backend_name().cyan());
    println!();

    dream
        .configure_user(user, UserMemoryConfig::new(true, 2, 600))
        .await;

    let turns = [
        ("I enjoy programming in Python", "Python is a great language for that."),
        ("My project is called DREAM", "That is a memorable name for a memory system."),
    ];
    for (input, output) in turns {
        dream
            .record_interaction(user, input, output, Metadata::new(), t0)
            .await;
        println!("{} {}", "User:".bold(), input);
        println!("{} {}", "AI:".bold(), output);
    }

    if !dream.should_propose_episode(user, t0).await {
        println!("{}", "Buffer not ready, nothing to propose".yellow());
        return Ok(());
    }

    let Some(proposal) = dream
        .build_episode_proposal(user, Some("projects".into()), t0)
        .await?
    else {
        println!("{}", "No proposal built".yellow());
        return Ok(());
    };

    println!();
    println!("{}", "Proposed episode:".bold().green());
    println!("  {}", proposal.summary);

    let Some(unit) = dream.confirm_episode(proposal, true, Some(0.9), t0).await? else {
        return Ok(());
    };
    println!();
    println!("{}", "Episode stored".green().bold());
    print_unit(&unit, t0);

    let t1 = t0 + Duration::days(3);
    let hits = dream
        .retrieve_context(user, "what is my project called", None, t1)
        .await?;

    println!();
    println!(
        "{}",
        format!("Retrieved {} episode(s) three days later:", hits.len()).bold()
    );
    for hit in &hits {
        println!("  {}. score {:.3}", hit.rank, hit.score);
        print_unit(&hit.unit, t1);
    }

    Ok(())
}

fn cmd_simulate(
    policy: RetentionPolicy,
    days: u32,
    episodes_per_day: u32,
    seed: u64,
) -> anyhow::Result<()> {
    let curve = simulate_storage(&policy, days, episodes_per_day, seed);
    let Some(last) = curve.last() else {
        println!("{}", "Nothing to simulate".yellow());
        return Ok(());
    };
    let peak = curve.iter().map(|d| d.adaptive).max().unwrap_or(0);

    println!("{}", "Storage simulation".bold().underline());
    println!(
        "  Days: {}  Episodes/day: {}  Base TTL: {}d  Max TTL: {}d",
        days,
        episodes_per_day,
        policy.config().base_ttl_days,
        policy.config().max_ttl_days
    );
    println!();

    let step = (days / 12).max(1) as usize;
    println!("  {:>5} {:>10} {:>10}", "day", "naive", "adaptive");
    for day in curve.iter().step_by(step) {
        println!("  {:>5} {:>10} {:>10}", day.day, day.naive, day.adaptive);
    }

    let saved = if last.naive == 0 {
        0.0
    } else {
        100.0 * (1.0 - last.adaptive as f64 / last.naive as f64)
    };
    println!();
    println!("  Naive storage:    {}", last.naive.to_string().red());
    println!("  Adaptive storage: {}", last.adaptive.to_string().green());
    println!("  Peak adaptive:    {}", peak);
    println!("  Savings:          {}", format!("{:.1}%", saved).bold());

    Ok(())
}

async fn cmd_list(data_dir: &Path, config: OrchestratorConfig, user: &str) -> anyhow::Result<()> {
    let dream = Orchestrator::open(data_dir, config).await?;
    let units = dream.list_episodes(user).await?;

    if units.is_empty() {
        println!("{}", "No episodes found".yellow());
        return Ok(());
    }

    let now = Utc::now();
    println!(
        "{}",
        format!("Showing {} episodes for {}:", units.len(), user).bold()
    );
    println!();
    for unit in &units {
        print_unit(unit, now);
    }

    Ok(())
}

async fn cmd_stats(data_dir: &Path, config: OrchestratorConfig) -> anyhow::Result<()> {
    let dream = Orchestrator::open(data_dir, config).await?;
    let stats = dream.stats(Utc::now()).await?;

    println!("{}", "DREAM Statistics".bold().underline());
    println!("  Users:           {}", stats.users);
    println!("  Total episodes:  {}", stats.total_units);
    println!("  Active:          {}", stats.active_units.to_string().green());
    println!("  Dormant:         {}", stats.dormant_units.to_string().yellow());
    println!("  Expired:         {}", stats.expired_units.to_string().red());

    Ok(())
}

async fn cmd_prune(
    data_dir: &Path,
    config: OrchestratorConfig,
    sweep_only: bool,
) -> anyhow::Result<()> {
    let dream = Orchestrator::open(data_dir, config).await?;
    let maintenance = MaintenanceConfigBuilder::new().prune(!sweep_only).build();

    println!("{}", "Running maintenance...".bold());
    let report = run_maintenance(&dream, &maintenance, Utc::now()).await?;

    println!("{}", "Maintenance complete".green().bold());
    println!("  Dormant: {}", report.dormant);
    println!("  Pruned:  {}", report.pruned);
    println!("  Took:    {}ms", report.duration_ms);

    Ok(())
}

fn print_unit(unit: &EpisodicUnit, now: chrono::DateTime<Utc>) {
    let status = match unit.status {
        EpisodeStatus::Active if unit.is_expired(now) => "expired".red(),
        EpisodeStatus::Active => "active".green(),
        EpisodeStatus::Dormant => "dormant".yellow(),
    };
    println!(
        "  {} {} | visits {} | ttl {} ({}d left)",
        unit.episode_id.dimmed(),
        status,
        unit.visits,
        unit.ttl.format("%Y-%m-%d %H:%M"),
        unit.remaining(now).num_days()
    );
    println!(
        "    {}",
        unit.summary.chars().take(100).collect::<String>()
    );
}

/// One day of the storage simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SimulatedDay {
    day: u32,
    naive: u64,
    adaptive: u64,
}

#[derive(Debug, Clone, Copy)]
struct SimulatedEpisode {
    visits: u32,
    expires_on: u64,
}

/// Naive storage keeps every episode forever. Adaptive storage creates
/// episodes with the base TTL, revisits about `2 * ln(1 + live)` of them per
/// day (distinct episodes, drawn from a seeded `StdRng`), extends their TTL through the
/// retention policy and prunes whatever has expired.
fn simulate_storage(
    policy: &RetentionPolicy,
    days: u32,
    episodes_per_day: u32,
    seed: u64,
) -> Vec<SimulatedDay> {
    simulate_storage_with(policy, days, episodes_per_day, seed, |_, _| {})
}

/// `simulate_storage`, reporting each day's revisited indices to `on_revisit`
fn simulate_storage_with(
    policy: &RetentionPolicy,
    days: u32,
    episodes_per_day: u32,
    seed: u64,
    mut on_revisit: impl FnMut(u32, &[usize]),
) -> Vec<SimulatedDay> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut live: Vec<SimulatedEpisode> = Vec::new();
    let mut curve = Vec::with_capacity(days as usize);

    for day in 1..=days {
        let today = u64::from(day);
        for _ in 0..episodes_per_day {
            live.push(SimulatedEpisode {
                visits: 0,
                expires_on: today.saturating_add(policy.ttl_days(0)),
            });
        }

        let revisits = ((live.len() as f64).ln_1p() * 2.0) as usize;
        let picked = rand::seq::index::sample(&mut rng, live.len(), revisits.min(live.len()));
        for idx in picked.iter() {
            let episode = &mut live[idx];
            episode.visits = episode.visits.saturating_add(1);
            episode.expires_on = today.saturating_add(policy.ttl_days(episode.visits));
        }
        on_revisit(day, &picked.into_vec());

        live.retain(|ep| ep.expires_on > today);

        curve.push(SimulatedDay {
            day,
            naive: today * u64::from(episodes_per_day),
            adaptive: live.len() as u64,
        });
    }

    curve
}
