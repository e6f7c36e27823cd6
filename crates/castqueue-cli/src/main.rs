mod config;
mod dlq_cmd;
mod enqueue_cmd;
mod episode_cmd;
mod episodes;
mod handlers;
mod pipeline_cmd;
mod serve_cmd;
mod status_cmd;
mod worker_cmd;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use castqueue_core::command::CommandSurface;
use castqueue_core::episode::EpisodeRepository;
use castqueue_core::progress::ProgressBus;
use castqueue_db::pool;

use config::CastqueueConfig;
use episodes::TaskHistoryEpisodeRepository;

#[derive(Parser)]
#[command(name = "castqueue", about = "Podcast episode processing task queue")]
struct Cli {
    /// Database URL (overrides CASTQUEUE_DATABASE_URL env var and config file)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a castqueue config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/castqueue")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the castqueue database (creates it and runs migrations)
    DbInit,
    /// Enqueue a single stage for an episode
    Enqueue {
        /// Episode ID
        episode_id: String,
        /// Stage to enqueue (download, downsample, transcribe, clean, summarize)
        stage: String,
    },
    /// Run the full pipeline for an episode from its current state
    RunPipeline {
        /// Episode ID
        episode_id: String,
        /// Stop chaining once this stage completes (default: summarize)
        #[arg(long)]
        target_state: Option<String>,
    },
    /// Cancel all pending/retry-scheduled tasks for an episode
    Cancel {
        /// Episode ID
        episode_id: String,
    },
    /// Show a single task's current status
    Status {
        /// Task ID
        task_id: String,
    },
    /// Show a queue-wide snapshot of task counts by status
    Queue,
    /// Dead-letter queue management
    Dlq {
        #[command(subcommand)]
        command: DlqCommands,
    },
    /// Show the recorded failure for an episode, if any
    EpisodeFailure {
        /// Episode ID
        episode_id: String,
    },
    /// Clear an episode's recorded failure and re-enqueue its failed stage
    RetryEpisode {
        /// Episode ID
        episode_id: String,
    },
    /// Run the worker loop (claim, execute, classify, persist, chain)
    Worker,
    /// Run the HTTP command surface
    Serve {
        /// Bind address
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Subcommand)]
enum DlqCommands {
    /// List dead-lettered tasks
    List,
    /// Return a dead-lettered task to pending
    Retry { task_id: String },
    /// Mark a dead-lettered task completed without retrying it
    Skip { task_id: String },
    /// Retry every dead-lettered task
    RetryAll,
}

fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        queue: config::QueueSection::default(),
        backoff: config::BackoffSection::default(),
    };

    config::save_config(&cfg)?;
    println!("Wrote config file to {}", path.display());
    Ok(())
}

async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = CastqueueConfig::resolve(cli_db_url)?;

    println!("Initializing castqueue database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    let migrations_path = pool::default_migrations_path();
    pool::run_migrations(&db_pool, migrations_path).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Table row counts:");
    for (table, count) in counts {
        println!("  {table}: {count}");
    }

    db_pool.close().await;
    Ok(())
}

/// Build the [`CommandSurface`] a data-touching command needs: resolve
/// config, open a pool, and wire the task-history-derived episode
/// repository and an in-process progress bus.
async fn build_surface(cli_db_url: Option<&str>) -> anyhow::Result<(CommandSurface, CastqueueConfig)> {
    let resolved = CastqueueConfig::resolve(cli_db_url)?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    let episodes: Arc<dyn EpisodeRepository> =
        Arc::new(TaskHistoryEpisodeRepository::new(db_pool.clone()));
    let progress = Arc::new(ProgressBus::new());
    let surface = CommandSurface::new(db_pool, episodes, progress);
    Ok((surface, resolved))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => cmd_init(&db_url, force),
        Commands::DbInit => cmd_db_init(cli.database_url.as_deref()).await,
        Commands::Enqueue { episode_id, stage } => {
            let (surface, _) = build_surface(cli.database_url.as_deref()).await?;
            enqueue_cmd::run_enqueue(&surface, &episode_id, &stage).await
        }
        Commands::RunPipeline {
            episode_id,
            target_state,
        } => {
            let (surface, _) = build_surface(cli.database_url.as_deref()).await?;
            pipeline_cmd::run_pipeline(&surface, &episode_id, target_state).await
        }
        Commands::Cancel { episode_id } => {
            let (surface, _) = build_surface(cli.database_url.as_deref()).await?;
            pipeline_cmd::run_cancel(&surface, &episode_id).await
        }
        Commands::Status { task_id } => {
            let (surface, _) = build_surface(cli.database_url.as_deref()).await?;
            status_cmd::run_status(&surface, &task_id).await
        }
        Commands::Queue => {
            let (surface, _) = build_surface(cli.database_url.as_deref()).await?;
            status_cmd::run_queue_snapshot(&surface).await
        }
        Commands::Dlq { command } => {
            let (surface, _) = build_surface(cli.database_url.as_deref()).await?;
            match command {
                DlqCommands::List => dlq_cmd::run_dlq_list(&surface, surface.pool()).await,
                DlqCommands::Retry { task_id } => dlq_cmd::run_dlq_retry(&surface, &task_id).await,
                DlqCommands::Skip { task_id } => dlq_cmd::run_dlq_skip(&surface, &task_id).await,
                DlqCommands::RetryAll => dlq_cmd::run_dlq_retry_all(&surface).await,
            }
        }
        Commands::EpisodeFailure { episode_id } => {
            let (surface, _) = build_surface(cli.database_url.as_deref()).await?;
            episode_cmd::run_episode_failure(surface.pool(), &episode_id).await
        }
        Commands::RetryEpisode { episode_id } => {
            let (surface, _) = build_surface(cli.database_url.as_deref()).await?;
            episode_cmd::run_retry_episode(&surface, &episode_id).await
        }
        Commands::Worker => {
            let resolved = CastqueueConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            worker_cmd::run_worker(db_pool, resolved.worker_config()).await
        }
        Commands::Serve { bind, port } => {
            let (surface, _) = build_surface(cli.database_url.as_deref()).await?;
            serve_cmd::run_serve(surface, &bind, port).await
        }
    }
    .with_context(|| "command failed")
}
