use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod db;
mod error;
mod extract;
mod metrics;
mod milestone;
mod models;
mod report;
mod scheduler;

use config::{Config, ExtractionConfig};
use db::{PgStore, SnapshotStore, TraineeDirectory};
use extract::Orchestrator;
use metrics::{CodewarsClient, GithubClient};
use milestone::MilestoneAggregator;
use scheduler::Scheduler;

#[derive(Parser)]
#[command(name = "cohort-progress-tracker")]
#[command(about = "Tracks trainee Codewars and GitHub progress against cohort milestones", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load sample trainees and milestone targets
    Seed,
    /// Register trainees from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Run one extraction cycle over every registered trainee
    Extract,
    /// Show a trainee's latest snapshot against the current milestone
    Status {
        #[arg(long)]
        github: String,
        /// Print the raw [all, filtered, milestone] array instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// List every snapshot recorded for a trainee
    History {
        #[arg(long)]
        trainee_id: i32,
    },
    /// Serve the progress API and run extractions on a schedule
    Serve {
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let extraction = match cli.command {
        Commands::Extract | Commands::Serve { .. } => Some(ExtractionConfig::from_env()?),
        _ => None,
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Registered {inserted} new trainees from {}.", csv.display());
        }
        Commands::Extract => {
            let extraction = extraction.context("extraction settings were not loaded")?;
            let store = Arc::new(PgStore::new(pool));
            let orchestrator = build_orchestrator(&extraction, store.clone())?;

            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("interrupt received, no further trainees will be started");
                        cancel.cancel();
                    }
                }
            });

            let trainees = store
                .list_trainees()
                .await
                .context("failed to load trainee directory")?;
            let report = orchestrator.run_extraction(&trainees, &cancel).await;
            print!("{}", report::render_extraction(&report));
        }
        Commands::Status { github, json } => {
            let store = Arc::new(PgStore::new(pool));
            let aggregator = MilestoneAggregator::new(store.clone(), store);

            let view = match aggregator.progress_view(Some(&github)).await {
                Ok(view) => view,
                Err(err) if err.is_not_found() => {
                    println!("No milestone has been published yet.");
                    return Ok(());
                }
                Err(err) => return Err(err).context("failed to build progress view"),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                print!("{}", report::render_progress(&view));
            }
        }
        Commands::History { trainee_id } => {
            let store = PgStore::new(pool);
            let history = store
                .history(trainee_id)
                .await
                .with_context(|| format!("failed to load snapshots for trainee {trainee_id}"))?;

            if history.is_empty() {
                println!("No snapshots recorded for trainee {trainee_id}.");
                return Ok(());
            }

            for snapshot in history {
                println!(
                    "- #{} {}: rank {} kyu, {} points, {} PRs",
                    snapshot.id,
                    snapshot.timestamp.format("%Y-%m-%d %H:%M"),
                    snapshot.codewars_rank,
                    snapshot.codewars_js_points,
                    snapshot.github_prs
                );
            }
        }
        Commands::Serve { bind } => {
            let extraction = extraction.context("extraction settings were not loaded")?;
            serve(pool, bind.unwrap_or(config.bind_addr), &extraction).await?;
        }
    }

    Ok(())
}

fn build_orchestrator(
    extraction: &ExtractionConfig,
    store: Arc<PgStore>,
) -> anyhow::Result<Orchestrator> {
    let skills = CodewarsClient::new(extraction)?;
    let contributions = GithubClient::new(extraction)?;

    Ok(Orchestrator::new(
        Arc::new(skills),
        Arc::new(contributions),
        store,
        extraction.max_concurrency,
    ))
}

async fn serve(pool: PgPool, bind: SocketAddr, extraction: &ExtractionConfig) -> anyhow::Result<()> {
    let store = Arc::new(PgStore::new(pool));
    let orchestrator = build_orchestrator(extraction, store.clone())?;
    let scheduler = Scheduler::new(orchestrator, store.clone(), extraction.interval);

    let router = api::create_router(api::AppState {
        aggregator: MilestoneAggregator::new(store.clone(), store.clone()),
        snapshots: store,
        scheduler: scheduler.clone(),
    });

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(%bind, "progress API listening");

    scheduler.start();

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested");
            scheduler.shutdown().await;
        })
        .await
        .context("HTTP server failed")?;

    Ok(())
}
