//! Command-line entry point: run migrations, or start the background worker
//! and scheduler loops.

use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use timecore::calendar_client::google::GoogleCalendarClient;
use timecore::classification::ClassificationEngine;
use timecore::config::Config;
use timecore::database::Database;
use timecore::event_store::EventStore;
use timecore::jobs::executor::JobExecutor;
use timecore::jobs::JobQueue;
use timecore::oauth::ConnectionCredentialStore;
use timecore::scheduler::Scheduler;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "timecore", about = "Calendar sync and classification core")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run pending database migrations and exit.
    Migrate,
    /// Run the job worker loop (claims and executes sync jobs).
    Worker,
    /// Run the periodic background sync scheduler.
    Scheduler {
        #[arg(long, default_value = "0 0 3 * * *")]
        cron: String,
    },
    /// Run one scheduler pass (enqueue due sync jobs and clean up orphaned
    /// entries) and exit, rather than staying resident on a cron.
    SchedulerTick,
    /// Evaluate a classification query from a terminal without saving it as
    /// a rule.
    Preview {
        #[arg(long)]
        user_id: Uuid,
        #[arg(long)]
        query: String,
        #[arg(long)]
        project_id: Uuid,
        #[arg(long)]
        range_start: NaiveDate,
        #[arg(long)]
        range_end: NaiveDate,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    tracing::info!(
        version = timecore::VERSION,
        git_commit = env!("GIT_COMMIT"),
        built_at = env!("BUILD_TIME"),
        "starting timecore"
    );

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let db = Database::new(&config.database_url, config.database_max_connections)?;

    match cli.command {
        Commands::Migrate => {
            db.initialize().await?;
            tracing::info!("migrations complete");
        }
        Commands::Worker => {
            db.initialize().await?;
            run_worker(db, config).await?;
        }
        Commands::Scheduler { cron } => {
            db.initialize().await?;
            run_scheduler(db, config, &cron).await?;
        }
        Commands::SchedulerTick => {
            db.initialize().await?;
            let pool = db.pool().clone();
            let queue = JobQueue::new(pool.clone());
            let enqueued = timecore::scheduler::tick(
                &pool,
                &queue,
                config.staleness_threshold.as_secs() as i64,
                config.failure_threshold as i32,
            )
            .await?;
            tracing::info!(enqueued, "scheduler tick complete");
        }
        Commands::Preview { user_id, query, project_id, range_start, range_end } => {
            let engine = ClassificationEngine::new(db.pool().clone());
            let result = engine.preview(user_id, &query, project_id, range_start, range_end).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}

async fn run_worker(db: Database, config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let pool = db.pool().clone();
    let queue = JobQueue::new(pool.clone());
    let events = EventStore::new(pool.clone());

    let key = config
        .encryption_key_b64
        .as_deref()
        .ok_or("TIMECORE_ENCRYPTION_KEY must be set to run the worker")?;
    let credentials = ConnectionCredentialStore::new(pool.clone(), key)?;
    let client: Arc<dyn timecore::calendar_client::CalendarClient> =
        Arc::new(GoogleCalendarClient::new(Arc::new(credentials.clone())));

    let executor = JobExecutor::new(queue, events, client, credentials, config.failure_threshold as i32);

    let mut handles = Vec::with_capacity(config.job_worker_count);
    for i in 0..config.job_worker_count {
        let executor = executor.clone();
        let worker_id = format!("worker-{i}");
        let poll_interval = config.job_poll_interval;
        handles.push(tokio::spawn(async move {
            executor.run_loop(&worker_id, poll_interval).await;
        }));
    }

    tracing::info!(workers = config.job_worker_count, "job workers started");
    futures_wait_forever(handles).await;
    Ok(())
}

async fn run_scheduler(db: Database, config: Config, cron: &str) -> Result<(), Box<dyn std::error::Error>> {
    let pool = db.pool().clone();
    let queue = JobQueue::new(pool.clone());
    let mut scheduler = Scheduler::new(
        pool,
        queue,
        config.staleness_threshold.as_secs() as i64,
        config.failure_threshold as i32,
    )
    .await?;
    scheduler.start(cron).await?;

    tokio::signal::ctrl_c().await?;
    scheduler.stop().await?;
    Ok(())
}

async fn futures_wait_forever(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}
