use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mzansi_insights::auth::{ensure_admin, SessionKeys};
use mzansi_insights::autopost::AutoPoster;
use mzansi_insights::config::{Config, ServerConfig};
use mzansi_insights::db::Database;
use mzansi_insights::fetcher::Fetcher;
use mzansi_insights::generator::ContentGenerator;
use mzansi_insights::routes::{self, AppState};
use mzansi_insights::scheduler::{build_queue, AppJobRunner, Scheduler, SystemClock};

#[derive(Parser)]
#[command(name = "mzansi-insights")]
#[command(version, about = "South African news blog with RSS ingestion and auto-posting")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "mzansi.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the web server and scheduler (default)
    Serve,
    /// Refresh all active feeds once
    Fetch,
    /// Run one auto-post pass
    AutoPost,
    /// Drop and recreate all tables
    ResetDb,
    /// Insert the built-in sample articles
    SeedSamples,
    /// Print a generated article without storing it
    Generate {
        /// grants, jobs or entertainment
        category: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mzansi_insights=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;
    config.apply_env();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Fetch => {
            let db = open_database(&config).await?;
            let fetcher = Fetcher::new(db, config.fetch.clone())?;
            let inserted = fetcher.refresh_all_feeds().await?;
            println!("Fetched {} new posts", inserted);
            Ok(())
        }
        Command::AutoPost => {
            let db = open_database(&config).await?;
            let fetcher = Arc::new(Fetcher::new(db.clone(), config.fetch.clone())?);
            let poster = AutoPoster::new(db, fetcher, config.autopost.clone());
            let report = poster.run(Utc::now()).await?;
            println!("{}", report);
            Ok(())
        }
        Command::ResetDb => {
            let db = open_database(&config).await?;
            db.reset().await?;
            seed(&db, &config).await?;
            println!("Database reset");
            Ok(())
        }
        Command::SeedSamples => {
            let db = open_database(&config).await?;
            let fetcher = Fetcher::new(db, config.fetch.clone())?;
            let inserted = fetcher.insert_samples(Utc::now()).await?;
            println!("Inserted {} sample articles", inserted);
            Ok(())
        }
        Command::Generate { category } => {
            let article = {
                let mut rng = rand::thread_rng();
                ContentGenerator.generate(&category, &mut rng)
            };
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({
                "title": article.title,
                "slug": article.slug,
                "category": article.category,
                "author": article.author,
                "excerpt": article.excerpt,
                "tags": article.tags,
                "content": article.content,
            }))?);
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        warn!("{} not found, using default configuration", path.display());
        return Ok(Config::default());
    }
    let config = Config::load(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    info!("Loaded {} feeds from configuration", config.feeds.len());
    Ok(config)
}

/// Directory holding a file-backed SQLite database, if any.
fn database_dir(database_url: &str) -> Option<PathBuf> {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() || path.starts_with(":memory:") {
        return None;
    }
    Path::new(path)
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
}

async fn seed(db: &Database, config: &Config) -> anyhow::Result<()> {
    let added = db.seed_categories(&config.categories).await?;
    if added > 0 {
        info!("Seeded {} categories", added);
    }
    ensure_admin(db, &config.admin.username, &config.admin.password).await?;
    db.sync_feeds(&config.feeds).await?;
    Ok(())
}

async fn open_database(config: &Config) -> anyhow::Result<Arc<Database>> {
    if let Some(dir) = database_dir(&config.server.database_url) {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let db = Database::new(&config.server.database_url).await?;
    db.initialize().await?;
    seed(&db, config).await?;
    info!("Database initialized");
    Ok(Arc::new(db))
}

async fn serve(config: Config) -> anyhow::Result<()> {
    if config.server.secret_key == ServerConfig::default().secret_key {
        warn!("Using the default secret key, set SECRET_KEY in production");
    }

    let db = open_database(&config).await?;
    let fetcher = Arc::new(Fetcher::new(db.clone(), config.fetch.clone())?);
    let poster = Arc::new(AutoPoster::new(
        db.clone(),
        fetcher.clone(),
        config.autopost.clone(),
    ));

    // Start the scheduler
    let queue = build_queue(&config, Utc::now())?;
    let runner = Arc::new(AppJobRunner::new(db.clone(), fetcher.clone(), poster.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Scheduler::new(Arc::new(SystemClock), runner, queue);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    let bind = config.server.bind.clone();
    let state = Arc::new(AppState {
        db,
        fetcher,
        poster,
        sessions: SessionKeys::new(&config.server.secret_key),
        config: Arc::new(config),
    });

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    info!("Server starting on http://{}", bind);

    axum::serve(listener, routes::app(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = scheduler_task.await;
    info!("Shutdown complete");
    Ok(())
}
