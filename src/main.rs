use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use photobooth::provider::{EffectProvider, HttpProvider};
use photobooth::state::AppState;
use photobooth::{config, db, server};

const PRUNE_EVERY: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Print an example config and exit
    #[arg(long)]
    print_example: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if args.print_example {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("loading {}", args.config.display()))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/photobooth.db", cfg.app.data_dir));
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let addr: SocketAddr = cfg.app.bind_addr.parse()?;
    let provider: Arc<dyn EffectProvider> = Arc::new(HttpProvider::from_config(&cfg)?);
    let state = AppState::new(pool, provider, cfg);

    // Periodic sweep of finished jobs and stale polling URLs
    let jobs = Arc::clone(&state.jobs);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(PRUNE_EVERY).await;
            let removed = jobs.prune(Utc::now()).await;
            debug!(removed, "job sweep");
        }
    });

    info!("starting photobooth server");
    server::serve(state, addr).await
}
