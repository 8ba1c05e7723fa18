use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use daily_briefing::config;
use daily_briefing::db;
use daily_briefing::engine::{Engine, EngineSettings, Lane};
use daily_briefing::llm::providers_from_config;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Summarize pending content with Gemini and OpenAI in parallel and exit when done"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Maximum number of pending items to load
    #[arg(long)]
    limit: Option<i64>,

    /// Fraction of items sent to Gemini (overrides providers.gemini_share)
    #[arg(long)]
    gemini_share: Option<f64>,

    /// Concurrent Gemini requests (overrides providers.gemini.concurrency)
    #[arg(long)]
    gemini_concurrency: Option<usize>,

    /// Concurrent OpenAI requests (overrides providers.openai.concurrency)
    #[arg(long)]
    openai_concurrency: Option<usize>,

    /// Seconds between progress lines (overrides app.progress_interval_secs)
    #[arg(long)]
    progress_interval: Option<u64>,

    /// Report the plan without calling any provider or writing to the store
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let mut cfg = config::load(Some(&args.config))?.with_env_keys();
    if let Some(share) = args.gemini_share {
        cfg.providers.gemini_share = share;
    }
    if let Some(n) = args.gemini_concurrency {
        cfg.providers.gemini.concurrency = n;
    }
    if let Some(n) = args.openai_concurrency {
        cfg.providers.openai.concurrency = n;
    }
    if let Some(secs) = args.progress_interval {
        cfg.app.progress_interval_secs = secs;
    }
    config::validate(&cfg)?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.database_url());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let items = db::get_pending_content(&pool, args.limit).await?;
    info!(pending = items.len(), "loaded pending content");
    if items.is_empty() {
        println!("No pending content.");
        return Ok(());
    }

    let (gemini, openai) = providers_from_config(&cfg.providers);
    if gemini.is_none() {
        warn!("gemini unavailable (no API key)");
    }
    if openai.is_none() {
        warn!("openai unavailable (no API key)");
    }
    let primary = gemini.map(|p| Lane::new(p, cfg.providers.gemini.concurrency));
    let secondary = openai.map(|p| Lane::new(p, cfg.providers.openai.concurrency));

    let mut settings = EngineSettings::from_config(&cfg);
    settings.dry_run = args.dry_run;

    let engine = Engine::new(pool.clone(), primary, secondary, settings);
    let report = engine.run(items).await?;
    println!("================================");
    println!("{report}");

    if !args.dry_run {
        println!("Tier distribution:");
        for row in db::tier_distribution(&pool).await? {
            println!("  {:<20} {}", row.label, row.count);
        }
        println!("Content by status:");
        for row in db::count_content_by_status(&pool).await? {
            println!("  {:<16} {}", row.label, row.count);
        }
    }
    Ok(())
}
