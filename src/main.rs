use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use daily_briefing::briefing::{self, BriefingView, FooterStats, HtmlFilePresenter, Presenter};
use daily_briefing::config::{self, Config};
use daily_briefing::db::{self, Pool};
use daily_briefing::engine::{Engine, EngineSettings, Lane};
use daily_briefing::fetch::{self, JsonFileFetcher};
use daily_briefing::llm::{providers_from_config, FallbackClient, SharedProvider};
use daily_briefing::model::{ContentItem, DailyBriefing, ProcessedContent};

/// Expected backlog items cleared per day, used for the completion estimate.
const BACKLOG_DAILY_RATE: f64 = 3.0;

#[derive(Debug, Parser)]
#[command(author, version, about = "Daily content briefing pipeline")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store fetched items from a JSON file; already known urls are skipped
    Import {
        /// JSON array of fetched items
        #[arg(long)]
        file: PathBuf,
    },
    /// Summarize pending items one at a time, falling back between providers
    Process {
        /// Maximum number of pending items to load
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Preview the briefing for a date without delivering it
    Compose {
        /// Briefing date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Also render the preview to HTML in the data directory
        #[arg(long)]
        save_html: bool,
    },
    /// Compose, introduce, present and deliver the briefing for a date
    SendBriefing {
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Skip presentation; delivery state is still recorded
        #[arg(long)]
        no_render: bool,
    },
    /// Print store statistics
    Stats,
    /// Initialize backlog progress from the undelivered backlog
    BacklogInit,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?.with_env_keys();
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.database_url());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    match args.command {
        Command::Import { file } => import(&pool, file).await,
        Command::Process { limit } => process(&cfg, &pool, limit).await,
        Command::Compose { date, save_html } => {
            compose_preview(&cfg, &pool, date.unwrap_or_else(today), save_html).await
        }
        Command::SendBriefing { date, no_render } => {
            send_briefing(&cfg, &pool, date.unwrap_or_else(today), no_render).await
        }
        Command::Stats => stats(&pool).await,
        Command::BacklogInit => backlog_init(&pool).await,
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

async fn import(pool: &Pool, file: PathBuf) -> Result<()> {
    let fetcher = JsonFileFetcher::new(file);
    let report = fetch::ingest(pool, &fetcher).await?;
    println!(
        "Fetched {} | new {} ({} pending) | already stored {}",
        report.fetched, report.new, report.pending, report.existing
    );
    Ok(())
}

fn fallback_client(cfg: &Config) -> Result<Arc<FallbackClient>> {
    let (gemini, openai) = providers_from_config(&cfg.providers);
    let client = FallbackClient::new(gemini, openai).context("cannot build LLM client")?;
    Ok(Arc::new(client))
}

async fn process(cfg: &Config, pool: &Pool, limit: Option<i64>) -> Result<()> {
    let items = db::get_pending_content(pool, limit).await?;
    if items.is_empty() {
        println!("No pending content.");
        return Ok(());
    }
    let client: SharedProvider = fallback_client(cfg)?;
    let mut settings = EngineSettings::from_config(cfg);
    settings.share = 1.0;
    let engine = Engine::new(pool.clone(), Some(Lane::new(client, 1)), None, settings);
    let report = engine.run(items).await?;
    println!("{report}");
    Ok(())
}

async fn compose_preview(cfg: &Config, pool: &Pool, date: NaiveDate, save_html: bool) -> Result<()> {
    let briefing = briefing::compose(pool, date).await?;
    if briefing.is_empty() {
        println!("No content available for {date}.");
        return Ok(());
    }
    let items = briefing::briefing_items(pool, &briefing).await?;
    print_listing(&briefing, &items);

    if save_html {
        let progress = db::get_backlog_progress(pool).await?;
        let footer = footer_stats(pool, &briefing).await?;
        let presenter = HtmlFilePresenter::new(cfg.app.resolved_data_dir());
        let path = presenter
            .write(&BriefingView {
                briefing: &briefing,
                items: &items,
                intro: None,
                progress: progress.as_ref(),
                footer,
            })
            .await?;
        println!("Preview written to {}", path.display());
    }
    Ok(())
}

fn print_listing(briefing: &DailyBriefing, items: &[(ContentItem, ProcessedContent)]) {
    println!(
        "Briefing {}: {} items ({} fresh, {} backlog)",
        briefing.briefing_date, briefing.total_count, briefing.fresh_count, briefing.backlog_count
    );
    for (i, (item, processed)) in items.iter().enumerate() {
        let marker = if processed.is_backlog { " [backlog]" } else { "" };
        println!(
            "{:>2}. [{}] {} | {}{}",
            i + 1,
            processed.tier.as_str(),
            item.source_name,
            item.title,
            marker
        );
    }
}

async fn footer_stats(pool: &Pool, briefing: &DailyBriefing) -> Result<FooterStats> {
    Ok(FooterStats {
        briefing_number: db::count_briefings(pool).await? + 1,
        items_delivered: db::count_delivered(pool).await? + briefing.total_count as i64,
    })
}

async fn send_briefing(cfg: &Config, pool: &Pool, date: NaiveDate, no_render: bool) -> Result<()> {
    let mut briefing = briefing::compose(pool, date).await?;
    if briefing.is_empty() {
        println!("Nothing to send for {date}.");
        return Ok(());
    }
    let items = briefing::briefing_items(pool, &briefing).await?;
    print_listing(&briefing, &items);

    let presented = if no_render {
        info!("presentation skipped");
        false
    } else {
        let progress = db::get_backlog_progress(pool).await?;
        let footer = footer_stats(pool, &briefing).await?;
        let intro = match fallback_client(cfg) {
            Ok(client) => {
                briefing::generate_intro(client.as_ref(), &items, cfg.providers.max_retries).await
            }
            Err(err) => {
                warn!(error = %err, "no provider for the editorial intro");
                None
            }
        };
        let presenter = HtmlFilePresenter::new(cfg.app.resolved_data_dir());
        let view = BriefingView {
            briefing: &briefing,
            items: &items,
            intro: intro.as_deref(),
            progress: progress.as_ref(),
            footer,
        };
        match presenter.present(&view).await {
            Ok(ok) => ok,
            Err(err) => {
                warn!(error = %err, "presentation failed");
                false
            }
        }
    };

    if presented {
        briefing.email_sent = true;
        briefing.email_sent_at = Some(Utc::now());
    }
    if briefing::deliver(pool, &briefing).await? {
        println!("Delivered {} items for {date}.", briefing.total_count);
    } else {
        if presented {
            db::mark_briefing_email_sent(pool, date).await?;
        }
        println!("Briefing for {date} was already delivered.");
    }
    Ok(())
}

async fn stats(pool: &Pool) -> Result<()> {
    println!("Content by status:");
    for row in db::count_content_by_status(pool).await? {
        println!("  {:<16} {}", row.label, row.count);
    }
    println!("Tier distribution:");
    for row in db::tier_distribution(pool).await? {
        println!("  {:<20} {}", row.label, row.count);
    }
    match db::get_backlog_progress(pool).await? {
        Some(progress) => {
            println!(
                "Backlog: {}/{} delivered ({:.1}%), {} remaining, est. done {}",
                progress.delivered_items,
                progress.total_items,
                progress.percent_complete(),
                progress.items_remaining(),
                progress.estimated_completion(today(), BACKLOG_DAILY_RATE)
            );
        }
        None => println!("Backlog: not initialized (run backlog-init)"),
    }
    println!("Briefings composed: {}", db::count_briefings(pool).await?);
    println!("Items delivered:    {}", db::count_delivered(pool).await?);
    Ok(())
}

async fn backlog_init(pool: &Pool) -> Result<()> {
    let total = db::count_undelivered_backlog(pool).await?;
    if db::init_backlog_progress(pool, total).await? {
        println!("Backlog progress initialized with {total} items.");
    } else {
        let current = db::get_backlog_progress(pool).await?;
        match current {
            Some(p) => println!(
                "Backlog progress already initialized ({}/{} delivered).",
                p.delivered_items, p.total_items
            ),
            None => println!("Backlog progress already initialized."),
        }
    }
    Ok(())
}
