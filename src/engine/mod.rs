//! Concurrent processing of pending items across two providers.
//!
//! Items are pre-filtered, shuffled and split between a primary and a
//! secondary provider. Each provider has its own concurrency cap. Workers
//! never touch the store: every outcome is sent to a single writer task, so
//! store mutations happen one at a time and in send order.

use anyhow::{bail, Result};
use chrono::Utc;
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::config::Config;
use crate::db::Pool;
use crate::llm::SharedProvider;
use crate::model::ContentItem;
use crate::summarizer::{self, Prefilter};

pub mod progress;
pub mod stats;
pub mod writer;

pub use stats::{DryRunPlan, LiveStats, ProviderReport, RunReport};
pub use writer::WriteOp;

/// Lane index of the provider receiving the first `floor(N * share)` items.
pub const PRIMARY: usize = 0;
pub const SECONDARY: usize = 1;

/// A provider and its concurrency cap.
#[derive(Clone)]
pub struct Lane {
    pub provider: SharedProvider,
    pub concurrency: usize,
}

impl Lane {
    pub fn new(provider: SharedProvider, concurrency: usize) -> Self {
        Self {
            provider,
            concurrency: concurrency.max(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Fraction of processable items sent to the primary lane.
    pub share: f64,
    pub max_retries: u32,
    pub progress_interval: Duration,
    pub dry_run: bool,
}

impl EngineSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            share: cfg.providers.gemini_share,
            max_retries: cfg.providers.max_retries,
            progress_interval: Duration::from_secs(cfg.app.progress_interval_secs),
            dry_run: false,
        }
    }
}

/// Pre-filter result for a batch.
#[derive(Debug, Default)]
pub struct Plan {
    pub processable: Vec<ContentItem>,
    pub skipped: Vec<(ContentItem, Prefilter)>,
}

impl Plan {
    pub fn skip_reasons(&self) -> BTreeMap<Prefilter, usize> {
        let mut out = BTreeMap::new();
        for (_, reason) in &self.skipped {
            *out.entry(*reason).or_insert(0) += 1;
        }
        out
    }
}

/// Sort `items` into processable and skipped.
pub fn plan(items: Vec<ContentItem>) -> Plan {
    let mut out = Plan::default();
    for item in items {
        match summarizer::classify(&item) {
            Prefilter::Processable => out.processable.push(item),
            reason => out.skipped.push((item, reason)),
        }
    }
    out
}

/// Index where the secondary lane's share begins.
pub fn split_index(len: usize, share: f64) -> usize {
    let share = if share.is_finite() {
        share.clamp(0.0, 1.0)
    } else {
        0.0
    };
    ((len as f64 * share).floor() as usize).min(len)
}

/// Shuffle and split at `floor(N * share)`. The shuffle keeps one prolific
/// source from landing entirely on one provider.
pub fn partition<R: Rng + ?Sized>(
    mut items: Vec<ContentItem>,
    share: f64,
    rng: &mut R,
) -> (Vec<ContentItem>, Vec<ContentItem>) {
    items.shuffle(rng);
    let secondary = items.split_off(split_index(items.len(), share));
    (items, secondary)
}

fn dry_run_plan(items: &[ContentItem], share: f64) -> DryRunPlan {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for item in items {
        *counts.entry(item.source_id.as_str()).or_insert(0) += 1;
    }
    let mut by_source: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(source, count)| (source.to_string(), count))
        .collect();
    by_source.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let avg_word_count = if items.is_empty() {
        0
    } else {
        items.iter().map(|i| i.word_count).sum::<i64>() / items.len() as i64
    };
    let primary_batch = split_index(items.len(), share);
    DryRunPlan {
        by_source,
        avg_word_count,
        primary_batch,
        secondary_batch: items.len() - primary_batch,
    }
}

pub struct Engine {
    pool: Pool,
    lanes: [Option<Lane>; 2],
    settings: EngineSettings,
}

impl Engine {
    pub fn new(
        pool: Pool,
        primary: Option<Lane>,
        secondary: Option<Lane>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            pool,
            lanes: [primary, secondary],
            settings,
        }
    }

    /// Share actually applied: a missing provider hands everything to the
    /// other one.
    pub fn effective_share(&self) -> f64 {
        match (&self.lanes[PRIMARY], &self.lanes[SECONDARY]) {
            (Some(_), None) => 1.0,
            (None, Some(_)) => 0.0,
            _ => self.settings.share,
        }
    }

    fn lane_names(&self) -> [String; 2] {
        let name = |i: usize, fallback: &str| {
            self.lanes[i]
                .as_ref()
                .map(|l| l.provider.name().to_string())
                .unwrap_or_else(|| fallback.to_string())
        };
        [name(PRIMARY, "primary"), name(SECONDARY, "secondary")]
    }

    /// Process `items` and wait until every resulting write has been applied.
    #[instrument(skip_all, fields(items = items.len()))]
    pub async fn run(&self, items: Vec<ContentItem>) -> Result<RunReport> {
        let mut rng = StdRng::from_entropy();
        self.run_with_rng(items, &mut rng).await
    }

    pub async fn run_with_rng<R: Rng + ?Sized>(
        &self,
        items: Vec<ContentItem>,
        rng: &mut R,
    ) -> Result<RunReport> {
        let started = Instant::now();
        let mut report = RunReport::new(items.len());
        let plan = plan(items);
        report.processable = plan.processable.len();
        report.skipped = plan.skipped.len();
        report.skip_reasons = plan.skip_reasons();
        info!(
            processable = report.processable,
            skipped = report.skipped,
            "pre-filter complete"
        );

        if self.settings.dry_run {
            report.dry_run = Some(dry_run_plan(&plan.processable, self.effective_share()));
            return Ok(report);
        }
        if plan.processable.is_empty() && plan.skipped.is_empty() {
            info!("nothing to process");
            return Ok(report);
        }
        if !plan.processable.is_empty() && self.lanes.iter().all(Option::is_none) {
            bail!("no LLM providers available; set GEMINI_API_KEY or OPENAI_API_KEY");
        }

        let live = Arc::new(LiveStats::default());
        let (tx, writer) = writer::spawn_writer(self.pool.clone(), live.clone());

        for (item, reason) in &plan.skipped {
            if let Some(status) = reason.status() {
                let op = WriteOp::Skip {
                    content_id: item.id.clone(),
                    status,
                };
                if tx.send(op).is_err() {
                    error!("writer stopped before skips were recorded");
                }
            }
        }

        match (&self.lanes[PRIMARY], &self.lanes[SECONDARY]) {
            (Some(_), None) if self.settings.share < 1.0 => {
                warn!("secondary provider unavailable; routing every item to the primary")
            }
            (None, Some(_)) if self.settings.share > 0.0 => {
                warn!("primary provider unavailable; routing every item to the secondary")
            }
            _ => {}
        }
        let (primary_items, secondary_items) =
            partition(plan.processable, self.effective_share(), rng);
        let batches = [primary_items, secondary_items];
        let names = self.lane_names();
        for (i, batch) in batches.iter().enumerate() {
            info!(provider = %names[i], items = batch.len(), "batch assigned");
        }

        let reporter = progress::spawn_reporter(
            live.clone(),
            report.processable,
            names.clone(),
            self.settings.progress_interval,
        );

        let mut workers = Vec::with_capacity(report.processable);
        for (lane_idx, batch) in batches.iter().enumerate() {
            let Some(lane) = self.lanes[lane_idx].as_ref() else {
                continue;
            };
            let semaphore = Arc::new(Semaphore::new(lane.concurrency));
            for item in batch {
                workers.push(process_one(
                    item,
                    lane_idx,
                    lane.provider.clone(),
                    semaphore.clone(),
                    tx.clone(),
                    self.settings.max_retries,
                ));
            }
        }
        join_all(workers).await;

        drop(tx);
        if let Err(err) = writer.await {
            error!(?err, "writer task ended abnormally");
        }
        reporter.abort();

        report.processed = live.processed();
        report.failed = live.failed();
        report.db_errors = live.db_errors();
        for (i, batch) in batches.iter().enumerate() {
            let Some(lane) = self.lanes[i].as_ref() else {
                continue;
            };
            let (ok, failed) = live
                .lane(i)
                .map(|l| (l.ok(), l.failed()))
                .unwrap_or_default();
            report.providers.push(ProviderReport {
                name: names[i].clone(),
                model: lane.provider.model_name().to_string(),
                assigned: batch.len(),
                ok,
                failed,
            });
        }
        report.elapsed = started.elapsed();
        info!(
            processed = report.processed,
            failed = report.failed,
            skipped = report.skipped,
            db_errors = report.db_errors,
            "run complete"
        );
        Ok(report)
    }
}

/// Summarize one item under the lane's concurrency cap and hand the outcome
/// to the writer.
async fn process_one(
    item: &ContentItem,
    lane: usize,
    provider: SharedProvider,
    semaphore: Arc<Semaphore>,
    tx: writer::WriteSender,
    max_retries: u32,
) {
    let processed = match semaphore.acquire().await {
        Ok(_permit) => {
            let prompt = summarizer::prepare_prompt(provider.as_ref(), item);
            match provider.generate(&prompt, max_retries).await {
                Some(reply) => {
                    let parsed =
                        summarizer::parse_response(item, &reply, provider.model_name(), Utc::now());
                    if parsed.is_none() {
                        warn!(content_id = %item.id, provider = provider.name(), "unusable reply");
                    }
                    parsed
                }
                None => {
                    warn!(content_id = %item.id, provider = provider.name(), "provider gave up");
                    None
                }
            }
        }
        Err(err) => {
            error!(?err, content_id = %item.id, "semaphore closed");
            None
        }
    };

    let op = WriteOp::Outcome {
        content_id: item.id.clone(),
        lane,
        processed: processed.map(Box::new),
    };
    if tx.send(op).is_err() {
        error!(content_id = %item.id, "writer stopped; outcome dropped");
    }
}
