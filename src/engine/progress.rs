use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::info;

use super::stats::LiveStats;

const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Log progress every `interval` until aborted. Reads counters only.
pub fn spawn_reporter(
    stats: Arc<LiveStats>,
    total: usize,
    lane_names: [String; 2],
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = Instant::now();
        let mut ticker = tokio::time::interval(interval.max(MIN_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let elapsed = start.elapsed().as_secs_f64();
            let completed = stats.completed();
            let rate = if elapsed > 0.0 {
                completed as f64 / elapsed
            } else {
                0.0
            };
            let remaining = total.saturating_sub(completed);
            let eta_secs = if rate > 0.0 {
                (remaining as f64 / rate) as u64
            } else {
                0
            };
            let lane = |i: usize| {
                stats
                    .lane(i)
                    .map(|l| format!("{}/{}", l.ok(), l.ok() + l.failed()))
                    .unwrap_or_default()
            };
            info!(
                elapsed_secs = elapsed as u64,
                completed,
                total,
                ok = stats.processed(),
                failed = stats.failed(),
                "progress {completed}/{total} | {rate:.1}/s | ETA {eta_secs}s | {}: {} | {}: {}",
                lane_names[0],
                lane(0),
                lane_names[1],
                lane(1),
            );
        }
    })
}
