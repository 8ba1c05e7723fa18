use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument};

use super::stats::LiveStats;
use crate::db::{self, Pool};
use crate::model::{ContentStatus, ProcessedContent};

/// One store mutation requested by the engine.
#[derive(Debug)]
pub enum WriteOp {
    /// Item rejected by the pre-filter.
    Skip {
        content_id: String,
        status: ContentStatus,
    },
    /// Result of a provider call. `None` means the call or the reply failed.
    Outcome {
        content_id: String,
        lane: usize,
        processed: Option<Box<ProcessedContent>>,
    },
}

pub type WriteSender = mpsc::UnboundedSender<WriteOp>;

/// Spawn the only task allowed to write to the store during a run. It applies
/// operations in the order they were sent and stops once every sender is
/// dropped and the queue is empty.
pub fn spawn_writer(pool: Pool, stats: Arc<LiveStats>) -> (WriteSender, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<WriteOp>();
    let handle = tokio::spawn(async move {
        while let Some(op) = rx.recv().await {
            apply(&pool, &stats, op).await;
        }
        debug!("writer queue drained");
    });
    (tx, handle)
}

/// Apply one operation. Store errors are counted and logged; they never stop
/// the writer.
#[instrument(skip_all)]
pub async fn apply(pool: &Pool, stats: &LiveStats, op: WriteOp) {
    match op {
        WriteOp::Skip { content_id, status } => {
            if let Err(err) = db::update_content_status(pool, &content_id, status, None).await {
                error!(?err, content_id, status = status.as_str(), "failed to record skip");
                stats.record_db_error();
            }
        }
        WriteOp::Outcome {
            content_id,
            lane,
            processed: Some(processed),
        } => {
            let res: anyhow::Result<()> = async {
                db::save_processed(pool, &processed).await?;
                db::update_content_status(pool, &content_id, ContentStatus::Processed, None).await
            }
            .await;
            match res {
                Ok(()) => {
                    debug!(content_id, tier = processed.tier.as_str(), "saved");
                    stats.record_success(lane);
                }
                Err(err) => {
                    error!(?err, content_id, "failed to save processed content");
                    stats.record_db_error();
                }
            }
        }
        WriteOp::Outcome {
            content_id,
            lane,
            processed: None,
        } => {
            match db::update_content_status(pool, &content_id, ContentStatus::Failed, None).await {
                Ok(()) => stats.record_failure(lane),
                Err(err) => {
                    error!(?err, content_id, "failed to mark item failed");
                    stats.record_db_error();
                }
            }
        }
    }
}
