use super::model::{Candidate, LabelCount};
use crate::model::{
    BacklogProgress, Concept, ContentCategory, ContentItem, ContentStatus, ContentType,
    DailyBriefing, Freshness, ProcessedContent, Tier,
};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Transaction};
use sqlx::{Sqlite, SqlitePool};
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;

const TIER_ORDER_SQL: &str = "CASE p.tier WHEN 'deep_dive' THEN 1 WHEN 'worth_a_look' THEN 2 ELSE 3 END";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }

    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match path_part.strip_prefix("~/") {
        Some(rest) => match std::env::var("HOME") {
            Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
            Err(_) => path_part.to_string(),
        },
        None => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// Timestamps are stored as fixed-width RFC 3339 UTC strings so that string
// comparison in SQL matches chronological order.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp {raw}"))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.filter(|s| !s.is_empty()).map(|s| parse_ts(&s)).transpose()
}

fn fmt_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

// ---------------------------------------------------------------------------
// Content items
// ---------------------------------------------------------------------------

/// Insert a fetched item unless its id or url is already stored.
/// Returns `true` when a new row was written.
#[instrument(skip_all)]
pub async fn save_content(pool: &Pool, item: &ContentItem) -> Result<bool> {
    let res = sqlx::query(
        "INSERT OR IGNORE INTO content_items \
         (id, source_id, source_name, content_type, title, url, published_at, fetched_at, \
          duration_seconds, transcript, word_count, status) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&item.id)
    .bind(&item.source_id)
    .bind(&item.source_name)
    .bind(item.content_type.as_str())
    .bind(&item.title)
    .bind(&item.url)
    .bind(fmt_ts(item.published_at))
    .bind(fmt_ts(item.fetched_at))
    .bind(item.duration_seconds)
    .bind(item.transcript.as_deref())
    .bind(item.word_count)
    .bind(item.status.as_str())
    .execute(pool)
    .await
    .context("failed to save content item")?;
    Ok(res.rows_affected() == 1)
}

fn content_from_row(row: &SqliteRow) -> Result<ContentItem> {
    let content_type: String = row.get("content_type");
    let status: String = row.get("status");
    let published_at: String = row.get("published_at");
    let fetched_at: String = row.get("fetched_at");
    Ok(ContentItem {
        id: row.get("id"),
        source_id: row.get("source_id"),
        source_name: row.get("source_name"),
        content_type: ContentType::parse_type(&content_type)
            .ok_or_else(|| anyhow!("unknown content type {}", content_type))?,
        title: row.get("title"),
        url: row.get("url"),
        published_at: parse_ts(&published_at)?,
        fetched_at: parse_ts(&fetched_at)?,
        duration_seconds: row.try_get::<Option<i64>, _>("duration_seconds").ok().flatten(),
        transcript: row.try_get::<Option<String>, _>("transcript").ok().flatten(),
        word_count: row.try_get::<Option<i64>, _>("word_count").ok().flatten().unwrap_or(0),
        status: ContentStatus::parse_status(&status)
            .ok_or_else(|| anyhow!("unknown content status {}", status))?,
    })
}

#[instrument(skip_all)]
pub async fn get_content(pool: &Pool, content_id: &str) -> Result<Option<ContentItem>> {
    let row = sqlx::query("SELECT * FROM content_items WHERE id = ?")
        .bind(content_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(content_from_row).transpose()
}

/// Pending items, newest first.
#[instrument(skip_all)]
pub async fn get_pending_content(pool: &Pool, limit: Option<i64>) -> Result<Vec<ContentItem>> {
    let rows = sqlx::query(
        "SELECT * FROM content_items WHERE status = 'pending' ORDER BY published_at DESC LIMIT ?",
    )
    .bind(limit.unwrap_or(-1))
    .fetch_all(pool)
    .await?;
    rows.iter().map(content_from_row).collect()
}

/// Set an item's status. A supplied transcript replaces the stored one and
/// refreshes the word count.
#[instrument(skip_all)]
pub async fn update_content_status(
    pool: &Pool,
    content_id: &str,
    status: ContentStatus,
    transcript: Option<&str>,
) -> Result<()> {
    match transcript {
        Some(text) => {
            sqlx::query(
                "UPDATE content_items SET status = ?, transcript = ?, word_count = ? WHERE id = ?",
            )
            .bind(status.as_str())
            .bind(text)
            .bind(text.split_whitespace().count() as i64)
            .bind(content_id)
            .execute(pool)
            .await
        }
        None => {
            sqlx::query("UPDATE content_items SET status = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(content_id)
                .execute(pool)
                .await
        }
    }
    .context("failed to update content status")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn count_content_by_status(pool: &Pool) -> Result<Vec<LabelCount>> {
    let rows = sqlx::query(
        "SELECT status AS label, COUNT(*) AS cnt FROM content_items GROUP BY status ORDER BY status",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| LabelCount {
            label: row.get("label"),
            count: row.get("cnt"),
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Processed content
// ---------------------------------------------------------------------------

/// Upsert by content id. Delivery state of an existing row is preserved.
#[instrument(skip_all)]
pub async fn save_processed(pool: &Pool, processed: &ProcessedContent) -> Result<()> {
    let insights = serde_json::to_string(&processed.key_insights)?;
    let concepts = serde_json::to_string(&processed.concepts_explained)?;
    let tags = serde_json::to_string(&processed.topic_tags)?;
    sqlx::query(
        "INSERT INTO processed_content \
         (content_id, core_summary, key_insights, concepts_explained, so_what, topic_tags, \
          content_category, freshness, tier, tier_rationale, processed_at, prompt_version, \
          model_used, is_backlog, delivered, delivered_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(content_id) DO UPDATE SET \
          core_summary = excluded.core_summary, \
          key_insights = excluded.key_insights, \
          concepts_explained = excluded.concepts_explained, \
          so_what = excluded.so_what, \
          topic_tags = excluded.topic_tags, \
          content_category = excluded.content_category, \
          freshness = excluded.freshness, \
          tier = excluded.tier, \
          tier_rationale = excluded.tier_rationale, \
          processed_at = excluded.processed_at, \
          prompt_version = excluded.prompt_version, \
          model_used = excluded.model_used, \
          is_backlog = excluded.is_backlog",
    )
    .bind(&processed.content_id)
    .bind(&processed.core_summary)
    .bind(insights)
    .bind(concepts)
    .bind(&processed.so_what)
    .bind(tags)
    .bind(processed.content_category.as_str())
    .bind(processed.freshness.as_str())
    .bind(processed.tier.as_str())
    .bind(&processed.tier_rationale)
    .bind(fmt_ts(processed.processed_at))
    .bind(&processed.prompt_version)
    .bind(&processed.model_used)
    .bind(processed.is_backlog)
    .bind(processed.delivered)
    .bind(processed.delivered_at.map(fmt_ts))
    .execute(pool)
    .await
    .context("failed to save processed content")?;
    Ok(())
}

fn json_list<T: serde::de::DeserializeOwned>(raw: Option<String>) -> Result<Vec<T>> {
    match raw.filter(|s| !s.trim().is_empty()) {
        Some(s) => Ok(serde_json::from_str(&s)?),
        None => Ok(Vec::new()),
    }
}

fn processed_from_row(row: &SqliteRow) -> Result<ProcessedContent> {
    let category: String = row.get("content_category");
    let freshness: String = row.get("freshness");
    let tier: String = row.get("tier");
    let processed_at: String = row.get("processed_at");
    let concepts: Vec<Concept> = json_list(row.try_get::<String, _>("concepts_explained").ok())?;
    Ok(ProcessedContent {
        content_id: row.get("content_id"),
        core_summary: row.get("core_summary"),
        key_insights: json_list(row.try_get::<String, _>("key_insights").ok())?,
        concepts_explained: concepts,
        so_what: row.try_get::<Option<String>, _>("so_what").ok().flatten().unwrap_or_default(),
        topic_tags: json_list(row.try_get::<String, _>("topic_tags").ok())?,
        content_category: ContentCategory::parse_category(&category)
            .unwrap_or(ContentCategory::Commentary),
        freshness: Freshness::parse_freshness(&freshness).unwrap_or(Freshness::Fresh),
        tier: Tier::parse_tier(&tier).unwrap_or(Tier::SummarySufficient),
        tier_rationale: row
            .try_get::<Option<String>, _>("tier_rationale")
            .ok()
            .flatten()
            .unwrap_or_default(),
        processed_at: parse_ts(&processed_at)?,
        prompt_version: row.get("prompt_version"),
        model_used: row.get("model_used"),
        is_backlog: row.get("is_backlog"),
        delivered: row.get("delivered"),
        delivered_at: parse_opt_ts(row.try_get::<Option<String>, _>("delivered_at").ok().flatten())?,
    })
}

#[instrument(skip_all)]
pub async fn get_processed(pool: &Pool, content_id: &str) -> Result<Option<ProcessedContent>> {
    let row = sqlx::query("SELECT * FROM processed_content WHERE content_id = ?")
        .bind(content_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(processed_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn update_processed_tier(pool: &Pool, content_id: &str, tier: Tier) -> Result<()> {
    sqlx::query("UPDATE processed_content SET tier = ? WHERE content_id = ?")
        .bind(tier.as_str())
        .bind(content_id)
        .execute(pool)
        .await
        .context("failed to update processed tier")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn tier_distribution(pool: &Pool) -> Result<Vec<LabelCount>> {
    let rows = sqlx::query(&format!(
        "SELECT p.tier AS label, COUNT(*) AS cnt FROM processed_content p \
         GROUP BY p.tier ORDER BY {TIER_ORDER_SQL}"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| LabelCount {
            label: row.get("label"),
            count: row.get("cnt"),
        })
        .collect())
}

#[instrument(skip_all)]
pub async fn get_full_content_with_processed(
    pool: &Pool,
    content_id: &str,
) -> Result<Option<(ContentItem, ProcessedContent)>> {
    let Some(content) = get_content(pool, content_id).await? else {
        return Ok(None);
    };
    let Some(processed) = get_processed(pool, content_id).await? else {
        return Ok(None);
    };
    Ok(Some((content, processed)))
}

// ---------------------------------------------------------------------------
// Candidate pools
// ---------------------------------------------------------------------------

fn candidate_from_row(row: &SqliteRow) -> Result<Candidate> {
    let tier: String = row.get("tier");
    let published_at: String = row.get("published_at");
    Ok(Candidate {
        content_id: row.get("content_id"),
        source_id: row.get("source_id"),
        tier: Tier::parse_tier(&tier).unwrap_or(Tier::SummarySufficient),
        is_backlog: row.get("is_backlog"),
        word_count: row.try_get::<Option<i64>, _>("word_count").ok().flatten().unwrap_or(0),
        published_at: parse_ts(&published_at)?,
    })
}

/// Undelivered, non-backlog, non-stale items published within the last
/// `max_age_weeks`, deep dives first then newest first.
#[instrument(skip_all)]
pub async fn get_undelivered_fresh(pool: &Pool, max_age_weeks: i64) -> Result<Vec<Candidate>> {
    let cutoff = Utc::now() - Duration::weeks(max_age_weeks);
    let rows = sqlx::query(&format!(
        "SELECT p.content_id, p.tier, p.is_backlog, c.source_id, c.word_count, c.published_at \
         FROM processed_content p JOIN content_items c ON p.content_id = c.id \
         WHERE p.delivered = 0 AND p.is_backlog = 0 AND p.freshness != 'stale' \
           AND c.published_at >= ? \
         ORDER BY {TIER_ORDER_SQL}, c.published_at DESC"
    ))
    .bind(fmt_ts(cutoff))
    .fetch_all(pool)
    .await?;
    rows.iter().map(candidate_from_row).collect()
}

/// Up to `limit` undelivered evergreen backlog items, same ordering as the
/// fresh pool.
#[instrument(skip_all)]
pub async fn get_undelivered_backlog(pool: &Pool, limit: i64) -> Result<Vec<Candidate>> {
    let rows = sqlx::query(&format!(
        "SELECT p.content_id, p.tier, p.is_backlog, c.source_id, c.word_count, c.published_at \
         FROM processed_content p JOIN content_items c ON p.content_id = c.id \
         WHERE p.delivered = 0 AND p.is_backlog = 1 AND p.freshness = 'evergreen' \
         ORDER BY {TIER_ORDER_SQL}, c.published_at DESC \
         LIMIT ?"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(candidate_from_row).collect()
}

#[instrument(skip_all)]
pub async fn count_undelivered_backlog(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM processed_content \
         WHERE delivered = 0 AND is_backlog = 1 AND freshness = 'evergreen'",
    )
    .fetch_one(pool)
    .await?;
    Ok(count)
}

#[instrument(skip_all)]
pub async fn count_delivered(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM processed_content WHERE delivered = 1")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Mark items delivered. Already delivered items keep their first timestamp.
#[instrument(skip_all)]
pub async fn mark_delivered(pool: &Pool, content_ids: &[String]) -> Result<()> {
    let mut tx = pool.begin().await?;
    mark_delivered_tx(&mut tx, content_ids, Utc::now()).await?;
    tx.commit().await?;
    Ok(())
}

async fn mark_delivered_tx(
    tx: &mut Transaction<'_, Sqlite>,
    content_ids: &[String],
    delivered_at: DateTime<Utc>,
) -> Result<()> {
    let ts = fmt_ts(delivered_at);
    for id in content_ids {
        sqlx::query(
            "UPDATE processed_content SET delivered = 1, delivered_at = COALESCE(delivered_at, ?) \
             WHERE content_id = ?",
        )
        .bind(&ts)
        .bind(id)
        .execute(&mut **tx)
        .await
        .context("failed to mark item delivered")?;
    }
    Ok(())
}

/// Persist a briefing unless one already exists for its date. A saved
/// briefing is never overwritten. Returns `true` when a row was written.
#[instrument(skip_all)]
pub async fn save_briefing(pool: &Pool, briefing: &DailyBriefing) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let inserted = save_briefing_tx(&mut tx, briefing).await?;
    tx.commit().await?;
    Ok(inserted)
}

async fn save_briefing_tx(
    tx: &mut Transaction<'_, Sqlite>,
    briefing: &DailyBriefing,
) -> Result<bool> {
    let res = sqlx::query(
        "INSERT OR IGNORE INTO daily_briefings \
         (id, briefing_date, created_at, fresh_count, backlog_count, total_count, item_ids, \
          email_sent, email_sent_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&briefing.id)
    .bind(fmt_date(briefing.briefing_date))
    .bind(fmt_ts(briefing.created_at))
    .bind(briefing.fresh_count as i64)
    .bind(briefing.backlog_count as i64)
    .bind(briefing.total_count as i64)
    .bind(serde_json::to_string(&briefing.item_ids)?)
    .bind(briefing.email_sent)
    .bind(briefing.email_sent_at.map(fmt_ts))
    .execute(&mut **tx)
    .await
    .context("failed to save briefing")?;
    Ok(res.rows_affected() == 1)
}

fn briefing_from_row(row: &SqliteRow) -> Result<DailyBriefing> {
    let date: String = row.get("briefing_date");
    let created_at: String = row.get("created_at");
    let item_ids: Vec<String> = json_list(row.try_get::<String, _>("item_ids").ok())?;
    Ok(DailyBriefing {
        id: row.get("id"),
        briefing_date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .with_context(|| format!("invalid briefing date {date}"))?,
        created_at: parse_ts(&created_at)?,
        fresh_count: row.get::<i64, _>("fresh_count").max(0) as usize,
        backlog_count: row.get::<i64, _>("backlog_count").max(0) as usize,
        total_count: row.get::<i64, _>("total_count").max(0) as usize,
        item_ids,
        email_sent: row.get("email_sent"),
        email_sent_at: parse_opt_ts(row.try_get::<Option<String>, _>("email_sent_at").ok().flatten())?,
    })
}

#[instrument(skip_all)]
pub async fn get_briefing(pool: &Pool, date: NaiveDate) -> Result<Option<DailyBriefing>> {
    let row = sqlx::query("SELECT * FROM daily_briefings WHERE briefing_date = ?")
        .bind(fmt_date(date))
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(briefing_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn mark_briefing_email_sent(pool: &Pool, date: NaiveDate) -> Result<()> {
    sqlx::query(
        "UPDATE daily_briefings SET email_sent = 1, email_sent_at = COALESCE(email_sent_at, ?) \
         WHERE briefing_date = ?",
    )
    .bind(fmt_ts(Utc::now()))
    .bind(fmt_date(date))
    .execute(pool)
    .await
    .context("failed to mark briefing sent")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn count_briefings(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM daily_briefings")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Save the briefing, mark its items delivered and advance the backlog
/// counter in one transaction. Returns `false` without touching anything when
/// the date was already delivered.
#[instrument(skip_all)]
pub async fn deliver_briefing(pool: &Pool, briefing: &DailyBriefing) -> Result<bool> {
    let mut tx = pool.begin().await?;
    if !save_briefing_tx(&mut tx, briefing).await? {
        tx.rollback().await?;
        return Ok(false);
    }
    let now = Utc::now();
    mark_delivered_tx(&mut tx, &briefing.item_ids, now).await?;
    if briefing.backlog_count > 0 {
        update_backlog_progress_tx(&mut tx, briefing.backlog_count as i64, now).await?;
    }
    tx.commit().await?;
    Ok(true)
}

// ---------------------------------------------------------------------------
// Backlog progress
// ---------------------------------------------------------------------------

/// Create the progress row. The first initialization wins; later calls
/// return `false` and leave the counters alone.
#[instrument(skip_all)]
pub async fn init_backlog_progress(pool: &Pool, total_items: i64) -> Result<bool> {
    let res = sqlx::query(
        "INSERT OR IGNORE INTO backlog_progress (id, total_items, delivered_items, last_updated) \
         VALUES (1, ?, 0, ?)",
    )
    .bind(total_items)
    .bind(fmt_ts(Utc::now()))
    .execute(pool)
    .await
    .context("failed to init backlog progress")?;
    Ok(res.rows_affected() == 1)
}

/// Add to the delivered counter. No-op until the progress row exists.
#[instrument(skip_all)]
pub async fn update_backlog_progress(pool: &Pool, delivered_increment: i64) -> Result<()> {
    let mut tx = pool.begin().await?;
    update_backlog_progress_tx(&mut tx, delivered_increment, Utc::now()).await?;
    tx.commit().await?;
    Ok(())
}

async fn update_backlog_progress_tx(
    tx: &mut Transaction<'_, Sqlite>,
    delivered_increment: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE backlog_progress SET delivered_items = delivered_items + ?, last_updated = ? \
         WHERE id = 1",
    )
    .bind(delivered_increment.max(0))
    .bind(fmt_ts(now))
    .execute(&mut **tx)
    .await
    .context("failed to update backlog progress")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_backlog_progress(pool: &Pool) -> Result<Option<BacklogProgress>> {
    let row = sqlx::query(
        "SELECT total_items, delivered_items, last_updated FROM backlog_progress WHERE id = 1",
    )
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let last_updated: String = row.get("last_updated");
    Ok(Some(BacklogProgress {
        total_items: row.get("total_items"),
        delivered_items: row.get("delivered_items"),
        last_updated: parse_ts(&last_updated)?,
    }))
}
