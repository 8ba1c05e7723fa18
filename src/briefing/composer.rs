//! Daily selection: which undelivered items go into a date's briefing and in
//! what order.
//!
//! The selection steps are pure functions over [`Candidate`]s. [`compose`]
//! reads the pools, runs the steps and persists deep-dive demotions;
//! [`deliver`] is the separate step that commits delivery state.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use std::cmp::Reverse;
use tracing::{info, instrument};

use crate::db::{self, Candidate, Pool};
use crate::model::{briefing_id, ContentItem, DailyBriefing, ProcessedContent, Tier};

pub const MAX_ITEMS: usize = 18;
/// Soft goal; only `MAX_ITEMS` is enforced.
pub const TARGET_ITEMS: usize = 15;
pub const MAX_DEEP_DIVES: usize = 3;
pub const MAX_PER_SOURCE: usize = 2;
/// A source may place a third item only when it is a deep dive.
pub const MAX_PER_SOURCE_WITH_DEEP_DIVE: usize = 3;
pub const FRESH_MAX_AGE_WEEKS: i64 = 6;

/// How many backlog items to pull given the size of the fresh pool. Light
/// news days are padded with backlog, heavy ones stay lean.
pub fn backlog_target(fresh_count: usize) -> i64 {
    match fresh_count {
        0..=3 => 8,
        4..=6 => 5,
        7..=9 => 3,
        _ => 2,
    }
}

/// Group `items` by source in first-appearance order, keeping each group's
/// relative order.
fn group_by_source(items: Vec<Candidate>) -> Vec<Vec<Candidate>> {
    let mut groups: Vec<Vec<Candidate>> = Vec::new();
    for item in items {
        match groups.iter_mut().find(|g| g[0].source_id == item.source_id) {
            Some(group) => group.push(item),
            None => groups.push(vec![item]),
        }
    }
    groups
}

/// At most two items per source, plus a third if it is a deep dive. Overflow
/// stays undelivered for a later date.
pub fn enforce_source_diversity(items: Vec<Candidate>) -> Vec<Candidate> {
    let mut kept = Vec::with_capacity(items.len());
    for mut group in group_by_source(items) {
        group.sort_by_key(|c| c.tier.priority());
        for (i, item) in group.into_iter().enumerate() {
            if i < MAX_PER_SOURCE
                || (i < MAX_PER_SOURCE_WITH_DEEP_DIVE && item.tier == Tier::DeepDive)
            {
                kept.push(item);
            }
        }
    }
    kept
}

/// Keep the three longest deep dives and demote the rest to worth_a_look.
/// Returns the new list (kept deep dives, then everything else, then the
/// demoted items) and the ids that were demoted.
pub fn cap_deep_dives(items: Vec<Candidate>) -> (Vec<Candidate>, Vec<String>) {
    let deep_count = items.iter().filter(|c| c.tier == Tier::DeepDive).count();
    if deep_count <= MAX_DEEP_DIVES {
        return (items, Vec::new());
    }

    let (mut deep, rest): (Vec<_>, Vec<_>) =
        items.into_iter().partition(|c| c.tier == Tier::DeepDive);
    deep.sort_by_key(|c| Reverse(c.word_count));
    let mut demoted = deep.split_off(MAX_DEEP_DIVES);
    for item in &mut demoted {
        item.tier = Tier::WorthALook;
    }
    let demoted_ids = demoted.iter().map(|c| c.content_id.clone()).collect();

    let mut out = deep;
    out.extend(rest);
    out.extend(demoted);
    (out, demoted_ids)
}

/// Stable sort by tier priority, then truncate to `cap`.
pub fn prioritize_and_cap(mut items: Vec<Candidate>, cap: usize) -> Vec<Candidate> {
    items.sort_by_key(|c| c.tier.priority());
    items.truncate(cap);
    items
}

/// Tier blocks in priority order. Inside a block fresh items come before
/// backlog and sources are interleaved round-robin, busiest source first, so
/// the same source only repeats back to back when nothing else is left in the
/// block. A block whose first source would repeat the previous block's last
/// source starts with its second source instead.
pub fn order_for_display(items: Vec<Candidate>) -> Vec<Candidate> {
    let mut blocks: [Vec<Candidate>; 3] = Default::default();
    for item in items {
        let idx = Tier::ALL
            .iter()
            .position(|t| *t == item.tier)
            .unwrap_or(Tier::ALL.len() - 1);
        blocks[idx].push(item);
    }

    let mut out: Vec<Candidate> = Vec::new();
    for mut block in blocks {
        if block.is_empty() {
            continue;
        }
        block.sort_by_key(|c| c.is_backlog);
        let mut queues = group_by_source(block);
        queues.sort_by_key(|q| Reverse(q.len()));
        if queues.len() > 1 {
            if let Some(prev) = out.last() {
                if queues[0][0].source_id == prev.source_id {
                    queues.swap(0, 1);
                }
            }
        }

        let mut queues: Vec<std::collections::VecDeque<Candidate>> =
            queues.into_iter().map(Into::into).collect();
        while !queues.is_empty() {
            for queue in queues.iter_mut() {
                if let Some(item) = queue.pop_front() {
                    out.push(item);
                }
            }
            queues.retain(|q| !q.is_empty());
        }
    }
    out
}

/// Result of running the selection steps over the two pools.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Final display order.
    pub items: Vec<Candidate>,
    /// Deep dives demoted by the ceiling; must be persisted.
    pub demoted: Vec<String>,
}

pub fn select(fresh: Vec<Candidate>, backlog: Vec<Candidate>) -> Selection {
    let mut all = fresh;
    all.extend(backlog);
    let diverse = enforce_source_diversity(all);
    let (capped, demoted) = cap_deep_dives(diverse);
    let capped = if capped.len() > MAX_ITEMS {
        prioritize_and_cap(capped, MAX_ITEMS)
    } else {
        capped
    };
    Selection {
        items: order_for_display(capped),
        demoted,
    }
}

pub fn build_briefing(date: NaiveDate, ordered: &[Candidate], now: DateTime<Utc>) -> DailyBriefing {
    let backlog_count = ordered.iter().filter(|c| c.is_backlog).count();
    DailyBriefing {
        id: briefing_id(date),
        briefing_date: date,
        created_at: now,
        fresh_count: ordered.len() - backlog_count,
        backlog_count,
        total_count: ordered.len(),
        item_ids: ordered.iter().map(|c| c.content_id.clone()).collect(),
        email_sent: false,
        email_sent_at: None,
    }
}

/// The briefing for `date`. A briefing already saved for that date is
/// returned as stored. Otherwise a new one is selected; it is not saved until
/// [`deliver`] is called.
#[instrument(skip(pool))]
pub async fn compose(pool: &Pool, date: NaiveDate) -> Result<DailyBriefing> {
    if let Some(existing) = db::get_briefing(pool, date).await? {
        info!(%date, items = existing.total_count, "briefing already exists");
        return Ok(existing);
    }

    let fresh = db::get_undelivered_fresh(pool, FRESH_MAX_AGE_WEEKS).await?;
    let target = backlog_target(fresh.len());
    let backlog = db::get_undelivered_backlog(pool, target).await?;
    info!(
        fresh = fresh.len(),
        backlog = backlog.len(),
        backlog_target = target,
        "candidate pools loaded"
    );

    let selection = select(fresh, backlog);
    for id in &selection.demoted {
        db::update_processed_tier(pool, id, Tier::WorthALook).await?;
    }
    if !selection.demoted.is_empty() {
        info!(count = selection.demoted.len(), "deep dives demoted");
    }

    let briefing = build_briefing(date, &selection.items, Utc::now());
    info!(
        total = briefing.total_count,
        fresh = briefing.fresh_count,
        backlog = briefing.backlog_count,
        "briefing composed"
    );
    Ok(briefing)
}

/// Persist the briefing and mark its items delivered. Returns `false` when
/// the date had already been delivered; nothing changes in that case.
#[instrument(skip_all, fields(date = %briefing.briefing_date))]
pub async fn deliver(pool: &Pool, briefing: &DailyBriefing) -> Result<bool> {
    let delivered = db::deliver_briefing(pool, briefing).await?;
    if delivered {
        info!(
            items = briefing.total_count,
            backlog = briefing.backlog_count,
            "briefing delivered"
        );
    }
    Ok(delivered)
}

/// Content and summary for each item, in briefing order. Items missing from
/// the store are skipped.
#[instrument(skip_all)]
pub async fn briefing_items(
    pool: &Pool,
    briefing: &DailyBriefing,
) -> Result<Vec<(ContentItem, ProcessedContent)>> {
    let mut out = Vec::with_capacity(briefing.item_ids.len());
    for id in &briefing.item_ids {
        if let Some(pair) = db::get_full_content_with_processed(pool, id).await? {
            out.push(pair);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cand(id: &str, source: &str, tier: Tier, backlog: bool, words: i64) -> Candidate {
        Candidate {
            content_id: id.into(),
            source_id: source.into(),
            tier,
            is_backlog: backlog,
            word_count: words,
            published_at: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
        }
    }

    fn ids(items: &[Candidate]) -> Vec<&str> {
        items.iter().map(|c| c.content_id.as_str()).collect()
    }

    #[test]
    fn backlog_target_steps() {
        assert_eq!(backlog_target(0), 8);
        assert_eq!(backlog_target(3), 8);
        assert_eq!(backlog_target(4), 5);
        assert_eq!(backlog_target(6), 5);
        assert_eq!(backlog_target(9), 3);
        assert_eq!(backlog_target(10), 2);
        assert_eq!(backlog_target(100), 2);
    }

    #[test]
    fn diversity_allows_third_only_for_deep_dive() {
        let items = vec![
            cand("a1", "a", Tier::WorthALook, false, 1),
            cand("a2", "a", Tier::SummarySufficient, false, 1),
            cand("a3", "a", Tier::DeepDive, false, 1),
            cand("a4", "a", Tier::WorthALook, false, 1),
            cand("b1", "b", Tier::SummarySufficient, false, 1),
            cand("b2", "b", Tier::SummarySufficient, false, 1),
            cand("b3", "b", Tier::SummarySufficient, false, 1),
            cand("c1", "c", Tier::DeepDive, false, 1),
            cand("c2", "c", Tier::DeepDive, false, 1),
            cand("c3", "c", Tier::DeepDive, false, 1),
            cand("c4", "c", Tier::DeepDive, false, 1),
        ];
        let kept = enforce_source_diversity(items);
        // a sorted by priority: a3, a1, a4, a2 -> a3, a1 kept; a4 is not deep
        assert_eq!(ids(&kept), vec!["a3", "a1", "b1", "b2", "c1", "c2", "c3"]);
    }

    #[test]
    fn deep_dive_ceiling_keeps_longest() {
        let items = vec![
            cand("d1", "a", Tier::DeepDive, false, 5_000),
            cand("w1", "b", Tier::WorthALook, false, 9_000),
            cand("d2", "c", Tier::DeepDive, false, 20_000),
            cand("d3", "d", Tier::DeepDive, false, 12_000),
            cand("d4", "e", Tier::DeepDive, false, 12_000),
            cand("d5", "f", Tier::DeepDive, false, 15_000),
        ];
        let (out, demoted) = cap_deep_dives(items);
        assert_eq!(ids(&out), vec!["d2", "d5", "d3", "w1", "d4", "d1"]);
        assert_eq!(demoted, vec!["d4".to_string(), "d1".to_string()]);
        let deep = out.iter().filter(|c| c.tier == Tier::DeepDive).count();
        assert_eq!(deep, MAX_DEEP_DIVES);
        assert_eq!(out[4].tier, Tier::WorthALook);
    }

    #[test]
    fn ceiling_is_noop_at_three() {
        let items = vec![
            cand("w1", "b", Tier::WorthALook, false, 1),
            cand("d1", "a", Tier::DeepDive, false, 1),
        ];
        let (out, demoted) = cap_deep_dives(items.clone());
        assert!(demoted.is_empty());
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn global_cap_prefers_higher_tiers() {
        let mut items = Vec::new();
        for i in 0..10 {
            items.push(cand(&format!("s{i}"), &format!("src{i}"), Tier::SummarySufficient, false, 1));
        }
        for i in 0..10 {
            items.push(cand(&format!("w{i}"), &format!("src{i}"), Tier::WorthALook, false, 1));
        }
        let out = prioritize_and_cap(items, MAX_ITEMS);
        assert_eq!(out.len(), MAX_ITEMS);
        assert!(out[..10].iter().all(|c| c.tier == Tier::WorthALook));
        assert_eq!(out[10].content_id, "s0");
    }

    #[test]
    fn display_interleaves_sources_per_tier() {
        let items = vec![
            cand("a1", "a", Tier::WorthALook, true, 1),
            cand("a2", "a", Tier::WorthALook, false, 1),
            cand("a3", "a", Tier::WorthALook, false, 1),
            cand("b1", "b", Tier::WorthALook, false, 1),
            cand("c1", "c", Tier::WorthALook, true, 1),
            cand("d1", "d", Tier::DeepDive, false, 1),
            cand("s1", "a", Tier::SummarySufficient, false, 1),
        ];
        let out = order_for_display(items);
        assert_eq!(ids(&out), vec!["d1", "a2", "b1", "c1", "a3", "a1", "s1"]);
    }

    #[test]
    fn display_avoids_repeat_across_tier_boundary() {
        let items = vec![
            cand("d1", "a", Tier::DeepDive, false, 1),
            cand("w1", "a", Tier::WorthALook, false, 1),
            cand("w2", "a", Tier::WorthALook, false, 1),
            cand("w3", "b", Tier::WorthALook, false, 1),
        ];
        let out = order_for_display(items);
        assert_eq!(ids(&out), vec!["d1", "w3", "w1", "w2"]);
    }

    #[test]
    fn selection_respects_invariants() {
        let mut fresh = Vec::new();
        for i in 0..30 {
            let tier = match i % 3 {
                0 => Tier::DeepDive,
                1 => Tier::WorthALook,
                _ => Tier::SummarySufficient,
            };
            fresh.push(cand(&format!("f{i}"), &format!("src{}", i % 7), tier, false, 1_000 + i));
        }
        let backlog = vec![
            cand("b0", "src0", Tier::DeepDive, true, 50_000),
            cand("b1", "old", Tier::WorthALook, true, 3_000),
        ];
        let sel = select(fresh, backlog);
        let items = &sel.items;
        assert!(items.len() <= MAX_ITEMS);
        assert!(items.iter().filter(|c| c.tier == Tier::DeepDive).count() <= MAX_DEEP_DIVES);

        for (i, item) in items.iter().enumerate() {
            let same_source: Vec<_> = items
                .iter()
                .filter(|c| c.source_id == item.source_id)
                .collect();
            assert!(same_source.len() <= MAX_PER_SOURCE_WITH_DEEP_DIVE);
            if same_source.len() > MAX_PER_SOURCE {
                // the ceiling runs after diversity, so the third may be a demoted deep dive
                assert!(same_source
                    .iter()
                    .any(|c| c.tier == Tier::DeepDive || sel.demoted.contains(&c.content_id)));
            }
            if i + 1 < items.len() && items[i + 1].source_id == item.source_id && items[i + 1].tier == item.tier {
                let block_rest = items[i..].iter().filter(|c| c.tier == item.tier);
                assert!(block_rest.clone().all(|c| c.source_id == item.source_id));
            }
        }

        let briefing = build_briefing(
            NaiveDate::from_ymd_opt(2026, 3, 20).unwrap(),
            items,
            Utc::now(),
        );
        assert_eq!(briefing.total_count, briefing.fresh_count + briefing.backlog_count);
        assert_eq!(briefing.item_ids.len(), briefing.total_count);
    }

    #[test]
    fn empty_pools_give_empty_briefing() {
        let sel = select(Vec::new(), Vec::new());
        let b = build_briefing(NaiveDate::from_ymd_opt(2026, 3, 20).unwrap(), &sel.items, Utc::now());
        assert!(b.is_empty());
        assert_eq!(b.id, briefing_id(b.briefing_date));
    }
}
