//! Turning a pending item into a prompt, and a model reply into a
//! [`ProcessedContent`].
//!
//! Nothing here touches the store; the engine decides what to persist.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};
use serde_json::Value;
use tracing::{debug, warn};

use crate::calibration::{calibrate, Signals};
use crate::llm::{LlmProvider, TRUNCATION_MARKER};
use crate::model::{
    Concept, ContentCategory, ContentItem, ContentStatus, Freshness, ProcessedContent, Tier,
    BACKLOG_AGE_DAYS,
};
use crate::paywall::is_paywall;
use crate::prompts::{build_summarization_prompt, BLACKLISTED_PHRASES, ENTITY_CORRECTIONS, PROMPT_VERSION};

/// Shorts, teasers and trailers fall below this.
pub const MIN_WORD_COUNT: i64 = 500;
const MAX_TOPIC_TAGS: usize = 3;

/// Outcome of the pre-dispatch check. Anything other than `Processable` is
/// terminal and never reaches a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Prefilter {
    NoTranscript,
    Paywall,
    TooShort,
    Processable,
}

impl Prefilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Prefilter::NoTranscript => "no_transcript",
            Prefilter::Paywall => "paywall",
            Prefilter::TooShort => "too_short",
            Prefilter::Processable => "processable",
        }
    }

    /// Status recorded for a skipped item.
    pub fn status(&self) -> Option<ContentStatus> {
        match self {
            Prefilter::NoTranscript => Some(ContentStatus::NoTranscript),
            Prefilter::Paywall => Some(ContentStatus::Paywall),
            Prefilter::TooShort => Some(ContentStatus::Skipped),
            Prefilter::Processable => None,
        }
    }
}

pub fn classify(item: &ContentItem) -> Prefilter {
    let transcript = match item.transcript.as_deref() {
        Some(t) if !t.trim().is_empty() => t,
        _ => return Prefilter::NoTranscript,
    };
    if is_paywall(transcript) {
        return Prefilter::Paywall;
    }
    if item.word_count < MIN_WORD_COUNT {
        return Prefilter::TooShort;
    }
    Prefilter::Processable
}

/// Summarization prompt sized for `provider`. When the full prompt would
/// overflow the context window only the transcript is shortened; the
/// template is always sent whole.
pub fn prepare_prompt<P: LlmProvider + ?Sized>(provider: &P, item: &ContentItem) -> String {
    let transcript = item.transcript.as_deref().unwrap_or_default();
    let prompt = build_summarization_prompt(item, transcript);
    let limit = provider.max_input_tokens();
    let estimated = provider.estimate_tokens(&prompt);
    if estimated <= limit {
        return prompt;
    }

    let overhead = provider.estimate_tokens(&build_summarization_prompt(item, ""))
        + provider.estimate_tokens(TRUNCATION_MARKER);
    let budget = limit.saturating_sub(overhead);
    debug!(
        content_id = %item.id,
        provider = provider.name(),
        estimated,
        limit,
        budget,
        "truncating transcript to fit context"
    );
    let truncated = provider.truncate_for_context(transcript, budget);
    build_summarization_prompt(item, &truncated)
}

static BLACKLIST: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    BLACKLISTED_PHRASES
        .iter()
        .filter_map(|(phrase, replacement)| {
            Regex::new(&format!("(?i){}", regex::escape(phrase)))
                .ok()
                .map(|re| (re, *replacement))
        })
        .collect()
});
static MULTI_SPACE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"  +").ok());
static ORPHAN_PUNCT: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"[;,]\s*[;,]").ok());

/// Replace banned phrases, fix entity names and tidy what the removals
/// leave behind.
pub fn clean_text(text: &str) -> String {
    let mut out = text.to_string();
    for (re, replacement) in BLACKLIST.iter() {
        out = re.replace_all(&out, NoExpand(replacement)).into_owned();
    }
    for (wrong, right) in ENTITY_CORRECTIONS {
        out = out.replace(wrong, right);
    }
    if let Some(re) = MULTI_SPACE.as_ref() {
        out = re.replace_all(&out, " ").into_owned();
    }
    if let Some(re) = ORPHAN_PUNCT.as_ref() {
        out = re.replace_all(&out, ",").into_owned();
    }
    out.trim().to_string()
}

fn text_field(data: &Value, key: &str) -> String {
    match data.get(key) {
        Some(Value::String(s)) => clean_text(s),
        _ => String::new(),
    }
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn insights(data: &Value) -> Vec<String> {
    match data.get("key_insights") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(value_to_text)
            .map(|s| clean_text(&s))
            .collect(),
        Some(other) => value_to_text(other)
            .map(|s| vec![clean_text(&s)])
            .unwrap_or_default(),
    }
}

fn concepts(data: &Value) -> Vec<Concept> {
    let Some(Value::Array(raw)) = data.get("concepts_explained") else {
        return Vec::new();
    };
    raw.iter()
        .filter_map(|c| {
            let term = c.get("term")?.as_str()?;
            let explanation = c.get("explanation")?.as_str()?;
            Some(Concept {
                term: term.to_string(),
                explanation: clean_text(explanation),
            })
        })
        .collect()
}

fn topic_tags(data: &Value) -> Vec<String> {
    let raw = data
        .get("topic_tags")
        .or_else(|| data.get("domains"))
        .cloned()
        .unwrap_or(Value::Null);
    let list = match raw {
        Value::Array(items) => items,
        Value::String(s) => vec![Value::String(s)],
        _ => Vec::new(),
    };
    let tags: Vec<String> = list
        .iter()
        .filter_map(Value::as_str)
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .take(MAX_TOPIC_TAGS)
        .collect();
    if tags.is_empty() {
        vec!["general".to_string()]
    } else {
        tags
    }
}

fn str_field<'a>(data: &'a Value, key: &str) -> &'a str {
    data.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Validate a model reply for `item`. Returns `None` when the reply has no
/// usable summary; every other field falls back to a safe default. The tier
/// is calibrated before returning.
pub fn parse_response(
    item: &ContentItem,
    data: &Value,
    model_used: &str,
    now: DateTime<Utc>,
) -> Option<ProcessedContent> {
    if !data.is_object() {
        warn!(content_id = %item.id, "reply is not a JSON object");
        return None;
    }
    let core_summary = text_field(data, "core_summary");
    if core_summary.is_empty() {
        warn!(content_id = %item.id, "reply is missing core_summary");
        return None;
    }

    let key_insights = insights(data);
    let category = ContentCategory::parse_category(str_field(data, "content_type"))
        .unwrap_or(ContentCategory::Commentary);
    let freshness =
        Freshness::parse_freshness(str_field(data, "freshness")).unwrap_or(Freshness::Fresh);
    let llm_tier = Tier::parse_tier(str_field(data, "tier")).unwrap_or(Tier::SummarySufficient);

    let calibration = calibrate(Signals {
        word_count: item.word_count,
        source_id: &item.source_id,
        tier: llm_tier,
        category,
        insight_count: key_insights.len(),
        freshness,
    });
    if calibration.tier != llm_tier {
        debug!(
            content_id = %item.id,
            from = llm_tier.as_str(),
            to = calibration.tier.as_str(),
            "tier calibrated"
        );
    }

    let days_old = (now - item.published_at).num_days();
    Some(ProcessedContent {
        content_id: item.id.clone(),
        core_summary,
        key_insights,
        concepts_explained: concepts(data),
        so_what: text_field(data, "so_what"),
        topic_tags: topic_tags(data),
        content_category: category,
        freshness,
        tier: calibration.tier,
        tier_rationale: calibration.annotate(&text_field(data, "tier_rationale")),
        processed_at: now,
        prompt_version: PROMPT_VERSION.to_string(),
        model_used: model_used.to_string(),
        is_backlog: days_old > BACKLOG_AGE_DAYS,
        delivered: false,
        delivered_at: None,
    })
}
