//! Prompt templates and the phrase tables used to clean model output.
//!
//! Prompts are versioned; the version is stored with every summary so output
//! quality can be compared across prompt revisions.

use crate::model::{ContentItem, ContentType};

pub const PROMPT_VERSION: &str = "v5.0";

/// Banned phrase and its replacement. An empty replacement removes the phrase.
/// Longer phrases come before their prefixes so "leveraging ai" wins over
/// "leveraging".
pub const BLACKLISTED_PHRASES: &[(&str, &str)] = &[
    ("game-changer", "significant shift"),
    ("game changer", "significant shift"),
    ("non-negotiable", "essential"),
    ("the message is clear", ""),
    ("leveraging ai", "using AI"),
    ("leveraging", "using"),
    ("harnessing the power", "using"),
    ("those who can't keep up will be left behind", ""),
    ("it's crucial", "it matters"),
    ("the real deal", ""),
    ("paradigm shift", "structural change"),
    ("the landscape", "the market"),
    ("in today's rapidly", ""),
];

/// Known entity misspellings, applied case-sensitively.
pub const ENTITY_CORRECTIONS: &[(&str, &str)] = &[
    ("Enthropic", "Anthropic"),
    ("enthropic", "Anthropic"),
    ("Antrhropic", "Anthropic"),
];

const NO_CONTENT: &str = "[No content available]";

fn length_label(item: &ContentItem) -> String {
    match (item.content_type, item.duration_seconds) {
        (ContentType::Video, Some(secs)) if secs > 0 => format!("{} minutes", secs / 60),
        _ => format!("{} words", item.word_count),
    }
}

/// Summarization prompt for `item` using `transcript` as the body. The
/// transcript is passed separately so callers can substitute a truncated copy.
pub fn build_summarization_prompt(item: &ContentItem, transcript: &str) -> String {
    let body = if transcript.trim().is_empty() {
        NO_CONTENT
    } else {
        transcript
    };
    let published = item.published_at.format("%Y-%m-%d");
    let banned = BLACKLISTED_PHRASES
        .iter()
        .map(|(p, _)| format!("\"{p}\""))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"You are writing a daily briefing for one reader: a product leader building an AI startup who also invests in tech stocks. The briefing is read in 5-10 minutes each morning.

VOICE: a sharp analyst with strong, specific opinions. Never sound like a press release.

NEVER use these phrases: {banned}.
Vary sentence structure between items. Do not open a summary with "[Subject] is [verb]ing". Do not open a so_what with "If you're...".

TASK
1. core_summary: 2-3 sentences. Lead with the most surprising or consequential claim.
2. key_insights: 3-5 one-sentence bullets, at most 25 words each.
3. concepts_explained: at most 3 genuinely novel terms, each with a one-sentence explanation. Usually empty.
4. so_what: 1-2 opinionated sentences on why this matters.
5. topic_tags: 2-3 specific lowercase-with-hyphens tags (e.g. "gpu-capex", "founder-mode"), never generic ones like "ai".
6. content_type: one of market_call | news_analysis | industry_trend | framework | tutorial | interview | commentary
7. freshness (published {published}): one of fresh | evergreen | stale
8. tier: one of
   - deep_dive: the original adds substantial value beyond the summary. Reserve for exceptional content, at most 2-3 of every 10 items.
   - worth_a_look: solid content; the summary captures 60-80% of the value.
   - summary_sufficient: padded, rehashed or promotional; the summary captures 90%+.
   tier_rationale: one sentence.

CONTENT DETAILS
- Title: {title}
- Source: {source}
- Published: {published}
- Length: {length}
- Type: {kind}

CONTENT
{body}

---

Respond with JSON only, in exactly this shape:
{{
  "core_summary": "...",
  "key_insights": ["...", "..."],
  "concepts_explained": [{{"term": "...", "explanation": "..."}}],
  "so_what": "...",
  "topic_tags": ["...", "..."],
  "content_type": "framework",
  "freshness": "evergreen",
  "tier": "worth_a_look",
  "tier_rationale": "..."
}}"#,
        banned = banned,
        published = published,
        title = item.title,
        source = item.source_name,
        length = length_label(item),
        kind = item.content_type.as_str(),
        body = body,
    )
}

/// One line of input for the editorial intro.
#[derive(Debug, Clone)]
pub struct IntroItem<'a> {
    pub title: &'a str,
    pub core_summary: &'a str,
    pub topic_tags: &'a [String],
}

/// Prompt asking for a 1-2 sentence intro tying the day's items together.
/// The model answers `{"editorial_intro": "..."}`.
pub fn build_editorial_intro_prompt(items: &[IntroItem<'_>]) -> String {
    let mut listing = String::new();
    for (i, item) in items.iter().enumerate() {
        let summary: String = item.core_summary.chars().take(150).collect();
        listing.push_str(&format!(
            "{}. [{}] {}\n   {}\n\n",
            i + 1,
            item.topic_tags.join(", "),
            item.title,
            summary
        ));
    }

    format!(
        r#"You are writing a 1-2 sentence editorial intro for a daily tech/AI briefing.

It sits between the headline index and the detail cards and ties the day's themes together in one sharp observation.

Rules:
- At most 2 sentences, 1 if possible.
- Name the connecting thread, surprising pattern or tension across the items.
- Be specific. Do not list the items; synthesize.
- Never open with "Today's briefing covers" or "In today's edition".

Today's {count} items:
{listing}
Respond with JSON only: {{"editorial_intro": "..."}}"#,
        count = items.len(),
        listing = listing,
    )
}
