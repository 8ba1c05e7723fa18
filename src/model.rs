use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Items published more than this many days before processing are backlog.
pub const BACKLOG_AGE_DAYS: i64 = 14;

fn short_hash(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Stable id for a fetched item. Refetching the same URL from the same source
/// always yields the same id.
pub fn content_id(source_id: &str, url: &str) -> String {
    short_hash(&format!("{}:{}", source_id, url))
}

/// Stable id for the briefing of a calendar date.
pub fn briefing_id(date: NaiveDate) -> String {
    short_hash(&format!("briefing:{}", date.format("%Y-%m-%d")))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Pending,
    Processed,
    Failed,
    Skipped,
    NoTranscript,
    Paywall,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Pending => "pending",
            ContentStatus::Processed => "processed",
            ContentStatus::Failed => "failed",
            ContentStatus::Skipped => "skipped",
            ContentStatus::NoTranscript => "no_transcript",
            ContentStatus::Paywall => "paywall",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ContentStatus::Pending),
            "processed" => Some(ContentStatus::Processed),
            "failed" => Some(ContentStatus::Failed),
            "skipped" => Some(ContentStatus::Skipped),
            "no_transcript" => Some(ContentStatus::NoTranscript),
            "paywall" => Some(ContentStatus::Paywall),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Video,
    Article,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Video => "video",
            ContentType::Article => "article",
        }
    }

    pub fn parse_type(s: &str) -> Option<Self> {
        match s {
            "video" => Some(ContentType::Video),
            "article" => Some(ContentType::Article),
            _ => None,
        }
    }
}

/// Editorial recommendation for an item. Declaration order is display
/// priority: deep dives first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    DeepDive,
    WorthALook,
    SummarySufficient,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::DeepDive, Tier::WorthALook, Tier::SummarySufficient];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::DeepDive => "deep_dive",
            Tier::WorthALook => "worth_a_look",
            Tier::SummarySufficient => "summary_sufficient",
        }
    }

    pub fn parse_tier(s: &str) -> Option<Self> {
        match s {
            "deep_dive" => Some(Tier::DeepDive),
            "worth_a_look" => Some(Tier::WorthALook),
            "summary_sufficient" => Some(Tier::SummarySufficient),
            _ => None,
        }
    }

    /// Lower sorts first.
    pub fn priority(&self) -> u8 {
        match self {
            Tier::DeepDive => 1,
            Tier::WorthALook => 2,
            Tier::SummarySufficient => 3,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Tier::DeepDive => "Deep dive",
            Tier::WorthALook => "Worth a look",
            Tier::SummarySufficient => "Summary is enough",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Fresh,
    Evergreen,
    Stale,
}

impl Freshness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Freshness::Fresh => "fresh",
            Freshness::Evergreen => "evergreen",
            Freshness::Stale => "stale",
        }
    }

    pub fn parse_freshness(s: &str) -> Option<Self> {
        match s {
            "fresh" => Some(Freshness::Fresh),
            "evergreen" => Some(Freshness::Evergreen),
            "stale" => Some(Freshness::Stale),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentCategory {
    MarketCall,
    NewsAnalysis,
    IndustryTrend,
    Framework,
    Tutorial,
    Interview,
    Commentary,
}

impl ContentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentCategory::MarketCall => "market_call",
            ContentCategory::NewsAnalysis => "news_analysis",
            ContentCategory::IndustryTrend => "industry_trend",
            ContentCategory::Framework => "framework",
            ContentCategory::Tutorial => "tutorial",
            ContentCategory::Interview => "interview",
            ContentCategory::Commentary => "commentary",
        }
    }

    pub fn parse_category(s: &str) -> Option<Self> {
        match s {
            "market_call" => Some(ContentCategory::MarketCall),
            "news_analysis" => Some(ContentCategory::NewsAnalysis),
            "industry_trend" => Some(ContentCategory::IndustryTrend),
            "framework" => Some(ContentCategory::Framework),
            "tutorial" => Some(ContentCategory::Tutorial),
            "interview" => Some(ContentCategory::Interview),
            "commentary" => Some(ContentCategory::Commentary),
            _ => None,
        }
    }
}

/// A fetched video or article.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentItem {
    pub id: String,
    pub source_id: String,
    pub source_name: String,
    pub content_type: ContentType,
    pub title: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    pub duration_seconds: Option<i64>,
    pub transcript: Option<String>,
    pub word_count: i64,
    pub status: ContentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Concept {
    pub term: String,
    pub explanation: String,
}

/// LLM enrichment of one content item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessedContent {
    pub content_id: String,
    pub core_summary: String,
    pub key_insights: Vec<String>,
    pub concepts_explained: Vec<Concept>,
    pub so_what: String,
    pub topic_tags: Vec<String>,
    pub content_category: ContentCategory,
    pub freshness: Freshness,
    pub tier: Tier,
    pub tier_rationale: String,
    pub processed_at: DateTime<Utc>,
    pub prompt_version: String,
    pub model_used: String,
    pub is_backlog: bool,
    pub delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// One day's selected items in display order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyBriefing {
    pub id: String,
    pub briefing_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub fresh_count: usize,
    pub backlog_count: usize,
    pub total_count: usize,
    pub item_ids: Vec<String>,
    pub email_sent: bool,
    pub email_sent_at: Option<DateTime<Utc>>,
}

impl DailyBriefing {
    pub fn is_empty(&self) -> bool {
        self.total_count == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BacklogProgress {
    pub total_items: i64,
    pub delivered_items: i64,
    pub last_updated: DateTime<Utc>,
}

impl BacklogProgress {
    /// Percentage rounded to one decimal. An empty backlog counts as done.
    pub fn percent_complete(&self) -> f64 {
        if self.total_items <= 0 {
            return 100.0;
        }
        let pct = self.delivered_items as f64 / self.total_items as f64 * 100.0;
        (pct * 10.0).round() / 10.0
    }

    pub fn items_remaining(&self) -> i64 {
        (self.total_items - self.delivered_items).max(0)
    }

    pub fn estimated_completion(&self, today: NaiveDate, daily_rate: f64) -> NaiveDate {
        if self.items_remaining() == 0 || daily_rate <= 0.0 {
            return today;
        }
        let days = (self.items_remaining() as f64 / daily_rate) as i64;
        today + Duration::days(days)
    }
}
