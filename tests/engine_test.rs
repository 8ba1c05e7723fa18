use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use daily_briefing::db;
use daily_briefing::engine::{Engine, EngineSettings, Lane, PRIMARY, SECONDARY};
use daily_briefing::llm::{LlmProvider, ProviderError, SharedProvider};
use daily_briefing::model::{content_id, ContentItem, ContentStatus, ContentType, Tier};
use daily_briefing::summarizer::Prefilter;

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn item(n: usize, source: &str, word_count: i64, transcript: Option<&str>) -> ContentItem {
    let url = format!("https://{source}.example.com/{n}");
    ContentItem {
        id: content_id(source, &url),
        source_id: source.to_string(),
        source_name: source.to_uppercase(),
        content_type: ContentType::Article,
        title: format!("{source} post {n}"),
        url,
        published_at: Utc::now() - Duration::days(2),
        fetched_at: Utc::now(),
        duration_seconds: None,
        transcript: transcript.map(str::to_string),
        word_count,
        status: ContentStatus::Pending,
    }
}

fn reply() -> String {
    json!({
        "core_summary": "Margins are moving to the model layer.",
        "key_insights": ["one", "two", "three"],
        "concepts_explained": [],
        "so_what": "Price accordingly.",
        "topic_tags": ["AI"],
        "content_type": "news_analysis",
        "freshness": "fresh",
        "tier": "worth_a_look",
        "tier_rationale": "solid"
    })
    .to_string()
}

/// Scripted provider: pops queued replies, then succeeds or fails by default,
/// and records every prompt it was sent.
struct RecordingProvider {
    name: &'static str,
    responses: Mutex<VecDeque<Result<String, ProviderError>>>,
    default_ok: bool,
    prompts: Mutex<Vec<String>>,
}

impl RecordingProvider {
    fn succeeding(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            responses: Mutex::new(VecDeque::new()),
            default_ok: true,
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn failing(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            responses: Mutex::new(VecDeque::new()),
            default_ok: false,
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn with_responses(name: &'static str, responses: Vec<Result<String, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            name,
            responses: Mutex::new(VecDeque::from(responses)),
            default_ok: true,
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for RecordingProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn model_name(&self) -> &str {
        "test-model"
    }

    fn max_input_tokens(&self) -> usize {
        100_000
    }

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(next) = self.responses.lock().unwrap().pop_front() {
            return next;
        }
        if self.default_ok {
            Ok(reply())
        } else {
            Err(ProviderError::QuotaExhausted("daily quota".into()))
        }
    }
}

/// Always succeeds after a short delay, tracking how many calls overlap.
#[derive(Default)]
struct CountingProvider {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl CountingProvider {
    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for CountingProvider {
    fn name(&self) -> &str {
        "counting"
    }

    fn model_name(&self) -> &str {
        "test-model"
    }

    fn max_input_tokens(&self) -> usize {
        100_000
    }

    async fn complete(&self, _prompt: &str) -> Result<String, ProviderError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(reply())
    }
}

fn settings(share: f64) -> EngineSettings {
    EngineSettings {
        share,
        max_retries: 1,
        progress_interval: std::time::Duration::from_secs(60),
        dry_run: false,
    }
}

fn lane(p: &Arc<RecordingProvider>, concurrency: usize) -> Option<Lane> {
    let shared: SharedProvider = p.clone();
    Some(Lane::new(shared, concurrency))
}

async fn seed(pool: &sqlx::SqlitePool, items: &[ContentItem]) {
    for it in items {
        assert!(db::save_content(pool, it).await.unwrap());
    }
}

async fn status_of(pool: &sqlx::SqlitePool, id: &str) -> ContentStatus {
    db::get_content(pool, id).await.unwrap().unwrap().status
}

#[tokio::test]
async fn splits_by_share_and_writes_every_outcome() {
    let pool = setup_pool().await;
    let items: Vec<_> = (0..10)
        .map(|n| item(n, ["a", "b", "c"][n % 3], 2_000, Some("body text")))
        .collect();
    seed(&pool, &items).await;

    let gemini = RecordingProvider::succeeding("gemini");
    let openai = RecordingProvider::succeeding("openai");
    let engine = Engine::new(pool.clone(), lane(&gemini, 3), lane(&openai, 2), settings(0.7));
    let mut rng = StdRng::seed_from_u64(42);
    let report = engine.run_with_rng(items.clone(), &mut rng).await.unwrap();

    assert_eq!(gemini.calls(), 7);
    assert_eq!(openai.calls(), 3);
    assert_eq!(report.processable, 10);
    assert_eq!(report.processed, 10);
    assert_eq!(report.failed, 0);
    assert_eq!(report.db_errors, 0);
    assert_eq!(report.provider("gemini").map(|p| (p.assigned, p.ok)), Some((7, 7)));
    assert_eq!(report.provider("openai").map(|p| (p.assigned, p.ok)), Some((3, 3)));

    for it in &items {
        assert_eq!(status_of(&pool, &it.id).await, ContentStatus::Processed);
        let p = db::get_processed(&pool, &it.id).await.unwrap().unwrap();
        assert_eq!(p.topic_tags, vec!["ai".to_string()]);
        assert_eq!(p.model_used, "test-model");
        assert!(!p.is_backlog);
    }
}

#[tokio::test]
async fn failures_are_recorded_not_fatal() {
    let pool = setup_pool().await;
    let items: Vec<_> = (0..4).map(|n| item(n, "a", 2_000, Some("body"))).collect();
    seed(&pool, &items).await;

    let gemini = RecordingProvider::with_responses(
        "gemini",
        vec![
            Ok(reply()),
            Err(ProviderError::QuotaExhausted("quota".into())),
            Ok(r#"{"core_summary": ""}"#.into()),
            Ok(reply()),
        ],
    );
    let engine = Engine::new(pool.clone(), lane(&gemini, 1), None, settings(1.0));
    let report = engine.run(items.clone()).await.unwrap();

    assert_eq!(report.processed, 2);
    assert_eq!(report.failed, 2);
    assert_eq!(report.db_errors, 0);

    let counts = db::count_content_by_status(&pool).await.unwrap();
    let get = |label: &str| {
        counts
            .iter()
            .find(|c| c.label == label)
            .map(|c| c.count)
            .unwrap_or(0)
    };
    assert_eq!(get("processed"), 2);
    assert_eq!(get("failed"), 2);
    assert!(db::get_pending_content(&pool, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_provider_routes_everything_to_the_other() {
    let pool = setup_pool().await;
    let items: Vec<_> = (0..5).map(|n| item(n, "b", 2_000, Some("body"))).collect();
    seed(&pool, &items).await;

    let openai = RecordingProvider::succeeding("openai");
    let engine = Engine::new(pool.clone(), None, lane(&openai, 2), settings(0.7));
    assert_eq!(engine.effective_share(), 0.0);
    let report = engine.run(items).await.unwrap();

    assert_eq!(openai.calls(), 5);
    assert_eq!(report.processed, 5);
    assert_eq!(report.providers.len(), 1);
    assert_eq!(report.providers[0].assigned, 5);
}

#[tokio::test]
async fn failing_lane_does_not_affect_the_other() {
    let pool = setup_pool().await;
    let items: Vec<_> = (0..6).map(|n| item(n, "c", 2_000, Some("body"))).collect();
    seed(&pool, &items).await;

    let gemini = RecordingProvider::failing("gemini");
    let openai = RecordingProvider::succeeding("openai");
    let engine = Engine::new(pool.clone(), lane(&gemini, 2), lane(&openai, 2), settings(0.5));
    let mut rng = StdRng::seed_from_u64(1);
    let report = engine.run_with_rng(items, &mut rng).await.unwrap();

    assert_eq!(report.processed, 3);
    assert_eq!(report.failed, 3);
    let lanes: Vec<_> = report.providers.iter().map(|p| (p.name.as_str(), p.ok, p.failed)).collect();
    assert_eq!(lanes, vec![("gemini", 0, 3), ("openai", 3, 0)]);
    assert_eq!(PRIMARY, 0);
    assert_eq!(SECONDARY, 1);
}

#[tokio::test]
async fn prefilter_skips_never_reach_a_provider() {
    let pool = setup_pool().await;
    let items = vec![
        item(0, "a", 2_000, None),
        item(1, "a", 120, Some("teaser")),
        item(
            2,
            "a",
            40,
            Some("This post is for paid subscribers. Already a subscriber? Sign in."),
        ),
        item(3, "a", 2_000, Some("body")),
    ];
    seed(&pool, &items).await;

    let gemini = RecordingProvider::succeeding("gemini");
    let engine = Engine::new(pool.clone(), lane(&gemini, 2), None, settings(0.7));
    let report = engine.run(items.clone()).await.unwrap();

    assert_eq!(gemini.calls(), 1);
    assert_eq!(report.processable, 1);
    assert_eq!(report.skipped, 3);
    assert_eq!(report.skip_count(Prefilter::NoTranscript), 1);
    assert_eq!(report.skip_count(Prefilter::TooShort), 1);
    assert_eq!(report.skip_count(Prefilter::Paywall), 1);

    assert_eq!(status_of(&pool, &items[0].id).await, ContentStatus::NoTranscript);
    assert_eq!(status_of(&pool, &items[1].id).await, ContentStatus::Skipped);
    assert_eq!(status_of(&pool, &items[2].id).await, ContentStatus::Paywall);
    assert_eq!(status_of(&pool, &items[3].id).await, ContentStatus::Processed);
}

#[tokio::test]
async fn store_errors_are_counted() {
    let pool = setup_pool().await;
    let stored = item(0, "a", 2_000, Some("body"));
    let unsaved = item(1, "a", 2_000, Some("body"));
    seed(&pool, std::slice::from_ref(&stored)).await;

    let gemini = RecordingProvider::succeeding("gemini");
    let engine = Engine::new(pool.clone(), lane(&gemini, 1), None, settings(1.0));
    let report = engine.run(vec![stored, unsaved]).await.unwrap();

    assert_eq!(gemini.calls(), 2);
    assert_eq!(report.processed, 1);
    assert_eq!(report.db_errors, 1);
}

#[tokio::test]
async fn dry_run_writes_nothing() {
    let pool = setup_pool().await;
    let items = vec![
        item(0, "a", 1_000, Some("body")),
        item(1, "a", 3_000, Some("body")),
        item(2, "b", 2_000, Some("body")),
        item(3, "b", 2_000, None),
    ];
    seed(&pool, &items).await;

    let gemini = RecordingProvider::succeeding("gemini");
    let openai = RecordingProvider::succeeding("openai");
    let mut s = settings(0.7);
    s.dry_run = true;
    let engine = Engine::new(pool.clone(), lane(&gemini, 2), lane(&openai, 2), s);
    let report = engine.run(items).await.unwrap();

    assert_eq!(gemini.calls() + openai.calls(), 0);
    let plan = report.dry_run.expect("dry run plan");
    assert_eq!(plan.by_source, vec![("a".to_string(), 2), ("b".to_string(), 1)]);
    assert_eq!(plan.avg_word_count, 2_000);
    assert_eq!((plan.primary_batch, plan.secondary_batch), (2, 1));
    assert_eq!(db::get_pending_content(&pool, None).await.unwrap().len(), 4);
}

#[tokio::test]
async fn no_provider_is_an_error() {
    let pool = setup_pool().await;
    let items = vec![item(0, "a", 2_000, Some("body"))];
    seed(&pool, &items).await;
    let engine = Engine::new(pool.clone(), None, None, settings(0.7));
    assert!(engine.run(items).await.is_err());
}

#[tokio::test]
async fn old_items_are_marked_backlog() {
    let pool = setup_pool().await;
    let mut old = item(0, "a", 2_000, Some("body"));
    old.published_at = Utc::now() - Duration::days(30);
    seed(&pool, std::slice::from_ref(&old)).await;

    let gemini = RecordingProvider::succeeding("gemini");
    let engine = Engine::new(pool.clone(), lane(&gemini, 1), None, settings(1.0));
    engine.run(vec![old.clone()]).await.unwrap();

    let p = db::get_processed(&pool, &old.id).await.unwrap().unwrap();
    assert!(p.is_backlog);
    assert_eq!(p.tier, Tier::WorthALook);
}

#[tokio::test]
async fn lane_concurrency_is_capped() {
    let pool = setup_pool().await;
    let items: Vec<_> = (0..12).map(|n| item(n, "a", 2_000, Some("body"))).collect();
    seed(&pool, &items).await;

    let provider = Arc::new(CountingProvider::default());
    let shared: SharedProvider = provider.clone();
    let engine = Engine::new(pool.clone(), Some(Lane::new(shared, 3)), None, settings(1.0));
    let report = engine.run(items).await.unwrap();

    assert_eq!(report.processed, 12);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 12);
    assert!(provider.peak() <= 3, "peak {} over cap", provider.peak());
    assert!(provider.peak() >= 1);
}

#[tokio::test]
async fn each_lane_keeps_its_own_cap() {
    let pool = setup_pool().await;
    let items: Vec<_> = (0..20)
        .map(|n| item(n, ["a", "b"][n % 2], 2_000, Some("body")))
        .collect();
    seed(&pool, &items).await;

    let first = Arc::new(CountingProvider::default());
    let second = Arc::new(CountingProvider::default());
    let (a, b): (SharedProvider, SharedProvider) = (first.clone(), second.clone());
    let engine = Engine::new(
        pool.clone(),
        Some(Lane::new(a, 4)),
        Some(Lane::new(b, 1)),
        settings(0.5),
    );
    let report = engine.run(items).await.unwrap();

    assert_eq!(report.processed, 20);
    assert_eq!(first.calls.load(Ordering::SeqCst), 10);
    assert_eq!(second.calls.load(Ordering::SeqCst), 10);
    assert!(first.peak() <= 4, "first lane peaked at {}", first.peak());
    assert_eq!(second.peak(), 1);
}
