use tracing::{info, warn};

use crate::llm::LlmProvider;
use crate::model::{ContentItem, ProcessedContent};
use crate::prompts::{build_editorial_intro_prompt, IntroItem};
use crate::summarizer::clean_text;

/// One or two sentences tying the day's items together. `None` when there is
/// nothing to introduce or the provider gives no usable answer; a briefing
/// goes out without an intro in that case.
pub async fn generate_intro<P: LlmProvider + ?Sized>(
    provider: &P,
    items: &[(ContentItem, ProcessedContent)],
    max_retries: u32,
) -> Option<String> {
    if items.is_empty() {
        return None;
    }
    let inputs: Vec<IntroItem<'_>> = items
        .iter()
        .map(|(item, processed)| IntroItem {
            title: &item.title,
            core_summary: &processed.core_summary,
            topic_tags: &processed.topic_tags,
        })
        .collect();
    let prompt = build_editorial_intro_prompt(&inputs);

    let Some(reply) = provider.generate(&prompt, max_retries).await else {
        warn!(provider = provider.name(), "editorial intro unavailable");
        return None;
    };
    let intro = reply
        .get("editorial_intro")
        .and_then(|v| v.as_str())
        .map(clean_text)
        .filter(|s| !s.is_empty());
    match &intro {
        Some(text) => info!(chars = text.len(), "editorial intro generated"),
        None => warn!("editorial intro missing from reply"),
    }
    intro
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ProviderError;
    use crate::model::{ContentCategory, ContentStatus, ContentType, Freshness, Tier};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    struct Scripted {
        reply: Option<String>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(reply: Option<String>) -> Self {
            Self {
                reply,
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model_name(&self) -> &str {
            "scripted-1"
        }

        fn max_input_tokens(&self) -> usize {
            100_000
        }

        async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match &self.reply {
                Some(text) => Ok(text.clone()),
                None => Err(ProviderError::QuotaExhausted("out of quota".into())),
            }
        }
    }

    fn pair(title: &str) -> (ContentItem, ProcessedContent) {
        let now = Utc::now();
        (
            ContentItem {
                id: title.into(),
                source_id: "s".into(),
                source_name: "S".into(),
                content_type: ContentType::Article,
                title: title.into(),
                url: format!("https://example.com/{title}"),
                published_at: now,
                fetched_at: now,
                duration_seconds: None,
                transcript: None,
                word_count: 900,
                status: ContentStatus::Processed,
            },
            ProcessedContent {
                content_id: title.into(),
                core_summary: format!("{title} summary."),
                key_insights: Vec::new(),
                concepts_explained: Vec::new(),
                so_what: String::new(),
                topic_tags: vec!["chips".into()],
                content_category: ContentCategory::NewsAnalysis,
                freshness: Freshness::Fresh,
                tier: Tier::WorthALook,
                tier_rationale: String::new(),
                processed_at: now,
                prompt_version: "v5.0".into(),
                model_used: "m".into(),
                is_backlog: false,
                delivered: false,
                delivered_at: None,
            },
        )
    }

    #[tokio::test]
    async fn intro_is_read_and_cleaned() {
        let provider = Scripted::new(Some(
            r#"```json
{"editorial_intro": "Both   pieces argue compute is the moat."}
```"#
                .into(),
        ));
        let items = vec![pair("Alpha"), pair("Beta")];
        let intro = generate_intro(&provider, &items, 1).await;
        assert_eq!(intro.as_deref(), Some("Both pieces argue compute is the moat."));
        let prompts = provider.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Alpha"));
        assert!(prompts[0].contains("[chips] Beta"));
    }

    #[tokio::test]
    async fn failure_is_not_fatal() {
        let provider = Scripted::new(None);
        assert!(generate_intro(&provider, &[pair("Alpha")], 1).await.is_none());

        let wrong_field = Scripted::new(Some(r#"{"intro": "x"}"#.into()));
        assert!(generate_intro(&wrong_field, &[pair("Alpha")], 1).await.is_none());
    }

    #[tokio::test]
    async fn empty_briefing_skips_provider() {
        let provider = Scripted::new(Some("{}".into()));
        assert!(generate_intro(&provider, &[], 1).await.is_none());
        assert!(provider.prompts.lock().unwrap().is_empty());
    }
}
