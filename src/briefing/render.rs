//! Presentation of a composed briefing.
//!
//! The composer hands over a [`BriefingView`]; a [`Presenter`] turns it into
//! something the reader sees and reports whether that worked.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::PathBuf;
use tracing::info;

use crate::model::{BacklogProgress, ContentItem, ContentType, DailyBriefing, ProcessedContent, Tier};

const SECONDS_PER_ITEM: f64 = 15.0;
const WORDS_PER_MINUTE: f64 = 200.0;
const MIN_READ_MINUTES: i64 = 3;

/// Running totals shown in the footer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FooterStats {
    /// Ordinal of this briefing, counting it.
    pub briefing_number: i64,
    /// Items delivered so far, counting this briefing.
    pub items_delivered: i64,
}

/// Everything needed to present one briefing. `items` is in briefing order.
#[derive(Debug, Clone, Copy)]
pub struct BriefingView<'a> {
    pub briefing: &'a DailyBriefing,
    pub items: &'a [(ContentItem, ProcessedContent)],
    pub intro: Option<&'a str>,
    pub progress: Option<&'a BacklogProgress>,
    pub footer: FooterStats,
}

#[async_trait]
pub trait Presenter: Send + Sync {
    /// Present the briefing. `Ok(true)` confirms it reached the reader.
    async fn present(&self, view: &BriefingView<'_>) -> Result<bool>;
}

/// Writes `briefing_{date}.html` into a directory.
#[derive(Debug, Clone)]
pub struct HtmlFilePresenter {
    out_dir: PathBuf,
}

impl HtmlFilePresenter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.out_dir.join(format!("briefing_{}.html", date.format("%Y-%m-%d")))
    }

    pub async fn write(&self, view: &BriefingView<'_>) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.out_dir)
            .await
            .with_context(|| format!("failed to create {}", self.out_dir.display()))?;
        let path = self.path_for(view.briefing.briefing_date);
        tokio::fs::write(&path, render_html(view))
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), items = view.items.len(), "briefing rendered");
        Ok(path)
    }
}

#[async_trait]
impl Presenter for HtmlFilePresenter {
    async fn present(&self, view: &BriefingView<'_>) -> Result<bool> {
        self.write(view).await?;
        Ok(true)
    }
}

/// Estimated minutes to read the briefing: a fixed scan cost per item plus
/// the words of every summary, never below three minutes.
pub fn read_time_minutes(items: &[(ContentItem, ProcessedContent)]) -> i64 {
    let words: usize = items
        .iter()
        .map(|(_, p)| {
            let mut n = p.core_summary.split_whitespace().count();
            n += p
                .key_insights
                .iter()
                .map(|s| s.split_whitespace().count())
                .sum::<usize>();
            n + p.so_what.split_whitespace().count()
        })
        .sum();
    let secs = items.len() as f64 * SECONDS_PER_ITEM + words as f64 / WORDS_PER_MINUTE * 60.0;
    ((secs / 60.0).round() as i64).max(MIN_READ_MINUTES)
}

/// "1h 5m", "42m", "850 words" or "12k words".
pub fn length_label(item: &ContentItem) -> String {
    match (item.content_type, item.duration_seconds) {
        (ContentType::Video, Some(secs)) if secs > 0 => {
            let minutes = secs / 60;
            if minutes >= 60 {
                format!("{}h {}m", minutes / 60, minutes % 60)
            } else {
                format!("{minutes}m")
            }
        }
        _ if item.word_count >= 1000 => format!("{}k words", item.word_count / 1000),
        _ => format!("{} words", item.word_count),
    }
}

fn first_sentences(text: &str, n: usize) -> String {
    let mut count = 0;
    for (i, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            let next = text[i + c.len_utf8()..].chars().next();
            if next.map_or(true, char::is_whitespace) {
                count += 1;
                if count == n {
                    return text[..i + c.len_utf8()].trim().to_string();
                }
            }
        }
    }
    text.trim().to_string()
}

/// (summary sentences, insights, inline take) shown per tier.
fn tier_layout(tier: Tier) -> (usize, usize, bool) {
    match tier {
        Tier::DeepDive => (3, 3, false),
        Tier::WorthALook => (2, 3, false),
        Tier::SummarySufficient => (2, 0, true),
    }
}

fn render_card(item: &ContentItem, processed: &ProcessedContent, today: NaiveDate) -> String {
    let (sentences, insights, inline_take) = tier_layout(processed.tier);
    let mut card = String::new();
    card.push_str(&format!(
        "<article class=\"card {}\" id=\"{}\">\n",
        processed.tier.as_str(),
        html_attr(&item.id)
    ));
    card.push_str(&format!(
        "<h3><a href=\"{}\">{}</a></h3>\n",
        html_attr(&item.url),
        html_escape(&item.title)
    ));

    let mut meta = format!(
        "{} · {} · {}",
        html_escape(&item.source_name),
        relative_date(item.published_at.date_naive(), today),
        html_escape(&length_label(item))
    );
    if processed.is_backlog {
        meta.push_str(" · <span class=\"backlog\">BACKLOG</span>");
    }
    card.push_str(&format!("<div class=\"meta\">{meta}</div>\n"));

    card.push_str(&format!(
        "<p class=\"summary\">{}</p>\n",
        html_escape(&first_sentences(&processed.core_summary, sentences))
    ));

    if insights > 0 && !processed.key_insights.is_empty() {
        card.push_str("<ul class=\"insights\">\n");
        for insight in processed.key_insights.iter().take(insights) {
            card.push_str(&format!("<li>{}</li>\n", html_escape(insight)));
        }
        card.push_str("</ul>\n");
    }

    if !processed.so_what.is_empty() {
        if inline_take {
            card.push_str(&format!(
                "<p class=\"take\"><strong>Take:</strong> {}</p>\n",
                html_escape(&processed.so_what)
            ));
        } else {
            card.push_str(&format!(
                "<div class=\"so-what\">{}</div>\n",
                html_escape(&processed.so_what)
            ));
        }
    }

    if !processed.topic_tags.is_empty() {
        let tags = processed
            .topic_tags
            .iter()
            .map(|t| format!("<span class=\"tag\">{}</span>", html_escape(t)))
            .collect::<Vec<_>>()
            .join(" ");
        card.push_str(&format!("<div class=\"tags\">{tags}</div>\n"));
    }
    card.push_str("</article>\n");
    card
}

pub fn render_html(view: &BriefingView<'_>) -> String {
    let date = view.briefing.briefing_date;
    let title = format!("Daily Briefing · {}", date.format("%A, %B %-d, %Y"));

    let mut index = String::new();
    for (item, _) in view.items {
        index.push_str(&format!(
            "<li class=\"headline\"><a href=\"#{}\">{}</a> <span class=\"source\">{}</span></li>\n",
            html_attr(&item.id),
            html_escape(&item.title),
            html_escape(&item.source_name)
        ));
    }

    let intro = view
        .intro
        .filter(|s| !s.trim().is_empty())
        .map(|s| format!("<p class=\"intro\">{}</p>\n", html_escape(s)))
        .unwrap_or_default();

    let mut sections = String::new();
    for tier in Tier::ALL {
        let cards: Vec<String> = view
            .items
            .iter()
            .filter(|(_, p)| p.tier == tier)
            .map(|(item, p)| render_card(item, p, date))
            .collect();
        if cards.is_empty() {
            continue;
        }
        sections.push_str(&format!(
            "<section class=\"tier\">\n<h2>{} ({})</h2>\n{}</section>\n",
            tier.label(),
            cards.len(),
            cards.concat()
        ));
    }

    let progress = view
        .progress
        .filter(|p| p.total_items > 0)
        .map(|p| {
            format!(
                "<p class=\"progress\">Backlog: {:.0}% ({}/{})</p>\n",
                p.percent_complete(),
                p.delivered_items,
                p.total_items
            )
        })
        .unwrap_or_default();

    let plural = if view.footer.briefing_number == 1 { "" } else { "s" };

    format!(
        r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{title}</title>
  </head>
  <body>
    <header>
      <h1>{title}</h1>
      <p class="counts">{total} items · {fresh} fresh · {backlog} backlog · {minutes} min read</p>
    </header>
    <nav>
      <ol class="index">
{index}      </ol>
    </nav>
    {intro}<main>
{sections}    </main>
    <footer>
      {progress}<p>You've read {number} briefing{plural} · {delivered} items processed</p>
    </footer>
  </body>
</html>"#,
        title = html_escape(&title),
        total = view.briefing.total_count,
        fresh = view.briefing.fresh_count,
        backlog = view.briefing.backlog_count,
        minutes = read_time_minutes(view.items),
        index = index,
        intro = intro,
        sections = sections,
        progress = progress,
        number = view.footer.briefing_number,
        plural = plural,
        delivered = view.footer.items_delivered,
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn html_attr(s: &str) -> String {
    html_escape(s).replace('"', "&quot;")
}

/// Relative label for a publication date: "today", "yesterday", "3 days ago".
pub fn relative_date(published: NaiveDate, today: NaiveDate) -> String {
    match (today - published).num_days() {
        d if d <= 0 => "today".to_string(),
        1 => "yesterday".to_string(),
        d if d < 14 => format!("{d} days ago"),
        d => format!("{} weeks ago", d / 7),
    }
}
