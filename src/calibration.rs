//! Signal-based correction of the tier an LLM assigns.
//!
//! Models drift toward the middle tier. Word count, source, content category,
//! insight density and freshness are objective enough to override that
//! judgment. Rules are evaluated in order and the first match wins.

use crate::model::{ContentCategory, Freshness, Tier};

/// Sources whose long pieces are reliably worth reading in full.
pub const DEEP_SOURCES: &[&str] = &["dwarkesh-patel", "lennys-podcast", "stratechery"];

pub const LONG_FORM_WORDS: i64 = 18_000;
pub const DEEP_DIVE_MIN_WORDS: i64 = 12_000;
pub const DEEP_DIVE_MIN_INSIGHTS: usize = 5;
pub const SUMMARY_MAX_WORDS: i64 = 1_500;

/// Inputs the rules look at.
#[derive(Debug, Clone, Copy)]
pub struct Signals<'a> {
    pub word_count: i64,
    pub source_id: &'a str,
    pub tier: Tier,
    pub category: ContentCategory,
    pub insight_count: usize,
    pub freshness: Freshness,
}

/// Which rule fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    LongForm,
    DeepSource,
    LongInterview,
    DenseInsights,
    TooShort,
    Stale,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Calibration {
    pub tier: Tier,
    pub rule: Rule,
    /// Appended to the model's rationale; empty when nothing changed.
    pub note: String,
}

impl Calibration {
    /// Original rationale with the calibration note appended.
    pub fn annotate(&self, rationale: &str) -> String {
        format!("{}{}", rationale, self.note)
    }
}

/// `12345` -> `12,345`
fn thousands(n: i64) -> String {
    let digits = n.abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if n < 0 {
        out.insert(0, '-');
    }
    out
}

pub fn calibrate(s: Signals<'_>) -> Calibration {
    let wc = s.word_count;
    let promote = s.tier != Tier::DeepDive;

    let (tier, rule, note) = if wc >= LONG_FORM_WORDS && promote {
        (
            Tier::DeepDive,
            Rule::LongForm,
            format!(" [Calibrated: {}-word long-form]", thousands(wc)),
        )
    } else if wc >= DEEP_DIVE_MIN_WORDS && DEEP_SOURCES.contains(&s.source_id) && promote {
        (
            Tier::DeepDive,
            Rule::DeepSource,
            format!(" [Calibrated: {} words from {}]", thousands(wc), s.source_id),
        )
    } else if wc >= DEEP_DIVE_MIN_WORDS && s.category == ContentCategory::Interview && promote {
        (
            Tier::DeepDive,
            Rule::LongInterview,
            format!(" [Calibrated: {}-word interview]", thousands(wc)),
        )
    } else if wc >= DEEP_DIVE_MIN_WORDS && s.insight_count >= DEEP_DIVE_MIN_INSIGHTS && promote {
        (
            Tier::DeepDive,
            Rule::DenseInsights,
            format!(
                " [Calibrated: {} words, {} insights]",
                thousands(wc),
                s.insight_count
            ),
        )
    } else if wc <= SUMMARY_MAX_WORDS && s.tier != Tier::SummarySufficient {
        (
            Tier::SummarySufficient,
            Rule::TooShort,
            format!(" [Calibrated: only {} words]", wc),
        )
    } else if s.freshness == Freshness::Stale && s.tier == Tier::DeepDive {
        (
            Tier::WorthALook,
            Rule::Stale,
            " [Calibrated: stale content demoted]".to_string(),
        )
    } else {
        (s.tier, Rule::Unchanged, String::new())
    };

    Calibration { tier, rule, note }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals(word_count: i64, source_id: &str, tier: Tier) -> Signals<'_> {
        Signals {
            word_count,
            source_id,
            tier,
            category: ContentCategory::Commentary,
            insight_count: 3,
            freshness: Freshness::Fresh,
        }
    }

    #[test]
    fn long_form_fires_before_deep_source() {
        let c = calibrate(signals(20_000, "dwarkesh-patel", Tier::WorthALook));
        assert_eq!(c.tier, Tier::DeepDive);
        assert_eq!(c.rule, Rule::LongForm);
        assert_eq!(c.note, " [Calibrated: 20,000-word long-form]");
    }

    #[test]
    fn short_deep_dive_is_demoted() {
        let c = calibrate(signals(800, "anyone", Tier::DeepDive));
        assert_eq!(c.tier, Tier::SummarySufficient);
        assert_eq!(c.note, " [Calibrated: only 800 words]");
        assert_eq!(c.annotate("Great piece."), "Great piece. [Calibrated: only 800 words]");
    }

    #[test]
    fn deep_source_interview_and_insights() {
        let c = calibrate(signals(13_000, "stratechery", Tier::SummarySufficient));
        assert_eq!(c.rule, Rule::DeepSource);
        assert_eq!(c.note, " [Calibrated: 13,000 words from stratechery]");

        let mut s = signals(13_000, "random", Tier::WorthALook);
        s.category = ContentCategory::Interview;
        assert_eq!(calibrate(s).rule, Rule::LongInterview);

        let mut s = signals(13_000, "random", Tier::WorthALook);
        s.insight_count = 5;
        let c = calibrate(s);
        assert_eq!(c.rule, Rule::DenseInsights);
        assert_eq!(c.note, " [Calibrated: 13,000 words, 5 insights]");

        let s = signals(13_000, "random", Tier::WorthALook);
        assert_eq!(calibrate(s).rule, Rule::Unchanged);
    }

    #[test]
    fn stale_deep_dive_is_demoted_once() {
        let mut s = signals(5_000, "random", Tier::DeepDive);
        s.freshness = Freshness::Stale;
        let c = calibrate(s);
        assert_eq!(c.tier, Tier::WorthALook);
        assert_eq!(c.rule, Rule::Stale);

        // word-count promotion takes precedence over staleness
        let mut s = signals(19_000, "random", Tier::WorthALook);
        s.freshness = Freshness::Stale;
        assert_eq!(calibrate(s).tier, Tier::DeepDive);
    }

    #[test]
    fn already_deep_long_form_is_unchanged() {
        let c = calibrate(signals(30_000, "random", Tier::DeepDive));
        assert_eq!(c.rule, Rule::Unchanged);
        assert!(c.note.is_empty());
    }

    #[test]
    fn calibration_is_pure() {
        let s = signals(12_500, "lennys-podcast", Tier::WorthALook);
        assert_eq!(calibrate(s), calibrate(s));
    }

    #[test]
    fn thousands_separator() {
        assert_eq!(thousands(999), "999");
        assert_eq!(thousands(1_000), "1,000");
        assert_eq!(thousands(1_234_567), "1,234,567");
    }
}
