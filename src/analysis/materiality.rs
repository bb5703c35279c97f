// =============================================================================
// materiality.rs — THE MATERIALITY ANALYZER
// =============================================================================
//
// Scores a section-level change in [0, 1]: how much should anyone watching
// this company care? Keyword matching reuses the house idiom of one
// Aho-Corasick automaton per bucket, built once behind a `LazyLock`, with a
// `memchr` bouncer check before paying for the full scan.
// =============================================================================

use crate::models::ChangeType;
use aho_corasick::AhoCorasick;
use regex::Regex;
use std::sync::LazyLock;

static HIGH_KEYWORDS: &[&str] = &[
    "material adverse", "significantly", "substantially", "materially", "acquisition",
    "merger", "bankruptcy", "restructuring", "litigation", "impairment", "discontinued",
    "segment", "divest", "spin-off", "going concern", "default", "covenant", "restatement",
];

static MEDIUM_KEYWORDS: &[&str] = &[
    "change", "modify", "update", "revise", "amend", "new", "increased", "decreased",
    "investment", "contract", "agreement", "policy", "estimate", "outlook", "guidance",
    "facility", "debt",
];

static LOW_KEYWORDS: &[&str] = &[
    "additional", "disclosure", "note", "footnote", "reference", "see also", "updated",
    "clarification", "formatting",
];

static HIGH_AUTOMATON: LazyLock<AhoCorasick> = LazyLock::new(|| build_automaton(HIGH_KEYWORDS));
static MEDIUM_AUTOMATON: LazyLock<AhoCorasick> = LazyLock::new(|| build_automaton(MEDIUM_KEYWORDS));
static LOW_AUTOMATON: LazyLock<AhoCorasick> = LazyLock::new(|| build_automaton(LOW_KEYWORDS));

static NUMERIC_SIGNAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$[0-9,]+|[0-9]+%|[0-9]+\.[0-9]+").unwrap());

fn build_automaton(keywords: &[&str]) -> AhoCorasick {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(keywords)
        .expect("keyword bank compiles")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Significance {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Significance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Significance::High => "HIGH",
            Significance::Medium => "MEDIUM",
            Significance::Low => "LOW",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct MaterialityResult {
    pub score: f64,
    pub significance: Significance,
    pub matched_keywords: Vec<String>,
    pub reasoning: String,
}

/// Scores a section-level change. `old_content`/`new_content` follow the
/// change kind: ADDITION/UNCHANGED look at `new_content`, DELETION looks at
/// `old_content`, MODIFICATION prefers `new_content`.
pub fn score_change(
    old_content: Option<&str>,
    new_content: Option<&str>,
    change_type: ChangeType,
) -> MaterialityResult {
    let mut score = match change_type {
        ChangeType::Addition => 0.6,
        ChangeType::Deletion => 0.7,
        ChangeType::Modification => 0.5,
        ChangeType::Unchanged => 0.0,
    };
    let mut reasons = vec![format!("base({change_type}) = {score:.2}")];

    let content = new_content.or(old_content).unwrap_or("");

    let mut matched_keywords = Vec::new();
    if !content.is_empty() {
        let lower = content.to_lowercase();
        'buckets: for (automaton, weight, label) in [
            (&*HIGH_AUTOMATON, 0.3, "HIGH"),
            (&*MEDIUM_AUTOMATON, 0.2, "MEDIUM"),
            (&*LOW_AUTOMATON, 0.1, "LOW"),
        ] {
            let mut seen = std::collections::HashSet::new();
            for m in automaton.find_iter(&lower) {
                let kw = lower[m.start()..m.end()].to_string();
                if seen.insert(kw.clone()) {
                    score += weight;
                    matched_keywords.push(kw);
                    if score >= 1.0 {
                        reasons.push(format!("keyword bank {label} reached cap"));
                        break 'buckets;
                    }
                }
            }
        }
        if !matched_keywords.is_empty() {
            reasons.push(format!("{} keyword(s) matched", matched_keywords.len()));
        }

        let len = content.len();
        if len > 1000 {
            score += 0.1;
            reasons.push("length > 1000".to_string());
        }
        if len > 5000 {
            score += 0.1;
            reasons.push("length > 5000".to_string());
        }

        if NUMERIC_SIGNAL.is_match(content) {
            score += 0.2;
            reasons.push("numeric signal present".to_string());
        }
    }

    score = (score.min(1.0) * 100.0).round() / 100.0;

    let significance = if score >= 0.7 {
        Significance::High
    } else if score >= 0.4 {
        Significance::Medium
    } else {
        Significance::Low
    };

    matched_keywords.truncate(10);

    MaterialityResult {
        score,
        significance,
        matched_keywords,
        reasoning: reasons.join("; "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_scores_zero() {
        let r = score_change(Some("same"), Some("same"), ChangeType::Unchanged);
        assert_eq!(r.score, 0.0);
        assert_eq!(r.significance, Significance::Low);
    }

    #[test]
    fn material_modification_with_keyword_and_number_scores_high() {
        let r = score_change(
            Some("We sell phones."),
            Some("We sell phones and have a material adverse litigation outstanding of $500,000,000."),
            ChangeType::Modification,
        );
        assert!(r.score >= 0.9, "expected >= 0.9, got {}", r.score);
        assert_eq!(r.significance, Significance::High);
        assert!(r.matched_keywords.iter().any(|k| k.contains("material adverse")));
    }

    #[test]
    fn deletion_base_is_higher_than_addition() {
        let del = score_change(Some("plain text"), None, ChangeType::Deletion);
        let add = score_change(None, Some("plain text"), ChangeType::Addition);
        assert!(del.score > add.score);
    }

    #[test]
    fn score_never_exceeds_one() {
        let huge = HIGH_KEYWORDS.join(" ") + " " + &MEDIUM_KEYWORDS.join(" ") + &"$1,000,000 ".repeat(50);
        let r = score_change(None, Some(&huge), ChangeType::Modification);
        assert!(r.score <= 1.0);
    }

    #[test]
    fn matched_keywords_capped_at_ten() {
        let text = HIGH_KEYWORDS.join(" . ");
        let r = score_change(None, Some(&text), ChangeType::Modification);
        assert!(r.matched_keywords.len() <= 10);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_change_type() -> impl Strategy<Value = ChangeType> {
        prop_oneof![
            Just(ChangeType::Addition),
            Just(ChangeType::Deletion),
            Just(ChangeType::Modification),
            Just(ChangeType::Unchanged),
        ]
    }

    proptest! {
        /// Invariant 1: score_change never leaves [0, 1] no matter what text
        /// or change kind it's fed.
        #[test]
        fn score_always_in_unit_range(old in ".{0,200}", new in ".{0,200}", ct in arb_change_type()) {
            let r = score_change(Some(&old), Some(&new), ct);
            prop_assert!(r.score >= 0.0 && r.score <= 1.0);
        }

        #[test]
        fn significance_band_matches_score(new in ".{0,200}") {
            let r = score_change(None, Some(&new), ChangeType::Modification);
            match r.significance {
                Significance::High => prop_assert!(r.score >= 0.7),
                Significance::Medium => prop_assert!(r.score >= 0.4 && r.score < 0.7),
                Significance::Low => prop_assert!(r.score < 0.4),
            }
        }
    }
}
