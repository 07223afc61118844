//! Lexical query classification
//!
//! Maps a raw question to a [`Category`] using keyword regexes. No model,
//! no network, no state: it runs on every request so it has to be cheap.
//!
//! Each category owns a small set of pattern groups; the score of a category
//! is the number of its groups that match. The highest score wins, and ties
//! go to the category listed first in [`PATTERN_ORDER`]. Questions that match
//! nothing are `vague` when they are at most [`VAGUE_MAX_WORDS`] words long
//! and `factual` otherwise, so empty input classifies as `vague`.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use super::types::Category;

/// Unmatched questions with this many words or fewer are `vague`
pub const VAGUE_MAX_WORDS: usize = 4;

/// Tie-break order between categories with equal match scores
pub const PATTERN_ORDER: [Category; 5] = [
    Category::Factual,
    Category::Analytical,
    Category::Relational,
    Category::Procedural,
    Category::Visual,
];

const FACTUAL: &[&str] = &[
    r"\b(what is|who is|when did|where is|define|what does|what are)\b",
    r"\b(name of|tell me the|which one)\b",
];

const ANALYTICAL: &[&str] = &[
    r"\b(compare|analyze|how many|average|total|sum|count|trend|percentage|ratio)\b",
    r"\b(statistics|data|numbers|grouped by|breakdown)\b",
];

// Stems on purpose: "related", "connection", "dependency".
const RELATIONAL: &[&str] = &[
    r"\b(relat|connect|between|linked|associated|works with|reports to)",
    r"\b(hierarchy|network|chain|depend)",
];

const PROCEDURAL: &[&str] = &[
    r"\b(how to|how do|steps to|process of|explain how|guide|tutorial)\b",
    r"\b(implement|build|create|set up|configure)\b",
];

const VISUAL: &[&str] = &[r"\b(image|picture|diagram|chart|screenshot|photo|figure|graph|plot)\b"];

struct CategoryPatterns {
    category: Category,
    patterns: Vec<Regex>,
}

static PATTERNS: LazyLock<Vec<CategoryPatterns>> = LazyLock::new(|| {
    PATTERN_ORDER
        .iter()
        .map(|&category| {
            let sources = match category {
                Category::Factual => FACTUAL,
                Category::Analytical => ANALYTICAL,
                Category::Relational => RELATIONAL,
                Category::Procedural => PROCEDURAL,
                Category::Visual => VISUAL,
                Category::Vague => &[],
            };
            CategoryPatterns {
                category,
                patterns: sources
                    .iter()
                    .filter_map(|p| Regex::new(p).ok())
                    .collect(),
            }
        })
        .collect()
});

/// Classify a question into exactly one category
pub fn classify(question: &str) -> Category {
    classify_with_scores(question).0
}

/// Classify a question and return the per-category match counts alongside
pub fn classify_with_scores(question: &str) -> (Category, BTreeMap<Category, usize>) {
    let normalized = question.trim().to_lowercase();
    let scores = score_normalized(&normalized);
    let category = pick(&scores, &normalized);
    (category, scores)
}

fn pick(scores: &BTreeMap<Category, usize>, normalized: &str) -> Category {
    // Strict `>` keeps the first category in PATTERN_ORDER on ties.
    let mut best: Option<(Category, usize)> = None;
    for category in PATTERN_ORDER {
        let score = scores.get(&category).copied().unwrap_or(0);
        if score > 0 && best.is_none_or(|(_, s)| score > s) {
            best = Some((category, score));
        }
    }

    match best {
        Some((category, _)) => category,
        None if normalized.split_whitespace().count() <= VAGUE_MAX_WORDS => Category::Vague,
        None => Category::Factual,
    }
}

fn score_normalized(normalized: &str) -> BTreeMap<Category, usize> {
    PATTERNS
        .iter()
        .filter_map(|entry| {
            let score = entry
                .patterns
                .iter()
                .filter(|re| re.is_match(normalized))
                .count();
            (score > 0).then_some((entry.category, score))
        })
        .collect()
}
