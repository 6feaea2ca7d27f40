//! Query normalization and variant generation.
//!
//! [`QueryNormalizer::normalize`] canonicalizes a raw query through a fixed
//! stage order (lowercase, symbol rewrites, quarter-range expansion, character
//! stripping, abbreviation expansion) so that retrieval, scoring, and caching
//! all see one spelling of the same question. The transformation is
//! deterministic and idempotent: `normalize(normalize(q)) == normalize(q)`.
//!
//! [`QueryNormalizer::generate_variants`] widens recall by emitting up to four
//! rewrites of the normalized query (original, stopwords removed, key terms
//! only, synonym expanded). The retrieval pipeline searches every variant.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static VS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bvs\b\.?").unwrap());
static QUARTER_ABBR_RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bq(\d)\s*-\s*q(\d)\b").unwrap());
static QUARTER_RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bquarter\s*(\d)\s*(?:-|to)\s*quarter\s*(\d)\b").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Closed stopword set removed by the first variant.
const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for",
];

/// Domain vocabulary retained by the key-terms variant.
const KEY_TERMS: &[&str] = &[
    "revenue",
    "profit",
    "expense",
    "cost",
    "margin",
    "growth",
    "customer",
    "acquisition",
    "retention",
    "lifetime",
    "value",
    "employee",
    "salary",
    "attrition",
    "hiring",
    "performance",
    "marketing",
    "campaign",
    "conversion",
    "engagement",
    "engineering",
    "architecture",
    "security",
    "api",
    "system",
    "quarter",
    "annual",
    "monthly",
    "financial",
    "year",
    "policy",
    "compliance",
    "procedure",
    "guideline",
];

/// Synonym expansions applied by the synonym variant.
const SYNONYMS: &[(&str, &str)] = &[
    ("revenue", "revenue income earnings"),
    ("profit", "profit earnings margin"),
    ("cost", "cost expense expenditure"),
    ("employee", "employee staff personnel"),
    ("customer", "customer client user"),
    ("growth", "growth increase expansion"),
];

/// Default whole-word abbreviation expansions. The single letter `q` is
/// special-cased: it only expands when followed by a digit (`q4` →
/// `quarter 4`).
#[must_use]
pub fn default_abbreviations() -> BTreeMap<String, String> {
    let pairs = [
        ("q", "quarter"),
        ("yoy", "year over year"),
        ("roi", "return on investment"),
        ("kpi", "key performance indicator"),
        ("hr", "human resources"),
        ("eng", "engineering"),
        ("fin", "finance"),
        ("mkt", "marketing"),
    ];
    pairs
        .into_iter()
        .map(|(abbr, full)| (abbr.to_string(), full.to_string()))
        .collect()
}

enum AbbrPattern {
    /// `q` followed by a digit; the digit is carried into the expansion.
    QuarterDigit(Regex),
    /// Plain whole-word replacement.
    Word(Regex),
}

/// Deterministic query normalizer with precompiled abbreviation patterns.
pub struct QueryNormalizer {
    patterns: Vec<(AbbrPattern, String)>,
}

impl QueryNormalizer {
    /// Build a normalizer from an abbreviation map.
    #[must_use]
    pub fn new(abbreviations: &BTreeMap<String, String>) -> Self {
        let mut patterns = Vec::with_capacity(abbreviations.len());
        for (abbr, full) in abbreviations {
            let pattern = if abbr.eq_ignore_ascii_case("q") {
                AbbrPattern::QuarterDigit(
                    Regex::new(r"\bq(\d)\b").expect("static quarter pattern"),
                )
            } else {
                let escaped = regex::escape(abbr);
                AbbrPattern::Word(
                    Regex::new(&format!(r"(?i)\b{escaped}\b")).expect("escaped abbreviation"),
                )
            };
            patterns.push((pattern, full.clone()));
        }
        Self { patterns }
    }

    /// Build a normalizer with the compiled default abbreviation set.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(&default_abbreviations())
    }

    /// Canonicalize a raw query.
    #[must_use]
    pub fn normalize(&self, query: &str) -> String {
        let cleaned = clean_text(query);
        let expanded = self.expand_abbreviations(&cleaned);
        let ranged = expand_ranges(&expanded);
        WHITESPACE_RE.replace_all(&ranged, " ").trim().to_string()
    }

    /// Generate 1-4 retrieval variants, original first, duplicates removed
    /// while preserving order.
    #[must_use]
    pub fn generate_variants(&self, normalized: &str) -> Vec<String> {
        let mut variants = vec![normalized.to_string()];

        // Variant: stopwords removed.
        let words: Vec<&str> = normalized.split_whitespace().collect();
        let filtered: Vec<&str> = words
            .iter()
            .copied()
            .filter(|w| !STOPWORDS.contains(w))
            .collect();
        if filtered.len() != words.len() {
            variants.push(filtered.join(" "));
        }

        // Variant: key terms only.
        let key_terms = extract_key_terms(normalized);
        if !key_terms.is_empty() && key_terms != normalized {
            variants.push(key_terms);
        }

        // Variant: synonym expanded, only when it grows the query by >= 20%.
        let expanded = add_domain_synonyms(normalized);
        if expanded != normalized {
            variants.push(expanded);
        }

        let mut seen = std::collections::BTreeSet::new();
        variants
            .into_iter()
            .filter(|v| !v.trim().is_empty() && seen.insert(v.clone()))
            .collect()
    }

    fn expand_abbreviations(&self, query: &str) -> String {
        let mut result = query.to_string();
        for (pattern, full) in &self.patterns {
            result = match pattern {
                AbbrPattern::QuarterDigit(re) => {
                    let replacement = format!("{full} ${{1}}");
                    re.replace_all(&result, replacement.as_str()).into_owned()
                }
                AbbrPattern::Word(re) => re.replace_all(&result, full.as_str()).into_owned(),
            };
        }
        result
    }
}

impl Default for QueryNormalizer {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Lowercase, rewrite symbols to words, protect quarter ranges, and strip
/// everything that is not a word character, whitespace, or a decimal point.
fn clean_text(query: &str) -> String {
    let mut text = query.to_lowercase();
    text = text.replace('&', " and ");
    text = text.replace('%', " percent ");
    text = text.replace('/', " or ");
    text = VS_RE.replace_all(&text, " versus ").into_owned();

    // Rewrite `q1-q3` before the hyphen is stripped below.
    text = QUARTER_ABBR_RANGE_RE
        .replace_all(&text, "q${1} to q${2}")
        .into_owned();

    let chars: Vec<char> = text.chars().collect();
    let mut kept = String::with_capacity(text.len());
    for (i, &c) in chars.iter().enumerate() {
        let keep = c.is_alphanumeric()
            || c == '_'
            || c.is_whitespace()
            || (c == '.' && digit_neighbors(&chars, i));
        kept.push(if keep { c } else { ' ' });
    }

    WHITESPACE_RE.replace_all(&kept, " ").trim().to_string()
}

/// Periods survive cleaning only when both neighbors are digits (`5.5`).
fn digit_neighbors(chars: &[char], i: usize) -> bool {
    let prev = i.checked_sub(1).and_then(|p| chars.get(p));
    let next = chars.get(i + 1);
    matches!((prev, next), (Some(p), Some(n)) if p.is_ascii_digit() && n.is_ascii_digit())
}

/// Expand `quarter 1 to quarter 3` into `quarter 1 quarter 2 quarter 3`.
fn expand_ranges(query: &str) -> String {
    QUARTER_RANGE_RE
        .replace_all(query, |caps: &regex::Captures<'_>| {
            let start: u32 = caps[1].parse().unwrap_or(0);
            let end: u32 = caps[2].parse().unwrap_or(0);
            if start == 0 || end < start {
                return caps[0].to_string();
            }
            (start..=end)
                .map(|n| format!("quarter {n}"))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .into_owned()
}

/// Retain only domain vocabulary, preserving `quarter <digit>` bigrams.
fn extract_key_terms(query: &str) -> String {
    let words: Vec<&str> = query.split_whitespace().collect();
    let mut kept = Vec::new();
    let mut skip_next = false;

    for (i, word) in words.iter().enumerate() {
        if skip_next {
            skip_next = false;
            continue;
        }
        if *word == "quarter"
            && words
                .get(i + 1)
                .is_some_and(|next| next.chars().all(|c| c.is_ascii_digit()))
        {
            kept.push(format!("quarter {}", words[i + 1]));
            skip_next = true;
        } else if KEY_TERMS.contains(word) {
            kept.push((*word).to_string());
        }
    }

    kept.join(" ")
}

/// Append configured synonyms to recognized terms. Returns the input
/// unchanged unless the expansion grows the query by at least 20%.
fn add_domain_synonyms(query: &str) -> String {
    let expanded: Vec<&str> = query
        .split_whitespace()
        .map(|word| {
            SYNONYMS
                .iter()
                .find(|(term, _)| *term == word)
                .map_or(word, |(_, expansion)| *expansion)
        })
        .collect();
    let expanded = expanded.join(" ");

    if expanded.len() as f32 >= query.len() as f32 * 1.2 {
        expanded
    } else {
        query.to_string()
    }
}
