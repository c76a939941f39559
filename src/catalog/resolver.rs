//! Product resolution cascade.
//!
//! Vendor emails encode product identifiers inconsistently: wrong SKU
//! prefixes, human-entered names, size variants. A single exact strategy
//! under-matches and a single fuzzy strategy over-matches, so resolution
//! runs cheap precise tiers before permissive ones, first success wins:
//!
//! 1. exact SKU            (confidence 1.0)
//! 2. partial SKU tokens   (0.85)
//! 3. name substring       (0.75)
//! 4. keyword overlap      (coverage score, capped below tier 3)
//! 5. fuzzy similarity     (similarity score, capped below tier 3)
//! 6. no match             (0.0, flagged for human review)
//!
//! Resolution never fails: malformed input short-circuits to tier 6 and the
//! order proceeds with raw fields.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::catalog::entry::{normalize_sku, CatalogEntry};
use crate::catalog::index::CatalogIndex;
use crate::orders::{LineItem, MatchStrategy, ResolvedLineItem};

const PARTIAL_SKU_TOKEN_THRESHOLD: f64 = 0.7;
const KEYWORD_SCORE_THRESHOLD: f64 = 0.6;
const FUZZY_SCORE_THRESHOLD: f64 = 0.6;
const ALTERNATIVE_MIN_SCORE: f64 = 0.3;

const EXACT_SKU_CONFIDENCE: f64 = 1.0;
const PARTIAL_SKU_CONFIDENCE: f64 = 0.85;
const NAME_SUBSTRING_CONFIDENCE: f64 = 0.75;
/// Tiers 4 and 5 report their raw score but may never reach tier 3's
/// confidence, keeping the cascade ordering strict.
const PERMISSIVE_TIER_CAP: f64 = 0.74;

static SKU_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+|[A-Z]+").expect("sku token regex"));
static DIMENSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+[xX]\d+").expect("dimension regex"));
static NON_ALNUM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Z0-9]").expect("alnum regex"));

/// Filler words that carry no signal for product identification.
const STOP_WORDS: &[&str] = &[
    "THE", "AND", "FOR", "WITH", "VARIOUS", "SIZES", "SIZE", "LATICRETE",
];

/// A candidate returned by the alternatives query for manual remediation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AlternativeMatch {
    pub entry: CatalogEntry,
    pub score: f64,
}

/// Resolution engine over one catalog snapshot. Deterministic for a fixed
/// snapshot; build a new one after reload.
pub struct Resolver<'a> {
    index: &'a CatalogIndex,
    brand_prefix: Option<&'a str>,
}

impl<'a> Resolver<'a> {
    pub fn new(index: &'a CatalogIndex) -> Self {
        Self {
            index,
            brand_prefix: None,
        }
    }

    /// Strip a leading brand word (e.g. "LATICRETE ") before name matching;
    /// the catalog descriptions omit it.
    pub fn with_brand_prefix(mut self, prefix: Option<&'a str>) -> Self {
        self.brand_prefix = prefix;
        self
    }

    /// Resolve a raw line item against the catalog. Never fails; a miss
    /// comes back as `MatchStrategy::NoMatch` with `needs_verification`.
    pub fn resolve_item(&self, item: &LineItem) -> ResolvedLineItem {
        let (strategy, confidence, entry) =
            self.find(&item.raw_name, item.raw_sku.as_deref());

        match entry {
            Some(entry) => {
                debug!(
                    raw_name = %item.raw_name,
                    sku = entry.sku.as_deref().unwrap_or("-"),
                    strategy = strategy.label(),
                    confidence,
                    "Line item resolved"
                );
                ResolvedLineItem {
                    raw_name: item.raw_name.clone(),
                    raw_sku: item.raw_sku.clone(),
                    quantity: item.quantity,
                    raw_price: item.raw_price,
                    catalog_id: Some(entry.id),
                    resolved_sku: entry
                        .sku
                        .clone()
                        .or_else(|| item.raw_sku.as_deref().map(normalize_sku)),
                    resolved_price: Some(entry.unit_price),
                    unit: Some(entry.unit.clone()),
                    match_strategy: strategy,
                    match_confidence: confidence,
                    needs_verification: false,
                }
            }
            None => {
                debug!(raw_name = %item.raw_name, "Line item unresolved, flagged for review");
                ResolvedLineItem {
                    raw_name: item.raw_name.clone(),
                    raw_sku: item.raw_sku.clone(),
                    quantity: item.quantity,
                    raw_price: item.raw_price,
                    catalog_id: None,
                    resolved_sku: item.raw_sku.as_deref().map(normalize_sku),
                    resolved_price: None,
                    unit: None,
                    match_strategy: MatchStrategy::NoMatch,
                    match_confidence: 0.0,
                    needs_verification: true,
                }
            }
        }
    }

    /// Run the cascade. Returns the winning tier, its confidence, and the
    /// catalog entry (None on tier 6).
    fn find(
        &self,
        raw_name: &str,
        raw_sku: Option<&str>,
    ) -> (MatchStrategy, f64, Option<&'a CatalogEntry>) {
        let name = self.clean_name(raw_name);

        // Tier 1/2: SKU-driven, tried before any name heuristics.
        if let Some(sku) = raw_sku.map(str::trim).filter(|s| !s.is_empty()) {
            if let Some(entry) = self.index.get_by_sku(sku) {
                return (MatchStrategy::ExactSku, EXACT_SKU_CONFIDENCE, Some(entry));
            }
            if let Some(entry) = self.find_by_partial_sku(sku) {
                return (
                    MatchStrategy::PartialSku,
                    PARTIAL_SKU_CONFIDENCE,
                    Some(entry),
                );
            }
        }

        if name.is_empty() {
            return (MatchStrategy::NoMatch, 0.0, None);
        }

        // Tier 3: case-insensitive substring of the input in the
        // brand+description combined text.
        let name_upper = name.to_uppercase();
        if let Some(entry) = self
            .index
            .entries()
            .iter()
            .find(|e| e.normalized_name.contains(&name_upper))
        {
            return (
                MatchStrategy::NameSubstring,
                NAME_SUBSTRING_CONFIDENCE,
                Some(entry),
            );
        }

        // Tier 4: keyword coverage.
        let keywords = extract_keywords(&name);
        if !keywords.is_empty() {
            let mut best: Option<(&CatalogEntry, f64)> = None;
            for entry in self.index.entries() {
                let hits = keywords
                    .iter()
                    .filter(|kw| entry.normalized_name.contains(kw.as_str()))
                    .count();
                let score = hits as f64 / keywords.len() as f64;
                if score >= KEYWORD_SCORE_THRESHOLD
                    && best.map_or(true, |(_, s)| score > s)
                {
                    best = Some((entry, score));
                }
            }
            if let Some((entry, score)) = best {
                return (
                    MatchStrategy::KeywordOverlap,
                    score.min(PERMISSIVE_TIER_CAP),
                    Some(entry),
                );
            }
        }

        // Tier 5: fuzzy similarity, the most permissive tier.
        let mut best: Option<(&CatalogEntry, f64)> = None;
        for entry in self.index.entries() {
            let sim = strsim::normalized_levenshtein(&name_upper, &entry.normalized_name);
            if sim >= FUZZY_SCORE_THRESHOLD && best.map_or(true, |(_, s)| sim > s) {
                best = Some((entry, sim));
            }
        }
        if let Some((entry, sim)) = best {
            return (
                MatchStrategy::FuzzySimilarity,
                sim.min(PERMISSIVE_TIER_CAP),
                Some(entry),
            );
        }

        (MatchStrategy::NoMatch, 0.0, None)
    }

    /// Partial SKU match: tokenize both sides into digit/letter runs and
    /// accept the first candidate containing at least 70% of the input
    /// tokens. Handles vendor-added prefixes and dropped dashes.
    fn find_by_partial_sku(&self, sku: &str) -> Option<&'a CatalogEntry> {
        let input_tokens = sku_tokens(sku);
        if input_tokens.is_empty() {
            return None;
        }
        let needed = (input_tokens.len() as f64 * PARTIAL_SKU_TOKEN_THRESHOLD).ceil() as usize;

        self.index.entries().iter().find(|entry| {
            let Some(candidate_sku) = &entry.sku else {
                return false;
            };
            let candidate_tokens = sku_tokens(candidate_sku);
            let hits = input_tokens
                .iter()
                .filter(|t| candidate_tokens.contains(t))
                .count();
            hits >= needed
        })
    }

    /// Top-N candidates by blended keyword/fuzzy score, for manual
    /// remediation when the main call misses. Independent of `resolve_item`.
    pub fn alternatives(&self, raw_name: &str, top_n: usize) -> Vec<AlternativeMatch> {
        let name = self.clean_name(raw_name);
        let keywords = extract_keywords(&name);
        if name.is_empty() {
            return Vec::new();
        }
        let name_upper = name.to_uppercase();

        let mut scored: Vec<AlternativeMatch> = self
            .index
            .entries()
            .iter()
            .filter_map(|entry| {
                let keyword_score = if keywords.is_empty() {
                    0.0
                } else {
                    let hits = keywords
                        .iter()
                        .filter(|kw| entry.normalized_name.contains(kw.as_str()))
                        .count();
                    hits as f64 / keywords.len() as f64
                };
                let fuzzy_score =
                    strsim::normalized_levenshtein(&name_upper, &entry.normalized_name);
                let score = keyword_score * 0.7 + fuzzy_score * 0.3;
                (score > ALTERNATIVE_MIN_SCORE).then(|| AlternativeMatch {
                    entry: entry.clone(),
                    score,
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_n);
        scored
    }

    fn clean_name(&self, raw_name: &str) -> String {
        let name = raw_name.trim();
        if let Some(prefix) = self.brand_prefix {
            // Raw names can put a multibyte char across prefix.len();
            // get() instead of slicing so that never panics.
            if let (Some(head), Some(rest)) =
                (name.get(..prefix.len()), name.get(prefix.len()..))
            {
                if head.eq_ignore_ascii_case(prefix) {
                    if let Some(rest) = rest.strip_prefix(' ') {
                        return rest.trim().to_string();
                    }
                }
            }
        }
        name.to_string()
    }
}

/// Split a SKU into digit runs and letter runs, uppercased.
/// "#254-50-G" → ["254", "50", "G"].
fn sku_tokens(sku: &str) -> Vec<String> {
    let cleaned = normalize_sku(sku);
    SKU_TOKEN_RE
        .find_iter(&cleaned)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Extract uppercase alphanumeric keywords (≥3 chars, stop-words removed)
/// plus dimension tokens like "12x12".
fn extract_keywords(text: &str) -> Vec<String> {
    let upper = text.to_uppercase();
    let mut keywords: Vec<String> = upper
        .split_whitespace()
        .map(|word| NON_ALNUM_RE.replace_all(word, "").into_owned())
        .filter(|word| word.len() > 2 && !STOP_WORDS.contains(&word.as_str()))
        .collect();

    for dim in DIMENSION_RE.find_iter(&upper) {
        let token = dim.as_str().to_uppercase();
        if !keywords.contains(&token) {
            keywords.push(token);
        }
    }

    keywords
}
