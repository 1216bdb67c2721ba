//! Learned patterns: confidence model, lookup selection rules and extraction
//!
//! The selection functions here are the single definition of how a pattern
//! store resolves several candidates for one lookup. The in-memory store runs
//! them directly; the SQLite store mirrors the same ordering in SQL for exact
//! and containment lookups and runs [`select_by_similarity`] over a scan.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::config::ExtractionConfig;
use crate::models::Pattern;
use crate::similarity::edit_similarity;

/// Reinforcements after which the frequency term stops growing
const FREQUENCY_SATURATION: f64 = 10.0;
/// Pattern length (chars) after which the specificity term stops growing
const LENGTH_SATURATION: f64 = 20.0;
const FREQUENCY_WEIGHT: f64 = 0.7;
const LENGTH_WEIGHT: f64 = 0.3;

/// Confidence of a pattern given how often it was confirmed and its length
///
/// `clamp01(0.7 * min(frequency / 10, 1) + 0.3 * min(len / 20, 1))`
pub fn confidence(frequency: i64, pattern: &str) -> f64 {
    let frequency = frequency.max(0) as f64;
    let len = pattern.chars().count() as f64;

    let score = FREQUENCY_WEIGHT * (frequency / FREQUENCY_SATURATION).min(1.0)
        + LENGTH_WEIGHT * (len / LENGTH_SATURATION).min(1.0);
    score.clamp(0.0, 1.0)
}

/// Most recent first, then lowest category id
fn recency_then_category(a: &Pattern, b: &Pattern) -> Ordering {
    b.last_updated
        .cmp(&a.last_updated)
        .then_with(|| a.category_id.cmp(&b.category_id))
}

fn by_confidence_desc(a: &Pattern, b: &Pattern) -> Ordering {
    b.confidence.total_cmp(&a.confidence)
}

fn pattern_len(p: &Pattern) -> usize {
    p.pattern.chars().count()
}

/// Best pattern whose text equals `text`
///
/// Several categories may share one pattern text; the most confident wins.
pub fn select_exact<'a, I>(patterns: I, text: &str) -> Option<Pattern>
where
    I: IntoIterator<Item = &'a Pattern>,
{
    patterns
        .into_iter()
        .filter(|p| p.pattern == text)
        .min_by(|a, b| by_confidence_desc(a, b).then_with(|| recency_then_category(a, b)))
        .cloned()
}

/// Best pattern where either string contains the other
///
/// Longest pattern wins (most specific), then confidence, then recency.
pub fn select_containing<'a, I>(patterns: I, text: &str) -> Option<Pattern>
where
    I: IntoIterator<Item = &'a Pattern>,
{
    if text.is_empty() {
        return None;
    }

    patterns
        .into_iter()
        .filter(|p| !p.pattern.is_empty() && (text.contains(&p.pattern) || p.pattern.contains(text)))
        .min_by(|a, b| {
            pattern_len(b)
                .cmp(&pattern_len(a))
                .then_with(|| by_confidence_desc(a, b))
                .then_with(|| recency_then_category(a, b))
        })
        .cloned()
}

/// Highest edit-similarity pattern at or above `min_similarity`
///
/// Returns the pattern together with its score. Equal scores prefer the more
/// confident pattern.
pub fn select_by_similarity<'a, I>(patterns: I, text: &str, min_similarity: f64) -> Option<(Pattern, f64)>
where
    I: IntoIterator<Item = &'a Pattern>,
{
    if text.is_empty() {
        return None;
    }

    patterns
        .into_iter()
        .map(|p| (p, edit_similarity(text, &p.pattern)))
        .filter(|(_, score)| *score >= min_similarity)
        .min_by(|(a, sa), (b, sb)| {
            sb.total_cmp(sa)
                .then_with(|| by_confidence_desc(a, b))
                .then_with(|| pattern_len(b).cmp(&pattern_len(a)))
                .then_with(|| a.category_id.cmp(&b.category_id))
        })
        .map(|(p, score)| (p.clone(), score))
}

/// Patterns to reinforce when a normalized description is accepted
///
/// The whole description, every token of at least `min_token_len` chars, and
/// the matching prefix for any token that starts with a known merchant prefix.
/// Duplicates are removed; first occurrence order is kept.
pub fn extract_patterns(normalized: &str, config: &ExtractionConfig) -> Vec<String> {
    let normalized = normalized.trim();
    if normalized.is_empty() {
        return Vec::new();
    }

    let mut candidates = vec![normalized.to_string()];
    for token in normalized.split_whitespace() {
        if token.chars().count() >= config.min_token_len {
            candidates.push(token.to_string());
        }
        if let Some(prefix) = config
            .merchant_prefixes
            .iter()
            .find(|prefix| token.starts_with(prefix.as_str()))
        {
            candidates.push(prefix.clone());
        }
    }

    let mut seen = HashSet::new();
    candidates.retain(|c| seen.insert(c.clone()));
    candidates
}
