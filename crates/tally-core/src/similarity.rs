//! String similarity measures over normalized descriptions
//!
//! Both measures are symmetric, return values in [0, 1] and score identical
//! inputs as 1.0.

use std::collections::HashSet;

use strsim::levenshtein;

/// Edit similarity: `1 - levenshtein(a, b) / max(len(a), len(b))`
///
/// Lengths are counted in chars. Equal strings score 1.0 (including two empty
/// strings); otherwise an empty side scores 0.0.
pub fn edit_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let max_len = a.chars().count().max(b.chars().count());
    let distance = levenshtein(a, b);
    (1.0 - distance as f64 / max_len as f64).clamp(0.0, 1.0)
}

/// Jaccard index over whitespace-delimited token sets
///
/// Cheaper than edit similarity for large candidate sets.
pub fn token_overlap_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }

    let left: HashSet<&str> = a.split_whitespace().collect();
    let right: HashSet<&str> = b.split_whitespace().collect();
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }

    let intersection = left.intersection(&right).count();
    let union = left.union(&right).count();
    intersection as f64 / union as f64
}
