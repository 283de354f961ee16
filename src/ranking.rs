//! Shared ranking conventions for the three retrievers.
//!
//! Every sort is a tuple of keys with an explicit direction per key, and
//! the final key is always a stable identifier, so no two distinct inputs
//! ever compare equal and result order is reproducible.

use std::cmp::Ordering;

/// Total order on f64, ascending. NaN never enters scoring paths, but the
/// ordering stays total regardless.
pub fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.total_cmp(&b)
}

/// Total order on f64, descending.
pub fn cmp_f64_desc(a: f64, b: f64) -> Ordering {
    b.total_cmp(&a)
}

/// Log-scaled popularity from two usage counters.
pub fn popularity(downloads: i64, likes: i64) -> f64 {
    let d = downloads.max(0) as f64;
    let l = likes.max(0) as f64;
    (d + 1.0).ln() + (l + 1.0).ln()
}

/// Normalize a raw popularity against the candidate-set maximum into [0, 1].
pub fn normalize_popularity(raw: f64, max: f64) -> f64 {
    if max > 0.0 {
        raw / max
    } else {
        0.0
    }
}

/// Combine per-chunk similarities into a document relevance score:
/// a strong best match dominates, breadth still counts.
pub fn document_relevance(similarities: &[f64], max_weight: f64, mean_weight: f64) -> f64 {
    if similarities.is_empty() {
        return 0.0;
    }
    let max = similarities.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mean = similarities.iter().sum::<f64>() / similarities.len() as f64;
    max_weight * max + mean_weight * mean
}

/// Discrete lexical match quality tiers for component search.
/// Exact name match beats prefix beats substring beats description hit.
pub fn match_tier(query: &str, name: &str, description: &str) -> i64 {
    let q = query.trim().to_lowercase();
    let name = name.to_lowercase();
    let description = description.to_lowercase();

    if name == q {
        1000
    } else if name.starts_with(&q) {
        900
    } else if name.contains(&q) {
        800
    } else if description.contains(&q) {
        700
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmp_f64_total_on_nan() {
        // Even with NaN in play the comparator stays total and stable.
        let mut values = vec![1.0, f64::NAN, -2.0, 0.5];
        values.sort_by(|a, b| cmp_f64(*a, *b));
        assert_eq!(values[0], -2.0);
        assert_eq!(values[1], 0.5);
        assert_eq!(values[2], 1.0);
    }

    #[test]
    fn test_popularity_log_scaled() {
        assert_eq!(popularity(0, 0), 0.0);
        let p = popularity(999, 0);
        assert!((p - (1000.0f64).ln()).abs() < 1e-9);
        // Negative counters treated as absent.
        assert_eq!(popularity(-5, -1), 0.0);
    }

    #[test]
    fn test_normalize_popularity_bounds() {
        assert_eq!(normalize_popularity(3.0, 0.0), 0.0);
        assert_eq!(normalize_popularity(3.0, 3.0), 1.0);
        let n = normalize_popularity(1.5, 3.0);
        assert!(n > 0.0 && n < 1.0);
    }

    #[test]
    fn test_document_relevance_max_and_mean() {
        // 0.7 * max + 0.3 * mean over the retrieved chunk similarities.
        let sims = [0.9, 0.5, 0.1];
        let rel = document_relevance(&sims, 0.7, 0.3);
        let expected = 0.7 * 0.9 + 0.3 * 0.5;
        assert!((rel - expected).abs() < 1e-12);
        assert_eq!(document_relevance(&[], 0.7, 0.3), 0.0);
    }

    #[test]
    fn test_match_tiers_ordered() {
        assert_eq!(match_tier("redis", "redis", ""), 1000);
        assert_eq!(match_tier("redis", "redis-cluster", ""), 900);
        assert_eq!(match_tier("redis", "ha-redis", ""), 800);
        assert_eq!(match_tier("redis", "kvstore", "a redis compatible cache"), 700);
        assert_eq!(match_tier("redis", "postgres", "relational database"), 0);
        // Case-insensitive, whitespace-tolerant.
        assert_eq!(match_tier("  Redis ", "REDIS", ""), 1000);
    }
}
