//! Percentile engine.
//!
//! Consumes the decoded latency histogram and produces latency values for
//! a requested set of cumulative-distribution points, plus human-readable
//! duration rendering.

use std::collections::BTreeMap;

/// Extract latency values for each requested percentile.
///
/// `percs` must be strictly ascending fractions in `(0, 1)`. The value for
/// percentile `p` is `log_base^idx` for the first bucket index `idx` (in
/// ascending order) whose cumulative count reaches `total * p`.
///
/// A histogram with zero total returns a zero for every percentile.
///
/// # Panics
///
/// Panics if a percentile threshold is never crossed despite a non-zero
/// total. That cannot happen for `p < 1`; hitting it means the histogram
/// walk itself is broken, so it is an assertion rather than an error.
pub fn extract_percentiles(
    histogram: &BTreeMap<u32, u64>,
    log_base: f64,
    percs: &[f64],
) -> Vec<f64> {
    debug_assert!(
        percs.windows(2).all(|w| w[0] < w[1]),
        "percentiles must be strictly ascending"
    );

    let total: u64 = histogram.values().sum();
    if total == 0 {
        return vec![0.0; percs.len()];
    }

    let total = total as f64;
    let mut resolved = Vec::with_capacity(percs.len());
    let mut curr = 0u64;

    for (&bucket, &count) in histogram {
        curr += count;
        while resolved.len() < percs.len() && curr as f64 >= total * percs[resolved.len()] {
            resolved.push(log_base.powi(bucket as i32));
        }
        if resolved.len() == percs.len() {
            break;
        }
    }

    if resolved.len() != percs.len() {
        panic!(
            "percentile {} never crossed (cumulative {curr} of {total})",
            percs[resolved.len()]
        );
    }

    resolved
}

/// Render a nanosecond latency value in the largest fitting unit.
pub fn ns_to_readable(v: f64) -> String {
    if v >= 1e9 {
        format!("{}s", (v / 1e9) as u64)
    } else if v >= 1e6 {
        format!("{}ms", (v / 1e6) as u64)
    } else if v >= 1e3 {
        format!("{}us", (v / 1e3) as u64)
    } else {
        format!("{}ns", v as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_matches_cumulative_walk() {
        let histogram = BTreeMap::from([(0, 10), (1, 20), (2, 70)]);
        // Cumulative sums 10, 30, 100: both thresholds (50 and 95) are
        // first crossed at bucket 2.
        let lats = extract_percentiles(&histogram, 10.0, &[0.5, 0.95]);
        assert_eq!(lats, vec![100.0, 100.0]);
    }

    #[test]
    fn test_low_percentile_resolves_early() {
        let histogram = BTreeMap::from([(0, 50), (4, 50)]);
        let lats = extract_percentiles(&histogram, 10.0, &[0.5, 0.75]);
        assert_eq!(lats, vec![1.0, 10_000.0]);
    }

    #[test]
    fn test_zero_traffic_returns_zeros() {
        let histogram = BTreeMap::new();
        assert_eq!(
            extract_percentiles(&histogram, 10.0, &[0.5, 0.75, 0.95]),
            vec![0.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_sparse_buckets() {
        let histogram = BTreeMap::from([(3, 1), (7, 1)]);
        let lats = extract_percentiles(&histogram, 2.0, &[0.5, 0.95]);
        assert_eq!(lats, vec![8.0, 128.0]);
    }

    #[test]
    fn test_ns_to_readable() {
        assert_eq!(ns_to_readable(2_500_000_000.0), "2s");
        assert_eq!(ns_to_readable(1e9), "1s");
        assert_eq!(ns_to_readable(999_999_999.0), "999ms");
        assert_eq!(ns_to_readable(1_500_000.0), "1ms");
        assert_eq!(ns_to_readable(2_000.0), "2us");
        assert_eq!(ns_to_readable(999.0), "999ns");
        assert_eq!(ns_to_readable(0.0), "0ns");
    }
}
