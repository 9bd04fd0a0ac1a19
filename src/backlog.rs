//! Listen-backlog sizing heuristic.
//!
//! The accept burst scales sub-linearly with connection count to bound
//! kernel queueing while still avoiding accept drops for small counts.
//! Every backend (including native ones, which receive the value as an
//! argument) must apply the same backlog so that backlog-induced
//! retransmits never confound latency comparisons across backends.

/// Compute the listen backlog for a test with `count` connections.
pub fn listen_backlog(count: usize) -> usize {
    if count < 15 {
        count / 5
    } else if count < 100 {
        (count / 10).max(3)
    } else {
        (count / 20).max(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_band() {
        assert_eq!(listen_backlog(5), 1);
        assert_eq!(listen_backlog(10), 2);
        assert_eq!(listen_backlog(14), 2);
    }

    #[test]
    fn test_middle_band() {
        assert_eq!(listen_backlog(15), 3);
        assert_eq!(listen_backlog(29), 3);
        assert_eq!(listen_backlog(50), 5);
        assert_eq!(listen_backlog(99), 9);
    }

    #[test]
    fn test_large_band() {
        assert_eq!(listen_backlog(100), 10);
        assert_eq!(listen_backlog(200), 10);
        assert_eq!(listen_backlog(2000), 100);
    }

    #[test]
    fn test_monotonic_within_bands() {
        for band in [1..15usize, 15..100, 100..5000] {
            let mut prev = 0;
            for count in band {
                let b = listen_backlog(count);
                assert!(b >= prev, "backlog({count}) = {b} < {prev}");
                prev = b;
            }
        }
    }
}
