use crate::models::signal::{PivotKind, PivotPoint};

/// The two most recent pivots of one kind. `second` is older than `first`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PivotPair {
    pub first: PivotPoint,
    pub second: PivotPoint,
}

/// Whether `series[index]` strictly dominates every other value in the
/// window `[index - swing, index + swing]`. Ties, NaN values and windows that
/// leave the series all disqualify the candidate.
pub fn is_pivot(series: &[f64], index: usize, swing: usize, kind: PivotKind) -> bool {
    if index < swing || index + swing >= series.len() {
        return false;
    }

    let value = series[index];
    for k in (index - swing)..=(index + swing) {
        if k == index {
            continue;
        }
        let other = series[k];
        // Any comparison against NaN is false, which rejects the candidate
        let dominates = match kind {
            PivotKind::High => value > other,
            PivotKind::Low => value < other,
        };
        if !dominates {
            return false;
        }
    }
    true
}

/// Scan `to` down to `from` and return the two most recent pivots of `kind`.
/// An empty range (`to < from`) yields `None`.
pub fn find_last_two_pivots(
    series: &[f64],
    from: usize,
    to: usize,
    swing: usize,
    kind: PivotKind,
) -> Option<PivotPair> {
    if to < from {
        return None;
    }

    let mut first: Option<PivotPoint> = None;
    for i in (from..=to).rev() {
        if !is_pivot(series, i, swing, kind) {
            continue;
        }
        let point = PivotPoint {
            index: i,
            value: series[i],
            kind,
        };
        match first {
            None => first = Some(point),
            Some(first) => {
                return Some(PivotPair {
                    first,
                    second: point,
                })
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Flat series at 50 with the given spikes.
    fn series_with(len: usize, points: &[(usize, f64)]) -> Vec<f64> {
        let mut s = vec![50.0; len];
        for &(i, v) in points {
            s[i] = v;
        }
        s
    }

    #[test]
    fn test_is_pivot_high_and_low() {
        let s = series_with(11, &[(5, 70.0), (2, 30.0)]);
        assert!(is_pivot(&s, 5, 2, PivotKind::High));
        assert!(!is_pivot(&s, 5, 2, PivotKind::Low));
        assert!(is_pivot(&s, 2, 2, PivotKind::Low));
    }

    #[test]
    fn test_tie_disqualifies() {
        let s = series_with(11, &[(5, 70.0), (6, 70.0)]);
        assert!(!is_pivot(&s, 5, 2, PivotKind::High));
        assert!(!is_pivot(&s, 6, 2, PivotKind::High));
    }

    #[test]
    fn test_window_out_of_range() {
        let s = series_with(6, &[(1, 70.0), (4, 70.0)]);
        // index 1 needs index -1 with swing 2; index 4 needs index 6
        assert!(!is_pivot(&s, 1, 2, PivotKind::High));
        assert!(!is_pivot(&s, 4, 2, PivotKind::High));
        assert!(is_pivot(&s, 1, 1, PivotKind::High));
    }

    #[test]
    fn test_nan_disqualifies() {
        let mut s = series_with(11, &[(5, 70.0)]);
        s[4] = f64::NAN;
        assert!(!is_pivot(&s, 5, 2, PivotKind::High));
        let s = series_with(11, &[(5, f64::NAN)]);
        assert!(!is_pivot(&s, 5, 2, PivotKind::High));
        assert!(!is_pivot(&s, 5, 2, PivotKind::Low));
    }

    #[test]
    fn test_find_last_two_most_recent_first() {
        let s = series_with(30, &[(4, 80.0), (12, 70.0), (20, 65.0)]);
        let pair = find_last_two_pivots(&s, 2, 27, 2, PivotKind::High).unwrap();
        assert_eq!(pair.first.index, 20);
        assert_eq!(pair.second.index, 12);
        assert_eq!(pair.first.value, 65.0);
        assert!(pair.second.index < pair.first.index);
    }

    #[test]
    fn test_find_requires_two() {
        let s = series_with(30, &[(12, 70.0)]);
        assert!(find_last_two_pivots(&s, 2, 27, 2, PivotKind::High).is_none());
    }

    #[test]
    fn test_find_respects_bounds() {
        let s = series_with(30, &[(4, 80.0), (12, 70.0), (20, 65.0)]);
        // `to` below 20 leaves 12 and 4
        let pair = find_last_two_pivots(&s, 2, 19, 2, PivotKind::High).unwrap();
        assert_eq!((pair.first.index, pair.second.index), (12, 4));
        // `from` above 4 leaves only 12
        assert!(find_last_two_pivots(&s, 5, 19, 2, PivotKind::High).is_none());
    }

    #[test]
    fn test_empty_range_is_not_found() {
        let s = series_with(30, &[(12, 70.0), (20, 65.0)]);
        assert!(find_last_two_pivots(&s, 10, 9, 2, PivotKind::High).is_none());
    }

    #[test]
    fn test_find_lows() {
        let s = series_with(30, &[(8, 20.0), (16, 25.0), (12, 70.0)]);
        let pair = find_last_two_pivots(&s, 2, 27, 2, PivotKind::Low).unwrap();
        assert_eq!((pair.first.index, pair.second.index), (16, 8));
        assert_eq!(pair.first.kind, PivotKind::Low);
    }
}
