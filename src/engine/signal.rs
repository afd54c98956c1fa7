use crate::models::signal::{PreviousState, SignalDirection, TrendSnapshot};

/// Oscillator and trendline values at the last closed and previous bar.
/// Undefined values are NaN.
#[derive(Debug, Clone, Copy)]
pub struct BreakoutInputs {
    pub rsi_last: f64,
    pub rsi_prev: f64,
    pub trend: TrendSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakoutDecision {
    pub signal: SignalDirection,
    pub previous_state: PreviousState,
}

/// Classify a crossing between the previous and last closed bar.
///
/// Up: the oscillator is above the high line now and was at or below it on the
/// previous bar (or the line did not reach that bar). Down mirrors it against
/// the low line. Up is checked first.
pub fn evaluate_breakout(inputs: &BreakoutInputs) -> BreakoutDecision {
    let rsi_last = inputs.rsi_last;
    let rsi_prev = inputs.rsi_prev;
    let t = &inputs.trend;

    let previous_state = if defined(t.high_at_prev_close)
        && defined(rsi_prev)
        && rsi_prev > t.high_at_prev_close
    {
        PreviousState::Above
    } else if defined(t.low_at_prev_close) && defined(rsi_prev) && rsi_prev < t.low_at_prev_close
    {
        PreviousState::Below
    } else {
        PreviousState::Neutral
    };

    let breakout_up = defined(t.high_at_last_close)
        && defined(rsi_last)
        && rsi_last > t.high_at_last_close
        && defined(rsi_prev)
        && (!defined(t.high_at_prev_close) || rsi_prev <= t.high_at_prev_close);

    let breakout_down = defined(t.low_at_last_close)
        && defined(rsi_last)
        && rsi_last < t.low_at_last_close
        && defined(rsi_prev)
        && (!defined(t.low_at_prev_close) || rsi_prev >= t.low_at_prev_close);

    let signal = if breakout_up {
        SignalDirection::Up
    } else if breakout_down {
        SignalDirection::Down
    } else {
        SignalDirection::None
    };

    BreakoutDecision {
        signal,
        previous_state,
    }
}

#[inline]
fn defined(v: f64) -> bool {
    !v.is_nan()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(rsi_last: f64, rsi_prev: f64, trend: TrendSnapshot) -> BreakoutInputs {
        BreakoutInputs {
            rsi_last,
            rsi_prev,
            trend,
        }
    }

    fn high_line(last: f64, prev: f64) -> TrendSnapshot {
        TrendSnapshot {
            high_at_last_close: last,
            high_at_prev_close: prev,
            ..Default::default()
        }
    }

    fn low_line(last: f64, prev: f64) -> TrendSnapshot {
        TrendSnapshot {
            low_at_last_close: last,
            low_at_prev_close: prev,
            ..Default::default()
        }
    }

    #[test]
    fn test_breakout_up_crossing() {
        // line 62.5 -> 61.875, oscillator 61.0 -> 63.0
        let d = evaluate_breakout(&inputs(63.0, 61.0, high_line(61.875, 62.5)));
        assert_eq!(d.signal, SignalDirection::Up);
        assert_eq!(d.previous_state, PreviousState::Neutral);
    }

    #[test]
    fn test_touching_previous_counts_as_below() {
        let d = evaluate_breakout(&inputs(63.0, 62.5, high_line(61.875, 62.5)));
        assert_eq!(d.signal, SignalDirection::Up);
    }

    #[test]
    fn test_already_above_is_no_signal() {
        let d = evaluate_breakout(&inputs(64.0, 63.0, high_line(61.875, 62.5)));
        assert_eq!(d.signal, SignalDirection::None);
        assert_eq!(d.previous_state, PreviousState::Above);
    }

    #[test]
    fn test_undefined_previous_line_is_open_boundary() {
        let d = evaluate_breakout(&inputs(63.0, 70.0, high_line(61.875, f64::NAN)));
        assert_eq!(d.signal, SignalDirection::Up);
    }

    #[test]
    fn test_undefined_previous_rsi_blocks_signal() {
        let d = evaluate_breakout(&inputs(63.0, f64::NAN, high_line(61.875, 62.5)));
        assert_eq!(d.signal, SignalDirection::None);
    }

    #[test]
    fn test_breakout_down_crossing() {
        let d = evaluate_breakout(&inputs(28.0, 31.0, low_line(30.0, 30.5)));
        assert_eq!(d.signal, SignalDirection::Down);
        let d = evaluate_breakout(&inputs(28.0, 29.0, low_line(30.0, 30.5)));
        assert_eq!(d.signal, SignalDirection::None);
        assert_eq!(d.previous_state, PreviousState::Below);
    }

    #[test]
    fn test_up_takes_priority() {
        // Inverted lines so both conditions hold at once
        let trend = TrendSnapshot {
            high_at_last_close: 40.0,
            high_at_prev_close: 45.0,
            low_at_last_close: 60.0,
            low_at_prev_close: 40.0,
        };
        let d = evaluate_breakout(&inputs(50.0, 42.0, trend));
        assert_eq!(d.signal, SignalDirection::Up);
    }

    #[test]
    fn test_no_lines_no_signal() {
        let d = evaluate_breakout(&inputs(50.0, 40.0, TrendSnapshot::default()));
        assert_eq!(d.signal, SignalDirection::None);
        assert_eq!(d.previous_state, PreviousState::Neutral);
    }
}
