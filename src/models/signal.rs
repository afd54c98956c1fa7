use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discrete breakout direction for a closed bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SignalDirection {
    Up,
    Down,
    #[default]
    None,
}

impl SignalDirection {
    /// +1 / -1 / 0 as consumed by order-execution hosts.
    pub fn as_i8(&self) -> i8 {
        match self {
            SignalDirection::Up => 1,
            SignalDirection::Down => -1,
            SignalDirection::None => 0,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, SignalDirection::None)
    }
}

impl From<SignalDirection> for i8 {
    fn from(direction: SignalDirection) -> Self {
        direction.as_i8()
    }
}

/// Where the oscillator sat relative to its trendlines on the previous closed bar.
/// Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PreviousState {
    Above,
    Below,
    #[default]
    Neutral,
}

impl PreviousState {
    pub fn as_i8(&self) -> i8 {
        match self {
            PreviousState::Above => 1,
            PreviousState::Below => -1,
            PreviousState::Neutral => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PivotKind {
    High,
    Low,
}

/// A local extremum of the oscillator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PivotPoint {
    pub index: usize,
    pub value: f64,
    pub kind: PivotKind,
}

/// An entry of the signal history, addressable by bar index and bar open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub index: usize,
    pub time: DateTime<Utc>,
    pub direction: SignalDirection,
}

/// True low/high of a bar. `found` is false when no tick fell in the bar's
/// window and the bar's own range was used instead.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WickRange {
    pub bar_index: usize,
    pub low: f64,
    pub high: f64,
    pub found: bool,
}

/// Trendline values at the last closed and previous bar (NaN when undefined).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendSnapshot {
    pub high_at_last_close: f64,
    pub low_at_last_close: f64,
    pub high_at_prev_close: f64,
    pub low_at_prev_close: f64,
}

impl Default for TrendSnapshot {
    fn default() -> Self {
        Self {
            high_at_last_close: f64::NAN,
            low_at_last_close: f64::NAN,
            high_at_prev_close: f64::NAN,
            low_at_prev_close: f64::NAN,
        }
    }
}
