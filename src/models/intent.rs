use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::signal::{PivotKind, SignalDirection};

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A drawing or UI request for the rendering host. The engine never draws;
/// it describes what should be on screen and the host applies it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RenderIntent {
    /// Replace the oscillator-pane trendline of `kind`.
    Trendline {
        kind: PivotKind,
        from_index: usize,
        from_value: f64,
        to_index: usize,
        to_value: f64,
    },
    /// Remove the trendline of `kind` (no pivot pair this pass).
    RemoveTrendline { kind: PivotKind },
    PivotMarker {
        kind: PivotKind,
        /// 1 for the most recent pivot, 2 for the older one.
        slot: u8,
        index: usize,
        value: f64,
    },
    RemovePivotMarkers,
    /// Breakout marker on the price chart, keyed by the bar's open time.
    SignalMarker {
        name: String,
        index: usize,
        time: DateTime<Utc>,
        price: f64,
        direction: SignalDirection,
    },
    /// Drop signal markers whose bar index is below `min_index`.
    PruneSignalMarkers { min_index: usize },
    ClearSignalMarkers,
    /// Vertical wick line from `low` to `high` at the bar's open time.
    WickLine {
        index: usize,
        time: DateTime<Utc>,
        low: f64,
        high: f64,
        thickness: u8,
        bullish: bool,
    },
    /// Indeterminate progress indicator for blocking tick loads.
    Progress { caption: String, visible: bool },
    Notification {
        caption: String,
        message: String,
        level: NotifyLevel,
    },
}

impl RenderIntent {
    pub fn signal_marker_name(time: DateTime<Utc>) -> String {
        format!("RSI_BREAK_{}", time.timestamp_millis())
    }
}
