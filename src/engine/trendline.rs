use crate::models::signal::{PivotKind, PivotPoint};

use super::pivots::PivotPair;

/// A line through two pivots of the same kind, left pivot older than right.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trendline {
    pub left: PivotPoint,
    pub right: PivotPoint,
    pub kind: PivotKind,
}

impl Trendline {
    /// Build a line through two pivots. `None` unless `right.index > left.index`
    /// and both pivots share a kind.
    pub fn through(left: PivotPoint, right: PivotPoint) -> Option<Self> {
        if right.index <= left.index || left.kind != right.kind {
            return None;
        }
        Some(Self {
            left,
            right,
            kind: left.kind,
        })
    }

    /// Line through the older and newer pivot of a scanned pair.
    pub fn from_pair(pair: &PivotPair) -> Option<Self> {
        Self::through(pair.second, pair.first)
    }

    pub fn slope(&self) -> f64 {
        (self.right.value - self.left.value) / (self.right.index - self.left.index) as f64
    }

    /// Unclamped linear extrapolation at `index`.
    pub fn value_at(&self, index: usize) -> f64 {
        self.left.value + self.slope() * (index as f64 - self.left.index as f64)
    }

    /// Right end of the drawn segment: at least `extend_bars` past the right
    /// pivot and at least the last closed bar, never past the last bar.
    pub fn draw_end(&self, last_bar_index: usize, last_closed: usize, extend_bars: usize) -> usize {
        last_bar_index.min((self.right.index + extend_bars).max(last_closed))
    }
}

/// Value of an optional trendline at `index`; NaN when the line is undefined.
pub fn project(trendline: Option<&Trendline>, index: usize) -> f64 {
    trendline.map_or(f64::NAN, |t| t.value_at(index))
}
