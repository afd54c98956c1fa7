use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single OHLC bar. The highest-index bar of a feed is still forming.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub index: usize,
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Bar {
    /// Bars that closed at or above their open are drawn with the "up" color.
    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }
}

/// A single tick: time and close/last price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub time: DateTime<Utc>,
    pub price: f64,
}

impl Tick {
    pub fn new(time: DateTime<Utc>, price: f64) -> Self {
        Self { time, price }
    }
}
