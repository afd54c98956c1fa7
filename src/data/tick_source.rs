use chrono::{DateTime, Utc};

use crate::engine::backfill::TickSource;
use crate::errors::EngineError;
use crate::models::candle::Tick;

/// In-memory tick history served newest-first in fixed-size batches, the
/// way a broker's "load more history" call pages backwards.
#[derive(Debug, Clone)]
pub struct HistoricalTickSource {
    ticks: Vec<Tick>,
    batch_size: usize,
    /// Ticks older than the last batch served.
    remaining: Option<usize>,
}

impl HistoricalTickSource {
    /// `ticks` are sorted by time on construction.
    pub fn new(mut ticks: Vec<Tick>, batch_size: usize) -> Self {
        ticks.sort_by_key(|t| t.time);
        Self {
            ticks,
            batch_size: batch_size.max(1),
            remaining: None,
        }
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }
}

impl TickSource for HistoricalTickSource {
    fn fetch_before(&mut self, before: Option<DateTime<Utc>>) -> Result<Vec<Tick>, EngineError> {
        let end = match before {
            Some(b) => self.ticks.partition_point(|t| t.time < b),
            None => self.ticks.len(),
        };
        let start = end.saturating_sub(self.batch_size);
        self.remaining = Some(start);
        Ok(self.ticks[start..end].to_vec())
    }

    fn has_more(&self) -> bool {
        self.remaining.map_or(!self.ticks.is_empty(), |r| r > 0)
    }
}
