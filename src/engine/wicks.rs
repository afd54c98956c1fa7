use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::models::candle::{Bar, Tick};
use crate::models::signal::WickRange;

/// Cache size that triggers an eviction sweep.
pub const WICK_CACHE_CAPACITY: usize = 1000;
/// Extra bars kept below the retention window by the sweep.
pub const WICK_EVICTION_SLACK: usize = 50;

// ── WickCache ──

/// Bar index → wick range. Evicts in batches once above capacity; lookups
/// hide anything older than the retention window regardless.
#[derive(Debug, Clone)]
pub struct WickCache {
    search_back: usize,
    entries: BTreeMap<usize, WickRange>,
    latest_index: Option<usize>,
}

impl WickCache {
    pub fn new(search_back: usize) -> Self {
        Self {
            search_back,
            entries: BTreeMap::new(),
            latest_index: None,
        }
    }

    pub fn insert(&mut self, range: WickRange) {
        let latest = self
            .latest_index
            .map_or(range.bar_index, |l| l.max(range.bar_index));
        self.latest_index = Some(latest);
        self.entries.insert(range.bar_index, range);

        if self.entries.len() > WICK_CACHE_CAPACITY {
            let min_index = latest.saturating_sub(self.search_back + WICK_EVICTION_SLACK);
            let before = self.entries.len();
            self.entries = self.entries.split_off(&min_index);
            debug!(
                "Wick cache swept {} entries below index {}",
                before - self.entries.len(),
                min_index
            );
        }
    }

    /// Cached range for `index` if it lies inside the retention window.
    pub fn get(&self, index: usize) -> Option<WickRange> {
        if let Some(latest) = self.latest_index {
            if index < latest.saturating_sub(self.search_back) {
                return None;
            }
        }
        self.entries.get(&index).copied()
    }

    pub fn indices(&self) -> Vec<usize> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.latest_index = None;
    }
}

// ── WickAggregator ──

/// Reconstructs per-bar true low/high from a tick store with a forward-only
/// cursor, so walking bars in order costs O(ticks) in total.
#[derive(Debug, Clone)]
pub struct WickAggregator {
    ticks: VecDeque<Tick>,
    /// First tick not yet consumed by a closed bar.
    cursor: usize,
    /// Highest bar index whose window the cursor has passed.
    closed_through: Option<usize>,
    /// Every tick before this time has been consumed; the cursor is the
    /// first tick at or after it.
    cursor_time: Option<DateTime<Utc>>,
    cache: WickCache,
}

impl WickAggregator {
    pub fn new(search_back: usize) -> Self {
        Self {
            ticks: VecDeque::new(),
            cursor: 0,
            closed_through: None,
            cursor_time: None,
            cache: WickCache::new(search_back),
        }
    }

    /// Append a live tick. Ticks older than the newest loaded tick are rejected.
    pub fn push_tick(&mut self, tick: Tick) -> bool {
        if let Some(last) = self.ticks.back() {
            if tick.time < last.time {
                debug!("Dropping out-of-order tick at {}", tick.time);
                return false;
            }
        }
        self.ticks.push_back(tick);
        true
    }

    /// Prepend a batch of older ticks. Only ticks strictly older than the
    /// current earliest tick are kept. The cursor is re-found from the time
    /// it stood at, so batch ticks inside a not yet consumed bar stay visible.
    pub fn prepend_batch(&mut self, batch: Vec<Tick>) -> usize {
        let earliest = self.earliest_time();
        let mut older: Vec<Tick> = batch
            .into_iter()
            .filter(|t| earliest.map_or(true, |e| t.time < e))
            .collect();
        older.sort_by_key(|t| t.time);

        let n = older.len();
        for tick in older.into_iter().rev() {
            self.ticks.push_front(tick);
        }
        self.cursor = match self.cursor_time {
            Some(time) => self.ticks.partition_point(|t| t.time < time),
            None => 0,
        };
        n
    }

    /// Drop ticks older than `time`. Returns how many were dropped.
    pub fn trim_before(&mut self, time: DateTime<Utc>) -> usize {
        let dropped = self.ticks.partition_point(|t| t.time < time);
        if dropped == 0 {
            return 0;
        }
        self.ticks.drain(..dropped);
        self.cursor = self.cursor.saturating_sub(dropped);
        debug!("Trimmed {} ticks older than {}", dropped, time);
        dropped
    }

    /// Wick range for `bar`, whose window ends at `next_open` (`None` for the
    /// live bar, bounded by the last loaded tick instead). Commits the result
    /// to the cache.
    pub fn wick_range(&mut self, bar: &Bar, next_open: Option<DateTime<Utc>>) -> WickRange {
        let range = match next_open {
            Some(next) => self.closed_range(bar, next),
            None => self.live_range(bar),
        };
        self.cache.insert(range);
        range
    }

    fn closed_range(&mut self, bar: &Bar, next_open: DateTime<Utc>) -> WickRange {
        if self.closed_through.map_or(false, |c| bar.index <= c) {
            // Already consumed: serve from cache or a lookup that leaves the cursor alone
            return self
                .cache
                .get(bar.index)
                .filter(|r| r.found || !self.has_ticks_between(bar.open_time, next_open))
                .unwrap_or_else(|| self.lookup(bar, Some(next_open)));
        }

        let len = self.ticks.len();
        let mut i = self.cursor;
        while i < len && self.ticks[i].time < bar.open_time {
            i += 1;
        }
        let start = i;
        while i < len && self.ticks[i].time < next_open {
            i += 1;
        }

        self.cursor = i;
        self.cursor_time = Some(next_open);
        self.closed_through = Some(bar.index);
        self.range_from(bar, start, i)
    }

    fn live_range(&mut self, bar: &Bar) -> WickRange {
        let len = self.ticks.len();
        let mut i = self.cursor;
        while i < len && self.ticks[i].time < bar.open_time {
            i += 1;
        }
        // Park at the live bar's first tick so the next pass sees the same ticks
        self.cursor = i;
        self.cursor_time = Some(bar.open_time);
        self.range_from(bar, i, len)
    }

    fn has_ticks_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        let start = self.ticks.partition_point(|t| t.time < from);
        start < self.ticks.len() && self.ticks[start].time < to
    }

    /// Recompute a bar's range by binary search without touching the cursor or cache.
    pub fn lookup(&self, bar: &Bar, next_open: Option<DateTime<Utc>>) -> WickRange {
        let start = self.ticks.partition_point(|t| t.time < bar.open_time);
        let end = match next_open {
            Some(next) => self.ticks.partition_point(|t| t.time < next),
            None => self.ticks.len(),
        };
        self.range_from(bar, start, end.max(start))
    }

    fn range_from(&self, bar: &Bar, start: usize, end: usize) -> WickRange {
        let mut low = f64::INFINITY;
        let mut high = f64::NEG_INFINITY;
        for tick in self.ticks.range(start..end) {
            low = low.min(tick.price);
            high = high.max(tick.price);
        }
        if start < end && low.is_finite() && high.is_finite() {
            WickRange {
                bar_index: bar.index,
                low,
                high,
                found: true,
            }
        } else {
            WickRange {
                bar_index: bar.index,
                low: bar.low,
                high: bar.high,
                found: false,
            }
        }
    }

    /// Recompute cached bars whose windows overlap `[from, to]`, typically
    /// after a backfill batch landed there. Returns the refreshed ranges.
    pub fn refresh_cached(
        &mut self,
        bars: &[Bar],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<WickRange> {
        let mut refreshed = Vec::new();
        for index in self.cache.indices() {
            let Some(bar) = bars.get(index) else {
                continue;
            };
            let next_open = bars.get(index + 1).map(|b| b.open_time);
            let overlaps = bar.open_time <= to && next_open.map_or(true, |n| n > from);
            if overlaps {
                let range = self.lookup(bar, next_open);
                self.cache.insert(range);
                refreshed.push(range);
            }
        }
        refreshed
    }

    /// Re-derive ranges for every bar from where tick coverage begins (but no
    /// earlier than `min_index`) through the last bar, repositioning the
    /// cursor. The last bar of `bars` is treated as live.
    pub fn rebuild(&mut self, bars: &[Bar], min_index: usize) -> Vec<WickRange> {
        self.cache.clear();
        self.closed_through = None;
        self.cursor = 0;
        self.cursor_time = None;

        let Some(earliest) = self.earliest_time() else {
            return Vec::new();
        };
        if bars.is_empty() {
            return Vec::new();
        }

        let covered_from = bars
            .partition_point(|b| b.open_time <= earliest)
            .saturating_sub(1);
        let start = covered_from.max(min_index);
        if start >= bars.len() {
            return Vec::new();
        }

        self.cursor = self.ticks.partition_point(|t| t.time < bars[start].open_time);
        if start > 0 {
            self.closed_through = Some(start - 1);
        }

        let mut ranges = Vec::with_capacity(bars.len() - start);
        for i in start..bars.len() {
            let next_open = bars.get(i + 1).map(|b| b.open_time);
            ranges.push(self.wick_range(&bars[i], next_open));
        }
        ranges
    }

    pub fn cached(&self, index: usize) -> Option<WickRange> {
        self.cache.get(index)
    }

    pub fn cache(&self) -> &WickCache {
        &self.cache
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn tick_count(&self) -> usize {
        self.ticks.len()
    }

    pub fn earliest_time(&self) -> Option<DateTime<Utc>> {
        self.ticks.front().map(|t| t.time)
    }

    pub fn latest_time(&self) -> Option<DateTime<Utc>> {
        self.ticks.back().map(|t| t.time)
    }

    /// Drop cached ranges and restart consumption; loaded ticks are kept.
    pub fn clear(&mut self) {
        self.cache.clear();
        self.cursor = 0;
        self.closed_through = None;
        self.cursor_time = None;
    }
}
