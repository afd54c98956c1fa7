use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::models::signal::{SignalDirection, SignalRecord};

/// Bounded record of per-bar signals, addressable by bar index and by bar
/// open time. Time is the durable key; the index map follows renumbering.
#[derive(Debug, Clone)]
pub struct SignalHistory {
    search_back: usize,
    by_index: BTreeMap<usize, DateTime<Utc>>,
    by_time: HashMap<DateTime<Utc>, (usize, SignalDirection)>,
    latest_index: Option<usize>,
}

impl SignalHistory {
    pub fn new(search_back: usize) -> Self {
        Self {
            search_back,
            by_index: BTreeMap::new(),
            by_time: HashMap::new(),
            latest_index: None,
        }
    }

    /// Store the signal for a bar. A confirmed (non-zero) signal is never
    /// replaced by `None`; an identical value is a no-op. Returns whether the
    /// stored value changed. Eviction runs after every call.
    pub fn record(&mut self, index: usize, time: DateTime<Utc>, signal: SignalDirection) -> bool {
        self.latest_index = Some(self.latest_index.map_or(index, |l| l.max(index)));

        let changed = match self.by_time.get(&time).copied() {
            Some((old_index, existing)) => {
                let next = if !existing.is_none() && signal.is_none() {
                    existing
                } else {
                    signal
                };
                if old_index != index {
                    self.unlink_index(old_index, time);
                    self.insert(index, time, next);
                } else if next != existing {
                    self.insert(index, time, next);
                }
                next != existing
            }
            None => {
                self.insert(index, time, signal);
                true
            }
        };

        self.evict();
        changed
    }

    fn insert(&mut self, index: usize, time: DateTime<Utc>, signal: SignalDirection) {
        // A different bar previously at this index has been renumbered away
        if let Some(prev_time) = self.by_index.insert(index, time) {
            if prev_time != time {
                if let Some((prev_index, _)) = self.by_time.get(&prev_time) {
                    if *prev_index == index {
                        self.by_time.remove(&prev_time);
                    }
                }
            }
        }
        self.by_time.insert(time, (index, signal));
    }

    fn unlink_index(&mut self, index: usize, time: DateTime<Utc>) {
        if self.by_index.get(&index) == Some(&time) {
            self.by_index.remove(&index);
        }
    }

    /// Drop every entry older than `latest - search_back` from both maps.
    fn evict(&mut self) {
        let (Some(latest), true) = (self.latest_index, self.search_back > 0) else {
            return;
        };
        let min_index = latest.saturating_sub(self.search_back);
        if min_index == 0 {
            return;
        }
        let kept = self.by_index.split_off(&min_index);
        let evicted = std::mem::replace(&mut self.by_index, kept);
        for (index, time) in &evicted {
            if let Some((owner, _)) = self.by_time.get(time) {
                if owner == index {
                    self.by_time.remove(time);
                }
            }
        }
        if !evicted.is_empty() {
            debug!("Signal history evicted {} entries below index {}", evicted.len(), min_index);
        }
    }

    pub fn get_by_index(&self, index: usize) -> SignalDirection {
        self.by_index
            .get(&index)
            .and_then(|time| self.by_time.get(time))
            .map(|(_, signal)| *signal)
            .unwrap_or_default()
    }

    pub fn get_by_time(&self, time: DateTime<Utc>) -> SignalDirection {
        self.by_time
            .get(&time)
            .map(|(_, signal)| *signal)
            .unwrap_or_default()
    }

    /// Record for the highest retained bar index.
    pub fn last(&self) -> Option<SignalRecord> {
        let (&index, &time) = self.by_index.iter().next_back()?;
        let (_, direction) = self.by_time.get(&time)?;
        Some(SignalRecord {
            index,
            time,
            direction: *direction,
        })
    }

    /// All retained records in ascending index order.
    pub fn records(&self) -> Vec<SignalRecord> {
        self.by_index
            .iter()
            .filter_map(|(&index, &time)| {
                self.by_time.get(&time).map(|(_, direction)| SignalRecord {
                    index,
                    time,
                    direction: *direction,
                })
            })
            .collect()
    }

    /// Lowest retained bar index.
    pub fn oldest_index(&self) -> Option<usize> {
        self.by_index.keys().next().copied()
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_index.clear();
        self.by_time.clear();
        self.latest_index = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(i: usize) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(i as i64)
    }

    #[test]
    fn test_record_and_lookup() {
        let mut h = SignalHistory::new(300);
        assert!(h.record(25, t(25), SignalDirection::Up));
        assert_eq!(h.get_by_index(25), SignalDirection::Up);
        assert_eq!(h.get_by_time(t(25)), SignalDirection::Up);
        assert_eq!(h.get_by_index(24), SignalDirection::None);
    }

    #[test]
    fn test_non_downgrade() {
        let mut h = SignalHistory::new(300);
        h.record(25, t(25), SignalDirection::Up);
        assert!(!h.record(25, t(25), SignalDirection::None));
        assert_eq!(h.get_by_index(25), SignalDirection::Up);
        // A different non-zero value may overwrite
        assert!(h.record(25, t(25), SignalDirection::Down));
        assert_eq!(h.get_by_time(t(25)), SignalDirection::Down);
        assert!(!h.record(25, t(25), SignalDirection::Down));
    }

    #[test]
    fn test_retention_window() {
        let mut h = SignalHistory::new(300);
        for i in 0..=1000 {
            let dir = if i % 7 == 0 { SignalDirection::Up } else { SignalDirection::None };
            h.record(i, t(i), dir);
        }
        assert_eq!(h.oldest_index(), Some(700));
        assert_eq!(h.get_by_index(699), SignalDirection::None);
        assert_eq!(h.get_by_time(t(693)), SignalDirection::None);
        assert_eq!(h.get_by_time(t(700)), SignalDirection::Up);
        assert_eq!(h.len(), 301);
        assert_eq!(h.by_time.len(), 301);
    }

    #[test]
    fn test_lookup_by_time_survives_renumbering() {
        let mut h = SignalHistory::new(300);
        h.record(40, t(40), SignalDirection::Down);
        // The same bar now sits at index 38 after a rollover
        h.record(38, t(40), SignalDirection::Down);
        assert_eq!(h.get_by_time(t(40)), SignalDirection::Down);
        assert_eq!(h.get_by_index(38), SignalDirection::Down);
        assert_eq!(h.get_by_index(40), SignalDirection::None);
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn test_index_reused_by_new_bar_drops_old_time() {
        let mut h = SignalHistory::new(300);
        h.record(10, t(10), SignalDirection::Up);
        h.record(10, t(11), SignalDirection::None);
        assert_eq!(h.get_by_index(10), SignalDirection::None);
        assert_eq!(h.get_by_time(t(10)), SignalDirection::None);
        assert_eq!(h.by_time.len(), 1);
    }

    #[test]
    fn test_last_and_clear() {
        let mut h = SignalHistory::new(300);
        h.record(5, t(5), SignalDirection::Up);
        h.record(6, t(6), SignalDirection::None);
        let last = h.last().unwrap();
        assert_eq!(last.index, 6);
        assert_eq!(last.direction, SignalDirection::None);
        assert_eq!(h.records().len(), 2);
        h.clear();
        assert!(h.is_empty());
        assert!(h.last().is_none());
    }
}
