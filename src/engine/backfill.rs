use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::errors::EngineError;
use crate::models::candle::Tick;

use super::wicks::WickAggregator;

/// Timer period of the background backfill.
pub const BACKFILL_PERIOD: Duration = Duration::from_millis(500);

/// Source of historical ticks, fetched newest-first in batches.
pub trait TickSource: Send {
    /// Ticks strictly older than `before` (or the newest batch when `None`),
    /// in ascending time order. An empty batch means nothing arrived this time.
    fn fetch_before(&mut self, before: Option<DateTime<Utc>>) -> Result<Vec<Tick>, EngineError>;

    /// Whether older history may still be available.
    fn has_more(&self) -> bool {
        true
    }
}

/// Blocking backfill: fetch batches until the earliest loaded tick reaches
/// `target` or the source runs dry. Returns the number of ticks applied.
pub fn load_blocking(
    source: &mut dyn TickSource,
    aggregator: &mut WickAggregator,
    target: DateTime<Utc>,
) -> Result<usize, EngineError> {
    let mut total = 0;
    while aggregator.earliest_time().map_or(true, |e| e > target) {
        let batch = source.fetch_before(aggregator.earliest_time())?;
        if batch.is_empty() {
            debug!("Tick source returned an empty batch, stopping blocking load");
            break;
        }
        let applied = aggregator.prepend_batch(batch);
        if applied == 0 {
            debug!("Tick source returned no older ticks, stopping blocking load");
            break;
        }
        total += applied;
    }
    info!(
        "Blocking tick load applied {} ticks, earliest={:?}",
        total,
        aggregator.earliest_time()
    );
    Ok(total)
}

/// Message published by the background backfill task.
#[derive(Debug, Clone)]
pub enum BackfillEvent {
    Batch(Vec<Tick>),
    /// Coverage reached the target (or the source is exhausted); no more batches follow.
    Completed,
}

/// Owner side of a running background backfill. Dropping it cancels the task.
#[derive(Debug)]
pub struct BackfillHandle {
    rx: mpsc::UnboundedReceiver<BackfillEvent>,
    cancel_flag: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl BackfillHandle {
    /// Spawn the backfill on the current tokio runtime. One batch is fetched
    /// per `period`; the timer stops once a batch reaches `target`.
    pub fn spawn(
        mut source: Box<dyn TickSource>,
        before: Option<DateTime<Utc>>,
        target: DateTime<Utc>,
        period: Duration,
    ) -> Result<Self, EngineError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| EngineError::TickLoad(format!("no async runtime: {}", e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let cancel = Arc::clone(&cancel_flag);

        let task = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut before = before;

            loop {
                interval.tick().await;
                if cancel.load(Ordering::Relaxed) {
                    debug!("Tick backfill cancelled");
                    break;
                }

                // Sources may do blocking I/O; keep it off the async workers
                let fetch = tokio::task::spawn_blocking(move || {
                    let result = source.fetch_before(before);
                    (source, result)
                });
                let result = match fetch.await {
                    Ok((returned, result)) => {
                        source = returned;
                        result
                    }
                    Err(e) => {
                        warn!("Tick backfill fetch task failed: {}", e);
                        break;
                    }
                };
                let batch = match result {
                    Ok(batch) => batch,
                    Err(e) => {
                        warn!("Tick backfill fetch failed, retrying: {}", e);
                        continue;
                    }
                };

                if batch.is_empty() {
                    if !source.has_more() {
                        let _ = tx.send(BackfillEvent::Completed);
                        break;
                    }
                    debug!("Empty tick batch, retrying on next timer tick");
                    continue;
                }

                let earliest = batch.iter().map(|t| t.time).min();
                if let (Some(e), Some(b)) = (earliest, before) {
                    if e >= b {
                        debug!("Tick batch contained no older ticks, retrying");
                        continue;
                    }
                }
                before = earliest.or(before);

                if tx.send(BackfillEvent::Batch(batch)).is_err() {
                    break;
                }
                if earliest.map_or(false, |e| e <= target) || !source.has_more() {
                    let _ = tx.send(BackfillEvent::Completed);
                    break;
                }
            }
        });

        Ok(Self {
            rx,
            cancel_flag,
            task,
        })
    }

    /// Next published event, if one is waiting.
    pub fn try_next(&mut self) -> Option<BackfillEvent> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next event; `None` once the task has finished and the
    /// channel is drained.
    pub async fn next(&mut self) -> Option<BackfillEvent> {
        self.rx.recv().await
    }

    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for BackfillHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tick_source::HistoricalTickSource;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::sync::atomic::AtomicUsize;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn history(n: i64) -> Vec<Tick> {
        (0..n)
            .map(|i| Tick::new(t0() + ChronoDuration::seconds(i), 100.0 + i as f64))
            .collect()
    }

    #[test]
    fn test_load_blocking_reaches_target() {
        let mut source = HistoricalTickSource::new(history(100), 10);
        let mut agg = WickAggregator::new(300);
        let target = t0() + ChronoDuration::seconds(35);
        let loaded = load_blocking(&mut source, &mut agg, target).unwrap();
        // Batches of 10 from the newest: stops after the batch covering second 35
        assert_eq!(loaded, 70);
        assert!(agg.earliest_time().unwrap() <= target);
    }

    #[test]
    fn test_load_blocking_stops_when_exhausted() {
        let mut source = HistoricalTickSource::new(history(25), 10);
        let mut agg = WickAggregator::new(300);
        let loaded = load_blocking(&mut source, &mut agg, t0() - ChronoDuration::days(1)).unwrap();
        assert_eq!(loaded, 25);
        assert_eq!(agg.earliest_time(), Some(t0()));
    }

    #[tokio::test]
    async fn test_background_backfill_publishes_until_target() {
        let source = HistoricalTickSource::new(history(50), 20);
        let target = t0() + ChronoDuration::seconds(5);
        let mut handle =
            BackfillHandle::spawn(Box::new(source), None, target, Duration::from_millis(5)).unwrap();

        let mut batches = Vec::new();
        while let Some(event) = handle.next().await {
            match event {
                BackfillEvent::Batch(b) => batches.push(b),
                BackfillEvent::Completed => break,
            }
        }
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 20);
        assert_eq!(batches[2][0].time, t0());
        // The task stops on its own after completion
        assert!(handle.next().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_stops_task() {
        let source = HistoricalTickSource::new(history(1000), 1);
        let mut handle =
            BackfillHandle::spawn(Box::new(source), None, t0(), Duration::from_millis(5)).unwrap();
        assert!(matches!(handle.next().await, Some(BackfillEvent::Batch(_))));
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(handle.is_finished());
    }

    /// Serves from a history after a scripted number of failures and empty batches.
    struct FlakySource {
        inner: HistoricalTickSource,
        failures: usize,
        empties: usize,
        calls: Arc<AtomicUsize>,
    }

    impl TickSource for FlakySource {
        fn fetch_before(&mut self, before: Option<DateTime<Utc>>) -> Result<Vec<Tick>, EngineError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.failures > 0 {
                self.failures -= 1;
                return Err(EngineError::TickLoad("broker timeout".into()));
            }
            if self.empties > 0 {
                self.empties -= 1;
                return Ok(Vec::new());
            }
            self.inner.fetch_before(before)
        }

        fn has_more(&self) -> bool {
            self.inner.has_more()
        }
    }

    async fn collect_until_completed(handle: &mut BackfillHandle) -> Option<Vec<Vec<Tick>>> {
        let mut batches = Vec::new();
        while let Some(event) = handle.next().await {
            match event {
                BackfillEvent::Batch(b) => batches.push(b),
                BackfillEvent::Completed => return Some(batches),
            }
        }
        None
    }

    #[tokio::test]
    async fn test_empty_batch_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = FlakySource {
            inner: HistoricalTickSource::new(history(30), 20),
            failures: 0,
            empties: 1,
            calls: Arc::clone(&calls),
        };
        let mut handle =
            BackfillHandle::spawn(Box::new(source), None, t0(), Duration::from_millis(5)).unwrap();

        let batches = collect_until_completed(&mut handle).await.unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 20);
        assert_eq!(batches[1][0].time, t0());
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_fetch_error_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = FlakySource {
            inner: HistoricalTickSource::new(history(30), 20),
            failures: 1,
            empties: 0,
            calls: Arc::clone(&calls),
        };
        let mut handle =
            BackfillHandle::spawn(Box::new(source), None, t0(), Duration::from_millis(5)).unwrap();

        let batches = collect_until_completed(&mut handle).await.unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), 30);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_spawn_without_runtime_fails() {
        let source = HistoricalTickSource::new(history(10), 5);
        let result = BackfillHandle::spawn(Box::new(source), None, t0(), BACKFILL_PERIOD);
        assert!(matches!(result, Err(EngineError::TickLoad(_))));
    }
}
