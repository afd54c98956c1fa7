use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::errors::EngineError;
use crate::models::candle::{Bar, Tick};
use crate::models::config::{EngineConfig, NotifyMode, TickLoadStrategy};
use crate::models::intent::{NotifyLevel, RenderIntent};
use crate::models::signal::{
    PivotKind, PreviousState, SignalDirection, SignalRecord, TrendSnapshot, WickRange,
};

use super::backfill::{self, BackfillEvent, BackfillHandle, TickSource, BACKFILL_PERIOD};
use super::history::SignalHistory;
use super::pivots::find_last_two_pivots;
use super::signal::{evaluate_breakout, BreakoutInputs};
use super::trendline::{project, Trendline};
use super::wicks::{WickAggregator, WICK_EVICTION_SLACK};

const RENKO_CAPTION: &str = "Renko Wicks";

/// Why a pass produced neutral outputs without evaluating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    OscillatorUnavailable,
    IndexOutOfRange,
    NotEnoughHistory,
    EmptyPivotWindow,
}

#[derive(Debug, Clone)]
pub enum PassOutcome {
    Evaluated,
    Skipped(SkipReason),
    /// The pass failed; outputs are neutral and every cache was cleared.
    Faulted(EngineError),
}

/// Everything one evaluation pass produced.
#[derive(Debug, Clone)]
pub struct PassReport {
    pub index: usize,
    pub last_closed: Option<usize>,
    pub signal: SignalDirection,
    pub previous_state: PreviousState,
    pub trend: TrendSnapshot,
    pub wicks: Vec<WickRange>,
    pub intents: Vec<RenderIntent>,
    pub outcome: PassOutcome,
}

impl PassReport {
    fn new(index: usize) -> Self {
        Self {
            index,
            last_closed: None,
            signal: SignalDirection::None,
            previous_state: PreviousState::Neutral,
            trend: TrendSnapshot::default(),
            wicks: Vec::new(),
            intents: Vec::new(),
            outcome: PassOutcome::Evaluated,
        }
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self.outcome, PassOutcome::Faulted(_))
    }
}

/// Logs the first computation fault and counts the rest.
#[derive(Debug, Default)]
pub struct FaultLatch {
    reported: bool,
    suppressed: usize,
}

impl FaultLatch {
    pub fn report(&mut self, err: &EngineError) {
        if self.reported {
            self.suppressed += 1;
            return;
        }
        error!("RSI trendline engine error: {}", err);
        self.reported = true;
    }

    pub fn is_reported(&self) -> bool {
        self.reported
    }

    pub fn suppressed(&self) -> usize {
        self.suppressed
    }
}

enum TickLoadState {
    /// Wicks disabled or no tick source attached.
    Idle,
    /// Source attached, waiting for the strategy's trigger.
    Pending,
    Loading(BackfillHandle),
    Complete,
}

/// Incremental RSI trendline breakout engine for one symbol/timeframe.
///
/// The host calls [`TrendlineEngine::calculate`] for every new or updated bar,
/// in order, from a single thread. All caches are owned by the engine.
pub struct TrendlineEngine {
    config: EngineConfig,
    history: SignalHistory,
    wicks: WickAggregator,
    tick_source: Option<Box<dyn TickSource>>,
    tick_state: TickLoadState,
    tick_start: Option<DateTime<Utc>>,
    trend: TrendSnapshot,
    signal_at_last_close: SignalDirection,
    previous_state: PreviousState,
    last_closed: Option<usize>,
    fault_latch: FaultLatch,
}

impl TrendlineEngine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            history: SignalHistory::new(config.search_back),
            wicks: WickAggregator::new(config.search_back),
            config,
            tick_source: None,
            tick_state: TickLoadState::Idle,
            tick_start: None,
            trend: TrendSnapshot::default(),
            signal_at_last_close: SignalDirection::None,
            previous_state: PreviousState::Neutral,
            last_closed: None,
            fault_latch: FaultLatch::default(),
        })
    }

    // ── Tick feed ──

    /// Attach a historical tick source. With `AtStartupSync` the backfill runs
    /// here, before any bar is processed; other strategies defer it.
    pub fn attach_tick_source(
        &mut self,
        source: Box<dyn TickSource>,
        bars: &[Bar],
    ) -> Result<Vec<RenderIntent>, EngineError> {
        self.cancel_backfill();
        self.tick_source = Some(source);
        self.tick_state = TickLoadState::Pending;

        let mut intents = Vec::new();
        if self.config.enable_renko_wicks
            && self.config.tick_load_strategy == TickLoadStrategy::AtStartupSync
        {
            self.load_ticks_blocking(bars, &mut intents)?;
        }
        Ok(intents)
    }

    /// Append a live tick.
    pub fn push_tick(&mut self, tick: Tick) -> bool {
        self.wicks.push_tick(tick)
    }

    /// Turn wick reconstruction on or off. Disabling cancels a running
    /// backfill and drops the wick cache.
    pub fn set_wicks_enabled(&mut self, enabled: bool) {
        if self.config.enable_renko_wicks == enabled {
            return;
        }
        self.config.enable_renko_wicks = enabled;
        if !enabled {
            self.cancel_backfill();
            self.wicks.clear();
            info!("Renko wicks disabled");
        }
    }

    /// Cancel a running backfill. Returns whether one was running; its source
    /// is dropped with the task.
    fn cancel_backfill(&mut self) -> bool {
        if let TickLoadState::Loading(handle) = &self.tick_state {
            handle.cancel();
            self.tick_state = TickLoadState::Idle;
            info!("Tick backfill cancelled");
            return true;
        }
        false
    }

    fn ensure_tick_start(
        &mut self,
        bars: &[Bar],
        intents: &mut Vec<RenderIntent>,
    ) -> Option<DateTime<Utc>> {
        if self.tick_start.is_none() {
            let latest = bars.last()?;
            let resolved = self.config.resolve_tick_start(latest.open_time);
            if let Some(warning) = resolved.warning {
                warn!("{}; loading ticks from {}", warning, resolved.time);
                intents.push(RenderIntent::Notification {
                    caption: RENKO_CAPTION.to_string(),
                    message: format!("{}. Using {} instead.", warning, resolved.time.date_naive()),
                    level: NotifyLevel::Warning,
                });
            }
            self.tick_start = Some(resolved.time);
        }
        self.tick_start
    }

    fn load_ticks_blocking(
        &mut self,
        bars: &[Bar],
        intents: &mut Vec<RenderIntent>,
    ) -> Result<(), EngineError> {
        let Some(target) = self.ensure_tick_start(bars, intents) else {
            return Ok(());
        };
        let Some(mut source) = self.tick_source.take() else {
            return Ok(());
        };

        let show_progress = self.config.tick_load_strategy == TickLoadStrategy::OnChartStartSync;
        if show_progress {
            intents.push(RenderIntent::Progress {
                caption: RENKO_CAPTION.to_string(),
                visible: true,
            });
        }

        let result = backfill::load_blocking(source.as_mut(), &mut self.wicks, target);
        self.tick_source = Some(source);

        if show_progress {
            intents.push(RenderIntent::Progress {
                caption: RENKO_CAPTION.to_string(),
                visible: false,
            });
        }

        let loaded = result?;
        self.tick_state = TickLoadState::Complete;
        self.notify_loaded(loaded, intents);
        Ok(())
    }

    fn start_async_backfill(&mut self, bars: &[Bar], intents: &mut Vec<RenderIntent>) {
        let Some(target) = self.ensure_tick_start(bars, intents) else {
            return;
        };
        if self.wicks.earliest_time().map_or(false, |e| e <= target) {
            self.tick_state = TickLoadState::Complete;
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("No async runtime for tick backfill, loading synchronously");
            if let Err(e) = self.load_ticks_blocking(bars, intents) {
                self.tick_load_failed(&e, intents);
            }
            return;
        }
        let Some(source) = self.tick_source.take() else {
            return;
        };

        match BackfillHandle::spawn(source, self.wicks.earliest_time(), target, BACKFILL_PERIOD) {
            Ok(handle) => {
                info!("Started background tick backfill down to {}", target);
                if self.config.notify_mode == NotifyMode::Detailed {
                    intents.push(RenderIntent::Notification {
                        caption: RENKO_CAPTION.to_string(),
                        message: format!("Loading ticks from {} in the background", target.date_naive()),
                        level: NotifyLevel::Info,
                    });
                }
                self.tick_state = TickLoadState::Loading(handle);
            }
            Err(e) => {
                warn!("Could not start tick backfill: {}", e);
                self.tick_state = TickLoadState::Complete;
            }
        }
    }

    /// Apply every batch published since the last pass, then finish the
    /// backfill if coverage reached the target.
    fn drain_backfill(&mut self, bars: &[Bar], report: &mut PassReport) {
        let events: Vec<BackfillEvent> = match &mut self.tick_state {
            TickLoadState::Loading(handle) => std::iter::from_fn(|| handle.try_next()).collect(),
            _ => return,
        };

        let mut completed = false;
        for event in events {
            match event {
                BackfillEvent::Batch(batch) => {
                    let (Some(from), Some(to)) = (
                        batch.iter().map(|t| t.time).min(),
                        batch.iter().map(|t| t.time).max(),
                    ) else {
                        continue;
                    };
                    let applied = self.wicks.prepend_batch(batch);
                    let refreshed = self.wicks.refresh_cached(bars, from, to);
                    debug!("Applied tick batch: {} ticks, {} wicks refreshed", applied, refreshed.len());
                    self.push_wicks(bars, &refreshed, report);
                    if self.config.notify_mode == NotifyMode::Detailed {
                        report.intents.push(RenderIntent::Notification {
                            caption: RENKO_CAPTION.to_string(),
                            message: format!("Loaded {} ticks, now from {}", applied, from),
                            level: NotifyLevel::Info,
                        });
                    }
                }
                BackfillEvent::Completed => completed = true,
            }
        }

        let reached = match (self.wicks.earliest_time(), self.tick_start) {
            (Some(earliest), Some(target)) => earliest <= target,
            _ => false,
        };
        if !(completed || reached) {
            return;
        }

        if let TickLoadState::Loading(handle) = &self.tick_state {
            handle.cancel();
        }
        self.tick_state = TickLoadState::Complete;

        let min_index = bars.len().saturating_sub(1).saturating_sub(self.config.search_back);
        let rebuilt = self.wicks.rebuild(bars, min_index);
        info!("Tick backfill complete, rebuilt {} wick ranges", rebuilt.len());
        self.push_wicks(bars, &rebuilt, report);
        let loaded = self.wicks.tick_count();
        self.notify_loaded(loaded, &mut report.intents);
    }

    /// A failed load leaves wicks on bar fallbacks; it never faults the pass.
    fn tick_load_failed(&mut self, err: &EngineError, intents: &mut Vec<RenderIntent>) {
        warn!("Tick load failed: {}", err);
        self.tick_state = TickLoadState::Complete;
        intents.push(RenderIntent::Notification {
            caption: RENKO_CAPTION.to_string(),
            message: err.to_string(),
            level: NotifyLevel::Error,
        });
    }

    fn notify_loaded(&self, loaded: usize, intents: &mut Vec<RenderIntent>) {
        let message = match self.config.notify_mode {
            NotifyMode::Minimal => "Tick data loaded".to_string(),
            NotifyMode::Detailed => format!(
                "Tick data loaded: {} ticks from {}",
                loaded,
                self.wicks
                    .earliest_time()
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "-".to_string())
            ),
        };
        intents.push(RenderIntent::Notification {
            caption: RENKO_CAPTION.to_string(),
            message,
            level: NotifyLevel::Success,
        });
    }

    fn push_wicks(&self, bars: &[Bar], ranges: &[WickRange], report: &mut PassReport) {
        for range in ranges {
            if !range.found {
                continue;
            }
            if let Some(bar) = bars.get(range.bar_index) {
                report.intents.push(RenderIntent::WickLine {
                    index: range.bar_index,
                    time: bar.open_time,
                    low: range.low,
                    high: range.high,
                    thickness: self.config.wick_thickness,
                    bullish: bar.is_bullish(),
                });
            }
        }
        report.wicks.extend_from_slice(ranges);
    }

    // ── Evaluation ──

    /// Evaluate bar `index`. `bars` is the whole chart (the last bar is live)
    /// and `oscillator` holds one value per bar, NaN where undefined.
    ///
    /// Never fails: a fault clears every cache, is logged once, and is
    /// reported through [`PassOutcome::Faulted`].
    pub fn calculate(&mut self, index: usize, bars: &[Bar], oscillator: &[f64]) -> PassReport {
        let mut report = PassReport::new(index);
        match self.try_calculate(index, bars, oscillator, &mut report) {
            Ok(outcome) => {
                report.last_closed = self.last_closed;
                report.signal = self.signal_at_last_close;
                report.previous_state = self.previous_state;
                report.trend = self.trend;
                report.outcome = outcome;
            }
            Err(err) => {
                self.reset_outputs();
                self.history.clear();
                self.wicks.clear();
                self.fault_latch.report(&err);
                report.wicks.clear();
                report.intents = vec![
                    RenderIntent::RemoveTrendline {
                        kind: PivotKind::High,
                    },
                    RenderIntent::RemoveTrendline {
                        kind: PivotKind::Low,
                    },
                    RenderIntent::ClearSignalMarkers,
                ];
                report.outcome = PassOutcome::Faulted(err);
            }
        }
        report
    }

    fn try_calculate(
        &mut self,
        index: usize,
        bars: &[Bar],
        oscillator: &[f64],
        report: &mut PassReport,
    ) -> Result<PassOutcome, EngineError> {
        let wicks_on = self.config.enable_renko_wicks;

        // Background batches are only consumed here, between passes
        if wicks_on {
            self.drain_backfill(bars, report);
            if matches!(self.tick_state, TickLoadState::Pending)
                && self.config.tick_load_strategy == TickLoadStrategy::OnChartStartSync
            {
                if let Err(e) = self.load_ticks_blocking(bars, &mut report.intents) {
                    self.tick_load_failed(&e, &mut report.intents);
                }
            }
        }

        if oscillator.is_empty() {
            self.reset_outputs();
            return Ok(PassOutcome::Skipped(SkipReason::OscillatorUnavailable));
        }
        if index >= oscillator.len() || index >= bars.len() {
            self.reset_outputs();
            return Ok(PassOutcome::Skipped(SkipReason::IndexOutOfRange));
        }
        if bars[index].index != index {
            return Err(EngineError::ComputationFault(format!(
                "bar at position {} carries index {}",
                index, bars[index].index
            )));
        }

        let bar_count = bars.len();
        let is_live = index + 1 >= bar_count;

        // Stage wick targets first: they are the only fallible inputs left
        let wick_targets = if wicks_on {
            self.wick_targets(index, bars)?
        } else {
            Vec::new()
        };

        let outcome = self.evaluate_signal(index, bars, oscillator, &mut report.intents)?;

        // ── Commit wick ranges ──
        let ranges: Vec<WickRange> = wick_targets
            .into_iter()
            .map(|(i, next_open)| self.wicks.wick_range(&bars[i], next_open))
            .collect();
        self.push_wicks(bars, &ranges, report);
        if wicks_on {
            self.trim_ticks(index, bars);
        }

        if wicks_on
            && is_live
            && matches!(self.tick_state, TickLoadState::Pending)
            && self.config.tick_load_strategy == TickLoadStrategy::OnChartEndAsync
        {
            self.start_async_backfill(bars, &mut report.intents);
        }

        Ok(outcome)
    }

    /// Drop ticks that fall before every bar a wick can still be asked for.
    fn trim_ticks(&mut self, index: usize, bars: &[Bar]) {
        let min_index = index.saturating_sub(self.config.search_back + WICK_EVICTION_SLACK);
        if min_index == 0 {
            return;
        }
        if let Some(bar) = bars.get(min_index) {
            self.wicks.trim_before(bar.open_time);
        }
    }

    /// Bars whose wick must be (re)computed this pass: the bar that just
    /// closed, then `index` itself.
    fn wick_targets(
        &self,
        index: usize,
        bars: &[Bar],
    ) -> Result<Vec<(usize, Option<DateTime<Utc>>)>, EngineError> {
        let mut targets = Vec::with_capacity(2);
        for i in index.saturating_sub(1)..=index {
            let bar = &bars[i];
            let next_open = bars.get(i + 1).map(|b| b.open_time);
            if let Some(next) = next_open {
                if next <= bar.open_time {
                    return Err(EngineError::ComputationFault(format!(
                        "bar {} opens at {} which is not after bar {} at {}",
                        i + 1,
                        next,
                        i,
                        bar.open_time
                    )));
                }
            }
            targets.push((i, next_open));
        }
        Ok(targets)
    }

    fn evaluate_signal(
        &mut self,
        index: usize,
        bars: &[Bar],
        oscillator: &[f64],
        intents: &mut Vec<RenderIntent>,
    ) -> Result<PassOutcome, EngineError> {
        let bar_count = bars.len();
        let last_closed = if index + 1 >= bar_count {
            bar_count as isize - 2
        } else {
            index as isize
        };
        if last_closed <= 0 {
            self.reset_outputs();
            return Ok(PassOutcome::Skipped(SkipReason::NotEnoughHistory));
        }
        let last_closed = last_closed as usize;
        let prev = last_closed - 1;
        let swing = self.config.swing;

        if last_closed < swing * 2 + 5 {
            self.reset_outputs();
            return Ok(PassOutcome::Skipped(SkipReason::NotEnoughHistory));
        }

        let from = swing.max(last_closed.saturating_sub(self.config.search_back));
        let to = last_closed - swing;
        if to < from {
            self.reset_outputs();
            return Ok(PassOutcome::Skipped(SkipReason::EmptyPivotWindow));
        }

        let high_line = find_last_two_pivots(oscillator, from, to, swing, PivotKind::High)
            .and_then(|pair| Trendline::from_pair(&pair));
        let low_line = find_last_two_pivots(oscillator, from, to, swing, PivotKind::Low)
            .and_then(|pair| Trendline::from_pair(&pair));

        let trend = TrendSnapshot {
            high_at_last_close: value_from_left(high_line.as_ref(), last_closed),
            low_at_last_close: value_from_left(low_line.as_ref(), last_closed),
            high_at_prev_close: value_from_left(high_line.as_ref(), prev),
            low_at_prev_close: value_from_left(low_line.as_ref(), prev),
        };

        let decision = evaluate_breakout(&BreakoutInputs {
            rsi_last: oscillator[last_closed],
            rsi_prev: oscillator[prev],
            trend,
        });

        // ── Commit ──
        self.trend = trend;
        self.signal_at_last_close = decision.signal;
        self.previous_state = decision.previous_state;
        self.last_closed = Some(last_closed);

        let closed_bar = &bars[last_closed];
        if self.history.record(last_closed, closed_bar.open_time, decision.signal) {
            debug!(
                "Bar {} signal {:?} (previous state {:?})",
                last_closed, decision.signal, decision.previous_state
            );
        }

        if !self.config.show_pivot_markers {
            intents.push(RenderIntent::RemovePivotMarkers);
        }
        self.push_trendline_intents(PivotKind::High, high_line.as_ref(), bar_count, last_closed, intents);
        self.push_trendline_intents(PivotKind::Low, low_line.as_ref(), bar_count, last_closed, intents);
        self.push_signal_marker_intents(closed_bar, decision.signal, intents);

        Ok(PassOutcome::Evaluated)
    }

    fn push_trendline_intents(
        &self,
        kind: PivotKind,
        line: Option<&Trendline>,
        bar_count: usize,
        last_closed: usize,
        intents: &mut Vec<RenderIntent>,
    ) {
        let Some(line) = line else {
            intents.push(RenderIntent::RemoveTrendline { kind });
            return;
        };
        let draw_end = line.draw_end(bar_count - 1, last_closed, self.config.extend_bars);
        intents.push(RenderIntent::Trendline {
            kind,
            from_index: line.left.index,
            from_value: line.left.value,
            to_index: draw_end,
            to_value: line.value_at(draw_end),
        });
        if self.config.show_pivot_markers {
            for (slot, pivot) in [(1u8, line.right), (2u8, line.left)] {
                intents.push(RenderIntent::PivotMarker {
                    kind,
                    slot,
                    index: pivot.index,
                    value: pivot.value,
                });
            }
        }
    }

    fn push_signal_marker_intents(
        &self,
        bar: &Bar,
        signal: SignalDirection,
        intents: &mut Vec<RenderIntent>,
    ) {
        if !self.config.show_signal_markers {
            intents.push(RenderIntent::ClearSignalMarkers);
            return;
        }
        intents.push(RenderIntent::PruneSignalMarkers {
            min_index: bar.index.saturating_sub(self.config.search_back),
        });
        if signal.is_none() {
            return;
        }
        let pip = self
            .config
            .pip_size
            .unwrap_or_else(|| (bar.close * 0.001).max(1e-5));
        let offset = pip * 5.0;
        let price = match signal {
            SignalDirection::Up => bar.close + offset,
            _ => bar.close - offset,
        };
        intents.push(RenderIntent::SignalMarker {
            name: RenderIntent::signal_marker_name(bar.open_time),
            index: bar.index,
            time: bar.open_time,
            price,
            direction: signal,
        });
    }

    fn reset_outputs(&mut self) {
        self.trend = TrendSnapshot::default();
        self.signal_at_last_close = SignalDirection::None;
        self.previous_state = PreviousState::Neutral;
    }

    // ── Queries ──

    pub fn signal_at_bar(&self, index: usize) -> SignalDirection {
        self.history.get_by_index(index)
    }

    pub fn signal_at_time(&self, time: DateTime<Utc>) -> SignalDirection {
        self.history.get_by_time(time)
    }

    /// Signal recorded for the most recently evaluated closed bar.
    pub fn last_signal(&self) -> Option<SignalRecord> {
        self.history.last()
    }

    /// Wick range for a bar; `found` is false when nothing is cached or the
    /// bar had no ticks (then low/high are the bar's own).
    pub fn wick_range_at_bar(&self, index: usize) -> WickRange {
        self.wicks.cached(index).unwrap_or(WickRange {
            bar_index: index,
            low: f64::NAN,
            high: f64::NAN,
            found: false,
        })
    }

    pub fn signal_at_last_close(&self) -> SignalDirection {
        self.signal_at_last_close
    }

    pub fn previous_state(&self) -> PreviousState {
        self.previous_state
    }

    pub fn trend(&self) -> TrendSnapshot {
        self.trend
    }

    pub fn history(&self) -> &SignalHistory {
        &self.history
    }

    pub fn wicks(&self) -> &WickAggregator {
        &self.wicks
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tick_start(&self) -> Option<DateTime<Utc>> {
        self.tick_start
    }

    pub fn is_backfill_running(&self) -> bool {
        matches!(self.tick_state, TickLoadState::Loading(_))
    }

    pub fn is_backfill_complete(&self) -> bool {
        matches!(self.tick_state, TickLoadState::Complete)
    }

    pub fn fault_latch(&self) -> &FaultLatch {
        &self.fault_latch
    }
}

/// Trendline value at `index`, defined only from the left pivot onward.
fn value_from_left(line: Option<&Trendline>, index: usize) -> f64 {
    project(line.filter(|l| index >= l.left.index), index)
}
