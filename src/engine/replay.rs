use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::errors::EngineError;
use crate::models::candle::{Bar, Tick};
use crate::models::config::EngineConfig;
use crate::models::signal::SignalRecord;

use super::indicators::OscillatorSeries;
use super::pass::{PassOutcome, TrendlineEngine};

/// One symbol/timeframe to replay bar by bar.
#[derive(Debug, Clone)]
pub struct ReplayInput {
    pub name: String,
    pub bars: Vec<Bar>,
    /// Live ticks, fed to the engine as the bar they fall in is evaluated.
    pub ticks: Vec<Tick>,
    /// Precomputed oscillator; Wilder RSI of the closes when absent.
    pub oscillator: Option<Vec<f64>>,
    pub config: EngineConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplaySummary {
    pub name: String,
    pub bars: usize,
    pub evaluated: usize,
    pub skipped: usize,
    pub faults: usize,
    pub wicks_found: usize,
    /// Confirmed breakouts in bar order.
    pub signals: Vec<SignalRecord>,
}

/// Replay a bar series as if it streamed in: at step `i` the engine sees
/// bars `0..=i` with bar `i` still forming, so each pass confirms bar `i - 1`.
pub fn replay(input: &ReplayInput, cancel_flag: &AtomicBool) -> Result<ReplaySummary, EngineError> {
    let bars = &input.bars;
    if bars.is_empty() {
        return Err(EngineError::DataUnavailable(format!("{}: no bars", input.name)));
    }
    let needed = input.config.swing * 2 + 7;
    if bars.len() < needed {
        return Err(EngineError::InsufficientData {
            needed,
            available: bars.len(),
        });
    }

    let oscillator = match &input.oscillator {
        Some(values) => OscillatorSeries::new(values.clone()),
        None => OscillatorSeries::rsi_from_bars(bars, input.config.period)?,
    };
    let mut engine = TrendlineEngine::new(input.config.clone())?;

    let mut summary = ReplaySummary {
        name: input.name.clone(),
        bars: bars.len(),
        evaluated: 0,
        skipped: 0,
        faults: 0,
        wicks_found: 0,
        signals: Vec::new(),
    };
    let mut next_tick = 0;

    for i in 0..bars.len() {
        if cancel_flag.load(Ordering::Relaxed) {
            return Err(EngineError::ReplayCancelled);
        }

        // Ticks up to the close of bar i
        let close_time = bars.get(i + 1).map(|b| b.open_time);
        while let Some(tick) = input.ticks.get(next_tick) {
            if close_time.map_or(false, |c| tick.time >= c) {
                break;
            }
            engine.push_tick(*tick);
            next_tick += 1;
        }

        let visible = &bars[..=i];
        let osc = &oscillator.as_slice()[..(i + 1).min(oscillator.len())];
        let report = engine.calculate(i, visible, osc);

        match report.outcome {
            PassOutcome::Evaluated => summary.evaluated += 1,
            PassOutcome::Skipped(_) => summary.skipped += 1,
            PassOutcome::Faulted(_) => summary.faults += 1,
        }
        summary.wicks_found += report.wicks.iter().filter(|w| w.found).count();

        if let Some(index) = report.last_closed {
            let is_new = summary.signals.last().map_or(true, |s| s.index < index);
            if !report.signal.is_none() && is_new {
                summary.signals.push(SignalRecord {
                    index,
                    time: bars[index].open_time,
                    direction: report.signal,
                });
            }
        }
    }

    Ok(summary)
}

/// Replay many series in parallel. `progress_callback` receives
/// `(completed, total)` after each series.
pub fn replay_many(
    inputs: &[ReplayInput],
    cancel_flag: &AtomicBool,
    progress_callback: impl Fn(usize, usize) + Send + Sync,
) -> Result<Vec<ReplaySummary>, EngineError> {
    let total = inputs.len();
    info!("Replaying {} series", total);
    let counter = AtomicUsize::new(0);
    let start = Instant::now();

    let results: Vec<Result<ReplaySummary, EngineError>> = inputs
        .par_iter()
        .map(|input| {
            let result = replay(input, cancel_flag);
            let current = counter.fetch_add(1, Ordering::Relaxed) + 1;
            progress_callback(current, total);
            result
        })
        .collect();

    if cancel_flag.load(Ordering::Relaxed) {
        return Err(EngineError::ReplayCancelled);
    }

    let summaries = results.into_iter().collect::<Result<Vec<_>, _>>()?;
    info!(
        "Replay complete: {} series, {} signals in {:.1}s",
        summaries.len(),
        summaries.iter().map(|s| s.signals.len()).sum::<usize>(),
        start.elapsed().as_secs_f64()
    );
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::signal::SignalDirection;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap()
    }

    fn make_bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let close = 100.0 + 5.0 * ((i as f64) * 0.25).sin();
                Bar {
                    index: i,
                    open_time: t0() + Duration::minutes(i as i64),
                    open: close - 0.2,
                    high: close + 0.5,
                    low: close - 0.5,
                    close,
                }
            })
            .collect()
    }

    fn input(name: &str, n: usize) -> ReplayInput {
        let bars = make_bars(n);
        let ticks = bars
            .iter()
            .map(|b| Tick::new(b.open_time + Duration::seconds(30), b.close + 1.0))
            .collect();
        ReplayInput {
            name: name.to_string(),
            bars,
            ticks,
            oscillator: None,
            config: EngineConfig {
                swing: 2,
                search_back: 100,
                enable_renko_wicks: true,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_replay_confirms_breakout_on_next_bar() {
        let mut osc = vec![50.0; 40];
        osc[12] = 70.0;
        osc[20] = 65.0;
        osc[24] = 61.0;
        osc[25] = 63.0;
        let replay_input = ReplayInput {
            oscillator: Some(osc),
            ticks: Vec::new(),
            ..input("breakout", 40)
        };
        let summary = replay(&replay_input, &AtomicBool::new(false)).unwrap();
        assert_eq!(summary.signals.len(), 1);
        assert_eq!(summary.signals[0].index, 25);
        assert_eq!(summary.signals[0].direction, SignalDirection::Up);
        assert_eq!(summary.faults, 0);
        assert_eq!(summary.evaluated + summary.skipped, 40);
    }

    #[test]
    fn test_replay_many_in_parallel() {
        let inputs = vec![input("a", 200), input("b", 150)];
        let done = AtomicUsize::new(0);
        let summaries = replay_many(&inputs, &AtomicBool::new(false), |_, _| {
            done.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].name, "a");
        assert_eq!(summaries[1].bars, 150);
        assert_eq!(done.load(Ordering::Relaxed), 2);
        for s in &summaries {
            assert_eq!(s.faults, 0);
            assert!(s.evaluated > 0);
            assert!(s.wicks_found > 0);
            assert!(s.signals.windows(2).all(|w| w[0].index < w[1].index));
        }
    }

    #[test]
    fn test_replay_cancelled() {
        let result = replay(&input("a", 100), &AtomicBool::new(true));
        assert!(matches!(result, Err(EngineError::ReplayCancelled)));
    }

    #[test]
    fn test_replay_needs_enough_bars() {
        let result = replay(&input("short", 8), &AtomicBool::new(false));
        assert!(matches!(
            result,
            Err(EngineError::InsufficientData { needed: 11, available: 8 })
        ));
        let empty = ReplayInput {
            bars: Vec::new(),
            ..input("empty", 0)
        };
        assert!(matches!(
            replay(&empty, &AtomicBool::new(false)),
            Err(EngineError::DataUnavailable(_))
        ));
    }
}
