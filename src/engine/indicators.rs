use crate::errors::EngineError;
use crate::models::candle::Bar;

/// Oscillator values indexed by bar. Undefined values are NaN; indices past
/// the end are unavailable.
#[derive(Debug, Clone, Default)]
pub struct OscillatorSeries {
    values: Vec<f64>,
}

impl OscillatorSeries {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// Wilder RSI over the bars' close prices.
    pub fn rsi_from_bars(bars: &[Bar], period: usize) -> Result<Self, EngineError> {
        if period < 2 {
            return Err(EngineError::InvalidConfig(format!(
                "RSI period must be >= 2, got {}",
                period
            )));
        }
        let close: Vec<f64> = bars.iter().map(|b| b.close).collect();
        Ok(Self::new(rsi(&close, period)))
    }

    /// Value at `index`, NaN when undefined or out of range.
    pub fn get(&self, index: usize) -> f64 {
        self.values.get(index).copied().unwrap_or(f64::NAN)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

/// Relative Strength Index with Wilder smoothing. The first `period` values are NaN.
pub fn rsi(close: &[f64], period: usize) -> Vec<f64> {
    let len = close.len();
    let mut result = vec![f64::NAN; len];
    if period == 0 || len < period + 1 {
        return result;
    }

    let mut gains = vec![0.0f64; len];
    let mut losses = vec![0.0f64; len];

    for i in 1..len {
        let change = close[i] - close[i - 1];
        if change > 0.0 {
            gains[i] = change;
        } else {
            losses[i] = -change;
        }
    }

    // Seed with the simple average of the first `period` changes
    let mut avg_gain: f64 = gains[1..=period].iter().sum::<f64>() / period as f64;
    let mut avg_loss: f64 = losses[1..=period].iter().sum::<f64>() / period as f64;
    result[period] = rsi_value(avg_gain, avg_loss);

    for i in (period + 1)..len {
        avg_gain = (avg_gain * (period as f64 - 1.0) + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + losses[i]) / period as f64;
        result[i] = rsi_value(avg_gain, avg_loss);
    }
    result
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}
