use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::errors::EngineError;
use crate::models::candle::{Bar, Tick};

#[derive(Debug, Deserialize)]
struct BarRow {
    time: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

#[derive(Debug, Deserialize)]
struct TickRow {
    time: String,
    price: f64,
}

/// Accepted timestamp layouts, tried in order after RFC 3339.
const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y.%m.%d %H:%M:%S%.f",
];

/// Parse a UTC timestamp in RFC 3339 or one of the common CSV layouts.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Load bars from a CSV with a `time,open,high,low,close` header. Rows must
/// be in ascending time order; indices are assigned by position.
pub fn load_bars_csv(path: &Path) -> Result<Vec<Bar>, EngineError> {
    if !path.exists() {
        return Err(EngineError::FileNotFound(path.display().to_string()));
    }
    let mut rdr = csv::Reader::from_path(path)?;
    let mut bars: Vec<Bar> = Vec::new();

    for (i, row) in rdr.deserialize::<BarRow>().enumerate() {
        let row_num = i + 2;
        let row = row?;
        let open_time = parse_timestamp(&row.time).ok_or_else(|| EngineError::CsvParseError {
            row: row_num,
            message: format!("invalid timestamp '{}'", row.time),
        })?;
        if let Some(prev) = bars.last() {
            if open_time <= prev.open_time {
                return Err(EngineError::CsvParseError {
                    row: row_num,
                    message: "bar times must be strictly ascending".to_string(),
                });
            }
        }
        bars.push(Bar {
            index: bars.len(),
            open_time,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
        });
    }

    info!("Loaded {} bars from {}", bars.len(), path.display());
    Ok(bars)
}

/// Load ticks from a CSV with a `time,price` header, sorted by time.
pub fn load_ticks_csv(path: &Path) -> Result<Vec<Tick>, EngineError> {
    if !path.exists() {
        return Err(EngineError::FileNotFound(path.display().to_string()));
    }
    let mut rdr = csv::Reader::from_path(path)?;
    let mut ticks = Vec::new();

    for (i, row) in rdr.deserialize::<TickRow>().enumerate() {
        let row = row?;
        let time = parse_timestamp(&row.time).ok_or_else(|| EngineError::CsvParseError {
            row: i + 2,
            message: format!("invalid timestamp '{}'", row.time),
        })?;
        ticks.push(Tick::new(time, row.price));
    }
    ticks.sort_by_key(|t| t.time);

    info!("Loaded {} ticks from {}", ticks.len(), path.display());
    Ok(ticks)
}
