use std::path::Path;

use chrono::{DateTime, Days, Months, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

/// Placeholder shipped as the default custom date; never parses.
pub const CUSTOM_DATE_PLACEHOLDER: &str = "00/00/0000";

/// Relative anchor from which historical ticks are loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TickLoadAnchor {
    #[default]
    Today,
    Yesterday,
    BeforeYesterday,
    OneWeek,
    TwoWeek,
    Monthly,
    Custom,
}

impl TickLoadAnchor {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickLoadAnchor::Today => "today",
            TickLoadAnchor::Yesterday => "yesterday",
            TickLoadAnchor::BeforeYesterday => "before_yesterday",
            TickLoadAnchor::OneWeek => "one_week",
            TickLoadAnchor::TwoWeek => "two_week",
            TickLoadAnchor::Monthly => "monthly",
            TickLoadAnchor::Custom => "custom",
        }
    }
}

impl std::fmt::Display for TickLoadAnchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TickLoadAnchor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "today" => Ok(TickLoadAnchor::Today),
            "yesterday" => Ok(TickLoadAnchor::Yesterday),
            "before_yesterday" => Ok(TickLoadAnchor::BeforeYesterday),
            "one_week" => Ok(TickLoadAnchor::OneWeek),
            "two_week" => Ok(TickLoadAnchor::TwoWeek),
            "monthly" => Ok(TickLoadAnchor::Monthly),
            "custom" => Ok(TickLoadAnchor::Custom),
            _ => Err(format!("Unknown tick load anchor: {}", s)),
        }
    }
}

/// How historical ticks are backfilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TickLoadStrategy {
    /// Block when the tick source is attached, before any bar is processed.
    AtStartupSync,
    /// Block on the first evaluation pass, behind an indeterminate progress indicator.
    OnChartStartSync,
    /// Fetch batches in the background once the live bar is reached.
    #[default]
    OnChartEndAsync,
}

impl TickLoadStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickLoadStrategy::AtStartupSync => "at_startup_sync",
            TickLoadStrategy::OnChartStartSync => "on_chart_start_sync",
            TickLoadStrategy::OnChartEndAsync => "on_chart_end_async",
        }
    }
}

impl std::fmt::Display for TickLoadStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TickLoadStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "at_startup_sync" => Ok(TickLoadStrategy::AtStartupSync),
            "on_chart_start_sync" => Ok(TickLoadStrategy::OnChartStartSync),
            "on_chart_end_async" => Ok(TickLoadStrategy::OnChartEndAsync),
            _ => Err(format!("Unknown tick load strategy: {}", s)),
        }
    }
}

/// Verbosity of tick-loading notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotifyMode {
    #[default]
    Minimal,
    Detailed,
}

impl std::fmt::Display for NotifyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyMode::Minimal => f.write_str("minimal"),
            NotifyMode::Detailed => f.write_str("detailed"),
        }
    }
}

impl std::str::FromStr for NotifyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "minimal" => Ok(NotifyMode::Minimal),
            "detailed" => Ok(NotifyMode::Detailed),
            _ => Err(format!("Unknown notify mode: {}", s)),
        }
    }
}

/// Per-instance engine parameters. One instance tracks one symbol/timeframe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// RSI period (>= 2).
    pub period: usize,
    /// Pivot half-width; a pivot needs `2 * swing + 1` bars.
    pub swing: usize,
    /// Lookback window for pivots and cache retention, in bars.
    pub search_back: usize,
    /// Bars the drawn trendline extends past its right pivot.
    pub extend_bars: usize,
    pub show_pivot_markers: bool,
    pub show_signal_markers: bool,
    pub enable_renko_wicks: bool,
    /// Wick line thickness, 1..=5.
    pub wick_thickness: u8,
    pub tick_load_from: TickLoadAnchor,
    pub tick_load_strategy: TickLoadStrategy,
    /// Only read when `tick_load_from` is `Custom`. Format dd/MM/yyyy.
    pub custom_tick_date: String,
    pub notify_mode: NotifyMode,
    /// Instrument pip size for marker offsets; derived from price when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pip_size: Option<f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            period: 14,
            swing: 5,
            search_back: 300,
            extend_bars: 2,
            show_pivot_markers: false,
            show_signal_markers: true,
            enable_renko_wicks: false,
            wick_thickness: 1,
            tick_load_from: TickLoadAnchor::Today,
            tick_load_strategy: TickLoadStrategy::OnChartEndAsync,
            custom_tick_date: CUSTOM_DATE_PLACEHOLDER.to_string(),
            notify_mode: NotifyMode::Minimal,
            pip_size: None,
        }
    }
}

/// Resolved tick start time plus the non-fatal warning raised while resolving it.
#[derive(Debug, Clone)]
pub struct ResolvedTickStart {
    pub time: DateTime<Utc>,
    pub warning: Option<EngineError>,
}

impl EngineConfig {
    /// Check every parameter against its declared range.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.period < 2 {
            return Err(EngineError::InvalidConfig(format!(
                "period must be >= 2, got {}",
                self.period
            )));
        }
        check_range("swing", self.swing, 1, 50)?;
        check_range("search_back", self.search_back, 50, 5000)?;
        check_range("extend_bars", self.extend_bars, 0, 50)?;
        check_range("wick_thickness", self.wick_thickness as usize, 1, 5)?;
        if let Some(pip) = self.pip_size {
            if !(pip.is_finite() && pip > 0.0) {
                return Err(EngineError::InvalidConfig(format!(
                    "pip_size must be positive, got {}",
                    pip
                )));
            }
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn from_json_file(path: &Path) -> Result<Self, EngineError> {
        if !path.exists() {
            return Err(EngineError::FileNotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Compute the earliest time ticks should be loaded from, anchored on the
    /// latest bar's UTC date. An unparsable custom date falls back to that date.
    pub fn resolve_tick_start(&self, latest_bar_time: DateTime<Utc>) -> ResolvedTickStart {
        let today = latest_bar_time.date_naive();
        let (date, warning) = match self.tick_load_from {
            TickLoadAnchor::Today => (today, None),
            TickLoadAnchor::Yesterday => (sub_days(today, 1), None),
            TickLoadAnchor::BeforeYesterday => (sub_days(today, 2), None),
            TickLoadAnchor::OneWeek => (sub_days(today, 7), None),
            TickLoadAnchor::TwoWeek => (sub_days(today, 14), None),
            TickLoadAnchor::Monthly => (
                today.checked_sub_months(Months::new(1)).unwrap_or(today),
                None,
            ),
            TickLoadAnchor::Custom => match parse_custom_date(&self.custom_tick_date) {
                Ok(date) => (date, None),
                Err(e) => (today, Some(e)),
            },
        };
        ResolvedTickStart {
            time: date.and_time(NaiveTime::MIN).and_utc(),
            warning,
        }
    }
}

/// Parse a dd/MM/yyyy date.
pub fn parse_custom_date(s: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(s.trim(), "%d/%m/%Y")
        .map_err(|_| EngineError::InvalidCustomDate(s.to_string()))
}

fn sub_days(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_sub_days(Days::new(days)).unwrap_or(date)
}

fn check_range(name: &str, value: usize, min: usize, max: usize) -> Result<(), EngineError> {
    if value < min || value > max {
        return Err(EngineError::InvalidConfig(format!(
            "{} must be in [{}, {}], got {}",
            name, min, max, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn latest() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 13, 45, 0).unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.search_back, 300);
        assert_eq!(config.tick_load_strategy, TickLoadStrategy::OnChartEndAsync);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let config = EngineConfig {
            swing: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));

        let config = EngineConfig {
            search_back: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            period: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            wick_thickness: 6,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{"swing": 2, "enable_renko_wicks": true, "tick_load_from": "one_week"}"#,
        )
        .unwrap();
        assert_eq!(config.swing, 2);
        assert!(config.enable_renko_wicks);
        assert_eq!(config.tick_load_from, TickLoadAnchor::OneWeek);
        assert_eq!(config.period, 14);
    }

    #[test]
    fn test_from_json_file_missing() {
        let err = EngineConfig::from_json_file(Path::new("/definitely/not/here.json"));
        assert!(matches!(err, Err(EngineError::FileNotFound(_))));
    }

    #[test]
    fn test_from_json_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        let config = EngineConfig {
            search_back: 500,
            ..Default::default()
        };
        std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();
        let loaded = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded.search_back, 500);
    }

    #[test]
    fn test_resolve_relative_anchors() {
        let mut config = EngineConfig::default();
        let start = config.resolve_tick_start(latest());
        assert_eq!(start.time, Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap());
        assert!(start.warning.is_none());

        config.tick_load_from = TickLoadAnchor::BeforeYesterday;
        let start = config.resolve_tick_start(latest());
        assert_eq!(start.time, Utc.with_ymd_and_hms(2024, 3, 13, 0, 0, 0).unwrap());

        config.tick_load_from = TickLoadAnchor::TwoWeek;
        let start = config.resolve_tick_start(latest());
        assert_eq!(start.time, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());

        config.tick_load_from = TickLoadAnchor::Monthly;
        let start = config.resolve_tick_start(latest());
        assert_eq!(start.time, Utc.with_ymd_and_hms(2024, 2, 15, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_custom_date_parses() {
        let config = EngineConfig {
            tick_load_from: TickLoadAnchor::Custom,
            custom_tick_date: "01/02/2024".to_string(),
            ..Default::default()
        };
        let start = config.resolve_tick_start(latest());
        assert_eq!(start.time, Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
        assert!(start.warning.is_none());
    }

    #[test]
    fn test_custom_date_placeholder_falls_back_with_warning() {
        let config = EngineConfig {
            tick_load_from: TickLoadAnchor::Custom,
            ..Default::default()
        };
        let start = config.resolve_tick_start(latest());
        assert_eq!(start.time, Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap());
        assert!(matches!(start.warning, Some(EngineError::InvalidCustomDate(_))));
    }

    #[test]
    fn test_enum_from_str() {
        assert_eq!("Monthly".parse::<TickLoadAnchor>().unwrap(), TickLoadAnchor::Monthly);
        assert_eq!(
            "at_startup_sync".parse::<TickLoadStrategy>().unwrap(),
            TickLoadStrategy::AtStartupSync
        );
        assert_eq!("detailed".parse::<NotifyMode>().unwrap(), NotifyMode::Detailed);
        assert!("weekly".parse::<TickLoadAnchor>().is_err());
    }
}
