use serde::Serialize;

/// All engine errors, categorized by domain.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    // ── Configuration ──
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid custom tick date '{0}', expected dd/MM/yyyy")]
    InvalidCustomDate(String),

    // ── Data ──
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Insufficient data: need {needed} bars, got {available}")]
    InsufficientData { needed: usize, available: usize },

    // ── Computation ──
    #[error("Computation fault: {0}")]
    ComputationFault(String),

    // ── Tick loading ──
    #[error("Tick load failed: {0}")]
    TickLoad(String),

    // ── Replay ──
    #[error("Replay cancelled")]
    ReplayCancelled,

    // ── Files ──
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read file: {0}")]
    FileRead(String),

    #[error("Failed to write file: {0}")]
    FileWrite(String),

    #[error("CSV parse error at row {row}: {message}")]
    CsvParseError { row: usize, message: String },

    // ── Serialization ──
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Serializable error response for hosts that forward errors over a wire.
#[derive(Debug, Serialize, Clone)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&EngineError> for ErrorResponse {
    fn from(err: &EngineError) -> Self {
        let code = match err {
            EngineError::InvalidConfig(_) => "INVALID_CONFIG",
            EngineError::InvalidCustomDate(_) => "INVALID_CUSTOM_DATE",
            EngineError::DataUnavailable(_) => "DATA_UNAVAILABLE",
            EngineError::InsufficientData { .. } => "INSUFFICIENT_DATA",
            EngineError::ComputationFault(_) => "COMPUTATION_FAULT",
            EngineError::TickLoad(_) => "TICK_LOAD",
            EngineError::ReplayCancelled => "REPLAY_CANCELLED",
            EngineError::FileNotFound(_) => "FILE_NOT_FOUND",
            EngineError::FileRead(_) => "FILE_READ",
            EngineError::FileWrite(_) => "FILE_WRITE",
            EngineError::CsvParseError { .. } => "CSV_PARSE_ERROR",
            EngineError::Serialization(_) => "SERIALIZATION",
        };
        ErrorResponse {
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

impl Serialize for EngineError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let response = ErrorResponse::from(self);
        response.serialize(serializer)
    }
}

// ── Conversions from external errors ──

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::FileRead(err.to_string())
    }
}

impl From<csv::Error> for EngineError {
    fn from(err: csv::Error) -> Self {
        let row = err
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(0);
        EngineError::CsvParseError {
            row,
            message: err.to_string(),
        }
    }
}
