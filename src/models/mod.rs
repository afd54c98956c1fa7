pub mod candle;
pub mod config;
pub mod intent;
pub mod signal;
