pub mod backfill;
pub mod history;
pub mod indicators;
pub mod pass;
pub mod pivots;
pub mod replay;
pub mod signal;
pub mod trendline;
pub mod wicks;
