pub mod loader;
pub mod tick_source;
