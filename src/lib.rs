pub mod assistant;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod llm;
pub mod market;
pub mod news;
pub mod prefilter;
pub mod telegram_log;
