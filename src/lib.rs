// Core modules
pub mod api;
pub mod backfill;
pub mod backtest;
pub mod config;
pub mod discovery;
pub mod error;
pub mod execution;
pub mod features;
pub mod indicators;
pub mod inference;
pub mod models;
pub mod risk;
pub mod state;

// Re-export commonly used types
pub use error::BotError;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, BotError>;
