// Core modules
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod monitoring;
pub mod regime;
pub mod risk;
pub mod signals;
pub mod strategy;

// Re-export commonly used types
pub use config::CoreConfig;
pub use error::CoreError;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, CoreError>;
