//! Shared types, error taxonomy, configuration, and path layout.

pub mod config;
pub mod error;
pub mod paths;
pub mod types;

pub use config::ResolvedConfig;
pub use error::AppError;
pub use types::{Separator, ShutdownReason, TaskStatus};
