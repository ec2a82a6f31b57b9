//! Shared types, config, and error definitions for the weather dashboard.

pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{Error, FailureClass, FetchFailure};
pub use types::*;
