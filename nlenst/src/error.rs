//! Error handling module for the nlenst CLI.
//!
//! This module provides custom error types using `thiserror` for structured
//! error handling throughout the application.

use thiserror::Error;

/// Main error type for the nlenst CLI application.
///
/// This enum represents all possible errors that can occur
/// while launching profiled targets or explaining saved reports.
#[derive(Error, Debug)]
pub enum NlenstError {
    /// Error when a required configuration is missing or inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error when input validation fails.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Error when the profiled target cannot be launched.
    #[error("Launch failed: {0}")]
    Launch(String),

    /// Error when IO operations fail.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error when a saved report cannot be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using NlenstError.
pub type Result<T> = std::result::Result<T, NlenstError>;
