//! Result and error types for the harness.
//!
//! Step-level failures are not errors: they travel as
//! [`AttemptOutcome`](crate::outcome::AttemptOutcome) values so the runner can
//! report them. `HarnessError` covers everything around the steps: loading
//! and validating scenario files, configuration, and session acquisition.

use thiserror::Error;

use crate::driver::DriverError;

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Errors that can occur outside of step execution
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Browser executable not found
    #[error("Browser not found. Install Chromium or set CHROMIUM_PATH")]
    BrowserNotFound,

    /// Browser launch error
    #[error("Failed to launch browser: {message}")]
    BrowserLaunchError {
        /// Error message
        message: String,
    },

    /// Session could not be acquired or released
    #[error("Session error: {message}")]
    SessionError {
        /// Error message
        message: String,
    },

    /// A selector string could not be parsed
    #[error("Invalid selector '{selector}': {message}")]
    InvalidSelector {
        /// Offending selector text
        selector: String,
        /// Error message
        message: String,
    },

    /// Scenario file failed to parse
    #[error("Scenario parse error: {message}")]
    ScenarioParse {
        /// Error message
        message: String,
    },

    /// Scenario file parsed but is not runnable
    #[error("Invalid scenario '{scenario}': {message}")]
    InvalidScenario {
        /// Scenario name (or suite name for suite-level problems)
        scenario: String,
        /// Error message
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Driver failure outside step execution (launch, close)
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl HarnessError {
    /// Create an invalid scenario error
    #[must_use]
    pub fn invalid_scenario(scenario: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidScenario {
            scenario: scenario.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a session error
    #[must_use]
    pub fn session(message: impl Into<String>) -> Self {
        Self::SessionError {
            message: message.into(),
        }
    }
}
