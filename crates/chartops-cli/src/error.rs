//! CLI error types with exit code handling
//!
//! Library errors are folded into a handful of user-facing categories, each
//! with its own exit code, so scripts can tell a timeout from a rejection.

use chartops_kube::ChartError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {message}")]
    #[diagnostic(code(chartops::cli::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Invalid combination of arguments
    #[error("{message}")]
    #[diagnostic(code(chartops::cli::usage))]
    Usage {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// The cluster rejected a request or reported a failed transition
    #[error("{message}")]
    #[diagnostic(code(chartops::cli::cluster))]
    Cluster { message: String },

    /// A transition was never confirmed
    #[error("{message}")]
    #[diagnostic(
        code(chartops::cli::timeout),
        help("raise the wait budget with --timeout or in the waits section of the config")
    )]
    Timeout { message: String },

    /// Teardown left resources behind
    #[error("Cleanup failed: {message}")]
    #[diagnostic(code(chartops::cli::cleanup))]
    Cleanup { message: String },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(chartops::cli::io))]
    Io { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config { .. } => exit_codes::CONFIG_ERROR,
            CliError::Usage { .. } => exit_codes::USAGE_ERROR,
            CliError::Cluster { .. } => exit_codes::CLUSTER_ERROR,
            CliError::Timeout { .. } => exit_codes::TIMEOUT,
            CliError::Cleanup { .. } => exit_codes::CLEANUP_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
        }
    }

    /// Create a configuration error with help text
    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    /// Create a usage error
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
            help: None,
        }
    }

    /// Create a usage error with help text
    pub fn usage_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
            help: Some(help.into()),
        }
    }
}

impl From<ChartError> for CliError {
    fn from(err: ChartError) -> Self {
        let message = err.to_string();
        match err {
            ChartError::Timeout { .. } => CliError::Timeout { message },
            ChartError::InvalidConfig(_) | ChartError::Serialization(_) => CliError::Config {
                message,
                help: None,
            },
            ChartError::Cleanup { .. } => CliError::Cleanup { message },
            ChartError::Io(_) => CliError::Io { message },
            _ => CliError::Cluster { message },
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
