//! Error types for schedule reconciliation.
//!
//! Errors are categorized by the phase that produced them so callers can
//! tell configuration mistakes (fatal before any remote call) apart from
//! remote failures and partially applied changes.

use std::path::PathBuf;
use thiserror::Error;

/// Categories of errors, ordered roughly by when they can occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The configuration could not be read, templated or parsed
    Config,
    /// A rule failed validation (schedule, env, external refs, task definition)
    Validation,
    /// The remote platform rejected a call or could not be reached
    Remote,
    /// Some mutating calls succeeded before a later one failed
    Partial,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether errors of this category are raised before any remote call.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Config | Self::Validation)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Config => "Invalid configuration",
            Self::Validation => "Rule validation failed",
            Self::Remote => "Remote API error",
            Self::Partial => "Changes partially applied",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Config => "Fix the configuration file and run again",
            Self::Validation => "Define the missing values or fix the rule, then run again",
            Self::Remote => "Check credentials, region and permissions",
            Self::Partial => "Run apply again to converge the rule",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors that can occur while loading, validating or reconciling rules.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file could not be found
    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    /// Configuration could not be parsed
    #[error("failed to parse config: {message}")]
    ConfigParse {
        /// Parser diagnostic
        message: String,
    },

    /// Template syntax or evaluation failure
    #[error("template error: {message}")]
    Template {
        /// What went wrong while rendering
        message: String,
    },

    /// One or more schedule expressions are invalid (one line per rule)
    #[error("invalid schedule expressions:\n{0}")]
    CronSyntax(String),

    /// Deferred environment variables were never defined
    #[error("{0}")]
    UnresolvedEnv(String),

    /// Deferred external lookups were never resolved
    #[error("{0}")]
    UnresolvedReference(String),

    /// The task definition referenced by a rule does not exist
    #[error("task definition not found: {task_definition}")]
    TaskDefinitionNotFound {
        /// Task definition ARN that was looked up
        task_definition: String,
    },

    /// No rule with the given name in the config
    #[error("no rules found for {0}")]
    RuleNotFound(String),

    /// Plugin construction or setup failure
    #[error("plugin error: {message}")]
    Plugin {
        /// Plugin diagnostic
        message: String,
    },

    /// A remote API call failed
    #[error("{operation} failed: {message}")]
    Api {
        /// Remote operation name, e.g. `events put-rule`
        operation: String,
        /// Error text returned by the remote side
        message: String,
    },

    /// A mutating call failed after earlier calls for the same rule succeeded
    #[error("rule {rule} partially applied: {step} failed: {source}")]
    PartialApply {
        /// Rule being applied
        rule: String,
        /// Step that failed
        step: String,
        /// Underlying failure
        source: Box<Error>,
    },

    /// Running a task reported failures
    #[error("failed to run task. Arn: {arn:?}: {reason}")]
    RunTask {
        /// ARN reported by the failure
        arn: String,
        /// Reason reported by the failure
        reason: String,
    },

    /// A remote target carries an `Input` payload that cannot be decoded
    #[error("rule {rule} has an undecodable target input: {message}")]
    InvalidTargetInput {
        /// Rule whose target is corrupt
        rule: String,
        /// Decoder diagnostic
        message: String,
    },

    /// HTTP request failed
    #[error("HTTP error: {message}")]
    Http {
        /// Error description
        message: String,
        /// HTTP status code, when the server answered
        status: Option<u16>,
    },

    /// External command execution failed
    #[error("command failed: {message}")]
    CommandFailed {
        /// Description of what command failed
        message: String,
        /// Standard error output from the failed command
        stderr: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::ConfigNotFound(_)
            | Error::ConfigParse { .. }
            | Error::Template { .. }
            | Error::CronSyntax(_)
            | Error::Plugin { .. }
            | Error::Yaml(_) => ErrorCategory::Config,
            Error::UnresolvedEnv(_)
            | Error::UnresolvedReference(_)
            | Error::TaskDefinitionNotFound { .. }
            | Error::RuleNotFound(_) => ErrorCategory::Validation,
            Error::Api { .. }
            | Error::RunTask { .. }
            | Error::Http { .. }
            | Error::InvalidTargetInput { .. } => ErrorCategory::Remote,
            Error::PartialApply { .. } => ErrorCategory::Partial,
            _ => ErrorCategory::Other,
        }
    }

    /// Shorthand for a remote API failure.
    pub fn api(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Api {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a plugin failure.
    pub fn plugin(message: impl Into<String>) -> Self {
        Error::Plugin {
            message: message.into(),
        }
    }

    /// Shorthand for a template failure.
    pub fn template(message: impl Into<String>) -> Self {
        Error::Template {
            message: message.into(),
        }
    }
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(code) => Self::Http {
                message: format!("HTTP {code}"),
                status: Some(code),
            },
            other => Self::Http {
                message: other.to_string(),
                status: None,
            },
        }
    }
}

/// Result type for schedule operations.
pub type Result<T> = std::result::Result<T, Error>;
