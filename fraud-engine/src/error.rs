//! Error types for the fraud engine

use crate::alerts::AlertStatus;
use thiserror::Error;
use uuid::Uuid;

/// Fraud engine error
#[derive(Debug, Error)]
pub enum Error {
    /// Transaction context is missing or has malformed required fields
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A collaborator lookup failed or missed its deadline
    #[error("Collaborator unavailable ({collaborator}): {reason}")]
    CollaboratorUnavailable {
        /// Collaborator name
        collaborator: &'static str,
        /// Failure detail
        reason: String,
    },

    /// Rule condition could not be evaluated
    #[error("Rule {rule_id} evaluation failed: {reason}")]
    RuleEvaluation {
        /// Rule identifier
        rule_id: String,
        /// Failure detail
        reason: String,
    },

    /// Invalid configuration, pattern or rule definition
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Alert not found
    #[error("Alert not found: {0}")]
    AlertNotFound(Uuid),

    /// Alert lifecycle violation
    #[error("Alert {id} cannot move from {from:?} to {to:?}")]
    InvalidAlertTransition {
        /// Alert identifier
        id: Uuid,
        /// Current status
        from: AlertStatus,
        /// Requested status
        to: AlertStatus,
    },

    /// Pattern not found
    #[error("Pattern not found: {0}")]
    PatternNotFound(String),

    /// Rule not found
    #[error("Rule not found: {0}")]
    RuleNotFound(String),

    /// Device not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a collaborator failure
    pub fn unavailable(collaborator: &'static str, reason: impl Into<String>) -> Self {
        Error::CollaboratorUnavailable {
            collaborator,
            reason: reason.into(),
        }
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
