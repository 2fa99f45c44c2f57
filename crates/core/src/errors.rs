use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{domain::requirement::MIN_BUDGET, flows::FlowTransitionError};

/// Classified failure outcomes. Raw oracle error text never reaches the user;
/// it is mapped to one of these first and the fixed message is shown instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    OracleUnavailable,
    OracleTimeout,
    SchemaValidationFailed,
    ModerationFlagged,
    NoMatchingCandidates,
    BudgetBelowMinimum,
}

pub const MODERATION_POLICY_MESSAGE: &str = "Your message was flagged for violating our content \
policy. The conversation has been reset for your safety.";

pub const NO_MATCH_ESCALATION_MESSAGE: &str = "Sorry, we do not have laptops that match your \
requirements. Connecting you to a human expert. Please end this conversation.";

pub const ORACLE_UNAVAILABLE_MESSAGE: &str =
    "I'm having trouble reaching the assistant service right now. Please try again in a moment.";

pub const ORACLE_TIMEOUT_MESSAGE: &str =
    "That took longer than expected. Please send your message again.";

impl FailureKind {
    pub fn is_transient(self) -> bool {
        matches!(self, Self::OracleUnavailable | Self::OracleTimeout)
    }

    /// Fixed user-facing text, or `None` when the failure is recovered silently.
    pub fn user_message(self) -> Option<String> {
        match self {
            Self::OracleUnavailable => Some(ORACLE_UNAVAILABLE_MESSAGE.to_string()),
            Self::OracleTimeout => Some(ORACLE_TIMEOUT_MESSAGE.to_string()),
            Self::SchemaValidationFailed => None,
            Self::ModerationFlagged => Some(MODERATION_POLICY_MESSAGE.to_string()),
            Self::NoMatchingCandidates => Some(NO_MATCH_ESCALATION_MESSAGE.to_string()),
            Self::BudgetBelowMinimum => Some(format!(
                "Our catalog has no laptops below a budget of {MIN_BUDGET}. \
                 Could you share a budget of at least {MIN_BUDGET}?"
            )),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("unknown session `{0}`")]
    UnknownSession(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "That conversation no longer exists. Please start a new one.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(DomainError::FlowTransition(_))
            | ApplicationError::Domain(DomainError::InvariantViolation(_)) => Self::BadRequest {
                message: "domain validation failed".to_owned(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::UnknownSession(session_id) => Self::NotFound {
                message: format!("session `{session_id}` not found"),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}
