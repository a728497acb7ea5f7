//! Error taxonomy of the reconciler.

use std::fmt;

/// Boxed transport failure carried inside [`ReconcileError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The transport call an [`ReconcileError::Apply`] was attempting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Create => f.write_str("create"),
            ActionKind::Update => f.write_str("update"),
            ActionKind::Delete => f.write_str("delete"),
        }
    }
}

/// Sub-step of a replacement. A failure tagged `Create` means the old
/// resource is already gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceStep {
    Delete,
    Create,
}

impl fmt::Display for ReplaceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplaceStep::Delete => f.write_str("delete"),
            ReplaceStep::Create => f.write_str("create"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Unknown field '{field}' for resource kind '{kind}'")]
    UnknownField { kind: String, field: String },

    #[error("Invalid value for field '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("Cannot {action} without a resource id")]
    MissingId { action: ActionKind },

    #[error("Reading remote state failed after {attempts} attempt(s): {source}")]
    Read {
        attempts: u32,
        #[source]
        source: BoxError,
    },

    #[error("{action} failed after {attempts} attempt(s): {source}")]
    Apply {
        action: ActionKind,
        attempts: u32,
        #[source]
        source: BoxError,
    },

    #[error("Replacement failed at the {step} step after {attempts} attempt(s): {source}")]
    Replacement {
        step: ReplaceStep,
        attempts: u32,
        #[source]
        source: BoxError,
    },
}

impl ReconcileError {
    pub(crate) fn validation(field: &str, message: impl Into<String>) -> Self {
        ReconcileError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// True when a replacement deleted the old resource but did not create
    /// the new one.
    pub fn is_partial_replacement(&self) -> bool {
        matches!(
            self,
            ReconcileError::Replacement {
                step: ReplaceStep::Create,
                ..
            }
        )
    }
}
