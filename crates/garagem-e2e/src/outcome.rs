//! Attempt outcomes and the failure taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::driver::DriverError;

/// Classified failure kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Selector never resolved
    NotFound,
    /// Resolved but occluded or hidden
    NotVisible,
    /// Resolved, then removed from the DOM before the action completed
    Detached,
    /// Deadline exceeded on a wait
    Timeout,
    /// Driver refused the action (e.g. disabled control)
    ActionRejected,
    /// Required seed or environment state is absent
    PreconditionMissing,
    /// Expected end state was not observed
    AssertionFailed,
}

impl FailureKind {
    /// Eligible for retry by the retry controller
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::NotVisible | Self::Detached | Self::Timeout)
    }

    /// Category used to tell setup problems from regressions
    #[must_use]
    pub const fn category(self) -> FailureCategory {
        match self {
            Self::PreconditionMissing => FailureCategory::Environment,
            Self::AssertionFailed => FailureCategory::Assertion,
            Self::NotFound
            | Self::NotVisible
            | Self::Detached
            | Self::Timeout
            | Self::ActionRejected => FailureCategory::Interaction,
        }
    }

    /// Reclassify a raw driver error
    #[must_use]
    pub const fn from_driver(error: &DriverError) -> Self {
        match error {
            DriverError::Detached => Self::Detached,
            DriverError::NotVisible => Self::NotVisible,
            DriverError::Timeout { .. } | DriverError::Navigation { .. } => Self::Timeout,
            DriverError::Disabled | DriverError::Protocol { .. } | DriverError::Closed => {
                Self::ActionRejected
            }
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "NotFound",
            Self::NotVisible => "NotVisible",
            Self::Detached => "Detached",
            Self::Timeout => "Timeout",
            Self::ActionRejected => "ActionRejected",
            Self::PreconditionMissing => "PreconditionMissing",
            Self::AssertionFailed => "AssertionFailed",
        };
        f.write_str(name)
    }
}

/// Broad failure category shown in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureCategory {
    /// Setup problem: seed data, assets, variables
    Environment,
    /// The application never offered the control
    Interaction,
    /// The application showed the wrong result
    Assertion,
    /// The harness itself failed (session, panic)
    Harness,
}

impl FailureCategory {
    /// Prefix used in diagnostic messages
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Environment => "environment precondition failed",
            Self::Interaction => "interaction failed",
            Self::Assertion => "assertion failed",
            Self::Harness => "harness error",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A classified failure of one attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptFailure {
    /// Failure kind
    pub kind: FailureKind,
    /// Detail message
    pub message: String,
}

impl AttemptFailure {
    /// Create a new failure
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Reclassify a driver error
    #[must_use]
    pub fn from_driver(error: &DriverError) -> Self {
        Self::new(FailureKind::from_driver(error), error.to_string())
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result of one resolution/action attempt. Always terminal for its attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    /// Attempt succeeded
    Success,
    /// Attempt failed with a classified reason
    Failure(AttemptFailure),
}

impl AttemptOutcome {
    /// Build a failure outcome
    #[must_use]
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure(AttemptFailure::new(kind, message))
    }

    /// Check if the outcome is a success
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Failure kind, if any
    #[must_use]
    pub const fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success => None,
            Self::Failure(f) => Some(f.kind),
        }
    }

    /// Failure eligible for retry
    #[must_use]
    pub const fn is_transient_failure(&self) -> bool {
        match self {
            Self::Success => false,
            Self::Failure(f) => f.kind.is_transient(),
        }
    }
}

impl From<Result<(), AttemptFailure>> for AttemptOutcome {
    fn from(result: Result<(), AttemptFailure>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(failure) => Self::Failure(failure),
        }
    }
}
