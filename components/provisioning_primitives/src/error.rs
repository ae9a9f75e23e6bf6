//! Structured provisioning error.
//!
//! Every failure raised by a step, the executor adapter, the lock
//! coordinator or the ledger is a `ProvisioningError`. Callers branch on
//! [`ErrorKind`] instead of matching message text.

use crate::names::StepName;
use std::fmt;
use thiserror::Error;

/// Failure taxonomy of the provisioning engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or inconsistent configuration. Raised before remote mutation.
    Configuration,
    /// Target state is not what the step requires (VM exists, hardware alerts).
    PreconditionFailure,
    /// The external provisioning tool reported non-success.
    ExternalToolFailure,
    /// The cluster lock could not be acquired in time.
    LockContention,
    /// The persisted ledger document could not be read.
    PersistedStateCorruption,
}

impl ErrorKind {
    /// Default numeric classification reported with the error.
    pub fn default_code(&self) -> u32 {
        match self {
            ErrorKind::Configuration => 0x0781,
            ErrorKind::PreconditionFailure => 0x0410,
            ErrorKind::ExternalToolFailure => 0x0411,
            ErrorKind::LockContention => 0x0806,
            ErrorKind::PersistedStateCorruption => 0x0651,
        }
    }

    fn default_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::ExternalToolFailure | ErrorKind::LockContention
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "configuration error",
            ErrorKind::PreconditionFailure => "precondition failure",
            ErrorKind::ExternalToolFailure => "external tool failure",
            ErrorKind::LockContention => "lock contention",
            ErrorKind::PersistedStateCorruption => "persisted state corruption",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} [{code:#06x}]{}: {message}", step_suffix(.step))]
pub struct ProvisioningError {
    kind: ErrorKind,
    code: u32,
    message: String,
    step: Option<StepName>,
    retryable: bool,
    suggestion: Option<String>,
}

fn step_suffix(step: &Option<StepName>) -> String {
    step.as_ref()
        .map(|s| format!(" in {s}"))
        .unwrap_or_default()
}

impl ProvisioningError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.default_code(),
            message: message.into(),
            step: None,
            retryable: kind.default_retryable(),
            suggestion: None,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PreconditionFailure, message)
    }

    pub fn external_tool(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalToolFailure, message)
    }

    pub fn lock_contention(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LockContention, message)
    }

    pub fn corrupt_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PersistedStateCorruption, message)
    }

    /// Unknown step name requested for the selected pipeline.
    pub fn unknown_step(step: &StepName) -> Self {
        Self::configuration(format!("invalid step {step}"))
            .with_step(step.clone())
            .with_suggestion("check the requested step list against the selected pipeline")
    }

    pub fn with_step(mut self, step: StepName) -> Self {
        self.step = Some(step);
        self
    }

    /// Attach the step only when none is recorded yet.
    pub fn in_step(mut self, step: &StepName) -> Self {
        if self.step.is_none() {
            self.step = Some(step.clone());
        }
        self
    }

    pub fn with_code(mut self, code: u32) -> Self {
        self.code = code;
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn step(&self) -> Option<&StepName> {
        self.step.as_ref()
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn suggestion(&self) -> Option<&str> {
        self.suggestion.as_deref()
    }
}

pub type Result<T> = std::result::Result<T, ProvisioningError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn display_includes_kind_code_and_step() {
        let err = ProvisioningError::external_tool("OEDA step 2 failed")
            .with_step(StepName::from("ESTP_CREATE_VM"));
        assert_eq!(
            err.to_string(),
            "external tool failure [0x0411] in ESTP_CREATE_VM: OEDA step 2 failed"
        );
    }

    #[test]
    fn display_without_step() {
        let err = ProvisioningError::configuration("missing uid");
        assert_eq!(err.to_string(), "configuration error [0x0781]: missing uid");
    }

    #[test]
    fn in_step_does_not_overwrite_existing_step() {
        let err = ProvisioningError::precondition("VMs already existing")
            .with_step(StepName::from("ESTP_PREVM_CHECKS"))
            .in_step(&StepName::from("ESTP_CREATE_VM"));
        assert_eq!(err.step().unwrap(), "ESTP_PREVM_CHECKS");
    }

    #[rstest]
    #[case(ErrorKind::Configuration, false)]
    #[case(ErrorKind::PreconditionFailure, false)]
    #[case(ErrorKind::ExternalToolFailure, true)]
    #[case(ErrorKind::LockContention, true)]
    #[case(ErrorKind::PersistedStateCorruption, false)]
    fn retryable_defaults_follow_kind(#[case] kind: ErrorKind, #[case] retryable: bool) {
        assert_eq!(ProvisioningError::new(kind, "x").is_retryable(), retryable);
    }

    #[test]
    fn unknown_step_carries_suggestion() {
        let err = ProvisioningError::unknown_step(&StepName::from("ESTP_NOPE"));
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.suggestion().is_some());
        assert_eq!(err.step().unwrap(), "ESTP_NOPE");
    }
}
