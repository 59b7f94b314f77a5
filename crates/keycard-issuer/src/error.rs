//! Issuance error types.

use keycard_hardware::{HardwareError, RetainOutcome};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Step of the issuance flow an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssuancePhase {
    Validation,
    Open,
    StatusCheck,
    MoveToEncode,
    Detection,
    ReadId,
    Encoding,
    MoveToDispense,
    Ejection,
}

impl IssuancePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssuancePhase::Validation => "payload validation",
            IssuancePhase::Open => "device open",
            IssuancePhase::StatusCheck => "status check",
            IssuancePhase::MoveToEncode => "move to encode position",
            IssuancePhase::Detection => "card detection",
            IssuancePhase::ReadId => "card ID read",
            IssuancePhase::Encoding => "encoding",
            IssuancePhase::MoveToDispense => "move to dispense position",
            IssuancePhase::Ejection => "ejection",
        }
    }

    /// A failure in this phase may leave a card in the transport.
    pub fn retains_card(&self) -> bool {
        !matches!(self, IssuancePhase::Validation | IssuancePhase::Open)
    }
}

impl fmt::Display for IssuancePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed issuance attempt.
///
/// Wraps the hardware error that stopped the attempt with the phase it
/// happened in and, when a retain was tried, its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Card issuance failed during {phase}: {source}")]
pub struct IssuanceError {
    pub phase: IssuancePhase,
    #[source]
    pub source: HardwareError,
    pub retention: Option<RetainOutcome>,
}

impl IssuanceError {
    pub fn new(phase: IssuancePhase, source: HardwareError) -> Self {
        Self {
            phase,
            source,
            retention: None,
        }
    }

    pub fn with_retention(mut self, retention: RetainOutcome) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Raw driver code of the underlying failure, if any.
    pub fn driver_code(&self) -> Option<i32> {
        self.source.driver_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_names_phase_and_cause() {
        let err = IssuanceError::new(
            IssuancePhase::Encoding,
            HardwareError::BlockWrite { block: 1, code: -5 },
        );

        let message = err.to_string();
        assert!(message.starts_with("Card issuance failed during encoding: "));
        assert!(message.contains(&HardwareError::BlockWrite { block: 1, code: -5 }.to_string()));
        assert_eq!(err.driver_code(), Some(-5));
    }

    #[test]
    fn test_source_is_hardware_error() {
        let err = IssuanceError::new(IssuancePhase::StatusCheck, HardwareError::CardBoxEmpty);
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), HardwareError::CardBoxEmpty.to_string());
    }

    #[test]
    fn test_retaining_phases() {
        assert!(!IssuancePhase::Validation.retains_card());
        assert!(!IssuancePhase::Open.retains_card());
        assert!(IssuancePhase::StatusCheck.retains_card());
        assert!(IssuancePhase::Ejection.retains_card());
    }
}
