use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // Payload errors
    #[error("Payload is empty")]
    EmptyPayload,

    #[error("Payload is not valid hex: {0}")]
    InvalidHex(String),

    // Key errors
    #[error("Invalid sector key: {0}")]
    InvalidKey(String),

    #[error("Invalid key type: {0}")]
    InvalidKeyType(String),

    // Card errors
    #[error("Unknown chip family: {0}")]
    UnknownChipFamily(String),

    #[error("{family} UID must be {expected} bytes, got {actual}")]
    UidLength {
        family: String,
        expected: usize,
        actual: usize,
    },

    // State errors
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },
}

pub type Result<T> = std::result::Result<T, Error>;
