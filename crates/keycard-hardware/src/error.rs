//! Error types for hardware operations.
//!
//! This module defines the failures that can occur while driving the card
//! dispenser and the RFID encoder. Variants that originate from a vendor call
//! keep the driver's return code so it can be surfaced verbatim.

use keycard_core::ChipFamily;

/// Result type alias for hardware operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors that can occur during hardware device operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HardwareError {
    /// A device handle could not be acquired.
    #[error("Failed to open {device} on {port}{}", fmt_code(.code))]
    DeviceOpen {
        device: String,
        port: String,
        code: Option<i32>,
    },

    /// An operation needed a handle that is not open.
    #[error("Device not open: {device}")]
    NotOpen { device: String },

    /// The position query itself failed.
    #[error("Failed to check card position: {code}")]
    StatusQuery { code: i32 },

    /// The blank card box is empty.
    #[error("Card box is empty - cannot dispense card")]
    CardBoxEmpty,

    /// The retain box cannot accept another card.
    #[error("Retain box is full - cannot process cards")]
    RetainBoxFull,

    /// The dispenser rejected a move command.
    #[error("Move command 0x{mode:02X} failed: {code}")]
    MoveCommand { mode: u8, code: i32 },

    /// The expected status was not observed within the time budget.
    #[error(
        "Timeout waiting for {subject} status 0x{expected:02X} after {timeout_ms}ms{}",
        fmt_last(.last)
    )]
    PositionTimeout {
        subject: &'static str,
        expected: u8,
        last: Option<u8>,
        timeout_ms: u64,
    },

    /// No chip family answered the detection probes.
    #[error("No supported card detected (probes: {})", fmt_probes(.probes))]
    CardDetection { probes: Vec<(ChipFamily, i32)> },

    /// The UID could not be read or has the wrong length.
    #[error("Failed to read {family} card ID: {message}")]
    CardId {
        family: ChipFamily,
        code: Option<i32>,
        message: String,
    },

    /// The encoder rejected the sector key.
    #[error("Failed to load key for sector {sector}: {code}")]
    Authentication { sector: u8, code: i32 },

    /// A block write was rejected.
    #[error("Failed to write block {block}: {code}")]
    BlockWrite { block: u8, code: i32 },

    /// The payload does not fit in the addressable blocks.
    #[error("Payload of {blocks} blocks does not fit from block {start_block}")]
    PayloadTooLarge { blocks: usize, start_block: u8 },

    /// The payload could not be decoded.
    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] keycard_core::Error),

    /// Driver library initialization failed.
    #[error("Initialization failed: {message}")]
    InitializationFailed { message: String },
}

fn fmt_code(code: &Option<i32>) -> String {
    code.map(|c| format!(": {c}")).unwrap_or_default()
}

fn fmt_last(last: &Option<u8>) -> String {
    last.map(|l| format!(" (last 0x{l:02X})")).unwrap_or_default()
}

fn fmt_probes(probes: &[(ChipFamily, i32)]) -> String {
    probes
        .iter()
        .map(|(family, code)| format!("{family}={code}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl HardwareError {
    /// Create a new device open error.
    pub fn device_open(device: impl Into<String>, port: impl Into<String>, code: Option<i32>) -> Self {
        Self::DeviceOpen {
            device: device.into(),
            port: port.into(),
            code,
        }
    }

    /// Create a new not open error.
    pub fn not_open(device: impl Into<String>) -> Self {
        Self::NotOpen {
            device: device.into(),
        }
    }

    /// Create a new position timeout error for the transport path.
    pub fn position_timeout(expected: u8, last: Option<u8>, timeout_ms: u64) -> Self {
        Self::PositionTimeout {
            subject: "transport",
            expected,
            last,
            timeout_ms,
        }
    }

    /// Create a new card ID error carrying a driver code.
    pub fn card_id_read(family: ChipFamily, code: i32) -> Self {
        Self::CardId {
            family,
            code: Some(code),
            message: format!("driver returned {code}"),
        }
    }

    /// Create a new card ID error for a UID of the wrong length.
    pub fn card_id_length(family: ChipFamily, actual: usize) -> Self {
        Self::CardId {
            family,
            code: None,
            message: format!("expected {} bytes, got {actual}", family.uid_len()),
        }
    }

    /// Create a new initialization failed error.
    pub fn initialization_failed(message: impl Into<String>) -> Self {
        Self::InitializationFailed {
            message: message.into(),
        }
    }

    /// Vendor driver return code behind this error, if any.
    #[must_use]
    pub fn driver_code(&self) -> Option<i32> {
        match self {
            Self::DeviceOpen { code, .. } | Self::CardId { code, .. } => *code,
            Self::StatusQuery { code }
            | Self::MoveCommand { code, .. }
            | Self::Authentication { code, .. }
            | Self::BlockWrite { code, .. } => Some(*code),
            Self::CardDetection { probes } => probes.last().map(|(_, code)| *code),
            _ => None,
        }
    }
}
