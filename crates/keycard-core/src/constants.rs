//! Hardware constants for K720-class dispensers and M100A/M600 encoders.
//!
//! This module centralizes the byte codes, driver return codes, and timing
//! budgets used across the issuer. Dispenser status bytes and error codes
//! come from the vendor driver's documented position query; timing values
//! are the operating envelope of the transport mechanism.
//!
//! # Position Status
//!
//! A position query fills four bytes, one per subsystem:
//!
//! | Index | Subsystem | Values |
//! |-------|-----------|--------|
//! | 0 | Device | `0x30` idle ... `0x36` retain failed |
//! | 1 | Transport | `0x30` overlap ... `0x34` media entering |
//! | 2 | Card box | `0x30` empty ... `0x34` full |
//! | 3 | Retain box | `0x30` not full, `0x31` full |
//!
//! # Usage
//!
//! ```
//! use keycard_core::constants::*;
//! use std::time::Duration;
//!
//! assert_eq!(TRANSPORT_MEDIA_PRESENT, 0x32);
//! let timeout = Duration::from_millis(MOVE_TIMEOUT_MS);
//! assert_eq!(timeout.as_secs(), 10);
//! ```

// ============================================================================
// Device status (position byte 0)
// ============================================================================

/// Dispenser idle and ready for a command.
pub const DEVICE_IDLE: u8 = 0x30;

/// Dispenser reports a mechanical fault.
pub const DEVICE_FAULT: u8 = 0x31;

/// Dispenser failed to prepare a card.
pub const DEVICE_READY_FAILED: u8 = 0x32;

/// Dispenser is currently moving a card out of the box.
pub const DEVICE_SENDING_CARD: u8 = 0x33;

/// Dispenser is currently retaining a card.
pub const DEVICE_RETAINING_CARD: u8 = 0x34;

/// Last send operation failed.
pub const DEVICE_SEND_CARD_FAILED: u8 = 0x35;

/// Last retain operation failed.
pub const DEVICE_RETAIN_CARD_FAILED: u8 = 0x36;

// ============================================================================
// Transport status (position byte 1)
// ============================================================================

/// Cards overlap in the transport path.
pub const TRANSPORT_OVERLAP: u8 = 0x30;

/// Transport path is jammed.
pub const TRANSPORT_JAM: u8 = 0x31;

/// Card is held at the read/write (encode) position.
pub const TRANSPORT_MEDIA_PRESENT: u8 = 0x32;

/// No card in the transport path; the guest has taken the card.
pub const TRANSPORT_MEDIA_NOT_PRESENT: u8 = 0x33;

/// Card is held at the dispensing mouth.
pub const TRANSPORT_MEDIA_ENTERING: u8 = 0x34;

// ============================================================================
// Card box status (position byte 2)
// ============================================================================

pub const CARD_BOX_EMPTY: u8 = 0x30;
pub const CARD_BOX_LOW: u8 = 0x31;
pub const CARD_BOX_SUFFICIENT: u8 = 0x32;
pub const CARD_BOX_NEARLY_FULL: u8 = 0x33;
pub const CARD_BOX_FULL: u8 = 0x34;

// ============================================================================
// Retain box status (position byte 3)
// ============================================================================

pub const RETAIN_BOX_NOT_FULL: u8 = 0x30;
pub const RETAIN_BOX_FULL: u8 = 0x31;

// ============================================================================
// Move commands
// ============================================================================

/// Move the card from the box to the encode position.
pub const MOVE_TO_ENCODE: u8 = 0x01;

/// Move the card from the encode position to the dispensing mouth.
pub const MOVE_TO_DISPENSE: u8 = 0x02;

/// Push the card out of the mouth.
pub const MOVE_EJECT: u8 = 0x03;

// ============================================================================
// Driver return codes
// ============================================================================

/// Every driver entry point returns zero on success.
pub const DRIVER_OK: i32 = 0;

/// Dispenser condition codes reported by move and retain commands.
pub const ERR_CARD_BOX_EMPTY: i32 = 0xA0;
pub const ERR_CARD_BOX_FULL: i32 = 0xA1;
pub const ERR_RETAIN_BOX_FULL: i32 = 0xA2;
pub const ERR_HAVE_CARD: i32 = 0xA3;
pub const ERR_HAVE_NO_CARD: i32 = 0xA4;
pub const ERR_MOVE_CARD_TIMEOUT: i32 = 0xA5;
pub const ERR_ENTER_CARD_TIMEOUT: i32 = 0xA6;

/// Describe a known driver return code.
///
/// Serial, USB, and dispenser condition codes are mapped to a short label
/// for log output. Unknown codes return `None` and are surfaced verbatim.
///
/// # Examples
///
/// ```
/// use keycard_core::constants::describe_driver_code;
///
/// assert_eq!(describe_driver_code(0xA4), Some("no card in transport"));
/// assert_eq!(describe_driver_code(-101), Some("port open failed"));
/// assert_eq!(describe_driver_code(42), None);
/// ```
#[must_use]
pub fn describe_driver_code(code: i32) -> Option<&'static str> {
    let label = match code {
        DRIVER_OK => "ok",
        -101 => "port open failed",
        -102 => "port not open",
        -103 => "port configuration failed",
        -104 => "port write failed",
        -105 => "port read failed",
        -106 => "port read timeout",
        -107 => "port buffer error",
        -108 => "port close failed",
        -109 => "port handle invalid",
        -110 => "port busy",
        -201 => "frame checksum error",
        -202 => "frame format error",
        -203 => "frame length error",
        -311..=-301 => "usb transfer error",
        ERR_CARD_BOX_EMPTY => "card box empty",
        ERR_CARD_BOX_FULL => "card box full",
        ERR_RETAIN_BOX_FULL => "retain box full",
        ERR_HAVE_CARD => "card already in transport",
        ERR_HAVE_NO_CARD => "no card in transport",
        ERR_MOVE_CARD_TIMEOUT => "card movement timed out",
        ERR_ENTER_CARD_TIMEOUT => "card entry timed out",
        _ => return None,
    };
    Some(label)
}

// ============================================================================
// Card layout
// ============================================================================

/// Bytes per writable card block.
pub const BLOCK_SIZE: usize = 16;

/// Bytes in a MIFARE sector key.
pub const SECTOR_KEY_LEN: usize = 6;

/// UID length of S50/S70 (MIFARE Classic) cards.
pub const CLASSIC_UID_LEN: usize = 4;

/// UID length of Ultralight cards.
pub const ULTRALIGHT_UID_LEN: usize = 7;

/// Sector written when no override is configured.
pub const DEFAULT_SECTOR: u8 = 1;

/// First block written when no override is configured.
pub const DEFAULT_START_BLOCK: u8 = 0;

/// Factory transport key.
pub const DEFAULT_SECTOR_KEY: [u8; SECTOR_KEY_LEN] = [0xFF; SECTOR_KEY_LEN];

/// Encoder bus address used when no override is configured.
pub const DEFAULT_MAC_ADDRESS: u8 = 0x01;

/// Dispenser serial baud rate used when no override is configured.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

// ============================================================================
// Timing (milliseconds)
// ============================================================================

/// Interval between two position queries.
pub const POLL_INTERVAL_MS: u64 = 200;

/// Ceiling for a card to reach the encode or dispense position.
pub const MOVE_TIMEOUT_MS: u64 = 10_000;

/// Ceiling for confirming the card sits in the encode position.
pub const WAIT_POSITION_TIMEOUT_MS: u64 = 5_000;

/// Ceiling for the guest to take the card from the mouth.
pub const EJECT_TIMEOUT_MS: u64 = 8_000;

/// Ceiling for a busy dispenser to return to idle.
pub const DEVICE_READY_TIMEOUT_MS: u64 = 15_000;

/// Pause after a card reaches position, before the next step.
pub const SETTLE_DELAY_MS: u64 = 500;

/// Pause between two block writes.
pub const INTER_BLOCK_DELAY_MS: u64 = 100;

/// Budget for a retained card to enter the transport.
pub const RETAIN_ENTER_TIMEOUT_MS: u32 = 4_000;

/// Budget for a retained card to reach the retain box.
pub const RETAIN_MOVE_TIMEOUT_MS: u32 = 4_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_exceed_poll_interval() {
        for timeout in [
            MOVE_TIMEOUT_MS,
            WAIT_POSITION_TIMEOUT_MS,
            EJECT_TIMEOUT_MS,
            DEVICE_READY_TIMEOUT_MS,
        ] {
            assert!(timeout > POLL_INTERVAL_MS);
            assert_eq!(timeout % POLL_INTERVAL_MS, 0);
        }
    }

    #[test]
    fn test_usb_codes_described() {
        for code in -311..=-301 {
            assert_eq!(describe_driver_code(code), Some("usb transfer error"));
        }
        assert_eq!(describe_driver_code(-300), None);
        assert_eq!(describe_driver_code(-312), None);
    }
}
