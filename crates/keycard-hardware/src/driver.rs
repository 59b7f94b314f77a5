//! Vendor driver boundary.
//!
//! The dispenser and encoder are only reachable through blocking vendor entry
//! points with fixed positional arguments. Each entry point returns an `i32`
//! status where [`DRIVER_OK`](keycard_core::constants::DRIVER_OK) means
//! success and any other value is an opaque driver code.
//!
//! The traits in this module mirror those entry points one-to-one so that a
//! simulated driver and the vendor shared libraries can be swapped without
//! touching the transport or encoding logic.

use serde::Serialize;
use std::fmt;

/// Opaque communication handle returned by a vendor open call.
///
/// Owned by [`DeviceLinkManager`](crate::link::DeviceLinkManager); invalid
/// after the matching close call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceHandle(usize);

impl DeviceHandle {
    #[must_use]
    pub fn new(raw: usize) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn as_raw(&self) -> usize {
        self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

/// K720-class card dispenser entry points.
pub trait DispenserDriver: Send + Sync {
    /// Open the dispenser over a serial port. Returns `None` on failure.
    fn comm_open_with_baud(&self, port: &str, baud: u32) -> Option<DeviceHandle>;

    /// Open the dispenser over USB.
    fn usb_open(&self) -> Result<DeviceHandle, i32>;

    /// Close a serial handle.
    fn comm_close(&self, handle: DeviceHandle) -> i32;

    /// Close a USB handle.
    fn usb_close(&self, handle: DeviceHandle) -> i32;

    /// Fill `status` with the device, transport, card box, and retain box bytes.
    fn check_card_position(&self, handle: DeviceHandle, status: &mut [u8; 4]) -> i32;

    /// Issue a move command (encode position, dispense position, or eject).
    fn move_card(&self, handle: DeviceHandle, mode: u8) -> i32;

    /// Move the card in the transport path into the retain box.
    fn retain_to_card_box(
        &self,
        handle: DeviceHandle,
        enter_timeout_ms: u32,
        move_timeout_ms: u32,
    ) -> i32;
}

/// M100A/M600 RFID encoder entry points.
///
/// MIFARE Classic (S50/S70) entry points take a sector address; Ultralight
/// entry points address pages directly and have no key-load call. Every call
/// carries the encoder's bus address.
pub trait EncoderDriver: Send + Sync {
    /// Open the encoder port. Returns `None` on failure.
    fn comm_open(&self, port: &str) -> Option<DeviceHandle>;

    fn comm_close(&self, handle: DeviceHandle) -> i32;

    fn s50_detect_card(&self, handle: DeviceHandle, mac: u8) -> i32;
    fn s50_get_card_id(&self, handle: DeviceHandle, mac: u8, uid: &mut Vec<u8>) -> i32;
    fn s50_load_sec_key(
        &self,
        handle: DeviceHandle,
        mac: u8,
        sector: u8,
        key_type: u8,
        key: &[u8; 6],
    ) -> i32;
    fn s50_write_block(
        &self,
        handle: DeviceHandle,
        mac: u8,
        sector: u8,
        block: u8,
        data: &[u8; 16],
    ) -> i32;
    fn s50_halt(&self, handle: DeviceHandle, mac: u8) -> i32;

    fn s70_detect_card(&self, handle: DeviceHandle, mac: u8) -> i32;
    fn s70_get_card_id(&self, handle: DeviceHandle, mac: u8, uid: &mut Vec<u8>) -> i32;
    fn s70_load_sec_key(
        &self,
        handle: DeviceHandle,
        mac: u8,
        sector: u8,
        key_type: u8,
        key: &[u8; 6],
    ) -> i32;
    fn s70_write_block(
        &self,
        handle: DeviceHandle,
        mac: u8,
        sector: u8,
        block: u8,
        data: &[u8; 16],
    ) -> i32;
    fn s70_halt(&self, handle: DeviceHandle, mac: u8) -> i32;

    fn ul_detect_card(&self, handle: DeviceHandle, mac: u8) -> i32;
    fn ul_get_card_id(&self, handle: DeviceHandle, mac: u8, uid: &mut Vec<u8>) -> i32;
    fn ul_write_block(&self, handle: DeviceHandle, mac: u8, block: u8, data: &[u8; 16]) -> i32;
    fn ul_halt(&self, handle: DeviceHandle, mac: u8) -> i32;
}
