//! Enum wrappers for driver dispatch.
//!
//! The link manager, transport controller, and encoder are written against a
//! single concrete driver type per device. These enums provide that type and
//! dispatch to the simulated driver or, with the `vendor-sdk` feature, to the
//! vendor shared libraries.
//!
//! # Examples
//!
//! ```
//! use keycard_hardware::devices::AnyDispenser;
//! use keycard_hardware::driver::DispenserDriver;
//! use keycard_hardware::mock::SimulatedDispenser;
//!
//! let (dispenser, _handle) = SimulatedDispenser::new();
//! let dispenser = AnyDispenser::Simulated(dispenser);
//! assert!(dispenser.comm_open_with_baud("COM3", 9600).is_some());
//! ```

use crate::driver::{DeviceHandle, DispenserDriver, EncoderDriver};
use crate::mock::{SimulatedDispenser, SimulatedEncoder};
#[cfg(feature = "vendor-sdk")]
use crate::vendor::{EncoderLibrary, K720Library};

macro_rules! dispatch {
    ($self:ident, $driver:ident => $call:expr) => {
        match $self {
            Self::Simulated($driver) => $call,
            #[cfg(feature = "vendor-sdk")]
            Self::Vendor($driver) => $call,
        }
    };
}

/// Enum wrapper for dispenser driver dispatch.
#[derive(Debug)]
pub enum AnyDispenser {
    Simulated(SimulatedDispenser),
    #[cfg(feature = "vendor-sdk")]
    Vendor(K720Library),
}

impl DispenserDriver for AnyDispenser {
    fn comm_open_with_baud(&self, port: &str, baud: u32) -> Option<DeviceHandle> {
        dispatch!(self, d => d.comm_open_with_baud(port, baud))
    }

    fn usb_open(&self) -> Result<DeviceHandle, i32> {
        dispatch!(self, d => d.usb_open())
    }

    fn comm_close(&self, handle: DeviceHandle) -> i32 {
        dispatch!(self, d => d.comm_close(handle))
    }

    fn usb_close(&self, handle: DeviceHandle) -> i32 {
        dispatch!(self, d => d.usb_close(handle))
    }

    fn check_card_position(&self, handle: DeviceHandle, status: &mut [u8; 4]) -> i32 {
        dispatch!(self, d => d.check_card_position(handle, status))
    }

    fn move_card(&self, handle: DeviceHandle, mode: u8) -> i32 {
        dispatch!(self, d => d.move_card(handle, mode))
    }

    fn retain_to_card_box(
        &self,
        handle: DeviceHandle,
        enter_timeout_ms: u32,
        move_timeout_ms: u32,
    ) -> i32 {
        dispatch!(self, d => d.retain_to_card_box(handle, enter_timeout_ms, move_timeout_ms))
    }
}

/// Enum wrapper for encoder driver dispatch.
#[derive(Debug)]
pub enum AnyEncoder {
    Simulated(SimulatedEncoder),
    #[cfg(feature = "vendor-sdk")]
    Vendor(EncoderLibrary),
}

impl EncoderDriver for AnyEncoder {
    fn comm_open(&self, port: &str) -> Option<DeviceHandle> {
        dispatch!(self, e => e.comm_open(port))
    }

    fn comm_close(&self, handle: DeviceHandle) -> i32 {
        dispatch!(self, e => e.comm_close(handle))
    }

    fn s50_detect_card(&self, handle: DeviceHandle, mac: u8) -> i32 {
        dispatch!(self, e => e.s50_detect_card(handle, mac))
    }

    fn s50_get_card_id(&self, handle: DeviceHandle, mac: u8, uid: &mut Vec<u8>) -> i32 {
        dispatch!(self, e => e.s50_get_card_id(handle, mac, uid))
    }

    fn s50_load_sec_key(
        &self,
        handle: DeviceHandle,
        mac: u8,
        sector: u8,
        key_type: u8,
        key: &[u8; 6],
    ) -> i32 {
        dispatch!(self, e => e.s50_load_sec_key(handle, mac, sector, key_type, key))
    }

    fn s50_write_block(
        &self,
        handle: DeviceHandle,
        mac: u8,
        sector: u8,
        block: u8,
        data: &[u8; 16],
    ) -> i32 {
        dispatch!(self, e => e.s50_write_block(handle, mac, sector, block, data))
    }

    fn s50_halt(&self, handle: DeviceHandle, mac: u8) -> i32 {
        dispatch!(self, e => e.s50_halt(handle, mac))
    }

    fn s70_detect_card(&self, handle: DeviceHandle, mac: u8) -> i32 {
        dispatch!(self, e => e.s70_detect_card(handle, mac))
    }

    fn s70_get_card_id(&self, handle: DeviceHandle, mac: u8, uid: &mut Vec<u8>) -> i32 {
        dispatch!(self, e => e.s70_get_card_id(handle, mac, uid))
    }

    fn s70_load_sec_key(
        &self,
        handle: DeviceHandle,
        mac: u8,
        sector: u8,
        key_type: u8,
        key: &[u8; 6],
    ) -> i32 {
        dispatch!(self, e => e.s70_load_sec_key(handle, mac, sector, key_type, key))
    }

    fn s70_write_block(
        &self,
        handle: DeviceHandle,
        mac: u8,
        sector: u8,
        block: u8,
        data: &[u8; 16],
    ) -> i32 {
        dispatch!(self, e => e.s70_write_block(handle, mac, sector, block, data))
    }

    fn s70_halt(&self, handle: DeviceHandle, mac: u8) -> i32 {
        dispatch!(self, e => e.s70_halt(handle, mac))
    }

    fn ul_detect_card(&self, handle: DeviceHandle, mac: u8) -> i32 {
        dispatch!(self, e => e.ul_detect_card(handle, mac))
    }

    fn ul_get_card_id(&self, handle: DeviceHandle, mac: u8, uid: &mut Vec<u8>) -> i32 {
        dispatch!(self, e => e.ul_get_card_id(handle, mac, uid))
    }

    fn ul_write_block(&self, handle: DeviceHandle, mac: u8, block: u8, data: &[u8; 16]) -> i32 {
        dispatch!(self, e => e.ul_write_block(handle, mac, block, data))
    }

    fn ul_halt(&self, handle: DeviceHandle, mac: u8) -> i32 {
        dispatch!(self, e => e.ul_halt(handle, mac))
    }
}
