//! Device link manager.
//!
//! Owns the dispenser and encoder drivers together with their communication
//! handles. At most one handle per device is live at a time; handles are
//! released by [`DeviceLinkManager::close_all`] or, as a last resort, when the
//! manager is dropped.

use crate::devices::{AnyDispenser, AnyEncoder};
use crate::driver::{DeviceHandle, DispenserDriver, EncoderDriver};
use crate::error::{HardwareError, Result};
use keycard_core::constants::{DEFAULT_BAUD_RATE, DEFAULT_MAC_ADDRESS, DRIVER_OK};
use serde::Serialize;
use tracing::{debug, info, warn};

const DISPENSER: &str = "dispenser";
const ENCODER: &str = "encoder";

/// Ports and addressing for both devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    pub dispenser_port: String,
    pub dispenser_baud: u32,
    pub encoder_port: String,
    pub mac_address: u8,
}

impl LinkConfig {
    /// Platform default dispenser port.
    pub fn default_dispenser_port() -> &'static str {
        if cfg!(windows) { "COM3" } else { "/dev/ttyUSB0" }
    }

    /// Platform default encoder port.
    pub fn default_encoder_port() -> &'static str {
        if cfg!(windows) { "COM4" } else { "/dev/ttyUSB1" }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            dispenser_port: Self::default_dispenser_port().to_string(),
            dispenser_baud: DEFAULT_BAUD_RATE,
            encoder_port: Self::default_encoder_port().to_string(),
            mac_address: DEFAULT_MAC_ADDRESS,
        }
    }
}

/// How the dispenser handle was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Serial,
    Usb,
}

impl LinkKind {
    /// Port identifiers starting with `USB` (any case) use USB. Everything
    /// else, including `/dev/tty*` device paths, is a serial port.
    pub fn for_port(port: &str) -> Self {
        let upper = port.trim().to_ascii_uppercase();
        if upper.starts_with("USB") {
            LinkKind::Usb
        } else {
            LinkKind::Serial
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct DispenserLink {
    handle: DeviceHandle,
    kind: LinkKind,
}

/// Result of closing one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "code")]
pub enum CloseOutcome {
    NotOpen,
    Closed,
    Failed(i32),
}

/// Result of [`DeviceLinkManager::close_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CloseReport {
    pub dispenser: CloseOutcome,
    pub encoder: CloseOutcome,
}

/// Owns both device drivers and their handles.
///
/// # Examples
///
/// ```
/// use keycard_hardware::devices::{AnyDispenser, AnyEncoder};
/// use keycard_hardware::link::{CloseOutcome, DeviceLinkManager, LinkConfig};
/// use keycard_hardware::mock::{SimulatedDispenser, SimulatedEncoder};
///
/// let (dispenser, _) = SimulatedDispenser::new();
/// let (encoder, _) = SimulatedEncoder::new();
/// let mut links = DeviceLinkManager::new(
///     AnyDispenser::Simulated(dispenser),
///     AnyEncoder::Simulated(encoder),
///     LinkConfig::default(),
/// );
///
/// links.open().unwrap();
/// let report = links.close_all();
/// assert_eq!(report.dispenser, CloseOutcome::Closed);
/// assert_eq!(report.encoder, CloseOutcome::Closed);
/// ```
#[derive(Debug)]
pub struct DeviceLinkManager {
    dispenser: AnyDispenser,
    encoder: AnyEncoder,
    config: LinkConfig,
    dispenser_link: Option<DispenserLink>,
    encoder_handle: Option<DeviceHandle>,
}

impl DeviceLinkManager {
    pub fn new(dispenser: AnyDispenser, encoder: AnyEncoder, config: LinkConfig) -> Self {
        Self {
            dispenser,
            encoder,
            config,
            dispenser_link: None,
            encoder_handle: None,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn dispenser(&self) -> &AnyDispenser {
        &self.dispenser
    }

    pub fn encoder(&self) -> &AnyEncoder {
        &self.encoder
    }

    /// Open both devices.
    ///
    /// A device that is already open keeps its handle. If the encoder fails
    /// to open, the dispenser stays open until [`close_all`](Self::close_all).
    ///
    /// # Errors
    /// Returns `HardwareError::DeviceOpen` naming the device and port.
    pub fn open(&mut self) -> Result<()> {
        self.open_dispenser()?;
        self.open_encoder()?;
        Ok(())
    }

    fn open_dispenser(&mut self) -> Result<DeviceHandle> {
        if let Some(link) = self.dispenser_link {
            warn!(handle = %link.handle, "Dispenser already open");
            return Ok(link.handle);
        }

        let port = self.config.dispenser_port.as_str();
        let kind = LinkKind::for_port(port);
        let handle = match kind {
            LinkKind::Usb => self
                .dispenser
                .usb_open()
                .map_err(|code| HardwareError::device_open(DISPENSER, port, Some(code)))?,
            LinkKind::Serial => self
                .dispenser
                .comm_open_with_baud(port, self.config.dispenser_baud)
                .ok_or_else(|| HardwareError::device_open(DISPENSER, port, None))?,
        };

        info!(port, baud = self.config.dispenser_baud, ?kind, "Dispenser opened");
        self.dispenser_link = Some(DispenserLink { handle, kind });
        Ok(handle)
    }

    fn open_encoder(&mut self) -> Result<DeviceHandle> {
        if let Some(handle) = self.encoder_handle {
            warn!(%handle, "Encoder already open");
            return Ok(handle);
        }

        let port = self.config.encoder_port.as_str();
        let handle = self
            .encoder
            .comm_open(port)
            .ok_or_else(|| HardwareError::device_open(ENCODER, port, None))?;

        info!(port, "Encoder opened");
        self.encoder_handle = Some(handle);
        Ok(handle)
    }

    /// Live dispenser handle.
    ///
    /// # Errors
    /// Returns `HardwareError::NotOpen` if the dispenser is closed.
    pub fn dispenser_handle(&self) -> Result<DeviceHandle> {
        self.dispenser_link
            .map(|link| link.handle)
            .ok_or_else(|| HardwareError::not_open(DISPENSER))
    }

    /// Live encoder handle.
    ///
    /// # Errors
    /// Returns `HardwareError::NotOpen` if the encoder is closed.
    pub fn encoder_handle(&self) -> Result<DeviceHandle> {
        self.encoder_handle
            .ok_or_else(|| HardwareError::not_open(ENCODER))
    }

    /// How the dispenser is connected, if open.
    pub fn dispenser_kind(&self) -> Option<LinkKind> {
        self.dispenser_link.map(|link| link.kind)
    }

    pub fn is_open(&self) -> bool {
        self.dispenser_link.is_some() && self.encoder_handle.is_some()
    }

    /// Release both handles. Never fails; close errors are logged.
    pub fn close_all(&mut self) -> CloseReport {
        let dispenser = match self.dispenser_link.take() {
            None => CloseOutcome::NotOpen,
            Some(link) => {
                let code = match link.kind {
                    LinkKind::Usb => self.dispenser.usb_close(link.handle),
                    LinkKind::Serial => self.dispenser.comm_close(link.handle),
                };
                close_outcome(DISPENSER, code)
            }
        };

        let encoder = match self.encoder_handle.take() {
            None => CloseOutcome::NotOpen,
            Some(handle) => close_outcome(ENCODER, self.encoder.comm_close(handle)),
        };

        debug!(?dispenser, ?encoder, "Device links closed");
        CloseReport { dispenser, encoder }
    }
}

fn close_outcome(device: &str, code: i32) -> CloseOutcome {
    if code == DRIVER_OK {
        CloseOutcome::Closed
    } else {
        warn!(device, code, "Error closing device");
        CloseOutcome::Failed(code)
    }
}

impl Drop for DeviceLinkManager {
    fn drop(&mut self) {
        if self.dispenser_link.is_some() || self.encoder_handle.is_some() {
            warn!("Device links still open on drop");
            self.close_all();
        }
    }
}
