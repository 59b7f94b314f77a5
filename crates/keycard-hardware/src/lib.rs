//! Hardware layer for the keycard issuing kiosk.
//!
//! This crate drives the two devices that turn a blank card into a room key:
//! the K720 card dispenser, which moves cards from the card box through the
//! encode position to the dispensing mouth, and the M100A/M600 RFID encoder,
//! which writes the key payload onto the card while it sits at the encode
//! position.
//!
//! # Layers
//!
//! - [`driver`]: the vendor call surface as synchronous traits returning raw
//!   driver codes.
//! - [`mock`]: scripted in-process drivers for development and tests.
//! - `vendor` (feature `vendor-sdk`): the vendor shared libraries bound at
//!   runtime.
//! - [`devices`]: enum wrappers giving components one concrete driver type.
//! - [`link`], [`transport`], [`encoder`]: the components the issuer drives.
//!
//! # Example
//!
//! ```
//! use keycard_hardware::devices::{AnyDispenser, AnyEncoder};
//! use keycard_hardware::link::{DeviceLinkManager, LinkConfig};
//! use keycard_hardware::mock::{SimulatedDispenser, SimulatedEncoder};
//!
//! let (dispenser, dispenser_control) = SimulatedDispenser::new();
//! let (encoder, _encoder_control) = SimulatedEncoder::new();
//! let mut links = DeviceLinkManager::new(
//!     AnyDispenser::Simulated(dispenser),
//!     AnyEncoder::Simulated(encoder),
//!     LinkConfig::default(),
//! );
//!
//! links.open().unwrap();
//! assert!(dispenser_control.is_open());
//!
//! links.close_all();
//! assert!(!dispenser_control.is_open());
//! ```
//!
//! # Error Handling
//!
//! Every fallible operation returns [`Result<T>`][error::Result] with a
//! [`HardwareError`]. Errors that originate in a driver keep its raw code,
//! available through [`HardwareError::driver_code`].

pub mod chip;
pub mod clock;
pub mod devices;
pub mod driver;
pub mod encoder;
pub mod error;
pub mod link;
pub mod mock;
pub mod transport;
#[cfg(feature = "vendor-sdk")]
pub mod vendor;

// Re-export commonly used types for convenience
pub use clock::{AnyClock, Clock, ManualClock, TokioClock};
pub use devices::{AnyDispenser, AnyEncoder};
pub use driver::{DeviceHandle, DispenserDriver, EncoderDriver};
pub use encoder::CardEncoder;
pub use error::{HardwareError, Result};
pub use link::{CloseOutcome, CloseReport, DeviceLinkManager, LinkConfig, LinkKind};
pub use transport::{
    EJECT_WARNING, EjectOutcome, RetainOutcome, TransportController, TransportState,
    TransportTimings,
};
