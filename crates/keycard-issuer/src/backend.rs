//! Driver construction for the configured SDK backend.

use keycard_core::ChipFamily;
use keycard_hardware::mock::{SimulatedCard, SimulatedDispenser, SimulatedEncoder};
use keycard_hardware::{AnyDispenser, AnyEncoder, DeviceLinkManager, HardwareError};
use tracing::info;
use uuid::Uuid;

use crate::config::{Config, SdkBackend};

/// Build the link manager over the drivers `config.sdk` selects.
///
/// The simulated backend starts with a full card box and presents a blank S50
/// card to the encoder for every issuance.
///
/// # Errors
/// Returns `InitializationFailed` if the vendor libraries cannot be loaded,
/// or if the vendor backend is selected without the `vendor-sdk` feature.
pub fn open_links(config: &Config) -> Result<DeviceLinkManager, HardwareError> {
    let (dispenser, encoder) = match config.sdk.backend {
        SdkBackend::Simulated => simulated(),
        SdkBackend::Vendor => vendor(config)?,
    };
    info!(backend = ?config.sdk.backend, "Drivers ready");
    Ok(DeviceLinkManager::new(dispenser, encoder, config.link_config()))
}

fn simulated() -> (AnyDispenser, AnyEncoder) {
    let (dispenser, _) = SimulatedDispenser::new();
    let (encoder, control) = SimulatedEncoder::new();
    let uid = Uuid::new_v4().as_bytes()[..ChipFamily::S50.uid_len()].to_vec();
    control.insert_card(SimulatedCard::new(ChipFamily::S50, uid));
    control.restock_after_halt();
    (
        AnyDispenser::Simulated(dispenser),
        AnyEncoder::Simulated(encoder),
    )
}

#[cfg(feature = "vendor-sdk")]
fn vendor(config: &Config) -> Result<(AnyDispenser, AnyEncoder), HardwareError> {
    use keycard_hardware::vendor::{EncoderLibrary, K720Library};

    let dispenser = K720Library::load(&config.sdk.path)?;
    let encoder = EncoderLibrary::load(&config.sdk.path, config.encoder.model)?;
    Ok((AnyDispenser::Vendor(dispenser), AnyEncoder::Vendor(encoder)))
}

#[cfg(not(feature = "vendor-sdk"))]
fn vendor(_config: &Config) -> Result<(AnyDispenser, AnyEncoder), HardwareError> {
    Err(HardwareError::initialization_failed(
        "vendor SDK backend requires the vendor-sdk feature",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_backend_opens() {
        let mut links = open_links(&Config::default()).unwrap();

        links.open().unwrap();
        assert!(links.is_open());
        links.close_all();
    }

    #[cfg(not(feature = "vendor-sdk"))]
    #[test]
    fn test_vendor_backend_needs_feature() {
        let mut config = Config::default();
        config.sdk.backend = SdkBackend::Vendor;

        let err = open_links(&config).unwrap_err();
        assert!(matches!(err, HardwareError::InitializationFailed { .. }));
    }
}
