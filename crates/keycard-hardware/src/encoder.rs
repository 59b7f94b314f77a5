//! RFID card encoder.
//!
//! Detects the chip family of the card at the encode position, reads its UID,
//! authenticates the target sector, and writes the payload block by block.

use crate::chip::{EncoderLink, protocol_for};
use crate::clock::{AnyClock, Clock};
use crate::devices::AnyEncoder;
use crate::driver::DeviceHandle;
use crate::error::{HardwareError, Result};
use keycard_core::constants::{DRIVER_OK, INTER_BLOCK_DELAY_MS};
use keycard_core::{CardIdentity, ChipFamily, EncodingPayload, EncodingTarget, KeyType, SectorKey};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Card encoder bound to one encoder bus address.
#[derive(Debug)]
pub struct CardEncoder {
    clock: AnyClock,
    mac: u8,
    inter_block_delay: Duration,
}

impl CardEncoder {
    pub fn new(clock: AnyClock, mac: u8) -> Self {
        Self {
            clock,
            mac,
            inter_block_delay: Duration::from_millis(INTER_BLOCK_DELAY_MS),
        }
    }

    pub fn with_inter_block_delay(mut self, delay: Duration) -> Self {
        self.inter_block_delay = delay;
        self
    }

    pub fn mac(&self) -> u8 {
        self.mac
    }

    fn link<'a>(&self, driver: &'a AnyEncoder, handle: DeviceHandle) -> EncoderLink<'a> {
        EncoderLink {
            driver,
            handle,
            mac: self.mac,
        }
    }

    /// Probe S50, then S70, then Ultralight; the first family to answer wins.
    ///
    /// # Errors
    /// Returns `CardDetection` with every probe's code if none answers.
    pub fn detect_type(&self, driver: &AnyEncoder, handle: DeviceHandle) -> Result<ChipFamily> {
        let link = self.link(driver, handle);
        let mut probes = Vec::with_capacity(ChipFamily::DETECTION_ORDER.len());

        for family in ChipFamily::DETECTION_ORDER {
            let code = protocol_for(family).detect(&link);
            if code == DRIVER_OK {
                info!(card_type = %family, "Card detected");
                return Ok(family);
            }
            debug!(card_type = %family, code, "Probe did not match");
            probes.push((family, code));
        }

        error!("No supported card detected");
        Err(HardwareError::CardDetection { probes })
    }

    /// Read the card's UID.
    ///
    /// # Errors
    /// Returns `CardId` if the read fails or the UID length does not match
    /// the family.
    pub fn get_id(
        &self,
        driver: &AnyEncoder,
        handle: DeviceHandle,
        family: ChipFamily,
    ) -> Result<CardIdentity> {
        let link = self.link(driver, handle);
        let mut uid = Vec::with_capacity(family.uid_len());

        let code = protocol_for(family).read_uid(&link, &mut uid);
        if code != DRIVER_OK {
            error!(card_type = %family, code, "Failed to read card ID");
            return Err(HardwareError::card_id_read(family, code));
        }

        let actual = uid.len();
        let identity = CardIdentity::new(family, uid).map_err(|_| {
            error!(card_type = %family, len = actual, "Card ID has wrong length");
            HardwareError::card_id_length(family, actual)
        })?;
        info!(card_id = %identity.card_id(), card_type = %family, "Card ID read");
        Ok(identity)
    }

    /// Load the sector key. A no-op for Ultralight.
    ///
    /// # Errors
    /// Returns `Authentication` if the encoder rejects the key.
    pub fn authenticate_sector(
        &self,
        driver: &AnyEncoder,
        handle: DeviceHandle,
        family: ChipFamily,
        sector: u8,
        key: &SectorKey,
        key_type: KeyType,
    ) -> Result<()> {
        let link = self.link(driver, handle);
        match protocol_for(family).load_key(&link, sector, key_type.code(), key.as_bytes()) {
            None => {
                debug!(card_type = %family, "No sector key required");
                Ok(())
            }
            Some(DRIVER_OK) => {
                info!(sector, key_type = ?key_type, "Sector key loaded");
                Ok(())
            }
            Some(code) => {
                error!(sector, code, "Failed to load sector key");
                Err(HardwareError::Authentication { sector, code })
            }
        }
    }

    /// Authenticate once, then write every block in ascending order, pausing
    /// for the write cycle after each block.
    ///
    /// Returns the number of blocks written, `ceil(len / 16)`.
    ///
    /// # Errors
    /// Returns `Authentication` or `BlockWrite` with the failing block, or
    /// `PayloadTooLarge` if the blocks run past the last address.
    pub async fn write_payload(
        &self,
        driver: &AnyEncoder,
        handle: DeviceHandle,
        family: ChipFamily,
        payload: &EncodingPayload,
        target: &EncodingTarget,
    ) -> Result<usize> {
        let blocks = payload.block_count();
        let too_large = || HardwareError::PayloadTooLarge {
            blocks,
            start_block: target.start_block,
        };
        let last = usize::from(target.start_block) + blocks.saturating_sub(1);
        if u8::try_from(last).is_err() {
            return Err(too_large());
        }

        info!(
            sector = target.sector,
            blocks,
            total_bytes = payload.len(),
            card_type = %family,
            "Writing payload"
        );
        self.authenticate_sector(
            driver,
            handle,
            family,
            target.sector,
            &target.key,
            target.key_type,
        )?;

        let link = self.link(driver, handle);
        let protocol = protocol_for(family);

        for (index, data) in payload.blocks().enumerate() {
            let block = u8::try_from(usize::from(target.start_block) + index)
                .map_err(|_| too_large())?;
            let code = protocol.write_block(&link, target.sector, block, &data);
            if code != DRIVER_OK {
                error!(block, code, card_type = %family, "Failed to write block");
                return Err(HardwareError::BlockWrite { block, code });
            }
            debug!(block, data = %hex::encode_upper(&data[..4]), "Block written");
            self.clock.sleep(self.inter_block_delay).await;
        }

        info!(blocks, "Payload written");
        Ok(blocks)
    }

    /// Put the card to sleep. Failures are logged, never returned.
    pub fn halt(&self, driver: &AnyEncoder, handle: DeviceHandle, family: ChipFamily) {
        let code = protocol_for(family).halt(&self.link(driver, handle));
        if code == DRIVER_OK {
            debug!(card_type = %family, "Card halted");
        } else {
            warn!(card_type = %family, code, "Failed to halt card");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::driver::EncoderDriver;
    use crate::mock::{
        EncoderCall, SimulatedCard, SimulatedEncoder, SimulatedEncoderHandle,
        encoder::{SIM_AUTH_FAILED, SIM_NO_CARD},
    };
    use rstest::rstest;

    const CLASSIC_UID: [u8; 4] = [0x04, 0xA1, 0xB2, 0xC3];
    const UL_UID: [u8; 7] = [0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66];

    fn setup(card: Option<SimulatedCard>) -> (
        CardEncoder,
        ManualClock,
        AnyEncoder,
        SimulatedEncoderHandle,
        DeviceHandle,
    ) {
        let clock = ManualClock::new();
        let (encoder, control) = SimulatedEncoder::new();
        if let Some(card) = card {
            control.insert_card(card);
        }
        let handle = encoder.comm_open("COM4").unwrap();
        (
            CardEncoder::new(clock.clone().into(), 0x01),
            clock,
            AnyEncoder::Simulated(encoder),
            control,
            handle,
        )
    }

    fn uid_for(family: ChipFamily) -> Vec<u8> {
        match family {
            ChipFamily::Ultralight => UL_UID.to_vec(),
            _ => CLASSIC_UID.to_vec(),
        }
    }

    #[rstest]
    #[case::s50(ChipFamily::S50, 1)]
    #[case::s70(ChipFamily::S70, 2)]
    #[case::ultralight(ChipFamily::Ultralight, 3)]
    fn test_detect_stops_at_first_match(#[case] family: ChipFamily, #[case] probes: usize) {
        let card = SimulatedCard::new(family, uid_for(family));
        let (encoder, _clock, driver, control, handle) = setup(Some(card));

        assert_eq!(encoder.detect_type(&driver, handle).unwrap(), family);
        assert_eq!(control.calls().len(), probes);
        assert_eq!(control.calls().last(), Some(&EncoderCall::Detect(family)));
    }

    #[test]
    fn test_detect_no_card_reports_all_probes() {
        let (encoder, _clock, driver, _control, handle) = setup(None);

        let err = encoder.detect_type(&driver, handle).unwrap_err();

        assert_eq!(
            err,
            HardwareError::CardDetection {
                probes: vec![
                    (ChipFamily::S50, SIM_NO_CARD),
                    (ChipFamily::S70, SIM_NO_CARD),
                    (ChipFamily::Ultralight, SIM_NO_CARD),
                ]
            }
        );
    }

    #[rstest]
    #[case::s50(ChipFamily::S50, "04A1B2C3")]
    #[case::ultralight(ChipFamily::Ultralight, "04112233445566")]
    fn test_get_id(#[case] family: ChipFamily, #[case] expected: &str) {
        let card = SimulatedCard::new(family, uid_for(family));
        let (encoder, _clock, driver, _control, handle) = setup(Some(card));

        let identity = encoder.get_id(&driver, handle, family).unwrap();

        assert_eq!(identity.card_id(), expected);
        assert_eq!(identity.family(), family);
    }

    #[test]
    fn test_get_id_driver_failure() {
        let card = SimulatedCard::new(ChipFamily::S50, CLASSIC_UID.to_vec());
        let (encoder, _clock, driver, control, handle) = setup(Some(card));
        control.fail_get_id(-7);

        let err = encoder.get_id(&driver, handle, ChipFamily::S50).unwrap_err();

        assert_eq!(err, HardwareError::card_id_read(ChipFamily::S50, -7));
        assert_eq!(err.driver_code(), Some(-7));
    }

    #[test]
    fn test_get_id_wrong_length() {
        let card = SimulatedCard::new(ChipFamily::S50, CLASSIC_UID.to_vec());
        let (encoder, _clock, driver, control, handle) = setup(Some(card));
        control.override_uid(UL_UID.to_vec());

        let err = encoder.get_id(&driver, handle, ChipFamily::S50).unwrap_err();

        assert_eq!(err, HardwareError::card_id_length(ChipFamily::S50, 7));
    }

    #[test]
    fn test_authenticate_ultralight_is_noop() {
        let card = SimulatedCard::new(ChipFamily::Ultralight, UL_UID.to_vec());
        let (encoder, _clock, driver, control, handle) = setup(Some(card));

        encoder
            .authenticate_sector(
                &driver,
                handle,
                ChipFamily::Ultralight,
                1,
                &SectorKey::default(),
                KeyType::A,
            )
            .unwrap();

        assert!(control.calls().is_empty());
    }

    #[test]
    fn test_authenticate_wrong_key() {
        let card = SimulatedCard::new(ChipFamily::S50, CLASSIC_UID.to_vec())
            .with_key(SectorKey::new([0x11; 6]));
        let (encoder, _clock, driver, _control, handle) = setup(Some(card));

        let err = encoder
            .authenticate_sector(
                &driver,
                handle,
                ChipFamily::S50,
                1,
                &SectorKey::default(),
                KeyType::A,
            )
            .unwrap_err();

        assert_eq!(
            err,
            HardwareError::Authentication {
                sector: 1,
                code: SIM_AUTH_FAILED
            }
        );
    }

    #[tokio::test]
    async fn test_write_two_blocks_in_order() {
        let card = SimulatedCard::new(ChipFamily::S50, CLASSIC_UID.to_vec());
        let (encoder, clock, driver, control, handle) = setup(Some(card));
        let payload = EncodingPayload::from_hex(&"AB".repeat(32)).unwrap();

        let written = encoder
            .write_payload(
                &driver,
                handle,
                ChipFamily::S50,
                &payload,
                &EncodingTarget::default(),
            )
            .await
            .unwrap();

        assert_eq!(written, 2);
        let blocks: Vec<u8> = control.writes().iter().map(|(block, _)| *block).collect();
        assert_eq!(blocks, vec![0, 1]);
        assert_eq!(control.block(Some(1), 1), Some([0xAB; 16]));
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(INTER_BLOCK_DELAY_MS); 2]
        );

        let loads = control
            .calls()
            .into_iter()
            .filter(|call| matches!(call, EncoderCall::LoadKey { .. }))
            .count();
        assert_eq!(loads, 1);
    }

    #[tokio::test]
    async fn test_write_pads_last_block() {
        let card = SimulatedCard::new(ChipFamily::Ultralight, UL_UID.to_vec());
        let (encoder, _clock, driver, control, handle) = setup(Some(card));
        let payload = EncodingPayload::from_hex("DEADBEEF").unwrap();
        let target = EncodingTarget {
            start_block: 4,
            ..EncodingTarget::default()
        };

        encoder
            .write_payload(&driver, handle, ChipFamily::Ultralight, &payload, &target)
            .await
            .unwrap();

        let mut expected = [0u8; 16];
        expected[..4].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(control.block(None, 4), Some(expected));
    }

    #[tokio::test]
    async fn test_write_stops_at_failing_block() {
        let card = SimulatedCard::new(ChipFamily::S70, CLASSIC_UID.to_vec());
        let (encoder, clock, driver, control, handle) = setup(Some(card));
        control.fail_write(1, -5);
        let payload = EncodingPayload::from_hex(&"01".repeat(48)).unwrap();

        let err = encoder
            .write_payload(
                &driver,
                handle,
                ChipFamily::S70,
                &payload,
                &EncodingTarget::default(),
            )
            .await
            .unwrap_err();

        assert_eq!(err, HardwareError::BlockWrite { block: 1, code: -5 });
        assert_eq!(control.writes().len(), 1);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(INTER_BLOCK_DELAY_MS)]);
    }

    #[tokio::test]
    async fn test_write_past_last_block_rejected() {
        let card = SimulatedCard::new(ChipFamily::S70, CLASSIC_UID.to_vec());
        let (encoder, _clock, driver, control, handle) = setup(Some(card));
        let payload = EncodingPayload::from_hex(&"01".repeat(32)).unwrap();
        let target = EncodingTarget {
            start_block: u8::MAX,
            ..EncodingTarget::default()
        };

        let err = encoder
            .write_payload(&driver, handle, ChipFamily::S70, &payload, &target)
            .await
            .unwrap_err();

        assert!(matches!(err, HardwareError::PayloadTooLarge { blocks: 2, .. }));
        assert!(control.calls().is_empty());
    }

    #[test]
    fn test_halt_failure_is_swallowed() {
        let card = SimulatedCard::new(ChipFamily::S50, CLASSIC_UID.to_vec());
        let (encoder, _clock, driver, control, handle) = setup(Some(card));
        control.fail_halt(-9);

        encoder.halt(&driver, handle, ChipFamily::S50);

        assert_eq!(control.calls(), vec![EncoderCall::Halt(ChipFamily::S50)]);
        assert!(!control.is_halted());
    }
}
