//! Per-family chip protocols.
//!
//! Each supported chip family reaches the encoder through its own set of
//! vendor entry points. [`ChipProtocol`] hides that split: the encoder picks
//! the protocol for the detected family once and calls through it.

use crate::driver::{DeviceHandle, EncoderDriver};
use keycard_core::ChipFamily;

/// Encoder driver plus the open handle and bus address every call needs.
#[derive(Clone, Copy)]
pub struct EncoderLink<'a> {
    pub driver: &'a dyn EncoderDriver,
    pub handle: DeviceHandle,
    pub mac: u8,
}

/// Entry points of one chip family. All methods return the raw driver code.
pub trait ChipProtocol: Send + Sync {
    fn family(&self) -> ChipFamily;

    fn detect(&self, link: &EncoderLink<'_>) -> i32;

    fn read_uid(&self, link: &EncoderLink<'_>, uid: &mut Vec<u8>) -> i32;

    /// Load the sector key. Returns `None` for families without sector keys.
    fn load_key(
        &self,
        link: &EncoderLink<'_>,
        sector: u8,
        key_type: u8,
        key: &[u8; 6],
    ) -> Option<i32>;

    fn write_block(&self, link: &EncoderLink<'_>, sector: u8, block: u8, data: &[u8; 16]) -> i32;

    fn halt(&self, link: &EncoderLink<'_>) -> i32;
}

/// MIFARE Classic 1K.
pub struct S50;

/// MIFARE Classic 4K.
pub struct S70;

/// MIFARE Ultralight. Pages are addressed directly; there is no sector key.
pub struct Ultralight;

impl ChipProtocol for S50 {
    fn family(&self) -> ChipFamily {
        ChipFamily::S50
    }

    fn detect(&self, link: &EncoderLink<'_>) -> i32 {
        link.driver.s50_detect_card(link.handle, link.mac)
    }

    fn read_uid(&self, link: &EncoderLink<'_>, uid: &mut Vec<u8>) -> i32 {
        link.driver.s50_get_card_id(link.handle, link.mac, uid)
    }

    fn load_key(
        &self,
        link: &EncoderLink<'_>,
        sector: u8,
        key_type: u8,
        key: &[u8; 6],
    ) -> Option<i32> {
        Some(
            link.driver
                .s50_load_sec_key(link.handle, link.mac, sector, key_type, key),
        )
    }

    fn write_block(&self, link: &EncoderLink<'_>, sector: u8, block: u8, data: &[u8; 16]) -> i32 {
        link.driver
            .s50_write_block(link.handle, link.mac, sector, block, data)
    }

    fn halt(&self, link: &EncoderLink<'_>) -> i32 {
        link.driver.s50_halt(link.handle, link.mac)
    }
}

impl ChipProtocol for S70 {
    fn family(&self) -> ChipFamily {
        ChipFamily::S70
    }

    fn detect(&self, link: &EncoderLink<'_>) -> i32 {
        link.driver.s70_detect_card(link.handle, link.mac)
    }

    fn read_uid(&self, link: &EncoderLink<'_>, uid: &mut Vec<u8>) -> i32 {
        link.driver.s70_get_card_id(link.handle, link.mac, uid)
    }

    fn load_key(
        &self,
        link: &EncoderLink<'_>,
        sector: u8,
        key_type: u8,
        key: &[u8; 6],
    ) -> Option<i32> {
        Some(
            link.driver
                .s70_load_sec_key(link.handle, link.mac, sector, key_type, key),
        )
    }

    fn write_block(&self, link: &EncoderLink<'_>, sector: u8, block: u8, data: &[u8; 16]) -> i32 {
        link.driver
            .s70_write_block(link.handle, link.mac, sector, block, data)
    }

    fn halt(&self, link: &EncoderLink<'_>) -> i32 {
        link.driver.s70_halt(link.handle, link.mac)
    }
}

impl ChipProtocol for Ultralight {
    fn family(&self) -> ChipFamily {
        ChipFamily::Ultralight
    }

    fn detect(&self, link: &EncoderLink<'_>) -> i32 {
        link.driver.ul_detect_card(link.handle, link.mac)
    }

    fn read_uid(&self, link: &EncoderLink<'_>, uid: &mut Vec<u8>) -> i32 {
        link.driver.ul_get_card_id(link.handle, link.mac, uid)
    }

    fn load_key(
        &self,
        _link: &EncoderLink<'_>,
        _sector: u8,
        _key_type: u8,
        _key: &[u8; 6],
    ) -> Option<i32> {
        None
    }

    fn write_block(&self, link: &EncoderLink<'_>, _sector: u8, block: u8, data: &[u8; 16]) -> i32 {
        link.driver.ul_write_block(link.handle, link.mac, block, data)
    }

    fn halt(&self, link: &EncoderLink<'_>) -> i32 {
        link.driver.ul_halt(link.handle, link.mac)
    }
}

/// Protocol implementation for `family`.
pub fn protocol_for(family: ChipFamily) -> &'static dyn ChipProtocol {
    match family {
        ChipFamily::S50 => &S50,
        ChipFamily::S70 => &S70,
        ChipFamily::Ultralight => &Ultralight,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{EncoderCall, SimulatedCard, SimulatedEncoder};

    #[test]
    fn test_protocol_for_each_family() {
        for family in ChipFamily::DETECTION_ORDER {
            assert_eq!(protocol_for(family).family(), family);
        }
    }

    #[test]
    fn test_ultralight_has_no_key_step() {
        let (encoder, control) = SimulatedEncoder::new();
        control.insert_card(SimulatedCard::new(ChipFamily::Ultralight, vec![0x04; 7]));
        let handle = encoder.comm_open("COM4").unwrap();
        let link = EncoderLink {
            driver: &encoder,
            handle,
            mac: 0x01,
        };

        assert_eq!(Ultralight.load_key(&link, 1, 0, &[0xFF; 6]), None);
        assert!(control.calls().is_empty());
    }

    #[test]
    fn test_classic_routes_to_family_entry_points() {
        let (encoder, control) = SimulatedEncoder::new();
        control.insert_card(SimulatedCard::new(ChipFamily::S70, vec![1, 2, 3, 4]));
        let handle = encoder.comm_open("COM4").unwrap();
        let link = EncoderLink {
            driver: &encoder,
            handle,
            mac: 0x01,
        };

        assert_eq!(S70.load_key(&link, 2, 1, &[0xFF; 6]), Some(0));
        assert_eq!(
            control.calls(),
            vec![EncoderCall::LoadKey {
                family: ChipFamily::S70,
                sector: 2,
                key_type: 1
            }]
        );
    }
}
