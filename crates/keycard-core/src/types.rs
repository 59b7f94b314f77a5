use crate::{
    Result,
    constants::{
        BLOCK_SIZE, CARD_BOX_EMPTY, CARD_BOX_FULL, CARD_BOX_LOW, CARD_BOX_NEARLY_FULL,
        CARD_BOX_SUFFICIENT, CLASSIC_UID_LEN, DEFAULT_SECTOR, DEFAULT_SECTOR_KEY,
        DEFAULT_START_BLOCK, DEVICE_FAULT, DEVICE_IDLE, DEVICE_READY_FAILED,
        DEVICE_RETAIN_CARD_FAILED, DEVICE_RETAINING_CARD, DEVICE_SEND_CARD_FAILED,
        DEVICE_SENDING_CARD, RETAIN_BOX_FULL, RETAIN_BOX_NOT_FULL, SECTOR_KEY_LEN,
        TRANSPORT_JAM, TRANSPORT_MEDIA_ENTERING, TRANSPORT_MEDIA_NOT_PRESENT,
        TRANSPORT_MEDIA_PRESENT, TRANSPORT_OVERLAP, ULTRALIGHT_UID_LEN,
    },
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;

/// Chip family of a blank card.
///
/// Detection probes families in [`ChipFamily::DETECTION_ORDER`]; the first
/// family whose probe succeeds identifies the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChipFamily {
    /// MIFARE Classic 1K.
    S50,
    /// MIFARE Classic 4K.
    S70,
    /// MIFARE Ultralight.
    #[serde(rename = "UL")]
    Ultralight,
}

impl ChipFamily {
    /// Probe order used by card detection.
    pub const DETECTION_ORDER: [ChipFamily; 3] =
        [ChipFamily::S50, ChipFamily::S70, ChipFamily::Ultralight];

    /// Expected UID length in bytes.
    #[must_use]
    pub fn uid_len(&self) -> usize {
        match self {
            ChipFamily::S50 | ChipFamily::S70 => CLASSIC_UID_LEN,
            ChipFamily::Ultralight => ULTRALIGHT_UID_LEN,
        }
    }

    /// Whether writes to this family require a sector key.
    #[must_use]
    pub fn requires_sector_key(&self) -> bool {
        !matches!(self, ChipFamily::Ultralight)
    }

    /// Short name used in responses and vendor entry points.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ChipFamily::S50 => "S50",
            ChipFamily::S70 => "S70",
            ChipFamily::Ultralight => "UL",
        }
    }
}

impl fmt::Display for ChipFamily {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChipFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "S50" => Ok(ChipFamily::S50),
            "S70" => Ok(ChipFamily::S70),
            "UL" | "ULTRALIGHT" => Ok(ChipFamily::Ultralight),
            _ => Err(Error::UnknownChipFamily(s.to_string())),
        }
    }
}

/// Identity of the card currently at the encode position.
///
/// Created once per issuance after detection; the UID length is checked
/// against the chip family on construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardIdentity {
    family: ChipFamily,
    uid: Vec<u8>,
}

impl CardIdentity {
    /// Create a card identity, validating the UID length.
    ///
    /// # Errors
    /// Returns `Error::UidLength` if `uid` does not match the family's length.
    pub fn new(family: ChipFamily, uid: Vec<u8>) -> Result<Self> {
        if uid.len() != family.uid_len() {
            return Err(Error::UidLength {
                family: family.to_string(),
                expected: family.uid_len(),
                actual: uid.len(),
            });
        }
        Ok(Self { family, uid })
    }

    #[must_use]
    pub fn family(&self) -> ChipFamily {
        self.family
    }

    #[must_use]
    pub fn uid(&self) -> &[u8] {
        &self.uid
    }

    /// UID as uppercase hex.
    #[must_use]
    pub fn card_id(&self) -> String {
        hex::encode_upper(&self.uid)
    }
}

impl fmt::Display for CardIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.family, self.card_id())
    }
}

/// Access-control payload to be written onto a card.
///
/// Decoded from a hex string supplied by the lock platform. The payload is
/// written in [`BLOCK_SIZE`]-byte blocks; the final block is zero-padded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingPayload(Vec<u8>);

impl EncodingPayload {
    /// Decode a payload from hex.
    ///
    /// Input is case-insensitive and surrounding whitespace is ignored.
    ///
    /// # Errors
    /// Returns `Error::EmptyPayload` for blank input and `Error::InvalidHex`
    /// if the input is not an even-length hex string.
    pub fn from_hex(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::EmptyPayload);
        }
        let bytes = hex::decode(input).map_err(|e| Error::InvalidHex(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Raw payload bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of blocks needed: `ceil(len / 16)`.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.0.len().div_ceil(BLOCK_SIZE)
    }

    /// Payload split into zero-padded blocks, in write order.
    pub fn blocks(&self) -> impl Iterator<Item = [u8; BLOCK_SIZE]> + '_ {
        self.0.chunks(BLOCK_SIZE).map(|chunk| {
            let mut block = [0u8; BLOCK_SIZE];
            block[..chunk.len()].copy_from_slice(chunk);
            block
        })
    }
}

impl std::str::FromStr for EncodingPayload {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EncodingPayload::from_hex(s)
    }
}

/// Six-byte MIFARE sector key.
///
/// # Security
/// Equality uses constant-time comparison, and `Debug` never prints the key.
#[derive(Clone, Copy, Eq)]
pub struct SectorKey([u8; SECTOR_KEY_LEN]);

impl SectorKey {
    #[must_use]
    pub fn new(bytes: [u8; SECTOR_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a key from 12 hex characters.
    ///
    /// # Errors
    /// Returns `Error::InvalidKey` if the input is not 6 bytes of hex.
    pub fn from_hex(input: &str) -> Result<Self> {
        let bytes = hex::decode(input.trim()).map_err(|e| Error::InvalidKey(e.to_string()))?;
        let bytes: [u8; SECTOR_KEY_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            Error::InvalidKey(format!("expected {SECTOR_KEY_LEN} bytes, got {}", b.len()))
        })?;
        Ok(Self(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SECTOR_KEY_LEN] {
        &self.0
    }
}

impl Default for SectorKey {
    fn default() -> Self {
        Self(DEFAULT_SECTOR_KEY)
    }
}

impl PartialEq for SectorKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl fmt::Debug for SectorKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("SectorKey(******)")
    }
}

impl std::str::FromStr for SectorKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SectorKey::from_hex(s)
    }
}

/// Which sector key authenticates the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    #[default]
    #[serde(alias = "A")]
    A,
    #[serde(alias = "B")]
    B,
}

impl KeyType {
    /// Selector byte passed to the encoder (Key A = 0, Key B = 1).
    #[must_use]
    pub fn code(&self) -> u8 {
        match self {
            KeyType::A => 0,
            KeyType::B => 1,
        }
    }
}

impl TryFrom<u8> for KeyType {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(KeyType::A),
            1 => Ok(KeyType::B),
            other => Err(Error::InvalidKeyType(other.to_string())),
        }
    }
}

/// Where and how a payload is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingTarget {
    pub sector: u8,
    pub start_block: u8,
    pub key: SectorKey,
    pub key_type: KeyType,
}

impl Default for EncodingTarget {
    fn default() -> Self {
        Self {
            sector: DEFAULT_SECTOR,
            start_block: DEFAULT_START_BLOCK,
            key: SectorKey::default(),
            key_type: KeyType::A,
        }
    }
}

/// RFID encoder hardware model.
///
/// The model selects the vendor library and the prefix of its entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderModel {
    #[default]
    #[serde(alias = "M100A")]
    M100a,
    #[serde(alias = "M600")]
    M600,
}

impl EncoderModel {
    /// Prefix of the model's vendor entry points, e.g. `M100A_S50DetectCard`.
    #[must_use]
    pub fn symbol_prefix(&self) -> &'static str {
        match self {
            EncoderModel::M100a => "M100A",
            EncoderModel::M600 => "M600",
        }
    }

    /// Vendor library file name for the current platform.
    #[must_use]
    pub fn library_name(&self) -> &'static str {
        match (self, cfg!(windows)) {
            (EncoderModel::M100a, true) => "M100A_DLL.dll",
            (EncoderModel::M100a, false) => "libM100A.so",
            (EncoderModel::M600, true) => "M600_DLL.dll",
            (EncoderModel::M600, false) => "libM600.so",
        }
    }
}

impl fmt::Display for EncoderModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.symbol_prefix())
    }
}

/// Dispenser device state (position byte 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceState {
    Idle,
    Fault,
    ReadyFailed,
    SendingCard,
    RetainingCard,
    SendCardFailed,
    RetainCardFailed,
    Unknown(u8),
}

impl DeviceState {
    /// Whether the device is mid-operation and will return to idle on its own.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, DeviceState::SendingCard | DeviceState::RetainingCard)
    }

    /// Raw status byte.
    #[must_use]
    pub fn code(&self) -> u8 {
        match self {
            DeviceState::Idle => DEVICE_IDLE,
            DeviceState::Fault => DEVICE_FAULT,
            DeviceState::ReadyFailed => DEVICE_READY_FAILED,
            DeviceState::SendingCard => DEVICE_SENDING_CARD,
            DeviceState::RetainingCard => DEVICE_RETAINING_CARD,
            DeviceState::SendCardFailed => DEVICE_SEND_CARD_FAILED,
            DeviceState::RetainCardFailed => DEVICE_RETAIN_CARD_FAILED,
            DeviceState::Unknown(code) => *code,
        }
    }
}

impl From<u8> for DeviceState {
    fn from(code: u8) -> Self {
        match code {
            DEVICE_IDLE => DeviceState::Idle,
            DEVICE_FAULT => DeviceState::Fault,
            DEVICE_READY_FAILED => DeviceState::ReadyFailed,
            DEVICE_SENDING_CARD => DeviceState::SendingCard,
            DEVICE_RETAINING_CARD => DeviceState::RetainingCard,
            DEVICE_SEND_CARD_FAILED => DeviceState::SendCardFailed,
            DEVICE_RETAIN_CARD_FAILED => DeviceState::RetainCardFailed,
            other => DeviceState::Unknown(other),
        }
    }
}

/// Card position in the transport path (position byte 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransportStatus {
    Overlap,
    Jam,
    /// Card held at the encode position.
    MediaPresent,
    /// No card in the path.
    MediaNotPresent,
    /// Card held at the dispensing mouth.
    MediaEntering,
    Unknown(u8),
}

impl TransportStatus {
    /// Raw status byte.
    #[must_use]
    pub fn code(&self) -> u8 {
        match self {
            TransportStatus::Overlap => TRANSPORT_OVERLAP,
            TransportStatus::Jam => TRANSPORT_JAM,
            TransportStatus::MediaPresent => TRANSPORT_MEDIA_PRESENT,
            TransportStatus::MediaNotPresent => TRANSPORT_MEDIA_NOT_PRESENT,
            TransportStatus::MediaEntering => TRANSPORT_MEDIA_ENTERING,
            TransportStatus::Unknown(code) => *code,
        }
    }
}

impl From<u8> for TransportStatus {
    fn from(code: u8) -> Self {
        match code {
            TRANSPORT_OVERLAP => TransportStatus::Overlap,
            TRANSPORT_JAM => TransportStatus::Jam,
            TRANSPORT_MEDIA_PRESENT => TransportStatus::MediaPresent,
            TRANSPORT_MEDIA_NOT_PRESENT => TransportStatus::MediaNotPresent,
            TRANSPORT_MEDIA_ENTERING => TransportStatus::MediaEntering,
            other => TransportStatus::Unknown(other),
        }
    }
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}(0x{:02X})", self.code())
    }
}

/// Fill level of the blank card box (position byte 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CardBoxStatus {
    Empty,
    Low,
    Sufficient,
    NearlyFull,
    Full,
    Unknown(u8),
}

impl From<u8> for CardBoxStatus {
    fn from(code: u8) -> Self {
        match code {
            CARD_BOX_EMPTY => CardBoxStatus::Empty,
            CARD_BOX_LOW => CardBoxStatus::Low,
            CARD_BOX_SUFFICIENT => CardBoxStatus::Sufficient,
            CARD_BOX_NEARLY_FULL => CardBoxStatus::NearlyFull,
            CARD_BOX_FULL => CardBoxStatus::Full,
            other => CardBoxStatus::Unknown(other),
        }
    }
}

/// Fill level of the retain box (position byte 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RetainBoxStatus {
    NotFull,
    Full,
    Unknown(u8),
}

impl From<u8> for RetainBoxStatus {
    fn from(code: u8) -> Self {
        match code {
            RETAIN_BOX_NOT_FULL => RetainBoxStatus::NotFull,
            RETAIN_BOX_FULL => RetainBoxStatus::Full,
            other => RetainBoxStatus::Unknown(other),
        }
    }
}

/// One reading of the dispenser's four status bytes.
///
/// Readings are never cached; each poll produces a fresh value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PositionStatus {
    pub device: DeviceState,
    pub transport: TransportStatus,
    pub card_box: CardBoxStatus,
    pub retain_box: RetainBoxStatus,
}

impl PositionStatus {
    /// Decode the raw bytes filled by the position query.
    #[must_use]
    pub fn from_bytes(raw: [u8; 4]) -> Self {
        Self {
            device: raw[0].into(),
            transport: raw[1].into(),
            card_box: raw[2].into(),
            retain_box: raw[3].into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ChipFamily::S50, 4)]
    #[case(ChipFamily::S70, 4)]
    #[case(ChipFamily::Ultralight, 7)]
    fn test_uid_len(#[case] family: ChipFamily, #[case] expected: usize) {
        assert_eq!(family.uid_len(), expected);
    }

    #[rstest]
    #[case("s50", ChipFamily::S50)]
    #[case("S70", ChipFamily::S70)]
    #[case("ul", ChipFamily::Ultralight)]
    #[case(" UL ", ChipFamily::Ultralight)]
    fn test_chip_family_from_str(#[case] input: &str, #[case] expected: ChipFamily) {
        assert_eq!(input.parse::<ChipFamily>().unwrap(), expected);
    }

    #[test]
    fn test_chip_family_serializes_short_name() {
        let json = serde_json::to_string(&ChipFamily::Ultralight).unwrap();
        assert_eq!(json, "\"UL\"");
        assert_eq!(ChipFamily::S50.to_string(), "S50");
    }

    #[test]
    fn test_detection_order() {
        assert_eq!(
            ChipFamily::DETECTION_ORDER,
            [ChipFamily::S50, ChipFamily::S70, ChipFamily::Ultralight]
        );
    }

    #[test]
    fn test_card_identity_uppercase_hex() {
        let identity = CardIdentity::new(ChipFamily::S50, vec![0xde, 0xad, 0xbe, 0xef]).unwrap();
        assert_eq!(identity.card_id(), "DEADBEEF");
        assert_eq!(identity.to_string(), "S50 DEADBEEF");
    }

    #[rstest]
    #[case(ChipFamily::S50, 7)]
    #[case(ChipFamily::S70, 3)]
    #[case(ChipFamily::Ultralight, 4)]
    fn test_card_identity_rejects_wrong_length(#[case] family: ChipFamily, #[case] len: usize) {
        let result = CardIdentity::new(family, vec![0x01; len]);
        assert!(matches!(result, Err(Error::UidLength { actual, .. }) if actual == len));
    }

    #[rstest]
    #[case("00112233", 4, 1)]
    #[case("ABABABABABABABABABABABABABABABAB", 16, 1)]
    #[case("abababababababababababababababab01", 17, 2)]
    #[case("0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f", 32, 2)]
    fn test_payload_blocks(#[case] hex: &str, #[case] len: usize, #[case] blocks: usize) {
        let payload = EncodingPayload::from_hex(hex).unwrap();
        assert_eq!(payload.len(), len);
        assert_eq!(payload.block_count(), blocks);
        assert_eq!(payload.blocks().count(), blocks);
    }

    #[test]
    fn test_payload_last_block_zero_padded() {
        let payload = EncodingPayload::from_hex("0102030405").unwrap();
        let blocks: Vec<_> = payload.blocks().collect();
        assert_eq!(&blocks[0][..5], &[1, 2, 3, 4, 5]);
        assert!(blocks[0][5..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_payload_case_insensitive() {
        let lower = EncodingPayload::from_hex("deadbeef").unwrap();
        let upper = EncodingPayload::from_hex("DEADBEEF").unwrap();
        assert_eq!(lower, upper);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    fn test_payload_empty(#[case] input: &str) {
        assert_eq!(EncodingPayload::from_hex(input), Err(Error::EmptyPayload));
    }

    #[rstest]
    #[case("XYZ0")]
    #[case("ABC")]
    fn test_payload_invalid_hex(#[case] input: &str) {
        assert!(matches!(
            EncodingPayload::from_hex(input),
            Err(Error::InvalidHex(_))
        ));
    }

    #[test]
    fn test_sector_key_parse() {
        let key = SectorKey::from_hex("ffffffffffff").unwrap();
        assert_eq!(key, SectorKey::default());
        assert!(SectorKey::from_hex("FFFF").is_err());
        assert!(SectorKey::from_hex("GGGGGGGGGGGG").is_err());
    }

    #[test]
    fn test_sector_key_debug_redacted() {
        let key = SectorKey::new([0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5]);
        assert!(!format!("{key:?}").contains("A0"));
    }

    #[test]
    fn test_key_type_codes() {
        assert_eq!(KeyType::A.code(), 0);
        assert_eq!(KeyType::B.code(), 1);
        assert_eq!(KeyType::try_from(1).unwrap(), KeyType::B);
        assert!(KeyType::try_from(2).is_err());
    }

    #[test]
    fn test_position_status_decode() {
        let status = PositionStatus::from_bytes([0x30, 0x32, 0x30, 0x31]);
        assert_eq!(status.device, DeviceState::Idle);
        assert_eq!(status.transport, TransportStatus::MediaPresent);
        assert_eq!(status.card_box, CardBoxStatus::Empty);
        assert_eq!(status.retain_box, RetainBoxStatus::Full);
    }

    #[test]
    fn test_position_status_unknown_preserved() {
        let status = PositionStatus::from_bytes([0x99, 0x7F, 0x30, 0x30]);
        assert_eq!(status.device, DeviceState::Unknown(0x99));
        assert_eq!(status.transport.code(), 0x7F);
    }

    #[test]
    fn test_encoder_model_prefix() {
        assert_eq!(EncoderModel::default().symbol_prefix(), "M100A");
        assert_eq!(EncoderModel::M600.to_string(), "M600");
        let model: EncoderModel = serde_json::from_str("\"M600\"").unwrap();
        assert_eq!(model, EncoderModel::M600);
    }

    #[test]
    fn test_device_busy() {
        assert!(DeviceState::SendingCard.is_busy());
        assert!(DeviceState::RetainingCard.is_busy());
        assert!(!DeviceState::Idle.is_busy());
        assert!(!DeviceState::Fault.is_busy());
    }
}
