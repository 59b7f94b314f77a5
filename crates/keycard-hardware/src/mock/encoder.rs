//! Simulated M100A/M600 RFID encoder.
//!
//! A card is placed in the encoder's field through the handle. The simulation
//! enforces the same rules as a real reader: detection only succeeds for the
//! card's own family, MIFARE Classic writes need the sector key loaded first,
//! and every call is recorded for assertions.

use crate::driver::{DeviceHandle, EncoderDriver};
use keycard_core::constants::DRIVER_OK;
use keycard_core::{ChipFamily, SectorKey};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// Driver code returned when no card of the probed family answers.
pub const SIM_NO_CARD: i32 = -1;

/// Driver code returned when the sector key does not match.
pub const SIM_AUTH_FAILED: i32 = -2;

/// Driver code returned when writing a sector that was not authenticated.
pub const SIM_NOT_AUTHENTICATED: i32 = -3;

/// Driver code returned when closing a handle that is not open.
pub const SIM_INVALID_HANDLE: i32 = -109;

/// One recorded encoder call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderCall {
    Detect(ChipFamily),
    GetId(ChipFamily),
    LoadKey {
        family: ChipFamily,
        sector: u8,
        key_type: u8,
    },
    WriteBlock {
        family: ChipFamily,
        sector: Option<u8>,
        block: u8,
    },
    Halt(ChipFamily),
}

/// A card sitting in the encoder's field.
#[derive(Debug, Clone)]
pub struct SimulatedCard {
    pub family: ChipFamily,
    pub uid: Vec<u8>,
    pub key: SectorKey,
}

impl SimulatedCard {
    /// A blank card with the factory transport key.
    pub fn new(family: ChipFamily, uid: Vec<u8>) -> Self {
        Self {
            family,
            uid,
            key: SectorKey::default(),
        }
    }

    pub fn with_key(mut self, key: SectorKey) -> Self {
        self.key = key;
        self
    }
}

#[derive(Debug)]
struct EncoderState {
    open_handle: Option<DeviceHandle>,
    next_handle: usize,
    open_fails: bool,
    close_code: Option<i32>,

    card: Option<SimulatedCard>,
    authenticated: Option<u8>,
    halted: bool,
    restock: bool,
    memory: BTreeMap<(Option<u8>, u8), [u8; 16]>,
    writes: Vec<(u8, [u8; 16])>,

    id_code: Option<i32>,
    uid_override: Option<Vec<u8>>,
    auth_code: Option<i32>,
    write_codes: HashMap<u8, i32>,
    halt_code: Option<i32>,

    opens: usize,
    closes: usize,
    calls: Vec<EncoderCall>,
}

impl Default for EncoderState {
    fn default() -> Self {
        Self {
            open_handle: None,
            next_handle: 0x100A,
            open_fails: false,
            close_code: None,
            card: None,
            authenticated: None,
            halted: false,
            restock: false,
            memory: BTreeMap::new(),
            writes: Vec::new(),
            id_code: None,
            uid_override: None,
            auth_code: None,
            write_codes: HashMap::new(),
            halt_code: None,
            opens: 0,
            closes: 0,
            calls: Vec::new(),
        }
    }
}

impl EncoderState {
    fn card_of(&self, family: ChipFamily) -> Option<&SimulatedCard> {
        self.card
            .as_ref()
            .filter(|card| card.family == family && !self.halted)
    }

    /// Swap a halted card for a fresh blank one with the next UID.
    fn next_card(&mut self) {
        if !(self.restock && self.halted) {
            return;
        }
        if let Some(card) = self.card.as_mut() {
            if let Some(last) = card.uid.last_mut() {
                *last = last.wrapping_add(1);
            }
            self.halted = false;
            self.authenticated = None;
            self.memory.clear();
        }
    }

    fn detect(&mut self, family: ChipFamily) -> i32 {
        self.calls.push(EncoderCall::Detect(family));
        self.next_card();
        if self.card_of(family).is_some() {
            DRIVER_OK
        } else {
            SIM_NO_CARD
        }
    }

    fn get_id(&mut self, family: ChipFamily, uid: &mut Vec<u8>) -> i32 {
        self.calls.push(EncoderCall::GetId(family));
        if let Some(code) = self.id_code {
            return code;
        }
        let Some(card) = self.card_of(family) else {
            return SIM_NO_CARD;
        };
        uid.clear();
        uid.extend_from_slice(self.uid_override.as_deref().unwrap_or(&card.uid));
        DRIVER_OK
    }

    fn load_key(&mut self, family: ChipFamily, sector: u8, key_type: u8, key: &[u8; 6]) -> i32 {
        self.calls.push(EncoderCall::LoadKey {
            family,
            sector,
            key_type,
        });
        if let Some(code) = self.auth_code {
            return code;
        }
        let Some(card) = self.card_of(family) else {
            return SIM_NO_CARD;
        };
        if card.key != SectorKey::new(*key) {
            self.authenticated = None;
            return SIM_AUTH_FAILED;
        }
        self.authenticated = Some(sector);
        DRIVER_OK
    }

    fn write(&mut self, family: ChipFamily, sector: Option<u8>, block: u8, data: &[u8; 16]) -> i32 {
        self.calls.push(EncoderCall::WriteBlock {
            family,
            sector,
            block,
        });
        if let Some(code) = self.write_codes.get(&block) {
            return *code;
        }
        if self.card_of(family).is_none() {
            return SIM_NO_CARD;
        }
        if sector.is_some() && self.authenticated != sector {
            return SIM_NOT_AUTHENTICATED;
        }
        self.memory.insert((sector, block), *data);
        self.writes.push((block, *data));
        DRIVER_OK
    }

    fn halt(&mut self, family: ChipFamily) -> i32 {
        self.calls.push(EncoderCall::Halt(family));
        if let Some(code) = self.halt_code {
            return code;
        }
        if self.card_of(family).is_none() {
            return SIM_NO_CARD;
        }
        self.halted = true;
        self.authenticated = None;
        DRIVER_OK
    }
}

/// Simulated M100A/M600 encoder driver.
///
/// # Examples
///
/// ```
/// use keycard_core::ChipFamily;
/// use keycard_hardware::driver::EncoderDriver;
/// use keycard_hardware::mock::{SimulatedCard, SimulatedEncoder};
///
/// let (encoder, handle) = SimulatedEncoder::new();
/// handle.insert_card(SimulatedCard::new(ChipFamily::S50, vec![0xDE, 0xAD, 0xBE, 0xEF]));
///
/// let link = encoder.comm_open("COM4").unwrap();
/// assert_eq!(encoder.s50_detect_card(link, 0x01), 0);
/// assert_ne!(encoder.ul_detect_card(link, 0x01), 0);
/// ```
#[derive(Debug, Clone)]
pub struct SimulatedEncoder {
    state: Arc<Mutex<EncoderState>>,
}

impl SimulatedEncoder {
    /// Create a simulated encoder with an empty field.
    pub fn new() -> (Self, SimulatedEncoderHandle) {
        let state = Arc::new(Mutex::new(EncoderState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            SimulatedEncoderHandle { state },
        )
    }

    fn state(&self) -> MutexGuard<'_, EncoderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl EncoderDriver for SimulatedEncoder {
    fn comm_open(&self, _port: &str) -> Option<DeviceHandle> {
        let mut state = self.state();
        state.opens += 1;
        if state.open_fails {
            return None;
        }
        let handle = DeviceHandle::new(state.next_handle);
        state.next_handle += 1;
        state.open_handle = Some(handle);
        Some(handle)
    }

    fn comm_close(&self, handle: DeviceHandle) -> i32 {
        let mut state = self.state();
        state.closes += 1;
        if let Some(code) = state.close_code {
            state.open_handle = None;
            return code;
        }
        if state.open_handle == Some(handle) {
            state.open_handle = None;
            DRIVER_OK
        } else {
            SIM_INVALID_HANDLE
        }
    }

    fn s50_detect_card(&self, _handle: DeviceHandle, _mac: u8) -> i32 {
        self.state().detect(ChipFamily::S50)
    }

    fn s50_get_card_id(&self, _handle: DeviceHandle, _mac: u8, uid: &mut Vec<u8>) -> i32 {
        self.state().get_id(ChipFamily::S50, uid)
    }

    fn s50_load_sec_key(
        &self,
        _handle: DeviceHandle,
        _mac: u8,
        sector: u8,
        key_type: u8,
        key: &[u8; 6],
    ) -> i32 {
        self.state().load_key(ChipFamily::S50, sector, key_type, key)
    }

    fn s50_write_block(
        &self,
        _handle: DeviceHandle,
        _mac: u8,
        sector: u8,
        block: u8,
        data: &[u8; 16],
    ) -> i32 {
        self.state().write(ChipFamily::S50, Some(sector), block, data)
    }

    fn s50_halt(&self, _handle: DeviceHandle, _mac: u8) -> i32 {
        self.state().halt(ChipFamily::S50)
    }

    fn s70_detect_card(&self, _handle: DeviceHandle, _mac: u8) -> i32 {
        self.state().detect(ChipFamily::S70)
    }

    fn s70_get_card_id(&self, _handle: DeviceHandle, _mac: u8, uid: &mut Vec<u8>) -> i32 {
        self.state().get_id(ChipFamily::S70, uid)
    }

    fn s70_load_sec_key(
        &self,
        _handle: DeviceHandle,
        _mac: u8,
        sector: u8,
        key_type: u8,
        key: &[u8; 6],
    ) -> i32 {
        self.state().load_key(ChipFamily::S70, sector, key_type, key)
    }

    fn s70_write_block(
        &self,
        _handle: DeviceHandle,
        _mac: u8,
        sector: u8,
        block: u8,
        data: &[u8; 16],
    ) -> i32 {
        self.state().write(ChipFamily::S70, Some(sector), block, data)
    }

    fn s70_halt(&self, _handle: DeviceHandle, _mac: u8) -> i32 {
        self.state().halt(ChipFamily::S70)
    }

    fn ul_detect_card(&self, _handle: DeviceHandle, _mac: u8) -> i32 {
        self.state().detect(ChipFamily::Ultralight)
    }

    fn ul_get_card_id(&self, _handle: DeviceHandle, _mac: u8, uid: &mut Vec<u8>) -> i32 {
        self.state().get_id(ChipFamily::Ultralight, uid)
    }

    fn ul_write_block(&self, _handle: DeviceHandle, _mac: u8, block: u8, data: &[u8; 16]) -> i32 {
        self.state().write(ChipFamily::Ultralight, None, block, data)
    }

    fn ul_halt(&self, _handle: DeviceHandle, _mac: u8) -> i32 {
        self.state().halt(ChipFamily::Ultralight)
    }
}

/// Handle for scripting and inspecting a [`SimulatedEncoder`].
#[derive(Debug, Clone)]
pub struct SimulatedEncoderHandle {
    state: Arc<Mutex<EncoderState>>,
}

impl SimulatedEncoderHandle {
    fn state(&self) -> MutexGuard<'_, EncoderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Put a card in the field, replacing any previous card.
    pub fn insert_card(&self, card: SimulatedCard) {
        let mut state = self.state();
        state.card = Some(card);
        state.halted = false;
        state.authenticated = None;
    }

    /// Present a fresh card of the same family once the current one is
    /// halted, as when the dispenser feeds the next blank.
    pub fn restock_after_halt(&self) {
        self.state().restock = true;
    }

    pub fn remove_card(&self) {
        self.state().card = None;
    }

    pub fn fail_open(&self) {
        self.state().open_fails = true;
    }

    pub fn fail_close(&self, code: i32) {
        self.state().close_code = Some(code);
    }

    pub fn fail_get_id(&self, code: i32) {
        self.state().id_code = Some(code);
    }

    /// Report this UID regardless of the card's real one.
    pub fn override_uid(&self, uid: Vec<u8>) {
        self.state().uid_override = Some(uid);
    }

    pub fn fail_authentication(&self, code: i32) {
        self.state().auth_code = Some(code);
    }

    /// Reject writes to `block` with `code`.
    pub fn fail_write(&self, block: u8, code: i32) {
        self.state().write_codes.insert(block, code);
    }

    pub fn fail_halt(&self, code: i32) {
        self.state().halt_code = Some(code);
    }

    pub fn is_open(&self) -> bool {
        self.state().open_handle.is_some()
    }

    pub fn is_halted(&self) -> bool {
        self.state().halted
    }

    pub fn opens(&self) -> usize {
        self.state().opens
    }

    pub fn closes(&self) -> usize {
        self.state().closes
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<EncoderCall> {
        self.state().calls.clone()
    }

    /// Successful block writes as (block, data), in order.
    pub fn writes(&self) -> Vec<(u8, [u8; 16])> {
        self.state().writes.clone()
    }

    /// Stored block contents. `sector` is `None` for Ultralight pages.
    pub fn block(&self, sector: Option<u8>, block: u8) -> Option<[u8; 16]> {
        self.state().memory.get(&(sector, block)).copied()
    }
}
