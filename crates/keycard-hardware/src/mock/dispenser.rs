//! Simulated K720 card dispenser.
//!
//! The simulation advances on position queries rather than wall time: a move
//! command completes after a configurable number of polls. This keeps tests
//! deterministic regardless of the clock in use.

use crate::driver::{DeviceHandle, DispenserDriver};
use keycard_core::constants::{
    CARD_BOX_EMPTY, CARD_BOX_LOW, CARD_BOX_SUFFICIENT, DEVICE_IDLE, DEVICE_SENDING_CARD,
    DRIVER_OK, ERR_CARD_BOX_EMPTY, ERR_HAVE_CARD, ERR_HAVE_NO_CARD, ERR_RETAIN_BOX_FULL,
    MOVE_EJECT, MOVE_TO_DISPENSE, MOVE_TO_ENCODE, RETAIN_BOX_FULL, RETAIN_BOX_NOT_FULL,
    TRANSPORT_MEDIA_ENTERING, TRANSPORT_MEDIA_NOT_PRESENT, TRANSPORT_MEDIA_PRESENT,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Driver code returned when closing a handle that is not open.
pub const SIM_INVALID_HANDLE: i32 = -109;

/// Blank cards at or below this count report a low card box.
const LOW_CARD_THRESHOLD: u32 = 10;

/// Where the simulated card currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardPosition {
    /// No card in the transport path.
    Empty,
    /// Held at the encode position.
    Encode,
    /// Held at the dispensing mouth.
    Mouth,
}

#[derive(Debug, Clone, Copy)]
struct PendingMove {
    target: CardPosition,
    polls_left: usize,
}

#[derive(Debug)]
struct DispenserState {
    open_handle: Option<DeviceHandle>,
    next_handle: usize,
    serial_open_fails: bool,
    usb_open_code: Option<i32>,
    close_code: Option<i32>,
    status_code: Option<i32>,
    retain_code: Option<i32>,
    move_codes: HashMap<u8, i32>,

    device_state: u8,
    busy_polls: usize,
    cards_remaining: u32,
    retain_box_full: bool,
    position: CardPosition,
    pending: Option<PendingMove>,
    move_delay_polls: usize,
    stall_moves: bool,
    stalled: bool,
    take_after_polls: Option<usize>,

    serial_opens: usize,
    usb_opens: usize,
    closes: usize,
    polls: usize,
    moves: Vec<u8>,
    retain_calls: usize,
    retained_cards: usize,
}

impl Default for DispenserState {
    fn default() -> Self {
        Self {
            open_handle: None,
            next_handle: 0x720,
            serial_open_fails: false,
            usb_open_code: None,
            close_code: None,
            status_code: None,
            retain_code: None,
            move_codes: HashMap::new(),
            device_state: DEVICE_IDLE,
            busy_polls: 0,
            cards_remaining: 50,
            retain_box_full: false,
            position: CardPosition::Empty,
            pending: None,
            move_delay_polls: 1,
            stall_moves: false,
            stalled: false,
            take_after_polls: Some(1),
            serial_opens: 0,
            usb_opens: 0,
            closes: 0,
            polls: 0,
            moves: Vec::new(),
            retain_calls: 0,
            retained_cards: 0,
        }
    }
}

impl DispenserState {
    fn open(&mut self) -> DeviceHandle {
        let handle = DeviceHandle::new(self.next_handle);
        self.next_handle += 1;
        self.open_handle = Some(handle);
        handle
    }

    fn close(&mut self, handle: DeviceHandle) -> i32 {
        self.closes += 1;
        if let Some(code) = self.close_code {
            self.open_handle = None;
            return code;
        }
        if self.open_handle == Some(handle) {
            self.open_handle = None;
            DRIVER_OK
        } else {
            SIM_INVALID_HANDLE
        }
    }

    fn schedule(&mut self, target: CardPosition, polls: usize) {
        if self.stall_moves {
            self.stalled = true;
            self.pending = None;
        } else {
            self.pending = Some(PendingMove {
                target,
                polls_left: polls,
            });
        }
    }

    fn card_in_path(&self) -> bool {
        self.position != CardPosition::Empty || self.pending.is_some() || self.stalled
    }

    fn card_box_byte(&self) -> u8 {
        match self.cards_remaining {
            0 => CARD_BOX_EMPTY,
            n if n <= LOW_CARD_THRESHOLD => CARD_BOX_LOW,
            _ => CARD_BOX_SUFFICIENT,
        }
    }

    fn transport_byte(&self) -> u8 {
        match self.position {
            CardPosition::Empty => TRANSPORT_MEDIA_NOT_PRESENT,
            CardPosition::Encode => TRANSPORT_MEDIA_PRESENT,
            CardPosition::Mouth => TRANSPORT_MEDIA_ENTERING,
        }
    }
}

/// Simulated K720 dispenser driver.
///
/// # Examples
///
/// ```
/// use keycard_hardware::driver::DispenserDriver;
/// use keycard_hardware::mock::SimulatedDispenser;
///
/// let (dispenser, handle) = SimulatedDispenser::new();
/// let link = dispenser.comm_open_with_baud("COM3", 9600).unwrap();
///
/// let mut status = [0u8; 4];
/// assert_eq!(dispenser.check_card_position(link, &mut status), 0);
/// assert_eq!(handle.polls(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct SimulatedDispenser {
    state: Arc<Mutex<DispenserState>>,
}

impl SimulatedDispenser {
    /// Create a simulated dispenser loaded with blank cards.
    ///
    /// Returns the driver and a handle that scripts its behaviour.
    pub fn new() -> (Self, SimulatedDispenserHandle) {
        let state = Arc::new(Mutex::new(DispenserState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            SimulatedDispenserHandle { state },
        )
    }

    fn state(&self) -> MutexGuard<'_, DispenserState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DispenserDriver for SimulatedDispenser {
    fn comm_open_with_baud(&self, _port: &str, _baud: u32) -> Option<DeviceHandle> {
        let mut state = self.state();
        state.serial_opens += 1;
        if state.serial_open_fails {
            return None;
        }
        Some(state.open())
    }

    fn usb_open(&self) -> Result<DeviceHandle, i32> {
        let mut state = self.state();
        state.usb_opens += 1;
        match state.usb_open_code {
            Some(code) => Err(code),
            None => Ok(state.open()),
        }
    }

    fn comm_close(&self, handle: DeviceHandle) -> i32 {
        self.state().close(handle)
    }

    fn usb_close(&self, handle: DeviceHandle) -> i32 {
        self.state().close(handle)
    }

    fn check_card_position(&self, _handle: DeviceHandle, status: &mut [u8; 4]) -> i32 {
        let mut state = self.state();
        if let Some(code) = state.status_code {
            return code;
        }
        state.polls += 1;

        if let Some(mut pending) = state.pending.take() {
            pending.polls_left = pending.polls_left.saturating_sub(1);
            if pending.polls_left == 0 {
                state.position = pending.target;
            } else {
                state.pending = Some(pending);
            }
        }

        let device = if state.busy_polls > 0 {
            state.busy_polls -= 1;
            DEVICE_SENDING_CARD
        } else {
            state.device_state
        };
        let retain_box = if state.retain_box_full {
            RETAIN_BOX_FULL
        } else {
            RETAIN_BOX_NOT_FULL
        };

        *status = [
            device,
            state.transport_byte(),
            state.card_box_byte(),
            retain_box,
        ];
        DRIVER_OK
    }

    fn move_card(&self, _handle: DeviceHandle, mode: u8) -> i32 {
        let mut state = self.state();
        state.moves.push(mode);
        if let Some(code) = state.move_codes.get(&mode) {
            return *code;
        }

        match mode {
            MOVE_TO_ENCODE => {
                if state.cards_remaining == 0 {
                    return ERR_CARD_BOX_EMPTY;
                }
                if state.card_in_path() {
                    return ERR_HAVE_CARD;
                }
                state.cards_remaining -= 1;
                let delay = state.move_delay_polls;
                state.schedule(CardPosition::Encode, delay);
            }
            MOVE_TO_DISPENSE => {
                if state.position != CardPosition::Encode {
                    return ERR_HAVE_NO_CARD;
                }
                let delay = state.move_delay_polls;
                state.schedule(CardPosition::Mouth, delay);
            }
            MOVE_EJECT => {
                if state.position != CardPosition::Mouth {
                    return ERR_HAVE_NO_CARD;
                }
                state.pending = state.take_after_polls.map(|polls| PendingMove {
                    target: CardPosition::Empty,
                    polls_left: polls,
                });
            }
            _ => return ERR_HAVE_NO_CARD,
        }
        DRIVER_OK
    }

    fn retain_to_card_box(
        &self,
        _handle: DeviceHandle,
        _enter_timeout_ms: u32,
        _move_timeout_ms: u32,
    ) -> i32 {
        let mut state = self.state();
        state.retain_calls += 1;
        if let Some(code) = state.retain_code {
            return code;
        }
        if state.retain_box_full {
            return ERR_RETAIN_BOX_FULL;
        }
        if !state.card_in_path() {
            return ERR_HAVE_NO_CARD;
        }
        state.position = CardPosition::Empty;
        state.pending = None;
        state.stalled = false;
        state.retained_cards += 1;
        DRIVER_OK
    }
}

/// Handle for scripting and inspecting a [`SimulatedDispenser`].
#[derive(Debug, Clone)]
pub struct SimulatedDispenserHandle {
    state: Arc<Mutex<DispenserState>>,
}

impl SimulatedDispenserHandle {
    fn state(&self) -> MutexGuard<'_, DispenserState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of blank cards in the card box.
    pub fn set_cards_remaining(&self, cards: u32) {
        self.state().cards_remaining = cards;
    }

    pub fn set_retain_box_full(&self, full: bool) {
        self.state().retain_box_full = full;
    }

    /// Raw device status byte reported once any busy polls are used up.
    pub fn set_device_state(&self, code: u8) {
        self.state().device_state = code;
    }

    /// Report a busy device for the next `polls` position queries.
    pub fn set_busy_polls(&self, polls: usize) {
        self.state().busy_polls = polls;
    }

    /// Polls needed for a card to reach its target position.
    pub fn set_move_delay_polls(&self, polls: usize) {
        self.state().move_delay_polls = polls.max(1);
    }

    /// Accept move commands but never deliver the card.
    pub fn stall_moves(&self) {
        self.state().stall_moves = true;
    }

    /// Polls after eject before the guest takes the card; `None` never takes it.
    pub fn set_take_after_polls(&self, polls: Option<usize>) {
        self.state().take_after_polls = polls.map(|p| p.max(1));
    }

    /// Place a card in the transport, as if left over from a prior run.
    pub fn place_card(&self, position: CardPosition) {
        self.state().position = position;
    }

    pub fn fail_serial_open(&self) {
        self.state().serial_open_fails = true;
    }

    pub fn fail_usb_open(&self, code: i32) {
        self.state().usb_open_code = Some(code);
    }

    pub fn fail_close(&self, code: i32) {
        self.state().close_code = Some(code);
    }

    pub fn fail_status_query(&self, code: i32) {
        self.state().status_code = Some(code);
    }

    /// Reject the given move mode with `code`.
    pub fn fail_move(&self, mode: u8, code: i32) {
        self.state().move_codes.insert(mode, code);
    }

    pub fn fail_retain(&self, code: i32) {
        self.state().retain_code = Some(code);
    }

    pub fn position(&self) -> CardPosition {
        self.state().position
    }

    pub fn is_open(&self) -> bool {
        self.state().open_handle.is_some()
    }

    pub fn serial_opens(&self) -> usize {
        self.state().serial_opens
    }

    pub fn usb_opens(&self) -> usize {
        self.state().usb_opens
    }

    pub fn closes(&self) -> usize {
        self.state().closes
    }

    pub fn polls(&self) -> usize {
        self.state().polls
    }

    /// Move modes issued so far, in order.
    pub fn moves(&self) -> Vec<u8> {
        self.state().moves.clone()
    }

    pub fn retain_calls(&self) -> usize {
        self.state().retain_calls
    }

    pub fn retained_cards(&self) -> usize {
        self.state().retained_cards
    }

    pub fn cards_remaining(&self) -> u32 {
        self.state().cards_remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poll(dispenser: &SimulatedDispenser, handle: DeviceHandle) -> [u8; 4] {
        let mut status = [0u8; 4];
        assert_eq!(dispenser.check_card_position(handle, &mut status), DRIVER_OK);
        status
    }

    #[test]
    fn test_card_travels_through_positions() {
        let (dispenser, control) = SimulatedDispenser::new();
        let link = dispenser.comm_open_with_baud("COM3", 9600).unwrap();

        assert_eq!(poll(&dispenser, link)[1], TRANSPORT_MEDIA_NOT_PRESENT);

        assert_eq!(dispenser.move_card(link, MOVE_TO_ENCODE), DRIVER_OK);
        assert_eq!(poll(&dispenser, link)[1], TRANSPORT_MEDIA_PRESENT);

        assert_eq!(dispenser.move_card(link, MOVE_TO_DISPENSE), DRIVER_OK);
        assert_eq!(poll(&dispenser, link)[1], TRANSPORT_MEDIA_ENTERING);

        assert_eq!(dispenser.move_card(link, MOVE_EJECT), DRIVER_OK);
        assert_eq!(poll(&dispenser, link)[1], TRANSPORT_MEDIA_NOT_PRESENT);

        assert_eq!(control.moves(), vec![MOVE_TO_ENCODE, MOVE_TO_DISPENSE, MOVE_EJECT]);
        assert_eq!(control.cards_remaining(), 49);
    }

    #[test]
    fn test_move_delay_counts_polls() {
        let (dispenser, control) = SimulatedDispenser::new();
        control.set_move_delay_polls(3);
        let link = dispenser.comm_open_with_baud("COM3", 9600).unwrap();

        dispenser.move_card(link, MOVE_TO_ENCODE);
        assert_eq!(poll(&dispenser, link)[1], TRANSPORT_MEDIA_NOT_PRESENT);
        assert_eq!(poll(&dispenser, link)[1], TRANSPORT_MEDIA_NOT_PRESENT);
        assert_eq!(poll(&dispenser, link)[1], TRANSPORT_MEDIA_PRESENT);
    }

    #[test]
    fn test_retain_without_card() {
        let (dispenser, control) = SimulatedDispenser::new();
        let link = dispenser.comm_open_with_baud("COM3", 9600).unwrap();

        assert_eq!(dispenser.retain_to_card_box(link, 4000, 4000), ERR_HAVE_NO_CARD);
        assert_eq!(control.retain_calls(), 1);
        assert_eq!(control.retained_cards(), 0);
    }

    #[test]
    fn test_retain_stalled_card() {
        let (dispenser, control) = SimulatedDispenser::new();
        control.stall_moves();
        let link = dispenser.comm_open_with_baud("COM3", 9600).unwrap();

        dispenser.move_card(link, MOVE_TO_ENCODE);
        assert_eq!(poll(&dispenser, link)[1], TRANSPORT_MEDIA_NOT_PRESENT);
        assert_eq!(dispenser.retain_to_card_box(link, 4000, 4000), DRIVER_OK);
        assert_eq!(control.retained_cards(), 1);
    }

    #[test]
    fn test_empty_card_box() {
        let (dispenser, control) = SimulatedDispenser::new();
        control.set_cards_remaining(0);
        let link = dispenser.comm_open_with_baud("COM3", 9600).unwrap();

        assert_eq!(poll(&dispenser, link)[2], CARD_BOX_EMPTY);
        assert_eq!(dispenser.move_card(link, MOVE_TO_ENCODE), ERR_CARD_BOX_EMPTY);
    }

    #[test]
    fn test_close_twice_reports_invalid_handle() {
        let (dispenser, control) = SimulatedDispenser::new();
        let link = dispenser.usb_open().unwrap();

        assert_eq!(dispenser.usb_close(link), DRIVER_OK);
        assert_eq!(dispenser.usb_close(link), SIM_INVALID_HANDLE);
        assert_eq!(control.closes(), 2);
        assert!(!control.is_open());
    }
}
