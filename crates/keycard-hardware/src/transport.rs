//! Card transport controller.
//!
//! Drives a card through the dispenser: box to encode position, encode
//! position to dispensing mouth, and out to the guest. Every movement is a
//! single command followed by a bounded polling loop over the position query.
//! Each loop checks the target condition before sleeping, so a card already in
//! place is seen on the first poll.
//!
//! # States
//!
//! ```text
//! Idle → CheckingStatus → MovingToEncode → InEncodePosition
//!      → MovingToDispense → InDispensePosition → Ejecting → Removed
//! any movement → TimedOut
//! any → Retained
//! ```

use crate::clock::{AnyClock, Clock};
use crate::devices::AnyDispenser;
use crate::driver::{DeviceHandle, DispenserDriver};
use crate::error::{HardwareError, Result};
use keycard_core::constants::{
    DEVICE_IDLE, DEVICE_READY_TIMEOUT_MS, DRIVER_OK, EJECT_TIMEOUT_MS, MOVE_EJECT,
    MOVE_TIMEOUT_MS, MOVE_TO_DISPENSE, MOVE_TO_ENCODE, POLL_INTERVAL_MS, RETAIN_ENTER_TIMEOUT_MS,
    RETAIN_MOVE_TIMEOUT_MS, SETTLE_DELAY_MS, describe_driver_code,
};
use keycard_core::{CardBoxStatus, PositionStatus, RetainBoxStatus, TransportStatus};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Warning attached to an ejection the guest did not confirm.
pub const EJECT_WARNING: &str = "Card may not have been removed";

/// Transport position state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    Idle,
    CheckingStatus,
    MovingToEncode,
    InEncodePosition,
    MovingToDispense,
    InDispensePosition,
    Ejecting,
    Removed,
    TimedOut,
    Retained,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Polling and settle budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportTimings {
    pub poll_interval: Duration,
    pub move_timeout: Duration,
    pub eject_timeout: Duration,
    pub device_ready_timeout: Duration,
    pub settle_delay: Duration,
}

impl Default for TransportTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(POLL_INTERVAL_MS),
            move_timeout: Duration::from_millis(MOVE_TIMEOUT_MS),
            eject_timeout: Duration::from_millis(EJECT_TIMEOUT_MS),
            device_ready_timeout: Duration::from_millis(DEVICE_READY_TIMEOUT_MS),
            settle_delay: Duration::from_millis(SETTLE_DELAY_MS),
        }
    }
}

/// Result of [`TransportController::eject`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EjectOutcome {
    /// The guest took the card within the ejection window.
    pub removed: bool,
    pub warning: Option<String>,
}

/// Result of [`TransportController::retain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetainOutcome {
    pub attempted: bool,
    pub success: bool,
    pub code: Option<i32>,
}

/// Controls card movement through the dispenser.
#[derive(Debug)]
pub struct TransportController {
    clock: AnyClock,
    timings: TransportTimings,
    state: TransportState,
    transitions: Vec<(TransportState, TransportState)>,
    last: Option<TransportStatus>,
}

impl TransportController {
    pub fn new(clock: AnyClock) -> Self {
        Self::with_timings(clock, TransportTimings::default())
    }

    pub fn with_timings(clock: AnyClock, timings: TransportTimings) -> Self {
        Self {
            clock,
            timings,
            state: TransportState::Idle,
            transitions: Vec::new(),
            last: None,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Every state change since creation or the last [`reset`](Self::reset).
    pub fn transitions(&self) -> &[(TransportState, TransportState)] {
        &self.transitions
    }

    pub fn timings(&self) -> &TransportTimings {
        &self.timings
    }

    /// Return to `Idle` and clear the transition log.
    pub fn reset(&mut self) {
        self.state = TransportState::Idle;
        self.transitions.clear();
    }

    fn enter(&mut self, next: TransportState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "Transport state");
            self.transitions.push((self.state, next));
            self.state = next;
        }
    }

    /// Read the four status bytes.
    ///
    /// # Errors
    /// Returns `HardwareError::StatusQuery` if the query fails.
    pub fn read_status(&self, driver: &AnyDispenser, handle: DeviceHandle) -> Result<PositionStatus> {
        let mut raw = [0u8; 4];
        let code = driver.check_card_position(handle, &mut raw);
        if code != DRIVER_OK {
            error!(code, label = describe_driver_code(code), "Failed to check card position");
            return Err(HardwareError::StatusQuery { code });
        }
        Ok(PositionStatus::from_bytes(raw))
    }

    /// Verify the dispenser can issue a card.
    ///
    /// Refuses while the card box is empty or the retain box is full. While
    /// the device reports itself busy, re-polls up to the device ready budget.
    ///
    /// # Errors
    /// Returns `CardBoxEmpty`, `RetainBoxFull`, `StatusQuery`, or
    /// `PositionTimeout` if the device stays busy.
    pub async fn check_device_status(
        &mut self,
        driver: &AnyDispenser,
        handle: DeviceHandle,
    ) -> Result<PositionStatus> {
        self.enter(TransportState::CheckingStatus);
        let start = self.clock.now();

        loop {
            let status = self.read_status(driver, handle)?;

            if status.card_box == CardBoxStatus::Empty {
                error!("Card box is empty");
                return Err(HardwareError::CardBoxEmpty);
            }
            if status.retain_box == RetainBoxStatus::Full {
                error!("Retain box is full");
                return Err(HardwareError::RetainBoxFull);
            }
            if !status.device.is_busy() {
                info!(
                    device = ?status.device,
                    card_box = ?status.card_box,
                    retain_box = ?status.retain_box,
                    "Device status OK"
                );
                return Ok(status);
            }

            let elapsed = self.clock.now() - start;
            if elapsed >= self.timings.device_ready_timeout {
                error!(device = ?status.device, "Device stayed busy");
                return Err(HardwareError::PositionTimeout {
                    subject: "device",
                    expected: DEVICE_IDLE,
                    last: Some(status.device.code()),
                    timeout_ms: millis(self.timings.device_ready_timeout),
                });
            }

            debug!(device = ?status.device, "Device busy, waiting");
            self.clock.sleep(self.timings.poll_interval).await;
        }
    }

    /// Poll until the transport reports `expected` or `timeout` elapses.
    ///
    /// # Errors
    /// Returns `PositionTimeout` carrying the expected and last observed codes.
    pub async fn wait_for_position(
        &mut self,
        driver: &AnyDispenser,
        handle: DeviceHandle,
        expected: TransportStatus,
        timeout: Duration,
    ) -> Result<PositionStatus> {
        match self.poll_until(driver, handle, expected, timeout).await? {
            Some(status) => Ok(status),
            None => {
                self.enter(TransportState::TimedOut);
                error!(expected = %expected, "Timeout waiting for card position");
                Err(HardwareError::position_timeout(
                    expected.code(),
                    self.last_seen(),
                    millis(timeout),
                ))
            }
        }
    }

    /// Move a blank card to the encode position.
    ///
    /// # Errors
    /// Returns `MoveCommand` if the command is rejected or `PositionTimeout`
    /// if the card does not arrive within the move budget.
    pub async fn move_to_encode_position(
        &mut self,
        driver: &AnyDispenser,
        handle: DeviceHandle,
    ) -> Result<PositionStatus> {
        info!("Moving card to encode position");
        self.enter(TransportState::MovingToEncode);
        let status = self
            .move_and_wait(driver, handle, MOVE_TO_ENCODE, TransportStatus::MediaPresent)
            .await?;
        self.enter(TransportState::InEncodePosition);
        Ok(status)
    }

    /// Move the card from the encode position to the dispensing mouth.
    ///
    /// # Errors
    /// Returns `MoveCommand` if the command is rejected or `PositionTimeout`
    /// if the card does not arrive within the move budget.
    pub async fn move_to_dispense_position(
        &mut self,
        driver: &AnyDispenser,
        handle: DeviceHandle,
    ) -> Result<PositionStatus> {
        info!("Moving card to dispense position");
        self.enter(TransportState::MovingToDispense);
        let status = self
            .move_and_wait(driver, handle, MOVE_TO_DISPENSE, TransportStatus::MediaEntering)
            .await?;
        self.enter(TransportState::InDispensePosition);
        Ok(status)
    }

    async fn move_and_wait(
        &mut self,
        driver: &AnyDispenser,
        handle: DeviceHandle,
        mode: u8,
        expected: TransportStatus,
    ) -> Result<PositionStatus> {
        issue_move(driver, handle, mode)?;

        let timeout = self.timings.move_timeout;
        match self.poll_until(driver, handle, expected, timeout).await? {
            Some(status) => {
                debug!(position = %expected, "Card reached position");
                self.clock.sleep(self.timings.settle_delay).await;
                Ok(status)
            }
            None => {
                self.enter(TransportState::TimedOut);
                error!(expected = %expected, "Card movement timeout");
                Err(HardwareError::position_timeout(
                    expected.code(),
                    self.last_seen(),
                    millis(timeout),
                ))
            }
        }
    }

    /// Push the card out of the mouth and wait for the guest to take it.
    ///
    /// If the ejection window passes with the card still in the mouth, the
    /// ejection still counts as done and carries a warning.
    ///
    /// # Errors
    /// Returns `MoveCommand` if the eject command is rejected.
    pub async fn eject(&mut self, driver: &AnyDispenser, handle: DeviceHandle) -> Result<EjectOutcome> {
        info!("Ejecting card");
        self.enter(TransportState::Ejecting);
        issue_move(driver, handle, MOVE_EJECT)?;

        let timeout = self.timings.eject_timeout;
        match self
            .poll_until(driver, handle, TransportStatus::MediaNotPresent, timeout)
            .await?
        {
            Some(_) => {
                info!("Card ejected and removed by guest");
                self.enter(TransportState::Removed);
                Ok(EjectOutcome {
                    removed: true,
                    warning: None,
                })
            }
            None => {
                warn!("Card ejection timeout - card may still be in position");
                Ok(EjectOutcome {
                    removed: false,
                    warning: Some(EJECT_WARNING.to_string()),
                })
            }
        }
    }

    /// Move whatever card is in the transport into the retain box.
    ///
    /// Never fails. With no handle the retain is skipped and reported as not
    /// attempted.
    pub fn retain(&mut self, driver: &AnyDispenser, handle: Option<DeviceHandle>) -> RetainOutcome {
        let Some(handle) = handle else {
            warn!("Skipping card retention: dispenser not open");
            return RetainOutcome {
                attempted: false,
                success: false,
                code: None,
            };
        };

        info!("Retaining card");
        let code =
            driver.retain_to_card_box(handle, RETAIN_ENTER_TIMEOUT_MS, RETAIN_MOVE_TIMEOUT_MS);
        if code != DRIVER_OK {
            warn!(code, label = describe_driver_code(code), "Failed to retain card");
            return RetainOutcome {
                attempted: true,
                success: false,
                code: Some(code),
            };
        }

        info!("Card retained");
        self.enter(TransportState::Retained);
        RetainOutcome {
            attempted: true,
            success: true,
            code: Some(code),
        }
    }

    /// Poll until `expected` is seen. `Ok(None)` means the budget ran out.
    async fn poll_until(
        &mut self,
        driver: &AnyDispenser,
        handle: DeviceHandle,
        expected: TransportStatus,
        timeout: Duration,
    ) -> Result<Option<PositionStatus>> {
        let start = self.clock.now();
        self.last = None;

        while self.clock.now() - start < timeout {
            let status = self.read_status(driver, handle)?;
            self.last = Some(status.transport);
            if status.transport == expected {
                return Ok(Some(status));
            }
            debug!(observed = %status.transport, expected = %expected, "Waiting for card position");
            self.clock.sleep(self.timings.poll_interval).await;
        }

        Ok(None)
    }

    fn last_seen(&self) -> Option<u8> {
        self.last.map(|status| status.code())
    }
}

fn issue_move(driver: &AnyDispenser, handle: DeviceHandle, mode: u8) -> Result<()> {
    let code = driver.move_card(handle, mode);
    if code != DRIVER_OK {
        error!(mode, code, label = describe_driver_code(code), "Move command failed");
        return Err(HardwareError::MoveCommand { mode, code });
    }
    Ok(())
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::mock::{CardPosition, SimulatedDispenser, SimulatedDispenserHandle};
    use keycard_core::constants::{DEVICE_SENDING_CARD, TRANSPORT_MEDIA_PRESENT};
    use rstest::rstest;

    const ERR_CODE: i32 = 0xA3;

    fn setup() -> (
        TransportController,
        ManualClock,
        AnyDispenser,
        SimulatedDispenserHandle,
        DeviceHandle,
    ) {
        let clock = ManualClock::new();
        let controller = TransportController::new(clock.clone().into());
        let (dispenser, control) = SimulatedDispenser::new();
        let handle = dispenser.comm_open_with_baud("COM3", 9600).unwrap();
        (controller, clock, AnyDispenser::Simulated(dispenser), control, handle)
    }

    #[tokio::test]
    async fn test_check_status_idle_device() {
        let (mut controller, clock, dispenser, control, handle) = setup();

        let status = controller.check_device_status(&dispenser, handle).await.unwrap();

        assert_eq!(status.card_box, CardBoxStatus::Sufficient);
        assert_eq!(control.polls(), 1);
        assert!(clock.sleeps().is_empty());
        assert_eq!(controller.state(), TransportState::CheckingStatus);
    }

    #[rstest]
    #[case::card_box_empty(0, false, HardwareError::CardBoxEmpty)]
    #[case::retain_box_full(50, true, HardwareError::RetainBoxFull)]
    #[tokio::test]
    async fn test_check_status_refuses(
        #[case] cards: u32,
        #[case] retain_full: bool,
        #[case] expected: HardwareError,
    ) {
        let (mut controller, _clock, dispenser, control, handle) = setup();
        control.set_cards_remaining(cards);
        control.set_retain_box_full(retain_full);

        let err = controller
            .check_device_status(&dispenser, handle)
            .await
            .unwrap_err();

        assert_eq!(err, expected);
    }

    #[tokio::test]
    async fn test_check_status_waits_for_busy_device() {
        let (mut controller, clock, dispenser, control, handle) = setup();
        control.set_busy_polls(3);

        controller.check_device_status(&dispenser, handle).await.unwrap();

        assert_eq!(control.polls(), 4);
        assert_eq!(clock.total_slept(), Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_check_status_busy_times_out() {
        let (mut controller, clock, dispenser, control, handle) = setup();
        control.set_device_state(DEVICE_SENDING_CARD);

        let err = controller
            .check_device_status(&dispenser, handle)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            HardwareError::PositionTimeout {
                subject: "device",
                expected: DEVICE_IDLE,
                timeout_ms: 15000,
                ..
            }
        ));
        assert!(clock.now() >= Duration::from_millis(DEVICE_READY_TIMEOUT_MS));
    }

    #[tokio::test]
    async fn test_status_query_failure() {
        let (mut controller, _clock, dispenser, control, handle) = setup();
        control.fail_status_query(-3);

        let err = controller
            .check_device_status(&dispenser, handle)
            .await
            .unwrap_err();

        assert_eq!(err, HardwareError::StatusQuery { code: -3 });
    }

    #[tokio::test]
    async fn test_move_to_encode_then_settle() {
        let (mut controller, clock, dispenser, control, handle) = setup();

        let status = controller
            .move_to_encode_position(&dispenser, handle)
            .await
            .unwrap();

        assert_eq!(status.transport, TransportStatus::MediaPresent);
        assert_eq!(control.position(), CardPosition::Encode);
        assert_eq!(control.moves(), vec![MOVE_TO_ENCODE]);
        // Arrival on the first poll, then the settle delay only.
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(SETTLE_DELAY_MS)]);
        assert_eq!(controller.state(), TransportState::InEncodePosition);
    }

    #[tokio::test]
    async fn test_move_waits_for_slow_card() {
        let (mut controller, clock, dispenser, control, handle) = setup();
        control.set_move_delay_polls(4);

        controller
            .move_to_encode_position(&dispenser, handle)
            .await
            .unwrap();

        assert_eq!(control.polls(), 4);
        assert_eq!(clock.total_slept(), Duration::from_millis(3 * 200 + 500));
    }

    #[tokio::test]
    async fn test_move_never_arrives() {
        let (mut controller, clock, dispenser, control, handle) = setup();
        control.stall_moves();

        let err = controller
            .move_to_encode_position(&dispenser, handle)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            HardwareError::PositionTimeout {
                subject: "transport",
                expected: TRANSPORT_MEDIA_PRESENT,
                last: Some(TransportStatus::MediaNotPresent.code()),
                timeout_ms: MOVE_TIMEOUT_MS,
            }
        );
        assert_eq!(control.polls(), 50);
        assert_eq!(clock.now(), Duration::from_millis(MOVE_TIMEOUT_MS));
        assert_eq!(controller.state(), TransportState::TimedOut);
    }

    #[tokio::test]
    async fn test_move_rejected() {
        let (mut controller, _clock, dispenser, control, handle) = setup();
        control.fail_move(MOVE_TO_ENCODE, ERR_CODE);

        let err = controller
            .move_to_encode_position(&dispenser, handle)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            HardwareError::MoveCommand {
                mode: MOVE_TO_ENCODE,
                code: ERR_CODE
            }
        );
        assert_eq!(control.polls(), 0);
    }

    #[tokio::test]
    async fn test_full_path_to_removal() {
        let (mut controller, _clock, dispenser, control, handle) = setup();

        controller.check_device_status(&dispenser, handle).await.unwrap();
        controller
            .move_to_encode_position(&dispenser, handle)
            .await
            .unwrap();
        controller
            .move_to_dispense_position(&dispenser, handle)
            .await
            .unwrap();
        let outcome = controller.eject(&dispenser, handle).await.unwrap();

        assert!(outcome.removed);
        assert_eq!(outcome.warning, None);
        assert_eq!(control.position(), CardPosition::Empty);
        assert_eq!(
            controller
                .transitions()
                .iter()
                .map(|(_, to)| *to)
                .collect::<Vec<_>>(),
            vec![
                TransportState::CheckingStatus,
                TransportState::MovingToEncode,
                TransportState::InEncodePosition,
                TransportState::MovingToDispense,
                TransportState::InDispensePosition,
                TransportState::Ejecting,
                TransportState::Removed,
            ]
        );
    }

    #[tokio::test]
    async fn test_eject_not_taken_warns() {
        let (mut controller, clock, dispenser, control, handle) = setup();
        control.place_card(CardPosition::Mouth);
        control.set_take_after_polls(None);

        let outcome = controller.eject(&dispenser, handle).await.unwrap();

        assert!(!outcome.removed);
        assert_eq!(outcome.warning.as_deref(), Some(EJECT_WARNING));
        assert_eq!(clock.now(), Duration::from_millis(EJECT_TIMEOUT_MS));
        assert_eq!(controller.state(), TransportState::Ejecting);
    }

    #[tokio::test]
    async fn test_wait_for_position_sees_card_on_first_poll() {
        let (mut controller, clock, dispenser, control, handle) = setup();
        control.place_card(CardPosition::Encode);

        controller
            .wait_for_position(
                &dispenser,
                handle,
                TransportStatus::MediaPresent,
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert_eq!(control.polls(), 1);
        assert_eq!(clock.now(), Duration::ZERO);
    }

    #[test]
    fn test_retain_without_handle_is_skipped() {
        let (mut controller, _clock, dispenser, control, _handle) = setup();

        let outcome = controller.retain(&dispenser, None);

        assert_eq!(
            outcome,
            RetainOutcome {
                attempted: false,
                success: false,
                code: None
            }
        );
        assert_eq!(control.retain_calls(), 0);
    }

    #[test]
    fn test_retain_card_in_path() {
        let (mut controller, _clock, dispenser, control, handle) = setup();
        control.place_card(CardPosition::Encode);

        let outcome = controller.retain(&dispenser, Some(handle));

        assert!(outcome.success);
        assert_eq!(control.retained_cards(), 1);
        assert_eq!(controller.state(), TransportState::Retained);
    }

    #[test]
    fn test_retain_failure_is_reported_not_raised() {
        let (mut controller, _clock, dispenser, control, handle) = setup();
        control.fail_retain(0xA5);

        let outcome = controller.retain(&dispenser, Some(handle));

        assert_eq!(
            outcome,
            RetainOutcome {
                attempted: true,
                success: false,
                code: Some(0xA5)
            }
        );
    }

    #[test]
    fn test_reset_clears_transitions() {
        let (mut controller, _clock, dispenser, control, handle) = setup();
        control.place_card(CardPosition::Mouth);
        controller.retain(&dispenser, Some(handle));

        controller.reset();

        assert_eq!(controller.state(), TransportState::Idle);
        assert!(controller.transitions().is_empty());
    }
}
