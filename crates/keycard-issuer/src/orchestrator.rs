//! Card issuance orchestrator.
//!
//! Runs one issuance attempt end to end:
//!
//! 1. Validate the hex payload.
//! 2. Open both device handles.
//! 3. Check the dispenser status.
//! 4. Move a card to the encode position and confirm it is there.
//! 5. Detect the chip family and read the UID.
//! 6. Write the payload and halt the chip.
//! 7. Move the card to the dispensing mouth and eject it.
//!
//! A failure in steps 3 to 7 retains the card once. Whatever happens, both
//! handles are closed exactly once before the attempt returns. An attempt is
//! never retried.

use chrono::Utc;
use keycard_core::constants::WAIT_POSITION_TIMEOUT_MS;
use keycard_core::{EncodingPayload, EncodingTarget, PositionStatus, TransportStatus};
use keycard_hardware::{
    AnyClock, CardEncoder, DeviceLinkManager, HardwareError, TransportController,
};
use serde::Serialize;
use std::time::Duration;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::{Config, ConfigError};
use crate::error::{IssuanceError, IssuancePhase};
use crate::result::{IssuanceResult, IssuanceSuccess};
use crate::state_machine::{IssuanceState, IssuanceStateMachine, StateTransition};

/// Hardware reachability as reported by [`IssuanceOrchestrator::check_health`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PositionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A step failure before it is turned into an [`IssuanceError`].
struct StepFailure {
    phase: IssuancePhase,
    error: HardwareError,
}

fn at(phase: IssuancePhase) -> impl FnOnce(HardwareError) -> StepFailure {
    move |error| StepFailure { phase, error }
}

/// Sequences the link manager, transport controller, and encoder.
#[derive(Debug)]
pub struct IssuanceOrchestrator {
    links: DeviceLinkManager,
    transport: TransportController,
    encoder: CardEncoder,
    target: EncodingTarget,
    position_wait: Duration,
    machine: IssuanceStateMachine,
}

impl IssuanceOrchestrator {
    /// Build an orchestrator with default timings.
    pub fn new(links: DeviceLinkManager, clock: AnyClock, target: EncodingTarget) -> Self {
        let mac = links.config().mac_address;
        Self::from_parts(
            links,
            TransportController::new(clock.clone()),
            CardEncoder::new(clock, mac),
            target,
        )
    }

    pub fn from_parts(
        links: DeviceLinkManager,
        transport: TransportController,
        encoder: CardEncoder,
        target: EncodingTarget,
    ) -> Self {
        Self {
            links,
            transport,
            encoder,
            target,
            position_wait: Duration::from_millis(WAIT_POSITION_TIMEOUT_MS),
            machine: IssuanceStateMachine::new(),
        }
    }

    /// Build an orchestrator with the configured target and timings.
    ///
    /// # Errors
    /// Returns `ValidationError` if the sector key does not decode.
    pub fn from_config(
        config: &Config,
        links: DeviceLinkManager,
        clock: AnyClock,
    ) -> Result<Self, ConfigError> {
        let target = config.encoding.target()?;
        let transport =
            TransportController::with_timings(clock.clone(), config.timing.transport_timings());
        let encoder = CardEncoder::new(clock, links.config().mac_address)
            .with_inter_block_delay(config.timing.inter_block_delay());

        let mut orchestrator = Self::from_parts(links, transport, encoder, target);
        orchestrator.position_wait = config.timing.wait_position_timeout();
        Ok(orchestrator)
    }

    pub fn state(&self) -> IssuanceState {
        self.machine.current_state()
    }

    /// Transitions of the most recent attempt.
    pub fn last_attempt(&self) -> Vec<StateTransition> {
        self.machine.current_attempt()
    }

    pub fn links(&self) -> &DeviceLinkManager {
        &self.links
    }

    pub fn target(&self) -> &EncodingTarget {
        &self.target
    }

    /// Issue one card carrying `hex_payload`.
    ///
    /// # Errors
    /// Returns an [`IssuanceError`] naming the failed phase. Phases after the
    /// device open carry the outcome of the retain that followed.
    pub async fn issue_card(&mut self, hex_payload: &str) -> IssuanceResult {
        let attempt_id = Uuid::new_v4();
        let span = info_span!("issuance", %attempt_id);
        self.attempt(hex_payload).instrument(span).await
    }

    async fn attempt(&mut self, hex_payload: &str) -> IssuanceResult {
        self.machine.reset();
        self.transport.reset();

        let result = match self.run(hex_payload).await {
            Ok(success) => {
                self.advance(IssuanceState::Done);
                info!(
                    card_id = %success.card_id(),
                    card_type = %success.card_type(),
                    "Card issuance completed successfully"
                );
                Ok(success)
            }
            Err(StepFailure { phase, error }) => Err(self.recover(phase, error)),
        };

        let report = self.links.close_all();
        debug!(?report, "Hardware connections closed");
        result
    }

    async fn run(&mut self, hex_payload: &str) -> Result<IssuanceSuccess, StepFailure> {
        let payload = EncodingPayload::from_hex(hex_payload)
            .map_err(|e| StepFailure {
                phase: IssuancePhase::Validation,
                error: e.into(),
            })?;
        info!(
            payload_len = payload.len(),
            blocks = payload.block_count(),
            "Starting card issuance"
        );

        self.links.open().map_err(at(IssuancePhase::Open))?;
        let dispenser = self.links.dispenser_handle().map_err(at(IssuancePhase::Open))?;
        let encoder = self.links.encoder_handle().map_err(at(IssuancePhase::Open))?;
        self.advance(IssuanceState::HandlesOpen);

        self.transport
            .check_device_status(self.links.dispenser(), dispenser)
            .await
            .map_err(at(IssuancePhase::StatusCheck))?;
        self.advance(IssuanceState::StatusChecked);

        self.transport
            .move_to_encode_position(self.links.dispenser(), dispenser)
            .await
            .map_err(at(IssuancePhase::MoveToEncode))?;
        self.transport
            .wait_for_position(
                self.links.dispenser(),
                dispenser,
                TransportStatus::MediaPresent,
                self.position_wait,
            )
            .await
            .map_err(at(IssuancePhase::MoveToEncode))?;

        let family = self
            .encoder
            .detect_type(self.links.encoder(), encoder)
            .map_err(at(IssuancePhase::Detection))?;
        let card = self
            .encoder
            .get_id(self.links.encoder(), encoder, family)
            .map_err(at(IssuancePhase::ReadId))?;
        info!(card_id = %card.card_id(), card_type = %family, "Card detected");

        let blocks_written = self
            .encoder
            .write_payload(self.links.encoder(), encoder, family, &payload, &self.target)
            .await
            .map_err(at(IssuancePhase::Encoding))?;
        self.encoder.halt(self.links.encoder(), encoder, family);
        let encoded_at = Utc::now();
        self.advance(IssuanceState::Encoded);

        self.transport
            .move_to_dispense_position(self.links.dispenser(), dispenser)
            .await
            .map_err(at(IssuancePhase::MoveToDispense))?;
        self.advance(IssuanceState::Positioned);

        let ejected = self
            .transport
            .eject(self.links.dispenser(), dispenser)
            .await
            .map_err(at(IssuancePhase::Ejection))?;
        self.advance(IssuanceState::Ejected);

        Ok(IssuanceSuccess {
            card,
            encoded_at,
            blocks_written,
            warning: ejected.warning,
        })
    }

    fn recover(&mut self, phase: IssuancePhase, source: HardwareError) -> IssuanceError {
        error!(
            %phase,
            error = %source,
            code = source.driver_code(),
            "Card issuance failed"
        );
        self.advance(IssuanceState::Failing);

        let mut failure = IssuanceError::new(phase, source);
        if phase.retains_card() {
            self.advance(IssuanceState::Retaining);
            let handle = self.links.dispenser_handle().ok();
            let retention = self.transport.retain(self.links.dispenser(), handle);
            failure = failure.with_retention(retention);
        }

        self.advance(IssuanceState::Failed);
        failure
    }

    fn advance(&mut self, next: IssuanceState) {
        if let Err(err) = self.machine.transition_to(next) {
            warn!(%err, "Rejected issuance state transition");
        }
    }

    /// Open both devices, read the dispenser status, and close again.
    pub fn check_health(&mut self) -> HealthReport {
        let probe = self
            .links
            .open()
            .and_then(|()| self.links.dispenser_handle())
            .and_then(|handle| self.transport.read_status(self.links.dispenser(), handle));
        self.links.close_all();

        match probe {
            Ok(status) => HealthReport {
                healthy: true,
                status: Some(status),
                error: None,
            },
            Err(err) => {
                warn!(error = %err, "Hardware health check failed");
                HealthReport {
                    healthy: false,
                    status: None,
                    error: Some(err.to_string()),
                }
            }
        }
    }
}
