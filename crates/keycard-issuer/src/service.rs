//! Serialized issuance service.
//!
//! The kiosk front end may send requests concurrently, but the hardware can
//! only run one attempt at a time. The service owns the single orchestrator
//! behind an async mutex so callers queue in arrival order.

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::orchestrator::{HealthReport, IssuanceOrchestrator};
use crate::request::IssueRequest;
use crate::result::IssueResponse;

pub const SERVICE_NAME: &str = "keycard-issuer";

#[derive(Debug)]
pub struct IssuanceService {
    orchestrator: Mutex<IssuanceOrchestrator>,
}

impl IssuanceService {
    pub fn new(orchestrator: IssuanceOrchestrator) -> Self {
        Self {
            orchestrator: Mutex::new(orchestrator),
        }
    }

    /// Handle one issuance request. Never fails; errors become a failure
    /// response.
    pub async fn issue(&self, request: &IssueRequest) -> IssueResponse {
        let Some(payload) = request.payload() else {
            warn!("Issue request without card data");
            return IssueResponse::missing_payload();
        };
        if let Some(hotel_info) = &request.hotel_info {
            debug!(hotel_info_len = hotel_info.len(), "Hotel info supplied");
        }

        let mut orchestrator = self.orchestrator.lock().await;
        info!(payload_len = payload.len(), "Processing issue request");
        let result = orchestrator.issue_card(payload).await;
        IssueResponse::from(&result)
    }

    /// Probe the hardware. Waits for any running issuance to finish.
    pub async fn health(&self) -> HealthReport {
        self.orchestrator.lock().await.check_health()
    }

    /// Give back the orchestrator, e.g. for shutdown.
    pub fn into_inner(self) -> IssuanceOrchestrator {
        self.orchestrator.into_inner()
    }
}
