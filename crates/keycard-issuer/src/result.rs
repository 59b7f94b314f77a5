//! Issuance outcome and its JSON response shape.

use chrono::{DateTime, Utc};
use keycard_core::{CardIdentity, ChipFamily};
use keycard_hardware::RetainOutcome;
use serde::Serialize;

use crate::error::IssuanceError;

pub const SUCCESS_MESSAGE: &str = "Card issued successfully";
pub const FAILURE_MESSAGE: &str = "Card issuance failed";
pub const MISSING_PAYLOAD_ERROR: &str = "cardData or lockData is required";
pub const MISSING_PAYLOAD_MESSAGE: &str = "Card data is required to issue card";

/// Record of a card that was encoded and handed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuanceSuccess {
    pub card: CardIdentity,
    pub encoded_at: DateTime<Utc>,
    pub blocks_written: usize,
    /// Set when the guest did not take the card within the ejection window.
    pub warning: Option<String>,
}

impl IssuanceSuccess {
    /// Card UID as uppercase hex.
    pub fn card_id(&self) -> String {
        self.card.card_id()
    }

    pub fn card_type(&self) -> ChipFamily {
        self.card.family()
    }
}

/// Outcome of one `issue_card` call.
pub type IssuanceResult = std::result::Result<IssuanceSuccess, IssuanceError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardData {
    pub card_id: String,
    pub card_type: ChipFamily,
    pub encoded_at: DateTime<Utc>,
}

/// Response returned to the kiosk front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum IssueResponse {
    Success {
        success: bool,
        data: CardData,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        warning: Option<String>,
    },
    Failure {
        success: bool,
        error: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        retention: Option<RetainOutcome>,
    },
}

impl IssueResponse {
    pub fn success(result: &IssuanceSuccess) -> Self {
        IssueResponse::Success {
            success: true,
            data: CardData {
                card_id: result.card_id(),
                card_type: result.card_type(),
                encoded_at: result.encoded_at,
            },
            message: SUCCESS_MESSAGE.to_string(),
            warning: result.warning.clone(),
        }
    }

    pub fn failure(error: &IssuanceError) -> Self {
        IssueResponse::Failure {
            success: false,
            error: error.to_string(),
            message: FAILURE_MESSAGE.to_string(),
            retention: error.retention,
        }
    }

    /// Request carried neither `cardData` nor `lockData`.
    pub fn missing_payload() -> Self {
        IssueResponse::Failure {
            success: false,
            error: MISSING_PAYLOAD_ERROR.to_string(),
            message: MISSING_PAYLOAD_MESSAGE.to_string(),
            retention: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, IssueResponse::Success { .. })
    }
}

impl From<&IssuanceResult> for IssueResponse {
    fn from(result: &IssuanceResult) -> Self {
        match result {
            Ok(success) => IssueResponse::success(success),
            Err(error) => IssueResponse::failure(error),
        }
    }
}
