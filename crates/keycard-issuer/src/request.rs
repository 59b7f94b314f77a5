//! Issuance request as received from the kiosk front end.

use serde::{Deserialize, Serialize};

/// Request to issue one card.
///
/// `cardData` carries the lock platform's card payload. `lockData` is the
/// older field name and is accepted when `cardData` is absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_data: Option<String>,
    /// Accepted for compatibility; the encoder does not use it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hotel_info: Option<String>,
}

impl IssueRequest {
    pub fn new(card_data: impl Into<String>) -> Self {
        Self {
            card_data: Some(card_data.into()),
            ..Self::default()
        }
    }

    /// The hex payload to write, preferring `cardData`.
    pub fn payload(&self) -> Option<&str> {
        [&self.card_data, &self.lock_data]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|data| !data.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::card_data(r#"{"cardData":"AA","lockData":"BB"}"#, Some("AA"))]
    #[case::legacy_lock_data(r#"{"lockData":"BB"}"#, Some("BB"))]
    #[case::empty_card_data(r#"{"cardData":"","lockData":"BB"}"#, Some("BB"))]
    #[case::neither(r#"{"hotelInfo":"h1"}"#, None)]
    #[case::empty(r#"{}"#, None)]
    fn test_payload_selection(#[case] json: &str, #[case] expected: Option<&str>) {
        let request: IssueRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.payload(), expected);
    }

    #[test]
    fn test_serializes_camel_case() {
        let request = IssueRequest {
            hotel_info: Some("h1".to_string()),
            ..IssueRequest::new("0A0B")
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, serde_json::json!({"cardData": "0A0B", "hotelInfo": "h1"}));
    }
}
