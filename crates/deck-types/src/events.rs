use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{CardView, Engagement, ExportedNotification, ExportedUser};
use crate::error::ApiError;
use crate::models::CoinBalances;

/// Events pushed to a user's live connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PushEvent {
    NewNotification(ExportedNotification),
    UpdateCoinBalance(CoinBalances),
    UpdateEngagement(Engagement),
    /// A reply was posted in a thread the user takes part in.
    NewCard(Box<CardView>),
    UpdateUser(Box<ExportedUser>),
}

impl PushEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewNotification(_) => "NewNotification",
            Self::UpdateCoinBalance(_) => "UpdateCoinBalance",
            Self::UpdateEngagement(_) => "UpdateEngagement",
            Self::NewCard(_) => "NewCard",
            Self::UpdateUser(_) => "UpdateUser",
        }
    }
}

/// A method call sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub rpc: String,
    #[serde(rename = "requestID")]
    pub request_id: Value,
    #[serde(default)]
    pub data: Value,
}

/// Reply to a `RequestFrame`, echoing its method and request id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub rpc: String,
    #[serde(rename = "requestID")]
    pub request_id: Value,
    pub ack: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl ResponseFrame {
    pub fn ok(req: &RequestFrame, data: Value) -> Self {
        Self {
            rpc: req.rpc.clone(),
            request_id: req.request_id.clone(),
            ack: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(req: &RequestFrame, error: ApiError) -> Self {
        Self {
            rpc: req.rpc.clone(),
            request_id: req.request_id.clone(),
            ack: false,
            data: None,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_push_event_tagging() {
        let event = PushEvent::UpdateCoinBalance(CoinBalances {
            coin_balance: 7,
            temporary_coin_balance: 0,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "UpdateCoinBalance");
        assert_eq!(json["data"]["coinBalance"], 7);
    }

    #[test]
    fn test_request_frame_without_data() {
        let frame: RequestFrame =
            serde_json::from_str(r#"{"rpc":"logout","requestID":4}"#).unwrap();
        assert_eq!(frame.rpc, "logout");
        assert!(frame.data.is_null());
    }

    #[test]
    fn test_error_frame_shape() {
        let req = RequestFrame {
            rpc: "getCard".into(),
            request_id: Value::from("a1"),
            data: serde_json::json!({ "cardId": Uuid::nil() }),
        };
        let frame = ResponseFrame::err(&req, ApiError::not_found("card"));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["ack"], false);
        assert_eq!(json["requestID"], "a1");
        assert_eq!(json["error"]["code"], "NOT_FOUND");
        assert!(json.get("data").is_none());
    }
}
