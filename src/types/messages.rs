//! Pub/Sub REST API wire types.
//!
//! These mirror the JSON bodies of the `v1` endpoints the relay uses:
//! `topics.publish`, `subscriptions.pull`, `subscriptions.acknowledge` and
//! `subscriptions.modifyAckDeadline`. Message data travels base64 encoded.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A message as carried on the wire
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubsubMessage {
    /// Base64 encoded payload
    #[serde(default)]
    pub data: String,

    /// Server-assigned id (received messages only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    /// Server publish time, RFC 3339 (received messages only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_time: Option<String>,
}

impl PubsubMessage {
    /// Wrap a raw payload for publishing
    pub fn from_payload(payload: &[u8]) -> Self {
        Self {
            data: BASE64.encode(payload),
            ..Self::default()
        }
    }

    /// Decode the payload
    pub fn payload(&self) -> Result<Vec<u8>, Error> {
        BASE64
            .decode(&self.data)
            .map_err(|e| Error::Transport(format!("invalid message data: {}", e)))
    }
}

/// Body of `topics.publish`
#[derive(Debug, Clone, Serialize)]
pub struct PublishRequest {
    /// Messages to publish
    pub messages: Vec<PubsubMessage>,
}

/// Response of `topics.publish`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    /// Ids in the same order as the published messages
    #[serde(default)]
    pub message_ids: Vec<String>,
}

/// Body of `subscriptions.pull`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// Upper bound on messages returned
    pub max_messages: u32,
}

/// Response of `subscriptions.pull`; the API returns `{}` when nothing is pending
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    /// Pulled messages
    #[serde(default)]
    pub received_messages: Vec<ReceivedMessage>,
}

/// One pulled message with the id used to ack or nack it
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessage {
    /// Handle for acknowledge / modifyAckDeadline
    pub ack_id: String,
    /// The message
    pub message: PubsubMessage,
    /// Delivery attempt counter (only with dead lettering enabled)
    #[serde(default)]
    pub delivery_attempt: Option<u32>,
}

/// Body of `subscriptions.acknowledge`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeRequest {
    /// Ack ids to acknowledge
    pub ack_ids: Vec<String>,
}

/// Body of `subscriptions.modifyAckDeadline`
///
/// A deadline of zero makes the messages immediately available for
/// redelivery, which is how a nack is expressed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyAckDeadlineRequest {
    /// Ack ids to modify
    pub ack_ids: Vec<String>,
    /// New deadline in seconds
    pub ack_deadline_seconds: u32,
}

/// Error envelope returned by Google APIs
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleErrorEnvelope {
    /// Error details
    pub error: GoogleErrorBody,
}

/// Error details
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleErrorBody {
    /// HTTP status code
    #[serde(default)]
    pub code: u16,
    /// Message
    #[serde(default)]
    pub message: String,
    /// Canonical status, e.g. `NOT_FOUND`
    #[serde(default)]
    pub status: Option<String>,
}
