//! Items sent through a batch connection and the replies they produce.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::client::ClientError;
use crate::protocol::{HeaderFields, ReplyPart};

/// Body of an item: raw text is sent as is, structured data is serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemBody {
    Text(String),
    Json(serde_json::Value),
}

/// One logical HTTP request to multiplex over the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub body: Option<ItemBody>,
}

impl BatchItem {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            body: None,
        }
    }

    /// Attach a pre-serialized body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(ItemBody::Text(body.into()));
        self
    }

    /// Attach a structured body, serialized at send time.
    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(ItemBody::Json(body));
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ClientError> {
        if self.method.trim().is_empty() || self.path.trim().is_empty() {
            return Err(ClientError::InvalidItem(
                "method and path are required properties",
            ));
        }
        if !self.method.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(ClientError::InvalidItem("method must be a single alphabetic token"));
        }
        if self.path.contains(|c: char| c.is_ascii_whitespace() || c.is_ascii_control()) {
            return Err(ClientError::InvalidItem("path must not contain whitespace"));
        }
        Ok(())
    }

    /// Body as written on the wire; `None` when there is nothing to send.
    pub(crate) fn body_text(&self) -> Option<String> {
        match &self.body {
            Some(ItemBody::Text(text)) if !text.is_empty() => Some(text.clone()),
            Some(ItemBody::Json(value)) => Some(value.to_string()),
            _ => None,
        }
    }
}

/// Reply correlated to one sent item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub content_id: u64,
    pub status: u16,
    pub status_message: String,
    /// Sub-response headers keyed by lower-cased name.
    pub headers: HeaderFields,
    pub body: String,
}

impl Reply {
    pub(crate) fn from_part(content_id: u64, part: ReplyPart) -> Self {
        Self {
            content_id,
            status: part.message.status,
            status_message: part.message.status_message,
            headers: part.message.headers,
            body: part.body,
        }
    }

    /// Whether the sub-request itself succeeded.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}
