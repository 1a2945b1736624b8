//! Boundary tokens and the `multipart/mixed` content type that carries them.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use super::ProtocolError;

/// Longest boundary RFC 2046 allows.
pub const MAX_BOUNDARY_LEN: usize = 70;

const MULTIPART_MIXED: &str = "multipart/mixed";

/// Delimiter token shared by client and server for one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Boundary(String);

impl Boundary {
    /// Generate a fresh token from the current timestamp and a random suffix.
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        Self(format!(
            "==============={}_{}==",
            millis,
            fastrand::u32(0..1_000_000)
        ))
    }

    /// Wrap an existing token, rejecting anything that would break framing.
    pub fn new(token: impl Into<String>) -> Result<Self, ProtocolError> {
        let token = token.into();
        let valid = !token.is_empty()
            && token.len() <= MAX_BOUNDARY_LEN
            && !token.contains(['\r', '\n', '"', '\''])
            && !token.ends_with(' ');
        if valid {
            Ok(Self(token))
        } else {
            Err(ProtocolError::InvalidBoundary(token))
        }
    }

    /// Extract the boundary from a `multipart/mixed; boundary=...` value.
    pub fn from_content_type(value: &str) -> Result<Self, ProtocolError> {
        let mut params = value.split(';');
        let media_type = params.next().unwrap_or_default().trim();
        if !media_type.eq_ignore_ascii_case(MULTIPART_MIXED) {
            return Err(ProtocolError::UnsupportedMediaType(value.to_string()));
        }

        let token = params
            .filter_map(|param| param.split_once('='))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("boundary"))
            .map(|(_, token)| token.trim().trim_matches(|c| c == '"' || c == '\''))
            .ok_or(ProtocolError::MissingBoundary)?;

        Self::new(token)
    }

    /// Raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Line that opens every part: `--{boundary}`.
    pub fn delimiter(&self) -> String {
        format!("--{}", self.0)
    }

    /// Line that closes the stream: `--{boundary}--`.
    pub fn terminator(&self) -> String {
        format!("--{}--", self.0)
    }

    /// Content type header value declaring this boundary.
    pub fn content_type(&self) -> String {
        format!("{}; boundary=\"{}\"", MULTIPART_MIXED, self.0)
    }
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
