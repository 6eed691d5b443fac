//! The chirp record and the JSON shapes built around it.
//!
//! A [`Chirp`] is what the store holds and what every node puts on the wire.
//! [`ChirpDraft`] is the validated body of a create or update request, and
//! [`Feed`] is the `{"chirps": [...]}` envelope returned by `GET /chirps`.

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Identifier of a chirp. Stores issue identifiers starting at 1.
pub type ChirpId = i64;

/// Identifier carried by the synthetic entry standing in for a failed peer.
pub const ERROR_ENTRY_ID: ChirpId = -1;

/// Author name carried by the synthetic entry standing in for a failed peer.
pub const ERROR_ENTRY_USERNAME: &str = "Error";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chirp {
    pub id: ChirpId,
    pub username: String,
    pub content: String,
    #[serde(with = "timestamp")]
    pub timestamp: NaiveDateTime,
}

impl Chirp {
    /// Placeholder merged into a federated read when `peer` could not deliver
    /// its chirps.
    pub fn unreachable_peer(peer: &str) -> Self {
        Self {
            id: ERROR_ENTRY_ID,
            username: ERROR_ENTRY_USERNAME.to_string(),
            content: format!("Unable to fetch chirps from {peer}"),
            timestamp: now(),
        }
    }

    pub fn is_error_entry(&self) -> bool {
        self.id == ERROR_ENTRY_ID && self.username == ERROR_ENTRY_USERNAME
    }
}

/// Current wall-clock time in the node's local zone.
pub fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Response body of `GET /chirps`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    pub chirps: Vec<Chirp>,
}

impl Feed {
    pub fn new(chirps: Vec<Chirp>) -> Self {
        Self { chirps }
    }
}

/// Author and content supplied by a client on `POST /chirps` or
/// `PUT /chirps/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChirpDraft {
    pub username: String,
    pub content: String,
}

impl ChirpDraft {
    pub fn new(username: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            content: content.into(),
        }
    }

    /// Decodes and validates a request body.
    ///
    /// Extra fields are ignored. Both fields must be JSON strings; the
    /// username must contain something other than whitespace and the content
    /// must not be empty.
    pub fn from_body(body: &[u8]) -> Result<Self, ApiError> {
        let value: serde_json::Value = serde_json::from_slice(body).map_err(invalid_json)?;
        if !value.is_object() {
            return Err(ApiError::MalformedBody(
                "Invalid JSON format: expected an object".to_string(),
            ));
        }
        let draft: ChirpDraft = serde_json::from_value(value).map_err(invalid_json)?;

        if draft.username.trim().is_empty() {
            return Err(ApiError::MalformedBody(
                "username must not be empty".to_string(),
            ));
        }
        if draft.content.is_empty() {
            return Err(ApiError::MalformedBody(
                "content must not be empty".to_string(),
            ));
        }

        Ok(draft)
    }
}

fn invalid_json(err: serde_json::Error) -> ApiError {
    ApiError::MalformedBody(format!("Invalid JSON format: {err}"))
}

/// ISO-8601 local date-time without a zone, e.g. `2024-11-02T14:03:11.123456`.
///
/// Minute precision (`2024-11-02T14:03`) is accepted on input because some
/// writers drop zero seconds.
pub(crate) mod timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
    const MINUTE_FORMAT: &str = "%Y-%m-%dT%H:%M";

    pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&value.format(FORMAT))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<NaiveDateTime, chrono::ParseError> {
        NaiveDateTime::parse_from_str(raw, FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(raw, MINUTE_FORMAT))
    }
}
