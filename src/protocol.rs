use crate::{
    error::{RelayError, Result},
    types::GlucoseEntry,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Byte terminating every frame on the BLE channel
pub const FRAME_DELIMITER: u8 = b'\n';

/// Request types understood by the companion
///
/// Serialized as the uppercase names used on the wire (`FETCH_DATA`, ...).
/// Receivers drop envelopes with any other `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Fetch recent glucose entries
    FetchData,
    /// Store Nightscout URL, access token or entry count
    UpdateSettings,
    /// Check that a Nightscout URL answers `/api/v1/status`
    VerifyUrl,
    /// Obtain the API token
    GetSecret,
}

impl MessageType {
    /// All request types
    pub const ALL: [Self; 4] = [
        Self::FetchData,
        Self::UpdateSettings,
        Self::VerifyUrl,
        Self::GetSecret,
    ];

    /// Wire name of the type
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FetchData => "FETCH_DATA",
            Self::UpdateSettings => "UPDATE_SETTINGS",
            Self::VerifyUrl => "VERIFY_URL",
            Self::GetSecret => "GET_SECRET",
        }
    }

    /// Parse a wire name, `None` for unknown types
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// Whether an uncorrelated response looks like an answer to this type
    ///
    /// Only used for responses that do not echo a request id.
    #[must_use]
    pub const fn matches_shape(self, data: &ResponseData) -> bool {
        match self {
            Self::GetSecret => data.secret.is_some(),
            Self::FetchData => {
                data.secret.is_none() && (data.entries.is_some() || !data.success)
            }
            Self::VerifyUrl | Self::UpdateSettings => {
                data.secret.is_none() && data.entries.is_none()
            }
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged request sent from the watch to its companion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    /// Request type
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Correlation id echoed by the companion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    /// Opaque request payload
    #[serde(default = "empty_payload")]
    pub payload: Value,
}

fn empty_payload() -> Value {
    Value::Object(Map::new())
}

impl MessageEnvelope {
    /// Build a request envelope
    ///
    /// `extra` becomes the payload; without it the payload is an empty object.
    #[must_use]
    pub fn request(kind: MessageType, extra: Option<Value>) -> Self {
        Self {
            kind,
            request_id: None,
            payload: extra.unwrap_or_else(empty_payload),
        }
    }

    /// Attach a correlation id
    #[must_use]
    pub fn with_request_id(mut self, request_id: u64) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Decode the payload into a typed structure
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidParameters`] if the payload does not match `T`.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            RelayError::InvalidParameters(format!("{} payload: {e}", self.kind))
        })
    }
}

/// Response tag; only `"response"` is accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseTag {
    /// The single response tag
    #[default]
    Response,
}

/// Response sent from the companion back to the watch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    /// Always [`ResponseTag::Response`]
    #[serde(rename = "type")]
    pub tag: ResponseTag,
    /// Request id this answers, when the peer echoes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    /// Result of the request
    pub data: ResponseData,
}

impl ResponseEnvelope {
    /// Wrap response data
    #[must_use]
    pub const fn new(request_id: Option<u64>, data: ResponseData) -> Self {
        Self {
            tag: ResponseTag::Response,
            request_id,
            data,
        }
    }
}

/// Result body of a [`ResponseEnvelope`]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResponseData {
    /// Whether the request succeeded
    pub success: bool,
    /// API token, for `GET_SECRET`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Marks answers to `GET_SECRET`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<bool>,
    /// Failure description, present iff `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Glucose entries, for `FETCH_DATA`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<GlucoseEntry>>,
    /// Server version, for `VERIFY_URL`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ResponseData {
    /// Successful response without payload
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// Failed response
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Successful `GET_SECRET` response
    #[must_use]
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            success: true,
            token: Some(token.into()),
            secret: Some(true),
            ..Self::default()
        }
    }

    /// Successful `FETCH_DATA` response
    #[must_use]
    pub fn entries(entries: Vec<GlucoseEntry>) -> Self {
        Self {
            success: true,
            entries: Some(entries),
            ..Self::default()
        }
    }

    /// Mark the response as an answer to `GET_SECRET`
    #[must_use]
    pub fn as_secret(mut self) -> Self {
        self.secret = Some(true);
        self
    }

    /// Check the success/payload invariant for a response to `kind`
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Remote`] carrying the peer's error for failures,
    /// or [`RelayError::ParseError`] when the response breaks the invariant.
    pub fn check(&self, kind: MessageType) -> Result<()> {
        if !self.success {
            return Err(match &self.error {
                Some(error) => RelayError::Remote(error.clone()),
                None => RelayError::ParseError("failure without error".to_string()),
            });
        }

        match kind {
            MessageType::GetSecret if self.token.is_none() => {
                Err(RelayError::ParseError("missing token".to_string()))
            }
            MessageType::FetchData if self.entries.is_none() => {
                Err(RelayError::ParseError("missing entries".to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Payload of `UPDATE_SETTINGS`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsPayload {
    /// Nightscout base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Nightscout access token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Number of entries fetched by `FETCH_DATA`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

/// Payload of `VERIFY_URL`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyPayload {
    /// URL to verify instead of the stored one
    #[serde(default)]
    pub url: Option<String>,
}

/// Payload of `FETCH_DATA`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchPayload {
    /// Entry count override
    #[serde(default)]
    pub count: Option<u32>,
}

/// Monotonic request id source, starting at 1
#[derive(Debug, Default)]
pub struct RequestIds {
    last: u64,
}

impl RequestIds {
    /// Create a fresh id source
    #[must_use]
    pub const fn new() -> Self {
        Self { last: 0 }
    }

    /// Next id, strictly greater than every previous one
    pub fn next_id(&mut self) -> u64 {
        self.last += 1;
        self.last
    }
}

/// Convert a string into the byte buffer handed to the host transport
#[must_use]
pub fn str2buf(text: &str) -> Bytes {
    Bytes::copy_from_slice(text.as_bytes())
}

/// Convert a buffer received from the host transport back into a string
///
/// # Errors
///
/// Returns [`RelayError::ParseError`] if the buffer is not valid UTF-8.
pub fn buf2str(buf: &[u8]) -> Result<String> {
    std::str::from_utf8(buf)
        .map(str::to_owned)
        .map_err(|e| RelayError::ParseError(format!("buffer is not UTF-8: {e}")))
}

/// Serialize a message into a transport buffer
///
/// # Errors
///
/// Returns [`RelayError::Serialization`] if the value cannot be represented as JSON.
pub fn encode_message<M: Serialize>(message: &M) -> Result<Bytes> {
    let text = serde_json::to_string(message)?;
    Ok(str2buf(&text))
}

/// Parse a transport buffer into a message
///
/// # Errors
///
/// Returns [`RelayError::ParseError`] for non UTF-8 buffers and
/// [`RelayError::Serialization`] when the JSON does not match `M`.
pub fn decode_message<M: serde::de::DeserializeOwned>(buf: &[u8]) -> Result<M> {
    let text = buf2str(buf)?;
    Ok(serde_json::from_str(&text)?)
}

/// Split one message into delimiter-terminated chunks of at most `mtu` bytes
///
/// Compact JSON never contains a raw newline, so the delimiter is unambiguous.
#[must_use]
pub fn frame_chunks(message: &[u8], mtu: usize) -> Vec<Bytes> {
    let mtu = mtu.max(1);
    let mut framed = BytesMut::with_capacity(message.len() + 1);
    framed.extend_from_slice(message);
    framed.put_u8(FRAME_DELIMITER);

    let mut framed = framed.freeze();
    let mut chunks = Vec::with_capacity(framed.len().div_ceil(mtu));
    while framed.has_remaining() {
        let take = framed.remaining().min(mtu);
        chunks.push(framed.split_to(take));
    }
    chunks
}

/// Reassembles delimiter-terminated frames from arbitrarily split chunks
#[derive(Debug, Default)]
pub struct FrameAssembler {
    pending: BytesMut,
    max_frame: Option<usize>,
    discarding: bool,
}

impl FrameAssembler {
    /// Create an assembler without a frame size limit
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an assembler that discards frames longer than `max_frame` bytes
    #[must_use]
    pub fn with_limit(max_frame: usize) -> Self {
        Self {
            pending: BytesMut::new(),
            max_frame: Some(max_frame),
            discarding: false,
        }
    }

    /// Feed a chunk; returns every frame completed by it, in order
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        let mut frames = Vec::new();
        for &byte in chunk {
            if byte == FRAME_DELIMITER {
                let frame = self.pending.split().freeze();
                if !frame.is_empty() && !self.discarding {
                    frames.push(frame);
                }
                self.discarding = false;
                continue;
            }

            if self.discarding {
                continue;
            }

            let limit = self.max_frame.unwrap_or(usize::MAX);
            if self.pending.len() >= limit {
                tracing::warn!("Dropping frame longer than {limit} bytes");
                self.pending.clear();
                self.discarding = true;
                continue;
            }
            self.pending.put_u8(byte);
        }
        frames
    }

    /// Bytes buffered for the frame in progress
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
