//! Replayable request model
//!
//! A [`Request`] is one captured inbound gateway request. Sources decode them
//! from newline-delimited JSON, the Loader copies each one by value to every
//! target, and Workers turn them into outbound HTTP requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single captured request that can be replayed against a target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// HTTP method
    #[serde(default = "default_method")]
    pub method: String,

    /// Path and query, always starting with `/`
    pub uri: String,

    /// Request headers. Keys are matched case-insensitively.
    #[serde(default)]
    pub header: HashMap<String, String>,

    /// Optional request body (base64 in JSON)
    #[serde(
        default,
        with = "base64_body",
        skip_serializing_if = "Option::is_none"
    )]
    pub body: Option<Vec<u8>>,

    /// Status the origin answered with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    /// When the origin saw the request
    #[serde(default, rename = "ts", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    /// Client address seen by the origin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,

    /// Client user agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,

    /// Referer header seen by the origin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,

    /// Size of the body the origin sent back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resp_body_size: Option<i64>,

    /// Seconds the origin took to respond
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resp_time: Option<f64>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl Request {
    /// Create a bare request for the given method and uri
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            header: HashMap::new(),
            body: None,
            status: None,
            timestamp: None,
            remote_addr: None,
            agent: None,
            referer: None,
            resp_body_size: None,
            resp_time: None,
        }
    }

    /// Shorthand for a GET request
    pub fn get(uri: impl Into<String>) -> Self {
        Self::new("GET", uri)
    }

    /// Add a header, replacing any existing value with the same name
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.header.retain(|k, _| !k.eq_ignore_ascii_case(&name));
        self.header.insert(name, value.into());
        self
    }

    /// Stamp the request with an origin timestamp
    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = Some(ts);
        self
    }

    /// Decode one newline-delimited JSON document
    pub fn from_json_line(line: &str) -> Result<Self, RequestDecodeError> {
        let req: Request = serde_json::from_str(line.trim())?;
        req.check()?;
        Ok(req)
    }

    /// Check the structural constraints a decoded request must satisfy
    pub fn check(&self) -> Result<(), RequestDecodeError> {
        if !self.uri.starts_with('/') {
            return Err(RequestDecodeError::InvalidUri(self.uri.clone()));
        }
        Ok(())
    }

    /// Look up a header value ignoring case
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.header
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The uri with any query string and fragment removed
    pub fn path(&self) -> &str {
        let end = self.uri.find(['?', '#']).unwrap_or(self.uri.len());
        &self.uri[..end]
    }

    /// Seconds between the origin timestamp and `now`, when one is known
    pub fn lag_at(&self, now: DateTime<Utc>) -> Option<f64> {
        let ts = self.timestamp?;
        let micros = (now - ts).num_microseconds()?;
        Some(micros as f64 / 1_000_000.0)
    }
}

/// Reasons a request document is rejected
#[derive(Debug, thiserror::Error)]
pub enum RequestDecodeError {
    /// The line was not valid request JSON
    #[error("invalid request json: {0}")]
    Json(#[from] serde_json::Error),

    /// The uri does not start with `/`
    #[error("uri must start with '/': {0:?}")]
    InvalidUri(String),
}

mod base64_body {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match body {
            Some(bytes) => s.serialize_str(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        match encoded {
            Some(s) if !s.is_empty() => STANDARD
                .decode(s.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}
