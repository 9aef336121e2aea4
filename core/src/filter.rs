//! Request filters applied by sources before fan-out

use std::fmt;
use std::str::FromStr;

use crate::request::Request;

/// Predicate selecting which requests are replayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestFilter {
    /// Every request passes
    #[default]
    None,
    /// GET requests for `/ipfs` or `/ipns` paths
    PathOnly,
    /// `PathOnly` requests whose path parses as a content path
    ValidPathOnly,
}

impl RequestFilter {
    /// Whether the request should be forwarded
    pub fn matches(&self, req: &Request) -> bool {
        match self {
            Self::None => true,
            Self::PathOnly => is_gateway_path(req),
            Self::ValidPathOnly => is_gateway_path(req) && is_valid_content_path(req.path()),
        }
    }

    /// The tag used on the command line and in experiment files
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::PathOnly => "pathonly",
            Self::ValidPathOnly => "validpathonly",
        }
    }
}

impl fmt::Display for RequestFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestFilter {
    type Err = UnknownFilter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "none" => Ok(Self::None),
            "pathonly" => Ok(Self::PathOnly),
            "validpathonly" => Ok(Self::ValidPathOnly),
            other => Err(UnknownFilter(other.to_string())),
        }
    }
}

/// Returned when a filter tag is not recognised
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown filter {0:?} (expected none, pathonly or validpathonly)")]
pub struct UnknownFilter(pub String);

fn is_gateway_path(req: &Request) -> bool {
    req.method == "GET" && (req.uri.starts_with("/ipfs") || req.uri.starts_with("/ipns"))
}

/// Checks `/ipfs/<cid>[/...]` and `/ipns/<name>[/...]`
fn is_valid_content_path(path: &str) -> bool {
    let mut parts = path.trim_start_matches('/').splitn(3, '/');
    let namespace = parts.next().unwrap_or_default();
    let root = parts.next().unwrap_or_default();
    if root.is_empty() {
        return false;
    }

    match namespace {
        "ipfs" => cid::Cid::try_from(root).is_ok(),
        "ipns" => true,
        _ => false,
    }
}
