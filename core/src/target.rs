//! Target endpoints under comparison

use std::fmt;
use std::net::IpAddr;
use std::sync::Mutex;

use url::Url;

use crate::experiment::ConfigError;

/// URL scheme of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Plain HTTP
    Http,
    /// HTTP over TLS
    Https,
}

impl Scheme {
    /// Scheme as it appears in a URL
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

/// One HTTP endpoint taking part in an experiment
///
/// The resolved host:port starts out equal to the address in the base URL and
/// may be rewritten by [`Target::resolve`] after a connection failure.
pub struct Target {
    name: String,
    base_url: String,
    scheme: Scheme,
    host_name: String,
    host_override: bool,
    raw_host_port: String,
    resolved_host_port: Mutex<String>,
}

impl Target {
    /// Build a target from its validated name, base URL and optional Host override
    pub fn new(name: &str, base_url: &str, host: Option<&str>) -> Result<Self, ConfigError> {
        let url = parse_base_url(name, base_url)?;
        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(ConfigError::InvalidTarget {
                    target: name.to_string(),
                    reason: format!("unsupported scheme {other:?}"),
                })
            }
        };
        let host_str = url.host_str().ok_or_else(|| ConfigError::InvalidTarget {
            target: name.to_string(),
            reason: "base url has no host".to_string(),
        })?;
        let port = url.port_or_known_default().unwrap_or(match scheme {
            Scheme::Http => 80,
            Scheme::Https => 443,
        });
        let raw_host_port = format!("{host_str}:{port}");
        let host_override = host.is_some_and(|h| !h.is_empty());
        let host_name = match host {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => host_str.to_string(),
        };

        Ok(Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            scheme,
            host_name,
            host_override,
            resolved_host_port: Mutex::new(raw_host_port.clone()),
            raw_host_port,
        })
    }

    /// Short name used in reports and metrics
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base URL exactly as configured, without a trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL scheme
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Value sent in the Host header and used for TLS SNI
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Whether the Host value came from an explicit override
    pub fn has_host_override(&self) -> bool {
        self.host_override
    }

    /// host:port derived from the base URL
    pub fn raw_host_port(&self) -> &str {
        &self.raw_host_port
    }

    /// Address currently used for new connections
    pub fn host_port(&self) -> String {
        match self.resolved_host_port.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the address used for new connections
    pub fn set_host_port(&self, host_port: impl Into<String>) {
        let host_port = host_port.into();
        match self.resolved_host_port.lock() {
            Ok(mut guard) => *guard = host_port,
            Err(poisoned) => *poisoned.into_inner() = host_port,
        }
    }

    /// Re-resolve the raw host:port and update the connection address.
    ///
    /// Returns the new address when it changed. `localhost` and literal IP
    /// addresses are never rewritten.
    pub async fn resolve(&self) -> std::io::Result<Option<String>> {
        let (host, _) = split_host_port(&self.raw_host_port);
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if bare == "localhost" || bare.parse::<IpAddr>().is_ok() {
            return Ok(None);
        }

        let mut addrs = tokio::net::lookup_host(self.raw_host_port.as_str()).await?;
        let Some(addr) = addrs.next() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no addresses found for {}", self.raw_host_port),
            ));
        };

        let resolved = addr.to_string();
        if resolved == self.host_port() {
            return Ok(None);
        }
        self.set_host_port(resolved.clone());
        tracing::info!(
            target_name = %self.name,
            from = %self.raw_host_port,
            to = %resolved,
            "Resolved target address"
        );
        Ok(Some(resolved))
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("host_name", &self.host_name)
            .field("host_port", &self.host_port())
            .finish()
    }
}

fn parse_base_url(name: &str, base_url: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidTarget {
        target: name.to_string(),
        reason,
    };
    let url = Url::parse(base_url).map_err(|e| invalid(format!("invalid base url: {e}")))?;
    if url.path() != "/" && !url.path().is_empty() {
        return Err(invalid("base url must not have a path".to_string()));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("base url must not have a query or fragment".to_string()));
    }
    Ok(url)
}

fn split_host_port(host_port: &str) -> (&str, &str) {
    match host_port.rfind(':') {
        Some(idx) if !host_port[idx..].contains(']') => (&host_port[..idx], &host_port[idx + 1..]),
        _ => (host_port, ""),
    }
}

/// Default target name derived from a base URL's host.
///
/// The host is lowercased and every character outside `[a-z0-9-]` becomes `-`.
pub fn default_target_name(base_url: &str) -> Option<String> {
    let url = Url::parse(base_url).ok()?;
    let host = url.host_str()?;
    Some(
        host.chars()
            .map(|c| c.to_ascii_lowercase())
            .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' { c } else { '-' })
            .collect(),
    )
}
