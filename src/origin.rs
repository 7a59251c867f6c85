//! Origin handling.
//!
//! An origin is the (scheme, host, port) triple. Every agent is bound to
//! one origin and every request routed to it must match.

use std::fmt;

use url::Url;

use crate::error::{FetchError, FetchResult};

/// URL scheme accepted by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plaintext HTTP.
    Http,
    /// HTTP over TLS.
    Https,
}

impl Scheme {
    /// Default port for the scheme.
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    /// Returns the scheme as it appears in a URL.
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// A (scheme, hostname, port) triple identifying a connection target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    /// URL scheme.
    pub scheme: Scheme,
    /// Hostname as it appears in the URL.
    pub host: String,
    /// Resolved port (explicit or scheme default).
    pub port: u16,
}

impl Origin {
    /// Extract the origin from an absolute URL.
    ///
    /// Fails with [`FetchError::UnsupportedProtocol`] for any scheme other
    /// than `http`/`https` and with [`FetchError::InvalidRequest`] when the
    /// URL has no host.
    pub fn from_url(url: &Url) -> FetchResult<Self> {
        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => return Err(FetchError::UnsupportedProtocol(other.to_string())),
        };
        let host = url
            .host_str()
            .ok_or_else(|| FetchError::InvalidRequest("url has no host".to_string()))?
            .to_string();
        let port = url.port().unwrap_or_else(|| scheme.default_port());
        Ok(Origin { scheme, host, port })
    }

    /// True when the origin requires TLS.
    pub fn is_secure(&self) -> bool {
        self.scheme == Scheme::Https
    }

    /// Host with the port appended when it differs from the scheme default,
    /// suitable for a `Host` header.
    pub fn host_header(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}
