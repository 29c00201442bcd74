use crate::allowlist::AllowList;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 3010;
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_UPSTREAM_MAX_IN_FLIGHT: usize = 256;
pub const DEFAULT_MAX_ENVELOPE_BYTES: usize = 20 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Upstream timeout cannot be 0")]
    InvalidTimeout,

    #[error("Upstream in-flight limit cannot be 0")]
    InvalidMaxInFlight,

    #[error("Maximum envelope size cannot be 0")]
    InvalidMaxEnvelopeBytes,

    #[error("TLS file not found: {}", .0.display())]
    TlsFileNotFound(PathBuf),
}

/// Tunnel configuration, built once at startup and never mutated.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Listener for incoming requests
    pub listener: Listener,
    /// Project IDs and public keys allowed through the tunnel
    pub allow_list: AllowList,
    pub upstream: UpstreamConfig,
    /// Serve HTTPS when set
    pub tls: Option<TlsConfig>,
    /// Largest envelope accepted on `/tunnel`
    pub max_envelope_bytes: usize,
}

impl Config {
    /// Validates the tunnel configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.upstream.validate()?;

        if self.max_envelope_bytes == 0 {
            return Err(ValidationError::InvalidMaxEnvelopeBytes);
        }

        if let Some(tls) = &self.tls {
            tls.validate()?;
        }

        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "0.0.0.0".into(),
            port: DEFAULT_PORT,
        }
    }
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Scheme used for the forwarded ingestion URL.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UpstreamScheme {
    #[default]
    Https,
    /// Plain HTTP, for relays on a private network.
    Http,
}

impl UpstreamScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamScheme::Https => "https",
            UpstreamScheme::Http => "http",
        }
    }
}

impl fmt::Display for UpstreamScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpstreamScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "https" => Ok(UpstreamScheme::Https),
            "http" => Ok(UpstreamScheme::Http),
            other => Err(format!("unsupported upstream scheme: {other}")),
        }
    }
}

/// Upstream forwarding limits
#[derive(Clone, Debug, PartialEq)]
pub struct UpstreamConfig {
    pub scheme: UpstreamScheme,
    /// Applies to the whole forward: waiting for a slot, connecting,
    /// sending and collecting the response body.
    pub timeout_secs: u64,
    /// Maximum number of upstream requests in flight at once
    pub max_in_flight: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        UpstreamConfig {
            scheme: UpstreamScheme::default(),
            timeout_secs: DEFAULT_UPSTREAM_TIMEOUT_SECS,
            max_in_flight: DEFAULT_UPSTREAM_MAX_IN_FLIGHT,
        }
    }
}

impl UpstreamConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        if self.max_in_flight == 0 {
            return Err(ValidationError::InvalidMaxInFlight);
        }
        Ok(())
    }
}

/// PEM encoded certificate chain and private key
#[derive(Clone, Debug, PartialEq)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl TlsConfig {
    /// Both files must exist; their contents are checked when the acceptor is built.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for path in [&self.cert_path, &self.key_path] {
            if !path.is_file() {
                return Err(ValidationError::TlsFileNotFound(path.clone()));
            }
        }
        Ok(())
    }
}
