//! Envelope header parsing.
//!
//! An envelope is a newline separated payload. The first line is a JSON
//! object header; everything after it is opaque to the tunnel and is
//! forwarded byte for byte.

use crate::errors::TunnelError;
use serde_json::Value;
use std::str::FromStr;
use url::Url;

/// The parts of a DSN needed to reach the ingestion endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dsn {
    /// Host of the ingestion endpoint, including a non-default port.
    pub host: String,
    pub project_id: String,
    pub public_key: String,
}

impl FromStr for Dsn {
    type Err = TunnelError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(raw).map_err(|e| TunnelError::InvalidDsn(e.to_string()))?;

        let host = match (url.host_str().filter(|h| !h.is_empty()), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(TunnelError::InvalidDsn("missing host".to_string())),
        };

        let path = url.path();
        let project_id = path.strip_prefix('/').unwrap_or(path);
        if project_id.is_empty() {
            return Err(TunnelError::InvalidDsn("missing project ID".to_string()));
        }

        let public_key = url.username();
        if public_key.is_empty() {
            return Err(TunnelError::InvalidDsn("missing public key".to_string()));
        }

        Ok(Dsn {
            host,
            project_id: project_id.to_string(),
            public_key: public_key.to_string(),
        })
    }
}

/// Returns the header line: everything before the first `\n`.
fn header_line(body: &[u8]) -> &[u8] {
    match body.iter().position(|&b| b == b'\n') {
        Some(end) => &body[..end],
        None => body,
    }
}

/// Extracts the DSN from the envelope header.
pub fn parse_envelope(body: &[u8]) -> Result<Dsn, TunnelError> {
    if body.is_empty() {
        return Err(TunnelError::EmptyBody);
    }

    let header: Value = serde_json::from_slice(header_line(body))
        .map_err(|e| TunnelError::MalformedHeader(e.to_string()))?;

    let header = header
        .as_object()
        .ok_or_else(|| TunnelError::MalformedHeader("header is not a JSON object".to_string()))?;

    let dsn = header
        .get("dsn")
        .and_then(Value::as_str)
        .filter(|dsn| !dsn.is_empty())
        .ok_or(TunnelError::MissingDsn)?;

    dsn.parse()
}
