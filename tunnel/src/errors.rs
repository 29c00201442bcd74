use http::header::{CONTENT_TYPE, HeaderValue};
use http::{Response, StatusCode};
use hyper::body::Bytes;
use serde::Serialize;

/// Errors that end a single tunnel request.
///
/// The `Display` output of client-side errors is returned to the caller
/// verbatim, so it must not contain anything beyond what the caller sent.
#[derive(thiserror::Error, Debug)]
pub enum TunnelError {
    #[error("Missing envelope data")]
    EmptyBody,

    #[error("Invalid envelope header: {0}")]
    MalformedHeader(String),

    #[error("Missing DSN in envelope header")]
    MissingDsn,

    #[error("Invalid DSN: {0}")]
    InvalidDsn(String),

    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("Envelope exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Invalid project ID: {0}")]
    ProjectNotAllowed(String),

    #[error("Invalid organization ID: {0}")]
    OrgNotAllowed(String),

    #[error("Upstream request failed for {0}: {1}")]
    UpstreamUnreachable(String, String),

    #[error("Upstream timeout for {0}")]
    UpstreamTimeout(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl TunnelError {
    pub fn status(&self) -> StatusCode {
        match self {
            TunnelError::EmptyBody
            | TunnelError::MalformedHeader(_)
            | TunnelError::MissingDsn
            | TunnelError::InvalidDsn(_)
            | TunnelError::RequestBodyError(_) => StatusCode::BAD_REQUEST,
            TunnelError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            TunnelError::ProjectNotAllowed(_) | TunnelError::OrgNotAllowed(_) => {
                StatusCode::FORBIDDEN
            }
            TunnelError::UpstreamUnreachable(..)
            | TunnelError::UpstreamTimeout(_)
            | TunnelError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short stable identifier, used as a metric tag.
    pub fn kind(&self) -> &'static str {
        match self {
            TunnelError::EmptyBody => "empty_body",
            TunnelError::MalformedHeader(_) => "malformed_header",
            TunnelError::MissingDsn => "missing_dsn",
            TunnelError::InvalidDsn(_) => "invalid_dsn",
            TunnelError::RequestBodyError(_) => "request_body",
            TunnelError::PayloadTooLarge(_) => "payload_too_large",
            TunnelError::ProjectNotAllowed(_) => "project_not_allowed",
            TunnelError::OrgNotAllowed(_) => "org_not_allowed",
            TunnelError::UpstreamUnreachable(..) => "upstream_unreachable",
            TunnelError::UpstreamTimeout(_) => "upstream_timeout",
            TunnelError::InternalError(_) => "internal",
        }
    }

    /// Converts the error into the JSON response sent to the client.
    ///
    /// 4xx responses carry `{"error": ...}`. 5xx responses carry a generic
    /// `error` and the details in `message`.
    pub fn into_response(self) -> Response<Bytes> {
        let status = self.status();
        let body = if status.is_server_error() {
            ErrorBody {
                error: "Internal server error".to_string(),
                message: Some(self.to_string()),
            }
        } else {
            ErrorBody {
                error: self.to_string(),
                message: None,
            }
        };

        let bytes = serde_json::to_vec(&body)
            .map(Bytes::from)
            .unwrap_or_default();

        let mut response = Response::new(bytes);
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}

/// Errors that prevent the tunnel server from starting or keep it from serving.
#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Validation(#[from] crate::config::ValidationError),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] shared::tls::TlsError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}
