//! The `/tunnel` request pipeline.
//!
//! A request moves through `received -> parsed -> validated -> forwarded`.
//! Each stage returns a `TunnelError` on failure, which ends the request with
//! the matching client response. A successful forward is relayed as is.

use crate::allowlist::AllowList;
use crate::config::UpstreamScheme;
use crate::envelope::parse_envelope;
use crate::errors::TunnelError;
use crate::forwarder::{ForwardRequest, Upstream};
use crate::metrics_defs::TUNNEL_REJECTED;
use http::header::USER_AGENT;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::{Request, Response};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

/// Correlates the log lines of one tunnel request. Not a security token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    pub fn generate() -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(8);
        Self(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct TunnelHandler {
    allow_list: AllowList,
    upstream: Arc<dyn Upstream>,
    scheme: UpstreamScheme,
    max_envelope_bytes: usize,
}

impl TunnelHandler {
    pub fn new(
        allow_list: AllowList,
        upstream: Arc<dyn Upstream>,
        scheme: UpstreamScheme,
        max_envelope_bytes: usize,
    ) -> Self {
        Self {
            allow_list,
            upstream,
            scheme,
            max_envelope_bytes,
        }
    }

    /// Runs the pipeline for one request on its own task.
    ///
    /// The task is not tied to the client connection, so an upstream call
    /// already in flight completes even if the client goes away. A panic in
    /// the pipeline is reported as a 500.
    pub async fn handle<B>(self: Arc<Self>, request: Request<B>) -> Response<Bytes>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let request_id = RequestId::generate();
        let span = tracing::info_span!("tunnel", request_id = %request_id);

        let task = tokio::spawn(
            async move { self.respond(request).await }.instrument(span.clone()),
        );

        match task.await {
            Ok(response) => response,
            Err(e) => {
                span.in_scope(|| tracing::error!(error = %e, "tunnel task failed"));
                TunnelError::InternalError(e.to_string()).into_response()
            }
        }
    }

    async fn respond<B>(&self, request: Request<B>) -> Response<Bytes>
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        tracing::debug!("received tunnel request");

        match self.process(request).await {
            Ok(response) => {
                tracing::debug!(status = %response.status(), "request completed");
                response
            }
            Err(e) => {
                if e.status().is_server_error() {
                    tracing::error!(error = %e, "error in tunnel");
                } else {
                    tracing::info!(error = %e, "rejected envelope");
                }
                shared::counter!(TUNNEL_REJECTED, "reason" => e.kind()).increment(1);
                e.into_response()
            }
        }
    }

    async fn process<B>(&self, request: Request<B>) -> Result<Response<Bytes>, TunnelError>
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = request.into_parts();
        let user_agent = parts.headers.get(USER_AGENT).cloned();
        let body = self.read_body(body).await?;

        let dsn = parse_envelope(&body)?;
        tracing::debug!(
            host = %dsn.host,
            project_id = %dsn.project_id,
            public_key = %dsn.public_key,
            "parsed envelope header"
        );

        self.allow_list
            .validate(&dsn.project_id, &dsn.public_key)?;
        tracing::debug!("envelope allowed");

        let forward = ForwardRequest::new(self.scheme, &dsn, body, user_agent)?;
        tracing::debug!(url = %forward.url, "forwarding envelope");

        let started = Instant::now();
        let response = self.upstream.forward(forward).await?;
        tracing::debug!(
            status = %response.status(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "received upstream response"
        );

        Ok(response)
    }

    async fn read_body<B>(&self, body: B) -> Result<Bytes, TunnelError>
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        match Limited::new(body, self.max_envelope_bytes).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.is::<LengthLimitError>() => {
                Err(TunnelError::PayloadTooLarge(self.max_envelope_bytes))
            }
            Err(e) => Err(TunnelError::RequestBodyError(e.to_string())),
        }
    }
}
