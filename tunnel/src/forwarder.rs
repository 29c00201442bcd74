use crate::config::{UpstreamConfig, UpstreamScheme};
use crate::envelope::Dsn;
use crate::errors::TunnelError;
use crate::metrics_defs::{UPSTREAM_DURATION, UPSTREAM_ERRORS};
use async_trait::async_trait;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue, USER_AGENT};
use hyper::Response;
use hyper::body::Bytes;
use shared::http::filter_hop_by_hop;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use url::Url;

pub const ENVELOPE_CONTENT_TYPE: &str = "application/x-sentry-envelope";

/// Sent upstream when the client did not provide a User-Agent.
pub const DEFAULT_USER_AGENT: &str = concat!("sentry-tunnel/", env!("CARGO_PKG_VERSION"));

/// An envelope ready to be posted to the ingestion endpoint.
#[derive(Clone, Debug)]
pub struct ForwardRequest {
    pub url: Url,
    pub user_agent: HeaderValue,
    /// The envelope exactly as received from the client
    pub body: Bytes,
}

impl ForwardRequest {
    /// Targets `{scheme}://{host}/api/{project_id}/envelope/?sentry_key={public_key}`.
    pub fn new(
        scheme: UpstreamScheme,
        dsn: &Dsn,
        body: Bytes,
        user_agent: Option<HeaderValue>,
    ) -> Result<Self, TunnelError> {
        let url = Url::parse(&format!(
            "{scheme}://{}/api/{}/envelope/?sentry_key={}",
            dsn.host, dsn.project_id, dsn.public_key
        ))
        .map_err(|e| TunnelError::InvalidDsn(e.to_string()))?;

        Ok(Self {
            url,
            user_agent: user_agent.unwrap_or(HeaderValue::from_static(DEFAULT_USER_AGENT)),
            body,
        })
    }

    /// Identifies the upstream in errors and logs without exposing the key.
    pub fn upstream(&self) -> &str {
        self.url.host_str().unwrap_or("unknown")
    }
}

/// Delivers envelopes to the ingestion service.
///
/// Implementations await the complete upstream response and return it with
/// the upstream status and relayable headers. They never retry.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn forward(&self, request: ForwardRequest) -> Result<Response<Bytes>, TunnelError>;
}

/// Forwards envelopes over HTTP(S).
#[derive(Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl HttpForwarder {
    pub fn new(config: &UpstreamConfig) -> Result<Self, reqwest::Error> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder().connect_timeout(timeout).build()?;

        Ok(Self {
            client,
            timeout,
            permits: Arc::new(Semaphore::new(config.max_in_flight)),
        })
    }

    async fn send(&self, request: ForwardRequest) -> Result<Response<Bytes>, TunnelError> {
        let upstream = request.upstream().to_string();

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| TunnelError::InternalError(e.to_string()))?;

        let started = Instant::now();
        let response = self
            .client
            .post(request.url)
            .header(CONTENT_TYPE, ENVELOPE_CONTENT_TYPE)
            .header(USER_AGENT, request.user_agent)
            .body(request.body)
            .send()
            .await
            .map_err(|e| {
                shared::counter!(UPSTREAM_ERRORS, "kind" => "request").increment(1);
                TunnelError::UpstreamUnreachable(upstream.clone(), e.without_url().to_string())
            })?;

        let status = response.status();
        let version = response.version();
        let mut headers = response.headers().clone();

        let body = response.bytes().await.map_err(|e| {
            shared::counter!(UPSTREAM_ERRORS, "kind" => "response_body").increment(1);
            TunnelError::UpstreamUnreachable(upstream.clone(), e.without_url().to_string())
        })?;

        shared::histogram!(UPSTREAM_DURATION, "status" => status.as_u16().to_string())
            .record(started.elapsed().as_secs_f64());

        // The body is fully buffered, the listener sets its own framing
        filter_hop_by_hop(&mut headers, version);
        headers.remove(CONTENT_LENGTH);

        let mut relayed = Response::new(body);
        *relayed.status_mut() = status;
        *relayed.headers_mut() = headers;
        Ok(relayed)
    }
}

#[async_trait]
impl Upstream for HttpForwarder {
    async fn forward(&self, request: ForwardRequest) -> Result<Response<Bytes>, TunnelError> {
        let upstream = request.upstream().to_string();

        timeout(self.timeout, self.send(request))
            .await
            .map_err(|_| {
                shared::counter!(UPSTREAM_ERRORS, "kind" => "timeout").increment(1);
                TunnelError::UpstreamTimeout(upstream)
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{closed_port, start_stub_upstream};
    use http::StatusCode;

    fn dsn(host: &str) -> Dsn {
        Dsn {
            host: host.to_string(),
            project_id: "42".to_string(),
            public_key: "abc123".to_string(),
        }
    }

    fn http_config(timeout_secs: u64) -> UpstreamConfig {
        UpstreamConfig {
            scheme: UpstreamScheme::Http,
            timeout_secs,
            max_in_flight: 4,
        }
    }

    fn stub_request(port: u16) -> ForwardRequest {
        ForwardRequest::new(
            UpstreamScheme::Http,
            &dsn(&format!("127.0.0.1:{port}")),
            Bytes::from_static(b"{}"),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_forward_request_url() {
        let request = ForwardRequest::new(
            UpstreamScheme::Https,
            &dsn("o1.ingest.example.com"),
            Bytes::from_static(b"{}"),
            None,
        )
        .unwrap();

        assert_eq!(
            request.url.as_str(),
            "https://o1.ingest.example.com/api/42/envelope/?sentry_key=abc123"
        );
        assert_eq!(request.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(request.upstream(), "o1.ingest.example.com");
    }

    #[test]
    fn test_forward_request_keeps_client_user_agent() {
        let request = ForwardRequest::new(
            UpstreamScheme::Https,
            &dsn("relay.internal:3000"),
            Bytes::new(),
            Some(HeaderValue::from_static("sentry.javascript.browser/8.0.0")),
        )
        .unwrap();

        assert_eq!(request.user_agent, "sentry.javascript.browser/8.0.0");
        assert_eq!(
            request.url.as_str(),
            "https://relay.internal:3000/api/42/envelope/?sentry_key=abc123"
        );
    }

    #[tokio::test]
    async fn test_forward_relays_status_and_headers() {
        let stub = start_stub_upstream(
            StatusCode::ACCEPTED,
            &[("x-test", "1"), ("connection", "x-hop"), ("x-hop", "1")],
            Duration::ZERO,
        )
        .await;
        let forwarder = HttpForwarder::new(&http_config(5)).unwrap();

        let body = Bytes::from_static(b"{\"dsn\":\"http://abc123@localhost/42\"}\n{}");
        let request = ForwardRequest::new(
            UpstreamScheme::Http,
            &dsn(&format!("127.0.0.1:{}", stub.port)),
            body.clone(),
            None,
        )
        .unwrap();

        let response = forwarder.forward(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers().get("x-test").unwrap(), "1");
        assert!(response.headers().get("connection").is_none());
        assert!(response.headers().get("x-hop").is_none());
        assert!(response.headers().get(CONTENT_LENGTH).is_none());
        assert_eq!(response.body().as_ref(), stub.response_body.as_bytes());

        let recorded = stub.requests();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].method, "POST");
        assert_eq!(recorded[0].uri, "/api/42/envelope/?sentry_key=abc123");
        assert_eq!(
            recorded[0].headers.get(CONTENT_TYPE).unwrap(),
            ENVELOPE_CONTENT_TYPE
        );
        assert_eq!(
            recorded[0].headers.get(USER_AGENT).unwrap(),
            DEFAULT_USER_AGENT
        );
        assert_eq!(recorded[0].body, body);
    }

    #[tokio::test]
    async fn test_forward_drops_keep_alive_headers() {
        let stub = start_stub_upstream(
            StatusCode::OK,
            &[("keep-alive", "timeout=5"), ("proxy-connection", "keep-alive")],
            Duration::ZERO,
        )
        .await;
        let forwarder = HttpForwarder::new(&http_config(5)).unwrap();

        let response = forwarder.forward(stub_request(stub.port)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("keep-alive").is_none());
        assert!(response.headers().get("proxy-connection").is_none());
    }

    #[tokio::test]
    async fn test_forward_waits_for_in_flight_permit() {
        let stub = start_stub_upstream(StatusCode::OK, &[], Duration::ZERO).await;
        let forwarder = HttpForwarder::new(&UpstreamConfig {
            max_in_flight: 1,
            ..http_config(5)
        })
        .unwrap();

        // Occupy the only slot, as a slow forward would
        let held = forwarder.permits.clone().acquire_owned().await.unwrap();

        let waiting = forwarder.clone();
        let port = stub.port;
        let task = tokio::spawn(async move { waiting.forward(stub_request(port)).await });

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!task.is_finished());
        assert!(stub.requests().is_empty());

        drop(held);
        let response = task.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(stub.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_permit_wait_counts_against_timeout() {
        let stub = start_stub_upstream(StatusCode::OK, &[], Duration::ZERO).await;
        let forwarder = HttpForwarder::new(&UpstreamConfig {
            max_in_flight: 1,
            ..http_config(1)
        })
        .unwrap();

        let _held = forwarder.permits.clone().acquire_owned().await.unwrap();

        let result = forwarder.forward(stub_request(stub.port)).await;
        assert!(matches!(result, Err(TunnelError::UpstreamTimeout(_))));
        assert!(stub.requests().is_empty());
    }

    #[tokio::test]
    async fn test_forward_connection_refused() {
        let port = closed_port().await;
        let forwarder = HttpForwarder::new(&http_config(5)).unwrap();
        let request = ForwardRequest::new(
            UpstreamScheme::Http,
            &dsn(&format!("127.0.0.1:{port}")),
            Bytes::from_static(b"{}"),
            None,
        )
        .unwrap();

        let result = forwarder.forward(request).await;
        assert!(matches!(
            result,
            Err(TunnelError::UpstreamUnreachable(host, _)) if host == "127.0.0.1"
        ));
    }

    #[tokio::test]
    async fn test_forward_timeout() {
        let stub = start_stub_upstream(StatusCode::OK, &[], Duration::from_secs(5)).await;
        let forwarder = HttpForwarder::new(&http_config(1)).unwrap();
        let request = ForwardRequest::new(
            UpstreamScheme::Http,
            &dsn(&format!("127.0.0.1:{}", stub.port)),
            Bytes::from_static(b"{}"),
            None,
        )
        .unwrap();

        let result = forwarder.forward(request).await;
        assert!(matches!(result, Err(TunnelError::UpstreamTimeout(_))));
    }
}
