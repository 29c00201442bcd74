use crate::errors::TunnelError;
use crate::forwarder::{ForwardRequest, Upstream};
use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

pub const EXAMPLE_ENVELOPE: &str =
    "{\"dsn\":\"https://abc123@o1.ingest.example.com/42\"}\n{\"type\":\"event\"}\n{}";

pub fn envelope_request(body: impl Into<Bytes>) -> Request<Full<Bytes>> {
    Request::builder()
        .method("POST")
        .uri("/tunnel")
        .header("content-type", "text/plain;charset=UTF-8")
        .body(Full::new(body.into()))
        .unwrap()
}

/// Upstream that records every forward and answers with a fixed status.
pub struct RecordingUpstream {
    calls: Mutex<Vec<ForwardRequest>>,
    status: Option<StatusCode>,
}

impl RecordingUpstream {
    pub fn responding(status: StatusCode) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            status: Some(status),
        }
    }

    /// Fails every forward as unreachable.
    pub fn unreachable() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            status: None,
        }
    }

    pub fn calls(&self) -> Vec<ForwardRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Upstream for RecordingUpstream {
    async fn forward(&self, request: ForwardRequest) -> Result<Response<Bytes>, TunnelError> {
        let upstream = request.upstream().to_string();
        self.calls.lock().unwrap().push(request);

        match self.status {
            Some(status) => {
                let mut response = Response::new(Bytes::from_static(b"{\"id\":\"stub\"}"));
                *response.status_mut() = status;
                response
                    .headers_mut()
                    .insert("x-test", HeaderValue::from_static("1"));
                Ok(response)
            }
            None => Err(TunnelError::UpstreamUnreachable(
                upstream,
                "connection refused".to_string(),
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub struct StubUpstream {
    pub port: u16,
    pub response_body: &'static str,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl StubUpstream {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// Starts an HTTP server on a random port that records requests and answers
/// every one of them with `status` and `headers` after `delay`.
pub async fn start_stub_upstream(
    status: StatusCode,
    headers: &[(&'static str, &'static str)],
    delay: Duration,
) -> StubUpstream {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to address");
    let port = listener.local_addr().unwrap().port();

    let requests = Arc::new(Mutex::new(Vec::new()));
    let response_body = "{\"id\":\"9ec79c33ec9942ab8353589fcb2e04dc\"}";
    let headers = headers.to_vec();

    let recorded = requests.clone();
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let io = TokioIo::new(stream);
            let recorded = recorded.clone();
            let headers = headers.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let recorded = recorded.clone();
                    let headers = headers.clone();
                    async move {
                        let (parts, body) = req.into_parts();
                        let body = body.collect().await.unwrap().to_bytes();
                        recorded.lock().unwrap().push(RecordedRequest {
                            method: parts.method.to_string(),
                            uri: parts.uri.to_string(),
                            headers: parts.headers,
                            body,
                        });

                        tokio::time::sleep(delay).await;

                        let mut builder = Response::builder().status(status);
                        for (name, value) in headers {
                            builder = builder.header(name, value);
                        }
                        Ok::<_, Infallible>(
                            builder
                                .body(Full::new(Bytes::from_static(response_body.as_bytes())))
                                .unwrap(),
                        )
                    }
                });

                let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                    .serve_connection(io, service)
                    .await;
            });
        }
    });

    StubUpstream {
        port,
        response_body,
        requests,
    }
}

/// A local port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
