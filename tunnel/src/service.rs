use crate::cors;
use crate::errors::ServerError;
use crate::handler::TunnelHandler;
use crate::metrics_defs::{REQUEST_DURATION, REQUESTS_INFLIGHT};
use chrono::{SecondsFormat, Utc};
use http::header::{CONTENT_TYPE, HeaderValue, ORIGIN};
use http::{Method, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::service::Service;
use hyper::{Request, Response};
use serde::Serialize;
use shared::http::make_error_response;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

const ROOT_MESSAGE: &str = "Sentry Tunnel Server is running";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Route {
    Root,
    Health,
    Tunnel,
    Preflight,
    NotFound,
}

impl Route {
    fn resolve(method: &Method, path: &str) -> Self {
        match (method, path) {
            (&Method::OPTIONS, _) => Route::Preflight,
            (&Method::GET, "/") => Route::Root,
            (&Method::GET, "/health") => Route::Health,
            (&Method::POST, "/tunnel") => Route::Tunnel,
            _ => Route::NotFound,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Route::Root => "root",
            Route::Health => "health",
            Route::Tunnel => "tunnel",
            Route::Preflight => "preflight",
            Route::NotFound => "not_found",
        }
    }
}

/// Holds one slot of the in-flight gauge. hyper drops the response future of a
/// disconnected client, so the decrement lives in `Drop`.
struct InflightGuard;

impl InflightGuard {
    fn enter() -> Self {
        shared::gauge!(REQUESTS_INFLIGHT).increment(1.0);
        Self
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        shared::gauge!(REQUESTS_INFLIGHT).decrement(1.0);
    }
}

#[derive(Serialize)]
struct HealthStatus {
    status: &'static str,
    timestamp: String,
    uptime: f64,
}

/// Serves `/`, `/health` and `/tunnel`.
pub struct TunnelService {
    handler: Arc<TunnelHandler>,
    started_at: Instant,
}

impl TunnelService {
    pub fn new(handler: Arc<TunnelHandler>) -> Self {
        Self {
            handler,
            started_at: Instant::now(),
        }
    }
}

impl<B> Service<Request<B>> for TunnelService
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Response = Response<BoxBody<Bytes, ServerError>>;
    type Error = ServerError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let handler = self.handler.clone();
        let started_at = self.started_at;

        Box::pin(async move {
            let started = Instant::now();
            let _inflight = InflightGuard::enter();

            let route = Route::resolve(req.method(), req.uri().path());
            let origin = req.headers().get(ORIGIN).cloned();

            let mut response = match route {
                Route::Root => root_response(),
                Route::Health => health_response(started_at),
                Route::Tunnel => handler.handle(req).await,
                Route::Preflight => cors::preflight_response(req.headers()),
                Route::NotFound => {
                    tracing::debug!(
                        method = %req.method(),
                        path = %req.uri().path(),
                        "No route matched"
                    );
                    make_error_response(StatusCode::NOT_FOUND)
                }
            };
            cors::apply(response.headers_mut(), origin.as_ref());

            shared::histogram!(
                REQUEST_DURATION,
                "route" => route.as_str(),
                "status" => response.status().as_u16().to_string()
            )
            .record(started.elapsed().as_secs_f64());

            Ok(response.map(full))
        })
    }
}

fn full(body: Bytes) -> BoxBody<Bytes, ServerError> {
    Full::new(body).map_err(|never| match never {}).boxed()
}

fn root_response() -> Response<Bytes> {
    tracing::debug!("Received request to root endpoint");
    let mut response = Response::new(Bytes::from_static(ROOT_MESSAGE.as_bytes()));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn health_response(started_at: Instant) -> Response<Bytes> {
    tracing::debug!("Received request to health endpoint");
    let status = HealthStatus {
        status: "healthy",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        uptime: started_at.elapsed().as_secs_f64(),
    };

    match serde_json::to_vec(&status) {
        Ok(body) => {
            let mut response = Response::new(Bytes::from(body));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize health status");
            make_error_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
