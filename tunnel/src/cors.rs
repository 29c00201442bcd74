//! CORS headers for browser SDKs posting envelopes from another origin.

use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_HEADERS, HeaderMap, HeaderValue, VARY,
};
use http::{Response, StatusCode};
use hyper::body::Bytes;

const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";
const MAX_AGE_SECS: &str = "86400";

/// Allows the requesting origin, or any origin when the request has none.
pub fn apply(response_headers: &mut HeaderMap, origin: Option<&HeaderValue>) {
    let allow_origin = origin
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("*"));
    response_headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
    response_headers.append(VARY, HeaderValue::from_static("Origin"));
}

/// Answers an `OPTIONS` preflight. The origin headers are added by [`apply`].
pub fn preflight_response(request_headers: &HeaderMap) -> Response<Bytes> {
    let allow_headers = request_headers
        .get(ACCESS_CONTROL_REQUEST_HEADERS)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("*"));

    let mut response = Response::new(Bytes::new());
    *response.status_mut() = StatusCode::NO_CONTENT;

    let headers = response.headers_mut();
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, allow_headers);
    headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static(MAX_AGE_SECS));

    response
}
