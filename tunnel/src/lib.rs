pub mod allowlist;
pub mod config;
pub mod cors;
pub mod envelope;
pub mod errors;
pub mod forwarder;
pub mod handler;
pub mod metrics_defs;
mod service;
#[cfg(test)]
mod testutils;

use allowlist::Permitted;
use errors::ServerError;
use forwarder::HttpForwarder;
use handler::TunnelHandler;
use service::TunnelService;
use shared::http::run_http_service;
use shared::tls::load_acceptor;
use std::sync::Arc;

/// Validates `config`, loads TLS material and serves the tunnel until the
/// listener fails.
///
/// Nothing is bound until every startup check has passed.
pub async fn run(config: config::Config) -> Result<(), ServerError> {
    config.validate()?;

    let tls = config
        .tls
        .as_ref()
        .map(|tls| load_acceptor(&tls.cert_path, &tls.key_path))
        .transpose()?;
    if tls.is_some() {
        tracing::info!("SSL certificate and key loaded successfully");
    }

    let forwarder = HttpForwarder::new(&config.upstream)?;
    let handler = TunnelHandler::new(
        config.allow_list.clone(),
        Arc::new(forwarder),
        config.upstream.scheme,
        config.max_envelope_bytes,
    );
    let service = TunnelService::new(Arc::new(handler));

    let protocol = if tls.is_some() { "https" } else { "http" };
    tracing::info!(
        "Starting Sentry Tunnel Server at {protocol}://{}:{}",
        config.listener.host,
        config.listener.port
    );
    tracing::info!(
        "Allowed Project IDs: {}",
        Permitted(config.allow_list.project_ids())
    );
    tracing::info!(
        "Allowed Organization IDs: {}",
        Permitted(config.allow_list.orgs())
    );

    run_http_service(&config.listener.host, config.listener.port, service, tls).await
}
