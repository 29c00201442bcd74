mod config;

use config::{Args, Environment};
use metrics_exporter_statsd::StatsdBuilder;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const METRICS_PREFIX: &str = "sentry_tunnel";

#[derive(thiserror::Error, Debug)]
enum StartupError {
    #[error("invalid Sentry DSN: {0}")]
    SentryDsn(#[from] sentry::types::ParseDsnError),
    #[error("could not set up statsd metrics: {0}")]
    Statsd(#[from] metrics_exporter_statsd::StatsdError),
    #[error("could not install metrics recorder: {0}")]
    Recorder(String),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Server(#[from] tunnel::errors::ServerError),
}

fn main() -> ExitCode {
    let args = Args::parse_from_env();

    let _sentry = match init_sentry(&args) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(args.environment);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Sentry tunnel stopped");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), StartupError> {
    init_metrics(&args)?;

    tracing::info!("Environment: {}", args.environment);
    let config = args.to_config();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(tunnel::run(config))?;
    Ok(())
}

fn init_sentry(args: &Args) -> Result<Option<sentry::ClientInitGuard>, StartupError> {
    let Some(dsn) = args.sentry_dsn.as_deref() else {
        return Ok(None);
    };

    let guard = sentry::init(sentry::ClientOptions {
        dsn: Some(dsn.parse()?),
        release: sentry::release_name!(),
        environment: Some(args.environment.as_str().into()),
        ..Default::default()
    });
    Ok(Some(guard))
}

// RUST_LOG takes precedence; otherwise our crates log at debug in development
// and at info everywhere else.
fn init_logging(environment: Environment) {
    let level = match environment {
        Environment::Development => "debug",
        Environment::Production | Environment::Test => "info",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,sentry_tunnel={level},tunnel={level},shared={level}"
        ))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry::integrations::tracing::layer())
        .init();
}

fn init_metrics(args: &Args) -> Result<(), StartupError> {
    let Some(host) = args.statsd_host.as_deref() else {
        return Ok(());
    };

    let recorder = StatsdBuilder::from(host, args.statsd_port).build(Some(METRICS_PREFIX))?;
    metrics::set_global_recorder(recorder).map_err(|e| StartupError::Recorder(e.to_string()))?;
    shared::metrics_defs::describe_all(tunnel::metrics_defs::ALL_METRICS);

    tracing::info!(host, port = args.statsd_port, "Sending metrics to statsd");
    Ok(())
}
