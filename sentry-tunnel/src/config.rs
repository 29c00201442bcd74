use clap::{CommandFactory, FromArgMatches, Parser, ValueEnum};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::PathBuf;
use tunnel::allowlist::AllowList;
use tunnel::config::{
    Config, DEFAULT_MAX_ENVELOPE_BYTES, DEFAULT_PORT, DEFAULT_UPSTREAM_MAX_IN_FLIGHT,
    DEFAULT_UPSTREAM_TIMEOUT_SECS, Listener, TlsConfig, UpstreamConfig, UpstreamScheme,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every option can also be set through the environment variable named next to it.
#[derive(Parser, Debug)]
#[command(author, version, about = "Forwards Sentry envelopes to their ingestion endpoint")]
pub struct Args {
    /// Comma separated project IDs allowed through the tunnel. Empty allows all.
    #[arg(long, env = "ALLOWED_PROJECT_IDS", default_value = "")]
    pub allowed_project_ids: String,

    /// Comma separated DSN public keys allowed through the tunnel. Empty allows all.
    #[arg(long, env = "ALLOWED_ORGS", default_value = "")]
    pub allowed_orgs: String,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Debug logging is enabled in development
    #[arg(long = "env", env = "ENV", value_enum, default_value_t = Environment::Development)]
    pub environment: Environment,

    /// PEM certificate chain. HTTPS is served only when the key is set too.
    #[arg(long, env = "SSL_CERT_PATH")]
    pub ssl_cert_path: Option<PathBuf>,

    /// PEM private key. HTTPS is served only when the certificate is set too.
    #[arg(long, env = "SSL_KEY_PATH")]
    pub ssl_key_path: Option<PathBuf>,

    #[arg(long, env = "UPSTREAM_SCHEME", default_value = "https")]
    pub upstream_scheme: UpstreamScheme,

    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value_t = DEFAULT_UPSTREAM_TIMEOUT_SECS)]
    pub upstream_timeout_secs: u64,

    #[arg(long, env = "UPSTREAM_MAX_IN_FLIGHT", default_value_t = DEFAULT_UPSTREAM_MAX_IN_FLIGHT)]
    pub upstream_max_in_flight: usize,

    #[arg(long, env = "MAX_ENVELOPE_BYTES", default_value_t = DEFAULT_MAX_ENVELOPE_BYTES)]
    pub max_envelope_bytes: usize,

    /// Metrics are sent to statsd when set
    #[arg(long, env = "STATSD_HOST")]
    pub statsd_host: Option<String>,

    #[arg(long, env = "STATSD_PORT", default_value_t = 8125)]
    pub statsd_port: u16,

    /// Reports errors of the tunnel itself to Sentry
    #[arg(long, env = "SENTRY_DSN")]
    pub sentry_dsn: Option<String>,
}

impl Args {
    /// Parses the process arguments and environment, exiting on invalid input.
    pub fn parse_from_env() -> Self {
        let lookup = |name: &OsStr| std::env::var_os(name);
        match Self::try_parse_ignoring_empty(std::env::args_os(), lookup) {
            Ok(args) => args,
            Err(e) => e.exit(),
        }
    }

    /// Like `try_parse_from`, except that an environment variable `lookup`
    /// reports as empty counts as unset, so the default applies.
    pub fn try_parse_ignoring_empty<I, T>(
        argv: I,
        lookup: impl Fn(&OsStr) -> Option<OsString>,
    ) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let mut command = Self::command();
        let blank: Vec<clap::Id> = command
            .get_arguments()
            .filter(|arg| {
                arg.get_env()
                    .and_then(&lookup)
                    .is_some_and(|value| value.is_empty())
            })
            .map(|arg| arg.get_id().clone())
            .collect();

        for id in blank {
            command = command.mut_arg(id, |arg| arg.env(None::<&'static str>));
        }

        let matches = command.try_get_matches_from(argv)?;
        Self::from_arg_matches(&matches)
    }

    /// TLS is only enabled when both paths are given.
    pub fn tls(&self) -> Option<TlsConfig> {
        match (&self.ssl_cert_path, &self.ssl_key_path) {
            (Some(cert_path), Some(key_path)) => Some(TlsConfig {
                cert_path: cert_path.clone(),
                key_path: key_path.clone(),
            }),
            (None, None) => None,
            _ => {
                tracing::warn!(
                    "Only one of SSL_CERT_PATH and SSL_KEY_PATH is set, serving plain HTTP"
                );
                None
            }
        }
    }

    pub fn to_config(&self) -> Config {
        Config {
            listener: Listener {
                host: self.host.clone(),
                port: self.port,
            },
            allow_list: AllowList::from_csv(&self.allowed_project_ids, &self.allowed_orgs),
            upstream: UpstreamConfig {
                scheme: self.upstream_scheme,
                timeout_secs: self.upstream_timeout_secs,
                max_in_flight: self.upstream_max_in_flight,
            },
            tls: self.tls(),
            max_envelope_bytes: self.max_envelope_bytes,
        }
    }
}
