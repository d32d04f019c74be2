use itertools::Itertools;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use uptime_config::{LogFormat, LogLevel, LoggingConfig};

/// Chatty dependencies are capped at `warn`
const QUIET_TARGETS: &[&str] = &["scylla", "sqlx", "hyper", "reqwest", "object_store"];

fn default_directives(level: LogLevel) -> String {
    std::iter::once(level.to_string())
        .chain(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")))
        .join(",")
}

/// Installs the global subscriber, writing to stderr. `RUST_LOG` takes precedence
/// over the configured level.
pub fn init(config: LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config.log_level)));

    let builder = FmtSubscriber::builder()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_thread_ids(false);

    let _ = match config.log_format {
        LogFormat::Plaintext => builder.finish().try_init(),
        LogFormat::Json => builder.json().finish().try_init(),
    };
}
