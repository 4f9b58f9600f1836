//! Logging setup. Tracing goes to stderr; stdout carries the protocol.
//!
//! The subscriber is installed before the configuration is read so that
//! config warnings are visible. The config's `log_level` is applied
//! afterwards through a reload handle.

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

use ollama_vision::config::DEFAULT_LOG_LEVEL;
use ollama_vision::VisionConfig;

/// Adjusts the log filter once the configuration is known.
pub struct LogControl {
    handle: reload::Handle<EnvFilter, Registry>,
    pinned: bool,
}

impl LogControl {
    /// Apply the config's `log_level` unless `RUST_LOG` or `--log-level`
    /// already chose one.
    pub fn apply_config(&self, config: &VisionConfig) {
        if self.pinned {
            return;
        }
        let level = config.log_level.to_lowercase();
        if let Err(e) = self.handle.reload(EnvFilter::new(&level)) {
            tracing::warn!("Failed to apply log level {level}: {e}");
        }
    }
}

/// Build the subscriber. `RUST_LOG` wins over `cli_level`; with neither,
/// `info` applies until [`LogControl::apply_config`] runs.
pub fn build_subscriber<W>(
    rust_log: Option<&str>,
    cli_level: Option<&str>,
    writer: W,
) -> (impl tracing::Subscriber + Send + Sync + 'static, LogControl)
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let explicit = rust_log.or(cli_level).filter(|d| !d.trim().is_empty());
    let initial = EnvFilter::new(explicit.unwrap_or(DEFAULT_LOG_LEVEL));
    let (filter, handle) = reload::Layer::new(initial);

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(writer));

    let control = LogControl {
        handle,
        pinned: explicit.is_some(),
    };
    (subscriber, control)
}

/// Install the global subscriber, writing to stderr.
pub fn init(cli_level: Option<&str>) -> LogControl {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let (subscriber, control) =
        build_subscriber(rust_log.as_deref(), cli_level, std::io::stderr);
    subscriber.init();
    control
}
