// Logging setup
//
// Console logging through tracing-subscriber with an EnvFilter. Every decision the
// dispatcher makes is an event carrying instance_id / worker_id fields.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter used when neither `RUST_LOG` nor `LOG_LEVEL` is set
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Configuration for logging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name, logged once at startup
    pub service_name: String,
    /// Log filter (e.g., "info", "debug", "drainer_core=debug")
    pub log_filter: Option<String>,
    /// Whether to print module targets
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "drainer".to_string(),
            log_filter: None,
            with_target: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `SERVICE_NAME`: Service name (default: "drainer")
    /// - `RUST_LOG`: Full filter directive, used as is
    /// - `LOG_LEVEL`: Level applied to the drainer crates when `RUST_LOG` is unset;
    ///   dependencies (AWS SDK, reqwest) stay at `warn`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let log_filter = lookup("RUST_LOG").or_else(|| {
            lookup("LOG_LEVEL")
                .map(|level| format!("warn,drainer_core={level},drainer_worker={level}"))
        });

        Self {
            service_name: lookup("SERVICE_NAME").unwrap_or_else(|| "drainer".to_string()),
            log_filter,
            ..Default::default()
        }
    }

    /// The filter that will be installed
    pub fn env_filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
    }
}

/// Install the global subscriber
///
/// Call once, at process start.
pub fn init_telemetry(config: TelemetryConfig) {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(config.with_target)
        .with_filter(config.env_filter());

    tracing_subscriber::registry().with(console_layer).init();

    tracing::info!(service = %config.service_name, "Logging initialized");
}
