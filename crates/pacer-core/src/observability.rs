use std::path::PathBuf;

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::config::parse_bool;

static INIT: OnceCell<()> = OnceCell::new();

/// Logging settings resolved from the environment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObservabilitySettings {
    pub enabled: bool,
    pub level: Option<String>,
    pub json_log_path: Option<PathBuf>,
}

impl ObservabilitySettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = ["PACER_OBSERVABILITY_ENABLED", "PACER_OBSERVABILITY"]
            .into_iter()
            .find_map(|key| lookup(key))
            .map(|value| parse_bool(&value).unwrap_or(true))
            .unwrap_or(true);
        Self {
            enabled,
            level: lookup("PACER_LOG_LEVEL").filter(|v| !v.trim().is_empty()),
            json_log_path: lookup("PACER_JSON_LOG_PATH")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        if let Some(level) = &self.level
            && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
        {
            return filter;
        }
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    }
}

/// Initialize logging once per process.
///
/// Environment variables:
/// - `PACER_OBSERVABILITY_ENABLED` / `PACER_OBSERVABILITY`: optional enable/disable flag (default enabled).
/// - `PACER_LOG_LEVEL`: optional level/filter override (`info`, `debug`, `pacer_core=trace`, ...).
/// - `PACER_JSON_LOG_PATH`: optional log file path. If set, logs are JSONL in that file.
///   If unset, logs go to stderr in a compact console format so they do not mix
///   with rendered output on stdout.
/// - `RUST_LOG`: optional filter override.
pub fn init_observability() {
    init_with(ObservabilitySettings::from_env());
}

pub fn init_with(settings: ObservabilitySettings) {
    INIT.get_or_init(|| {
        if !settings.enabled {
            return;
        }

        let env_filter = settings.env_filter();
        if let Some(path) = &settings.json_log_path {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                let _ = std::fs::create_dir_all(parent);
            }
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("pacer.logs.jsonl");
            let writer = tracing_appender::rolling::never(dir, file_name);
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_target(false)
                .with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer)
                .try_init();
        } else {
            let console_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init();
        }
    });
}
