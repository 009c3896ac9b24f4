use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

/// Filter used when no valid override is configured: this crate at `info`,
/// everything else (reqwest, hyper, ...) at `warn`.
const DEFAULT_FILTER: &str = "warn,plan_stream=info";
const DEFAULT_JSON_LOG_FILE: &str = "plan-stream.logs.jsonl";

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn observability_enabled() -> bool {
    std::env::var("PLAN_STREAM_OBSERVABILITY_ENABLED")
        .ok()
        .map(|value| parse_bool_env(&value).unwrap_or(true))
        .unwrap_or(true)
}

/// A bare level such as `debug` applies to this crate only; anything else is
/// taken as a full filter directive.
fn crate_directive(level: &str) -> String {
    let level = level.trim();
    if level.parse::<tracing::Level>().is_ok() {
        format!("warn,plan_stream={level}")
    } else {
        level.to_string()
    }
}

fn env_filter_from(crate_level: Option<String>, rust_log: Option<String>) -> EnvFilter {
    crate_level
        .map(|level| crate_directive(&level))
        .into_iter()
        .chain(rust_log)
        .filter(|directive| !directive.trim().is_empty())
        .find_map(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

fn resolve_env_filter() -> EnvFilter {
    env_filter_from(
        std::env::var("PLAN_STREAM_LOG_LEVEL").ok(),
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
    )
}

/// Installs the process-wide tracing subscriber once.
///
/// Environment variables:
/// - `PLAN_STREAM_OBSERVABILITY_ENABLED`: set to a false value to skip installation.
/// - `PLAN_STREAM_LOG_LEVEL`: a bare level (`debug`) scoped to this crate, or a
///   full filter directive.
/// - `PLAN_STREAM_JSON_LOG_PATH`: write JSONL to this file instead of compact stdout.
/// - `RUST_LOG`: fallback filter.
///
/// Without either filter, this crate logs at `info` and dependencies at `warn`.
pub fn init_observability() {
    INIT.get_or_init(|| {
        if !observability_enabled() {
            return;
        }

        let env_filter = resolve_env_filter();
        if let Ok(path_raw) = std::env::var("PLAN_STREAM_JSON_LOG_PATH") {
            let path = std::path::PathBuf::from(path_raw);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                let _ = std::fs::create_dir_all(parent);
            }
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(DEFAULT_JSON_LOG_FILE);
            let writer = tracing_appender::rolling::never(dir, file_name);
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true)
                .with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer)
                .try_init();
        } else {
            let console_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stdout);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init();
        }
    });
}
