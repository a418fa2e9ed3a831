//! Tracing setup for the tfcheck binary.
//!
//! CI systems configure logging through the environment: `LOG_LEVEL=DEBUG`
//! raises verbosity and `LOG_TYPE=JSON` switches to one JSON object per line.
//! `RUST_LOG`, when set, takes precedence over both.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Value of `LOG_TYPE` selecting JSON output.
pub const JSON_LOG_TYPE: &str = "JSON";

/// Value of `LOG_LEVEL` selecting debug output.
pub const DEBUG_LOG_LEVEL: &str = "DEBUG";

/// Default level for the given `LOG_LEVEL` value.
pub fn level_from_env_value(value: Option<&str>) -> Level {
    match value {
        Some(v) if v.eq_ignore_ascii_case(DEBUG_LOG_LEVEL) => Level::DEBUG,
        _ => Level::INFO,
    }
}

/// Whether a `LOG_TYPE` value asks for JSON lines.
pub fn json_from_env_value(value: Option<&str>) -> bool {
    matches!(value, Some(v) if v.eq_ignore_ascii_case(JSON_LOG_TYPE))
}

/// Initialise the global tracing subscriber.
///
/// Only the first call takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_env_value() {
        assert_eq!(level_from_env_value(Some("DEBUG")), Level::DEBUG);
        assert_eq!(level_from_env_value(Some("debug")), Level::DEBUG);
        assert_eq!(level_from_env_value(Some("INFO")), Level::INFO);
        assert_eq!(level_from_env_value(None), Level::INFO);
    }

    #[test]
    fn test_json_from_env_value() {
        assert!(json_from_env_value(Some("JSON")));
        assert!(!json_from_env_value(Some("TEXT")));
        assert!(!json_from_env_value(None));
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(false, Level::INFO);
        init_tracing(true, Level::DEBUG);
    }
}
