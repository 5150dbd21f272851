//! Environment-backed tuning knobs for the bot runtime.

use std::env;
use std::time::Duration;

/// Timeout for active-reply and attachment-download HTTP requests.
pub const ENV_BOT_HTTP_TIMEOUT: &str = "BOT_HTTP_TIMEOUT";
/// Maximum idle lifetime of a streaming session.
pub const ENV_BOT_STREAM_TTL: &str = "BOT_STREAM_TTL";
/// How long a refresh request waits for the next pending fragment.
pub const ENV_BOT_STREAM_WAIT_TIMEOUT: &str = "BOT_STREAM_WAIT_TIMEOUT";

/// Resolve a duration setting with priority: explicit parameter, then the
/// environment variable (positive integer seconds), then the default.
pub fn resolve_duration(param: Option<Duration>, env_key: &str, default: Duration) -> Duration {
    if let Some(value) = param {
        if !value.is_zero() {
            return value;
        }
    }

    if let Ok(raw) = env::var(env_key) {
        if let Ok(secs) = raw.trim().parse::<u64>() {
            if secs > 0 {
                return Duration::from_secs(secs);
            }
        }
    }

    default
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_param_wins() {
        let got = resolve_duration(
            Some(Duration::from_secs(7)),
            "WECOM_AIBOT_TEST_UNSET",
            Duration::from_secs(60),
        );
        assert_eq!(got, Duration::from_secs(7));
    }

    #[test]
    fn zero_param_falls_through_to_default() {
        let got = resolve_duration(
            Some(Duration::ZERO),
            "WECOM_AIBOT_TEST_UNSET",
            Duration::from_secs(60),
        );
        assert_eq!(got, Duration::from_secs(60));
    }

    #[test]
    fn env_var_overrides_default() {
        env::set_var("WECOM_AIBOT_TEST_TTL", "120");
        let got = resolve_duration(None, "WECOM_AIBOT_TEST_TTL", Duration::from_secs(60));
        assert_eq!(got, Duration::from_secs(120));
        env::remove_var("WECOM_AIBOT_TEST_TTL");
    }

    #[test]
    fn garbage_env_value_is_ignored() {
        env::set_var("WECOM_AIBOT_TEST_BAD", "half-a-minute");
        let got = resolve_duration(None, "WECOM_AIBOT_TEST_BAD", Duration::from_millis(500));
        assert_eq!(got, Duration::from_millis(500));
        env::remove_var("WECOM_AIBOT_TEST_BAD");
    }
}
