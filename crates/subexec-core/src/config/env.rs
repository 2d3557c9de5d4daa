use std::str::FromStr;

use super::Config;

/// Parsed value of `key`, or `None` (with a warning) when it is set but invalid.
fn parse_var<T: FromStr>(key: &str) -> Option<T> {
    let v = std::env::var(key).ok()?;
    match v.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("ignoring invalid {key} value: {v}");
            None
        }
    }
}

fn parse_codes(v: &str) -> Option<Vec<i32>> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<i32>().ok())
        .collect()
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_tool();
        self.apply_env_overrides_execution();
        self.apply_env_overrides_retry();
    }

    fn apply_env_overrides_tool(&mut self) {
        if let Ok(v) = std::env::var("SUBEXEC_PROGRAM") {
            self.tool.program = v;
        }
        if let Some(enabled) = parse_var("SUBEXEC_ALLOW_FALLBACK") {
            self.tool.allow_fallback = enabled;
        }
        if let Ok(v) = std::env::var("SUBEXEC_FALLBACK_LAUNCHER") {
            self.tool.fallback_launcher = if v.trim().is_empty() { None } else { Some(v) };
        }
    }

    fn apply_env_overrides_execution(&mut self) {
        if let Some(ms) = parse_var("SUBEXEC_TIMEOUT_MS") {
            self.execution.timeout_ms = ms;
        }
        if let Some(ms) = parse_var("SUBEXEC_KILL_GRACE_MS") {
            self.execution.kill_grace_ms = ms;
        }
    }

    fn apply_env_overrides_retry(&mut self) {
        if let Some(n) = parse_var("SUBEXEC_MAX_ATTEMPTS") {
            self.retry.max_attempts = n;
        }
        if let Some(ms) = parse_var("SUBEXEC_INITIAL_DELAY_MS") {
            self.retry.initial_delay_ms = ms;
        }
        if let Some(m) = parse_var("SUBEXEC_BACKOFF_MULTIPLIER") {
            self.retry.backoff_multiplier = m;
        }
        if let Some(ms) = parse_var("SUBEXEC_MAX_DELAY_MS") {
            self.retry.max_delay_ms = ms;
        }
        if let Ok(v) = std::env::var("SUBEXEC_RETRYABLE_EXIT_CODES") {
            match parse_codes(&v) {
                Some(codes) => self.retry.retryable_exit_codes = codes,
                None => tracing::warn!("ignoring invalid SUBEXEC_RETRYABLE_EXIT_CODES value: {v}"),
            }
        }
    }
}
