use serde::{Deserialize, Serialize};
use subexec_exec::{DEFAULT_INFO_PATTERNS, EX_TEMPFAIL};

fn default_program() -> String {
    "gemini".into()
}

fn default_true() -> bool {
    true
}

fn default_fallback_launcher() -> Option<String> {
    Some("npx".into())
}

fn default_fallback_args() -> Vec<String> {
    vec!["-y".into(), "@google/gemini-cli".into()]
}

fn default_info_patterns() -> Vec<String> {
    DEFAULT_INFO_PATTERNS.iter().map(|p| (*p).to_owned()).collect()
}

fn default_working_dir_env() -> Option<String> {
    Some("SUBEXEC_WORKDIR".into())
}

fn default_timeout_ms() -> u64 {
    300_000
}

fn default_kill_grace_ms() -> u64 {
    500
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_retryable_exit_codes() -> Vec<i32> {
    vec![EX_TEMPFAIL]
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub tool: ToolConfig,
    #[serde(default)]
    pub env: EnvConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub retry: RetrySettings,
}

/// Which tool to run and how to find it.
#[derive(Debug, Deserialize, Serialize)]
pub struct ToolConfig {
    #[serde(default = "default_program")]
    pub program: String,
    /// Use the fallback launcher when `program` is not on `PATH`.
    #[serde(default = "default_true")]
    pub allow_fallback: bool,
    #[serde(default = "default_fallback_launcher")]
    pub fallback_launcher: Option<String>,
    #[serde(default = "default_fallback_args")]
    pub fallback_args: Vec<String>,
    /// Substrings identifying stderr lines that are banners, not errors.
    #[serde(default = "default_info_patterns")]
    pub info_patterns: Vec<String>,
    /// Env var consulted for the working directory when a call does not set one.
    #[serde(default = "default_working_dir_env")]
    pub working_dir_env: Option<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            allow_fallback: true,
            fallback_launcher: default_fallback_launcher(),
            fallback_args: default_fallback_args(),
            info_patterns: default_info_patterns(),
            working_dir_env: default_working_dir_env(),
        }
    }
}

/// Extra keys on top of the built-in denylist and sensitive set.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct EnvConfig {
    #[serde(default)]
    pub denylist: Vec<String>,
    #[serde(default)]
    pub sensitive: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            kill_grace_ms: default_kill_grace_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_retryable_exit_codes")]
    pub retryable_exit_codes: Vec<i32>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            retryable_exit_codes: default_retryable_exit_codes(),
        }
    }
}
