//! Value types shared by the resolver, executor and retry policy.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_TIMEOUT_MS: u64 = 300_000;

/// Exit code `EX_TEMPFAIL` from `sysexits.h`: a temporary failure worth retrying.
pub const EX_TEMPFAIL: i32 = 75;

/// Executable plus fixed leading arguments, resolved once and reused for every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub executable: String,
    pub base_arguments: Vec<String>,
}

impl Command {
    #[must_use]
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            base_arguments: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_base_arguments<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_arguments = args.into_iter().map(Into::into).collect();
        self
    }

    /// Full argument vector for one call: base arguments followed by call arguments.
    #[must_use]
    pub fn argv(&self, arguments: &[String]) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.base_arguments.len() + arguments.len());
        argv.extend(self.base_arguments.iter().cloned());
        argv.extend(arguments.iter().cloned());
        argv
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.executable)?;
        for arg in &self.base_arguments {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Bounded exponential backoff plus the exit codes that count as transient.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    pub retryable_exit_codes: Vec<i32>,
}

impl RetryConfig {
    /// Clamps `max_attempts` to at least 1 and `backoff_multiplier` to at least 1.0.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        backoff_multiplier: f64,
        max_delay: Duration,
    ) -> Self {
        let backoff_multiplier = if backoff_multiplier.is_finite() {
            backoff_multiplier.max(1.0)
        } else {
            1.0
        };
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            backoff_multiplier,
            max_delay,
            retryable_exit_codes: Vec::new(),
        }
    }

    /// A single attempt, no retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, 1.0, Duration::ZERO)
    }

    #[must_use]
    pub fn with_retryable_exit_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.retryable_exit_codes = codes.into_iter().collect();
        self
    }

    #[must_use]
    pub fn is_retryable_exit_code(&self, code: i32) -> bool {
        self.retryable_exit_codes.contains(&code)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(
            3,
            Duration::from_millis(1000),
            2.0,
            Duration::from_millis(10_000),
        )
        .with_retryable_exit_codes([EX_TEMPFAIL])
    }
}

/// Parameters for one logical invocation (possibly several attempts).
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub arguments: Vec<String>,
    pub working_directory: Option<PathBuf>,
    /// `Some` sets or replaces a variable, `None` removes it.
    pub env_overrides: HashMap<String, Option<String>>,
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl ExecutionRequest {
    #[must_use]
    pub fn new<I, S>(arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            arguments: arguments.into_iter().map(Into::into).collect(),
            working_directory: None,
            env_overrides: HashMap::new(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            retry: RetryConfig::default(),
        }
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_overrides.insert(key.into(), Some(value.into()));
        self
    }

    #[must_use]
    pub fn unset_env(mut self, key: impl Into<String>) -> Self {
        self.env_overrides.insert(key.into(), None);
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}

/// Output of a successful (exit code 0) attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}
