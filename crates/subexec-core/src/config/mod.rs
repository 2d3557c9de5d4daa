mod env;
mod types;


pub use types::*;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use subexec_exec::{Command, RetryConfig};

const DEFAULT_CONFIG_PATH: &str = "config/subexec.toml";

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Reject values the executor cannot honour.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tool.program.trim().is_empty() {
            bail!("tool.program must not be empty");
        }
        if self.execution.timeout_ms == 0 {
            bail!("execution.timeout_ms must be greater than 0");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            bail!(
                "retry.backoff_multiplier must be a finite number >= 1, got {}",
                self.retry.backoff_multiplier
            );
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            bail!(
                "retry.initial_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.initial_delay_ms,
                self.retry.max_delay_ms
            );
        }
        Ok(())
    }

    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.initial_delay_ms),
            self.retry.backoff_multiplier,
            Duration::from_millis(self.retry.max_delay_ms),
        )
        .with_retryable_exit_codes(self.retry.retryable_exit_codes.iter().copied())
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.execution.timeout_ms)
    }

    #[must_use]
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.execution.kill_grace_ms)
    }

    /// Launcher invocation used when the program is not installed.
    #[must_use]
    pub fn fallback_command(&self) -> Option<Command> {
        self.tool
            .fallback_launcher
            .as_ref()
            .filter(|l| !l.trim().is_empty())
            .map(|launcher| {
                Command::new(launcher.clone()).with_base_arguments(self.tool.fallback_args.clone())
            })
    }

    /// Working directory taken from the env var named by `tool.working_dir_env`.
    #[must_use]
    pub fn working_dir_fallback(&self) -> Option<PathBuf> {
        let var = self.tool.working_dir_env.as_deref()?;
        std::env::var_os(var)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    }
}

/// `explicit`, else `SUBEXEC_CONFIG_PATH`, else `config/subexec.toml`.
#[must_use]
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    std::env::var_os("SUBEXEC_CONFIG_PATH")
        .filter(|v| !v.is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}
