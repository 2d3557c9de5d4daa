//! High-level entry point wiring resolver, executor and retry policy from a [`Config`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use subexec_exec::{
    Command, CommandResolver, EnvironmentSanitizer, ExecError, ExecutionRequest, ExecutionResult,
    ExecutionStream, LogSink, PatternClassifier, ProcessExecutor, RetryConfig, RetryPolicy,
    resolve_working_directory,
};

use crate::config::Config;

/// Per-call adjustments on top of the configured defaults.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub working_dir: Option<PathBuf>,
    /// `Some` sets a variable, `None` removes it from the child's environment.
    pub env: HashMap<String, Option<String>>,
    /// Overrides `tool.allow_fallback` for this call.
    pub allow_fallback: Option<bool>,
    pub timeout: Option<Duration>,
}

impl RunOptions {
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), Some(value.into()));
        self
    }

    #[must_use]
    pub fn unset_env(mut self, key: impl Into<String>) -> Self {
        self.env.insert(key.into(), None);
        self
    }

    #[must_use]
    pub fn allow_fallback(mut self, allow: bool) -> Self {
        self.allow_fallback = Some(allow);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// What a call would execute, without spawning anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub command: Command,
    pub argv: Vec<String>,
    pub working_dir: PathBuf,
    /// Sorted `KEY=VALUE` (sensitive values masked) and `-KEY` removals.
    pub env_changes: Vec<String>,
}

#[derive(Debug)]
pub struct ToolRunner {
    resolver: CommandResolver,
    policy: RetryPolicy,
    allow_fallback: bool,
    timeout: Duration,
    retry: RetryConfig,
    working_dir_fallback: Option<PathBuf>,
}

impl ToolRunner {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let mut resolver = CommandResolver::new(config.tool.program.clone());
        if let Some(fallback) = config.fallback_command() {
            resolver = resolver.with_fallback(fallback);
        }

        let working_dir_fallback = config.working_dir_fallback();
        let executor = ProcessExecutor::new()
            .with_sanitizer(EnvironmentSanitizer::new(
                &config.env.denylist,
                &config.env.sensitive,
            ))
            .with_classifier(PatternClassifier::new(config.tool.info_patterns.clone()))
            .with_kill_grace(config.kill_grace())
            .with_working_dir_fallback(working_dir_fallback.clone());

        Self {
            resolver,
            policy: RetryPolicy::new(executor),
            allow_fallback: config.tool.allow_fallback,
            timeout: config.timeout(),
            retry: config.retry_config(),
            working_dir_fallback,
        }
    }

    /// Route executor and retry logs to `sink` instead of `tracing`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.policy = RetryPolicy::new(self.policy.executor().clone().with_sink(sink));
        self
    }

    /// Resolved command; the `PATH` probe runs at most once per runner.
    pub async fn command(&self, allow_fallback: Option<bool>) -> Command {
        self.resolver
            .resolve(allow_fallback.unwrap_or(self.allow_fallback))
            .await
    }

    /// Run `args` with retries and buffered output.
    ///
    /// # Errors
    ///
    /// Any [`ExecError`] from the final attempt; retryable failures that use up
    /// every attempt surface as [`ExecError::RetriesExhausted`].
    pub async fn run(
        &self,
        args: &[String],
        options: &RunOptions,
    ) -> Result<ExecutionResult, ExecError> {
        let command = self.command(options.allow_fallback).await;
        let request = self.request(args, options);
        self.policy.execute_with_retry(&command, &request).await
    }

    /// Run `args` once and stream its output.
    ///
    /// # Errors
    ///
    /// [`ExecError::Spawn`] if the process cannot be started.
    pub async fn stream(
        &self,
        args: &[String],
        options: &RunOptions,
    ) -> Result<ExecutionStream, ExecError> {
        let command = self.command(options.allow_fallback).await;
        let request = self.request(args, options);
        self.policy
            .executor()
            .execute_streaming(&command, &request)
    }

    /// Describe the invocation `run` would perform.
    pub async fn plan(&self, args: &[String], options: &RunOptions) -> Plan {
        let command = self.command(options.allow_fallback).await;
        let argv = command.argv(args);
        let working_dir = resolve_working_directory(
            options.working_dir.as_deref(),
            self.working_dir_fallback.as_deref(),
        );

        let sanitizer = self.policy.executor().sanitizer();
        let set: HashMap<String, String> = options
            .env
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
            .collect();
        let masked = sanitizer.mask_for_logging(&set);
        let mut env_changes: Vec<String> = options
            .env
            .keys()
            .map(|k| match masked.get(k) {
                Some(v) => format!("{k}={v}"),
                None => format!("-{k}"),
            })
            .collect();
        env_changes.sort();

        Plan {
            command,
            argv,
            working_dir,
            env_changes,
        }
    }

    fn request(&self, args: &[String], options: &RunOptions) -> ExecutionRequest {
        let mut request = ExecutionRequest::new(args.iter().cloned())
            .timeout(options.timeout.unwrap_or(self.timeout))
            .retry(self.retry.clone());
        if let Some(dir) = &options.working_dir {
            request = request.working_directory(dir.clone());
        }
        request.env_overrides.clone_from(&options.env);
        request
    }
}
