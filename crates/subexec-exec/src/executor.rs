//! One-subprocess-per-attempt execution with timeout enforcement.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;

use crate::env::{EnvironmentSanitizer, MASK_PLACEHOLDER, resolve_working_directory};
use crate::error::ExecError;
use crate::log::{LogSink, TracingSink};
use crate::process_group::{self, DEFAULT_KILL_GRACE, GroupGuard};
use crate::stream::{EventTx, ExecutionStream, STREAM_BUFFER, StreamEvent};
use crate::types::{Command, ExecutionRequest, ExecutionResult};

/// Banner lines the wrapped tool prints on stderr that are not errors.
pub const DEFAULT_INFO_PATTERNS: &[&str] = &["Loaded cached credentials", "Data collection is disabled"];

/// Decides whether a stderr line is informational chatter rather than a diagnostic.
pub trait OutputClassifier: Send + Sync {
    fn is_info_message(&self, line: &str) -> bool;
}

impl<F> OutputClassifier for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_info_message(&self, line: &str) -> bool {
        self(line)
    }
}

/// Treats every stderr line as diagnostic.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInfoMessages;

impl OutputClassifier for NoInfoMessages {
    fn is_info_message(&self, _line: &str) -> bool {
        false
    }
}

/// Substring match against a list of known informational messages.
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    patterns: Vec<String>,
}

impl PatternClassifier {
    #[must_use]
    pub fn new(patterns: Vec<String>) -> Self {
        Self {
            patterns: patterns.into_iter().filter(|p| !p.is_empty()).collect(),
        }
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_INFO_PATTERNS.iter().map(|s| (*s).to_owned()).collect())
    }
}

impl OutputClassifier for PatternClassifier {
    fn is_info_message(&self, line: &str) -> bool {
        self.patterns.iter().any(|p| line.contains(p.as_str()))
    }
}

/// Identity of one attempt, carried into every error it can produce.
#[derive(Debug, Clone)]
struct Attempt {
    command: String,
    arguments: Vec<String>,
    timeout: Duration,
    /// Leader pid recorded at spawn; the child is its own process group.
    pgid: Option<u32>,
}

impl Attempt {
    #[allow(clippy::cast_possible_truncation)]
    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}

/// Spawns the wrapped tool, enforces the per-attempt timeout and classifies the outcome.
#[derive(Clone)]
pub struct ProcessExecutor {
    sanitizer: EnvironmentSanitizer,
    classifier: Arc<dyn OutputClassifier>,
    sink: Arc<dyn LogSink>,
    kill_grace: Duration,
    working_dir_fallback: Option<PathBuf>,
}

impl fmt::Debug for ProcessExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessExecutor")
            .field("sanitizer", &self.sanitizer)
            .field("kill_grace", &self.kill_grace)
            .field("working_dir_fallback", &self.working_dir_fallback)
            .finish_non_exhaustive()
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sanitizer: EnvironmentSanitizer::default(),
            classifier: Arc::new(PatternClassifier::default()),
            sink: Arc::new(TracingSink),
            kill_grace: DEFAULT_KILL_GRACE,
            working_dir_fallback: None,
        }
    }

    #[must_use]
    pub fn with_sanitizer(mut self, sanitizer: EnvironmentSanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: impl OutputClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Time allowed between SIGTERM and SIGKILL when an attempt times out.
    #[must_use]
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Working directory used when a request does not name one.
    #[must_use]
    pub fn with_working_dir_fallback(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir_fallback = dir;
        self
    }

    #[must_use]
    pub fn sink(&self) -> &Arc<dyn LogSink> {
        &self.sink
    }

    #[must_use]
    pub fn sanitizer(&self) -> &EnvironmentSanitizer {
        &self.sanitizer
    }

    /// Run one attempt and buffer its output.
    ///
    /// # Errors
    ///
    /// `ExecError::Spawn` if the process cannot be created (no timer is started),
    /// `ExecError::Timeout` if it outlives `request.timeout` (the process group is
    /// terminated first), `ExecError::Execution` on a nonzero exit.
    ///
    /// Dropping the future before it completes SIGKILLs the whole process group.
    pub async fn execute(
        &self,
        command: &Command,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, ExecError> {
        let (mut child, attempt) = self.spawn(command, request)?;
        self.drive(&mut child, &attempt, None).await
    }

    /// Run one attempt and expose its output as a live stream.
    ///
    /// Must be called from within a Tokio runtime: the attempt is driven by a
    /// spawned task that keeps running (bounded by the timeout) even if the
    /// stream is dropped.
    ///
    /// # Errors
    ///
    /// `ExecError::Spawn` if the process cannot be created. Later failures are
    /// delivered as the stream's terminal item.
    pub fn execute_streaming(
        &self,
        command: &Command,
        request: &ExecutionRequest,
    ) -> Result<ExecutionStream, ExecError> {
        let (mut child, attempt) = self.spawn(command, request)?;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let executor = self.clone();

        tokio::spawn(async move {
            let outcome = executor
                .drive(&mut child, &attempt, Some(tx.clone()))
                .await
                .map(|result| StreamEvent::Exited {
                    exit_code: result.exit_code,
                });
            let _ = tx.send(outcome).await;
        });

        Ok(ExecutionStream::new(rx))
    }

    fn spawn(
        &self,
        command: &Command,
        request: &ExecutionRequest,
    ) -> Result<(Child, Attempt), ExecError> {
        let env = self.sanitizer.build_environment(&request.env_overrides);
        let cwd = resolve_working_directory(
            request.working_directory.as_deref(),
            self.working_dir_fallback.as_deref(),
        );
        let arguments = command.argv(&request.arguments);

        let mut overrides: Vec<String> = request
            .env_overrides
            .iter()
            .map(|(k, v)| match v {
                Some(_) if self.sanitizer.is_sensitive(k) => format!("{k}={MASK_PLACEHOLDER}"),
                Some(v) => format!("{k}={v}"),
                None => format!("-{k}"),
            })
            .collect();
        overrides.sort();
        self.sink.debug(
            "spawning subprocess",
            &[
                ("command", command.executable.clone()),
                ("args", format!("{arguments:?}")),
                ("cwd", cwd.display().to_string()),
                ("env_overrides", overrides.join(",")),
                ("timeout_ms", request.timeout_ms().to_string()),
            ],
        );

        let mut cmd = tokio::process::Command::new(&command.executable);
        cmd.args(&arguments)
            .current_dir(&cwd)
            .env_clear()
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        match cmd.spawn() {
            Ok(child) => {
                let pgid = child.id();
                Ok((
                    child,
                    Attempt {
                        command: command.executable.clone(),
                        arguments,
                        timeout: request.timeout,
                        pgid,
                    },
                ))
            }
            Err(source) => {
                self.sink.error(
                    "failed to spawn subprocess",
                    &[
                        ("command", command.executable.clone()),
                        ("error", source.to_string()),
                    ],
                );
                Err(ExecError::Spawn {
                    command: command.executable.clone(),
                    arguments,
                    source,
                })
            }
        }
    }

    /// Race process exit against the attempt timeout.
    async fn drive(
        &self,
        child: &mut Child,
        attempt: &Attempt,
        events: Option<EventTx>,
    ) -> Result<ExecutionResult, ExecError> {
        let started = Instant::now();
        let mut guard = GroupGuard::new(attempt.pgid);

        let mut stdout_task = tokio::spawn(read_stdout(child.stdout.take(), events.clone()));
        let mut stderr_task = tokio::spawn(read_stderr(
            child.stderr.take(),
            Arc::clone(&self.classifier),
            Arc::clone(&self.sink),
            events,
        ));

        let completed = tokio::time::timeout(attempt.timeout, async {
            let status = child.wait().await;
            let stdout = (&mut stdout_task).await.unwrap_or_default();
            let stderr = (&mut stderr_task).await.unwrap_or_default();
            (status, stdout, stderr)
        })
        .await;

        #[allow(clippy::cast_possible_truncation)]
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let Ok((status, stdout, mut stderr)) = completed else {
            let termination =
                process_group::terminate(child, attempt.pgid, self.kill_grace).await;
            guard.disarm();
            // Readers must be gone before the terminal item is produced.
            stdout_task.abort();
            stderr_task.abort();
            let _ = stdout_task.await;
            let _ = stderr_task.await;
            self.sink.warn(
                "subprocess timed out",
                &[
                    ("command", attempt.command.clone()),
                    ("timeout_ms", attempt.timeout_ms().to_string()),
                    ("termination", format!("{termination:?}")),
                ],
            );
            return Err(ExecError::Timeout {
                command: attempt.command.clone(),
                arguments: attempt.arguments.clone(),
                timeout_ms: attempt.timeout_ms(),
            });
        };

        guard.disarm();
        let exit_code = match status {
            Ok(status) => process_group::normalized_exit_code(status),
            Err(e) => {
                if !stderr.is_empty() && !stderr.ends_with('\n') {
                    stderr.push('\n');
                }
                stderr.push_str(&format!("failed to wait for process: {e}"));
                -1
            }
        };

        self.sink.debug(
            "subprocess exited",
            &[
                ("command", attempt.command.clone()),
                ("exit_code", exit_code.to_string()),
                ("elapsed_ms", elapsed_ms.to_string()),
            ],
        );

        if exit_code == 0 {
            Ok(ExecutionResult {
                stdout,
                stderr,
                exit_code,
            })
        } else {
            Err(ExecError::Execution {
                command: attempt.command.clone(),
                arguments: attempt.arguments.clone(),
                exit_code,
                stdout,
                stderr,
            })
        }
    }
}

fn strip_line_ending(line: &str) -> &str {
    line.strip_suffix('\n')
        .map_or(line, |l| l.strip_suffix('\r').unwrap_or(l))
}

async fn forward(events: &mut Option<EventTx>, event: StreamEvent) {
    let Some(tx) = events.as_ref() else {
        return;
    };
    if tx.send(Ok(event)).await.is_err() {
        // Consumer went away; keep draining so the child never blocks on a full pipe.
        *events = None;
    }
}

/// Accumulate stdout byte-for-byte, forwarding each line when streaming.
async fn read_stdout<R>(pipe: Option<R>, mut events: Option<EventTx>) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(pipe) = pipe else {
        return String::new();
    };
    let mut reader = BufReader::new(pipe);
    let mut all = Vec::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                all.extend_from_slice(&line);
                if events.is_some() {
                    let text = String::from_utf8_lossy(&line);
                    let text = strip_line_ending(&text).to_owned();
                    forward(&mut events, StreamEvent::Stdout(text)).await;
                }
            }
        }
    }
    String::from_utf8_lossy(&all).into_owned()
}

/// Accumulate diagnostic stderr lines; informational lines only reach the debug log.
async fn read_stderr<R>(
    pipe: Option<R>,
    classifier: Arc<dyn OutputClassifier>,
    sink: Arc<dyn LogSink>,
    mut events: Option<EventTx>,
) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(pipe) = pipe else {
        return String::new();
    };
    let mut reader = BufReader::new(pipe);
    let mut diagnostics = String::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                let content = strip_line_ending(&text);
                if classifier.is_info_message(content.trim()) {
                    sink.debug(content.trim(), &[("stream", "stderr".to_owned())]);
                    continue;
                }
                diagnostics.push_str(&text);
                if events.is_some() {
                    forward(&mut events, StreamEvent::Stderr(content.to_owned())).await;
                }
            }
        }
    }
    diagnostics
}
