//! Error taxonomy for wrapped-tool invocations.

/// Failure of a wrapped-tool invocation.
///
/// Every variant carries enough context (command, arguments, exit code, captured
/// output) to render a message without re-running the subprocess.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        arguments: Vec<String>,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with code {exit_code}{}", stderr_suffix(.stderr))]
    Execution {
        command: String,
        arguments: Vec<String>,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("`{command}` timed out after {timeout_ms}ms")]
    Timeout {
        command: String,
        arguments: Vec<String>,
        timeout_ms: u64,
    },

    #[error("giving up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last_error: Box<ExecError>,
    },
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

impl ExecError {
    /// Exit code of the failed process, if it ran to completion.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self.root_cause() {
            Self::Execution { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }

    #[must_use]
    pub fn command(&self) -> &str {
        match self.root_cause() {
            Self::Spawn { command, .. }
            | Self::Execution { command, .. }
            | Self::Timeout { command, .. } => command,
            Self::RetriesExhausted { .. } => "",
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.root_cause(), Self::Timeout { .. })
    }

    #[must_use]
    pub fn is_spawn(&self) -> bool {
        matches!(self.root_cause(), Self::Spawn { .. })
    }

    /// The underlying attempt error, looking through `RetriesExhausted`.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        let mut err = self;
        while let Self::RetriesExhausted { last_error, .. } = err {
            err = &**last_error;
        }
        err
    }
}
