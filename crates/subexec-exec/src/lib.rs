//! Subprocess execution core: command resolution, sanitized environments,
//! per-attempt timeouts, typed failures and retries with backoff.

pub mod command;
pub mod env;
pub mod error;
pub mod executor;
pub mod log;
pub mod process_group;
pub mod retry;
pub mod stream;
pub mod types;

pub use command::{CommandResolver, Locate, PathLocator};
pub use env::{EnvironmentSanitizer, MASK_PLACEHOLDER, resolve_working_directory};
pub use error::ExecError;
pub use executor::{
    DEFAULT_INFO_PATTERNS, NoInfoMessages, OutputClassifier, PatternClassifier, ProcessExecutor,
};
pub use log::{Level, LogSink, TracingSink};
pub use retry::{RetryPolicy, backoff_delay, is_retryable, retry_with_backoff};
pub use stream::{ExecutionStream, StreamEvent};
pub use types::{Command, EX_TEMPFAIL, ExecutionRequest, ExecutionResult, RetryConfig};
