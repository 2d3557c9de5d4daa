//! Lazy, process-lifetime resolution of the wrapped tool's executable.

use std::future::Future;
use std::path::PathBuf;

use tokio::sync::OnceCell;

use crate::types::Command;

/// Strategy for finding an executable by name.
pub trait Locate: Send + Sync {
    fn locate(&self, program: &str) -> impl Future<Output = Option<PathBuf>> + Send;
}

/// Looks the program up on `PATH` (and `PATHEXT` on Windows) via the `which` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct PathLocator;

impl Locate for PathLocator {
    async fn locate(&self, program: &str) -> Option<PathBuf> {
        let program = program.to_owned();
        tokio::task::spawn_blocking(move || which::which(program).ok())
            .await
            .ok()
            .flatten()
    }
}

/// Resolves the wrapped tool's [`Command`] at most once.
///
/// The first caller runs the probe; concurrent callers wait on the same in-flight
/// probe. The probe result is cached for the resolver's lifetime, and the
/// fallback choice is applied to it on each call.
#[derive(Debug)]
pub struct CommandResolver<L = PathLocator> {
    program: String,
    fallback: Option<Command>,
    locator: L,
    probe: OnceCell<Option<PathBuf>>,
}

impl CommandResolver<PathLocator> {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self::with_locator(program, PathLocator)
    }
}

impl<L: Locate> CommandResolver<L> {
    #[must_use]
    pub fn with_locator(program: impl Into<String>, locator: L) -> Self {
        Self {
            program: program.into(),
            fallback: None,
            locator,
            probe: OnceCell::new(),
        }
    }

    /// Launcher invocation used when the program is not installed, e.g. `npx -y <package>`.
    #[must_use]
    pub fn with_fallback(mut self, fallback: Command) -> Self {
        self.fallback = Some(fallback);
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.probe.initialized()
    }

    /// Resolve the command to run.
    ///
    /// Never fails: when the program is missing and the fallback is disallowed or
    /// unconfigured, the bare program name is returned and the failure surfaces as
    /// a spawn error when the command is executed.
    pub async fn resolve(&self, allow_fallback: bool) -> Command {
        let located = self
            .probe
            .get_or_init(|| async {
                let found = self.locator.locate(&self.program).await;
                match &found {
                    Some(path) => tracing::debug!(
                        program = %self.program,
                        path = %path.display(),
                        "resolved executable"
                    ),
                    None => tracing::debug!(program = %self.program, "executable not found"),
                }
                found
            })
            .await;

        if let Some(path) = located {
            return Command::new(path.to_string_lossy());
        }

        match &self.fallback {
            Some(fallback) if allow_fallback => {
                tracing::info!(
                    program = %self.program,
                    fallback = %fallback,
                    "executable not found, using fallback launcher"
                );
                fallback.clone()
            }
            _ => Command::new(self.program.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[derive(Debug, Default)]
    struct CountingLocator {
        found: Option<PathBuf>,
        probes: AtomicUsize,
    }

    impl Locate for CountingLocator {
        async fn locate(&self, _program: &str) -> Option<PathBuf> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.found.clone()
        }
    }

    fn fallback() -> Command {
        Command::new("npx").with_base_arguments(["-y", "@scope/tool"])
    }

    #[tokio::test]
    async fn found_program_has_no_base_arguments() {
        let locator = CountingLocator {
            found: Some(PathBuf::from("/opt/bin/tool")),
            ..Default::default()
        };
        let resolver = CommandResolver::with_locator("tool", locator).with_fallback(fallback());
        let cmd = resolver.resolve(true).await;
        assert_eq!(cmd, Command::new("/opt/bin/tool"));
        assert!(resolver.is_resolved());
    }

    #[tokio::test]
    async fn missing_program_uses_fallback_when_allowed() {
        let resolver = CommandResolver::with_locator("tool", CountingLocator::default())
            .with_fallback(fallback());
        assert_eq!(resolver.resolve(true).await, fallback());
    }

    #[tokio::test]
    async fn missing_program_without_fallback_is_best_effort() {
        let resolver = CommandResolver::with_locator("tool", CountingLocator::default())
            .with_fallback(fallback());
        assert_eq!(resolver.resolve(false).await, Command::new("tool"));

        let resolver = CommandResolver::with_locator("tool", CountingLocator::default());
        assert_eq!(resolver.resolve(true).await, Command::new("tool"));
    }

    #[tokio::test]
    async fn later_call_can_opt_into_fallback_without_reprobing() {
        let resolver = CommandResolver::with_locator("tool", CountingLocator::default())
            .with_fallback(fallback());
        assert_eq!(resolver.resolve(false).await, Command::new("tool"));
        assert_eq!(resolver.resolve(true).await, fallback());
        assert_eq!(resolver.locator.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_callers_share_one_probe() {
        let locator = CountingLocator {
            found: Some(PathBuf::from("/opt/bin/tool")),
            ..Default::default()
        };
        let resolver = Arc::new(CommandResolver::with_locator("tool", locator));

        let mut set = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let resolver = Arc::clone(&resolver);
            set.spawn(async move { resolver.resolve(false).await });
        }

        let mut resolved = Vec::new();
        while let Some(cmd) = set.join_next().await {
            resolved.push(cmd.unwrap());
        }

        assert_eq!(resolved.len(), 16);
        assert!(resolved.iter().all(|c| *c == Command::new("/opt/bin/tool")));
        assert_eq!(resolver.locator.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn path_locator_finds_sh() {
        let found = PathLocator.locate("sh").await;
        assert!(found.is_some_and(|p| p.is_absolute()));
        assert!(
            PathLocator
                .locate("definitely-not-a-real-binary-4f1c")
                .await
                .is_none()
        );
    }
}
