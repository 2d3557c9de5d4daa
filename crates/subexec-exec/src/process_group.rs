//! Process-group termination for timed-out attempts.
//!
//! Each child is spawned as the leader of its own process group so a timeout can
//! signal the whole tree (wrapper scripts, launchers, their children) at once.
//! Termination is staged: SIGTERM, a grace period for voluntary exit, then
//! SIGKILL. The child is always reaped before returning.

use std::time::Duration;

use tokio::process::Child;

pub const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(500);

/// How a termination request completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited within the grace period after SIGTERM.
    Graceful,
    /// Needed SIGKILL.
    Forced,
    /// Had already been reaped.
    AlreadyExited,
}

/// Interval between liveness checks while waiting for a group to drain.
#[cfg(unix)]
const GROUP_POLL: Duration = Duration::from_millis(20);

#[cfg(unix)]
fn signal_group(pgid: u32, signal: nix::sys::signal::Signal) {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pgid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::debug!(pgid, ?signal, "killpg failed: {e}"),
    }
}

/// True while any process (zombies included) is still a member of `pgid`.
#[cfg(unix)]
fn group_alive(pgid: u32) -> bool {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    i32::try_from(pgid).is_ok_and(|raw| killpg(Pid::from_raw(raw), None).is_ok())
}

/// Terminate the process group `pgid` (led by `child`), then reap the leader.
///
/// `pgid` is the leader's pid recorded at spawn. The group is signalled even
/// when the leader has already been reaped, since descendants outlive it.
#[cfg(unix)]
pub async fn terminate(child: &mut Child, pgid: Option<u32>, grace: Duration) -> Termination {
    use nix::sys::signal::Signal;

    let Some(pgid) = pgid.or_else(|| child.id()) else {
        return Termination::AlreadyExited;
    };
    if child.id().is_none() && !group_alive(pgid) {
        return Termination::AlreadyExited;
    }

    signal_group(pgid, Signal::SIGTERM);
    let drained = tokio::time::timeout(grace, async {
        let _ = child.wait().await;
        while group_alive(pgid) {
            tokio::time::sleep(GROUP_POLL).await;
        }
    })
    .await;

    let outcome = if drained.is_ok() {
        Termination::Graceful
    } else {
        signal_group(pgid, Signal::SIGKILL);
        let _ = child.wait().await;
        Termination::Forced
    };

    // Sweep anything that joined the group during the grace period.
    signal_group(pgid, Signal::SIGKILL);
    outcome
}

#[cfg(not(unix))]
pub async fn terminate(child: &mut Child, _pgid: Option<u32>, _grace: Duration) -> Termination {
    if child.id().is_none() {
        return Termination::AlreadyExited;
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
    Termination::Forced
}

/// SIGKILLs a process group when dropped while armed.
///
/// Covers attempts whose future is dropped mid-flight: `kill_on_drop` only
/// reaches the leader, this reaches its descendants too.
#[derive(Debug)]
pub(crate) struct GroupGuard {
    pgid: Option<u32>,
}

impl GroupGuard {
    pub(crate) fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    /// The attempt finished on its own terms; leave the group alone.
    pub(crate) fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid.take() {
            signal_group(pgid, nix::sys::signal::Signal::SIGKILL);
        }
    }
}

/// Exit code used for classification: the real code, `128 + signal` for
/// signal termination, `-1` when neither is available.
#[must_use]
pub fn normalized_exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::process::CommandExt;
    use std::process::Stdio;

    use super::*;

    fn spawn_in_group(script: &str) -> Child {
        tokio::process::Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    fn is_alive(pid: u32) -> bool {
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
    }

    /// Alive and not a zombie (zombies linger until their new parent reaps them).
    fn is_running(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.trim_start().chars().next())
                .is_some_and(|state| state != 'Z'),
            Err(_) => cfg!(not(target_os = "linux")) && is_alive(pid),
        }
    }

    #[tokio::test]
    async fn sigterm_is_enough_for_cooperative_child() {
        let mut child = spawn_in_group("exec sleep 30");
        let pid = child.id().unwrap();
        let outcome = terminate(&mut child, Some(pid), Duration::from_secs(2)).await;
        assert_eq!(outcome, Termination::Graceful);
        assert!(!is_alive(pid));
    }

    #[tokio::test]
    async fn stubborn_child_is_force_killed() {
        let mut child = spawn_in_group("trap '' TERM; while :; do sleep 0.05; done");
        let pid = child.id().unwrap();
        // Let the shell install its trap before signalling.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let outcome = terminate(&mut child, Some(pid), Duration::from_millis(200)).await;
        assert_eq!(outcome, Termination::Forced);
        assert!(!is_alive(pid));
    }

    #[tokio::test]
    async fn reaped_child_reports_already_exited() {
        let mut child = spawn_in_group("true");
        let pid = child.id();
        child.wait().await.unwrap();
        assert_eq!(
            terminate(&mut child, pid, DEFAULT_KILL_GRACE).await,
            Termination::AlreadyExited
        );
    }

    #[tokio::test]
    async fn reaped_leader_still_takes_group_down() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("bg");
        let mut child = spawn_in_group(&format!(
            "sleep 30 & echo $! > '{}'",
            pid_file.display()
        ));
        let pgid = child.id();
        child.wait().await.unwrap();
        let bg: u32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(is_alive(bg));

        let outcome = terminate(&mut child, pgid, Duration::from_secs(2)).await;
        assert_ne!(outcome, Termination::AlreadyExited);
        for _ in 0..50 {
            if !is_running(bg) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("background process {bg} survived group termination");
    }

    #[test]
    fn armed_guard_kills_group_on_drop() {
        let child = std::process::Command::new("sh")
            .arg("-c")
            .arg("exec sleep 30")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id();
        drop(GroupGuard::new(Some(pid)));
        let output = child.wait_with_output().unwrap();
        assert_eq!(normalized_exit_code(output.status), 128 + 9);

        let mut survivor = std::process::Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap();
        let mut guard = GroupGuard::new(Some(survivor.id()));
        guard.disarm();
        drop(guard);
        assert!(survivor.try_wait().unwrap().is_none());
        survivor.kill().unwrap();
        survivor.wait().unwrap();
    }

    #[tokio::test]
    async fn signal_exit_is_normalized() {
        let mut child = spawn_in_group("kill -9 $$");
        let status = child.wait().await.unwrap();
        assert_eq!(normalized_exit_code(status), 128 + 9);

        let mut child = spawn_in_group("exit 3");
        let status = child.wait().await.unwrap();
        assert_eq!(normalized_exit_code(status), 3);
    }
}
