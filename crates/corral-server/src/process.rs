//! OS process handling for server instances.
//!
//! A [`ServerProcess`] either owns the `Child` it spawned or refers to a
//! bare pid adopted from a persisted topology. Both flavours answer the
//! same questions (alive? exit code?) and are stopped the same way:
//! SIGTERM, then poll until the process is gone or the timeout runs out.

use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::debug;

use crate::command::LaunchSpec;
use crate::error::ServerError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to signal pid {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: Errno,
    },

    #[error("pid {pid} still running {timeout:?} after SIGTERM")]
    Timeout { pid: u32, timeout: Duration },

    #[error("failed to reap pid {pid}: {source}")]
    Wait {
        pid: u32,
        #[source]
        source: std::io::Error,
    },
}

/// How the child's standard streams are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StdioPolicy {
    /// Pipe stdout/stderr instead of inheriting ours.
    pub capture: bool,
    /// Attach our stdin so a debugger prompt stays usable. Otherwise
    /// stdin is a pipe.
    pub interactive: bool,
}

impl StdioPolicy {
    fn inherits_stdin(&self) -> bool {
        self.interactive
    }

    fn stdin(&self) -> Stdio {
        if self.inherits_stdin() {
            Stdio::inherit()
        } else {
            Stdio::piped()
        }
    }

    fn output(&self) -> Stdio {
        if self.capture {
            Stdio::piped()
        } else {
            Stdio::inherit()
        }
    }
}

/// A running (or recently running) server process.
#[derive(Debug)]
pub struct ServerProcess {
    pid: u32,
    child: Option<Child>,
}

impl ServerProcess {
    /// Launches `spec` as a new child process.
    pub fn spawn(spec: &LaunchSpec, stdio: StdioPolicy) -> Result<Self, ServerError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(stdio.stdin())
            .stdout(stdio.output())
            .stderr(stdio.output());

        let child = command.spawn().map_err(|source| ServerError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        let pid = child.id();
        debug!(pid, program = %spec.program, "spawned server process");

        Ok(Self {
            pid,
            child: Some(child),
        })
    }

    /// Refers to a process started by someone else, e.g. an earlier run.
    pub fn adopt(pid: u32) -> Self {
        Self { pid, child: None }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_alive(&mut self) -> bool {
        self.exit_code().is_none()
    }

    /// Returns the exit code once the process has ended.
    ///
    /// Processes killed by a signal report the negated signal number.
    /// Adopted processes cannot be reaped, so their exit status is
    /// unknown and reported as `0`.
    pub fn exit_code(&mut self) -> Option<i32> {
        match self.child.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(Some(status)) => Some(status_code(status)),
                Ok(None) => None,
                // nothing left to wait for
                Err(_) => Some(0),
            },
            None if is_pid_alive(self.pid) => None,
            None => Some(0),
        }
    }

    /// Sends SIGTERM and waits up to `timeout` for the process to exit.
    pub async fn terminate(&mut self, timeout: Duration) -> Result<i32, ProcessError> {
        if let Some(code) = self.exit_code() {
            return Ok(code);
        }
        send_signal(self.pid, Signal::SIGTERM)?;

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(code) = self.exit_code() {
                return Ok(code);
            }
            if Instant::now() >= deadline {
                return Err(ProcessError::Timeout {
                    pid: self.pid,
                    timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Sends SIGKILL and reaps the process if we own it.
    pub fn kill(&mut self) -> Result<i32, ProcessError> {
        match self.child.as_mut() {
            Some(child) => {
                // already exited if this fails; wait() below picks it up
                let _ = child.kill();
                child
                    .wait()
                    .map(status_code)
                    .map_err(|source| ProcessError::Wait {
                        pid: self.pid,
                        source,
                    })
            }
            None => {
                send_signal(self.pid, Signal::SIGKILL)?;
                Ok(-(Signal::SIGKILL as i32))
            }
        }
    }

    /// Pids of every process below this one, children first.
    pub fn descendants(&self) -> Vec<u32> {
        descendant_pids(self.pid)
    }
}

/// Terminates a process we don't hold a handle for.
///
/// Used for the descendants of a server (e.g. forked persistence
/// children), which we can signal but not reap.
pub async fn terminate_pid(pid: u32, timeout: Duration) -> Result<(), ProcessError> {
    ServerProcess::adopt(pid).terminate(timeout).await.map(drop)
}

/// Whether a process with this pid exists and has not yet exited.
///
/// A zombie counts as exited. A process we may not signal (EPERM) still
/// counts as alive.
pub fn is_pid_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match signal::kill(Pid::from_raw(raw), None) {
        Ok(()) => !is_zombie(pid),
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

fn send_signal(pid: u32, sig: Signal) -> Result<(), ProcessError> {
    let raw = i32::try_from(pid).map_err(|_| ProcessError::Signal {
        pid,
        source: Errno::ESRCH,
    })?;
    match signal::kill(Pid::from_raw(raw), sig) {
        // gone already
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(source) => Err(ProcessError::Signal { pid, source }),
    }
}

fn status_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return -sig;
        }
    }
    -1
}

// --- /proc inspection ---

#[cfg(target_os = "linux")]
fn proc_stat(pid: u32) -> Option<(char, u32)> {
    let raw = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // the command name is parenthesized and may itself contain spaces
    let rest = &raw[raw.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let ppid = fields.next()?.parse().ok()?;
    Some((state, ppid))
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    matches!(proc_stat(pid), Some(('Z', _)))
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}

/// Every process whose ancestry leads back to `root`, breadth first.
#[cfg(target_os = "linux")]
pub fn descendant_pids(root: u32) -> Vec<u32> {
    let Ok(dir) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    let parents: Vec<(u32, u32)> = dir
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        .filter_map(|pid| Some((pid, proc_stat(pid)?.1)))
        .collect();

    let mut found = Vec::new();
    let mut frontier = vec![root];
    while let Some(parent) = frontier.pop() {
        for &(pid, ppid) in &parents {
            if ppid == parent && !found.contains(&pid) {
                found.push(pid);
                frontier.push(pid);
            }
        }
    }
    found
}

#[cfg(not(target_os = "linux"))]
pub fn descendant_pids(_root: u32) -> Vec<u32> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn sleeper(script: &str) -> LaunchSpec {
        LaunchSpec {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            env: BTreeMap::new(),
        }
    }

    const QUIET: StdioPolicy = StdioPolicy {
        capture: true,
        interactive: false,
    };

    #[tokio::test]
    async fn terminate_running_process() {
        let mut proc = ServerProcess::spawn(&sleeper("exec sleep 30"), QUIET).unwrap();
        assert!(proc.is_alive());

        let code = proc.terminate(Duration::from_secs(3)).await.unwrap();
        assert_eq!(code, -(Signal::SIGTERM as i32));
        assert!(!proc.is_alive());
    }

    #[tokio::test]
    async fn ignored_sigterm_times_out_then_kill_works() {
        let mut proc =
            ServerProcess::spawn(&sleeper("trap '' TERM; while true; do sleep 1; done"), QUIET)
                .unwrap();
        // give the shell a moment to install the trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        let err = proc
            .terminate(Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Timeout { .. }), "{err}");

        assert_eq!(proc.kill().unwrap(), -(Signal::SIGKILL as i32));
        assert!(!proc.is_alive());
    }

    #[test]
    fn stdin_is_only_shared_with_a_debugger() {
        let uncaptured = StdioPolicy {
            capture: false,
            interactive: false,
        };
        assert!(!uncaptured.inherits_stdin());
        assert!(!QUIET.inherits_stdin());

        let debugger = StdioPolicy {
            capture: true,
            interactive: true,
        };
        assert!(debugger.inherits_stdin());
    }

    #[test]
    fn exit_code_of_finished_process() {
        let mut proc = ServerProcess::spawn(&sleeper("exit 3"), QUIET).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while proc.is_alive() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(proc.exit_code(), Some(3));
    }

    #[test]
    fn spawn_failure_names_the_program() {
        let spec = LaunchSpec {
            program: "/nonexistent/corral-server-binary".into(),
            args: vec![],
            env: BTreeMap::new(),
        };
        let err = ServerProcess::spawn(&spec, QUIET).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/corral-server-binary"));
    }

    #[test]
    fn own_pid_is_alive() {
        assert!(is_pid_alive(std::process::id()));
        assert!(!is_pid_alive(u32::MAX));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn descendants_are_found_and_terminated() {
        let mut proc = ServerProcess::spawn(&sleeper("sleep 30 & wait"), QUIET).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut children = proc.descendants();
        while children.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
            children = proc.descendants();
        }
        assert_eq!(children.len(), 1);

        terminate_pid(children[0], Duration::from_secs(3))
            .await
            .unwrap();
        proc.terminate(Duration::from_secs(3)).await.unwrap();
        assert!(!is_pid_alive(children[0]));
    }
}
