//! Subprocess execution with timeouts.
//!
//! Every command runs through `/bin/sh -c` in its own process group, so a
//! timeout takes down whatever the shell started (ssh sessions, iperf3
//! servers, docker-compose) and not just the shell.

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use std::io::Read;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use crate::utils::{CheckError, CheckResult};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long to wait for pipes to close after the shell has exited.
/// Backgrounded grandchildren (`ssh -f`) may keep them open forever.
const PIPE_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    /// Turn an unsuccessful result into the error a check should return.
    pub fn into_checked(self) -> CheckResult<ExecutionResult> {
        if self.success() {
            Ok(self)
        } else {
            Err(CheckError::Subprocess {
                command: self.command,
                exit_code: self.exit_code,
                timed_out: self.timed_out,
                stderr: self.stderr,
            })
        }
    }
}

/// Runs shell commands. Clones share the interrupt state, so the signal
/// handler can stop whatever the main thread is waiting on.
#[derive(Debug, Clone)]
pub struct Executor {
    shell: String,
    default_timeout: Duration,
    /// Process group of the command in flight, 0 when idle.
    live_group: Arc<AtomicI32>,
    stopped: Arc<AtomicBool>,
}

impl Executor {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            shell: "/bin/sh".to_string(),
            default_timeout,
            live_group: Arc::new(AtomicI32::new(0)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run `command` and return what happened.
    ///
    /// A timeout is reported through `timed_out` unless `assert_success` is
    /// set, in which case it is an error like any non-zero exit. Once the run
    /// has been interrupted no new command is started.
    pub fn run(&self, command: &str, timeout: Duration, assert_success: bool) -> CheckResult<ExecutionResult> {
        if self.is_stopped() {
            return Err(CheckError::Subprocess {
                command: command.to_string(),
                exit_code: -1,
                timed_out: false,
                stderr: "run interrupted".to_string(),
            });
        }
        let result = self.spawn_and_wait(command, timeout, true)?;
        if assert_success {
            result.into_checked()
        } else {
            Ok(result)
        }
    }

    /// Run a stop command. Unlike `run` this still works after an interrupt,
    /// and `interrupt` never kills it.
    pub fn run_cleanup(&self, command: &str, timeout: Duration) -> CheckResult<ExecutionResult> {
        self.spawn_and_wait(command, timeout, false)
    }

    /// Refuse new commands and kill the process group in flight.
    pub fn interrupt(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let pgid = self.live_group.swap(0, Ordering::SeqCst);
        if pgid > 0 {
            tracing::warn!(pgid, "killing the running command");
            kill_group(pgid as u32);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn spawn_and_wait(&self, command: &str, timeout: Duration, interruptible: bool) -> CheckResult<ExecutionResult> {
        tracing::debug!(command, timeout_ms = timeout.as_millis() as u64, "spawning");
        let start = Instant::now();

        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(|e| CheckError::Subprocess {
                command: command.to_string(),
                exit_code: -1,
                timed_out: false,
                stderr: format!("spawn failed: {}", e),
            })?;

        let stdout_rx = drain(child.stdout.take());
        let stderr_rx = drain(child.stderr.take());

        // process_group(0) makes the child's pid its pgid
        let pgid = child.id() as i32;
        if interruptible {
            self.live_group.store(pgid, Ordering::SeqCst);
            // interrupt() may have swapped the slot before the store above
            if self.is_stopped() {
                kill_group(child.id());
            }
        }

        let waited = wait_with_deadline(&mut child, start + timeout);
        if interruptible {
            let _ = self.live_group.compare_exchange(pgid, 0, Ordering::SeqCst, Ordering::SeqCst);
        }
        let (status, timed_out) = waited?;
        if timed_out {
            tracing::warn!(command, "timed out after {:.1}s, process group killed", timeout.as_secs_f64());
        }

        let result = ExecutionResult {
            command: command.to_string(),
            exit_code: exit_code(status),
            stdout: collect(stdout_rx),
            stderr: collect(stderr_rx),
            duration: start.elapsed(),
            timed_out,
        };
        tracing::debug!(command, exit_code = result.exit_code, "finished");
        Ok(result)
    }

    #[cfg(test)]
    pub(crate) fn live_group(&self) -> i32 {
        self.live_group.load(Ordering::SeqCst)
    }

    /// Trimmed stdout of a command that must succeed.
    pub fn run_text(&self, command: &str, timeout: Duration) -> CheckResult<String> {
        let result = self.run(command, timeout, true)?;
        Ok(result.stdout.trim().to_string())
    }

    /// First stdout token as an integer.
    ///
    /// The exit status is not checked: counting pipelines like `grep -c`
    /// exit 1 when the count is zero.
    pub fn run_int(&self, command: &str, timeout: Duration) -> CheckResult<i64> {
        let result = self.run(command, timeout, false)?;
        if result.timed_out {
            return result.into_checked().map(|_| 0);
        }
        parse_int(&result.stdout).map_err(|reason| CheckError::Parse {
            command: command.to_string(),
            reason,
        })
    }

    /// `run_text` with the default timeout.
    pub fn text(&self, command: &str) -> CheckResult<String> {
        self.run_text(command, self.default_timeout)
    }

    /// `run_int` with the default timeout.
    pub fn int(&self, command: &str) -> CheckResult<i64> {
        self.run_int(command, self.default_timeout)
    }

    /// `run` with the default timeout, failing on non-zero exit.
    pub fn check(&self, command: &str) -> CheckResult<ExecutionResult> {
        self.run(command, self.default_timeout, true)
    }
}

/// Parse the first whitespace-delimited token of `output`.
pub fn parse_int(output: &str) -> std::result::Result<i64, String> {
    let token = output
        .split_whitespace()
        .next()
        .ok_or_else(|| "empty output".to_string())?;
    token
        .parse::<i64>()
        .map_err(|e| format!("`{}` is not an integer ({})", token, e))
}

// ── process control ─────────────────────────────────────────────────────────────

fn wait_with_deadline(child: &mut Child, deadline: Instant) -> CheckResult<(ExitStatus, bool)> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((status, false));
        }
        if Instant::now() >= deadline {
            kill_group(child.id());
            let status = child.wait()?;
            return Ok((status, true));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn kill_group(pid: u32) {
    // process_group(0) made the shell its own group leader
    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        if e != nix::errno::Errno::ESRCH {
            tracing::warn!(pid, "killpg failed: {}", e);
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

/// Read `pipe` to the end on its own thread.
///
/// A backgrounded grandchild (`ssh -f`) inherits the pipe, so the read can
/// outlive the command. `collect` stops waiting after `PIPE_GRACE` and the
/// thread is left to finish when that holder exits. Killing the group instead
/// would take the detached server down with it.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    if let Some(mut pipe) = pipe {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            let _ = tx.send(buf);
        });
    }
    rx
}

fn collect(rx: mpsc::Receiver<Vec<u8>>) -> String {
    rx.recv_timeout(PIPE_GRACE)
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec() -> Executor {
        Executor::new(Duration::from_secs(5))
    }

    const SHORT: Duration = Duration::from_secs(5);

    #[test]
    fn captures_streams_and_exit_code() {
        let r = exec().run("echo out; echo err >&2; exit 3", SHORT, false).unwrap();
        assert_eq!(r.stdout, "out\n");
        assert_eq!(r.stderr, "err\n");
        assert_eq!(r.exit_code, 3);
        assert!(!r.timed_out);
        assert!(!r.success());
    }

    #[test]
    fn assert_success_turns_exit_into_error() {
        let err = exec().run("echo nope >&2; exit 2", SHORT, true).unwrap_err();
        match err {
            CheckError::Subprocess { exit_code, timed_out, stderr, .. } => {
                assert_eq!(exit_code, 2);
                assert!(!timed_out);
                assert_eq!(stderr.trim(), "nope");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn timeout_is_flagged_not_raised() {
        let r = exec().run("sleep 10", Duration::from_millis(200), false).unwrap();
        assert!(r.timed_out);
        assert!(r.duration < Duration::from_secs(5));
    }

    #[test]
    fn timeout_with_assert_success_is_an_error() {
        let err = exec().run("sleep 10", Duration::from_millis(200), true).unwrap_err();
        assert!(matches!(err, CheckError::Subprocess { timed_out: true, .. }));
    }

    #[test]
    fn timeout_kills_background_children() {
        let started = Instant::now();
        let r = exec()
            .run("sleep 30 & sleep 30; echo never", Duration::from_millis(200), false)
            .unwrap();
        assert!(r.timed_out);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!r.stdout.contains("never"));
    }

    #[test]
    fn live_group_is_cleared_after_each_command() {
        let exec = exec();
        assert_eq!(exec.live_group(), 0);
        exec.run("true", SHORT, false).unwrap();
        assert_eq!(exec.live_group(), 0);
        exec.run("sleep 10", Duration::from_millis(100), false).unwrap();
        assert_eq!(exec.live_group(), 0);
    }

    #[test]
    fn interrupt_kills_the_running_group() {
        let exec = exec();
        let waiter = exec.clone();
        let started = Instant::now();
        let handle = thread::spawn(move || waiter.run("sleep 30 & sleep 30", Duration::from_secs(60), false));

        let deadline = Instant::now() + Duration::from_secs(5);
        while exec.live_group() == 0 && Instant::now() < deadline {
            thread::sleep(POLL_INTERVAL);
        }
        assert_ne!(exec.live_group(), 0);
        exec.interrupt();

        let r = handle.join().unwrap().unwrap();
        assert!(!r.timed_out);
        assert_eq!(r.exit_code, 128 + Signal::SIGKILL as i32);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(exec.live_group(), 0);
    }

    #[test]
    fn interrupted_executor_only_runs_cleanup() {
        let exec = exec();
        exec.interrupt();
        assert!(exec.is_stopped());
        let err = exec.run("true", SHORT, false).unwrap_err();
        assert!(matches!(err, CheckError::Subprocess { ref stderr, .. } if stderr == "run interrupted"));
        assert!(exec.run_cleanup("true", SHORT).unwrap().success());
    }

    #[test]
    fn background_pipe_holder_does_not_block() {
        let started = Instant::now();
        let r = exec().run("(sleep 5 &) ; echo up", SHORT, false).unwrap();
        assert!(r.success());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn run_text_trims() {
        assert_eq!(exec().run_text("printf '  hello \\n'", SHORT).unwrap(), "hello");
    }

    #[test]
    fn run_text_requires_success() {
        assert!(exec().run_text("echo partial; false", SHORT).is_err());
    }

    #[test]
    fn run_int_parses_first_token() {
        assert_eq!(exec().run_int("printf '42\\n'", SHORT).unwrap(), 42);
        assert_eq!(exec().run_int("echo '7 items'", SHORT).unwrap(), 7);
    }

    #[test]
    fn run_int_accepts_grep_count_of_zero() {
        assert_eq!(exec().run_int("echo abc | grep -c zzz", SHORT).unwrap(), 0);
    }

    #[test]
    fn run_int_rejects_text() {
        let err = exec().run_int("printf abc", SHORT).unwrap_err();
        assert!(matches!(err, CheckError::Parse { .. }));
    }

    #[test]
    fn parse_int_on_empty_output() {
        assert!(parse_int("  \n").is_err());
        assert_eq!(parse_int("-5\n"), Ok(-5));
    }
}
