//! Guaranteed cleanup for services a check starts.
//!
//! A check that brings up something long-lived (an iperf3 server on the
//! device, a one-shot compose stack) registers the command that stops it.
//! The command runs when the guard drops, including on assertion failure or
//! panic. If the operator interrupts the run, the signal handler kills the
//! command in flight and runs whatever is still registered before exiting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::harness::exec::Executor;

const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct Pending {
    id: u64,
    label: String,
    command: String,
}

/// Teardown commands registered by in-flight checks.
#[derive(Debug, Clone, Default)]
pub struct Teardowns {
    pending: Arc<Mutex<Vec<Pending>>>,
    next_id: Arc<AtomicU64>,
}

impl Teardowns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `command` until the guard drops. After an interrupt the handler
    /// may already have drained the queue, so the command runs right away.
    pub fn register<'a>(&self, exec: &'a Executor, label: &str, command: &str) -> TeardownGuard<'a> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let pending = Pending { id, label: label.to_string(), command: command.to_string() };
        if exec.is_stopped() {
            run_one(exec, &pending);
        } else {
            self.lock().push(pending);
            tracing::debug!(label, command, "teardown registered");
        }
        TeardownGuard { owner: self.clone(), exec, id }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Run and forget every registered command, newest first.
    pub fn run_all(&self, exec: &Executor) {
        let drained: Vec<Pending> = self.lock().drain(..).rev().collect();
        for p in drained {
            run_one(exec, &p);
        }
    }

    fn take(&self, id: u64) -> Option<Pending> {
        let mut pending = self.lock();
        let pos = pending.iter().position(|p| p.id == id)?;
        Some(pending.remove(pos))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Pending>> {
        // A panicking check must not stop cleanup
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn run_one(exec: &Executor, p: &Pending) {
    tracing::info!(label = %p.label, "running teardown");
    match exec.run_cleanup(&p.command, TEARDOWN_TIMEOUT) {
        Ok(r) if r.success() => {}
        Ok(r) => tracing::warn!(label = %p.label, exit_code = r.exit_code, timed_out = r.timed_out, "teardown failed"),
        Err(e) => tracing::warn!(label = %p.label, "teardown failed: {}", e),
    }
}

/// Runs its teardown command on drop unless the interrupt handler got there
/// first.
pub struct TeardownGuard<'a> {
    owner: Teardowns,
    exec: &'a Executor,
    id: u64,
}

impl Drop for TeardownGuard<'_> {
    fn drop(&mut self) {
        if let Some(p) = self.owner.take(self.id) {
            run_one(self.exec, &p);
        }
    }
}

/// On SIGINT/SIGTERM kill the command in flight, run outstanding teardowns,
/// then exit with 130.
pub fn install_interrupt_handler(teardowns: Teardowns, exec: Executor) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted, stopping services started by running checks...");
        drain_interrupted(&teardowns, &exec);
        std::process::exit(130);
    })
}

fn drain_interrupted(teardowns: &Teardowns, exec: &Executor) {
    exec.interrupt();
    // A check may have pushed one more before it saw the stop
    while !teardowns.is_empty() {
        teardowns.run_all(exec);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec() -> Executor {
        Executor::new(Duration::from_secs(5))
    }

    #[test]
    fn guard_runs_command_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("stopped");
        let exec = exec();
        let teardowns = Teardowns::new();
        {
            let _guard = teardowns.register(&exec, "marker", &format!("touch {}", marker.display()));
            assert_eq!(teardowns.len(), 1);
            assert!(!marker.exists());
        }
        assert!(marker.exists());
        assert!(teardowns.is_empty());
    }

    #[test]
    fn guard_runs_even_when_the_check_fails() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("stopped");
        let exec = exec();
        let teardowns = Teardowns::new();

        let body = || -> crate::utils::CheckResult {
            let _guard = teardowns.register(&exec, "marker", &format!("touch {}", marker.display()));
            Err(crate::utils::CheckError::assertion("throughput too low"))
        };
        assert!(body().is_err());
        assert!(marker.exists());
    }

    #[test]
    fn run_all_drains_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");
        let exec = exec();
        let teardowns = Teardowns::new();
        let g1 = teardowns.register(&exec, "first", &format!("echo first >> {}", log.display()));
        let g2 = teardowns.register(&exec, "second", &format!("echo second >> {}", log.display()));

        teardowns.run_all(&exec);
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "second\nfirst\n");

        // Already run: dropping the guards must not repeat them
        drop(g1);
        drop(g2);
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "second\nfirst\n");
    }

    #[test]
    fn interrupt_kills_in_flight_command_then_drains() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");
        let exec = exec();
        let teardowns = Teardowns::new();
        let _server = teardowns.register(&exec, "server", &format!("echo stopped >> {}", log.display()));

        let worker = exec.clone();
        let handle = std::thread::spawn(move || worker.run("sleep 30", Duration::from_secs(60), false));
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while exec.live_group() == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }

        let started = std::time::Instant::now();
        drain_interrupted(&teardowns, &exec);
        let r = handle.join().unwrap().unwrap();
        assert_eq!(r.exit_code, 137);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(teardowns.is_empty());
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "stopped\n");
    }

    #[test]
    fn late_registration_runs_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("stopped");
        let exec = exec();
        let teardowns = Teardowns::new();
        drain_interrupted(&teardowns, &exec);

        let guard = teardowns.register(&exec, "late", &format!("touch {}", marker.display()));
        assert!(marker.exists());
        assert!(teardowns.is_empty());
        std::fs::remove_file(&marker).unwrap();
        drop(guard);
        assert!(!marker.exists());
    }
}
