//! Check registration and sequential execution.

use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use crate::harness::context::RunContext;
use crate::harness::report::{DiagnosticRecord, Reporter, RunSummary};
use crate::utils::{CheckResult, CheckState, HarnessError, Outcome, Result, Scope};

type CheckBody = Box<dyn Fn(&RunContext) -> CheckResult>;
type SkipPredicate = Box<dyn Fn(&RunContext) -> bool>;

/// A single named diagnostic.
pub struct Check {
    name: String,
    scope: Scope,
    category: String,
    description: String,
    precondition: bool,
    skip_rules: Vec<(String, SkipPredicate)>,
    body: CheckBody,
}

impl Check {
    pub fn new(
        name: &str,
        description: &str,
        body: impl Fn(&RunContext) -> CheckResult + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            scope: Scope::from_name(name),
            category: "general".to_string(),
            description: description.to_string(),
            precondition: false,
            skip_rules: Vec::new(),
            body: Box::new(body),
        }
    }

    pub fn in_category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    /// Mark as a gate: if it fails, every later non-gate check is skipped.
    pub fn precondition(mut self) -> Self {
        self.precondition = true;
        self
    }

    /// Skip with `reason` when `predicate` holds for the run.
    pub fn skip_when(mut self, reason: &str, predicate: impl Fn(&RunContext) -> bool + 'static) -> Self {
        self.skip_rules.push((reason.to_string(), Box::new(predicate)));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_precondition(&self) -> bool {
        self.precondition
    }

    fn scope_mismatch(&self, ctx: &RunContext) -> Option<String> {
        match &self.scope {
            Scope::Arch(arch) if *arch != ctx.arch => {
                Some(format!("applies to {} only, running on {}", arch, ctx.arch))
            }
            _ => None,
        }
    }

    fn skip_rule(&self, ctx: &RunContext) -> Option<String> {
        self.skip_rules
            .iter()
            .find(|(_, predicate)| predicate(ctx))
            .map(|(reason, _)| reason.clone())
    }

    fn execute(&self, ctx: &RunContext) -> DiagnosticRecord {
        let start = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.body)(ctx)));
        let elapsed = start.elapsed();
        match outcome {
            Ok(Ok(())) => DiagnosticRecord::passed(&self.name, &self.category, elapsed),
            Ok(Err(e)) => DiagnosticRecord::from_error(&self.name, &self.category, &e, elapsed),
            Err(payload) => {
                let detail = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                DiagnosticRecord {
                    duration_ms: elapsed.as_millis() as u64,
                    ..DiagnosticRecord::new(
                        &self.name,
                        &self.category,
                        Outcome::Errored,
                        format!("check panicked: {}", detail),
                    )
                }
            }
        }
    }
}

/// Which checks a run should execute. Unselected checks are reported as
/// skipped, not dropped.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Scope keys to run (`all`, `aarch64`, `stand`...). Empty means any.
    pub scopes: Vec<String>,
    /// Substring the check name must contain.
    pub name: Option<String>,
}

impl Selection {
    pub fn matches(&self, check: &Check) -> bool {
        let scope_ok = self.scopes.is_empty() || self.scopes.iter().any(|s| s == check.scope().key());
        let name_ok = self.name.as_deref().map_or(true, |n| check.name().contains(n));
        scope_ok && name_ok
    }
}

/// Ordered set of checks. Runs them one by one in registration order.
#[derive(Default)]
pub struct Registry {
    checks: Vec<Check>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, check: Check) -> Result<()> {
        if self.checks.iter().any(|c| c.name == check.name) {
            return Err(HarnessError::DuplicateName(check.name));
        }
        self.checks.push(check);
        Ok(())
    }

    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Run every check once and summarize. A failing check never stops the
    /// run; a failing precondition skips the checks that depend on it. After
    /// an interrupt the remaining checks are skipped.
    pub fn run(&self, ctx: &RunContext, filter: Option<&dyn Fn(&Check) -> bool>) -> RunSummary {
        let mut reporter = Reporter::new();
        let mut failed_gate: Option<&str> = None;

        for check in &self.checks {
            let mut state = CheckState::Pending;

            let skip = if ctx.exec().is_stopped() {
                Some("run interrupted".to_string())
            } else if filter.map_or(false, |f| !f(check)) {
                Some("excluded by filter".to_string())
            } else if let Some(reason) = check.scope_mismatch(ctx) {
                Some(reason)
            } else if let (Some(gate), false) = (failed_gate, check.precondition) {
                Some(format!("precondition `{}` failed", gate))
            } else {
                check.skip_rule(ctx)
            };

            let record = match skip {
                Some(reason) => {
                    state.advance(CheckState::Done(Outcome::Skipped));
                    tracing::debug!(check = check.name(), reason = %reason, "skipped");
                    DiagnosticRecord::skipped(check.name(), check.category(), reason)
                }
                None => {
                    state.advance(CheckState::Running);
                    tracing::info!(check = check.name(), "running");
                    let record = check.execute(ctx);
                    state.advance(CheckState::Done(record.outcome));
                    tracing::info!(check = check.name(), outcome = %record.outcome, ms = record.duration_ms, "finished");
                    record
                }
            };

            if check.precondition && record.outcome.is_failure() && failed_gate.is_none() {
                tracing::warn!(check = check.name(), "precondition failed, dependent checks will be skipped");
                failed_gate = Some(check.name());
            }
            debug_assert!(state.is_terminal());
            reporter.push(record);
        }

        reporter.summarize()
    }
}
