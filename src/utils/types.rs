use serde::{Deserialize, Serialize};

/// Final outcome of one check in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
    Errored,
}

impl Outcome {
    pub fn is_failure(self) -> bool {
        matches!(self, Outcome::Failed | Outcome::Errored)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Passed => write!(f, "PASSED"),
            Outcome::Failed => write!(f, "FAILED"),
            Outcome::Skipped => write!(f, "SKIPPED"),
            Outcome::Errored => write!(f, "ERRORED"),
        }
    }
}

/// Lifecycle of a check inside a run.
///
/// `Pending -> Running -> {Passed, Failed, Errored}` or `Pending -> Skipped`.
/// Terminal states never move again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    Pending,
    Running,
    Done(Outcome),
}

impl CheckState {
    pub fn can_advance_to(self, next: CheckState) -> bool {
        match (self, next) {
            (CheckState::Pending, CheckState::Running) => true,
            (CheckState::Pending, CheckState::Done(Outcome::Skipped)) => true,
            (CheckState::Running, CheckState::Done(o)) => o != Outcome::Skipped,
            _ => false,
        }
    }

    pub fn advance(&mut self, next: CheckState) {
        debug_assert!(self.can_advance_to(next), "illegal transition {:?} -> {:?}", self, next);
        *self = next;
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CheckState::Done(_))
    }
}

/// Applicability of a check, taken from its name prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// `all_*`: every architecture.
    All,
    /// `aarch64_*`, `x86_64_*`: one architecture.
    Arch(String),
    /// Any other prefix. Runs only when selected explicitly.
    Group(String),
}

pub const KNOWN_ARCHES: &[&str] = &["aarch64", "x86_64"];

impl Scope {
    pub fn from_name(name: &str) -> Scope {
        if name.starts_with("all_") {
            return Scope::All;
        }
        for arch in KNOWN_ARCHES {
            if name.strip_prefix(arch).map_or(false, |rest| rest.starts_with('_')) {
                return Scope::Arch(arch.to_string());
            }
        }
        let prefix = name.split('_').next().unwrap_or(name);
        Scope::Group(prefix.to_string())
    }

    /// Selector string used by `--scope`.
    pub fn key(&self) -> &str {
        match self {
            Scope::All => "all",
            Scope::Arch(a) => a,
            Scope::Group(g) => g,
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_comes_from_prefix() {
        assert_eq!(Scope::from_name("all_files"), Scope::All);
        assert_eq!(Scope::from_name("aarch64_dbw_box"), Scope::Arch("aarch64".into()));
        assert_eq!(Scope::from_name("x86_64_gpu"), Scope::Arch("x86_64".into()));
        assert_eq!(Scope::from_name("stand_offline_valok"), Scope::Group("stand".into()));
        assert_eq!(Scope::from_name("aarch64ish_thing"), Scope::Group("aarch64ish".into()));
    }

    #[test]
    fn terminal_states_are_sticky() {
        let done = CheckState::Done(Outcome::Passed);
        assert!(!done.can_advance_to(CheckState::Running));
        assert!(!done.can_advance_to(CheckState::Done(Outcome::Failed)));
        assert!(CheckState::Pending.can_advance_to(CheckState::Done(Outcome::Skipped)));
        assert!(!CheckState::Pending.can_advance_to(CheckState::Done(Outcome::Passed)));
        assert!(!CheckState::Running.can_advance_to(CheckState::Done(Outcome::Skipped)));
        assert!(CheckState::Running.can_advance_to(CheckState::Done(Outcome::Errored)));
    }
}
