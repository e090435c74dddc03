use thiserror::Error;

use crate::utils::Outcome;

/// Failure raised by a check body.
///
/// Assertion, subprocess and parse failures mean the device is not in the
/// expected state. Everything else means the check itself could not finish.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("{message}")]
    Assertion {
        message: String,
        expected: Option<String>,
        actual: Option<String>,
        remediation: Option<String>,
    },

    #[error("command `{command}` {}", describe_exit(.exit_code, .timed_out, .stderr))]
    Subprocess {
        command: String,
        exit_code: i32,
        timed_out: bool,
        stderr: String,
    },

    #[error("cannot interpret output of `{command}`: {reason}")]
    Parse { command: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("key-value store error: {0}")]
    Store(String),
}

impl CheckError {
    pub fn assertion(message: impl Into<String>) -> Self {
        CheckError::Assertion {
            message: message.into(),
            expected: None,
            actual: None,
            remediation: None,
        }
    }

    /// Attach an operator hint. Only assertions carry one; other variants
    /// are returned unchanged.
    pub fn with_remediation(self, hint: impl Into<String>) -> Self {
        match self {
            CheckError::Assertion { message, expected, actual, .. } => CheckError::Assertion {
                message,
                expected,
                actual,
                remediation: Some(hint.into()),
            },
            other => other,
        }
    }

    pub fn outcome(&self) -> Outcome {
        match self {
            CheckError::Assertion { .. } | CheckError::Subprocess { .. } | CheckError::Parse { .. } => {
                Outcome::Failed
            }
            CheckError::Io(_) | CheckError::Yaml(_) | CheckError::Store(_) => Outcome::Errored,
        }
    }

    pub fn remediation(&self) -> Option<&str> {
        match self {
            CheckError::Assertion { remediation, .. } => remediation.as_deref(),
            _ => None,
        }
    }

    pub fn expected_actual(&self) -> (Option<&str>, Option<&str>) {
        match self {
            CheckError::Assertion { expected, actual, .. } => (expected.as_deref(), actual.as_deref()),
            _ => (None, None),
        }
    }
}

fn describe_exit(exit_code: &i32, timed_out: &bool, stderr: &str) -> String {
    let mut s = if *timed_out {
        "timed out".to_string()
    } else {
        format!("exited with code {}", exit_code)
    };
    let excerpt = stderr_excerpt(stderr);
    if !excerpt.is_empty() {
        s.push_str(": ");
        s.push_str(&excerpt);
    }
    s
}

const STDERR_EXCERPT_LINES: usize = 5;

/// Last few non-empty lines of stderr; that is where tools put the reason.
pub fn stderr_excerpt(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().map(str::trim_end).filter(|l| !l.is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_EXCERPT_LINES);
    lines[start..].join(" | ")
}

/// Setup failures. These abort the run before any check executes.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("check `{0}` is registered twice")]
    DuplicateName(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<HarnessError> for CheckError {
    fn from(e: HarnessError) -> Self {
        match e {
            HarnessError::Io(e) => CheckError::Io(e),
            HarnessError::Yaml(e) => CheckError::Yaml(e),
            other => CheckError::assertion(other.to_string()),
        }
    }
}

pub type CheckResult<T = ()> = std::result::Result<T, CheckError>;
pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_follows_error_kind() {
        assert_eq!(CheckError::assertion("x").outcome(), Outcome::Failed);
        let parse = CheckError::Parse { command: "c".into(), reason: "r".into() };
        assert_eq!(parse.outcome(), Outcome::Failed);
        assert_eq!(CheckError::Store("down".into()).outcome(), Outcome::Errored);
        let io = CheckError::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(io.outcome(), Outcome::Errored);
    }

    #[test]
    fn remediation_only_sticks_to_assertions() {
        let e = CheckError::assertion("carrier id is not set").with_remediation("nano ids/carrier_id");
        assert_eq!(e.remediation(), Some("nano ids/carrier_id"));

        let e = CheckError::Store("refused".into()).with_remediation("ignored");
        assert_eq!(e.remediation(), None);
    }

    #[test]
    fn subprocess_message_names_timeout_and_stderr_tail() {
        let e = CheckError::Subprocess {
            command: "sleep 9".into(),
            exit_code: 137,
            timed_out: true,
            stderr: "a\n\nb\n".into(),
        };
        assert_eq!(e.to_string(), "command `sleep 9` timed out: a | b");

        let e = CheckError::Subprocess {
            command: "false".into(),
            exit_code: 1,
            timed_out: false,
            stderr: String::new(),
        };
        assert_eq!(e.to_string(), "command `false` exited with code 1");
    }

    #[test]
    fn excerpt_keeps_the_tail() {
        let stderr = (1..=8).map(|i| format!("line{}", i)).collect::<Vec<_>>().join("\n");
        assert_eq!(stderr_excerpt(&stderr), "line4 | line5 | line6 | line7 | line8");
    }
}
