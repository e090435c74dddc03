//! OpenCV FileStorage YAML (`%YAML:1.0` header) used by the navigation
//! stack, and the model rules descriptor stored in it.

use serde::Deserialize;
use serde_yaml::Value;
use std::path::Path;

use crate::utils::{CheckError, CheckResult};

/// Parse an OpenCV YAML file into a generic value.
///
/// OpenCV writes `%YAML:1.0`, which is not a valid YAML directive, so it is
/// dropped before parsing.
pub fn load(path: &Path) -> CheckResult<Value> {
    let content = std::fs::read_to_string(path)?;
    parse(&content)
}

pub fn parse(content: &str) -> CheckResult<Value> {
    let body: String = content
        .lines()
        .skip_while(|l| l.trim().is_empty())
        .enumerate()
        .filter(|(i, l)| !(*i == 0 && l.starts_with("%YAML")))
        .map(|(_, l)| l)
        .collect::<Vec<_>>()
        .join("\n");
    Ok(serde_yaml::from_str(&body)?)
}

/// Depth-first search for the first mapping entry called `key`.
pub fn find_key<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Mapping(map) => {
            for (k, v) in map {
                if k.as_str() == Some(key) {
                    return Some(v);
                }
            }
            map.values().find_map(|v| find_key(v, key))
        }
        Value::Sequence(seq) => seq.iter().find_map(|v| find_key(v, key)),
        Value::Tagged(tagged) => find_key(&tagged.value, key),
        _ => None,
    }
}

/// Scalar rendered as text; numbers are common for camera serials.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Serial number of the configured camera in `online_mode.yaml`.
pub fn serial_number(path: &Path) -> CheckResult<String> {
    let doc = load(path)?;
    find_key(&doc, "serial_number")
        .and_then(scalar_text)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| CheckError::assertion(format!("no serial_number in {}", path.display())))
}

// ── model rules ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct RulesDescriptor {
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    pub work_type: Option<String>,
    pub culture: Option<String>,
    pub net: String,
}

impl RulesDescriptor {
    pub fn load(path: &Path) -> CheckResult<Self> {
        let doc = load(path)?;
        Self::from_value(doc)
    }

    pub fn from_value(doc: Value) -> CheckResult<Self> {
        if doc.get("rules").is_none() {
            return Err(CheckError::assertion("rules descriptor has no `rules` section"));
        }
        let descriptor: RulesDescriptor = serde_yaml::from_value(doc)?;
        for (i, rule) in descriptor.rules.iter().enumerate() {
            if rule.work_type.is_none() && rule.culture.is_none() {
                return Err(CheckError::assertion(format!(
                    "rule #{} ({}) has neither work_type nor culture",
                    i, rule.net
                )));
            }
        }
        Ok(descriptor)
    }
}
