//! The deployment diagnostics, grouped by what they inspect.
//!
//! Every module exposes `register`, which appends its checks to the registry
//! in run order. Preconditions come first so that a broken host skips the rest.

mod base;
mod camera;
mod docker;
mod identity;
mod layout;
mod network;
mod stand;
mod system;

use std::fs;
use std::path::Path;

use crate::harness::context::RunContext;
use crate::harness::registry::Registry;
use crate::utils::{CheckError, CheckResult, Result};

pub fn register_all(reg: &mut Registry) -> Result<()> {
    base::register(reg)?;
    layout::register(reg)?;
    system::register(reg)?;
    network::register(reg)?;
    docker::register(reg)?;
    identity::register(reg)?;
    camera::register(reg)?;
    stand::register(reg)?;
    Ok(())
}

/// Carrier board model from the device tree, without the trailing NUL.
fn board_model(ctx: &RunContext) -> CheckResult<String> {
    let model = ctx.exec().text("cat /proc/device-tree/model")?;
    Ok(model.trim_matches('\0').to_string())
}

fn is_quill(ctx: &RunContext) -> bool {
    board_model(ctx).map(|m| m.contains("quill")).unwrap_or(false)
}

/// Relative paths under the deployment root that fail `present`.
fn missing_under(ctx: &RunContext, relative: &[String], present: impl Fn(&Path) -> bool) -> Vec<String> {
    relative
        .iter()
        .filter(|rel| !present(&ctx.path(rel.as_str())))
        .cloned()
        .collect()
}

fn require_none_missing(missing: &[String], what: &str) -> CheckResult {
    if missing.is_empty() {
        return Ok(());
    }
    Err(CheckError::assertion(format!("{} {}: {}", missing.len(), what, missing.join(", "))))
}

fn read_trimmed(path: &Path) -> CheckResult<String> {
    if !path.exists() {
        return Err(CheckError::assertion(format!("file not found: {}", path.display())));
    }
    Ok(fs::read_to_string(path)?.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::Scope;

    #[test]
    fn every_check_registers_once_with_preconditions_first() {
        let mut reg = Registry::new();
        register_all(&mut reg).unwrap();
        assert!(reg.len() > 30);

        let checks = reg.checks();
        let first_regular = checks.iter().position(|c| !c.is_precondition()).unwrap();
        assert!(checks[first_regular..].iter().all(|c| !c.is_precondition()));
        assert_eq!(checks[0].name(), "all_architecture");
    }

    #[test]
    fn names_carry_their_scope() {
        let mut reg = Registry::new();
        register_all(&mut reg).unwrap();
        let scope_of = |name: &str| reg.checks().iter().find(|c| c.name() == name).map(|c| c.scope().clone());
        assert_eq!(scope_of("all_files"), Some(Scope::All));
        assert_eq!(scope_of("aarch64_dbw_box"), Some(Scope::Arch("aarch64".into())));
        assert_eq!(scope_of("stand_offline_valok"), Some(Scope::Group("stand".into())));
    }
}
