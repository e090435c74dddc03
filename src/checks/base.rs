//! Preconditions: the host can run the rest of the diagnostics at all.

use crate::harness::context::RunContext;
use crate::harness::registry::{Check, Registry};
use crate::harness::report::assert_condition;
use crate::utils::{shell_quote, CheckResult, Result, KNOWN_ARCHES};

pub fn register(reg: &mut Registry) -> Result<()> {
    reg.register(
        Check::new("all_architecture", "running on a supported CPU architecture", architecture)
            .in_category("base")
            .precondition(),
    )?;
    reg.register(
        Check::new("all_base_packages", "deb packages the diagnostics rely on", |ctx| {
            require_deb_packages(ctx, &["expect"])
        })
        .in_category("base")
        .precondition(),
    )?;
    reg.register(
        Check::new("all_base_tools", "docker and redis-cli are on PATH", base_tools)
            .in_category("base")
            .precondition(),
    )?;
    Ok(())
}

fn architecture(ctx: &RunContext) -> CheckResult {
    assert_condition(
        KNOWN_ARCHES.contains(&ctx.arch.as_str()),
        format!("unsupported architecture {} (expected one of {})", ctx.arch, KNOWN_ARCHES.join(", ")),
        None,
    )
}

fn base_tools(ctx: &RunContext) -> CheckResult {
    let mut missing = Vec::new();
    for tool in ["docker", "redis-cli"] {
        if !ctx.exec().run(&format!("command -v {}", tool), ctx.exec().default_timeout(), false)?.success() {
            missing.push(tool);
        }
    }
    assert_condition(missing.is_empty(), format!("not on PATH: {}", missing.join(", ")), None)
}

/// Packages from `packages` that dpkg does not report as installed.
pub(super) fn missing_deb_packages(ctx: &RunContext, packages: &[&str]) -> CheckResult<Vec<String>> {
    let mut missing = Vec::new();
    for pkg in packages {
        let cmd = format!("dpkg-query -W -f='${{Status}}' {}", shell_quote(pkg));
        let res = ctx.exec().run(&cmd, ctx.exec().default_timeout(), false)?;
        if !(res.success() && res.stdout.contains("install ok installed")) {
            missing.push(pkg.to_string());
        }
    }
    Ok(missing)
}

pub(super) fn require_deb_packages(ctx: &RunContext, packages: &[&str]) -> CheckResult {
    let missing = missing_deb_packages(ctx, packages)?;
    assert_condition(
        missing.is_empty(),
        format!("deb packages not installed: {}", missing.join(", ")),
        Some(format!("sudo apt install {}", missing.join(" "))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::context::fixture;
    use crate::utils::Outcome;

    #[test]
    fn unknown_arch_fails_the_gate() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = fixture::context(dir.path(), "agrodroid-t42-v45", "riscv64");
        let err = architecture(&ctx).unwrap_err();
        assert_eq!(err.outcome(), Outcome::Failed);
        assert!(err.to_string().contains("riscv64"));

        let ctx = fixture::context(dir.path(), "agrodroid-t42-v45", "x86_64");
        assert!(architecture(&ctx).is_ok());
    }

    #[test]
    fn bogus_package_is_reported_missing() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = fixture::context(dir.path(), "agrodroid-t42-v45", "x86_64");
        let missing = missing_deb_packages(&ctx, &["agrodiag-no-such-package"]).unwrap();
        assert_eq!(missing, vec!["agrodiag-no-such-package".to_string()]);
    }
}
