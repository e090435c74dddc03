//! Offline stand replays. Long-running, so they sit in the `stand` group and
//! only run with `--scope stand`.

use crate::harness::context::RunContext;
use crate::harness::registry::{Check, Registry};
use crate::utils::{shell_quote, CheckResult, Result};

const DOMAINS: &[&str] = &["kromka", "valok", "corn_rows"];

pub fn register(reg: &mut Registry) -> Result<()> {
    for domain in DOMAINS {
        let name = format!("stand_offline_{}", domain);
        let description = format!("offline stand replays the {} dataset at speed", domain);
        reg.register(
            Check::new(&name, &description, move |ctx| offline_stand(ctx, domain)).in_category("stand"),
        )?;
    }
    Ok(())
}

fn offline_stand(ctx: &RunContext, domain: &str) -> CheckResult {
    let cmd = format!(
        "cd {} && python3 start_offline_stand.py {} --console --min-fps=2 --short-list --use-asserts",
        shell_quote(&ctx.scripts_dir().to_string_lossy()),
        domain
    );
    ctx.exec().check(&cmd)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::context::fixture;
    use crate::harness::registry::Selection;
    use crate::utils::Outcome;

    #[test]
    fn stand_runs_only_when_selected() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = fixture::context(dir.path(), "agrodroid-v45", "x86_64");
        let mut reg = Registry::new();
        register(&mut reg).unwrap();
        assert_eq!(reg.len(), 3);

        let sel = Selection { scopes: vec!["all".into(), "x86_64".into()], name: None };
        let filter = |c: &Check| sel.matches(c);
        let summary = reg.run(&ctx, Some(&filter));
        assert!(summary.records.iter().all(|r| r.outcome == Outcome::Skipped));
        assert!(summary.passed());
    }
}
