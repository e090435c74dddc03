//! Perception models and the FlyCapture camera stack of older images.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::opencv::{self, RulesDescriptor};
use crate::harness::context::RunContext;
use crate::harness::registry::{Check, Registry};
use crate::harness::report::{assert_condition, assert_values};
use crate::parse::flycap;
use crate::utils::{shell_quote, CheckError, CheckResult, Result};

const RULES_FILE: &str = "base/containers/main/config/npme/agrodroid.yml.main";
const ONLINE_MODE_FILE: &str = "base/containers/main/config/navigator/online_mode.yaml";
const WORK_TYPES: &[&str] = &["left", "row", "valok"];
const FLYCAP_TOOLS: &[&str] = &["FlyCap2_arm", "FlyCapture2Test"];

const NO_FLYCAP: &str = "image no longer ships FlyCapture";

pub fn register(reg: &mut Registry) -> Result<()> {
    reg.register(
        Check::new("all_culture_model_mapping", "every rule points at an installed model", |ctx| {
            let rules = RulesDescriptor::load(&ctx.path(RULES_FILE))?;
            verify_rules(&rules, &ctx.scripts_dir())
        })
        .in_category("camera"),
    )?;
    reg.register(
        Check::new("all_flycap", "camera serial number is configured", |ctx| {
            let serial = opencv::serial_number(&ctx.path(ONLINE_MODE_FILE))?;
            assert_condition(
                serial.len() >= ctx.config.camera.min_serial_len,
                format!("serial number `{}` is too short", serial),
                Some(format!("python3 {}", ctx.scripts_dir().join("set_flycap_serial_number.py").display())),
            )
        })
        .in_category("camera")
        .skip_when(NO_FLYCAP, |ctx| !ctx.has_flycap()),
    )?;
    reg.register(
        Check::new("aarch64_flycap_bin_dir", "FlyCapture tools are unpacked", |ctx| {
            let dir = &ctx.config.camera.flycap_bin_dir;
            assert_condition(dir.is_dir(), format!("directory not found: {}", dir.display()), None)
        })
        .in_category("camera")
        .skip_when(NO_FLYCAP, |ctx| !ctx.has_flycap()),
    )?;
    reg.register(
        Check::new("aarch64_flycap_ldd", "FlyCapture tools resolve their libraries", flycap_ldd)
            .in_category("camera")
            .skip_when(NO_FLYCAP, |ctx| !ctx.has_flycap()),
    )?;
    reg.register(
        Check::new("all_flycap_test", "configured camera answers at the expected resolution", flycap_test)
            .in_category("camera")
            .skip_when(NO_FLYCAP, |ctx| !ctx.has_flycap()),
    )?;
    Ok(())
}

/// Model files ship under `containers/main/models_ext` next to the scripts.
fn model_path(scripts_dir: &Path, net: &str) -> PathBuf {
    scripts_dir.join(net.replace("models", "containers/main/models_ext"))
}

fn verify_rules(rules: &RulesDescriptor, scripts_dir: &Path) -> CheckResult {
    let mut seen = BTreeSet::new();
    for rule in &rules.rules {
        let path = model_path(scripts_dir, &rule.net);
        if !path.exists() {
            return Err(CheckError::assertion(format!("model not found: {}", path.display())));
        }
        if let Some(work_type) = &rule.work_type {
            assert_condition(
                WORK_TYPES.contains(&work_type.as_str()),
                format!("unknown work_type `{}`", work_type),
                None,
            )?;
            seen.insert(work_type.as_str());
        }
    }
    let seen: Vec<&str> = seen.into_iter().collect();
    assert_values(seen.join(","), WORK_TYPES.join(","), "work types covered by rules")
}

fn flycap_ldd(ctx: &RunContext) -> CheckResult {
    let dir = &ctx.config.camera.flycap_bin_dir;
    for tool in FLYCAP_TOOLS {
        let path = dir.join(tool);
        let unresolved = ctx
            .exec()
            .int(&format!("ldd {} | grep -c \"not found\"", shell_quote(&path.to_string_lossy())))?;
        assert_condition(
            unresolved == 0,
            format!("{} has {} unresolved libraries", path.display(), unresolved),
            Some(format!("ldd {}", path.display())),
        )?;
    }
    Ok(())
}

fn flycap_test(ctx: &RunContext) -> CheckResult {
    let camera = &ctx.config.camera;
    // Off the appliance the tool comes from PATH.
    let tool = if ctx.arch == "aarch64" {
        camera.flycap_bin_dir.join("FlyCapture2Test").display().to_string()
    } else {
        "FlyCapture2Test".to_string()
    };
    let cmd = format!("cd {} && printf '\\n' | {}", shell_quote(&ctx.root.to_string_lossy()), tool);
    let res = ctx.exec().run(&cmd, Duration::from_secs(camera.probe_timeout_secs), false);
    remove_snapshots(&ctx.root);
    let probe = flycap::parse(&res?.stdout);

    assert_condition(!probe.none_detected(), "no cameras detected", None)?;
    assert_condition(!probe.cameras.is_empty(), "probe reported no camera details", None)?;
    let serial = opencv::serial_number(&ctx.path(ONLINE_MODE_FILE))?;
    let resolution = probe.resolution_of(&serial).ok_or_else(|| {
        CheckError::assertion(format!(
            "configured camera {} not found, detected: {}",
            serial,
            probe.cameras.keys().cloned().collect::<Vec<_>>().join(", ")
        ))
    })?;
    assert_values(resolution, camera.expected_resolution.as_str(), format!("resolution of camera {}", serial))
}

/// Frames FlyCapture2Test leaves in its working directory.
fn remove_snapshots(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for path in entries.flatten().map(|e| e.path()) {
        if path.extension().map_or(false, |e| e == "pgm") {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "cannot remove snapshot");
            }
        }
    }
}
