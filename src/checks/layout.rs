//! Deployment tree layout: files, directories, links, modes, ownership.

use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::unistd::{getgid, getuid};

use super::{missing_under, require_none_missing};
use crate::config::version::ImageVersion;
use crate::harness::context::RunContext;
use crate::harness::registry::{Check, Registry};
use crate::utils::{CheckError, CheckResult, Result};

const FILES: &[&str] = &[
    "autocheck.sh",
    "autostart.sh",
    "stop_containers.sh",
    "base/containers/main/config/logger-config.yaml.main",
    "base/containers/main/config/navigator/run_keys.txt.main",
    "base/containers/main/config/navigator/run_keys.txt.test",
    "base/containers/main/config/navigator/online_mode.yaml",
    "base/containers/main/config/npme/npme.yml.main",
    "containers/main/bin/npme",
    "containers/main/bin/npme_healthcheck",
    "containers/main/lib/libtensorrtserver.so",
    "scripts/install.py",
    "scripts/interactive_start.sh",
    "scripts/load_containers.sh",
    "scripts/prepare_models.sh",
    "scripts/set_flycap_serial_number.py",
];

const DIRECTORIES: &[&str] = &[
    "info",
    "scripts",
    "containers/main/bin",
    "containers/main/lib",
    "containers/main/prj.scripts",
    "containers/main/testdata",
];

/// Unpacked base sources; images built with the onnx patch ship without them.
const BASE_SRC_DIRECTORIES: &[&str] = &[
    "base_src/docker",
    "base_src/docker/autoheal",
    "base_src/containers/dir_cleaner",
    "base_src/containers/dir_monitor",
    "base_src/containers/main",
    "base_src/containers/main/bin",
    "base_src/containers/main/config",
    "base_src/containers/main/data",
    "base_src/containers/main/lib",
    "base_src/containers/main/models",
    "docker/main",
];

const EXECUTABLES_DIR: &str = "containers/main/bin";
const EXECUTABLES: &[&str] = &["npme", "npme_healthcheck", "dbw_checker"];

/// How many offending paths an ownership failure lists.
const OWNER_REPORT_LIMIT: usize = 10;

pub fn register(reg: &mut Registry) -> Result<()> {
    reg.register(
        Check::new("all_files", "required deployment files exist", |ctx| {
            let missing = missing_under(ctx, &required_files(&ctx.version), |p| p.is_file());
            require_none_missing(&missing, "files not found")
        })
        .in_category("layout"),
    )?;
    reg.register(
        Check::new("all_directories", "required deployment directories exist", |ctx| {
            let missing = missing_under(ctx, &required_directories(&ctx.version), |p| p.is_dir());
            require_none_missing(&missing, "directories not found")
        })
        .in_category("layout"),
    )?;
    reg.register(
        Check::new("all_symlinks", "container payload links are in place", |ctx| {
            let links = required_symlinks(&ctx.version, ctx.has_flycap());
            let missing = missing_under(ctx, &links, |p| p.is_symlink());
            require_none_missing(&missing, "symlinks missing")
        })
        .in_category("layout"),
    )?;
    reg.register(
        Check::new("all_execute_right", "container binaries are executable", execute_right).in_category("layout"),
    )?;
    reg.register(
        Check::new("all_files_owner", "deployment tree is owned by the operator", files_owner).in_category("layout"),
    )?;
    Ok(())
}

fn required_files(version: &ImageVersion) -> Vec<String> {
    let mut files: Vec<String> = FILES.iter().map(|f| f.to_string()).collect();
    if version.has_tag("t51") {
        files.push("base/containers/main/bin/onnx2trt".to_string());
    }
    files
}

fn required_directories(version: &ImageVersion) -> Vec<String> {
    let mut dirs: Vec<String> = DIRECTORIES.iter().map(|d| d.to_string()).collect();
    if !version.has_tag("agrodroid_onnx_patch") {
        dirs.extend(BASE_SRC_DIRECTORIES.iter().map(|d| d.to_string()));
    }
    dirs
}

fn required_symlinks(version: &ImageVersion, flycap: bool) -> Vec<String> {
    let mut links = vec![
        "containers/main/config".to_string(),
        "containers/main/data".to_string(),
        "containers/main/models".to_string(),
    ];
    if flycap {
        links.push("containers/main/lib/libflycapture.so.2".to_string());
    }
    if version.has_tag("t51") {
        links.push("containers/main/bin/onnx2trt".to_string());
        links.push("containers/main/lib/libnvonnxparser_runtime.so.0".to_string());
    }
    links
}

fn execute_right(ctx: &RunContext) -> CheckResult {
    let dir = ctx.path(EXECUTABLES_DIR);
    let mut not_executable = Vec::new();
    for name in EXECUTABLES {
        let path = dir.join(name);
        let mode = fs::metadata(&path).map(|m| m.permissions().mode()).unwrap_or(0);
        if mode & 0o111 == 0 {
            not_executable.push(path.display().to_string());
        }
    }
    if not_executable.is_empty() {
        return Ok(());
    }
    Err(CheckError::assertion(format!("not executable: {}", not_executable.join(", ")))
        .with_remediation(format!("chmod +x {}", not_executable.join(" "))))
}

fn files_owner(ctx: &RunContext) -> CheckResult {
    let (uid, gid) = (getuid().as_raw(), getgid().as_raw());
    let mut offenders = foreign_owned(&ctx.root, uid, gid);
    let mut trees = vec![ctx.root.display().to_string()];
    if ctx.is_installed() {
        let app = ctx.app_dir();
        offenders.extend(foreign_owned(&app, uid, gid));
        trees.push(app.display().to_string());
    }
    if offenders.is_empty() {
        return Ok(());
    }
    let shown: Vec<String> = offenders.iter().take(OWNER_REPORT_LIMIT).map(|p| p.display().to_string()).collect();
    let more = offenders.len().saturating_sub(shown.len());
    let mut message = format!("{} paths not owned by {}:{}: {}", offenders.len(), uid, gid, shown.join(", "));
    if more > 0 {
        message.push_str(&format!(" and {} more", more));
    }
    Err(CheckError::assertion(message).with_remediation(format!(
        "sudo chown -R {0}:{0} {1}",
        ctx.user,
        trees.join(" ")
    )))
}

/// Entries below `dir` whose owner differs from `uid:gid`. Links are judged
/// by their target; dangling links are ignored and linked dirs not entered.
fn foreign_owned(dir: &Path, uid: u32, gid: u32) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(own) = fs::symlink_metadata(&path) else {
            continue;
        };
        let meta = if own.file_type().is_symlink() {
            match fs::metadata(&path) {
                Ok(target) => target,
                Err(_) => continue,
            }
        } else {
            own.clone()
        };
        if meta.uid() != uid || meta.gid() != gid {
            found.push(path.clone());
        }
        if own.is_dir() {
            found.extend(foreign_owned(&path, uid, gid));
        }
    }
    found
}
