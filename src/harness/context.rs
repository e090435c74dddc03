//! Everything a check may look at, resolved once before the run starts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::version::ImageVersion;
use crate::config::HarnessConfig;
use crate::harness::exec::Executor;
use crate::harness::teardown::{TeardownGuard, Teardowns};
use crate::utils::{HarnessError, Result};

pub struct RunContext {
    /// Deployment root: the version directory holding `scripts/`, `info/`,
    /// `containers/` and the start/stop scripts.
    pub root: PathBuf,
    pub arch: String,
    pub version: ImageVersion,
    /// Operator account the deployment runs under.
    pub user: String,
    pub config: HarnessConfig,
    exec: Executor,
    teardowns: Teardowns,
}

impl RunContext {
    pub fn new(root: PathBuf, arch: String, user: String, config: HarnessConfig) -> Result<Self> {
        if !root.is_dir() {
            return Err(HarnessError::Configuration(format!(
                "deployment root {} is not a directory",
                root.display()
            )));
        }
        // `--root .` must still have a real parent for is_installed
        let root = root.canonicalize().map_err(|e| {
            HarnessError::Configuration(format!("cannot resolve deployment root {}: {}", root.display(), e))
        })?;
        if user.trim().is_empty() {
            return Err(HarnessError::Configuration("operator user is unknown (set USER or --user)".to_string()));
        }
        let version = ImageVersion::read(&root.join(&config.version_file))?;
        let exec = Executor::new(Duration::from_secs(config.command_timeout_secs));
        Ok(Self { root, arch, version, user, config, exec, teardowns: Teardowns::new() })
    }

    pub fn exec(&self) -> &Executor {
        &self.exec
    }

    pub fn teardowns(&self) -> &Teardowns {
        &self.teardowns
    }

    /// Register `command` to run when the returned guard drops.
    pub fn teardown(&self, label: &str, command: &str) -> TeardownGuard<'_> {
        self.teardowns.register(&self.exec, label, command)
    }

    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.root.join("scripts")
    }

    /// `~/app` of the operator; installed versions live in `~/app/versions`.
    pub fn app_dir(&self) -> PathBuf {
        PathBuf::from("/home").join(&self.user).join("app")
    }

    /// True when running from an installed version rather than a checkout.
    pub fn is_installed(&self) -> bool {
        self.installed_under(&self.app_dir())
    }

    fn installed_under(&self, app_dir: &Path) -> bool {
        match (self.root.parent(), app_dir.join("versions").canonicalize()) {
            (Some(parent), Ok(versions)) => parent == versions,
            _ => false,
        }
    }

    /// Image still ships the FlyCapture camera stack.
    pub fn has_flycap(&self) -> bool {
        self.version.major() < self.config.camera.flycap_until_major
    }
}

#[cfg(test)]
pub mod fixture {
    use super::*;

    /// Context over a temporary deployment root with the given version.
    pub fn context(root: &Path, version: &str, arch: &str) -> RunContext {
        let info = root.join("info");
        std::fs::create_dir_all(&info).unwrap();
        std::fs::write(info.join("version.txt"), version).unwrap();
        let config = HarnessConfig { command_timeout_secs: 10, ..HarnessConfig::default() };
        RunContext::new(root.to_path_buf(), arch.to_string(), "agrodroid".to_string(), config).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_version_from_root() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = fixture::context(dir.path(), "agrodroid_t51-v43\n", "aarch64");
        assert_eq!(ctx.version.major(), 43);
        assert!(ctx.has_flycap());
        assert_eq!(ctx.scripts_dir(), dir.path().canonicalize().unwrap().join("scripts"));
        assert_eq!(ctx.app_dir(), PathBuf::from("/home/agrodroid/app"));
        assert!(!ctx.is_installed());
    }

    #[test]
    fn missing_version_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let res = RunContext::new(
            dir.path().to_path_buf(),
            "x86_64".into(),
            "agrodroid".into(),
            HarnessConfig::default(),
        );
        assert!(matches!(res, Err(HarnessError::Configuration(_))));
    }

    #[test]
    fn empty_user_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("info")).unwrap();
        std::fs::write(dir.path().join("info/version.txt"), "x-v50").unwrap();
        let res = RunContext::new(dir.path().to_path_buf(), "x86_64".into(), " ".into(), HarnessConfig::default());
        assert!(res.is_err());
    }

    #[test]
    fn root_given_indirectly_is_resolved() {
        let home = tempfile::tempdir().unwrap();
        let app = home.path().join("app");
        let version = app.join("versions/v45");
        std::fs::create_dir_all(version.join("scripts")).unwrap();
        fixture::context(&version, "agrodroid-v45", "aarch64");

        let indirect = version.join("scripts/..");
        let ctx = RunContext::new(indirect, "aarch64".into(), "agrodroid".into(), HarnessConfig::default()).unwrap();
        assert_eq!(ctx.root, version.canonicalize().unwrap());
        assert!(ctx.installed_under(&app));
        assert!(!ctx.installed_under(home.path()));
    }

    #[test]
    fn dangling_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let res = RunContext::new(
            dir.path().join("gone"),
            "x86_64".into(),
            "agrodroid".into(),
            HarnessConfig::default(),
        );
        assert!(matches!(res, Err(HarnessError::Configuration(ref m)) if m.contains("not a directory")));
    }
}
