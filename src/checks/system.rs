//! Host configuration: disk, packages, kernel tuning, accounts, boot hooks.

use nix::sys::statvfs::statvfs;

use super::base::require_deb_packages;
use crate::harness::context::RunContext;
use crate::harness::registry::{Check, Registry};
use crate::harness::report::{assert_condition, assert_values};
use crate::parse::crontab;
use crate::utils::{shell_quote, CheckError, CheckResult, Result};

const DEB_PACKAGES: &[&str] = &["jq", "ethtool", "arp-scan", "expect"];

const SOCKET_BUFFERS: &[&str] = &[
    "net.core.wmem_max",
    "net.core.wmem_default",
    "net.core.rmem_max",
    "net.core.rmem_default",
];

const DOCKER_UNIT: &str = "/lib/systemd/system/docker.service";

pub fn register(reg: &mut Registry) -> Result<()> {
    reg.register(Check::new("all_free_space", "enough free space for a new version", free_space).in_category("system"))?;
    reg.register(
        Check::new("all_deb_packages", "runtime deb packages are installed", |ctx| {
            require_deb_packages(ctx, &deb_packages(&ctx.arch))
        })
        .in_category("system"),
    )?;
    reg.register(
        Check::new("all_sysctl_parameters", "socket buffers are tuned for camera streams", sysctl_parameters)
            .in_category("system"),
    )?;
    reg.register(Check::new("all_groups", "operator belongs to the device groups", groups).in_category("system"))?;
    reg.register(
        Check::new("aarch64_username", "running as the appliance user", |ctx| {
            assert_values(ctx.user.as_str(), ctx.config.default_user.as_str(), "unexpected user name")
        })
        .in_category("system"),
    )?;
    reg.register(Check::new("aarch64_crontab", "boot-time id collection is scheduled", cron_entries).in_category("system"))?;
    reg.register(
        Check::new("aarch64_systemd_docker", "docker start is delayed until devices settle", systemd_docker)
            .in_category("system")
            .skip_when("only t71 boards need the docker start delay", |ctx| !ctx.version.has_tag("t71")),
    )?;
    Ok(())
}

fn free_space(ctx: &RunContext) -> CheckResult {
    let stat = statvfs(ctx.root.as_path()).map_err(std::io::Error::from)?;
    let free_kb = stat.blocks_available() as u64 * stat.fragment_size() as u64 / 1024;
    let min_kb = ctx.config.system.min_free_space_kb;
    if free_kb >= min_kb {
        return Ok(());
    }
    Err(CheckError::Assertion {
        message: format!("not enough free space on {}", ctx.root.display()),
        expected: Some(format!(">= {} KiB", min_kb)),
        actual: Some(format!("{} KiB", free_kb)),
        remediation: Some("remove old versions from ~/app/versions".to_string()),
    })
}

fn deb_packages(arch: &str) -> Vec<&'static str> {
    let mut packages = DEB_PACKAGES.to_vec();
    match arch {
        "x86_64" => packages.push("libgtkmm-2.4-1v5:amd64"),
        "aarch64" => packages.extend(["libgtkmm-2.4-1v5:arm64", "docker", "docker.io"]),
        _ => {}
    }
    packages
}

fn sysctl_parameters(ctx: &RunContext) -> CheckResult {
    let expected = ctx.config.system.socket_buffer_bytes;
    let mut low = Vec::new();
    for param in SOCKET_BUFFERS {
        let value = ctx.exec().int(&format!("sysctl -n {}", param))?;
        if value < expected {
            low.push((param, value));
        }
    }
    if low.is_empty() {
        return Ok(());
    }
    let actual: Vec<String> = low.iter().map(|(p, v)| format!("{}={}", p, v)).collect();
    let fix: Vec<String> = low.iter().map(|(p, _)| format!("sudo sysctl -w {}={}", p, expected)).collect();
    Err(CheckError::Assertion {
        message: "socket buffers are below the required size".to_string(),
        expected: Some(format!(">= {}", expected)),
        actual: Some(actual.join(", ")),
        remediation: Some(format!("{}\nand persist the values in /etc/sysctl.conf", fix.join("\n"))),
    })
}

fn groups(ctx: &RunContext) -> CheckResult {
    let listed = ctx.exec().text(&format!("id -nG {}", shell_quote(&ctx.user)))?;
    let member_of: Vec<&str> = listed.split_whitespace().collect();
    let missing: Vec<&str> = ctx
        .config
        .system
        .groups
        .iter()
        .map(String::as_str)
        .filter(|g| !member_of.contains(g))
        .collect();
    assert_condition(
        missing.is_empty(),
        format!("{} is not in groups: {}", ctx.user, missing.join(", ")),
        Some(format!("sudo usermod -aG {} {}", missing.join(","), ctx.user)),
    )
}

fn expected_cron_entries(app_dir: &str) -> Vec<String> {
    let reboot = "@reboot sleep 60 && ";
    vec![
        format!("{}cat /proc/device-tree/serial-number | tr -cd '[[:digit:]]' > {}/ids/jetson_id", reboot, app_dir),
        format!("{}python3 {1}/scripts/save_carrier_id.py {1}/ids/carrier_id", reboot, app_dir),
    ]
}

fn cron_entries(ctx: &RunContext) -> CheckResult {
    let installed = ctx.exec().text("crontab -l")?;
    let expected = expected_cron_entries(&ctx.app_dir().to_string_lossy());
    let missing = crontab::missing_entries(&installed, &expected);
    assert_condition(
        missing.is_empty(),
        format!("crontab lacks {} entries:\n{}", missing.len(), missing.join("\n")),
        Some(format!("crontab -e\n{}", missing.join("\n"))),
    )
}

fn systemd_docker(ctx: &RunContext) -> CheckResult {
    let delays = ctx.exec().int(&format!("cat {} | grep -c ExecStartPre=/bin/sleep", DOCKER_UNIT))?;
    if delays == 1 {
        return Ok(());
    }
    let pre = ctx.exec().int(&format!("cat {} | grep -c ExecStartPre=", DOCKER_UNIT))?;
    Err(CheckError::Assertion {
        message: format!("{} has {} ExecStartPre lines, {} of them sleeps", DOCKER_UNIT, pre, delays),
        expected: Some("1".to_string()),
        actual: Some(delays.to_string()),
        remediation: Some(format!(
            "Add line \"ExecStartPre=/bin/sleep 10\" to file {}\nsudo systemctl daemon-reload\nsudo systemctl restart docker",
            DOCKER_UNIT
        )),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::context::fixture;

    #[test]
    fn arch_extras() {
        assert!(deb_packages("x86_64").contains(&"libgtkmm-2.4-1v5:amd64"));
        let arm = deb_packages("aarch64");
        assert!(arm.contains(&"docker.io"));
        assert_eq!(arm.len(), DEB_PACKAGES.len() + 3);
    }

    #[test]
    fn cron_entries_point_into_app_dir() {
        let lines = expected_cron_entries("/home/agrodroid/app");
        assert_eq!(
            lines[0],
            "@reboot sleep 60 && cat /proc/device-tree/serial-number | tr -cd '[[:digit:]]' > /home/agrodroid/app/ids/jetson_id"
        );
        assert_eq!(
            lines[1],
            "@reboot sleep 60 && python3 /home/agrodroid/app/scripts/save_carrier_id.py /home/agrodroid/app/ids/carrier_id"
        );
    }

    #[test]
    fn free_space_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = fixture::context(dir.path(), "agrodroid-t42-v45", "x86_64");
        ctx.config.system.min_free_space_kb = 1;
        assert!(free_space(&ctx).is_ok());

        ctx.config.system.min_free_space_kb = u64::MAX;
        let err = free_space(&ctx).unwrap_err();
        assert_eq!(err.expected_actual().0, Some(format!(">= {} KiB", u64::MAX).as_str()));
    }
}
