//! Link to the vehicle device and the drive-by-wire box.

use chrono::Local;

use super::is_quill;
use crate::harness::context::RunContext;
use crate::harness::registry::{Check, Registry};
use crate::harness::report::assert_condition;
use crate::parse::iperf::{self, IperfSummary};
use crate::utils::{shell_quote, CheckError, CheckResult, Result};

pub fn register(reg: &mut Registry) -> Result<()> {
    reg.register(
        Check::new("aarch64_ip_for_main_connection", "an interface sits on the vehicle subnet", |ctx| {
            let prefix = &ctx.config.network.subnet_prefix;
            let count = ctx.exec().int(&format!("ifconfig | grep -c {}", shell_quote(prefix)))?;
            assert_condition(count > 0, format!("no interface has an address in {}*", prefix), None)
        })
        .in_category("network"),
    )?;
    reg.register(
        Check::new("aarch64_eth_speed", "ethernet throughput to the device in both directions", eth_speed)
            .in_category("network")
            .skip_when("quill carrier boards have no device link", is_quill),
    )?;
    reg.register(
        Check::new("aarch64_dbw_box", "drive-by-wire box answers repeatedly", dbw_box).in_category("hardware"),
    )?;
    Ok(())
}

fn eth_speed(ctx: &RunContext) -> CheckResult {
    for (mode, flag) in [("normal", ""), ("reversed", " -R")] {
        let summary = iperf_run(ctx, flag)?;
        tracing::info!(mode, sender = ?summary.sender, receiver = ?summary.receiver, "iperf3");
        judge(&summary, ctx.config.network.min_throughput_mbits)
            .map_err(|e| CheckError::assertion(format!("{} mode: {}", mode, e)))?;
    }
    Ok(())
}

/// Start a server on the device, measure once, stop the server.
fn iperf_run(ctx: &RunContext, flag: &str) -> CheckResult<IperfSummary> {
    let net = &ctx.config.network;
    let remote = format!("{}@{}", net.ssh_user, net.device_ip);
    let _server = ctx.teardown("iperf3 server", &format!("timeout 2 ssh {} -f 'killall iperf3'", remote));
    ctx.exec()
        .check(&format!("timeout 2 ssh {} -f 'iperf3 -s 1>/dev/null 2>/dev/null'", remote))?;

    let cmd = format!("sleep 3 && iperf3{} -c {}", flag, shell_quote(&net.device_ip));
    let res = ctx.exec().run(&cmd, ctx.exec().default_timeout(), false)?;
    let output = format!("{}\n{}", res.stdout, res.stderr);
    if let Some(err) = iperf::connection_error(&output) {
        return Err(CheckError::assertion(format!("iperf3 could not reach {}: {}", net.device_ip, err)));
    }
    let res = res.into_checked()?;
    Ok(iperf::parse(&res.stdout))
}

fn judge(summary: &IperfSummary, min_mbits: f64) -> CheckResult {
    let rate = summary.min_rate().ok_or_else(|| CheckError::Parse {
        command: "iperf3".to_string(),
        reason: "no sender/receiver summary in output".to_string(),
    })?;
    if rate > min_mbits {
        return Ok(());
    }
    Err(CheckError::Assertion {
        message: "ethernet throughput too low".to_string(),
        expected: Some(format!("> {} Mbit/s", min_mbits)),
        actual: Some(format!("{:.1} Mbit/s", rate)),
        remediation: Some("check the cable and that the port negotiated 1000Mb/s (ethtool)".to_string()),
    })
}

fn dbw_box(ctx: &RunContext) -> CheckResult {
    let dbw = &ctx.config.dbw;
    let device = if is_quill(ctx) { &dbw.quill_device } else { &dbw.device };
    let cmd = format!(
        "{} ./dbw_checker {}",
        ctx.scripts_dir().join("interactive_start.sh").display(),
        shell_quote(device)
    );
    for attempt in 1..=dbw.attempts {
        tracing::info!(attempt, at = %Local::now().format("%Y-%m-%d %H:%M:%S"), command = %cmd, "dbw_checker");
        ctx.exec().check(&cmd).map_err(|e| {
            CheckError::assertion(format!("attempt {}/{} on {} failed: {}", attempt, dbw.attempts, device, e))
        })?;
    }
    Ok(())
}
