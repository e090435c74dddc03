//! Container runtime, images, and dry runs of the service containers.

use std::path::PathBuf;

use crate::config::topology::ServiceTopology;
use crate::harness::context::RunContext;
use crate::harness::registry::{Check, Registry};
use crate::harness::report::assert_condition;
use crate::utils::{shell_quote, CheckError, CheckResult, Result};

/// Images the devops stack pulls in besides the topology's own.
const DEVOPS_IMAGES: &[&str] = &["autoheal:latest", "redis:latest", "redis-tmp:latest"];

/// OpenCV YAML files, relative to the container's `/external-dir`.
const OPENCV_FILES: &[&str] = &[
    "config/drivarea/bisenet_0.yaml",
    "config/logger-config.yaml.main",
    "config/logger-config.yaml.test",
    "config/navigator/offline_mode.yaml",
    "config/navigator/online_mode.yaml.main",
    "config/navigator/online_mode.yaml.test",
    "config/npme/agrodroid.yml.main",
    "config/npme/npme.yml.main",
    "config/npme/npme.yml.test",
    "data/online_calib/sense_poses.yml",
];

struct DryRun {
    service: &'static str,
    entrypoint: &'static str,
    verdict: &'static str,
}

const DIR_CLEANER: DryRun = DryRun {
    service: "dir_cleaner",
    entrypoint: "./dir_cleaner --config=/external-dir/configs/dir_cleaner.yml --dry_run",
    verdict: "all folders exists, all good",
};

const DIR_MONITOR: DryRun = DryRun {
    service: "dir_monitor",
    entrypoint: "./rust_dir_monitor --config=/external-dir/configs/dir_monitor.yml --dry_run",
    verdict: "config is correct",
};

pub fn register(reg: &mut Registry) -> Result<()> {
    reg.register(
        Check::new("all_docker_version", "docker daemon answers", |ctx| {
            let version = ctx.exec().text("docker version --format '{{.Server.Version}}'")?;
            assert_condition(!version.is_empty(), "docker reported an empty server version", None)
        })
        .in_category("docker"),
    )?;
    reg.register(
        Check::new("all_docker_compose_version", "docker-compose is usable", |ctx| {
            let version = ctx.exec().text("docker-compose version --short")?;
            assert_condition(!version.is_empty(), "docker-compose reported an empty version", None)
        })
        .in_category("docker"),
    )?;
    reg.register(
        Check::new("all_docker_compose_config", "service topology renders without unset variables", compose_config)
            .in_category("docker"),
    )?;
    reg.register(Check::new("all_docker_images", "every required image is loaded", docker_images).in_category("docker"))?;
    reg.register(
        Check::new("all_docker_container", "a throwaway container starts from the main image", docker_container)
            .in_category("docker"),
    )?;
    reg.register(
        Check::new("all_interactive_start", "interactive_start.sh runs a command in the container", |ctx| {
            ctx.exec().check(&format!("{} true", interactive_start(ctx)))?;
            Ok(())
        })
        .in_category("docker"),
    )?;
    reg.register(Check::new("all_yaml", "OpenCV configs parse inside the container", opencv_yaml).in_category("docker"))?;
    reg.register(
        Check::new("all_dir_cleaner", "dir_cleaner accepts its config", |ctx| dry_run(ctx, &DIR_CLEANER))
            .in_category("docker"),
    )?;
    reg.register(
        Check::new("all_dir_monitor", "dir_monitor accepts its config", |ctx| dry_run(ctx, &DIR_MONITOR))
            .in_category("docker"),
    )?;
    Ok(())
}

fn topology(ctx: &RunContext) -> CheckResult<ServiceTopology> {
    Ok(ServiceTopology::load(&ctx.path(&ctx.config.topology_file))?)
}

fn interactive_start(ctx: &RunContext) -> String {
    ctx.scripts_dir().join("interactive_start.sh").display().to_string()
}

/// Environment autostart.sh hands to docker-compose.
fn compose_env(ctx: &RunContext, topology: &ServiceTopology) -> Vec<(&'static str, String)> {
    vec![
        ("ARCH", ctx.arch.clone()),
        ("MINIMAL_VERSION_DIR", ctx.root.display().to_string()),
        ("INFO_VERSION", ctx.version.as_str().to_string()),
        ("RUN_SUFFIX", format!("-{}", ctx.version)),
        ("REDIS_ADDRESS", ctx.config.redis.host.clone()),
        ("UPDATE_MODE", topology.has_service("sys_agro_monitor").to_string()),
    ]
}

fn compose_config(ctx: &RunContext) -> CheckResult {
    let topology = topology(ctx)?;
    let env: Vec<String> = compose_env(ctx, &topology)
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, shell_quote(&v)))
        .collect();
    let cmd = format!(
        "cd {} && {} docker-compose -f {} config 2>&1",
        shell_quote(&ctx.root.to_string_lossy()),
        env.join(" "),
        shell_quote(&ctx.config.topology_file.to_string_lossy())
    );
    let rendered = ctx.exec().text(&cmd)?;
    judge_compose_config(&rendered)
}

fn judge_compose_config(rendered: &str) -> CheckResult {
    if let Some(line) = rendered.lines().find(|l| l.contains("variable is not set")) {
        return Err(CheckError::assertion(format!("docker-compose config: {}", line.trim())));
    }
    assert_condition(rendered.contains("services"), "docker-compose config rendered no services", None)
}

fn docker_images(ctx: &RunContext) -> CheckResult {
    let topology = topology(ctx)?;
    let mut images: Vec<&str> = topology.images();
    images.extend(DEVOPS_IMAGES);
    images.sort_unstable();
    images.dedup();

    let mut missing = Vec::new();
    for image in images {
        let cmd = format!("docker image inspect --format '{{{{.Id}}}}' {}", shell_quote(image));
        if !ctx.exec().run(&cmd, ctx.exec().default_timeout(), false)?.success() {
            missing.push(image);
        }
    }
    assert_condition(
        missing.is_empty(),
        format!("images not loaded: {}", missing.join(", ")),
        Some(ctx.scripts_dir().join("load_containers.sh").display().to_string()),
    )
}

fn docker_container(ctx: &RunContext) -> CheckResult {
    let topology = topology(ctx)?;
    let image = topology
        .services
        .get("main")
        .and_then(|s| s.image.as_deref())
        .or_else(|| topology.images().first().copied())
        .ok_or_else(|| CheckError::assertion("topology references no image"))?;
    ctx.exec().check(&format!("docker run --rm --entrypoint true {}", shell_quote(image)))?;
    Ok(())
}

fn opencv_yaml(ctx: &RunContext) -> CheckResult {
    let launcher = interactive_start(ctx);
    let mut broken = Vec::new();
    for file in OPENCV_FILES {
        let cmd = format!("{} python3 /scripts-dir/check_opencv_yaml.py /external-dir/{}", launcher, file);
        let res = ctx.exec().run(&cmd, ctx.exec().default_timeout(), false)?;
        if !res.success() {
            tracing::warn!(file, exit_code = res.exit_code, "yaml rejected");
            broken.push(*file);
        }
    }
    assert_condition(broken.is_empty(), format!("invalid OpenCV YAML: {}", broken.join(", ")), None)
}

/// Start `run.service` once with a dry-run entrypoint and look for its verdict.
fn dry_run(ctx: &RunContext, run: &DryRun) -> CheckResult {
    let config = single_shot_path(ctx, run.service);
    topology(ctx)?.single_shot(run.service, run.entrypoint)?.save(&config)?;
    let config = config.display().to_string();

    let stop = format!(
        "{} --container={} --config={}; rm -f {}",
        ctx.path("stop_containers.sh").display(),
        run.service,
        config,
        config
    );
    let _stop = ctx.teardown(&format!("stop {}", run.service), &stop);

    let cmd = format!(
        "{} --container={} --without-check --without-detached --config={} \
         --abort-on-container-exit --no-color --force-recreate",
        ctx.path("autostart.sh").display(),
        run.service,
        config
    );
    let output = ctx.exec().text(&cmd)?;
    assert_condition(
        output.contains(run.verdict),
        format!("{} did not report `{}`", run.service, run.verdict),
        None,
    )
}

fn single_shot_path(ctx: &RunContext, service: &str) -> PathBuf {
    ctx.path(format!("{}_test.yml", service))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::context::fixture;

    #[test]
    fn unset_variables_fail_the_render() {
        let ok = "services:\n  main:\n    image: agrodroid/main:45\n";
        assert!(judge_compose_config(ok).is_ok());

        let warned = "WARNING: The RUN_SUFFIX variable is not set. Defaulting to a blank string.\nservices: {}\n";
        let err = judge_compose_config(warned).unwrap_err();
        assert!(err.to_string().contains("RUN_SUFFIX"));

        assert!(judge_compose_config("ERROR: no such file").is_err());
    }

    #[test]
    fn update_mode_follows_monitor_service() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = fixture::context(dir.path(), "agrodroid_t51-v45", "aarch64");
        let plain = ServiceTopology::from_yaml("services:\n  main:\n    image: m\n").unwrap();
        let monitored =
            ServiceTopology::from_yaml("services:\n  main:\n    image: m\n  sys_agro_monitor:\n    image: s\n").unwrap();

        let env = compose_env(&ctx, &plain);
        assert!(env.contains(&("UPDATE_MODE", "false".to_string())));
        assert!(env.contains(&("RUN_SUFFIX", "-agrodroid_t51-v45".to_string())));
        assert!(env.contains(&("INFO_VERSION", "agrodroid_t51-v45".to_string())));
        assert!(compose_env(&ctx, &monitored).contains(&("UPDATE_MODE", "true".to_string())));
    }

    #[test]
    fn dry_run_without_topology_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = fixture::context(dir.path(), "agrodroid-v45", "x86_64");
        let err = dry_run(&ctx, &DIR_CLEANER).unwrap_err();
        assert!(err.to_string().contains("autostart.yml"));
        assert!(ctx.teardowns().is_empty());
    }
}
