//! Vehicle and device identity: redis catalog and the `~/app/ids` files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::read_trimmed;
use crate::harness::context::RunContext;
use crate::harness::registry::{Check, Registry};
use crate::kv::{KvStore, RedisCli};
use crate::utils::{CheckError, CheckResult, Result};

const VEHICLE_MODEL_KEY: &str = "vehicle:model";

pub fn register(reg: &mut Registry) -> Result<()> {
    reg.register(
        Check::new("all_redis_connection", "identity and catalog databases answer", |ctx| {
            let redis = &ctx.config.redis;
            connect(ctx, redis.catalog_db)?;
            connect(ctx, redis.identity_db)?;
            Ok(())
        })
        .in_category("identity"),
    )?;
    reg.register(
        Check::new("all_vehicle_dict", "configured vehicle model has a catalog entry", |ctx| {
            let identity = connect(ctx, ctx.config.redis.identity_db)?;
            let catalog = connect(ctx, ctx.config.redis.catalog_db)?;
            verify_vehicle_entry(&identity, &catalog)
        })
        .in_category("identity"),
    )?;
    reg.register(
        Check::new("all_device_id", "device id matches the hostname", device_id)
            .in_category("identity")
            .skip_when("not running from an installed version", |ctx| !ctx.is_installed()),
    )?;
    reg.register(
        Check::new("aarch64_carrier_id", "carrier board id was recorded", |ctx| {
            require_id(&ids_dir(ctx).join("carrier_id"))
        })
        .in_category("identity"),
    )?;
    reg.register(
        Check::new("aarch64_jetson_id", "module serial was recorded", |ctx| {
            require_id(&ids_dir(ctx).join("jetson_id"))
        })
        .in_category("identity"),
    )?;
    Ok(())
}

fn connect(ctx: &RunContext, db: u32) -> CheckResult<RedisCli<'_>> {
    let redis = &ctx.config.redis;
    RedisCli::connect(ctx.exec(), &redis.host, redis.port, Duration::from_secs(redis.timeout_secs), db)
}

fn ids_dir(ctx: &RunContext) -> PathBuf {
    ctx.app_dir().join("ids")
}

/// The vehicle named in the identity store must have a catalog entry that
/// carries a `nameString` and mentions the vehicle.
fn verify_vehicle_entry(identity: &dyn KvStore, catalog: &dyn KvStore) -> CheckResult {
    let vehicle = identity.get(VEHICLE_MODEL_KEY)?;
    tracing::info!(vehicle = %vehicle, "vehicle model");
    let entry = catalog.get(&format!("harvesters_dict:{}", vehicle))?;

    if entry.is_empty() {
        return Err(CheckError::assertion(format!(
            "no harvesters_dict entry for vehicle `{}` (check {} in the identity db)",
            vehicle, VEHICLE_MODEL_KEY
        )));
    }
    if !entry.contains("nameString") {
        return Err(CheckError::assertion(format!("harvesters_dict:{} has no nameString field", vehicle)));
    }
    if !entry.contains(vehicle.as_str()) {
        return Err(CheckError::assertion(format!("harvesters_dict:{} does not name the vehicle", vehicle)));
    }
    Ok(())
}

fn device_id(ctx: &RunContext) -> CheckResult {
    let path = ids_dir(ctx).join("device_id");
    let device_id = read_trimmed(&path)?;
    let hostname = read_trimmed(Path::new("/etc/hostname"))?;
    if device_id == hostname {
        return Ok(());
    }
    Err(CheckError::Assertion {
        message: "device id differs from hostname".to_string(),
        expected: Some(hostname),
        actual: Some(device_id),
        remediation: Some(format!("cat /etc/hostname |tr -d '\\n' > {}", path.display())),
    })
}

fn require_id(path: &Path) -> CheckResult {
    let value = read_trimmed(path)?;
    if !value.is_empty() && value != "undefined" {
        return Ok(());
    }
    Err(CheckError::assertion(format!("{} is not set", path.display()))
        .with_remediation(format!("nano {}", path.display())))
}
