//! Harness configuration and the deployment descriptors checks consume.
//!
//! Everything is parsed once at startup into typed structs and validated;
//! checks receive them read-only through the run context.

pub mod opencv;
pub mod topology;
pub mod version;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::utils::{HarnessError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Account the appliance image ships with.
    pub default_user: String,
    pub command_timeout_secs: u64,
    /// Relative to the deployment root.
    pub version_file: PathBuf,
    /// Compose file describing the services, relative to the deployment root.
    pub topology_file: PathBuf,
    pub network: NetworkConfig,
    pub redis: RedisConfig,
    pub camera: CameraConfig,
    pub system: SystemConfig,
    pub dbw: DbwConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub device_ip: String,
    pub ssh_user: String,
    pub min_throughput_mbits: f64,
    pub subnet_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub timeout_secs: u64,
    /// Database holding `vehicle:model`.
    pub identity_db: u32,
    /// Database holding `harvesters_dict:*`.
    pub catalog_db: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraConfig {
    /// Images below this major version still ship the FlyCapture stack.
    pub flycap_until_major: u32,
    pub expected_resolution: String,
    pub probe_timeout_secs: u64,
    pub flycap_bin_dir: PathBuf,
    pub min_serial_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SystemConfig {
    pub socket_buffer_bytes: i64,
    pub min_free_space_kb: u64,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DbwConfig {
    pub attempts: u32,
    pub device: String,
    /// Serial port on the quill carrier board.
    pub quill_device: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            default_user: "agrodroid".to_string(),
            command_timeout_secs: 300,
            version_file: PathBuf::from("info/version.txt"),
            topology_file: PathBuf::from("autostart.yml"),
            network: NetworkConfig::default(),
            redis: RedisConfig::default(),
            camera: CameraConfig::default(),
            system: SystemConfig::default(),
            dbw: DbwConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            device_ip: "192.168.10.10".to_string(),
            ssh_user: "agrodroid".to_string(),
            min_throughput_mbits: 80.0,
            subnet_prefix: "192.168.".to_string(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            timeout_secs: 60,
            identity_db: 4,
            catalog_db: 1,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            flycap_until_major: 44,
            expected_resolution: "960x600".to_string(),
            probe_timeout_secs: 20,
            flycap_bin_dir: PathBuf::from("/home/agrodroid/tools/flycapture.2.13.3.31_arm64/bin"),
            min_serial_len: 6,
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            socket_buffer_bytes: 33_554_432,
            min_free_space_kb: 2 * 1_048_576,
            groups: vec!["docker".to_string(), "flirimaging".to_string()],
        }
    }
}

impl Default for DbwConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            device: "/dev/ttyTHS0".to_string(),
            quill_device: "/dev/ttyTHS2".to_string(),
        }
    }
}

impl HarnessConfig {
    /// Load from `path`, or fall back to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p).map_err(|e| {
                    HarnessError::Configuration(format!("cannot read {}: {}", p.display(), e))
                })?;
                Self::from_yaml(&content)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        // An empty file means "all defaults"
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.default_user.trim().is_empty() {
            problems.push("default_user must not be empty".to_string());
        }
        if self.command_timeout_secs == 0 {
            problems.push("command_timeout_secs must be positive".to_string());
        }
        if self.version_file.as_os_str().is_empty() {
            problems.push("version_file must not be empty".to_string());
        }
        if self.topology_file.as_os_str().is_empty() {
            problems.push("topology_file must not be empty".to_string());
        }
        if self.network.device_ip.is_empty() || self.network.ssh_user.is_empty() {
            problems.push("network.device_ip and network.ssh_user are required".to_string());
        }
        if !(self.network.min_throughput_mbits > 0.0) {
            problems.push("network.min_throughput_mbits must be positive".to_string());
        }
        if self.redis.host.is_empty() || self.redis.port == 0 {
            problems.push("redis.host and a non-zero redis.port are required".to_string());
        }
        if self.redis.timeout_secs == 0 {
            problems.push("redis.timeout_secs must be positive".to_string());
        }
        if self.camera.probe_timeout_secs == 0 {
            problems.push("camera.probe_timeout_secs must be positive".to_string());
        }
        if self.camera.expected_resolution.is_empty() {
            problems.push("camera.expected_resolution is required".to_string());
        }
        if self.system.socket_buffer_bytes <= 0 {
            problems.push("system.socket_buffer_bytes must be positive".to_string());
        }
        if self.dbw.attempts == 0 {
            problems.push("dbw.attempts must be at least 1".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::Configuration(problems.join("; ")))
        }
    }
}
