//! docker-compose service topology.
//!
//! Only the keys checks look at are typed. Everything else rides along in
//! `extra` so a rewritten descriptor can be saved without losing settings.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::utils::{HarnessError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceTopology {
    pub services: BTreeMap<String, Service>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Service {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ServiceTopology {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Configuration(format!("cannot read topology {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let topology: ServiceTopology = serde_yaml::from_str(content)?;
        if topology.services.is_empty() {
            return Err(HarnessError::Configuration("topology declares no services".to_string()));
        }
        Ok(topology)
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Images referenced by services, in service-name order.
    pub fn images(&self) -> Vec<&str> {
        self.services.values().filter_map(|s| s.image.as_deref()).collect()
    }

    /// Copy of the topology reduced to `service`, started once with
    /// `entrypoint` instead of its usual command.
    pub fn single_shot(&self, service: &str, entrypoint: &str) -> Result<Self> {
        let mut svc = self
            .services
            .get(service)
            .cloned()
            .ok_or_else(|| HarnessError::Configuration(format!("service `{}` not in topology", service)))?;
        svc.entrypoint = Some(Value::String(entrypoint.to_string()));
        svc.restart = Some("no".to_string());

        let mut services = BTreeMap::new();
        services.insert(service.to_string(), svc);
        Ok(Self { services, extra: self.extra.clone() })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
