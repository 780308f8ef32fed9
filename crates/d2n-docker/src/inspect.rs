//! Docker Engine API response shapes and their conversion into snapshots

use chrono_tz::Tz;
use d2n_core::model::{EntitySnapshot, EntityStatus, ExposedPort, HostBinding, SyncPolicy, observed_now, port_mappings};
use d2n_core::Result;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// Entry of `GET /containers/json`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ContainerSummary {
    pub id: String,
}

/// Subset of `GET /containers/{id}/json`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ContainerInspect {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: Option<ContainerState>,
    #[serde(default)]
    pub config: Option<ContainerConfig>,
    #[serde(default)]
    pub network_settings: Option<NetworkSettings>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ContainerState {
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ContainerConfig {
    #[serde(default)]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct NetworkSettings {
    #[serde(rename = "IPAddress", default)]
    pub ip_address: String,
    // Ordered so the fallback address is deterministic
    #[serde(default)]
    pub networks: Option<BTreeMap<String, EndpointSettings>>,
    #[serde(default)]
    pub ports: Option<BTreeMap<String, Option<Vec<PortBinding>>>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EndpointSettings {
    #[serde(rename = "IPAddress", default)]
    pub ip_address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct PortBinding {
    #[serde(default)]
    pub host_ip: String,
    #[serde(default)]
    pub host_port: String,
}

impl NetworkSettings {
    /// Default bridge address, else the first attached network's address
    fn address(&self) -> String {
        if !self.ip_address.is_empty() {
            return self.ip_address.clone();
        }

        self.networks
            .iter()
            .flat_map(|networks| networks.values())
            .map(|endpoint| endpoint.ip_address.as_str())
            .find(|ip| !ip.is_empty())
            .unwrap_or_default()
            .to_string()
    }

    fn exposed_ports(&self) -> Vec<ExposedPort> {
        self.ports
            .iter()
            .flatten()
            .map(|(spec, bindings)| ExposedPort {
                spec: spec.clone(),
                bindings: bindings
                    .iter()
                    .flatten()
                    .map(|b| HostBinding {
                        host_ip: b.host_ip.clone(),
                        host_port: b.host_port.clone(),
                    })
                    .collect(),
            })
            .collect()
    }
}

impl ContainerInspect {
    /// Build a snapshot stamped with the current time in `tz`
    pub fn into_snapshot(self, tz: Tz) -> Result<EntitySnapshot> {
        let status = self
            .state
            .as_ref()
            .map(|s| EntityStatus::parse_lenient(&s.status))
            .unwrap_or(EntityStatus::Exited);

        let policy = self
            .config
            .as_ref()
            .and_then(|c| c.labels.as_ref())
            .map(SyncPolicy::from_labels)
            .unwrap_or_default();

        let mut snapshot =
            EntitySnapshot::new(self.id, &self.name, status, observed_now(tz))?.with_policy(policy);

        if let Some(network) = &self.network_settings {
            snapshot = snapshot
                .with_address(network.address())
                .with_ports(port_mappings(&network.exposed_ports()));
        }

        Ok(snapshot)
    }
}
