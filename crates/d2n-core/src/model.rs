//! Value types shared by the reconciler and its collaborators
//!
//! An [`EntitySnapshot`] is built once per inventory read or host event and is
//! never mutated afterwards; the builder-style `with_*` methods consume the
//! value so a snapshot cannot change once handed to the reconciler.

use chrono::{DateTime, FixedOffset, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Label that opts a container into syncing (`"true"`, case-insensitive)
pub const ENABLED_LABEL: &str = "d2n.enabled";

/// Label that selects the destination bucket by its configured name
pub const GROUP_LABEL: &str = "d2n.database";

/// Lifecycle status of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    Created,
    Running,
    Exited,
    Removed,
    Restarting,
    Paused,
}

impl EntityStatus {
    /// Status name as written to the remote record
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Created => "created",
            EntityStatus::Running => "running",
            EntityStatus::Exited => "exited",
            EntityStatus::Removed => "removed",
            EntityStatus::Restarting => "restarting",
            EntityStatus::Paused => "paused",
        }
    }

    /// Parse a host-reported state, mapping anything unrecognized to `Exited`
    pub fn parse_lenient(raw: &str) -> Self {
        raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Unrecognized container state '{}', recording as exited", raw);
            EntityStatus::Exited
        })
    }
}

impl FromStr for EntityStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" => Ok(EntityStatus::Created),
            "running" => Ok(EntityStatus::Running),
            // Docker's terminal "dead" state is an exited container for our purposes
            "exited" | "dead" => Ok(EntityStatus::Exited),
            "removed" | "removing" => Ok(EntityStatus::Removed),
            "restarting" => Ok(EntityStatus::Restarting),
            "paused" => Ok(EntityStatus::Paused),
            other => Err(Error::invalid_input(format!("unknown entity status: {other}"))),
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque identifier of a record inside one bucket of the record store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordHandle(String);

impl RecordHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordHandle {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RecordHandle {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Per-container sync policy parsed from labels
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Whether the container is mirrored at all (opt-in)
    pub enabled: bool,
    /// Logical bucket name; `None` means the default bucket
    pub group: Option<String>,
}

impl SyncPolicy {
    /// Policy for an opted-in container in the default bucket
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            group: None,
        }
    }

    /// Route the container to a named bucket
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        let group = group.into();
        self.group = if group.trim().is_empty() {
            None
        } else {
            Some(group)
        };
        self
    }

    /// Parse [`ENABLED_LABEL`] and [`GROUP_LABEL`] from a label set
    pub fn from_labels(labels: &HashMap<String, String>) -> Self {
        let enabled = labels
            .get(ENABLED_LABEL)
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"));

        let group = labels
            .get(GROUP_LABEL)
            .map(|g| g.trim())
            .filter(|g| !g.is_empty())
            .map(str::to_string);

        Self { enabled, group }
    }
}

/// One exposed container port and its host bindings, as reported by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposedPort {
    /// Port and protocol, e.g. `"80/tcp"`
    pub spec: String,
    /// Host bindings; empty when the port is exposed but not published
    pub bindings: Vec<HostBinding>,
}

/// A host-side binding of an exposed port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBinding {
    pub host_ip: String,
    pub host_port: String,
}

/// Render exposed ports as port-mapping strings
///
/// Published ports render as `80→8080/tcp`, unpublished ones as `80/tcp`.
/// IPv6 host bindings and bindings without a host port are dropped. The result
/// is sorted and deduplicated, so IPv4/IPv6 twins of one binding collapse.
pub fn port_mappings(ports: &[ExposedPort]) -> Vec<String> {
    let mut rendered = BTreeSet::new();

    for exposed in ports {
        let (port, proto) = exposed
            .spec
            .split_once('/')
            .unwrap_or((exposed.spec.as_str(), "tcp"));

        if exposed.bindings.is_empty() {
            rendered.insert(format!("{port}/{proto}"));
            continue;
        }

        for binding in &exposed.bindings {
            if binding.host_ip.contains(':') || binding.host_port.is_empty() {
                continue;
            }
            rendered.insert(format!("{port}→{}/{proto}", binding.host_port));
        }
    }

    rendered.into_iter().collect()
}

/// Strip path-separator artifacts (`/web` → `web`) from a container name
pub fn normalize_name(raw: &str) -> String {
    raw.trim().trim_start_matches('/').to_string()
}

/// Current time in the configured timezone
pub fn observed_now(tz: Tz) -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&tz).fixed_offset()
}

/// Point-in-time description of one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySnapshot {
    id: String,
    name: String,
    status: EntityStatus,
    seen: DateTime<FixedOffset>,
    address: String,
    ports: Vec<String>,
    policy: SyncPolicy,
}

impl EntitySnapshot {
    /// Create a snapshot with no address, no ports and a disabled policy
    ///
    /// Fails if the normalized name is empty.
    pub fn new(
        id: impl Into<String>,
        name: &str,
        status: EntityStatus,
        seen: DateTime<FixedOffset>,
    ) -> Result<Self> {
        let name = normalize_name(name);
        if name.is_empty() {
            return Err(Error::invalid_input("entity name cannot be empty"));
        }

        Ok(Self {
            id: id.into(),
            name,
            status,
            seen,
            address: String::new(),
            ports: Vec::new(),
            policy: SyncPolicy::default(),
        })
    }

    /// Snapshot of a destroyed container, carrying only identity and policy
    pub fn removed(
        id: impl Into<String>,
        name: &str,
        seen: DateTime<FixedOffset>,
        policy: SyncPolicy,
    ) -> Result<Self> {
        Ok(Self::new(id, name, EntityStatus::Removed, seen)?.with_policy(policy))
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Set port mappings; they are stored sorted and deduplicated
    pub fn with_ports<I, S>(mut self, ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let unique: BTreeSet<String> = ports.into_iter().map(Into::into).collect();
        self.ports = unique.into_iter().collect();
        self
    }

    pub fn with_policy(mut self, policy: SyncPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> EntityStatus {
        self.status
    }

    pub fn seen(&self) -> DateTime<FixedOffset> {
        self.seen
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn ports(&self) -> &[String] {
        &self.ports
    }

    /// Ports as the newline-joined string written to the remote record
    pub fn ports_text(&self) -> String {
        self.ports.join("\n")
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seen() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2025-01-09T12:00:00+09:00").unwrap()
    }

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_name_is_normalized() {
        let snapshot = EntitySnapshot::new("abc", "/web", EntityStatus::Running, seen()).unwrap();
        assert_eq!(snapshot.name(), "web");
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(EntitySnapshot::new("abc", "/", EntityStatus::Running, seen()).is_err());
        assert!(EntitySnapshot::new("abc", "  ", EntityStatus::Running, seen()).is_err());
    }

    #[test]
    fn test_ports_sorted_and_deduplicated() {
        let snapshot = EntitySnapshot::new("abc", "web", EntityStatus::Running, seen())
            .unwrap()
            .with_ports(["443/tcp", "80→8080/tcp", "443/tcp"]);

        assert_eq!(snapshot.ports(), ["443/tcp", "80→8080/tcp"]);
        assert_eq!(snapshot.ports_text(), "443/tcp\n80→8080/tcp");
    }

    #[test]
    fn test_port_mappings_skip_ipv6_bindings() {
        let ports = vec![
            ExposedPort {
                spec: "80/tcp".to_string(),
                bindings: vec![
                    HostBinding {
                        host_ip: "0.0.0.0".to_string(),
                        host_port: "8080".to_string(),
                    },
                    HostBinding {
                        host_ip: "::".to_string(),
                        host_port: "8080".to_string(),
                    },
                ],
            },
            ExposedPort {
                spec: "53/udp".to_string(),
                bindings: vec![HostBinding {
                    host_ip: "::".to_string(),
                    host_port: "5353".to_string(),
                }],
            },
            ExposedPort {
                spec: "9000/tcp".to_string(),
                bindings: Vec::new(),
            },
        ];

        assert_eq!(port_mappings(&ports), vec!["80→8080/tcp", "9000/tcp"]);
    }

    #[test]
    fn test_policy_from_labels() {
        let policy = SyncPolicy::from_labels(&labels(&[
            (ENABLED_LABEL, "TRUE"),
            (GROUP_LABEL, "infra"),
        ]));
        assert!(policy.enabled);
        assert_eq!(policy.group.as_deref(), Some("infra"));

        let policy = SyncPolicy::from_labels(&labels(&[(ENABLED_LABEL, "yes")]));
        assert!(!policy.enabled);

        let policy = SyncPolicy::from_labels(&HashMap::new());
        assert_eq!(policy, SyncPolicy::default());
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("running".parse::<EntityStatus>().unwrap(), EntityStatus::Running);
        assert_eq!("dead".parse::<EntityStatus>().unwrap(), EntityStatus::Exited);
        assert!("sleeping".parse::<EntityStatus>().is_err());
        assert_eq!(EntityStatus::parse_lenient("sleeping"), EntityStatus::Exited);
    }

    #[test]
    fn test_removed_snapshot() {
        let snapshot =
            EntitySnapshot::removed("abc", "web", seen(), SyncPolicy::enabled()).unwrap();
        assert_eq!(snapshot.status(), EntityStatus::Removed);
        assert!(snapshot.policy().enabled);
        assert!(snapshot.ports().is_empty());
    }
}
