use serde::Serialize;
use thiserror::Error;

use crate::config::ReconcilePolicy;
use crate::facts::HostTarget;
use crate::netbox::types::{DeviceFields, NbReference, SyncCounts};
use crate::netbox::{InventoryError, InventoryGateway};
use crate::utils::{is_valid_hostname, is_valid_ipv4};

/// Status given to seeded devices until their first reconciliation
pub const STAGED_STATUS: &str = "staged";

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("{kind} '{name}' not found in inventory")]
    MissingReference { kind: &'static str, name: String },

    #[error("no site configured for seeded devices")]
    NoSite,

    #[error(transparent)]
    Inventory(#[from] InventoryError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HostListError {
    #[error("line {line}: expected '<name> <ip> [bay]'")]
    Malformed { line: usize },

    #[error("line {line}: invalid host name '{name}'")]
    InvalidName { line: usize, name: String },

    #[error("line {line}: invalid IPv4 address '{ip}'")]
    InvalidIp { line: usize, ip: String },
}

/// One seeded host and the device that stands for it
#[derive(Debug, Clone, Serialize)]
pub struct SeededHost {
    pub name: String,
    pub ip: String,
    pub device_id: i32,
    pub created: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SeedReport {
    pub counts: SyncCounts,
    pub hosts: Vec<SeededHost>,
}

/// Parse a host list: one `<name> <ip> [bay]` per line. Blank lines and
/// anything after `#` are ignored.
pub fn parse_host_list(text: &str) -> Result<Vec<HostTarget>, HostListError> {
    let mut targets = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let content = raw.split('#').next().unwrap_or("").trim();
        if content.is_empty() {
            continue;
        }

        let fields: Vec<&str> = content.split_whitespace().collect();
        let (name, ip, bay) = match fields.as_slice() {
            [name, ip] => (*name, *ip, None),
            [name, ip, bay] => (*name, *ip, Some(*bay)),
            _ => return Err(HostListError::Malformed { line }),
        };
        if !is_valid_hostname(name) {
            return Err(HostListError::InvalidName {
                line,
                name: name.to_string(),
            });
        }
        if !is_valid_ipv4(ip) {
            return Err(HostListError::InvalidIp { line, ip: ip.to_string() });
        }

        let target = HostTarget::new(name, ip);
        targets.push(match bay {
            Some(bay) => target.with_bay(bay),
            None => target,
        });
    }
    Ok(targets)
}

async fn reference(
    lookup: impl std::future::Future<Output = Result<Option<NbReference>, InventoryError>>,
    kind: &'static str,
    name: &str,
) -> Result<i32, SeedError> {
    match lookup.await? {
        Some(found) => Ok(found.id),
        None => Err(SeedError::MissingReference {
            kind,
            name: name.to_string(),
        }),
    }
}

/// Ensure a staged device exists for every target so the hosts show up in
/// the inventory before they are first reconciled.
///
/// Reference data (site, rack, role, platform, tenant and the device type)
/// must already exist; a missing one fails the whole seed before anything is
/// written. Per-host failures are counted and the remaining hosts continue.
pub async fn seed_hosts(
    gateway: &InventoryGateway,
    policy: &ReconcilePolicy,
    device_type_model: &str,
    targets: &[HostTarget],
) -> Result<SeedReport, SeedError> {
    let site_name = policy.site.as_deref().ok_or(SeedError::NoSite)?;
    let site = reference(gateway.find_site(site_name), "site", site_name).await?;
    let rack = match policy.rack.as_deref() {
        Some(name) => match gateway.find_rack(name, Some(site)).await? {
            Some(rack) => Some(rack.id),
            None => {
                return Err(SeedError::MissingReference {
                    kind: "rack",
                    name: name.to_string(),
                })
            }
        },
        None => None,
    };
    let role = reference(gateway.find_role(&policy.role), "device role", &policy.role).await?;
    let platform = reference(gateway.find_platform(&policy.platform), "platform", &policy.platform).await?;
    let tenant = reference(gateway.find_tenant(&policy.tenant), "tenant", &policy.tenant).await?;
    let device_type = match gateway.find_device_type(device_type_model).await? {
        Some(found) => found.id,
        None => {
            return Err(SeedError::MissingReference {
                kind: "device type",
                name: device_type_model.to_string(),
            })
        }
    };

    let fields = DeviceFields {
        role: Some(role),
        device_type: Some(device_type),
        status: Some(STAGED_STATUS.to_string()),
        site: Some(site),
        rack,
        platform: Some(platform),
        tenant: Some(tenant),
        ..Default::default()
    };

    let mut report = SeedReport::default();
    for target in targets {
        match gateway.ensure_device(&target.name, &fields).await {
            Ok(ensured) => {
                if ensured.created {
                    tracing::info!("Seeded {} ({})", target.name, target.ip);
                    report.counts.created += 1;
                } else {
                    tracing::debug!("{} already in inventory", target.name);
                    report.counts.existing += 1;
                }
                report.hosts.push(SeededHost {
                    name: target.name.clone(),
                    ip: target.ip.clone(),
                    device_id: ensured.record.id,
                    created: ensured.created,
                });
            }
            Err(e) if e.is_transient() => return Err(e.into()),
            Err(e) => {
                tracing::warn!("Failed to seed {}: {}", target.name, e);
                report.counts.errors.push(format!("{}: {}", target.name, e));
            }
        }
    }
    Ok(report)
}
