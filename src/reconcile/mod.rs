//! Per-host reconciliation of discovered facts into NetBox.
//!
//! Steps run strictly in [`Step::SEQUENCE`] order. Each one ends in one of
//! three ways: done, skipped (recorded, the host carries on) or aborted (the
//! host stops). Inventory errors are classified in `From<InventoryError>`.

pub mod outcome;

pub use outcome::{AbortReason, CreatedRecord, HostOutcome, Reconciliation, SkipReason, SkippedStep, Step};

use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;

use crate::config::{ReconcileMode, ReconcilePolicy};
use crate::executor::HostExecutor;
use crate::facts::{parser, CollectionError, FactCollector, HostFacts, HostTarget};
use crate::netbox::types::*;
use crate::netbox::{Endpoint, Ensured, InventoryClient, InventoryError, InventoryGateway};
use crate::utils::normalize_mac;

/// Device status choices NetBox accepts
const DEVICE_STATUSES: &[&str] = &[
    "offline",
    "active",
    "planned",
    "staged",
    "failed",
    "inventory",
    "decommissioning",
];

/// Power ports ensured on a parent chassis
const POWER_PORTS: [&str; 2] = ["Primary Power Supply", "Backup Power Supply"];

/// Everything a reconciliation needs, passed explicitly
#[derive(Clone)]
pub struct ReconcilerContext {
    pub inventory: Arc<dyn InventoryClient>,
    pub executor: Arc<dyn HostExecutor>,
    pub policy: ReconcilePolicy,
    /// Per-command limit for fact collection
    pub command_timeout: Duration,
}

/// NetBox interface type for a link speed in Mb/s
pub fn interface_type_for_speed(speed: Option<u32>) -> &'static str {
    match speed {
        Some(s) if s >= 100_000 => "100gbase-x-qsfp28",
        Some(s) if s >= 25_000 => "25gbase-x-sfp28",
        _ => "10gbase-x-sfpp",
    }
}

enum StepError {
    Skip(SkipReason, String),
    Abort(AbortReason),
}

impl StepError {
    fn absent(detail: impl Into<String>) -> Self {
        StepError::Skip(SkipReason::Absent, detail.into())
    }

    fn conflict(detail: impl Into<String>) -> Self {
        StepError::Skip(SkipReason::Conflict, detail.into())
    }

    /// Precondition and identity failures leave nothing safe to do
    fn fatal(err: InventoryError) -> Self {
        StepError::Abort(match err {
            InventoryError::Timeout(message) => AbortReason::Timeout { message },
            InventoryError::Transport(message) => AbortReason::Transport { message },
            other => AbortReason::Inventory {
                message: other.to_string(),
            },
        })
    }
}

impl From<InventoryError> for StepError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::Transport(_) | InventoryError::Timeout(_) => StepError::fatal(err),
            InventoryError::Conflict { .. } => StepError::Skip(SkipReason::Conflict, err.to_string()),
            other => StepError::Skip(SkipReason::Failed, other.to_string()),
        }
    }
}

enum Flow {
    Continue,
    AlreadyProvisioned(i32),
}

/// Reference records verified by the precondition step
struct References {
    role: NbReference,
    platform: NbReference,
    tenant: NbReference,
    site: Option<NbReference>,
    rack: Option<NbRack>,
}

/// State carried from one step to the next for a single host
struct Run<'a> {
    facts: &'a HostFacts,
    refs: Option<References>,
    device: Option<NbDevice>,
    device_type: Option<NbDeviceType>,
    /// `Some(None)` once resolved to "no parent"
    parent: Option<Option<NbDevice>>,
    primary_interface: Option<NbInterface>,
    skipped: Vec<SkippedStep>,
    created: Vec<CreatedRecord>,
}

impl<'a> Run<'a> {
    fn new(facts: &'a HostFacts) -> Self {
        Self {
            facts,
            refs: None,
            device: None,
            device_type: None,
            parent: None,
            primary_interface: None,
            skipped: Vec::new(),
            created: Vec::new(),
        }
    }

    fn note<T>(&mut self, ensured: &Ensured<T>, endpoint: Endpoint, key: impl Into<String>) {
        if ensured.created {
            self.created.push(CreatedRecord {
                kind: endpoint.kind().to_string(),
                key: key.into(),
            });
        }
    }

    fn refs(&self) -> Result<&References, StepError> {
        self.refs.as_ref().ok_or_else(|| unresolved("reference data"))
    }

    fn device(&self) -> Result<&NbDevice, StepError> {
        self.device.as_ref().ok_or_else(|| unresolved("device"))
    }

    fn finish(self, outcome: HostOutcome) -> Reconciliation {
        Reconciliation {
            outcome,
            created: self.created,
        }
    }
}

fn unresolved(what: &str) -> StepError {
    StepError::Abort(AbortReason::Inventory {
        message: format!("{} was not resolved by an earlier step", what),
    })
}

/// Run `fut`, giving up at `deadline`
async fn within<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}

pub struct Reconciler {
    ctx: ReconcilerContext,
    gateway: InventoryGateway,
}

impl Reconciler {
    pub fn new(ctx: ReconcilerContext) -> Self {
        let gateway = InventoryGateway::new(ctx.inventory.clone());
        Self { ctx, gateway }
    }

    /// Collect facts from `target` and reconcile them. Work still running at
    /// `deadline` is abandoned and the host aborts with a timeout.
    pub async fn reconcile_host(&self, target: &HostTarget, deadline: Option<Instant>) -> Reconciliation {
        let span = tracing::info_span!("reconcile", host = %target.name);
        async move {
            let facts = match within(deadline, self.collect(target)).await {
                Some(Ok(facts)) => facts,
                Some(Err(e)) => {
                    tracing::error!("{}: {}", target.name, e);
                    return Reconciliation::aborted(
                        Some(Step::Collect),
                        AbortReason::Unreachable { message: e.to_string() },
                    );
                }
                None => {
                    tracing::error!("{}: timed out collecting facts", target.name);
                    return Reconciliation::aborted(
                        Some(Step::Collect),
                        AbortReason::Timeout {
                            message: "host deadline passed during fact collection".to_string(),
                        },
                    );
                }
            };
            self.reconcile_facts(&facts, deadline).await
        }
        .instrument(span)
        .await
    }

    async fn collect(&self, target: &HostTarget) -> Result<HostFacts, CollectionError> {
        let policy = &self.ctx.policy;
        let collector = FactCollector::new(self.ctx.executor.clone(), self.ctx.command_timeout, policy.use_sudo);
        if policy.enable_lldp {
            collector.prepare_lldp(target).await?;
        }
        collector.collect(target).await
    }

    /// Run every inventory step for already collected facts
    pub async fn reconcile_facts(&self, facts: &HostFacts, deadline: Option<Instant>) -> Reconciliation {
        let host = facts.target.name.as_str();
        let mut run = Run::new(facts);

        for step in Step::SEQUENCE {
            tracing::debug!("{}: {}", host, step);
            let result = match within(deadline, self.run_step(step, &mut run)).await {
                Some(result) => result,
                None => Err(StepError::Abort(AbortReason::Timeout {
                    message: format!("host deadline passed during {}", step),
                })),
            };

            match result {
                Ok(Flow::Continue) => {}
                Ok(Flow::AlreadyProvisioned(device_id)) => {
                    tracing::info!("{}: already provisioned as device #{}", host, device_id);
                    return run.finish(HostOutcome::AlreadyProvisioned { device_id });
                }
                Err(StepError::Skip(reason, detail)) => {
                    tracing::warn!("{}: skipped {} ({}): {}", host, step, reason, detail);
                    run.skipped.push(SkippedStep { step, reason, detail });
                }
                Err(StepError::Abort(reason)) => {
                    tracing::error!("{}: aborted at {}: {}", host, step, reason);
                    return run.finish(HostOutcome::Abort {
                        step: Some(step),
                        reason,
                    });
                }
            }
        }

        let outcome = if run.skipped.is_empty() {
            HostOutcome::Success
        } else {
            HostOutcome::PartialSuccess {
                skipped_steps: std::mem::take(&mut run.skipped),
            }
        };
        tracing::info!("{}: {} ({} record(s) created)", host, outcome, run.created.len());
        run.finish(outcome)
    }

    async fn run_step(&self, step: Step, run: &mut Run<'_>) -> Result<Flow, StepError> {
        match step {
            Step::Collect => Ok(Flow::Continue),
            Step::Preconditions => self.check_preconditions(run).await.map(|_| Flow::Continue),
            Step::Identity => self.resolve_identity(run).await,
            Step::DeviceType => self.ensure_device_type(run).await.map(|_| Flow::Continue),
            Step::ParentLinkage => self.link_parent(run).await.map(|_| Flow::Continue),
            Step::DeviceAttributes => self.sync_attributes(run).await.map(|_| Flow::Continue),
            Step::PrimaryInterface => self.sync_primary_interface(run).await.map(|_| Flow::Continue),
            Step::Cable => self.sync_cable(run).await.map(|_| Flow::Continue),
            Step::BmcInterface => self.sync_bmc(run).await.map(|_| Flow::Continue),
            Step::CustomFields => self.sync_custom_fields(run).await.map(|_| Flow::Continue),
            Step::Power => self.sync_power(run).await.map(|_| Flow::Continue),
        }
    }

    // --- 1. Preconditions ---

    async fn check_preconditions(&self, run: &mut Run<'_>) -> Result<(), StepError> {
        let policy = &self.ctx.policy;
        if !DEVICE_STATUSES.contains(&policy.status.as_str()) {
            return Err(missing("status", &policy.status));
        }

        let role = required(Endpoint::DeviceRoles, &policy.role, self.gateway.find_role(&policy.role).await)?;
        let platform = required(
            Endpoint::Platforms,
            &policy.platform,
            self.gateway.find_platform(&policy.platform).await,
        )?;
        let tenant = required(Endpoint::Tenants, &policy.tenant, self.gateway.find_tenant(&policy.tenant).await)?;

        let site = match &policy.site {
            Some(name) => Some(required(Endpoint::Sites, name, self.gateway.find_site(name).await)?),
            None => None,
        };
        let rack = match &policy.rack {
            Some(name) => {
                let site_id = site.as_ref().map(|s| s.id);
                Some(required(Endpoint::Racks, name, self.gateway.find_rack(name, site_id).await)?)
            }
            None => None,
        };

        run.refs = Some(References {
            role,
            platform,
            tenant,
            site,
            rack,
        });
        Ok(())
    }

    // --- 2. Identity ---

    async fn resolve_identity(&self, run: &mut Run<'_>) -> Result<Flow, StepError> {
        let facts = run.facts;
        let name = facts.target.name.as_str();
        let serial = facts
            .system
            .serial
            .as_deref()
            .ok_or(StepError::Abort(AbortReason::MissingSerial))?;

        let by_serial = self
            .gateway
            .find_device_by_serial(serial)
            .await
            .map_err(StepError::fatal)?;

        if let Some(existing) = &by_serial {
            if self.ctx.policy.mode == ReconcileMode::Provision {
                return Ok(Flow::AlreadyProvisioned(existing.id));
            }
        }

        let existing = match by_serial {
            Some(device) => Some(device),
            None => self
                .gateway
                .find_device_by_name(name)
                .await
                .map_err(StepError::fatal)?,
        };
        if let Some(device) = existing {
            tracing::info!("{}: matched device #{} ({})", name, device.id, device.display_name());
            run.device = Some(device);
            return Ok(Flow::Continue);
        }

        // A new device needs its type and a site up front
        let device_type = self.ensure_device_type(run).await.map_err(|e| match e {
            StepError::Skip(_, detail) => StepError::Abort(AbortReason::Inventory {
                message: format!("cannot create device without a device type: {}", detail),
            }),
            abort => abort,
        })?;
        let parent = self.resolve_parent(run).await.map_err(StepError::fatal)?;

        let refs = run.refs()?;
        let site = parent
            .as_ref()
            .and_then(|p| p.site.as_ref().map(|s| s.id))
            .or_else(|| refs.site.as_ref().map(|s| s.id))
            .ok_or_else(|| missing("site", "none configured and no parent chassis"))?;
        let rack = parent
            .as_ref()
            .and_then(|p| p.rack.as_ref().map(|r| r.id))
            .or_else(|| refs.rack.as_ref().map(|r| r.id));

        let fields = DeviceFields {
            role: Some(refs.role.id),
            device_type: Some(device_type.id),
            status: Some(self.ctx.policy.status.clone()),
            site: Some(site),
            rack,
            serial: Some(serial.to_string()),
            platform: Some(refs.platform.id),
            tenant: Some(refs.tenant.id),
            ..Default::default()
        };
        let device = self
            .gateway
            .ensure_device(name, &fields)
            .await
            .map_err(StepError::fatal)?;
        run.note(&device, Endpoint::Devices, name);
        run.device = Some(device.record);
        Ok(Flow::Continue)
    }

    // --- 3. Manufacturer / device type ---

    async fn ensure_device_type(&self, run: &mut Run<'_>) -> Result<NbDeviceType, StepError> {
        if let Some(device_type) = &run.device_type {
            return Ok(device_type.clone());
        }

        let facts = run.facts;
        let system = &facts.system;
        let raw = system
            .manufacturer
            .as_deref()
            .ok_or_else(|| StepError::absent("manufacturer not discovered"))?;
        let model = system
            .product
            .as_deref()
            .ok_or_else(|| StepError::absent("product model not discovered"))?;

        let name = parser::canonical_manufacturer(raw);
        let manufacturer = self.gateway.ensure_manufacturer(&name).await?;
        run.note(&manufacturer, Endpoint::Manufacturers, name.as_str());

        let device_type = self
            .gateway
            .ensure_device_type(model, manufacturer.record.id)
            .await?;
        run.note(&device_type, Endpoint::DeviceTypes, model);
        run.device_type = Some(device_type.record.clone());
        Ok(device_type.record)
    }

    // --- 4. Parent chassis ---

    /// The chassis holding this node, looked up once per run. A chassis
    /// serial that points back at the host itself means "no parent".
    async fn resolve_parent(&self, run: &mut Run<'_>) -> Result<Option<NbDevice>, InventoryError> {
        if let Some(parent) = &run.parent {
            return Ok(parent.clone());
        }

        let facts = run.facts;
        let system = &facts.system;
        let parent = match system.chassis_serial.as_deref() {
            None => None,
            Some(chassis) if Some(chassis) == system.serial.as_deref() => None,
            Some(chassis) => self
                .gateway
                .find_device_by_serial(chassis)
                .await?
                .filter(|p| run.device.as_ref().map_or(true, |d| d.id != p.id)),
        };

        if parent.is_none() {
            tracing::debug!("{}: no parent chassis", facts.target.name);
        }
        run.parent = Some(parent.clone());
        Ok(parent)
    }

    async fn link_parent(&self, run: &mut Run<'_>) -> Result<(), StepError> {
        let Some(parent) = self.resolve_parent(run).await? else {
            return Ok(());
        };
        let device = run.device()?.clone();
        let bay_name = run
            .facts
            .target
            .bay
            .clone()
            .unwrap_or_else(|| self.ctx.policy.default_bay.clone());

        let bay = self.gateway.ensure_device_bay(parent.id, &bay_name).await?;
        run.note(&bay, Endpoint::DeviceBays, format!("{} {}", parent.display_name(), bay_name));

        match &bay.record.installed_device {
            Some(occupant) if occupant.id == device.id => Ok(()),
            Some(occupant) => {
                let holder = if occupant.name.is_empty() {
                    format!("device #{}", occupant.id)
                } else {
                    occupant.name.clone()
                };
                Err(StepError::conflict(format!(
                    "bay {} on {} already holds {}",
                    bay_name,
                    parent.display_name(),
                    holder
                )))
            }
            None => {
                let fields = DeviceBayFields {
                    installed_device: Some(device.id),
                    ..Default::default()
                };
                self.gateway.update_device_bay(bay.record.id, &fields).await?;
                tracing::info!(
                    "Installed {} into bay {} on {}",
                    device.display_name(),
                    bay_name,
                    parent.display_name()
                );
                Ok(())
            }
        }
    }

    // --- 5. Device attributes ---

    async fn sync_attributes(&self, run: &mut Run<'_>) -> Result<(), StepError> {
        let facts = run.facts;
        let policy = &self.ctx.policy;
        let device_id = run.device()?.id;
        let parent = self.resolve_parent(run).await?;

        let refs = run.refs()?;
        let mut fields = DeviceFields {
            name: Some(facts.target.name.clone()),
            role: Some(refs.role.id),
            device_type: run.device_type.as_ref().map(|t| t.id),
            status: Some(policy.status.clone()),
            site: parent
                .as_ref()
                .and_then(|p| p.site.as_ref().map(|s| s.id))
                .or_else(|| refs.site.as_ref().map(|s| s.id)),
            rack: parent
                .as_ref()
                .and_then(|p| p.rack.as_ref().map(|r| r.id))
                .or_else(|| refs.rack.as_ref().map(|r| r.id)),
            serial: facts.system.serial.clone(),
            platform: Some(refs.platform.id),
            tenant: Some(refs.tenant.id),
            ..Default::default()
        };

        let mut notes: Vec<(SkipReason, String)> = Vec::new();

        if let Some(tag) = facts.system.asset_tag() {
            let holders = self.gateway.find_devices_by_asset_tag(tag).await?;
            match holders.iter().find(|d| d.id != device_id) {
                Some(other) => notes.push((
                    SkipReason::Conflict,
                    format!("asset tag {} already held by {}", tag, other.display_name()),
                )),
                None => fields.asset_tag = Some(tag.to_string()),
            }
        }

        if let Some(os) = &facts.system.os_pretty_name {
            match self.gateway.ensure_tag(os, &policy.tag_color).await {
                Ok(tag) => {
                    run.note(&tag, Endpoint::Tags, os.as_str());
                    fields.tags = Some(vec![tag.record.id]);
                }
                Err(e) => match StepError::from(e) {
                    StepError::Skip(reason, detail) => notes.push((reason, format!("OS tag: {}", detail))),
                    abort => return Err(abort),
                },
            }
        }

        let updated = self.gateway.update_device(device_id, &fields).await?;
        run.device = Some(updated);

        match notes.first() {
            None => Ok(()),
            Some((reason, _)) => {
                let detail: Vec<String> = notes.iter().map(|(_, d)| d.clone()).collect();
                Err(StepError::Skip(*reason, detail.join("; ")))
            }
        }
    }

    // --- 6. Primary interface ---

    async fn sync_primary_interface(&self, run: &mut Run<'_>) -> Result<(), StepError> {
        let facts = run.facts;
        let policy = &self.ctx.policy;
        let nic = facts
            .primary_nic()
            .ok_or_else(|| StepError::absent("no default-route interface discovered"))?;
        let device = run.device()?.clone();

        let fields = InterfaceFields {
            iface_type: Some(interface_type_for_speed(nic.link_speed).to_string()),
            mac_address: nic.mac.clone(),
            mtu: nic.mtu,
            ..Default::default()
        };
        let iface = self.ensure_interface(run, &device, &nic.name, fields).await?;
        run.primary_interface = Some(iface.clone());

        let cidr = nic
            .ipv4
            .ok_or_else(|| StepError::absent(format!("{} has no IPv4 address", nic.name)))?;
        let ip = self
            .ensure_assigned_ip(run, &cidr.to_string(), &policy.primary_ip_status, iface.id)
            .await?;

        if device.primary_ip4.as_ref().map(|p| p.id) != Some(ip.id) {
            let fields = DeviceFields {
                primary_ip4: Some(ip.id),
                ..Default::default()
            };
            run.device = Some(self.gateway.update_device(device.id, &fields).await?);
            tracing::info!("Set primary IPv4 of {} to {}", device.display_name(), ip.address);
        }
        Ok(())
    }

    /// Get-or-create an interface, then patch it when discovered values differ
    async fn ensure_interface(
        &self,
        run: &mut Run<'_>,
        device: &NbDevice,
        name: &str,
        fields: InterfaceFields,
    ) -> Result<NbInterface, StepError> {
        let ensured = self.gateway.ensure_interface(device.id, name, &fields).await?;
        run.note(&ensured, Endpoint::Interfaces, format!("{} {}", device.display_name(), name));
        let existing = ensured.record;
        if ensured.created {
            return Ok(existing);
        }

        let wanted_mac = fields.mac_address.as_deref().map(normalize_mac);
        let stale = (wanted_mac.is_some() && existing.mac_address.as_deref().map(normalize_mac) != wanted_mac)
            || (fields.mtu.is_some() && existing.mtu != fields.mtu)
            || existing.iface_type.as_ref().map(|t| t.value.as_str()) != fields.iface_type.as_deref();
        if !stale {
            return Ok(existing);
        }

        tracing::info!("Updating interface {} on {}", name, device.display_name());
        Ok(self.gateway.update_interface(existing.id, &fields).await?)
    }

    async fn ensure_assigned_ip(
        &self,
        run: &mut Run<'_>,
        address: &str,
        status: &str,
        interface_id: i32,
    ) -> Result<NbIPAddress, StepError> {
        let ip = self.gateway.ensure_ip_address(address, status).await?;
        run.note(&ip, Endpoint::IpAddresses, address);
        if self.gateway.assign_ip_address(&ip.record, interface_id).await? {
            tracing::info!("Assigned {} to interface #{}", address, interface_id);
        }
        Ok(ip.record)
    }

    // --- 7. Cable ---

    async fn sync_cable(&self, run: &mut Run<'_>) -> Result<(), StepError> {
        let facts = run.facts;
        let lldp = facts
            .lldp
            .as_ref()
            .ok_or_else(|| StepError::absent("no LLDP neighbor discovered"))?;
        let local = run
            .primary_interface
            .clone()
            .ok_or_else(|| StepError::absent("primary interface not recorded"))?;

        let candidates = self
            .gateway
            .find_interfaces_on_device(&lldp.neighbor_system_name)
            .await?;
        let remote = candidates
            .iter()
            .find(|i| i.name == lldp.neighbor_port)
            .or_else(|| candidates.iter().find(|i| i.name.contains(&lldp.neighbor_port)))
            .ok_or_else(|| {
                StepError::absent(format!(
                    "no interface matching {} on {}",
                    lldp.neighbor_port, lldp.neighbor_system_name
                ))
            })?;

        if local.cable.is_some() || remote.cable.is_some() {
            if self.gateway.find_cable_between(local.id, remote.id).await?.is_some() {
                return Ok(());
            }
            return Err(StepError::conflict(format!(
                "{} or {} {} is already cabled elsewhere",
                local.name, lldp.neighbor_system_name, remote.name
            )));
        }

        let cable = self.gateway.ensure_cable(local.id, remote.id).await?;
        run.note(
            &cable,
            Endpoint::Cables,
            format!("{} <-> {} {}", local.name, lldp.neighbor_system_name, remote.name),
        );
        Ok(())
    }

    // --- 8. BMC ---

    async fn sync_bmc(&self, run: &mut Run<'_>) -> Result<(), StepError> {
        let policy = &self.ctx.policy;
        let facts = run.facts;
        let bmc = facts
            .bmc
            .as_ref()
            .ok_or_else(|| StepError::absent("no BMC discovered"))?;
        let device = run.device()?.clone();

        let fields = InterfaceFields {
            iface_type: Some(policy.bmc_interface_type.clone()),
            mac_address: bmc.mac.clone(),
            mtu: Some(policy.bmc_mtu),
            ..Default::default()
        };
        let iface = self
            .ensure_interface(run, &device, &policy.bmc_interface, fields)
            .await?;

        let cidr = bmc
            .ipv4
            .ok_or_else(|| StepError::absent("BMC has no IPv4 address"))?;
        self.ensure_assigned_ip(run, &cidr.to_string(), &policy.bmc_ip_status, iface.id)
            .await?;
        Ok(())
    }

    // --- 9. Custom fields ---

    async fn sync_custom_fields(&self, run: &mut Run<'_>) -> Result<(), StepError> {
        let facts = run.facts;
        let firmware = &facts.firmware;
        let sku_field = self.ctx.policy.sku_field.as_str();
        if firmware.is_empty() {
            return Err(StepError::absent("no firmware facts discovered"));
        }

        let custom_fields: HashMap<String, serde_json::Value> = [
            (sku_field, &firmware.sku),
            ("bios_version", &firmware.bios_version),
            ("bios_revision", &firmware.bios_revision),
            ("bmc_firmware", &firmware.bmc_firmware),
            ("bmc_version", &firmware.bmc_version),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_ref().map(|v| (key.to_string(), json!(v))))
        .collect();

        let device_id = run.device()?.id;
        let fields = DeviceFields {
            custom_fields: Some(custom_fields),
            ..Default::default()
        };
        run.device = Some(self.gateway.update_device(device_id, &fields).await?);
        Ok(())
    }

    // --- 10. Power ---

    async fn sync_power(&self, run: &mut Run<'_>) -> Result<(), StepError> {
        let Some(parent) = self.resolve_parent(run).await? else {
            return Ok(());
        };

        let mut ports = Vec::new();
        for name in POWER_PORTS {
            let port = self.gateway.ensure_power_port(parent.id, name).await?;
            run.note(&port, Endpoint::PowerPorts, format!("{} {}", parent.display_name(), name));
            ports.push(port.record);
        }

        let capacity = run
            .facts
            .power_capacity
            .ok_or_else(|| StepError::absent("no power capacity discovered"))?;
        let divisor = self.ctx.policy.power_derate_divisor.max(1);

        for port in ports.iter().filter(|p| p.maximum_draw.is_none()) {
            let fields = PowerPortFields {
                maximum_draw: Some(capacity),
                allocated_draw: Some(capacity / divisor),
                ..Default::default()
            };
            self.gateway.update_power_port(port.id, &fields).await?;
            tracing::info!(
                "Set {} on {} to {}W maximum, {}W allocated",
                port.name,
                parent.display_name(),
                capacity,
                capacity / divisor
            );
        }
        Ok(())
    }
}

fn missing(kind: &str, name: &str) -> StepError {
    StepError::Abort(AbortReason::MissingReference {
        kind: kind.to_string(),
        name: name.to_string(),
    })
}

fn required<T>(endpoint: Endpoint, name: &str, found: Result<Option<T>, InventoryError>) -> Result<T, StepError> {
    match found {
        Ok(Some(record)) => Ok(record),
        Ok(None) => Err(missing(endpoint.kind(), name)),
        Err(e) => Err(StepError::fatal(e)),
    }
}
