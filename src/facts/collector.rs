use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::parser;
use super::{HostFacts, HostTarget, NicFact, SystemFacts};
use crate::executor::{ExecError, HostExecutor};

/// Collection failure that ends the run for a host
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("host {host} unreachable: {reason}")]
    Unreachable { host: String, reason: String },
}

/// Runs the fixed diagnostic command set against a host and assembles its facts
pub struct FactCollector {
    executor: Arc<dyn HostExecutor>,
    timeout: Duration,
    use_sudo: bool,
}

impl FactCollector {
    pub fn new(executor: Arc<dyn HostExecutor>, timeout: Duration, use_sudo: bool) -> Self {
        Self {
            executor,
            timeout,
            use_sudo,
        }
    }

    /// Collect all facts for `target`. Individual command failures leave the
    /// affected facts absent; only an unreachable host is an error.
    pub async fn collect(&self, target: &HostTarget) -> Result<HostFacts, CollectionError> {
        let dmi = |keyword: &str| format!("dmidecode -s {}", keyword);

        let manufacturer = self.run(target, &dmi("system-manufacturer"), true).await?;
        let product = self.run(target, &dmi("system-product-name"), true).await?;
        let serial = self.run(target, &dmi("system-serial-number"), true).await?;
        let chassis_serial = self.run(target, &dmi("chassis-serial-number"), true).await?;
        let baseboard_asset = self.run(target, &dmi("baseboard-asset-tag"), true).await?;
        let chassis_asset = self.run(target, &dmi("chassis-asset-tag"), true).await?;
        let os_release = self.run(target, "cat /etc/os-release", false).await?;

        let system = SystemFacts {
            manufacturer: manufacturer.as_deref().and_then(parser::parse_dmi_string),
            product: product.as_deref().and_then(parser::parse_dmi_string),
            serial: serial.as_deref().and_then(parser::parse_dmi_string),
            chassis_serial: chassis_serial.as_deref().and_then(parser::parse_dmi_string),
            baseboard_asset_tag: baseboard_asset.as_deref().and_then(parser::parse_dmi_string),
            chassis_asset_tag: chassis_asset.as_deref().and_then(parser::parse_dmi_string),
            os_pretty_name: os_release.as_deref().and_then(parser::parse_os_pretty_name),
        };

        let route = self
            .run(target, "route -n", false)
            .await?
            .as_deref()
            .and_then(parser::parse_default_route);

        let mut network = Vec::new();
        if let Some(route) = &route {
            network.push(self.collect_nic(target, &route.interface).await?);
        } else {
            tracing::warn!("{}: no default route found, primary interface unknown", target.name);
        }

        let bmc = self
            .run(target, "ipmitool lan print", true)
            .await?
            .as_deref()
            .and_then(parser::parse_ipmi_lan);
        let mc_info = self.run(target, "ipmitool mc info", true).await?;

        let primary_name = route.as_ref().map(|r| r.interface.as_str());
        let lldp = self
            .run(target, "lldpcli show neighbors", true)
            .await?
            .and_then(|out| parser::parse_lldp_neighbors(&out, primary_name));

        let power_capacity = self
            .run(target, "dmidecode -t 39", true)
            .await?
            .as_deref()
            .and_then(parser::parse_power_capacity);

        let dmi_type1 = self.run(target, "dmidecode -t 1", true).await?;
        let dmi_type0 = self.run(target, "dmidecode -t 0", true).await?;
        let firmware = parser::firmware_facts(
            dmi_type1.as_deref().unwrap_or_default(),
            dmi_type0.as_deref().unwrap_or_default(),
            mc_info.as_deref().unwrap_or_default(),
        );

        if lldp.is_none() {
            tracing::info!("{}: no LLDP neighbor reported", target.name);
        }
        if power_capacity.is_none() {
            tracing::info!("{}: no power capacity reported", target.name);
        }

        Ok(HostFacts {
            target: target.clone(),
            system,
            route,
            network,
            bmc,
            lldp,
            power_capacity,
            firmware,
        })
    }

    async fn collect_nic(&self, target: &HostTarget, name: &str) -> Result<NicFact, CollectionError> {
        let addressing = self
            .run(target, &format!("ifconfig -a {}", name), false)
            .await?
            .map(|out| parser::parse_ifconfig(&out))
            .unwrap_or_default();

        let link_speed = self
            .run(target, &format!("ethtool {}", name), false)
            .await?
            .as_deref()
            .and_then(parser::parse_link_speed);

        Ok(NicFact {
            name: name.to_string(),
            ipv4: addressing.ipv4,
            mac: addressing.mac,
            link_speed,
            mtu: addressing.mtu,
        })
    }

    /// Enable lldpd, report port names as ifname, and stop Intel i40e NICs
    /// from consuming LLDP frames in firmware. Best effort.
    pub async fn prepare_lldp(&self, target: &HostTarget) -> Result<(), CollectionError> {
        self.run(target, "systemctl --now enable lldpd", true).await?;
        self.run(target, "lldpcli configure lldp portidsubtype ifname", true).await?;

        let vendor = self
            .run(target, "lspci", false)
            .await?
            .as_deref()
            .and_then(parser::parse_nic_vendor);

        if vendor.as_deref() != Some("intel") {
            return Ok(());
        }

        let buses = self
            .run(target, "lshw -class network -businfo", true)
            .await?
            .map(|out| parser::parse_pci_buses(&out))
            .unwrap_or_default();

        for bus in buses {
            let cmd = format!(
                "echo lldp stop | sudo tee -a /sys/kernel/debug/i40e/{}/command > /dev/null",
                bus
            );
            self.run(target, &cmd, false).await?;
        }
        Ok(())
    }

    /// Run one command. `Ok(None)` means the command failed but the host is
    /// still reachable.
    async fn run(&self, target: &HostTarget, command: &str, privileged: bool) -> Result<Option<String>, CollectionError> {
        let command = if privileged && self.use_sudo {
            format!("sudo {}", command)
        } else {
            command.to_string()
        };

        tracing::debug!("{}: running `{}`", target.name, command);
        match self.executor.execute(target, &command, self.timeout).await {
            Ok(output) => Ok(Some(output)),
            Err(ExecError::Unreachable { host, reason }) => Err(CollectionError::Unreachable { host, reason }),
            Err(e) => {
                tracing::warn!("{}: {}", target.name, e);
                Ok(None)
            }
        }
    }
}
