pub mod collector;
pub mod parser;

pub use collector::{CollectionError, FactCollector};

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// A host to be reconciled, as named in the inventory and reachable at `ip`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTarget {
    pub name: String,
    pub ip: String,
    /// Device bay the node should be installed into on its parent chassis
    #[serde(default)]
    pub bay: Option<String>,
}

impl HostTarget {
    pub fn new(name: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ip: ip.into(),
            bay: None,
        }
    }

    pub fn with_bay(mut self, bay: impl Into<String>) -> Self {
        self.bay = Some(bay.into());
        self
    }
}

/// An IPv4 address with its prefix length, e.g. 10.0.0.5/24
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Cidr {
    pub addr: Ipv4Addr,
    pub prefix_len: u8,
}

impl Ipv4Cidr {
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Option<Self> {
        (prefix_len <= 32).then_some(Self { addr, prefix_len })
    }
}

impl std::fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

/// DMI identity of the system and its chassis
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemFacts {
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial: Option<String>,
    pub chassis_serial: Option<String>,
    pub baseboard_asset_tag: Option<String>,
    pub chassis_asset_tag: Option<String>,
    pub os_pretty_name: Option<String>,
}

impl SystemFacts {
    /// Baseboard asset tag when numeric, else chassis asset tag when numeric
    pub fn asset_tag(&self) -> Option<&str> {
        [&self.baseboard_asset_tag, &self.chassis_asset_tag]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|tag| !tag.is_empty() && tag.chars().all(|c| c.is_ascii_digit()))
    }
}

/// Default route as reported by the kernel routing table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultRoute {
    pub gateway: Ipv4Addr,
    pub interface: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicFact {
    pub name: String,
    pub ipv4: Option<Ipv4Cidr>,
    pub mac: Option<String>,
    /// Link speed in Mb/s
    pub link_speed: Option<u32>,
    pub mtu: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BmcFact {
    pub ipv4: Option<Ipv4Cidr>,
    pub mac: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LldpFact {
    /// Local interface the neighbor was heard on
    pub local_interface: Option<String>,
    pub neighbor_mac: Option<String>,
    pub neighbor_system_name: String,
    pub neighbor_port: String,
}

/// Firmware and SKU values written to device custom fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareFacts {
    pub sku: Option<String>,
    pub bios_version: Option<String>,
    pub bios_revision: Option<String>,
    pub bmc_firmware: Option<String>,
    pub bmc_version: Option<String>,
}

impl FirmwareFacts {
    pub fn is_empty(&self) -> bool {
        self.sku.is_none()
            && self.bios_version.is_none()
            && self.bios_revision.is_none()
            && self.bmc_firmware.is_none()
            && self.bmc_version.is_none()
    }
}

/// Everything discovered about one host in a single collection pass.
///
/// Built once by the collector and never mutated afterwards. Any fact that
/// could not be read or parsed is `None` rather than a placeholder string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostFacts {
    pub target: HostTarget,
    pub system: SystemFacts,
    pub route: Option<DefaultRoute>,
    /// Discovered NICs, default-route interface first
    pub network: Vec<NicFact>,
    pub bmc: Option<BmcFact>,
    pub lldp: Option<LldpFact>,
    /// Maximum power supply capacity in watts
    pub power_capacity: Option<u32>,
    pub firmware: FirmwareFacts,
}

impl HostFacts {
    /// The interface carrying the default route, if it was discovered
    pub fn primary_nic(&self) -> Option<&NicFact> {
        self.network.first()
    }
}
