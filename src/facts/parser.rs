//! Parsers for the diagnostic command output collected from a host.
//!
//! Every function here is total: empty, truncated, or unexpected output
//! produces `None` instead of an error. Parsing is keyed on label text
//! rather than on line offsets so that extra or reordered lines do not
//! shift values into the wrong fields.

use std::net::Ipv4Addr;

use super::{BmcFact, DefaultRoute, FirmwareFacts, Ipv4Cidr, LldpFact};
use crate::utils::normalize_mac;

/// Values firmware vendors leave in unprogrammed DMI fields
const DMI_PLACEHOLDERS: &[&str] = &[
    "to be filled by o.e.m.",
    "not specified",
    "not applicable",
    "default string",
    "system serial number",
    "chassis serial number",
    "0123456789",
    "none",
    "n/a",
];

/// Convert a dotted-quad netmask to a prefix length (255.255.255.0 -> 24).
/// Non-contiguous or malformed masks yield `None`.
pub fn mask_to_prefix_length(mask: &str) -> Option<u8> {
    let bits = u32::from(mask.trim().parse::<Ipv4Addr>().ok()?);
    let ones = bits.leading_ones();
    if ones + bits.trailing_zeros() != 32 {
        return None;
    }
    Some(ones as u8)
}

/// Convert a prefix length back to a dotted-quad netmask
pub fn prefix_to_mask(prefix_len: u8) -> Option<Ipv4Addr> {
    match prefix_len {
        0 => Some(Ipv4Addr::from(0)),
        1..=32 => Some(Ipv4Addr::from(u32::MAX << (32 - u32::from(prefix_len)))),
        _ => None,
    }
}

/// Trim a single `dmidecode -s` value, dropping vendor placeholders
pub fn parse_dmi_string(raw: &str) -> Option<String> {
    let value = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))?;

    if DMI_PLACEHOLDERS.contains(&value.to_lowercase().as_str()) {
        return None;
    }
    Some(value.to_string())
}

/// Map a raw DMI manufacturer string onto the name used in the inventory
pub fn canonical_manufacturer(raw: &str) -> String {
    let lower = raw.to_lowercase();
    let canonical = [
        ("dell", "Dell"),
        ("quanta", "QCT"),
        ("supermicro", "Supermicro"),
        ("hewlett", "HPE"),
        ("lenovo", "Lenovo"),
    ]
    .iter()
    .find(|(needle, _)| lower.contains(needle))
    .map(|(_, name)| *name);

    match canonical {
        Some(name) => name.to_string(),
        None => raw.trim().to_string(),
    }
}

/// Find `Label : value` in colon-separated command output.
/// The label must match the whole key, so "IP Address" does not match
/// "IP Address Source".
pub fn labelled_value<'a>(text: &'a str, label: &str) -> Option<&'a str> {
    text.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim() == label)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

/// PRETTY_NAME from /etc/os-release, without quotes or a "(Core)" suffix
pub fn parse_os_pretty_name(os_release: &str) -> Option<String> {
    let raw = os_release
        .lines()
        .filter_map(|line| line.trim().strip_prefix("PRETTY_NAME="))
        .next()?;

    let name = raw.trim().trim_matches('"').replace("(Core)", "");
    let name = name.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// The first default route from `route -n`
pub fn parse_default_route(route_table: &str) -> Option<DefaultRoute> {
    route_table.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 || fields[0] != "0.0.0.0" || fields[2] != "0.0.0.0" {
            return None;
        }
        let gateway = fields[1].parse().ok()?;
        Some(DefaultRoute {
            gateway,
            interface: fields[fields.len() - 1].to_string(),
        })
    })
}

/// Addressing values read from `ifconfig -a <iface>`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceAddressing {
    pub ipv4: Option<Ipv4Cidr>,
    pub mac: Option<String>,
    pub mtu: Option<u32>,
}

/// Parse `ifconfig` output in both the net-tools 2.x layout
/// (`inet 10.0.0.5  netmask 255.255.255.0`, `ether ..`, `mtu 9000`) and the
/// legacy layout (`inet addr:..  Mask:..`, `HWaddr ..`, `MTU:1500`).
pub fn parse_ifconfig(output: &str) -> InterfaceAddressing {
    let tokens: Vec<&str> = output.split_whitespace().collect();
    let mut addr: Option<Ipv4Addr> = None;
    let mut mask: Option<u8> = None;
    let mut result = InterfaceAddressing::default();

    for (i, token) in tokens.iter().enumerate() {
        let next = tokens.get(i + 1).copied();
        match *token {
            "inet" if addr.is_none() => {
                addr = next
                    .map(|n| n.trim_start_matches("addr:"))
                    .and_then(|n| n.parse().ok());
            }
            "netmask" if mask.is_none() => mask = next.and_then(mask_to_prefix_length),
            "ether" | "HWaddr" if result.mac.is_none() => result.mac = next.and_then(parse_mac),
            "mtu" if result.mtu.is_none() => result.mtu = next.and_then(parse_number),
            t => {
                if let Some(m) = t.strip_prefix("Mask:") {
                    mask = mask.or_else(|| mask_to_prefix_length(m));
                } else if let Some(m) = t.strip_prefix("MTU:") {
                    result.mtu = result.mtu.or_else(|| parse_number(m));
                }
            }
        }
    }

    if let (Some(addr), Some(prefix_len)) = (addr, mask) {
        result.ipv4 = Ipv4Cidr::new(addr, prefix_len);
    }
    result
}

/// Link speed in Mb/s from `ethtool <iface>`; "Unknown!" yields `None`
pub fn parse_link_speed(ethtool: &str) -> Option<u32> {
    let raw = labelled_value(ethtool, "Speed")?;
    let re = regex_lite::Regex::new(r"^(\d+)\s*Mb/s$").ok()?;
    re.captures(raw)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// BMC LAN settings from `ipmitool lan print`
pub fn parse_ipmi_lan(output: &str) -> Option<BmcFact> {
    let addr = labelled_value(output, "IP Address")
        .and_then(|a| a.parse::<Ipv4Addr>().ok())
        .filter(|a| !a.is_unspecified());
    let prefix_len = labelled_value(output, "Subnet Mask").and_then(mask_to_prefix_length);
    let mac = labelled_value(output, "MAC Address").and_then(parse_mac);

    let ipv4 = match (addr, prefix_len) {
        (Some(addr), Some(prefix_len)) => Ipv4Cidr::new(addr, prefix_len),
        _ => None,
    };

    if ipv4.is_none() && mac.is_none() {
        return None;
    }
    Some(BmcFact { ipv4, mac })
}

/// (firmware revision, IPMI version) from `ipmitool mc info`
pub fn parse_mc_info(output: &str) -> (Option<String>, Option<String>) {
    (
        labelled_value(output, "Firmware Revision").map(str::to_string),
        labelled_value(output, "IPMI Version").map(str::to_string),
    )
}

/// Neighbor reported by `lldpcli show neighbors`.
///
/// The output has one block per local interface. Only the block heard on
/// `local_interface` counts; neighbors seen on other ports are ignored. The
/// first block is used only when blocks do not name their local interface.
pub fn parse_lldp_neighbors(output: &str, local_interface: Option<&str>) -> Option<LldpFact> {
    let mut blocks: Vec<String> = Vec::new();
    for line in output.lines() {
        if line.trim_start().starts_with("Interface:") {
            blocks.push(String::new());
        }
        if let Some(block) = blocks.last_mut() {
            block.push_str(line);
            block.push('\n');
        }
    }

    let neighbors: Vec<LldpFact> = blocks.iter().filter_map(|b| parse_lldp_block(b)).collect();

    match local_interface {
        Some(name) if neighbors.iter().any(|n| n.local_interface.is_some()) => neighbors
            .into_iter()
            .find(|n| n.local_interface.as_deref() == Some(name)),
        _ => neighbors.into_iter().next(),
    }
}

fn parse_lldp_block(block: &str) -> Option<LldpFact> {
    let local_interface = labelled_value(block, "Interface")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let neighbor_mac = labelled_value(block, "ChassisID")
        .and_then(|v| v.strip_prefix("mac "))
        .and_then(parse_mac);

    let neighbor_system_name = labelled_value(block, "SysName")?.to_string();

    // PortID carries a subtype word: "ifname Ethernet12/1", "local 17", "mac ..."
    let port_id = labelled_value(block, "PortID").and_then(|v| match v.split_once(' ') {
        Some(("mac", _)) => None,
        Some((_, port)) => Some(port.trim()),
        None => Some(v),
    });
    let neighbor_port = port_id
        .or_else(|| labelled_value(block, "PortDescr"))?
        .to_string();

    Some(LldpFact {
        local_interface,
        neighbor_mac,
        neighbor_system_name,
        neighbor_port,
    })
}

/// Maximum power supply capacity in watts from `dmidecode -t 39`
pub fn parse_power_capacity(output: &str) -> Option<u32> {
    output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .filter(|(key, _)| key.trim().ends_with("Power Capacity"))
        .find_map(|(_, value)| {
            let value = value.trim();
            let watts = value.strip_suffix('W').unwrap_or(value).trim();
            parse_number(watts)
        })
        .filter(|watts| *watts > 0)
}

/// "SKU Number" from `dmidecode -t 1`
pub fn parse_sku(output: &str) -> Option<String> {
    labelled_value(output, "SKU Number").and_then(parse_dmi_string)
}

/// (BIOS version, BIOS revision) from `dmidecode -t 0`
pub fn parse_bios(output: &str) -> (Option<String>, Option<String>) {
    (
        labelled_value(output, "Version").and_then(parse_dmi_string),
        labelled_value(output, "BIOS Revision").and_then(parse_dmi_string),
    )
}

/// Combine the separately collected firmware values
pub fn firmware_facts(dmi_type1: &str, dmi_type0: &str, mc_info: &str) -> FirmwareFacts {
    let (bios_version, bios_revision) = parse_bios(dmi_type0);
    let (bmc_firmware, bmc_version) = parse_mc_info(mc_info);
    FirmwareFacts {
        sku: parse_sku(dmi_type1),
        bios_version,
        bios_revision,
        bmc_firmware,
        bmc_version,
    }
}

/// Lowercased vendor of the first Ethernet controller in `lspci`
pub fn parse_nic_vendor(lspci: &str) -> Option<String> {
    let line = lspci
        .lines()
        .find(|l| l.to_lowercase().contains("ethernet controller"))?;
    let (_, rest) = line.split_once("controller:")?;
    rest.split_whitespace().next().map(str::to_lowercase)
}

/// PCI bus addresses (`0000:3b:00.0`) of network devices from
/// `lshw -class network -businfo`
pub fn parse_pci_buses(lshw: &str) -> Vec<String> {
    lshw.lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(|field| field.strip_prefix("pci@"))
        .map(str::to_string)
        .collect()
}

fn parse_mac(raw: &str) -> Option<String> {
    let hex: String = raw.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    if hex.len() != 12 || hex.chars().all(|c| c == '0') {
        return None;
    }
    Some(normalize_mac(raw))
}

fn parse_number(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}
