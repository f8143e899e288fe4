//! In-memory stand-ins for NetBox and remote hosts used by unit tests.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::executor::{ExecError, HostExecutor};
use crate::facts::HostTarget;
use crate::netbox::{Endpoint, InventoryClient, InventoryError, Query};

/// Fields stored as `{value, label}` choices
const CHOICE_FIELDS: &[&str] = &["status", "type"];

/// Keys copied into nested references, as NetBox's brief serializers do
const NESTED_KEYS: &[&str] = &["name", "model", "slug", "address", "display"];

fn reference_target(key: &str) -> Option<Endpoint> {
    Some(match key {
        "manufacturer" => Endpoint::Manufacturers,
        "device_type" => Endpoint::DeviceTypes,
        "role" => Endpoint::DeviceRoles,
        "platform" => Endpoint::Platforms,
        "tenant" => Endpoint::Tenants,
        "site" => Endpoint::Sites,
        "rack" => Endpoint::Racks,
        "device" | "installed_device" => Endpoint::Devices,
        "primary_ip4" => Endpoint::IpAddresses,
        "tags" => Endpoint::Tags,
        "cable" => Endpoint::Cables,
        _ => return None,
    })
}

fn unique_keys(endpoint: Endpoint) -> &'static [&'static [&'static str]] {
    match endpoint {
        Endpoint::DeviceTypes => &[&["model"]],
        Endpoint::Devices => &[&["name"], &["asset_tag"]],
        Endpoint::Interfaces | Endpoint::DeviceBays | Endpoint::PowerPorts => &[&["device", "name"]],
        Endpoint::IpAddresses => &[&["address"]],
        Endpoint::Cables => &[],
        _ => &[&["name"]],
    }
}

fn scalar_eq(value: &Value, want: &str) -> bool {
    match value {
        Value::String(s) => s == want,
        Value::Number(n) => n.to_string() == want,
        Value::Bool(b) => b.to_string() == want,
        _ => false,
    }
}

fn value_matches(value: &Value, want: &str) -> bool {
    match value {
        Value::Object(map) => ["name", "model", "address", "value", "id"]
            .iter()
            .any(|k| map.get(*k).map_or(false, |v| scalar_eq(v, want))),
        Value::Array(items) => items.iter().any(|v| value_matches(v, want)),
        other => scalar_eq(other, want),
    }
}

/// NetBox filter semantics: `key=value`, or `<ref>_id=<id>` against a nested reference
fn record_matches(record: &Value, key: &str, want: &str) -> bool {
    if let Some(value) = record.get(key) {
        return value_matches(value, want);
    }
    match key.strip_suffix("_id").and_then(|base| record.get(base)) {
        Some(nested) => nested.get("id").map_or(false, |id| scalar_eq(id, want)),
        None => false,
    }
}

/// Comparable form of one unique-key component; null never collides
fn key_part(record: &Map<String, Value>, field: &str) -> Option<String> {
    match record.get(field)? {
        Value::Null => None,
        Value::Object(nested) => nested.get("id").map(|id| id.to_string()),
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[derive(Default)]
struct State {
    next_id: i64,
    tables: HashMap<Endpoint, Vec<Value>>,
    creates: usize,
    blind: HashMap<Endpoint, usize>,
    failures: HashMap<Endpoint, fn() -> InventoryError>,
}

impl State {
    fn table(&self, endpoint: Endpoint) -> &[Value] {
        self.tables.get(&endpoint).map(Vec::as_slice).unwrap_or_default()
    }

    fn get(&self, endpoint: Endpoint, id: i64) -> Option<&Value> {
        self.table(endpoint).iter().find(|r| r["id"] == id)
    }

    fn get_mut(&mut self, endpoint: Endpoint, id: i64) -> Option<&mut Value> {
        self.tables.get_mut(&endpoint)?.iter_mut().find(|r| r["id"] == id)
    }

    fn nested(&self, endpoint: Endpoint, id: i64) -> Value {
        let mut nested = Map::new();
        nested.insert("id".to_string(), json!(id));
        if let Some(record) = self.get(endpoint, id) {
            for key in NESTED_KEYS {
                if let Some(value) = record.get(*key) {
                    nested.insert(key.to_string(), value.clone());
                }
            }
        }
        Value::Object(nested)
    }

    /// Replace id references with nested objects and choice strings with `{value, label}`
    fn expand(&self, fields: Map<String, Value>) -> Map<String, Value> {
        fields
            .into_iter()
            .map(|(key, value)| {
                let expanded = match (reference_target(&key), value) {
                    (Some(target), Value::Array(ids)) => Value::Array(
                        ids.into_iter()
                            .map(|id| match id.as_i64() {
                                Some(id) => self.nested(target, id),
                                None => id,
                            })
                            .collect(),
                    ),
                    (Some(target), Value::Number(id)) => match id.as_i64() {
                        Some(id) => self.nested(target, id),
                        None => Value::Number(id),
                    },
                    (None, Value::String(choice)) if CHOICE_FIELDS.contains(&key.as_str()) => {
                        json!({"value": choice, "label": choice})
                    }
                    (_, value) => value,
                };
                (key, expanded)
            })
            .collect()
    }

    fn check_unique(&self, endpoint: Endpoint, candidate: &Map<String, Value>, own_id: Option<i64>) -> Result<(), InventoryError> {
        for fields in unique_keys(endpoint) {
            let key: Option<Vec<String>> = fields.iter().map(|f| key_part(candidate, f)).collect();
            let Some(key) = key else { continue };

            let clash = self.table(endpoint).iter().any(|record| {
                let Some(existing) = record.as_object() else { return false };
                own_id.map_or(true, |id| record["id"] != id)
                    && fields.iter().map(|f| key_part(existing, f)).collect::<Option<Vec<_>>>() == Some(key.clone())
            });
            if clash {
                return Err(InventoryError::Conflict {
                    endpoint,
                    message: format!("{} with this {} already exists.", endpoint, fields.join(", ")),
                });
            }
        }
        Ok(())
    }

    fn insert(&mut self, endpoint: Endpoint, body: Value) -> Result<Value, InventoryError> {
        let fields = match body {
            Value::Object(fields) => fields,
            other => {
                return Err(InventoryError::Api {
                    status: 400,
                    message: format!("expected an object, got {}", other),
                })
            }
        };
        let mut record = self.expand(fields);
        self.check_unique(endpoint, &record, None)?;

        let defaults: Vec<(&str, Value)> = match endpoint {
            Endpoint::Devices => vec![
                ("serial", json!("")),
                ("asset_tag", Value::Null),
                ("tags", json!([])),
                ("custom_fields", json!({})),
                ("primary_ip4", Value::Null),
            ],
            Endpoint::Interfaces => vec![("cable", Value::Null)],
            Endpoint::DeviceBays => vec![("installed_device", Value::Null)],
            Endpoint::PowerPorts => vec![("maximum_draw", Value::Null), ("allocated_draw", Value::Null)],
            _ => Vec::new(),
        };
        for (key, value) in defaults {
            record.entry(key.to_string()).or_insert(value);
        }

        self.next_id += 1;
        let id = self.next_id;
        record.insert("id".to_string(), json!(id));
        let record = Value::Object(record);
        self.tables.entry(endpoint).or_default().push(record.clone());

        if endpoint == Endpoint::Cables {
            for side in ["termination_a_id", "termination_b_id"] {
                if let Some(iface) = record[side].as_i64().and_then(|i| self.get_mut(Endpoint::Interfaces, i)) {
                    iface["cable"] = json!({"id": id});
                }
            }
        }
        Ok(record)
    }

    fn patch(&mut self, endpoint: Endpoint, id: i64, body: Value) -> Result<Value, InventoryError> {
        let fields = body.as_object().cloned().unwrap_or_default();
        let expanded = self.expand(fields);
        let current = self.get(endpoint, id).cloned().ok_or(InventoryError::NotFound {
            endpoint,
            id: id.to_string(),
        })?;

        let mut merged = current.as_object().cloned().unwrap_or_default();
        for (key, value) in expanded {
            if key == "custom_fields" {
                if let (Some(Value::Object(existing)), Value::Object(update)) = (merged.get_mut(&key), &value) {
                    existing.extend(update.clone());
                    continue;
                }
            }
            merged.insert(key, value);
        }
        self.check_unique(endpoint, &merged, Some(id))?;

        let merged = Value::Object(merged);
        if let Some(slot) = self.get_mut(endpoint, id) {
            *slot = merged.clone();
        }
        Ok(merged)
    }
}

/// In-memory [`InventoryClient`] with NetBox-like filtering, nested
/// references, unique keys and cable/interface linkage
#[derive(Default)]
pub struct MemoryInventory {
    state: Mutex<State>,
    latency: Option<Duration>,
}

impl MemoryInventory {
    /// Every call sleeps for `latency` before answering
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Default::default()
        }
    }

    /// Insert a record directly, returning its id
    pub fn seed(&self, endpoint: Endpoint, fields: Value) -> i32 {
        let record = self
            .state
            .lock()
            .unwrap()
            .insert(endpoint, fields)
            .expect("seed record");
        record["id"].as_i64().expect("seeded id") as i32
    }

    pub fn records(&self, endpoint: Endpoint) -> Vec<Value> {
        self.state.lock().unwrap().table(endpoint).to_vec()
    }

    /// First record whose `key` matches `value`
    pub fn find(&self, endpoint: Endpoint, key: &str, value: &str) -> Option<Value> {
        self.records(endpoint)
            .into_iter()
            .find(|r| record_matches(r, key, value))
    }

    /// Number of successful creates, seeds excluded
    pub fn creates(&self) -> usize {
        self.state.lock().unwrap().creates
    }

    /// The next `count` lookups on `endpoint` return nothing, as if another
    /// writer created the record just after we looked
    pub fn blind_lookups(&self, endpoint: Endpoint, count: usize) {
        self.state.lock().unwrap().blind.insert(endpoint, count);
    }

    /// Every call on `endpoint` fails with `make()`
    pub fn fail_endpoint(&self, endpoint: Endpoint, make: fn() -> InventoryError) {
        self.state.lock().unwrap().failures.insert(endpoint, make);
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn failure(&self, endpoint: Endpoint) -> Option<InventoryError> {
        self.state.lock().unwrap().failures.get(&endpoint).map(|make| make())
    }
}

#[async_trait]
impl InventoryClient for MemoryInventory {
    async fn filter(&self, endpoint: Endpoint, query: &Query<'_>) -> Result<Vec<Value>, InventoryError> {
        self.pause().await;
        if let Some(err) = self.failure(endpoint) {
            return Err(err);
        }

        let mut state = self.state.lock().unwrap();
        if let Some(remaining) = state.blind.get_mut(&endpoint) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(Vec::new());
            }
        }
        Ok(state
            .table(endpoint)
            .iter()
            .filter(|record| query.iter().all(|(key, want)| record_matches(record, key, want)))
            .cloned()
            .collect())
    }

    async fn create(&self, endpoint: Endpoint, body: Value) -> Result<Value, InventoryError> {
        self.pause().await;
        if let Some(err) = self.failure(endpoint) {
            return Err(err);
        }

        let mut state = self.state.lock().unwrap();
        let record = state.insert(endpoint, body)?;
        state.creates += 1;
        Ok(record)
    }

    async fn update(&self, endpoint: Endpoint, id: i32, body: Value) -> Result<Value, InventoryError> {
        self.pause().await;
        if let Some(err) = self.failure(endpoint) {
            return Err(err);
        }
        self.state.lock().unwrap().patch(endpoint, i64::from(id), body)
    }
}

/// [`HostExecutor`] answering from a command -> output script
#[derive(Default)]
pub struct ScriptedExecutor {
    /// `None` scripts a command that exits non-zero
    outputs: HashMap<String, Option<String>>,
    unreachable_all: bool,
    unreachable_hosts: HashSet<String>,
    log: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    /// Every host refuses connections
    pub fn unreachable() -> Self {
        Self {
            unreachable_all: true,
            ..Default::default()
        }
    }

    pub fn with(mut self, command: &str, output: &str) -> Self {
        self.outputs.insert(command.to_string(), Some(output.to_string()));
        self
    }

    pub fn failing(mut self, command: &str) -> Self {
        self.outputs.insert(command.to_string(), None);
        self
    }

    pub fn unreachable_host(mut self, name: &str) -> Self {
        self.unreachable_hosts.insert(name.to_string());
        self
    }

    pub fn commands_run(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl HostExecutor for ScriptedExecutor {
    async fn execute(&self, host: &HostTarget, command: &str, _timeout: Duration) -> Result<String, ExecError> {
        self.log.lock().unwrap().push(command.to_string());

        if self.unreachable_all || self.unreachable_hosts.contains(&host.name) {
            return Err(ExecError::Unreachable {
                host: host.name.clone(),
                reason: "connection refused".to_string(),
            });
        }

        match self.outputs.get(command) {
            Some(Some(output)) => Ok(output.clone()),
            Some(None) => Err(ExecError::Command {
                command: command.to_string(),
                message: "exit status 1".to_string(),
            }),
            None => Err(ExecError::Command {
                command: command.to_string(),
                message: "exit status 127: command not found".to_string(),
            }),
        }
    }
}

/// A QCT multi-node server `node-01` in bay NODE-A of chassis `CHS0001`,
/// uplinked to `leaf-01` Ethernet12/1
pub mod fixtures {
    use super::*;
    use crate::facts::{BmcFact, DefaultRoute, FirmwareFacts, HostFacts, Ipv4Cidr, LldpFact, NicFact, SystemFacts};
    use std::sync::Arc;

    pub const OS_RELEASE: &str = r#"NAME="CentOS Linux"
VERSION="7 (Core)"
ID="centos"
PRETTY_NAME="CentOS Linux 7 (Core)"
"#;

    pub const ROUTE_N: &str = "\
Kernel IP routing table
Destination     Gateway         Genmask         Flags Metric Ref    Use Iface
0.0.0.0         10.40.12.1      0.0.0.0         UG    0      0        0 eno1
10.40.12.0      0.0.0.0         255.255.252.0   U     0      0        0 eno1
";

    pub const IFCONFIG_ENO1: &str = "\
eno1: flags=4163<UP,BROADCAST,RUNNING,MULTICAST>  mtu 9000
        inet 10.40.12.31  netmask 255.255.252.0  broadcast 10.40.15.255
        inet6 fe80::ec4:7aff:feaa:bb01  prefixlen 64  scopeid 0x20<link>
        ether 0c:c4:7a:aa:bb:01  txqueuelen 1000  (Ethernet)
";

    pub const ETHTOOL_ENO1: &str = "\
Settings for eno1:
\tSupported ports: [ FIBRE ]
\tSpeed: 25000Mb/s
\tDuplex: Full
\tLink detected: yes
";

    pub const IPMI_LAN: &str = "\
Set in Progress         : Set Complete
IP Address Source       : DHCP Address
IP Address              : 10.50.3.17
Subnet Mask             : 255.255.255.0
MAC Address             : 0c:c4:7a:aa:bb:ff
Default Gateway IP      : 10.50.3.1
";

    pub const MC_INFO: &str = "\
Device ID                 : 32
Device Revision           : 1
Firmware Revision         : 1.73
IPMI Version              : 2.0
Manufacturer ID           : 7244
";

    pub const LLDP: &str = "\
-------------------------------------------------------------------------------
LLDP neighbors:
-------------------------------------------------------------------------------
Interface:    eno1, via: LLDP, RID: 1, Time: 12 days, 01:02:03
  Chassis:
    ChassisID:    mac 00:1c:73:11:22:33
    SysName:      leaf-01
  Port:
    PortID:       ifname Ethernet12/1
    PortDescr:    node-01 eno1
-------------------------------------------------------------------------------
";

    pub const DMI_39: &str = "\
Handle 0x0040, DMI type 39, 22 bytes
System Power Supply
\tPower Unit Group: 1
\tLocation: PSU1
\tMax Power Capacity: 800 W
";

    pub const DMI_1: &str = "\
Handle 0x0001, DMI type 1, 27 bytes
System Information
\tManufacturer: Quanta Cloud Technology
\tProduct Name: QuantaPlex T42D-2U
\tSKU Number: 2U4N-GPU
";

    pub const DMI_0: &str = "\
Handle 0x0000, DMI type 0, 24 bytes
BIOS Information
\tVendor: American Megatrends Inc.
\tVersion: 3A10.Q402
\tRelease Date: 01/02/2020
\tBIOS Revision: 5.14
";

    /// Executor answering every collection command for `node-01` (with sudo)
    pub fn node_executor() -> ScriptedExecutor {
        ScriptedExecutor::default()
            .with("sudo dmidecode -s system-manufacturer", "Quanta Cloud Technology\n")
            .with("sudo dmidecode -s system-product-name", "QuantaPlex T42D-2U\n")
            .with("sudo dmidecode -s system-serial-number", "QTF0001\n")
            .with("sudo dmidecode -s chassis-serial-number", "CHS0001\n")
            .with("sudo dmidecode -s baseboard-asset-tag", "100234\n")
            .with("sudo dmidecode -s chassis-asset-tag", "Default string\n")
            .with("cat /etc/os-release", OS_RELEASE)
            .with("route -n", ROUTE_N)
            .with("ifconfig -a eno1", IFCONFIG_ENO1)
            .with("ethtool eno1", ETHTOOL_ENO1)
            .with("sudo ipmitool lan print", IPMI_LAN)
            .with("sudo ipmitool mc info", MC_INFO)
            .with("sudo lldpcli show neighbors", LLDP)
            .with("sudo dmidecode -t 39", DMI_39)
            .with("sudo dmidecode -t 1", DMI_1)
            .with("sudo dmidecode -t 0", DMI_0)
    }

    /// The facts `node_executor` yields
    pub fn node_facts() -> HostFacts {
        let cidr = |a: [u8; 4], len: u8| Ipv4Cidr::new(a.into(), len);
        HostFacts {
            target: HostTarget::new("node-01", "10.40.12.31"),
            system: SystemFacts {
                manufacturer: Some("Quanta Cloud Technology".to_string()),
                product: Some("QuantaPlex T42D-2U".to_string()),
                serial: Some("QTF0001".to_string()),
                chassis_serial: Some("CHS0001".to_string()),
                baseboard_asset_tag: Some("100234".to_string()),
                chassis_asset_tag: None,
                os_pretty_name: Some("CentOS Linux 7".to_string()),
            },
            route: Some(DefaultRoute {
                gateway: [10, 40, 12, 1].into(),
                interface: "eno1".to_string(),
            }),
            network: vec![NicFact {
                name: "eno1".to_string(),
                ipv4: cidr([10, 40, 12, 31], 22),
                mac: Some("0c:c4:7a:aa:bb:01".to_string()),
                link_speed: Some(25000),
                mtu: Some(9000),
            }],
            bmc: Some(BmcFact {
                ipv4: cidr([10, 50, 3, 17], 24),
                mac: Some("0c:c4:7a:aa:bb:ff".to_string()),
            }),
            lldp: Some(LldpFact {
                local_interface: Some("eno1".to_string()),
                neighbor_mac: Some("00:1c:73:11:22:33".to_string()),
                neighbor_system_name: "leaf-01".to_string(),
                neighbor_port: "Ethernet12/1".to_string(),
            }),
            power_capacity: Some(800),
            firmware: FirmwareFacts {
                sku: Some("2U4N-GPU".to_string()),
                bios_version: Some("3A10.Q402".to_string()),
                bios_revision: Some("5.14".to_string()),
                bmc_firmware: Some("1.73".to_string()),
                bmc_version: Some("2.0".to_string()),
            },
        }
    }

    /// Reference data plus chassis `chassis-01` (serial CHS0001, empty bay
    /// NODE-A) and switch `leaf-01` with ports Ethernet12/1 and Ethernet12/2
    pub fn seeded_inventory() -> Arc<MemoryInventory> {
        seed_reference_data(MemoryInventory::default())
    }

    /// [`seeded_inventory`] where every inventory call takes `latency`
    pub fn slow_inventory(latency: Duration) -> Arc<MemoryInventory> {
        seed_reference_data(MemoryInventory::with_latency(latency))
    }

    fn seed_reference_data(inventory: MemoryInventory) -> Arc<MemoryInventory> {
        let role = inventory.seed(Endpoint::DeviceRoles, json!({"name": "server", "slug": "server"}));
        inventory.seed(Endpoint::Platforms, json!({"name": "linux", "slug": "linux"}));
        inventory.seed(Endpoint::Tenants, json!({"name": "HWE", "slug": "hwe"}));
        let site = inventory.seed(Endpoint::Sites, json!({"name": "Lab", "slug": "lab"}));
        let rack = inventory.seed(Endpoint::Racks, json!({"name": "0102", "site": site}));

        let chassis = inventory.seed(
            Endpoint::Devices,
            json!({"name": "chassis-01", "serial": "CHS0001", "role": role, "site": site, "rack": rack}),
        );
        inventory.seed(Endpoint::DeviceBays, json!({"name": "NODE-A", "device": chassis}));

        let leaf = inventory.seed(
            Endpoint::Devices,
            json!({"name": "leaf-01", "serial": "SW0001", "site": site, "rack": rack}),
        );
        for port in ["Ethernet12/1", "Ethernet12/2"] {
            inventory.seed(
                Endpoint::Interfaces,
                json!({"name": port, "device": leaf, "type": "25gbase-x-sfp28"}),
            );
        }
        Arc::new(inventory)
    }
}
