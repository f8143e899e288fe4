use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// NetBox sends `null` for unset strings such as the name of an unnamed device
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// --- NetBox API types ---

#[derive(Debug, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub count: i32,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NestedRef {
    pub id: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub display: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChoice {
    pub value: String,
    pub label: String,
}

/// Role, platform, tenant or site: anything referenced purely by name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NbReference {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NbRack {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub site: Option<NestedRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NbManufacturer {
    pub id: i32,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NbDeviceType {
    pub id: i32,
    pub model: String,
    pub slug: String,
    #[serde(default)]
    pub manufacturer: Option<NestedRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NbDevice {
    pub id: i32,
    pub name: Option<String>,
    #[serde(default)]
    pub device_type: Option<NestedRef>,
    #[serde(default)]
    pub role: Option<NestedRef>,
    #[serde(default)]
    pub site: Option<NestedRef>,
    #[serde(default)]
    pub rack: Option<NestedRef>,
    #[serde(default)]
    pub platform: Option<NestedRef>,
    #[serde(default)]
    pub tenant: Option<NestedRef>,
    #[serde(default)]
    pub status: Option<StatusChoice>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub serial: String,
    #[serde(default)]
    pub asset_tag: Option<String>,
    #[serde(default)]
    pub primary_ip4: Option<NbIPAddress>,
    #[serde(default)]
    pub tags: Vec<NestedRef>,
    #[serde(default)]
    pub custom_fields: Option<HashMap<String, serde_json::Value>>,
}

impl NbDevice {
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| format!("device #{}", self.id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NbInterface {
    pub id: i32,
    pub name: String,
    #[serde(rename = "type", default)]
    pub iface_type: Option<StatusChoice>,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub mtu: Option<u32>,
    #[serde(default)]
    pub device: Option<NestedRef>,
    #[serde(default)]
    pub cable: Option<NestedRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NbIPAddress {
    pub id: i32,
    pub address: String,
    #[serde(default)]
    pub display: Option<String>,
    #[serde(default)]
    pub status: Option<StatusChoice>,
    #[serde(default)]
    pub assigned_object_type: Option<String>,
    #[serde(default)]
    pub assigned_object_id: Option<i32>,
}

impl NbIPAddress {
    pub fn is_assigned_to_interface(&self, interface_id: i32) -> bool {
        self.assigned_object_type.as_deref() == Some(INTERFACE_OBJECT_TYPE)
            && self.assigned_object_id == Some(interface_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NbCable {
    pub id: i32,
    #[serde(default)]
    pub termination_a_type: Option<String>,
    #[serde(default)]
    pub termination_a_id: Option<i32>,
    #[serde(default)]
    pub termination_b_type: Option<String>,
    #[serde(default)]
    pub termination_b_id: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NbDeviceBay {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub device: Option<NestedRef>,
    #[serde(default)]
    pub installed_device: Option<NestedRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NbPowerPort {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub device: Option<NestedRef>,
    #[serde(default)]
    pub maximum_draw: Option<u32>,
    #[serde(default)]
    pub allocated_draw: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NbTag {
    pub id: i32,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub color: String,
}

/// `assigned_object_type` / cable termination type for device interfaces
pub const INTERFACE_OBJECT_TYPE: &str = "dcim.interface";

// --- Create / patch request types ---
//
// Every optional field is skipped when `None`, so the same struct serves as a
// create body and as a merge-patch that leaves unmentioned fields alone.

#[derive(Debug, Clone, Serialize)]
pub struct ManufacturerFields {
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceTypeFields {
    pub manufacturer: i32,
    pub model: String,
    pub slug: String,
    pub u_height: u32,
    pub subdevice_role: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rack: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<i32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_ip4: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_fields: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InterfaceFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub iface_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IpAddressFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_object_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_object_id: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CableFields {
    pub termination_a_type: String,
    pub termination_a_id: i32,
    pub termination_b_type: String,
    pub termination_b_id: i32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceBayFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed_device: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PowerPortFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum_draw: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocated_draw: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagFields {
    pub name: String,
    pub slug: String,
    pub color: String,
}

// --- Sync result ---

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncCounts {
    pub created: i32,
    pub existing: i32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}
