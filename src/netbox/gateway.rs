use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use super::types::*;
use super::{Endpoint, InventoryClient, InventoryError, Query};
use crate::utils::{normalize_mac, slugify};

/// Result of a get-or-create: the record, and whether this call created it
#[derive(Debug, Clone)]
pub struct Ensured<T> {
    pub record: T,
    pub created: bool,
}

impl<T> Ensured<T> {
    fn found(record: T) -> Self {
        Self { record, created: false }
    }

    fn created(record: T) -> Self {
        Self { record, created: true }
    }
}

/// Typed get-or-create / merge-patch operations over an [`InventoryClient`].
///
/// Nothing is cached: every lookup goes to the inventory service so that
/// concurrent hosts never act on a stale read.
#[derive(Clone)]
pub struct InventoryGateway {
    client: Arc<dyn InventoryClient>,
}

impl InventoryGateway {
    pub fn new(client: Arc<dyn InventoryClient>) -> Self {
        Self { client }
    }

    async fn find<T: DeserializeOwned>(&self, endpoint: Endpoint, query: &Query<'_>) -> Result<Option<T>, InventoryError> {
        match self.client.get(endpoint, query).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn find_all<T: DeserializeOwned>(&self, endpoint: Endpoint, query: &Query<'_>) -> Result<Vec<T>, InventoryError> {
        self.client
            .filter(endpoint, query)
            .await?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(InventoryError::from))
            .collect()
    }

    /// Look up by `key`; create from `fields` when absent. A conflict on
    /// create means another writer got there first, so the record is
    /// re-read and returned as found.
    async fn ensure<T, B>(&self, endpoint: Endpoint, key: &Query<'_>, fields: &B) -> Result<Ensured<T>, InventoryError>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        if let Some(existing) = self.find(endpoint, key).await? {
            return Ok(Ensured::found(existing));
        }

        match self.client.create(endpoint, serde_json::to_value(fields)?).await {
            Ok(value) => {
                tracing::info!("Created {} {:?}", endpoint, key);
                Ok(Ensured::created(serde_json::from_value(value)?))
            }
            Err(InventoryError::Conflict { endpoint, message }) => {
                tracing::debug!("{} {:?} created concurrently, re-reading", endpoint, key);
                match self.find(endpoint, key).await? {
                    Some(existing) => Ok(Ensured::found(existing)),
                    None => Err(InventoryError::Conflict { endpoint, message }),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn update<T, B>(&self, endpoint: Endpoint, id: i32, fields: &B) -> Result<T, InventoryError>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        let value = self.client.update(endpoint, id, serde_json::to_value(fields)?).await?;
        tracing::debug!("Updated {} #{}", endpoint, id);
        Ok(serde_json::from_value(value)?)
    }

    // --- Reference data ---

    async fn find_reference(&self, endpoint: Endpoint, name: &str) -> Result<Option<NbReference>, InventoryError> {
        self.find(endpoint, &[("name", name.to_string())]).await
    }

    pub async fn find_role(&self, name: &str) -> Result<Option<NbReference>, InventoryError> {
        self.find_reference(Endpoint::DeviceRoles, name).await
    }

    pub async fn find_platform(&self, name: &str) -> Result<Option<NbReference>, InventoryError> {
        self.find_reference(Endpoint::Platforms, name).await
    }

    pub async fn find_tenant(&self, name: &str) -> Result<Option<NbReference>, InventoryError> {
        self.find_reference(Endpoint::Tenants, name).await
    }

    pub async fn find_site(&self, name: &str) -> Result<Option<NbReference>, InventoryError> {
        self.find_reference(Endpoint::Sites, name).await
    }

    pub async fn find_rack(&self, name: &str, site_id: Option<i32>) -> Result<Option<NbRack>, InventoryError> {
        let mut query = vec![("name", name.to_string())];
        if let Some(site_id) = site_id {
            query.push(("site_id", site_id.to_string()));
        }
        self.find(Endpoint::Racks, &query).await
    }

    // --- Manufacturers / device types ---

    pub async fn ensure_manufacturer(&self, name: &str) -> Result<Ensured<NbManufacturer>, InventoryError> {
        let fields = ManufacturerFields {
            name: name.to_string(),
            slug: slugify(name),
        };
        require(Endpoint::Manufacturers, !fields.slug.is_empty(), "manufacturer name has no usable characters")?;
        self.ensure(Endpoint::Manufacturers, &[("name", fields.name.clone())], &fields)
            .await
    }

    pub async fn find_device_type(&self, model: &str) -> Result<Option<NbDeviceType>, InventoryError> {
        self.find(Endpoint::DeviceTypes, &[("model", model.to_string())]).await
    }

    pub async fn ensure_device_type(&self, model: &str, manufacturer_id: i32) -> Result<Ensured<NbDeviceType>, InventoryError> {
        let fields = DeviceTypeFields {
            manufacturer: manufacturer_id,
            model: model.to_string(),
            slug: slugify(model),
            u_height: 0,
            subdevice_role: "child".to_string(),
        };
        require(Endpoint::DeviceTypes, !fields.slug.is_empty(), "model has no usable characters")?;
        self.ensure(Endpoint::DeviceTypes, &[("model", fields.model.clone())], &fields)
            .await
    }

    // --- Devices ---

    pub async fn find_device_by_serial(&self, serial: &str) -> Result<Option<NbDevice>, InventoryError> {
        self.find(Endpoint::Devices, &[("serial", serial.to_string())]).await
    }

    pub async fn find_device_by_name(&self, name: &str) -> Result<Option<NbDevice>, InventoryError> {
        self.find(Endpoint::Devices, &[("name", name.to_string())]).await
    }

    pub async fn find_devices_by_asset_tag(&self, asset_tag: &str) -> Result<Vec<NbDevice>, InventoryError> {
        self.find_all(Endpoint::Devices, &[("asset_tag", asset_tag.to_string())])
            .await
    }

    /// Get-or-create a device keyed by name
    pub async fn ensure_device(&self, name: &str, fields: &DeviceFields) -> Result<Ensured<NbDevice>, InventoryError> {
        require(Endpoint::Devices, crate::utils::is_valid_hostname(name), "invalid device name")?;
        require(
            Endpoint::Devices,
            fields.role.is_some() && fields.device_type.is_some() && fields.site.is_some(),
            "role, device type and site are required",
        )?;
        let mut fields = fields.clone();
        fields.name = Some(name.to_string());
        self.ensure(Endpoint::Devices, &[("name", name.to_string())], &fields)
            .await
    }

    pub async fn update_device(&self, id: i32, fields: &DeviceFields) -> Result<NbDevice, InventoryError> {
        if let Some(tag) = &fields.asset_tag {
            require(Endpoint::Devices, !tag.trim().is_empty(), "empty asset tag")?;
        }
        self.update(Endpoint::Devices, id, fields).await
    }

    // --- Tags ---

    pub async fn ensure_tag(&self, name: &str, color: &str) -> Result<Ensured<NbTag>, InventoryError> {
        let fields = TagFields {
            name: name.to_string(),
            slug: slugify(name),
            color: color.to_string(),
        };
        require(
            Endpoint::Tags,
            fields.color.len() == 6 && fields.color.chars().all(|c| c.is_ascii_hexdigit()),
            "tag colour must be six hex digits",
        )?;
        self.ensure(Endpoint::Tags, &[("name", fields.name.clone())], &fields)
            .await
    }

    // --- Interfaces ---

    /// Get-or-create the interface `name` on `device_id`
    pub async fn ensure_interface(
        &self,
        device_id: i32,
        name: &str,
        fields: &InterfaceFields,
    ) -> Result<Ensured<NbInterface>, InventoryError> {
        require(Endpoint::Interfaces, !name.trim().is_empty(), "empty interface name")?;
        require(Endpoint::Interfaces, fields.iface_type.is_some(), "interface type is required")?;

        let mut fields = fields.clone();
        fields.device = Some(device_id);
        fields.name = Some(name.to_string());
        fields.mac_address = fields.mac_address.as_deref().map(normalize_mac);

        let key = [("device_id", device_id.to_string()), ("name", name.to_string())];
        self.ensure(Endpoint::Interfaces, &key, &fields).await
    }

    pub async fn update_interface(&self, id: i32, fields: &InterfaceFields) -> Result<NbInterface, InventoryError> {
        let mut fields = fields.clone();
        fields.mac_address = fields.mac_address.as_deref().map(normalize_mac);
        self.update(Endpoint::Interfaces, id, &fields).await
    }

    /// All interfaces on the device with the given name
    pub async fn find_interfaces_on_device(&self, device_name: &str) -> Result<Vec<NbInterface>, InventoryError> {
        self.find_all(Endpoint::Interfaces, &[("device", device_name.to_string())])
            .await
    }

    // --- IP addresses ---

    /// Get-or-create an address by its `a.b.c.d/len` form; `status` applies
    /// only when the address is created
    pub async fn ensure_ip_address(&self, address: &str, status: &str) -> Result<Ensured<NbIPAddress>, InventoryError> {
        require(Endpoint::IpAddresses, is_cidr(address), "address must be a.b.c.d/len")?;
        let fields = IpAddressFields {
            address: Some(address.to_string()),
            status: Some(status.to_string()),
            ..Default::default()
        };
        self.ensure(Endpoint::IpAddresses, &[("address", address.to_string())], &fields)
            .await
    }

    pub async fn update_ip_address(&self, id: i32, fields: &IpAddressFields) -> Result<NbIPAddress, InventoryError> {
        if let Some(address) = &fields.address {
            require(Endpoint::IpAddresses, is_cidr(address), "address must be a.b.c.d/len")?;
        }
        self.update(Endpoint::IpAddresses, id, fields).await
    }

    /// Assign an address to an interface unless it already is
    pub async fn assign_ip_address(&self, ip: &NbIPAddress, interface_id: i32) -> Result<bool, InventoryError> {
        if ip.is_assigned_to_interface(interface_id) {
            return Ok(false);
        }
        let fields = IpAddressFields {
            assigned_object_type: Some(INTERFACE_OBJECT_TYPE.to_string()),
            assigned_object_id: Some(interface_id),
            ..Default::default()
        };
        self.update_ip_address(ip.id, &fields).await?;
        Ok(true)
    }

    // --- Cables ---

    /// A cable joining the two interfaces, whichever side it was recorded from
    pub async fn find_cable_between(&self, a: i32, b: i32) -> Result<Option<NbCable>, InventoryError> {
        let query = |x: i32, y: i32| {
            [
                ("termination_a_type", INTERFACE_OBJECT_TYPE.to_string()),
                ("termination_a_id", x.to_string()),
                ("termination_b_type", INTERFACE_OBJECT_TYPE.to_string()),
                ("termination_b_id", y.to_string()),
            ]
        };

        if let Some(cable) = self.find(Endpoint::Cables, &query(a, b)).await? {
            return Ok(Some(cable));
        }
        self.find(Endpoint::Cables, &query(b, a)).await
    }

    pub async fn ensure_cable(&self, a: i32, b: i32) -> Result<Ensured<NbCable>, InventoryError> {
        require(Endpoint::Cables, a != b, "a cable needs two distinct interfaces")?;
        if let Some(existing) = self.find_cable_between(a, b).await? {
            return Ok(Ensured::found(existing));
        }

        let fields = CableFields {
            termination_a_type: INTERFACE_OBJECT_TYPE.to_string(),
            termination_a_id: a,
            termination_b_type: INTERFACE_OBJECT_TYPE.to_string(),
            termination_b_id: b,
        };
        match self.client.create(Endpoint::Cables, serde_json::to_value(&fields)?).await {
            Ok(value) => {
                tracing::info!("Created cable between interfaces {} and {}", a, b);
                Ok(Ensured::created(serde_json::from_value(value)?))
            }
            Err(InventoryError::Conflict { endpoint, message }) => match self.find_cable_between(a, b).await? {
                Some(existing) => Ok(Ensured::found(existing)),
                None => Err(InventoryError::Conflict { endpoint, message }),
            },
            Err(e) => Err(e),
        }
    }

    // --- Device bays ---

    pub async fn ensure_device_bay(&self, parent_id: i32, name: &str) -> Result<Ensured<NbDeviceBay>, InventoryError> {
        require(Endpoint::DeviceBays, !name.trim().is_empty(), "empty bay name")?;
        let fields = DeviceBayFields {
            device: Some(parent_id),
            name: Some(name.to_string()),
            installed_device: None,
        };
        let key = [("device_id", parent_id.to_string()), ("name", name.to_string())];
        self.ensure(Endpoint::DeviceBays, &key, &fields).await
    }

    pub async fn update_device_bay(&self, id: i32, fields: &DeviceBayFields) -> Result<NbDeviceBay, InventoryError> {
        self.update(Endpoint::DeviceBays, id, fields).await
    }

    // --- Power ports ---

    pub async fn ensure_power_port(&self, device_id: i32, name: &str) -> Result<Ensured<NbPowerPort>, InventoryError> {
        let fields = PowerPortFields {
            device: Some(device_id),
            name: Some(name.to_string()),
            ..Default::default()
        };
        let key = [("device_id", device_id.to_string()), ("name", name.to_string())];
        self.ensure(Endpoint::PowerPorts, &key, &fields).await
    }

    pub async fn update_power_port(&self, id: i32, fields: &PowerPortFields) -> Result<NbPowerPort, InventoryError> {
        if let (Some(max), Some(allocated)) = (fields.maximum_draw, fields.allocated_draw) {
            require(Endpoint::PowerPorts, allocated <= max, "allocated draw exceeds maximum draw")?;
        }
        self.update(Endpoint::PowerPorts, id, fields).await
    }
}

fn require(endpoint: Endpoint, ok: bool, message: &str) -> Result<(), InventoryError> {
    if ok {
        Ok(())
    } else {
        Err(InventoryError::Invalid {
            endpoint,
            message: message.to_string(),
        })
    }
}

fn is_cidr(address: &str) -> bool {
    match address.split_once('/') {
        Some((ip, len)) => crate::utils::is_valid_ipv4(ip) && len.parse::<u8>().map_or(false, |l| l <= 32),
        None => false,
    }
}
