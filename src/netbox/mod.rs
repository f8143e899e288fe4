pub mod client;
pub mod gateway;
pub mod types;

pub use client::NetBoxClient;
pub use gateway::{Ensured, InventoryGateway};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// NetBox collections the reconciler reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Endpoint {
    Manufacturers,
    DeviceTypes,
    DeviceRoles,
    Platforms,
    Tenants,
    Sites,
    Racks,
    Devices,
    DeviceBays,
    Interfaces,
    IpAddresses,
    Cables,
    PowerPorts,
    Tags,
}

impl Endpoint {
    /// API path below `/api`
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Manufacturers => "/dcim/manufacturers/",
            Endpoint::DeviceTypes => "/dcim/device-types/",
            Endpoint::DeviceRoles => "/dcim/device-roles/",
            Endpoint::Platforms => "/dcim/platforms/",
            Endpoint::Tenants => "/tenancy/tenants/",
            Endpoint::Sites => "/dcim/sites/",
            Endpoint::Racks => "/dcim/racks/",
            Endpoint::Devices => "/dcim/devices/",
            Endpoint::DeviceBays => "/dcim/device-bays/",
            Endpoint::Interfaces => "/dcim/interfaces/",
            Endpoint::IpAddresses => "/ipam/ip-addresses/",
            Endpoint::Cables => "/dcim/cables/",
            Endpoint::PowerPorts => "/dcim/power-ports/",
            Endpoint::Tags => "/extras/tags/",
        }
    }

    /// Human-readable record kind for logs and errors
    pub fn kind(&self) -> &'static str {
        match self {
            Endpoint::Manufacturers => "manufacturer",
            Endpoint::DeviceTypes => "device type",
            Endpoint::DeviceRoles => "device role",
            Endpoint::Platforms => "platform",
            Endpoint::Tenants => "tenant",
            Endpoint::Sites => "site",
            Endpoint::Racks => "rack",
            Endpoint::Devices => "device",
            Endpoint::DeviceBays => "device bay",
            Endpoint::Interfaces => "interface",
            Endpoint::IpAddresses => "IP address",
            Endpoint::Cables => "cable",
            Endpoint::PowerPorts => "power port",
            Endpoint::Tags => "tag",
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

/// Errors returned by an inventory backend
#[derive(Debug, Error)]
pub enum InventoryError {
    /// NetBox could not be reached
    #[error("NetBox request failed: {0}")]
    Transport(String),

    #[error("NetBox request timed out: {0}")]
    Timeout(String),

    /// A record with the same unique key already exists
    #[error("{endpoint} already exists: {message}")]
    Conflict { endpoint: Endpoint, message: String },

    #[error("{endpoint} not found: {id}")]
    NotFound { endpoint: Endpoint, id: String },

    #[error("NetBox API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Response body did not match the expected record shape
    #[error("Unexpected NetBox payload: {0}")]
    Decode(String),

    /// Fields were rejected before being sent
    #[error("Invalid {endpoint} fields: {message}")]
    Invalid { endpoint: Endpoint, message: String },
}

impl InventoryError {
    /// Transport-level failures; the service itself never answered
    pub fn is_transient(&self) -> bool {
        matches!(self, InventoryError::Transport(_) | InventoryError::Timeout(_))
    }
}

impl From<reqwest::Error> for InventoryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            InventoryError::Timeout(err.to_string())
        } else if err.is_decode() {
            InventoryError::Decode(err.to_string())
        } else {
            InventoryError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for InventoryError {
    fn from(err: serde_json::Error) -> Self {
        InventoryError::Decode(err.to_string())
    }
}

/// Query parameters for a filtered list, e.g. `[("device_id", "12"), ("name", "eno1")]`
pub type Query<'a> = [(&'a str, String)];

/// Untyped CRUD access to the inventory service. Record typing and
/// get-or-create policy live in [`InventoryGateway`].
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// All records matching every query parameter
    async fn filter(&self, endpoint: Endpoint, query: &Query<'_>) -> Result<Vec<Value>, InventoryError>;

    /// Create a record; a unique-key collision is `InventoryError::Conflict`
    async fn create(&self, endpoint: Endpoint, body: Value) -> Result<Value, InventoryError>;

    /// Merge-patch an existing record; fields not in `body` are untouched
    async fn update(&self, endpoint: Endpoint, id: i32, body: Value) -> Result<Value, InventoryError>;

    /// First record matching the query, if any
    async fn get(&self, endpoint: Endpoint, query: &Query<'_>) -> Result<Option<Value>, InventoryError> {
        Ok(self.filter(endpoint, query).await?.into_iter().next())
    }
}
