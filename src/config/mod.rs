use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Config holds all application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub netbox_url: String,
    pub netbox_token: String,
    pub netbox_timeout_secs: u64,
    pub ssh_user: String,
    pub ssh_pass: String,
    pub ssh_port: u16,
    pub ssh_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub host_timeout_secs: u64,
    pub fleet_concurrency: usize,
    pub policy: ReconcilePolicy,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn load() -> Self {
        let defaults = ReconcilePolicy::default();
        Self {
            netbox_url: get_env("NETBOX_URL", ""),
            netbox_token: get_env("NETBOX_TOKEN", ""),
            netbox_timeout_secs: get_env("NETBOX_TIMEOUT_SECS", "30").parse().unwrap_or(30),
            ssh_user: get_env("SSH_USER", ""),
            ssh_pass: get_env("SSH_PASS", ""),
            ssh_port: get_env("SSH_PORT", "22").parse().unwrap_or(22),
            ssh_timeout_secs: get_env("SSH_TIMEOUT_SECS", "30").parse().unwrap_or(30),
            command_timeout_secs: get_env("COMMAND_TIMEOUT_SECS", "60").parse().unwrap_or(60),
            host_timeout_secs: get_env("HOST_TIMEOUT_SECS", "900").parse().unwrap_or(900),
            fleet_concurrency: get_env("FLEET_CONCURRENCY", "1").parse().unwrap_or(1),
            policy: ReconcilePolicy {
                role: get_env("PROVISION_ROLE", &defaults.role),
                status: get_env("PROVISION_STATUS", &defaults.status),
                platform: get_env("PROVISION_PLATFORM", &defaults.platform),
                tenant: get_env("PROVISION_TENANT", &defaults.tenant),
                site: get_env_opt("PROVISION_SITE"),
                rack: get_env_opt("PROVISION_RACK"),
                default_bay: get_env("PROVISION_BAY", &defaults.default_bay),
                use_sudo: parse_bool(&get_env("USE_SUDO", "true")),
                enable_lldp: parse_bool(&get_env("ENABLE_LLDP", "false")),
                sku_field: get_env("PROVISION_SKU_FIELD", &defaults.sku_field),
                ..defaults
            },
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn host_timeout(&self) -> Duration {
        Duration::from_secs(self.host_timeout_secs)
    }
}

/// Whether a device whose serial is already recorded is left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileMode {
    /// First provisioning: a known serial means the host is already done
    Provision,
    /// Re-sync every attribute of already provisioned hosts
    Refresh,
}

/// Names and constants that steer a reconciliation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilePolicy {
    pub role: String,
    pub status: String,
    pub platform: String,
    pub tenant: String,
    /// Site for devices without a parent chassis
    pub site: Option<String>,
    /// Rack for devices without a parent chassis
    pub rack: Option<String>,
    /// Device bay used when a host target does not name one
    pub default_bay: String,
    pub mode: ReconcileMode,
    pub use_sudo: bool,
    pub enable_lldp: bool,
    /// Allocated draw is maximum draw divided by this
    pub power_derate_divisor: u32,
    pub bmc_interface: String,
    pub bmc_interface_type: String,
    pub bmc_mtu: u32,
    pub primary_ip_status: String,
    pub bmc_ip_status: String,
    pub tag_color: String,
    /// Custom field that receives the board SKU
    pub sku_field: String,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            role: "server".to_string(),
            status: "active".to_string(),
            platform: "linux".to_string(),
            tenant: "HWE".to_string(),
            site: None,
            rack: None,
            default_bay: "NODE-A".to_string(),
            mode: ReconcileMode::Provision,
            use_sudo: true,
            enable_lldp: false,
            power_derate_divisor: 4,
            bmc_interface: "bmc".to_string(),
            bmc_interface_type: "1000base-t".to_string(),
            bmc_mtu: 1500,
            primary_ip_status: "reserved".to_string(),
            bmc_ip_status: "dhcp".to_string(),
            tag_color: "808080".to_string(),
            sku_field: "ebay_sku".to_string(),
        }
    }
}

fn get_env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn get_env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
