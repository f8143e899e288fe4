use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Reconciliation steps, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Collect,
    Preconditions,
    Identity,
    DeviceType,
    ParentLinkage,
    DeviceAttributes,
    PrimaryInterface,
    Cable,
    BmcInterface,
    CustomFields,
    Power,
}

impl Step {
    /// Steps run against the inventory once facts are collected
    pub const SEQUENCE: [Step; 10] = [
        Step::Preconditions,
        Step::Identity,
        Step::DeviceType,
        Step::ParentLinkage,
        Step::DeviceAttributes,
        Step::PrimaryInterface,
        Step::Cable,
        Step::BmcInterface,
        Step::CustomFields,
        Step::Power,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Collect => "collect",
            Step::Preconditions => "preconditions",
            Step::Identity => "identity",
            Step::DeviceType => "device_type",
            Step::ParentLinkage => "parent_linkage",
            Step::DeviceAttributes => "device_attributes",
            Step::PrimaryInterface => "primary_interface",
            Step::Cable => "cable",
            Step::BmcInterface => "bmc_interface",
            Step::CustomFields => "custom_fields",
            Step::Power => "power",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a step was skipped without failing the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The inventory already holds conflicting data
    Conflict,
    /// A fact the step depends on was not discovered
    Absent,
    /// The inventory rejected a request
    Failed,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::Conflict => "conflict",
            SkipReason::Absent => "absent",
            SkipReason::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedStep {
    pub step: Step,
    pub reason: SkipReason,
    pub detail: String,
}

/// Why a host was abandoned
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum AbortReason {
    #[error("missing {kind} '{name}'")]
    MissingReference { kind: String, name: String },

    #[error("host unreachable: {message}")]
    Unreachable { message: String },

    #[error("no system serial number discovered")]
    MissingSerial,

    #[error("inventory unreachable: {message}")]
    Transport { message: String },

    #[error("timed out: {message}")]
    Timeout { message: String },

    #[error("inventory error: {message}")]
    Inventory { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Terminal outcome for one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HostOutcome {
    Success,
    /// The serial was already recorded on a first-provision run; nothing done
    AlreadyProvisioned { device_id: i32 },
    PartialSuccess { skipped_steps: Vec<SkippedStep> },
    Abort { step: Option<Step>, reason: AbortReason },
}

impl HostOutcome {
    pub fn is_abort(&self) -> bool {
        matches!(self, HostOutcome::Abort { .. })
    }

    /// Short outcome class used in reports
    pub fn class(&self) -> &'static str {
        match self {
            HostOutcome::Success => "success",
            HostOutcome::AlreadyProvisioned { .. } => "already_provisioned",
            HostOutcome::PartialSuccess { .. } => "partial",
            HostOutcome::Abort { .. } => "abort",
        }
    }

    pub fn skipped(&self, step: Step) -> Option<&SkippedStep> {
        match self {
            HostOutcome::PartialSuccess { skipped_steps } => skipped_steps.iter().find(|s| s.step == step),
            _ => None,
        }
    }
}

impl fmt::Display for HostOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostOutcome::Success => write!(f, "success"),
            HostOutcome::AlreadyProvisioned { device_id } => {
                write!(f, "already provisioned (device #{})", device_id)
            }
            HostOutcome::PartialSuccess { skipped_steps } => {
                let steps: Vec<String> = skipped_steps
                    .iter()
                    .map(|s| format!("{} [{}: {}]", s.step, s.reason, s.detail))
                    .collect();
                write!(f, "partial, skipped {}", steps.join("; "))
            }
            HostOutcome::Abort { step: Some(step), reason } => write!(f, "abort at {}: {}", step, reason),
            HostOutcome::Abort { step: None, reason } => write!(f, "abort: {}", reason),
        }
    }
}

/// A record created while reconciling a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedRecord {
    pub kind: String,
    pub key: String,
}

/// Outcome plus every record the run created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub outcome: HostOutcome,
    pub created: Vec<CreatedRecord>,
}

impl Reconciliation {
    pub fn aborted(step: Option<Step>, reason: AbortReason) -> Self {
        Self {
            outcome: HostOutcome::Abort { step, reason },
            created: Vec::new(),
        }
    }
}
