use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use uuid::Uuid;

use crate::facts::HostTarget;
use crate::reconcile::{AbortReason, CreatedRecord, HostOutcome, Reconciler};

/// Result of reconciling one host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostReport {
    pub ip: String,
    #[serde(flatten)]
    pub outcome: HostOutcome,
    pub created: Vec<CreatedRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Host counts per outcome class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetSummary {
    pub success: usize,
    pub already_provisioned: usize,
    pub partial: usize,
    pub aborted: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub hosts: BTreeMap<String, HostReport>,
}

impl FleetReport {
    pub fn summary(&self) -> FleetSummary {
        let mut summary = FleetSummary::default();
        for report in self.hosts.values() {
            match report.outcome {
                HostOutcome::Success => summary.success += 1,
                HostOutcome::AlreadyProvisioned { .. } => summary.already_provisioned += 1,
                HostOutcome::PartialSuccess { .. } => summary.partial += 1,
                HostOutcome::Abort { .. } => summary.aborted += 1,
            }
        }
        summary
    }

    pub fn has_aborts(&self) -> bool {
        self.hosts.values().any(|r| r.outcome.is_abort())
    }

    pub fn outcome(&self, host: &str) -> Option<&HostOutcome> {
        self.hosts.get(host).map(|r| &r.outcome)
    }
}

impl fmt::Display for FleetReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.hosts.keys().map(String::len).max().unwrap_or(4).max(4);
        writeln!(f, "{:<width$}  {:<16}  {:<8}  {}", "HOST", "IP", "CREATED", "OUTCOME", width = width)?;
        for (host, report) in &self.hosts {
            writeln!(
                f,
                "{:<width$}  {:<16}  {:<8}  {}",
                host,
                report.ip,
                report.created.len(),
                report.outcome,
                width = width
            )?;
        }

        let summary = self.summary();
        write!(
            f,
            "\n{} host(s): {} success, {} already provisioned, {} partial, {} aborted ({}s)",
            self.hosts.len(),
            summary.success,
            summary.already_provisioned,
            summary.partial,
            summary.aborted,
            (self.finished_at - self.started_at).num_seconds()
        )
    }
}

/// Runs the reconciler once per host, `concurrency` hosts at a time.
/// A concurrency of 1 reconciles hosts strictly one after another.
pub struct FleetDriver {
    reconciler: Arc<Reconciler>,
    concurrency: usize,
    host_timeout: Option<Duration>,
}

impl FleetDriver {
    pub fn new(reconciler: Arc<Reconciler>, concurrency: usize, host_timeout: Option<Duration>) -> Self {
        Self {
            reconciler,
            concurrency: concurrency.max(1),
            host_timeout,
        }
    }

    pub async fn run(&self, targets: Vec<HostTarget>) -> FleetReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::info!(
            "Fleet run {} starting: {} host(s), concurrency {}",
            run_id,
            targets.len(),
            self.concurrency
        );

        let mut seen = HashSet::new();
        let targets: Vec<HostTarget> = targets
            .into_iter()
            .filter(|t| {
                let first = seen.insert(t.name.clone());
                if !first {
                    tracing::warn!("Ignoring duplicate host entry {}", t.name);
                }
                first
            })
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut set = JoinSet::new();

        for target in targets.iter().cloned() {
            let semaphore = semaphore.clone();
            let reconciler = self.reconciler.clone();
            let host_timeout = self.host_timeout;

            set.spawn(async move {
                // Hold the permit until this host is finished
                let _permit = semaphore.acquire_owned().await.ok();
                let started_at = Utc::now();
                let deadline = host_timeout.map(|t| Instant::now() + t);

                let result = reconciler.reconcile_host(&target, deadline).await;
                let report = HostReport {
                    ip: target.ip.clone(),
                    outcome: result.outcome,
                    created: result.created,
                    started_at,
                    finished_at: Utc::now(),
                };
                (target.name, report)
            });
        }

        let mut hosts = BTreeMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((name, report)) => {
                    tracing::info!(
                        "{}: {} in {}s",
                        name,
                        report.outcome.class(),
                        (report.finished_at - report.started_at).num_seconds()
                    );
                    hosts.insert(name, report);
                }
                Err(e) => tracing::error!("Reconciliation task failed: {}", e),
            }
        }

        // A task that panicked never reported back
        for target in &targets {
            hosts.entry(target.name.clone()).or_insert_with(|| HostReport {
                ip: target.ip.clone(),
                outcome: HostOutcome::Abort {
                    step: None,
                    reason: AbortReason::Internal {
                        message: "reconciliation task failed".to_string(),
                    },
                },
                created: Vec::new(),
                started_at,
                finished_at: Utc::now(),
            });
        }

        let report = FleetReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            hosts,
        };
        let summary = report.summary();
        tracing::info!(
            "Fleet run {} finished: {} success, {} already provisioned, {} partial, {} aborted",
            run_id,
            summary.success,
            summary.already_provisioned,
            summary.partial,
            summary.aborted
        );
        report
    }
}
