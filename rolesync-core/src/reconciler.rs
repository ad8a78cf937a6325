//! Reconciliation run
//!
//! Discovering -> Building -> Applying -> Done | PartialFailure | Failed.
//! Discovery and building are all-or-nothing; applying is isolated per cluster.

use crate::config::RolesyncConfig;
use crate::discovery::{self, DiscoveryError, RoleDiscovery};
use crate::kubernetes::{ClusterAuthClient, ClusterError, ClusterResult, UpsertAction};
use crate::mapping;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rolesync_common::{AuthorizationDocument, ClusterMappingSet, TagIntegrityError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Run-level knobs, usually derived from [`RolesyncConfig`]
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub path_prefix: String,
    /// Clusters applied at once; 0 is treated as 1
    pub concurrency: usize,
    /// Bound on discovery plus building
    pub plan_timeout: Duration,
    /// Bound on one cluster's read and write
    pub cluster_timeout: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self::from(&RolesyncConfig::default())
    }
}

impl From<&RolesyncConfig> for ReconcileSettings {
    fn from(config: &RolesyncConfig) -> Self {
        Self {
            path_prefix: config.discovery.path_prefix.clone(),
            concurrency: config.apply.concurrency,
            plan_timeout: config.timeouts.plan(),
            cluster_timeout: config.timeouts.cluster_apply(),
        }
    }
}

/// Reconciliation phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Discovering,
    Building,
    Applying,
    Done,
    PartialFailure,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Discovering => write!(f, "Discovering"),
            Phase::Building => write!(f, "Building"),
            Phase::Applying => write!(f, "Applying"),
            Phase::Done => write!(f, "Done"),
            Phase::PartialFailure => write!(f, "PartialFailure"),
            Phase::Failed => write!(f, "Failed"),
        }
    }
}

/// Errors that end a run before any cluster is touched
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Role discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Invalid role tags: {0}")]
    TagIntegrity(#[from] TagIntegrityError),

    #[error("Discovery and mapping did not finish within {0}s")]
    PlanTimeout(u64),
}

/// Everything discovered and built, before anything is written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingPlan {
    pub account_id: String,
    pub role_count: usize,
    /// Mapping sets keyed by cluster id
    pub clusters: BTreeMap<String, ClusterMappingSet>,
}

impl MappingPlan {
    pub fn mapping_count(&self) -> usize {
        self.clusters.values().map(ClusterMappingSet::len).sum()
    }
}

/// Result of applying one cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ClusterApplyStatus {
    Created,
    Replaced,
    Unchanged,
    Failed { error: String },
}

impl ClusterApplyStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl From<UpsertAction> for ClusterApplyStatus {
    fn from(action: UpsertAction) -> Self {
        match action {
            UpsertAction::Created => Self::Created,
            UpsertAction::Replaced => Self::Replaced,
            UpsertAction::Unchanged => Self::Unchanged,
        }
    }
}

impl fmt::Display for ClusterApplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Replaced => write!(f, "replaced"),
            Self::Unchanged => write!(f, "unchanged"),
            Self::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterOutcome {
    pub cluster: String,
    pub mappings: usize,
    #[serde(flatten)]
    pub status: ClusterApplyStatus,
}

/// Per-cluster results of one apply, ordered by cluster id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub clusters: Vec<ClusterOutcome>,
}

impl ReconcileReport {
    pub fn failed_clusters(&self) -> Vec<String> {
        self.clusters
            .iter()
            .filter(|outcome| outcome.status.is_failed())
            .map(|outcome| outcome.cluster.clone())
            .collect()
    }

    pub fn status(&self) -> RunStatus {
        let failed = self.failed_clusters();
        if failed.is_empty() {
            RunStatus::Done
        } else {
            RunStatus::PartialFailure { failed }
        }
    }
}

/// Terminal state of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum RunStatus {
    Done,
    PartialFailure { failed: Vec<String> },
    Failed { error: String },
}

impl RunStatus {
    pub fn failed(err: &ReconcileError) -> Self {
        Self::Failed {
            error: err.to_string(),
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            Self::Done => Phase::Done,
            Self::PartialFailure { .. } => Phase::PartialFailure,
            Self::Failed { .. } => Phase::Failed,
        }
    }

    /// Process exit code: 0 done, 1 failed, 2 partial failure
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Done => 0,
            Self::Failed { .. } => 1,
            Self::PartialFailure { .. } => 2,
        }
    }
}

/// Drives one reconciliation run against injected collaborators
pub struct Reconciler {
    discovery: Arc<dyn RoleDiscovery>,
    clusters: Arc<dyn ClusterAuthClient>,
    settings: ReconcileSettings,
}

impl Reconciler {
    pub fn new(
        discovery: Arc<dyn RoleDiscovery>,
        clusters: Arc<dyn ClusterAuthClient>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            discovery,
            clusters,
            settings,
        }
    }

    /// Discover roles and build every cluster's mapping set without contacting any cluster
    pub async fn plan(&self) -> Result<MappingPlan, ReconcileError> {
        let result = tokio::time::timeout(self.settings.plan_timeout, self.discover_and_build())
            .await
            .unwrap_or_else(|_| Err(ReconcileError::PlanTimeout(self.settings.plan_timeout.as_secs())));

        if let Err(e) = &result {
            error!(error = %e, "Reconciliation aborted before apply");
            crate::log_phase!(Phase::Failed);
        }

        result
    }

    async fn discover_and_build(&self) -> Result<MappingPlan, ReconcileError> {
        crate::log_phase!(Phase::Discovering, path_prefix = self.settings.path_prefix.as_str());

        let account_id = self.discovery.account_id().await?;
        let roles =
            discovery::collect_roles(self.discovery.as_ref(), &self.settings.path_prefix).await?;

        crate::log_phase!(Phase::Building, roles = roles.len());

        let clusters = mapping::group_mappings(&account_id, &roles)?;

        Ok(MappingPlan {
            account_id,
            role_count: roles.len(),
            clusters,
        })
    }

    /// Write every cluster's document. Failures are recorded per cluster and never retried.
    pub async fn apply(&self, plan: &MappingPlan) -> ReconcileReport {
        let started_at = Utc::now();
        crate::log_phase!(Phase::Applying, clusters = plan.clusters.len());

        let mut clusters: Vec<ClusterOutcome> = stream::iter(plan.clusters.values())
            .map(|set| self.apply_cluster(set))
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;
        clusters.sort_by(|a, b| a.cluster.cmp(&b.cluster));

        let report = ReconcileReport {
            started_at,
            finished_at: Utc::now(),
            clusters,
        };

        let status = report.status();
        crate::log_phase!(status.phase(), failed = report.failed_clusters().len());

        report
    }

    /// Plan, then apply
    pub async fn run(&self) -> Result<ReconcileReport, ReconcileError> {
        let plan = self.plan().await?;
        Ok(self.apply(&plan).await)
    }

    async fn apply_cluster(&self, set: &ClusterMappingSet) -> ClusterOutcome {
        let timeout = self.settings.cluster_timeout;
        let result = tokio::time::timeout(timeout, self.upsert_cluster(set))
            .await
            .unwrap_or_else(|_| {
                Err(ClusterError::Timeout {
                    cluster: set.cluster.clone(),
                    secs: timeout.as_secs(),
                })
            });

        let status = match result {
            Ok(action) => {
                info!(cluster = %set.cluster, mappings = set.len(), action = %action, "Applied aws-auth");
                action.into()
            }
            Err(e) => {
                warn!(cluster = %set.cluster, error = %e, "Cluster apply failed");
                ClusterApplyStatus::Failed {
                    error: e.to_string(),
                }
            }
        };

        ClusterOutcome {
            cluster: set.cluster.clone(),
            mappings: set.len(),
            status,
        }
    }

    async fn upsert_cluster(&self, set: &ClusterMappingSet) -> ClusterResult<UpsertAction> {
        let cluster = set.cluster.as_str();
        let document = AuthorizationDocument::from_mapping_set(set).map_err(|e| {
            ClusterError::InvalidDocument {
                cluster: cluster.to_string(),
                reason: e.to_string(),
            }
        })?;

        let current = self.clusters.get_authorization_document(cluster).await?;
        if current.as_ref().is_some_and(|stored| stored.matches(&document)) {
            return Ok(UpsertAction::Unchanged);
        }

        self.clusters
            .write_authorization_document(cluster, &document, current.is_some())
            .await
    }
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(cluster: &str, status: ClusterApplyStatus) -> ClusterOutcome {
        ClusterOutcome {
            cluster: cluster.to_string(),
            mappings: 1,
            status,
        }
    }

    fn report(clusters: Vec<ClusterOutcome>) -> ReconcileReport {
        let now = Utc::now();
        ReconcileReport {
            started_at: now,
            finished_at: now,
            clusters,
        }
    }

    #[test]
    fn test_report_status() {
        let done = report(vec![
            outcome("a", ClusterApplyStatus::Created),
            outcome("b", ClusterApplyStatus::Unchanged),
        ]);
        assert_eq!(done.status(), RunStatus::Done);
        assert_eq!(done.status().exit_code(), 0);

        let partial = report(vec![
            outcome("a", ClusterApplyStatus::Replaced),
            outcome(
                "b",
                ClusterApplyStatus::Failed {
                    error: "forbidden".to_string(),
                },
            ),
        ]);
        assert_eq!(
            partial.status(),
            RunStatus::PartialFailure {
                failed: vec!["b".to_string()]
            }
        );
        assert_eq!(partial.status().exit_code(), 2);
    }

    #[test]
    fn test_empty_report_is_done() {
        assert_eq!(report(Vec::new()).status(), RunStatus::Done);
    }

    #[test]
    fn test_failed_exit_code() {
        let status = RunStatus::failed(&ReconcileError::PlanTimeout(120));
        assert_eq!(status.exit_code(), 1);
        assert_eq!(status.phase(), Phase::Failed);
    }

    #[test]
    fn test_outcome_serializes_flat() {
        let value = serde_json::to_value(outcome(
            "b",
            ClusterApplyStatus::Failed {
                error: "boom".to_string(),
            },
        ))
        .unwrap();

        assert_eq!(value["cluster"], "b");
        assert_eq!(value["status"], "failed");
        assert_eq!(value["error"], "boom");
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = RolesyncConfig::default();
        config.apply.concurrency = 9;
        config.timeouts.cluster_apply_secs = 5;

        let settings = ReconcileSettings::from(&config);
        assert_eq!(settings.concurrency, 9);
        assert_eq!(settings.cluster_timeout, Duration::from_secs(5));
        assert_eq!(settings.path_prefix, "/eks/");
    }
}
