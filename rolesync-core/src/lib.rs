//! Rolesync core library
//!
//! Discovers IAM roles tagged with cluster access metadata, derives the
//! Kubernetes identity each role should have in each EKS cluster, and writes
//! the resulting `aws-auth` document to every cluster.

pub mod config;
pub mod discovery;
pub mod kubernetes;
pub mod logging;
pub mod mapping;
pub mod reconciler;

pub use config::{ConfigError, RolesyncConfig};
pub use discovery::{DiscoveryError, IamRoleDiscovery, RoleDiscovery};
pub use kubernetes::{
    ClusterAuthClient, ClusterError, EksClusterAuthClient, StoredDocument, UpsertAction,
};
pub use reconciler::{
    ClusterApplyStatus, ClusterOutcome, MappingPlan, Phase, ReconcileError, ReconcileReport,
    ReconcileSettings, Reconciler, RunStatus,
};
