//! Per-cluster error types
//!
//! Every variant is scoped to one cluster: the reconciler records it and
//! carries on with the remaining clusters.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    /// Cluster description, token issuance or client construction failed
    #[error("Failed to connect to cluster '{cluster}': {reason}")]
    Connect { cluster: String, reason: String },

    /// Reading or writing the aws-auth ConfigMap failed
    #[error("Failed to apply aws-auth on cluster '{cluster}': {reason}")]
    Apply { cluster: String, reason: String },

    /// The apply step ran out of time
    #[error("Cluster '{cluster}' did not finish within {secs}s")]
    Timeout { cluster: String, secs: u64 },

    /// The mapping set could not be serialized into a document
    #[error("Invalid aws-auth document for cluster '{cluster}': {reason}")]
    InvalidDocument { cluster: String, reason: String },
}

impl ClusterError {
    pub fn connect(cluster: &str, reason: impl std::fmt::Display) -> Self {
        Self::Connect {
            cluster: cluster.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn apply(cluster: &str, err: kube::Error) -> Self {
        let reason = match &err {
            kube::Error::Api(response) => {
                format!("{} ({}): {}", response.reason, response.code, response.message)
            }
            other => other.to_string(),
        };

        Self::Apply {
            cluster: cluster.to_string(),
            reason,
        }
    }

    pub fn cluster(&self) -> &str {
        match self {
            Self::Connect { cluster, .. }
            | Self::Apply { cluster, .. }
            | Self::Timeout { cluster, .. }
            | Self::InvalidDocument { cluster, .. } => cluster,
        }
    }
}

pub type ClusterResult<T> = std::result::Result<T, ClusterError>;
