//! Kubernetes side of reconciliation
//!
//! - Cluster credentials (EKS describe + bearer token)
//! - Per-cluster kube-rs clients
//! - aws-auth ConfigMap read / create / replace

pub mod auth_document;
pub mod client;
pub mod credentials;
pub mod error;

use async_trait::async_trait;
use rolesync_common::AuthorizationDocument;
use serde::{Deserialize, Serialize};

pub use client::EksClusterAuthClient;
pub use credentials::{AwsCliTokenIssuer, ClusterDescriber, ClusterEndpoint, EksClusterDescriber, TokenIssuer};
pub use error::{ClusterError, ClusterResult};

/// What a write did to the cluster's document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertAction {
    Created,
    Replaced,
    /// Stored object already matched; nothing was written
    Unchanged,
}

impl std::fmt::Display for UpsertAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Replaced => write!(f, "replaced"),
            Self::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Authorization document as found on a cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub document: AuthorizationDocument,
    /// The stored object holds nothing a write would change besides the
    /// payload: no other data keys, the managed-by label, no annotations
    pub exact: bool,
}

impl StoredDocument {
    /// Whether writing `document` would leave the stored object as it is
    pub fn matches(&self, document: &AuthorizationDocument) -> bool {
        self.exact && self.document == *document
    }
}

/// Read/write access to each cluster's authorization document
#[async_trait]
pub trait ClusterAuthClient: Send + Sync {
    /// Current document, or `None` when the cluster has none yet
    async fn get_authorization_document(&self, cluster: &str)
        -> ClusterResult<Option<StoredDocument>>;

    /// Write the full document: create it when `exists` is false, replace it
    /// wholesale otherwise. `exists` comes from a preceding read.
    async fn write_authorization_document(
        &self,
        cluster: &str,
        document: &AuthorizationDocument,
        exists: bool,
    ) -> ClusterResult<UpsertAction>;

    /// Create the document if absent, otherwise replace it entirely
    async fn put_authorization_document(
        &self,
        cluster: &str,
        document: &AuthorizationDocument,
    ) -> ClusterResult<UpsertAction> {
        let exists = self.get_authorization_document(cluster).await?.is_some();
        self.write_authorization_document(cluster, document, exists)
            .await
    }
}
