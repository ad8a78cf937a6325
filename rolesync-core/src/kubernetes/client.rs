//! EKS cluster client
//!
//! Builds a kube-rs Client per cluster from its endpoint, CA and a bearer
//! token, and implements [`ClusterAuthClient`] on top of it.

use super::auth_document;
use super::credentials::{ClusterDescriber, ClusterEndpoint, TokenIssuer};
use super::error::{ClusterError, ClusterResult};
use super::{ClusterAuthClient, StoredDocument, UpsertAction};
use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use rolesync_common::AuthorizationDocument;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Cluster auth client for EKS clusters
pub struct EksClusterAuthClient {
    describer: Arc<dyn ClusterDescriber>,
    tokens: Arc<dyn TokenIssuer>,
    /// Clients connected during this run, indexed by cluster id
    sessions: Mutex<HashMap<String, Client>>,
}

impl EksClusterAuthClient {
    pub fn new(describer: Arc<dyn ClusterDescriber>, tokens: Arc<dyn TokenIssuer>) -> Self {
        Self {
            describer,
            tokens,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Connect to a cluster, reusing the client if this run already connected
    pub async fn connect(&self, cluster: &str) -> ClusterResult<Client> {
        if let Some(client) = self.sessions.lock().await.get(cluster) {
            return Ok(client.clone());
        }

        let endpoint = self.describer.describe(cluster).await?;
        let token = self.tokens.issue_token(cluster).await?;
        let kubeconfig = build_kubeconfig(cluster, &endpoint, &token)?;

        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| ClusterError::connect(cluster, format!("Failed to create config: {}", e)))?;

        let client = Client::try_from(config)
            .map_err(|e| ClusterError::connect(cluster, format!("Failed to create client: {}", e)))?;

        info!(cluster, api_server = %endpoint.endpoint, "Connected to cluster");

        self.sessions
            .lock()
            .await
            .insert(cluster.to_string(), client.clone());

        Ok(client)
    }
}

#[async_trait]
impl ClusterAuthClient for EksClusterAuthClient {
    async fn get_authorization_document(
        &self,
        cluster: &str,
    ) -> ClusterResult<Option<StoredDocument>> {
        let client = self.connect(cluster).await?;
        let stored = auth_document::read_auth_document(&client)
            .await
            .map_err(|e| ClusterError::apply(cluster, e))?;

        debug!(
            cluster,
            found = stored.is_some(),
            exact = stored.as_ref().is_some_and(|s| s.exact),
            "Read aws-auth"
        );
        Ok(stored)
    }

    async fn write_authorization_document(
        &self,
        cluster: &str,
        document: &AuthorizationDocument,
        exists: bool,
    ) -> ClusterResult<UpsertAction> {
        let client = self.connect(cluster).await?;
        auth_document::write_auth_document(&client, document, exists)
            .await
            .map_err(|e| ClusterError::apply(cluster, e))
    }
}

impl std::fmt::Debug for EksClusterAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EksClusterAuthClient").finish_non_exhaustive()
    }
}

/// In-memory kubeconfig with a single context for `cluster`
pub fn build_kubeconfig(
    cluster: &str,
    endpoint: &ClusterEndpoint,
    token: &str,
) -> ClusterResult<Kubeconfig> {
    let document = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Config",
        "current-context": cluster,
        "clusters": [{
            "name": cluster,
            "cluster": {
                "server": endpoint.endpoint,
                "certificate-authority-data": endpoint.certificate_authority_data,
            },
        }],
        "users": [{
            "name": cluster,
            "user": { "token": token },
        }],
        "contexts": [{
            "name": cluster,
            "context": { "cluster": cluster, "user": cluster },
        }],
    });

    serde_json::from_value(document)
        .map_err(|e| ClusterError::connect(cluster, format!("Failed to build kubeconfig: {}", e)))
}
