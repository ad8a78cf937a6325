//! In-memory collaborators for reconciler tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use rolesync_common::{AuthorizationDocument, Role};
use rolesync_core::discovery::{DiscoveryError, DiscoveryResult, RoleDiscovery};
use rolesync_core::kubernetes::{
    ClusterAuthClient, ClusterError, ClusterResult, StoredDocument, UpsertAction,
};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

pub const ACCOUNT: &str = "123456789012";

/// Role with user access to each of `clusters`
pub fn user_role(name: &str, clusters: &[&str], username: &str, groups: &str) -> Role {
    clusters.iter().fold(Role::new(name).with_path("/eks/"), |role, cluster| {
        role.with_tag(format!("eks/{}/type", cluster), "user")
            .with_tag(format!("eks/{}/username", cluster), username)
            .with_tag(format!("eks/{}/groups", cluster), groups)
    })
}

pub fn node_role(name: &str, cluster: &str) -> Role {
    Role::new(name)
        .with_path("/eks/")
        .with_tag(format!("eks/{}/type", cluster), "node")
}

/// Discovery serving a fixed role list, or failing
pub struct FakeDiscovery {
    roles: Vec<Role>,
    fail: bool,
}

impl FakeDiscovery {
    pub fn new(roles: Vec<Role>) -> Self {
        Self { roles, fail: false }
    }

    pub fn failing() -> Self {
        Self {
            roles: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl RoleDiscovery for FakeDiscovery {
    async fn account_id(&self) -> DiscoveryResult<String> {
        Ok(ACCOUNT.to_string())
    }

    fn fetch_roles<'a>(&'a self, _path_prefix: &'a str) -> BoxStream<'a, DiscoveryResult<Role>> {
        if self.fail {
            return stream::iter(vec![Err(DiscoveryError::Provider {
                operation: "iam:ListRoles",
                message: "AccessDenied".to_string(),
            })])
            .boxed();
        }

        stream::iter(self.roles.clone().into_iter().map(Ok)).boxed()
    }
}

/// Clusters held in memory, with per-cluster failure and delay injection
#[derive(Default)]
pub struct FakeClusters {
    documents: Mutex<HashMap<String, StoredDocument>>,
    failing: HashSet<String>,
    slow: HashMap<String, Duration>,
    gets: Mutex<HashMap<String, usize>>,
    puts: Mutex<HashMap<String, usize>>,
}

impl FakeClusters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes to `cluster` are rejected
    pub fn failing_on(mut self, cluster: &str) -> Self {
        self.failing.insert(cluster.to_string());
        self
    }

    /// Reads from `cluster` take `delay`
    pub fn slow_on(mut self, cluster: &str, delay: Duration) -> Self {
        self.slow.insert(cluster.to_string(), delay);
        self
    }

    /// Seed `cluster` with an already stored object
    pub fn with_stored(self, cluster: &str, stored: StoredDocument) -> Self {
        self.documents
            .lock()
            .unwrap()
            .insert(cluster.to_string(), stored);
        self
    }

    pub fn document(&self, cluster: &str) -> Option<AuthorizationDocument> {
        self.stored(cluster).map(|stored| stored.document)
    }

    pub fn stored(&self, cluster: &str) -> Option<StoredDocument> {
        self.documents.lock().unwrap().get(cluster).cloned()
    }

    pub fn gets(&self, cluster: &str) -> usize {
        self.gets.lock().unwrap().get(cluster).copied().unwrap_or(0)
    }

    pub fn puts(&self, cluster: &str) -> usize {
        self.puts.lock().unwrap().get(cluster).copied().unwrap_or(0)
    }

    /// Reads and writes across all clusters
    pub fn calls(&self) -> usize {
        self.gets.lock().unwrap().values().sum::<usize>()
            + self.puts.lock().unwrap().values().sum::<usize>()
    }
}

#[async_trait]
impl ClusterAuthClient for FakeClusters {
    async fn get_authorization_document(
        &self,
        cluster: &str,
    ) -> ClusterResult<Option<StoredDocument>> {
        *self
            .gets
            .lock()
            .unwrap()
            .entry(cluster.to_string())
            .or_default() += 1;
        if let Some(delay) = self.slow.get(cluster) {
            tokio::time::sleep(*delay).await;
        }
        Ok(self.stored(cluster))
    }

    async fn write_authorization_document(
        &self,
        cluster: &str,
        document: &AuthorizationDocument,
        exists: bool,
    ) -> ClusterResult<UpsertAction> {
        *self
            .puts
            .lock()
            .unwrap()
            .entry(cluster.to_string())
            .or_default() += 1;

        if self.failing.contains(cluster) {
            return Err(ClusterError::Apply {
                cluster: cluster.to_string(),
                reason: "Forbidden (403): configmaps \"aws-auth\" is forbidden".to_string(),
            });
        }

        let mut documents = self.documents.lock().unwrap();
        // The API server rejects a create over an existing object and a replace of a missing one
        if documents.contains_key(cluster) != exists {
            return Err(ClusterError::Apply {
                cluster: cluster.to_string(),
                reason: format!("write with exists={} did not match the cluster", exists),
            });
        }
        documents.insert(
            cluster.to_string(),
            StoredDocument {
                document: document.clone(),
                exact: true,
            },
        );

        Ok(if exists {
            UpsertAction::Replaced
        } else {
            UpsertAction::Created
        })
    }
}
