//! Common types shared between rolesync-core and rolesync-cli

pub mod tags;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use tags::{ClusterAccess, RoleType, TagField, TagIntegrityError};

/// Name of the ConfigMap the EKS authenticator reads role mappings from
pub const AUTH_CONFIGMAP_NAME: &str = "aws-auth";

/// Namespace holding the authenticator ConfigMap
pub const AUTH_CONFIGMAP_NAMESPACE: &str = "kube-system";

/// ConfigMap data key holding the serialized role mappings
pub const MAP_ROLES_KEY: &str = "mapRoles";

/// Username given to worker nodes; the placeholder is resolved by the cluster at bootstrap
pub const NODE_USERNAME: &str = "system:node:{{EC2PrivateDNSName}}";

/// Groups every worker node joins
pub const NODE_GROUPS: [&str; 2] = ["system:bootstrappers", "system:nodes"];

/// IAM role as returned by discovery, hydrated with its tags
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Role {
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: "/".to_string(),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Role ARN as the EKS authenticator expects it.
    ///
    /// The role path is never part of the ARN here: aws-auth matches on the
    /// path-less form.
    pub fn arn(&self, account_id: &str) -> String {
        format!("arn:aws:iam::{}:role/{}", account_id, self.name)
    }
}

/// One role's Kubernetes identity in one cluster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterIdentityMapping {
    #[serde(rename = "rolearn")]
    pub role_arn: String,
    pub username: String,
    pub groups: Vec<String>,
}

/// All identity mappings destined for a single cluster
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterMappingSet {
    pub cluster: String,
    pub mappings: Vec<ClusterIdentityMapping>,
}

impl ClusterMappingSet {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            mappings: Vec::new(),
        }
    }

    pub fn push(&mut self, mapping: ClusterIdentityMapping) {
        self.mappings.push(mapping);
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Mappings sorted by role ARN.
    ///
    /// Collection order follows discovery order, which the provider does not
    /// guarantee; serializing this order keeps documents diff-free across runs.
    pub fn canonical(&self) -> Vec<ClusterIdentityMapping> {
        let mut sorted = self.mappings.clone();
        sorted.sort_by(|a, b| {
            a.role_arn
                .cmp(&b.role_arn)
                .then_with(|| a.username.cmp(&b.username))
                .then_with(|| a.groups.cmp(&b.groups))
        });
        sorted
    }
}

/// Payload of a cluster's aws-auth ConfigMap (the `mapRoles` value)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationDocument {
    map_roles: String,
}

impl AuthorizationDocument {
    /// Serialize a mapping set in canonical order
    pub fn from_mapping_set(set: &ClusterMappingSet) -> Result<Self> {
        let map_roles = serde_yaml::to_string(&set.canonical())
            .map_err(|e| Error::InvalidDocument(format!("Failed to serialize mapRoles: {}", e)))?;

        Ok(Self { map_roles })
    }

    /// Wrap a payload read back from a cluster
    pub fn from_payload(map_roles: impl Into<String>) -> Self {
        Self {
            map_roles: map_roles.into(),
        }
    }

    pub fn payload(&self) -> &str {
        &self.map_roles
    }

    /// Decode the payload into its entries
    pub fn entries(&self) -> Result<Vec<ClusterIdentityMapping>> {
        if self.map_roles.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_yaml::from_str(&self.map_roles)
            .map_err(|e| Error::InvalidDocument(format!("Failed to parse mapRoles: {}", e)))
    }
}

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Tag integrity error: {0}")]
    TagIntegrity(#[from] TagIntegrityError),

    #[error("Invalid authorization document: {0}")]
    InvalidDocument(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(arn: &str, username: &str) -> ClusterIdentityMapping {
        ClusterIdentityMapping {
            role_arn: arn.to_string(),
            username: username.to_string(),
            groups: vec![username.to_string()],
        }
    }

    #[test]
    fn test_role_arn_ignores_path() {
        let role = Role::new("prod-admin").with_path("/eks/");
        assert_eq!(
            role.arn("123456789012"),
            "arn:aws:iam::123456789012:role/prod-admin"
        );
    }

    #[test]
    fn test_canonical_order_sorts_by_role_arn() {
        let mut set = ClusterMappingSet::new("prod");
        set.push(mapping("arn:aws:iam::1:role/zeta", "zeta"));
        set.push(mapping("arn:aws:iam::1:role/alpha", "alpha"));
        set.push(mapping("arn:aws:iam::1:role/mid", "mid"));

        let arns: Vec<_> = set.canonical().into_iter().map(|m| m.role_arn).collect();
        assert_eq!(
            arns,
            vec![
                "arn:aws:iam::1:role/alpha",
                "arn:aws:iam::1:role/mid",
                "arn:aws:iam::1:role/zeta",
            ]
        );
        // canonical() never reorders the set itself
        assert_eq!(set.mappings[0].username, "zeta");
    }

    #[test]
    fn test_document_independent_of_collection_order() {
        let mut forward = ClusterMappingSet::new("prod");
        forward.push(mapping("arn:aws:iam::1:role/a", "a"));
        forward.push(mapping("arn:aws:iam::1:role/b", "b"));

        let mut backward = ClusterMappingSet::new("prod");
        backward.push(mapping("arn:aws:iam::1:role/b", "b"));
        backward.push(mapping("arn:aws:iam::1:role/a", "a"));

        let first = AuthorizationDocument::from_mapping_set(&forward).unwrap();
        let second = AuthorizationDocument::from_mapping_set(&backward).unwrap();
        assert_eq!(first.payload(), second.payload());

        let payload = first.payload();
        let a = payload.find("role/a").unwrap();
        let b = payload.find("role/b").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_document_uses_rolearn_wire_key() {
        let mut set = ClusterMappingSet::new("prod");
        set.push(mapping("arn:aws:iam::1:role/a", "a"));

        let doc = AuthorizationDocument::from_mapping_set(&set).unwrap();
        assert!(doc.payload().contains("rolearn:"));
        assert!(!doc.payload().contains("role_arn"));

        let entries = doc.entries().unwrap();
        assert_eq!(entries, set.mappings);
    }

    #[test]
    fn test_empty_payload_has_no_entries() {
        let doc = AuthorizationDocument::from_payload("");
        assert!(doc.entries().unwrap().is_empty());
    }

    #[test]
    fn test_garbage_payload_is_invalid() {
        let doc = AuthorizationDocument::from_payload("rolearn: [unterminated");
        assert!(matches!(doc.entries(), Err(Error::InvalidDocument(_))));
    }
}
