//! Cluster access tag namespace
//!
//! Roles carry their cluster authorization metadata as IAM tags of the form
//! `eks/<cluster>/<field>`. This module is the only place that knows that
//! encoding: tags are parsed once into [`ClusterAccess`] records and the rest
//! of the system works with those.

use crate::Role;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

static TAG_KEY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^eks/(\w+)/(type|username|groups)$").unwrap()
});

/// Field encoded in the last segment of a tag key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagField {
    Type,
    Username,
    Groups,
}

impl TagField {
    pub const ALL: [TagField; 3] = [TagField::Type, TagField::Username, TagField::Groups];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Type => "type",
            Self::Username => "username",
            Self::Groups => "groups",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "type" => Some(Self::Type),
            "username" => Some(Self::Username),
            "groups" => Some(Self::Groups),
            _ => None,
        }
    }
}

impl fmt::Display for TagField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of the `type` tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleType {
    User,
    Node,
}

impl RoleType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "node" => Some(Self::Node),
            _ => None,
        }
    }
}

impl fmt::Display for RoleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Node => write!(f, "node"),
        }
    }
}

/// Typed access a role holds in one cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClusterAccess {
    User { username: String, groups: Vec<String> },
    Node,
}

impl ClusterAccess {
    pub fn role_type(&self) -> RoleType {
        match self {
            Self::User { .. } => RoleType::User,
            Self::Node => RoleType::Node,
        }
    }
}

/// Malformed or incomplete cluster metadata on a role
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagIntegrityError {
    #[error("role '{role}' references cluster '{cluster}' without an eks/{cluster}/type tag")]
    MissingType { role: String, cluster: String },

    #[error("role '{role}' has unexpected type '{value}' for cluster '{cluster}'")]
    UnknownType {
        role: String,
        cluster: String,
        value: String,
    },

    #[error("role '{role}' is a user of cluster '{cluster}' but has no eks/{cluster}/{field} tag")]
    MissingField {
        role: String,
        cluster: String,
        field: TagField,
    },
}

/// Build the tag key for a cluster field
pub fn encode(cluster: &str, field: TagField) -> String {
    format!("eks/{}/{}", cluster, field)
}

/// Split a tag key into its cluster id and field.
///
/// Keys outside the `eks/` namespace, cluster ids with non-word characters and
/// unknown field names all yield `None`.
pub fn decode(key: &str) -> Option<(String, TagField)> {
    let captures = TAG_KEY_REGEX.captures(key)?;
    let field = TagField::parse(&captures[2])?;
    Some((captures[1].to_string(), field))
}

/// Parse all cluster access metadata carried by a role.
///
/// Every cluster id that appears in any recognised key must have a `type`
/// tag; anything else is an integrity error for the whole role.
pub fn parse_role_tags(role: &Role) -> Result<BTreeMap<String, ClusterAccess>, TagIntegrityError> {
    let mut by_cluster: BTreeMap<String, BTreeMap<TagField, &str>> = BTreeMap::new();

    for (key, value) in &role.tags {
        if let Some((cluster, field)) = decode(key) {
            by_cluster
                .entry(cluster)
                .or_default()
                .insert(field, value.as_str());
        }
    }

    by_cluster
        .into_iter()
        .map(|(cluster, fields)| {
            let access = parse_cluster_access(&role.name, &cluster, &fields)?;
            Ok((cluster, access))
        })
        .collect()
}

fn parse_cluster_access(
    role: &str,
    cluster: &str,
    fields: &BTreeMap<TagField, &str>,
) -> Result<ClusterAccess, TagIntegrityError> {
    let raw_type = fields
        .get(&TagField::Type)
        .ok_or_else(|| TagIntegrityError::MissingType {
            role: role.to_string(),
            cluster: cluster.to_string(),
        })?;

    let require = |field: TagField| {
        fields
            .get(&field)
            .copied()
            .ok_or_else(|| TagIntegrityError::MissingField {
                role: role.to_string(),
                cluster: cluster.to_string(),
                field,
            })
    };

    match RoleType::parse(raw_type) {
        Some(RoleType::User) => {
            let username = require(TagField::Username)?.to_string();
            let groups = split_groups(require(TagField::Groups)?);
            Ok(ClusterAccess::User { username, groups })
        }
        // node identity is fixed; username/groups tags are not consulted
        Some(RoleType::Node) => Ok(ClusterAccess::Node),
        None => Err(TagIntegrityError::UnknownType {
            role: role.to_string(),
            cluster: cluster.to_string(),
            value: raw_type.to_string(),
        }),
    }
}

/// Split a comma-joined groups tag. Entries are kept verbatim and in written order:
/// group names are matched exactly by RBAC, so whitespace is significant.
pub fn split_groups(value: &str) -> Vec<String> {
    value.split(',').map(String::from).collect()
}
