//! Identity mapping builder
//!
//! Pure functions turning tagged roles into per-cluster identity mappings.

use rolesync_common::tags::{self, ClusterAccess, TagIntegrityError};
use rolesync_common::{ClusterIdentityMapping, ClusterMappingSet, Role, NODE_GROUPS, NODE_USERNAME};
use std::collections::BTreeMap;
use tracing::debug;

/// Build the mappings one role contributes, keyed by cluster id
pub fn build_mappings(
    account_id: &str,
    role: &Role,
) -> Result<BTreeMap<String, ClusterIdentityMapping>, TagIntegrityError> {
    let role_arn = role.arn(account_id);
    let access = tags::parse_role_tags(role)?;

    Ok(access
        .into_iter()
        .map(|(cluster, access)| (cluster, identity_for(&role_arn, access)))
        .collect())
}

/// Resolve the Kubernetes identity for a typed access record
pub fn identity_for(role_arn: &str, access: ClusterAccess) -> ClusterIdentityMapping {
    match access {
        ClusterAccess::User { username, groups } => ClusterIdentityMapping {
            role_arn: role_arn.to_string(),
            username,
            groups,
        },
        ClusterAccess::Node => ClusterIdentityMapping {
            role_arn: role_arn.to_string(),
            username: NODE_USERNAME.to_string(),
            groups: NODE_GROUPS.iter().map(|g| g.to_string()).collect(),
        },
    }
}

/// Fold every role's mappings into one set per cluster.
///
/// The first integrity error aborts the fold: a partial RBAC picture is never
/// handed to the apply stage.
pub fn group_mappings<'a, I>(
    account_id: &str,
    roles: I,
) -> Result<BTreeMap<String, ClusterMappingSet>, TagIntegrityError>
where
    I: IntoIterator<Item = &'a Role>,
{
    let mut grouped: BTreeMap<String, ClusterMappingSet> = BTreeMap::new();

    for role in roles {
        let mappings = build_mappings(account_id, role)?;
        if mappings.is_empty() {
            debug!(role = %role.name, "Role carries no cluster access tags");
            continue;
        }

        for (cluster, mapping) in mappings {
            debug!(role = %role.name, cluster = %cluster, username = %mapping.username, "Mapped role");
            grouped
                .entry(cluster.clone())
                .or_insert_with(|| ClusterMappingSet::new(cluster))
                .push(mapping);
        }
    }

    Ok(grouped)
}
