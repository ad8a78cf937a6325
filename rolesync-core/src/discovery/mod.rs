//! Role discovery
//!
//! Enumerates the IAM roles under a path prefix together with their tags.
//! Every call re-fetches from the provider; nothing is cached between runs.

pub mod iam;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use rolesync_common::Role;
use thiserror::Error;

pub use iam::IamRoleDiscovery;

/// Discovery failures. All of them are fatal to a reconciliation run.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Identity provider unreachable, throttled or unauthorized
    #[error("{operation} failed: {message}")]
    Provider {
        operation: &'static str,
        message: String,
    },

    /// Role carries more tags than a single listing returns
    #[error("role '{role}' has more than {limit} tags; its tag set would be truncated")]
    TagLimitExceeded { role: String, limit: i32 },

    /// Caller identity came back without an account id
    #[error("caller identity returned no account id")]
    MissingAccountId,
}

pub type DiscoveryResult<T> = std::result::Result<T, DiscoveryError>;

/// Source of tagged roles
#[async_trait]
pub trait RoleDiscovery: Send + Sync {
    /// Account id the role ARNs are built against
    async fn account_id(&self) -> DiscoveryResult<String>;

    /// Lazily page through the roles under `path_prefix`, each hydrated with its tags
    fn fetch_roles<'a>(&'a self, path_prefix: &'a str) -> BoxStream<'a, DiscoveryResult<Role>>;
}

/// Run discovery to exhaustion. The first error aborts; partial lists are never returned.
pub async fn collect_roles(
    discovery: &dyn RoleDiscovery,
    path_prefix: &str,
) -> DiscoveryResult<Vec<Role>> {
    discovery.fetch_roles(path_prefix).try_collect().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::{self, StreamExt};

    struct FailingAfterOne;

    #[async_trait]
    impl RoleDiscovery for FailingAfterOne {
        async fn account_id(&self) -> DiscoveryResult<String> {
            Ok("123456789012".to_string())
        }

        fn fetch_roles<'a>(&'a self, _path_prefix: &'a str) -> BoxStream<'a, DiscoveryResult<Role>> {
            stream::iter(vec![
                Ok(Role::new("first")),
                Err(DiscoveryError::Provider {
                    operation: "iam:ListRoles",
                    message: "throttled".to_string(),
                }),
                Ok(Role::new("never-seen")),
            ])
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_collect_roles_discards_partial_list() {
        let result = collect_roles(&FailingAfterOne, "/eks/").await;
        assert!(matches!(
            result,
            Err(DiscoveryError::Provider { operation: "iam:ListRoles", .. })
        ));
    }

    #[test]
    fn test_tag_limit_message_names_role() {
        let err = DiscoveryError::TagLimitExceeded {
            role: "crowded".to_string(),
            limit: 100,
        };
        assert!(err.to_string().contains("crowded"));
        assert!(err.to_string().contains("100"));
    }
}
