//! IAM-backed role discovery
//!
//! Uses `ListRoles` (marker pagination) and `ListRoleTags` for hydration,
//! plus STS `GetCallerIdentity` for the account id.

use super::{DiscoveryError, DiscoveryResult, RoleDiscovery};
use async_trait::async_trait;
use aws_sdk_iam::error::DisplayErrorContext;
use aws_sdk_iam::types::Role as IamRole;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use rolesync_common::Role;
use std::future::Future;
use tracing::debug;

/// Tag listing cap; also the IAM per-role tag maximum
pub const DEFAULT_MAX_TAGS: i32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Cursor {
    Start,
    Next(String),
    Done,
}

/// One listing page and where the next one starts
struct Page<T> {
    items: Vec<T>,
    next: Cursor,
}

/// A truncated page without a marker cannot be continued and ends the listing
fn next_cursor(is_truncated: bool, marker: Option<&str>) -> Cursor {
    match marker {
        Some(marker) if is_truncated => Cursor::Next(marker.to_string()),
        _ => Cursor::Done,
    }
}

fn ensure_complete_tags(role: &str, is_truncated: bool, limit: i32) -> DiscoveryResult<()> {
    if is_truncated {
        return Err(DiscoveryError::TagLimitExceeded {
            role: role.to_string(),
            limit,
        });
    }
    Ok(())
}

/// Flatten a marker-paginated listing into a stream of items.
/// `fetch` is called with `None` first, then with each returned marker; the first error ends the stream.
fn paginate<'a, T, F, Fut>(fetch: F) -> BoxStream<'a, DiscoveryResult<T>>
where
    T: Send + 'a,
    F: Fn(Option<String>) -> Fut + Send + 'a,
    Fut: Future<Output = DiscoveryResult<Page<T>>> + Send + 'a,
{
    stream::try_unfold((Cursor::Start, fetch), |(cursor, fetch)| async move {
        let marker = match cursor {
            Cursor::Start => None,
            Cursor::Next(marker) => Some(marker),
            Cursor::Done => return Ok(None),
        };

        let page = fetch(marker).await?;
        Ok::<_, DiscoveryError>(Some((page.items, (page.next, fetch))))
    })
    .map_ok(|items| stream::iter(items.into_iter().map(Ok::<_, DiscoveryError>)))
    .try_flatten()
    .boxed()
}

/// Role discovery against AWS IAM
#[derive(Clone, Debug)]
pub struct IamRoleDiscovery {
    iam: aws_sdk_iam::Client,
    sts: aws_sdk_sts::Client,
    max_tags: i32,
}

impl IamRoleDiscovery {
    pub fn new(iam: aws_sdk_iam::Client, sts: aws_sdk_sts::Client, max_tags: i32) -> Self {
        Self { iam, sts, max_tags }
    }

    pub fn from_sdk_config(config: &aws_config::SdkConfig, max_tags: i32) -> Self {
        Self::new(
            aws_sdk_iam::Client::new(config),
            aws_sdk_sts::Client::new(config),
            max_tags,
        )
    }

    async fn list_page(
        &self,
        path_prefix: &str,
        marker: Option<String>,
    ) -> DiscoveryResult<Page<IamRole>> {
        let output = self
            .iam
            .list_roles()
            .path_prefix(path_prefix)
            .set_marker(marker)
            .send()
            .await
            .map_err(|e| provider_error("iam:ListRoles", e))?;

        let next = next_cursor(output.is_truncated(), output.marker());

        debug!(
            path_prefix,
            count = output.roles().len(),
            more = matches!(next, Cursor::Next(_)),
            "Listed IAM role page"
        );

        Ok(Page {
            items: output.roles().to_vec(),
            next,
        })
    }

    async fn hydrate(&self, role: IamRole) -> DiscoveryResult<Role> {
        let name = role.role_name();

        let output = self
            .iam
            .list_role_tags()
            .role_name(name)
            .max_items(self.max_tags)
            .send()
            .await
            .map_err(|e| provider_error("iam:ListRoleTags", e))?;

        ensure_complete_tags(name, output.is_truncated(), self.max_tags)?;

        let hydrated = output
            .tags()
            .iter()
            .fold(Role::new(name).with_path(role.path()), |acc, tag| {
                acc.with_tag(tag.key(), tag.value())
            });

        debug!(role = %hydrated.name, tags = hydrated.tags.len(), "Hydrated role tags");
        Ok(hydrated)
    }
}

#[async_trait]
impl RoleDiscovery for IamRoleDiscovery {
    async fn account_id(&self) -> DiscoveryResult<String> {
        let identity = self
            .sts
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| provider_error("sts:GetCallerIdentity", e))?;

        identity
            .account()
            .map(String::from)
            .ok_or(DiscoveryError::MissingAccountId)
    }

    fn fetch_roles<'a>(&'a self, path_prefix: &'a str) -> BoxStream<'a, DiscoveryResult<Role>> {
        paginate(move |marker| self.list_page(path_prefix, marker))
            .and_then(move |role| self.hydrate(role))
            .boxed()
    }
}

fn provider_error<E: std::error::Error>(operation: &'static str, err: E) -> DiscoveryError {
    DiscoveryError::Provider {
        operation,
        message: DisplayErrorContext(&err).to_string(),
    }
}
