//! aws-auth ConfigMap operations
//!
//! Read, create and replace of `kube-system/aws-auth`. Writes always carry
//! the full document; nothing is merged into what the cluster holds.

use super::{StoredDocument, UpsertAction};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, PostParams};
use kube::Client;
use rolesync_common::{
    AuthorizationDocument, AUTH_CONFIGMAP_NAME, AUTH_CONFIGMAP_NAMESPACE, MAP_ROLES_KEY,
};
use std::collections::BTreeMap;

/// Label marking the ConfigMap as written by this tool
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

fn auth_api(client: &Client) -> Api<ConfigMap> {
    Api::namespaced(client.clone(), AUTH_CONFIGMAP_NAMESPACE)
}

fn managed_labels() -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), "rolesync".to_string());
    labels
}

/// Read the current aws-auth document; `None` when the ConfigMap does not exist
pub async fn read_auth_document(client: &Client) -> Result<Option<StoredDocument>, kube::Error> {
    let configmap = auth_api(client).get_opt(AUTH_CONFIGMAP_NAME).await?;
    Ok(configmap.map(stored_from_configmap))
}

/// Create the aws-auth ConfigMap, or replace it wholesale when `exists`
pub async fn write_auth_document(
    client: &Client,
    document: &AuthorizationDocument,
    exists: bool,
) -> Result<UpsertAction, kube::Error> {
    let api = auth_api(client);
    let body = configmap_for(document);

    if exists {
        api.replace(AUTH_CONFIGMAP_NAME, &PostParams::default(), &body)
            .await?;
        Ok(UpsertAction::Replaced)
    } else {
        api.create(&PostParams::default(), &body).await?;
        Ok(UpsertAction::Created)
    }
}

/// Wrap a stored ConfigMap, noting whether a write would change anything besides `mapRoles`
pub fn stored_from_configmap(configmap: ConfigMap) -> StoredDocument {
    let exact = holds_only_managed_content(&configmap);
    StoredDocument {
        document: document_from_configmap(configmap),
        exact,
    }
}

fn holds_only_managed_content(configmap: &ConfigMap) -> bool {
    let data = configmap
        .data
        .as_ref()
        .is_some_and(|data| data.len() == 1 && data.contains_key(MAP_ROLES_KEY));
    let binary_data = configmap
        .binary_data
        .as_ref()
        .map_or(true, |binary| binary.is_empty());
    let labels = configmap.metadata.labels.as_ref() == Some(&managed_labels());
    let annotations = configmap
        .metadata
        .annotations
        .as_ref()
        .map_or(true, |annotations| annotations.is_empty());

    data && binary_data && labels && annotations
}

/// Extract the `mapRoles` payload; a ConfigMap without the key holds an empty document
pub fn document_from_configmap(configmap: ConfigMap) -> AuthorizationDocument {
    let payload = configmap
        .data
        .and_then(|mut data| data.remove(MAP_ROLES_KEY))
        .unwrap_or_default();

    AuthorizationDocument::from_payload(payload)
}

/// Build the full ConfigMap body for a document
pub fn configmap_for(document: &AuthorizationDocument) -> ConfigMap {
    let mut data = BTreeMap::new();
    data.insert(MAP_ROLES_KEY.to_string(), document.payload().to_string());

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(AUTH_CONFIGMAP_NAME.to_string()),
            namespace: Some(AUTH_CONFIGMAP_NAMESPACE.to_string()),
            labels: Some(managed_labels()),
            ..Default::default()
        },
        data: Some(data),
        binary_data: None,
        immutable: None,
    }
}
