//! kube-backed implementation of [`ResourceClientTrait`].
//!
//! Requests go through `Api<DynamicObject>` built from the descriptor, so
//! any kind can be listed and watched without compile-time registration.
//! Objects are converted into the caller's instance type through
//! `serde_json`.

use crate::error::ClientError;
use crate::models::{ListScope, ResourceDescriptor, Snapshot, WatchNotification};
use crate::client_trait::{ChangeStream, ResourceClientTrait};
use futures::{StreamExt, TryStreamExt};
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams, WatchEvent, WatchParams};
use kube::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Cluster client backed by a [`kube::Client`].
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
}

impl std::fmt::Debug for KubeResourceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeResourceClient").finish_non_exhaustive()
    }
}

impl KubeResourceClient {
    /// Wraps an existing kube client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a client from the ambient kubeconfig or in-cluster configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if no usable configuration is found.
    pub async fn try_default() -> Result<Self, ClientError> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn api(&self, descriptor: &ResourceDescriptor, scope: &ListScope) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(&descriptor.api_group, &descriptor.api_version, &descriptor.kind);
        let resource = ApiResource::from_gvk_with_plural(&gvk, &descriptor.plural);
        match scope.namespace() {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }
}

fn list_params(scope: &ListScope) -> ListParams {
    let mut params = ListParams::default();
    if let Some(labels) = scope.label_selector.as_deref() {
        params = params.labels(labels);
    }
    if let Some(fields) = scope.field_selector.as_deref() {
        params = params.fields(fields);
    }
    params
}

fn watch_params(scope: &ListScope) -> WatchParams {
    let mut params = WatchParams::default();
    if let Some(labels) = scope.label_selector.as_deref() {
        params = params.labels(labels);
    }
    if let Some(fields) = scope.field_selector.as_deref() {
        params = params.fields(fields);
    }
    params
}

fn convert<K: DeserializeOwned>(object: DynamicObject) -> Result<K, ClientError> {
    let value = serde_json::to_value(object)?;
    Ok(serde_json::from_value(value)?)
}

fn notification<K: DeserializeOwned>(
    event: WatchEvent<DynamicObject>,
) -> Result<WatchNotification<K>, ClientError> {
    match event {
        WatchEvent::Added(object) => Ok(WatchNotification::Added(convert(object)?)),
        WatchEvent::Modified(object) => Ok(WatchNotification::Modified(convert(object)?)),
        WatchEvent::Deleted(object) => Ok(WatchNotification::Deleted(convert(object)?)),
        WatchEvent::Bookmark(bookmark) => Ok(WatchNotification::Bookmark {
            resource_version: bookmark.metadata.resource_version,
        }),
        WatchEvent::Error(error) => Err(ClientError::Stream(format!("{error:?}"))),
    }
}

#[async_trait::async_trait]
impl<K> ResourceClientTrait<K> for KubeResourceClient
where
    K: DeserializeOwned + Send + 'static,
{
    async fn list_snapshot(
        &self,
        descriptor: &ResourceDescriptor,
        scope: &ListScope,
    ) -> Result<Snapshot<K>, ClientError> {
        let api = self.api(descriptor, scope);
        let list = api.list(&list_params(scope)).await?;
        debug!(
            kind = %descriptor.kind,
            api_version = %descriptor.api_version_string(),
            count = list.items.len(),
            "Listed resources"
        );

        let items = list
            .items
            .into_iter()
            .map(convert)
            .collect::<Result<Vec<K>, _>>()?;
        Ok(Snapshot {
            resource_version: list.metadata.resource_version,
            items,
        })
    }

    async fn open_change_stream(
        &self,
        descriptor: &ResourceDescriptor,
        scope: &ListScope,
        resource_version: Option<&str>,
    ) -> Result<ChangeStream<K>, ClientError> {
        let api = self.api(descriptor, scope);
        // "0" lets the server pick; it replays current state as synthetic Added events
        let version = resource_version.unwrap_or("0");
        let stream = api.watch(&watch_params(scope), version).await?;

        Ok(stream
            .map_err(ClientError::from)
            .and_then(|event| futures::future::ready(notification(event)))
            .boxed())
    }
}
