//! Test utilities for unit testing watchers and controllers
//!
//! This module provides helpers for creating test instances and collecting
//! what listeners observe.

use crate::event::{ChangeEvent, Notification};
use crate::hub::Observer;
use crate::error::WatchError;
use cluster_client::ResourceDescriptor;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Helper to create a test ConfigMap whose uid and name are `uid`
/// and whose `data.value` is `value`
pub fn config_map(uid: &str, value: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(uid.to_string()),
            namespace: Some("test".to_string()),
            uid: Some(uid.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([("value".to_string(), value.to_string())])),
        ..Default::default()
    }
}

/// The `data.value` of a ConfigMap created by [`config_map`]
pub fn value_of(resource: &ConfigMap) -> String {
    resource
        .data
        .as_ref()
        .and_then(|data| data.get("value"))
        .cloned()
        .unwrap_or_default()
}

/// Descriptor matching [`config_map`] instances
pub fn config_map_descriptor() -> ResourceDescriptor {
    ResourceDescriptor::new("", "v1", "ConfigMap", "configmaps")
}

/// Observer that records every callback
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub seen: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

/// Forwards to a shared [`RecordingObserver`] so tests keep a handle on it
pub struct Recorder(pub Arc<RecordingObserver>);

impl Observer<ConfigMap> for Recorder {
    fn on_next(&self, event: &ChangeEvent<ConfigMap>) {
        let label = match event.resource() {
            Some(resource) => format!("{}:{}", event.event_type(), value_of(resource)),
            None => event.event_type().to_string(),
        };
        self.0.seen.lock().unwrap().push(label);
    }

    fn on_error(&self, _error: Arc<WatchError>) {
        self.0.seen.lock().unwrap().push("on_error".to_string());
    }

    fn on_completed(&self) {
        self.0.seen.lock().unwrap().push("on_completed".to_string());
    }
}

/// Receive the next notification, failing the test after one second
pub async fn next_notification(rx: &mut UnboundedReceiver<Notification<ConfigMap>>) -> Notification<ConfigMap> {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for a notification")
        .expect("notification channel closed")
}

/// Poll `condition` every millisecond until it holds, failing the test after one second
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let reached = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(1), reached)
        .await
        .expect("condition not reached in time");
}

/// Listener that panics on every event
pub fn panicking_listener(_event: &ChangeEvent<ConfigMap>) {
    panic!("listener bug");
}
