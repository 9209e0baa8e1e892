//! Change events and the bound shared by every watched instance type.

use crate::error::WatchError;
use cluster_client::{WatchEventType, WatchNotification};
use kube::Resource;
use std::sync::Arc;

/// Instance types a watcher can mirror and publish.
///
/// Anything kube knows how to describe qualifies: generated CRD types,
/// `k8s-openapi` built-ins, or `DynamicObject`.
pub trait WatchedResource: Resource + Clone + Send + Sync + 'static {}

impl<T> WatchedResource for T where T: Resource + Clone + Send + Sync + 'static {}

/// Unique ID of an instance (its `metadata.uid`).
pub fn uid_of<K: Resource>(resource: &K) -> Option<&str> {
    resource.meta().uid.as_deref()
}

/// One notification from a change stream, as published to listeners.
#[derive(Debug, Clone)]
pub enum ChangeEvent<K> {
    /// An instance was created
    Added(K),
    /// An instance was updated
    Modified(K),
    /// An instance was removed
    Deleted(K),
    /// Resumption marker, no content change
    Bookmark {
        /// Resource version the stream progressed to
        resource_version: String,
    },
    /// The stream failed; the session is resynchronizing
    Error(Arc<WatchError>),
}

impl<K> ChangeEvent<K> {
    /// The event type.
    pub fn event_type(&self) -> WatchEventType {
        match self {
            Self::Added(_) => WatchEventType::Added,
            Self::Modified(_) => WatchEventType::Modified,
            Self::Deleted(_) => WatchEventType::Deleted,
            Self::Bookmark { .. } => WatchEventType::Bookmark,
            Self::Error(_) => WatchEventType::Error,
        }
    }

    /// The instance carried by Added/Modified/Deleted events.
    pub fn resource(&self) -> Option<&K> {
        match self {
            Self::Added(resource) | Self::Modified(resource) | Self::Deleted(resource) => Some(resource),
            Self::Bookmark { .. } | Self::Error(_) => None,
        }
    }

    /// Whether this event reports a stream failure.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl<K> From<WatchNotification<K>> for ChangeEvent<K> {
    fn from(notification: WatchNotification<K>) -> Self {
        match notification {
            WatchNotification::Added(resource) => Self::Added(resource),
            WatchNotification::Modified(resource) => Self::Modified(resource),
            WatchNotification::Deleted(resource) => Self::Deleted(resource),
            WatchNotification::Bookmark { resource_version } => Self::Bookmark { resource_version },
        }
    }
}

/// Everything a subscriber can observe, for channel based consumers.
#[derive(Debug, Clone)]
pub enum Notification<K> {
    /// A change event
    Next(ChangeEvent<K>),
    /// Terminal error; nothing follows
    Error(Arc<WatchError>),
    /// The hub completed; nothing follows
    Completed,
}
