//! Resource descriptors and raw watch notifications.
//!
//! These are the static identity of a watched kind and the values the
//! cluster API hands back to a watcher. They carry no behavior beyond
//! formatting and validation.

use crate::error::ClientError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Static identity of a watched resource kind.
///
/// Created once per kind and shared (by reference or clone) by every
/// watcher of that kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    /// API group, empty for the core group
    pub api_group: String,

    /// API version within the group (e.g. `v1alpha1`)
    pub api_version: String,

    /// The `kind` string (e.g. `Test`, `Event`)
    pub kind: String,

    /// Plural resource name used in URLs (e.g. `tests`)
    pub plural: String,
}

impl ResourceDescriptor {
    /// Creates a descriptor from its four parts.
    pub fn new(
        api_group: impl Into<String>,
        api_version: impl Into<String>,
        kind: impl Into<String>,
        plural: impl Into<String>,
    ) -> Self {
        Self {
            api_group: api_group.into(),
            api_version: api_version.into(),
            kind: kind.into(),
            plural: plural.into(),
        }
    }

    /// Creates a descriptor from a `group/version` (or bare `version`) string.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidRequest`] if any part is blank or the
    /// api version has more than one `/`.
    pub fn from_api_version(api_version: &str, kind: &str, plural: &str) -> Result<Self, ClientError> {
        if api_version.trim().is_empty() {
            return Err(ClientError::InvalidRequest("api version must not be empty".to_string()));
        }
        if kind.trim().is_empty() {
            return Err(ClientError::InvalidRequest("kind must not be empty".to_string()));
        }
        if plural.trim().is_empty() {
            return Err(ClientError::InvalidRequest("plural name must not be empty".to_string()));
        }

        let parts: Vec<&str> = api_version.split('/').collect();
        match parts.as_slice() {
            [version] => Ok(Self::new("", *version, kind, plural)),
            [group, version] if !group.is_empty() && !version.is_empty() => {
                Ok(Self::new(*group, *version, kind, plural))
            }
            _ => Err(ClientError::InvalidRequest(format!(
                "invalid api version: {api_version} (expect v1 or group/v1)"
            ))),
        }
    }

    /// Descriptor for the built-in core v1 `Event` kind.
    #[must_use]
    pub fn core_events() -> Self {
        Self::new("", "v1", "Event", "events")
    }

    /// The `apiVersion` string as it appears on objects of this kind.
    #[must_use]
    pub fn api_version_string(&self) -> String {
        if self.api_group.is_empty() {
            self.api_version.clone()
        } else {
            format!("{}/{}", self.api_group, self.api_version)
        }
    }

    /// `group/version/Kind` key, or `version/Kind` for the core group.
    #[must_use]
    pub fn gvk_key(&self) -> String {
        format!("{}/{}", self.api_version_string(), self.kind)
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.gvk_key())
    }
}

/// Namespace and selectors shared by the list and watch calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListScope {
    /// Target namespace; `None` or blank means cluster-wide
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Label selector (e.g. `app=web`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<String>,

    /// Field selector (e.g. `metadata.name=foo`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_selector: Option<String>,
}

impl ListScope {
    /// The namespace, with blank values treated as cluster-wide.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref().map(str::trim).filter(|ns| !ns.is_empty())
    }

    /// Human readable scope for log lines.
    #[must_use]
    pub fn display_namespace(&self) -> &str {
        self.namespace().unwrap_or("<cluster>")
    }
}

/// Full list of matching instances, taken as a resynchronization point.
#[derive(Debug, Clone)]
pub struct Snapshot<K> {
    /// Collection resource version the list was served at, if the server sent one
    pub resource_version: Option<String>,

    /// The matching instances
    pub items: Vec<K>,
}

impl<K> Snapshot<K> {
    /// Snapshot without a resource version.
    pub fn new(items: Vec<K>) -> Self {
        Self {
            resource_version: None,
            items,
        }
    }
}

/// Type of a watch notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    /// An instance was created
    Added,
    /// An instance was updated
    Modified,
    /// An instance was removed
    Deleted,
    /// Progress marker, no content change
    Bookmark,
    /// Stream failure
    Error,
}

impl fmt::Display for WatchEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Added => "Added",
            Self::Modified => "Modified",
            Self::Deleted => "Deleted",
            Self::Bookmark => "Bookmark",
            Self::Error => "Error",
        };
        f.write_str(s)
    }
}

/// A single notification read off a change stream.
///
/// Server-side error objects never appear here; they are surfaced as
/// `Err` items of the stream instead.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchNotification<K> {
    /// An instance was created
    Added(K),
    /// An instance was updated
    Modified(K),
    /// An instance was removed
    Deleted(K),
    /// Resumption marker
    Bookmark {
        /// Resource version the stream has progressed to
        resource_version: String,
    },
}

impl<K> WatchNotification<K> {
    /// The notification type.
    pub fn event_type(&self) -> WatchEventType {
        match self {
            Self::Added(_) => WatchEventType::Added,
            Self::Modified(_) => WatchEventType::Modified,
            Self::Deleted(_) => WatchEventType::Deleted,
            Self::Bookmark { .. } => WatchEventType::Bookmark,
        }
    }
}
