//! Resource mirror.
//!
//! The local copy of every currently known instance of one kind. Only the
//! owning watch session mutates it; anyone may read a point-in-time copy.

use crate::event::{uid_of, ChangeEvent, WatchedResource};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// In-memory set of instances keyed by `metadata.uid`.
///
/// Added events are appended without checking for an existing entry, so a
/// duplicate Added for a known uid yields two entries. Modified and Deleted
/// events for an unknown uid are dropped.
#[derive(Debug)]
pub struct ResourceMirror<K> {
    resources: Mutex<Vec<K>>,
}

impl<K: WatchedResource> ResourceMirror<K> {
    pub(crate) fn new() -> Self {
        Self {
            resources: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<K>> {
        self.resources.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one change event. Returns whether the mirror changed.
    pub(crate) fn apply(&self, event: &ChangeEvent<K>) -> bool {
        match event {
            ChangeEvent::Added(resource) => {
                self.lock().push(resource.clone());
                true
            }
            ChangeEvent::Modified(resource) => {
                let Some(uid) = uid_of(resource) else {
                    return false;
                };
                let mut resources = self.lock();
                match resources.iter_mut().find(|r| uid_of(&**r) == Some(uid)) {
                    Some(existing) => {
                        *existing = resource.clone();
                        true
                    }
                    None => false,
                }
            }
            ChangeEvent::Deleted(resource) => {
                let Some(uid) = uid_of(resource) else {
                    return false;
                };
                let mut resources = self.lock();
                match resources.iter().position(|r| uid_of(r) == Some(uid)) {
                    Some(index) => {
                        resources.remove(index);
                        true
                    }
                    None => false,
                }
            }
            ChangeEvent::Bookmark { .. } | ChangeEvent::Error(_) => false,
        }
    }

    /// Replace the whole content with a fresh snapshot.
    pub(crate) fn replace_all(&self, resources: Vec<K>) {
        *self.lock() = resources;
    }

    /// Point-in-time copy of every instance.
    pub fn snapshot(&self) -> Vec<K> {
        self.lock().clone()
    }

    /// First instance with the given uid.
    pub fn get(&self, uid: &str) -> Option<K> {
        self.lock().iter().find(|r| uid_of(*r) == Some(uid)).cloned()
    }

    /// Number of entries (duplicates included).
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the mirror holds no instance.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
