//! Resource watchers.
//!
//! [`ResourceWatcher`] keeps a mirror of every instance of a kind and
//! republishes its changes. [`EventListener`] only republishes core v1
//! `Event` notifications, without caching them.

use crate::descriptor::descriptor_of;
use crate::error::WatchError;
use crate::event::{Notification, WatchedResource};
use crate::hub::{Observer, Subscription};
use crate::mirror::ResourceMirror;
use crate::options::WatchOptions;
use crate::session::{LifecycleState, WatchSession};
use cluster_client::{ResourceClientTrait, ResourceDescriptor};
use k8s_openapi::api::core::v1::Event;
use kube::Resource;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Cached watcher over one resource kind.
pub struct ResourceWatcher<K> {
    session: WatchSession<K>,
    mirror: Arc<ResourceMirror<K>>,
}

impl<K: WatchedResource> ResourceWatcher<K> {
    /// Creates a watcher for the kind described by `descriptor`.
    pub fn new(
        client: Arc<dyn ResourceClientTrait<K>>,
        descriptor: ResourceDescriptor,
        options: WatchOptions<K>,
    ) -> Self {
        let mirror = Arc::new(ResourceMirror::new());
        Self {
            session: WatchSession::new(client, descriptor, options, Some(Arc::clone(&mirror))),
            mirror,
        }
    }

    /// Creates a watcher for a statically typed kind.
    pub fn for_resource(client: Arc<dyn ResourceClientTrait<K>>, options: WatchOptions<K>) -> Self
    where
        K: Resource<DynamicType = ()>,
    {
        Self::new(client, descriptor_of::<K>(), options)
    }

    /// The watched kind.
    pub fn descriptor(&self) -> &ResourceDescriptor {
        self.session.descriptor()
    }

    /// Start the watch loop in the background.
    ///
    /// # Errors
    ///
    /// [`WatchError::Stopped`] once the watcher was stopped, [`WatchError::NoRuntime`]
    /// outside of a Tokio runtime.
    pub fn start(&self) -> Result<(), WatchError> {
        self.session.start()
    }

    /// Stop the watch loop, completing every subscriber.
    ///
    /// # Errors
    ///
    /// [`WatchError::StopTimeout`] if the loop outlived `timeout`.
    pub async fn stop(&self, timeout: Option<Duration>) -> Result<(), WatchError> {
        self.session.stop(timeout).await
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.session.state()
    }

    /// Subscribe to the change events published from now on.
    pub fn subscribe<O>(&self, observer: O) -> Subscription
    where
        O: Observer<K> + 'static,
    {
        self.session.hub().subscribe(observer)
    }

    /// Subscribe through an unbounded channel.
    pub fn subscribe_channel(&self) -> (Subscription, UnboundedReceiver<Notification<K>>) {
        self.session.hub().subscribe_channel()
    }

    /// The local mirror of the watched instances.
    pub fn mirror(&self) -> &Arc<ResourceMirror<K>> {
        &self.mirror
    }

    /// Point-in-time copy of every known instance.
    pub fn snapshot(&self) -> Vec<K> {
        self.mirror.snapshot()
    }
}

impl<K> std::fmt::Debug for ResourceWatcher<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceWatcher").finish_non_exhaustive()
    }
}

/// Uncached listener over core v1 `Event` objects.
pub struct EventListener {
    session: WatchSession<Event>,
}

impl EventListener {
    /// Creates a listener for cluster events matching `options`.
    pub fn new(client: Arc<dyn ResourceClientTrait<Event>>, options: WatchOptions<Event>) -> Self {
        Self {
            session: WatchSession::new(client, ResourceDescriptor::core_events(), options, None),
        }
    }

    /// Always `v1/Event`.
    pub fn descriptor(&self) -> &ResourceDescriptor {
        self.session.descriptor()
    }

    /// Start the watch loop in the background.
    ///
    /// # Errors
    ///
    /// See [`ResourceWatcher::start`].
    pub fn start(&self) -> Result<(), WatchError> {
        self.session.start()
    }

    /// Stop the watch loop, completing every subscriber.
    ///
    /// # Errors
    ///
    /// See [`ResourceWatcher::stop`].
    pub async fn stop(&self, timeout: Option<Duration>) -> Result<(), WatchError> {
        self.session.stop(timeout).await
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.session.state()
    }

    /// Subscribe to the events published from now on.
    pub fn subscribe<O>(&self, observer: O) -> Subscription
    where
        O: Observer<Event> + 'static,
    {
        self.session.hub().subscribe(observer)
    }

    /// Subscribe through an unbounded channel.
    pub fn subscribe_channel(&self) -> (Subscription, UnboundedReceiver<Notification<Event>>) {
        self.session.hub().subscribe_channel()
    }
}

impl std::fmt::Debug for EventListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListener").finish_non_exhaustive()
    }
}
