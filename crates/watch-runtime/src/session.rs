//! Watch session.
//!
//! Owns the reconnect loop of one resource kind: fetch a full snapshot,
//! open a change stream from the snapshot's resource version, apply and
//! publish every event in the order received, and start over from the
//! snapshot whenever the stream ends. The loop only exits on stop.

use crate::error::WatchError;
use crate::event::{ChangeEvent, WatchedResource};
use crate::hub::SubscriptionHub;
use crate::mirror::ResourceMirror;
use crate::options::WatchOptions;
use crate::backoff::FibonacciBackoff;
use cluster_client::{ResourceClientTrait, ResourceDescriptor};
use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Lifecycle of watchers and controllers. A stopped instance cannot be restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, `start` not called yet
    NotStarted,
    /// Watching
    Running,
    /// `stop` in progress
    Stopping,
    /// Stopped for good
    Stopped,
}

struct SessionInner<K> {
    client: Arc<dyn ResourceClientTrait<K>>,
    descriptor: ResourceDescriptor,
    options: WatchOptions<K>,
    mirror: Option<Arc<ResourceMirror<K>>>,
    hub: SubscriptionHub<K>,
}

struct Lifecycle {
    state: LifecycleState,
    cancel: CancellationToken,
    /// Cancelled once the spawned loop has returned (or unwound)
    exited: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Reconnecting watch over one resource kind.
pub(crate) struct WatchSession<K> {
    inner: Arc<SessionInner<K>>,
    lifecycle: Mutex<Lifecycle>,
}

impl<K: WatchedResource> WatchSession<K> {
    /// Creates a stopped session. Sessions given a mirror keep it in sync.
    pub(crate) fn new(
        client: Arc<dyn ResourceClientTrait<K>>,
        descriptor: ResourceDescriptor,
        options: WatchOptions<K>,
        mirror: Option<Arc<ResourceMirror<K>>>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                client,
                descriptor,
                options,
                mirror,
                hub: SubscriptionHub::new(),
            }),
            lifecycle: Mutex::new(Lifecycle {
                state: LifecycleState::NotStarted,
                cancel: CancellationToken::new(),
                exited: CancellationToken::new(),
                task: None,
            }),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn descriptor(&self) -> &ResourceDescriptor {
        &self.inner.descriptor
    }

    pub(crate) fn hub(&self) -> &SubscriptionHub<K> {
        &self.inner.hub
    }

    #[cfg(test)]
    pub(crate) fn mirror(&self) -> Option<&Arc<ResourceMirror<K>>> {
        self.inner.mirror.as_ref()
    }

    pub(crate) fn state(&self) -> LifecycleState {
        self.lifecycle().state
    }

    /// Spawn the watch loop on the current Tokio runtime and return immediately.
    ///
    /// Starting a running session is a no-op.
    pub(crate) fn start(&self) -> Result<(), WatchError> {
        let mut lifecycle = self.lifecycle();
        match lifecycle.state {
            LifecycleState::Running => return Ok(()),
            LifecycleState::Stopping | LifecycleState::Stopped => {
                return Err(WatchError::Stopped(self.inner.descriptor.to_string()));
            }
            LifecycleState::NotStarted => {}
        }

        let handle = Handle::try_current().map_err(|_| WatchError::NoRuntime)?;
        let descriptor = &self.inner.descriptor;
        let span = info_span!(
            "watch",
            kind = %descriptor.kind,
            api_version = %descriptor.api_version_string(),
            namespace = %self.inner.options.scope.display_namespace(),
        );
        let inner = Arc::clone(&self.inner);
        let cancel = lifecycle.cancel.clone();
        let exited = lifecycle.exited.clone();
        let task = async move {
            let _exited = exited.drop_guard();
            run(inner, cancel).await;
        };
        lifecycle.task = Some(handle.spawn(task.instrument(span)));
        lifecycle.state = LifecycleState::Running;
        Ok(())
    }

    /// Request cancellation and wait for the loop to exit.
    ///
    /// With a timeout, returns [`WatchError::StopTimeout`] if the loop is
    /// still running when it elapses; the loop is left to finish on its own.
    /// A call made while another stop is in progress waits for the same exit.
    pub(crate) async fn stop(&self, timeout: Option<Duration>) -> Result<(), WatchError> {
        let task = {
            let mut lifecycle = self.lifecycle();
            match lifecycle.state {
                LifecycleState::NotStarted => {
                    lifecycle.state = LifecycleState::Stopped;
                    drop(lifecycle);
                    self.inner.hub.complete();
                    return Ok(());
                }
                LifecycleState::Stopping => {
                    let exited = lifecycle.exited.clone();
                    drop(lifecycle);
                    return self.wait_exited(&exited, timeout).await;
                }
                LifecycleState::Stopped => return Ok(()),
                LifecycleState::Running => {
                    lifecycle.state = LifecycleState::Stopping;
                    lifecycle.cancel.cancel();
                    lifecycle.task.take()
                }
            }
        };

        let result = match task {
            Some(task) => self.join(task, timeout).await,
            None => Ok(()),
        };
        self.lifecycle().state = LifecycleState::Stopped;
        result
    }

    async fn wait_exited(&self, exited: &CancellationToken, timeout: Option<Duration>) -> Result<(), WatchError> {
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, exited.cancelled())
                .await
                .map_err(|_| WatchError::StopTimeout {
                    kind: self.inner.descriptor.to_string(),
                    timeout,
                }),
            None => {
                exited.cancelled().await;
                Ok(())
            }
        }
    }

    async fn join(&self, mut task: JoinHandle<()>, timeout: Option<Duration>) -> Result<(), WatchError> {
        let joined = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(kind = %self.inner.descriptor.kind, ?timeout, "Watch loop did not exit in time, detaching it");
                    return Err(WatchError::StopTimeout {
                        kind: self.inner.descriptor.to_string(),
                        timeout,
                    });
                }
            },
            None => task.await,
        };

        if let Err(e) = joined {
            error!(kind = %self.inner.descriptor.kind, error = %e, "Watch loop terminated abnormally");
            self.inner.hub.complete();
        }
        Ok(())
    }
}

async fn run<K: WatchedResource>(inner: Arc<SessionInner<K>>, cancel: CancellationToken) {
    let mut backoff = inner.options.reconnect.backoff();
    info!("Watch loop started");

    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcome = inner.watch_once(&mut backoff) => outcome,
        };

        match outcome {
            Ok(()) => info!("Change stream closed by the server, resynchronizing"),
            Err(e) => {
                warn!(error = %e, "Change stream failed, resynchronizing");
                inner.dispatch(&ChangeEvent::Error(Arc::new(e)));
            }
        }

        // Server closes back off as well
        if let Some(delay) = backoff.as_mut().map(FibonacciBackoff::next_backoff) {
            debug!(?delay, "Waiting before resynchronization");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    inner.hub.complete();
    info!("Watch loop stopped");
}

impl<K: WatchedResource> SessionInner<K> {
    /// One resynchronization: snapshot, then stream until it ends.
    ///
    /// `Ok` means the server closed the stream. The backoff is reset by the
    /// first item the stream delivers.
    async fn watch_once(&self, backoff: &mut Option<FibonacciBackoff>) -> Result<(), WatchError> {
        let snapshot = self.client.list_snapshot(&self.descriptor, &self.options.scope).await?;
        debug!(
            count = snapshot.items.len(),
            resource_version = snapshot.resource_version.as_deref().unwrap_or("<none>"),
            "Fetched snapshot"
        );
        let resource_version = snapshot.resource_version;
        if let Some(mirror) = &self.mirror {
            mirror.replace_all(snapshot.items);
        }

        let mut stream = self
            .client
            .open_change_stream(&self.descriptor, &self.options.scope, resource_version.as_deref())
            .await?;
        info!("Change stream opened");

        let mut delivered = false;
        while let Some(item) = stream.next().await {
            let event = ChangeEvent::from(item?);
            if !delivered {
                // Only a stream that actually delivers counts as recovered
                delivered = true;
                if let Some(backoff) = backoff.as_mut() {
                    backoff.reset();
                }
            }
            debug!(event_type = %event.event_type(), "Received change event");
            self.dispatch(&event);
        }
        Ok(())
    }

    /// Apply to the mirror, then publish if the predicate accepts the event.
    fn dispatch(&self, event: &ChangeEvent<K>) {
        if let Some(mirror) = &self.mirror {
            mirror.apply(event);
        }
        if self.options.accepts(event) {
            self.hub.next(event);
        }
    }
}

impl<K> Drop for WatchSession<K> {
    fn drop(&mut self) {
        // An abandoned session must not keep streaming
        self.lifecycle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel
            .cancel();
    }
}
