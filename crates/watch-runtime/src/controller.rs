//! Resource controller.
//!
//! Composes a [`ResourceWatcher`] with a user reconcile routine. The routine
//! runs once at startup (awaited, failure aborts startup), on every tick of
//! an optional periodic timer, and whenever the watch session reports a
//! stream error. Periodic and error-triggered runs are fire-and-forget;
//! ordinary change events are only logged.

use crate::error::{ControllerError, WatchError};
use crate::event::{ChangeEvent, WatchedResource};
use crate::hub::{Observer, Subscription};
use crate::mirror::ResourceMirror;
use crate::options::{ControllerOptions, ReconcilePolicy};
use crate::session::LifecycleState;
use crate::watcher::ResourceWatcher;
use async_trait::async_trait;
use cluster_client::{ResourceClientTrait, ResourceDescriptor};
use futures::FutureExt;
use kube::Resource;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Why a reconciliation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileTrigger {
    /// The awaited run inside `start`
    Startup,
    /// A tick of the periodic timer
    Periodic,
    /// The watch session reported a stream error
    StreamError,
}

impl fmt::Display for ReconcileTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Startup => write!(f, "startup"),
            Self::Periodic => write!(f, "periodic"),
            Self::StreamError => write!(f, "stream-error"),
        }
    }
}

/// Everything a reconcile run gets to work with.
pub struct ReconcileContext<K> {
    trigger: ReconcileTrigger,
    cancel: CancellationToken,
    mirror: Arc<ResourceMirror<K>>,
}

impl<K: WatchedResource> ReconcileContext<K> {
    /// What started this run.
    pub fn trigger(&self) -> ReconcileTrigger {
        self.trigger
    }

    /// Cancelled when the controller stops. Long runs should watch it.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the controller is stopping.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Point-in-time copy of the instances the watcher knows about.
    pub fn resources(&self) -> Vec<K> {
        self.mirror.snapshot()
    }

    /// The live mirror, for lookups by uid.
    pub fn mirror(&self) -> &Arc<ResourceMirror<K>> {
        &self.mirror
    }
}

impl<K> fmt::Debug for ReconcileContext<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconcileContext")
            .field("trigger", &self.trigger)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// User reconciliation routine.
///
/// Must be idempotent. Under [`ReconcilePolicy::AllowOverlap`] several runs
/// may execute concurrently.
#[async_trait]
pub trait Reconcile<K>: Send + Sync + 'static {
    /// Bring the managed state toward the desired state.
    async fn reconcile(&self, ctx: ReconcileContext<K>) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
struct FlightState {
    running: bool,
    pending: Option<ReconcileTrigger>,
}

/// State shared with the timer task, the watcher observer and spawned runs.
struct Shared<K, R> {
    reconciler: R,
    descriptor: ResourceDescriptor,
    mirror: Arc<ResourceMirror<K>>,
    policy: ReconcilePolicy,
    /// Parent of every context token
    cancel: CancellationToken,
    runs: Mutex<JoinSet<()>>,
    flight: Mutex<FlightState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K: WatchedResource, R: Reconcile<K>> Shared<K, R> {
    fn context(&self, trigger: ReconcileTrigger) -> ReconcileContext<K> {
        ReconcileContext {
            trigger,
            cancel: self.cancel.child_token(),
            mirror: Arc::clone(&self.mirror),
        }
    }

    /// Dispatch a fire-and-forget run according to the policy.
    fn trigger(self: &Arc<Self>, trigger: ReconcileTrigger) {
        if self.cancel.is_cancelled() {
            return;
        }

        if self.policy == ReconcilePolicy::SingleFlight {
            let mut flight = lock(&self.flight);
            if flight.running {
                debug!(kind = %self.descriptor.kind, %trigger, "Reconciliation in flight, coalescing trigger");
                flight.pending = Some(trigger);
                return;
            }
            flight.running = true;
        }

        let shared = Arc::clone(self);
        let mut runs = lock(&self.runs);
        // Reap finished runs so the set only tracks what is in flight
        while runs.try_join_next().is_some() {}
        runs.spawn(shared.run(trigger));
    }

    async fn run(self: Arc<Self>, mut trigger: ReconcileTrigger) {
        loop {
            let outcome = AssertUnwindSafe(self.reconciler.reconcile(self.context(trigger)))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => debug!(kind = %self.descriptor.kind, %trigger, "Reconciliation completed"),
                Ok(Err(e)) => error!(kind = %self.descriptor.kind, %trigger, error = ?e, "Reconciliation failed"),
                Err(_) => error!(kind = %self.descriptor.kind, %trigger, "Reconciliation panicked"),
            }

            if self.policy != ReconcilePolicy::SingleFlight {
                return;
            }
            let mut flight = lock(&self.flight);
            match flight.pending.take() {
                Some(next) if !self.cancel.is_cancelled() => trigger = next,
                _ => {
                    flight.running = false;
                    return;
                }
            }
        }
    }

    /// Wait for in-flight runs. Returns how many were left detached.
    async fn drain(&self, timeout: Option<Duration>) -> usize {
        let mut runs = std::mem::take(&mut *lock(&self.runs));
        let wait_all = async {
            while let Some(joined) = runs.join_next().await {
                if let Err(e) = joined {
                    error!(kind = %self.descriptor.kind, error = %e, "Reconciliation task failed");
                }
            }
        };

        let Some(timeout) = timeout else {
            wait_all.await;
            return 0;
        };
        let outcome = tokio::time::timeout(timeout, wait_all).await;
        if outcome.is_ok() {
            return 0;
        }
        let abandoned = runs.len();
        warn!(kind = %self.descriptor.kind, abandoned, ?timeout, "Abandoning in-flight reconciliations");
        runs.detach_all();
        abandoned
    }
}

/// Turns watcher notifications into reconcile triggers.
struct ControllerObserver<K, R> {
    shared: Arc<Shared<K, R>>,
}

impl<K: WatchedResource, R: Reconcile<K>> Observer<K> for ControllerObserver<K, R> {
    fn on_next(&self, event: &ChangeEvent<K>) {
        let kind = &self.shared.descriptor.kind;
        match event {
            ChangeEvent::Error(e) => {
                warn!(%kind, error = %e, "Watch stream error, triggering reconciliation");
                self.shared.trigger(ReconcileTrigger::StreamError);
            }
            ChangeEvent::Bookmark { .. } => {}
            other => {
                let name = other.resource().and_then(|r| r.meta().name.as_deref()).unwrap_or("<unnamed>");
                debug!(%kind, event_type = %other.event_type(), name, "Observed change");
            }
        }
    }

    fn on_completed(&self) {
        debug!(kind = %self.shared.descriptor.kind, "Watch completed");
    }
}

#[derive(Default)]
struct Handles {
    subscription: Option<Subscription>,
    timer: Option<JoinHandle<()>>,
}

/// Reconcile scheduler over one resource kind.
pub struct ResourceController<K, R> {
    shared: Arc<Shared<K, R>>,
    watcher: ResourceWatcher<K>,
    auto_reconcile: bool,
    period: Duration,
    timer_cancel: CancellationToken,
    state: Mutex<LifecycleState>,
    /// Serializes start and stop
    handles: tokio::sync::Mutex<Handles>,
}

impl<K: WatchedResource, R: Reconcile<K>> ResourceController<K, R> {
    /// Creates a controller for the kind described by `descriptor`.
    ///
    /// # Errors
    ///
    /// [`ControllerError::InvalidConfig`] if automatic reconciliation is
    /// enabled with a zero period.
    pub fn new(
        client: Arc<dyn ResourceClientTrait<K>>,
        descriptor: ResourceDescriptor,
        reconciler: R,
        options: ControllerOptions<K>,
    ) -> Result<Self, ControllerError> {
        options.validate()?;
        let watcher = ResourceWatcher::new(client, descriptor.clone(), options.watch);
        let cancel = CancellationToken::new();
        Ok(Self {
            shared: Arc::new(Shared {
                reconciler,
                descriptor,
                mirror: Arc::clone(watcher.mirror()),
                policy: options.reconcile_policy,
                cancel: cancel.clone(),
                runs: Mutex::new(JoinSet::new()),
                flight: Mutex::new(FlightState::default()),
            }),
            watcher,
            auto_reconcile: options.auto_reconcile,
            period: options.reconcile_period,
            timer_cancel: cancel.child_token(),
            state: Mutex::new(LifecycleState::NotStarted),
            handles: tokio::sync::Mutex::new(Handles::default()),
        })
    }

    /// Creates a controller for a statically typed kind.
    ///
    /// # Errors
    ///
    /// See [`ResourceController::new`].
    pub fn for_resource(
        client: Arc<dyn ResourceClientTrait<K>>,
        reconciler: R,
        options: ControllerOptions<K>,
    ) -> Result<Self, ControllerError>
    where
        K: Resource<DynamicType = ()>,
    {
        Self::new(client, crate::descriptor::descriptor_of::<K>(), reconciler, options)
    }

    /// The reconciled kind.
    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.shared.descriptor
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *lock(&self.state)
    }

    fn set_state(&self, state: LifecycleState) {
        *lock(&self.state) = state;
    }

    /// The underlying watcher, for extra subscriptions or mirror reads.
    pub fn watcher(&self) -> &ResourceWatcher<K> {
        &self.watcher
    }

    /// The user reconcile routine.
    pub fn reconciler(&self) -> &R {
        &self.shared.reconciler
    }

    /// Reconcile once, then start watching and arm the timer.
    ///
    /// Starting a running controller is a no-op.
    ///
    /// # Errors
    ///
    /// - [`ControllerError::Reconciliation`] if the startup run fails; nothing is started
    /// - [`ControllerError::Stopped`] once the controller was stopped
    /// - [`ControllerError::Watch`] outside of a Tokio runtime
    pub async fn start(&self) -> Result<(), ControllerError> {
        let mut handles = self.handles.lock().await;
        match self.state() {
            LifecycleState::Running => return Ok(()),
            LifecycleState::Stopping | LifecycleState::Stopped => {
                return Err(ControllerError::Stopped(self.shared.descriptor.to_string()));
            }
            LifecycleState::NotStarted => {}
        }
        let runtime = Handle::try_current().map_err(|_| WatchError::NoRuntime)?;

        info!(kind = %self.shared.descriptor.kind, "Starting controller, running startup reconciliation");
        self.shared
            .reconciler
            .reconcile(self.shared.context(ReconcileTrigger::Startup))
            .await
            .map_err(ControllerError::Reconciliation)?;

        handles.subscription = Some(self.watcher.subscribe(ControllerObserver {
            shared: Arc::clone(&self.shared),
        }));
        if let Err(e) = self.watcher.start() {
            handles.subscription = None;
            return Err(e.into());
        }

        if self.auto_reconcile {
            let shared = Arc::clone(&self.shared);
            let cancel = self.timer_cancel.clone();
            let period = self.period;
            handles.timer = Some(runtime.spawn(async move {
                let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = ticks.tick() => shared.trigger(ReconcileTrigger::Periodic),
                    }
                }
            }));
            debug!(kind = %self.shared.descriptor.kind, ?period, "Armed reconciliation timer");
        }

        self.set_state(LifecycleState::Running);
        info!(kind = %self.shared.descriptor.kind, "Controller started");
        Ok(())
    }

    /// Disarm the timer, unsubscribe, stop the watcher, then cancel and wait
    /// for in-flight reconciliations.
    ///
    /// The whole sequence shares `timeout`. Runs still going when it elapses
    /// are detached, not aborted. The controller is stopped either way.
    ///
    /// # Errors
    ///
    /// - [`ControllerError::StopTimeout`] if reconciliations were abandoned
    /// - [`ControllerError::Watch`] if the watch loop outlived the timeout
    pub async fn stop(&self, timeout: Option<Duration>) -> Result<(), ControllerError> {
        let mut handles = self.handles.lock().await;
        match self.state() {
            LifecycleState::NotStarted => {
                self.set_state(LifecycleState::Stopped);
                self.shared.cancel.cancel();
                self.watcher.stop(None).await?;
                return Ok(());
            }
            LifecycleState::Stopping | LifecycleState::Stopped => return Ok(()),
            LifecycleState::Running => self.set_state(LifecycleState::Stopping),
        }
        info!(kind = %self.shared.descriptor.kind, "Stopping controller");
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let remaining = || deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));

        self.timer_cancel.cancel();
        if let Some(timer) = handles.timer.take() {
            // The timer only waits on its ticks, so it exits right away
            let _ = timer.await;
        }
        if let Some(subscription) = handles.subscription.take() {
            subscription.unsubscribe();
        }
        let watch_result = self.watcher.stop(remaining()).await;

        self.shared.cancel.cancel();
        let abandoned = self.shared.drain(remaining()).await;
        self.set_state(LifecycleState::Stopped);
        info!(kind = %self.shared.descriptor.kind, abandoned, "Controller stopped");

        if abandoned > 0 {
            return Err(ControllerError::StopTimeout {
                abandoned,
                timeout: timeout.unwrap_or_default(),
            });
        }
        watch_result.map_err(ControllerError::from)
    }
}

impl<K, R> Drop for ResourceController<K, R> {
    fn drop(&mut self) {
        self.timer_cancel.cancel();
        self.shared.cancel.cancel();
    }
}

impl<K, R> fmt::Debug for ResourceController<K, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceController")
            .field("descriptor", &self.shared.descriptor)
            .field("auto_reconcile", &self.auto_reconcile)
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "controller_test.rs"]
mod controller_test;
