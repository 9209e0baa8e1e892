//! Subscription hub.
//!
//! Fan-out point of a watch session: every change event and the terminal
//! error/completion signals are broadcast to the listeners subscribed at
//! that moment.
//!
//! Delivery is synchronous on the publishing task. A slow listener delays
//! every other listener of the same hub and the processing of the next
//! stream event, so callbacks must be fast and hand long work off (to a
//! channel, see [`SubscriptionHub::subscribe_channel`], or a spawned task).

use crate::error::WatchError;
use crate::event::{ChangeEvent, Notification};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Observer contract for change event listeners.
///
/// After `on_error` or `on_completed` a listener receives nothing more from
/// the same hub. Closures taking `&ChangeEvent<K>` implement this trait
/// through `on_next` alone.
pub trait Observer<K>: Send + Sync {
    /// A change event was published.
    fn on_next(&self, event: &ChangeEvent<K>);

    /// The hub terminated with an error.
    fn on_error(&self, error: Arc<WatchError>) {
        let _ = error;
    }

    /// The hub completed.
    fn on_completed(&self) {}
}

impl<K, F> Observer<K> for F
where
    F: Fn(&ChangeEvent<K>) + Send + Sync,
{
    fn on_next(&self, event: &ChangeEvent<K>) {
        self(event);
    }
}

/// Forwards everything into an unbounded channel.
struct ChannelObserver<K> {
    tx: mpsc::UnboundedSender<Notification<K>>,
}

impl<K: Clone + Send + Sync> Observer<K> for ChannelObserver<K> {
    fn on_next(&self, event: &ChangeEvent<K>) {
        // A dropped receiver only means the consumer went away
        let _ = self.tx.send(Notification::Next(event.clone()));
    }

    fn on_error(&self, error: Arc<WatchError>) {
        let _ = self.tx.send(Notification::Error(error));
    }

    fn on_completed(&self) {
        let _ = self.tx.send(Notification::Completed);
    }
}

struct Listener<K> {
    id: u64,
    active: AtomicBool,
    observer: Box<dyn Observer<K>>,
}

#[derive(Clone)]
enum Terminal {
    Completed,
    Failed(Arc<WatchError>),
}

struct HubState<K> {
    listeners: Vec<Arc<Listener<K>>>,
    next_id: u64,
    terminal: Option<Terminal>,
}

/// Handle to one subscription.
///
/// Dropping it (or calling [`Subscription::unsubscribe`]) removes the
/// listener. Once removed, the listener receives no further callback, even
/// if a broadcast is running concurrently.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn inert() -> Self {
        Self { unsubscribe: None }
    }

    /// Remove the listener from its hub.
    pub fn unsubscribe(mut self) {
        self.dispose();
    }

    fn dispose(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

/// Broadcasts change events to a mutable set of listeners.
pub struct SubscriptionHub<K> {
    state: Arc<Mutex<HubState<K>>>,
}

impl<K> std::fmt::Debug for SubscriptionHub<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("SubscriptionHub")
            .field("listeners", &state.listeners.len())
            .field("terminated", &state.terminal.is_some())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn deliver<K>(listener: &Listener<K>, callback: impl FnOnce(&dyn Observer<K>)) {
    let outcome = catch_unwind(AssertUnwindSafe(|| callback(listener.observer.as_ref())));
    if outcome.is_err() {
        error!(listener = listener.id, "Listener panicked while handling a notification; skipping it");
    }
}

impl<K: 'static> SubscriptionHub<K> {
    /// Creates a hub without listeners.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                listeners: Vec::new(),
                next_id: 0,
                terminal: None,
            })),
        }
    }

    /// Add a listener. It receives events published from now on, no replay.
    ///
    /// Subscribing to a terminated hub delivers the terminal signal right away
    /// and returns an inert subscription.
    pub fn subscribe<O>(&self, observer: O) -> Subscription
    where
        O: Observer<K> + 'static,
    {
        let mut state = lock(&self.state);
        if let Some(terminal) = state.terminal.clone() {
            drop(state);
            match terminal {
                Terminal::Completed => observer.on_completed(),
                Terminal::Failed(error) => observer.on_error(error),
            }
            return Subscription::inert();
        }

        let id = state.next_id;
        state.next_id += 1;
        let listener = Arc::new(Listener {
            id,
            active: AtomicBool::new(true),
            observer: Box::new(observer),
        });
        state.listeners.push(Arc::clone(&listener));
        debug!(listener = id, listeners = state.listeners.len(), "Listener subscribed");

        let hub: Weak<Mutex<HubState<K>>> = Arc::downgrade(&self.state);
        let active = Arc::clone(&listener);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                active.active.store(false, Ordering::SeqCst);
                if let Some(hub) = hub.upgrade() {
                    let mut state = lock(&hub);
                    state.listeners.retain(|l| l.id != id);
                    debug!(listener = id, listeners = state.listeners.len(), "Listener unsubscribed");
                }
            })),
        }
    }

    /// Subscribe a channel that receives every notification.
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<Notification<K>>)
    where
        K: Clone + Send + Sync,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.subscribe(ChannelObserver { tx }), rx)
    }

    /// Broadcast one event to the current listeners.
    pub fn next(&self, event: &ChangeEvent<K>) {
        let listeners = {
            let state = lock(&self.state);
            if state.terminal.is_some() {
                return;
            }
            state.listeners.clone()
        };

        for listener in &listeners {
            if listener.active.load(Ordering::SeqCst) {
                deliver(listener, |observer| observer.on_next(event));
            }
        }
    }

    /// Terminate the hub with an error.
    pub fn error(&self, error: Arc<WatchError>) {
        self.terminate(Terminal::Failed(error));
    }

    /// Terminate the hub normally.
    pub fn complete(&self) {
        self.terminate(Terminal::Completed);
    }

    fn terminate(&self, terminal: Terminal) {
        let listeners = {
            let mut state = lock(&self.state);
            if state.terminal.is_some() {
                return;
            }
            state.terminal = Some(terminal.clone());
            std::mem::take(&mut state.listeners)
        };

        for listener in &listeners {
            // swap so a concurrent unsubscribe and this terminal signal cannot both win
            if listener.active.swap(false, Ordering::SeqCst) {
                match &terminal {
                    Terminal::Completed => deliver(listener, |observer| observer.on_completed()),
                    Terminal::Failed(error) => {
                        deliver(listener, |observer| observer.on_error(Arc::clone(error)));
                    }
                }
            }
        }
    }

    /// Number of subscribed listeners.
    pub fn listener_count(&self) -> usize {
        lock(&self.state).listeners.len()
    }

    /// Whether `error` or `complete` was called.
    pub fn is_terminated(&self) -> bool {
        lock(&self.state).terminal.is_some()
    }
}

impl<K: 'static> Default for SubscriptionHub<K> {
    fn default() -> Self {
        Self::new()
    }
}
