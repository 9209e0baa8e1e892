//! Mock ResourceClient for unit testing
//!
//! This module provides a scripted implementation of `ResourceClientTrait`
//! that can be used in unit tests without requiring a running cluster.
//!
//! Snapshots and change streams are consumed from FIFO scripts. Once a
//! script runs dry the mock falls back to serving its stored items and a
//! live stream that stays open until the test pushes into it or closes it.

use crate::client_trait::{ChangeStream, ResourceClientTrait};
use crate::error::ClientError;
use crate::models::{ListScope, ResourceDescriptor, Snapshot, WatchNotification};
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

type StreamItem<K> = Result<WatchNotification<K>, ClientError>;

/// How one `open_change_stream` call behaves.
#[derive(Debug)]
pub enum ScriptedStream<K> {
    /// Opening the stream fails with the error
    OpenError(ClientError),
    /// Yields the items, then the server closes the stream
    Close(Vec<StreamItem<K>>),
    /// Yields the items, then stays open for [`MockResourceClient::push`]
    Live(Vec<StreamItem<K>>),
}

/// Mock ResourceClient for testing
///
/// Clones share the same scripts, counters and live stream.
#[derive(Debug)]
pub struct MockResourceClient<K> {
    items: Arc<Mutex<Vec<K>>>,
    snapshots: Arc<Mutex<VecDeque<Result<Snapshot<K>, ClientError>>>>,
    streams: Arc<Mutex<VecDeque<ScriptedStream<K>>>>,
    live: Arc<Mutex<Option<mpsc::UnboundedSender<StreamItem<K>>>>>,
    snapshot_calls: Arc<AtomicUsize>,
    stream_opens: Arc<AtomicUsize>,
    stream_versions: Arc<Mutex<Vec<Option<String>>>>,
    scopes: Arc<Mutex<Vec<ListScope>>>,
}

impl<K> Clone for MockResourceClient<K> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            snapshots: Arc::clone(&self.snapshots),
            streams: Arc::clone(&self.streams),
            live: Arc::clone(&self.live),
            snapshot_calls: Arc::clone(&self.snapshot_calls),
            stream_opens: Arc::clone(&self.stream_opens),
            stream_versions: Arc::clone(&self.stream_versions),
            scopes: Arc::clone(&self.scopes),
        }
    }
}

impl<K> Default for MockResourceClient<K> {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K> MockResourceClient<K> {
    /// Create a new mock client with no items and no scripts
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
            snapshots: Arc::new(Mutex::new(VecDeque::new())),
            streams: Arc::new(Mutex::new(VecDeque::new())),
            live: Arc::new(Mutex::new(None)),
            snapshot_calls: Arc::new(AtomicUsize::new(0)),
            stream_opens: Arc::new(AtomicUsize::new(0)),
            stream_versions: Arc::new(Mutex::new(Vec::new())),
            scopes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Replace the items served once the snapshot script is exhausted
    pub fn set_items(&self, items: Vec<K>) {
        *lock(&self.items) = items;
    }

    /// Queue the result of the next unscripted `list_snapshot` call
    pub fn push_snapshot(&self, snapshot: Result<Snapshot<K>, ClientError>) {
        lock(&self.snapshots).push_back(snapshot);
    }

    /// Queue the behavior of the next `open_change_stream` call
    pub fn push_stream(&self, stream: ScriptedStream<K>) {
        lock(&self.streams).push_back(stream);
    }

    /// Send a notification into the currently open live stream.
    ///
    /// Returns `false` if no live stream is open.
    pub fn push(&self, notification: WatchNotification<K>) -> bool {
        self.send(Ok(notification))
    }

    /// Fail the currently open live stream with `error`.
    pub fn fail(&self, error: ClientError) -> bool {
        let sent = self.send(Err(error));
        // The stream is dead from the server's point of view
        lock(&self.live).take();
        sent
    }

    /// Close the currently open live stream from the server side.
    pub fn close(&self) -> bool {
        lock(&self.live).take().is_some()
    }

    fn send(&self, item: StreamItem<K>) -> bool {
        lock(&self.live)
            .as_ref()
            .is_some_and(|tx| tx.send(item).is_ok())
    }

    /// Number of `list_snapshot` calls so far
    pub fn snapshot_calls(&self) -> usize {
        self.snapshot_calls.load(Ordering::SeqCst)
    }

    /// Number of `open_change_stream` calls so far
    pub fn stream_opens(&self) -> usize {
        self.stream_opens.load(Ordering::SeqCst)
    }

    /// Resource versions passed to each `open_change_stream` call, in order
    pub fn stream_versions(&self) -> Vec<Option<String>> {
        lock(&self.stream_versions).clone()
    }

    /// Scopes passed to each `list_snapshot` call, in order
    pub fn scopes(&self) -> Vec<ListScope> {
        lock(&self.scopes).clone()
    }

    /// Whether a live stream is currently open
    pub fn has_live_stream(&self) -> bool {
        lock(&self.live).as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Poll until at least `count` streams were opened, or `timeout` elapses.
    ///
    /// Returns whether the count was reached.
    pub async fn wait_for_stream_opens(&self, count: usize, timeout: Duration) -> bool {
        let opened = async {
            while self.stream_opens() < count {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        };
        tokio::time::timeout(timeout, opened).await.is_ok()
    }

    fn live_stream(&self, items: Vec<StreamItem<K>>) -> ChangeStream<K>
    where
        K: Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        for item in items {
            // Receiver is alive, send cannot fail
            let _ = tx.send(item);
        }
        *lock(&self.live) = Some(tx);
        futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
    }
}

#[async_trait::async_trait]
impl<K> ResourceClientTrait<K> for MockResourceClient<K>
where
    K: Clone + Send + Sync + 'static,
{
    async fn list_snapshot(
        &self,
        _descriptor: &ResourceDescriptor,
        scope: &ListScope,
    ) -> Result<Snapshot<K>, ClientError> {
        let call = self.snapshot_calls.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.scopes).push(scope.clone());

        let scripted = lock(&self.snapshots).pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(Snapshot {
                resource_version: Some(call.to_string()),
                items: lock(&self.items).clone(),
            }),
        }
    }

    async fn open_change_stream(
        &self,
        _descriptor: &ResourceDescriptor,
        _scope: &ListScope,
        resource_version: Option<&str>,
    ) -> Result<ChangeStream<K>, ClientError> {
        self.stream_opens.fetch_add(1, Ordering::SeqCst);
        lock(&self.stream_versions).push(resource_version.map(str::to_string));

        let scripted = lock(&self.streams).pop_front();
        match scripted {
            Some(ScriptedStream::OpenError(error)) => Err(error),
            Some(ScriptedStream::Close(items)) => Ok(futures::stream::iter(items).boxed()),
            Some(ScriptedStream::Live(items)) => Ok(self.live_stream(items)),
            None => Ok(self.live_stream(Vec::new())),
        }
    }
}
