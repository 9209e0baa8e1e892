//! ResourceClient trait for mocking
//!
//! This trait abstracts the two cluster API calls a watcher needs so the
//! watch loop can be driven by the kube-backed client in production and by
//! a scripted mock in unit tests.

use crate::error::ClientError;
use crate::models::{ListScope, ResourceDescriptor, Snapshot, WatchNotification};
use futures::stream::BoxStream;

/// An open change stream.
///
/// Yields notifications in server order. An `Err` item is a stream failure;
/// the end of the stream is a server-initiated close.
pub type ChangeStream<K> = BoxStream<'static, Result<WatchNotification<K>, ClientError>>;

/// Trait for cluster list/watch operations on one instance type.
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ResourceClientTrait<K>: Send + Sync {
    /// List all instances of the kind in scope.
    async fn list_snapshot(
        &self,
        descriptor: &ResourceDescriptor,
        scope: &ListScope,
    ) -> Result<Snapshot<K>, ClientError>;

    /// Open a change stream with the same filters, starting after `resource_version` when given.
    async fn open_change_stream(
        &self,
        descriptor: &ResourceDescriptor,
        scope: &ListScope,
        resource_version: Option<&str>,
    ) -> Result<ChangeStream<K>, ClientError>;
}
