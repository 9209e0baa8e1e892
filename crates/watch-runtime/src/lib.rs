//! Watch Runtime
//!
//! Building blocks for Kubernetes-style operators:
//!
//! - [`ResourceWatcher`]: reconnecting watch over one resource kind, keeping
//!   a [`ResourceMirror`] of every known instance and republishing each
//!   change to any number of subscribers
//! - [`EventListener`]: the same loop over core v1 `Event` objects, without
//!   a mirror
//! - [`ResourceController`]: drives a [`Reconcile`] routine at startup, on a
//!   fixed period, and whenever the watch stream fails
//!
//! Every watch session resynchronizes from a full snapshot before it
//! (re)opens its change stream, so the mirror cannot drift permanently even
//! if events are lost across a reconnect.
//!
//! Subscriber callbacks run on the watch task. They must be fast and hand
//! long work off, see [`SubscriptionHub`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use k8s_openapi::api::core::v1::ConfigMap;
//! use watch_runtime::{
//!     ControllerOptions, KubeResourceClient, Reconcile, ReconcileContext, ResourceController,
//! };
//!
//! struct Report;
//!
//! #[async_trait]
//! impl Reconcile<ConfigMap> for Report {
//!     async fn reconcile(&self, ctx: ReconcileContext<ConfigMap>) -> anyhow::Result<()> {
//!         tracing::info!(count = ctx.resources().len(), trigger = %ctx.trigger(), "Reconciling");
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Arc::new(KubeResourceClient::try_default().await?);
//! let options = ControllerOptions::builder()
//!     .watch(|watch| watch.in_namespace("default"))
//!     .build()?;
//! let controller = ResourceController::for_resource(client, Report, options)?;
//!
//! controller.start().await?;
//! tokio::signal::ctrl_c().await?;
//! controller.stop(Some(std::time::Duration::from_secs(10))).await?;
//! # Ok(())
//! # }
//! ```

mod backoff;
pub mod controller;
pub mod descriptor;
pub mod error;
pub mod event;
pub mod hub;
pub mod mirror;
pub mod options;
mod session;
pub mod watcher;

#[cfg(test)]
mod test_utils;

pub use controller::{Reconcile, ReconcileContext, ReconcileTrigger, ResourceController};
pub use descriptor::descriptor_of;
pub use error::{ControllerError, WatchError};
pub use event::{uid_of, ChangeEvent, Notification, WatchedResource};
pub use hub::{Observer, Subscription, SubscriptionHub};
pub use mirror::ResourceMirror;
pub use options::{
    ControllerOptions, ControllerOptionsBuilder, Predicate, ReconcilePolicy, ReconnectPolicy, WatchOptions,
    WatchOptionsBuilder,
};
pub use session::LifecycleState;
pub use watcher::{EventListener, ResourceWatcher};

pub use cluster_client::{
    ClientError, KubeResourceClient, ListScope, ResourceClientTrait, ResourceDescriptor, WatchEventType,
};
