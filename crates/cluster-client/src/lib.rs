//! Cluster API Client
//!
//! The collaborator contract resource watchers are built on: list a
//! snapshot of every instance of a kind, and open a change stream with the
//! same namespace / label / field filters.
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{KubeResourceClient, ListScope, ResourceClientTrait, ResourceDescriptor};
//! use kube::api::DynamicObject;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeResourceClient::try_default().await?;
//! let descriptor = ResourceDescriptor::from_api_version("k8s.neuroglia.io/v1alpha1", "Test", "tests")?;
//! let scope = ListScope {
//!     namespace: Some("test".to_string()),
//!     ..Default::default()
//! };
//!
//! let snapshot: cluster_client::Snapshot<DynamicObject> = client.list_snapshot(&descriptor, &scope).await?;
//! let stream = ResourceClientTrait::<DynamicObject>::open_change_stream(
//!     &client,
//!     &descriptor,
//!     &scope,
//!     snapshot.resource_version.as_deref(),
//! )
//! .await?;
//! # drop(stream);
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **`test-util`**: exposes [`MockResourceClient`], a scripted in-memory client

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod client_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubeResourceClient;
pub use client_trait::{ChangeStream, ResourceClientTrait};
pub use error::ClientError;
pub use models::*;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockResourceClient, ScriptedStream};
