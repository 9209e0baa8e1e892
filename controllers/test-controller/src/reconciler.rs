//! Test reconciliation logic.
//!
//! Desired state: every `Test` resource reports its `spec.value` back in
//! `status.observedValue`. At startup the sample resource of the watched
//! namespace is created if it does not exist yet.

use anyhow::Context;
use async_trait::async_trait;
use crds::{Test, TestSpec};
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use tracing::{debug, info};
use watch_runtime::{Reconcile, ReconcileContext, ReconcileTrigger};

/// Name of the resource seeded at startup
pub const SAMPLE_NAME: &str = "test";

/// Value of the resource seeded at startup
pub const SAMPLE_VALUE: &str = "Hello, world";

/// Reconciles `Test` resources.
pub struct TestReconciler {
    client: Client,
    /// Namespace to seed the sample into; nothing is seeded cluster-wide
    namespace: Option<String>,
}

impl TestReconciler {
    /// Creates a new reconciler.
    pub fn new(client: Client, namespace: Option<String>) -> Self {
        Self { client, namespace }
    }

    async fn seed_sample(&self, namespace: &str) -> anyhow::Result<()> {
        let api: Api<Test> = Api::namespaced(self.client.clone(), namespace);
        if api.get_opt(SAMPLE_NAME).await?.is_some() {
            debug!(namespace, name = SAMPLE_NAME, "Sample Test resource already exists");
            return Ok(());
        }

        let sample = Test::new(
            SAMPLE_NAME,
            TestSpec {
                value: SAMPLE_VALUE.to_string(),
            },
        );
        api.create(&PostParams::default(), &sample)
            .await
            .with_context(|| format!("failed to create sample Test {namespace}/{SAMPLE_NAME}"))?;
        info!(namespace, name = SAMPLE_NAME, "Created sample Test resource");
        Ok(())
    }

    async fn sync_status(&self, test: &Test) -> anyhow::Result<()> {
        let Some(namespace) = test.namespace() else {
            return Ok(());
        };
        let name = test.name_any();
        let api: Api<Test> = Api::namespaced(self.client.clone(), &namespace);
        let patch = serde_json::json!({
            "status": {
                "observedValue": test.spec.value,
                "lastReconciled": chrono::Utc::now(),
            }
        });
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("failed to update status of Test {namespace}/{name}"))?;
        info!(%namespace, %name, value = %test.spec.value, "Updated Test status");
        Ok(())
    }
}

/// Whether `status.observedValue` lags behind `spec.value`.
pub fn needs_status_update(test: &Test) -> bool {
    test.status.as_ref().and_then(|s| s.observed_value.as_deref()) != Some(test.spec.value.as_str())
}

#[async_trait]
impl Reconcile<Test> for TestReconciler {
    async fn reconcile(&self, ctx: ReconcileContext<Test>) -> anyhow::Result<()> {
        if ctx.trigger() == ReconcileTrigger::Startup {
            if let Some(namespace) = &self.namespace {
                self.seed_sample(namespace).await?;
            }
            return Ok(());
        }

        let resources = ctx.resources();
        debug!(trigger = %ctx.trigger(), count = resources.len(), "Reconciling Test resources");
        for test in resources.iter().filter(|t| needs_status_update(t)) {
            if ctx.is_cancelled() {
                debug!("Reconciliation cancelled");
                break;
            }
            self.sync_status(test).await?;
        }
        Ok(())
    }
}
