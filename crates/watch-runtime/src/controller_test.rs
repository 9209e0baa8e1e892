//! Unit tests for the resource controller

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::options::ReconnectPolicy;
    use crate::test_utils::{config_map, next_notification, wait_until};
    use cluster_client::{ClientError, MockResourceClient, WatchNotification};
    use k8s_openapi::api::core::v1::ConfigMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WAIT: Duration = Duration::from_secs(1);

    /// Reconciler that records its runs
    #[derive(Default)]
    struct TestReconciler {
        fail_startup: bool,
        /// How long non-startup runs take
        delay: Duration,
        /// Whether non-startup runs stop early on cancellation
        cooperative: bool,
        calls: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        cancelled: AtomicUsize,
        triggers: Mutex<Vec<ReconcileTrigger>>,
        seen_resources: Mutex<Vec<usize>>,
    }

    impl TestReconciler {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn triggers(&self) -> Vec<ReconcileTrigger> {
            self.triggers.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Reconcile<ConfigMap> for TestReconciler {
        async fn reconcile(&self, ctx: ReconcileContext<ConfigMap>) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.triggers.lock().unwrap().push(ctx.trigger());
            self.seen_resources.lock().unwrap().push(ctx.resources().len());

            if ctx.trigger() == ReconcileTrigger::Startup {
                anyhow::ensure!(!self.fail_startup, "startup reconciliation failed");
                return Ok(());
            }

            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            if self.cooperative {
                tokio::select! {
                    _ = ctx.cancellation_token().cancelled() => {
                        self.cancelled.fetch_add(1, Ordering::SeqCst);
                    }
                    _ = tokio::time::sleep(self.delay) => {}
                }
            } else {
                tokio::time::sleep(self.delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn manual() -> ControllerOptions<ConfigMap> {
        ControllerOptions::builder()
            .use_automatic_reconciliation(false)
            .reconnect(ReconnectPolicy::Immediate)
            .build()
            .unwrap()
    }

    fn controller(
        client: &MockResourceClient<ConfigMap>,
        reconciler: TestReconciler,
        options: ControllerOptions<ConfigMap>,
    ) -> ResourceController<ConfigMap, TestReconciler> {
        ResourceController::for_resource(Arc::new(client.clone()), reconciler, options).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_then_periodic_reconciliation() {
        let client = MockResourceClient::new();
        let options = ControllerOptions::builder()
            .reconcile_every(Duration::from_millis(50))
            .reconnect(ReconnectPolicy::Immediate)
            .build()
            .unwrap();
        let controller = controller(&client, TestReconciler::default(), options);

        controller.start().await.unwrap();
        assert_eq!(controller.reconciler().calls(), 1);
        assert_eq!(controller.state(), LifecycleState::Running);

        tokio::time::sleep(Duration::from_millis(120)).await;

        let reconciler = controller.reconciler();
        assert!(reconciler.calls() >= 3, "expected at least 3 calls, got {}", reconciler.calls());
        let triggers = reconciler.triggers();
        assert_eq!(triggers[0], ReconcileTrigger::Startup);
        assert!(triggers[1..].iter().all(|t| *t == ReconcileTrigger::Periodic));

        controller.stop(Some(WAIT)).await.unwrap();
    }

    #[tokio::test]
    async fn test_startup_failure_aborts_start() {
        let client = MockResourceClient::new();
        let reconciler = TestReconciler {
            fail_startup: true,
            ..Default::default()
        };
        let controller = controller(&client, reconciler, manual());

        let result = controller.start().await;

        assert!(matches!(result, Err(ControllerError::Reconciliation(_))));
        assert_eq!(controller.state(), LifecycleState::NotStarted);
        assert_eq!(controller.watcher().state(), LifecycleState::NotStarted);
        assert_eq!(client.snapshot_calls(), 0);
    }

    #[tokio::test]
    async fn test_stream_error_triggers_reconciliation() {
        let client = MockResourceClient::new();
        let controller = controller(&client, TestReconciler::default(), manual());

        controller.start().await.unwrap();
        assert!(client.wait_for_stream_opens(1, WAIT).await);
        client.fail(ClientError::Stream("410 Gone".to_string()));

        wait_until(|| controller.reconciler().calls() == 2).await;
        assert_eq!(
            controller.reconciler().triggers(),
            vec![ReconcileTrigger::Startup, ReconcileTrigger::StreamError]
        );
        controller.stop(Some(WAIT)).await.unwrap();
    }

    #[tokio::test]
    async fn test_ordinary_events_do_not_trigger_reconciliation() {
        let client = MockResourceClient::new();
        let controller = controller(&client, TestReconciler::default(), manual());
        let (_subscription, mut rx) = controller.watcher().subscribe_channel();

        controller.start().await.unwrap();
        assert!(client.wait_for_stream_opens(1, WAIT).await);
        client.push(WatchNotification::Added(config_map("a", "1")));
        client.push(WatchNotification::Modified(config_map("a", "2")));
        client.push(WatchNotification::Bookmark {
            resource_version: "9".to_string(),
        });
        for _ in 0..3 {
            next_notification(&mut rx).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(controller.reconciler().calls(), 1);
        controller.stop(Some(WAIT)).await.unwrap();
    }

    #[tokio::test]
    async fn test_reconcile_sees_mirror_content() {
        let client = MockResourceClient::new();
        client.set_items(vec![config_map("a", "1"), config_map("b", "1")]);
        let controller = controller(&client, TestReconciler::default(), manual());

        controller.start().await.unwrap();
        assert!(client.wait_for_stream_opens(1, WAIT).await);
        controller.shared.trigger(ReconcileTrigger::Periodic);
        wait_until(|| controller.reconciler().calls() == 2).await;

        // The startup run happens before the first snapshot
        assert_eq!(*controller.reconciler().seen_resources.lock().unwrap(), vec![0, 2]);
        controller.stop(Some(WAIT)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight_coalesces_triggers() {
        let client = MockResourceClient::new();
        let reconciler = TestReconciler {
            delay: Duration::from_millis(100),
            ..Default::default()
        };
        let options = ControllerOptions::builder()
            .use_automatic_reconciliation(false)
            .reconcile_policy(ReconcilePolicy::SingleFlight)
            .reconnect(ReconnectPolicy::Immediate)
            .build()
            .unwrap();
        let controller = controller(&client, reconciler, options);
        controller.start().await.unwrap();

        controller.shared.trigger(ReconcileTrigger::Periodic);
        controller.shared.trigger(ReconcileTrigger::StreamError);
        controller.shared.trigger(ReconcileTrigger::Periodic);
        tokio::time::sleep(Duration::from_millis(500)).await;

        let reconciler = controller.reconciler();
        // One run plus exactly one coalesced follow-up
        assert_eq!(reconciler.calls(), 3);
        assert_eq!(reconciler.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(reconciler.triggers()[2], ReconcileTrigger::Periodic);

        // Idle again, so the next trigger runs right away
        controller.shared.trigger(ReconcileTrigger::Periodic);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(controller.reconciler().calls(), 4);
        controller.stop(Some(WAIT)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_allow_overlap_runs_concurrently() {
        let client = MockResourceClient::new();
        let reconciler = TestReconciler {
            delay: Duration::from_millis(100),
            ..Default::default()
        };
        let controller = controller(&client, reconciler, manual());
        controller.start().await.unwrap();

        controller.shared.trigger(ReconcileTrigger::Periodic);
        controller.shared.trigger(ReconcileTrigger::StreamError);
        controller.shared.trigger(ReconcileTrigger::Periodic);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(controller.reconciler().active.load(Ordering::SeqCst), 3);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(controller.reconciler().calls(), 4);
        assert_eq!(controller.reconciler().max_active.load(Ordering::SeqCst), 3);
        controller.stop(Some(WAIT)).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_cancels_and_waits_for_in_flight_run() {
        let client = MockResourceClient::new();
        let reconciler = TestReconciler {
            delay: Duration::from_secs(600),
            cooperative: true,
            ..Default::default()
        };
        let controller = controller(&client, reconciler, manual());

        controller.start().await.unwrap();
        assert!(client.wait_for_stream_opens(1, WAIT).await);
        client.fail(ClientError::Transport("connection reset".to_string()));
        wait_until(|| controller.reconciler().active.load(Ordering::SeqCst) == 1).await;

        controller.stop(Some(WAIT)).await.unwrap();

        let reconciler = controller.reconciler();
        assert_eq!(reconciler.cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(reconciler.active.load(Ordering::SeqCst), 0);
        assert_eq!(controller.state(), LifecycleState::Stopped);
        assert_eq!(controller.watcher().state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_abandons_uncooperative_run_after_timeout() {
        let client = MockResourceClient::new();
        let reconciler = TestReconciler {
            delay: Duration::from_secs(600),
            ..Default::default()
        };
        let controller = controller(&client, reconciler, manual());

        controller.start().await.unwrap();
        assert!(client.wait_for_stream_opens(1, WAIT).await);
        client.fail(ClientError::Transport("connection reset".to_string()));
        wait_until(|| controller.reconciler().active.load(Ordering::SeqCst) == 1).await;

        let result = controller.stop(Some(Duration::from_millis(100))).await;

        assert!(matches!(result, Err(ControllerError::StopTimeout { abandoned: 1, .. })));
        assert_eq!(controller.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_restart_after_stop_is_rejected() {
        let client = MockResourceClient::new();
        let controller = controller(&client, TestReconciler::default(), manual());

        controller.start().await.unwrap();
        // Starting twice is a no-op
        controller.start().await.unwrap();
        assert_eq!(controller.reconciler().calls(), 1);

        controller.stop(None).await.unwrap();
        assert!(matches!(controller.start().await, Err(ControllerError::Stopped(_))));
        assert_eq!(controller.reconciler().calls(), 1);
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let client = MockResourceClient::new();
        let controller = controller(&client, TestReconciler::default(), manual());

        controller.stop(None).await.unwrap();

        assert_eq!(controller.state(), LifecycleState::Stopped);
        assert_eq!(controller.reconciler().calls(), 0);
        assert!(matches!(controller.start().await, Err(ControllerError::Stopped(_))));
    }

    #[test]
    fn test_zero_period_is_rejected() {
        let client: MockResourceClient<ConfigMap> = MockResourceClient::new();
        let options = ControllerOptions::<ConfigMap> {
            reconcile_period: Duration::ZERO,
            ..ControllerOptions::default()
        };

        let result = ResourceController::for_resource(Arc::new(client), TestReconciler::default(), options);
        assert!(matches!(result, Err(ControllerError::InvalidConfig(_))));
    }
}
