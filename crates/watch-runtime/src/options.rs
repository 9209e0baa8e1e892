//! Construction-time options for watchers and controllers.

use crate::backoff::FibonacciBackoff;
use crate::error::ControllerError;
use crate::event::ChangeEvent;
use cluster_client::ListScope;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Per-event filter evaluated before publication to subscribers.
pub type Predicate<K> = Arc<dyn Fn(&ChangeEvent<K>) -> bool + Send + Sync>;

/// What a watch session does between the end of a stream and the next resynchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Resynchronize right away
    Immediate,
    /// Wait a Fibonacci-growing delay, reset once a stream delivers an event
    Fibonacci {
        /// First delay
        min: Duration,
        /// Cap
        max: Duration,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fibonacci {
            min: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    pub(crate) fn backoff(&self) -> Option<FibonacciBackoff> {
        match *self {
            Self::Immediate => None,
            Self::Fibonacci { min, max } => Some(FibonacciBackoff::new(min, max)),
        }
    }
}

/// Options of a watch session.
pub struct WatchOptions<K> {
    /// Namespace and selectors applied to both the snapshot and the stream
    pub scope: ListScope,
    /// Filter on what reaches subscribers; the mirror sees every event
    pub predicate: Option<Predicate<K>>,
    /// Delay policy between failures and resynchronization
    pub reconnect: ReconnectPolicy,
}

impl<K> WatchOptions<K> {
    /// Start building options. Defaults to a cluster-wide watch.
    pub fn builder() -> WatchOptionsBuilder<K> {
        WatchOptionsBuilder {
            options: Self::default(),
        }
    }

    pub(crate) fn accepts(&self, event: &ChangeEvent<K>) -> bool {
        event.is_error() || self.predicate.as_ref().is_none_or(|predicate| predicate(event))
    }
}

impl<K> Default for WatchOptions<K> {
    fn default() -> Self {
        Self {
            scope: ListScope::default(),
            predicate: None,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl<K> Clone for WatchOptions<K> {
    fn clone(&self) -> Self {
        Self {
            scope: self.scope.clone(),
            predicate: self.predicate.clone(),
            reconnect: self.reconnect,
        }
    }
}

impl<K> fmt::Debug for WatchOptions<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchOptions")
            .field("scope", &self.scope)
            .field("predicate", &self.predicate.is_some())
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

/// Fluent builder for [`WatchOptions`].
pub struct WatchOptionsBuilder<K> {
    options: WatchOptions<K>,
}

impl<K> WatchOptionsBuilder<K> {
    /// Watch every namespace.
    #[must_use]
    pub fn in_cluster(mut self) -> Self {
        self.options.scope.namespace = None;
        self
    }

    /// Watch a single namespace. An empty name means cluster-wide.
    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.options.scope.namespace = Some(namespace.into());
        self
    }

    /// Only instances matching the label selector.
    #[must_use]
    pub fn with_label(mut self, selector: impl Into<String>) -> Self {
        self.options.scope.label_selector = Some(selector.into());
        self
    }

    /// Only instances matching the field selector.
    #[must_use]
    pub fn with_field(mut self, selector: impl Into<String>) -> Self {
        self.options.scope.field_selector = Some(selector.into());
        self
    }

    /// Only publish events the predicate accepts. Error events always pass.
    #[must_use]
    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ChangeEvent<K>) -> bool + Send + Sync + 'static,
    {
        self.options.predicate = Some(Arc::new(predicate));
        self
    }

    /// Set the reconnect policy.
    #[must_use]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.options.reconnect = policy;
        self
    }

    /// Finish building.
    pub fn build(self) -> WatchOptions<K> {
        self.options
    }
}

/// How fire-and-forget reconcile triggers are dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReconcilePolicy {
    /// Every trigger spawns a run, runs may overlap
    #[default]
    AllowOverlap,
    /// At most one run at a time; triggers arriving meanwhile coalesce into one follow-up run
    SingleFlight,
}

impl FromStr for ReconcilePolicy {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow-overlap" | "allowoverlap" | "overlap" => Ok(Self::AllowOverlap),
            "single-flight" | "singleflight" => Ok(Self::SingleFlight),
            other => Err(ControllerError::InvalidConfig(format!(
                "unknown reconcile policy '{other}' (expected allow-overlap or single-flight)"
            ))),
        }
    }
}

/// Options of a resource controller.
pub struct ControllerOptions<K> {
    /// Whether the periodic timer is armed
    pub auto_reconcile: bool,
    /// Period of the timer
    pub reconcile_period: Duration,
    /// Options of the underlying watch session
    pub watch: WatchOptions<K>,
    /// Dispatch policy of periodic and error-triggered runs
    pub reconcile_policy: ReconcilePolicy,
}

impl<K> ControllerOptions<K> {
    /// Default period of automatic reconciliation.
    pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);

    /// Start building options.
    pub fn builder() -> ControllerOptionsBuilder<K> {
        ControllerOptionsBuilder {
            options: Self::default(),
        }
    }

    /// Check the options for values the controller cannot run with.
    ///
    /// # Errors
    ///
    /// [`ControllerError::InvalidConfig`] for a zero period with automatic
    /// reconciliation enabled.
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.auto_reconcile && self.reconcile_period.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "reconciliation period must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl<K> Default for ControllerOptions<K> {
    fn default() -> Self {
        Self {
            auto_reconcile: true,
            reconcile_period: Self::DEFAULT_PERIOD,
            watch: WatchOptions::default(),
            reconcile_policy: ReconcilePolicy::default(),
        }
    }
}

impl<K> Clone for ControllerOptions<K> {
    fn clone(&self) -> Self {
        Self {
            auto_reconcile: self.auto_reconcile,
            reconcile_period: self.reconcile_period,
            watch: self.watch.clone(),
            reconcile_policy: self.reconcile_policy,
        }
    }
}

impl<K> fmt::Debug for ControllerOptions<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerOptions")
            .field("auto_reconcile", &self.auto_reconcile)
            .field("reconcile_period", &self.reconcile_period)
            .field("watch", &self.watch)
            .field("reconcile_policy", &self.reconcile_policy)
            .finish()
    }
}

/// Fluent builder for [`ControllerOptions`].
pub struct ControllerOptionsBuilder<K> {
    options: ControllerOptions<K>,
}

impl<K> ControllerOptionsBuilder<K> {
    /// Enable or disable the periodic timer.
    #[must_use]
    pub fn use_automatic_reconciliation(mut self, enabled: bool) -> Self {
        self.options.auto_reconcile = enabled;
        self
    }

    /// Reconcile on this period. Implies automatic reconciliation.
    #[must_use]
    pub fn reconcile_every(mut self, period: Duration) -> Self {
        self.options.auto_reconcile = true;
        self.options.reconcile_period = period;
        self
    }

    /// Configure the underlying watch session.
    #[must_use]
    pub fn watch<F>(mut self, configure: F) -> Self
    where
        F: FnOnce(WatchOptionsBuilder<K>) -> WatchOptionsBuilder<K>,
    {
        let builder = WatchOptionsBuilder {
            options: self.options.watch,
        };
        self.options.watch = configure(builder).build();
        self
    }

    /// Set the dispatch policy.
    #[must_use]
    pub fn reconcile_policy(mut self, policy: ReconcilePolicy) -> Self {
        self.options.reconcile_policy = policy;
        self
    }

    /// Set the reconnect policy of the watch session.
    #[must_use]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.options.watch.reconnect = policy;
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::InvalidConfig`] when automatic reconciliation
    /// is enabled with a zero period.
    pub fn build(self) -> Result<ControllerOptions<K>, ControllerError> {
        self.options.validate()?;
        Ok(self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WatchError;
    use crate::test_utils::config_map;
    use k8s_openapi::api::core::v1::ConfigMap;

    #[test]
    fn test_watch_options_builder_sets_scope() {
        let options: WatchOptions<ConfigMap> = WatchOptions::builder()
            .in_namespace("test")
            .with_label("app=demo")
            .with_field("metadata.name=a")
            .reconnect(ReconnectPolicy::Immediate)
            .build();

        assert_eq!(options.scope.namespace(), Some("test"));
        assert_eq!(options.scope.label_selector.as_deref(), Some("app=demo"));
        assert_eq!(options.scope.field_selector.as_deref(), Some("metadata.name=a"));
        assert_eq!(options.reconnect, ReconnectPolicy::Immediate);

        let cluster: WatchOptions<ConfigMap> = WatchOptions::builder().in_namespace("test").in_cluster().build();
        assert_eq!(cluster.scope.namespace(), None);
    }

    #[test]
    fn test_predicate_never_filters_errors() {
        let options: WatchOptions<ConfigMap> = WatchOptions::builder()
            .when(|event| matches!(event, ChangeEvent::Deleted(_)))
            .build();

        assert!(!options.accepts(&ChangeEvent::Added(config_map("a", "1"))));
        assert!(options.accepts(&ChangeEvent::Deleted(config_map("a", "1"))));
        assert!(options.accepts(&ChangeEvent::Error(Arc::new(WatchError::NoRuntime))));
    }

    #[test]
    fn test_controller_options_defaults() {
        let options: ControllerOptions<ConfigMap> = ControllerOptions::builder().build().unwrap();

        assert!(options.auto_reconcile);
        assert_eq!(options.reconcile_period, Duration::from_secs(60));
        assert_eq!(options.reconcile_policy, ReconcilePolicy::AllowOverlap);
        assert_eq!(options.watch.reconnect, ReconnectPolicy::default());
    }

    #[test]
    fn test_controller_options_nested_watch_builder() {
        let options: ControllerOptions<ConfigMap> = ControllerOptions::builder()
            .use_automatic_reconciliation(false)
            .watch(|watch| watch.in_namespace("test").with_label("tier=db"))
            .reconnect(ReconnectPolicy::Immediate)
            .build()
            .unwrap();

        assert!(!options.auto_reconcile);
        assert_eq!(options.watch.scope.namespace(), Some("test"));
        assert_eq!(options.watch.scope.label_selector.as_deref(), Some("tier=db"));
        assert_eq!(options.watch.reconnect, ReconnectPolicy::Immediate);
    }

    #[test]
    fn test_zero_period_rejected_only_when_auto_reconcile() {
        let result = ControllerOptions::<ConfigMap>::builder()
            .reconcile_every(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(ControllerError::InvalidConfig(_))));

        let manual = ControllerOptions::<ConfigMap>::builder()
            .reconcile_every(Duration::ZERO)
            .use_automatic_reconciliation(false)
            .build();
        assert!(manual.is_ok());
    }

    #[test]
    fn test_reconcile_policy_from_str() {
        assert_eq!("single-flight".parse::<ReconcilePolicy>().unwrap(), ReconcilePolicy::SingleFlight);
        assert_eq!(" Allow-Overlap ".parse::<ReconcilePolicy>().unwrap(), ReconcilePolicy::AllowOverlap);
        assert!(matches!(
            "serial".parse::<ReconcilePolicy>(),
            Err(ControllerError::InvalidConfig(_))
        ));
    }
}
