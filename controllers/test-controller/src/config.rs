//! Controller configuration.
//!
//! Read from environment variables:
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `WATCH_NAMESPACE` | all namespaces | Namespace to watch |
//! | `WATCH_LABEL_SELECTOR` | none | Label selector |
//! | `WATCH_FIELD_SELECTOR` | none | Field selector |
//! | `AUTO_RECONCILE` | `true` | Periodic reconciliation |
//! | `RECONCILE_PERIOD_SECS` | `60` | Period in seconds |
//! | `RECONCILE_POLICY` | `allow-overlap` | `allow-overlap` or `single-flight` |

use std::env;
use std::time::Duration;
use watch_runtime::{ControllerError, ControllerOptions, ReconcilePolicy, WatchOptions};

/// Controller settings, see the module docs for the variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub namespace: Option<String>,
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    pub auto_reconcile: bool,
    pub reconcile_period: Duration,
    pub reconcile_policy: ReconcilePolicy,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let auto_reconcile = match non_empty("AUTO_RECONCILE") {
            Some(value) => value.parse::<bool>().map_err(|_| {
                ControllerError::InvalidConfig(format!("AUTO_RECONCILE must be true or false, got '{value}'"))
            })?,
            None => true,
        };

        let reconcile_period = match non_empty("RECONCILE_PERIOD_SECS") {
            Some(value) => {
                let secs = value.parse::<u64>().map_err(|_| {
                    ControllerError::InvalidConfig(format!(
                        "RECONCILE_PERIOD_SECS must be a number of seconds, got '{value}'"
                    ))
                })?;
                Duration::from_secs(secs)
            }
            None => ControllerOptions::<()>::DEFAULT_PERIOD,
        };

        let reconcile_policy = match non_empty("RECONCILE_POLICY") {
            Some(value) => value.parse()?,
            None => ReconcilePolicy::default(),
        };

        Ok(Self {
            namespace: non_empty("WATCH_NAMESPACE"),
            label_selector: non_empty("WATCH_LABEL_SELECTOR"),
            field_selector: non_empty("WATCH_FIELD_SELECTOR"),
            auto_reconcile,
            reconcile_period,
            reconcile_policy,
        })
    }

    /// Watch options for the configured namespace and selectors.
    pub fn watch_options<K>(&self) -> WatchOptions<K> {
        let mut builder = WatchOptions::builder();
        if let Some(namespace) = &self.namespace {
            builder = builder.in_namespace(namespace.as_str());
        }
        if let Some(selector) = &self.label_selector {
            builder = builder.with_label(selector.as_str());
        }
        if let Some(selector) = &self.field_selector {
            builder = builder.with_field(selector.as_str());
        }
        builder.build()
    }

    /// Controller options; rejects a zero period when auto-reconcile is on.
    pub fn controller_options<K>(&self) -> Result<ControllerOptions<K>, ControllerError> {
        let options = ControllerOptions {
            auto_reconcile: self.auto_reconcile,
            reconcile_period: self.reconcile_period,
            watch: self.watch_options(),
            reconcile_policy: self.reconcile_policy,
        };
        options.validate()?;
        Ok(options)
    }
}
