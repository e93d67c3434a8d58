use std::time::Duration;

use clap::Args;

/// Tunables shared by both controllers. Every flag can also be set
/// through its environment variable.
#[derive(Debug, Clone, Args)]
pub struct ControllerConfig {
    /// Namespace holding pod execution tracking ConfigMaps and probe Pods.
    #[arg(long, env = "READINESS_TRACKING_NAMESPACE", default_value = "default")]
    pub tracking_namespace: String,

    /// Upper bound on a single Capability reconcile.
    #[arg(long, env = "READINESS_RECONCILE_TIMEOUT_SECS", default_value_t = 60)]
    pub reconcile_timeout_secs: u64,

    /// Periodic Capability requeue interval.
    #[arg(long, env = "READINESS_REQUEUE_INTERVAL_SECS", default_value_t = 60)]
    pub requeue_interval_secs: u64,

    /// How often ReadinessProviders are re-evaluated.
    #[arg(long, env = "READINESS_POLL_INTERVAL_SECS", default_value_t = 10)]
    pub readiness_poll_interval_secs: u64,
}

impl ControllerConfig {
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    pub fn requeue_interval(&self) -> Duration {
        Duration::from_secs(self.requeue_interval_secs)
    }

    pub fn readiness_poll_interval(&self) -> Duration {
        Duration::from_secs(self.readiness_poll_interval_secs)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            tracking_namespace: "default".to_string(),
            reconcile_timeout_secs: 60,
            requeue_interval_secs: 60,
            readiness_poll_interval_secs: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::ControllerConfig;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        config: ControllerConfig,
    }

    #[test]
    fn flag_defaults_match_default_impl() {
        let parsed = Harness::parse_from(["readiness-controller"]).config;
        let default = ControllerConfig::default();

        assert_eq!(parsed.tracking_namespace, default.tracking_namespace);
        assert_eq!(parsed.reconcile_timeout(), default.reconcile_timeout());
        assert_eq!(parsed.requeue_interval(), default.requeue_interval());
        assert_eq!(
            parsed.readiness_poll_interval(),
            default.readiness_poll_interval()
        );
    }

    #[test]
    fn flags_override_defaults() {
        let parsed = Harness::parse_from([
            "readiness-controller",
            "--tracking-namespace",
            "tanzu-system",
            "--reconcile-timeout-secs",
            "5",
        ])
        .config;

        assert_eq!(parsed.tracking_namespace, "tanzu-system");
        assert_eq!(parsed.reconcile_timeout_secs, 5);
    }
}
