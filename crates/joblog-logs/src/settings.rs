use std::time::Duration;

use joblog_types::LOCAL_CLUSTER_ID;

/// How long a session waits for its job pod to run
pub const POD_WAIT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Engine-wide settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    /// Namespace of job pods on the local cluster
    pub default_namespace: String,
    /// Namespace shared by job pods on every attached cluster
    pub attached_namespace: String,
    pub pod_wait_timeout: Duration,
}

impl EngineSettings {
    /// Namespace job pods of a cluster run in.
    ///
    /// An empty cluster id is the local cluster.
    pub fn namespace_for(&self, cluster_id: &str) -> &str {
        if cluster_id.is_empty() || cluster_id == LOCAL_CLUSTER_ID {
            &self.default_namespace
        } else {
            &self.attached_namespace
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_namespace: "zadig".to_string(),
            attached_namespace: "koderover-agent".to_string(),
            pod_wait_timeout: POD_WAIT_TIMEOUT,
        }
    }
}
