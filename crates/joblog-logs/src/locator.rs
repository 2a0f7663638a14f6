use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use joblog_k8s::{ClusterApi, ClusterResolver};
use joblog_types::{JobLabelSelector, JobLogError, PodReference};

use crate::interrupt::{Interrupt, guarded, until_cancelled};

/// A running job pod and the cluster it was found on
pub struct LocatedPod {
    pub api: Arc<dyn ClusterApi>,
    pub pod: PodReference,
}

/// Finds the pod of a job once it is running
pub struct PodLocator {
    clusters: Arc<dyn ClusterResolver>,
    timeout: Duration,
}

impl PodLocator {
    pub fn new(clusters: Arc<dyn ClusterResolver>, timeout: Duration) -> Self {
        Self { clusters, timeout }
    }

    /// Wait up to the locator's timeout for a pod matching `selector` to run,
    /// then return the first matching pod in listing order
    pub async fn locate(
        &self,
        cancel: &CancellationToken,
        cluster_id: &str,
        namespace: &str,
        selector: &JobLabelSelector,
    ) -> Result<LocatedPod, Interrupt> {
        debug!(
            %selector,
            cluster_id,
            namespace,
            "Waiting until pod is running before establishing the stream"
        );

        // An empty selector matches every pod in the namespace
        if selector.is_empty() {
            return Err(JobLogError::NoPodFound {
                selector: selector.to_string(),
                namespace: namespace.to_string(),
            }
            .into());
        }

        let api = match guarded(cancel, self.clusters.resolve(cluster_id)).await {
            Ok(api) => api,
            Err(Interrupt::Cancelled) => {
                debug!(cluster_id, "Cancelled while resolving cluster");
                return Err(Interrupt::Cancelled);
            }
            Err(Interrupt::Failed(err)) => {
                error!("Failed to get client for cluster {}: {}", cluster_id, err);
                return Err(err.into());
            }
        };

        let wait = tokio::time::timeout(self.timeout, api.wait_pod_running(namespace, selector));
        match until_cancelled(cancel, wait).await? {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!("Failed waiting for pod to run: {}", err);
                return Err(err.into());
            }
            Err(_elapsed) => {
                return Err(JobLogError::Timeout {
                    selector: selector.to_string(),
                    namespace: namespace.to_string(),
                    timeout: self.timeout,
                }
                .into());
            }
        }

        let pods = guarded(cancel, api.list_pods(namespace, selector)).await?;
        debug!("Found {} running pods", pods.len());

        let pod = pods
            .into_iter()
            .next()
            .ok_or_else(|| JobLogError::NoPodFound {
                selector: selector.to_string(),
                namespace: namespace.to_string(),
            })?;

        Ok(LocatedPod { api, pod })
    }
}
