use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::api::{ListParams, LogParams};
use kube::runtime::watcher::{self, Event, watcher};

use joblog_types::{JobLabelSelector, JobLogError, PodPhase, PodReference, Result};

use crate::{ClusterApi, LogReader};

/// [`ClusterApi`] over a kube client
#[derive(Clone)]
pub struct KubeClusterApi {
    client: kube::Client,
}

impl KubeClusterApi {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// Pods API of a namespace; an empty namespace is the client's default
    fn pods(&self, namespace: &str) -> Api<Pod> {
        if namespace.is_empty() {
            Api::default_namespaced(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        }
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn wait_pod_running(&self, namespace: &str, selector: &JobLabelSelector) -> Result<()> {
        let cfg = watcher::Config::default().labels(&selector.to_selector_string());
        let mut stream = watcher(self.pods(namespace), cfg).boxed();

        while let Some(event) = stream.try_next().await.map_err(JobLogError::transport)? {
            match event {
                Event::Apply(pod) | Event::InitApply(pod) => {
                    if is_pod_running(&pod) {
                        tracing::debug!(
                            pod = pod.metadata.name.as_deref().unwrap_or_default(),
                            namespace,
                            "Pod is running"
                        );
                        return Ok(());
                    }
                }
                Event::Delete(_) | Event::Init | Event::InitDone => {}
            }
        }

        Err(JobLogError::Transport(format!(
            "pod watch for '{}' in namespace '{}' closed",
            selector, namespace
        )))
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &JobLabelSelector,
    ) -> Result<Vec<PodReference>> {
        let list = self
            .pods(namespace)
            .list(&ListParams::default().labels(&selector.to_selector_string()))
            .await
            .map_err(JobLogError::transport)?;

        Ok(list
            .items
            .into_iter()
            .map(|pod| pod_reference(pod, namespace))
            .collect())
    }

    async fn open_log_stream(
        &self,
        namespace: &str,
        pod_name: &str,
        container_name: &str,
        follow: bool,
        tail_lines: Option<i64>,
    ) -> Result<LogReader> {
        let params = LogParams {
            follow,
            container: (!container_name.is_empty()).then(|| container_name.to_string()),
            tail_lines,
            ..Default::default()
        };

        let stream = self
            .pods(namespace)
            .log_stream(pod_name, &params)
            .await
            .map_err(JobLogError::transport)?;
        Ok(Box::pin(stream))
    }
}

/// Whether a pod has reached the running phase
pub fn is_pod_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map(PodPhase::from)
        == Some(PodPhase::Running)
}

/// Convert a k8s Pod to a PodReference
pub fn pod_reference(pod: Pod, namespace: &str) -> PodReference {
    let name = pod.metadata.name.unwrap_or_default();
    let namespace = pod
        .metadata
        .namespace
        .unwrap_or_else(|| namespace.to_string());
    let mut reference = PodReference::new(name, namespace);

    reference.created_at = pod.metadata.creation_timestamp.map(|t| t.0);
    if let Some(status) = pod.status {
        reference.phase = status
            .phase
            .as_deref()
            .map(PodPhase::from)
            .unwrap_or_default();
    }

    reference
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn pod(name: &str, phase: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: phase.map(|p| PodStatus {
                phase: Some(p.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_is_pod_running() {
        assert!(is_pod_running(&pod("a", Some("Running"))));
        assert!(!is_pod_running(&pod("a", Some("Pending"))));
        assert!(!is_pod_running(&pod("a", None)));
    }

    #[test]
    fn test_pod_reference_defaults_namespace() {
        let reference = pod_reference(pod("build-abc", Some("Succeeded")), "jobs");
        assert_eq!(reference.name, "build-abc");
        assert_eq!(reference.namespace, "jobs");
        assert_eq!(reference.phase, PodPhase::Succeeded);
        assert!(reference.created_at.is_none());
    }

    #[test]
    fn test_pod_reference_keeps_pod_namespace() {
        let mut p = pod("build-abc", None);
        p.metadata.namespace = Some("agents".to_string());
        let reference = pod_reference(p, "");
        assert_eq!(reference.namespace, "agents");
        assert_eq!(reference.phase, PodPhase::Unknown);
    }
}
