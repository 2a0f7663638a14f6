//! Kubernetes client for joblog
//!
//! This crate provides the cluster-facing half of log streaming: resolving a
//! client for a cluster id, waiting for job pods to run, listing them and
//! opening container log streams.

mod client;
mod pods;

use async_trait::async_trait;
use futures::AsyncBufRead;
use std::pin::Pin;
use std::sync::Arc;

use joblog_types::{JobLabelSelector, PodReference, Result};

pub use client::{ClusterEndpoint, KubeClusterRegistry};
pub use pods::{KubeClusterApi, is_pod_running, pod_reference};

/// Readable container log output; dropping it releases the stream
pub type LogReader = Pin<Box<dyn AsyncBufRead + Send>>;

/// Pod operations against a single cluster
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Wait until a pod matching `selector` in `namespace` is running.
    ///
    /// Never gives up on its own; callers bound it with a deadline.
    async fn wait_pod_running(&self, namespace: &str, selector: &JobLabelSelector) -> Result<()>;

    /// Pods matching `selector`, in API listing order
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &JobLabelSelector,
    ) -> Result<Vec<PodReference>>;

    /// Open the log stream of one container
    async fn open_log_stream(
        &self,
        namespace: &str,
        pod_name: &str,
        container_name: &str,
        follow: bool,
        tail_lines: Option<i64>,
    ) -> Result<LogReader>;
}

/// Yields the [`ClusterApi`] of a cluster id
#[async_trait]
pub trait ClusterResolver: Send + Sync {
    /// Resolve a cluster; an empty id is the local cluster
    async fn resolve(&self, cluster_id: &str) -> Result<Arc<dyn ClusterApi>>;
}
