use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use joblog_types::{JobLogError, LOCAL_CLUSTER_ID};

use crate::pods::KubeClusterApi;
use crate::{ClusterApi, ClusterResolver};

/// How to reach a cluster
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterEndpoint {
    /// Kubeconfig context (the kubeconfig's current context when unset)
    pub context: Option<String>,
    /// Kubeconfig file (the default kubeconfig lookup when unset)
    pub kubeconfig: Option<PathBuf>,
}

impl ClusterEndpoint {
    fn uses_kubeconfig(&self) -> bool {
        self.context.is_some() || self.kubeconfig.is_some()
    }
}

/// Cluster registry backed by kubeconfig contexts.
///
/// One `kube::Client` is built per cluster id on first use and shared by all
/// sessions afterwards.
pub struct KubeClusterRegistry {
    endpoints: HashMap<String, ClusterEndpoint>,
    clients: RwLock<HashMap<String, kube::Client>>,
}

impl KubeClusterRegistry {
    /// Create a registry for the given cluster ids.
    ///
    /// The local cluster is always known: without an explicit endpoint it
    /// uses the inferred in-cluster or kubeconfig configuration.
    pub fn new(endpoints: HashMap<String, ClusterEndpoint>) -> Self {
        Self {
            endpoints,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Cluster ids with a configured endpoint
    pub fn cluster_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.endpoints.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    fn endpoint(&self, cluster_id: &str) -> Option<ClusterEndpoint> {
        match self.endpoints.get(cluster_id) {
            Some(endpoint) => Some(endpoint.clone()),
            None if cluster_id == LOCAL_CLUSTER_ID => Some(ClusterEndpoint::default()),
            None => None,
        }
    }

    /// Get the cached client of a cluster, building it on first use
    pub async fn client_for_cluster(&self, cluster_id: &str) -> Result<kube::Client> {
        let cluster_id = normalize_cluster_id(cluster_id);

        let cached = self.clients.read().get(cluster_id).cloned();
        if let Some(client) = cached {
            return Ok(client);
        }

        let endpoint = self
            .endpoint(cluster_id)
            .ok_or_else(|| JobLogError::UnknownCluster(cluster_id.to_string()))?;
        let client = build_client(cluster_id, &endpoint).await?;

        tracing::info!(cluster_id, "Initialized client for cluster");
        self.clients
            .write()
            .insert(cluster_id.to_string(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl ClusterResolver for KubeClusterRegistry {
    async fn resolve(&self, cluster_id: &str) -> joblog_types::Result<Arc<dyn ClusterApi>> {
        let cluster_id = normalize_cluster_id(cluster_id);
        let client = self.client_for_cluster(cluster_id).await.map_err(|e| {
            match e.downcast_ref::<JobLogError>() {
                Some(err) => err.clone(),
                None => JobLogError::Transport(format!("{:#}", e)),
            }
        })?;
        Ok(Arc::new(KubeClusterApi::new(client)))
    }
}

fn normalize_cluster_id(cluster_id: &str) -> &str {
    if cluster_id.is_empty() {
        LOCAL_CLUSTER_ID
    } else {
        cluster_id
    }
}

/// Create a kube::Client for an endpoint
async fn build_client(cluster_id: &str, endpoint: &ClusterEndpoint) -> Result<kube::Client> {
    let config = if endpoint.uses_kubeconfig() {
        let kubeconfig = match &endpoint.kubeconfig {
            Some(path) => Kubeconfig::read_from(path).context(format!(
                "Failed to read kubeconfig {} for cluster {}",
                path.display(),
                cluster_id
            ))?,
            None => Kubeconfig::read().context("Failed to read kubeconfig. Is kubectl configured?")?,
        };

        kube::Config::from_custom_kubeconfig(
            kubeconfig,
            &KubeConfigOptions {
                context: endpoint.context.clone(),
                ..Default::default()
            },
        )
        .await
        .context(format!("Failed to create config for cluster: {}", cluster_id))?
    } else {
        kube::Config::infer()
            .await
            .context(format!("Failed to infer config for cluster: {}", cluster_id))?
    };

    kube::Client::try_from(config)
        .context(format!("Failed to create client for cluster: {}", cluster_id))
}
