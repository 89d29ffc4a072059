use anyhow::Context;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use serde_json::Value;
use std::future::Future;
use tracing::{debug, info};

static KUBE_ROLLOUT_WEBHOOK_FIELD_MANAGER: &str = "kube-rollout-webhook";

/// The three Kubernetes API calls a reconciliation needs.
pub trait Cluster: Clone + Send + Sync + 'static {
    fn get_pod(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = anyhow::Result<Pod>> + Send;

    fn get_replica_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = anyhow::Result<ReplicaSet>> + Send;

    fn patch_deployment(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Resolves credentials in-cluster first, then from the local kubeconfig.
pub async fn create_client() -> anyhow::Result<Client> {
    info!("Initializing K8s client");
    let client = Client::try_default()
        .await
        .context("Failed to resolve Kubernetes credentials")?;
    let api_server_info = client
        .apiserver_version()
        .await
        .context("Failed to reach the Kubernetes API server")?;
    info!(
        "Connected to Kubernetes API server with version {}.{}, default namespace {}",
        api_server_info.major,
        api_server_info.minor,
        client.default_namespace()
    );
    Ok(client)
}

#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn default_namespace(&self) -> &str {
        self.client.default_namespace()
    }
}

impl Cluster for KubeCluster {
    async fn get_pod(&self, namespace: &str, name: &str) -> anyhow::Result<Pod> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        pods.get(name)
            .await
            .with_context(|| format!("Failed to get pod {} in namespace {}", name, namespace))
    }

    async fn get_replica_set(&self, namespace: &str, name: &str) -> anyhow::Result<ReplicaSet> {
        let replica_sets: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        replica_sets.get(name).await.with_context(|| {
            format!(
                "Failed to get replicaset {} in namespace {}",
                name, namespace
            )
        })
    }

    async fn patch_deployment(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> anyhow::Result<()> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        debug!(
            "Patching deployment {} in namespace {} with patch {}",
            name, namespace, patch
        );
        deployments
            .patch(
                name,
                &PatchParams::apply(KUBE_ROLLOUT_WEBHOOK_FIELD_MANAGER),
                &Patch::Merge(patch),
            )
            .await
            .with_context(|| {
                format!(
                    "Failed to patch deployment {} in namespace {} to trigger rollout",
                    name, namespace
                )
            })?;
        Ok(())
    }
}
