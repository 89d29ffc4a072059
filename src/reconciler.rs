use crate::cluster::Cluster;
use crate::notification::Target;
use crate::restart::{restart_patch, restart_timestamp};
use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::fmt;
use tracing::{debug, error, info};

pub static REPLICA_SET_KIND: &str = "ReplicaSet";
pub static DEPLOYMENT_KIND: &str = "Deployment";

/// Step of the reconciliation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    FetchInstance,
    FetchReplicaController,
    PatchDeployment,
}

impl Step {
    pub fn reason(&self) -> &'static str {
        match self {
            Step::FetchInstance => "fetch-instance",
            Step::FetchReplicaController => "fetch-replica-controller",
            Step::PatchDeployment => "patch-deployment",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

#[derive(Debug)]
pub enum Outcome {
    Restarted {
        deployment: String,
        restarted_at: String,
    },
    SkippedUpToDate {
        container: String,
    },
    SkippedNotManaged {
        /// `Kind/name` of the object whose owner did not match.
        resource: String,
        /// `Kind/name` of its first owner, if it has one.
        owner: Option<String>,
    },
    Failed {
        step: Step,
        source: anyhow::Error,
    },
}

impl Outcome {
    pub fn log(&self, target: &Target) {
        match self {
            Outcome::Restarted {
                deployment,
                restarted_at,
            } => info!(
                "Restarted deployment {} in namespace {} at {} for {}",
                deployment, target.namespace, restarted_at, target
            ),
            Outcome::SkippedUpToDate { container } => info!(
                "Skipping {}, container {} already runs the notified digest",
                target, container
            ),
            Outcome::SkippedNotManaged { resource, owner } => info!(
                "Skipping {}, {} is owned by {} and not managed through a Deployment",
                target,
                resource,
                owner.as_deref().unwrap_or("nothing")
            ),
            Outcome::Failed { step, source } => error!(
                "Reconciliation of {} failed at step {}: {:?}",
                target, step, source
            ),
        }
    }
}

/// Walks pod → ReplicaSet → Deployment and restarts the Deployment unless the
/// chain does not match or the named container already runs `observed_digest`.
/// The pod is only managed when its first owner is a ReplicaSet whose own
/// first owner is a Deployment. The restart is a merge patch of the
/// Deployment's pod-template annotation and nothing else. Every failure is
/// terminal; nothing is retried.
pub async fn reconcile<C: Cluster>(
    cluster: &C,
    annotation: &str,
    target: &Target,
    observed_digest: Option<&str>,
) -> Outcome {
    let namespace = target.namespace.as_str();

    debug!("Fetching pod {} in namespace {}", target.pod_name, namespace);
    let pod = match cluster.get_pod(namespace, &target.pod_name).await {
        Ok(pod) => pod,
        Err(source) => {
            return Outcome::Failed {
                step: Step::FetchInstance,
                source,
            };
        }
    };

    let replica_set_name = match expect_owner(&pod.metadata, REPLICA_SET_KIND) {
        Ok(owner) => owner.name.clone(),
        Err(not_managed) => return not_managed.into_outcome("Pod", &target.pod_name),
    };

    if let (Some(container), Some(digest)) = (target.container_name.as_deref(), observed_digest) {
        if runs_digest(&pod, container, digest) {
            return Outcome::SkippedUpToDate {
                container: container.to_string(),
            };
        }
        debug!(
            "Container {} of pod {} does not run digest {} yet",
            container, target.pod_name, digest
        );
    }

    debug!(
        "Fetching replicaset {} in namespace {}",
        replica_set_name, namespace
    );
    let replica_set = match cluster.get_replica_set(namespace, &replica_set_name).await {
        Ok(replica_set) => replica_set,
        Err(source) => {
            return Outcome::Failed {
                step: Step::FetchReplicaController,
                source,
            };
        }
    };

    let deployment = match expect_owner(&replica_set.metadata, DEPLOYMENT_KIND) {
        Ok(owner) => owner.name.clone(),
        Err(not_managed) => return not_managed.into_outcome(REPLICA_SET_KIND, &replica_set_name),
    };

    let restarted_at = restart_timestamp(Utc::now());
    let patch = restart_patch(annotation, &restarted_at);
    info!(
        "Triggering rollout for deployment {} in namespace {}",
        deployment, namespace
    );
    if let Err(source) = cluster
        .patch_deployment(namespace, &deployment, &patch)
        .await
    {
        return Outcome::Failed {
            step: Step::PatchDeployment,
            source,
        };
    }

    Outcome::Restarted {
        deployment,
        restarted_at,
    }
}

/// Owner check that failed, carrying the offending owner if there was one.
struct NotManaged(Option<String>);

impl NotManaged {
    fn into_outcome(self, kind: &str, name: &str) -> Outcome {
        Outcome::SkippedNotManaged {
            resource: format!("{}/{}", kind, name),
            owner: self.0,
        }
    }
}

/// Only the first owner reference is authoritative, as for objects created
/// by a Deployment rollout.
fn expect_owner<'a>(metadata: &'a ObjectMeta, kind: &str) -> Result<&'a OwnerReference, NotManaged> {
    match metadata.owner_references.as_deref().and_then(|refs| refs.first()) {
        Some(owner) if owner.kind == kind => Ok(owner),
        Some(owner) => Err(NotManaged(Some(format!("{}/{}", owner.kind, owner.name)))),
        None => Err(NotManaged(None)),
    }
}

/// An empty `imageID` means the container has not started yet and never
/// counts as up to date.
fn runs_digest(pod: &Pod, container: &str, digest: &str) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .into_iter()
        .flatten()
        .filter(|status| status.name == container)
        .any(|status| !status.image_id.is_empty() && status.image_id.contains(digest))
}
