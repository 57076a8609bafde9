//! App resolution and pod selection.

use std::time::{Duration, Instant};

use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};

use super::{Error, Result};

const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";

pub const SHADOW_SUFFIX: &str = "-okteto";

pub fn shadow_name(name: &str) -> String {
    format!("{name}{SHADOW_SUFFIX}")
}

/// The workload kind backing a manifest's `name`, resolved once per
/// `Preparing` transition.
#[derive(Clone, Debug)]
pub enum TargetApp {
    Deployment(Box<Deployment>),
    StatefulSet(Box<StatefulSet>),
}

impl TargetApp {
    pub fn uid(&self) -> Option<String> {
        match self {
            TargetApp::Deployment(d) => d.metadata.uid.clone(),
            TargetApp::StatefulSet(s) => s.metadata.uid.clone(),
        }
    }
}

/// Looks up `name` as a deployment, then a stateful set. Neither present is
/// `Error::AppNotFound`.
pub async fn resolve_app(client: kube::Client, namespace: &str, name: &str) -> Result<TargetApp> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    match deployments.get_opt(name).await? {
        Some(d) => return Ok(TargetApp::Deployment(Box::new(d))),
        None => {}
    }

    let stateful_sets: Api<StatefulSet> = Api::namespaced(client, namespace);
    match stateful_sets.get_opt(name).await? {
        Some(s) => Ok(TargetApp::StatefulSet(Box::new(s))),
        None => Err(Error::AppNotFound(name.to_string())),
    }
}

/// Checks whether the shadow (`<name>-okteto`) deployment already exists.
pub async fn get_shadow(client: kube::Client, namespace: &str, name: &str) -> Result<Option<Deployment>> {
    let deployments: Api<Deployment> = Api::namespaced(client, namespace);
    Ok(deployments.get_opt(&shadow_name(name)).await?)
}

pub async fn create_shadow(client: kube::Client, namespace: &str, shadow: Deployment) -> Result<Deployment> {
    let deployments: Api<Deployment> = Api::namespaced(client, namespace);
    Ok(deployments.create(&PostParams::default(), &shadow).await?)
}

pub async fn patch_shadow(client: kube::Client, namespace: &str, name: &str, patch: serde_json::Value) -> Result<Deployment> {
    let deployments: Api<Deployment> = Api::namespaced(client, namespace);
    Ok(deployments.patch(name, &PatchParams::default(), &Patch::Merge(patch)).await?)
}

/// Walks the shadow's owned `ReplicaSet`s to find pods whose owner UID
/// matches and whose `ReplicaSet` carries the shadow's revision annotation
/// (`dev.devctl.io/revision`, as stamped by `shadow::build`/`refresh_patch`),
/// selecting the first `Running` one. Without the revision check a
/// freshly-refreshed shadow could attach to a pod still rolling out from
/// the previous revision. Polls with exponential backoff (starting at
/// 250ms, capped at 5s) until `timeout` elapses.
pub async fn select_pod(
    client: kube::Client,
    namespace: &str,
    shadow_uid: &str,
    shadow_revision: &str,
    timeout: Duration,
) -> Result<Pod> {
    let deadline = Instant::now() + timeout;
    let mut backoff = Duration::from_millis(250);

    loop {
        if let Some(pod) = find_running_pod(client.clone(), namespace, shadow_uid, Some(shadow_revision)).await? {
            return Ok(pod);
        }

        if Instant::now() >= deadline {
            return Err(Error::StartError("timed out waiting for a running pod".to_string()));
        }

        tokio::time::sleep(backoff.min(deadline.saturating_duration_since(Instant::now()))).await;
        backoff = (backoff * 2).min(Duration::from_secs(5));
    }
}

/// Finds the first `Running` pod owned (via its `ReplicaSet`) by
/// `owner_uid`. When `required_revision` is set, only `ReplicaSet`s whose
/// own `deployment.kubernetes.io/revision` annotation matches are
/// considered — used by [`select_pod`] to pin to the shadow's current
/// rollout. Passing `None` is used for a one-off lookup of the original
/// workload's currently running pod (e.g. before swapping its container),
/// where no shadow revision exists yet to match against.
pub async fn find_running_pod(
    client: kube::Client,
    namespace: &str,
    owner_uid: &str,
    required_revision: Option<&str>,
) -> Result<Option<Pod>> {
    let replica_sets: Api<ReplicaSet> = Api::namespaced(client.clone(), namespace);
    let owned_rs_uids: Vec<String> = replica_sets
        .list(&ListParams::default())
        .await?
        .items
        .into_iter()
        .filter(|rs| owned_by(&rs.metadata.owner_references, owner_uid))
        .filter(|rs| match required_revision {
            Some(revision) => rs
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(REVISION_ANNOTATION))
                .map(|v| v == revision)
                .unwrap_or(false),
            None => true,
        })
        .filter_map(|rs| rs.metadata.uid)
        .collect();

    if owned_rs_uids.is_empty() {
        return Ok(None);
    }

    let pods: Api<Pod> = Api::namespaced(client, namespace);
    let candidate = pods
        .list(&ListParams::default())
        .await?
        .items
        .into_iter()
        .find(|pod| {
            let owned_by_rs = owned_rs_uids
                .iter()
                .any(|uid| owned_by(&pod.metadata.owner_references, uid));
            owned_by_rs && is_running(pod)
        });

    Ok(candidate)
}

fn owned_by(owner_refs: &Option<Vec<k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference>>, uid: &str) -> bool {
    owner_refs
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|owner| owner.uid == uid)
}

fn is_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map(|phase| phase == "Running")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_name_appends_suffix() {
        assert_eq!(shadow_name("api"), "api-okteto");
    }
}
