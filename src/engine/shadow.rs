//! Builds and refreshes the `<name>-okteto` shadow deployment: the
//! original's pod template with the dev container swapped in.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar as K8sEnvVar, PodSpec, PodTemplateSpec, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use std::collections::BTreeMap;

use super::app::{shadow_name, TargetApp};
use super::{Error, Result};
use crate::manifest::DevManifest;

pub const REVISION_ANNOTATION: &str = "dev.devctl.io/revision";

/// Builds the shadow's `Deployment` object: owner reference back to the
/// original, revision annotation, and the manifest's container swapped
/// into the pod template.
pub fn build(original: &TargetApp, manifest: &DevManifest) -> Result<Deployment> {
    let name = shadow_name(&manifest.name);
    let mut template = original_template(original)?;
    swap_container(&mut template, manifest)?;

    let owner = owner_reference(original)?;
    let revision = original_revision(original);

    let mut annotations = BTreeMap::new();
    annotations.insert(REVISION_ANNOTATION.to_string(), revision);

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: namespace_of(original),
            owner_references: Some(vec![owner]),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: shadow_selector(&manifest.name),
            template,
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Patch body to refresh an existing shadow's pod template in place.
pub fn refresh_patch(original: &TargetApp, manifest: &DevManifest) -> Result<serde_json::Value> {
    let mut template = original_template(original)?;
    swap_container(&mut template, manifest)?;
    Ok(serde_json::json!({
        "spec": { "template": template },
        "metadata": { "annotations": { REVISION_ANNOTATION: original_revision(original) } },
    }))
}

fn original_template(original: &TargetApp) -> Result<PodTemplateSpec> {
    let template = match original {
        TargetApp::Deployment(d) => d.spec.as_ref().map(|s| s.template.clone()),
        TargetApp::StatefulSet(s) => s.spec.as_ref().map(|s| s.template.clone()),
    };
    template.ok_or_else(|| Error::StartError("original workload has no pod template".to_string()))
}

fn namespace_of(original: &TargetApp) -> Option<String> {
    match original {
        TargetApp::Deployment(d) => d.metadata.namespace.clone(),
        TargetApp::StatefulSet(s) => s.metadata.namespace.clone(),
    }
}

fn owner_reference(original: &TargetApp) -> Result<OwnerReference> {
    let (api_version, kind, metadata) = match original {
        TargetApp::Deployment(d) => ("apps/v1", "Deployment", &d.metadata),
        TargetApp::StatefulSet(s) => ("apps/v1", "StatefulSet", &s.metadata),
    };
    Ok(OwnerReference {
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        name: metadata.name.clone().unwrap_or_default(),
        uid: metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

fn original_revision(original: &TargetApp) -> String {
    let annotations = match original {
        TargetApp::Deployment(d) => d.metadata.annotations.as_ref(),
        TargetApp::StatefulSet(s) => s.metadata.annotations.as_ref(),
    };
    annotations
        .and_then(|a| a.get("deployment.kubernetes.io/revision"))
        .cloned()
        .unwrap_or_else(|| "1".to_string())
}

fn shadow_selector(name: &str) -> LabelSelector {
    let mut labels = BTreeMap::new();
    labels.insert("dev.devctl.io/app".to_string(), name.to_string());
    LabelSelector { match_labels: Some(labels), ..Default::default() }
}

/// Replaces `manifest.container`'s image/command/args/env/resources on the
/// pod template in place, adding the container if it isn't already there.
fn swap_container(template: &mut PodTemplateSpec, manifest: &DevManifest) -> Result<()> {
    let spec = template
        .spec
        .get_or_insert_with(|| PodSpec { containers: Vec::new(), ..Default::default() });

    let env: Vec<K8sEnvVar> = manifest
        .env
        .iter()
        .map(|e| K8sEnvVar { name: e.name.clone(), value: Some(e.value.clone()), value_from: None })
        .collect();

    let resources = Some(ResourceRequirements {
        requests: Some(quantities(&manifest.resources.requests)),
        limits: Some(quantities(&manifest.resources.limits)),
        ..Default::default()
    });

    let dev_container = Container {
        name: manifest.container.clone(),
        image: Some(manifest.image.clone()),
        command: Some(manifest.command.clone()),
        args: Some(manifest.args.clone()),
        env: Some(env),
        resources,
        ..Default::default()
    };

    match spec.containers.iter_mut().find(|c| c.name == manifest.container) {
        Some(existing) => *existing = dev_container,
        None => spec.containers.push(dev_container),
    }

    let pod_meta = template.metadata.get_or_insert_with(ObjectMeta::default);
    let labels = pod_meta.labels.get_or_insert_with(BTreeMap::new);
    labels.insert("dev.devctl.io/app".to_string(), manifest.name.clone());

    Ok(())
}

fn quantities(values: &BTreeMap<String, String>) -> BTreeMap<String, Quantity> {
    values.iter().map(|(k, v)| (k.clone(), Quantity(v.clone()))).collect()
}
