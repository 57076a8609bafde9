//! Environment aggregation.

use std::collections::HashMap;

use k8s_openapi::api::core::v1::{ConfigMap, Container, EnvVarSource, Pod, Secret};
use kube::api::Api;

use super::{Error, Result};

/// The five independent sources aggregated low-to-high precedence. Absent
/// `configmap_vars` is tolerated; every other getter's failure propagates.
#[derive(Clone, Debug, Default)]
pub struct EnvSources {
    pub image_env: Vec<(String, String)>,
    pub platform_vars: Vec<(String, String)>,
    pub configmap_vars: Option<Vec<(String, String)>>,
    pub pod_env: Vec<(String, String)>,
    pub manifest_env: Vec<(String, String)>,
}

/// Merges the five sources in ascending precedence, later entries
/// overriding earlier ones on duplicate keys, preserving first-seen order.
pub fn aggregate(sources: EnvSources) -> Vec<(String, String)> {
    let ordered_sources = [
        sources.image_env,
        sources.platform_vars,
        sources.configmap_vars.unwrap_or_default(),
        sources.pod_env,
        sources.manifest_env,
    ];

    let mut order: Vec<String> = Vec::new();
    let mut values: HashMap<String, String> = HashMap::new();

    for source in ordered_sources {
        for (key, value) in source {
            if !values.contains_key(&key) {
                order.push(key.clone());
            }
            values.insert(key, value);
        }
    }

    order
        .into_iter()
        .map(|key| {
            let value = values.remove(&key).expect("key was just inserted");
            (key, value)
        })
        .collect()
}

/// The dev environment's `okteto-env-vars` config map, or `None` if it
/// hasn't been created yet (a config-map miss is not fatal).
pub async fn fetch_configmap_vars(
    client: kube::Client,
    namespace: &str,
    name: &str,
) -> Result<Option<Vec<(String, String)>>> {
    let config_maps: Api<ConfigMap> = Api::namespaced(client, namespace);
    match config_maps.get_opt(name).await? {
        Some(cm) => Ok(Some(cm.data.unwrap_or_default().into_iter().collect())),
        None => Ok(None),
    }
}

/// Resolves a running pod's container env, including `secretKeyRef` and
/// `configMapKeyRef` indirections. A missing secret surfaces verbatim.
pub async fn fetch_pod_env(client: kube::Client, namespace: &str, pod: &Pod, container_name: &str) -> Result<Vec<(String, String)>> {
    let container = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.containers.iter().find(|c| c.name == container_name))
        .ok_or_else(|| Error::AppNotFound(container_name.to_string()))?;

    resolve_container_env(client, namespace, container).await
}

async fn resolve_container_env(client: kube::Client, namespace: &str, container: &Container) -> Result<Vec<(String, String)>> {
    let mut resolved = Vec::new();

    for env_var in container.env.as_deref().unwrap_or_default() {
        if let Some(value) = &env_var.value {
            resolved.push((env_var.name.clone(), value.clone()));
            continue;
        }
        if let Some(value) = resolve_env_from(client.clone(), namespace, env_var.value_from.as_ref()).await? {
            resolved.push((env_var.name.clone(), value));
        }
    }

    Ok(resolved)
}

async fn resolve_env_from(client: kube::Client, namespace: &str, source: Option<&EnvVarSource>) -> Result<Option<String>> {
    let Some(source) = source else {
        return Ok(None);
    };

    if let Some(secret_ref) = &source.secret_key_ref {
        let secrets: Api<Secret> = Api::namespaced(client, namespace);
        let name = secret_ref.name.clone().unwrap_or_default();
        let secret = secrets.get_opt(&name).await?.ok_or_else(|| {
            Error::SecretNotFound(format!(
                "the development container didn't start successfully because the kubernetes secret '{name}' was not found"
            ))
        })?;
        let value = secret
            .data
            .unwrap_or_default()
            .get(&secret_ref.key)
            .map(|v| String::from_utf8_lossy(&v.0).into_owned());
        return Ok(value);
    }

    if let Some(cm_ref) = &source.config_map_key_ref {
        let config_maps: Api<ConfigMap> = Api::namespaced(client, namespace);
        let name = cm_ref.name.clone().unwrap_or_default();
        let value = config_maps
            .get_opt(&name)
            .await?
            .and_then(|cm| cm.data.unwrap_or_default().get(&cm_ref.key).cloned());
        return Ok(value);
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_source_overrides_earlier_on_duplicate_key() {
        let sources = EnvSources {
            image_env: vec![("FOO".to_string(), "image".to_string())],
            platform_vars: vec![("FOO".to_string(), "platform".to_string())],
            configmap_vars: None,
            pod_env: vec![],
            manifest_env: vec![("BAR".to_string(), "manifest".to_string())],
        };
        let merged = aggregate(sources);
        assert_eq!(merged.iter().find(|(k, _)| k == "FOO").unwrap().1, "platform");
    }

    #[test]
    fn manifest_wins_over_all_others() {
        let sources = EnvSources {
            image_env: vec![("FOO".to_string(), "image".to_string())],
            platform_vars: vec![("FOO".to_string(), "platform".to_string())],
            configmap_vars: Some(vec![("FOO".to_string(), "configmap".to_string())]),
            pod_env: vec![("FOO".to_string(), "pod".to_string())],
            manifest_env: vec![("FOO".to_string(), "manifest".to_string())],
        };
        let merged = aggregate(sources);
        assert_eq!(merged, vec![("FOO".to_string(), "manifest".to_string())]);
    }

    #[test]
    fn preserves_first_seen_order() {
        let sources = EnvSources {
            image_env: vec![("B".to_string(), "1".to_string()), ("A".to_string(), "1".to_string())],
            platform_vars: vec![],
            configmap_vars: None,
            pod_env: vec![],
            manifest_env: vec![("A".to_string(), "2".to_string())],
        };
        let merged = aggregate(sources);
        let keys: Vec<&str> = merged.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["B", "A"]);
    }
}
