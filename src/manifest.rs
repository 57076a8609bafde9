//! Normalized form of a development manifest. Only the schema and its
//! invariants are in scope here — parsing the on-disk manifest file's
//! surrounding YAML structure is a concern of the CLI's config-file loading,
//! not this module.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("manifest name is empty")]
    EmptyName,

    #[error("manifest name {0:?} is invalid: must match ^[a-z0-9]([-a-z0-9]*[a-z0-9])?$ and be at most 63 characters")]
    InvalidName(String),

    #[error("work dir path must be absolute and non-empty, got {0:?}")]
    InvalidWorkDir(String),

    #[error("duplicate local forward port {0}")]
    DuplicateForward(i32),

    #[error("invalid resource quantity {0:?} for {1}")]
    InvalidQuantity(String, &'static str),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

fn name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid regex"))
}

/// `{local, remote}` port pair. `local` must be unique across the manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Forward {
    pub local: i32,
    pub remote: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkDir {
    pub path: String,
    pub size: String,
    #[serde(default)]
    pub send_only: bool,
}

impl Default for WorkDir {
    fn default() -> Self {
        Self {
            path: String::new(),
            size: String::new(),
            send_only: false,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Volume {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Flags {
    #[serde(default)]
    pub attach_stdin: bool,
    #[serde(default)]
    pub run_as_user: Option<i64>,
}

/// Legacy `swap.deployment` block. Promoted to top-level fields by
/// [`DevManifest::normalize`] when the top-level `name` is empty — treated
/// as a legacy alias for the flattened, canonical shape.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LegacySwapDeployment {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub resources: Option<Resources>,
    #[serde(default)]
    pub run_as_user: Option<i64>,
}

/// Legacy `mount.target` block, promoted into [`WorkDir`] when no top-level
/// work dir is set.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LegacyMountTarget {
    #[serde(default)]
    pub send_only: bool,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DevManifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub container: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub forward: Vec<Forward>,
    #[serde(default)]
    pub work_dir: Option<WorkDir>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
    #[serde(default)]
    pub flags: Flags,

    #[serde(default, rename = "swap")]
    pub legacy_swap: Option<LegacySwapBlock>,
    #[serde(default, rename = "mount")]
    pub legacy_mount: Option<LegacyMountBlock>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LegacySwapBlock {
    pub deployment: Option<LegacySwapDeployment>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LegacyMountBlock {
    pub target: Option<LegacyMountTarget>,
}

const DEFAULT_WORK_DIR_PATH: &str = "/okteto";
const DEFAULT_WORK_DIR_SIZE: &str = "10Gi";
const DEFAULT_VOLUME_SIZE: &str = "10Gi";
const DEFAULT_CPU_LIMIT: &str = "1";
const DEFAULT_MEMORY_LIMIT: &str = "2Gi";

impl DevManifest {
    /// Applies the manifest's defaulting rules, in order. Idempotent:
    /// `normalize(normalize(m)) == normalize(m)`.
    pub fn normalize(mut self) -> Self {
        // 1. promote legacy swap.deployment when name is empty.
        if self.name.is_empty() {
            if let Some(swap) = self.legacy_swap.take().and_then(|s| s.deployment) {
                if let Some(name) = swap.name {
                    self.name = name;
                }
                if let Some(container) = swap.container {
                    self.container = container;
                }
                if let Some(image) = swap.image {
                    self.image = image;
                }
                if let Some(command) = swap.command {
                    self.command = command;
                }
                if let Some(args) = swap.args {
                    self.args = args;
                }
                if let Some(resources) = swap.resources {
                    self.resources = resources;
                }
                if let Some(run_as_user) = swap.run_as_user {
                    self.flags.run_as_user = Some(run_as_user);
                }
            }
        } else {
            self.legacy_swap = None;
        }

        // 2. promote legacy mount.target when no work dir is set.
        if self.work_dir.is_none() {
            if let Some(mount) = self.legacy_mount.take().and_then(|m| m.target) {
                self.work_dir = Some(WorkDir {
                    path: mount.target.unwrap_or_default(),
                    size: mount.size.unwrap_or_default(),
                    send_only: mount.send_only,
                });
            }
        } else {
            self.legacy_mount = None;
        }

        // 3. default command.
        if self.command.is_empty() {
            self.command = vec!["sh".to_string()];
        }

        // 4/5. default work dir path/size.
        let work_dir = self.work_dir.get_or_insert_with(WorkDir::default);
        if work_dir.path.is_empty() {
            work_dir.path = DEFAULT_WORK_DIR_PATH.to_string();
        }
        if work_dir.size.is_empty() {
            work_dir.size = DEFAULT_WORK_DIR_SIZE.to_string();
        }

        // 5. default cpu/memory limits, only if unset.
        self.resources
            .limits
            .entry("cpu".to_string())
            .or_insert_with(|| DEFAULT_CPU_LIMIT.to_string());
        self.resources
            .limits
            .entry("memory".to_string())
            .or_insert_with(|| DEFAULT_MEMORY_LIMIT.to_string());

        // 6. default extra volume size/name.
        for (i, volume) in self.volumes.iter_mut().enumerate() {
            if volume.size.is_none() {
                volume.size = Some(DEFAULT_VOLUME_SIZE.to_string());
            }
            if volume.name.is_none() {
                volume.name = Some(format!("volume-{}", i + 1));
            }
        }

        // 7. lower-case the name.
        self.name = self.name.to_lowercase();

        self
    }

    /// Validates the already-normalized manifest.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::EmptyName);
        }
        if self.name.len() > 63 || !name_regex().is_match(&self.name) {
            return Err(Error::InvalidName(self.name.clone()));
        }

        let work_dir = self.work_dir.as_ref();
        let path = work_dir.map(|w| w.path.as_str()).unwrap_or_default();
        if path.is_empty() || !path.starts_with('/') {
            return Err(Error::InvalidWorkDir(path.to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for fwd in &self.forward {
            if !seen.insert(fwd.local) {
                return Err(Error::DuplicateForward(fwd.local));
            }
        }

        for (key, value) in self
            .resources
            .requests
            .iter()
            .chain(self.resources.limits.iter())
        {
            validate_quantity(value, leak_key(key))?;
        }

        Ok(())
    }

    /// Runs [`Self::normalize`] followed by [`Self::validate`].
    pub fn normalize_and_validate(self) -> Result<Self> {
        let normalized = self.normalize();
        normalized.validate()?;
        Ok(normalized)
    }
}

// `validate_quantity`'s error wants a `&'static str` label; resource map
// keys are almost always "cpu"/"memory" so this never actually allocates a
// leaked string in practice, but stays correct for arbitrary keys too.
fn leak_key(key: &str) -> &'static str {
    match key {
        "cpu" => "cpu",
        "memory" => "memory",
        "ephemeral-storage" => "ephemeral-storage",
        _ => "resource",
    }
}

/// Minimal validation of a Kubernetes resource quantity string: an optional
/// decimal magnitude followed by a known suffix, or a bare decimal for CPU.
fn validate_quantity(value: &str, label: &'static str) -> Result<()> {
    let valid_suffixes = [
        "m", "k", "M", "G", "T", "P", "E", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei",
    ];
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidQuantity(value.to_string(), label));
    }
    let numeric_part = valid_suffixes
        .iter()
        .find(|suffix| trimmed.ends_with(**suffix))
        .map(|suffix| &trimmed[..trimmed.len() - suffix.len()])
        .unwrap_or(trimmed);

    if numeric_part.is_empty() || numeric_part.parse::<f64>().is_err() {
        return Err(Error::InvalidQuantity(value.to_string(), label));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(name: &str) -> DevManifest {
        DevManifest {
            name: name.to_string(),
            image: "alpine".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn normalize_defaults_command_and_workdir() {
        let m = minimal("api").normalize();
        assert_eq!(m.command, vec!["sh".to_string()]);
        assert_eq!(m.work_dir.as_ref().unwrap().path, "/okteto");
        assert_eq!(m.work_dir.as_ref().unwrap().size, "10Gi");
        assert_eq!(m.resources.limits.get("cpu").unwrap(), "1");
        assert_eq!(m.resources.limits.get("memory").unwrap(), "2Gi");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = minimal("Api").normalize();
        let twice = once.clone().normalize();
        assert_eq!(
            serde_json::to_string(&once).unwrap(),
            serde_json::to_string(&twice).unwrap()
        );
    }

    #[test]
    fn normalize_lowercases_name() {
        let m = minimal("MyApp").normalize();
        assert_eq!(m.name, "myapp");
    }

    #[test]
    fn name_length_boundary() {
        let name_63 = "a".repeat(63);
        assert!(minimal(&name_63).normalize().validate().is_ok());

        let name_64 = "a".repeat(64);
        assert!(minimal(&name_64).normalize().validate().is_err());
    }

    #[test]
    fn invalid_name_rejected() {
        let m = minimal("-invalid").normalize();
        assert!(matches!(m.validate(), Err(Error::InvalidName(_))));
    }

    #[test]
    fn duplicate_forward_rejected() {
        let mut m = minimal("api");
        m.forward = vec![
            Forward { local: 8080, remote: 8080 },
            Forward { local: 8080, remote: 9090 },
        ];
        let m = m.normalize();
        assert!(matches!(m.validate(), Err(Error::DuplicateForward(8080))));
    }

    #[test]
    fn legacy_swap_deployment_promoted() {
        let mut m = DevManifest::default();
        m.legacy_swap = Some(LegacySwapBlock {
            deployment: Some(LegacySwapDeployment {
                name: Some("Legacy".to_string()),
                container: Some("web".to_string()),
                image: Some("legacy/web".to_string()),
                command: None,
                args: None,
                resources: None,
                run_as_user: None,
            }),
        });
        let m = m.normalize();
        assert_eq!(m.name, "legacy");
        assert_eq!(m.container, "web");
        assert_eq!(m.image, "legacy/web");
        assert!(m.validate().is_ok());
    }

    #[test]
    fn legacy_mount_target_promoted() {
        let mut m = minimal("api");
        m.legacy_mount = Some(LegacyMountBlock {
            target: Some(LegacyMountTarget {
                send_only: true,
                source: Some("./src".to_string()),
                target: Some("/app".to_string()),
                size: Some("5Gi".to_string()),
            }),
        });
        let m = m.normalize();
        let wd = m.work_dir.unwrap();
        assert_eq!(wd.path, "/app");
        assert_eq!(wd.size, "5Gi");
        assert!(wd.send_only);
    }

    #[test]
    fn extra_volumes_default_size_and_name() {
        let mut m = minimal("api");
        m.volumes = vec![Volume::default(), Volume::default()];
        let m = m.normalize();
        assert_eq!(m.volumes[0].name.as_deref(), Some("volume-1"));
        assert_eq!(m.volumes[1].name.as_deref(), Some("volume-2"));
        assert_eq!(m.volumes[0].size.as_deref(), Some("10Gi"));
    }

    #[test]
    fn explicit_resource_limits_are_not_overridden() {
        let mut m = minimal("api");
        m.resources.limits.insert("cpu".to_string(), "4".to_string());
        let m = m.normalize();
        assert_eq!(m.resources.limits.get("cpu").unwrap(), "4");
        assert_eq!(m.resources.limits.get("memory").unwrap(), "2Gi");
    }
}
