//! Kubernetes resource types for connect injection
//!
//! A serde subset of the core/v1 API covering what the injector reads
//! (pod metadata, container ports) and what it emits (containers, volumes,
//! lifecycle hooks). Fields the injector doesn't model are carried through
//! untouched in `extra`, so a mutated pod re-serializes without losing data.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Passthrough storage for fields this crate doesn't model
pub type Extra = BTreeMap<String, serde_json::Value>;

// =============================================================================
// Pod
// =============================================================================

/// Kubernetes Pod
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    /// API version
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "default_pod_kind")]
    pub kind: String,
    /// Metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Pod spec
    #[serde(default)]
    pub spec: PodSpec,
    /// Unmodeled top-level fields (e.g. status)
    #[serde(flatten)]
    pub extra: Extra,
}

fn default_api_version() -> String {
    "v1".to_string()
}

fn default_pod_kind() -> String {
    "Pod".to_string()
}

impl Pod {
    /// Create an empty pod with the given name and namespace
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_pod_kind(),
            metadata: ObjectMeta {
                name: name.into(),
                namespace: namespace.into(),
                ..Default::default()
            },
            spec: PodSpec::default(),
            extra: Extra::new(),
        }
    }

    /// Add an annotation
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.annotations.insert(key.into(), value.into());
        self
    }

    /// Add an application container
    pub fn with_container(mut self, container: Container) -> Self {
        self.spec.containers.push(container);
        self
    }

    /// Look up an annotation value
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.get(key).map(String::as_str)
    }
}

/// Object metadata
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Resource name (empty when the API server will generate it)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Resource namespace
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Unmodeled metadata fields (generateName, ownerReferences, ...)
    #[serde(flatten)]
    pub extra: Extra,
}

/// Pod spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    /// Init containers, run to completion in order before `containers`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<Container>,
    /// Application containers
    #[serde(default)]
    pub containers: Vec<Container>,
    /// Volumes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    /// Unmodeled spec fields
    #[serde(flatten)]
    pub extra: Extra,
}

// =============================================================================
// Container
// =============================================================================

/// Container spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Container name
    pub name: String,
    /// Image
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    /// Command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// Args
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Environment variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    /// Ports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    /// Volume mounts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    /// Lifecycle hooks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<Lifecycle>,
    /// Unmodeled container fields (resources, probes, ...)
    #[serde(flatten)]
    pub extra: Extra,
}

impl Container {
    /// Create a container with a name and image
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    /// Add a container port
    pub fn with_port(mut self, port: ContainerPort) -> Self {
        self.ports.push(port);
        self
    }

    /// Look up an environment variable by name
    pub fn env_var(&self, name: &str) -> Option<&EnvVar> {
        self.env.iter().find(|e| e.name == name)
    }

    /// Look up a volume mount by volume name
    pub fn volume_mount(&self, name: &str) -> Option<&VolumeMount> {
        self.volume_mounts.iter().find(|m| m.name == name)
    }

    /// The exec command of the preStop hook, if one is attached
    pub fn pre_stop_command(&self) -> Option<&[String]> {
        self.lifecycle
            .as_ref()?
            .pre_stop
            .as_ref()?
            .exec
            .as_ref()
            .map(|e| e.command.as_slice())
    }
}

/// Container port
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    /// Port name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Port number
    pub container_port: u16,
    /// Protocol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Unmodeled port fields (hostPort, hostIP)
    #[serde(flatten)]
    pub extra: Extra,
}

impl ContainerPort {
    /// An unnamed TCP port
    pub fn new(container_port: u16) -> Self {
        Self {
            name: None,
            container_port,
            protocol: None,
            extra: Extra::new(),
        }
    }

    /// A named port
    pub fn named(name: impl Into<String>, container_port: u16) -> Self {
        Self {
            name: Some(name.into()),
            container_port,
            protocol: None,
            extra: Extra::new(),
        }
    }
}

/// Environment variable -- either a literal value or a downward API reference
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Literal value (mutually exclusive with `value_from`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Value source (mutually exclusive with `value`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<EnvVarSource>,
    /// Unmodeled env var fields
    #[serde(flatten)]
    pub extra: Extra,
}

impl EnvVar {
    /// Create an env var with a literal value
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            value_from: None,
            extra: Extra::new(),
        }
    }

    /// Create an env var populated from a pod field at container start
    pub fn from_field(name: impl Into<String>, field_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: field_path.into(),
                    extra: Extra::new(),
                }),
                extra: Extra::new(),
            }),
            extra: Extra::new(),
        }
    }

    /// The referenced field path, if this is a downward API variable
    pub fn field_path(&self) -> Option<&str> {
        self.value_from
            .as_ref()?
            .field_ref
            .as_ref()
            .map(|f| f.field_path.as_str())
    }
}

/// Source for an environment variable value
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarSource {
    /// Downward API field reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_ref: Option<ObjectFieldSelector>,
    /// Unmodeled sources (secretKeyRef, configMapKeyRef, ...)
    #[serde(flatten)]
    pub extra: Extra,
}

/// Selects a field of the pod (e.g. `status.podIP`)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectFieldSelector {
    /// Path of the field to select
    pub field_path: String,
    /// Unmodeled selector fields (apiVersion)
    #[serde(flatten)]
    pub extra: Extra,
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Container lifecycle hooks
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Lifecycle {
    /// Hook run before the container receives its termination signal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_stop: Option<LifecycleHandler>,
    /// Unmodeled hooks (postStart)
    #[serde(flatten)]
    pub extra: Extra,
}

impl Lifecycle {
    /// A lifecycle with only an exec preStop hook
    pub fn pre_stop_exec(command: Vec<String>) -> Self {
        Self {
            pre_stop: Some(LifecycleHandler {
                exec: Some(ExecAction {
                    command,
                    extra: Extra::new(),
                }),
                extra: Extra::new(),
            }),
            extra: Extra::new(),
        }
    }
}

/// Lifecycle hook handler
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleHandler {
    /// Exec action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecAction>,
    /// Unmodeled handlers (httpGet, tcpSocket, sleep)
    #[serde(flatten)]
    pub extra: Extra,
}

/// Exec action
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecAction {
    /// Command
    pub command: Vec<String>,
    /// Unmodeled exec fields
    #[serde(flatten)]
    pub extra: Extra,
}

// =============================================================================
// Volumes
// =============================================================================

/// Volume
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Volume name
    pub name: String,
    /// Secret source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretVolumeSource>,
    /// EmptyDir source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_dir: Option<EmptyDirVolumeSource>,
    /// Unmodeled volume sources (configMap, persistentVolumeClaim, ...)
    #[serde(flatten)]
    pub extra: Extra,
}

impl Volume {
    /// Create a Volume backed by a Secret.
    pub fn from_secret(name: impl Into<String>, secret_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            secret: Some(SecretVolumeSource {
                secret_name: secret_name.into(),
                extra: Extra::new(),
            }),
            empty_dir: None,
            extra: Extra::new(),
        }
    }

    /// Create a Volume backed by an emptyDir.
    pub fn from_empty_dir(
        name: impl Into<String>,
        medium: Option<String>,
        size_limit: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            secret: None,
            empty_dir: Some(EmptyDirVolumeSource {
                medium,
                size_limit,
                extra: Extra::new(),
            }),
            extra: Extra::new(),
        }
    }
}

/// Secret volume source
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretVolumeSource {
    /// Secret name
    pub secret_name: String,
    /// Unmodeled secret fields (items, defaultMode, optional)
    #[serde(flatten)]
    pub extra: Extra,
}

/// EmptyDir volume source
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmptyDirVolumeSource {
    /// Storage medium ("Memory" for tmpfs, empty for default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<String>,
    /// Size limit for the emptyDir (e.g., "1Gi")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_limit: Option<String>,
    /// Unmodeled emptyDir fields
    #[serde(flatten)]
    pub extra: Extra,
}

/// Volume mount
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    /// Volume name
    pub name: String,
    /// Mount path
    pub mount_path: String,
    /// Read only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
    /// Unmodeled mount fields (subPath, mountPropagation)
    #[serde(flatten)]
    pub extra: Extra,
}

impl VolumeMount {
    /// Create a read-write mount
    pub fn new(name: impl Into<String>, mount_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mount_path: mount_path.into(),
            read_only: None,
            extra: Extra::new(),
        }
    }

    /// Create a read-only mount
    pub fn readonly(name: impl Into<String>, mount_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mount_path: mount_path.into(),
            read_only: Some(true),
            extra: Extra::new(),
        }
    }
}
