//! Pod mutation
//!
//! [`Injector`] is what the admission webhook calls for each pod: it decides
//! whether the pod should join the mesh, fills in defaulted annotations, and
//! appends the generated volumes and containers. The webhook turns the
//! difference into a JSON patch.

use tracing::{debug, info};

use crate::annotations::{
    default_annotations, ANNOTATION_INJECT, ANNOTATION_SERVICE, ANNOTATION_STATUS,
    STATUS_INJECTED,
};
use crate::config::CommandContext;
use crate::error::Error;
use crate::init::container_init;
use crate::k8s::Pod;
use crate::sidecar::container_sidecar;
use crate::volume::pod_volumes;
use crate::Result;

/// Namespaces whose pods are never injected
pub const EXCLUDED_NAMESPACES: [&str; 2] = ["kube-system", "kube-public"];

/// Injects the Connect init container and Envoy sidecar into pods
#[derive(Clone, Debug)]
pub struct Injector {
    ctx: CommandContext,
    require_annotation: bool,
}

impl Injector {
    /// Create an injector that injects every pod not explicitly opted out
    pub fn new(ctx: CommandContext) -> Self {
        Self {
            ctx,
            require_annotation: false,
        }
    }

    /// Only inject pods that opt in with the inject annotation
    pub fn with_require_annotation(mut self, require: bool) -> Self {
        self.require_annotation = require;
        self
    }

    /// Decide whether a pod should be injected.
    ///
    /// Already-injected pods and pods in system namespaces are skipped. An
    /// explicit inject annotation wins; without one the pod is injected
    /// unless the injector requires opt-in.
    pub fn should_inject(&self, pod: &Pod) -> Result<bool> {
        if pod.annotation(ANNOTATION_STATUS) == Some(STATUS_INJECTED) {
            return Ok(false);
        }
        if EXCLUDED_NAMESPACES.contains(&pod.metadata.namespace.as_str()) {
            return Ok(false);
        }
        match pod.annotation(ANNOTATION_INJECT) {
            Some(raw) => parse_bool(raw).ok_or_else(|| {
                Error::invalid_annotation(ANNOTATION_INJECT, raw, "expected a boolean")
            }),
            None => Ok(!self.require_annotation),
        }
    }

    /// Mutate a pod to join the mesh.
    ///
    /// Returns the pod unchanged when it shouldn't be injected. Otherwise
    /// every container is built before anything is appended, so an error
    /// leaves no partial mutation behind.
    pub fn mutate(&self, mut pod: Pod) -> Result<Pod> {
        if !self.should_inject(&pod)? {
            debug!(pod = %pod.metadata.name, "skipping injection");
            return Ok(pod);
        }

        default_annotations(&mut pod);
        if !matches!(pod.annotation(ANNOTATION_SERVICE), Some(s) if !s.is_empty()) {
            return Err(Error::invalid_annotation(
                ANNOTATION_SERVICE,
                "",
                "no service name and no container to default it from",
            ));
        }

        let init = container_init(&self.ctx, &pod)?;
        let sidecar = container_sidecar(&self.ctx)?;
        let volumes = pod_volumes(&self.ctx);

        pod.spec.volumes.extend(volumes);
        pod.spec.init_containers.push(init);
        pod.spec.containers.push(sidecar);
        pod.metadata
            .annotations
            .insert(ANNOTATION_STATUS.to_string(), STATUS_INJECTED.to_string());

        info!(
            pod = %pod.metadata.name,
            namespace = %pod.metadata.namespace,
            service = pod.annotation(ANNOTATION_SERVICE).unwrap_or_default(),
            "injected connect sidecar"
        );
        Ok(pod)
    }
}

/// Parse a boolean the way Kubernetes annotation users write them
fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Some(true),
        "0" | "f" | "false" => Some(false),
        _ => None,
    }
}
