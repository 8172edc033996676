//! Pod annotations that drive connect injection
//!
//! Turns the string annotations on a pod into a typed
//! [`ResolvedAnnotations`] record. Per-entry problems (a bad upstream, a
//! port that doesn't resolve) are dropped here and never reach the caller
//! as errors; one broken upstream shouldn't block the whole pod.

use tracing::debug;

use crate::error::{invariant_violation, Error};
use crate::k8s::Pod;
use crate::Result;

// =============================================================================
// Annotation keys
// =============================================================================

/// Opt a pod in or out of injection. Value is a boolean.
pub const ANNOTATION_INJECT: &str = "consul.hashicorp.com/connect-inject";

/// Set by the injector once a pod has been mutated
pub const ANNOTATION_STATUS: &str = "consul.hashicorp.com/connect-inject-status";

/// Name of the service the pod provides. Defaults to the first container name.
pub const ANNOTATION_SERVICE: &str = "consul.hashicorp.com/connect-service";

/// Port the service listens on, as a number or a named container port
pub const ANNOTATION_PORT: &str = "consul.hashicorp.com/connect-service-port";

/// Comma-separated `name:port` list of services this pod depends on
pub const ANNOTATION_UPSTREAMS: &str = "consul.hashicorp.com/connect-service-upstreams";

/// Value of [`ANNOTATION_STATUS`] on injected pods
pub const STATUS_INJECTED: &str = "injected";

// =============================================================================
// Ports
// =============================================================================

/// Resolve a port annotation value.
///
/// Named container ports win: every container's ports are searched for one
/// named `value` first. Otherwise `value` is parsed as a decimal integer.
/// The result may be zero or negative; callers decide what that means.
pub fn port_value(pod: &Pod, value: &str) -> Result<i32> {
    let named = pod
        .spec
        .containers
        .iter()
        .flat_map(|c| c.ports.iter())
        .find(|p| p.name.as_deref() == Some(value));
    if let Some(port) = named {
        return Ok(i32::from(port.container_port));
    }

    value
        .parse::<i32>()
        .map_err(|e| Error::invalid_port(value, e.to_string()))
}

/// Resolve a port annotation value to a bindable port, or `None`.
///
/// Unparsable values, zero, negatives and values above 65535 all mean "no
/// port".
fn positive_port(pod: &Pod, value: &str) -> Option<u16> {
    match port_value(pod, value) {
        Ok(port) => u16::try_from(port).ok().filter(|p| *p > 0),
        Err(e) => {
            debug!(error = %e, "ignoring unresolvable port");
            None
        }
    }
}

// =============================================================================
// Upstreams
// =============================================================================

/// A service the pod connects to through a port bound locally by the sidecar
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Upstream {
    /// Service name of the upstream
    pub name: String,
    /// Local port the sidecar listens on for this upstream (always > 0)
    pub local_port: u16,
}

impl Upstream {
    /// Canonical `name:port` form
    pub fn to_annotation(&self) -> String {
        format!("{}:{}", self.name, self.local_port)
    }
}

/// Encode upstreams back into the annotation format
pub fn encode_upstreams(upstreams: &[Upstream]) -> String {
    upstreams
        .iter()
        .map(Upstream::to_annotation)
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a comma-separated upstream annotation value.
///
/// Each entry is split on its first colon; both halves are trimmed and the
/// port goes through [`port_value`]. Entries without a colon, with an empty
/// name, or whose port isn't in 1..=65535 are skipped.
pub fn parse_upstreams(pod: &Pod, raw: &str) -> Vec<Upstream> {
    raw.split(',')
        .filter_map(|entry| {
            let Some((name, port)) = entry.split_once(':') else {
                debug!(entry, "skipping upstream without a port");
                return None;
            };
            let name = name.trim();
            if name.is_empty() {
                debug!(entry, "skipping upstream without a name");
                return None;
            }
            let Some(local_port) = positive_port(pod, port.trim()) else {
                debug!(entry, "skipping upstream with unusable port");
                return None;
            };
            Some(Upstream {
                name: name.to_string(),
                local_port,
            })
        })
        .collect()
}

// =============================================================================
// Defaulting and resolution
// =============================================================================

/// Fill in the service and port annotations from the first container.
///
/// The service name defaults to the first container's name; the port
/// defaults to the first container's first port (its name if it has one,
/// otherwise its number). A non-empty service annotation is kept. A port
/// annotation that is present is kept even when empty.
/// Returns whether any annotation was added.
pub fn default_annotations(pod: &mut Pod) -> bool {
    let Some(first) = pod.spec.containers.first() else {
        return false;
    };

    let has_service = matches!(pod.annotation(ANNOTATION_SERVICE), Some(s) if !s.is_empty());
    let service = (!has_service).then(|| first.name.clone());
    let port = (!pod.metadata.annotations.contains_key(ANNOTATION_PORT))
        .then(|| first.ports.first())
        .flatten()
        .map(|p| match &p.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => p.container_port.to_string(),
        });

    let mut changed = false;
    if let Some(service) = service.filter(|s| !s.is_empty()) {
        pod.metadata
            .annotations
            .insert(ANNOTATION_SERVICE.to_string(), service);
        changed = true;
    }
    if let Some(port) = port {
        pod.metadata
            .annotations
            .insert(ANNOTATION_PORT.to_string(), port);
        changed = true;
    }
    changed
}

/// Typed view of a pod's connect annotations
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedAnnotations {
    /// Service name (never empty)
    pub service_name: String,
    /// Local service port, present only when it resolved to a positive value
    pub service_port: Option<u16>,
    /// Upstreams in annotation order
    pub upstreams: Vec<Upstream>,
}

/// Resolve the connect annotations on a pod.
///
/// # Panics
///
/// Panics if the service annotation is missing or empty. Defaulting runs
/// before resolution and never leaves a pod without a service, so reaching
/// this state means the caller skipped it.
pub fn resolve(pod: &Pod) -> ResolvedAnnotations {
    let service_name = match pod.annotation(ANNOTATION_SERVICE) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => invariant_violation(
            "annotations",
            format!(
                "pod '{}' has no {} annotation after defaulting",
                pod.metadata.name, ANNOTATION_SERVICE
            ),
        ),
    };

    let service_port = pod
        .annotation(ANNOTATION_PORT)
        .filter(|raw| !raw.is_empty())
        .and_then(|raw| positive_port(pod, raw));

    let upstreams = pod
        .annotation(ANNOTATION_UPSTREAMS)
        .filter(|raw| !raw.is_empty())
        .map(|raw| parse_upstreams(pod, raw))
        .unwrap_or_default();

    ResolvedAnnotations {
        service_name,
        service_port,
        upstreams,
    }
}
