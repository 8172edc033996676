//! Consul Connect constants shared by the init and sidecar containers
//!
//! Single source of truth for the paths, ports and names baked into the
//! generated containers. The init container writes into the shared volume
//! and the sidecar reads from it, so both sides must agree on every path
//! here.

// =============================================================================
// Ports
// =============================================================================

/// Consul agent HTTP API port on the node
pub const CONSUL_HTTP_PORT: u16 = 8500;

/// Consul agent gRPC (xDS) port on the node
pub const CONSUL_GRPC_PORT: u16 = 8502;

/// Public listener port of the Envoy sidecar, registered with Consul
pub const PROXY_PUBLIC_PORT: u16 = 20000;

// =============================================================================
// Shared volume layout
// =============================================================================

/// Name of the emptyDir volume shared by the init container and the sidecar
pub const VOLUME_NAME: &str = "consul-connect-inject-data";

/// Name of the secret volume carrying the Consul CA certificate
pub const VOLUME_NAME_CA: &str = "consul-tls-ca";

/// Mount path of the shared volume in both containers
pub const SHARED_MOUNT_PATH: &str = "/consul/connect-inject";

/// Service registration written by init, deregistered by the sidecar preStop
pub const SERVICE_FILE: &str = "/consul/connect-inject/service.hcl";

/// Envoy bootstrap config written by init, loaded by the sidecar
pub const ENVOY_BOOTSTRAP_FILE: &str = "/consul/connect-inject/envoy-bootstrap.yaml";

/// Copy of the consul binary staged for the sidecar's preStop hook
pub const STAGED_CONSUL_BINARY: &str = "/consul/connect-inject/consul";

/// Location of the consul binary inside the consul image
pub const CONSUL_BINARY: &str = "/bin/consul";

// =============================================================================
// Container names
// =============================================================================

/// Name of the injected init container
pub const INIT_CONTAINER_NAME: &str = "consul-connect-inject-init";

/// Name of the injected Envoy sidecar container
pub const SIDECAR_CONTAINER_NAME: &str = "consul-connect-envoy-sidecar";

// =============================================================================
// Environment
// =============================================================================

/// Node IP, from the downward API
pub const ENV_HOST_IP: &str = "HOST_IP";

/// Pod IP, from the downward API
pub const ENV_POD_IP: &str = "POD_IP";

/// Path of the CA certificate inside the container
pub const ENV_CONSUL_CACERT: &str = "CONSUL_CACERT";

/// Shell used to run generated scripts; `-e` aborts on the first failure
pub const SHELL: [&str; 2] = ["/bin/sh", "-ec"];

// =============================================================================
// Naming Helpers
// =============================================================================

/// Consul service ID of the sidecar proxy: `{pod}-{service}-proxy`.
///
/// The pod name keeps IDs unique when several replicas register against
/// the same node agent.
pub fn proxy_service_id(pod_name: &str, service_name: &str) -> String {
    format!("{}-{}-proxy", pod_name, service_name)
}

/// Consul service name of the sidecar proxy: `{service}-proxy`
pub fn proxy_service_name(service_name: &str) -> String {
    format!("{}-proxy", service_name)
}
