//! Injection configuration shared by every generator
//!
//! [`CommandContext`] is built once per process (from CLI flags or by the
//! embedding webhook) and passed by reference into each generator call. It
//! is never mutated afterwards, so many pods can be rendered from the same
//! context in parallel.

use std::path::Path;

/// Default image providing the `consul` binary
pub const DEFAULT_CONSUL_IMAGE: &str = "consul:1.4.0";

/// Default image providing the `envoy` binary
pub const DEFAULT_ENVOY_IMAGE: &str = "envoyproxy/envoy-alpine:v1.8.0";

/// Process-wide configuration for generating injected containers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandContext {
    /// Image containing the consul binary, used by the init container
    pub image_consul: String,
    /// Image containing envoy, used by the sidecar
    pub image_envoy: String,
    /// Whether the agent's HTTP API is served over TLS
    pub consul_http_ssl: bool,
    /// Whether the agent's gRPC API is served over TLS
    pub consul_grpc_ssl: bool,
    /// Server name to verify the agent's certificate against
    pub consul_tls_server_name: Option<String>,
    /// CA certificate reference in `secretName:mountPath` form
    pub consul_ca_cert: Option<String>,
    /// Containers can't reach the agent through the host IP at shutdown
    pub prefer_wan_address: bool,
}

impl Default for CommandContext {
    fn default() -> Self {
        Self::new(DEFAULT_CONSUL_IMAGE, DEFAULT_ENVOY_IMAGE)
    }
}

impl CommandContext {
    /// Create a context with the two images and everything else disabled
    pub fn new(image_consul: impl Into<String>, image_envoy: impl Into<String>) -> Self {
        Self {
            image_consul: image_consul.into(),
            image_envoy: image_envoy.into(),
            consul_http_ssl: false,
            consul_grpc_ssl: false,
            consul_tls_server_name: None,
            consul_ca_cert: None,
            prefer_wan_address: false,
        }
    }

    /// Serve the agent's HTTP API over TLS
    pub fn with_http_ssl(mut self, enabled: bool) -> Self {
        self.consul_http_ssl = enabled;
        self
    }

    /// Serve the agent's gRPC API over TLS
    pub fn with_grpc_ssl(mut self, enabled: bool) -> Self {
        self.consul_grpc_ssl = enabled;
        self
    }

    /// Set the TLS server name. Empty strings count as unset.
    pub fn with_tls_server_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.consul_tls_server_name = (!name.is_empty()).then_some(name);
        self
    }

    /// Set the CA certificate reference (`secretName:mountPath`). Empty
    /// strings count as unset.
    pub fn with_ca_cert(mut self, reference: impl Into<String>) -> Self {
        let reference = reference.into();
        self.consul_ca_cert = (!reference.is_empty()).then_some(reference);
        self
    }

    /// Skip host-IP based deregistration at shutdown
    pub fn with_prefer_wan_address(mut self, prefer: bool) -> Self {
        self.prefer_wan_address = prefer;
        self
    }

    /// The TLS server name, if one is configured and non-empty
    pub fn tls_server_name(&self) -> Option<&str> {
        self.consul_tls_server_name
            .as_deref()
            .filter(|name| !name.is_empty())
    }

    /// Parse the configured CA reference.
    ///
    /// Returns `None` when nothing is configured or the reference has no
    /// colon separating secret name and path.
    pub fn ca_cert_ref(&self) -> Option<CaCertRef<'_>> {
        self.consul_ca_cert.as_deref().and_then(CaCertRef::parse)
    }
}

/// A CA certificate stored in a Kubernetes secret and mounted into containers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaCertRef<'a> {
    /// Name of the secret holding the certificate
    pub secret_name: &'a str,
    /// Full in-container path of the certificate file
    pub path: &'a str,
}

impl<'a> CaCertRef<'a> {
    /// Split `secretName:mountPath` on the first colon.
    ///
    /// Everything after the first colon is the path, colons included.
    pub fn parse(reference: &'a str) -> Option<Self> {
        reference
            .split_once(':')
            .map(|(secret_name, path)| Self { secret_name, path })
    }

    /// Directory the secret volume is mounted at: the parent of `path`
    pub fn mount_dir(&self) -> &'a str {
        match Path::new(self.path).parent().and_then(Path::to_str) {
            Some("") | None => ".",
            Some(dir) => dir,
        }
    }
}
