//! Init container generation
//!
//! The init container runs once before the workload starts. Its script:
//! 1. exports the agent addresses (node-local, TLS-aware)
//! 2. writes the proxy's service registration into the shared volume
//! 3. registers it with the node's Consul agent
//! 4. renders the Envoy bootstrap into the shared volume
//! 5. stages the consul binary for the sidecar's preStop hook
//!
//! Each step is rendered by its own function so the conditional parts
//! (TLS scheme, optional local port, upstream blocks) can be tested alone.

use std::fmt::Write;

use tracing::debug;

use crate::annotations::{self, Upstream};
use crate::config::CommandContext;
use crate::error::invariant_violation;
use crate::k8s::{Container, EnvVar, Pod};
use crate::mesh::{
    proxy_service_id, proxy_service_name, CONSUL_BINARY, CONSUL_GRPC_PORT, CONSUL_HTTP_PORT,
    ENVOY_BOOTSTRAP_FILE, ENV_HOST_IP, ENV_POD_IP, INIT_CONTAINER_NAME, PROXY_PUBLIC_PORT,
    SERVICE_FILE, STAGED_CONSUL_BINARY,
};
use crate::script::{
    escape_double_quoted, escape_hcl_heredoc, shell_command, write_addr_export,
    write_tls_server_name, ENV_CONSUL_GRPC_ADDR, ENV_CONSUL_HTTP_ADDR,
};
use crate::volume::{ca_env_and_mount, shared_volume_mount};
use crate::Result;

/// Error context for init script rendering
const RENDER_CONTEXT: &str = "init";

/// Interval of the proxy's TCP health check
const CHECK_INTERVAL: &str = "10s";

/// How long the proxy may stay critical before Consul deregisters it
const DEREGISTER_CRITICAL_AFTER: &str = "10m";

/// Address Envoy uses to reach the local application
const LOCAL_SERVICE_ADDRESS: &str = "127.0.0.1";

/// Everything the init script needs, resolved from the pod and context
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitCommandData {
    /// Pod name, used to make the proxy ID unique per replica
    pub pod_name: String,
    /// Service the proxy fronts (never empty)
    pub service_name: String,
    /// Local port of the application, when it accepts inbound traffic
    pub service_port: Option<u16>,
    /// Upstreams exposed on local ports, in annotation order
    pub upstreams: Vec<Upstream>,
    /// Agent HTTP API uses TLS
    pub http_tls: bool,
    /// Agent gRPC API uses TLS
    pub grpc_tls: bool,
    /// TLS server name override
    pub tls_server_name: Option<String>,
}

impl InitCommandData {
    /// Create command data for a service with no port and no upstreams.
    ///
    /// # Panics
    ///
    /// Panics if `service_name` is empty.
    pub fn new(
        pod_name: impl Into<String>,
        service_name: impl Into<String>,
        ctx: &CommandContext,
    ) -> Self {
        let pod_name = pod_name.into();
        let service_name = service_name.into();
        if service_name.is_empty() {
            invariant_violation(
                RENDER_CONTEXT,
                format!("no service name for pod '{pod_name}'; it should have been defaulted"),
            );
        }

        Self {
            pod_name,
            service_name,
            service_port: None,
            upstreams: Vec::new(),
            http_tls: ctx.consul_http_ssl,
            grpc_tls: ctx.consul_grpc_ssl,
            tls_server_name: ctx.tls_server_name().map(str::to_string),
        }
    }

    /// Resolve command data from a pod's annotations.
    ///
    /// # Panics
    ///
    /// Panics if the pod has no service annotation; see
    /// [`annotations::resolve`].
    pub fn from_pod(pod: &Pod, ctx: &CommandContext) -> Self {
        let resolved = annotations::resolve(pod);
        Self::new(&pod.metadata.name, resolved.service_name, ctx)
            .with_service_port(resolved.service_port)
            .with_upstreams(resolved.upstreams)
    }

    /// Set the local service port. `Some(0)` counts as no port.
    pub fn with_service_port(mut self, port: Option<u16>) -> Self {
        self.service_port = port.filter(|p| *p > 0);
        self
    }

    /// Set the upstreams. Entries with port 0 are dropped.
    pub fn with_upstreams(mut self, upstreams: Vec<Upstream>) -> Self {
        self.upstreams = upstreams.into_iter().filter(|u| u.local_port > 0).collect();
        self
    }

    /// Consul service ID of the proxy
    pub fn proxy_id(&self) -> String {
        proxy_service_id(&self.pod_name, &self.service_name)
    }
}

// =============================================================================
// Script sections
// =============================================================================

/// Agent address exports (HTTP, gRPC, optional TLS server name)
pub fn env_exports(data: &InitCommandData) -> Result<String> {
    let mut out = String::new();
    write_addr_export(&mut out, ENV_CONSUL_HTTP_ADDR, data.http_tls, CONSUL_HTTP_PORT)?;
    write_addr_export(&mut out, ENV_CONSUL_GRPC_ADDR, data.grpc_tls, CONSUL_GRPC_PORT)?;
    write_tls_server_name(&mut out, data.tls_server_name.as_deref())?;
    Ok(out)
}

/// The proxy's service registration in HCL, without the heredoc wrapper.
///
/// `${POD_IP}` is left for the shell to expand when the heredoc runs.
pub fn service_registration(data: &InitCommandData) -> Result<String> {
    let service = escape_hcl_heredoc(&data.service_name);
    let mut out = String::new();

    writeln!(out, "services {{")?;
    writeln!(out, r#"  id   = "{}""#, escape_hcl_heredoc(&data.proxy_id()))?;
    writeln!(
        out,
        r#"  name = "{}""#,
        escape_hcl_heredoc(&proxy_service_name(&data.service_name))
    )?;
    writeln!(out, r#"  kind = "connect-proxy""#)?;
    writeln!(out, r#"  address = "${{{ENV_POD_IP}}}""#)?;
    writeln!(out, "  port = {PROXY_PUBLIC_PORT}")?;
    writeln!(out)?;

    writeln!(out, "  proxy {{")?;
    writeln!(out, r#"    destination_service_name = "{service}""#)?;
    writeln!(out, r#"    destination_service_id = "{service}""#)?;
    if let Some(port) = data.service_port {
        writeln!(out, r#"    local_service_address = "{LOCAL_SERVICE_ADDRESS}""#)?;
        writeln!(out, "    local_service_port = {port}")?;
    }
    for upstream in &data.upstreams {
        writeln!(out)?;
        writeln!(out, "    upstreams {{")?;
        writeln!(
            out,
            r#"      destination_name = "{}""#,
            escape_hcl_heredoc(&upstream.name)
        )?;
        writeln!(out, "      local_bind_port = {}", upstream.local_port)?;
        writeln!(out, "    }}")?;
    }
    writeln!(out, "  }}")?;
    writeln!(out)?;

    writeln!(out, "  checks {{")?;
    writeln!(out, r#"    name = "Proxy Public Listener""#)?;
    writeln!(out, r#"    tcp = "${{{ENV_POD_IP}}}:{PROXY_PUBLIC_PORT}""#)?;
    writeln!(out, r#"    interval = "{CHECK_INTERVAL}""#)?;
    writeln!(
        out,
        r#"    deregister_critical_service_after = "{DEREGISTER_CRITICAL_AFTER}""#
    )?;
    writeln!(out, "  }}")?;
    writeln!(out)?;

    writeln!(out, "  checks {{")?;
    writeln!(out, r#"    name = "Destination Alias""#)?;
    writeln!(out, r#"    alias_service = "{service}""#)?;
    writeln!(out, "  }}")?;
    writeln!(out, "}}")?;
    Ok(out)
}

/// Heredoc writing the registration into the shared volume
pub fn write_registration(data: &InitCommandData) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "cat <<EOF >{SERVICE_FILE}")?;
    out.push_str(&service_registration(data)?);
    writeln!(out, "EOF")?;
    Ok(out)
}

/// Register, bootstrap Envoy, and stage the consul binary
pub fn register_commands(data: &InitCommandData) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "{CONSUL_BINARY} services register {SERVICE_FILE}")?;
    writeln!(out)?;
    writeln!(out, "{CONSUL_BINARY} connect envoy \\")?;
    writeln!(
        out,
        r#"  -proxy-id="{}" \"#,
        escape_double_quoted(&data.proxy_id())
    )?;
    writeln!(out, "  -bootstrap > {ENVOY_BOOTSTRAP_FILE}")?;
    writeln!(out)?;
    writeln!(out, "cp {CONSUL_BINARY} {STAGED_CONSUL_BINARY}")?;
    Ok(out)
}

/// Render the complete init script
pub fn render_init_command(data: &InitCommandData) -> Result<String> {
    let sections = [
        env_exports(data),
        write_registration(data),
        register_commands(data),
    ];
    let rendered = sections
        .into_iter()
        .collect::<Result<Vec<_>>>()
        .map_err(|e| e.within(RENDER_CONTEXT))?;
    Ok(rendered.join("\n").trim().to_string())
}

// =============================================================================
// Container
// =============================================================================

/// Build the init container for a pod.
///
/// The pod's annotations must already be defaulted; see
/// [`annotations::default_annotations`].
///
/// # Panics
///
/// Panics if the pod has no service annotation.
pub fn container_init(ctx: &CommandContext, pod: &Pod) -> Result<Container> {
    let data = InitCommandData::from_pod(pod, ctx);
    let script = render_init_command(&data)?;
    debug!(
        pod = %data.pod_name,
        service = %data.service_name,
        upstreams = data.upstreams.len(),
        "rendered init command"
    );

    let mut env = vec![
        EnvVar::from_field(ENV_HOST_IP, "status.hostIP"),
        EnvVar::from_field(ENV_POD_IP, "status.podIP"),
    ];
    let mut volume_mounts = vec![shared_volume_mount()];
    if let Some((ca_env, ca_mount)) = ca_env_and_mount(ctx) {
        volume_mounts.push(ca_mount);
        env.push(ca_env);
    }

    Ok(Container {
        name: INIT_CONTAINER_NAME.to_string(),
        image: ctx.image_consul.clone(),
        command: Some(shell_command(script)),
        env,
        volume_mounts,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::{ANNOTATION_PORT, ANNOTATION_SERVICE, ANNOTATION_UPSTREAMS};
    use crate::mesh::SHARED_MOUNT_PATH;

    fn upstream(name: &str, local_port: u16) -> Upstream {
        Upstream {
            name: name.to_string(),
            local_port,
        }
    }

    fn data() -> InitCommandData {
        InitCommandData::new("pod1", "web", &CommandContext::default())
    }

    #[test]
    fn test_env_exports_plain() {
        let out = env_exports(&data()).expect("render");
        assert_eq!(
            out,
            "export CONSUL_HTTP_ADDR=\"${HOST_IP}:8500\"\n\
             export CONSUL_GRPC_ADDR=\"${HOST_IP}:8502\"\n"
        );
    }

    #[test]
    fn test_env_exports_tls_flags_are_independent() {
        let ctx = CommandContext::default()
            .with_grpc_ssl(true)
            .with_tls_server_name("server.dc1.consul");
        let out = env_exports(&InitCommandData::new("pod1", "web", &ctx)).expect("render");
        assert!(out.contains("CONSUL_HTTP_ADDR=\"${HOST_IP}:8500\""));
        assert!(out.contains("CONSUL_GRPC_ADDR=\"https://${HOST_IP}:8502\""));
        assert!(out.contains("export CONSUL_TLS_SERVER_NAME=\"server.dc1.consul\""));
    }

    #[test]
    fn test_registration_identity() {
        let out = service_registration(&data()).expect("render");
        assert!(out.contains(r#"id   = "pod1-web-proxy""#));
        assert!(out.contains(r#"name = "web-proxy""#));
        assert!(out.contains(r#"kind = "connect-proxy""#));
        assert!(out.contains(r#"address = "${POD_IP}""#));
        assert!(out.contains("port = 20000"));
        assert!(out.contains(r#"destination_service_name = "web""#));
        assert!(out.contains(r#"destination_service_id = "web""#));
    }

    #[test]
    fn test_registration_without_port_or_upstreams() {
        let out = service_registration(&data()).expect("render");
        assert!(!out.contains("local_service_port"));
        assert!(!out.contains("local_service_address"));
        assert!(!out.contains("upstreams"));
    }

    #[test]
    fn test_registration_with_port_and_upstreams() {
        let data = data()
            .with_service_port(Some(8080))
            .with_upstreams(vec![upstream("db", 5432), upstream("cache", 6379)]);
        let out = service_registration(&data).expect("render");

        assert!(out.contains(r#"local_service_address = "127.0.0.1""#));
        assert!(out.contains("local_service_port = 8080"));
        assert_eq!(out.matches("upstreams {").count(), 2);

        let db = out.find(r#"destination_name = "db""#).expect("db upstream");
        let cache = out.find(r#"destination_name = "cache""#).expect("cache upstream");
        assert!(db < cache);
        assert!(out.contains("local_bind_port = 5432"));
        assert!(out.contains("local_bind_port = 6379"));
    }

    #[test]
    fn test_registration_checks() {
        let out = service_registration(&data()).expect("render");
        assert!(out.contains(r#"name = "Proxy Public Listener""#));
        assert!(out.contains(r#"tcp = "${POD_IP}:20000""#));
        assert!(out.contains(r#"interval = "10s""#));
        assert!(out.contains(r#"deregister_critical_service_after = "10m""#));
        assert!(out.contains(r#"name = "Destination Alias""#));
        assert!(out.contains(r#"alias_service = "web""#));
    }

    #[test]
    fn test_registration_blocks_are_balanced() {
        let data = data()
            .with_service_port(Some(8080))
            .with_upstreams(vec![upstream("db", 5432)]);
        let out = service_registration(&data).expect("render");
        assert_eq!(out.matches('{').count(), out.matches('}').count());
    }

    #[test]
    fn test_zero_port_and_upstream_are_dropped() {
        let data = data()
            .with_service_port(Some(0))
            .with_upstreams(vec![upstream("db", 0)]);
        assert_eq!(data.service_port, None);
        assert!(data.upstreams.is_empty());
    }

    #[test]
    fn test_register_commands() {
        let out = register_commands(&data()).expect("render");
        let register = out
            .find("/bin/consul services register /consul/connect-inject/service.hcl")
            .expect("register command");
        let bootstrap = out
            .find("-bootstrap > /consul/connect-inject/envoy-bootstrap.yaml")
            .expect("bootstrap command");
        let copy = out
            .find("cp /bin/consul /consul/connect-inject/consul")
            .expect("copy command");
        assert!(register < bootstrap && bootstrap < copy);
        assert!(out.contains(r#"-proxy-id="pod1-web-proxy""#));
    }

    #[test]
    fn test_render_writes_registration_before_registering() {
        let script = render_init_command(&data()).expect("render");
        let write = script
            .find("cat <<EOF >/consul/connect-inject/service.hcl")
            .expect("heredoc");
        let end = script.find("\nEOF\n").expect("heredoc terminator");
        let register = script.find("services register").expect("register");
        assert!(script.starts_with("export CONSUL_HTTP_ADDR="));
        assert!(write < end && end < register);
        assert!(!script.ends_with('\n'));
    }

    #[test]
    fn test_hostile_service_name_is_escaped() {
        let data = InitCommandData::new("pod1", "web$(id)", &CommandContext::default());
        let script = render_init_command(&data).expect("render");
        assert!(script.contains(r"web\$(id)"));
        assert_eq!(
            script.matches("$(id)").count(),
            script.matches(r"\$(id)").count()
        );
    }

    #[test]
    fn test_line_breaks_cannot_end_the_heredoc() {
        let pod = Pod::new("pod1", "default")
            .with_annotation(ANNOTATION_SERVICE, "web")
            .with_annotation(
                ANNOTATION_UPSTREAMS,
                "db\nEOF\ntouch /tmp/x\ncat <<EOF >/dev/null\nx:5432",
            );
        let data = InitCommandData::from_pod(&pod, &CommandContext::default());
        assert_eq!(data.upstreams.len(), 1);

        let script = render_init_command(&data).expect("render");
        assert_eq!(script.lines().filter(|l| *l == "EOF").count(), 1);
        assert!(!script.lines().any(|l| l == "touch /tmp/x"));
        assert!(script.contains(r#"destination_name = "db\nEOF\ntouch /tmp/x"#));

        let data = InitCommandData::new("pod1", "web\nEOF", &CommandContext::default());
        let hcl = service_registration(&data).expect("render");
        assert!(!hcl.lines().any(|l| l == "EOF"));
        assert!(hcl.contains(r#"alias_service = "web\nEOF""#));
    }

    #[test]
    #[should_panic(expected = "invariant violated [init]")]
    fn test_empty_service_name_panics() {
        InitCommandData::new("pod1", "", &CommandContext::default());
    }

    #[test]
    fn test_container_init() {
        let pod = Pod::new("pod1", "default")
            .with_annotation(ANNOTATION_SERVICE, "web")
            .with_annotation(ANNOTATION_PORT, "8080")
            .with_annotation(ANNOTATION_UPSTREAMS, "db:5432");
        let ctx = CommandContext::new("consul:1.4.0", "envoy:1.8.0");
        let container = container_init(&ctx, &pod).expect("init container");

        assert_eq!(container.name, "consul-connect-inject-init");
        assert_eq!(container.image, "consul:1.4.0");

        let command = container.command.expect("command");
        assert_eq!(command[..2], ["/bin/sh".to_string(), "-ec".to_string()]);
        assert!(command[2].contains("local_service_port = 8080"));

        assert_eq!(
            container.env.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            vec!["HOST_IP", "POD_IP"]
        );
        assert_eq!(container.env[0].field_path(), Some("status.hostIP"));
        assert_eq!(container.env[1].field_path(), Some("status.podIP"));

        assert_eq!(container.volume_mounts.len(), 1);
        assert_eq!(container.volume_mounts[0].mount_path, SHARED_MOUNT_PATH);
        assert!(container.lifecycle.is_none());
    }

    #[test]
    fn test_container_init_with_ca() {
        let pod = Pod::new("pod1", "default").with_annotation(ANNOTATION_SERVICE, "web");
        let ctx = CommandContext::default().with_ca_cert("ca-secret:/etc/ca/ca.pem");
        let container = container_init(&ctx, &pod).expect("init container");

        let ca_env = container.env_var("CONSUL_CACERT").expect("CA env");
        assert_eq!(ca_env.value.as_deref(), Some("/etc/ca/ca.pem"));
        let ca_mount = container.volume_mount("consul-tls-ca").expect("CA mount");
        assert_eq!(ca_mount.mount_path, "/etc/ca");
    }
}
