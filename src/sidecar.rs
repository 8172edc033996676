//! Envoy sidecar container generation
//!
//! The sidecar runs Envoy against the bootstrap the init container left in
//! the shared volume. On shutdown its preStop hook deregisters the proxy
//! using the registration file and consul binary staged by init.

use std::fmt::Write;

use tracing::debug;

use crate::config::CommandContext;
use crate::k8s::{Container, EnvVar, Lifecycle};
use crate::mesh::{
    CONSUL_HTTP_PORT, ENVOY_BOOTSTRAP_FILE, ENV_HOST_IP, SERVICE_FILE, SIDECAR_CONTAINER_NAME,
    STAGED_CONSUL_BINARY,
};
use crate::script::{shell_command, write_addr_export, write_tls_server_name, ENV_CONSUL_HTTP_ADDR};
use crate::volume::{ca_env_and_mount, shared_volume_mount};
use crate::Result;

/// Error context for preStop script rendering
const RENDER_CONTEXT: &str = "sidecar-prestop";

/// Inputs to the preStop deregistration script
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SidecarCommandData {
    /// Agent HTTP API uses TLS
    pub http_tls: bool,
    /// TLS server name override
    pub tls_server_name: Option<String>,
    /// The host IP won't reach the agent at shutdown; skip deregistration
    pub prefer_wan_address: bool,
}

impl SidecarCommandData {
    /// Copy the relevant fields out of the context
    pub fn new(ctx: &CommandContext) -> Self {
        Self {
            http_tls: ctx.consul_http_ssl,
            tls_server_name: ctx.tls_server_name().map(str::to_string),
            prefer_wan_address: ctx.prefer_wan_address,
        }
    }
}

/// Render the preStop script, or `None` when deregistration is skipped
pub fn render_pre_stop_command(data: &SidecarCommandData) -> Result<Option<String>> {
    if data.prefer_wan_address {
        return Ok(None);
    }

    let render = || -> Result<String> {
        let mut out = String::new();
        write_addr_export(&mut out, ENV_CONSUL_HTTP_ADDR, data.http_tls, CONSUL_HTTP_PORT)?;
        write_tls_server_name(&mut out, data.tls_server_name.as_deref())?;
        writeln!(out, "{STAGED_CONSUL_BINARY} services deregister \\")?;
        write!(out, "  {SERVICE_FILE}")?;
        Ok(out)
    };
    render().map(Some).map_err(|e| e.within(RENDER_CONTEXT))
}

/// Build the Envoy sidecar container.
///
/// The preStop hook is attached only when deregistration is possible;
/// with `prefer_wan_address` the container has no lifecycle at all.
pub fn container_sidecar(ctx: &CommandContext) -> Result<Container> {
    let data = SidecarCommandData::new(ctx);
    let pre_stop = render_pre_stop_command(&data)?;
    debug!(
        deregister_on_stop = pre_stop.is_some(),
        "rendered sidecar command"
    );

    let mut env = vec![EnvVar::from_field(ENV_HOST_IP, "status.hostIP")];
    let mut volume_mounts = vec![shared_volume_mount()];
    if let Some((ca_env, ca_mount)) = ca_env_and_mount(ctx) {
        volume_mounts.push(ca_mount);
        env.push(ca_env);
    }

    Ok(Container {
        name: SIDECAR_CONTAINER_NAME.to_string(),
        image: ctx.image_envoy.clone(),
        command: Some(vec![
            "envoy".to_string(),
            "--config-path".to_string(),
            ENVOY_BOOTSTRAP_FILE.to_string(),
        ]),
        env,
        volume_mounts,
        lifecycle: pre_stop.map(|script| Lifecycle::pre_stop_exec(shell_command(script))),
        ..Default::default()
    })
}
