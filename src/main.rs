//! Connect Inject - render Consul Connect sidecar injection for pod manifests

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use connect_inject::config::{DEFAULT_CONSUL_IMAGE, DEFAULT_ENVOY_IMAGE};
use connect_inject::k8s::{Container, Pod, Volume};
use connect_inject::{CommandContext, Error, Injector};

/// Connect Inject - Consul Connect sidecar injection for Kubernetes pods
#[derive(Parser, Debug)]
#[command(name = "connect-inject", version, about, long_about = None)]
struct Cli {
    /// Log output format (logs go to stderr)
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the pod manifest with the sidecar injected
    Render(RenderArgs),

    /// Print only the generated containers and volumes
    ///
    /// Prints empty lists when the pod isn't selected for injection.
    Containers(RenderArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Arguments shared by every rendering command
#[derive(Args, Debug)]
struct RenderArgs {
    /// Pod manifest (YAML or JSON), or `-` for stdin
    #[arg(short = 'f', long = "file")]
    file: PathBuf,

    #[command(flatten)]
    context: ContextArgs,
}

/// Injection context flags
#[derive(Args, Debug)]
struct ContextArgs {
    /// Image providing the consul binary
    #[arg(long, env = "CONNECT_INJECT_CONSUL_IMAGE", default_value = DEFAULT_CONSUL_IMAGE)]
    consul_image: String,

    /// Image providing the envoy binary
    #[arg(long, env = "CONNECT_INJECT_ENVOY_IMAGE", default_value = DEFAULT_ENVOY_IMAGE)]
    envoy_image: String,

    /// Talk to the agent's HTTP API over TLS
    #[arg(long)]
    consul_http_ssl: bool,

    /// Talk to the agent's gRPC API over TLS
    #[arg(long)]
    consul_grpc_ssl: bool,

    /// Server name used to verify the agent's TLS certificate
    #[arg(long)]
    consul_tls_server_name: Option<String>,

    /// CA certificate as `secretName:path/to/ca.pem`
    #[arg(long)]
    consul_ca_cert: Option<String>,

    /// Skip proxy deregistration on shutdown (agent not reachable via host IP)
    #[arg(long)]
    prefer_wan_address: bool,

    /// Only inject pods annotated with connect-inject=true
    #[arg(long)]
    require_annotation: bool,
}

impl ContextArgs {
    fn command_context(&self) -> CommandContext {
        let mut ctx = CommandContext::new(&self.consul_image, &self.envoy_image)
            .with_http_ssl(self.consul_http_ssl)
            .with_grpc_ssl(self.consul_grpc_ssl)
            .with_prefer_wan_address(self.prefer_wan_address);
        if let Some(name) = &self.consul_tls_server_name {
            ctx = ctx.with_tls_server_name(name);
        }
        if let Some(ca) = &self.consul_ca_cert {
            ctx = ctx.with_ca_cert(ca);
        }
        ctx
    }

    fn injector(&self) -> Injector {
        Injector::new(self.command_context()).with_require_annotation(self.require_annotation)
    }
}

/// What injection added to a pod
#[derive(Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct InjectedResources {
    init_containers: Vec<Container>,
    containers: Vec<Container>,
    volumes: Vec<Volume>,
}

impl InjectedResources {
    /// Everything appended to `after` relative to `before`
    fn between(before: &Pod, after: &Pod) -> Self {
        fn tail<T: Clone>(before: &[T], after: &[T]) -> Vec<T> {
            after.get(before.len()..).unwrap_or_default().to_vec()
        }
        Self {
            init_containers: tail(&before.spec.init_containers, &after.spec.init_containers),
            containers: tail(&before.spec.containers, &after.spec.containers),
            volumes: tail(&before.spec.volumes, &after.spec.volumes),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Render(args) => {
            let pod = read_pod(&args.file)?;
            let mutated = args.context.injector().mutate(pod)?;
            print_yaml(&mutated, "Pod")
        }
        Commands::Containers(args) => {
            let pod = read_pod(&args.file)?;
            let mutated = args.context.injector().mutate(pod.clone())?;
            print_yaml(&InjectedResources::between(&pod, &mutated), "InjectedResources")
        }
    }
}

/// Initialize tracing; logs go to stderr so stdout stays a clean manifest
fn init_tracing(format: LogFormat) {
    let registry = tracing_subscriber::registry().with(EnvFilter::from_default_env());
    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

/// Read a pod manifest from a file, or stdin for `-`
fn read_pod(path: &Path) -> anyhow::Result<Pod> {
    let content = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read pod manifest from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pod manifest {:?}", path))?
    };
    Ok(parse_pod(&content)?)
}

/// Parse a pod manifest; YAML is a superset of JSON so both are accepted
fn parse_pod(content: &str) -> Result<Pod, Error> {
    serde_yaml::from_str(content).map_err(|e| Error::serialization_for_kind("Pod", e.to_string()))
}

fn print_yaml<T: Serialize>(value: &T, kind: &str) -> anyhow::Result<()> {
    let yaml = serde_yaml::to_string(value)
        .map_err(|e| Error::serialization_for_kind(kind, e.to_string()))?;
    print!("{yaml}");
    Ok(())
}
