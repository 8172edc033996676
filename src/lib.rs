//! Connect Inject - Consul Connect sidecar injection for Kubernetes pods
//!
//! Given a pod and an injection context, this crate produces everything a
//! pod needs to join the Consul service mesh:
//! - an init container that registers the pod's proxy with the node-local
//!   Consul agent and renders the Envoy bootstrap
//! - an Envoy sidecar container that deregisters the proxy on shutdown
//! - the volumes the two containers share
//!
//! Everything is a pure transformation of Kubernetes objects. No network
//! calls are made; the generated shell commands talk to Consul at pod
//! runtime.
//!
//! # Modules
//!
//! - [`k8s`] - Serde subset of the core/v1 Pod API
//! - [`config`] - Injection context (images, TLS, CA certificate)
//! - [`annotations`] - Annotation keys, defaulting and resolution
//! - [`mesh`] - Paths, ports and names both containers agree on
//! - [`script`] - Shell script building blocks
//! - [`init`] - Init container and service registration rendering
//! - [`sidecar`] - Envoy sidecar and preStop deregistration
//! - [`volume`] - Shared and CA volumes
//! - [`inject`] - Pod mutation entry point
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod annotations;
pub mod config;
pub mod error;
pub mod init;
pub mod inject;
pub mod k8s;
pub mod mesh;
pub mod script;
pub mod sidecar;
pub mod volume;

pub use config::CommandContext;
pub use error::Error;
pub use inject::Injector;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
