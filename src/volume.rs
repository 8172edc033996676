//! Volumes shared between the injected containers
//!
//! The shared emptyDir carries the service registration, the Envoy
//! bootstrap and a staged consul binary from the init container to the
//! sidecar. The optional CA volume exposes the Consul CA certificate secret
//! to both.

use crate::config::{CaCertRef, CommandContext};
use crate::error::invariant_violation;
use crate::k8s::{EnvVar, Volume, VolumeMount};
use crate::mesh::{ENV_CONSUL_CACERT, SHARED_MOUNT_PATH, VOLUME_NAME, VOLUME_NAME_CA};

/// The pod-lifetime emptyDir shared by the init container and the sidecar
pub fn container_volume() -> Volume {
    Volume::from_empty_dir(VOLUME_NAME, None, None)
}

/// The secret volume holding the Consul CA certificate.
///
/// # Panics
///
/// Panics when no CA reference is configured or it isn't of the form
/// `secretName:mountPath`. Callers only request this volume after checking
/// [`CommandContext::ca_cert_ref`].
pub fn container_volume_ca(ctx: &CommandContext) -> Volume {
    match ctx.ca_cert_ref() {
        Some(ca) => Volume::from_secret(VOLUME_NAME_CA, ca.secret_name),
        None => invariant_violation(
            "ca-volume",
            format!(
                "expected valid secret name and mount path for the CA certificate, got {:?}",
                ctx.consul_ca_cert.as_deref().unwrap_or_default()
            ),
        ),
    }
}

/// Mount of the shared volume
pub fn shared_volume_mount() -> VolumeMount {
    VolumeMount::new(VOLUME_NAME, SHARED_MOUNT_PATH)
}

/// Mount of the CA volume at the directory containing the certificate
pub fn ca_volume_mount(ca: &CaCertRef<'_>) -> VolumeMount {
    VolumeMount::readonly(VOLUME_NAME_CA, ca.mount_dir())
}

/// CA env var and mount for a container, when a CA reference is configured.
///
/// Both injected containers call this so they agree on where the
/// certificate lives.
pub fn ca_env_and_mount(ctx: &CommandContext) -> Option<(EnvVar, VolumeMount)> {
    ctx.ca_cert_ref()
        .map(|ca| (EnvVar::literal(ENV_CONSUL_CACERT, ca.path), ca_volume_mount(&ca)))
}

/// All volumes the injected containers need, in the order they're appended
pub fn pod_volumes(ctx: &CommandContext) -> Vec<Volume> {
    let mut volumes = vec![container_volume()];
    if ctx.ca_cert_ref().is_some() {
        volumes.push(container_volume_ca(ctx));
    }
    volumes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::EmptyDirVolumeSource;

    #[test]
    fn test_shared_volume_is_empty_dir() {
        let volume = container_volume();
        assert_eq!(volume.name, "consul-connect-inject-data");
        assert_eq!(volume.empty_dir, Some(EmptyDirVolumeSource::default()));
        assert!(volume.secret.is_none());
    }

    #[test]
    fn test_ca_volume_uses_secret_name() {
        let ctx = CommandContext::default().with_ca_cert("ca-secret:/etc/ca/ca.pem");
        let volume = container_volume_ca(&ctx);
        assert_eq!(volume.name, "consul-tls-ca");
        assert_eq!(
            volume.secret.as_ref().map(|s| s.secret_name.as_str()),
            Some("ca-secret")
        );
        assert!(volume.empty_dir.is_none());
    }

    #[test]
    #[should_panic(expected = "invariant violated [ca-volume]")]
    fn test_ca_volume_with_malformed_reference_panics() {
        let ctx = CommandContext::default().with_ca_cert("ca-secret");
        container_volume_ca(&ctx);
    }

    #[test]
    #[should_panic(expected = "invariant violated [ca-volume]")]
    fn test_ca_volume_without_reference_panics() {
        container_volume_ca(&CommandContext::default());
    }

    #[test]
    fn test_ca_env_and_mount() {
        let ctx = CommandContext::default().with_ca_cert("ca-secret:/etc/ca/ca.pem");
        let (env, mount) = ca_env_and_mount(&ctx).expect("CA configured");
        assert_eq!(env.name, "CONSUL_CACERT");
        assert_eq!(env.value.as_deref(), Some("/etc/ca/ca.pem"));
        assert_eq!(mount.name, "consul-tls-ca");
        assert_eq!(mount.mount_path, "/etc/ca");
        assert_eq!(mount.read_only, Some(true));

        assert!(ca_env_and_mount(&CommandContext::default()).is_none());
    }

    #[test]
    fn test_pod_volumes() {
        assert_eq!(pod_volumes(&CommandContext::default()).len(), 1);

        let ctx = CommandContext::default().with_ca_cert("ca-secret:/etc/ca/ca.pem");
        let names: Vec<_> = pod_volumes(&ctx).into_iter().map(|v| v.name).collect();
        assert_eq!(names, vec!["consul-connect-inject-data", "consul-tls-ca"]);

        let malformed = CommandContext::default().with_ca_cert("ca-secret");
        assert_eq!(pod_volumes(&malformed).len(), 1);
    }
}
