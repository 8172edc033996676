//! Property tests over arbitrary annotations and contexts

use connect_inject::annotations::{
    encode_upstreams, parse_upstreams, ANNOTATION_PORT, ANNOTATION_SERVICE,
};
use connect_inject::init::{container_init, service_registration, InitCommandData};
use connect_inject::k8s::Pod;
use connect_inject::mesh::VOLUME_NAME_CA;
use connect_inject::sidecar::container_sidecar;
use connect_inject::CommandContext;
use proptest::prelude::*;

proptest! {
    #[test]
    fn registration_names_the_destination(
        service in "[a-z][a-z0-9-]{0,20}",
        port in 0u16..=65535,
    ) {
        let pod = Pod::new("pod1", "default")
            .with_annotation(ANNOTATION_SERVICE, service.as_str())
            .with_annotation(ANNOTATION_PORT, port.to_string());
        let data = InitCommandData::from_pod(&pod, &CommandContext::default());
        let hcl = service_registration(&data).expect("render");

        let destination_name = format!(r#"destination_service_name = "{service}""#);
        let destination_id = format!(r#"destination_service_id = "{service}""#);
        prop_assert!(hcl.contains(&destination_name));
        prop_assert!(hcl.contains(&destination_id));
        prop_assert_eq!(hcl.contains("local_service_port"), port > 0);
        if port > 0 {
            let local_port = format!("local_service_port = {port}");
            prop_assert!(hcl.contains(&local_port));
        }
    }

    #[test]
    fn upstream_parsing_is_idempotent(
        entries in prop::collection::vec("[ a-z0-9-]{0,8}(:[ 0-9a-z-]{0,6})?", 0..6),
    ) {
        let pod = Pod::new("pod1", "default");
        let raw = entries.join(",");

        let parsed = parse_upstreams(&pod, &raw);
        prop_assert!(parsed.iter().all(|u| u.local_port > 0 && !u.name.is_empty()));

        let reparsed = parse_upstreams(&pod, &encode_upstreams(&parsed));
        prop_assert_eq!(parsed, reparsed);
    }

    #[test]
    fn ca_is_wired_into_both_containers_iff_reference_has_a_pair(
        secret in "[a-z][a-z0-9-]{0,12}",
        dir in "[a-z]{1,8}",
        with_colon in any::<bool>(),
    ) {
        let path = format!("/{dir}/ca.pem");
        let reference = if with_colon {
            format!("{secret}:{path}")
        } else {
            format!("{secret}{path}")
        };
        let ctx = CommandContext::default().with_ca_cert(reference);
        let pod = Pod::new("pod1", "default").with_annotation(ANNOTATION_SERVICE, "web");

        let init = container_init(&ctx, &pod).expect("init container");
        let sidecar = container_sidecar(&ctx).expect("sidecar container");
        for container in [&init, &sidecar] {
            prop_assert_eq!(container.env_var("CONSUL_CACERT").is_some(), with_colon);
            prop_assert_eq!(container.volume_mount(VOLUME_NAME_CA).is_some(), with_colon);
        }
    }

    #[test]
    fn pre_stop_hook_absent_iff_preferring_wan(
        prefer_wan in any::<bool>(),
        http_ssl in any::<bool>(),
    ) {
        let ctx = CommandContext::default()
            .with_http_ssl(http_ssl)
            .with_prefer_wan_address(prefer_wan);
        let sidecar = container_sidecar(&ctx).expect("sidecar container");

        match sidecar.pre_stop_command() {
            Some(command) => {
                prop_assert!(!prefer_wan);
                prop_assert!(command[2].contains("services deregister"));
            }
            None => {
                prop_assert!(prefer_wan);
            }
        }
    }
}
