//! The NetworkAddonsConfig CR

use std::net::Ipv4Addr;

use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::{json, Map, Value};

use super::generic::{managed_object, GenericOperand, UpdateHooks, UpgradeProbe};
use super::handler::BuildContext;
use super::jsonpatch::{self, NETWORK_ADDONS_ANNOTATION};
use super::labels::Component;
use super::placement::{placement_value, CertDurations};
use crate::crd::operands::{NetworkAddonsConfig, NETWORK_ADDONS_NAME};
use crate::crd::HyperConverged;
use crate::kube_utils::HasApiResource;
use crate::tls_profile;
use crate::Error;

/// Set to "true" to deploy Open vSwitch
pub const DEPLOY_OVS_ANNOTATION: &str = "deployOVS";

/// Handler of the NetworkAddonsConfig CR
pub fn operand() -> GenericOperand {
    GenericOperand::new(NetworkAddonsConfig::api_resource(), build, UpdateHooks::Spec)
        .with_conditions(UpgradeProbe {
            status_field: "observedVersion",
            expected: |v| v.network_addons.as_str(),
        })
}

fn name_server_ip(hc: &HyperConverged) -> Result<String, Error> {
    let ip = hc.spec.kube_secondary_dns_name_server_ip.clone().unwrap_or_default();
    if !ip.is_empty() && ip.parse::<Ipv4Addr>().is_err() {
        return Err(Error::validation("kubeSecondaryDNSNameServerIP isn't a valid IPv4"));
    }
    Ok(ip)
}

/// Desired NetworkAddonsConfig CR; cluster scoped and always named "cluster"
pub fn build(hc: &HyperConverged, ctx: &BuildContext) -> Result<DynamicObject, Error> {
    let ar = NetworkAddonsConfig::api_resource();
    let mut nao = managed_object(&ar, NETWORK_ADDONS_NAME, false, hc, ctx, Component::Network);

    let mut spec = Map::new();
    for addon in ["multus", "linuxBridge", "kubeMacPool", "kubevirtIpamController"] {
        spec.insert(addon.to_string(), json!({}));
    }

    let name_server_ip = name_server_ip(hc)?;
    if hc.spec.feature_gates.deploy_kube_secondary_dns == Some(true) {
        spec.insert("kubeSecondaryDNS".to_string(), json!({"nameServerIP": name_server_ip}));
    }
    if hc.annotations().get(DEPLOY_OVS_ANNOTATION).map(String::as_str) == Some("true") {
        spec.insert("ovs".to_string(), json!({}));
    }

    let infra = placement_value(hc.spec.infra.node_placement.as_ref())?;
    let workloads = placement_value(hc.spec.workloads.node_placement.as_ref())?;
    if infra.is_some() || workloads.is_some() {
        spec.insert(
            "placementConfiguration".to_string(),
            json!({"infra": infra, "workloads": workloads}),
        );
    }

    let certs = CertDurations::of(hc)?;
    spec.insert(
        "selfSignConfiguration".to_string(),
        json!({
            "caRotateInterval": certs.ca_duration,
            "caOverlapInterval": certs.ca_renew_before,
            "certRotateInterval": certs.server_duration,
            "certOverlapInterval": certs.server_renew_before,
        }),
    );
    spec.insert(
        "tlsSecurityProfile".to_string(),
        serde_json::to_value(tls_profile::effective_profile(ctx.tls_security_profile.as_ref()))?,
    );

    nao.data = json!({ "spec": Value::Object(spec) });
    jsonpatch::apply_annotation_patch(hc, NETWORK_ADDONS_ANNOTATION, &mut nao)?;
    Ok(nao)
}
