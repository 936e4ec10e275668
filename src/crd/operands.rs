//! Downstream operand CR kinds
//!
//! The operator never models operand schemas; it writes them as
//! `DynamicObject`s. Each kind below pins the group/version/kind and the
//! object name derived from the HyperConverged resource.

use kube::api::ApiResource;

use crate::kube_utils::HasApiResource;

/// Virtualization engine (`KubeVirt`)
pub struct KubeVirt;

impl HasApiResource for KubeVirt {
    const API_VERSION: &'static str = "kubevirt.io/v1";
    const KIND: &'static str = "KubeVirt";
}

/// Data importer (`CDI`), cluster scoped
pub struct Cdi;

impl HasApiResource for Cdi {
    const API_VERSION: &'static str = "cdi.kubevirt.io/v1beta1";
    const KIND: &'static str = "CDI";
}

/// Network add-ons (`NetworkAddonsConfig`), cluster scoped
pub struct NetworkAddonsConfig;

impl HasApiResource for NetworkAddonsConfig {
    const API_VERSION: &'static str = "networkaddonsoperator.network.kubevirt.io/v1";
    const KIND: &'static str = "NetworkAddonsConfig";
}

/// Scheduling, scale and performance operand (`SSP`)
pub struct Ssp;

impl HasApiResource for Ssp {
    const API_VERSION: &'static str = "ssp.kubevirt.io/v1beta3";
    const KIND: &'static str = "SSP";
}

/// Prometheus Operator alerting rules
pub struct PrometheusRule;

impl HasApiResource for PrometheusRule {
    const API_VERSION: &'static str = "monitoring.coreos.com/v1";
    const KIND: &'static str = "PrometheusRule";
}

/// cert-manager issuer
pub struct Issuer;

impl HasApiResource for Issuer {
    const API_VERSION: &'static str = "cert-manager.io/v1";
    const KIND: &'static str = "Issuer";
}

/// cert-manager certificate
pub struct Certificate;

impl HasApiResource for Certificate {
    const API_VERSION: &'static str = "cert-manager.io/v1";
    const KIND: &'static str = "Certificate";
}

/// Name of the KubeVirt CR
pub fn kubevirt_name(hc_name: &str) -> String {
    format!("kubevirt-{hc_name}")
}

/// Name of the CDI CR
pub fn cdi_name(hc_name: &str) -> String {
    format!("cdi-{hc_name}")
}

/// Name of the NetworkAddonsConfig CR; the network operator only honors this one
pub const NETWORK_ADDONS_NAME: &str = "cluster";

/// Name of the SSP CR
pub fn ssp_name(hc_name: &str) -> String {
    format!("ssp-{hc_name}")
}

/// Identity of one downstream operand CR
#[derive(Clone, Debug)]
pub struct OperandRef {
    /// Human name used in condition reasons ("KubeVirt", "CDI", ...)
    pub component: &'static str,
    /// API resource of the kind
    pub api_resource: ApiResource,
    /// Object name
    pub name: String,
    /// Namespace, `None` for cluster-scoped kinds
    pub namespace: Option<String>,
}

/// The four operand CRs for a HyperConverged resource, in reconcile order
pub fn operand_refs(hc_name: &str, namespace: &str) -> Vec<OperandRef> {
    vec![
        OperandRef {
            component: "KubeVirt",
            api_resource: KubeVirt::api_resource(),
            name: kubevirt_name(hc_name),
            namespace: Some(namespace.to_string()),
        },
        OperandRef {
            component: "CDI",
            api_resource: Cdi::api_resource(),
            name: cdi_name(hc_name),
            namespace: None,
        },
        OperandRef {
            component: "NetworkAddonsConfig",
            api_resource: NetworkAddonsConfig::api_resource(),
            name: NETWORK_ADDONS_NAME.to_string(),
            namespace: None,
        },
        OperandRef {
            component: "SSP",
            api_resource: Ssp::api_resource(),
            name: ssp_name(hc_name),
            namespace: Some(namespace.to_string()),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kube_utils::group_resource;

    #[test]
    fn operand_names_follow_hco_name() {
        let refs = operand_refs("kubevirt-hyperconverged", "hco");
        let names: Vec<&str> = refs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "kubevirt-kubevirt-hyperconverged",
                "cdi-kubevirt-hyperconverged",
                "cluster",
                "ssp-kubevirt-hyperconverged"
            ]
        );
        assert!(refs[1].namespace.is_none());
        assert_eq!(refs[3].namespace.as_deref(), Some("hco"));
    }

    #[test]
    fn api_resources_resolve() {
        assert_eq!(group_resource(&KubeVirt::api_resource()), "kubevirts.kubevirt.io");
        assert_eq!(group_resource(&Cdi::api_resource()), "cdis.cdi.kubevirt.io");
        assert_eq!(group_resource(&Ssp::api_resource()), "ssps.ssp.kubevirt.io");
        assert_eq!(Issuer::api_resource().plural, "issuers");
    }
}
