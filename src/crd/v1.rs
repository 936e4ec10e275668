//! HyperConverged `v1`: the storage version
//!
//! Identical to `v1beta1` except for the feature gates, which are an ordered
//! list of `{name, enabled}` entries instead of a record of booleans.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::feature_gates::FeatureGateList;
use super::types::{
    DataImportCronTemplate, EvictionStrategy, FilesystemOverhead,
    HigherWorkloadDensityConfiguration, HyperConvergedCertConfig, HyperConvergedConfig,
    HyperConvergedObsoleteCpus,
    HyperConvergedStatus, HyperConvergedWorkloadUpdateStrategy, KsmConfiguration,
    LiveMigrationConfigurations, LogVerbosityConfiguration, MediatedDevicesConfiguration,
    OperandResourceRequirements, PermittedHostDevices, StorageImportConfig, TlsSecurityProfile,
    TuningPolicy, UninstallStrategy, VirtualMachineOptions, WebhooksConfig,
};

/// Desired state of the virtualization stack, storage version
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "hco.kubevirt.io",
    version = "v1",
    kind = "HyperConverged",
    plural = "hyperconvergeds",
    shortname = "hco",
    shortname = "hcos",
    status = "HyperConvergedStatus",
    namespaced,
    derive = "PartialEq",
    derive = "Default",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.systemHealthStatus"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HyperConvergedSpec {
    /// Deprecated local storage class name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_storage_class_name: Option<String>,

    /// Rate-limit tuning profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuning_policy: Option<TuningPolicy>,

    /// Placement of infrastructure components
    #[serde(default)]
    pub infra: HyperConvergedConfig,

    /// Placement of workloads (VMs) and node-level components
    #[serde(default)]
    pub workloads: HyperConvergedConfig,

    /// Feature gates, listed only when they differ from their phase default
    #[serde(default, skip_serializing_if = "FeatureGateList::is_empty")]
    pub feature_gates: FeatureGateList,

    /// Live-migration tuning
    #[serde(default)]
    pub live_migration_config: LiveMigrationConfigurations,

    /// Host devices VMs may consume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permitted_host_devices: Option<PermittedHostDevices>,

    /// Mediated device types to configure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mediated_devices_configuration: Option<MediatedDevicesConfiguration>,

    /// Certificate rotation
    #[serde(default)]
    pub cert_config: HyperConvergedCertConfig,

    /// Operand workload resource requirements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_requirements: Option<OperandResourceRequirements>,

    /// Storage class of scratch space for imports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_space_storage_class: Option<String>,

    /// VDDK init image for VMware imports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vddk_init_image: Option<String>,

    /// Cluster-wide default CPU model
    #[serde(
        rename = "defaultCPUModel",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub default_cpu_model: Option<String>,

    /// Cluster-wide default runtime class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_runtime_class: Option<String>,

    /// Obsolete CPU models
    #[serde(
        rename = "obsoleteCPUs",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub obsolete_cpus: Option<HyperConvergedObsoleteCpus>,

    /// Namespace of the common VM templates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_templates_namespace: Option<String>,

    /// Namespace of the common golden images
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_boot_image_namespace: Option<String>,

    /// Import the built-in golden images; defaults to true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_common_boot_image_import: Option<bool>,

    /// Request the application-aware quota operand
    ///
    /// Accepted and preserved across conversion, but this operator does not
    /// deploy that operand; setting it changes nothing in the cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_application_aware_quota: Option<bool>,

    /// Deploy the VM console proxy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_vm_console_proxy: Option<bool>,

    /// Storage import settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_import: Option<StorageImportConfig>,

    /// How running VMIs are updated
    #[serde(default)]
    pub workload_update_strategy: HyperConvergedWorkloadUpdateStrategy,

    /// User-defined and customized golden images
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_import_cron_templates: Vec<DataImportCronTemplate>,

    /// Filesystem overhead
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem_overhead: Option<FilesystemOverhead>,

    /// Uninstall behavior
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uninstall_strategy: Option<UninstallStrategy>,

    /// Component log verbosity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_verbosity_config: Option<LogVerbosityConfiguration>,

    /// TLS security profile
    #[serde(
        rename = "tlsSecurityProfile",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub tls_security_profile: Option<TlsSecurityProfile>,

    /// Name server IP of the secondary DNS add-on
    #[serde(
        rename = "kubeSecondaryDNSNameServerIP",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub kube_secondary_dns_name_server_ip: Option<String>,

    /// Default eviction strategy of VMIs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eviction_strategy: Option<EvictionStrategy>,

    /// Storage class of VM state volumes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_state_storage_class: Option<String>,

    /// Extra VM options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_machine_options: Option<VirtualMachineOptions>,

    /// Kernel samepage merging
    #[serde(
        rename = "ksmConfiguration",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ksm_configuration: Option<KsmConfiguration>,

    /// Memory overcommit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub higher_workload_density: Option<HigherWorkloadDensityConfiguration>,

    /// Optional admission webhooks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhooks_config: Option<WebhooksConfig>,

    /// Virtualization engine feature gates enabled through deprecated HCO gates
    #[serde(
        rename = "kubevirtFeatureGates",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub kubevirt_feature_gates: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn crd_serves_v1() {
        let crd = HyperConverged::crd();
        assert_eq!(crd.metadata.name.as_deref(), Some("hyperconvergeds.hco.kubevirt.io"));
        assert_eq!(crd.spec.versions[0].name, "v1");
    }

    #[test]
    fn feature_gates_decode_as_list() {
        let spec: HyperConvergedSpec = serde_json::from_value(serde_json::json!({
            "featureGates": [
                {"name": "downwardMetrics"},
                {"name": "videoConfig", "enabled": "False"}
            ]
        }))
        .unwrap();
        assert!(spec.feature_gates.is_enabled("downwardMetrics"));
        assert!(!spec.feature_gates.is_enabled("videoConfig"));
    }
}
