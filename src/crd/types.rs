//! Supporting types shared by both HyperConverged API versions

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Affinity, ObjectReference, ResourceRequirements, Toleration};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the HyperConverged singleton
pub const HYPERCONVERGED_NAME: &str = "kubevirt-hyperconverged";

/// API group of the HyperConverged resource
pub const HCO_GROUP: &str = "hco.kubevirt.io";

/// Schema for free-form sub-objects owned by downstream APIs
pub(crate) fn preserve_unknown_fields(
    _: &mut schemars::gen::SchemaGenerator,
) -> schemars::schema::Schema {
    let mut obj = schemars::schema::SchemaObject {
        instance_type: Some(schemars::schema::InstanceType::Object.into()),
        ..Default::default()
    };
    obj.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    schemars::schema::Schema::Object(obj)
}

/// Uninstall behavior when workloads still exist
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum UninstallStrategy {
    /// Delete operands even if VMs, DataVolumes or other workloads exist
    RemoveWorkloads,
    /// Refuse to uninstall while workloads exist
    #[default]
    BlockUninstallIfWorkloadsExist,
}

/// Tuning profile for virtualization control-plane rate limits
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TuningPolicy {
    /// Read the rate limits from the `hco.kubevirt.io/tuningPolicy` annotation
    Annotation,
    /// Deprecated high-burst profile
    HighBurst,
}

/// Eviction strategy applied to VMIs during node drain
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum EvictionStrategy {
    /// Evict without migrating
    None,
    /// Live migrate, block drain if impossible
    LiveMigrate,
    /// Live migrate when possible, otherwise evict
    LiveMigrateIfPossible,
    /// Delegate to an external controller
    External,
}

/// Node placement for a group of operand pods
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodePlacement {
    /// Node selector applied to the pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    /// Affinity applied to the pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    /// Tolerations applied to the pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,
}

/// Placement block for infra or workload components
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HyperConvergedConfig {
    /// Where the pods of this group may run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_placement: Option<NodePlacement>,
}

/// Live-migration tuning
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveMigrationConfigurations {
    /// Cluster-wide cap on concurrent migrations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_migrations_per_cluster: Option<u32>,

    /// Per-node cap on outbound migrations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_outbound_migrations_per_node: Option<u32>,

    /// Bandwidth limit per migration, as a quantity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth_per_migration: Option<String>,

    /// Seconds allowed per GiB of guest memory
    #[serde(
        rename = "completionTimeoutPerGiB",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub completion_timeout_per_gib: Option<i64>,

    /// Seconds without progress before a migration is aborted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_timeout: Option<i64>,

    /// Dedicated migration network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    /// Allow CPU throttling to force convergence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_auto_converge: Option<bool>,

    /// Allow post-copy migrations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_post_copy: Option<bool>,
}

/// Host devices that VMs may consume
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PermittedHostDevices {
    /// PCI passthrough devices
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pci_host_devices: Vec<PciHostDevice>,

    /// Mediated devices
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mediated_devices: Vec<MediatedHostDevice>,
}

/// A permitted PCI device
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PciHostDevice {
    /// `vendor:device` selector
    #[serde(rename = "pciDeviceSelector")]
    pub pci_device_selector: String,

    /// Extended resource name advertised for the device
    pub resource_name: String,

    /// The device plugin is provided outside of the virtualization stack
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub external_resource_provider: bool,

    /// Keep the entry but stop advertising it
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}

/// A permitted mediated device
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediatedHostDevice {
    /// Mediated device name selector
    #[serde(rename = "mdevNameSelector")]
    pub mdev_name_selector: String,

    /// Extended resource name advertised for the device
    pub resource_name: String,

    /// The device plugin is provided outside of the virtualization stack
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub external_resource_provider: bool,

    /// Keep the entry but stop advertising it
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}

/// Mediated device types to configure on nodes
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediatedDevicesConfiguration {
    /// Whether mediated devices handling is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Mediated device types for all nodes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mediated_device_types: Vec<String>,

    /// Deprecated spelling of `mediatedDeviceTypes`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mediated_devices_types: Vec<String>,

    /// Per-node-selector overrides
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_mediated_device_types: Vec<NodeMediatedDeviceTypesConfig>,
}

/// Mediated device types for nodes matching a selector
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeMediatedDeviceTypesConfig {
    /// Nodes the entry applies to
    pub node_selector: BTreeMap<String, String>,

    /// Mediated device types
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mediated_device_types: Vec<String>,

    /// Deprecated spelling of `mediatedDeviceTypes`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mediated_devices_types: Vec<String>,
}

/// Rotation durations of one certificate, as Go duration strings (`"48h0m0s"`)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertRotateConfig {
    /// Requested certificate lifetime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    /// Time before expiry at which the certificate is renewed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renew_before: Option<String>,
}

/// Certificate rotation for the CA and the serving certificates
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HyperConvergedCertConfig {
    /// CA certificate rotation
    #[serde(default)]
    pub ca: CertRotateConfig,

    /// Serving certificate rotation
    #[serde(default)]
    pub server: CertRotateConfig,
}

/// Resource requirements for operand workloads
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperandResourceRequirements {
    /// Requirements of storage import/upload/clone pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_workloads: Option<ResourceRequirements>,

    /// CPU overcommit ratio for VMIs
    #[serde(
        rename = "vmiCPUAllocationRatio",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub vmi_cpu_allocation_ratio: Option<i32>,

    /// Namespaces whose VMIs get CPU limits derived from requests
    #[serde(
        rename = "autoCPULimitNamespaceLabelSelector",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub auto_cpu_limit_namespace_label_selector: Option<LabelSelector>,
}

/// CPU models that must not be offered to VMs
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HyperConvergedObsoleteCpus {
    /// Deprecated minimal CPU model
    #[serde(
        rename = "minCPUModel",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub min_cpu_model: Option<String>,

    /// Obsolete model names
    #[serde(rename = "cpuModels", default, skip_serializing_if = "Vec::is_empty")]
    pub cpu_models: Vec<String>,
}

/// Storage import settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageImportConfig {
    /// Registries that may be reached without TLS
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insecure_registries: Vec<String>,
}

/// How running VMIs are updated after a virtualization engine upgrade
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HyperConvergedWorkloadUpdateStrategy {
    /// Ordered update methods (`LiveMigrate`, `Evict`)
    #[serde(default)]
    pub workload_update_methods: Vec<String>,

    /// VMIs evicted per batch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_eviction_size: Option<i32>,

    /// Interval between batches, as a Go duration string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_eviction_interval: Option<String>,
}

/// Filesystem overhead reserved on volumes
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemOverhead {
    /// Default overhead fraction, as a decimal string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<String>,

    /// Per-storage-class overrides
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub storage_class: BTreeMap<String, String>,
}

/// Log verbosity of virtualization engine components
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogVerbosityConfiguration {
    /// Verbosity settings passed through to the virtualization engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub kubevirt: Option<serde_json::Value>,

    /// Verbosity of the data importer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdi: Option<i32>,
}

/// A predefined TLS profile marker
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct PredefinedTlsProfile {}

/// A user-defined TLS profile
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CustomTlsProfile {
    /// OpenSSL-style cipher names
    #[serde(default)]
    pub ciphers: Vec<String>,

    /// Minimal TLS version (`VersionTLS10` .. `VersionTLS13`)
    #[serde(rename = "minTLSVersion", default)]
    pub min_tls_version: String,
}

/// Kind of TLS security profile
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum TlsProfileType {
    /// Compatible with very old clients
    Old,
    /// Recommended default
    Intermediate,
    /// TLS 1.3 only
    Modern,
    /// User-defined ciphers and minimal version
    Custom,
}

/// TLS security profile for all operand endpoints
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TlsSecurityProfile {
    /// Selected profile
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<TlsProfileType>,

    /// Marker for the Old profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<PredefinedTlsProfile>,

    /// Marker for the Intermediate profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intermediate: Option<PredefinedTlsProfile>,

    /// Marker for the Modern profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modern: Option<PredefinedTlsProfile>,

    /// Settings of the Custom profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<CustomTlsProfile>,
}

/// Kernel samepage merging configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KsmConfiguration {
    /// Nodes on which KSM is enabled; empty selects all nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_label_selector: Option<LabelSelector>,
}

/// Memory-overcommit configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HigherWorkloadDensityConfiguration {
    /// Percentage of node memory that VMs may request; above 100 deploys the node agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_overcommit_percentage: Option<i32>,
}

/// Marker enabling the launcher-pod mutating webhook
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct LauncherPodMutatorConfig {}

/// Optional admission webhooks
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WebhooksConfig {
    /// Strip velero backup-hook annotations from launcher pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launcher_pod_mutator: Option<LauncherPodMutatorConfig>,
}

/// Extra VM options
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineOptions {
    /// Disable the free page reporting memory balloon feature
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disable_free_page_reporting: bool,

    /// Disable serial console logging
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disable_serial_console_log: bool,
}

/// Registry source of a golden image
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySource {
    /// `docker://` URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Image stream name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_stream: Option<String>,

    /// `pod` or `node`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_method: Option<String>,

    /// Secret holding registry credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,

    /// ConfigMap holding a custom CA bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_config_map: Option<String>,
}

/// Source block of a DataVolume template
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct DataVolumeSource {
    /// Registry import source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistrySource>,
}

/// DataVolume spec of a golden image
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct DataVolumeSpec {
    /// Where the image comes from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<DataVolumeSource>,

    /// Storage request, owned by the data importer API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub storage: Option<serde_json::Value>,
}

/// DataVolume template of a golden image
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct DataVolumeTemplate {
    /// Template metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ObjectMeta>,

    /// Template spec
    #[serde(default)]
    pub spec: DataVolumeSpec,
}

/// Spec of a DataImportCron
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataImportCronSpec {
    /// DataVolume created on each import
    #[serde(default)]
    pub template: DataVolumeTemplate,

    /// Cron schedule of the import
    #[serde(default)]
    pub schedule: String,

    /// `Outdated` or `Never`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub garbage_collect: Option<String>,

    /// Number of imports to keep
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imports_to_keep: Option<i32>,

    /// DataSource pointing at the latest import
    #[serde(default)]
    pub managed_data_source: String,

    /// `RetainAll` or `None`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_policy: Option<String>,
}

/// A golden-image import schedule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct DataImportCronTemplate {
    /// Name, namespace and annotations of the resulting DataImportCron
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Import spec; may be omitted only to disable a common template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<DataImportCronSpec>,
}

impl DataImportCronTemplate {
    /// Template name
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Value of one annotation
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }
}

/// Resolution status of a golden image
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataImportCronStatus {
    /// The template comes from the built-in catalog
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub common_template: bool,

    /// A built-in template customized by the user
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub modified: bool,

    /// Architecture annotation before filtering by the cluster's architectures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_supported_architectures: Option<String>,

    /// Deployment conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// A resolved golden image with its status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct DataImportCronTemplateStatus {
    /// The resolved template
    #[serde(flatten)]
    pub template: DataImportCronTemplate,

    /// Resolution status
    #[serde(default)]
    pub status: DataImportCronStatus,
}

impl DataImportCronTemplateStatus {
    /// Template name
    pub fn name(&self) -> &str {
        self.template.name()
    }
}

/// Status of a condition
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Not known
    #[default]
    Unknown,
}

impl ConditionStatus {
    /// Build from a boolean
    pub fn from_bool(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Status condition
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition
    pub status: ConditionStatus,

    /// Machine-readable reason
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Generation the condition was computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last transition time
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition stamped with the current time
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            observed_generation: None,
            last_transition_time: Utc::now(),
        }
    }

    /// Set the observed generation
    pub fn with_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }
}

/// Insert or replace a condition of the same type
///
/// The previous `lastTransitionTime` is kept when the status did not flip,
/// so re-applying an unchanged condition leaves the list equal.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}

/// Remove the condition of `type_`, if any
pub fn remove_condition(conditions: &mut Vec<Condition>, type_: &str) {
    conditions.retain(|c| c.type_ != type_);
}

/// Whether the condition of `type_` exists with status `False`
pub fn is_condition_false(conditions: &[Condition], type_: &str) -> bool {
    conditions
        .iter()
        .any(|c| c.type_ == type_ && c.status == ConditionStatus::False)
}

/// Version of one component
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct Version {
    /// Component name
    #[serde(default)]
    pub name: String,

    /// Component version
    #[serde(default)]
    pub version: String,
}

/// A recommended CPU model
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct CpuModelInfo {
    /// CPU model name
    pub name: String,
    /// PassMark score of the model
    pub benchmark: u32,
    /// Number of nodes exposing the model
    pub nodes: u32,
    /// Total CPU capacity of those nodes, in cores
    pub cpu: f64,
    /// Total memory capacity of those nodes, in bytes
    pub memory: f64,
}

/// Topology information published in status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfoStatus {
    /// Architectures of control-plane nodes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub control_plane_architectures: Vec<String>,

    /// Architectures of nodes that may run VMs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workloads_architectures: Vec<String>,

    /// Best CPU models available in the cluster
    #[serde(rename = "recommendedCpuModels", default, skip_serializing_if = "Vec::is_empty")]
    pub recommended_cpu_models: Vec<CpuModelInfo>,
}

/// Status of the HyperConverged resource; identical in both API versions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HyperConvergedStatus {
    /// Aggregated conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Objects managed by the operator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_objects: Vec<ObjectReference>,

    /// Deployed component versions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<Version>,

    /// Generation last reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Cron schedule shared by the common golden images
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_import_schedule: Option<String>,

    /// Resolved golden images
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_import_cron_templates: Vec<DataImportCronTemplateStatus>,

    /// `healthy`, `warning` or `error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_health_status: Option<String>,

    /// Whether the cluster has at least two worker nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_highly_available: Option<bool>,

    /// Cluster topology
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_info: Option<NodeInfoStatus>,
}

impl HyperConvergedStatus {
    /// Version recorded for a component
    pub fn version(&self, name: &str) -> Option<&str> {
        self.versions
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.version.as_str())
    }

    /// Record the version of a component
    pub fn set_version(&mut self, name: &str, version: &str) {
        match self.versions.iter_mut().find(|v| v.name == name) {
            Some(v) => v.version = version.to_string(),
            None => self.versions.push(Version {
                name: name.to_string(),
                version: version.to_string(),
            }),
        }
    }

    /// Find a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}
