//! Feature gates of both HyperConverged API versions
//!
//! `v1beta1` stores the gates as a record of optional booleans, `v1` as an
//! ordered list of `{name, enabled}` entries. The table below is the single
//! source of truth for gate names, their `v1beta1` defaults and their `v1`
//! maturity phase; conversion relies on it being exhaustive.

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Maturity of a feature gate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Off unless listed
    Alpha,
    /// On unless listed as disabled
    Beta,
    /// Always on
    Ga,
    /// Always off, kept for backward decoding
    Deprecated,
}

/// Static details of one gate
#[derive(Clone, Copy, Debug)]
pub struct FeatureGateDetails {
    /// Gate name, identical in both API versions
    pub name: &'static str,
    /// Value of the gate in `v1beta1` when unset
    pub default: bool,
    /// Maturity in `v1`
    pub phase: Phase,
}

const fn gate(name: &'static str, default: bool, phase: Phase) -> FeatureGateDetails {
    FeatureGateDetails {
        name,
        default,
        phase,
    }
}

/// Every recognized gate
pub const FEATURE_GATES: [FeatureGateDetails; 20] = [
    gate("withHostPassthroughCPU", false, Phase::Deprecated),
    gate("enableCommonBootImageImport", true, Phase::Deprecated),
    gate("deployTektonTaskResources", false, Phase::Deprecated),
    gate("deployVmConsoleProxy", false, Phase::Deprecated),
    gate("deployKubeSecondaryDNS", false, Phase::Alpha),
    gate("deployKubevirtIpamController", false, Phase::Deprecated),
    gate("nonRoot", true, Phase::Deprecated),
    gate("disableMDevConfiguration", false, Phase::Alpha),
    gate("persistentReservation", false, Phase::Alpha),
    gate("enableManagedTenantQuota", false, Phase::Deprecated),
    gate("autoResourceLimits", false, Phase::Deprecated),
    gate("alignCPUs", false, Phase::Alpha),
    gate("downwardMetrics", false, Phase::Alpha),
    gate("enableApplicationAwareQuota", false, Phase::Deprecated),
    gate("primaryUserDefinedNetworkBinding", false, Phase::Deprecated),
    gate("enableMultiArchBootImageImport", false, Phase::Alpha),
    gate("decentralizedLiveMigration", false, Phase::Alpha),
    gate("declarativeHotplugVolumes", false, Phase::Alpha),
    gate("videoConfig", true, Phase::Beta),
    gate("objectGraph", false, Phase::Alpha),
];

/// Look up a gate by name
pub fn details(name: &str) -> Option<&'static FeatureGateDetails> {
    FEATURE_GATES.iter().find(|g| g.name == name)
}

/// Gates that are accepted but ignored, with no replacement
pub const DEPRECATED_IGNORED: [&str; 4] = [
    "withHostPassthroughCPU",
    "deployTektonTaskResources",
    "nonRoot",
    "enableManagedTenantQuota",
];

/// Gates that moved to a top-level spec field of the same name
pub const MOVED_TO_SPEC: [&str; 3] = [
    "enableApplicationAwareQuota",
    "enableCommonBootImageImport",
    "deployVmConsoleProxy",
];

/// `v1beta1` feature gates
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HyperConvergedFeatureGates {
    /// Deprecated, ignored
    #[serde(
        rename = "withHostPassthroughCPU",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub with_host_passthrough_cpu: Option<bool>,

    /// Deprecated, use `spec.enableCommonBootImageImport`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_common_boot_image_import: Option<bool>,

    /// Deprecated, ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_tekton_task_resources: Option<bool>,

    /// Deprecated, use `spec.deployVmConsoleProxy`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_vm_console_proxy: Option<bool>,

    /// Deploy the secondary DNS add-on
    #[serde(
        rename = "deployKubeSecondaryDNS",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub deploy_kube_secondary_dns: Option<bool>,

    /// Deprecated, ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_kubevirt_ipam_controller: Option<bool>,

    /// Deprecated, ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_root: Option<bool>,

    /// Disable mediated devices handling
    #[serde(
        rename = "disableMDevConfiguration",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub disable_mdev_configuration: Option<bool>,

    /// SCSI persistent reservation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_reservation: Option<bool>,

    /// Deprecated, ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_managed_tenant_quota: Option<bool>,

    /// Deprecated, ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_resource_limits: Option<bool>,

    /// Even-parity dedicated CPUs with emulator thread isolation
    #[serde(
        rename = "alignCPUs",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub align_cpus: Option<bool>,

    /// Expose host metrics to guests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downward_metrics: Option<bool>,

    /// Deprecated, use `spec.enableApplicationAwareQuota`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_application_aware_quota: Option<bool>,

    /// Deprecated, ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_user_defined_network_binding: Option<bool>,

    /// Create golden images per CPU architecture
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_multi_arch_boot_image_import: Option<bool>,

    /// Cross-cluster live migration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decentralized_live_migration: Option<bool>,

    /// Declarative volume hotplug
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declarative_hotplug_volumes: Option<bool>,

    /// Configurable video devices
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_config: Option<bool>,

    /// ObjectGraph subresource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_graph: Option<bool>,
}

impl HyperConvergedFeatureGates {
    fn slot(&self, name: &str) -> Option<&Option<bool>> {
        Some(match name {
            "withHostPassthroughCPU" => &self.with_host_passthrough_cpu,
            "enableCommonBootImageImport" => &self.enable_common_boot_image_import,
            "deployTektonTaskResources" => &self.deploy_tekton_task_resources,
            "deployVmConsoleProxy" => &self.deploy_vm_console_proxy,
            "deployKubeSecondaryDNS" => &self.deploy_kube_secondary_dns,
            "deployKubevirtIpamController" => &self.deploy_kubevirt_ipam_controller,
            "nonRoot" => &self.non_root,
            "disableMDevConfiguration" => &self.disable_mdev_configuration,
            "persistentReservation" => &self.persistent_reservation,
            "enableManagedTenantQuota" => &self.enable_managed_tenant_quota,
            "autoResourceLimits" => &self.auto_resource_limits,
            "alignCPUs" => &self.align_cpus,
            "downwardMetrics" => &self.downward_metrics,
            "enableApplicationAwareQuota" => &self.enable_application_aware_quota,
            "primaryUserDefinedNetworkBinding" => &self.primary_user_defined_network_binding,
            "enableMultiArchBootImageImport" => &self.enable_multi_arch_boot_image_import,
            "decentralizedLiveMigration" => &self.decentralized_live_migration,
            "declarativeHotplugVolumes" => &self.declarative_hotplug_volumes,
            "videoConfig" => &self.video_config,
            "objectGraph" => &self.object_graph,
            _ => return None,
        })
    }

    fn slot_mut(&mut self, name: &str) -> Option<&mut Option<bool>> {
        Some(match name {
            "withHostPassthroughCPU" => &mut self.with_host_passthrough_cpu,
            "enableCommonBootImageImport" => &mut self.enable_common_boot_image_import,
            "deployTektonTaskResources" => &mut self.deploy_tekton_task_resources,
            "deployVmConsoleProxy" => &mut self.deploy_vm_console_proxy,
            "deployKubeSecondaryDNS" => &mut self.deploy_kube_secondary_dns,
            "deployKubevirtIpamController" => &mut self.deploy_kubevirt_ipam_controller,
            "nonRoot" => &mut self.non_root,
            "disableMDevConfiguration" => &mut self.disable_mdev_configuration,
            "persistentReservation" => &mut self.persistent_reservation,
            "enableManagedTenantQuota" => &mut self.enable_managed_tenant_quota,
            "autoResourceLimits" => &mut self.auto_resource_limits,
            "alignCPUs" => &mut self.align_cpus,
            "downwardMetrics" => &mut self.downward_metrics,
            "enableApplicationAwareQuota" => &mut self.enable_application_aware_quota,
            "primaryUserDefinedNetworkBinding" => &mut self.primary_user_defined_network_binding,
            "enableMultiArchBootImageImport" => &mut self.enable_multi_arch_boot_image_import,
            "decentralizedLiveMigration" => &mut self.decentralized_live_migration,
            "declarativeHotplugVolumes" => &mut self.declarative_hotplug_volumes,
            "videoConfig" => &mut self.video_config,
            "objectGraph" => &mut self.object_graph,
            _ => return None,
        })
    }

    /// Raw value of a gate, `None` when unset or unknown
    pub fn raw(&self, name: &str) -> Option<bool> {
        self.slot(name).copied().flatten()
    }

    /// Effective value of a gate: the explicit value or the documented default
    pub fn is_enabled(&self, name: &str) -> bool {
        match details(name) {
            Some(d) => self.raw(name).unwrap_or(d.default),
            None => false,
        }
    }

    /// Set a gate by name; returns false for unknown names
    pub fn set(&mut self, name: &str, value: bool) -> bool {
        match self.slot_mut(name) {
            Some(slot) => {
                *slot = Some(value);
                true
            }
            None => false,
        }
    }
}

/// Enablement of a `v1` gate entry
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum Enablement {
    /// Gate on
    True,
    /// Gate off
    False,
}

/// A `v1` feature gate entry
///
/// `enabled` is omitted on the wire unless it is `False`; a missing value
/// decodes as `True`.
#[derive(Clone, Debug, JsonSchema, PartialEq, Eq)]
pub struct FeatureGate {
    /// Gate name
    pub name: String,
    /// Enablement
    pub enabled: Enablement,
}

impl FeatureGate {
    /// An enabled entry
    pub fn enabled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: Enablement::True,
        }
    }

    /// A disabled entry
    pub fn disabled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: Enablement::False,
        }
    }

    /// Whether the entry turns its gate on
    pub fn is_enabled(&self) -> bool {
        self.enabled == Enablement::True
    }
}

#[derive(Serialize, Deserialize)]
struct FeatureGateWire {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enabled: Option<Enablement>,
}

impl Serialize for FeatureGate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        FeatureGateWire {
            name: self.name.clone(),
            enabled: (self.enabled == Enablement::False).then_some(Enablement::False),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FeatureGate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = FeatureGateWire::deserialize(deserializer)?;
        Ok(Self {
            name: wire.name,
            enabled: wire.enabled.unwrap_or(Enablement::True),
        })
    }
}

/// `v1` feature gates: an ordered list with at most one entry per name
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(transparent)]
pub struct FeatureGateList(pub Vec<FeatureGate>);

impl FeatureGateList {
    /// Insert or update an entry, keeping the original position
    pub fn add(&mut self, gate: FeatureGate) {
        match self.0.iter_mut().find(|g| g.name == gate.name) {
            Some(existing) => existing.enabled = gate.enabled,
            None => self.0.push(gate),
        }
    }

    /// Enable a gate
    pub fn enable(&mut self, name: &str) {
        self.add(FeatureGate::enabled(name));
    }

    /// Disable a gate
    pub fn disable(&mut self, name: &str) {
        self.add(FeatureGate::disabled(name));
    }

    /// Find the entry of a gate
    pub fn get(&self, name: &str) -> Option<&FeatureGate> {
        self.0.iter().find(|g| g.name == name)
    }

    /// Effective value of a gate under `v1` phase rules
    ///
    /// GA gates are always on and deprecated or unknown gates always off;
    /// alpha and beta gates default off and on respectively, and an entry in
    /// the list overrides the default.
    pub fn is_enabled(&self, name: &str) -> bool {
        let Some(d) = details(name) else {
            return false;
        };
        let default = match d.phase {
            Phase::Ga => return true,
            Phase::Deprecated => return false,
            Phase::Alpha => false,
            Phase::Beta => true,
        };
        self.get(name).map(FeatureGate::is_enabled).unwrap_or(default)
    }

    /// Iterate entries
    pub fn iter(&self) -> impl Iterator<Item = &FeatureGate> {
        self.0.iter()
    }

    /// True when no entry is present
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
