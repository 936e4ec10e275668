//! The KubeVirt CR and the priority class of its control plane

use k8s_openapi::api::scheduling::v1::PriorityClass;
use kube::api::{ApiResource, DynamicObject};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::generic::{managed_object, GenericOperand, UpdateHooks, UpgradeProbe};
use super::handler::BuildContext;
use super::jsonpatch::{self, KUBEVIRT_ANNOTATION};
use super::labels::{Component, PART_OF_VALUE};
use super::placement::CertDurations;
use crate::crd::operands::{kubevirt_name, KubeVirt};
use crate::crd::{
    EvictionStrategy, HyperConverged, HyperConvergedConfig, TuningPolicy, UninstallStrategy,
};
use crate::kube_utils::HasApiResource;
use crate::quantity::parse_quantity;
use crate::tls_profile;
use crate::Error;

/// Rate limits for the `annotation` tuning policy, as `{"qps": .., "burst": ..}`
pub const TUNING_POLICY_ANNOTATION: &str = "hco.kubevirt.io/tuningPolicy";

/// Present on the KubeVirt CR while the `alignCPUs` gate is on
pub const EMULATOR_THREAD_ANNOTATION: &str =
    "alpha.kubevirt.io/EmulatorThreadCompleteToEvenParity";

/// Priority class of the virtualization control plane
pub const PRIORITY_CLASS_NAME: &str = "kubevirt-cluster-critical";

const HIGH_BURST_QPS: f64 = 200.0;
const HIGH_BURST_BURST: i64 = 400;
const DISK_VERIFICATION_MEMORY_LIMIT: &str = "2G";
const SECCOMP_PROFILE: &str = "kubevirt/kubevirt.json";

/// Gates always enabled on KubeVirt
const MANDATORY_GATES: [&str; 18] = [
    "DataVolumes",
    "SRIOV",
    "CPUManager",
    "CPUNodeDiscovery",
    "Snapshot",
    "HotplugVolumes",
    "ExpandDisks",
    "GPU",
    "HostDevices",
    "NUMA",
    "VMExport",
    "DisableCustomSELinuxPolicy",
    "KubevirtSeccompProfile",
    "HotplugNICs",
    "VMPersistentState",
    "NetworkBindingPlugins",
    "WithHostModelCPU",
    "HypervStrictCheck",
];

const OBSOLETE_CPU_MODELS: [&str; 15] = [
    "486",
    "pentium",
    "pentium2",
    "pentium3",
    "pentiumpro",
    "coreduo",
    "n270",
    "core2duo",
    "Conroe",
    "athlon",
    "phenom",
    "qemu64",
    "qemu32",
    "kvm64",
    "kvm32",
];

/// Handler of the KubeVirt CR
pub fn operand() -> GenericOperand {
    GenericOperand::new(
        KubeVirt::api_resource(),
        build,
        UpdateHooks::SpecWithAnnotation(EMULATOR_THREAD_ANNOTATION),
    )
    .with_conditions(UpgradeProbe {
        status_field: "observedKubeVirtVersion",
        expected: |v| v.kubevirt.as_str(),
    })
}

/// Handler of the control-plane priority class
pub fn priority_class_operand() -> GenericOperand {
    GenericOperand::new(
        ApiResource::erase::<PriorityClass>(&()),
        build_priority_class,
        UpdateHooks::Recreate(&["value", "description", "globalDefault"]),
    )
}

fn build_priority_class(hc: &HyperConverged, ctx: &BuildContext) -> Result<DynamicObject, Error> {
    let ar = ApiResource::erase::<PriorityClass>(&());
    let mut pc = managed_object(&ar, PRIORITY_CLASS_NAME, false, hc, ctx, Component::Compute);
    pc.data = json!({
        "value": 1_000_000_000,
        "globalDefault": false,
        "description": "This priority class should be used for KubeVirt core components only.",
    });
    Ok(pc)
}

/// Virtualization engine gates derived from the HyperConverged gates
pub fn feature_gates(hc: &HyperConverged) -> Vec<String> {
    let fg = &hc.spec.feature_gates;
    let on = |gate: Option<bool>| gate == Some(true);

    let mut gates: Vec<String> = MANDATORY_GATES.iter().map(|g| g.to_string()).collect();
    let conditional = [
        (fg.downward_metrics.unwrap_or(true), "DownwardMetrics"),
        (on(fg.with_host_passthrough_cpu), "WithHostPassthroughCPU"),
        (fg.non_root == Some(false), "Root"),
        (on(fg.disable_mdev_configuration), "DisableMDEVConfiguration"),
        (on(fg.persistent_reservation), "PersistentReservation"),
        (on(fg.auto_resource_limits), "AutoResourceLimitsGate"),
        (on(fg.align_cpus), "AlignCPUs"),
    ];
    for (enabled, gate) in conditional {
        if enabled {
            gates.push(gate.to_string());
        }
    }
    for gate in &hc.spec.kubevirt_feature_gates {
        if !gates.contains(gate) {
            gates.push(gate.clone());
        }
    }
    gates
}

#[derive(Deserialize)]
struct RateLimits {
    #[serde(default)]
    qps: f64,
    #[serde(default)]
    burst: i64,
}

fn rate_limiter(hc: &HyperConverged) -> Result<Option<Value>, Error> {
    let annotation = hc
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(TUNING_POLICY_ANNOTATION));

    let (qps, burst) = match (&hc.spec.tuning_policy, annotation) {
        (None, _) => return Ok(None),
        (Some(TuningPolicy::Annotation), Some(raw)) => {
            let rates: RateLimits = serde_json::from_str(raw).map_err(|e| {
                Error::validation(format!(
                    "failed to parse the {TUNING_POLICY_ANNOTATION} annotation: {e}"
                ))
            })?;
            if rates.qps <= 0.0 {
                return Err(Error::validation("qps parameter not found in annotation"));
            }
            if rates.burst <= 0 {
                return Err(Error::validation("burst parameter not found in annotation"));
            }
            (rates.qps, rates.burst)
        }
        (Some(TuningPolicy::Annotation), None) => {
            return Err(Error::validation(
                "tuning policy set but annotation not present or wrong",
            ))
        }
        (Some(TuningPolicy::HighBurst), Some(_)) => {
            return Err(Error::validation(format!(
                "highBurst profile is enabled and the annotation \
                 {TUNING_POLICY_ANNOTATION} is present"
            )))
        }
        (Some(TuningPolicy::HighBurst), None) => (HIGH_BURST_QPS, HIGH_BURST_BURST),
    };
    Ok(Some(json!({
        "restClient": {"rateLimiter": {"tokenBucketRateLimiter": {"qps": qps, "burst": burst}}}
    })))
}

fn migration_configuration(hc: &HyperConverged) -> Result<Value, Error> {
    let lm = &hc.spec.live_migration_config;
    if let Some(bandwidth) = &lm.bandwidth_per_migration {
        parse_quantity(bandwidth).map_err(|e| {
            Error::validation(format!(
                "failed to parse the LiveMigrationConfig.bandwidthPerMigration field; {e}"
            ))
        })?;
    }
    Ok(json!({
        "bandwidthPerMigration": lm.bandwidth_per_migration,
        "completionTimeoutPerGiB": lm.completion_timeout_per_gib,
        "parallelOutboundMigrationsPerNode": lm.parallel_outbound_migrations_per_node,
        "parallelMigrationsPerCluster": lm.parallel_migrations_per_cluster,
        "progressTimeout": lm.progress_timeout,
        "network": lm.network,
        "allowAutoConverge": lm.allow_auto_converge,
        "allowPostCopy": lm.allow_post_copy,
    }))
}

fn component_config(
    config: &HyperConvergedConfig,
    highly_available: bool,
) -> Result<Option<Value>, Error> {
    if config.node_placement.is_none() && highly_available {
        return Ok(None);
    }
    let mut out = Map::new();
    if !highly_available {
        out.insert("replicas".to_string(), json!(1));
    }
    if let Some(placement) = &config.node_placement {
        out.insert("nodePlacement".to_string(), serde_json::to_value(placement)?);
    }
    Ok(Some(Value::Object(out)))
}

fn permitted_host_devices(hc: &HyperConverged) -> Option<Value> {
    let devices = hc.spec.permitted_host_devices.as_ref()?;
    let pci: Vec<Value> = devices
        .pci_host_devices
        .iter()
        .filter(|d| !d.disabled)
        .map(|d| {
            json!({
                "pciVendorSelector": d.pci_device_selector,
                "resourceName": d.resource_name,
                "externalResourceProvider": d.external_resource_provider,
            })
        })
        .collect();
    let mdev: Vec<Value> = devices
        .mediated_devices
        .iter()
        .filter(|d| !d.disabled)
        .map(|d| {
            json!({
                "mdevNameSelector": d.mdev_name_selector,
                "resourceName": d.resource_name,
                "externalResourceProvider": d.external_resource_provider,
            })
        })
        .collect();

    let mut out = Map::new();
    if !pci.is_empty() {
        out.insert("pciHostDevices".to_string(), Value::Array(pci));
    }
    if !mdev.is_empty() {
        out.insert("mediatedDevices".to_string(), Value::Array(mdev));
    }
    Some(Value::Object(out))
}

fn current_or_deprecated<'a>(
    current: &'a [String],
    deprecated: &'a [String],
) -> Option<&'a [String]> {
    if !current.is_empty() {
        Some(current)
    } else if !deprecated.is_empty() {
        Some(deprecated)
    } else {
        None
    }
}

fn mediated_devices_configuration(hc: &HyperConverged) -> Option<Value> {
    let config = hc.spec.mediated_devices_configuration.as_ref()?;
    let nodes: Vec<Value> = config
        .node_mediated_device_types
        .iter()
        .map(|n| {
            json!({
                "nodeSelector": n.node_selector,
                "mediatedDeviceTypes": current_or_deprecated(
                    &n.mediated_device_types,
                    &n.mediated_devices_types,
                ),
            })
        })
        .collect();
    Some(json!({
        "mediatedDeviceTypes": current_or_deprecated(
            &config.mediated_device_types,
            &config.mediated_devices_types,
        ),
        "nodeMediatedDeviceTypes": if nodes.is_empty() { Value::Null } else { Value::Array(nodes) },
    }))
}

fn obsolete_cpu_models(hc: &HyperConverged) -> (Map<String, Value>, Option<String>) {
    let mut models: Map<String, Value> = OBSOLETE_CPU_MODELS
        .iter()
        .map(|m| (m.to_string(), Value::Bool(true)))
        .collect();
    let mut min_cpu_model = None;
    if let Some(obsolete) = &hc.spec.obsolete_cpus {
        for model in &obsolete.cpu_models {
            models.insert(model.clone(), Value::Bool(true));
        }
        min_cpu_model = obsolete.min_cpu_model.clone().filter(|m| !m.is_empty());
    }
    (models, min_cpu_model)
}

fn developer_configuration(hc: &HyperConverged) -> Value {
    let mut dev = json!({
        "diskVerification": {"memoryLimit": DISK_VERIFICATION_MEMORY_LIMIT},
        "featureGates": feature_gates(hc),
    });
    if let Some(verbosity) = hc
        .spec
        .log_verbosity_config
        .as_ref()
        .and_then(|l| l.kubevirt.clone())
    {
        dev["logVerbosity"] = verbosity;
    }
    if let Some(ratio) = hc
        .spec
        .resource_requirements
        .as_ref()
        .and_then(|r| r.vmi_cpu_allocation_ratio)
    {
        dev["cpuAllocationRatio"] = json!(ratio);
    }
    dev
}

fn tls_configuration(ctx: &BuildContext) -> Value {
    let (ciphers, min_version) = tls_profile::resolve(ctx.tls_security_profile.as_ref());
    json!({
        "minTLSVersion": min_version.as_str(),
        "ciphers": tls_profile::to_iana(&ciphers),
    })
}

fn eviction_strategy(hc: &HyperConverged, ctx: &BuildContext) -> EvictionStrategy {
    hc.spec.eviction_strategy.clone().unwrap_or(if ctx.infrastructure_highly_available {
        EvictionStrategy::LiveMigrate
    } else {
        EvictionStrategy::None
    })
}

fn virtual_machine_options(hc: &HyperConverged) -> Option<Value> {
    let options = hc.spec.virtual_machine_options.as_ref()?;
    let mut out = Map::new();
    if options.disable_free_page_reporting {
        out.insert("disableFreePageReporting".to_string(), json!({}));
    }
    if options.disable_serial_console_log {
        out.insert("disableSerialConsoleLog".to_string(), json!({}));
    }
    (!out.is_empty()).then_some(Value::Object(out))
}

fn configuration(hc: &HyperConverged, ctx: &BuildContext) -> Result<Value, Error> {
    let rate_limiter = rate_limiter(hc)?;
    let (obsolete, min_cpu_model) = obsolete_cpu_models(hc);

    let mut config = json!({
        "developerConfiguration": developer_configuration(hc),
        "networkConfiguration": {"networkInterface": "masquerade"},
        "migrations": migration_configuration(hc)?,
        "permittedHostDevices": permitted_host_devices(hc),
        "mediatedDevicesConfiguration": mediated_devices_configuration(hc),
        "obsoleteCPUModels": obsolete,
        "minCPUModel": min_cpu_model,
        "tlsConfiguration": tls_configuration(ctx),
        "apiConfiguration": rate_limiter,
        "webhookConfiguration": rate_limiter,
        "controllerConfiguration": rate_limiter,
        "handlerConfiguration": rate_limiter,
        "seccompConfiguration": {
            "virtualMachineInstanceProfile": {
                "customProfile": {"localhostProfile": SECCOMP_PROFILE}
            }
        },
        "evictionStrategy": eviction_strategy(hc, ctx),
        "ksmConfiguration": hc.spec.ksm_configuration,
        "cpuModel": hc.spec.default_cpu_model,
        "defaultRuntimeClass": hc.spec.default_runtime_class,
        "vmStateStorageClass": hc.spec.vm_state_storage_class,
        "virtualMachineOptions": virtual_machine_options(hc),
    });
    if let Some(selector) = hc
        .spec
        .resource_requirements
        .as_ref()
        .and_then(|r| r.auto_cpu_limit_namespace_label_selector.as_ref())
    {
        config["autoCPULimitNamespaceLabelSelector"] = serde_json::to_value(selector)?;
    }
    Ok(config)
}

fn workload_update_strategy(hc: &HyperConverged) -> Value {
    let strategy = &hc.spec.workload_update_strategy;
    json!({
        "workloadUpdateMethods": if strategy.workload_update_methods.is_empty() {
            Value::Null
        } else {
            json!(strategy.workload_update_methods)
        },
        "batchEvictionSize": strategy.batch_eviction_size,
        "batchEvictionInterval": strategy.batch_eviction_interval,
    })
}

/// Desired KubeVirt CR
pub fn build(hc: &HyperConverged, ctx: &BuildContext) -> Result<DynamicObject, Error> {
    let ar = KubeVirt::api_resource();
    let mut kv = managed_object(&ar, &kubevirt_name(hc.name()), true, hc, ctx, Component::Compute);

    if hc.spec.feature_gates.align_cpus == Some(true) {
        kv.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(EMULATOR_THREAD_ANNOTATION.to_string(), String::new());
    }

    let uninstall_strategy = match hc.uninstall_strategy() {
        UninstallStrategy::RemoveWorkloads => "RemoveWorkloads",
        UninstallStrategy::BlockUninstallIfWorkloadsExist => "BlockUninstallIfWorkloadsExist",
    };
    let certs = CertDurations::of(hc)?;

    kv.data = json!({
        "spec": {
            "uninstallStrategy": uninstall_strategy,
            "infra": component_config(&hc.spec.infra, ctx.infrastructure_highly_available)?,
            "workloads": component_config(&hc.spec.workloads, true)?,
            "configuration": configuration(hc, ctx)?,
            "certificateRotateStrategy": {"selfSigned": certs.to_cert_config()},
            "workloadUpdateStrategy": workload_update_strategy(hc),
            "productName": PART_OF_VALUE,
            "productVersion": ctx.versions.operator,
            "productComponent": Component::Compute.as_str(),
            "serviceMonitorNamespace": ctx.namespace,
        }
    });

    jsonpatch::apply_annotation_patch(hc, KUBEVIRT_ANNOTATION, &mut kv)?;
    Ok(kv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        HyperConvergedObsoleteCpus, HyperConvergedSpec, NodePlacement, PciHostDevice,
        PermittedHostDevices, TlsProfileType, TlsSecurityProfile,
    };

    fn hc() -> HyperConverged {
        let mut hc = HyperConverged::new("kubevirt-hyperconverged", HyperConvergedSpec::default());
        hc.metadata.namespace = Some("kubevirt-hyperconverged".to_string());
        hc
    }

    fn ctx() -> BuildContext {
        BuildContext::for_testing("kubevirt-hyperconverged")
    }

    #[test]
    fn default_kubevirt() {
        let kv = build(&hc(), &ctx()).unwrap();
        assert_eq!(kv.metadata.name.as_deref(), Some("kubevirt-kubevirt-hyperconverged"));
        let spec = &kv.data["spec"];
        assert_eq!(spec["uninstallStrategy"], "BlockUninstallIfWorkloadsExist");
        assert!(spec["infra"].is_null());
        assert_eq!(spec["productName"], "hyperconverged-cluster");
        assert_eq!(spec["productComponent"], "compute");
        assert_eq!(spec["productVersion"], "1.16.0");

        let config = &spec["configuration"];
        assert_eq!(config["networkConfiguration"]["networkInterface"], "masquerade");
        assert_eq!(config["developerConfiguration"]["diskVerification"]["memoryLimit"], "2G");
        assert_eq!(config["evictionStrategy"], "LiveMigrate");
        assert_eq!(config["obsoleteCPUModels"]["qemu64"], true);
        assert_eq!(config["tlsConfiguration"]["minTLSVersion"], "VersionTLS12");
        assert!(config["apiConfiguration"].is_null());
        let profile = &config["seccompConfiguration"]["virtualMachineInstanceProfile"];
        assert_eq!(profile["customProfile"]["localhostProfile"], "kubevirt/kubevirt.json");
        assert_eq!(spec["certificateRotateStrategy"]["selfSigned"]["ca"]["duration"], "48h0m0s");
    }

    #[test]
    fn gates_follow_hyperconverged_gates() {
        let mut hc = hc();
        let gates = feature_gates(&hc);
        assert!(gates.contains(&"DownwardMetrics".to_string()));
        assert!(gates.contains(&"HypervStrictCheck".to_string()));
        assert!(!gates.contains(&"Root".to_string()));

        hc.spec.feature_gates.downward_metrics = Some(false);
        hc.spec.feature_gates.non_root = Some(false);
        hc.spec.feature_gates.align_cpus = Some(true);
        hc.spec.kubevirt_feature_gates = vec!["AlignCPUs".to_string(), "Sidecar".to_string()];
        let gates = feature_gates(&hc);
        assert!(!gates.contains(&"DownwardMetrics".to_string()));
        assert!(gates.contains(&"Root".to_string()));
        assert_eq!(gates.iter().filter(|g| *g == "AlignCPUs").count(), 1);
        assert_eq!(gates.last().map(String::as_str), Some("Sidecar"));
    }

    #[test]
    fn align_cpus_sets_emulator_thread_annotation() {
        let mut hc = hc();
        hc.spec.feature_gates.align_cpus = Some(true);
        let kv = build(&hc, &ctx()).unwrap();
        assert!(kv.metadata.annotations.unwrap().contains_key(EMULATOR_THREAD_ANNOTATION));
    }

    /// Story: an unparsable migration bandwidth is refused with the field name
    #[test]
    fn story_bad_bandwidth_is_reported() {
        let mut hc = hc();
        hc.spec.live_migration_config.bandwidth_per_migration = Some("Wrong Value".to_string());
        let err = build(&hc, &ctx()).unwrap_err();
        assert!(err
            .to_string()
            .contains("failed to parse the LiveMigrationConfig.bandwidthPerMigration field"));
    }

    #[test]
    fn tuning_policies() {
        let mut hc = hc();
        hc.spec.tuning_policy = Some(TuningPolicy::HighBurst);
        let kv = build(&hc, &ctx()).unwrap();
        let handler = &kv.data["spec"]["configuration"]["handlerConfiguration"];
        let limiter = &handler["restClient"]["rateLimiter"]["tokenBucketRateLimiter"];
        assert_eq!(limiter["qps"], 200.0);
        assert_eq!(limiter["burst"], 400);

        hc.spec.tuning_policy = Some(TuningPolicy::Annotation);
        assert!(build(&hc, &ctx()).is_err());

        let rates = r#"{"qps": 100, "burst": 200}"#.to_string();
        hc.metadata.annotations = Some([(TUNING_POLICY_ANNOTATION.to_string(), rates)].into());
        let kv = build(&hc, &ctx()).unwrap();
        let api = &kv.data["spec"]["configuration"]["apiConfiguration"];
        let limiter = &api["restClient"]["rateLimiter"]["tokenBucketRateLimiter"];
        assert_eq!(limiter["burst"], 200);

        hc.metadata.annotations = Some(
            [(TUNING_POLICY_ANNOTATION.to_string(), r#"{"qps": 100}"#.to_string())].into(),
        );
        assert_eq!(
            build(&hc, &ctx()).unwrap_err().to_string(),
            "burst parameter not found in annotation"
        );
    }

    #[test]
    fn single_worker_cluster_runs_one_replica() {
        let mut ctx = ctx();
        ctx.infrastructure_highly_available = false;
        let kv = build(&hc(), &ctx).unwrap();
        assert_eq!(kv.data["spec"]["infra"]["replicas"], 1);
        assert!(kv.data["spec"]["workloads"].is_null());
        assert_eq!(kv.data["spec"]["configuration"]["evictionStrategy"], "None");
    }

    #[test]
    fn placement_and_devices_are_translated() {
        let mut hc = hc();
        hc.spec.workloads.node_placement = Some(NodePlacement {
            node_selector: Some([("kind".to_string(), "worker".to_string())].into()),
            ..Default::default()
        });
        hc.spec.permitted_host_devices = Some(PermittedHostDevices {
            pci_host_devices: vec![
                PciHostDevice {
                    pci_device_selector: "10DE:1EB8".to_string(),
                    resource_name: "nvidia.com/TU104GL_Tesla_T4".to_string(),
                    ..Default::default()
                },
                PciHostDevice {
                    pci_device_selector: "8086:6F54".to_string(),
                    resource_name: "intel.com/qat".to_string(),
                    disabled: true,
                    ..Default::default()
                },
            ],
            mediated_devices: vec![],
        });
        hc.spec.obsolete_cpus = Some(HyperConvergedObsoleteCpus {
            min_cpu_model: Some("Penryn".to_string()),
            cpu_models: vec!["Opteron_G1".to_string()],
        });

        let mut kv = build(&hc, &ctx()).unwrap();
        crate::operands::generic::strip_nulls(&mut kv.data);
        let spec = &kv.data["spec"];
        assert_eq!(spec["workloads"]["nodePlacement"]["nodeSelector"]["kind"], "worker");
        let pci = spec["configuration"]["permittedHostDevices"]["pciHostDevices"]
            .as_array()
            .unwrap();
        assert_eq!(pci.len(), 1);
        assert_eq!(pci[0]["pciVendorSelector"], "10DE:1EB8");
        assert_eq!(spec["configuration"]["minCPUModel"], "Penryn");
        assert_eq!(spec["configuration"]["obsoleteCPUModels"]["Opteron_G1"], true);
    }

    #[test]
    fn tls_profile_uses_iana_names() {
        let mut ctx = ctx();
        ctx.tls_security_profile = Some(TlsSecurityProfile {
            type_: Some(TlsProfileType::Modern),
            modern: Some(Default::default()),
            ..Default::default()
        });
        let kv = build(&hc(), &ctx).unwrap();
        let tls = &kv.data["spec"]["configuration"]["tlsConfiguration"];
        assert_eq!(tls["minTLSVersion"], "VersionTLS13");
        assert_eq!(tls["ciphers"][0], "TLS_AES_128_GCM_SHA256");
    }

    #[test]
    fn json_patch_annotation_is_applied_last() {
        let mut hc = hc();
        hc.metadata.annotations = Some(
            [(
                KUBEVIRT_ANNOTATION.to_string(),
                r#"[{"op": "add", "path": "/spec/configuration/cpuRequest", "value": "200m"}]"#
                    .to_string(),
            )]
            .into(),
        );
        let kv = build(&hc, &ctx()).unwrap();
        assert_eq!(kv.data["spec"]["configuration"]["cpuRequest"], "200m");
    }

    #[test]
    fn priority_class_is_cluster_scoped() {
        let pc = build_priority_class(&hc(), &ctx()).unwrap();
        assert!(pc.metadata.namespace.is_none());
        assert_eq!(pc.data["value"], 1_000_000_000);
        assert_eq!(pc.metadata.name.as_deref(), Some(PRIORITY_CLASS_NAME));
    }
}
