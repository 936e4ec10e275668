//! Validating webhook for the HyperConverged resource
//!
//! Creates and updates go through the static checks below, in order, and the
//! first failure rejects the request. An update that touches the spec or the
//! annotations is additionally dry-run against every operand CR, so that the
//! operands' own admission gets a say before the change is stored. A delete
//! is admitted only if every operand CR could be deleted.
//!
//! Deprecated usage never rejects; it comes back as admission warnings.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::Json;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use tracing::{debug, info, instrument, warn};

use super::tls::validate_tls_profile;
use super::{admission_request, decode, WebhookError, WebhookState};
use crate::crd::feature_gates::{DEPRECATED_IGNORED, MOVED_TO_SPEC};
use crate::crd::{
    CertRotateConfig, HyperConverged, MediatedDevicesConfiguration, PermittedHostDevices,
    TuningPolicy,
};
use crate::golden_images::validate_user_templates;
use crate::nodeinfo::affinity::validate_affinity;
use crate::operands::{
    cdi, dry_run_delete, dry_run_update, jsonpatch, kubevirt, network_addons, ssp,
};
use crate::quantity::parse_duration;
use crate::Error;

/// Shortest accepted certificate duration or renewal lead time
const MIN_CERT_DURATION: Duration = Duration::from_secs(10 * 60);

const MDEV_CONFLICT: &str =
    "mediatedDevicesTypes is deprecated, please use mediatedDeviceTypes instead";

const HIGH_BURST_WARNING: &str = "spec.tuningPolicy: the highBurst profile is deprecated as of \
    v1.16.0 and will be removed in a future release";

/// Handle validating admission review for HyperConverged resources
pub async fn validate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Result<Json<AdmissionReview<DynamicObject>>, WebhookError> {
    let req = admission_request(body)?;
    Ok(Json(validate(&state, &req).await.into_review()))
}

/// Admit or reject one HyperConverged request
#[instrument(skip_all, fields(operation = ?req.operation, name = %req.name, dry_run = req.dry_run))]
pub async fn validate(
    state: &WebhookState,
    req: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    let outcome = match req.operation {
        Operation::Create => validate_create(state, req),
        Operation::Update => validate_update(state, req).await,
        Operation::Delete => validate_delete(state, req).await,
        Operation::Connect => Ok(Vec::new()),
    };

    match outcome {
        Ok(warnings) => {
            debug!(warnings = warnings.len(), "request admitted");
            let mut response = AdmissionResponse::from(req);
            if !warnings.is_empty() {
                response.warnings = Some(warnings);
            }
            response
        }
        Err(e) => {
            info!(error = %e, "request rejected");
            AdmissionResponse::from(req).deny(e.to_string())
        }
    }
}

fn validate_create(
    state: &WebhookState,
    req: &AdmissionRequest<DynamicObject>,
) -> Result<Vec<String>, Error> {
    let hc: HyperConverged = decode(req.object.as_ref())?;
    if hc.namespace() != state.config.namespace {
        return Err(Error::validation(format!(
            "invalid namespace for v1beta1.HyperConverged - please use the {} namespace",
            state.config.namespace
        )));
    }
    validate_static(state, &hc)?;

    if !req.dry_run {
        state.tls_profiles.set(hc.spec.tls_security_profile.clone());
    }
    Ok(warnings(&hc, None))
}

async fn validate_update(
    state: &WebhookState,
    req: &AdmissionRequest<DynamicObject>,
) -> Result<Vec<String>, Error> {
    let hc: HyperConverged = decode(req.object.as_ref())?;
    let old: HyperConverged = decode(req.old_object.as_ref())?;
    validate_static(state, &hc)?;

    if hc.spec != old.spec || hc.metadata.annotations != old.metadata.annotations {
        let ctx = state.build_context(&hc);
        dry_run_update(state.operands.as_ref(), &hc, &ctx, state.config.dry_run_timeout).await?;
    } else {
        debug!("neither spec nor annotations changed, skipping operand dry-run");
    }

    if !req.dry_run {
        state.tls_profiles.set(hc.spec.tls_security_profile.clone());
    }
    Ok(warnings(&hc, Some(&old)))
}

async fn validate_delete(
    state: &WebhookState,
    req: &AdmissionRequest<DynamicObject>,
) -> Result<Vec<String>, Error> {
    let hc: HyperConverged = decode(req.old_object.as_ref())?;
    dry_run_delete(
        state.operands.as_ref(),
        hc.name(),
        hc.namespace(),
        state.config.dry_run_timeout,
    )
    .await?;

    if !req.dry_run {
        state.tls_profiles.clear();
    }
    Ok(Vec::new())
}

/// Checks that need nothing but the resource itself
pub fn validate_static(state: &WebhookState, hc: &HyperConverged) -> Result<(), Error> {
    validate_tls_profile(hc.spec.tls_security_profile.as_ref())?;
    validate_cert_config(&hc.spec.cert_config.ca, &hc.spec.cert_config.server)?;

    if let Some(affinity) = hc
        .spec
        .infra
        .node_placement
        .as_ref()
        .and_then(|p| p.affinity.as_ref())
    {
        validate_affinity(affinity, "spec.infra.nodePlacement.affinity").map_err(|e| {
            Error::validation(format!("invalid infra node placement affinity: {e}"))
        })?;
    }
    if let Some(affinity) = hc
        .spec
        .workloads
        .node_placement
        .as_ref()
        .and_then(|p| p.affinity.as_ref())
    {
        validate_affinity(affinity, "spec.workloads.nodePlacement.affinity").map_err(|e| {
            Error::validation(format!("invalid workloads node placement affinity: {e}"))
        })?;
    }

    if let Some(devices) = &hc.spec.permitted_host_devices {
        validate_host_devices(devices)?;
    }
    jsonpatch::validate(hc)?;
    validate_user_templates(&hc.spec.data_import_cron_templates)?;
    if let Some(mdev) = &hc.spec.mediated_devices_configuration {
        validate_mediated_device_types(mdev)?;
    }

    // whatever else the builders refuse, the reconciler would refuse too
    let ctx = state.build_context(hc);
    kubevirt::build(hc, &ctx)?;
    cdi::build(hc, &ctx)?;
    network_addons::build(hc, &ctx)?;
    ssp::build(hc, &ctx)?;
    Ok(())
}

fn cert_duration(value: Option<&String>, default: &str, path: &str) -> Result<Duration, Error> {
    let raw = value.map_or(default, String::as_str);
    let duration = parse_duration(raw).map_err(|e| Error::validation(format!("{path}: {e}")))?;
    if duration < MIN_CERT_DURATION {
        return Err(Error::validation(format!("{path}: value is too small")));
    }
    Ok(duration)
}

/// Certificate rotation bounds; unset values take the operator defaults
fn validate_cert_config(ca: &CertRotateConfig, server: &CertRotateConfig) -> Result<(), Error> {
    let ca_duration = cert_duration(ca.duration.as_ref(), "48h", "spec.certConfig.ca.duration")?;
    let ca_renew = cert_duration(
        ca.renew_before.as_ref(),
        "24h",
        "spec.certConfig.ca.renewBefore",
    )?;
    let server_duration = cert_duration(
        server.duration.as_ref(),
        "24h",
        "spec.certConfig.server.duration",
    )?;
    let server_renew = cert_duration(
        server.renew_before.as_ref(),
        "12h",
        "spec.certConfig.server.renewBefore",
    )?;

    if ca_duration < ca_renew {
        return Err(Error::validation(
            "spec.certConfig.ca: duration is smaller than renewBefore",
        ));
    }
    if server_duration < server_renew {
        return Err(Error::validation(
            "spec.certConfig.server: duration is smaller than renewBefore",
        ));
    }
    if ca_duration < server_duration {
        return Err(Error::validation(
            "spec.certConfig: ca.duration is smaller than server.duration",
        ));
    }
    Ok(())
}

/// Each PCI and mediated device selector may be permitted once
fn validate_host_devices(devices: &PermittedHostDevices) -> Result<(), Error> {
    let mut seen = HashSet::new();
    for device in &devices.pci_host_devices {
        if !seen.insert(device.pci_device_selector.to_ascii_uppercase()) {
            return Err(Error::validation(format!(
                "duplicate pciDeviceSelector {} in spec.permittedHostDevices.pciHostDevices",
                device.pci_device_selector
            )));
        }
    }

    let mut seen = HashSet::new();
    for device in &devices.mediated_devices {
        if !seen.insert(device.mdev_name_selector.as_str()) {
            return Err(Error::validation(format!(
                "duplicate mdevNameSelector {} in spec.permittedHostDevices.mediatedDevices",
                device.mdev_name_selector
            )));
        }
    }
    Ok(())
}

/// Both spellings may be set only if they agree
fn validate_mediated_device_types(mdev: &MediatedDevicesConfiguration) -> Result<(), Error> {
    let conflicting = |current: &[String], deprecated: &[String]| {
        !current.is_empty() && !deprecated.is_empty() && current != deprecated
    };
    if conflicting(&mdev.mediated_device_types, &mdev.mediated_devices_types) {
        return Err(Error::validation(MDEV_CONFLICT));
    }
    for node in &mdev.node_mediated_device_types {
        if conflicting(&node.mediated_device_types, &node.mediated_devices_types) {
            return Err(Error::validation(MDEV_CONFLICT));
        }
    }
    Ok(())
}

/// Admission warnings for deprecated usage
///
/// Gates that moved to a spec field only warn on update when their value
/// changed, so that an unrelated edit does not keep nagging.
fn warnings(hc: &HyperConverged, old: Option<&HyperConverged>) -> Vec<String> {
    let gates = &hc.spec.feature_gates;
    let mut warnings: Vec<String> = DEPRECATED_IGNORED
        .iter()
        .filter(|gate| gates.raw(gate).is_some())
        .map(|gate| {
            format!(
                "spec.featureGates.{gate} is deprecated and ignored. \
                 It will be removed in a future version;"
            )
        })
        .collect();

    for gate in MOVED_TO_SPEC {
        let Some(value) = gates.raw(gate) else {
            continue;
        };
        let changed = old.is_none_or(|old| old.spec.feature_gates.raw(gate) != Some(value));
        if changed {
            warnings.push(format!(
                "spec.featureGates.{gate} is deprecated and ignored. \
                 It will removed in a future version; use spec.{gate} instead"
            ));
        }
    }

    if hc.spec.tuning_policy == Some(TuningPolicy::HighBurst) {
        warnings.push(HIGH_BURST_WARNING.to_string());
    }
    if !warnings.is_empty() {
        warn!(count = warnings.len(), "deprecated HyperConverged settings in use");
    }
    warnings
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::controller::MockHyperConvergedClient;
    use crate::crd::operands::{kubevirt_name, operand_refs, Cdi, KubeVirt, Ssp};
    use crate::crd::{
        CustomTlsProfile, MediatedHostDevice, NodePlacement, PciHostDevice, TlsProfileType,
        TlsSecurityProfile,
    };
    use crate::kube_utils::HasApiResource;
    use crate::operands::fake::{FakeOperandClient, Verb};
    use crate::operands::{BuildContext, EnsureRequest, OperandSet};
    use crate::webhook::testing::{hc, hco_request, state, NS};
    use k8s_openapi::api::core::v1::{
        Affinity, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm,
    };

    fn empty_state() -> Arc<WebhookState> {
        state(MockHyperConvergedClient::new(), Arc::new(FakeOperandClient::new()))
    }

    /// Operand CRs as the reconciler would have left them
    async fn deployed(hc: &HyperConverged) -> Arc<FakeOperandClient> {
        let client = Arc::new(FakeOperandClient::new());
        let ctx = BuildContext::from_config(&crate::config::OperatorConfig::for_testing(NS));
        let req = EnsureRequest { hc, ctx: &ctx, hco_triggered: true };
        for operand in OperandSet::new(false).iter() {
            let result = operand.ensure(client.as_ref(), &req).await;
            assert!(result.is_ok(), "{:?}", result.err);
        }
        client.clear_calls();
        client
    }

    fn message(response: &AdmissionResponse) -> String {
        response.result.message.clone()
    }

    #[tokio::test]
    async fn plain_create_is_admitted_and_caches_tls() {
        let state = empty_state();
        let mut hc = hc();
        hc.spec.tls_security_profile = Some(TlsSecurityProfile {
            type_: Some(TlsProfileType::Modern),
            modern: Some(Default::default()),
            ..Default::default()
        });

        let req = hco_request(Operation::Create, Some(&hc), None, false);

        let response = validate(&state, &req).await;
        assert!(response.allowed, "{}", message(&response));
        assert!(response.warnings.is_none());
        assert_eq!(state.tls_profiles.get(), hc.spec.tls_security_profile);
    }

    #[tokio::test]
    async fn dry_run_create_leaves_tls_cache_alone() {
        let state = empty_state();
        let req = hco_request(Operation::Create, Some(&hc()), None, true);
        let response = validate(&state, &req).await;
        assert!(response.allowed);
        assert!(state.tls_profiles.get().is_none());
    }

    #[tokio::test]
    async fn create_in_another_namespace_is_rejected() {
        let mut hc = hc();
        hc.metadata.namespace = Some("default".to_string());
        let req = hco_request(Operation::Create, Some(&hc), None, false);
        let response = validate(&empty_state(), &req).await;
        assert!(!response.allowed);
        assert_eq!(
            message(&response),
            format!("invalid namespace for v1beta1.HyperConverged - please use the {NS} namespace")
        );
    }

    #[tokio::test]
    async fn invalid_tls_profile_is_rejected() {
        let mut hc = hc();
        hc.spec.tls_security_profile = Some(TlsSecurityProfile {
            type_: Some(TlsProfileType::Custom),
            custom: Some(CustomTlsProfile {
                ciphers: vec!["TLS_AES_128_GCM_SHA256".to_string()],
                min_tls_version: "VersionTLS13".to_string(),
            }),
            ..Default::default()
        });
        let state = empty_state();
        let req = hco_request(Operation::Create, Some(&hc), None, false);
        let response = validate(&state, &req).await;
        assert!(!response.allowed);
        assert_eq!(
            message(&response),
            "custom ciphers cannot be selected when minTLSVersion is VersionTLS13"
        );
        assert!(state.tls_profiles.get().is_none());
    }

    #[test]
    fn cert_config_bounds() {
        let cfg = |duration: &str, renew: &str| CertRotateConfig {
            duration: Some(duration.to_string()),
            renew_before: Some(renew.to_string()),
        };
        let default = CertRotateConfig::default();
        assert!(validate_cert_config(&default, &default).is_ok());

        let err = validate_cert_config(&cfg("5m", "1m"), &default).unwrap_err();
        assert_eq!(err.to_string(), "spec.certConfig.ca.duration: value is too small");

        let err = validate_cert_config(&default, &cfg("1h", "2h")).unwrap_err();
        assert_eq!(err.to_string(), "spec.certConfig.server: duration is smaller than renewBefore");

        let err = validate_cert_config(&cfg("12h", "6h"), &cfg("24h", "12h")).unwrap_err();
        assert_eq!(err.to_string(), "spec.certConfig: ca.duration is smaller than server.duration");
    }

    #[test]
    fn affinity_errors_name_the_placement() {
        let mut hc = hc();
        hc.spec.workloads.node_placement = Some(NodePlacement {
            affinity: Some(Affinity {
                node_affinity: Some(NodeAffinity {
                    required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                        node_selector_terms: vec![NodeSelectorTerm {
                            match_expressions: Some(vec![NodeSelectorRequirement {
                                key: "kubernetes.io/arch".to_string(),
                                operator: "Matches".to_string(),
                                values: Some(vec!["amd64".to_string()]),
                            }]),
                            ..Default::default()
                        }],
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
        let err = validate_static(&empty_state(), &hc).unwrap_err();
        assert!(err.to_string().starts_with("invalid workloads node placement affinity:"), "{err}");
    }

    #[test]
    fn duplicate_device_selectors_are_rejected() {
        let pci = |selector: &str| PciHostDevice {
            pci_device_selector: selector.to_string(),
            resource_name: "nvidia.com/TU104GL".to_string(),
            ..Default::default()
        };
        let devices = PermittedHostDevices {
            pci_host_devices: vec![pci("10DE:1EB8"), pci("10de:1eb8")],
            mediated_devices: vec![],
        };
        assert!(validate_host_devices(&devices).unwrap_err().to_string().contains("10de:1eb8"));

        let mdev = |selector: &str| MediatedHostDevice {
            mdev_name_selector: selector.to_string(),
            resource_name: "nvidia.com/GRID_T4-1Q".to_string(),
            ..Default::default()
        };
        let devices = PermittedHostDevices {
            pci_host_devices: vec![pci("10DE:1EB8")],
            mediated_devices: vec![mdev("GRID T4-1Q"), mdev("GRID T4-2Q")],
        };
        assert!(validate_host_devices(&devices).is_ok());
    }

    #[test]
    fn conflicting_mdev_spellings_are_rejected() {
        let mut mdev = MediatedDevicesConfiguration {
            mediated_device_types: vec!["nvidia-222".to_string()],
            mediated_devices_types: vec!["nvidia-222".to_string()],
            ..Default::default()
        };
        assert!(validate_mediated_device_types(&mdev).is_ok());
        mdev.mediated_devices_types = vec!["nvidia-223".to_string()];
        assert_eq!(validate_mediated_device_types(&mdev).unwrap_err().to_string(), MDEV_CONFLICT);
    }

    #[test]
    fn broken_jsonpatch_annotation_is_rejected() {
        let mut hc = hc();
        hc.metadata.annotations = Some(BTreeMap::from([(
            jsonpatch::KUBEVIRT_ANNOTATION.to_string(),
            r#"[{"op": "explode", "path": "/spec/x"}]"#.to_string(),
        )]));
        assert!(validate_static(&empty_state(), &hc).is_err());
    }

    #[tokio::test]
    async fn deprecated_gates_warn_without_rejecting() {
        let mut hc = hc();
        hc.spec.feature_gates.set("nonRoot", true);
        hc.spec.feature_gates.set("deployVmConsoleProxy", true);
        hc.spec.tuning_policy = Some(TuningPolicy::HighBurst);

        let req = hco_request(Operation::Create, Some(&hc), None, false);

        let response = validate(&empty_state(), &req).await;
        assert!(response.allowed, "{}", message(&response));
        let warnings = response.warnings.unwrap();
        assert_eq!(warnings.len(), 3);
        assert_eq!(
            warnings[0],
            "spec.featureGates.nonRoot is deprecated and ignored. \
             It will be removed in a future version;"
        );
        assert!(warnings[1].ends_with("use spec.deployVmConsoleProxy instead"));
        assert!(warnings[2].contains("highBurst profile is deprecated"));
        assert!(warnings[2].contains("v1.16.0"));
    }

    #[test]
    fn moved_gates_warn_on_update_only_when_changed() {
        let mut old = hc();
        old.spec.feature_gates.set("enableCommonBootImageImport", true);
        let mut new = old.clone();
        assert!(warnings(&new, Some(&old)).is_empty());

        new.spec.feature_gates.set("enableCommonBootImageImport", false);
        assert_eq!(warnings(&new, Some(&old)).len(), 1);
    }

    /// Story: an update the virtualization operator would refuse
    ///
    /// The operand CRs are deployed; the user then sets a bandwidth the
    /// KubeVirt admission refuses. The dry-run update fails and the
    /// rejection carries the KubeVirt message. Nothing was stored.
    #[tokio::test]
    async fn story_update_refused_by_operand_admission() {
        let old = hc();
        let client = deployed(&old).await;
        let state = state(MockHyperConvergedClient::new(), client.clone());

        let mut new = old.clone();
        new.spec.live_migration_config.bandwidth_per_migration = Some("-64Mi".to_string());
        client.fail(
            Verb::Replace,
            KubeVirt::KIND,
            422,
            "spec.configuration.migrations.bandwidthPerMigration: Invalid value",
        );

        let req = hco_request(Operation::Update, Some(&new), Some(&old), false);

        let response = validate(&state, &req).await;
        assert!(!response.allowed);
        assert!(message(&response).contains("bandwidthPerMigration"), "{}", message(&response));
        assert!(state.tls_profiles.get().is_none());

        let id = crate::operands::ObjectId::new(
            KubeVirt::api_resource(),
            Some(NS),
            kubevirt_name(old.name()),
        );
        let stored = client.stored(&id).unwrap();
        let migrations = &stored.data["spec"]["configuration"]["migrations"];
        assert!(migrations["bandwidthPerMigration"].is_null());
    }

    #[tokio::test]
    async fn update_dry_runs_every_operand_cr() {
        let old = hc();
        let client = deployed(&old).await;
        let state = state(MockHyperConvergedClient::new(), client.clone());

        let mut new = old.clone();
        new.spec.live_migration_config.parallel_migrations_per_cluster = Some(10);
        let req = hco_request(Operation::Update, Some(&new), Some(&old), false);
        let response = validate(&state, &req).await;
        assert!(response.allowed, "{}", message(&response));
        assert!(client.calls().is_empty(), "dry-run wrote: {:?}", client.calls());

        // the last CR in line is dry-run as well
        client.fail(Verb::Replace, Ssp::KIND, 422, "spec.commonTemplates: Invalid value");
        let req = hco_request(Operation::Update, Some(&new), Some(&old), false);
        let response = validate(&state, &req).await;
        assert!(!response.allowed);
        assert!(message(&response).contains("commonTemplates"));
    }

    #[tokio::test]
    async fn status_only_update_skips_dry_run() {
        let old = hc();
        let client = Arc::new(FakeOperandClient::new());
        let state = state(MockHyperConvergedClient::new(), client.clone());

        let mut new = old.clone();
        new.status = Some(Default::default());
        let req = hco_request(Operation::Update, Some(&new), Some(&old), false);
        let response = validate(&state, &req).await;
        assert!(response.allowed, "{}", message(&response));
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn update_before_operands_exist_is_rejected() {
        let old = hc();
        let state = empty_state();
        let mut new = old.clone();
        new.spec.live_migration_config.parallel_migrations_per_cluster = Some(10);
        let req = hco_request(Operation::Update, Some(&new), Some(&old), false);
        let response = validate(&state, &req).await;
        assert!(!response.allowed);
        assert!(message(&response).contains("not found"), "{}", message(&response));
    }

    #[tokio::test]
    async fn delete_dry_runs_operand_deletion_and_clears_tls() {
        let hc = hc();
        let client = deployed(&hc).await;
        let state = state(MockHyperConvergedClient::new(), client.clone());
        state.tls_profiles.set(Some(Default::default()));

        let req = hco_request(Operation::Delete, None, Some(&hc), false);

        let response = validate(&state, &req).await;
        assert!(response.allowed, "{}", message(&response));
        assert!(state.tls_profiles.get().is_none());

        for operand in operand_refs(hc.name(), NS) {
            let id = crate::operands::ObjectId::new(
                operand.api_resource,
                operand.namespace.as_deref(),
                operand.name,
            );
            assert!(client.stored(&id).is_some(), "{id} was deleted by a dry-run");
        }
    }

    #[tokio::test]
    async fn delete_refused_by_operand_is_rejected() {
        let hc = hc();
        let client = deployed(&hc).await;
        client.fail(Verb::Delete, Cdi::KIND, 403, "there are still DataVolumes present");
        let state = state(MockHyperConvergedClient::new(), client);
        state.tls_profiles.set(Some(Default::default()));

        let req = hco_request(Operation::Delete, None, Some(&hc), false);

        let response = validate(&state, &req).await;
        assert!(!response.allowed);
        assert!(message(&response).contains("DataVolumes"));
        assert!(state.tls_profiles.get().is_some());
    }
}
