//! Mutating webhook for the HyperConverged resource
//!
//! Fills in defaults the CRD schema cannot express: the immediate-bind
//! annotation of every golden image template, the eviction strategy derived
//! from the cluster topology, KSM opt-in on create, the current spelling of
//! the mediated device types, and the KubeVirt gates behind deprecated
//! HyperConverged gates.

use std::collections::BTreeMap;

use axum::Json;
use json_patch::{AddOperation, PatchOperation};
use jsonptr::PointerBuf;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use super::{admission_request, decode, patch_response, WebhookError};
use crate::crd::{EvictionStrategy, HyperConverged};
use crate::golden_images::IMMEDIATE_BIND_ANNOTATION;

const DISABLE_MDEV_GATE: &str = "disableMDevConfiguration";

/// Deprecated HyperConverged gates and the KubeVirt gate each one turns on
const MIRRORED_GATES: [(&str, &str); 5] = [
    ("alignCPUs", "AlignCPUs"),
    ("autoResourceLimits", "AutoResourceLimitsGate"),
    (DISABLE_MDEV_GATE, "DisableMDEVConfiguration"),
    ("downwardMetrics", "DownwardMetrics"),
    ("persistentReservation", "PersistentReservation"),
];

/// Handle mutating admission review for HyperConverged resources
pub async fn mutate_handler(
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Result<Json<AdmissionReview<DynamicObject>>, WebhookError> {
    let req = admission_request(body)?;
    Ok(Json(mutate(&req).into_review()))
}

fn add(tokens: &[&str], value: Value) -> PatchOperation {
    PatchOperation::Add(AddOperation {
        path: PointerBuf::from_tokens(tokens.iter().copied()),
        value,
    })
}

/// Default one HyperConverged create or update
#[instrument(skip_all, fields(operation = ?req.operation, name = %req.name))]
pub fn mutate(req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    if !matches!(req.operation, Operation::Create | Operation::Update) {
        return AdmissionResponse::from(req);
    }
    let hc: HyperConverged = match decode(req.object.as_ref()) {
        Ok(hc) => hc,
        Err(e) => {
            warn!(error = %e, "failed to read the HyperConverged resource");
            return AdmissionResponse::from(req).deny("failed to parse the HyperConverged");
        }
    };
    let old: Option<HyperConverged> = match req.operation {
        Operation::Update => decode(req.old_object.as_ref()).ok(),
        _ => None,
    };
    let raw = req.object.as_ref().map(|o| &o.data["spec"]).unwrap_or(&Value::Null);

    let mut ops = Vec::new();
    if matches!(req.operation, Operation::Create) && hc.spec.ksm_configuration.is_none() {
        ops.push(add(&["spec", "ksmConfiguration"], json!({})));
    }
    ops.extend(golden_image_annotations(&hc));
    ops.extend(eviction_strategy(&hc));
    ops.extend(mediated_device_types(&hc));

    let mut disable_mdev = hc.spec.feature_gates.raw(DISABLE_MDEV_GATE);
    ops.extend(sync_mdev_enablement(&hc, old.as_ref(), raw, &mut disable_mdev));
    ops.extend(mirrored_gates(&hc, disable_mdev));

    debug!(operations = ops.len(), "HyperConverged defaults computed");
    patch_response(req, ops)
}

fn golden_image_annotations(hc: &HyperConverged) -> Vec<PatchOperation> {
    let mut ops = Vec::new();
    for (i, dict) in hc.spec.data_import_cron_templates.iter().enumerate() {
        let index = i.to_string();
        match &dict.metadata.annotations {
            None => ops.push(add(
                &["spec", "dataImportCronTemplates", &index, "metadata", "annotations"],
                json!({IMMEDIATE_BIND_ANNOTATION: "true"}),
            )),
            Some(annotations) if !annotations.contains_key(IMMEDIATE_BIND_ANNOTATION) => {
                ops.push(add(
                    &[
                        "spec",
                        "dataImportCronTemplates",
                        &index,
                        "metadata",
                        "annotations",
                        IMMEDIATE_BIND_ANNOTATION,
                    ],
                    json!("true"),
                ))
            }
            Some(_) => {}
        }
    }
    ops
}

/// LiveMigrate on highly available clusters, None otherwise
///
/// The topology is read from the status the reconciler maintains; before
/// the first reconcile nothing is known and nothing is defaulted.
fn eviction_strategy(hc: &HyperConverged) -> Option<PatchOperation> {
    if hc.spec.eviction_strategy.is_some() {
        return None;
    }
    let highly_available = hc.status.as_ref()?.infrastructure_highly_available?;
    let strategy = if highly_available {
        EvictionStrategy::LiveMigrate
    } else {
        EvictionStrategy::None
    };
    Some(add(&["spec", "evictionStrategy"], json!(strategy)))
}

fn mediated_device_types(hc: &HyperConverged) -> Vec<PatchOperation> {
    let Some(mdev) = &hc.spec.mediated_devices_configuration else {
        return Vec::new();
    };
    let mut ops = Vec::new();
    if !mdev.mediated_devices_types.is_empty() && mdev.mediated_device_types.is_empty() {
        ops.push(add(
            &["spec", "mediatedDevicesConfiguration", "mediatedDeviceTypes"],
            json!(mdev.mediated_devices_types),
        ));
    }
    for (i, node) in mdev.node_mediated_device_types.iter().enumerate() {
        if !node.mediated_devices_types.is_empty() && node.mediated_device_types.is_empty() {
            let index = i.to_string();
            ops.push(add(
                &[
                    "spec",
                    "mediatedDevicesConfiguration",
                    "nodeMediatedDeviceTypes",
                    &index,
                    "mediatedDeviceTypes",
                ],
                json!(node.mediated_devices_types),
            ));
        }
    }
    ops
}

/// Keep the `disableMDevConfiguration` gate and
/// `mediatedDevicesConfiguration.enabled` saying the same thing
///
/// On update, whichever of the two changed wins; if both changed the user
/// already made them agree or chose not to. `disable_mdev` is updated to the
/// gate value after the patch.
fn sync_mdev_enablement(
    hc: &HyperConverged,
    old: Option<&HyperConverged>,
    raw_spec: &Value,
    disable_mdev: &mut Option<bool>,
) -> Option<PatchOperation> {
    let gate = hc.spec.feature_gates.raw(DISABLE_MDEV_GATE);
    let enabled = hc.spec.mediated_devices_configuration.as_ref().and_then(|m| m.enabled);

    let set_enabled = |value: bool| match hc.spec.mediated_devices_configuration {
        Some(_) => add(&["spec", "mediatedDevicesConfiguration", "enabled"], json!(value)),
        None => add(&["spec", "mediatedDevicesConfiguration"], json!({"enabled": value})),
    };

    let Some(old) = old else {
        return match (gate, enabled) {
            (Some(true), None) => Some(set_enabled(false)),
            _ => None,
        };
    };

    let old_gate = old.spec.feature_gates.raw(DISABLE_MDEV_GATE);
    let old_enabled = old.spec.mediated_devices_configuration.as_ref().and_then(|m| m.enabled);
    let gate_changed = gate != old_gate;
    let enabled_changed = enabled != old_enabled;

    if gate_changed && !enabled_changed {
        let disabled = gate.unwrap_or(false);
        if enabled.unwrap_or(true) == !disabled {
            return None;
        }
        Some(set_enabled(!disabled))
    } else if enabled_changed && !gate_changed {
        let disabled = !enabled.unwrap_or(true);
        if gate.unwrap_or(false) == disabled {
            return None;
        }
        *disable_mdev = Some(disabled);
        if raw_spec["featureGates"].is_object() {
            Some(add(&["spec", "featureGates", DISABLE_MDEV_GATE], json!(disabled)))
        } else {
            Some(add(&["spec", "featureGates"], json!({DISABLE_MDEV_GATE: disabled})))
        }
    } else {
        None
    }
}

/// Append the KubeVirt gates of enabled deprecated gates, once each
fn mirrored_gates(hc: &HyperConverged, disable_mdev: Option<bool>) -> Option<PatchOperation> {
    let overrides = BTreeMap::from([(DISABLE_MDEV_GATE, disable_mdev)]);
    let mut gates = hc.spec.kubevirt_feature_gates.clone();
    let mut changed = false;
    for (deprecated, kubevirt_gate) in MIRRORED_GATES {
        let value = overrides
            .get(deprecated)
            .copied()
            .unwrap_or_else(|| hc.spec.feature_gates.raw(deprecated));
        if value == Some(true) && !gates.iter().any(|g| g == kubevirt_gate) {
            gates.push(kubevirt_gate.to_string());
            changed = true;
        }
    }
    changed.then(|| add(&["spec", "kubevirtFeatureGates"], json!(gates)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        DataImportCronTemplate, HyperConvergedStatus, KsmConfiguration,
        MediatedDevicesConfiguration,
    };
    use crate::webhook::testing::{hc, hco_request, patched};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn dict(name: &str, annotations: Option<BTreeMap<String, String>>) -> DataImportCronTemplate {
        DataImportCronTemplate {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                annotations,
                ..Default::default()
            },
            spec: None,
        }
    }

    fn mutated(
        operation: Operation,
        new: &HyperConverged,
        old: Option<&HyperConverged>,
    ) -> (AdmissionResponse, Value) {
        let req = hco_request(operation, Some(new), old, false);
        let response = mutate(&req);
        let object = serde_json::to_value(req.object.as_ref().unwrap()).unwrap();
        let after = patched(&response, object);
        (response, after)
    }

    #[test]
    fn create_opts_into_ksm() {
        let (response, after) = mutated(Operation::Create, &hc(), None);
        assert!(response.allowed);
        assert_eq!(after["spec"]["ksmConfiguration"], json!({}));

        let mut configured = hc();
        configured.spec.ksm_configuration = Some(KsmConfiguration::default());
        let old = hc();
        let (_, after) = mutated(Operation::Update, &hc(), Some(&old));
        assert!(after["spec"]["ksmConfiguration"].is_null());
        let (response, _) = mutated(Operation::Create, &configured, None);
        assert!(response.patch.is_none());
    }

    #[test]
    fn golden_images_request_immediate_binding() {
        let mut hc = hc();
        hc.spec.ksm_configuration = Some(KsmConfiguration::default());
        hc.spec.data_import_cron_templates = vec![
            dict("bare", None),
            dict("annotated", Some(BTreeMap::from([("team".to_string(), "virt".to_string())]))),
            dict(
                "bound",
                Some(BTreeMap::from([(
                    IMMEDIATE_BIND_ANNOTATION.to_string(),
                    "false".to_string(),
                )])),
            ),
        ];

        let (_, after) = mutated(Operation::Create, &hc, None);
        let templates = &after["spec"]["dataImportCronTemplates"];
        assert_eq!(
            templates[0]["metadata"]["annotations"],
            json!({IMMEDIATE_BIND_ANNOTATION: "true"})
        );
        assert_eq!(templates[1]["metadata"]["annotations"][IMMEDIATE_BIND_ANNOTATION], "true");
        assert_eq!(templates[1]["metadata"]["annotations"]["team"], "virt");
        assert_eq!(templates[2]["metadata"]["annotations"][IMMEDIATE_BIND_ANNOTATION], "false");
    }

    #[test]
    fn eviction_strategy_follows_known_topology() {
        let mut hc = hc();
        let (_, after) = mutated(Operation::Create, &hc, None);
        assert!(after["spec"]["evictionStrategy"].is_null());

        hc.status = Some(HyperConvergedStatus {
            infrastructure_highly_available: Some(true),
            ..Default::default()
        });
        let (_, after) = mutated(Operation::Update, &hc, Some(&hc.clone()));
        assert_eq!(after["spec"]["evictionStrategy"], "LiveMigrate");

        hc.status = Some(HyperConvergedStatus {
            infrastructure_highly_available: Some(false),
            ..Default::default()
        });
        let (_, after) = mutated(Operation::Update, &hc, Some(&hc.clone()));
        assert_eq!(after["spec"]["evictionStrategy"], "None");

        hc.spec.eviction_strategy = Some(EvictionStrategy::External);
        let (_, after) = mutated(Operation::Update, &hc, Some(&hc.clone()));
        assert_eq!(after["spec"]["evictionStrategy"], "External");
    }

    #[test]
    fn deprecated_mdev_spelling_is_copied() {
        let mut hc = hc();
        hc.spec.mediated_devices_configuration = Some(MediatedDevicesConfiguration {
            mediated_devices_types: vec!["nvidia-222".to_string()],
            node_mediated_device_types: vec![crate::crd::NodeMediatedDeviceTypesConfig {
                node_selector: BTreeMap::from([("gpu".to_string(), "t4".to_string())]),
                mediated_devices_types: vec!["nvidia-223".to_string()],
                ..Default::default()
            }],
            ..Default::default()
        });
        let (_, after) = mutated(Operation::Create, &hc, None);
        let mdev = &after["spec"]["mediatedDevicesConfiguration"];
        assert_eq!(mdev["mediatedDeviceTypes"], json!(["nvidia-222"]));
        assert_eq!(
            mdev["nodeMediatedDeviceTypes"][0]["mediatedDeviceTypes"],
            json!(["nvidia-223"])
        );
    }

    #[test]
    fn disable_mdev_gate_disables_mdev_on_create() {
        let mut hc = hc();
        hc.spec.feature_gates.set(DISABLE_MDEV_GATE, true);
        let (_, after) = mutated(Operation::Create, &hc, None);
        assert_eq!(after["spec"]["mediatedDevicesConfiguration"]["enabled"], false);
        assert_eq!(after["spec"]["kubevirtFeatureGates"], json!(["DisableMDEVConfiguration"]));
    }

    #[test]
    fn mdev_enablement_follows_whichever_side_changed() {
        let mut old = hc();
        old.spec.mediated_devices_configuration = Some(MediatedDevicesConfiguration {
            enabled: Some(true),
            ..Default::default()
        });

        let mut gate_flipped = old.clone();
        gate_flipped.spec.feature_gates.set(DISABLE_MDEV_GATE, true);
        let (_, after) = mutated(Operation::Update, &gate_flipped, Some(&old));
        assert_eq!(after["spec"]["mediatedDevicesConfiguration"]["enabled"], false);

        let mut enabled_flipped = old.clone();
        if let Some(mdev) = enabled_flipped.spec.mediated_devices_configuration.as_mut() {
            mdev.enabled = Some(false);
        }
        let (_, after) = mutated(Operation::Update, &enabled_flipped, Some(&old));
        assert_eq!(after["spec"]["featureGates"][DISABLE_MDEV_GATE], true);
        assert_eq!(after["spec"]["kubevirtFeatureGates"], json!(["DisableMDEVConfiguration"]));

        let mut both = gate_flipped.clone();
        if let Some(mdev) = both.spec.mediated_devices_configuration.as_mut() {
            mdev.enabled = Some(false);
        }
        let req = hco_request(Operation::Update, Some(&both), Some(&old), false);
        let mut disable_mdev = both.spec.feature_gates.raw(DISABLE_MDEV_GATE);
        let raw = &req.object.as_ref().unwrap().data["spec"];
        assert!(sync_mdev_enablement(&both, Some(&old), raw, &mut disable_mdev).is_none());
    }

    #[test]
    fn deprecated_gates_turn_on_kubevirt_gates_once() {
        let mut hc = hc();
        hc.spec.feature_gates.set("downwardMetrics", true);
        hc.spec.feature_gates.set("alignCPUs", true);
        hc.spec.feature_gates.set("persistentReservation", false);
        hc.spec.kubevirt_feature_gates = vec!["AlignCPUs".to_string()];

        let (_, after) = mutated(Operation::Create, &hc, None);
        assert_eq!(after["spec"]["kubevirtFeatureGates"], json!(["AlignCPUs", "DownwardMetrics"]));
    }

    #[test]
    fn delete_is_left_alone() {
        let req = hco_request(Operation::Delete, None, Some(&hc()), false);
        let response = mutate(&req);
        assert!(response.allowed);
        assert!(response.patch.is_none());
    }
}
