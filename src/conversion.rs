//! Conversion between the two HyperConverged API versions
//!
//! The versions differ only in `spec.featureGates`, so conversion rewrites
//! that one field and the `apiVersion`, leaving every other byte of the
//! object untouched. The gate table in [`crate::crd::feature_gates`] drives
//! the translation:
//!
//! * `v1beta1` → `v1`: a list entry is emitted only for gates whose effective
//!   value differs from their `v1beta1` default.
//! * `v1` → `v1beta1`: every recognized entry sets its field; unknown names
//!   are dropped.

use axum::Json;
use kube::core::conversion::{ConversionRequest, ConversionResponse, ConversionReview};
use kube::core::Status;
use serde_json::Value;
use tracing::{debug, error, instrument};

use crate::crd::feature_gates::{details, FeatureGate, FeatureGateList, FEATURE_GATES};
use crate::crd::{v1, v1beta1, HyperConvergedFeatureGates};
use crate::Error;

/// `apiVersion` of the working version
pub const V1BETA1_API_VERSION: &str = "hco.kubevirt.io/v1beta1";
/// `apiVersion` of the storage version
pub const V1_API_VERSION: &str = "hco.kubevirt.io/v1";

/// Translate `v1beta1` gates into the `v1` list
pub fn feature_gates_to_v1(gates: &HyperConvergedFeatureGates) -> FeatureGateList {
    let mut list = FeatureGateList::default();
    for gate in FEATURE_GATES.iter() {
        let value = gates.is_enabled(gate.name);
        if value != gate.default {
            list.add(if value {
                FeatureGate::enabled(gate.name)
            } else {
                FeatureGate::disabled(gate.name)
            });
        }
    }
    list
}

/// Translate the `v1` list into `v1beta1` gates
///
/// Gates without an entry stay unset, which `v1beta1` reads as their
/// default.
pub fn feature_gates_from_v1(list: &FeatureGateList) -> HyperConvergedFeatureGates {
    let mut gates = HyperConvergedFeatureGates::default();
    for entry in list.iter() {
        if details(&entry.name).is_none() {
            debug!(gate = %entry.name, "dropping unknown feature gate");
            continue;
        }
        gates.set(&entry.name, entry.is_enabled());
    }
    gates
}

/// Convert a HyperConverged object, in JSON form, to `desired_api_version`
pub fn convert_object(mut object: Value, desired_api_version: &str) -> Result<Value, Error> {
    let current = object
        .get("apiVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::conversion("object has no apiVersion"))?
        .to_string();

    if current == desired_api_version {
        return Ok(object);
    }

    let gates = object
        .get_mut("spec")
        .and_then(Value::as_object_mut)
        .and_then(|spec| spec.remove("featureGates"));

    let converted = match (current.as_str(), desired_api_version) {
        (V1BETA1_API_VERSION, V1_API_VERSION) => {
            let gates: HyperConvergedFeatureGates = match gates {
                Some(v) => serde_json::from_value(v)
                    .map_err(|e| Error::conversion(format!("invalid v1beta1 featureGates: {e}")))?,
                None => HyperConvergedFeatureGates::default(),
            };
            let list = feature_gates_to_v1(&gates);
            (!list.is_empty()).then(|| serde_json::to_value(list)).transpose()?
        }
        (V1_API_VERSION, V1BETA1_API_VERSION) => {
            let list: FeatureGateList = match gates {
                Some(v) => serde_json::from_value(v)
                    .map_err(|e| Error::conversion(format!("invalid v1 featureGates: {e}")))?,
                None => FeatureGateList::default(),
            };
            Some(serde_json::to_value(feature_gates_from_v1(&list))?)
        }
        (from, to) => {
            return Err(Error::conversion(format!(
                "unsupported conversion from {from} to {to}"
            )))
        }
    };

    if let Some(spec) = object.get_mut("spec").and_then(Value::as_object_mut) {
        if let Some(gates) = converted {
            spec.insert("featureGates".to_string(), gates);
        }
    }
    object["apiVersion"] = Value::String(desired_api_version.to_string());
    Ok(object)
}

/// Convert a typed `v1beta1` object to `v1`
pub fn to_v1(hc: &v1beta1::HyperConverged) -> Result<v1::HyperConverged, Error> {
    let mut value = serde_json::to_value(hc)?;
    value["apiVersion"] = Value::String(V1BETA1_API_VERSION.to_string());
    Ok(serde_json::from_value(convert_object(value, V1_API_VERSION)?)?)
}

/// Convert a typed `v1` object to `v1beta1`
pub fn to_v1beta1(hc: &v1::HyperConverged) -> Result<v1beta1::HyperConverged, Error> {
    let mut value = serde_json::to_value(hc)?;
    value["apiVersion"] = Value::String(V1_API_VERSION.to_string());
    Ok(serde_json::from_value(convert_object(value, V1BETA1_API_VERSION)?)?)
}

/// Handle a `ConversionReview` from the API server
#[instrument(skip_all)]
pub async fn convert_handler(Json(review): Json<ConversionReview>) -> Json<ConversionReview> {
    let request = match ConversionRequest::from_review(review) {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "invalid conversion review");
            return Json(
                ConversionResponse::invalid(Status::failure(&e.to_string(), "InvalidRequest"))
                    .into_review(),
            );
        }
    };

    Json(convert_request(request).into_review())
}

fn convert_request(request: ConversionRequest) -> ConversionResponse {
    let desired = request.desired_api_version.clone();
    let objects = request.objects.clone();
    let response = ConversionResponse::for_request(request);

    match objects
        .into_iter()
        .map(|object| convert_object(object, &desired))
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(converted) => {
            debug!(count = converted.len(), desired = %desired, "converted HyperConverged objects");
            response.success(converted)
        }
        Err(e) => {
            error!(error = %e, desired = %desired, "HyperConverged conversion failed");
            response.failure(Status::failure(&e.to_string(), "ConversionFailed"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v1_object(gates: Value) -> Value {
        json!({
            "apiVersion": V1_API_VERSION,
            "kind": "HyperConverged",
            "metadata": {"name": "kubevirt-hyperconverged", "namespace": "hco"},
            "spec": {
                "featureGates": gates,
                "liveMigrationConfig": {"parallelMigrationsPerCluster": 5}
            },
            "status": {"systemHealthStatus": "healthy"}
        })
    }

    /// Story: gates survive a round trip through the older version
    ///
    /// A `v1` list enabling downwardMetrics and disabling videoConfig becomes
    /// a record with both fields set and comes back with both entries, since
    /// each differs from its default.
    #[test]
    fn story_feature_gate_list_round_trip() {
        let original = v1_object(json!([
            {"name": "downwardMetrics"},
            {"name": "videoConfig", "enabled": "False"}
        ]));

        let beta = convert_object(original.clone(), V1BETA1_API_VERSION).unwrap();
        assert_eq!(beta["apiVersion"], V1BETA1_API_VERSION);
        assert_eq!(beta["spec"]["featureGates"]["downwardMetrics"], true);
        assert_eq!(beta["spec"]["featureGates"]["videoConfig"], false);
        assert!(beta["spec"]["featureGates"].get("alignCPUs").is_none());

        let back = convert_object(beta, V1_API_VERSION).unwrap();
        let list: FeatureGateList =
            serde_json::from_value(back["spec"]["featureGates"].clone()).unwrap();
        assert_eq!(list.get("downwardMetrics"), Some(&FeatureGate::enabled("downwardMetrics")));
        assert_eq!(list.get("videoConfig"), Some(&FeatureGate::disabled("videoConfig")));
        assert_eq!(list.iter().count(), 2);
    }

    #[test]
    fn defaults_produce_no_entries() {
        let gates = HyperConvergedFeatureGates {
            video_config: Some(true),
            non_root: Some(true),
            downward_metrics: Some(false),
            ..Default::default()
        };
        assert!(feature_gates_to_v1(&gates).is_empty());
    }

    #[test]
    fn every_bool_survives_record_round_trip() {
        for gate in FEATURE_GATES.iter() {
            for value in [true, false] {
                let mut gates = HyperConvergedFeatureGates::default();
                gates.set(gate.name, value);
                let back = feature_gates_from_v1(&feature_gates_to_v1(&gates));
                assert_eq!(back.is_enabled(gate.name), value, "gate {}", gate.name);
            }
        }
    }

    #[test]
    fn unknown_v1_gates_are_dropped() {
        let list = FeatureGateList(vec![FeatureGate::enabled("noSuchGate")]);
        assert_eq!(feature_gates_from_v1(&list), HyperConvergedFeatureGates::default());
    }

    #[test]
    fn unrelated_fields_are_untouched() {
        let beta = convert_object(v1_object(json!([])), V1BETA1_API_VERSION).unwrap();
        assert_eq!(beta["spec"]["liveMigrationConfig"]["parallelMigrationsPerCluster"], 5);
        assert_eq!(beta["status"]["systemHealthStatus"], "healthy");
        assert_eq!(beta["metadata"]["name"], "kubevirt-hyperconverged");
    }

    #[test]
    fn same_version_is_identity() {
        let obj = v1_object(json!([{"name": "alignCPUs"}]));
        assert_eq!(convert_object(obj.clone(), V1_API_VERSION).unwrap(), obj);
    }

    #[test]
    fn foreign_versions_are_rejected() {
        let mut obj = v1_object(json!([]));
        obj["apiVersion"] = json!("hco.kubevirt.io/v2");
        assert!(matches!(
            convert_object(obj, V1_API_VERSION),
            Err(Error::Conversion(_))
        ));
    }

    #[test]
    fn typed_conversion_keeps_spec() {
        let mut hc = v1beta1::HyperConverged::new("kubevirt-hyperconverged", Default::default());
        hc.spec.feature_gates.align_cpus = Some(true);
        hc.spec.default_cpu_model = Some("EPYC".to_string());

        let converted = to_v1(&hc).unwrap();
        assert!(converted.spec.feature_gates.is_enabled("alignCPUs"));
        assert_eq!(converted.spec.default_cpu_model.as_deref(), Some("EPYC"));

        let back = to_v1beta1(&converted).unwrap();
        assert_eq!(back.spec.feature_gates.align_cpus, Some(true));
        assert_eq!(back.spec.default_cpu_model.as_deref(), Some("EPYC"));
    }

    #[test]
    fn review_failure_reports_reason() {
        let request = ConversionRequest {
            types: None,
            uid: "abc".to_string(),
            desired_api_version: V1_API_VERSION.to_string(),
            objects: vec![json!({"kind": "HyperConverged"})],
        };
        let review = convert_request(request).into_review();
        let response = review.response.unwrap();
        assert_eq!(response.uid, "abc");
        assert!(response.result.message.contains("apiVersion"));
    }
}
