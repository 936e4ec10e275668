//! Alerting rules shipped with the operator
//!
//! Rendered as a Prometheus Operator `PrometheusRule` and deployed like any
//! other managed object.

use kube::api::{DynamicObject, ObjectMeta};
use serde_json::{json, Value};

use super::names;
use super::SystemHealth;
use crate::crd::operands::PrometheusRule;
use crate::crd::HYPERCONVERGED_NAME;
use crate::kube_utils::HasApiResource;

/// Name of the rule object
pub const RULE_NAME: &str = "kubevirt-hyperconverged-prometheus-rule";
/// Name of the rule group
pub const RULE_GROUP: &str = "kubevirt.hyperconverged.rules";
/// Alert fired while the aggregated health is degraded
pub const CONDITIONS_UNHEALTHY_ALERT: &str = "OperatorConditionsUnhealthy";
/// Alert fired when operand CRs were modified out of band
pub const OUT_OF_BAND_MODIFICATION_ALERT: &str =
    "KubevirtHyperconvergedClusterOperatorCRModification";
/// Alert fired while unsafe jsonpatch annotations are present
pub const UNSAFE_MODIFICATION_ALERT: &str = "KubevirtHyperconvergedClusterOperatorUSModification";
/// Alert fired while the HyperConverged resource is missing
pub const INSTALLATION_NOT_COMPLETED_ALERT: &str =
    "KubevirtHyperconvergedClusterOperatorInstallationNotCompletedAlert";

const RUNBOOK_BASE_URL: &str = "https://kubevirt.io/monitoring/runbooks";
const PART_OF: &str = "kubevirt";
const COMPONENT: &str = "hyperconverged-cluster-operator";

fn labels(severity: &str) -> Value {
    json!({
        "severity": severity,
        "kubernetes_operator_part_of": PART_OF,
        "kubernetes_operator_component": COMPONENT,
    })
}

fn health_rule(health: SystemHealth, severity: &str, state: &str) -> Value {
    let mut labels = labels(severity);
    labels["operator_health_impact"] = json!(severity);
    json!({
        "alert": CONDITIONS_UNHEALTHY_ALERT,
        "expr": format!("{} == {}", names::SYSTEM_HEALTH_STATUS, health.value()),
        "for": "10m",
        "annotations": {
            "description": format!(
                "HCO and its secondary resources are in a {state} state due to system {}.",
                health.as_str()
            ),
            "summary": format!("HCO and its secondary resources are in a {state} state."),
            "runbook_url": format!("{RUNBOOK_BASE_URL}/{CONDITIONS_UNHEALTHY_ALERT}"),
        },
        "labels": labels,
    })
}

/// Rule group of every alert
pub fn rules() -> Vec<Value> {
    vec![
        json!({
            "alert": OUT_OF_BAND_MODIFICATION_ALERT,
            "expr": format!(
                "sum by(component_name) ((round(increase({m}[10m]))>0 and {m} offset 10m) \
                 or ({m} != 0 unless {m} offset 10m))",
                m = names::OUT_OF_BAND_MODIFICATIONS
            ),
            "annotations": {
                "description": "Out-of-band modification for {{ $labels.component_name }}.",
                "summary": "{{ $value }} out-of-band CR modifications were detected \
                    in the last 10 minutes.",
                "runbook_url": format!("{RUNBOOK_BASE_URL}/{OUT_OF_BAND_MODIFICATION_ALERT}"),
            },
            "labels": labels("warning"),
        }),
        json!({
            "alert": UNSAFE_MODIFICATION_ALERT,
            "expr": format!("sum by(annotation_name) (({})>0)", names::UNSAFE_MODIFICATIONS),
            "annotations": {
                "description": "unsafe modification for the {{ $labels.annotation_name }} \
                    annotation in the HyperConverged resource.",
                "summary": "{{ $value }} unsafe modifications were detected \
                    in the HyperConverged resource.",
                "runbook_url": format!("{RUNBOOK_BASE_URL}/{UNSAFE_MODIFICATION_ALERT}"),
            },
            "labels": labels("info"),
        }),
        json!({
            "alert": INSTALLATION_NOT_COMPLETED_ALERT,
            "expr": format!("{} == 0", names::HYPERCONVERGED_CR_EXISTS),
            "for": "1h",
            "annotations": {
                "description": "the installation was not completed; \
                    the HyperConverged custom resource is missing. \
                    In order to complete the installation of the Hyperconverged Cluster Operator \
                    you should create the HyperConverged custom resource.",
                "summary": "the installation was not completed; \
                    to complete the installation, create a HyperConverged custom resource.",
                "runbook_url": format!("{RUNBOOK_BASE_URL}/{INSTALLATION_NOT_COMPLETED_ALERT}"),
            },
            "labels": labels("info"),
        }),
        health_rule(SystemHealth::Error, "critical", "critical"),
        health_rule(SystemHealth::Warning, "warning", "warning"),
    ]
}

/// The `PrometheusRule` object for `namespace`
pub fn prometheus_rule(namespace: &str) -> DynamicObject {
    let mut rule = DynamicObject::new(RULE_NAME, &PrometheusRule::api_resource()).within(namespace);
    rule.metadata = ObjectMeta {
        name: Some(RULE_NAME.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some([("app".to_string(), HYPERCONVERGED_NAME.to_string())].into()),
        ..Default::default()
    };
    rule.data = json!({
        "spec": {
            "groups": [{
                "name": RULE_GROUP,
                "rules": rules(),
            }]
        }
    });
    rule
}
