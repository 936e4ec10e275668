//! Aggregation of operand health into the HyperConverged conditions

use kube::api::DynamicObject;

use crate::crd::{remove_condition, set_condition, Condition, ConditionStatus};
use crate::metrics::SystemHealth;

/// Condition types of the HyperConverged resource
pub mod types {
    /// Every operand is available
    pub const AVAILABLE: &str = "Available";
    /// Some operand is rolling out or upgrading
    pub const PROGRESSING: &str = "Progressing";
    /// Some operand or managed object is failing
    pub const DEGRADED: &str = "Degraded";
    /// Every operand accepts an upgrade
    pub const UPGRADEABLE: &str = "Upgradeable";
    /// The last reconcile went through without error
    pub const RECONCILE_COMPLETE: &str = "ReconcileComplete";
    /// An unsupported customization is active
    pub const TAINTED_CONFIGURATION: &str = "TaintedConfiguration";
}

/// Condition reasons of the HyperConverged resource
pub mod reasons {
    /// Nothing to report
    pub const AS_EXPECTED: &str = "ReconcileCompleted";
    /// The operator is upgrading
    pub const UPGRADING: &str = "HCOUpgrading";
    /// Some managed object could not be reconciled
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
    /// A jsonpatch annotation is set
    pub const UNSUPPORTED_ANNOTATION: &str = "UnsupportedFeatureAnnotation";
    /// A second HyperConverged resource exists
    pub const IGNORED_INSTANCE: &str = "IgnoredInstance";
}

const RECONCILE_COMPLETED_MESSAGE: &str = "Reconcile completed successfully";

#[derive(Clone, Debug, PartialEq)]
struct Finding {
    reason: String,
    message: String,
}

impl Finding {
    fn new(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            message: message.into(),
        }
    }
}

/// Collects what the operands report during one reconcile
///
/// Only the first finding of each kind is kept; later ones describe the same
/// state of the HyperConverged conditions.
#[derive(Debug, Default)]
pub struct HealthReport {
    not_available: Option<Finding>,
    progressing: Option<Finding>,
    degraded: Option<Finding>,
    not_upgradeable: Option<Finding>,
    failed: Option<Finding>,
}

fn keep_first(slot: &mut Option<Finding>, finding: Finding) {
    if slot.is_none() {
        *slot = Some(finding);
    }
}

impl HealthReport {
    /// Empty report
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold the conditions of an operand CR into the report
    ///
    /// `component` names the operand in reasons (`KubeVirtNotAvailable`).
    pub fn observe_operand(&mut self, component: &str, object: &DynamicObject) {
        let conditions = object.data["status"]["conditions"]
            .as_array()
            .filter(|c| !c.is_empty());
        let Some(conditions) = conditions else {
            let finding = Finding::new(
                format!("{component}Conditions"),
                format!("{component} resource has no conditions"),
            );
            keep_first(&mut self.not_available, finding.clone());
            keep_first(&mut self.progressing, finding.clone());
            keep_first(&mut self.not_upgradeable, finding);
            return;
        };

        for condition in conditions {
            let status = condition["status"].as_str().unwrap_or_default();
            let message = condition["message"].as_str().unwrap_or_default();
            let found = |suffix: &str, phrase: &str| {
                Finding::new(format!("{component}{suffix}"), message_or(component, phrase, message))
            };
            match (condition["type"].as_str().unwrap_or_default(), status) {
                ("Available", "False") => keep_first(
                    &mut self.not_available,
                    found("NotAvailable", "is not available"),
                ),
                ("Progressing", "True") => {
                    let finding = found("Progressing", "is progressing");
                    keep_first(&mut self.progressing, finding.clone());
                    keep_first(&mut self.not_upgradeable, finding);
                }
                ("Degraded", "True") => {
                    keep_first(&mut self.degraded, found("Degraded", "is degraded"))
                }
                ("Upgradeable", "False") => keep_first(
                    &mut self.not_upgradeable,
                    found("NotUpgradeable", "is not upgradeable"),
                ),
                _ => {}
            }
        }
    }

    /// Record that a managed object could not be reconciled
    pub fn observe_failure(&mut self, kind: &str, name: &str, error: &crate::Error) {
        let finding = Finding::new(
            reasons::RECONCILE_FAILED,
            format!("failed to reconcile {kind} {name}: {error}"),
        );
        keep_first(&mut self.degraded, finding.clone());
        keep_first(&mut self.failed, finding);
    }

    /// Record that the operator itself is upgrading
    pub fn observe_upgrade(&mut self, version: &str) {
        let finding = Finding::new(
            reasons::UPGRADING,
            format!("HCO is now upgrading to version {version}"),
        );
        keep_first(&mut self.progressing, finding.clone());
        keep_first(&mut self.not_upgradeable, finding);
    }

    /// Whether any managed object failed
    pub fn has_failures(&self) -> bool {
        self.failed.is_some()
    }

    /// Aggregated health
    ///
    /// Anything unavailable or degraded is an error; anything progressing or
    /// blocking upgrades is a warning.
    pub fn health(&self) -> SystemHealth {
        if self.not_available.is_some() || self.degraded.is_some() {
            SystemHealth::Error
        } else if self.progressing.is_some() || self.not_upgradeable.is_some() {
            SystemHealth::Warning
        } else {
            SystemHealth::Healthy
        }
    }

    /// Write the five aggregated conditions
    pub fn apply(&self, conditions: &mut Vec<Condition>, generation: Option<i64>) {
        let condition = |type_: &str, status: bool, finding: &Option<Finding>| {
            let (reason, message) = match finding {
                Some(f) => (f.reason.clone(), f.message.clone()),
                None => (reasons::AS_EXPECTED.to_string(), RECONCILE_COMPLETED_MESSAGE.to_string()),
            };
            Condition::new(type_, ConditionStatus::from_bool(status), reason, message)
                .with_generation(generation)
        };

        let available = self.not_available.is_none() && self.failed.is_none();
        let unavailable_reason = self.not_available.clone().or_else(|| self.failed.clone());
        set_condition(conditions, condition(types::AVAILABLE, available, &unavailable_reason));
        set_condition(
            conditions,
            condition(types::PROGRESSING, self.progressing.is_some(), &self.progressing),
        );
        set_condition(
            conditions,
            condition(types::DEGRADED, self.degraded.is_some(), &self.degraded),
        );
        set_condition(
            conditions,
            condition(types::UPGRADEABLE, self.not_upgradeable.is_none(), &self.not_upgradeable),
        );
        set_condition(
            conditions,
            condition(types::RECONCILE_COMPLETE, self.failed.is_none(), &self.failed),
        );
    }
}

fn message_or(component: &str, fallback: &str, message: &str) -> String {
    if message.is_empty() {
        format!("{component} {fallback}")
    } else {
        format!("{component}: {message}")
    }
}

/// Set or clear `TaintedConfiguration`
pub fn set_tainted(conditions: &mut Vec<Condition>, tainted: bool, generation: Option<i64>) {
    if tainted {
        set_condition(
            conditions,
            Condition::new(
                types::TAINTED_CONFIGURATION,
                ConditionStatus::True,
                reasons::UNSUPPORTED_ANNOTATION,
                "Unsupported feature was activated via an HCO annotation",
            )
            .with_generation(generation),
        );
    } else {
        remove_condition(conditions, types::TAINTED_CONFIGURATION);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::operands::KubeVirt;
    use crate::kube_utils::HasApiResource;
    use serde_json::{json, Value};

    fn operand(conditions: Value) -> DynamicObject {
        let mut object =
            DynamicObject::new("kubevirt-kubevirt-hyperconverged", &KubeVirt::api_resource());
        object.data = json!({"spec": {}, "status": {"conditions": conditions}});
        object
    }

    fn healthy() -> Value {
        json!([
            {"type": "Available", "status": "True"},
            {"type": "Progressing", "status": "False"},
            {"type": "Degraded", "status": "False"},
        ])
    }

    #[test]
    fn healthy_operands_give_healthy_conditions() {
        let mut report = HealthReport::new();
        report.observe_operand("KubeVirt", &operand(healthy()));
        report.observe_operand("CDI", &operand(healthy()));
        assert_eq!(report.health(), SystemHealth::Healthy);

        let mut conditions = Vec::new();
        report.apply(&mut conditions, Some(3));
        assert_eq!(conditions.len(), 5);
        for c in &conditions {
            assert_eq!(c.reason, reasons::AS_EXPECTED);
            assert_eq!(c.observed_generation, Some(3));
        }
        let status = |t: &str| conditions.iter().find(|c| c.type_ == t).map(|c| c.status.clone());
        assert_eq!(status(types::AVAILABLE), Some(ConditionStatus::True));
        assert_eq!(status(types::PROGRESSING), Some(ConditionStatus::False));
        assert_eq!(status(types::UPGRADEABLE), Some(ConditionStatus::True));
    }

    #[test]
    fn operand_without_conditions_is_not_available() {
        let mut report = HealthReport::new();
        let mut object = operand(json!([]));
        object.data["status"] = Value::Null;
        report.observe_operand("SSP", &object);

        let mut conditions = Vec::new();
        report.apply(&mut conditions, None);
        let available = conditions.iter().find(|c| c.type_ == types::AVAILABLE).unwrap();
        assert_eq!(available.status, ConditionStatus::False);
        assert_eq!(available.reason, "SSPConditions");
        assert_eq!(available.message, "SSP resource has no conditions");
        assert_eq!(report.health(), SystemHealth::Error);
    }

    #[test]
    fn progressing_operand_blocks_upgrades() {
        let mut report = HealthReport::new();
        report.observe_operand(
            "CDI",
            &operand(json!([
                {"type": "Available", "status": "True"},
                {"type": "Progressing", "status": "True", "message": "Deploying CDI"},
            ])),
        );
        assert_eq!(report.health(), SystemHealth::Warning);
        let mut conditions = Vec::new();
        report.apply(&mut conditions, None);
        let upgradeable = conditions.iter().find(|c| c.type_ == types::UPGRADEABLE).unwrap();
        assert_eq!(upgradeable.status, ConditionStatus::False);
        assert_eq!(upgradeable.reason, "CDIProgressing");
        assert_eq!(upgradeable.message, "CDI: Deploying CDI");
    }

    #[test]
    fn first_finding_wins() {
        let mut report = HealthReport::new();
        let degraded = || operand(json!([{"type": "Degraded", "status": "True"}]));
        report.observe_operand("KubeVirt", &degraded());
        report.observe_operand("CDI", &degraded());
        let mut conditions = Vec::new();
        report.apply(&mut conditions, None);
        let degraded = conditions.iter().find(|c| c.type_ == types::DEGRADED).unwrap();
        assert_eq!(degraded.reason, "KubeVirtDegraded");
        assert_eq!(degraded.message, "KubeVirt is degraded");
    }

    #[test]
    fn failures_mark_reconcile_incomplete() {
        let mut report = HealthReport::new();
        report.observe_operand("KubeVirt", &operand(healthy()));
        let failure = crate::Error::internal("boom");
        report.observe_failure("SSP", "ssp-kubevirt-hyperconverged", &failure);
        assert!(report.has_failures());
        assert_eq!(report.health(), SystemHealth::Error);

        let mut conditions = Vec::new();
        report.apply(&mut conditions, None);
        let complete = conditions.iter().find(|c| c.type_ == types::RECONCILE_COMPLETE).unwrap();
        assert_eq!(complete.status, ConditionStatus::False);
        assert!(complete.message.contains("ssp-kubevirt-hyperconverged"));
    }

    #[test]
    fn tainted_condition_is_removed_when_clean() {
        let mut conditions = Vec::new();
        set_tainted(&mut conditions, true, None);
        assert_eq!(conditions[0].type_, types::TAINTED_CONFIGURATION);
        set_tainted(&mut conditions, false, None);
        assert!(conditions.is_empty());
    }
}
