//! Required node affinity
//!
//! Evaluates a node selector plus `requiredDuringSchedulingIgnoredDuringExecution`
//! node affinity the way the scheduler does, and validates affinity blocks
//! with the scheduler's own rules so bad placements are rejected at
//! admission instead of silently matching nothing.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, Node, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm,
};

use crate::Error;

const SUPPORTED_OPERATORS: &str = r#""DoesNotExist", "Exists", "Gt", "In", "Lt", "NotIn""#;
const SUPPORTED_FIELD_OPERATORS: &str = r#""In", "NotIn""#;
const NODE_NAME_FIELD: &str = "metadata.name";

/// Requirements a node must satisfy to run a pod with the given placement
#[derive(Clone, Debug, Default)]
pub struct RequiredNodeAffinity<'a> {
    node_selector: Option<&'a BTreeMap<String, String>>,
    required: Option<&'a NodeSelector>,
}

impl<'a> RequiredNodeAffinity<'a> {
    /// Build from a pod-style node selector and affinity
    pub fn new(
        node_selector: Option<&'a BTreeMap<String, String>>,
        affinity: Option<&'a Affinity>,
    ) -> Self {
        let required = affinity
            .and_then(|a| a.node_affinity.as_ref())
            .and_then(|na| na.required_during_scheduling_ignored_during_execution.as_ref());
        Self {
            node_selector: node_selector.filter(|s| !s.is_empty()),
            required,
        }
    }

    /// True when neither a selector nor a required affinity is present
    pub fn is_empty(&self) -> bool {
        self.node_selector.is_none() && self.required.is_none()
    }

    /// Whether `node` satisfies every requirement
    ///
    /// The node selector must match fully; the affinity terms are ORed and
    /// the requirements inside a term are ANDed. An empty term list matches
    /// no node.
    pub fn matches(&self, node: &Node) -> Result<bool, Error> {
        let empty = BTreeMap::new();
        let labels = node.metadata.labels.as_ref().unwrap_or(&empty);

        if let Some(selector) = self.node_selector {
            if !selector.iter().all(|(k, v)| labels.get(k) == Some(v)) {
                return Ok(false);
            }
        }

        let Some(required) = self.required else {
            return Ok(true);
        };

        let node_name = node.metadata.name.as_deref().unwrap_or_default();
        for term in &required.node_selector_terms {
            if term_matches(term, labels, node_name)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn term_matches(
    term: &NodeSelectorTerm,
    labels: &BTreeMap<String, String>,
    node_name: &str,
) -> Result<bool, Error> {
    let expressions = term.match_expressions.as_deref().unwrap_or_default();
    let fields = term.match_fields.as_deref().unwrap_or_default();
    if expressions.is_empty() && fields.is_empty() {
        return Ok(false);
    }

    for req in expressions {
        if !label_requirement_matches(req, labels)? {
            return Ok(false);
        }
    }

    for req in fields {
        if req.key != NODE_NAME_FIELD {
            return Err(Error::validation(format!(
                "unsupported field selector key {:?}",
                req.key
            )));
        }
        let values = req.values.as_deref().unwrap_or_default();
        let contains = values.iter().any(|v| v == node_name);
        let ok = match req.operator.as_str() {
            "In" => contains,
            "NotIn" => !contains,
            op => {
                return Err(Error::validation(format!(
                    "unsupported field selector operator {op:?}"
                )))
            }
        };
        if !ok {
            return Ok(false);
        }
    }

    Ok(true)
}

fn label_requirement_matches(
    req: &NodeSelectorRequirement,
    labels: &BTreeMap<String, String>,
) -> Result<bool, Error> {
    let values = req.values.as_deref().unwrap_or_default();
    let value = labels.get(&req.key);
    Ok(match req.operator.as_str() {
        "In" => value.is_some_and(|v| values.contains(v)),
        "NotIn" => value.is_none_or(|v| !values.contains(v)),
        "Exists" => value.is_some(),
        "DoesNotExist" => value.is_none(),
        "Gt" | "Lt" => {
            let Some(value) = value else {
                return Ok(false);
            };
            let Ok(actual) = value.parse::<i64>() else {
                return Ok(false);
            };
            let bound = single_integer(values).ok_or_else(|| {
                Error::validation(format!(
                    "{} requires a single integer value",
                    req.operator
                ))
            })?;
            if req.operator == "Gt" {
                actual > bound
            } else {
                actual < bound
            }
        }
        op => {
            return Err(Error::validation(format!(
                "Unsupported value: {op:?}: supported values: {SUPPORTED_OPERATORS}"
            )))
        }
    })
}

fn single_integer(values: &[String]) -> Option<i64> {
    match values {
        [only] => only.parse().ok(),
        _ => None,
    }
}

/// Validate an affinity block with the scheduler's rules
///
/// All violations are collected and joined, each prefixed by its field path
/// below `path`.
pub fn validate_affinity(affinity: &Affinity, path: &str) -> Result<(), Error> {
    let mut errors = Vec::new();

    if let Some(node_affinity) = &affinity.node_affinity {
        let base = format!("{path}.nodeAffinity");
        if let Some(required) = &node_affinity.required_during_scheduling_ignored_during_execution
        {
            let required_path = format!("{base}.requiredDuringSchedulingIgnoredDuringExecution");
            if required.node_selector_terms.is_empty() {
                errors.push(format!(
                    "{required_path}.nodeSelectorTerms: Required value: \
                     must have at least one node selector term"
                ));
            }
            for (i, term) in required.node_selector_terms.iter().enumerate() {
                validate_term(
                    term,
                    &format!("{required_path}.nodeSelectorTerms[{i}]"),
                    &mut errors,
                );
            }
        }

        for (i, preferred) in node_affinity
            .preferred_during_scheduling_ignored_during_execution
            .iter()
            .flatten()
            .enumerate()
        {
            let preferred_path =
                format!("{base}.preferredDuringSchedulingIgnoredDuringExecution[{i}]");
            if !(1..=100).contains(&preferred.weight) {
                errors.push(format!(
                    "{preferred_path}.weight: Invalid value: {}: must be in the range 1-100",
                    preferred.weight
                ));
            }
            validate_term(
                &preferred.preference,
                &format!("{preferred_path}.preference"),
                &mut errors,
            );
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::validation(errors.join(", ")))
    }
}

fn validate_term(term: &NodeSelectorTerm, path: &str, errors: &mut Vec<String>) {
    for (i, req) in term.match_expressions.iter().flatten().enumerate() {
        validate_label_requirement(req, &format!("{path}.matchExpressions[{i}]"), errors);
    }
    for (i, req) in term.match_fields.iter().flatten().enumerate() {
        validate_field_requirement(req, &format!("{path}.matchFields[{i}]"), errors);
    }
}

fn validate_label_requirement(req: &NodeSelectorRequirement, path: &str, errors: &mut Vec<String>) {
    let values = req.values.as_deref().unwrap_or_default();
    match req.operator.as_str() {
        "In" | "NotIn" => {
            if values.is_empty() {
                errors.push(format!(
                    "{path}.values: Required value: \
                     must be specified when `operator` is 'In' or 'NotIn'"
                ));
            }
        }
        "Exists" | "DoesNotExist" => {
            if !values.is_empty() {
                errors.push(format!(
                    "{path}.values: Forbidden: \
                     may not be specified when `operator` is 'Exists' or 'DoesNotExist'"
                ));
            }
        }
        "Gt" | "Lt" => {
            if values.len() != 1 {
                errors.push(format!(
                    "{path}.values: Required value: \
                     must be specified single value when `operator` is 'Lt' or 'Gt'"
                ));
            } else if single_integer(values).is_none() {
                errors.push(format!(
                    "{path}.values[0]: Invalid value: {:?}: must be an integer",
                    values[0]
                ));
            }
        }
        op => errors.push(format!(
            "{path}.operator: Unsupported value: {op:?}: supported values: {SUPPORTED_OPERATORS}"
        )),
    }

    if req.key.is_empty() {
        errors.push(format!("{path}.key: Required value"));
    }
}

fn validate_field_requirement(req: &NodeSelectorRequirement, path: &str, errors: &mut Vec<String>) {
    let values = req.values.as_deref().unwrap_or_default();
    match req.operator.as_str() {
        "In" | "NotIn" => {
            if values.len() != 1 {
                errors.push(format!(
                    "{path}.values: Required value: \
                     must be only one value when `operator` is 'In' or 'NotIn' \
                     for node field selector, must have one element"
                ));
            }
        }
        op => errors.push(format!(
            "{path}.operator: Invalid value: {op:?}: not a valid selector operator, \
             supported values: {SUPPORTED_FIELD_OPERATORS}"
        )),
    }

    if req.key != NODE_NAME_FIELD {
        errors.push(format!(
            "{path}.key: Invalid value: {:?}: not a valid field selector key",
            req.key
        ));
    }
}
