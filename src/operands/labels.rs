//! Canonical labels of managed objects
//!
//! Every object the operator writes carries the label set below. On update
//! only these keys are enforced; labels added by users or other controllers
//! are left alone.

use std::collections::BTreeMap;

use kube::api::ObjectMeta;

/// Application label, set to the HyperConverged name
pub const APP_LABEL: &str = "app";
/// Manager label; its presence is what allows the operator to delete an object
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY_VALUE: &str = "hco-operator";
/// Part-of label
pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";
/// Value of [`PART_OF_LABEL`]
pub const PART_OF_VALUE: &str = "hyperconverged-cluster";
/// Component label
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";
/// Version label
pub const VERSION_LABEL: &str = "app.kubernetes.io/version";

/// Component an object belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Component {
    /// Virtualization engine and its helpers
    Compute,
    /// Data importer and golden images
    Storage,
    /// Network add-ons
    Network,
    /// Alerting rules
    Monitoring,
    /// Scheduling and templates
    Schedule,
    /// The operator's own deployment artifacts
    Deployment,
    /// Node agent enabling memory overcommit through swap
    NodeAgent,
}

impl Component {
    /// Label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compute => "compute",
            Self::Storage => "storage",
            Self::Network => "network",
            Self::Monitoring => "monitoring",
            Self::Schedule => "schedule",
            Self::Deployment => "deployment",
            Self::NodeAgent => "wasp-agent",
        }
    }
}

/// Full canonical label set
pub fn canonical(hc_name: &str, component: Component, version: &str) -> BTreeMap<String, String> {
    [
        (APP_LABEL, hc_name),
        (MANAGED_BY_LABEL, MANAGED_BY_VALUE),
        (PART_OF_LABEL, PART_OF_VALUE),
        (COMPONENT_LABEL, component.as_str()),
        (VERSION_LABEL, version),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Labels used in pod selectors; stable across versions
pub fn selector(hc_name: &str, component: Component) -> BTreeMap<String, String> {
    [(APP_LABEL, hc_name), (COMPONENT_LABEL, component.as_str())]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Whether the object carries the operator's managed-by label
pub fn is_managed(meta: &ObjectMeta) -> bool {
    meta.labels
        .as_ref()
        .and_then(|l| l.get(MANAGED_BY_LABEL))
        .is_some_and(|v| v == MANAGED_BY_VALUE)
}

/// Whether every required label is present with its required value
pub fn contains_all(
    existing: Option<&BTreeMap<String, String>>,
    required: Option<&BTreeMap<String, String>>,
) -> bool {
    let Some(required) = required else {
        return true;
    };
    required
        .iter()
        .all(|(k, v)| existing.and_then(|e| e.get(k)) == Some(v))
}

/// Copy the required labels onto `existing`, keeping any other label
pub fn merge(existing: &mut ObjectMeta, required: Option<&BTreeMap<String, String>>) {
    let Some(required) = required else {
        return;
    };
    let labels = existing.labels.get_or_insert_with(BTreeMap::new);
    for (k, v) in required {
        labels.insert(k.clone(), v.clone());
    }
}
