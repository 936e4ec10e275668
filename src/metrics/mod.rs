//! Operator metrics
//!
//! Instruments are OpenTelemetry and exported by the pipeline installed in
//! [`crate::telemetry`]. OpenTelemetry instruments cannot be read back, so
//! every recorded value is also kept in an in-process snapshot that the
//! reconciler and the tests query through the getters below.
//!
//! Label values are lower-cased.

pub mod alerts;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;

static METER: Lazy<Meter> = Lazy::new(|| global::meter("hyperconverged"));

/// Current value of every recorded series, keyed by `name{label=value,...}`
static SNAPSHOT: Lazy<DashMap<String, f64>> = Lazy::new(DashMap::new);

/// Metric names, shared with the alerting rules
pub mod names {
    /// Out-of-band modifications overwritten by the operator
    pub const OUT_OF_BAND_MODIFICATIONS: &str = "kubevirt_hco_out_of_band_modifications_total";
    /// Unsafe JSON-patch annotations on the HyperConverged resource
    pub const UNSAFE_MODIFICATIONS: &str = "kubevirt_hco_unsafe_modifications";
    /// Whether the HyperConverged resource exists
    pub const HYPERCONVERGED_CR_EXISTS: &str = "kubevirt_hco_hyperconverged_cr_exists";
    /// Aggregated system health
    pub const SYSTEM_HEALTH_STATUS: &str = "kubevirt_hco_system_health_status";
    /// Golden images with at least one supported architecture
    pub const DICT_WITH_SUPPORTED_ARCHITECTURES: &str =
        "kubevirt_hco_dataimportcrontemplate_with_supported_architectures";
    /// Golden images carrying the architecture annotation
    pub const DICT_WITH_ARCHITECTURE_ANNOTATION: &str =
        "kubevirt_hco_dataimportcrontemplate_with_architecture_annotation";
    /// Configured memory overcommit percentage
    pub const MEMORY_OVERCOMMIT_PERCENTAGE: &str = "kubevirt_hco_memory_overcommit_percentage";
    /// Whether multi-architecture golden images are in effect
    pub const MULTI_ARCH_BOOT_IMAGES_ENABLED: &str = "kubevirt_hco_multi_arch_boot_images_enabled";
}

const LABEL_COMPONENT_NAME: &str = "component_name";
const LABEL_ANNOTATION_NAME: &str = "annotation_name";
const LABEL_DICT_NAME: &str = "data_import_cron_name";
const LABEL_DATA_SOURCE_NAME: &str = "managed_data_source_name";

// ============================================================================
// Modification Metrics
// ============================================================================

/// Counter of out-of-band modifications overwritten by the operator
///
/// Labels:
/// - `component_name`: `kind/name` of the corrected object
pub static OUT_OF_BAND_MODIFICATIONS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter(names::OUT_OF_BAND_MODIFICATIONS)
        .with_description("Count of out-of-band modifications overwritten by HCO")
        .build()
});

/// Gauge of operations in each unsafe JSON-patch annotation
///
/// Labels:
/// - `annotation_name`: the jsonpatch annotation
pub static UNSAFE_MODIFICATIONS: Lazy<Gauge<i64>> = Lazy::new(|| {
    METER
        .i64_gauge(names::UNSAFE_MODIFICATIONS)
        .with_description("Count of unsafe modifications in the HyperConverged annotations")
        .build()
});

// ============================================================================
// Health Metrics
// ============================================================================

/// Gauge set to 1 while the HyperConverged resource exists
pub static HYPERCONVERGED_CR_EXISTS: Lazy<Gauge<i64>> = Lazy::new(|| {
    METER
        .i64_gauge(names::HYPERCONVERGED_CR_EXISTS)
        .with_description(
            "Indicates whether the HyperConverged custom resource exists (1) or not (0)",
        )
        .build()
});

/// Gauge of the aggregated health: 0 healthy, 1 warning, 2 error
pub static SYSTEM_HEALTH_STATUS: Lazy<Gauge<i64>> = Lazy::new(|| {
    METER
        .i64_gauge(names::SYSTEM_HEALTH_STATUS)
        .with_description(
            "Indicates whether the system health status is healthy (0), warning (1), or error (2)",
        )
        .build()
});

// ============================================================================
// Golden Image Metrics
// ============================================================================

/// Gauge per golden image: 1 when it has a supported architecture
///
/// Labels:
/// - `data_import_cron_name`
/// - `managed_data_source_name`
pub static DICT_WITH_SUPPORTED_ARCHITECTURES: Lazy<Gauge<i64>> = Lazy::new(|| {
    METER
        .i64_gauge(names::DICT_WITH_SUPPORTED_ARCHITECTURES)
        .with_description(
            "Indicates whether the DataImportCronTemplate has supported architectures \
             (1) or not (0)",
        )
        .build()
});

/// Gauge per golden image: 1 when it carries the architecture annotation
pub static DICT_WITH_ARCHITECTURE_ANNOTATION: Lazy<Gauge<i64>> = Lazy::new(|| {
    METER
        .i64_gauge(names::DICT_WITH_ARCHITECTURE_ANNOTATION)
        .with_description(
            "Indicates whether the DataImportCronTemplate has the \
             ssp.kubevirt.io/dict.architectures annotation (1) or not (0)",
        )
        .build()
});

/// Gauge set to 1 when multi-arch golden images are enabled on a multi-arch cluster
pub static MULTI_ARCH_BOOT_IMAGES_ENABLED: Lazy<Gauge<i64>> = Lazy::new(|| {
    METER
        .i64_gauge(names::MULTI_ARCH_BOOT_IMAGES_ENABLED)
        .with_description(
            "Indicates whether multi-architecture golden images are enabled (1) or not (0)",
        )
        .build()
});

// ============================================================================
// Configuration Metrics
// ============================================================================

/// Gauge of the configured memory overcommit percentage
pub static MEMORY_OVERCOMMIT_PERCENTAGE: Lazy<Gauge<i64>> = Lazy::new(|| {
    METER
        .i64_gauge(names::MEMORY_OVERCOMMIT_PERCENTAGE)
        .with_description("Indicates the cluster-wide configured VM memory overcommit percentage")
        .with_unit("%")
        .build()
});

// ============================================================================
// Helper Types
// ============================================================================

/// Aggregated health of the operator and its operands
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SystemHealth {
    /// Everything is available
    Healthy,
    /// Something is progressing or not upgradeable
    Warning,
    /// Something is degraded or unavailable
    Error,
}

impl SystemHealth {
    /// Value written to `status.systemHealthStatus`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Gauge value
    pub fn value(&self) -> i64 {
        match self {
            Self::Healthy => 0,
            Self::Warning => 1,
            Self::Error => 2,
        }
    }
}

// ============================================================================
// Recording Helpers
// ============================================================================

fn series(name: &str, labels: &[(&str, String)]) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let labels: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{name}{{{}}}", labels.join(","))
}

fn key_values(labels: &[(&'static str, String)]) -> Vec<KeyValue> {
    labels
        .iter()
        .map(|(k, v)| KeyValue::new(*k, v.clone()))
        .collect()
}

fn record_gauge(gauge: &Gauge<i64>, name: &str, labels: &[(&'static str, String)], value: i64) {
    gauge.record(value, &key_values(labels));
    SNAPSHOT.insert(series(name, labels), value as f64);
}

fn read(name: &str, labels: &[(&str, String)]) -> Option<f64> {
    SNAPSHOT.get(&series(name, labels)).map(|v| *v)
}

fn component_labels(kind: &str, name: &str) -> [(&'static str, String); 1] {
    [(LABEL_COMPONENT_NAME, format!("{kind}/{name}").to_lowercase())]
}

fn dict_labels(dict: &str, data_source: &str) -> [(&'static str, String); 2] {
    [
        (LABEL_DICT_NAME, dict.to_lowercase()),
        (LABEL_DATA_SOURCE_NAME, data_source.to_lowercase()),
    ]
}

/// Count one overwritten out-of-band modification of `kind/name`
pub fn inc_overwritten_modifications(kind: &str, name: &str) {
    let labels = component_labels(kind, name);
    OUT_OF_BAND_MODIFICATIONS.add(1, &key_values(&labels));
    *SNAPSHOT
        .entry(series(names::OUT_OF_BAND_MODIFICATIONS, &labels))
        .or_insert(0.0) += 1.0;
}

/// Overwrites counted so far for `kind/name`
pub fn overwritten_modifications(kind: &str, name: &str) -> u64 {
    read(names::OUT_OF_BAND_MODIFICATIONS, &component_labels(kind, name)).unwrap_or(0.0) as u64
}

/// Record the number of operations in an unsafe annotation
pub fn set_unsafe_modifications(annotation: &str, count: usize) {
    let labels = [(LABEL_ANNOTATION_NAME, annotation.to_lowercase())];
    record_gauge(
        &UNSAFE_MODIFICATIONS,
        names::UNSAFE_MODIFICATIONS,
        &labels,
        count as i64,
    );
}

/// Recorded number of operations in an unsafe annotation
pub fn unsafe_modifications(annotation: &str) -> u64 {
    let labels = [(LABEL_ANNOTATION_NAME, annotation.to_lowercase())];
    read(names::UNSAFE_MODIFICATIONS, &labels).unwrap_or(0.0) as u64
}

/// Record whether the HyperConverged resource exists
pub fn set_hyperconverged_exists(exists: bool) {
    record_gauge(
        &HYPERCONVERGED_CR_EXISTS,
        names::HYPERCONVERGED_CR_EXISTS,
        &[],
        i64::from(exists),
    );
}

/// Whether the HyperConverged resource was last seen; `None` before any reconcile
pub fn hyperconverged_exists() -> Option<bool> {
    read(names::HYPERCONVERGED_CR_EXISTS, &[]).map(|v| v == 1.0)
}

/// Record the aggregated health
pub fn set_system_health_status(health: SystemHealth) {
    record_gauge(
        &SYSTEM_HEALTH_STATUS,
        names::SYSTEM_HEALTH_STATUS,
        &[],
        health.value(),
    );
}

/// Last recorded aggregated health value
pub fn system_health_status() -> Option<i64> {
    read(names::SYSTEM_HEALTH_STATUS, &[]).map(|v| v as i64)
}

/// Record the configured memory overcommit percentage
pub fn set_memory_overcommit_percentage(percentage: i32) {
    record_gauge(
        &MEMORY_OVERCOMMIT_PERCENTAGE,
        names::MEMORY_OVERCOMMIT_PERCENTAGE,
        &[],
        i64::from(percentage),
    );
}

/// Last recorded memory overcommit percentage
pub fn memory_overcommit_percentage() -> Option<i64> {
    read(names::MEMORY_OVERCOMMIT_PERCENTAGE, &[]).map(|v| v as i64)
}

/// Record whether a golden image has a supported architecture
pub fn set_dict_supported_architectures(dict: &str, data_source: &str, supported: bool) {
    record_gauge(
        &DICT_WITH_SUPPORTED_ARCHITECTURES,
        names::DICT_WITH_SUPPORTED_ARCHITECTURES,
        &dict_labels(dict, data_source),
        i64::from(supported),
    );
}

/// Whether a golden image was last recorded with a supported architecture
pub fn dict_supported_architectures(dict: &str, data_source: &str) -> Option<bool> {
    read(
        names::DICT_WITH_SUPPORTED_ARCHITECTURES,
        &dict_labels(dict, data_source),
    )
    .map(|v| v == 1.0)
}

/// Record whether a golden image carries the architecture annotation
pub fn set_dict_architecture_annotation(dict: &str, data_source: &str, annotated: bool) {
    record_gauge(
        &DICT_WITH_ARCHITECTURE_ANNOTATION,
        names::DICT_WITH_ARCHITECTURE_ANNOTATION,
        &dict_labels(dict, data_source),
        i64::from(annotated),
    );
}

/// Whether a golden image was last recorded with the architecture annotation
pub fn dict_architecture_annotation(dict: &str, data_source: &str) -> Option<bool> {
    read(
        names::DICT_WITH_ARCHITECTURE_ANNOTATION,
        &dict_labels(dict, data_source),
    )
    .map(|v| v == 1.0)
}

/// Record whether multi-arch golden images are in effect
pub fn set_multi_arch_boot_images_enabled(enabled: bool) {
    record_gauge(
        &MULTI_ARCH_BOOT_IMAGES_ENABLED,
        names::MULTI_ARCH_BOOT_IMAGES_ENABLED,
        &[],
        i64::from(enabled),
    );
}

/// Whether multi-arch golden images were last recorded as enabled
pub fn multi_arch_boot_images_enabled() -> Option<bool> {
    read(names::MULTI_ARCH_BOOT_IMAGES_ENABLED, &[]).map(|v| v == 1.0)
}
