//! Kubernetes helpers shared by the controller and the webhooks

use kube::api::ApiResource;

/// Types whose API version and kind are known at compile time
///
/// Operand CRs are handled as `DynamicObject`s; implementing this trait on a
/// marker type gives them a stable `ApiResource`.
pub trait HasApiResource {
    /// Full API version (e.g. "kubevirt.io/v1")
    const API_VERSION: &'static str;
    /// Resource kind (e.g. "KubeVirt")
    const KIND: &'static str;

    /// Build an ApiResource from the type's constants
    fn api_resource() -> ApiResource {
        build_api_resource(Self::API_VERSION, Self::KIND)
    }
}

/// Build an ApiResource from a known apiVersion and kind
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Split an apiVersion into group and version
///
/// ```
/// use hyperconverged::kube_utils::parse_api_version;
///
/// assert_eq!(
///     parse_api_version("cdi.kubevirt.io/v1beta1"),
///     ("cdi.kubevirt.io".into(), "v1beta1".into())
/// );
/// assert_eq!(parse_api_version("v1"), (String::new(), "v1".into()));
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Known plurals that simple rules get wrong
const KIND_PLURALS: &[(&str, &str)] = &[
    ("kubevirt", "kubevirts"),
    ("cdi", "cdis"),
    ("ssp", "ssps"),
    ("networkaddonsconfig", "networkaddonsconfigs"),
    ("hyperconverged", "hyperconvergeds"),
    ("prometheusrule", "prometheusrules"),
    ("mutatingwebhookconfiguration", "mutatingwebhookconfigurations"),
    ("endpoints", "endpoints"),
];

/// Pluralize a resource kind
///
/// Uses a lookup table for known kinds, falling back to simple English
/// pluralization rules.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    if let Some((_, plural)) = KIND_PLURALS.iter().find(|(singular, _)| *singular == lower) {
        return (*plural).to_string();
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{lower}es")
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{lower}s")
    }
}

/// `plural.group` form of a resource, as printed by the API server
pub fn group_resource(ar: &ApiResource) -> String {
    if ar.group.is_empty() {
        ar.plural.clone()
    } else {
        format!("{}.{}", ar.plural, ar.group)
    }
}

/// SHA-256 digest of the input
///
/// Stable across toolchains, unlike `DefaultHasher`; use it for anything
/// persisted in the cluster.
pub fn sha256(input: &str) -> [u8; 32] {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(hash.as_ref());
    out
}

/// Compute a deterministic hash of the input string, returning a 16-char hex digest
pub fn deterministic_hash(input: &str) -> String {
    sha256(input)[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

/// Escape one JSON pointer reference token (`~` → `~0`, `/` → `~1`)
pub fn escape_json_pointer(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}
