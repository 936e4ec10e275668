//! JSON-patch annotations on the HyperConverged resource
//!
//! Each annotation holds an RFC 6902 patch that is applied to the spec of
//! one operand CR after it is built. They exist for support cases; their
//! presence taints the configuration.

use json_patch::Patch;
use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::Value;

use crate::crd::HyperConverged;
use crate::upgrade_patch::operation_path;
use crate::Error;

/// Patch applied to the KubeVirt CR
pub const KUBEVIRT_ANNOTATION: &str = "kubevirt.io/jsonpatch";
/// Patch applied to the CDI CR
pub const CDI_ANNOTATION: &str = "cdi.kubevirt.io/jsonpatch";
/// Patch applied to the NetworkAddonsConfig CR
pub const NETWORK_ADDONS_ANNOTATION: &str = "networkaddonsconfig.kubevirt.io/jsonpatch";
/// Patch applied to the SSP CR
pub const SSP_ANNOTATION: &str = "ssp.kubevirt.io/jsonpatch";

/// Every patch annotation
pub const ANNOTATIONS: [&str; 4] = [
    KUBEVIRT_ANNOTATION,
    CDI_ANNOTATION,
    NETWORK_ADDONS_ANNOTATION,
    SSP_ANNOTATION,
];

fn parse(raw: &str) -> Result<Patch, String> {
    let patch: Patch = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    if patch.0.iter().any(|op| !operation_path(op).starts_with("/spec/")) {
        return Err("can only modify spec fields".to_string());
    }
    Ok(patch)
}

fn invalid(annotation: &str, reason: impl std::fmt::Display) -> Error {
    Error::validation(format!("invalid jsonPatch in the {annotation} annotation: {reason}"))
}

/// Apply the patch stored in `annotation`, if any, to `object`
pub fn apply_annotation_patch(
    hc: &HyperConverged,
    annotation: &str,
    object: &mut DynamicObject,
) -> Result<(), Error> {
    let Some(raw) = hc.annotations().get(annotation) else {
        return Ok(());
    };
    let patch = parse(raw).map_err(|e| invalid(annotation, e))?;
    let mut doc = serde_json::to_value(&*object)?;
    json_patch::patch(&mut doc, &patch).map_err(|e| invalid(annotation, e))?;
    *object = serde_json::from_value(doc)?;
    Ok(())
}

/// Number of operations in the patch annotation; 0 when absent or unparsable
pub fn count(hc: &HyperConverged, annotation: &str) -> usize {
    hc.annotations()
        .get(annotation)
        .and_then(|raw| serde_json::from_str::<Patch>(raw).ok())
        .map_or(0, |p| p.0.len())
}

/// Whether any patch annotation is present
pub fn is_tainted(hc: &HyperConverged) -> bool {
    ANNOTATIONS.iter().any(|a| hc.annotations().contains_key(*a))
}

/// Check that every present annotation parses and only targets `/spec/`
pub fn validate(hc: &HyperConverged) -> Result<(), Error> {
    for annotation in ANNOTATIONS {
        if let Some(raw) = hc.annotations().get(annotation) {
            parse(raw).map_err(|e| invalid(annotation, e))?;
        }
    }
    Ok(())
}

/// Canonical rendering of a patch annotation; whitespace-insensitive
pub fn normalize(raw: &str) -> Result<String, Error> {
    let value: Value = serde_json::from_str(raw)?;
    Ok(serde_json::to_string(&value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::HyperConvergedSpec;
    use kube::api::ApiResource;
    use serde_json::json;

    fn hc_with(annotation: &str, value: &str) -> HyperConverged {
        let mut hc = HyperConverged::new("kubevirt-hyperconverged", HyperConvergedSpec::default());
        hc.metadata.annotations = Some([(annotation.to_string(), value.to_string())].into());
        hc
    }

    fn kubevirt_cr() -> DynamicObject {
        let ar = ApiResource {
            group: "kubevirt.io".into(),
            version: "v1".into(),
            api_version: "kubevirt.io/v1".into(),
            kind: "KubeVirt".into(),
            plural: "kubevirts".into(),
        };
        let mut kv = DynamicObject::new("kubevirt-kubevirt-hyperconverged", &ar);
        kv.data = json!({"spec": {"configuration": {
            "developerConfiguration": {"featureGates": ["CPUManager"]}
        }}});
        kv
    }

    #[test]
    fn spec_patch_is_applied() {
        let hc = hc_with(
            KUBEVIRT_ANNOTATION,
            r#"[{
                "op": "add",
                "path": "/spec/configuration/developerConfiguration/featureGates/-",
                "value": "Sidecar"
            }]"#,
        );
        let mut kv = kubevirt_cr();
        apply_annotation_patch(&hc, KUBEVIRT_ANNOTATION, &mut kv).unwrap();
        assert_eq!(
            kv.data["spec"]["configuration"]["developerConfiguration"]["featureGates"],
            json!(["CPUManager", "Sidecar"])
        );
        assert_eq!(count(&hc, KUBEVIRT_ANNOTATION), 1);
        assert!(is_tainted(&hc));
    }

    #[test]
    fn metadata_target_is_rejected() {
        let hc = hc_with(
            CDI_ANNOTATION,
            r#"[{"op": "add", "path": "/metadata/labels/x", "value": "y"}]"#,
        );
        let err = validate(&hc).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid jsonPatch in the cdi.kubevirt.io/jsonpatch annotation: \
             can only modify spec fields"
        );
    }

    #[test]
    fn malformed_patch_is_rejected() {
        let hc = hc_with(SSP_ANNOTATION, "not json");
        assert!(validate(&hc).unwrap_err().to_string().contains(SSP_ANNOTATION));
        assert_eq!(count(&hc, SSP_ANNOTATION), 0);
    }

    #[test]
    fn other_annotations_do_not_taint() {
        let hc = hc_with("deployOVS", "true");
        assert!(!is_tainted(&hc));
        assert!(validate(&hc).is_ok());
        let mut kv = kubevirt_cr();
        let before = kv.data.clone();
        apply_annotation_patch(&hc, KUBEVIRT_ANNOTATION, &mut kv).unwrap();
        assert_eq!(kv.data, before);
    }

    #[test]
    fn normalization_is_idempotent() {
        let raw = r#"[ {"op":"replace",  "path":"/spec/a", "value": 1} ]"#;
        let once = normalize(raw).unwrap();
        assert_eq!(normalize(&once).unwrap(), once);
    }
}
