//! The SSP CR (templates, validator, golden images)

use kube::api::DynamicObject;
use serde_json::{json, Value};

use super::generic::{managed_object, GenericOperand, UpdateHooks, UpgradeProbe};
use super::handler::BuildContext;
use super::jsonpatch::{self, SSP_ANNOTATION};
use super::labels::Component;
use super::placement::placement_value;
use crate::crd::operands::{ssp_name, Ssp};
use crate::crd::HyperConverged;
use crate::golden_images;
use crate::kube_utils::HasApiResource;
use crate::tls_profile;
use crate::Error;

/// Namespace of the common templates when none is configured
pub const DEFAULT_COMMON_TEMPLATES_NAMESPACE: &str = "openshift";

const TEMPLATE_VALIDATOR_REPLICAS: i32 = 2;

/// Handler of the SSP CR
pub fn operand() -> GenericOperand {
    GenericOperand::new(Ssp::api_resource(), build, UpdateHooks::Spec).with_conditions(
        UpgradeProbe {
            status_field: "observedVersion",
            expected: |v| v.ssp.as_str(),
        },
    )
}

/// Desired SSP CR
///
/// The golden images come from `status.dataImportCronTemplates`, which the
/// reconciler resolves before any operand is built.
pub fn build(hc: &HyperConverged, ctx: &BuildContext) -> Result<DynamicObject, Error> {
    let ar = Ssp::api_resource();
    let mut ssp = managed_object(&ar, &ssp_name(hc.name()), true, hc, ctx, Component::Schedule);

    let statuses = hc
        .status
        .as_ref()
        .map(|s| s.data_import_cron_templates.as_slice())
        .unwrap_or_default();
    let dicts = golden_images::to_ssp(hc, statuses);

    let mut validator = json!({"replicas": TEMPLATE_VALIDATOR_REPLICAS});
    if let Some(placement) = placement_value(hc.spec.infra.node_placement.as_ref())? {
        validator["placement"] = placement;
    }

    let cluster = if ctx.control_plane_architectures.is_empty()
        && ctx.workload_architectures.is_empty()
    {
        Value::Null
    } else {
        json!({
            "controlPlaneArchitectures": ctx.control_plane_architectures,
            "workloadArchitectures": ctx.workload_architectures,
        })
    };

    let mut spec = json!({
        "templateValidator": validator,
        "commonTemplates": {
            "namespace": hc
                .spec
                .common_templates_namespace
                .as_deref()
                .unwrap_or(DEFAULT_COMMON_TEMPLATES_NAMESPACE),
            "dataImportCronTemplates": if dicts.is_empty() {
                Value::Null
            } else {
                serde_json::to_value(&dicts)?
            },
        },
        "cluster": cluster,
        "enableMultipleArchitectures": hc.spec.feature_gates.enable_multi_arch_boot_image_import,
        "tlsSecurityProfile": tls_profile::effective_profile(ctx.tls_security_profile.as_ref()),
    });
    if let Some(enabled) = hc.spec.deploy_vm_console_proxy {
        spec["tokenGenerationService"] = json!({"enabled": enabled});
    }

    ssp.data = json!({ "spec": spec });
    jsonpatch::apply_annotation_patch(hc, SSP_ANNOTATION, &mut ssp)?;
    Ok(ssp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        DataImportCronSpec, DataImportCronStatus, DataImportCronTemplate,
        DataImportCronTemplateStatus, HyperConvergedSpec, HyperConvergedStatus,
    };
    use crate::golden_images::IMMEDIATE_BIND_ANNOTATION;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn hc() -> HyperConverged {
        let mut hc = HyperConverged::new("kubevirt-hyperconverged", HyperConvergedSpec::default());
        hc.metadata.namespace = Some("kubevirt-hyperconverged".to_string());
        hc
    }

    fn ctx() -> BuildContext {
        BuildContext::for_testing("kubevirt-hyperconverged")
    }

    #[test]
    fn default_ssp() {
        let ssp = build(&hc(), &ctx()).unwrap();
        assert_eq!(ssp.metadata.name.as_deref(), Some("ssp-kubevirt-hyperconverged"));
        assert_eq!(ssp.metadata.namespace.as_deref(), Some("kubevirt-hyperconverged"));
        let spec = &ssp.data["spec"];
        assert_eq!(spec["templateValidator"]["replicas"], 2);
        assert_eq!(spec["commonTemplates"]["namespace"], "openshift");
        assert_eq!(spec["cluster"]["workloadArchitectures"], json!(["amd64"]));
        assert!(spec.get("tokenGenerationService").is_none());
    }

    #[test]
    fn resolved_golden_images_are_forwarded() {
        let mut hc = hc();
        hc.spec.common_templates_namespace = Some("templates".to_string());
        hc.spec.deploy_vm_console_proxy = Some(true);
        hc.status = Some(HyperConvergedStatus {
            data_import_cron_templates: vec![DataImportCronTemplateStatus {
                template: DataImportCronTemplate {
                    metadata: ObjectMeta {
                        name: Some("centos-stream9-image-cron".to_string()),
                        ..Default::default()
                    },
                    spec: Some(DataImportCronSpec {
                        schedule: "3 */12 * * *".to_string(),
                        managed_data_source: "centos-stream9".to_string(),
                        ..Default::default()
                    }),
                },
                status: DataImportCronStatus {
                    common_template: true,
                    ..Default::default()
                },
            }],
            ..Default::default()
        });

        let ssp = build(&hc, &ctx()).unwrap();
        let spec = &ssp.data["spec"];
        assert_eq!(spec["commonTemplates"]["namespace"], "templates");
        assert_eq!(spec["tokenGenerationService"]["enabled"], true);
        let dict = &spec["commonTemplates"]["dataImportCronTemplates"][0];
        assert_eq!(dict["metadata"]["name"], "centos-stream9-image-cron");
        assert_eq!(dict["metadata"]["annotations"][IMMEDIATE_BIND_ANNOTATION], "true");
        assert!(dict.get("status").is_none());
    }
}
