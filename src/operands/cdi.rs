//! The CDI CR (data importer)

use kube::api::DynamicObject;
use serde_json::{json, Value};

use super::generic::{managed_object, GenericOperand, UpdateHooks, UpgradeProbe};
use super::handler::BuildContext;
use super::jsonpatch::{self, CDI_ANNOTATION};
use super::labels::Component;
use super::placement::{placement_value, CertDurations};
use crate::crd::operands::{cdi_name, Cdi};
use crate::crd::HyperConverged;
use crate::kube_utils::HasApiResource;
use crate::tls_profile;
use crate::Error;

const FEATURE_GATES: [&str; 3] = [
    "HonorWaitForFirstConsumer",
    "DataVolumeClaimAdoption",
    "WebhookPvcRendering",
];

/// Handler of the CDI CR
pub fn operand() -> GenericOperand {
    GenericOperand::new(Cdi::api_resource(), build, UpdateHooks::Spec).with_conditions(
        UpgradeProbe {
            status_field: "observedVersion",
            expected: |v| v.cdi.as_str(),
        },
    )
}

fn config(hc: &HyperConverged, ctx: &BuildContext) -> Result<Value, Error> {
    let spec = &hc.spec;
    let mut config = json!({
        "featureGates": FEATURE_GATES,
        "scratchSpaceStorageClass": spec.scratch_space_storage_class,
        "tlsSecurityProfile": tls_profile::effective_profile(ctx.tls_security_profile.as_ref()),
    });

    if let Some(overhead) = &spec.filesystem_overhead {
        config["filesystemOverhead"] = json!({
            "global": overhead.global,
            "storageClass": if overhead.storage_class.is_empty() {
                Value::Null
            } else {
                serde_json::to_value(&overhead.storage_class)?
            },
        });
    }
    if let Some(import) = spec
        .storage_import
        .as_ref()
        .filter(|i| !i.insecure_registries.is_empty())
    {
        config["insecureRegistries"] = json!(import.insecure_registries);
    }
    if let Some(requirements) = spec
        .resource_requirements
        .as_ref()
        .and_then(|r| r.storage_workloads.as_ref())
    {
        config["podResourceRequirements"] = serde_json::to_value(requirements)?;
    }
    if let Some(verbosity) = spec.log_verbosity_config.as_ref().and_then(|l| l.cdi) {
        config["logVerbosity"] = json!(verbosity);
    }
    Ok(config)
}

/// Desired CDI CR; cluster scoped
pub fn build(hc: &HyperConverged, ctx: &BuildContext) -> Result<DynamicObject, Error> {
    let ar = Cdi::api_resource();
    let mut cdi = managed_object(&ar, &cdi_name(hc.name()), false, hc, ctx, Component::Storage);

    let certs = CertDurations::of(hc)?;
    cdi.data = json!({
        "spec": {
            "uninstallStrategy": hc.uninstall_strategy(),
            "infra": placement_value(hc.spec.infra.node_placement.as_ref())?,
            "workload": placement_value(hc.spec.workloads.node_placement.as_ref())?,
            "certConfig": certs.to_cert_config(),
            "config": config(hc, ctx)?,
        }
    });

    jsonpatch::apply_annotation_patch(hc, CDI_ANNOTATION, &mut cdi)?;
    Ok(cdi)
}
