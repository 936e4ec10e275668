//! Custom Resource Definitions for the HyperConverged operator
//!
//! The HyperConverged resource is served in two versions. `v1beta1` is what
//! the reconciler and the webhooks work with; `v1` is the storage version and
//! only differs in how feature gates are encoded (see [`crate::conversion`]).
//! The operand CR kinds the operator fans out to live in [`operands`].

pub mod feature_gates;
pub mod operands;
mod types;
pub mod v1;
pub mod v1beta1;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceConversion, CustomResourceDefinition, ServiceReference,
    WebhookClientConfig, WebhookConversion,
};
use kube::CustomResourceExt;

pub use feature_gates::{
    Enablement, FeatureGate, FeatureGateList, HyperConvergedFeatureGates, Phase,
};
pub use types::*;
pub use v1beta1::{HyperConverged, HyperConvergedSpec};

use crate::Error;

/// Version the API server persists
pub const STORAGE_VERSION: &str = "v1";

/// Service that fronts the webhook server
pub const WEBHOOK_SERVICE_NAME: &str = "hyperconverged-cluster-webhook-service";

/// Path of the conversion endpoint
pub const CONVERSION_PATH: &str = "/convert";

/// The HyperConverged CRD with both versions served and `v1` stored
///
/// Conversion between the versions goes through the operator's `/convert`
/// endpoint, exposed by [`WEBHOOK_SERVICE_NAME`] in `namespace`.
pub fn hyperconverged_crd(namespace: &str) -> Result<CustomResourceDefinition, Error> {
    let mut crd = kube::core::crd::merge_crds(
        vec![v1beta1::HyperConverged::crd(), v1::HyperConverged::crd()],
        STORAGE_VERSION,
    )
    .map_err(|e| Error::startup(format!("failed to merge HyperConverged CRD versions: {e}")))?;

    crd.spec.conversion = Some(CustomResourceConversion {
        strategy: "Webhook".to_string(),
        webhook: Some(WebhookConversion {
            conversion_review_versions: vec!["v1".to_string()],
            client_config: Some(WebhookClientConfig {
                service: Some(ServiceReference {
                    name: WEBHOOK_SERVICE_NAME.to_string(),
                    namespace: namespace.to_string(),
                    path: Some(CONVERSION_PATH.to_string()),
                    port: Some(443),
                }),
                ..Default::default()
            }),
        }),
    });

    Ok(crd)
}
