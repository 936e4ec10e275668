//! Namespace deletion gate
//!
//! Deleting the operator namespace while the HyperConverged resource still
//! lives there would take the operator down before it could uninstall the
//! operands. The HyperConverged resource has to go first.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::ResourceExt;
use tracing::{info, instrument, warn};

use super::{admission_request, decode, WebhookError, WebhookState};

/// Handle admission review for namespace deletion
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Result<Json<AdmissionReview<DynamicObject>>, WebhookError> {
    let req = admission_request(body)?;
    Ok(Json(gate_namespace_delete(&state, &req).await.into_review()))
}

/// Refuse to delete the operator namespace while it holds the HyperConverged resource
#[instrument(skip_all, fields(namespace = %req.name))]
pub async fn gate_namespace_delete(
    state: &WebhookState,
    req: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    if !matches!(req.operation, Operation::Delete) {
        return AdmissionResponse::from(req);
    }
    let namespace: Namespace = match decode(req.old_object.as_ref()) {
        Ok(namespace) => namespace,
        Err(e) => {
            warn!(error = %e, "failed to decode namespace");
            return AdmissionResponse::from(req).deny("failed to parse the namespace");
        }
    };
    if namespace.name_any() != state.config.namespace {
        return AdmissionResponse::from(req);
    }

    match state.singleton().await {
        Ok(None) => AdmissionResponse::from(req),
        Ok(Some(hc)) => {
            info!("refusing to delete the namespace of the HyperConverged resource");
            AdmissionResponse::from(req).deny(format!(
                "HyperConverged {} is still present in the {} namespace; \
                 please remove it before deleting the namespace",
                hc.name(),
                state.config.namespace
            ))
        }
        Err(e) => {
            warn!(error = %e, "failed to get the HyperConverged resource");
            AdmissionResponse::from(req)
                .deny(format!("failed to check for a HyperConverged resource: {e}"))
        }
    }
}
