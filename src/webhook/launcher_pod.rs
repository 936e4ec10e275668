//! Mutating webhook for virt-launcher pods
//!
//! Backup hooks declared on a VM template end up on its launcher pod, where
//! Velero would run them inside the compute container. When the
//! HyperConverged resource opts in, the hook annotations are removed as the
//! pod is created.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use json_patch::{PatchOperation, RemoveOperation};
use jsonptr::PointerBuf;
use k8s_openapi::api::core::v1::Pod;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use super::{admission_request, decode, patch_response, WebhookError, WebhookState};
use crate::kube_utils::escape_json_pointer;
use crate::operands::launcher_webhook::LAUNCHER_LABEL;

/// Velero backup hook annotations removed from launcher pods
pub const VELERO_HOOK_ANNOTATIONS: [&str; 6] = [
    "pre.hook.backup.velero.io/command",
    "pre.hook.backup.velero.io/container",
    "pre.hook.backup.velero.io/on-error",
    "pre.hook.backup.velero.io/timeout",
    "post.hook.backup.velero.io/command",
    "post.hook.backup.velero.io/container",
];

/// Handle mutating admission review for launcher pods
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Result<Json<AdmissionReview<DynamicObject>>, WebhookError> {
    let req = admission_request(body)?;
    Ok(Json(mutate_launcher_pod(&state, &req).await.into_review()))
}

/// Strip the backup hooks from one launcher pod create
///
/// Pod creation is never blocked on the operator: if the HyperConverged
/// resource cannot be read, the pod goes through untouched.
#[instrument(skip_all, fields(pod = %req.name, namespace = ?req.namespace))]
pub async fn mutate_launcher_pod(
    state: &WebhookState,
    req: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    if !matches!(req.operation, Operation::Create) {
        return AdmissionResponse::from(req);
    }

    let hc = match state.singleton().await {
        Ok(Some(hc)) => hc,
        Ok(None) => {
            warn!("no HyperConverged resource found, admitting pod unchanged");
            return AdmissionResponse::from(req);
        }
        Err(e) => {
            warn!(error = %e, "failed to get the HyperConverged resource, admitting pod unchanged");
            return AdmissionResponse::from(req);
        }
    };
    if !hc.launcher_pod_mutator_enabled() {
        return AdmissionResponse::from(req);
    }

    let pod: Pod = match decode(req.object.as_ref()) {
        Ok(pod) => pod,
        Err(e) => {
            warn!(error = %e, "failed to decode pod");
            return AdmissionResponse::invalid("failed to parse Pod");
        }
    };
    if pod.labels().get(LAUNCHER_LABEL.0).map(String::as_str) != Some(LAUNCHER_LABEL.1) {
        debug!("not a launcher pod");
        return AdmissionResponse::from(req);
    }

    let ops = hook_removals(&pod);
    if !ops.is_empty() {
        info!(count = ops.len(), "removing velero backup hook annotations from launcher pod");
    }
    patch_response(req, ops)
}

fn hook_removals(pod: &Pod) -> Vec<PatchOperation> {
    let annotations = pod.annotations();
    VELERO_HOOK_ANNOTATIONS
        .iter()
        .filter(|key| annotations.contains_key(**key))
        .filter_map(|key| {
            let path = format!("/metadata/annotations/{}", escape_json_pointer(key));
            match PointerBuf::parse(&path) {
                Ok(path) => Some(PatchOperation::Remove(RemoveOperation { path })),
                Err(e) => {
                    warn!(%path, error = %e, "cannot address annotation");
                    None
                }
            }
        })
        .collect()
}
