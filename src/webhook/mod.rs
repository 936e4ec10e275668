//! Admission webhooks of the operator
//!
//! One HTTPS server carries every admission surface:
//! - [`validator`] checks HyperConverged create, update and delete requests,
//!   dry-running the operand CRs against the API server
//! - [`mutator`] fills in HyperConverged defaults
//! - [`launcher_pod`] strips backup hooks from virt-launcher pods
//! - [`migration_capacity`] refuses pods that would leave no ResourceQuota
//!   room for migrating the namespace's VMIs, when opted in
//! - [`namespace`] refuses to delete the namespace that still holds the
//!   HyperConverged resource
//!
//! The same router serves CRD conversion and the health probes. The
//! listener follows the cached TLS security profile.

pub mod launcher_pod;
pub mod migration_capacity;
pub mod mutator;
pub mod namespace;
pub mod tls;
pub mod validator;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::Client;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::OperatorConfig;
use crate::controller::{HyperConvergedClient, KubeHyperConvergedClient};
use crate::conversion::convert_handler;
use crate::crd::{HyperConverged, TlsSecurityProfile, CONVERSION_PATH, HYPERCONVERGED_NAME};
use crate::operands::{BuildContext, KubeOperandClient, OperandClient};
use crate::tls_profile::{self, TlsProfileCache};
use crate::Error;
use self::migration_capacity::{CapacityClient, KubeCapacityClient};

/// Validation of HyperConverged requests
pub const VALIDATE_PATH: &str = "/validate-hco-kubevirt-io-v1beta1-hyperconverged";
/// Defaulting of HyperConverged requests
pub const MUTATE_PATH: &str = "/mutate-hco-kubevirt-io-v1beta1-hyperconverged";
/// Mutation of virt-launcher pods
pub const LAUNCHER_POD_PATH: &str = "/mutate-launcher-pod";
/// Namespace deletion gate
pub const NAMESPACE_PATH: &str = "/mutate-ns-hco-kubevirt-io";
/// Migration headroom check of pod creations
pub const MIGRATION_CAPACITY_PATH: &str = "/validate-migration-capacity";

/// Shared state for webhook handlers
pub struct WebhookState {
    /// Process configuration
    pub config: OperatorConfig,
    /// Lookups of the HyperConverged resource
    pub hyperconvergeds: Arc<dyn HyperConvergedClient>,
    /// Dry-run access to the operand CRs
    pub operands: Arc<dyn OperandClient>,
    /// Namespace lookups of the migration capacity check
    pub capacity: Arc<dyn CapacityClient>,
    /// TLS profile of the admitted HyperConverged resource
    pub tls_profiles: Arc<TlsProfileCache>,
}

impl WebhookState {
    /// State backed by the Kubernetes API
    pub fn new(
        config: OperatorConfig,
        client: Client,
        tls_profiles: Arc<TlsProfileCache>,
    ) -> Self {
        Self {
            config,
            hyperconvergeds: Arc::new(KubeHyperConvergedClient::new(client.clone())),
            operands: Arc::new(KubeOperandClient::new(client.clone())),
            capacity: Arc::new(KubeCapacityClient::new(client)),
            tls_profiles,
        }
    }

    /// The HyperConverged singleton of the operator namespace, if any
    pub async fn singleton(&self) -> Result<Option<HyperConverged>, Error> {
        self.hyperconvergeds
            .get(&self.config.namespace, HYPERCONVERGED_NAME)
            .await
    }

    /// Build inputs for the operand CRs of `hc`
    ///
    /// Admission has no topology oracle of its own; the cluster facts come
    /// from what the reconciler last wrote to the status.
    pub fn build_context(&self, hc: &HyperConverged) -> BuildContext {
        let mut ctx = BuildContext::from_config(&self.config);
        if let Some(status) = &hc.status {
            ctx.infrastructure_highly_available =
                status.infrastructure_highly_available.unwrap_or(false);
            if let Some(node_info) = &status.node_info {
                ctx.control_plane_architectures = node_info.control_plane_architectures.clone();
                ctx.workload_architectures = node_info.workloads_architectures.clone();
            }
        }
        ctx.tls_security_profile = hc.spec.tls_security_profile.clone();
        ctx
    }
}

/// Error type for webhook operations
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The admission review request was invalid or malformed
    #[error("invalid admission review: {0}")]
    InvalidReview(String),

    /// An error occurred during JSON serialization/deserialization
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            WebhookError::InvalidReview(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            WebhookError::Serialization(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

/// Unwrap the request of an admission review
pub(crate) fn admission_request(
    review: AdmissionReview<DynamicObject>,
) -> Result<AdmissionRequest<DynamicObject>, WebhookError> {
    review.try_into().map_err(|e: kube::core::admission::ConvertAdmissionReviewError| {
        error!(error = %e, "failed to parse admission request");
        WebhookError::InvalidReview(e.to_string())
    })
}

/// Decode the untyped object of an admission request
pub(crate) fn decode<T: DeserializeOwned>(object: Option<&DynamicObject>) -> Result<T, Error> {
    let object =
        object.ok_or_else(|| Error::validation("the admission request carries no object"))?;
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

/// Allow `req`, attaching `ops` as a JSON patch when there are any
pub(crate) fn patch_response(
    req: &AdmissionRequest<DynamicObject>,
    ops: Vec<json_patch::PatchOperation>,
) -> AdmissionResponse {
    let response = AdmissionResponse::from(req);
    if ops.is_empty() {
        return response;
    }
    match response.with_patch(json_patch::Patch(ops)) {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "failed to serialize admission patch");
            AdmissionResponse::from(req).deny(format!("failed to serialize patch: {e}"))
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

/// Create the webhook router with every admission endpoint
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(VALIDATE_PATH, post(validator::validate_handler))
        .route(MUTATE_PATH, post(mutator::mutate_handler))
        .route(LAUNCHER_POD_PATH, post(launcher_pod::mutate_handler))
        .route(NAMESPACE_PATH, post(namespace::mutate_handler))
        .route(MIGRATION_CAPACITY_PATH, post(migration_capacity::validate_handler))
        .route(CONVERSION_PATH, post(convert_handler))
        .route("/healthz", get(healthz))
        .route("/readyz", get(healthz))
        .with_state(state)
}

/// Certificate chain and key from `tls.crt` and `tls.key` in `cert_dir`
pub fn load_identity(
    cert_dir: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), Error> {
    let load_error = |e: rustls::pki_types::pem::Error| {
        Error::startup(format!(
            "failed to load webhook certificate from {}: {e}",
            cert_dir.display()
        ))
    };
    let certs = CertificateDer::pem_file_iter(cert_dir.join("tls.crt"))
        .map_err(load_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(load_error)?;
    let key = PrivateKeyDer::from_pem_file(cert_dir.join("tls.key")).map_err(load_error)?;
    Ok((certs, key))
}

/// Rebuild the listener's TLS settings on every change of the cached profile
///
/// A profile rustls cannot serve keeps the previous settings. Returns once
/// the cache is dropped.
pub async fn follow_tls_profile(
    mut profiles: watch::Receiver<Option<TlsSecurityProfile>>,
    tls: RustlsConfig,
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) {
    while profiles.changed().await.is_ok() {
        let profile = profiles.borrow_and_update().clone();
        match tls_profile::server_config(profile.as_ref(), certs.clone(), key.clone_key()) {
            Ok(config) => {
                tls.reload_from_config(Arc::new(config));
                let (_, min_version) = tls_profile::resolve(profile.as_ref());
                info!(%min_version, "webhook TLS settings reloaded");
            }
            Err(e) => warn!(error = %e, "keeping the previous webhook TLS settings"),
        }
    }
}

/// Serve the webhooks over HTTPS until the process ends
///
/// `cert_dir` holds `tls.crt` and `tls.key`, mounted from the serving
/// certificate secret.
pub async fn serve(state: Arc<WebhookState>, port: u16, cert_dir: &Path) -> Result<(), Error> {
    let (certs, key) = load_identity(cert_dir)?;
    let profiles = state.tls_profiles.subscribe();
    let initial =
        tls_profile::server_config(profiles.borrow().as_ref(), certs.clone(), key.clone_key())?;
    let tls = RustlsConfig::from_config(Arc::new(initial));
    tokio::spawn(follow_tls_profile(profiles, tls.clone(), certs, key));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting webhook server");
    axum_server::bind_rustls(addr, tls)
        .serve(webhook_router(state).into_make_service())
        .await
        .map_err(|e| Error::internal(format!("webhook server failed: {e}")))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Admission review fixtures shared by the webhook tests

    use super::*;
    use crate::controller::MockHyperConvergedClient;
    use crate::operands::fake::FakeOperandClient;
    use kube::core::admission::Operation;
    use crate::webhook::migration_capacity::MockCapacityClient;
    use serde_json::{json, Value};

    pub const NS: &str = "kubevirt-hyperconverged";

    pub fn state(
        hyperconvergeds: MockHyperConvergedClient,
        operands: Arc<FakeOperandClient>,
    ) -> Arc<WebhookState> {
        state_with_capacity(hyperconvergeds, MockCapacityClient::new(), operands)
    }

    pub fn state_with_capacity(
        hyperconvergeds: MockHyperConvergedClient,
        capacity: MockCapacityClient,
        operands: Arc<FakeOperandClient>,
    ) -> Arc<WebhookState> {
        Arc::new(WebhookState {
            config: OperatorConfig::for_testing(NS),
            hyperconvergeds: Arc::new(hyperconvergeds),
            operands,
            capacity: Arc::new(capacity),
            tls_profiles: Arc::new(TlsProfileCache::new()),
        })
    }

    fn operation_name(operation: &Operation) -> &'static str {
        match operation {
            Operation::Create => "CREATE",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::Connect => "CONNECT",
        }
    }

    /// Admission request for `resource` with the given objects
    pub fn request(
        (group, version, kind, resource): (&str, &str, &str, &str),
        operation: Operation,
        object: Option<Value>,
        old_object: Option<Value>,
        dry_run: bool,
    ) -> AdmissionRequest<DynamicObject> {
        let source = object.as_ref().or(old_object.as_ref());
        let name = source
            .and_then(|o| o["metadata"]["name"].as_str())
            .unwrap_or_default()
            .to_string();
        let namespace = source
            .and_then(|o| o["metadata"]["namespace"].as_str())
            .map(String::from);
        let review: AdmissionReview<DynamicObject> = serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "3a5c7e1f-0000-4000-8000-000000000001",
                "kind": {"group": group, "version": version, "kind": kind},
                "resource": {"group": group, "version": version, "resource": resource},
                "name": name,
                "namespace": namespace,
                "operation": operation_name(&operation),
                "userInfo": {"username": "system:admin"},
                "object": object,
                "oldObject": old_object,
                "dryRun": dry_run,
            }
        }))
        .unwrap();
        review.try_into().unwrap()
    }

    pub const HCO: (&str, &str, &str, &str) =
        ("hco.kubevirt.io", "v1beta1", "HyperConverged", "hyperconvergeds");

    /// HyperConverged admission request
    pub fn hco_request(
        operation: Operation,
        object: Option<&HyperConverged>,
        old_object: Option<&HyperConverged>,
        dry_run: bool,
    ) -> AdmissionRequest<DynamicObject> {
        let as_value = |hc: &HyperConverged| {
            let mut value = serde_json::to_value(hc).unwrap();
            value["apiVersion"] = json!("hco.kubevirt.io/v1beta1");
            value["kind"] = json!("HyperConverged");
            value
        };
        request(HCO, operation, object.map(as_value), old_object.map(as_value), dry_run)
    }

    pub fn hc() -> HyperConverged {
        let mut hc = HyperConverged::new(HYPERCONVERGED_NAME, Default::default());
        hc.metadata.namespace = Some(NS.to_string());
        hc
    }

    /// Apply the patch of `response` to `object`
    pub fn patched(response: &AdmissionResponse, mut object: Value) -> Value {
        if let Some(patch) = &response.patch {
            let patch: json_patch::Patch = serde_json::from_slice(patch).unwrap();
            json_patch::patch(&mut object, &patch).unwrap();
        }
        object
    }
}
