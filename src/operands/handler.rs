//! The operand abstraction shared by every managed object

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::{ApiResource, DynamicObject};
use kube::ResourceExt;

use super::client::{ObjectId, OperandClient};
use crate::config::{ComponentImages, OperatorConfig, Versions};
use crate::crd::{HyperConverged, TlsSecurityProfile};
use crate::Error;

/// Cluster facts and process configuration the builders need besides the
/// HyperConverged resource itself
#[derive(Clone, Debug, Default)]
pub struct BuildContext {
    /// Namespace of the HyperConverged resource and of namespaced objects
    pub namespace: String,
    /// Operator and operand versions
    pub versions: Versions,
    /// Optional component images
    pub images: ComponentImages,
    /// Whether the cluster has more than one worker node
    pub infrastructure_highly_available: bool,
    /// Architectures of the control-plane nodes
    pub control_plane_architectures: Vec<String>,
    /// Architectures of the workload nodes
    pub workload_architectures: Vec<String>,
    /// Effective TLS profile; `None` means Intermediate
    pub tls_security_profile: Option<TlsSecurityProfile>,
}

impl BuildContext {
    /// Context with the operator configuration and no cluster facts yet
    pub fn from_config(config: &OperatorConfig) -> Self {
        Self {
            namespace: config.namespace.clone(),
            versions: config.versions.clone(),
            images: config.images.clone(),
            ..Default::default()
        }
    }

    /// Context used by unit tests: highly available, single architecture
    #[cfg(test)]
    pub fn for_testing(namespace: &str) -> Self {
        Self {
            infrastructure_highly_available: true,
            control_plane_architectures: vec!["amd64".to_string()],
            workload_architectures: vec!["amd64".to_string()],
            ..Self::from_config(&OperatorConfig::for_testing(namespace))
        }
    }
}

/// One request to bring a managed object in line with the HyperConverged resource
pub struct EnsureRequest<'a> {
    /// The HyperConverged resource, with the status computed so far
    pub hc: &'a HyperConverged,
    /// Build inputs
    pub ctx: &'a BuildContext,
    /// The reconcile was caused by a change of the HyperConverged resource;
    /// drift corrected in this pass is not counted as an overwrite
    pub hco_triggered: bool,
}

/// Outcome of one ensure call
#[derive(Debug, Default)]
pub struct EnsureResult {
    /// `apiVersion` of the object
    pub api_version: String,
    /// Kind of the object
    pub kind: String,
    /// Object name
    pub name: String,
    /// The object did not exist and was created
    pub created: bool,
    /// The object existed and was updated
    pub updated: bool,
    /// The update reverted a change not made through the HyperConverged resource
    pub overwritten: bool,
    /// The object was removed because its predicate no longer holds
    pub deleted: bool,
    /// The operand reports the expected version
    pub upgrade_done: bool,
    /// Failure of this object only
    pub err: Option<Error>,
    /// The object as stored after the call
    pub object: Option<DynamicObject>,
}

impl EnsureResult {
    /// Empty result for `name` of kind `api_resource`
    pub fn new(api_resource: &ApiResource, name: impl Into<String>) -> Self {
        Self {
            api_version: api_resource.api_version.clone(),
            kind: api_resource.kind.clone(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Mark the result as failed
    pub fn with_error(mut self, err: Error) -> Self {
        self.err = Some(err);
        self
    }

    /// Whether the call succeeded
    pub fn is_ok(&self) -> bool {
        self.err.is_none()
    }

    /// Reference to the object for `status.relatedObjects`
    pub fn object_reference(&self) -> ObjectReference {
        let meta = self.object.as_ref().map(|o| &o.metadata);
        ObjectReference {
            api_version: Some(self.api_version.clone()),
            kind: Some(self.kind.clone()),
            name: Some(self.name.clone()),
            namespace: meta.and_then(|m| m.namespace.clone()),
            uid: self.object.as_ref().and_then(|o| o.uid()),
            resource_version: self.object.as_ref().and_then(|o| o.resource_version()),
            ..Default::default()
        }
    }
}

/// A managed object (or the absence of one)
#[async_trait]
pub trait Operand: Send + Sync {
    /// Kind of the managed object
    fn kind(&self) -> &str;

    /// Whether the object's own conditions feed the HyperConverged conditions
    fn reports_conditions(&self) -> bool {
        false
    }

    /// Address of the object managed for `hc`
    fn object_id(&self, hc: &HyperConverged, ctx: &BuildContext) -> Result<ObjectId, Error>;

    /// Create, update or delete the object so it matches `req.hc`
    async fn ensure(&self, client: &dyn OperandClient, req: &EnsureRequest<'_>) -> EnsureResult;
}
