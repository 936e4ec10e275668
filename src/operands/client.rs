//! Kubernetes access for managed objects
//!
//! Every managed object is handled as a `DynamicObject` addressed by its
//! `ApiResource`, so one client covers operand CRs, RBAC, workloads and
//! webhook configurations alike.

use async_trait::async_trait;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, PostParams};
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::Error;

/// Field manager recorded on every write
pub const FIELD_MANAGER: &str = "hyperconverged-operator";

/// Address of one object
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectId {
    /// Kind of the object
    pub api_resource: ApiResource,
    /// Namespace, `None` for cluster-scoped kinds
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ObjectId {
    /// Address built from its parts
    pub fn new(
        api_resource: ApiResource,
        namespace: Option<&str>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_resource,
            namespace: namespace.map(str::to_string),
            name: name.into(),
        }
    }

    /// Address of `object`
    pub fn of(api_resource: &ApiResource, object: &DynamicObject) -> Self {
        Self {
            api_resource: api_resource.clone(),
            namespace: object.metadata.namespace.clone(),
            name: object.name_any(),
        }
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.api_resource.kind, ns, self.name),
            None => write!(f, "{} {}", self.api_resource.kind, self.name),
        }
    }
}

/// Trait abstracting reads and writes of managed objects
///
/// `replace` and `delete` take a `dry_run` flag so the validating webhook
/// can ask the API server (and the operand webhooks behind it) whether a
/// change would be accepted without persisting it.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OperandClient: Send + Sync {
    /// Fetch an object; `Ok(None)` when it does not exist
    async fn get(&self, id: &ObjectId) -> Result<Option<DynamicObject>, Error>;

    /// Create an object
    async fn create(&self, api_resource: &ApiResource, object: &DynamicObject)
        -> Result<DynamicObject, Error>;

    /// Replace an existing object; `object` must carry the current resourceVersion
    async fn replace(
        &self,
        api_resource: &ApiResource,
        object: &DynamicObject,
        dry_run: bool,
    ) -> Result<DynamicObject, Error>;

    /// Delete an object; `Ok(false)` when it was already gone
    async fn delete(&self, id: &ObjectId, dry_run: bool) -> Result<bool, Error>;
}

/// Production client backed by the Kubernetes API
pub struct KubeOperandClient {
    client: Client,
}

impl KubeOperandClient {
    /// Create a client from a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, api_resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, api_resource),
            None => Api::all_with(self.client.clone(), api_resource),
        }
    }
}

#[async_trait]
impl OperandClient for KubeOperandClient {
    async fn get(&self, id: &ObjectId) -> Result<Option<DynamicObject>, Error> {
        let api = self.api(&id.api_resource, id.namespace.as_deref());
        Ok(api.get_opt(&id.name).await?)
    }

    async fn create(
        &self,
        api_resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let api = self.api(api_resource, object.metadata.namespace.as_deref());
        let params = PostParams {
            dry_run: false,
            field_manager: Some(FIELD_MANAGER.to_string()),
        };
        Ok(api.create(&params, object).await?)
    }

    async fn replace(
        &self,
        api_resource: &ApiResource,
        object: &DynamicObject,
        dry_run: bool,
    ) -> Result<DynamicObject, Error> {
        let api = self.api(api_resource, object.metadata.namespace.as_deref());
        let params = PostParams {
            dry_run,
            field_manager: Some(FIELD_MANAGER.to_string()),
        };
        Ok(api.replace(&object.name_any(), &params, object).await?)
    }

    async fn delete(&self, id: &ObjectId, dry_run: bool) -> Result<bool, Error> {
        let api = self.api(&id.api_resource, id.namespace.as_deref());
        let params = DeleteParams {
            dry_run,
            ..DeleteParams::background()
        };
        match api.delete(&id.name, &params).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(object = %id, "object already gone");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
