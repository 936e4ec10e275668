//! In-memory [`OperandClient`] for multi-call scenarios
//!
//! Mock expectations get unwieldy once a test reconciles a dozen objects
//! twice; this fake keeps a store keyed by kind, namespace and name, mimics
//! the API server's create/replace/delete rules and lets tests inject
//! failures per verb and kind.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject};
use kube::ResourceExt;

use super::client::{ObjectId, OperandClient};
use crate::Error;

type Key = (String, Option<String>, String);

/// Verb an injected failure applies to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    /// `get`
    Get,
    /// `create`
    Create,
    /// `replace`, dry-run or not
    Replace,
    /// `delete`, dry-run or not
    Delete,
}

struct Failure {
    verb: Verb,
    kind: String,
    code: u16,
    message: String,
}

/// In-memory object store
#[derive(Default)]
pub struct FakeOperandClient {
    objects: Mutex<BTreeMap<Key, DynamicObject>>,
    failures: Mutex<Vec<Failure>>,
    calls: Mutex<Vec<String>>,
}

fn key(api_resource: &ApiResource, namespace: Option<&str>, name: &str) -> Key {
    (
        format!("{}/{}", api_resource.api_version, api_resource.kind),
        namespace.map(str::to_string),
        name.to_string(),
    )
}

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::Kube(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

impl FakeOperandClient {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `object` as if it already existed in the cluster
    pub fn insert(&self, api_resource: &ApiResource, mut object: DynamicObject) {
        object.types = Some(kube::api::TypeMeta {
            api_version: api_resource.api_version.clone(),
            kind: api_resource.kind.clone(),
        });
        object.metadata.resource_version.get_or_insert_with(|| "1".to_string());
        let k = key(api_resource, object.metadata.namespace.as_deref(), &object.name_any());
        self.objects.lock().unwrap().insert(k, object);
    }

    /// Stored copy of an object
    pub fn stored(&self, id: &ObjectId) -> Option<DynamicObject> {
        let k = key(&id.api_resource, id.namespace.as_deref(), &id.name);
        self.objects.lock().unwrap().get(&k).cloned()
    }

    /// Change a stored object in place, bypassing the write rules
    pub fn modify(&self, id: &ObjectId, f: impl FnOnce(&mut DynamicObject)) {
        let k = key(&id.api_resource, id.namespace.as_deref(), &id.name);
        if let Some(object) = self.objects.lock().unwrap().get_mut(&k) {
            f(object);
        }
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Fail every `verb` on `kind` with an API error of `code`
    pub fn fail(&self, verb: Verb, kind: &str, code: u16, message: &str) {
        self.failures.lock().unwrap().push(Failure {
            verb,
            kind: kind.to_string(),
            code,
            message: message.to_string(),
        });
    }

    /// Drop every injected failure
    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    /// Write calls so far, as `"<verb> <Kind>/<name>"`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Forget the recorded calls
    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, verb: &str, kind: &str, name: &str) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{verb} {kind}/{name}"));
    }

    fn injected(&self, verb: Verb, kind: &str) -> Option<Error> {
        self.failures
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.verb == verb && f.kind == kind)
            .map(|f| api_error(f.code, "Invalid", f.message.clone()))
    }
}

#[async_trait]
impl OperandClient for FakeOperandClient {
    async fn get(&self, id: &ObjectId) -> Result<Option<DynamicObject>, Error> {
        if let Some(e) = self.injected(Verb::Get, &id.api_resource.kind) {
            return Err(e);
        }
        Ok(self.stored(id))
    }

    async fn create(
        &self,
        api_resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let name = object.name_any();
        if let Some(e) = self.injected(Verb::Create, &api_resource.kind) {
            return Err(e);
        }
        let k = key(api_resource, object.metadata.namespace.as_deref(), &name);
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&k) {
            return Err(api_error(
                409,
                "AlreadyExists",
                format!("{} {name} already exists", api_resource.kind),
            ));
        }
        let mut created = object.clone();
        created.metadata.resource_version = Some("1".to_string());
        objects.insert(k, created.clone());
        drop(objects);
        self.record("create", &api_resource.kind, &name);
        Ok(created)
    }

    async fn replace(
        &self,
        api_resource: &ApiResource,
        object: &DynamicObject,
        dry_run: bool,
    ) -> Result<DynamicObject, Error> {
        let name = object.name_any();
        if let Some(e) = self.injected(Verb::Replace, &api_resource.kind) {
            return Err(e);
        }
        let k = key(api_resource, object.metadata.namespace.as_deref(), &name);
        let mut objects = self.objects.lock().unwrap();
        let Some(current) = objects.get(&k) else {
            return Err(api_error(
                404,
                "NotFound",
                format!("{} {name} not found", api_resource.kind),
            ));
        };
        if dry_run {
            return Ok(object.clone());
        }
        let version = current
            .metadata
            .resource_version
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let mut replaced = object.clone();
        replaced.metadata.resource_version = Some((version + 1).to_string());
        objects.insert(k, replaced.clone());
        drop(objects);
        self.record("replace", &api_resource.kind, &name);
        Ok(replaced)
    }

    async fn delete(&self, id: &ObjectId, dry_run: bool) -> Result<bool, Error> {
        if let Some(e) = self.injected(Verb::Delete, &id.api_resource.kind) {
            return Err(e);
        }
        let k = key(&id.api_resource, id.namespace.as_deref(), &id.name);
        let mut objects = self.objects.lock().unwrap();
        if !objects.contains_key(&k) {
            return Ok(false);
        }
        if dry_run {
            return Ok(true);
        }
        objects.remove(&k);
        drop(objects);
        self.record("delete", &id.api_resource.kind, &id.name);
        Ok(true)
    }
}
