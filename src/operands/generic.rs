//! The generic create / update-if-drifted handler
//!
//! A [`GenericOperand`] pairs a builder (HyperConverged to desired object)
//! with the [`UpdateHooks`] variant that decides what "drifted" means for
//! the object's kind. Labels are always reconciled the same way: canonical
//! keys are enforced, every other label is kept.

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject, ObjectMeta};
use kube::Resource;
use serde_json::Value;
use tracing::{debug, info};

use super::client::{ObjectId, OperandClient};
use super::handler::{BuildContext, EnsureRequest, EnsureResult, Operand};
use super::labels::{self, Component};
use crate::config::Versions;
use crate::crd::HyperConverged;
use crate::Error;

/// Builds the desired object
pub type Builder = fn(&HyperConverged, &BuildContext) -> Result<DynamicObject, Error>;

/// Kind-specific comparison and merge rules
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateHooks {
    /// `.spec` must equal the required one and is overwritten verbatim
    Spec,
    /// Like `Spec`; additionally the presence of the named annotation must
    /// match the required object
    SpecWithAnnotation(&'static str),
    /// The listed top-level fields must equal the required ones
    Fields(&'static [&'static str]),
    /// Like `Fields` for kinds whose fields are immutable: drift is fixed
    /// by deleting and re-creating the object
    Recreate(&'static [&'static str]),
    /// `.spec` must contain the required one; fields defaulted by the API
    /// server are tolerated
    Workload,
    /// Like `Workload`; the allocated cluster IPs survive an overwrite
    Service,
    /// `.webhooks` compared without the CA bundle injected by cert-manager
    WebhookConfiguration,
}

const CA_BUNDLE: &str = "caBundle";
const ALLOCATED_SERVICE_FIELDS: [&str; 4] =
    ["clusterIP", "clusterIPs", "ipFamilies", "ipFamilyPolicy"];

impl UpdateHooks {
    /// Bring `existing` in line with `required`; returns whether anything changed
    pub fn reconcile(&self, existing: &mut DynamicObject, required: &DynamicObject) -> bool {
        let mut changed = false;

        let required_labels = required.metadata.labels.as_ref();
        if !labels::contains_all(existing.metadata.labels.as_ref(), required_labels) {
            labels::merge(&mut existing.metadata, required.metadata.labels.as_ref());
            changed = true;
        }
        if !annotations_contained(&existing.metadata, &required.metadata) {
            let annotations = existing.metadata.annotations.get_or_insert_with(BTreeMap::new);
            for (k, v) in required.metadata.annotations.iter().flatten() {
                annotations.insert(k.clone(), v.clone());
            }
            changed = true;
        }

        match self {
            Self::Spec => changed |= overwrite_if_different(existing, required, "spec"),
            Self::SpecWithAnnotation(key) => {
                let wanted = has_annotation(&required.metadata, key);
                if has_annotation(&existing.metadata, key) != wanted {
                    if let Some(annotations) = existing.metadata.annotations.as_mut() {
                        annotations.remove(*key);
                    }
                    changed = true;
                }
                changed |= overwrite_if_different(existing, required, "spec");
            }
            Self::Fields(fields) | Self::Recreate(fields) => {
                for field in fields.iter() {
                    changed |= overwrite_if_different(existing, required, field);
                }
            }
            Self::Workload => {
                if !contains(&existing.data["spec"], &required.data["spec"]) {
                    existing.data["spec"] = required.data["spec"].clone();
                    changed = true;
                }
            }
            Self::Service => {
                if !contains(&existing.data["spec"], &required.data["spec"]) {
                    let mut spec = required.data["spec"].clone();
                    for field in ALLOCATED_SERVICE_FIELDS {
                        if let Some(value) = existing.data["spec"].get(field) {
                            spec[field] = value.clone();
                        }
                    }
                    existing.data["spec"] = spec;
                    changed = true;
                }
            }
            Self::WebhookConfiguration => {
                let current = &existing.data["webhooks"];
                if without_ca_bundles(current) != without_ca_bundles(&required.data["webhooks"]) {
                    let mut webhooks = required.data["webhooks"].clone();
                    if let (Some(wanted), Some(found)) =
                        (webhooks.as_array_mut(), current.as_array())
                    {
                        for (w, f) in wanted.iter_mut().zip(found) {
                            if let Some(ca) = f["clientConfig"].get(CA_BUNDLE) {
                                w["clientConfig"][CA_BUNDLE] = ca.clone();
                            }
                        }
                    }
                    existing.data["webhooks"] = webhooks;
                    changed = true;
                }
            }
        }
        changed
    }
}

fn has_annotation(meta: &ObjectMeta, key: &str) -> bool {
    meta.annotations.as_ref().is_some_and(|a| a.contains_key(key))
}

fn annotations_contained(existing: &ObjectMeta, required: &ObjectMeta) -> bool {
    required
        .annotations
        .iter()
        .flatten()
        .all(|(k, v)| existing.annotations.as_ref().and_then(|a| a.get(k)) == Some(v))
}

fn overwrite_if_different(
    existing: &mut DynamicObject,
    required: &DynamicObject,
    field: &str,
) -> bool {
    let wanted = required.data.get(field);
    if existing.data.get(field) == wanted {
        return false;
    }
    match wanted {
        Some(value) => existing.data[field] = value.clone(),
        None => {
            if let Some(map) = existing.data.as_object_mut() {
                map.remove(field);
            }
        }
    }
    true
}

fn without_ca_bundles(webhooks: &Value) -> Value {
    let mut webhooks = webhooks.clone();
    for webhook in webhooks.as_array_mut().into_iter().flatten() {
        if let Some(config) = webhook.get_mut("clientConfig").and_then(Value::as_object_mut) {
            config.remove(CA_BUNDLE);
        }
    }
    webhooks
}

/// Whether `existing` holds every value of `required`
///
/// Objects may carry extra keys; arrays must have the same length and
/// contain each other element-wise. A required `null` matches a missing key.
pub fn contains(existing: &Value, required: &Value) -> bool {
    match (existing, required) {
        (_, Value::Null) => existing.is_null(),
        (Value::Object(e), Value::Object(r)) => r.iter().all(|(k, rv)| match e.get(k) {
            Some(ev) => contains(ev, rv),
            None => rv.is_null(),
        }),
        (Value::Array(e), Value::Array(r)) => {
            e.len() == r.len() && e.iter().zip(r).all(|(ev, rv)| contains(ev, rv))
        }
        _ => existing == required,
    }
}

/// Drop `null` members recursively; the API server never stores them
pub fn strip_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(strip_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_nulls),
        _ => {}
    }
}

/// Skeleton of a managed object: type, name, namespace and canonical labels
///
/// Objects in the HyperConverged namespace are owned by it, so they are
/// garbage collected with it.
pub fn managed_object(
    api_resource: &ApiResource,
    name: &str,
    namespaced: bool,
    hc: &HyperConverged,
    ctx: &BuildContext,
    component: Component,
) -> DynamicObject {
    let mut object = DynamicObject::new(name, api_resource);
    if namespaced {
        object.metadata.namespace = Some(ctx.namespace.clone());
        if hc.metadata.namespace.as_deref() == Some(ctx.namespace.as_str()) {
            object.metadata.owner_references = hc.controller_owner_ref(&()).map(|r| vec![r]);
        }
    }
    object.metadata.labels = Some(labels::canonical(hc.name(), component, &ctx.versions.operator));
    object
}

/// Reads the version an operand reports, to tell when an upgrade completed
#[derive(Clone, Copy, Debug)]
pub struct UpgradeProbe {
    /// Field of `.status` holding the observed version
    pub status_field: &'static str,
    /// Version the operator ships
    pub expected: fn(&Versions) -> &str,
}

impl UpgradeProbe {
    fn done(&self, object: &DynamicObject, versions: &Versions) -> bool {
        let expected = (self.expected)(versions);
        !expected.is_empty() && object.data["status"][self.status_field].as_str() == Some(expected)
    }
}

/// Handler creating the object when missing and correcting drift otherwise
pub struct GenericOperand {
    api_resource: ApiResource,
    builder: Builder,
    hooks: UpdateHooks,
    reports_conditions: bool,
    upgrade_probe: Option<UpgradeProbe>,
}

impl GenericOperand {
    /// Handler for objects of `api_resource` built by `builder`
    pub fn new(api_resource: ApiResource, builder: Builder, hooks: UpdateHooks) -> Self {
        Self {
            api_resource,
            builder,
            hooks,
            reports_conditions: false,
            upgrade_probe: None,
        }
    }

    /// Feed the object's conditions into the HyperConverged conditions and
    /// track its reported version
    pub fn with_conditions(mut self, probe: UpgradeProbe) -> Self {
        self.reports_conditions = true;
        self.upgrade_probe = Some(probe);
        self
    }

    /// Kind of the managed object
    pub fn api_resource(&self) -> &ApiResource {
        &self.api_resource
    }

    /// Desired object, with `null`s removed
    pub fn build(&self, hc: &HyperConverged, ctx: &BuildContext) -> Result<DynamicObject, Error> {
        let mut object = (self.builder)(hc, ctx)?;
        strip_nulls(&mut object.data);
        Ok(object)
    }
}

impl GenericOperand {
    /// Submit the object built from `hc` as a dry-run update of the stored one
    ///
    /// Fails when the object cannot be built, does not exist, or the API
    /// server (including the operand's own admission) rejects it.
    pub async fn dry_run_update(
        &self,
        client: &dyn OperandClient,
        hc: &HyperConverged,
        ctx: &BuildContext,
    ) -> Result<(), Error> {
        let required = self.build(hc, ctx)?;
        let id = ObjectId::of(&self.api_resource, &required);
        let mut desired = client
            .get(&id)
            .await?
            .ok_or_else(|| Error::not_found(&self.api_resource.kind, &id.name))?;
        self.hooks.reconcile(&mut desired, &required);
        client.replace(&self.api_resource, &desired, true).await?;
        debug!(object = %id, "dry-run update accepted");
        Ok(())
    }

    async fn recreate(
        &self,
        client: &dyn OperandClient,
        id: &ObjectId,
        desired: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        client.delete(id, false).await?;
        let mut fresh = desired.clone();
        fresh.metadata.resource_version = None;
        fresh.metadata.uid = None;
        fresh.metadata.creation_timestamp = None;
        fresh.metadata.managed_fields = None;
        client.create(&self.api_resource, &fresh).await
    }
}

#[async_trait]
impl Operand for GenericOperand {
    fn kind(&self) -> &str {
        &self.api_resource.kind
    }

    fn reports_conditions(&self) -> bool {
        self.reports_conditions
    }

    fn object_id(&self, hc: &HyperConverged, ctx: &BuildContext) -> Result<ObjectId, Error> {
        Ok(ObjectId::of(&self.api_resource, &self.build(hc, ctx)?))
    }

    async fn ensure(&self, client: &dyn OperandClient, req: &EnsureRequest<'_>) -> EnsureResult {
        let required = match self.build(req.hc, req.ctx) {
            Ok(object) => object,
            Err(e) => return EnsureResult::new(&self.api_resource, "").with_error(e),
        };
        let id = ObjectId::of(&self.api_resource, &required);
        let mut result = EnsureResult::new(&self.api_resource, &id.name);

        match client.get(&id).await {
            Err(e) => return result.with_error(e),
            Ok(None) => {
                info!(object = %id, "creating");
                match client.create(&self.api_resource, &required).await {
                    Ok(created) => {
                        result.created = true;
                        result.object = Some(created);
                    }
                    Err(e) => return result.with_error(e),
                }
            }
            Ok(Some(existing)) => {
                let mut desired = existing.clone();
                if self.hooks.reconcile(&mut desired, &required) {
                    if req.hco_triggered {
                        info!(object = %id, "updating to the new opinionated values");
                    } else {
                        info!(object = %id, "reverting an external modification");
                    }
                    let written = if matches!(self.hooks, UpdateHooks::Recreate(_)) {
                        self.recreate(client, &id, &desired).await
                    } else {
                        client.replace(&self.api_resource, &desired, false).await
                    };
                    match written {
                        Ok(updated) => {
                            result.updated = true;
                            result.overwritten = !req.hco_triggered;
                            result.object = Some(updated);
                        }
                        Err(e) => return result.with_error(e),
                    }
                } else {
                    debug!(object = %id, "up to date");
                    result.object = Some(existing);
                }
            }
        }

        result.upgrade_done = match (&self.upgrade_probe, &result.object) {
            (Some(probe), Some(object)) => probe.done(object, &req.ctx.versions),
            (Some(_), None) => false,
            (None, _) => true,
        };
        result
    }
}
