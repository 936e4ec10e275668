//! Handlers for objects that only exist while a HyperConverged predicate holds

use async_trait::async_trait;
use tracing::info;

use super::client::{ObjectId, OperandClient};
use super::generic::GenericOperand;
use super::handler::{BuildContext, EnsureRequest, EnsureResult, Operand};
use super::labels;
use crate::crd::HyperConverged;
use crate::Error;

/// Whether an optional object should exist
pub type Predicate = fn(&HyperConverged) -> bool;

/// Deploys `inner` while `should_deploy` holds and removes it otherwise
///
/// Removal only touches objects carrying the managed-by label, so a
/// same-named object created by someone else survives.
pub struct ConditionalOperand {
    inner: GenericOperand,
    should_deploy: Predicate,
}

impl ConditionalOperand {
    /// Wrap `inner`
    pub fn new(inner: GenericOperand, should_deploy: Predicate) -> Self {
        Self { inner, should_deploy }
    }

    async fn ensure_deleted(
        &self,
        client: &dyn OperandClient,
        req: &EnsureRequest<'_>,
    ) -> EnsureResult {
        let api_resource = self.inner.api_resource();
        // built for addressing only
        let object = match self.inner.build(req.hc, req.ctx) {
            Ok(object) => object,
            Err(e) => return EnsureResult::new(api_resource, "").with_error(e),
        };
        let id = ObjectId::of(api_resource, &object);
        let mut result = EnsureResult::new(api_resource, &id.name);
        result.upgrade_done = true;

        let existing = match client.get(&id).await {
            Ok(existing) => existing,
            Err(e) => return result.with_error(e),
        };
        let Some(existing) = existing else {
            return result;
        };
        if !labels::is_managed(&existing.metadata) {
            return result;
        }

        info!(object = %id, "removing object that is no longer needed");
        match client.delete(&id, false).await {
            Ok(deleted) => {
                result.deleted = deleted;
                result.object = Some(existing);
                result
            }
            Err(e) => result.with_error(e),
        }
    }
}

#[async_trait]
impl Operand for ConditionalOperand {
    fn kind(&self) -> &str {
        self.inner.kind()
    }

    fn reports_conditions(&self) -> bool {
        self.inner.reports_conditions()
    }

    fn object_id(&self, hc: &HyperConverged, ctx: &BuildContext) -> Result<ObjectId, Error> {
        self.inner.object_id(hc, ctx)
    }

    async fn ensure(&self, client: &dyn OperandClient, req: &EnsureRequest<'_>) -> EnsureResult {
        if (self.should_deploy)(req.hc) {
            self.inner.ensure(client, req).await
        } else {
            self.ensure_deleted(client, req).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::HyperConvergedSpec;
    use crate::operands::fake::FakeOperandClient;
    use crate::operands::generic::{managed_object, UpdateHooks};
    use crate::operands::handler::BuildContext;
    use crate::operands::labels::{Component, MANAGED_BY_LABEL};
    use crate::Error;
    use k8s_openapi::api::core::v1::ServiceAccount;
    use kube::api::{ApiResource, DynamicObject};

    fn sa_ar() -> ApiResource {
        ApiResource::erase::<ServiceAccount>(&())
    }

    fn build(hc: &HyperConverged, ctx: &BuildContext) -> Result<DynamicObject, Error> {
        Ok(managed_object(&sa_ar(), "optional-sa", true, hc, ctx, Component::Compute))
    }

    fn deploy_when_tuned(hc: &HyperConverged) -> bool {
        hc.spec.tuning_policy.is_some()
    }

    fn operand() -> ConditionalOperand {
        ConditionalOperand::new(
            GenericOperand::new(sa_ar(), build, UpdateHooks::Fields(&[])),
            deploy_when_tuned,
        )
    }

    fn hc(tuned: bool) -> HyperConverged {
        let mut hc = HyperConverged::new("kubevirt-hyperconverged", HyperConvergedSpec::default());
        hc.metadata.namespace = Some("kubevirt-hyperconverged".to_string());
        if tuned {
            hc.spec.tuning_policy = Some(crate::crd::TuningPolicy::HighBurst);
        }
        hc
    }

    fn id() -> ObjectId {
        ObjectId::new(sa_ar(), Some("kubevirt-hyperconverged"), "optional-sa")
    }

    #[tokio::test]
    async fn deploys_then_removes_when_predicate_flips() {
        let client = FakeOperandClient::new();
        let ctx = BuildContext::for_testing("kubevirt-hyperconverged");

        let on = hc(true);
        let result = operand()
            .ensure(&client, &EnsureRequest { hc: &on, ctx: &ctx, hco_triggered: true })
            .await;
        assert!(result.created);
        assert!(client.stored(&id()).is_some());

        let off = hc(false);
        let result = operand()
            .ensure(&client, &EnsureRequest { hc: &off, ctx: &ctx, hco_triggered: true })
            .await;
        assert!(result.deleted);
        assert!(result.is_ok());
        assert!(client.stored(&id()).is_none());
    }

    #[tokio::test]
    async fn unmanaged_object_is_left_alone() {
        let client = FakeOperandClient::new();
        let ctx = BuildContext::for_testing("kubevirt-hyperconverged");
        let mut foreign = build(&hc(false), &ctx).unwrap();
        foreign.metadata.labels.as_mut().unwrap().remove(MANAGED_BY_LABEL);
        client.insert(&sa_ar(), foreign);

        let off = hc(false);
        let result = operand()
            .ensure(&client, &EnsureRequest { hc: &off, ctx: &ctx, hco_triggered: false })
            .await;
        assert!(!result.deleted);
        assert!(client.stored(&id()).is_some());
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn absent_object_is_a_no_op() {
        let client = FakeOperandClient::new();
        let ctx = BuildContext::for_testing("kubevirt-hyperconverged");
        let off = hc(false);
        let result = operand()
            .ensure(&client, &EnsureRequest { hc: &off, ctx: &ctx, hco_triggered: false })
            .await;
        assert!(result.is_ok());
        assert!(!result.deleted && !result.created);
        assert_eq!(client.len(), 0);
    }
}
