//! Service accounts and cluster RBAC of the helper workloads

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use kube::api::{ApiResource, DynamicObject};
use serde_json::{json, Value};

use super::generic::{managed_object, GenericOperand, UpdateHooks};
use super::handler::BuildContext;
use super::labels::Component;
use crate::crd::HyperConverged;

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

/// A namespaced service account; nothing but labels is reconciled
pub fn service_account(
    name: &str,
    hc: &HyperConverged,
    ctx: &BuildContext,
    component: Component,
) -> DynamicObject {
    managed_object(&ApiResource::erase::<ServiceAccount>(&()), name, true, hc, ctx, component)
}

/// A cluster role with `rules`
pub fn cluster_role(
    name: &str,
    rules: Value,
    hc: &HyperConverged,
    ctx: &BuildContext,
    component: Component,
) -> DynamicObject {
    let ar = ApiResource::erase::<ClusterRole>(&());
    let mut role = managed_object(&ar, name, false, hc, ctx, component);
    role.data = json!({ "rules": rules });
    role
}

/// Binding of the cluster role `name` to the service account `service_account`
/// in the operator namespace; the binding shares the role's name
pub fn cluster_role_binding(
    name: &str,
    service_account: &str,
    hc: &HyperConverged,
    ctx: &BuildContext,
    component: Component,
) -> DynamicObject {
    let mut binding = managed_object(
        &ApiResource::erase::<ClusterRoleBinding>(&()),
        name,
        false,
        hc,
        ctx,
        component,
    );
    binding.data = json!({
        "roleRef": {"apiGroup": RBAC_GROUP, "kind": "ClusterRole", "name": name},
        "subjects": [{
            "kind": "ServiceAccount",
            "name": service_account,
            "namespace": ctx.namespace
        }],
    });
    binding
}

/// Handler type for service accounts
pub fn service_account_operand(builder: super::generic::Builder) -> GenericOperand {
    GenericOperand::new(
        ApiResource::erase::<ServiceAccount>(&()),
        builder,
        UpdateHooks::Fields(&[]),
    )
}

/// Handler type for cluster roles
pub fn cluster_role_operand(builder: super::generic::Builder) -> GenericOperand {
    GenericOperand::new(
        ApiResource::erase::<ClusterRole>(&()),
        builder,
        UpdateHooks::Fields(&["rules"]),
    )
}

/// Handler type for cluster role bindings; the role reference is immutable
pub fn cluster_role_binding_operand(builder: super::generic::Builder) -> GenericOperand {
    GenericOperand::new(
        ApiResource::erase::<ClusterRoleBinding>(&()),
        builder,
        UpdateHooks::Recreate(&["roleRef", "subjects"]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::HyperConvergedSpec;

    #[test]
    fn binding_targets_operator_namespace() {
        let hc = HyperConverged::new("kubevirt-hyperconverged", HyperConvergedSpec::default());
        let ctx = BuildContext::for_testing("hco-ns");
        let binding = cluster_role_binding("wasp-cluster", "wasp", &hc, &ctx, Component::NodeAgent);
        assert!(binding.metadata.namespace.is_none());
        assert_eq!(binding.data["roleRef"]["name"], "wasp-cluster");
        assert_eq!(binding.data["subjects"][0]["namespace"], "hco-ns");
        assert_eq!(binding.types.as_ref().map(|t| t.kind.as_str()), Some("ClusterRoleBinding"));
    }

    #[test]
    fn service_account_lives_in_operator_namespace() {
        let hc = HyperConverged::new("kubevirt-hyperconverged", HyperConvergedSpec::default());
        let ctx = BuildContext::for_testing("hco-ns");
        let sa = service_account("wasp", &hc, &ctx, Component::NodeAgent);
        assert_eq!(sa.metadata.namespace.as_deref(), Some("hco-ns"));
        assert_eq!(sa.data, Value::Null);
    }
}
