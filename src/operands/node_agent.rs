//! Node agent that enables swap-backed memory overcommit
//!
//! Deployed while `higherWorkloadDensity.memoryOvercommitPercentage` is
//! above 100, removed otherwise.

use k8s_openapi::api::apps::v1::DaemonSet;
use kube::api::{ApiResource, DynamicObject};
use serde_json::json;

use super::conditional::ConditionalOperand;
use super::generic::{managed_object, GenericOperand, UpdateHooks};
use super::handler::BuildContext;
use super::labels::{self, Component};
use super::placement::place_pods;
use super::rbac;
use crate::crd::v1beta1::DEFAULT_MEMORY_OVERCOMMIT_PERCENTAGE;
use crate::crd::HyperConverged;
use crate::Error;

/// Name of the daemon set and its container
pub const NAME: &str = "wasp-agent";
/// Service account the agent runs as
pub const SERVICE_ACCOUNT: &str = "wasp";
/// Cluster role (and binding) of the agent
pub const CLUSTER_ROLE: &str = "wasp-cluster";

const VERBOSITY: &str = "1";
const NODE_CRITICAL_PRIORITY_CLASS: &str = "system-node-critical";
const EGRESS_LABEL: &str = "hco.kubevirt.io/allow-access-cluster-services";

/// Whether the agent should run
pub fn should_deploy(hc: &HyperConverged) -> bool {
    hc.memory_overcommit_percentage() > DEFAULT_MEMORY_OVERCOMMIT_PERCENTAGE
}

/// Handlers of every object the agent needs, in creation order
pub fn operands() -> Vec<ConditionalOperand> {
    vec![
        ConditionalOperand::new(
            rbac::service_account_operand(build_service_account),
            should_deploy,
        ),
        ConditionalOperand::new(rbac::cluster_role_operand(build_cluster_role), should_deploy),
        ConditionalOperand::new(
            rbac::cluster_role_binding_operand(build_cluster_role_binding),
            should_deploy,
        ),
        ConditionalOperand::new(
            GenericOperand::new(
                ApiResource::erase::<DaemonSet>(&()),
                build_daemon_set,
                UpdateHooks::Workload,
            ),
            should_deploy,
        ),
    ]
}

fn build_service_account(hc: &HyperConverged, ctx: &BuildContext) -> Result<DynamicObject, Error> {
    Ok(rbac::service_account(SERVICE_ACCOUNT, hc, ctx, Component::NodeAgent))
}

fn build_cluster_role(hc: &HyperConverged, ctx: &BuildContext) -> Result<DynamicObject, Error> {
    let rules = json!([{"apiGroups": [""], "resources": ["pods"], "verbs": ["watch", "list"]}]);
    Ok(rbac::cluster_role(CLUSTER_ROLE, rules, hc, ctx, Component::NodeAgent))
}

fn build_cluster_role_binding(
    hc: &HyperConverged,
    ctx: &BuildContext,
) -> Result<DynamicObject, Error> {
    Ok(rbac::cluster_role_binding(CLUSTER_ROLE, SERVICE_ACCOUNT, hc, ctx, Component::NodeAgent))
}

/// Desired agent daemon set
pub fn build_daemon_set(hc: &HyperConverged, ctx: &BuildContext) -> Result<DynamicObject, Error> {
    let ar = ApiResource::erase::<DaemonSet>(&());
    let mut ds = managed_object(&ar, NAME, true, hc, ctx, Component::NodeAgent);

    let mut pod_labels = labels::canonical(hc.name(), Component::NodeAgent, &ctx.versions.operator);
    pod_labels.insert(EGRESS_LABEL.to_string(), "true".to_string());
    pod_labels.insert("name".to_string(), NAME.to_string());

    let mut pod_spec = json!({
        "serviceAccountName": SERVICE_ACCOUNT,
        "hostPID": true,
        "hostUsers": true,
        "terminationGracePeriodSeconds": 5,
        "priorityClassName": NODE_CRITICAL_PRIORITY_CLASS,
        "containers": [{
            "name": NAME,
            "image": ctx.images.wasp_agent,
            "imagePullPolicy": "IfNotPresent",
            "resources": {"requests": {"cpu": "100m", "memory": "50M"}},
            "securityContext": {"privileged": true},
            "env": [
                {"name": "VERBOSITY", "value": VERBOSITY},
                {"name": "NODE_NAME", "valueFrom": {"fieldRef": {"fieldPath": "spec.nodeName"}}},
            ],
            "volumeMounts": [
                {"name": "host", "mountPath": "/host"},
                {"name": "rootfs", "mountPath": "/rootfs"},
            ],
        }],
        "volumes": [
            {"name": "host", "hostPath": {"path": "/"}},
            {"name": "rootfs", "hostPath": {"path": "/"}},
        ],
    });
    place_pods(
        &mut pod_spec,
        hc,
        ctx.infrastructure_highly_available,
        &labels::selector(hc.name(), Component::NodeAgent),
    )?;

    ds.data = json!({
        "spec": {
            "selector": {"matchLabels": {"name": NAME}},
            "template": {
                "metadata": {"labels": pod_labels},
                "spec": pod_spec,
            },
        }
    });
    Ok(ds)
}
