//! Cluster topology oracle
//!
//! Watches the node list and derives what the rest of the operator needs to
//! know about the cluster: whether the control plane and the infrastructure
//! are highly available, which CPU architectures the control plane and the
//! workload nodes run, and which CPU models are worth recommending.
//!
//! [`NodeInfo`] is shared between the reconciler (the only writer) and the
//! webhooks/metrics (readers). Every refresh reports whether anything
//! changed so the reconciler can requeue.

pub mod affinity;
pub mod cpu_models;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::crd::{CpuModelInfo, HyperConverged, NodeInfoStatus, NodePlacement};
use crate::Error;

pub use affinity::{validate_affinity, RequiredNodeAffinity};
pub use cpu_models::CpuModelWeights;

/// Control-plane role label
pub const LABEL_NODE_ROLE_CONTROL_PLANE: &str = "node-role.kubernetes.io/control-plane";
/// Legacy control-plane role label
pub const LABEL_NODE_ROLE_MASTER: &str = "node-role.kubernetes.io/master";
/// Worker role label
pub const LABEL_NODE_ROLE_WORKER: &str = "node-role.kubernetes.io/worker";
/// Arbiter role label (two-node control planes)
pub const LABEL_NODE_ROLE_ARBITER: &str = "node-role.kubernetes.io/arbiter";

/// Trait abstracting node listing for testability
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// List every node of the cluster
    async fn list_nodes(&self) -> Result<Vec<Node>, Error>;
}

/// Production node client
pub struct KubeNodeClient {
    client: Client,
}

impl KubeNodeClient {
    /// Create a node client from a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeClient for KubeNodeClient {
    async fn list_nodes(&self) -> Result<Vec<Node>, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }
}

#[derive(Debug, Default)]
struct Architectures {
    control_plane: Vec<String>,
    workloads: Vec<String>,
}

/// Derived topology of the cluster
#[derive(Debug, Default)]
pub struct NodeInfo {
    control_plane_highly_available: AtomicBool,
    control_plane_node_exists: AtomicBool,
    infrastructure_highly_available: AtomicBool,
    architectures: RwLock<Architectures>,
    cpu_models: RwLock<Vec<CpuModelInfo>>,
    weights: CpuModelWeights,
}

fn has_label(node: &Node, label: &str) -> bool {
    node.metadata
        .labels
        .as_ref()
        .is_some_and(|l| l.contains_key(label))
}

fn is_worker(node: &Node) -> bool {
    has_label(node, LABEL_NODE_ROLE_WORKER)
}

fn is_control_plane(node: &Node) -> bool {
    has_label(node, LABEL_NODE_ROLE_CONTROL_PLANE) || has_label(node, LABEL_NODE_ROLE_MASTER)
}

fn architecture(node: &Node) -> &str {
    node.status
        .as_ref()
        .and_then(|s| s.node_info.as_ref())
        .map(|i| i.architecture.as_str())
        .unwrap_or_default()
}

impl NodeInfo {
    /// Create an empty oracle scoring CPU models with `weights`
    pub fn new(weights: CpuModelWeights) -> Self {
        Self {
            weights,
            ..Default::default()
        }
    }

    /// List the nodes and recompute the topology for `hc`
    ///
    /// Returns whether any derived value changed. A list failure leaves the
    /// cached values untouched.
    pub async fn refresh(
        &self,
        client: &dyn NodeClient,
        hc: &HyperConverged,
    ) -> Result<bool, Error> {
        debug!("reading cluster nodes");
        let nodes = client
            .list_nodes()
            .await
            .map_err(|e| Error::internal(format!("failed to read the cluster nodes; {e}")))?;
        Ok(self.process(&nodes, hc.spec.workloads.node_placement.as_ref()))
    }

    /// Recompute the topology from a node list
    ///
    /// Workload architectures are taken from the nodes matching the
    /// workload placement when it carries a selector or a required
    /// affinity, and from the worker nodes otherwise.
    pub fn process(&self, nodes: &[Node], workload_placement: Option<&NodePlacement>) -> bool {
        let matcher = workload_placement
            .map(|p| RequiredNodeAffinity::new(p.node_selector.as_ref(), p.affinity.as_ref()))
            .filter(|m| !m.is_empty());

        let mut workers = 0usize;
        let mut control_planes = 0usize;
        let mut arbiters = 0usize;
        let mut workload_archs = BTreeSet::new();
        let mut cp_archs = BTreeSet::new();

        for node in nodes {
            let arch = architecture(node);
            if is_worker(node) {
                workers += 1;
            }

            let is_workload = match &matcher {
                // the webhook validates placements, so a matcher error only
                // means the node cannot run workloads
                Some(m) => m.matches(node).unwrap_or(false),
                None => is_worker(node),
            };
            if is_workload && !arch.is_empty() {
                workload_archs.insert(arch.to_string());
            }

            if is_control_plane(node) {
                control_planes += 1;
                if !arch.is_empty() {
                    cp_archs.insert(arch.to_string());
                }
            }

            if has_label(node, LABEL_NODE_ROLE_ARBITER) {
                arbiters += 1;
            }
        }

        let mut changed = swap(
            &self.control_plane_highly_available,
            control_planes >= 3 || (control_planes >= 2 && arbiters >= 1),
        );
        changed |= swap(&self.control_plane_node_exists, control_planes >= 1);
        changed |= swap(&self.infrastructure_highly_available, workers >= 2);

        {
            let mut archs = self.architectures.write();
            let workload_archs: Vec<String> = workload_archs.into_iter().collect();
            let cp_archs: Vec<String> = cp_archs.into_iter().collect();
            if archs.workloads != workload_archs {
                archs.workloads = workload_archs;
                changed = true;
            }
            if archs.control_plane != cp_archs {
                archs.control_plane = cp_archs;
                changed = true;
            }
        }

        let models = cpu_models::recommend(nodes, &self.weights);
        {
            let mut current = self.cpu_models.write();
            if *current != models {
                *current = models;
                changed = true;
            }
        }

        if changed {
            info!(
                nodes = nodes.len(),
                control_planes,
                workers,
                "cluster topology changed"
            );
        }
        changed
    }

    /// At least three control-plane nodes, or two plus an arbiter
    pub fn is_control_plane_highly_available(&self) -> bool {
        self.control_plane_highly_available.load(Ordering::SeqCst)
    }

    /// At least one control-plane node
    pub fn control_plane_node_exists(&self) -> bool {
        self.control_plane_node_exists.load(Ordering::SeqCst)
    }

    /// At least two worker nodes
    pub fn is_infrastructure_highly_available(&self) -> bool {
        self.infrastructure_highly_available.load(Ordering::SeqCst)
    }

    /// Sorted architectures of the control-plane nodes
    pub fn control_plane_architectures(&self) -> Vec<String> {
        self.architectures.read().control_plane.clone()
    }

    /// Sorted architectures of the nodes that may run workloads
    pub fn workload_architectures(&self) -> Vec<String> {
        self.architectures.read().workloads.clone()
    }

    /// Recommended CPU models, best first
    pub fn recommended_cpu_models(&self) -> Vec<CpuModelInfo> {
        self.cpu_models.read().clone()
    }

    /// Snapshot for `status.nodeInfo`
    pub fn status(&self) -> NodeInfoStatus {
        let archs = self.architectures.read();
        NodeInfoStatus {
            control_plane_architectures: archs.control_plane.clone(),
            workloads_architectures: archs.workloads.clone(),
            recommended_cpu_models: self.recommended_cpu_models(),
        }
    }
}

fn swap(flag: &AtomicBool, value: bool) -> bool {
    flag.swap(value, Ordering::SeqCst) != value
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeStatus, NodeSystemInfo};
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn node(name: &str, arch: &str, roles: &[&str]) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    roles
                        .iter()
                        .map(|r| (r.to_string(), String::new()))
                        .collect(),
                ),
                ..Default::default()
            },
            status: Some(NodeStatus {
                node_info: Some(NodeSystemInfo {
                    architecture: arch.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn cluster() -> Vec<Node> {
        vec![
            node("cp1", "amd64", &[LABEL_NODE_ROLE_CONTROL_PLANE]),
            node("cp2", "amd64", &[LABEL_NODE_ROLE_MASTER]),
            node("cp3", "arm64", &[LABEL_NODE_ROLE_CONTROL_PLANE, LABEL_NODE_ROLE_MASTER]),
            node("w1", "amd64", &[LABEL_NODE_ROLE_WORKER]),
            node("w2", "s390x", &[LABEL_NODE_ROLE_WORKER]),
        ]
    }

    #[test]
    fn derives_high_availability_and_architectures() {
        let info = NodeInfo::default();
        assert!(info.process(&cluster(), None));

        assert!(info.is_control_plane_highly_available());
        assert!(info.control_plane_node_exists());
        assert!(info.is_infrastructure_highly_available());
        assert_eq!(info.control_plane_architectures(), vec!["amd64", "arm64"]);
        assert_eq!(info.workload_architectures(), vec!["amd64", "s390x"]);
    }

    #[test]
    fn second_pass_reports_no_change() {
        let info = NodeInfo::default();
        assert!(info.process(&cluster(), None));
        assert!(!info.process(&cluster(), None));
    }

    #[test]
    fn node_with_both_roles_counts_once() {
        let nodes = vec![
            node("cp1", "amd64", &[LABEL_NODE_ROLE_CONTROL_PLANE, LABEL_NODE_ROLE_MASTER]),
            node("cp2", "amd64", &[LABEL_NODE_ROLE_CONTROL_PLANE, LABEL_NODE_ROLE_MASTER]),
        ];
        let info = NodeInfo::default();
        info.process(&nodes, None);
        assert!(!info.is_control_plane_highly_available());
    }

    #[test]
    fn arbiter_completes_two_node_control_plane() {
        let nodes = vec![
            node("cp1", "amd64", &[LABEL_NODE_ROLE_CONTROL_PLANE]),
            node("cp2", "amd64", &[LABEL_NODE_ROLE_CONTROL_PLANE]),
            node("arb", "amd64", &[LABEL_NODE_ROLE_ARBITER]),
        ];
        let info = NodeInfo::default();
        info.process(&nodes, None);
        assert!(info.is_control_plane_highly_available());
    }

    #[test]
    fn single_node_cluster_is_not_highly_available() {
        let nodes = vec![node(
            "sno",
            "amd64",
            &[LABEL_NODE_ROLE_CONTROL_PLANE, LABEL_NODE_ROLE_WORKER],
        )];
        let info = NodeInfo::default();
        info.process(&nodes, None);
        assert!(!info.is_control_plane_highly_available());
        assert!(!info.is_infrastructure_highly_available());
        assert_eq!(info.workload_architectures(), vec!["amd64"]);
    }

    #[test]
    fn workload_placement_selects_nodes() {
        let mut nodes = cluster();
        nodes[2]
            .metadata
            .labels
            .as_mut()
            .unwrap()
            .insert("vms".to_string(), "yes".to_string());
        let placement = NodePlacement {
            node_selector: Some(BTreeMap::from([("vms".to_string(), "yes".to_string())])),
            ..Default::default()
        };

        let info = NodeInfo::default();
        info.process(&nodes, Some(&placement));
        assert_eq!(info.workload_architectures(), vec!["arm64"]);
    }

    #[test]
    fn empty_architectures_are_dropped() {
        let nodes = vec![
            node("w1", "", &[LABEL_NODE_ROLE_WORKER]),
            node("w2", "amd64", &[LABEL_NODE_ROLE_WORKER]),
        ];
        let info = NodeInfo::default();
        info.process(&nodes, None);
        assert_eq!(info.workload_architectures(), vec!["amd64"]);
    }

    #[tokio::test]
    async fn list_failure_leaves_cache_untouched() {
        let info = NodeInfo::default();
        info.process(&cluster(), None);

        let mut client = MockNodeClient::new();
        client
            .expect_list_nodes()
            .returning(|| Err(Error::internal("connection refused")));

        let hc = HyperConverged::new("kubevirt-hyperconverged", Default::default());
        let err = info.refresh(&client, &hc).await.unwrap_err();
        assert!(err.to_string().contains("failed to read the cluster nodes"));
        assert!(info.is_infrastructure_highly_available());
        assert_eq!(info.workload_architectures(), vec!["amd64", "s390x"]);
    }

    #[tokio::test]
    async fn refresh_reads_nodes_through_client() {
        let mut client = MockNodeClient::new();
        client.expect_list_nodes().returning(|| Ok(cluster()));

        let info = NodeInfo::default();
        let hc = HyperConverged::new("kubevirt-hyperconverged", Default::default());
        assert!(info.refresh(&client, &hc).await.unwrap());
        assert!(!info.refresh(&client, &hc).await.unwrap());
        assert_eq!(info.status().control_plane_architectures, vec!["amd64", "arm64"]);
    }
}
