//! Validating webhook that keeps quota headroom for live migrations
//!
//! A live migration starts a second launcher pod for the VMI, so a namespace
//! under ResourceQuota needs room for one more copy of every migratable
//! launcher. Pod creations that would take that room away are denied with an
//! explanation. The check is opt-in: it only runs while the HyperConverged
//! resource carries the `kubevirt.io/capacity-validator` annotation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::Json;
use k8s_openapi::api::core::v1::{Container, Pod, ResourceQuota};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::{Client, ResourceExt};
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use super::{admission_request, decode, WebhookError, WebhookState};
use crate::operands::launcher_webhook::LAUNCHER_LABEL;
use crate::quantity::parse_quantity;
use crate::Error;

/// HyperConverged annotation that turns the check on
pub const CAPACITY_VALIDATOR_ANNOTATION: &str = "kubevirt.io/capacity-validator";
/// Label a migration target launcher carries, holding the migration's UID
pub const MIGRATION_JOB_LABEL: &str = "kubevirt.io/migrationJobUID";
/// Label naming the VMI a launcher runs
pub const VM_NAME_LABEL: &str = "vm.kubevirt.io/name";

const ALLOWED_MESSAGE: &str = "pod won't block migration creation is allowed";
const PREFIX: &str = "CapacityValidator";

/// Quota resources a pod is charged for
const POD_RESOURCES: [&str; 8] = [
    "pods",
    "count/pods",
    "cpu",
    "requests.cpu",
    "limits.cpu",
    "memory",
    "requests.memory",
    "limits.memory",
];

/// Namespace lookups of the capacity check
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CapacityClient: Send + Sync {
    /// Pods labelled as virt-launcher
    async fn launcher_pods(&self, namespace: &str) -> Result<Vec<Pod>, Error>;

    /// VirtualMachineInstanceMigrations
    async fn migrations(&self, namespace: &str) -> Result<Vec<DynamicObject>, Error>;

    /// VirtualMachineInstances
    async fn vmis(&self, namespace: &str) -> Result<Vec<DynamicObject>, Error>;

    /// ResourceQuotas
    async fn resource_quotas(&self, namespace: &str) -> Result<Vec<ResourceQuota>, Error>;
}

/// [`CapacityClient`] backed by the API server
pub struct KubeCapacityClient {
    client: Client,
}

impl KubeCapacityClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn list_kubevirt(
        &self,
        namespace: &str,
        kind: &str,
        plural: &str,
    ) -> Result<Vec<DynamicObject>, Error> {
        let gvk = GroupVersionKind::gvk("kubevirt.io", "v1", kind);
        let ar = ApiResource::from_gvk_with_plural(&gvk, plural);
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        Ok(api.list(&ListParams::default()).await?.items)
    }
}

#[async_trait]
impl CapacityClient for KubeCapacityClient {
    async fn launcher_pods(&self, namespace: &str) -> Result<Vec<Pod>, Error> {
        let (key, value) = LAUNCHER_LABEL;
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&format!("{key}={value}"));
        Ok(api.list(&params).await?.items)
    }

    async fn migrations(&self, namespace: &str) -> Result<Vec<DynamicObject>, Error> {
        self.list_kubevirt(
            namespace,
            "VirtualMachineInstanceMigration",
            "virtualmachineinstancemigrations",
        )
        .await
    }

    async fn vmis(&self, namespace: &str) -> Result<Vec<DynamicObject>, Error> {
        self.list_kubevirt(namespace, "VirtualMachineInstance", "virtualmachineinstances")
            .await
    }

    async fn resource_quotas(&self, namespace: &str) -> Result<Vec<ResourceQuota>, Error> {
        let api: Api<ResourceQuota> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }
}

/// Handle validating admission review for pod creation
pub async fn validate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Result<Json<AdmissionReview<DynamicObject>>, WebhookError> {
    let req = admission_request(body)?;
    Ok(Json(validate_capacity(&state, &req).await.into_review()))
}

fn allow(req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let mut response = AdmissionResponse::from(req);
    response.result.message = ALLOWED_MESSAGE.to_string();
    response
}

/// Admit a pod unless it would leave no quota for migrating the namespace's VMIs
#[instrument(skip_all, fields(pod = %req.name, namespace = ?req.namespace))]
pub async fn validate_capacity(
    state: &WebhookState,
    req: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    if !matches!(req.operation, Operation::Create) {
        return allow(req);
    }

    let enabled = match state.singleton().await {
        Ok(hc) => hc.is_some_and(|hc| hc.annotations().contains_key(CAPACITY_VALIDATOR_ANNOTATION)),
        Err(e) => {
            warn!(error = %e, "{PREFIX}: cannot get the HyperConverged resource");
            return AdmissionResponse::from(req).deny(e.to_string());
        }
    };
    if !enabled {
        debug!("{PREFIX}: not requested");
        return allow(req);
    }

    let pod: Pod = match decode(req.object.as_ref()) {
        Ok(pod) => pod,
        Err(e) => return AdmissionResponse::from(req).deny(e.to_string()),
    };
    let namespace = pod
        .metadata
        .namespace
        .clone()
        .or_else(|| req.namespace.clone())
        .unwrap_or_default();

    match check_capacity(state.capacity.as_ref(), &namespace, pod).await {
        Ok(None) => allow(req),
        Ok(Some(message)) => {
            info!("{message}");
            AdmissionResponse::from(req).deny(message)
        }
        Err(e) => {
            warn!(error = %e, "{PREFIX}: failed to check migration capacity");
            AdmissionResponse::from(req).deny(e.to_string())
        }
    }
}

/// The denial message for `pod`, or `None` when it leaves enough room
async fn check_capacity(
    client: &dyn CapacityClient,
    namespace: &str,
    pod: Pod,
) -> Result<Option<String>, Error> {
    let mut launchers = client.launcher_pods(namespace).await?;
    if is_launcher(&pod) {
        let migrations = client.migrations(namespace).await?;
        if is_migration_target(&pod, &migrations) {
            return Ok(None);
        }
        launchers.push(pod.clone());
    }

    // A VMI reports IsMigratable only once its launcher runs; until then it
    // counts as migratable.
    let vmis = client.vmis(namespace).await?;
    let launchers: Vec<Pod> = launchers
        .into_iter()
        .filter(|launcher| !is_terminal(launcher) && vmi_is_migratable(launcher, &vmis))
        .collect();
    if launchers.is_empty() {
        return Ok(None);
    }

    let quotas: Vec<Quota> = client
        .resource_quotas(namespace)
        .await?
        .iter()
        .filter_map(Quota::from_resource_quota)
        .collect();

    // Pods the quota itself refuses are left to the built-in quota admission
    let admitted = match charge(&quotas, &pod)? {
        Ok(admitted) => admitted,
        Err(_) => return Ok(None),
    };

    for launcher in &launchers {
        if let Err(violation) = charge(&admitted, launcher)? {
            return Ok(Some(format!(
                "{PREFIX}: Please be advised that creation of Pod:{} in the {namespace} namespace, \
                 may prevent migration of VMI:{} due to ResourceQuota constraints. In order to \
                 avoid encountering the following error message when attempting to migrate the \
                 VMI:\n\"{violation}\",you will need to increase the ResourceQuotas for the \
                 namespace. ",
                pod.name_any(),
                launcher.labels().get(VM_NAME_LABEL).map(String::as_str).unwrap_or_default(),
            )));
        }
    }
    Ok(None)
}

fn is_launcher(pod: &Pod) -> bool {
    let (key, value) = LAUNCHER_LABEL;
    pod.labels().get(key).is_some_and(|v| v == value)
}

fn is_migration_target(pod: &Pod, migrations: &[DynamicObject]) -> bool {
    let Some(job) = pod.labels().get(MIGRATION_JOB_LABEL) else {
        return false;
    };
    migrations
        .iter()
        .any(|m| m.metadata.uid.as_deref() == Some(job.as_str()))
}

fn is_terminal(pod: &Pod) -> bool {
    let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
    matches!(phase, Some("Failed" | "Succeeded"))
}

fn vmi_is_migratable(launcher: &Pod, vmis: &[DynamicObject]) -> bool {
    let Some(vm) = launcher.labels().get(VM_NAME_LABEL) else {
        return false;
    };
    let Some(vmi) = vmis.iter().find(|vmi| vmi.metadata.name.as_ref() == Some(vm)) else {
        debug!(launcher = %launcher.name_any(), "{PREFIX}: no VMI found for launcher");
        return false;
    };
    let conditions = vmi.data["status"]["conditions"].as_array();
    !conditions.is_some_and(|conditions| {
        conditions
            .iter()
            .any(|c| c["type"] == "IsMigratable" && c["status"] == "False")
    })
}

/// Usage and limits of one unscoped ResourceQuota, in milli-units
#[derive(Clone, Debug, PartialEq)]
struct Quota {
    name: String,
    hard: BTreeMap<String, i64>,
    used: BTreeMap<String, i64>,
}

impl Quota {
    /// Scoped quotas only apply to some pods and are skipped
    fn from_resource_quota(quota: &ResourceQuota) -> Option<Self> {
        let spec = quota.spec.as_ref();
        let scoped = spec.is_some_and(|s| {
            s.scopes.as_ref().is_some_and(|scopes| !scopes.is_empty()) || s.scope_selector.is_some()
        });
        if scoped {
            return None;
        }
        let status = quota.status.as_ref();
        let amounts = |list: Option<&BTreeMap<String, Quantity>>| -> BTreeMap<String, i64> {
            list.into_iter()
                .flatten()
                .filter_map(|(name, qty)| match milli(qty) {
                    Ok(amount) => Some((name.clone(), amount)),
                    Err(e) => {
                        warn!(
                            quota = %quota.name_any(),
                            resource = %name,
                            error = %e,
                            "ignoring quota entry"
                        );
                        None
                    }
                })
                .collect()
        };
        Some(Self {
            name: quota.name_any(),
            hard: amounts(status.and_then(|s| s.hard.as_ref())),
            used: amounts(status.and_then(|s| s.used.as_ref())),
        })
    }
}

/// Why a pod does not fit the namespace quotas
#[derive(Debug, thiserror::Error)]
enum QuotaViolation {
    #[error("pods {pod:?} is forbidden: status unknown for quota: {quota}, resources: {resources}")]
    StatusUnknown {
        pod: String,
        quota: String,
        resources: String,
    },

    #[error("pods {pod:?} is forbidden: insufficient quota to consume: {resources}")]
    Uncovered { pod: String, resources: String },

    #[error(
        "pods {pod:?} is forbidden: exceeded quota: {quota}, requested: {requested}, \
         used: {used}, limited: {limited}"
    )]
    Exceeded {
        pod: String,
        quota: String,
        requested: String,
        used: String,
        limited: String,
    },
}

/// Charge `pod` to `quotas` the way quota admission does
///
/// The outer error is a malformed pod; the inner one is a quota the pod
/// does not fit. CPU and memory consumption must be covered by some quota.
fn charge(quotas: &[Quota], pod: &Pod) -> Result<Result<Vec<Quota>, QuotaViolation>, Error> {
    let name = pod.name_any();
    let mut covered = BTreeSet::new();
    for quota in quotas {
        let tracked: Vec<&str> = quota
            .hard
            .keys()
            .map(String::as_str)
            .filter(|r| POD_RESOURCES.contains(r))
            .collect();
        let unknown: Vec<&str> = tracked
            .iter()
            .copied()
            .filter(|r| !quota.used.contains_key(*r))
            .collect();
        if !unknown.is_empty() {
            return Ok(Err(QuotaViolation::StatusUnknown {
                pod: name,
                quota: quota.name.clone(),
                resources: unknown.join(","),
            }));
        }
        covered.extend(tracked);
    }

    let delta = pod_usage(pod)?;
    if delta.is_empty() {
        return Ok(Ok(quotas.to_vec()));
    }

    let uncovered: Vec<&str> = delta
        .keys()
        .map(String::as_str)
        .filter(|r| (r.contains("cpu") || r.contains("memory")) && !covered.contains(r))
        .collect();
    if !uncovered.is_empty() {
        return Ok(Err(QuotaViolation::Uncovered {
            pod: name,
            resources: uncovered.join(","),
        }));
    }

    let mut charged = quotas.to_vec();
    for quota in &mut charged {
        let requested: BTreeMap<String, i64> = delta
            .iter()
            .filter(|(r, _)| quota.hard.contains_key(*r))
            .map(|(r, v)| (r.clone(), *v))
            .collect();
        let exceeded: Vec<&String> = requested
            .iter()
            .filter(|(r, v)| quota.used.get(*r).copied().unwrap_or(0) + **v > quota.hard[*r])
            .map(|(r, _)| r)
            .collect();
        if !exceeded.is_empty() {
            let mask = |list: &BTreeMap<String, i64>| {
                let masked: BTreeMap<String, i64> = list
                    .iter()
                    .filter(|(r, _)| exceeded.contains(r))
                    .map(|(r, v)| (r.clone(), *v))
                    .collect();
                pretty(&masked)
            };
            return Ok(Err(QuotaViolation::Exceeded {
                pod: name,
                quota: quota.name.clone(),
                requested: mask(&requested),
                used: mask(&quota.used),
                limited: mask(&quota.hard),
            }));
        }
        for (resource, amount) in requested {
            *quota.used.entry(resource).or_insert(0) += amount;
        }
    }
    Ok(Ok(charged))
}

/// Quota usage of a pod in milli-units; terminal pods use nothing
fn pod_usage(pod: &Pod) -> Result<BTreeMap<String, i64>, Error> {
    let mut usage = BTreeMap::new();
    if is_terminal(pod) {
        return Ok(usage);
    }
    usage.insert("pods".to_string(), 1000);
    usage.insert("count/pods".to_string(), 1000);

    let Some(spec) = &pod.spec else {
        return Ok(usage);
    };
    let init = spec.init_containers.as_deref().unwrap_or_default();
    let overhead = spec.overhead.as_ref();

    for resource in ["cpu", "memory"] {
        let requests = effective(&spec.containers, init, resource, |c| {
            c.resources.as_ref().and_then(|r| r.requests.as_ref())
        })?;
        let limits = effective(&spec.containers, init, resource, |c| {
            c.resources.as_ref().and_then(|r| r.limits.as_ref())
        })?;
        let extra = match overhead.and_then(|o| o.get(resource)) {
            Some(qty) => milli(qty)?,
            None => 0,
        };

        if let Some(requests) = requests.map(|r| r + extra).filter(|r| *r != 0) {
            usage.insert(resource.to_string(), requests);
            usage.insert(format!("requests.{resource}"), requests);
        }
        if let Some(limits) = limits.map(|l| l + extra).filter(|l| *l != 0) {
            usage.insert(format!("limits.{resource}"), limits);
        }
    }
    Ok(usage)
}

/// Sum over the containers, or the largest init container when that is more
fn effective<'a>(
    containers: &'a [Container],
    init: &'a [Container],
    resource: &str,
    list: impl Fn(&'a Container) -> Option<&'a BTreeMap<String, Quantity>>,
) -> Result<Option<i64>, Error> {
    let amount = |c: &'a Container| list(c).and_then(|l| l.get(resource)).map(milli).transpose();

    let mut total: Option<i64> = None;
    for container in containers {
        if let Some(v) = amount(container)? {
            total = Some(total.unwrap_or(0) + v);
        }
    }
    for container in init {
        if let Some(v) = amount(container)? {
            total = Some(total.map_or(v, |t| t.max(v)));
        }
    }
    Ok(total)
}

fn milli(qty: &Quantity) -> Result<i64, Error> {
    Ok((parse_quantity(&qty.0)? * 1000.0).round() as i64)
}

fn format_amount(resource: &str, milli: i64) -> String {
    if milli % 1000 != 0 {
        return format!("{milli}m");
    }
    let whole = milli / 1000;
    if resource.contains("memory") && whole != 0 {
        for (suffix, factor) in [("Gi", 1i64 << 30), ("Mi", 1 << 20), ("Ki", 1 << 10)] {
            if whole % factor == 0 {
                return format!("{}{suffix}", whole / factor);
            }
        }
    }
    whole.to_string()
}

fn pretty(usage: &BTreeMap<String, i64>) -> String {
    usage
        .iter()
        .map(|(resource, amount)| format!("{resource}={}", format_amount(resource, *amount)))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::MockHyperConvergedClient;
    use crate::operands::fake::FakeOperandClient;
    use crate::webhook::testing::{hc, request, state_with_capacity};
    use serde_json::{json, Value};

    const POD: (&str, &str, &str, &str) = ("", "v1", "Pod", "pods");
    const VMS: &str = "vms";

    fn hyperconvergeds(annotated: bool) -> MockHyperConvergedClient {
        let mut hc = hc();
        if annotated {
            hc.metadata.annotations = Some(
                [(CAPACITY_VALIDATOR_ANNOTATION.to_string(), String::new())].into(),
            );
        }
        let mut client = MockHyperConvergedClient::new();
        client.expect_get().returning(move |_, _| Ok(Some(hc.clone())));
        client
    }

    fn pod(name: &str, cpu: &str, labels: Value) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": name, "namespace": VMS, "labels": labels},
            "spec": {"containers": [{
                "name": "compute",
                "image": "virt-launcher",
                "resources": {"requests": {"cpu": cpu}},
            }]},
            "status": {"phase": "Running"},
        })
    }

    fn launcher(name: &str, vm: &str, cpu: &str) -> Value {
        pod(name, cpu, json!({"kubevirt.io": "virt-launcher", VM_NAME_LABEL: vm}))
    }

    fn typed<T: serde::de::DeserializeOwned>(value: Value) -> T {
        serde_json::from_value(value).unwrap()
    }

    fn vmi(name: &str, migratable: bool) -> DynamicObject {
        typed(json!({
            "apiVersion": "kubevirt.io/v1",
            "kind": "VirtualMachineInstance",
            "metadata": {"name": name, "namespace": VMS},
            "status": {"conditions": [{
                "type": "IsMigratable",
                "status": if migratable { "True" } else { "False" },
            }]},
        }))
    }

    fn quota(hard: &str, used: &str) -> ResourceQuota {
        typed(json!({
            "apiVersion": "v1",
            "kind": "ResourceQuota",
            "metadata": {"name": "compute", "namespace": VMS},
            "spec": {"hard": {"cpu": hard, "requests.cpu": hard}},
            "status": {
                "hard": {"cpu": hard, "requests.cpu": hard},
                "used": {"cpu": used, "requests.cpu": used},
            },
        }))
    }

    fn namespace(
        launchers: Vec<Value>,
        vmis: Vec<DynamicObject>,
        quotas: Vec<ResourceQuota>,
    ) -> MockCapacityClient {
        let launchers: Vec<Pod> = launchers.into_iter().map(typed).collect();
        let mut client = MockCapacityClient::new();
        client
            .expect_launcher_pods()
            .withf(|namespace| namespace == VMS)
            .returning(move |_| Ok(launchers.clone()));
        client.expect_migrations().returning(|_| Ok(vec![]));
        client.expect_vmis().returning(move |_| Ok(vmis.clone()));
        client
            .expect_resource_quotas()
            .returning(move |_| Ok(quotas.clone()));
        client
    }

    fn create(object: Value) -> AdmissionRequest<DynamicObject> {
        request(POD, Operation::Create, Some(object), None, false)
    }

    /// Story: a namespace owner is warned before starving a VM's migration
    ///
    /// One running VM uses 1 of the 2 CPUs the quota grants. A 500m pod would
    /// still fit, but afterwards the VM's migration target could not be
    /// created. With a bigger quota the same pod is admitted.
    #[tokio::test]
    async fn story_pod_that_would_block_a_migration_is_denied() {
        let capacity = namespace(
            vec![launcher("virt-launcher-fedora-abcde", "fedora", "1")],
            vec![vmi("fedora", true)],
            vec![quota("2", "1")],
        );
        let state = state_with_capacity(
            hyperconvergeds(true),
            capacity,
            Arc::new(FakeOperandClient::new()),
        );
        let response = validate_capacity(&state, &create(pod("web", "500m", json!({})))).await;

        assert!(!response.allowed);
        let message = &response.result.message;
        assert!(message.starts_with(
            "CapacityValidator: Please be advised that creation of Pod:web in the vms namespace, \
             may prevent migration of VMI:fedora due to ResourceQuota constraints."
        ));
        assert!(message.contains(
            "pods \"virt-launcher-fedora-abcde\" is forbidden: exceeded quota: compute, \
             requested: cpu=1,requests.cpu=1, used: cpu=1500m,requests.cpu=1500m, \
             limited: cpu=2,requests.cpu=2"
        ));

        let capacity = namespace(
            vec![launcher("virt-launcher-fedora-abcde", "fedora", "1")],
            vec![vmi("fedora", true)],
            vec![quota("3", "1")],
        );
        let state = state_with_capacity(
            hyperconvergeds(true),
            capacity,
            Arc::new(FakeOperandClient::new()),
        );
        let response = validate_capacity(&state, &create(pod("web", "500m", json!({})))).await;
        assert!(response.allowed);
        assert_eq!(response.result.message, ALLOWED_MESSAGE);
    }

    #[tokio::test]
    async fn nothing_is_checked_without_the_annotation() {
        let state = state_with_capacity(
            hyperconvergeds(false),
            MockCapacityClient::new(),
            Arc::new(FakeOperandClient::new()),
        );
        let response = validate_capacity(&state, &create(pod("web", "64", json!({})))).await;
        assert!(response.allowed);
    }

    #[tokio::test]
    async fn migration_target_is_admitted() {
        let mut capacity = MockCapacityClient::new();
        capacity.expect_launcher_pods().returning(|_| Ok(vec![]));
        capacity.expect_migrations().returning(|_| {
            Ok(vec![typed(json!({
                "apiVersion": "kubevirt.io/v1",
                "kind": "VirtualMachineInstanceMigration",
                "metadata": {"name": "fedora-migration", "namespace": VMS, "uid": "7d1c"},
            }))])
        });
        let state = state_with_capacity(
            hyperconvergeds(true),
            capacity,
            Arc::new(FakeOperandClient::new()),
        );
        let labels = json!({
            "kubevirt.io": "virt-launcher",
            VM_NAME_LABEL: "fedora",
            MIGRATION_JOB_LABEL: "7d1c",
        });
        let target = pod("virt-launcher-fedora-fghij", "1", labels);
        let response = validate_capacity(&state, &create(target)).await;
        assert!(response.allowed);
    }

    #[tokio::test]
    async fn pod_over_quota_is_left_to_quota_admission() {
        let capacity = namespace(
            vec![launcher("virt-launcher-fedora-abcde", "fedora", "1")],
            vec![vmi("fedora", true)],
            vec![quota("2", "1")],
        );
        let state = state_with_capacity(
            hyperconvergeds(true),
            capacity,
            Arc::new(FakeOperandClient::new()),
        );
        let response = validate_capacity(&state, &create(pod("big", "4", json!({})))).await;
        assert!(response.allowed);
    }

    #[tokio::test]
    async fn non_migratable_vms_need_no_headroom() {
        let capacity = namespace(
            vec![launcher("virt-launcher-fedora-abcde", "fedora", "1")],
            vec![vmi("fedora", false)],
            vec![quota("2", "1")],
        );
        let state = state_with_capacity(
            hyperconvergeds(true),
            capacity,
            Arc::new(FakeOperandClient::new()),
        );
        let response = validate_capacity(&state, &create(pod("web", "500m", json!({})))).await;
        assert!(response.allowed);
    }

    #[tokio::test]
    async fn lookup_failure_denies() {
        let mut hyperconvergeds = MockHyperConvergedClient::new();
        hyperconvergeds
            .expect_get()
            .returning(|_, _| Err(Error::internal("etcd unavailable")));
        let state = state_with_capacity(
            hyperconvergeds,
            MockCapacityClient::new(),
            Arc::new(FakeOperandClient::new()),
        );
        let response = validate_capacity(&state, &create(pod("web", "1", json!({})))).await;
        assert!(!response.allowed);
        assert!(response.result.message.contains("etcd unavailable"));
    }

    #[test]
    fn init_containers_count_when_larger() {
        let pod: Pod = typed(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "p"},
            "spec": {
                "initContainers": [{"name": "init", "resources": {"requests": {"memory": "2Gi"}}}],
                "containers": [
                    {"name": "a", "resources": {"requests": {"cpu": "250m", "memory": "512Mi"}}},
                    {"name": "b", "resources": {"requests": {"cpu": "250m", "memory": "512Mi"}}},
                ],
                "overhead": {"cpu": "100m"},
            },
        }));
        let usage = pod_usage(&pod).unwrap();
        assert_eq!(usage["requests.cpu"], 600);
        assert_eq!(usage["requests.memory"], 2 * 1024 * 1024 * 1024 * 1000);
        assert_eq!(usage["pods"], 1000);
        assert!(!usage.contains_key("limits.cpu"));
        assert_eq!(format_amount("memory", usage["memory"]), "2Gi");
    }

    #[test]
    fn finished_pods_use_nothing() {
        let mut finished: Pod = typed(pod("done", "1", json!({})));
        if let Some(status) = finished.status.as_mut() {
            status.phase = Some("Succeeded".to_string());
        }
        assert!(pod_usage(&finished).unwrap().is_empty());
    }

    #[test]
    fn scoped_quotas_are_skipped() {
        let mut scoped = quota("1", "0");
        if let Some(spec) = scoped.spec.as_mut() {
            spec.scopes = Some(vec!["BestEffort".to_string()]);
        }
        assert!(Quota::from_resource_quota(&scoped).is_none());
        assert!(Quota::from_resource_quota(&quota("1", "0")).is_some());
    }
}
