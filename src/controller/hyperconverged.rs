//! HyperConverged controller implementation
//!
//! One reconcile walks the singleton through: finalizer bookkeeping, cluster
//! topology, upgrade handling, golden images, every managed object, and
//! finally the aggregated status. Objects that fail are reported in the
//! conditions and do not stop the others from being reconciled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use super::conditions::{self, reasons, types, HealthReport};
use super::schedule;
use crate::config::OperatorConfig;
use crate::crd::{
    set_condition, Condition, ConditionStatus, HyperConverged, HyperConvergedStatus,
    HYPERCONVERGED_NAME,
};
use crate::events::{actions, reasons as event_reasons, EventPublisher, KubeEventPublisher};
use crate::golden_images::{self, GoldenImageCatalog};
use crate::metrics;
use crate::nodeinfo::{KubeNodeClient, NodeClient, NodeInfo};
use crate::operands::{
    jsonpatch, BuildContext, EnsureRequest, EnsureResult, KubeOperandClient, ObjectId,
    OperandClient, OperandSet, FIELD_MANAGER,
};
use crate::tls_profile::TlsProfileCache;
use crate::upgrade_patch::UpgradePatches;
use crate::Error;

/// Finalizer guarding the uninstall sequence
pub const FINALIZER: &str = "kubevirt.io/hyperconverged";

/// Name under which the operator version is recorded in `status.versions`
pub const OPERATOR_VERSION_NAME: &str = "operator";

/// Requeue interval of a healthy reconcile
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

const SHORT_REQUEUE: Duration = Duration::from_secs(5);

/// Access to the HyperConverged resource itself
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HyperConvergedClient: Send + Sync {
    /// Fetch a HyperConverged resource, `None` when absent
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<HyperConverged>, Error>;

    /// Replace the whole resource, returning what the API server stored
    async fn replace(&self, hc: &HyperConverged) -> Result<HyperConverged, Error>;

    /// Replace the status subresource
    async fn patch_status(
        &self,
        hc: &HyperConverged,
        status: &HyperConvergedStatus,
    ) -> Result<(), Error>;

    /// Set `metadata.finalizers`, guarded by the resource version of `hc`
    async fn set_finalizers(&self, hc: &HyperConverged, finalizers: &[String]) -> Result<(), Error>;
}

/// [`HyperConvergedClient`] backed by the API server
pub struct KubeHyperConvergedClient {
    client: Client,
}

impl KubeHyperConvergedClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, hc: &HyperConverged) -> Api<HyperConverged> {
        Api::namespaced(self.client.clone(), hc.namespace())
    }
}

#[async_trait]
impl HyperConvergedClient for KubeHyperConvergedClient {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<HyperConverged>, Error> {
        let api: Api<HyperConverged> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn replace(&self, hc: &HyperConverged) -> Result<HyperConverged, Error> {
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        Ok(self.api(hc).replace(hc.name(), &params, hc).await?)
    }

    async fn patch_status(
        &self,
        hc: &HyperConverged,
        status: &HyperConvergedStatus,
    ) -> Result<(), Error> {
        let status_patch = serde_json::json!({ "status": status });
        self.api(hc)
            .patch_status(hc.name(), &PatchParams::default(), &Patch::Merge(&status_patch))
            .await?;
        Ok(())
    }

    async fn set_finalizers(
        &self,
        hc: &HyperConverged,
        finalizers: &[String],
    ) -> Result<(), Error> {
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": hc.resource_version(),
            }
        });
        self.api(hc)
            .patch(hc.name(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Clients the controller talks to the cluster through
pub struct Clients {
    /// The HyperConverged resource
    pub hyperconverged: Arc<dyn HyperConvergedClient>,
    /// Managed objects
    pub operands: Arc<dyn OperandClient>,
    /// Cluster nodes
    pub nodes: Arc<dyn NodeClient>,
    /// Events about the HyperConverged resource
    pub events: Arc<dyn EventPublisher>,
}

impl Clients {
    /// Production clients sharing one kube client
    pub fn from_client(client: Client) -> Self {
        Self {
            hyperconverged: Arc::new(KubeHyperConvergedClient::new(client.clone())),
            operands: Arc::new(KubeOperandClient::new(client.clone())),
            nodes: Arc::new(KubeNodeClient::new(client.clone())),
            events: Arc::new(KubeEventPublisher::new(client, "hyperconverged-cluster-operator")),
        }
    }
}

/// Controller context shared by every reconcile
pub struct Context {
    /// Startup configuration
    pub config: OperatorConfig,
    /// Cluster access
    pub clients: Clients,
    /// Cluster topology, refreshed on every reconcile
    pub node_info: Arc<NodeInfo>,
    /// Common golden images
    pub catalog: Arc<GoldenImageCatalog>,
    /// Upgrade-patch table
    pub upgrade_patches: Arc<UpgradePatches>,
    /// TLS profile shared with the webhook server
    pub tls_profiles: Arc<TlsProfileCache>,
    /// Every managed object, in reconcile order
    pub operands: OperandSet,
    // Version the upgrade patches were last applied for
    patched_from: Mutex<Option<String>>,
}

impl Context {
    /// Build the context
    ///
    /// `monitoring_available` adds the alerting rules to the managed objects.
    pub fn new(
        config: OperatorConfig,
        clients: Clients,
        catalog: Arc<GoldenImageCatalog>,
        upgrade_patches: Arc<UpgradePatches>,
        tls_profiles: Arc<TlsProfileCache>,
        monitoring_available: bool,
    ) -> Self {
        let node_info = Arc::new(NodeInfo::new(config.cpu_model_weights.clone()));
        Self {
            config,
            clients,
            node_info,
            catalog,
            upgrade_patches,
            tls_profiles,
            operands: OperandSet::new(monitoring_available),
            patched_from: Mutex::new(None),
        }
    }

    fn build_context(&self, hc: &HyperConverged) -> BuildContext {
        BuildContext {
            infrastructure_highly_available: self.node_info.is_infrastructure_highly_available(),
            control_plane_architectures: self.node_info.control_plane_architectures(),
            workload_architectures: self.node_info.workload_architectures(),
            tls_security_profile: hc.spec.tls_security_profile.clone(),
            ..BuildContext::from_config(&self.config)
        }
    }
}

fn has_finalizer(hc: &HyperConverged) -> bool {
    hc.finalizers().iter().any(|f| f == FINALIZER)
}

/// Reconcile the HyperConverged resource
#[instrument(skip(hc, ctx), fields(hyperconverged = %hc.name_any()))]
pub async fn reconcile(hc: Arc<HyperConverged>, ctx: Arc<Context>) -> Result<Action, Error> {
    if hc.name() != HYPERCONVERGED_NAME || hc.namespace() != ctx.config.namespace {
        return ignore_instance(&hc, &ctx).await;
    }
    if hc.meta().deletion_timestamp.is_some() {
        return finalize(&hc, &ctx).await;
    }

    metrics::set_hyperconverged_exists(true);
    if !has_finalizer(&hc) {
        let mut finalizers = hc.finalizers().to_vec();
        finalizers.push(FINALIZER.to_string());
        ctx.clients.hyperconverged.set_finalizers(&hc, &finalizers).await?;
        info!("added finalizer");
    }

    let topology_changed = match ctx.node_info.refresh(ctx.clients.nodes.as_ref(), &hc).await {
        Ok(changed) => changed,
        Err(e) => {
            warn!(error = %e, "keeping the previous cluster topology");
            false
        }
    };

    let running = ctx.config.versions.operator.clone();
    let known = hc
        .status
        .as_ref()
        .and_then(|s| s.version(OPERATOR_VERSION_NAME))
        .map(str::to_string);
    let upgrading = known.as_deref().is_some_and(|k| k != running);

    let mut hc = match known.as_deref() {
        Some(known) if upgrading => upgrade(&hc, known, &ctx).await?,
        _ => hc.as_ref().clone(),
    };

    let original_status = hc.status.clone();
    let generation = hc.meta().generation;
    let hco_triggered = generation != original_status.as_ref().and_then(|s| s.observed_generation);

    let mut report = HealthReport::new();
    if upgrading {
        report.observe_upgrade(&running);
    }

    {
        let status = hc.status.get_or_insert_with(Default::default);
        if status.data_import_schedule.is_none() {
            status.data_import_schedule = Some(schedule::generate(HYPERCONVERGED_NAME));
        }
        status.infrastructure_highly_available =
            Some(ctx.node_info.is_infrastructure_highly_available());
        status.node_info = Some(ctx.node_info.status());
    }

    let build_ctx = ctx.build_context(&hc);
    match ctx.catalog.resolve(&hc, &build_ctx.workload_architectures) {
        Ok(dicts) => {
            golden_images::record_metrics(&hc, &dicts, &build_ctx.workload_architectures);
            if let Some(status) = hc.status.as_mut() {
                status.data_import_cron_templates = dicts;
            }
        }
        Err(e) => {
            warn!(error = %e, "failed to resolve the golden images");
            report.observe_failure("DataImportCronTemplate", hc.name(), &e);
        }
    }
    ctx.tls_profiles.set(hc.spec.tls_security_profile.clone());

    let hc_ref = hc.object_ref(&());
    let mut related = original_status
        .as_ref()
        .map(|s| s.related_objects.clone())
        .unwrap_or_default();
    let mut upgrade_done = true;
    {
        let req = EnsureRequest {
            hc: &hc,
            ctx: &build_ctx,
            hco_triggered,
        };
        for operand in ctx.operands.iter() {
            let result = operand.ensure(ctx.clients.operands.as_ref(), &req).await;
            record_result(&ctx, &hc_ref, &result, upgrading, &mut report, &mut related).await;
            if operand.reports_conditions() {
                if let Some(object) = &result.object {
                    report.observe_operand(&result.kind, object);
                }
            }
            upgrade_done &= result.upgrade_done;
        }
    }

    let tainted = jsonpatch::is_tainted(&hc);
    for annotation in jsonpatch::ANNOTATIONS {
        metrics::set_unsafe_modifications(annotation, jsonpatch::count(&hc, annotation));
    }
    metrics::set_memory_overcommit_percentage(hc.memory_overcommit_percentage());
    let health = report.health();
    metrics::set_system_health_status(health);

    let status = hc.status.get_or_insert_with(Default::default);
    if upgrade_done && !report.has_failures() && !running.is_empty() {
        if upgrading {
            info!(version = %running, "upgrade complete");
        }
        status.set_version(OPERATOR_VERSION_NAME, &running);
    }
    status.related_objects = related;
    report.apply(&mut status.conditions, generation);
    conditions::set_tainted(&mut status.conditions, tainted, generation);
    status.system_health_status = Some(health.as_str().to_string());
    status.observed_generation = generation;

    if hc.status != original_status {
        debug!("writing status");
        if let Some(status) = hc.status.as_ref() {
            ctx.clients.hyperconverged.patch_status(&hc, status).await?;
        }
    }

    if report.has_failures() {
        return Err(Error::internal(
            "some managed objects could not be reconciled; see the ReconcileComplete condition",
        ));
    }
    if topology_changed || (upgrading && !upgrade_done) {
        Ok(Action::requeue(SHORT_REQUEUE))
    } else {
        Ok(Action::requeue(RESYNC_INTERVAL))
    }
}

/// Turn one ensure outcome into events, metrics and related objects
async fn record_result(
    ctx: &Context,
    hc_ref: &ObjectReference,
    result: &EnsureResult,
    upgrading: bool,
    report: &mut HealthReport,
    related: &mut Vec<ObjectReference>,
) {
    let events = ctx.clients.events.as_ref();
    if let Some(e) = &result.err {
        warn!(kind = %result.kind, name = %result.name, error = %e, "failed to reconcile object");
        report.observe_failure(&result.kind, &result.name, e);
        return;
    }

    let subject = format!("{} {}", result.kind, result.name);
    if result.created {
        events
            .publish(
                hc_ref,
                EventType::Normal,
                event_reasons::CREATED,
                actions::RECONCILE,
                Some(format!("Created {subject}")),
            )
            .await;
    }
    if result.updated {
        if result.overwritten && !upgrading {
            metrics::inc_overwritten_modifications(&result.kind, &result.name);
            events
                .publish(
                    hc_ref,
                    EventType::Warning,
                    event_reasons::OVERWRITTEN,
                    actions::RECONCILE,
                    Some(format!("Overwritten {subject}")),
                )
                .await;
        } else {
            events
                .publish(
                    hc_ref,
                    EventType::Normal,
                    event_reasons::UPDATED,
                    actions::RECONCILE,
                    Some(format!("Updated {subject}")),
                )
                .await;
        }
    }

    let same = |r: &ObjectReference| {
        r.kind.as_deref() == Some(result.kind.as_str())
            && r.name.as_deref() == Some(result.name.as_str())
    };
    if result.deleted {
        events
            .publish(
                hc_ref,
                EventType::Normal,
                event_reasons::KILLING,
                actions::RECONCILE,
                Some(format!("Removed {subject}")),
            )
            .await;
        related.retain(|r| !same(r));
        return;
    }
    if result.object.is_some() {
        let reference = result.object_reference();
        match related.iter_mut().find(|r| same(r)) {
            Some(existing) => *existing = reference,
            None => related.push(reference),
        }
    }
}

/// Apply the upgrade patches and remove leftovers, once per known version
async fn upgrade(hc: &HyperConverged, known: &str, ctx: &Context) -> Result<HyperConverged, Error> {
    if ctx.patched_from.lock().as_deref() == Some(known) {
        return Ok(hc.clone());
    }

    let known_version = match semver::Version::parse(known) {
        Ok(v) => v,
        Err(e) => {
            warn!(
                known,
                error = %e,
                "recorded operator version is not semver; skipping upgrade patches"
            );
            *ctx.patched_from.lock() = Some(known.to_string());
            return Ok(hc.clone());
        }
    };
    info!(from = known, to = %ctx.config.versions.operator, "upgrading");

    let current = serde_json::to_value(hc)?;
    let patched = ctx.upgrade_patches.apply(&current, &known_version)?;
    let hc = if patched != current {
        let patched: HyperConverged = serde_json::from_value(patched)?;
        let stored = ctx.clients.hyperconverged.replace(&patched).await?;
        ctx.clients
            .events
            .publish(
                &stored.object_ref(&()),
                EventType::Normal,
                event_reasons::UPGRADE_PATCH_APPLIED,
                actions::UPGRADE,
                Some(format!("Applied upgrade patches for upgrading from version {known}")),
            )
            .await;
        stored
    } else {
        hc.clone()
    };

    for leftover in ctx.upgrade_patches.objects_to_remove(&known_version) {
        let id = ObjectId::new(
            leftover.api_resource(),
            leftover.namespace(),
            leftover.object_key.name.clone(),
        );
        if ctx.clients.operands.delete(&id, false).await? {
            info!(object = %id, "removed leftover object");
        }
    }

    *ctx.patched_from.lock() = Some(known.to_string());
    Ok(hc)
}

/// Run the uninstall sequence and release the finalizer
async fn finalize(hc: &HyperConverged, ctx: &Context) -> Result<Action, Error> {
    if !has_finalizer(hc) {
        metrics::set_hyperconverged_exists(false);
        return Ok(Action::await_change());
    }

    info!("uninstalling");
    let build_ctx = ctx.build_context(hc);
    ctx.operands
        .uninstall(ctx.clients.operands.as_ref(), hc, &build_ctx, ctx.clients.events.as_ref())
        .await?;

    let finalizers: Vec<String> = hc
        .finalizers()
        .iter()
        .filter(|f| *f != FINALIZER)
        .cloned()
        .collect();
    ctx.clients.hyperconverged.set_finalizers(hc, &finalizers).await?;
    ctx.tls_profiles.clear();
    metrics::set_hyperconverged_exists(false);
    info!("uninstall complete");
    Ok(Action::await_change())
}

/// Mark a HyperConverged resource other than the singleton as ignored
async fn ignore_instance(hc: &HyperConverged, ctx: &Context) -> Result<Action, Error> {
    warn!(
        name = hc.name(),
        namespace = hc.namespace(),
        "ignoring HyperConverged resource other than {}/{}",
        ctx.config.namespace,
        HYPERCONVERGED_NAME
    );
    let mut status = hc.status.clone().unwrap_or_default();
    set_condition(
        &mut status.conditions,
        Condition::new(
            types::TAINTED_CONFIGURATION,
            ConditionStatus::True,
            reasons::IGNORED_INSTANCE,
            format!(
                "Only the {HYPERCONVERGED_NAME} resource in namespace {} is reconciled",
                ctx.config.namespace
            ),
        )
        .with_generation(hc.meta().generation),
    );
    if hc.status.as_ref() != Some(&status) {
        ctx.clients.hyperconverged.patch_status(hc, &status).await?;
    }
    Ok(Action::await_change())
}

/// Error policy for the controller
pub fn error_policy(hc: Arc<HyperConverged>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(?error, hyperconverged = %hc.name_any(), "reconciliation failed");
    if error.is_retryable() {
        Action::requeue(SHORT_REQUEUE)
    } else {
        Action::requeue(Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use k8s_openapi::api::apps::v1::DaemonSet;
    use k8s_openapi::api::core::v1::{Node, NodeStatus, NodeSystemInfo};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use kube::api::ApiResource;

    use super::*;
    use crate::crd::operands::{Cdi, KubeVirt, NetworkAddonsConfig, Ssp};
    use crate::crd::{HigherWorkloadDensityConfiguration, HyperConvergedSpec};
    use crate::events::{MockEventPublisher, NoopEventPublisher};
    use crate::kube_utils::HasApiResource;
    use crate::nodeinfo::{MockNodeClient, LABEL_NODE_ROLE_CONTROL_PLANE, LABEL_NODE_ROLE_WORKER};
    use crate::operands::fake::{FakeOperandClient, Verb};
    use crate::operands::labels::COMPONENT_LABEL;

    const NS: &str = "kubevirt-hyperconverged";

    fn node(name: &str, role: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some([(role.to_string(), String::new())].into()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                node_info: Some(NodeSystemInfo {
                    architecture: "amd64".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn nodes() -> MockNodeClient {
        let mut nodes = MockNodeClient::new();
        nodes.expect_list_nodes().returning(|| {
            Ok(vec![
                node("cp1", LABEL_NODE_ROLE_CONTROL_PLANE),
                node("cp2", LABEL_NODE_ROLE_CONTROL_PLANE),
                node("cp3", LABEL_NODE_ROLE_CONTROL_PLANE),
                node("w1", LABEL_NODE_ROLE_WORKER),
                node("w2", LABEL_NODE_ROLE_WORKER),
            ])
        });
        nodes
    }

    fn hc() -> HyperConverged {
        let mut hc = HyperConverged::new(HYPERCONVERGED_NAME, HyperConvergedSpec::default());
        hc.metadata.namespace = Some(NS.to_string());
        hc.metadata.uid = Some("7c1e6a02".to_string());
        hc.metadata.generation = Some(1);
        hc.metadata.resource_version = Some("100".to_string());
        hc.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        hc
    }

    /// Status writes observed by the mock client
    type Written = Arc<StdMutex<Vec<HyperConvergedStatus>>>;

    fn recording_client() -> (MockHyperConvergedClient, Written) {
        let written: Written = Arc::default();
        let sink = written.clone();
        let mut client = MockHyperConvergedClient::new();
        client.expect_patch_status().returning(move |_, status| {
            sink.lock().unwrap().push(status.clone());
            Ok(())
        });
        (client, written)
    }

    fn recording_publisher() -> (MockEventPublisher, Arc<StdMutex<Vec<String>>>) {
        let seen: Arc<StdMutex<Vec<String>>> = Arc::default();
        let sink = seen.clone();
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .returning(move |_, _, reason, _, _| sink.lock().unwrap().push(reason.to_string()));
        (publisher, seen)
    }

    struct Harness {
        ctx: Arc<Context>,
        operands: Arc<FakeOperandClient>,
    }

    fn harness(
        hyperconverged: MockHyperConvergedClient,
        events: impl EventPublisher + 'static,
        upgrade_patches: UpgradePatches,
    ) -> Harness {
        let operands = Arc::new(FakeOperandClient::new());
        let clients = Clients {
            hyperconverged: Arc::new(hyperconverged),
            operands: operands.clone(),
            nodes: Arc::new(nodes()),
            events: Arc::new(events),
        };
        let ctx = Context::new(
            OperatorConfig::for_testing(NS),
            clients,
            Arc::new(GoldenImageCatalog::default()),
            Arc::new(upgrade_patches),
            Arc::new(TlsProfileCache::new()),
            false,
        );
        Harness {
            ctx: Arc::new(ctx),
            operands,
        }
    }

    fn with_status(mut hc: HyperConverged, status: &HyperConvergedStatus) -> HyperConverged {
        hc.status = Some(status.clone());
        hc
    }

    fn last(written: &Written) -> HyperConvergedStatus {
        written.lock().unwrap().last().cloned().expect("a status write")
    }

    fn report_version(operands: &FakeOperandClient, id: ObjectId, field: &str, version: &str) {
        operands.modify(&id, |object| {
            object.data["status"] = serde_json::json!({ field: version });
        });
    }

    #[tokio::test]
    async fn story_first_reconcile_deploys_and_reports() {
        let (client, written) = recording_client();
        let (events, seen) = recording_publisher();
        let h = harness(client, events, UpgradePatches::default());

        let action = reconcile(Arc::new(hc()), h.ctx.clone()).await.unwrap();
        assert_eq!(action, Action::requeue(SHORT_REQUEUE));

        for id in [
            ObjectId::new(KubeVirt::api_resource(), Some(NS), "kubevirt-kubevirt-hyperconverged"),
            ObjectId::new(Cdi::api_resource(), None, "cdi-kubevirt-hyperconverged"),
            ObjectId::new(NetworkAddonsConfig::api_resource(), None, "cluster"),
            ObjectId::new(Ssp::api_resource(), Some(NS), "ssp-kubevirt-hyperconverged"),
        ] {
            assert!(h.operands.stored(&id).is_some(), "{id} was not created");
        }
        assert!(seen.lock().unwrap().iter().all(|r| r == event_reasons::CREATED));

        let status = last(&written);
        assert_eq!(status.observed_generation, Some(1));
        assert_eq!(status.infrastructure_highly_available, Some(true));
        assert!(status.data_import_schedule.is_some());
        assert_eq!(status.related_objects.len(), 5);
        assert_eq!(status.system_health_status.as_deref(), Some("error"));

        let available = status.condition(types::AVAILABLE).unwrap();
        assert_eq!(available.status, ConditionStatus::False);
        assert_eq!(available.reason, "KubeVirtConditions");
        let complete = status.condition(types::RECONCILE_COMPLETE).unwrap();
        assert_eq!(complete.status, ConditionStatus::True);
        assert!(status.condition(types::TAINTED_CONFIGURATION).is_none());
        assert_eq!(status.version(OPERATOR_VERSION_NAME), None);
    }

    #[tokio::test]
    async fn story_second_reconcile_is_quiet() {
        let (client, written) = recording_client();
        let h = harness(client, NoopEventPublisher, UpgradePatches::default());

        reconcile(Arc::new(hc()), h.ctx.clone()).await.unwrap();
        let status = last(&written);
        h.operands.clear_calls();

        let action = reconcile(Arc::new(with_status(hc(), &status)), h.ctx.clone()).await.unwrap();
        assert_eq!(action, Action::requeue(RESYNC_INTERVAL));
        assert!(h.operands.calls().is_empty(), "unexpected writes: {:?}", h.operands.calls());
        assert_eq!(written.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn story_out_of_band_label_change_is_reverted() {
        let (client, written) = recording_client();
        let (events, seen) = recording_publisher();
        let h = harness(client, events, UpgradePatches::default());

        let mut dense = hc();
        dense.spec.higher_workload_density = Some(HigherWorkloadDensityConfiguration {
            memory_overcommit_percentage: Some(150),
        });
        reconcile(Arc::new(dense.clone()), h.ctx.clone()).await.unwrap();
        let status = last(&written);

        let agent = ObjectId::new(ApiResource::erase::<DaemonSet>(&()), Some(NS), "wasp-agent");
        h.operands.modify(&agent, |ds| {
            let labels = ds.metadata.labels.get_or_insert_with(Default::default);
            labels.remove(COMPONENT_LABEL);
            labels.insert("owner".to_string(), "me".to_string());
        });
        let before = metrics::overwritten_modifications("DaemonSet", "wasp-agent");
        seen.lock().unwrap().clear();

        reconcile(Arc::new(with_status(dense, &status)), h.ctx.clone()).await.unwrap();

        let labels = h.operands.stored(&agent).unwrap().metadata.labels.unwrap();
        assert!(labels.contains_key(COMPONENT_LABEL));
        assert_eq!(labels.get("owner").map(String::as_str), Some("me"));
        assert_eq!(metrics::overwritten_modifications("DaemonSet", "wasp-agent"), before + 1);
        assert_eq!(*seen.lock().unwrap(), vec![event_reasons::OVERWRITTEN.to_string()]);
    }

    #[tokio::test]
    async fn story_upgrade_patches_once_and_records_version() {
        let patches = UpgradePatches::from_json(
            r#"{"hcoCRPatchList": [{"semverRange": "<1.16.0", "jsonPatch": [
                {"op": "add", "path": "/spec/kubevirtFeatureGates", "value": ["Sidecar"]}
            ]}]}"#,
        )
        .unwrap();
        let (mut client, written) = recording_client();
        let replaced: Arc<StdMutex<Vec<HyperConverged>>> = Arc::default();
        let sink = replaced.clone();
        client.expect_replace().times(1).returning(move |hc| {
            sink.lock().unwrap().push(hc.clone());
            Ok(hc.clone())
        });
        let (events, seen) = recording_publisher();
        let h = harness(client, events, patches);

        let mut old = HyperConvergedStatus {
            observed_generation: Some(1),
            ..Default::default()
        };
        old.set_version(OPERATOR_VERSION_NAME, "1.15.2");
        let upgrading = with_status(hc(), &old);

        let action = reconcile(Arc::new(upgrading.clone()), h.ctx.clone()).await.unwrap();
        assert_eq!(action, Action::requeue(SHORT_REQUEUE));
        assert_eq!(replaced.lock().unwrap()[0].spec.kubevirt_feature_gates, vec!["Sidecar"]);
        assert!(seen.lock().unwrap().iter().any(|r| r == event_reasons::UPGRADE_PATCH_APPLIED));

        let status = last(&written);
        assert_eq!(status.version(OPERATOR_VERSION_NAME), Some("1.15.2"));
        let progressing = status.condition(types::PROGRESSING).unwrap();
        assert_eq!(progressing.reason, reasons::UPGRADING);

        let versions = &h.ctx.config.versions;
        let kubevirt =
            ObjectId::new(KubeVirt::api_resource(), Some(NS), "kubevirt-kubevirt-hyperconverged");
        let cdi = ObjectId::new(Cdi::api_resource(), None, "cdi-kubevirt-hyperconverged");
        let cna = ObjectId::new(NetworkAddonsConfig::api_resource(), None, "cluster");
        let ssp = ObjectId::new(Ssp::api_resource(), Some(NS), "ssp-kubevirt-hyperconverged");
        report_version(&h.operands, kubevirt, "observedKubeVirtVersion", &versions.kubevirt);
        report_version(&h.operands, cdi, "observedVersion", &versions.cdi);
        report_version(&h.operands, cna, "observedVersion", &versions.network_addons);
        report_version(&h.operands, ssp, "observedVersion", &versions.ssp);

        reconcile(Arc::new(with_status(upgrading, &status)), h.ctx.clone()).await.unwrap();
        assert_eq!(last(&written).version(OPERATOR_VERSION_NAME), Some("1.16.0"));
    }

    #[tokio::test]
    async fn finalizer_is_added_once() {
        let (mut client, _) = recording_client();
        client
            .expect_set_finalizers()
            .withf(|_, finalizers| finalizers.len() == 1 && finalizers[0] == FINALIZER)
            .times(1)
            .returning(|_, _| Ok(()));
        let h = harness(client, NoopEventPublisher, UpgradePatches::default());

        let mut fresh = hc();
        fresh.metadata.finalizers = None;
        reconcile(Arc::new(fresh), h.ctx.clone()).await.unwrap();
    }

    #[tokio::test]
    async fn story_deletion_uninstalls_and_releases_finalizer() {
        let (mut client, written) = recording_client();
        client
            .expect_set_finalizers()
            .withf(|_, finalizers| finalizers.is_empty())
            .times(1)
            .returning(|_, _| Ok(()));
        let h = harness(client, NoopEventPublisher, UpgradePatches::default());

        reconcile(Arc::new(hc()), h.ctx.clone()).await.unwrap();
        assert!(h.operands.len() >= 5);
        assert!(h.ctx.tls_profiles.get().is_some());

        let mut deleting = with_status(hc(), &last(&written));
        deleting.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        let action = reconcile(Arc::new(deleting), h.ctx.clone()).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(h.operands.len(), 0);
        assert!(h.ctx.tls_profiles.get().is_none());
    }

    #[tokio::test]
    async fn second_instance_is_ignored() {
        let (client, written) = recording_client();
        let h = harness(client, NoopEventPublisher, UpgradePatches::default());

        let mut other = hc();
        other.metadata.name = Some("other-hco".to_string());
        let action = reconcile(Arc::new(other), h.ctx.clone()).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert!(h.operands.calls().is_empty());
        let tainted = last(&written);
        let condition = tainted.condition(types::TAINTED_CONFIGURATION).unwrap();
        assert_eq!(condition.reason, reasons::IGNORED_INSTANCE);
    }

    #[tokio::test]
    async fn failing_object_does_not_stop_the_others() {
        let (client, written) = recording_client();
        let h = harness(client, NoopEventPublisher, UpgradePatches::default());
        h.operands.fail(Verb::Create, "CDI", 500, "etcdserver: request timed out");

        let result = reconcile(Arc::new(hc()), h.ctx.clone()).await;
        assert!(result.is_err());

        let ssp = ObjectId::new(Ssp::api_resource(), Some(NS), "ssp-kubevirt-hyperconverged");
        assert!(h.operands.stored(&ssp).is_some());
        let status = last(&written);
        let complete = status.condition(types::RECONCILE_COMPLETE).unwrap();
        assert_eq!(complete.status, ConditionStatus::False);
        assert!(complete.message.contains("cdi-kubevirt-hyperconverged"));
        assert_eq!(status.condition(types::DEGRADED).unwrap().status, ConditionStatus::True);
    }

    #[test]
    fn error_policy_backs_off_on_permanent_errors() {
        let (client, _) = recording_client();
        let h = harness(client, NoopEventPublisher, UpgradePatches::default());
        let action = error_policy(Arc::new(hc()), &Error::validation("bad"), h.ctx.clone());
        assert_eq!(action, Action::requeue(Duration::from_secs(60)));
    }
}
