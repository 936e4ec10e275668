//! Wiring of the HyperConverged controller into kube-runtime
//!
//! Besides the HyperConverged resource itself, the controller watches the
//! cluster nodes (the topology feeds several operands) and the operand CRs
//! it manages, so that an out-of-band change is reverted promptly. Every
//! secondary event maps onto the singleton.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, DynamicObject};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::Client;
use tracing::{debug, error, info};

use super::hyperconverged::{error_policy, reconcile, Context};
use crate::crd::operands::operand_refs;
use crate::crd::{HyperConverged, HYPERCONVERGED_NAME};
use crate::metrics;
use crate::operands::labels::{MANAGED_BY_LABEL, MANAGED_BY_VALUE};

/// Server-side watch timeout, in seconds
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Run the controller until a termination signal arrives
pub async fn run(client: Client, ctx: Arc<Context>) {
    let namespace = ctx.config.namespace.clone();
    let singleton = ObjectRef::<HyperConverged>::new(HYPERCONVERGED_NAME).within(&namespace);
    metrics::set_hyperconverged_exists(false);

    let hyperconvergeds: Api<HyperConverged> = Api::namespaced(client.clone(), &namespace);
    let nodes: Api<Node> = Api::all(client.clone());

    let to_singleton = singleton.clone();
    let mut controller = Controller::new(
        hyperconvergeds,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .watches(nodes, WatcherConfig::default().any_semantic(), move |_| {
        Some(to_singleton.clone())
    });

    let managed = format!("{MANAGED_BY_LABEL}={MANAGED_BY_VALUE}");
    for operand in operand_refs(HYPERCONVERGED_NAME, &namespace) {
        let api: Api<DynamicObject> = match operand.namespace.as_deref() {
            Some(ns) => Api::namespaced_with(client.clone(), ns, &operand.api_resource),
            None => Api::all_with(client.clone(), &operand.api_resource),
        };
        debug!(kind = %operand.api_resource.kind, "watching operand");
        let to_singleton = singleton.clone();
        controller = controller.watches_with(
            api,
            operand.api_resource,
            WatcherConfig::default().labels(&managed),
            move |_| Some(to_singleton.clone()),
        );
    }

    info!(namespace = %namespace, "starting HyperConverged controller");
    controller
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => {
                    debug!(object = %object.name, ?action, "reconciliation completed");
                }
                Err(e) => {
                    error!(error = ?e, "reconciliation error");
                }
            }
        })
        .await;
    info!("HyperConverged controller stopped");
}
