//! Managed objects of the HyperConverged resource
//!
//! Every object the operator writes is reconciled by an [`Operand`]: a
//! [`generic::GenericOperand`] pairs a builder with the update hooks of its
//! kind, and a [`conditional::ConditionalOperand`] adds a predicate that
//! decides whether the object should exist at all. [`OperandSet`] holds the
//! handlers in the fixed order the reconciler runs them.
//!
//! Besides reconciling, the set supports the two other lifecycle paths: the
//! uninstall run from the HyperConverged finalizer and the dry-run checks
//! the validating webhook performs before an update or a delete is admitted.

pub mod cdi;
pub mod client;
pub mod conditional;
#[cfg(test)]
pub mod fake;
pub mod generic;
pub mod handler;
pub mod jsonpatch;
pub mod kubevirt;
pub mod labels;
pub mod launcher_webhook;
pub mod monitoring;
pub mod network_addons;
pub mod node_agent;
pub mod placement;
pub mod rbac;
pub mod ssp;

use std::time::Duration;

use futures::future::{join_all, try_join_all};
use kube::runtime::events::EventType;
use kube::Resource;
use tracing::{info, warn};

#[cfg(test)]
pub use client::MockOperandClient;
pub use client::{KubeOperandClient, ObjectId, OperandClient, FIELD_MANAGER};
pub use handler::{BuildContext, EnsureRequest, EnsureResult, Operand};

use crate::crd::operands::{cdi_name, kubevirt_name, operand_refs, Cdi, KubeVirt};
use crate::crd::HyperConverged;
use crate::events::{actions, reasons, EventPublisher};
use crate::kube_utils::HasApiResource;
use crate::Error;

/// Deadline for removing the operands when the HyperConverged resource is deleted
pub const UNINSTALL_TIMEOUT: Duration = Duration::from_secs(30);

const DEPENDENTS_FAILED_MESSAGE: &str =
    "The uninstall request failed on dependent components, please check their logs.";

/// Every handler, in reconcile order
///
/// Cluster-wide prerequisites come first, then the optional helper bundles
/// (accounts and RBAC before workloads, workloads before the webhook
/// configurations pointing at them), then the operand CRs and finally the
/// alerting rules.
pub struct OperandSet {
    operands: Vec<Box<dyn Operand>>,
}

impl OperandSet {
    /// Handlers for a cluster; `monitoring_available` tells whether the
    /// Prometheus Operator API is served
    pub fn new(monitoring_available: bool) -> Self {
        // Each helper bundle lists its own objects in dependency order
        // (accounts and RBAC, then issuer and certificate, then workloads,
        // services and webhook configurations). Bundles are appended whole,
        // so every bundle is complete before the operand CRs run.
        let mut operands: Vec<Box<dyn Operand>> =
            vec![Box::new(kubevirt::priority_class_operand())];
        for operand in node_agent::operands() {
            operands.push(Box::new(operand));
        }
        for operand in launcher_webhook::operands() {
            operands.push(Box::new(operand));
        }
        operands.push(Box::new(kubevirt::operand()));
        operands.push(Box::new(cdi::operand()));
        operands.push(Box::new(network_addons::operand()));
        operands.push(Box::new(ssp::operand()));
        if monitoring_available {
            operands.push(Box::new(monitoring::operand()));
        }
        Self { operands }
    }

    /// Handlers in reconcile order
    pub fn iter(&self) -> impl Iterator<Item = &dyn Operand> {
        self.operands.iter().map(|o| o.as_ref())
    }

    /// Number of handlers
    pub fn len(&self) -> usize {
        self.operands.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.operands.is_empty()
    }

    /// Remove everything the operator deployed for `hc`
    ///
    /// Auxiliary objects go first and in parallel, then the virtualization
    /// engine, then the data importer; both refuse their own deletion while
    /// workloads exist if the uninstall strategy says so. Only objects
    /// carrying the managed-by label are touched.
    pub async fn uninstall(
        &self,
        client: &dyn OperandClient,
        hc: &HyperConverged,
        ctx: &BuildContext,
        events: &dyn EventPublisher,
    ) -> Result<(), Error> {
        let hc_ref = hc.object_ref(&());
        let auxiliary = self.auxiliary_ids(hc, ctx);
        let kubevirt = ObjectId::new(
            KubeVirt::api_resource(),
            Some(&ctx.namespace),
            kubevirt_name(hc.name()),
        );
        let cdi = ObjectId::new(Cdi::api_resource(), None, cdi_name(hc.name()));

        let removal = async {
            let outcomes = join_all(auxiliary.iter().map(|id| delete_managed(client, id))).await;
            let mut failed = false;
            for (id, outcome) in auxiliary.iter().zip(outcomes) {
                match outcome {
                    Ok(true) => {
                        events
                            .publish(
                                &hc_ref,
                                EventType::Normal,
                                reasons::KILLING,
                                actions::UNINSTALL,
                                Some(format!("Removed {id}")),
                            )
                            .await;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(object = %id, error = %e, "failed to remove object");
                        failed = true;
                    }
                }
            }
            if failed {
                events
                    .publish(
                        &hc_ref,
                        EventType::Warning,
                        reasons::ERR_HCO_UNINSTALL,
                        actions::UNINSTALL,
                        Some(DEPENDENTS_FAILED_MESSAGE.to_string()),
                    )
                    .await;
                return Err(Error::internal("failed to remove dependent components"));
            }

            match delete_managed(client, &kubevirt).await {
                Ok(removed) => {
                    if removed {
                        events
                            .publish(
                                &hc_ref,
                                EventType::Normal,
                                reasons::KILLING,
                                actions::UNINSTALL,
                                Some(format!("Removed {kubevirt}")),
                            )
                            .await;
                    }
                }
                Err(e) => {
                    events
                        .publish(
                            &hc_ref,
                            EventType::Warning,
                            reasons::ERR_VIRT_UNINSTALL,
                            actions::UNINSTALL,
                            Some(format!("The uninstall request failed on virt component: {e}")),
                        )
                        .await;
                    return Err(e);
                }
            }

            match delete_managed(client, &cdi).await {
                Ok(removed) => {
                    if removed {
                        events
                            .publish(
                                &hc_ref,
                                EventType::Normal,
                                reasons::KILLING,
                                actions::UNINSTALL,
                                Some(format!("Removed {cdi}")),
                            )
                            .await;
                    }
                    Ok(())
                }
                Err(e) => {
                    events
                        .publish(
                            &hc_ref,
                            EventType::Warning,
                            reasons::ERR_CDI_UNINSTALL,
                            actions::UNINSTALL,
                            Some(format!("The uninstall request failed on CDI component: {e}")),
                        )
                        .await;
                    Err(e)
                }
            }
        };

        match tokio::time::timeout(UNINSTALL_TIMEOUT, removal).await {
            Ok(result) => {
                if result.is_ok() {
                    info!(hyperconverged = %hc.name(), "operands removed");
                }
                result
            }
            Err(_) => {
                events
                    .publish(
                        &hc_ref,
                        EventType::Warning,
                        reasons::ERR_HCO_UNINSTALL,
                        actions::UNINSTALL,
                        Some(DEPENDENTS_FAILED_MESSAGE.to_string()),
                    )
                    .await;
                Err(Error::timeout(format!(
                    "operands were not removed within {UNINSTALL_TIMEOUT:?}"
                )))
            }
        }
    }

    fn auxiliary_ids(&self, hc: &HyperConverged, ctx: &BuildContext) -> Vec<ObjectId> {
        self.iter()
            .filter(|op| op.kind() != KubeVirt::KIND && op.kind() != Cdi::KIND)
            .filter_map(|op| match op.object_id(hc, ctx) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(kind = op.kind(), error = %e, "cannot address object for removal");
                    None
                }
            })
            .collect()
    }
}

async fn delete_managed(client: &dyn OperandClient, id: &ObjectId) -> Result<bool, Error> {
    match client.get(id).await? {
        Some(existing) if labels::is_managed(&existing.metadata) => client.delete(id, false).await,
        _ => Ok(false),
    }
}

/// Ask the API server whether the operand CRs built from `hc` would be accepted
///
/// Every CR is dry-run in parallel with its own deadline; the first
/// rejection wins and abandons the others. A missing CR is a rejection too.
pub async fn dry_run_update(
    client: &dyn OperandClient,
    hc: &HyperConverged,
    ctx: &BuildContext,
    timeout: Duration,
) -> Result<(), Error> {
    let operands = [
        kubevirt::operand(),
        cdi::operand(),
        network_addons::operand(),
        ssp::operand(),
    ];
    try_join_all(operands.iter().map(|operand| async move {
        tokio::time::timeout(timeout, operand.dry_run_update(client, hc, ctx))
            .await
            .map_err(|_| {
                Error::timeout(format!(
                    "dry-run update of {} did not complete within {timeout:?}",
                    operand.kind()
                ))
            })?
    }))
    .await?;
    Ok(())
}

/// Ask the API server whether the operand CRs of `hc_name` could be deleted
///
/// CRs that are already gone are fine.
pub async fn dry_run_delete(
    client: &dyn OperandClient,
    hc_name: &str,
    namespace: &str,
    timeout: Duration,
) -> Result<(), Error> {
    let refs = operand_refs(hc_name, namespace);
    try_join_all(refs.iter().map(|r| async move {
        let id = ObjectId::new(r.api_resource.clone(), r.namespace.as_deref(), r.name.clone());
        tokio::time::timeout(timeout, client.delete(&id, true))
            .await
            .map_err(|_| {
                Error::timeout(format!(
                    "dry-run delete of {} did not complete within {timeout:?}",
                    r.component
                ))
            })?
            .map(|_| ())
    }))
    .await?;
    Ok(())
}
