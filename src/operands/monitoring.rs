//! The operator's alerting rules as a managed object

use kube::api::DynamicObject;

use super::generic::{managed_object, GenericOperand, UpdateHooks};
use super::handler::BuildContext;
use super::labels::Component;
use crate::crd::operands::PrometheusRule;
use crate::crd::HyperConverged;
use crate::kube_utils::HasApiResource;
use crate::metrics::alerts;
use crate::Error;

/// Handler of the `PrometheusRule`; only registered when the cluster
/// serves the Prometheus Operator API
pub fn operand() -> GenericOperand {
    GenericOperand::new(PrometheusRule::api_resource(), build, UpdateHooks::Spec)
}

fn build(hc: &HyperConverged, ctx: &BuildContext) -> Result<DynamicObject, Error> {
    let rendered = alerts::prometheus_rule(&ctx.namespace);
    let mut rule = managed_object(
        &PrometheusRule::api_resource(),
        alerts::RULE_NAME,
        true,
        hc,
        ctx,
        Component::Monitoring,
    );
    if let (Some(labels), Some(extra)) = (rule.metadata.labels.as_mut(), rendered.metadata.labels) {
        labels.extend(extra);
    }
    rule.data = rendered.data;
    Ok(rule)
}
