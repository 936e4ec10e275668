//! Node placement and certificate settings shared by several builders

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::crd::{CertRotateConfig, HyperConverged, NodePlacement};
use crate::quantity::{format_duration, parse_duration};
use crate::Error;

const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";
const ANTI_AFFINITY_WEIGHT: i32 = 90;

/// Placement in the operand APIs' `{nodeSelector, affinity, tolerations}`
/// shape; `None` when the placement is empty
pub fn placement_value(placement: Option<&NodePlacement>) -> Result<Option<Value>, Error> {
    let Some(placement) = placement else {
        return Ok(None);
    };
    let empty = placement.affinity.is_none()
        && placement.node_selector.as_ref().is_none_or(BTreeMap::is_empty)
        && placement.tolerations.as_ref().is_none_or(Vec::is_empty);
    if empty {
        return Ok(None);
    }
    Ok(Some(serde_json::to_value(placement)?))
}

/// Apply infra placement to a pod template spec, or spread the replicas
/// across nodes when the cluster has more than one worker
pub fn place_pods(
    pod_spec: &mut Value,
    hc: &HyperConverged,
    highly_available: bool,
    selector: &BTreeMap<String, String>,
) -> Result<(), Error> {
    if let Some(placement) = hc.spec.infra.node_placement.as_ref() {
        if let Some(node_selector) = &placement.node_selector {
            pod_spec["nodeSelector"] = serde_json::to_value(node_selector)?;
        }
        if let Some(affinity) = &placement.affinity {
            pod_spec["affinity"] = serde_json::to_value(affinity)?;
        }
        if let Some(tolerations) = &placement.tolerations {
            pod_spec["tolerations"] = serde_json::to_value(tolerations)?;
        }
    } else if highly_available {
        pod_spec["affinity"] = json!({
            "podAntiAffinity": {
                "preferredDuringSchedulingIgnoredDuringExecution": [{
                    "weight": ANTI_AFFINITY_WEIGHT,
                    "podAffinityTerm": {
                        "labelSelector": {"matchLabels": selector},
                        "topologyKey": HOSTNAME_TOPOLOGY_KEY,
                    }
                }]
            }
        });
    }
    Ok(())
}

/// Certificate rotation intervals with defaults applied, as Go durations
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertDurations {
    /// CA lifetime
    pub ca_duration: String,
    /// CA renewal lead time
    pub ca_renew_before: String,
    /// Serving certificate lifetime
    pub server_duration: String,
    /// Serving certificate renewal lead time
    pub server_renew_before: String,
}

fn normalized(value: Option<&String>, default: &str) -> Result<String, Error> {
    let raw = value.map_or(default, String::as_str);
    Ok(format_duration(parse_duration(raw)?))
}

impl CertDurations {
    /// Intervals of `hc`; CA 48h/24h and server 24h/12h when unset
    pub fn of(hc: &HyperConverged) -> Result<Self, Error> {
        let CertRotateConfig { duration: ca, renew_before: ca_renew } = &hc.spec.cert_config.ca;
        let CertRotateConfig { duration: server, renew_before: server_renew } =
            &hc.spec.cert_config.server;
        Ok(Self {
            ca_duration: normalized(ca.as_ref(), "48h")?,
            ca_renew_before: normalized(ca_renew.as_ref(), "24h")?,
            server_duration: normalized(server.as_ref(), "24h")?,
            server_renew_before: normalized(server_renew.as_ref(), "12h")?,
        })
    }

    /// `{ca: {duration, renewBefore}, server: {...}}` used by the KubeVirt and CDI APIs
    pub fn to_cert_config(&self) -> Value {
        json!({
            "ca": {"duration": self.ca_duration, "renewBefore": self.ca_renew_before},
            "server": {"duration": self.server_duration, "renewBefore": self.server_renew_before},
        })
    }
}
