//! CPU-model recommender
//!
//! Nodes advertise the CPU models they can emulate through
//! `cpu-model.node.kubevirt.io/<model>=true` labels. Each model is scored by
//! a rough PassMark figure plus its share of the cluster's nodes, cores and
//! memory; the best few are published in status so users can pick a default
//! CPU model that most of the cluster supports.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Node;

use crate::crd::CpuModelInfo;
use crate::quantity::parse_quantity;

/// Label prefix of supported CPU models
pub const CPU_MODEL_LABEL_PREFIX: &str = "cpu-model.node.kubevirt.io/";

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Weights of the recommendation score, and how many models to keep
#[derive(Clone, Debug, PartialEq)]
pub struct CpuModelWeights {
    /// Weight of the PassMark score
    pub benchmark: f64,
    /// Weight of the share of cluster cores
    pub cpu: f64,
    /// Weight of the share of cluster memory
    pub memory: f64,
    /// Weight of the share of cluster nodes
    pub nodes: f64,
    /// Number of models published
    pub top_n: usize,
}

impl Default for CpuModelWeights {
    fn default() -> Self {
        Self {
            benchmark: 0.50,
            cpu: 0.20,
            memory: 0.15,
            nodes: 0.15,
            top_n: 4,
        }
    }
}

/// Approximate PassMark scores keyed by libvirt model name
const PASSMARK_SCORES: &[(&str, u32)] = &[
    ("Broadwell", 7800),
    ("Broadwell-IBRS", 7800),
    ("Broadwell-noTSX", 7800),
    ("Broadwell-noTSX-IBRS", 7800),
    ("Broadwell-v1", 7800),
    ("Broadwell-v2", 7800),
    ("Broadwell-v3", 7800),
    ("Broadwell-v4", 7800),
    ("Cascadelake-Server", 22000),
    ("Cascadelake-Server-noTSX", 22000),
    ("Cascadelake-Server-v2", 22000),
    ("Cascadelake-Server-v3", 22000),
    ("Cascadelake-Server-v4", 22000),
    ("Cascadelake-Server-v5", 22000),
    ("Cooperlake", 24000),
    ("Cooperlake-v1", 24000),
    ("Cooperlake-v2", 24000),
    ("Denverton", 3500),
    ("Denverton-v1", 3500),
    ("Denverton-v2", 3500),
    ("Denverton-v3", 3500),
    ("Haswell", 7200),
    ("Haswell-IBRS", 7200),
    ("Haswell-noTSX", 7200),
    ("Haswell-noTSX-IBRS", 7200),
    ("Haswell-v1", 7200),
    ("Haswell-v2", 7200),
    ("Haswell-v3", 7200),
    ("Haswell-v4", 7200),
    ("Icelake-Server", 25000),
    ("Icelake-Server-noTSX", 25000),
    ("Icelake-Server-v1", 25000),
    ("Icelake-Server-v2", 25000),
    ("Icelake-Server-v3", 25000),
    ("Icelake-Server-v4", 25000),
    ("Icelake-Server-v5", 25000),
    ("Icelake-Server-v6", 25000),
    ("IvyBridge", 6400),
    ("IvyBridge-IBRS", 6400),
    ("IvyBridge-v1", 6400),
    ("IvyBridge-v2", 6400),
    ("Nehalem", 3800),
    ("Nehalem-IBRS", 3800),
    ("Nehalem-v1", 3800),
    ("Nehalem-v2", 3800),
    ("Penryn", 2400),
    ("Penryn-v1", 2400),
    ("SandyBridge", 5600),
    ("SandyBridge-IBRS", 5600),
    ("SandyBridge-v1", 5600),
    ("SandyBridge-v2", 5600),
    ("SapphireRapids", 35000),
    ("SapphireRapids-v1", 35000),
    ("SapphireRapids-v2", 35000),
    ("Skylake-Client", 8900),
    ("Skylake-Client-IBRS", 8900),
    ("Skylake-Client-noTSX-IBRS", 8900),
    ("Skylake-Client-v1", 8900),
    ("Skylake-Client-v2", 8900),
    ("Skylake-Client-v3", 8900),
    ("Skylake-Client-v4", 8900),
    ("Skylake-Server", 15000),
    ("Skylake-Server-IBRS", 15000),
    ("Skylake-Server-noTSX-IBRS", 15000),
    ("Skylake-Server-v1", 15000),
    ("Skylake-Server-v2", 15000),
    ("Skylake-Server-v3", 15000),
    ("Skylake-Server-v4", 15000),
    ("Skylake-Server-v5", 15000),
    ("Snowridge", 4500),
    ("Snowridge-v1", 4500),
    ("Snowridge-v2", 4500),
    ("Snowridge-v3", 4500),
    ("Snowridge-v4", 4500),
    ("Westmere", 4200),
    ("Westmere-IBRS", 4200),
    ("Westmere-v1", 4200),
    ("Westmere-v2", 4200),
    ("Conroe", 1800),
    ("Conroe-v1", 1800),
    ("EPYC", 25000),
    ("EPYC-IBPB", 25000),
    ("EPYC-v1", 25000),
    ("EPYC-v2", 25000),
    ("EPYC-v3", 25000),
    ("EPYC-v4", 25000),
    ("EPYC-Rome", 35000),
    ("EPYC-Rome-v1", 35000),
    ("EPYC-Rome-v2", 35000),
    ("EPYC-Rome-v3", 35000),
    ("EPYC-Rome-v4", 35000),
    ("EPYC-Milan", 45000),
    ("EPYC-Milan-v1", 45000),
    ("EPYC-Milan-v2", 45000),
    ("EPYC-Genoa", 55000),
    ("EPYC-Genoa-v1", 55000),
    ("Opteron_G1", 800),
    ("Opteron_G1-v1", 800),
    ("Opteron_G2", 1000),
    ("Opteron_G2-v1", 1000),
    ("Opteron_G3", 1400),
    ("Opteron_G3-v1", 1400),
    ("Opteron_G4", 4200),
    ("Opteron_G4-v1", 4200),
    ("Opteron_G5", 6800),
    ("Opteron_G5-v1", 6800),
    ("Dhyana", 20000),
    ("Dhyana-v1", 20000),
    ("Dhyana-v2", 20000),
    ("phenom", 2800),
    ("phenom-v1", 2800),
];

/// PassMark score of a model; 0 when unknown
pub fn passmark(model: &str) -> u32 {
    PASSMARK_SCORES
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, score)| *score)
        .unwrap_or(0)
}

fn max_passmark() -> u32 {
    PASSMARK_SCORES.iter().map(|(_, s)| *s).max().unwrap_or(1)
}

struct ClusterTotals {
    nodes: usize,
    cpu: f64,
    memory_gib: f64,
}

fn weighted_score(model: &CpuModelInfo, totals: &ClusterTotals, weights: &CpuModelWeights) -> f64 {
    let benchmark =
        f64::from(model.benchmark) / f64::from(max_passmark()) * 100.0 * weights.benchmark;

    let cpu = if totals.cpu > 0.0 {
        model.cpu / totals.cpu * 100.0 * weights.cpu
    } else {
        0.0
    };

    let memory = if totals.memory_gib > 0.0 {
        model.memory / GIB / totals.memory_gib * 100.0 * weights.memory
    } else {
        0.0
    };

    let nodes = if totals.nodes > 0 {
        f64::from(model.nodes) / totals.nodes as f64 * 100.0 * weights.nodes
    } else {
        0.0
    };

    benchmark + cpu + memory + nodes
}

fn capacity(node: &Node, resource: &str) -> Option<f64> {
    node.status
        .as_ref()
        .and_then(|s| s.capacity.as_ref())
        .and_then(|c| c.get(resource))
        .and_then(|q| parse_quantity(&q.0).ok())
}

fn supported_models(node: &Node) -> impl Iterator<Item = &str> {
    node.metadata
        .labels
        .iter()
        .flatten()
        .filter(|(_, value)| value.as_str() == "true")
        .filter_map(|(key, _)| key.strip_prefix(CPU_MODEL_LABEL_PREFIX))
}

/// Rank the CPU models supported by `nodes`, best first, keeping `top_n`
pub fn recommend(nodes: &[Node], weights: &CpuModelWeights) -> Vec<CpuModelInfo> {
    let totals = ClusterTotals {
        nodes: nodes.len(),
        cpu: nodes.iter().filter_map(|n| capacity(n, "cpu")).sum(),
        memory_gib: nodes
            .iter()
            .filter_map(|n| capacity(n, "memory"))
            .map(|m| m / GIB)
            .sum(),
    };

    let mut per_model: BTreeMap<&str, CpuModelInfo> = BTreeMap::new();
    for node in nodes {
        let cpu = capacity(node, "cpu");
        let memory = capacity(node, "memory");
        for model in supported_models(node) {
            let info = per_model.entry(model).or_insert_with(|| CpuModelInfo {
                name: model.to_string(),
                benchmark: passmark(model),
                ..Default::default()
            });
            info.nodes += 1;
            info.cpu += cpu.unwrap_or_default();
            info.memory += memory.unwrap_or_default();
        }
    }

    let mut scored: Vec<(f64, CpuModelInfo)> = per_model
        .into_values()
        .map(|m| (weighted_score(&m, &totals, weights), m))
        .collect();
    scored.sort_by(|(sa, a), (sb, b)| sb.total_cmp(sa).then_with(|| a.name.cmp(&b.name)));
    scored.truncate(weights.top_n);
    scored.into_iter().map(|(_, m)| m).collect()
}
