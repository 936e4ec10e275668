//! Operator configuration
//!
//! Everything the operator needs from its Deployment is passed as environment
//! variables. `OPERATOR_NAMESPACE` is mandatory; image and version variables
//! fall back to empty strings so the reconciler can still create objects and
//! let Kubernetes report the pull failure.

use std::path::PathBuf;
use std::time::Duration;

use crate::nodeinfo::CpuModelWeights;
use crate::Error;

/// Namespace that holds the HyperConverged singleton
pub const OPERATOR_NAMESPACE_ENV: &str = "OPERATOR_NAMESPACE";
/// Version of the operator itself, reported in `status.versions`
pub const OPERATOR_VERSION_ENV: &str = "HCO_KV_IO_VERSION";
/// Image of the memory-overcommit node agent
pub const WASP_AGENT_IMAGE_ENV: &str = "WASP_AGENT_IMAGE";
/// Image of the launcher-pod admission webhook
pub const LAUNCHER_WEBHOOK_IMAGE_ENV: &str = "LAUNCHER_WEBHOOK_IMAGE";
/// Version of the virtualization engine operand
pub const KUBEVIRT_VERSION_ENV: &str = "KUBEVIRT_VERSION";
/// Version of the data importer operand
pub const CDI_VERSION_ENV: &str = "CDI_VERSION";
/// Version of the network add-ons operand
pub const NETWORK_ADDONS_VERSION_ENV: &str = "NETWORK_ADDONS_VERSION";
/// Version of the scheduling/templates operand
pub const SSP_VERSION_ENV: &str = "SSP_VERSION";
/// Directory overriding the embedded golden-image catalog
pub const DICT_DIR_ENV: &str = "DICT_DIR";
/// File overriding the embedded upgrade-patch table
pub const UPGRADE_PATCHES_FILE_ENV: &str = "UPGRADE_PATCHES_FILE";
/// Deadline for each admission dry-run, in seconds
pub const DRY_RUN_TIMEOUT_ENV: &str = "DRY_RUN_TIMEOUT_SECONDS";
/// How many CPU models the recommender keeps
pub const CPU_MODEL_TOP_N_ENV: &str = "CPU_MODEL_TOP_N";
/// Port of the admission/conversion HTTPS server
pub const WEBHOOK_PORT_ENV: &str = "WEBHOOK_PORT";
/// Directory holding `tls.crt` and `tls.key` for the webhook server
pub const WEBHOOK_CERT_DIR_ENV: &str = "WEBHOOK_CERT_DIR";

/// Default admission dry-run deadline
pub const DEFAULT_DRY_RUN_TIMEOUT: Duration = Duration::from_secs(3);
/// Default webhook port
pub const DEFAULT_WEBHOOK_PORT: u16 = 4343;
/// Default webhook certificate directory
pub const DEFAULT_WEBHOOK_CERT_DIR: &str = "/apiserver.local.config/certificates";

/// Versions of the operator and each operand, as reported in status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Versions {
    /// Operator version; the upgrade engine compares against this
    pub operator: String,
    /// Virtualization engine version
    pub kubevirt: String,
    /// Data importer version
    pub cdi: String,
    /// Network add-ons version
    pub network_addons: String,
    /// Scheduling/templates operand version
    pub ssp: String,
}

/// Images of optional components
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentImages {
    /// Memory-overcommit node agent image
    pub wasp_agent: String,
    /// Launcher-pod admission webhook image
    pub launcher_webhook: String,
}

/// Operator configuration resolved at startup
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace of the HyperConverged singleton
    pub namespace: String,
    /// Operator and operand versions
    pub versions: Versions,
    /// Optional component images
    pub images: ComponentImages,
    /// Golden-image catalog directory; `None` uses the embedded catalog
    pub dict_dir: Option<PathBuf>,
    /// Upgrade-patch table file; `None` uses the embedded table
    pub upgrade_patches_file: Option<PathBuf>,
    /// Per-operand deadline for admission dry-runs
    pub dry_run_timeout: Duration,
    /// CPU-model recommender weights and cutoff
    pub cpu_model_weights: CpuModelWeights,
    /// Port of the webhook server
    pub webhook_port: u16,
    /// Directory holding the webhook serving certificate
    pub webhook_cert_dir: PathBuf,
}

impl OperatorConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    ///
    /// Used by `from_env` and by tests that must not mutate the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let namespace = lookup(OPERATOR_NAMESPACE_ENV)
            .filter(|ns| !ns.is_empty())
            .ok_or_else(|| {
                Error::startup(format!("{OPERATOR_NAMESPACE_ENV} environment variable is not set"))
            })?;

        let get = |key: &str| lookup(key).unwrap_or_default();

        let dry_run_timeout = match lookup(DRY_RUN_TIMEOUT_ENV) {
            Some(raw) => Duration::from_secs(raw.parse::<u64>().map_err(|e| {
                Error::startup(format!("invalid {DRY_RUN_TIMEOUT_ENV} value {raw:?}: {e}"))
            })?),
            None => DEFAULT_DRY_RUN_TIMEOUT,
        };

        let mut cpu_model_weights = CpuModelWeights::default();
        if let Some(raw) = lookup(CPU_MODEL_TOP_N_ENV) {
            cpu_model_weights.top_n = raw.parse::<usize>().map_err(|e| {
                Error::startup(format!("invalid {CPU_MODEL_TOP_N_ENV} value {raw:?}: {e}"))
            })?;
        }

        let webhook_port = match lookup(WEBHOOK_PORT_ENV) {
            Some(raw) => raw.parse::<u16>().map_err(|e| {
                Error::startup(format!("invalid {WEBHOOK_PORT_ENV} value {raw:?}: {e}"))
            })?,
            None => DEFAULT_WEBHOOK_PORT,
        };

        Ok(Self {
            namespace,
            versions: Versions {
                operator: get(OPERATOR_VERSION_ENV),
                kubevirt: get(KUBEVIRT_VERSION_ENV),
                cdi: get(CDI_VERSION_ENV),
                network_addons: get(NETWORK_ADDONS_VERSION_ENV),
                ssp: get(SSP_VERSION_ENV),
            },
            images: ComponentImages {
                wasp_agent: get(WASP_AGENT_IMAGE_ENV),
                launcher_webhook: get(LAUNCHER_WEBHOOK_IMAGE_ENV),
            },
            dict_dir: lookup(DICT_DIR_ENV).map(PathBuf::from),
            upgrade_patches_file: lookup(UPGRADE_PATCHES_FILE_ENV).map(PathBuf::from),
            dry_run_timeout,
            cpu_model_weights,
            webhook_port,
            webhook_cert_dir: lookup(WEBHOOK_CERT_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WEBHOOK_CERT_DIR)),
        })
    }

    /// Configuration used by unit tests
    pub fn for_testing(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            versions: Versions {
                operator: "1.16.0".to_string(),
                kubevirt: "1.6.0".to_string(),
                cdi: "1.62.0".to_string(),
                network_addons: "0.99.0".to_string(),
                ssp: "0.24.0".to_string(),
            },
            images: ComponentImages {
                wasp_agent: "quay.io/openshift-virtualization/wasp-agent:v1.16".to_string(),
                launcher_webhook: "quay.io/kubevirt/launcher-webhook:v1.16".to_string(),
            },
            dict_dir: None,
            upgrade_patches_file: None,
            dry_run_timeout: DEFAULT_DRY_RUN_TIMEOUT,
            cpu_model_weights: CpuModelWeights::default(),
            webhook_port: DEFAULT_WEBHOOK_PORT,
            webhook_cert_dir: PathBuf::from(DEFAULT_WEBHOOK_CERT_DIR),
        }
    }
}
