//! HyperConverged operator - virtualization platform meta-operator

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use kube::Client;

use hyperconverged::config::{OperatorConfig, OPERATOR_NAMESPACE_ENV};
use hyperconverged::controller::{self, Clients, Context};
use hyperconverged::crd::hyperconverged_crd;
use hyperconverged::golden_images::GoldenImageCatalog;
use hyperconverged::telemetry::{init_telemetry, TelemetryConfig};
use hyperconverged::tls_profile::TlsProfileCache;
use hyperconverged::upgrade_patch::UpgradePatches;
use hyperconverged::webhook::{self, WebhookState};

/// Namespace written into the generated CRD when none is configured
const DEFAULT_NAMESPACE: &str = "kubevirt-hyperconverged";

/// API group/version of the Prometheus Operator rule kind
const MONITORING_API_VERSION: &str = "monitoring.coreos.com/v1";

/// HyperConverged - meta-operator for a virtualization platform on Kubernetes
#[derive(Parser, Debug)]
#[command(name = "hyperconverged-operator", version, about, long_about = None)]
struct Cli {
    /// Print the HyperConverged CRD and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller and the webhook server (default mode)
    Operator,

    /// Run only the webhook server
    ///
    /// Used by the launcher-pod webhook deployment, which needs the
    /// admission endpoints but must not reconcile anything.
    Webhook(WebhookArgs),
}

/// Webhook mode arguments
#[derive(Parser, Debug)]
struct WebhookArgs {
    /// Port of the HTTPS server; overrides WEBHOOK_PORT
    #[arg(long)]
    port: Option<u16>,

    /// Directory holding tls.crt and tls.key; overrides WEBHOOK_CERT_DIR
    #[arg(long)]
    cert_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The webhook server and the kube client both need a process-wide provider
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!(
            "CRITICAL: Failed to install the aws-lc-rs crypto provider: {:?}. \
             The operator cannot serve or call TLS endpoints without it.",
            e
        );
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        let namespace =
            std::env::var(OPERATOR_NAMESPACE_ENV).unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string());
        let crd = hyperconverged_crd(&namespace).context("failed to build the HyperConverged CRD")?;
        let crd = serde_yaml::to_string(&crd).context("failed to serialize CRD")?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig::default()).context("failed to initialize telemetry")?;

    match cli.command {
        Some(Commands::Webhook(args)) => run_webhook(args).await,
        Some(Commands::Operator) | None => run_operator().await,
    }
}

/// Run the controller and the admission server side by side
async fn run_operator() -> anyhow::Result<()> {
    let config = OperatorConfig::from_env().context("invalid operator configuration")?;

    let catalog = GoldenImageCatalog::load(config.dict_dir.as_deref())
        .context("failed to load the golden image catalog")?;
    tracing::info!(templates = catalog.len(), "golden image catalog loaded");

    let upgrade_patches = UpgradePatches::load(config.upgrade_patches_file.as_deref())
        .context("failed to load the upgrade patches")?;

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let monitoring_available = monitoring_available(&client).await;
    tracing::info!(monitoring_available, "checked for the Prometheus Operator API");

    let tls_profiles = Arc::new(TlsProfileCache::new());
    let webhook_state = Arc::new(WebhookState::new(
        config.clone(),
        client.clone(),
        tls_profiles.clone(),
    ));
    let port = config.webhook_port;
    let cert_dir = config.webhook_cert_dir.clone();

    let ctx = Arc::new(Context::new(
        config,
        Clients::from_client(client.clone()),
        Arc::new(catalog),
        Arc::new(upgrade_patches),
        tls_profiles,
        monitoring_available,
    ));

    tracing::info!(namespace = %ctx.config.namespace, "starting HyperConverged operator");

    tokio::select! {
        _ = controller::run(client, ctx) => {
            tracing::info!("controller stopped");
            Ok(())
        }
        result = webhook::serve(webhook_state, port, &cert_dir) => {
            result.context("webhook server failed")
        }
    }
}

/// Run only the admission endpoints
async fn run_webhook(args: WebhookArgs) -> anyhow::Result<()> {
    let config = OperatorConfig::from_env().context("invalid operator configuration")?;
    let port = args.port.unwrap_or(config.webhook_port);
    let cert_dir = args
        .cert_dir
        .unwrap_or_else(|| config.webhook_cert_dir.clone());

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let state = Arc::new(WebhookState::new(
        config,
        client,
        Arc::new(TlsProfileCache::new()),
    ));
    webhook::serve(state, port, &cert_dir)
        .await
        .context("webhook server failed")
}

/// Whether the cluster serves PrometheusRule, so alerting rules can be managed
async fn monitoring_available(client: &Client) -> bool {
    match client.list_api_group_resources(MONITORING_API_VERSION).await {
        Ok(resources) => resources
            .resources
            .iter()
            .any(|r| r.kind == "PrometheusRule"),
        Err(e) => {
            tracing::debug!(error = %e, "monitoring API not served");
            false
        }
    }
}
