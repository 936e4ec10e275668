//! Admission webhook that strips backup-hook annotations from launcher pods
//!
//! Deployed while `spec.webhooksConfig.launcherPodMutator` is set. The
//! webhook pods run this binary's `webhook` subcommand; serving certificates
//! come from a cert-manager self-signed issuer, and cert-manager injects the
//! CA bundle into the webhook configuration.

use std::collections::BTreeMap;

use k8s_openapi::api::admissionregistration::v1::MutatingWebhookConfiguration;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::{ApiResource, DynamicObject};
use serde_json::json;

use super::conditional::ConditionalOperand;
use super::generic::{managed_object, GenericOperand, UpdateHooks};
use super::handler::BuildContext;
use super::labels::{self, Component};
use super::placement::{place_pods, CertDurations};
use super::rbac;
use crate::config::{
    DEFAULT_WEBHOOK_PORT, OPERATOR_NAMESPACE_ENV, WEBHOOK_CERT_DIR_ENV, WEBHOOK_PORT_ENV,
};
use crate::crd::operands::{Certificate, Issuer};
use crate::crd::{HyperConverged, HCO_GROUP};
use crate::kube_utils::HasApiResource;
use crate::webhook::LAUNCHER_POD_PATH;
use crate::Error;

/// Name shared by the service account, role, service, deployment and
/// webhook configuration
pub const NAME: &str = "kubevirt-launcher-webhook";
/// Self-signed issuer of the serving certificate
pub const ISSUER_NAME: &str = "kubevirt-launcher-webhook-selfsigned";
/// Serving certificate and the secret holding it
pub const CERTIFICATE_NAME: &str = "kubevirt-launcher-webhook-tls";
/// Pods the webhook applies to carry this label
pub const LAUNCHER_LABEL: (&str, &str) = ("kubevirt.io", "virt-launcher");

const INJECT_CA_ANNOTATION: &str = "cert-manager.io/inject-ca-from";
const WEBHOOK_NAME: &str = "launcher-pod-mutator.hco.kubevirt.io";
const CERT_DIR: &str = "/etc/webhook/certs";
const SERVICE_PORT: u16 = 443;

/// Whether the webhook is requested
pub fn should_deploy(hc: &HyperConverged) -> bool {
    hc.launcher_pod_mutator_enabled()
}

/// Handlers of every object of the webhook, in creation order
pub fn operands() -> Vec<ConditionalOperand> {
    let conditional = |inner| ConditionalOperand::new(inner, should_deploy);
    vec![
        conditional(rbac::service_account_operand(build_service_account)),
        conditional(rbac::cluster_role_operand(build_cluster_role)),
        conditional(rbac::cluster_role_binding_operand(build_cluster_role_binding)),
        conditional(GenericOperand::new(Issuer::api_resource(), build_issuer, UpdateHooks::Spec)),
        conditional(GenericOperand::new(
            Certificate::api_resource(),
            build_certificate,
            UpdateHooks::Spec,
        )),
        conditional(GenericOperand::new(
            ApiResource::erase::<Deployment>(&()),
            build_deployment,
            UpdateHooks::Workload,
        )),
        conditional(GenericOperand::new(
            ApiResource::erase::<Service>(&()),
            build_service,
            UpdateHooks::Service,
        )),
        conditional(GenericOperand::new(
            ApiResource::erase::<MutatingWebhookConfiguration>(&()),
            build_webhook_configuration,
            UpdateHooks::WebhookConfiguration,
        )),
    ]
}

fn build_service_account(hc: &HyperConverged, ctx: &BuildContext) -> Result<DynamicObject, Error> {
    Ok(rbac::service_account(NAME, hc, ctx, Component::Deployment))
}

fn build_cluster_role(hc: &HyperConverged, ctx: &BuildContext) -> Result<DynamicObject, Error> {
    let rules = json!([{
        "apiGroups": [HCO_GROUP],
        "resources": ["hyperconvergeds"],
        "verbs": ["get", "list", "watch"],
    }]);
    Ok(rbac::cluster_role(NAME, rules, hc, ctx, Component::Deployment))
}

fn build_cluster_role_binding(
    hc: &HyperConverged,
    ctx: &BuildContext,
) -> Result<DynamicObject, Error> {
    Ok(rbac::cluster_role_binding(NAME, NAME, hc, ctx, Component::Deployment))
}

fn build_issuer(hc: &HyperConverged, ctx: &BuildContext) -> Result<DynamicObject, Error> {
    let ar = Issuer::api_resource();
    let mut issuer = managed_object(&ar, ISSUER_NAME, true, hc, ctx, Component::Deployment);
    issuer.data = json!({"spec": {"selfSigned": {}}});
    Ok(issuer)
}

fn build_certificate(hc: &HyperConverged, ctx: &BuildContext) -> Result<DynamicObject, Error> {
    let mut cert = managed_object(
        &Certificate::api_resource(),
        CERTIFICATE_NAME,
        true,
        hc,
        ctx,
        Component::Deployment,
    );
    let durations = CertDurations::of(hc)?;
    cert.data = json!({
        "spec": {
            "secretName": CERTIFICATE_NAME,
            "issuerRef": {"name": ISSUER_NAME, "kind": "Issuer"},
            "dnsNames": [
                format!("{NAME}.{}.svc", ctx.namespace),
                format!("{NAME}.{}.svc.cluster.local", ctx.namespace),
            ],
            "duration": durations.server_duration,
            "renewBefore": durations.server_renew_before,
        }
    });
    Ok(cert)
}

fn pod_selector() -> serde_json::Value {
    json!({"name": NAME})
}

/// Desired webhook deployment
pub fn build_deployment(hc: &HyperConverged, ctx: &BuildContext) -> Result<DynamicObject, Error> {
    let ar = ApiResource::erase::<Deployment>(&());
    let mut deployment = managed_object(&ar, NAME, true, hc, ctx, Component::Deployment);

    let mut pod_labels =
        labels::canonical(hc.name(), Component::Deployment, &ctx.versions.operator);
    pod_labels.insert("name".to_string(), NAME.to_string());

    let probe = |path: &str| {
        json!({
            "httpGet": {"path": path, "port": DEFAULT_WEBHOOK_PORT, "scheme": "HTTPS"},
            "initialDelaySeconds": 5,
            "periodSeconds": 10,
        })
    };
    let mut pod_spec = json!({
        "serviceAccountName": NAME,
        "priorityClassName": super::kubevirt::PRIORITY_CLASS_NAME,
        "containers": [{
            "name": "webhook",
            "image": ctx.images.launcher_webhook,
            "imagePullPolicy": "IfNotPresent",
            "args": ["webhook"],
            "ports": [{"name": "https", "containerPort": DEFAULT_WEBHOOK_PORT, "protocol": "TCP"}],
            "env": [
                {
                    "name": OPERATOR_NAMESPACE_ENV,
                    "valueFrom": {"fieldRef": {"fieldPath": "metadata.namespace"}}
                },
                {"name": WEBHOOK_PORT_ENV, "value": DEFAULT_WEBHOOK_PORT.to_string()},
                {"name": WEBHOOK_CERT_DIR_ENV, "value": CERT_DIR},
            ],
            "resources": {"requests": {"cpu": "5m", "memory": "30Mi"}},
            "livenessProbe": probe("/healthz"),
            "readinessProbe": probe("/readyz"),
            "securityContext": {
                "allowPrivilegeEscalation": false,
                "capabilities": {"drop": ["ALL"]},
            },
            "volumeMounts": [{"name": "tls-cert", "mountPath": CERT_DIR, "readOnly": true}],
        }],
        "securityContext": {"runAsNonRoot": true, "seccompProfile": {"type": "RuntimeDefault"}},
        "volumes": [{"name": "tls-cert", "secret": {"secretName": CERTIFICATE_NAME}}],
    });
    place_pods(
        &mut pod_spec,
        hc,
        ctx.infrastructure_highly_available,
        &labels::selector(hc.name(), Component::Deployment),
    )?;

    deployment.data = json!({
        "spec": {
            "replicas": if ctx.infrastructure_highly_available { 2 } else { 1 },
            "selector": {"matchLabels": pod_selector()},
            "template": {
                "metadata": {"labels": pod_labels},
                "spec": pod_spec,
            },
        }
    });
    Ok(deployment)
}

fn build_service(hc: &HyperConverged, ctx: &BuildContext) -> Result<DynamicObject, Error> {
    let ar = ApiResource::erase::<Service>(&());
    let mut service = managed_object(&ar, NAME, true, hc, ctx, Component::Deployment);
    service.data = json!({
        "spec": {
            "selector": pod_selector(),
            "ports": [{
                "name": "https",
                "port": SERVICE_PORT,
                "targetPort": DEFAULT_WEBHOOK_PORT,
                "protocol": "TCP",
            }],
        }
    });
    Ok(service)
}

/// Desired mutating webhook configuration; cluster scoped
pub fn build_webhook_configuration(
    hc: &HyperConverged,
    ctx: &BuildContext,
) -> Result<DynamicObject, Error> {
    let ar = ApiResource::erase::<MutatingWebhookConfiguration>(&());
    let launcher_selector: BTreeMap<&str, &str> = [LAUNCHER_LABEL].into();
    let mut config = managed_object(&ar, NAME, false, hc, ctx, Component::Deployment);
    config.metadata.annotations = Some(
        [(
            INJECT_CA_ANNOTATION.to_string(),
            format!("{}/{CERTIFICATE_NAME}", ctx.namespace),
        )]
        .into(),
    );
    config.data = json!({
        "webhooks": [{
            "name": WEBHOOK_NAME,
            "admissionReviewVersions": ["v1"],
            "clientConfig": {
                "service": {
                    "name": NAME,
                    "namespace": ctx.namespace,
                    "path": LAUNCHER_POD_PATH,
                    "port": SERVICE_PORT,
                }
            },
            "rules": [{
                "operations": ["CREATE"],
                "apiGroups": [""],
                "apiVersions": ["v1"],
                "resources": ["pods"],
            }],
            "objectSelector": {"matchLabels": launcher_selector},
            "failurePolicy": "Fail",
            "sideEffects": "None",
            "timeoutSeconds": 10,
        }]
    });
    Ok(config)
}
