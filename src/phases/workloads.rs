//! Workload update phase.
//!
//! Repoints the transport and controller deployments at renamed identities
//! and secrets, aligns their images with the library version, and forces a
//! new revision when nothing else changed but a restart is required.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, FixedOffset, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PodSpec, PodTemplateSpec};
use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::migration::MigrationOutcome;
use super::{Notice, SiteContext};
use crate::error::SkupError;
use crate::exposure::resolve_load_balancer_host;
use crate::names::{
    CONSOLE_CERTS_SECRET, CONTROLLER_DEPLOYMENT, CONTROLLER_SERVICE, CONTROLLER_SERVICE_ACCOUNT,
    LOCAL_CLIENT_SECRET, LOCAL_SERVER_SECRET, OAUTH_PROXY_CONTAINER, ROUTER_CONSOLE_CERTS_SECRET,
    SIDECAR_SERVICE_ACCOUNT_ARG, SITE_SERVER_SECRET, TRANSPORT_DEPLOYMENT,
    TRANSPORT_SERVICE_ACCOUNT, UPDATED_ANNOTATION,
};
use crate::store::{ObjectStore, get_required};

/// RFC 1123 with numeric zone, e.g. `Mon, 02 Jan 2006 15:04:05 -0700`.
const RESTART_TIMESTAMP_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// A managed deployment and the names it must use after a rename.
#[derive(Debug, Clone, Copy)]
pub struct Workload {
    pub deployment: &'static str,
    pub service_account: &'static str,
    /// Legacy to current secret names of mounted secret volumes.
    pub secret_volumes: &'static [(&'static str, &'static str)],
}

pub const TRANSPORT: Workload = Workload {
    deployment: TRANSPORT_DEPLOYMENT,
    service_account: TRANSPORT_SERVICE_ACCOUNT,
    secret_volumes: &[
        ("skupper-amqps", LOCAL_SERVER_SECRET),
        ("skupper-internal", SITE_SERVER_SECRET),
        ("skupper-proxy-certs", ROUTER_CONSOLE_CERTS_SECRET),
    ],
};

pub const CONTROLLER: Workload = Workload {
    deployment: CONTROLLER_DEPLOYMENT,
    service_account: CONTROLLER_SERVICE_ACCOUNT,
    secret_volumes: &[
        ("skupper", LOCAL_CLIENT_SECRET),
        ("skupper-controller-certs", CONSOLE_CERTS_SECRET),
    ],
};

/// Desired state of one workload for this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadPlan<'a> {
    pub image: &'a str,
    pub rename: bool,
    /// Restart even when the definition is unchanged.
    pub force: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadsOutcome {
    pub transport_updated: bool,
    pub controller_updated: bool,
    pub notices: Vec<Notice>,
}

pub fn pod_template_mut(deployment: &mut Deployment) -> Result<&mut PodTemplateSpec, SkupError> {
    let name = deployment.name_any();
    deployment
        .spec
        .as_mut()
        .map(|s| &mut s.template)
        .ok_or(SkupError::InvalidWorkload {
            name,
            reason: "deployment has no spec".to_string(),
        })
}

pub fn pod_spec_mut(deployment: &mut Deployment) -> Result<&mut PodSpec, SkupError> {
    let name = deployment.name_any();
    pod_template_mut(deployment)?
        .spec
        .as_mut()
        .ok_or(SkupError::InvalidWorkload {
            name,
            reason: "pod template has no spec".to_string(),
        })
}

/// Repoint secret volumes mounting `from` at `to`.
pub fn update_secret_volume(spec: &mut PodSpec, from: &str, to: &str) {
    for volume in spec.volumes.iter_mut().flatten() {
        if let Some(secret) = volume.secret.as_mut() {
            if secret.secret_name.as_deref() == Some(from) {
                secret.secret_name = Some(to.to_string());
            }
        }
    }
}

/// Point the OAuth proxy sidecar at `service_account`.
pub fn update_sidecar_service_account(spec: &mut PodSpec, service_account: &str) {
    let Some(sidecar) = spec
        .containers
        .get_mut(1)
        .filter(|c| c.name == OAUTH_PROXY_CONTAINER)
    else {
        return;
    };
    for arg in sidecar.args.iter_mut().flatten() {
        if arg.starts_with(SIDECAR_SERVICE_ACCOUNT_ARG) {
            *arg = format!("{SIDECAR_SERVICE_ACCOUNT_ARG}={service_account}");
        }
    }
}

/// Apply the renamed identity and secrets of `workload`.
pub fn apply_rename(spec: &mut PodSpec, workload: &Workload) {
    spec.service_account_name = Some(workload.service_account.to_string());
    for (from, to) in workload.secret_volumes {
        update_secret_volume(spec, from, to);
    }
    update_sidecar_service_account(spec, workload.service_account);
}

/// Set the image of the main container. Returns true if it changed.
pub fn set_image(spec: &mut PodSpec, name: &str, image: &str) -> Result<bool, SkupError> {
    let container = spec
        .containers
        .first_mut()
        .ok_or_else(|| SkupError::InvalidWorkload {
            name: name.to_string(),
            reason: "no containers".to_string(),
        })?;
    if container.image.as_deref() == Some(image) {
        return Ok(false);
    }
    debug!(
        "{}: image {} -> {}",
        name,
        container.image.as_deref().unwrap_or("<none>"),
        image
    );
    container.image = Some(image.to_string());
    Ok(true)
}

/// Write a restart timestamp that differs from any previous one.
pub fn touch(template: &mut PodTemplateSpec, now: DateTime<Utc>) {
    let annotations = template
        .metadata
        .get_or_insert_with(Default::default)
        .annotations
        .get_or_insert_with(Default::default);
    let now: DateTime<FixedOffset> = now.into();
    let stamp = match annotations
        .get(UPDATED_ANNOTATION)
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
    {
        Some(previous) if previous >= now => previous + Duration::seconds(1),
        _ => now,
    };
    annotations.insert(
        UPDATED_ANNOTATION.to_string(),
        stamp.format(RESTART_TIMESTAMP_FORMAT).to_string(),
    );
}

/// Bring one deployment in line with `plan`. Returns true if it was replaced.
pub async fn update_workload<S: ObjectStore>(
    store: &S,
    workload: &Workload,
    plan: &WorkloadPlan<'_>,
) -> Result<bool> {
    let mut deployment: Deployment = get_required(store, workload.deployment).await?;
    let spec = pod_spec_mut(&mut deployment)?;

    let mut changed = false;
    if plan.rename {
        apply_rename(spec, workload);
        changed = true;
    }
    if set_image(spec, workload.deployment, plan.image)? {
        changed = true;
    }
    if !changed && !plan.force {
        debug!("{} is up to date", workload.deployment);
        return Ok(false);
    }
    if !changed {
        touch(pod_template_mut(&mut deployment)?, Utc::now());
    }

    store
        .replace(&deployment)
        .await
        .with_context(|| format!("Updating deployment {}", workload.deployment))?;
    info!(
        "Updated deployment {} (rename: {}, restart only: {})",
        workload.deployment, plan.rename, !changed
    );
    Ok(true)
}

/// Update both workloads, transport first.
pub async fn execute<S: ObjectStore>(
    ctx: &SiteContext<'_, S>,
    transport: &WorkloadPlan<'_>,
    controller: &WorkloadPlan<'_>,
    migration: Option<&MigrationOutcome>,
) -> Result<WorkloadsOutcome> {
    let mut outcome = WorkloadsOutcome::default();

    outcome.transport_updated = update_workload(ctx.store, &TRANSPORT, transport).await?;
    if outcome.transport_updated && migration.is_some_and(|m| m.router_exposed_as_ip) {
        outcome.notices.push(Notice::RelinkRequired);
    }

    outcome.controller_updated = update_workload(ctx.store, &CONTROLLER, controller).await?;
    if outcome.controller_updated && migration.is_some_and(|m| m.console_uses_load_balancer) {
        match resolve_load_balancer_host(ctx.store, CONTROLLER_SERVICE, &ctx.poll).await {
            Ok(Some(host)) => outcome.notices.push(Notice::console_at(&host)),
            Ok(None) => warn!(
                "No load balancer address assigned to {} yet",
                CONTROLLER_SERVICE
            ),
            Err(e) => warn!("Could not determine new console url: {:#}", e),
        }
    }

    Ok(outcome)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;

    use chrono::TimeZone;
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::api::core::v1::{Container, SecretVolumeSource, Volume};
    use kube::api::ObjectMeta;

    use super::*;
    use crate::exposure::PollPolicy;
    use crate::exposure::tests::{ip_ingress, service};
    use crate::store::memory::MemoryStore;

    fn secret_volume(name: &str, secret: &str) -> Volume {
        Volume {
            name: name.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Deployment running `image` with an OAuth sidecar and the given
    /// secret volumes.
    pub fn deployment(
        name: &str,
        service_account: &str,
        image: &str,
        secrets: &[&str],
    ) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        service_account_name: Some(service_account.to_string()),
                        containers: vec![
                            Container {
                                name: "main".to_string(),
                                image: Some(image.to_string()),
                                ..Default::default()
                            },
                            Container {
                                name: OAUTH_PROXY_CONTAINER.to_string(),
                                args: Some(vec![
                                    "--https-address=:8443".to_string(),
                                    format!("{SIDECAR_SERVICE_ACCOUNT_ARG}={service_account}"),
                                ]),
                                ..Default::default()
                            },
                        ],
                        volumes: Some(
                            secrets
                                .iter()
                                .map(|s| secret_volume(s, s))
                                .collect(),
                        ),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn restart_stamp(deployment: &Deployment) -> Option<String> {
        deployment
            .spec
            .as_ref()?
            .template
            .metadata
            .as_ref()?
            .annotations
            .as_ref()?
            .get(UPDATED_ANNOTATION)
            .cloned()
    }

    fn ctx(store: &MemoryStore) -> SiteContext<'_, MemoryStore> {
        SiteContext {
            store,
            namespace: "west",
            owner_refs: None,
            poll: PollPolicy::immediate(2),
        }
    }

    #[test]
    fn test_apply_rename_transport() {
        let mut dep = deployment(
            TRANSPORT_DEPLOYMENT,
            "skupper",
            "router:old",
            &["skupper-amqps", "skupper-internal", "skupper-proxy-certs", "other"],
        );
        let spec = pod_spec_mut(&mut dep).unwrap();
        apply_rename(spec, &TRANSPORT);

        assert_eq!(spec.service_account_name.as_deref(), Some(TRANSPORT_SERVICE_ACCOUNT));
        let secrets: Vec<_> = spec
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .map(|v| v.secret.as_ref().unwrap().secret_name.clone().unwrap())
            .collect();
        assert_eq!(
            secrets,
            vec![
                LOCAL_SERVER_SECRET,
                SITE_SERVER_SECRET,
                ROUTER_CONSOLE_CERTS_SECRET,
                "other"
            ]
        );
        assert_eq!(
            spec.containers[1].args.as_ref().unwrap()[1],
            "--openshift-service-account=skupper-router"
        );
        assert_eq!(spec.containers[1].args.as_ref().unwrap()[0], "--https-address=:8443");
    }

    #[test]
    fn test_sidecar_untouched_when_not_oauth_proxy() {
        let mut dep = deployment(CONTROLLER_DEPLOYMENT, "skupper-proxy-controller", "c:1", &[]);
        let spec = pod_spec_mut(&mut dep).unwrap();
        spec.containers[1].name = "metrics".to_string();
        update_sidecar_service_account(spec, CONTROLLER_SERVICE_ACCOUNT);
        assert!(spec.containers[1].args.as_ref().unwrap()[1].ends_with("skupper-proxy-controller"));
    }

    #[test]
    fn test_set_image_requires_container() {
        let mut spec = PodSpec::default();
        assert!(matches!(
            set_image(&mut spec, "skupper-router", "router:1"),
            Err(SkupError::InvalidWorkload { .. })
        ));
    }

    #[test]
    fn test_touch_is_always_distinct() {
        let mut template = PodTemplateSpec::default();
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 5, 6, 7).unwrap();

        touch(&mut template, now);
        let first = template.metadata.as_ref().unwrap().annotations.as_ref().unwrap()
            [UPDATED_ANNOTATION]
            .clone();
        assert_eq!(first, "Mon, 04 Mar 2024 05:06:07 +0000");

        touch(&mut template, now);
        let second = template.metadata.as_ref().unwrap().annotations.as_ref().unwrap()
            [UPDATED_ANNOTATION]
            .clone();
        assert_eq!(second, "Mon, 04 Mar 2024 05:06:08 +0000");
    }

    #[test]
    fn test_touch_keeps_other_annotations() {
        let mut template = PodTemplateSpec {
            metadata: Some(ObjectMeta {
                annotations: Some(BTreeMap::from([(
                    "prometheus.io/scrape".to_string(),
                    "true".to_string(),
                )])),
                ..Default::default()
            }),
            spec: None,
        };
        touch(&mut template, Utc::now());
        let annotations = template.metadata.unwrap().annotations.unwrap();
        assert_eq!(annotations.len(), 2);
    }

    #[tokio::test]
    async fn test_update_workload_no_change() {
        let store = MemoryStore::new();
        store.insert(deployment(TRANSPORT_DEPLOYMENT, "skupper-router", "router:1", &[]));
        let plan = WorkloadPlan {
            image: "router:1",
            rename: false,
            force: false,
        };
        assert!(!update_workload(&store, &TRANSPORT, &plan).await.unwrap());
        assert_eq!(store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_update_workload_forced_restart() {
        let store = MemoryStore::new();
        store.insert(deployment(TRANSPORT_DEPLOYMENT, "skupper-router", "router:1", &[]));
        let plan = WorkloadPlan {
            image: "router:1",
            rename: false,
            force: true,
        };
        assert!(update_workload(&store, &TRANSPORT, &plan).await.unwrap());
        let dep: Deployment = store.read(TRANSPORT_DEPLOYMENT).unwrap();
        assert!(restart_stamp(&dep).is_some());
    }

    #[tokio::test]
    async fn test_update_workload_image_change_skips_touch() {
        let store = MemoryStore::new();
        store.insert(deployment(TRANSPORT_DEPLOYMENT, "skupper-router", "router:1", &[]));
        let plan = WorkloadPlan {
            image: "router:2",
            rename: false,
            force: true,
        };
        assert!(update_workload(&store, &TRANSPORT, &plan).await.unwrap());
        let dep: Deployment = store.read(TRANSPORT_DEPLOYMENT).unwrap();
        assert!(restart_stamp(&dep).is_none());
        let spec = dep.spec.unwrap().template.spec.unwrap();
        assert_eq!(spec.containers[0].image.as_deref(), Some("router:2"));
    }

    #[tokio::test]
    async fn test_execute_emits_notices() {
        let store = MemoryStore::new();
        store.insert(deployment(TRANSPORT_DEPLOYMENT, "skupper", "router:1", &[]));
        store.insert(deployment(CONTROLLER_DEPLOYMENT, "skupper-proxy-controller", "c:1", &[]));
        store.insert(service(
            CONTROLLER_SERVICE,
            "LoadBalancer",
            Some(ip_ingress("198.51.100.3")),
        ));
        let migration = MigrationOutcome {
            router_exposed_as_ip: true,
            console_uses_load_balancer: true,
            ..Default::default()
        };
        let transport = WorkloadPlan {
            image: "router:2",
            rename: true,
            force: false,
        };
        let controller = WorkloadPlan {
            image: "c:2",
            rename: true,
            force: false,
        };

        let outcome = execute(&ctx(&store), &transport, &controller, Some(&migration))
            .await
            .unwrap();

        assert!(outcome.transport_updated);
        assert!(outcome.controller_updated);
        assert_eq!(
            outcome.notices,
            vec![
                Notice::RelinkRequired,
                Notice::console_at("198.51.100.3")
            ]
        );
    }

    #[tokio::test]
    async fn test_execute_console_lookup_failure_is_not_fatal() {
        let store = MemoryStore::new();
        store.insert(deployment(TRANSPORT_DEPLOYMENT, "skupper-router", "router:1", &[]));
        store.insert(deployment(CONTROLLER_DEPLOYMENT, "skupper-service-controller", "c:1", &[]));
        let migration = MigrationOutcome {
            console_uses_load_balancer: true,
            ..Default::default()
        };
        let plan = |image| WorkloadPlan {
            image,
            rename: false,
            force: true,
        };

        let outcome = execute(&ctx(&store), &plan("router:1"), &plan("c:1"), Some(&migration))
            .await
            .unwrap();

        assert!(outcome.controller_updated);
        assert!(outcome.notices.is_empty());
    }
}
