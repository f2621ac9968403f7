//! Site settings that share the workload update machinery: transport
//! restart, debug mode, pod annotations and router logging.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, EnvVar};
use tracing::{debug, info};

use crate::error::SkupError;
use crate::names::{
    CONTROLLER_DEPLOYMENT, DEBUG_ENV_VAR, TRANSPORT_CONFIG_MAP, TRANSPORT_DEPLOYMENT,
    TRANSPORT_PROMETHEUS_ANNOTATIONS,
};
use crate::phases::workloads::{pod_spec_mut, pod_template_mut, touch};
use crate::site::{LogConfig, RouterConfig};
use crate::store::{ObjectStore, get_required};

/// Force a new revision of the transport workload.
pub async fn restart_transport<S: ObjectStore>(store: &S) -> Result<()> {
    let mut deployment: Deployment = get_required(store, TRANSPORT_DEPLOYMENT).await?;
    touch(pod_template_mut(&mut deployment)?, Utc::now());
    store
        .replace(&deployment)
        .await
        .context("Restarting transport")?;
    info!("Restarted {}", TRANSPORT_DEPLOYMENT);
    Ok(())
}

/// Set the transport debug mode, or clear it when `mode` is `None` or empty.
///
/// Returns false when the workload already runs with the requested value.
pub async fn set_debug_mode<S: ObjectStore>(store: &S, mode: Option<&str>) -> Result<bool> {
    let mode = mode.filter(|m| !m.is_empty());
    let mut deployment: Deployment = get_required(store, TRANSPORT_DEPLOYMENT).await?;
    let spec = pod_spec_mut(&mut deployment)?;
    let container = spec
        .containers
        .first_mut()
        .ok_or_else(|| SkupError::InvalidWorkload {
            name: TRANSPORT_DEPLOYMENT.to_string(),
            reason: "no containers".to_string(),
        })?;

    let env = container.env.get_or_insert_with(Vec::new);
    let current = env
        .iter()
        .find(|e| e.name == DEBUG_ENV_VAR)
        .and_then(|e| e.value.as_deref());
    if current.filter(|v| !v.is_empty()) == mode {
        debug!("Debug mode already {:?}", mode);
        return Ok(false);
    }

    env.retain(|e| e.name != DEBUG_ENV_VAR);
    if let Some(mode) = mode {
        env.push(EnvVar {
            name: DEBUG_ENV_VAR.to_string(),
            value: Some(mode.to_string()),
            ..Default::default()
        });
    }

    store
        .replace(&deployment)
        .await
        .context("Updating transport debug mode")?;
    info!("Transport debug mode set to {:?}", mode);
    Ok(true)
}

/// Pod template annotations for the transport: the built-in scrape
/// annotations with `extra` laid over them.
pub fn transport_annotations(extra: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut annotations: BTreeMap<String, String> = TRANSPORT_PROMETHEUS_ANNOTATIONS
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    annotations.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    annotations
}

async fn replace_pod_annotations<S: ObjectStore>(
    store: &S,
    name: &str,
    annotations: BTreeMap<String, String>,
) -> Result<bool> {
    let mut deployment: Deployment = get_required(store, name).await?;
    let metadata = pod_template_mut(&mut deployment)?
        .metadata
        .get_or_insert_with(Default::default);
    let current = metadata.annotations.clone().unwrap_or_default();
    if current == annotations {
        return Ok(false);
    }
    metadata.annotations = Some(annotations);
    store
        .replace(&deployment)
        .await
        .with_context(|| format!("Updating annotations of {name}"))?;
    info!("Updated pod annotations of {}", name);
    Ok(true)
}

/// Replace the pod annotations of both workloads. Returns true if either
/// deployment was written.
pub async fn set_annotations<S: ObjectStore>(
    store: &S,
    annotations: &BTreeMap<String, String>,
) -> Result<bool> {
    let controller =
        replace_pod_annotations(store, CONTROLLER_DEPLOYMENT, annotations.clone()).await?;
    let transport =
        replace_pod_annotations(store, TRANSPORT_DEPLOYMENT, transport_annotations(annotations))
            .await?;
    Ok(controller || transport)
}

/// Replace the router log configuration, restarting the transport when
/// asked. Returns true if the configuration changed.
pub async fn set_router_logging<S: ObjectStore>(
    store: &S,
    levels: &[LogConfig],
    restart: bool,
) -> Result<bool> {
    let mut config_map: ConfigMap = get_required(store, TRANSPORT_CONFIG_MAP)
        .await
        .context("Loading site configuration")?;
    let mut router_config = RouterConfig::from_config_map(&config_map)?;
    if !router_config.set_log_levels(levels) {
        debug!("Router logging unchanged");
        return Ok(false);
    }
    router_config.write_to_config_map(&mut config_map)?;
    store
        .replace(&config_map)
        .await
        .context("Updating router logging")?;
    info!("Router logging set to {} entries", levels.len());

    if restart {
        restart_transport(store).await?;
    }
    Ok(true)
}
