//! Resolution of externally reachable addresses for exposed services.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use k8s_openapi::api::core::v1::Service;
use tracing::debug;

use crate::store::{ObjectStore, get_required};

/// Bounded polling schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    /// One attempt per second for two minutes.
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 120,
        }
    }
}

impl PollPolicy {
    /// Policy that never sleeps between attempts.
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            interval: Duration::ZERO,
            max_attempts,
        }
    }
}

/// Run `probe` until it yields a value or attempts run out.
///
/// Sleeps `interval` between attempts, never before the first. Probe errors
/// end the poll immediately.
pub async fn poll<T, F, Fut>(policy: &PollPolicy, mut probe: F) -> Result<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    for attempt in 1..=policy.max_attempts {
        if attempt > 1 && !policy.interval.is_zero() {
            tokio::time::sleep(policy.interval).await;
        }
        if let Some(value) = probe().await? {
            return Ok(Some(value));
        }
        debug!(attempt, max_attempts = policy.max_attempts, "Not resolved yet");
    }
    Ok(None)
}

pub fn is_load_balancer(service: &Service) -> bool {
    service
        .spec
        .as_ref()
        .and_then(|s| s.type_.as_deref())
        == Some("LoadBalancer")
}

/// Host name, or failing that the IP, assigned to a load-balanced service.
pub fn load_balancer_host(service: &Service) -> Option<String> {
    let ingress = service
        .status
        .as_ref()?
        .load_balancer
        .as_ref()?
        .ingress
        .as_ref()?;
    ingress.iter().find_map(|i| {
        i.hostname
            .clone()
            .filter(|h| !h.is_empty())
            .or_else(|| i.ip.clone().filter(|ip| !ip.is_empty()))
    })
}

/// Poll the service `name` until the load balancer reports an address.
pub async fn resolve_load_balancer_host<S: ObjectStore>(
    store: &S,
    name: &str,
    policy: &PollPolicy,
) -> Result<Option<String>> {
    poll(policy, || async {
        let service: Service = get_required(store, name).await?;
        Ok::<_, anyhow::Error>(load_balancer_host(&service))
    })
    .await
}
