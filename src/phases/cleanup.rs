//! Cleanup phase: delete legacy-named objects once the site runs on the
//! current names.

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use tracing::{debug, info};

use super::SiteContext;
use super::migration::{MigrationOutcome, RENAMES, Rename, ResourceKind};
use crate::store::{ObjectStore, Route, StoreObject, ignore_not_found};

async fn delete_legacy<K, S>(store: &S, rename: &Rename) -> Result<bool>
where
    K: StoreObject,
    S: ObjectStore,
{
    ignore_not_found(store.delete::<K>(rename.legacy).await)
        .with_context(|| format!("Deleting legacy {:?} {}", rename.kind, rename.legacy))
}

/// Whether the legacy object of `rename` must survive cleanup.
fn retained(rename: &Rename, migration: &MigrationOutcome) -> bool {
    match rename.kind {
        ResourceKind::Route => !migration.routes_supported,
        _ => rename.retain_without_routes && !migration.routes_in_use,
    }
}

/// Delete every legacy object. Returns the names of deleted objects.
///
/// Not-found is tolerated; any other failure aborts so a re-run can finish
/// the job.
pub async fn execute<S: ObjectStore>(
    ctx: &SiteContext<'_, S>,
    migration: &MigrationOutcome,
) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for rename in RENAMES {
        if retained(rename, migration) {
            debug!("Keeping legacy {:?} {}", rename.kind, rename.legacy);
            continue;
        }
        let removed = match rename.kind {
            ResourceKind::Service => delete_legacy::<Service, S>(ctx.store, rename).await?,
            ResourceKind::CertificateAuthority | ResourceKind::Credential => {
                delete_legacy::<Secret, S>(ctx.store, rename).await?
            }
            ResourceKind::ServiceAccount => {
                delete_legacy::<ServiceAccount, S>(ctx.store, rename).await?
            }
            ResourceKind::Role => delete_legacy::<Role, S>(ctx.store, rename).await?,
            ResourceKind::RoleBinding => delete_legacy::<RoleBinding, S>(ctx.store, rename).await?,
            ResourceKind::Route => delete_legacy::<Route, S>(ctx.store, rename).await?,
        };
        if removed {
            deleted.push(rename.legacy.to_string());
        }
    }
    info!("Removed {} legacy objects", deleted.len());
    Ok(deleted)
}
