//! Object store abstraction over the site's Kubernetes namespace.
//!
//! The orchestrator only needs CRUD primitives. Everything it reads or writes
//! goes through [`ObjectStore`], which keeps the upgrade logic independent of
//! the API client and lets tests run against an in-memory store.

pub mod kube;
#[cfg(test)]
pub mod memory;
pub mod route;

use std::fmt::Debug;

use async_trait::async_trait;
use ::kube::Resource;
use k8s_openapi::NamespaceResourceScope;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::SkupError;

pub use self::kube::KubeStore;
pub use route::Route;

/// A namespaced object the store can read and write.
pub trait StoreObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> StoreObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// CRUD primitives over the objects of one site.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object, `None` when it does not exist.
    async fn get<K: StoreObject>(&self, name: &str) -> Result<Option<K>, SkupError>;

    /// Create an object. Fails with [`SkupError::AlreadyExists`] if present.
    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K, SkupError>;

    /// Replace an existing object as a whole.
    async fn replace<K: StoreObject>(&self, obj: &K) -> Result<K, SkupError>;

    /// Delete an object. Fails with [`SkupError::NotFound`] if absent.
    async fn delete<K: StoreObject>(&self, name: &str) -> Result<(), SkupError>;

    /// Whether the cluster serves the OpenShift route API.
    async fn routes_supported(&self) -> Result<bool, SkupError>;
}

/// Kind name of `K`, for logs and errors.
pub fn kind_of<K: StoreObject>() -> String {
    K::kind(&()).into_owned()
}

/// Fetch an object that must exist.
pub async fn get_required<K: StoreObject, S: ObjectStore>(
    store: &S,
    name: &str,
) -> Result<K, SkupError> {
    store
        .get::<K>(name)
        .await?
        .ok_or_else(|| SkupError::not_found(&kind_of::<K>(), name))
}

/// Turn "already exists" into `Ok(None)`.
pub fn ignore_already_exists<T>(result: Result<T, SkupError>) -> Result<Option<T>, SkupError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_already_exists() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Turn "not found" into `Ok(false)`; `Ok(true)` when something was deleted.
pub fn ignore_not_found(result: Result<(), SkupError>) -> Result<bool, SkupError> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}
