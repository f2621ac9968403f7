//! [`ObjectStore`] backed by the Kubernetes API.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

use super::{ObjectStore, StoreObject, kind_of};
use crate::error::SkupError;
use crate::names::ROUTE_API_GROUP;

/// Namespaced view of the cluster used for one site.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    namespace: String,
}

impl KubeStore {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api<K: StoreObject>(&self) -> Api<K> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: StoreObject>(&self, name: &str) -> Result<Option<K>, SkupError> {
        self.api::<K>()
            .get_opt(name)
            .await
            .map_err(|e| SkupError::from_kube(&kind_of::<K>(), name, e))
    }

    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K, SkupError> {
        let name = obj.name_any();
        debug!("Creating {} {}/{}", kind_of::<K>(), self.namespace, name);
        self.api::<K>()
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| SkupError::from_kube(&kind_of::<K>(), &name, e))
    }

    async fn replace<K: StoreObject>(&self, obj: &K) -> Result<K, SkupError> {
        let name = obj.name_any();
        debug!("Replacing {} {}/{}", kind_of::<K>(), self.namespace, name);
        self.api::<K>()
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| SkupError::from_kube(&kind_of::<K>(), &name, e))
    }

    async fn delete<K: StoreObject>(&self, name: &str) -> Result<(), SkupError> {
        debug!("Deleting {} {}/{}", kind_of::<K>(), self.namespace, name);
        self.api::<K>()
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| SkupError::from_kube(&kind_of::<K>(), name, e))
    }

    async fn routes_supported(&self) -> Result<bool, SkupError> {
        let groups = self
            .client
            .list_api_groups()
            .await
            .map_err(|e| SkupError::KubernetesApi(format!("Failed to list API groups: {e}")))?;
        let supported = groups.groups.iter().any(|g| g.name == ROUTE_API_GROUP);
        debug!("Route API ({}) available: {}", ROUTE_API_GROUP, supported);
        Ok(supported)
    }
}
