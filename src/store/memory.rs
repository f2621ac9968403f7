//! In-memory [`ObjectStore`] for tests.
//!
//! Objects are kept as JSON keyed by kind and name. Every successful mutation
//! is recorded, and a single mutation can be made to fail to simulate a crash
//! part way through an invocation.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use kube::ResourceExt;

use super::{ObjectStore, StoreObject, kind_of};
use crate::error::SkupError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Create,
    Replace,
    Delete,
    /// Reads and API discovery can fail but are never recorded.
    Get,
    Discover,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub op: Op,
    pub kind: String,
    pub name: String,
}

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<(String, String), serde_json::Value>>,
    mutations: Mutex<Vec<Mutation>>,
    faults: Mutex<Vec<Mutation>>,
    routes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that reports the route API as available.
    pub fn with_routes() -> Self {
        Self {
            routes: true,
            ..Self::default()
        }
    }

    /// Seed an object without recording a mutation.
    pub fn insert<K: StoreObject>(&self, obj: K) {
        let key = (kind_of::<K>(), obj.name_any());
        let value = serde_json::to_value(&obj).unwrap();
        self.objects.lock().unwrap().insert(key, value);
    }

    /// Synchronous read for assertions.
    pub fn read<K: StoreObject>(&self, name: &str) -> Option<K> {
        self.objects
            .lock()
            .unwrap()
            .get(&(kind_of::<K>(), name.to_string()))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    pub fn contains<K: StoreObject>(&self, name: &str) -> bool {
        self.objects
            .lock()
            .unwrap()
            .contains_key(&(kind_of::<K>(), name.to_string()))
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.mutations.lock().unwrap().clone()
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.lock().unwrap().len()
    }

    /// Make the next matching mutation fail with an API error.
    pub fn fail_once(&self, op: Op, kind: &str, name: &str) {
        self.faults.lock().unwrap().push(Mutation {
            op,
            kind: kind.to_string(),
            name: name.to_string(),
        });
    }

    /// Make the next route API discovery fail.
    pub fn fail_discovery_once(&self) {
        self.fail_once(Op::Discover, "APIGroup", crate::names::ROUTE_API_GROUP);
    }

    fn check_fault(&self, op: Op, kind: &str, name: &str) -> Result<(), SkupError> {
        let mut faults = self.faults.lock().unwrap();
        if let Some(pos) = faults
            .iter()
            .position(|f| f.op == op && f.kind == kind && f.name == name)
        {
            faults.remove(pos);
            return Err(SkupError::KubernetesApi(format!(
                "injected {op:?} failure for {kind}/{name}"
            )));
        }
        Ok(())
    }

    fn record(&self, op: Op, kind: String, name: String) {
        self.mutations
            .lock()
            .unwrap()
            .push(Mutation { op, kind, name });
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: StoreObject>(&self, name: &str) -> Result<Option<K>, SkupError> {
        self.check_fault(Op::Get, &kind_of::<K>(), name)?;
        Ok(self.read(name))
    }

    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K, SkupError> {
        let kind = kind_of::<K>();
        let name = obj.name_any();
        self.check_fault(Op::Create, &kind, &name)?;
        let key = (kind.clone(), name.clone());
        {
            let mut objects = self.objects.lock().unwrap();
            if objects.contains_key(&key) {
                return Err(SkupError::already_exists(&kind, &name));
            }
            objects.insert(key, serde_json::to_value(obj).unwrap());
        }
        self.record(Op::Create, kind, name);
        Ok(obj.clone())
    }

    async fn replace<K: StoreObject>(&self, obj: &K) -> Result<K, SkupError> {
        let kind = kind_of::<K>();
        let name = obj.name_any();
        self.check_fault(Op::Replace, &kind, &name)?;
        let key = (kind.clone(), name.clone());
        {
            let mut objects = self.objects.lock().unwrap();
            if !objects.contains_key(&key) {
                return Err(SkupError::not_found(&kind, &name));
            }
            objects.insert(key, serde_json::to_value(obj).unwrap());
        }
        self.record(Op::Replace, kind, name);
        Ok(obj.clone())
    }

    async fn delete<K: StoreObject>(&self, name: &str) -> Result<(), SkupError> {
        let kind = kind_of::<K>();
        self.check_fault(Op::Delete, &kind, name)?;
        let removed = self
            .objects
            .lock()
            .unwrap()
            .remove(&(kind.clone(), name.to_string()));
        if removed.is_none() {
            return Err(SkupError::not_found(&kind, name));
        }
        self.record(Op::Delete, kind, name.to_string());
        Ok(())
    }

    async fn routes_supported(&self) -> Result<bool, SkupError> {
        self.check_fault(Op::Discover, "APIGroup", crate::names::ROUTE_API_GROUP)?;
        Ok(self.routes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    fn config_map(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let store = MemoryStore::new();
        store.create(&config_map("a")).await.unwrap();
        assert!(store.get::<ConfigMap>("a").await.unwrap().is_some());
        let err = store.create(&config_map("a")).await.unwrap_err();
        assert!(err.is_already_exists());
        store.delete::<ConfigMap>("a").await.unwrap();
        let err = store.delete::<ConfigMap>("a").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.mutation_count(), 2);
    }

    #[tokio::test]
    async fn test_fault_fires_once() {
        let store = MemoryStore::new();
        store.insert(config_map("a"));
        store.fail_once(Op::Replace, "ConfigMap", "a");
        assert!(store.replace(&config_map("a")).await.is_err());
        assert!(store.replace(&config_map("a")).await.is_ok());
        assert_eq!(store.mutations()[0].op, Op::Replace);
    }

    #[tokio::test]
    async fn test_read_and_discovery_faults() {
        let store = MemoryStore::with_routes();
        store.insert(config_map("a"));
        store.fail_once(Op::Get, "ConfigMap", "a");
        store.fail_discovery_once();

        assert!(store.get::<ConfigMap>("a").await.is_err());
        assert!(store.get::<ConfigMap>("a").await.unwrap().is_some());
        assert!(store.routes_supported().await.is_err());
        assert!(store.routes_supported().await.unwrap());
        assert_eq!(store.mutation_count(), 0);
    }
}
