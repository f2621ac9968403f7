//! Client-side model of the OpenShift `Route` resource.
//!
//! Only the fields the upgrade touches are modelled. The type is never
//! installed as a CRD, so schema generation is disabled.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// `route.openshift.io/v1` Route spec.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[kube(
    group = "route.openshift.io",
    version = "v1",
    kind = "Route",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Target port; either a port name or a number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<serde_json::Value>,

    /// TLS termination settings, carried through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<serde_json::Value>,

    pub to: RouteTargetReference,
}

/// Backend a route forwards to.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteTargetReference {
    pub kind: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
}

impl RouteTargetReference {
    pub fn service(name: &str) -> Self {
        Self {
            kind: "Service".to_string(),
            name: name.to_string(),
            weight: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_deserialize_openshift_json() {
        let json = serde_json::json!({
            "apiVersion": "route.openshift.io/v1",
            "kind": "Route",
            "metadata": {"name": "skupper-inter-router"},
            "spec": {
                "host": "inter-router.apps.example.com",
                "port": {"targetPort": "inter-router"},
                "tls": {"termination": "passthrough"},
                "to": {"kind": "Service", "name": "skupper-internal", "weight": 100}
            }
        });
        let route: Route = serde_json::from_value(json).unwrap();
        assert_eq!(route.spec.to.name, "skupper-internal");
        assert_eq!(route.spec.to.weight, Some(100));
        assert_eq!(route.spec.tls.unwrap()["termination"], "passthrough");
    }

    #[test]
    fn test_service_target() {
        let target = RouteTargetReference::service("skupper");
        assert_eq!(target.kind, "Service");
        assert_eq!(target.name, "skupper");
        assert!(target.weight.is_none());
    }
}
