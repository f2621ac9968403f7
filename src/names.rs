//! Well-known object names, keys and annotations of a site.

/// Sites recorded before this version use the legacy naming scheme.
pub const NAMING_SCHEME_THRESHOLD: &str = "0.5.0";

// Configuration records
pub const TRANSPORT_CONFIG_MAP: &str = "skupper-internal";
pub const TRANSPORT_CONFIG_KEY: &str = "qdrouterd.json";
pub const UPDATE_STATE_CONFIG_MAP: &str = "skupper-update-state";
pub const UPDATE_STATE_FROM_KEY: &str = "from";

// Services
pub const LOCAL_TRANSPORT_SERVICE: &str = "skupper-router-local";
pub const TRANSPORT_SERVICE: &str = "skupper-router";
pub const CONTROLLER_SERVICE: &str = "skupper";
pub const ROUTER_CONSOLE_SERVICE: &str = "skupper-router-console";
pub const LEGACY_TRANSPORT_SERVICE: &str = "skupper-internal";

// Secrets
pub const LOCAL_CA_SECRET: &str = "skupper-local-ca";
pub const SITE_CA_SECRET: &str = "skupper-site-ca";
pub const LOCAL_SERVER_SECRET: &str = "skupper-local-server";
pub const LOCAL_CLIENT_SECRET: &str = "skupper-local-client";
pub const SITE_SERVER_SECRET: &str = "skupper-site-server";
pub const CONSOLE_CERTS_SECRET: &str = "skupper-console-certs";
pub const ROUTER_CONSOLE_CERTS_SECRET: &str = "skupper-router-console-certs";

// Identities and permissions
pub const TRANSPORT_SERVICE_ACCOUNT: &str = "skupper-router";
pub const CONTROLLER_SERVICE_ACCOUNT: &str = "skupper-service-controller";
pub const TRANSPORT_ROLE: &str = "skupper-router";
pub const CONTROLLER_ROLE: &str = "skupper-service-controller";
pub const TRANSPORT_ROLE_BINDING: &str = "skupper-router";
pub const CONTROLLER_ROLE_BINDING: &str = "skupper-service-controller";

// Routes
pub const CONSOLE_ROUTE: &str = "skupper";
pub const EDGE_ROUTE: &str = "skupper-edge";
pub const INTER_ROUTER_ROUTE: &str = "skupper-inter-router";
pub const ROUTE_API_GROUP: &str = "route.openshift.io";

// Workloads
pub const TRANSPORT_DEPLOYMENT: &str = "skupper-router";
pub const CONTROLLER_DEPLOYMENT: &str = "skupper-service-controller";
pub const OAUTH_PROXY_CONTAINER: &str = "oauth-proxy";
pub const SIDECAR_SERVICE_ACCOUNT_ARG: &str = "--openshift-service-account";
pub const DEBUG_ENV_VAR: &str = "QDROUTERD_DEBUG";

// Annotations
pub const UPDATED_ANNOTATION: &str = "skupper.io/update";
pub const SERVING_CERT_ANNOTATION: &str = "service.alpha.openshift.io/serving-cert-secret-name";
pub const OAUTH_REDIRECT_ANNOTATION: &str =
    "serviceaccounts.openshift.io/oauth-redirectreference.primary";
pub const OAUTH_REDIRECT_TO_CONSOLE_ROUTE: &str = r#"{"kind":"OAuthRedirectReference","apiVersion":"v1","reference":{"kind":"Route","name":"skupper"}}"#;
pub const TRANSPORT_PROMETHEUS_ANNOTATIONS: &[(&str, &str)] = &[
    ("prometheus.io/port", "9090"),
    ("prometheus.io/scrape", "true"),
];

// Images
pub const DEFAULT_ROUTER_IMAGE_REPOSITORY: &str = "quay.io/skupper/skupper-router";
pub const DEFAULT_CONTROLLER_IMAGE_REPOSITORY: &str = "quay.io/skupper/service-controller";

/// Port the service controller console listens on.
pub const CONSOLE_PORT: u16 = 8080;

/// Local AMQPS listener of the transport.
pub const AMQPS_PORT: u16 = 5671;

/// In-cluster DNS name of a service in the given namespace.
pub fn qualified_service_name(name: &str, namespace: &str) -> String {
    format!("{name}.{namespace}.svc.cluster.local")
}
