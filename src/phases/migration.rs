//! Rename migration: recreate legacy-named site objects under current names.
//!
//! Every migration unit is described by a [`Rename`] entry in [`RENAMES`]. The
//! table order is the execution order. A unit whose current-named object
//! already exists is skipped, which makes the whole phase safe to re-run after
//! a partial failure.

use std::collections::BTreeMap;
use std::net::IpAddr;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{Secret, Service, ServiceAccount, ServicePort, ServiceSpec};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use kube::api::ObjectMeta;
use tracing::{debug, info, warn};

use super::SiteContext;
use crate::authority::CertificateAuthority;
use crate::credential::{self, Credential, IssueOutcome, select_subject};
use crate::error::SkupError;
use crate::exposure::{
    PollPolicy, is_load_balancer, load_balancer_host, resolve_load_balancer_host,
};
use crate::names::{
    CONSOLE_CERTS_SECRET, CONTROLLER_ROLE, CONTROLLER_ROLE_BINDING, CONTROLLER_SERVICE,
    CONTROLLER_SERVICE_ACCOUNT, CONSOLE_ROUTE, EDGE_ROUTE, INTER_ROUTER_ROUTE,
    LEGACY_TRANSPORT_SERVICE, LOCAL_CA_SECRET, LOCAL_CLIENT_SECRET, LOCAL_SERVER_SECRET,
    LOCAL_TRANSPORT_SERVICE, OAUTH_REDIRECT_ANNOTATION, OAUTH_REDIRECT_TO_CONSOLE_ROUTE,
    ROUTER_CONSOLE_CERTS_SECRET, ROUTER_CONSOLE_SERVICE, SERVING_CERT_ANNOTATION,
    SITE_CA_SECRET, SITE_SERVER_SECRET, TRANSPORT_ROLE, TRANSPORT_ROLE_BINDING,
    TRANSPORT_SERVICE, TRANSPORT_SERVICE_ACCOUNT, qualified_service_name,
};
use crate::store::route::RouteTargetReference;
use crate::store::{
    ObjectStore, Route, StoreObject, get_required, ignore_already_exists, kind_of,
};

/// Migration unit kinds, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResourceKind {
    Service,
    CertificateAuthority,
    Credential,
    ServiceAccount,
    Role,
    RoleBinding,
    Route,
}

/// Credentials regenerated for the renamed endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Local AMQPS listener of the transport.
    LocalServer,
    /// Client bundle used by the controller to reach the local listener.
    LocalClient,
    /// Externally reachable inter-site listener.
    SiteServer,
}

/// How the current-named object is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Procedure {
    /// Copy the legacy object's content.
    Copy,
    /// Create the controller role from the built-in policy rules.
    ControllerRole,
    /// Bind a service account to a role.
    Binding {
        service_account: &'static str,
        role: &'static str,
    },
    /// Issue a fresh credential valid for the new service names.
    Regenerate(Endpoint),
}

/// Annotation change applied to a copied object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationRule {
    /// Always set the annotation.
    Set(&'static str, &'static str),
    /// Replace the value only when the legacy object carries the annotation.
    Substitute(&'static str, &'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rename {
    pub kind: ResourceKind,
    pub legacy: &'static str,
    pub current: &'static str,
    pub procedure: Procedure,
    pub annotation: Option<AnnotationRule>,
    /// A missing legacy object is not an error.
    pub optional: bool,
    /// Kept after cleanup unless the site links through routes.
    pub retain_without_routes: bool,
}

impl Rename {
    const fn copy(kind: ResourceKind, legacy: &'static str, current: &'static str) -> Self {
        Self {
            kind,
            legacy,
            current,
            procedure: Procedure::Copy,
            annotation: None,
            optional: false,
            retain_without_routes: false,
        }
    }

    const fn with_procedure(mut self, procedure: Procedure) -> Self {
        self.procedure = procedure;
        self
    }

    const fn with_annotation(mut self, rule: AnnotationRule) -> Self {
        self.annotation = Some(rule);
        self
    }

    const fn legacy_optional(mut self) -> Self {
        self.optional = true;
        self
    }

    const fn retained_without_routes(mut self) -> Self {
        self.retain_without_routes = true;
        self
    }
}

/// Legacy to current names, in execution order.
pub const RENAMES: &[Rename] = &[
    Rename::copy(ResourceKind::Service, "skupper-messaging", LOCAL_TRANSPORT_SERVICE),
    Rename::copy(ResourceKind::Service, LEGACY_TRANSPORT_SERVICE, TRANSPORT_SERVICE)
        .retained_without_routes(),
    Rename::copy(ResourceKind::Service, "skupper-controller", CONTROLLER_SERVICE)
        .with_annotation(AnnotationRule::Set(SERVING_CERT_ANNOTATION, CONSOLE_CERTS_SECRET)),
    Rename::copy(ResourceKind::CertificateAuthority, "skupper-ca", LOCAL_CA_SECRET),
    Rename::copy(ResourceKind::CertificateAuthority, "skupper-internal-ca", SITE_CA_SECRET),
    Rename::copy(ResourceKind::Credential, "skupper-amqps", LOCAL_SERVER_SECRET)
        .with_procedure(Procedure::Regenerate(Endpoint::LocalServer)),
    Rename::copy(ResourceKind::Credential, "skupper", LOCAL_CLIENT_SECRET)
        .with_procedure(Procedure::Regenerate(Endpoint::LocalClient)),
    Rename::copy(ResourceKind::Credential, "skupper-internal", SITE_SERVER_SECRET)
        .with_procedure(Procedure::Regenerate(Endpoint::SiteServer)),
    Rename::copy(ResourceKind::ServiceAccount, "skupper", TRANSPORT_SERVICE_ACCOUNT),
    Rename::copy(
        ResourceKind::ServiceAccount,
        "skupper-proxy-controller",
        CONTROLLER_SERVICE_ACCOUNT,
    )
    .with_annotation(AnnotationRule::Substitute(
        OAUTH_REDIRECT_ANNOTATION,
        OAUTH_REDIRECT_TO_CONSOLE_ROUTE,
    )),
    Rename::copy(ResourceKind::Role, "skupper-edit", CONTROLLER_ROLE)
        .with_procedure(Procedure::ControllerRole),
    Rename::copy(ResourceKind::Role, "skupper-view", TRANSPORT_ROLE),
    Rename::copy(
        ResourceKind::RoleBinding,
        "skupper-proxy-controller-skupper-edit",
        CONTROLLER_ROLE_BINDING,
    )
    .with_procedure(Procedure::Binding {
        service_account: CONTROLLER_SERVICE_ACCOUNT,
        role: CONTROLLER_ROLE,
    }),
    Rename::copy(ResourceKind::RoleBinding, "skupper-skupper-view", TRANSPORT_ROLE_BINDING)
        .with_procedure(Procedure::Binding {
            service_account: TRANSPORT_SERVICE_ACCOUNT,
            role: TRANSPORT_ROLE,
        }),
    Rename::copy(ResourceKind::Route, "skupper-controller", CONSOLE_ROUTE).legacy_optional(),
];

/// Facts established by the migration that later phases depend on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationOutcome {
    /// The cluster serves the route API.
    pub routes_supported: bool,
    /// Links reach this site through routes rather than the transport service.
    pub routes_in_use: bool,
    /// The first transport host is a raw IP address.
    pub router_exposed_as_ip: bool,
    pub console_uses_load_balancer: bool,
    /// Current names of objects created by this run.
    pub created: Vec<String>,
}

/// Object that can be recreated under a new name from a legacy copy.
pub trait Renamable: StoreObject {
    /// Content of `self` carried over to an object with metadata `meta`.
    fn renamed(&self, meta: ObjectMeta) -> Self;
}

impl Renamable for Service {
    fn renamed(&self, meta: ObjectMeta) -> Self {
        let spec = self.spec.as_ref().map(|s| ServiceSpec {
            ports: s.ports.as_ref().map(|ports| {
                ports
                    .iter()
                    .map(|p| ServicePort {
                        node_port: None,
                        ..p.clone()
                    })
                    .collect()
            }),
            selector: s.selector.clone(),
            type_: s.type_.clone(),
            ..Default::default()
        });
        Self {
            metadata: meta,
            spec,
            status: None,
        }
    }
}

impl Renamable for Secret {
    fn renamed(&self, meta: ObjectMeta) -> Self {
        Self {
            metadata: meta,
            data: self.data.clone(),
            type_: self.type_.clone(),
            ..Default::default()
        }
    }
}

impl Renamable for ServiceAccount {
    fn renamed(&self, meta: ObjectMeta) -> Self {
        Self {
            metadata: meta,
            image_pull_secrets: self.image_pull_secrets.clone(),
            ..Default::default()
        }
    }
}

impl Renamable for Role {
    fn renamed(&self, meta: ObjectMeta) -> Self {
        Self {
            metadata: meta,
            rules: self.rules.clone(),
        }
    }
}

impl Renamable for RoleBinding {
    fn renamed(&self, meta: ObjectMeta) -> Self {
        Self {
            metadata: meta,
            role_ref: self.role_ref.clone(),
            subjects: self.subjects.clone(),
        }
    }
}

impl Renamable for Route {
    /// A renamed route targets the service sharing its new name; the
    /// assigned host is left for the router to fill in.
    fn renamed(&self, meta: ObjectMeta) -> Self {
        let target = meta.name.clone().unwrap_or_default();
        let mut route = Self::new(&target, self.spec.clone());
        route.metadata = meta;
        route.spec.host = None;
        route.spec.to = RouteTargetReference::service(&target);
        route
    }
}

fn renamed_meta(
    legacy: &ObjectMeta,
    rename: &Rename,
    owner_refs: Option<&Vec<OwnerReference>>,
) -> ObjectMeta {
    let mut annotations = legacy.annotations.clone();
    match rename.annotation {
        Some(AnnotationRule::Set(key, value)) => {
            annotations
                .get_or_insert_with(BTreeMap::new)
                .insert(key.to_string(), value.to_string());
        }
        Some(AnnotationRule::Substitute(key, value)) => {
            if let Some(existing) = annotations.as_mut().and_then(|a| a.get_mut(key)) {
                *existing = value.to_string();
            }
        }
        None => {}
    }
    ObjectMeta {
        name: Some(rename.current.to_string()),
        labels: legacy.labels.clone(),
        annotations,
        owner_references: owner_refs.cloned(),
        ..Default::default()
    }
}

/// Copy the legacy object under its current name.
///
/// Returns false when the current-named object already exists, or when an
/// optional legacy object is absent.
async fn copy_object<K, S>(ctx: &SiteContext<'_, S>, rename: &Rename) -> Result<bool>
where
    K: Renamable,
    S: ObjectStore,
{
    if ctx.store.get::<K>(rename.current).await?.is_some() {
        debug!("{:?} {} already migrated", rename.kind, rename.current);
        return Ok(false);
    }
    let legacy = match ctx.store.get::<K>(rename.legacy).await? {
        Some(legacy) => legacy,
        None if rename.optional => {
            debug!("No legacy {:?} {} to migrate", rename.kind, rename.legacy);
            return Ok(false);
        }
        None => {
            return Err(SkupError::not_found(&kind_of::<K>(), rename.legacy))
                .with_context(|| format!("Migrating {} to {}", rename.legacy, rename.current));
        }
    };

    let meta = renamed_meta(legacy.meta(), rename, ctx.owner_refs.as_ref());
    let created = ignore_already_exists(ctx.store.create(&legacy.renamed(meta)).await)
        .with_context(|| format!("Creating {:?} {}", rename.kind, rename.current))?;
    if created.is_some() {
        info!("Migrated {:?} {} to {}", rename.kind, rename.legacy, rename.current);
    }
    Ok(created.is_some())
}

/// Rules granted to the service controller.
pub fn controller_policy_rules() -> Vec<PolicyRule> {
    let rule = |groups: &[&str], resources: &[&str], verbs: &[&str]| PolicyRule {
        api_groups: Some(groups.iter().map(ToString::to_string).collect()),
        resources: Some(resources.iter().map(ToString::to_string).collect()),
        verbs: verbs.iter().map(ToString::to_string).collect(),
        ..Default::default()
    };
    let manage = ["get", "list", "watch", "create", "update", "delete"];
    vec![
        rule(&[""], &["services", "configmaps", "pods"], &manage),
        rule(&["apps"], &["deployments", "statefulsets", "daemonsets"], &manage),
        rule(&[""], &["secrets"], &["get", "list", "watch", "create", "delete"]),
        rule(&["route.openshift.io"], &["routes"], &manage),
    ]
}

async fn create_synthesized<K, S>(ctx: &SiteContext<'_, S>, rename: &Rename, obj: K) -> Result<bool>
where
    K: StoreObject,
    S: ObjectStore,
{
    if ctx.store.get::<K>(rename.current).await?.is_some() {
        debug!("{:?} {} already migrated", rename.kind, rename.current);
        return Ok(false);
    }
    let created = ignore_already_exists(ctx.store.create(&obj).await)
        .with_context(|| format!("Creating {:?} {}", rename.kind, rename.current))?;
    if created.is_some() {
        info!("Created {:?} {}", rename.kind, rename.current);
    }
    Ok(created.is_some())
}

fn owned_meta<S>(ctx: &SiteContext<'_, S>, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        owner_references: ctx.owner_refs.clone(),
        ..Default::default()
    }
}

/// Whether links reach the site through routes.
///
/// Detection errors are fatal: continuing with a guess could delete the
/// service that existing links depend on.
async fn detect_routes<S: ObjectStore>(store: &S) -> Result<(bool, bool), SkupError> {
    let supported = store
        .routes_supported()
        .await
        .map_err(|e| SkupError::RouteDetection(e.to_string()))?;
    if !supported {
        return Ok((false, false));
    }
    let in_use = store
        .get::<Route>(INTER_ROUTER_ROUTE)
        .await
        .map_err(|e| SkupError::RouteDetection(e.to_string()))?
        .is_some();
    Ok((true, in_use))
}

/// Hosts the inter-site server credential must be valid for.
///
/// When the legacy transport service is load balanced, the address assigned
/// to the new service (polled with `poll`) and the legacy address come first.
pub async fn transport_hosts<S: ObjectStore>(
    ctx: &SiteContext<'_, S>,
    poll: &PollPolicy,
) -> Result<Vec<String>> {
    let legacy: Service = get_required(ctx.store, LEGACY_TRANSPORT_SERVICE).await?;
    let mut hosts = Vec::new();
    if is_load_balancer(&legacy) {
        if let Some(host) = resolve_load_balancer_host(ctx.store, TRANSPORT_SERVICE, poll)
            .await
            .context("Resolving transport load balancer")?
        {
            hosts.push(host);
        } else {
            warn!("No load balancer address assigned to {}", TRANSPORT_SERVICE);
        }
        if let Some(host) = load_balancer_host(&legacy) {
            hosts.push(host);
        }
    }
    hosts.push(TRANSPORT_SERVICE.to_string());
    hosts.push(qualified_service_name(TRANSPORT_SERVICE, ctx.namespace));
    hosts.push(qualified_service_name(LEGACY_TRANSPORT_SERVICE, ctx.namespace));

    let mut unique = Vec::with_capacity(hosts.len());
    for host in hosts {
        if !unique.contains(&host) {
            unique.push(host);
        }
    }
    Ok(unique)
}

fn first_host_is_ip(hosts: &[String]) -> bool {
    hosts.first().is_some_and(|h| h.parse::<IpAddr>().is_ok())
}

async fn regenerate<S, A>(
    ctx: &SiteContext<'_, S>,
    authority: &A,
    rename: &Rename,
    endpoint: Endpoint,
    outcome: &mut MigrationOutcome,
) -> Result<bool>
where
    S: ObjectStore,
    A: CertificateAuthority,
{
    let request = match endpoint {
        Endpoint::LocalServer => Credential {
            authority: LOCAL_CA_SECRET.to_string(),
            name: rename.current.to_string(),
            subject: LOCAL_TRANSPORT_SERVICE.to_string(),
            hosts: vec![
                LOCAL_TRANSPORT_SERVICE.to_string(),
                qualified_service_name(LOCAL_TRANSPORT_SERVICE, ctx.namespace),
            ],
            opaque_bundle: false,
        },
        Endpoint::LocalClient => Credential {
            authority: LOCAL_CA_SECRET.to_string(),
            name: rename.current.to_string(),
            subject: LOCAL_TRANSPORT_SERVICE.to_string(),
            hosts: Vec::new(),
            opaque_bundle: true,
        },
        Endpoint::SiteServer => {
            if outcome.routes_in_use {
                // Route hosts did not change, so the old certificate stays valid.
                return copy_object::<Secret, S>(ctx, rename).await;
            }
            if ctx.store.get::<Secret>(rename.current).await?.is_some() {
                debug!("Credential {} already present", rename.current);
                // Issued by an interrupted run; links still need the warning.
                let hosts = transport_hosts(ctx, &PollPolicy::immediate(1)).await?;
                outcome.router_exposed_as_ip = first_host_is_ip(&hosts);
                return Ok(false);
            }
            let hosts = transport_hosts(ctx, &ctx.poll).await?;
            outcome.router_exposed_as_ip = first_host_is_ip(&hosts);
            Credential {
                authority: SITE_CA_SECRET.to_string(),
                name: rename.current.to_string(),
                subject: select_subject(&hosts, TRANSPORT_SERVICE),
                hosts,
                opaque_bundle: false,
            }
        }
    };

    let issued = credential::issue(ctx.store, authority, &request, ctx.owner()).await?;
    Ok(issued == IssueOutcome::Issued)
}

async fn migrate_one<S, A>(
    ctx: &SiteContext<'_, S>,
    authority: &A,
    rename: &Rename,
    outcome: &mut MigrationOutcome,
) -> Result<bool>
where
    S: ObjectStore,
    A: CertificateAuthority,
{
    match (rename.procedure, rename.kind) {
        (Procedure::Copy, ResourceKind::Service) => copy_object::<Service, S>(ctx, rename).await,
        (Procedure::Copy, ResourceKind::CertificateAuthority | ResourceKind::Credential) => {
            copy_object::<Secret, S>(ctx, rename).await
        }
        (Procedure::Copy, ResourceKind::ServiceAccount) => {
            copy_object::<ServiceAccount, S>(ctx, rename).await
        }
        (Procedure::Copy, ResourceKind::Role) => copy_object::<Role, S>(ctx, rename).await,
        (Procedure::Copy, ResourceKind::RoleBinding) => {
            copy_object::<RoleBinding, S>(ctx, rename).await
        }
        (Procedure::Copy, ResourceKind::Route) => copy_object::<Route, S>(ctx, rename).await,
        (Procedure::ControllerRole, _) => {
            let role = Role {
                metadata: owned_meta(ctx, rename.current),
                rules: Some(controller_policy_rules()),
            };
            create_synthesized(ctx, rename, role).await
        }
        (
            Procedure::Binding {
                service_account,
                role,
            },
            _,
        ) => {
            let binding = RoleBinding {
                metadata: owned_meta(ctx, rename.current),
                role_ref: RoleRef {
                    api_group: "rbac.authorization.k8s.io".to_string(),
                    kind: "Role".to_string(),
                    name: role.to_string(),
                },
                subjects: Some(vec![Subject {
                    kind: "ServiceAccount".to_string(),
                    name: service_account.to_string(),
                    ..Default::default()
                }]),
            };
            create_synthesized(ctx, rename, binding).await
        }
        (Procedure::Regenerate(endpoint), _) => {
            regenerate(ctx, authority, rename, endpoint, outcome).await
        }
    }
}

/// Point the router console service at its renamed serving certificate.
async fn update_router_console<S: ObjectStore>(store: &S) -> Result<()> {
    let Some(mut service) = store.get::<Service>(ROUTER_CONSOLE_SERVICE).await? else {
        return Ok(());
    };
    let annotations = service.metadata.annotations.get_or_insert_with(BTreeMap::new);
    if annotations.get(SERVING_CERT_ANNOTATION).map(String::as_str)
        == Some(ROUTER_CONSOLE_CERTS_SECRET)
    {
        return Ok(());
    }
    annotations.insert(
        SERVING_CERT_ANNOTATION.to_string(),
        ROUTER_CONSOLE_CERTS_SECRET.to_string(),
    );
    store
        .replace(&service)
        .await
        .context("Updating router console service")?;
    info!("Updated serving certificate of {}", ROUTER_CONSOLE_SERVICE);
    Ok(())
}

/// Retarget an existing route at `service`. Missing routes are skipped.
async fn retarget_route<S: ObjectStore>(store: &S, name: &str, service: &str) -> Result<()> {
    let Some(mut route) = store.get::<Route>(name).await? else {
        debug!("Route {} not present, nothing to retarget", name);
        return Ok(());
    };
    if route.spec.to.kind == "Service" && route.spec.to.name == service {
        return Ok(());
    }
    route.spec.to = RouteTargetReference {
        weight: route.spec.to.weight,
        ..RouteTargetReference::service(service)
    };
    store
        .replace(&route)
        .await
        .with_context(|| format!("Retargeting route {name}"))?;
    info!("Route {} now targets service {}", name, service);
    Ok(())
}

/// Run every rename in table order.
pub async fn execute<S, A>(ctx: &SiteContext<'_, S>, authority: &A) -> Result<MigrationOutcome>
where
    S: ObjectStore,
    A: CertificateAuthority,
{
    let mut outcome = MigrationOutcome::default();
    let (supported, in_use) = detect_routes(ctx.store).await?;
    outcome.routes_supported = supported;
    outcome.routes_in_use = in_use;
    info!(
        "Starting rename migration (routes supported: {}, in use: {})",
        supported, in_use
    );

    let mut last_kind = None;
    for rename in RENAMES {
        if rename.kind == ResourceKind::Route && !outcome.routes_supported {
            continue;
        }
        if last_kind == Some(ResourceKind::Service) && rename.kind != ResourceKind::Service {
            update_router_console(ctx.store).await?;
        }
        last_kind = Some(rename.kind);

        if migrate_one(ctx, authority, rename, &mut outcome).await? {
            outcome.created.push(rename.current.to_string());
        }
    }

    if outcome.routes_supported {
        retarget_route(ctx.store, EDGE_ROUTE, TRANSPORT_SERVICE).await?;
        retarget_route(ctx.store, INTER_ROUTER_ROUTE, TRANSPORT_SERVICE).await?;
    }

    let console: Option<Service> = ctx.store.get(CONTROLLER_SERVICE).await?;
    outcome.console_uses_load_balancer = console.as_ref().is_some_and(is_load_balancer);

    info!(
        "Rename migration finished: {} objects created",
        outcome.created.len()
    );
    Ok(outcome)
}
