//! Credential regeneration for renamed network endpoints.
//!
//! A credential is a TLS secret signed by one of the site's certificate
//! authorities. Server credentials are bound to the host names clients use to
//! reach the endpoint; client bundles carry a connection descriptor instead.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use tracing::{debug, info};

use crate::authority::CertificateAuthority;
use crate::error::SkupError;
use crate::names::AMQPS_PORT;
use crate::store::{ObjectStore, get_required, ignore_already_exists};

/// Certificate subjects must be strictly shorter than this.
pub const SUBJECT_LENGTH_LIMIT: usize = 64;

/// Request to mint a credential signed by `authority`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Name of the secret holding the signing authority.
    pub authority: String,
    pub name: String,
    pub subject: String,
    pub hosts: Vec<String>,
    /// Client bundle with a `connect.json` descriptor rather than a server
    /// certificate.
    pub opaque_bundle: bool,
}

/// What [`issue`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueOutcome {
    Issued,
    AlreadyPresent,
}

impl Credential {
    /// Reject requests that cannot produce a usable server certificate.
    pub fn validate(&self) -> Result<(), SkupError> {
        if self.opaque_bundle {
            return Ok(());
        }
        if self.hosts.is_empty() {
            return Err(SkupError::InvalidCredential {
                name: self.name.clone(),
                reason: "server credentials need at least one host".to_string(),
            });
        }
        if self.subject.len() >= SUBJECT_LENGTH_LIMIT {
            return Err(SkupError::InvalidCredential {
                name: self.name.clone(),
                reason: format!(
                    "subject '{}' must be shorter than {} characters",
                    self.subject, SUBJECT_LENGTH_LIMIT
                ),
            });
        }
        Ok(())
    }
}

/// First host short enough to be a certificate subject, else `fallback`.
pub fn select_subject(hosts: &[String], fallback: &str) -> String {
    hosts
        .iter()
        .find(|h| h.len() < SUBJECT_LENGTH_LIMIT)
        .cloned()
        .unwrap_or_else(|| fallback.to_string())
}

/// Client descriptor stored in bundles, pointing at the local transport.
fn connect_json(host: &str) -> String {
    serde_json::json!({
        "scheme": "amqps",
        "host": host,
        "port": AMQPS_PORT.to_string(),
        "tls": {
            "ca": "/etc/messaging/ca.crt",
            "cert": "/etc/messaging/tls.crt",
            "key": "/etc/messaging/tls.key",
            "verify": true,
        }
    })
    .to_string()
}

/// Mint `credential` unless a secret of that name already exists.
pub async fn issue<S, A>(
    store: &S,
    authority: &A,
    credential: &Credential,
    owner: Option<&OwnerReference>,
) -> Result<IssueOutcome>
where
    S: ObjectStore,
    A: CertificateAuthority,
{
    credential.validate()?;

    if store.get::<Secret>(&credential.name).await?.is_some() {
        debug!("Credential {} already present", credential.name);
        return Ok(IssueOutcome::AlreadyPresent);
    }

    let ca: Secret = get_required(store, &credential.authority)
        .await
        .with_context(|| format!("Loading authority for credential {}", credential.name))?;

    let mut data = authority.sign(&ca, credential)?;
    if credential.opaque_bundle {
        data.insert(
            "connect.json".to_string(),
            ByteString(connect_json(&credential.subject).into_bytes()),
        );
    }

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(credential.name.clone()),
            owner_references: owner.map(|o| vec![o.clone()]),
            ..Default::default()
        },
        type_: Some("kubernetes.io/tls".to_string()),
        data: Some(data),
        ..Default::default()
    };

    match ignore_already_exists(store.create(&secret).await)? {
        Some(_) => {
            info!(
                "Issued credential {} (subject: {}, authority: {})",
                credential.name, credential.subject, credential.authority
            );
            Ok(IssueOutcome::Issued)
        }
        None => Ok(IssueOutcome::AlreadyPresent),
    }
}

/// Secret data map with the given string entries.
pub fn secret_data(entries: &[(&str, &str)]) -> BTreeMap<String, ByteString> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
        .collect()
}
