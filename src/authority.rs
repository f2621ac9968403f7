//! Certificate authority capability used to sign regenerated credentials.

use std::collections::BTreeMap;
use std::net::IpAddr;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use rcgen::{Certificate, CertificateParams, DistinguishedName, DnType, KeyPair, SanType};
use tracing::debug;

use crate::credential::Credential;
use crate::error::SkupError;

/// Signs a credential request with the authority stored in a secret.
///
/// Returns the secret data of the issued credential (`tls.crt`, `tls.key`
/// and `ca.crt`).
pub trait CertificateAuthority: Send + Sync {
    fn sign(
        &self,
        authority: &Secret,
        request: &Credential,
    ) -> Result<BTreeMap<String, ByteString>, SkupError>;
}

/// [`CertificateAuthority`] backed by `rcgen`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RcgenAuthority;

fn secret_field(secret: &Secret, key: &str, request: &Credential) -> Result<String, SkupError> {
    let bytes = secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .ok_or_else(|| SkupError::Certificate {
            name: request.name.clone(),
            reason: format!("authority {} has no {key}", request.authority),
        })?;
    String::from_utf8(bytes.0.clone()).map_err(|e| SkupError::Certificate {
        name: request.name.clone(),
        reason: format!("authority {} {key} is not UTF-8: {e}", request.authority),
    })
}

impl CertificateAuthority for RcgenAuthority {
    fn sign(
        &self,
        authority: &Secret,
        request: &Credential,
    ) -> Result<BTreeMap<String, ByteString>, SkupError> {
        let fail = |reason: String| SkupError::Certificate {
            name: request.name.clone(),
            reason,
        };

        let ca_cert_pem = secret_field(authority, "tls.crt", request)?;
        let ca_key_pem = secret_field(authority, "tls.key", request)?;

        let ca_key = KeyPair::from_pem(&ca_key_pem).map_err(|e| fail(format!("CA key: {e}")))?;
        let ca_params = CertificateParams::from_ca_cert_pem(&ca_cert_pem, ca_key)
            .map_err(|e| fail(format!("CA certificate: {e}")))?;
        let ca = Certificate::from_params(ca_params).map_err(|e| fail(e.to_string()))?;

        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, request.subject.as_str());
        params.alg = &rcgen::PKCS_ECDSA_P256_SHA256;
        params.subject_alt_names = request
            .hosts
            .iter()
            .map(|h| match h.parse::<IpAddr>() {
                Ok(ip) => SanType::IpAddress(ip),
                Err(_) => SanType::DnsName(h.clone()),
            })
            .collect();

        let cert = Certificate::from_params(params).map_err(|e| fail(e.to_string()))?;
        let cert_pem = cert
            .serialize_pem_with_signer(&ca)
            .map_err(|e| fail(e.to_string()))?;
        let key_pem = cert.serialize_private_key_pem();

        debug!(
            "Signed {} for {} with {} SANs",
            request.name,
            request.subject,
            request.hosts.len()
        );

        Ok(BTreeMap::from([
            ("tls.crt".to_string(), ByteString(cert_pem.into_bytes())),
            ("tls.key".to_string(), ByteString(key_pem.into_bytes())),
            ("ca.crt".to_string(), ByteString(ca_cert_pem.into_bytes())),
        ]))
    }
}

#[cfg(test)]
pub use recording::RecordingAuthority;


#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::secret_data;
    use kube::api::ObjectMeta;
    use rcgen::{BasicConstraints, IsCa};

    fn generated_ca() -> Secret {
        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, "skupper-site-ca");
        params.alg = &rcgen::PKCS_ECDSA_P256_SHA256;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca = Certificate::from_params(params).unwrap();
        let cert = ca.serialize_pem().unwrap();
        let key = ca.serialize_private_key_pem();
        Secret {
            metadata: ObjectMeta {
                name: Some("skupper-site-ca".to_string()),
                ..Default::default()
            },
            data: Some(secret_data(&[("tls.crt", &cert), ("tls.key", &key)])),
            ..Default::default()
        }
    }

    fn request(hosts: &[&str]) -> Credential {
        Credential {
            authority: "skupper-site-ca".to_string(),
            name: "skupper-site-server".to_string(),
            subject: "skupper-router".to_string(),
            hosts: hosts.iter().map(ToString::to_string).collect(),
            opaque_bundle: false,
        }
    }

    #[test]
    fn test_rcgen_signs_with_authority() {
        let ca = generated_ca();
        let data = RcgenAuthority
            .sign(&ca, &request(&["skupper-router", "203.0.113.7"]))
            .unwrap();

        let cert = String::from_utf8(data["tls.crt"].0.clone()).unwrap();
        assert!(cert.starts_with("-----BEGIN CERTIFICATE-----"));
        let key = String::from_utf8(data["tls.key"].0.clone()).unwrap();
        assert!(key.contains("PRIVATE KEY"));
        assert_eq!(data["ca.crt"], ca.data.as_ref().unwrap()["tls.crt"]);
    }

    #[test]
    fn test_rcgen_missing_key_is_error() {
        let mut ca = generated_ca();
        ca.data.as_mut().unwrap().remove("tls.key");
        let err = RcgenAuthority
            .sign(&ca, &request(&["skupper-router"]))
            .unwrap_err();
        assert!(err.to_string().contains("has no tls.key"));
    }
}
