//! Collaborator traits
//!
//! Credential, certificate trust and referral connection handlers plugged
//! into a [`ConnectionManager`].

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ConnectionParameter;
use crate::connection::{Connection, ConnectionManager};
use crate::error::{ConnectionError, ConnectionResult};
use crate::ids::ConnectionId;
use crate::referral::Referral;
use crate::types::EncryptionMethod;

/// Credentials used for one bind.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub bind_principal: Option<String>,
    pub bind_password: Option<String>,
    pub sasl_realm: Option<String>,
}

impl Credentials {
    /// Create credentials from principal and password.
    pub fn new(principal: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            bind_principal: Some(principal.into()),
            bind_password: Some(password.into()),
            sasl_realm: None,
        }
    }

    /// Empty credentials for anonymous binds.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::new("", "")
    }

    /// Set the SASL realm.
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.sasl_realm = Some(realm.into());
        self
    }

    /// Whether both principal and password are present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.bind_principal.is_some() && self.bind_password.is_some()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("bind_principal", &self.bind_principal)
            .field(
                "bind_password",
                &self.bind_password.as_ref().map(|_| "***REDACTED***"),
            )
            .field("sasl_realm", &self.sasl_realm)
            .finish()
    }
}

/// Supplies credentials when a connection binds.
#[async_trait]
pub trait AuthHandler: Send + Sync {
    /// Credentials for the connection, or `None` if the user declined.
    async fn credentials(&self, parameter: &ConnectionParameter) -> Option<Credentials>;
}

/// Uses the principal and password stored in the connection parameters.
#[derive(Debug, Default, Clone, Copy)]
pub struct StoredCredentialsAuthHandler;

#[async_trait]
impl AuthHandler for StoredCredentialsAuthHandler {
    async fn credentials(&self, parameter: &ConnectionParameter) -> Option<Credentials> {
        Some(Credentials {
            bind_principal: parameter.bind_principal.clone(),
            bind_password: parameter.bind_password.clone(),
            sasl_realm: parameter.sasl_realm.clone(),
        })
    }
}

/// Trust decision for a server certificate that failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrustLevel {
    /// Trust this host from now on.
    Permanent,
    /// Trust this host until the manager is dropped.
    Session,
    /// Abort the handshake.
    NotTrusted,
}

/// Decides whether to trust a certificate the platform trust store rejected.
pub trait TrustHandler: Send + Sync {
    /// Decide for `host`, given the validation failure message.
    fn verify_trust_level(&self, host: &str, failure: &str) -> TrustLevel;
}

/// Remembered trust decisions, consulted before asking the trust handler.
#[derive(Default)]
pub struct CertificateTrust {
    handler: Option<Arc<dyn TrustHandler>>,
    session_hosts: RwLock<HashSet<String>>,
    permanent_hosts: RwLock<HashSet<String>>,
}

impl CertificateTrust {
    /// Create a trust store asking `handler` for new hosts.
    pub fn new(handler: Option<Arc<dyn TrustHandler>>) -> Self {
        Self {
            handler,
            session_hosts: RwLock::new(HashSet::new()),
            permanent_hosts: RwLock::new(HashSet::new()),
        }
    }

    /// Seed hosts trusted permanently.
    pub fn with_permanent_hosts<S: Into<String>>(self, hosts: impl IntoIterator<Item = S>) -> Self {
        self.permanent_hosts
            .write()
            .extend(hosts.into_iter().map(|h| h.into().to_lowercase()));
        self
    }

    /// Whether the host was trusted before.
    pub fn is_trusted(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        self.permanent_hosts.read().contains(&host) || self.session_hosts.read().contains(&host)
    }

    /// Decide whether to continue with a certificate that failed validation.
    pub fn check(&self, host: &str, failure: &str) -> ConnectionResult<TrustLevel> {
        if self.is_trusted(host) {
            debug!(host = %host, "Certificate previously trusted");
            return Ok(TrustLevel::Session);
        }

        let level = match &self.handler {
            Some(handler) => handler.verify_trust_level(host, failure),
            None => TrustLevel::NotTrusted,
        };

        match level {
            TrustLevel::Permanent => {
                self.permanent_hosts.write().insert(host.to_lowercase());
            }
            TrustLevel::Session => {
                self.session_hosts.write().insert(host.to_lowercase());
            }
            TrustLevel::NotTrusted => {
                warn!(target: "security", host = %host, failure = %failure, "Certificate not trusted");
                return Err(ConnectionError::CertificateNotTrusted {
                    host: host.to_string(),
                    message: failure.to_string(),
                });
            }
        }
        info!(target: "security", host = %host, level = ?level, "Certificate trusted by handler");
        Ok(level)
    }

    /// Hosts trusted permanently.
    pub fn permanent_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.permanent_hosts.read().iter().cloned().collect();
        hosts.sort();
        hosts
    }
}

impl std::fmt::Debug for CertificateTrust {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateTrust")
            .field("has_handler", &self.handler.is_some())
            .field("session_hosts", &self.session_hosts.read().len())
            .field("permanent_hosts", &self.permanent_hosts.read().len())
            .finish()
    }
}

/// Finds the connection used to follow a referral.
#[async_trait]
pub trait ReferralConnectionResolver: Send + Sync {
    /// The connection for `referral`, or `None` to skip it.
    async fn resolve(
        &self,
        manager: &Arc<ConnectionManager>,
        origin: &Arc<Connection>,
        referral: &Referral,
    ) -> Option<Arc<Connection>>;
}

/// Follows referrals with the origin's authentication settings.
///
/// Reuses a managed connection to the same host and port, otherwise
/// registers a new one copying the origin's parameters.
#[derive(Debug, Default, Clone, Copy)]
pub struct SameCredentialsReferralResolver;

#[async_trait]
impl ReferralConnectionResolver for SameCredentialsReferralResolver {
    async fn resolve(
        &self,
        manager: &Arc<ConnectionManager>,
        origin: &Arc<Connection>,
        referral: &Referral,
    ) -> Option<Arc<Connection>> {
        for url in referral.urls() {
            let host = if url.host.is_empty() {
                origin.host().to_string()
            } else {
                url.host.clone()
            };
            let port = url.port_or_default();
            if let Some(existing) = manager.connection_by_host_port(&host, port) {
                return Some(existing);
            }
        }

        let url = referral.first_url();
        let mut parameter = origin.parameter().clone();
        parameter.id = ConnectionId::new();
        if !url.host.is_empty() {
            parameter.host = url.host.clone();
        }
        parameter.port = url.port_or_default();
        if url.secure {
            parameter.encryption_method = EncryptionMethod::Ldaps;
        } else if parameter.encryption_method == EncryptionMethod::Ldaps {
            parameter.encryption_method = EncryptionMethod::None;
        }
        parameter.name = format!("{}:{}", parameter.host, parameter.port);

        match manager.add_connection(parameter) {
            Ok(connection) => {
                info!(
                    origin = %origin.name(),
                    target = %connection.name(),
                    "Created connection for referral"
                );
                Some(connection)
            }
            Err(e) => {
                warn!(error = %e, "Failed to create referral connection");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedTrust(TrustLevel);

    impl TrustHandler for FixedTrust {
        fn verify_trust_level(&self, _host: &str, _failure: &str) -> TrustLevel {
            self.0
        }
    }

    #[test]
    fn test_credentials_complete() {
        assert!(Credentials::new("cn=admin", "secret").is_complete());
        assert!(Credentials::anonymous().is_complete());
        assert!(!Credentials::default().is_complete());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let debug = format!("{:?}", Credentials::new("cn=admin", "secret"));
        assert!(!debug.contains("secret"));
    }

    #[tokio::test]
    async fn test_stored_credentials_handler() {
        let parameter =
            ConnectionParameter::new("test", "host", 389).with_credentials("cn=admin", "secret");
        let credentials = StoredCredentialsAuthHandler
            .credentials(&parameter)
            .await
            .unwrap();
        assert_eq!(credentials.bind_principal.as_deref(), Some("cn=admin"));
        assert_eq!(credentials.bind_password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_trust_without_handler_rejects() {
        let trust = CertificateTrust::new(None);
        let err = trust.check("ldap.example.com", "self signed").unwrap_err();
        assert!(matches!(err, ConnectionError::CertificateNotTrusted { .. }));
    }

    #[test]
    fn test_trust_session_decision_is_remembered() {
        let trust = CertificateTrust::new(Some(Arc::new(FixedTrust(TrustLevel::Session))));
        assert!(!trust.is_trusted("LDAP.example.com"));
        assert_eq!(
            trust.check("LDAP.example.com", "expired").unwrap(),
            TrustLevel::Session
        );
        assert!(trust.is_trusted("ldap.example.com"));
        assert!(trust.permanent_hosts().is_empty());
    }

    #[test]
    fn test_trust_permanent_decision() {
        let trust = CertificateTrust::new(Some(Arc::new(FixedTrust(TrustLevel::Permanent))));
        trust.check("a.example.com", "unknown ca").unwrap();
        assert_eq!(trust.permanent_hosts(), vec!["a.example.com"]);
    }

    #[test]
    fn test_trust_not_trusted() {
        let trust = CertificateTrust::new(Some(Arc::new(FixedTrust(TrustLevel::NotTrusted))))
            .with_permanent_hosts(["known.example.com"]);
        assert!(trust.check("other.example.com", "bad").is_err());
        assert!(trust.check("KNOWN.example.com", "bad").is_ok());
    }
}
