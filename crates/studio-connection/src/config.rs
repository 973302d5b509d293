//! Connection configuration
//!
//! Per-connection parameters and the core settings shared by all
//! connections of a [`ConnectionManager`](crate::connection::ConnectionManager).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ConnectionError, ConnectionResult};
use crate::ids::ConnectionId;
use crate::operation::SearchParameter;
use crate::types::{
    AliasDereferencingMethod, AuthenticationMethod, EncryptionMethod, ReferralHandlingMethod,
};

/// Parameters of one directory connection.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionParameter {
    /// Connection identifier.
    #[serde(default)]
    pub id: ConnectionId,

    /// Display name.
    pub name: String,

    /// Server hostname or IP address.
    pub host: String,

    /// Server port (389 for LDAP, 636 for LDAPS).
    #[serde(default = "default_ldap_port")]
    pub port: u16,

    /// Transport encryption.
    #[serde(default)]
    pub encryption_method: EncryptionMethod,

    /// Authentication method.
    #[serde(default)]
    pub auth_method: AuthenticationMethod,

    /// Bind principal (DN for simple binds, user name for SASL).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_principal: Option<String>,

    /// Bind password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_password: Option<String>,

    /// SASL realm for DIGEST-MD5.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sasl_realm: Option<String>,

    /// Reject modify/rename/create/delete before any network call.
    #[serde(default)]
    pub read_only: bool,

    /// Transport timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Default referral handling for searches on this connection.
    #[serde(default)]
    pub referral_handling: ReferralHandlingMethod,

    /// Default alias dereferencing for searches on this connection.
    #[serde(default)]
    pub alias_dereferencing: AliasDereferencingMethod,

    /// Free-form properties kept with the connection.
    #[serde(default)]
    pub extended_properties: HashMap<String, String>,
}

impl std::fmt::Debug for ConnectionParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParameter")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("encryption_method", &self.encryption_method)
            .field("auth_method", &self.auth_method)
            .field("bind_principal", &self.bind_principal)
            .field(
                "bind_password",
                &self.bind_password.as_ref().map(|_| "***REDACTED***"),
            )
            .field("sasl_realm", &self.sasl_realm)
            .field("read_only", &self.read_only)
            .field("timeout_ms", &self.timeout_ms)
            .field("referral_handling", &self.referral_handling)
            .field("alias_dereferencing", &self.alias_dereferencing)
            .field("extended_properties", &self.extended_properties)
            .finish()
    }
}

fn default_ldap_port() -> u16 {
    389
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl ConnectionParameter {
    /// Create parameters for a plain LDAP connection with simple authentication.
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: ConnectionId::new(),
            name: name.into(),
            host: host.into(),
            port,
            encryption_method: EncryptionMethod::None,
            auth_method: AuthenticationMethod::Simple,
            bind_principal: None,
            bind_password: None,
            sasl_realm: None,
            read_only: false,
            timeout_ms: default_timeout_ms(),
            referral_handling: ReferralHandlingMethod::default(),
            alias_dereferencing: AliasDereferencingMethod::default(),
            extended_properties: HashMap::new(),
        }
    }

    /// Set bind principal and password.
    pub fn with_credentials(
        mut self,
        principal: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.bind_principal = Some(principal.into());
        self.bind_password = Some(password.into());
        self
    }

    /// Set the authentication method.
    #[must_use]
    pub fn with_auth_method(mut self, method: AuthenticationMethod) -> Self {
        self.auth_method = method;
        self
    }

    /// Set the encryption method.
    #[must_use]
    pub fn with_encryption(mut self, method: EncryptionMethod) -> Self {
        self.encryption_method = method;
        self
    }

    /// Flag the connection read-only.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the default referral handling.
    #[must_use]
    pub fn with_referral_handling(mut self, method: ReferralHandlingMethod) -> Self {
        self.referral_handling = method;
        self
    }

    /// Set the default alias dereferencing.
    #[must_use]
    pub fn with_alias_dereferencing(mut self, method: AliasDereferencingMethod) -> Self {
        self.alias_dereferencing = method;
        self
    }

    /// Transport timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// A search request carrying this connection's referral and alias defaults.
    pub fn search(&self, base: impl Into<String>, filter: impl Into<String>) -> SearchParameter {
        SearchParameter::new(base, filter)
            .with_referral_handling(self.referral_handling)
            .with_alias_dereferencing(self.alias_dereferencing)
    }

    /// Validate the parameters.
    pub fn validate(&self) -> ConnectionResult<()> {
        if self.host.trim().is_empty() {
            return Err(ConnectionError::InvalidConfiguration {
                message: "host is required".to_string(),
            });
        }
        if self.port == 0 {
            return Err(ConnectionError::InvalidConfiguration {
                message: "port must be greater than 0".to_string(),
            });
        }
        if self.timeout_ms == 0 {
            return Err(ConnectionError::InvalidConfiguration {
                message: "timeout must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// Copy with the password removed.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut redacted = self.clone();
        if redacted.bind_password.is_some() {
            redacted.bind_password = Some("***REDACTED***".to_string());
        }
        redacted
    }
}

/// Settings of the LDIF modification log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationLogSettings {
    /// Write the modification log.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Attributes whose values are never written in clear text.
    #[serde(default = "default_masked_attributes")]
    pub masked_attributes: Vec<String>,

    /// Number of rotated files kept per connection.
    #[serde(default = "default_modification_log_file_count")]
    pub file_count: u32,

    /// Maximum file size in kilobytes (1000 bytes).
    #[serde(default = "default_log_file_size_kb")]
    pub file_size_kb: u64,
}

impl Default for ModificationLogSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            masked_attributes: default_masked_attributes(),
            file_count: default_modification_log_file_count(),
            file_size_kb: default_log_file_size_kb(),
        }
    }
}

/// Settings of the LDIF search log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchLogSettings {
    /// Log search requests and result-done records.
    #[serde(default = "default_true")]
    pub request_log_enabled: bool,

    /// Log every returned entry and reference.
    #[serde(default)]
    pub result_entry_log_enabled: bool,

    /// Attributes whose values are never written in clear text.
    #[serde(default = "default_masked_attributes")]
    pub masked_attributes: Vec<String>,

    /// Number of rotated files kept per connection.
    #[serde(default = "default_search_log_file_count")]
    pub file_count: u32,

    /// Maximum file size in kilobytes (1000 bytes).
    #[serde(default = "default_log_file_size_kb")]
    pub file_size_kb: u64,
}

impl Default for SearchLogSettings {
    fn default() -> Self {
        Self {
            request_log_enabled: true,
            result_entry_log_enabled: false,
            masked_attributes: default_masked_attributes(),
            file_count: default_search_log_file_count(),
            file_size_kb: default_log_file_size_kb(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_masked_attributes() -> Vec<String> {
    vec![
        "userPassword".to_string(),
        "sambaNTPassword".to_string(),
        "sambaLMPassword".to_string(),
    ]
}

fn default_modification_log_file_count() -> u32 {
    10
}

fn default_search_log_file_count() -> u32 {
    1
}

fn default_log_file_size_kb() -> u64 {
    100
}

fn default_log_directory() -> PathBuf {
    PathBuf::from("logs")
}

/// Settings shared by all connections of a manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionCoreSettings {
    /// Verify server certificates against the platform trust store.
    #[serde(default = "default_true")]
    pub validate_certificates: bool,

    /// Directory of the LDIF audit logs.
    #[serde(default = "default_log_directory")]
    pub log_directory: PathBuf,

    /// Modification log settings.
    #[serde(default)]
    pub modification_log: ModificationLogSettings,

    /// Search log settings.
    #[serde(default)]
    pub search_log: SearchLogSettings,
}

impl Default for ConnectionCoreSettings {
    fn default() -> Self {
        Self {
            validate_certificates: true,
            log_directory: default_log_directory(),
            modification_log: ModificationLogSettings::default(),
            search_log: SearchLogSettings::default(),
        }
    }
}

impl ConnectionCoreSettings {
    /// Load settings from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> ConnectionResult<Self> {
        serde_json::from_str(json).map_err(|e| ConnectionError::InvalidConfiguration {
            message: format!("invalid settings: {e}"),
        })
    }

    /// Set the log directory.
    pub fn with_log_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_directory = dir.into();
        self
    }

    /// Set certificate validation.
    #[must_use]
    pub fn with_validate_certificates(mut self, validate: bool) -> Self {
        self.validate_certificates = validate;
        self
    }

    /// Set the modification log settings.
    #[must_use]
    pub fn with_modification_log(mut self, settings: ModificationLogSettings) -> Self {
        self.modification_log = settings;
        self
    }

    /// Set the search log settings.
    #[must_use]
    pub fn with_search_log(mut self, settings: SearchLogSettings) -> Self {
        self.search_log = settings;
        self
    }

    /// Validate the settings.
    pub fn validate(&self) -> ConnectionResult<()> {
        if self.modification_log.file_count == 0 || self.search_log.file_count == 0 {
            return Err(ConnectionError::InvalidConfiguration {
                message: "log file count must be greater than 0".to_string(),
            });
        }
        if self.modification_log.file_size_kb == 0 || self.search_log.file_size_kb == 0 {
            return Err(ConnectionError::InvalidConfiguration {
                message: "log file size must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// Warn when certificate validation is disabled.
    pub fn validate_security(&self) {
        if !self.validate_certificates {
            tracing::warn!(
                target: "security",
                "certificate validation is disabled, every server certificate is accepted"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_defaults() {
        let param = ConnectionParameter::new("test", "ldap.example.com", 389);
        assert_eq!(param.timeout(), Duration::from_secs(30));
        assert_eq!(param.auth_method, AuthenticationMethod::Simple);
        assert!(!param.read_only);
        assert!(param.validate().is_ok());
    }

    #[test]
    fn test_parameter_validation() {
        let param = ConnectionParameter::new("test", "", 389);
        assert!(param.validate().is_err());

        let param = ConnectionParameter::new("test", "host", 0);
        assert!(param.validate().is_err());
    }

    #[test]
    fn test_parameter_debug_redacts_password() {
        let param = ConnectionParameter::new("test", "host", 389)
            .with_credentials("cn=admin", "supersecret");
        let debug = format!("{param:?}");
        assert!(!debug.contains("supersecret"));
        assert!(debug.contains("***REDACTED***"));
        assert_eq!(
            param.redacted().bind_password.as_deref(),
            Some("***REDACTED***")
        );
    }

    #[test]
    fn test_parameter_deserialize_defaults() {
        let json = r#"{"name": "dir", "host": "ldap.example.com"}"#;
        let param: ConnectionParameter = serde_json::from_str(json).unwrap();
        assert_eq!(param.port, 389);
        assert_eq!(param.timeout_ms, 30_000);
        assert_eq!(param.referral_handling, ReferralHandlingMethod::Follow);
    }

    #[test]
    fn test_search_uses_connection_defaults() {
        let param = ConnectionParameter::new("test", "host", 389)
            .with_referral_handling(ReferralHandlingMethod::Ignore)
            .with_alias_dereferencing(AliasDereferencingMethod::Never);
        let search = param.search("dc=example", "(objectClass=*)");
        assert_eq!(search.referral_handling, ReferralHandlingMethod::Ignore);
        assert_eq!(search.alias_dereferencing, AliasDereferencingMethod::Never);
    }

    #[test]
    fn test_core_settings_from_json() {
        let settings = ConnectionCoreSettings::from_json(
            r#"{"log_directory": "/tmp/studio", "search_log": {"file_count": 3}}"#,
        )
        .unwrap();
        assert_eq!(settings.log_directory, PathBuf::from("/tmp/studio"));
        assert_eq!(settings.search_log.file_count, 3);
        assert!(settings.search_log.request_log_enabled);
        assert_eq!(settings.modification_log.file_count, 10);
        assert!(settings
            .modification_log
            .masked_attributes
            .contains(&"userPassword".to_string()));
    }

    #[test]
    fn test_core_settings_validation() {
        let mut settings = ConnectionCoreSettings::default();
        assert!(settings.validate().is_ok());
        settings.search_log.file_count = 0;
        assert!(settings.validate().is_err());
    }
}
