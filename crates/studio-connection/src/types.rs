//! Connection core type definitions
//!
//! Enums for connection configuration and search behaviour.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Transport encryption of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionMethod {
    /// Plain LDAP.
    #[default]
    None,
    /// Implicit TLS (LDAPS).
    Ldaps,
    /// Plain LDAP upgraded with the StartTLS extended operation.
    StartTls,
}

impl EncryptionMethod {
    /// Default port for this encryption method.
    #[must_use]
    pub fn default_port(&self) -> u16 {
        match self {
            EncryptionMethod::Ldaps => 636,
            EncryptionMethod::None | EncryptionMethod::StartTls => 389,
        }
    }

    /// URL scheme used to reach a server with this encryption method.
    #[must_use]
    pub fn scheme(&self) -> &'static str {
        match self {
            EncryptionMethod::Ldaps => "ldaps",
            EncryptionMethod::None | EncryptionMethod::StartTls => "ldap",
        }
    }
}

/// Authentication method used when binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationMethod {
    /// Anonymous bind.
    None,
    /// Simple bind with DN and password.
    #[default]
    Simple,
    /// SASL DIGEST-MD5.
    SaslDigestMd5,
    /// SASL CRAM-MD5.
    SaslCramMd5,
    /// SASL GSSAPI (Kerberos).
    SaslGssapi,
    /// SASL PLAIN.
    SaslPlain,
}

impl AuthenticationMethod {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthenticationMethod::None => "none",
            AuthenticationMethod::Simple => "simple",
            AuthenticationMethod::SaslDigestMd5 => "DIGEST-MD5",
            AuthenticationMethod::SaslCramMd5 => "CRAM-MD5",
            AuthenticationMethod::SaslGssapi => "GSSAPI",
            AuthenticationMethod::SaslPlain => "PLAIN",
        }
    }

    /// Whether this is a SASL mechanism.
    #[must_use]
    pub fn is_sasl(&self) -> bool {
        !matches!(
            self,
            AuthenticationMethod::None | AuthenticationMethod::Simple
        )
    }
}

impl fmt::Display for AuthenticationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How referrals returned by a server are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReferralHandlingMethod {
    /// Drop referral results silently.
    Ignore,
    /// Re-issue the operation against the referred server.
    #[default]
    Follow,
    /// Surface referral URLs as placeholder results.
    FollowManually,
    /// Send the ManageDsaIT control so referral objects come back as entries.
    Manage,
}

/// When the server dereferences aliases during a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AliasDereferencingMethod {
    /// Never dereference.
    Never,
    /// Dereference both while finding the base and while searching.
    #[default]
    Always,
    /// Dereference only while locating the base object.
    Finding,
    /// Dereference only while searching below the base object.
    Search,
}

impl AliasDereferencingMethod {
    /// Wire value of the derefAliases field.
    #[must_use]
    pub fn as_ldap_int(&self) -> u8 {
        match self {
            AliasDereferencingMethod::Never => 0,
            AliasDereferencingMethod::Search => 1,
            AliasDereferencingMethod::Finding => 2,
            AliasDereferencingMethod::Always => 3,
        }
    }

    /// Name used in LDIF comments, e.g. `derefAlways (3)`.
    #[must_use]
    pub fn ldif_label(&self) -> &'static str {
        match self {
            AliasDereferencingMethod::Never => "neverDerefAliases (0)",
            AliasDereferencingMethod::Search => "derefInSearching (1)",
            AliasDereferencingMethod::Finding => "derefFindingBaseObj (2)",
            AliasDereferencingMethod::Always => "derefAlways (3)",
        }
    }

    /// Argument of the `ldapsearch -a` option.
    #[must_use]
    pub fn command_line_arg(&self) -> &'static str {
        match self {
            AliasDereferencingMethod::Never => "never",
            AliasDereferencingMethod::Search => "search",
            AliasDereferencingMethod::Finding => "find",
            AliasDereferencingMethod::Always => "always",
        }
    }
}

/// Search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    /// Only the base object.
    Object,
    /// Immediate children of the base object.
    OneLevel,
    /// The base object and all descendants.
    #[default]
    Subtree,
}

impl SearchScope {
    /// Wire value of the scope field.
    #[must_use]
    pub fn as_ldap_int(&self) -> u8 {
        match self {
            SearchScope::Object => 0,
            SearchScope::OneLevel => 1,
            SearchScope::Subtree => 2,
        }
    }

    /// Token used in LDAP URLs and on the `ldapsearch` command line.
    #[must_use]
    pub fn as_url_str(&self) -> &'static str {
        match self {
            SearchScope::Object => "base",
            SearchScope::OneLevel => "one",
            SearchScope::Subtree => "sub",
        }
    }

    /// Name used in LDIF comments, e.g. `wholeSubtree (2)`.
    #[must_use]
    pub fn ldif_label(&self) -> &'static str {
        match self {
            SearchScope::Object => "baseObject (0)",
            SearchScope::OneLevel => "singleLevel (1)",
            SearchScope::Subtree => "wholeSubtree (2)",
        }
    }
}

impl FromStr for SearchScope {
    type Err = ParseSearchScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "base" => Ok(SearchScope::Object),
            "one" => Ok(SearchScope::OneLevel),
            "sub" => Ok(SearchScope::Subtree),
            _ => Err(ParseSearchScopeError(s.to_string())),
        }
    }
}

/// Error parsing a search scope from an LDAP URL.
#[derive(Debug, Clone)]
pub struct ParseSearchScopeError(String);

impl fmt::Display for ParseSearchScopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid scope '{}', expected one of: base, one, sub",
            self.0
        )
    }
}

impl std::error::Error for ParseSearchScopeError {}

/// Lifecycle state of a connection wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No transport.
    #[default]
    Disconnected,
    /// Transport open, not authenticated.
    Connected,
    /// Transport open and bound.
    Bound,
}

impl ConnectionState {
    /// Whether a transport is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !matches!(self, ConnectionState::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::Bound => "bound",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        assert_eq!(EncryptionMethod::None.default_port(), 389);
        assert_eq!(EncryptionMethod::StartTls.default_port(), 389);
        assert_eq!(EncryptionMethod::Ldaps.default_port(), 636);
    }

    #[test]
    fn test_scope_from_str() {
        assert_eq!("base".parse::<SearchScope>().unwrap(), SearchScope::Object);
        assert_eq!("ONE".parse::<SearchScope>().unwrap(), SearchScope::OneLevel);
        assert_eq!("sub".parse::<SearchScope>().unwrap(), SearchScope::Subtree);
        assert!("children".parse::<SearchScope>().is_err());
    }

    #[test]
    fn test_alias_labels() {
        assert_eq!(AliasDereferencingMethod::Always.ldif_label(), "derefAlways (3)");
        assert_eq!(AliasDereferencingMethod::Never.as_ldap_int(), 0);
        assert_eq!(AliasDereferencingMethod::Finding.command_line_arg(), "find");
    }

    #[test]
    fn test_referral_method_serialization() {
        let json = serde_json::to_string(&ReferralHandlingMethod::FollowManually).unwrap();
        assert_eq!(json, "\"follow_manually\"");
    }

    #[test]
    fn test_state_is_connected() {
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert!(ConnectionState::Bound.is_connected());
    }
}
