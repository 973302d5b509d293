//! Connection core error types
//!
//! Error definitions with transient/permanent classification for the
//! reconnect-and-retry logic of the connection wrapper.

use thiserror::Error;

/// LDAP result code for a referral.
pub const RC_REFERRAL: u32 = 10;
/// LDAP result code for invalid credentials.
pub const RC_INVALID_CREDENTIALS: u32 = 49;
/// LDAP result code for a busy server.
pub const RC_BUSY: u32 = 51;
/// LDAP result code for an unavailable server.
pub const RC_UNAVAILABLE: u32 = 52;
/// LDAP result code for an operation only allowed on leaf entries.
pub const RC_NOT_ALLOWED_ON_NON_LEAF: u32 = 66;
/// Client-side result code for a lost server connection.
pub const RC_SERVER_DOWN: u32 = 81;

/// Authentication failures, kept apart so callers can tell them apart.
#[derive(Debug, Error)]
pub enum AuthenticationError {
    /// No credential handler is registered with the connection manager.
    #[error("no authentication handler registered")]
    NoAuthHandler,

    /// The credential handler returned nothing, or the credentials are incomplete.
    #[error("no credentials available for connection '{connection}'")]
    NoCredentials { connection: String },

    /// The server rejected the credentials.
    #[error("invalid credentials: {message}")]
    InvalidCredentials { message: String },

    /// The transport cannot perform the configured authentication method.
    #[error("unsupported authentication method: {method}")]
    UnsupportedMethod { method: String },
}

/// Error that can occur while talking to a directory server.
#[derive(Debug, Error)]
pub enum ConnectionError {
    // Transport errors
    /// Failed to establish the transport (bad host/port, TLS negotiation).
    #[error("connect failed: {message}")]
    ConnectFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The server certificate was rejected by the trust handler.
    #[error("certificate for {host} not trusted: {message}")]
    CertificateNotTrusted { host: String, message: String },

    /// The session broke while an operation was in flight.
    #[error("communication failure: {message}")]
    Communication {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The server reported that it is unavailable.
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String },

    /// The server reported that it is too busy to serve the request.
    #[error("insufficient resources: {message}")]
    InsufficientResources { message: String },

    /// The operation needs a live session but there is none.
    #[error("not connected")]
    NotConnected,

    // Authentication errors
    /// Bind failed.
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthenticationError),

    // Operation errors
    /// The server answered with a non-success result code.
    #[error("[LDAP: error code {code} - {message}]")]
    OperationFailed { code: u32, message: String },

    /// Deleting or renaming an entry that still has children.
    #[error("[LDAP: error code 66 - {message}]")]
    ContextNotEmpty { message: String },

    /// A referral target was already queued or visited.
    #[error("referral loop detected: {url} ({dn})")]
    ReferralLoop { url: String, dn: String },

    /// The monitor cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// A mutating operation was issued against a read-only connection.
    #[error("connection '{connection}' is read-only")]
    ReadOnly { connection: String },

    // Configuration errors
    /// A referral or search URL could not be parsed.
    #[error("invalid LDAP URL '{url}': {message}")]
    InvalidLdapUrl { url: String, message: String },

    /// Connection parameters or settings are invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    // Internal errors
    /// Writing an audit log failed.
    #[error("audit log error: {message}")]
    AuditLog {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ConnectionError {
    /// Check if this error is transient and warrants one reconnect-and-retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectionError::Communication { .. }
                | ConnectionError::ServiceUnavailable { .. }
                | ConnectionError::InsufficientResources { .. }
        )
    }

    /// Check if this error is permanent and retry won't help.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Check if this error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ConnectionError::Cancelled)
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            ConnectionError::ConnectFailed { .. } => "CONNECT_FAILED",
            ConnectionError::CertificateNotTrusted { .. } => "CERTIFICATE_NOT_TRUSTED",
            ConnectionError::Communication { .. } => "COMMUNICATION",
            ConnectionError::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            ConnectionError::InsufficientResources { .. } => "INSUFFICIENT_RESOURCES",
            ConnectionError::NotConnected => "NOT_CONNECTED",
            ConnectionError::Authentication(AuthenticationError::NoAuthHandler) => {
                "NO_AUTH_HANDLER"
            }
            ConnectionError::Authentication(AuthenticationError::NoCredentials { .. }) => {
                "NO_CREDENTIALS"
            }
            ConnectionError::Authentication(AuthenticationError::InvalidCredentials { .. }) => {
                "INVALID_CREDENTIALS"
            }
            ConnectionError::Authentication(AuthenticationError::UnsupportedMethod { .. }) => {
                "UNSUPPORTED_AUTH_METHOD"
            }
            ConnectionError::OperationFailed { .. } => "OPERATION_FAILED",
            ConnectionError::ContextNotEmpty { .. } => "CONTEXT_NOT_EMPTY",
            ConnectionError::ReferralLoop { .. } => "REFERRAL_LOOP",
            ConnectionError::Cancelled => "CANCELLED",
            ConnectionError::ReadOnly { .. } => "READ_ONLY",
            ConnectionError::InvalidLdapUrl { .. } => "INVALID_LDAP_URL",
            ConnectionError::InvalidConfiguration { .. } => "INVALID_CONFIG",
            ConnectionError::AuditLog { .. } => "AUDIT_LOG",
            ConnectionError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Map a non-success LDAP result code to an error.
    ///
    /// Codes for an unreachable or overloaded server map to the transient
    /// variants; everything else is an operation failure.
    pub fn from_result_code(code: u32, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            RC_INVALID_CREDENTIALS => {
                ConnectionError::Authentication(AuthenticationError::InvalidCredentials { message })
            }
            RC_BUSY => ConnectionError::InsufficientResources { message },
            RC_UNAVAILABLE => ConnectionError::ServiceUnavailable { message },
            RC_NOT_ALLOWED_ON_NON_LEAF => ConnectionError::ContextNotEmpty { message },
            RC_SERVER_DOWN => ConnectionError::Communication {
                message,
                source: None,
            },
            _ => ConnectionError::OperationFailed { code, message },
        }
    }

    // Convenience constructors

    /// Create a connect failed error.
    pub fn connect_failed(message: impl Into<String>) -> Self {
        ConnectionError::ConnectFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connect failed error with source.
    pub fn connect_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectionError::ConnectFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a communication error.
    pub fn communication(message: impl Into<String>) -> Self {
        ConnectionError::Communication {
            message: message.into(),
            source: None,
        }
    }

    /// Create a communication error with source.
    pub fn communication_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectionError::Communication {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an operation failed error.
    pub fn operation_failed(code: u32, message: impl Into<String>) -> Self {
        ConnectionError::OperationFailed {
            code,
            message: message.into(),
        }
    }

    /// Create an audit log error with source.
    pub fn audit_log_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectionError::AuditLog {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        ConnectionError::Internal {
            message: message.into(),
            source: None,
        }
    }
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        let transient_errors = vec![
            ConnectionError::communication("connection reset"),
            ConnectionError::ServiceUnavailable {
                message: "test".to_string(),
            },
            ConnectionError::InsufficientResources {
                message: "test".to_string(),
            },
        ];

        for err in transient_errors {
            assert!(
                err.is_transient(),
                "Expected {} to be transient",
                err.error_code()
            );
            assert!(!err.is_permanent());
        }
    }

    #[test]
    fn test_permanent_errors() {
        let permanent_errors = vec![
            ConnectionError::connect_failed("no route to host"),
            ConnectionError::Authentication(AuthenticationError::NoAuthHandler),
            ConnectionError::operation_failed(32, "no such object"),
            ConnectionError::Cancelled,
            ConnectionError::ReadOnly {
                connection: "test".to_string(),
            },
            ConnectionError::ReferralLoop {
                url: "ldap://a".to_string(),
                dn: "dc=a".to_string(),
            },
        ];

        for err in permanent_errors {
            assert!(
                err.is_permanent(),
                "Expected {} to be permanent",
                err.error_code()
            );
        }
    }

    #[test]
    fn test_from_result_code() {
        assert!(ConnectionError::from_result_code(RC_BUSY, "busy").is_transient());
        assert!(ConnectionError::from_result_code(RC_UNAVAILABLE, "down").is_transient());
        assert!(ConnectionError::from_result_code(RC_SERVER_DOWN, "lost").is_transient());
        assert_eq!(
            ConnectionError::from_result_code(RC_INVALID_CREDENTIALS, "bad").error_code(),
            "INVALID_CREDENTIALS"
        );
        assert_eq!(
            ConnectionError::from_result_code(RC_NOT_ALLOWED_ON_NON_LEAF, "children").error_code(),
            "CONTEXT_NOT_EMPTY"
        );
        assert_eq!(
            ConnectionError::from_result_code(32, "missing").error_code(),
            "OPERATION_FAILED"
        );
    }

    #[test]
    fn test_operation_failed_display() {
        let err = ConnectionError::operation_failed(50, "insufficient access");
        assert_eq!(
            err.to_string(),
            "[LDAP: error code 50 - insufficient access]"
        );
    }

    #[test]
    fn test_auth_errors_are_distinct() {
        let codes = [
            ConnectionError::from(AuthenticationError::NoAuthHandler).error_code(),
            ConnectionError::from(AuthenticationError::NoCredentials {
                connection: "c".to_string(),
            })
            .error_code(),
            ConnectionError::from(AuthenticationError::InvalidCredentials {
                message: "m".to_string(),
            })
            .error_code(),
        ];
        assert_ne!(codes[0], codes[1]);
        assert_ne!(codes[1], codes[2]);
        assert_ne!(codes[0], codes[2]);
    }
}
