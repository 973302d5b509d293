//! # Directory Connection Core
//!
//! Connection layer of an LDAP directory browser: the connection state
//! machine, referral chasing for searches and updates, and LDIF audit logs.
//!
//! ## Architecture
//!
//! A [`connection::ConnectionManager`] owns every connection together with
//! the services their wrappers use:
//!
//! - [`wrapper::ConnectionWrapper`] - Connect, bind and run directory operations
//! - [`enumeration::StudioSearchEnumeration`] - Lazily enumerate search results,
//!   following referrals
//! - [`referral::ReferralsInfo`] - Per-operation referral bookkeeping with loop detection
//! - [`logging::LdapLogger`] - Observers of every operation, with LDIF
//!   search and modification loggers built in
//! - [`transport::SessionFactory`] - The wire protocol, supplied by a transport crate
//!
//! ## Example
//!
//! ```ignore
//! use studio_connection::prelude::*;
//!
//! let manager = ConnectionManager::builder(session_factory)
//!     .with_auth_handler(Arc::new(StoredCredentialsAuthHandler))
//!     .with_referral_resolver(Arc::new(SameCredentialsReferralResolver))
//!     .build()?;
//!
//! let connection = manager.add_connection(
//!     ConnectionParameter::new("corp", "ldap.example.com", 389)
//!         .with_credentials("cn=admin,dc=example,dc=com", "secret"),
//! )?;
//!
//! let monitor = StudioProgressMonitor::new();
//! let request = connection.parameter().search("dc=example,dc=com", "(objectClass=person)");
//! let mut results = connection.wrapper().search(request, &monitor, None).await?;
//! while let Some(result) = results.next().await? {
//!     println!("{}", result.dn());
//! }
//! ```
//!
//! ## Crate Organization
//!
//! - [`ids`] - Connection identifiers
//! - [`types`] - Connection option enums and the connection state
//! - [`error`] - Error types with transient/permanent classification
//! - [`config`] - Connection parameters and core settings
//! - [`url`] - LDAP URLs
//! - [`operation`] - Entries, modifications, controls and search parameters
//! - [`referral`] - Referrals and referral bookkeeping
//! - [`handlers`] - Authentication, certificate trust and referral resolution
//! - [`monitor`] - Cancellation and error reporting
//! - [`transport`] - Transport traits
//! - [`connection`] - Connections and the connection manager
//! - [`wrapper`] - The connection wrapper
//! - [`enumeration`] - Search result enumeration
//! - [`logging`] - LDIF audit logs

pub mod config;
pub mod connection;
pub mod enumeration;
pub mod error;
pub mod handlers;
pub mod ids;
pub mod logging;
pub mod monitor;
pub mod operation;
pub mod referral;
pub mod transport;
pub mod types;
pub mod url;
pub mod wrapper;

/// Prelude module for convenient imports.
///
/// ```
/// use studio_connection::prelude::*;
/// ```
pub mod prelude {
    // IDs
    pub use crate::ids::ConnectionId;

    // Types and enums
    pub use crate::types::{
        AliasDereferencingMethod, AuthenticationMethod, ConnectionState, EncryptionMethod,
        ReferralHandlingMethod, SearchScope,
    };

    // Error handling
    pub use crate::error::{AuthenticationError, ConnectionError, ConnectionResult};

    // Configuration
    pub use crate::config::{
        ConnectionCoreSettings, ConnectionParameter, ModificationLogSettings, SearchLogSettings,
    };

    // Operations
    pub use crate::operation::{
        Attribute, AttributeValue, Control, Entry, Modification, ModificationOperation,
        OperationResult, SearchParameter, SearchResponse,
    };
    pub use crate::url::LdapUrl;

    // Referrals
    pub use crate::referral::{Referral, ReferralUrlAndDn, ReferralsInfo, SharedReferralsInfo};

    // Handlers
    pub use crate::handlers::{
        AuthHandler, CertificateTrust, Credentials, ReferralConnectionResolver,
        SameCredentialsReferralResolver, StoredCredentialsAuthHandler, TrustHandler, TrustLevel,
    };

    // Connections
    pub use crate::connection::{Connection, ConnectionManager, ConnectionManagerBuilder};
    pub use crate::enumeration::{StudioSearchEnumeration, StudioSearchResult};
    pub use crate::monitor::StudioProgressMonitor;
    pub use crate::wrapper::{ConnectionWrapper, DirectoryConnectionWrapper};

    // Transport
    pub use crate::transport::{
        DirectorySession, SearchCursor, SessionFactory, SessionRequest, VecSearchCursor,
    };

    // Logging
    pub use crate::logging::{LdapLogger, LdifModificationLogger, LdifSearchLogger};
}

// Re-export async_trait for transport implementors
pub use async_trait::async_trait;
