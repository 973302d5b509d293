//! # LDAP Transport
//!
//! ldap3 implementation of the directory connection core's transport.
//!
//! ## Features
//!
//! - LDAP v3 over plain TCP, LDAPS and StartTLS
//! - Certificate trust decisions delegated to the connection core
//! - Anonymous and simple binds
//! - Streaming searches with continuation references
//! - Request and response controls
//!
//! ## Example
//!
//! ```ignore
//! use studio_connection::prelude::*;
//! use studio_connection_ldap::Ldap3SessionFactory;
//!
//! let manager = ConnectionManager::builder(Arc::new(Ldap3SessionFactory::new()))
//!     .with_auth_handler(Arc::new(StoredCredentialsAuthHandler))
//!     .build()?;
//! ```

mod convert;
pub mod cursor;
pub mod session;

// Re-exports
pub use cursor::Ldap3SearchCursor;
pub use session::{Ldap3Session, Ldap3SessionFactory};
