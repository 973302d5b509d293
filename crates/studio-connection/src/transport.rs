//! Transport seam
//!
//! The wire protocol is provided by implementations of these traits; the
//! connection wrapper only sees sessions and cursors.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ConnectionParameter;
use crate::error::ConnectionResult;
use crate::handlers::{CertificateTrust, Credentials};
use crate::operation::{
    Control, Entry, Modification, OperationResult, SearchParameter, SearchResponse,
};
use crate::types::{AuthenticationMethod, EncryptionMethod};

/// Everything a transport needs to open a session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub host: String,
    pub port: u16,
    pub encryption_method: EncryptionMethod,
    pub timeout: Duration,
    pub validate_certificates: bool,
    pub trust: Arc<CertificateTrust>,
}

impl SessionRequest {
    /// Build the request for a connection.
    pub fn for_parameter(
        parameter: &ConnectionParameter,
        validate_certificates: bool,
        trust: Arc<CertificateTrust>,
    ) -> Self {
        Self {
            host: parameter.host.clone(),
            port: parameter.port,
            encryption_method: parameter.encryption_method,
            timeout: parameter.timeout(),
            validate_certificates,
            trust,
        }
    }

    /// URL of the server.
    pub fn url(&self) -> String {
        format!(
            "{}://{}:{}",
            self.encryption_method.scheme(),
            self.host,
            self.port
        )
    }
}

/// Opens sessions to directory servers.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open a transport, performing TLS negotiation as requested.
    async fn open(&self, request: &SessionRequest) -> ConnectionResult<Box<dyn DirectorySession>>;
}

/// An open session to one server.
///
/// Non-success results are returned as [`OperationResult`]s; `Err` is for
/// transport failures.
#[async_trait]
pub trait DirectorySession: Send + Sync {
    /// Authenticate the session.
    async fn bind(
        &mut self,
        method: AuthenticationMethod,
        credentials: &Credentials,
    ) -> ConnectionResult<()>;

    /// Start a search. Controls are taken from `request` as given.
    async fn search(&mut self, request: &SearchParameter)
        -> ConnectionResult<Box<dyn SearchCursor>>;

    /// Modify an entry.
    async fn modify(
        &mut self,
        dn: &str,
        modifications: &[Modification],
        controls: &[Control],
    ) -> ConnectionResult<OperationResult>;

    /// Add an entry.
    async fn add(&mut self, entry: &Entry, controls: &[Control])
        -> ConnectionResult<OperationResult>;

    /// Delete an entry.
    async fn delete(&mut self, dn: &str, controls: &[Control]) -> ConnectionResult<OperationResult>;

    /// Rename and/or move an entry.
    async fn modify_dn(
        &mut self,
        dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
        new_superior: Option<&str>,
        controls: &[Control],
    ) -> ConnectionResult<OperationResult>;

    /// Unbind and release the transport.
    async fn close(&mut self) -> ConnectionResult<()>;
}

/// Streams the responses of one search.
#[async_trait]
pub trait SearchCursor: Send {
    /// The next response; the last one is [`SearchResponse::Done`], then `None`.
    async fn next(&mut self) -> ConnectionResult<Option<SearchResponse>>;
}

/// A cursor over a fixed list of responses.
#[derive(Debug, Default)]
pub struct VecSearchCursor {
    responses: std::collections::VecDeque<SearchResponse>,
}

impl VecSearchCursor {
    /// Create a cursor returning `responses` in order.
    pub fn new(responses: Vec<SearchResponse>) -> Self {
        Self {
            responses: responses.into(),
        }
    }
}

#[async_trait]
impl SearchCursor for VecSearchCursor {
    async fn next(&mut self) -> ConnectionResult<Option<SearchResponse>> {
        Ok(self.responses.pop_front())
    }
}
