//! ldap3 sessions.

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, SearchOptions};
use studio_connection::error::{AuthenticationError, ConnectionError, ConnectionResult};
use studio_connection::handlers::Credentials;
use studio_connection::operation::{
    Control, Entry, Modification, OperationResult, SearchParameter,
};
use studio_connection::transport::{DirectorySession, SearchCursor, SessionFactory, SessionRequest};
use studio_connection::types::{AuthenticationMethod, EncryptionMethod};
use tracing::{debug, info, instrument, warn};

use crate::convert;
use crate::cursor::Ldap3SearchCursor;

/// Opens ldap3 sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ldap3SessionFactory;

impl Ldap3SessionFactory {
    /// Create a factory.
    pub fn new() -> Self {
        Self
    }
}

async fn connect(
    request: &SessionRequest,
    url: &str,
    no_tls_verify: bool,
) -> Result<Ldap, LdapError> {
    let settings = LdapConnSettings::new()
        .set_conn_timeout(request.timeout)
        .set_starttls(request.encryption_method == EncryptionMethod::StartTls)
        .set_no_tls_verify(no_tls_verify);

    let (conn, ldap) = LdapConnAsync::with_settings(settings, url).await?;

    tokio::spawn(async move {
        if let Err(e) = conn.drive().await {
            warn!(error = %e, "LDAP connection driver error");
        }
    });

    Ok(ldap)
}

#[async_trait]
impl SessionFactory for Ldap3SessionFactory {
    #[instrument(skip(self, request), fields(url = %request.url()))]
    async fn open(&self, request: &SessionRequest) -> ConnectionResult<Box<dyn DirectorySession>> {
        let url = request.url();
        let uses_tls = request.encryption_method != EncryptionMethod::None;
        let skip_verify =
            uses_tls && (!request.validate_certificates || request.trust.is_trusted(&request.host));

        debug!(url = %url, skip_verify, "Connecting to LDAP server");

        let ldap = match connect(request, &url, skip_verify).await {
            Ok(ldap) => ldap,
            Err(e @ LdapError::NativeTLS { .. }) if uses_tls && !skip_verify => {
                let failure = e.to_string();
                debug!(host = %request.host, failure = %failure, "Certificate validation failed");
                request.trust.check(&request.host, &failure)?;
                connect(request, &url, true).await.map_err(|e| {
                    ConnectionError::connect_failed_with_source(
                        format!("Failed to connect to LDAP server at {url}"),
                        e,
                    )
                })?
            }
            Err(e) => {
                return Err(ConnectionError::connect_failed_with_source(
                    format!("Failed to connect to LDAP server at {url}"),
                    e,
                ))
            }
        };

        info!(host = %request.host, port = request.port, "LDAP connection established");
        Ok(Box::new(Ldap3Session { ldap }))
    }
}

/// A session on one ldap3 connection.
pub struct Ldap3Session {
    ldap: Ldap,
}

impl Ldap3Session {
    fn with_controls(&mut self, controls: &[Control]) -> &mut Ldap {
        if controls.is_empty() {
            &mut self.ldap
        } else {
            self.ldap.with_controls(convert::raw_controls(controls))
        }
    }
}

impl std::fmt::Debug for Ldap3Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ldap3Session").finish_non_exhaustive()
    }
}

#[async_trait]
impl DirectorySession for Ldap3Session {
    async fn bind(
        &mut self,
        method: AuthenticationMethod,
        credentials: &Credentials,
    ) -> ConnectionResult<()> {
        let (principal, password) = match method {
            AuthenticationMethod::None => ("", ""),
            AuthenticationMethod::Simple => (
                credentials.bind_principal.as_deref().unwrap_or(""),
                credentials.bind_password.as_deref().unwrap_or(""),
            ),
            sasl => {
                return Err(AuthenticationError::UnsupportedMethod {
                    method: sasl.as_str().to_string(),
                }
                .into())
            }
        };

        debug!(bind_dn = %principal, "Performing LDAP bind");
        let result = self
            .ldap
            .simple_bind(principal, password)
            .await
            .map_err(convert::operation_error)?;

        if result.rc != 0 {
            return Err(ConnectionError::from_result_code(result.rc, result.text));
        }
        Ok(())
    }

    async fn search(
        &mut self,
        request: &SearchParameter,
    ) -> ConnectionResult<Box<dyn SearchCursor>> {
        let options = SearchOptions::new()
            .deref(convert::deref_aliases(request.alias_dereferencing))
            .sizelimit(request.count_limit)
            .timelimit(request.time_limit);
        let attributes = convert::returning_attributes(request.returning_attributes.as_deref());

        let stream = self
            .with_controls(&request.controls)
            .with_search_options(options)
            .streaming_search(
                &request.base,
                convert::scope(request.scope),
                &request.filter,
                attributes,
            )
            .await
            .map_err(convert::operation_error)?;

        Ok(Box::new(Ldap3SearchCursor::new(stream)))
    }

    async fn modify(
        &mut self,
        dn: &str,
        modifications: &[Modification],
        controls: &[Control],
    ) -> ConnectionResult<OperationResult> {
        let result = self
            .with_controls(controls)
            .modify(dn, convert::modifications(modifications))
            .await
            .map_err(convert::operation_error)?;
        Ok(convert::operation_result(result))
    }

    async fn add(&mut self, entry: &Entry, controls: &[Control]) -> ConnectionResult<OperationResult> {
        let result = self
            .with_controls(controls)
            .add(&entry.dn, convert::add_attributes(entry))
            .await
            .map_err(convert::operation_error)?;
        Ok(convert::operation_result(result))
    }

    async fn delete(&mut self, dn: &str, controls: &[Control]) -> ConnectionResult<OperationResult> {
        let result = self
            .with_controls(controls)
            .delete(dn)
            .await
            .map_err(convert::operation_error)?;
        Ok(convert::operation_result(result))
    }

    async fn modify_dn(
        &mut self,
        dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
        new_superior: Option<&str>,
        controls: &[Control],
    ) -> ConnectionResult<OperationResult> {
        let result = self
            .with_controls(controls)
            .modifydn(dn, new_rdn, delete_old_rdn, new_superior)
            .await
            .map_err(convert::operation_error)?;
        Ok(convert::operation_result(result))
    }

    async fn close(&mut self) -> ConnectionResult<()> {
        self.ldap
            .unbind()
            .await
            .map_err(|e| ConnectionError::communication_with_source("LDAP unbind failed", e))
    }
}
