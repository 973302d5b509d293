//! Connections and the connection manager
//!
//! The [`ConnectionManager`] is the explicit context owning every
//! [`Connection`], the transport, the collaborator handlers, the audit
//! loggers and the search request counter.

use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::config::{ConnectionCoreSettings, ConnectionParameter};
use crate::error::{ConnectionError, ConnectionResult};
use crate::handlers::{AuthHandler, CertificateTrust, ReferralConnectionResolver, TrustHandler};
use crate::ids::ConnectionId;
use crate::logging::modification::MODIFICATION_LOG_KIND;
use crate::logging::search::SEARCH_LOG_KIND;
use crate::logging::{log_file_pattern, LdapLogger, LdifModificationLogger, LdifSearchLogger};
use crate::referral::Referral;
use crate::transport::SessionFactory;
use crate::wrapper::{ConnectionWrapper, DirectoryConnectionWrapper};

/// A configured directory connection and its wrapper.
pub struct Connection {
    parameter: ConnectionParameter,
    wrapper: Box<dyn ConnectionWrapper>,
}

impl Connection {
    /// Connection identifier.
    pub fn id(&self) -> ConnectionId {
        self.parameter.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.parameter.name
    }

    /// Server host.
    pub fn host(&self) -> &str {
        &self.parameter.host
    }

    /// Server port.
    pub fn port(&self) -> u16 {
        self.parameter.port
    }

    /// Whether mutating operations are rejected.
    pub fn is_read_only(&self) -> bool {
        self.parameter.read_only
    }

    /// Connection parameters.
    pub fn parameter(&self) -> &ConnectionParameter {
        &self.parameter
    }

    /// The wrapper performing directory operations.
    pub fn wrapper(&self) -> &dyn ConnectionWrapper {
        self.wrapper.as_ref()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("parameter", &self.parameter)
            .field("state", &self.wrapper.state())
            .finish()
    }
}

/// Owns connections and the services their wrappers use.
pub struct ConnectionManager {
    self_ref: Weak<ConnectionManager>,
    settings: RwLock<ConnectionCoreSettings>,
    session_factory: Arc<dyn SessionFactory>,
    auth_handler: Option<Arc<dyn AuthHandler>>,
    referral_resolver: Option<Arc<dyn ReferralConnectionResolver>>,
    certificate_trust: Arc<CertificateTrust>,
    connections: RwLock<Vec<Arc<Connection>>>,
    modification_logger: Arc<LdifModificationLogger>,
    search_logger: Arc<LdifSearchLogger>,
    loggers: Vec<Arc<dyn LdapLogger>>,
    search_request_counter: AtomicU64,
}

impl ConnectionManager {
    /// Start building a manager on top of a transport.
    pub fn builder(session_factory: Arc<dyn SessionFactory>) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            session_factory,
            settings: ConnectionCoreSettings::default(),
            auth_handler: None,
            trust_handler: None,
            permanent_trusted_hosts: Vec::new(),
            referral_resolver: None,
            loggers: Vec::new(),
        }
    }

    /// Current settings.
    pub fn settings(&self) -> ConnectionCoreSettings {
        self.settings.read().clone()
    }

    /// Replace the settings and reconfigure the loggers.
    pub fn update_settings(&self, settings: ConnectionCoreSettings) -> ConnectionResult<()> {
        settings.validate()?;
        settings.validate_security();
        self.modification_logger
            .apply_settings(&settings.log_directory, settings.modification_log.clone());
        self.search_logger
            .apply_settings(&settings.log_directory, settings.search_log.clone());
        *self.settings.write() = settings;
        Ok(())
    }

    /// Register a connection.
    pub fn add_connection(&self, parameter: ConnectionParameter) -> ConnectionResult<Arc<Connection>> {
        parameter.validate()?;

        let mut connections = self.connections.write();
        if connections.iter().any(|c| c.id() == parameter.id) {
            return Err(ConnectionError::InvalidConfiguration {
                message: format!("connection {} already exists", parameter.id),
            });
        }

        let manager = self.self_ref.clone();
        let connection = Arc::new_cyclic(|weak: &Weak<Connection>| Connection {
            parameter,
            wrapper: Box::new(DirectoryConnectionWrapper::new(weak.clone(), manager)),
        });
        info!(
            connection = %connection.id(),
            name = %connection.name(),
            host = %connection.host(),
            port = connection.port(),
            "Connection added"
        );
        connections.push(Arc::clone(&connection));
        Ok(connection)
    }

    /// Remove a connection, closing its transport and its audit logs.
    pub async fn remove_connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let removed = {
            let mut connections = self.connections.write();
            let idx = connections.iter().position(|c| c.id() == id)?;
            connections.remove(idx)
        };

        removed.wrapper().disconnect().await;
        for logger in &self.loggers {
            logger.dispose(&removed);
        }
        info!(connection = %id, "Connection removed");
        Some(removed)
    }

    /// Look up a connection by id.
    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().iter().find(|c| c.id() == id).cloned()
    }

    /// Look up a connection by name.
    pub fn connection_by_name(&self, name: &str) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    /// Look up a connection by host (case-insensitive) and port.
    pub fn connection_by_host_port(&self, host: &str, port: u16) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .iter()
            .find(|c| c.host().eq_ignore_ascii_case(host) && c.port() == port)
            .cloned()
    }

    /// All connections in registration order.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.read().clone()
    }

    /// The transport.
    pub fn session_factory(&self) -> Arc<dyn SessionFactory> {
        Arc::clone(&self.session_factory)
    }

    /// The credential handler, if any.
    pub fn auth_handler(&self) -> Option<Arc<dyn AuthHandler>> {
        self.auth_handler.clone()
    }

    /// The certificate trust store.
    pub fn certificate_trust(&self) -> Arc<CertificateTrust> {
        Arc::clone(&self.certificate_trust)
    }

    /// Registered loggers.
    pub fn loggers(&self) -> &[Arc<dyn LdapLogger>] {
        &self.loggers
    }

    /// The LDIF modification logger.
    pub fn modification_logger(&self) -> &Arc<LdifModificationLogger> {
        &self.modification_logger
    }

    /// The LDIF search logger.
    pub fn search_logger(&self) -> &Arc<LdifSearchLogger> {
        &self.search_logger
    }

    /// Number of the next search request, unique within this manager.
    pub fn next_search_request_num(&self) -> u64 {
        self.search_request_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// File name pattern of a connection's modification log.
    pub fn modification_log_file_pattern(&self, connection: &Connection) -> String {
        log_file_pattern(
            &self.settings.read().log_directory,
            connection.id(),
            MODIFICATION_LOG_KIND,
        )
    }

    /// File name pattern of a connection's search log.
    pub fn search_log_file_pattern(&self, connection: &Connection) -> String {
        log_file_pattern(
            &self.settings.read().log_directory,
            connection.id(),
            SEARCH_LOG_KIND,
        )
    }

    /// Existing modification log files of a connection, newest first.
    pub fn modification_log_files(&self, connection: &Connection) -> Vec<PathBuf> {
        self.modification_logger.files(connection)
    }

    /// Existing search log files of a connection, newest first.
    pub fn search_log_files(&self, connection: &Connection) -> Vec<PathBuf> {
        self.search_logger.files(connection)
    }

    /// Ask the referral resolver for the connection to follow `referral` with.
    pub async fn referral_connection(
        &self,
        origin: &Arc<Connection>,
        referral: &Referral,
    ) -> Option<Arc<Connection>> {
        let resolver = self.referral_resolver.as_ref()?;
        let manager = self.self_ref.upgrade()?;
        let target = resolver.resolve(&manager, origin, referral).await;
        debug!(
            referral = %referral,
            resolved = target.is_some(),
            "Resolved referral connection"
        );
        target
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("settings", &*self.settings.read())
            .field("connections", &self.connections.read().len())
            .field("has_auth_handler", &self.auth_handler.is_some())
            .field("has_referral_resolver", &self.referral_resolver.is_some())
            .field("loggers", &self.loggers.len())
            .finish()
    }
}

/// Builder for [`ConnectionManager`].
pub struct ConnectionManagerBuilder {
    session_factory: Arc<dyn SessionFactory>,
    settings: ConnectionCoreSettings,
    auth_handler: Option<Arc<dyn AuthHandler>>,
    trust_handler: Option<Arc<dyn TrustHandler>>,
    permanent_trusted_hosts: Vec<String>,
    referral_resolver: Option<Arc<dyn ReferralConnectionResolver>>,
    loggers: Vec<Arc<dyn LdapLogger>>,
}

impl ConnectionManagerBuilder {
    /// Set the core settings.
    #[must_use]
    pub fn with_settings(mut self, settings: ConnectionCoreSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the credential handler.
    #[must_use]
    pub fn with_auth_handler(mut self, handler: Arc<dyn AuthHandler>) -> Self {
        self.auth_handler = Some(handler);
        self
    }

    /// Set the certificate trust handler.
    #[must_use]
    pub fn with_trust_handler(mut self, handler: Arc<dyn TrustHandler>) -> Self {
        self.trust_handler = Some(handler);
        self
    }

    /// Seed hosts whose certificates are trusted permanently.
    #[must_use]
    pub fn with_trusted_hosts(mut self, hosts: Vec<String>) -> Self {
        self.permanent_trusted_hosts = hosts;
        self
    }

    /// Set the referral connection resolver.
    #[must_use]
    pub fn with_referral_resolver(mut self, resolver: Arc<dyn ReferralConnectionResolver>) -> Self {
        self.referral_resolver = Some(resolver);
        self
    }

    /// Register an additional logger.
    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn LdapLogger>) -> Self {
        self.loggers.push(logger);
        self
    }

    /// Build the manager.
    pub fn build(self) -> ConnectionResult<Arc<ConnectionManager>> {
        self.settings.validate()?;
        self.settings.validate_security();

        let modification_logger = Arc::new(LdifModificationLogger::new(
            self.settings.log_directory.clone(),
            self.settings.modification_log.clone(),
        ));
        let search_logger = Arc::new(LdifSearchLogger::new(
            self.settings.log_directory.clone(),
            self.settings.search_log.clone(),
        ));

        let mut loggers: Vec<Arc<dyn LdapLogger>> = vec![
            Arc::clone(&modification_logger) as Arc<dyn LdapLogger>,
            Arc::clone(&search_logger) as Arc<dyn LdapLogger>,
        ];
        loggers.extend(self.loggers);

        let certificate_trust = Arc::new(
            CertificateTrust::new(self.trust_handler)
                .with_permanent_hosts(self.permanent_trusted_hosts),
        );

        Ok(Arc::new_cyclic(|self_ref| ConnectionManager {
            self_ref: self_ref.clone(),
            settings: RwLock::new(self.settings),
            session_factory: self.session_factory,
            auth_handler: self.auth_handler,
            referral_resolver: self.referral_resolver,
            certificate_trust,
            connections: RwLock::new(Vec::new()),
            modification_logger,
            search_logger,
            loggers,
            search_request_counter: AtomicU64::new(0),
        }))
    }
}
