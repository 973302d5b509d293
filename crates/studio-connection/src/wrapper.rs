//! Connection wrapper
//!
//! Runs every directory operation as a monitored job: the job races the
//! caller's cancellation, transient failures trigger one transparent
//! reconnect and retry, and every operation is reported to the audit
//! loggers.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Weak};
use tracing::{debug, info, instrument, warn};

use crate::connection::{Connection, ConnectionManager};
use crate::enumeration::{SearchContext, StudioSearchEnumeration};
use crate::error::{AuthenticationError, ConnectionError, ConnectionResult, RC_REFERRAL};
use crate::handlers::Credentials;
use crate::logging::LdapLogger;
use crate::monitor::StudioProgressMonitor;
use crate::operation::{
    split_rdn, Control, Entry, Modification, OperationResult, SearchParameter, SearchResponse,
};
use crate::referral::{Referral, ReferralsInfo, SharedReferralsInfo};
use crate::transport::{DirectorySession, SessionRequest};
use crate::types::{AuthenticationMethod, ConnectionState};
use crate::url::LdapUrl;

type SessionSlot = Arc<tokio::sync::Mutex<Option<Box<dyn DirectorySession>>>>;

/// Directory operations of one connection.
#[async_trait]
pub trait ConnectionWrapper: Send + Sync {
    /// Open the transport. Does nothing when already connected.
    async fn connect(&self, monitor: &StudioProgressMonitor) -> ConnectionResult<()>;

    /// Authenticate, connecting first if needed.
    async fn bind(&self, monitor: &StudioProgressMonitor) -> ConnectionResult<()>;

    /// Unbind and release the transport.
    async fn unbind(&self);

    /// Release the transport.
    async fn disconnect(&self);

    /// Whether a transport is open.
    fn is_connected(&self) -> bool;

    /// Current state.
    fn state(&self) -> ConnectionState;

    /// Attribute names whose values are returned as binary.
    fn set_binary_attributes(&self, attributes: &[String]);

    /// Start a search.
    ///
    /// `referrals_info` is `None` for a top-level search; nested hops pass
    /// the bookkeeping of the operation they belong to. Only a top-level
    /// search reports its failure to the monitor.
    async fn search(
        &self,
        request: SearchParameter,
        monitor: &StudioProgressMonitor,
        referrals_info: Option<SharedReferralsInfo>,
    ) -> ConnectionResult<StudioSearchEnumeration>;

    /// Modify an entry.
    async fn modify_entry(
        &self,
        dn: &str,
        modifications: &[Modification],
        controls: &[Control],
        monitor: &StudioProgressMonitor,
        referrals_info: Option<SharedReferralsInfo>,
    ) -> ConnectionResult<()>;

    /// Rename or move an entry.
    async fn rename_entry(
        &self,
        old_dn: &str,
        new_dn: &str,
        delete_old_rdn: bool,
        controls: &[Control],
        monitor: &StudioProgressMonitor,
        referrals_info: Option<SharedReferralsInfo>,
    ) -> ConnectionResult<()>;

    /// Add an entry.
    async fn create_entry(
        &self,
        entry: &Entry,
        controls: &[Control],
        monitor: &StudioProgressMonitor,
        referrals_info: Option<SharedReferralsInfo>,
    ) -> ConnectionResult<()>;

    /// Delete an entry.
    async fn delete_entry(
        &self,
        dn: &str,
        controls: &[Control],
        monitor: &StudioProgressMonitor,
        referrals_info: Option<SharedReferralsInfo>,
    ) -> ConnectionResult<()>;
}

/// Run `job` on a worker task racing the monitor's cancellation.
///
/// On cancellation the worker is aborted and `Cancelled` is returned. A
/// job that completes after cancellation was requested also yields
/// `Cancelled`.
pub(crate) async fn run_monitored<T, Fut>(
    monitor: &StudioProgressMonitor,
    job: Fut,
) -> ConnectionResult<T>
where
    T: Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
{
    if monitor.is_cancelled() {
        return Err(ConnectionError::Cancelled);
    }

    let mut handle = tokio::spawn(job);
    let joined = tokio::select! {
        joined = &mut handle => Some(joined),
        () = monitor.cancelled() => None,
    };

    match joined {
        Some(Ok(_)) if monitor.is_cancelled() => Err(ConnectionError::Cancelled),
        Some(Ok(value)) => Ok(value),
        Some(Err(e)) if e.is_cancelled() => Err(ConnectionError::Cancelled),
        Some(Err(e)) => Err(ConnectionError::Internal {
            message: "operation worker failed".to_string(),
            source: Some(Box::new(e)),
        }),
        None => {
            handle.abort();
            let _ = handle.await;
            Err(ConnectionError::Cancelled)
        }
    }
}

/// Result of a mutating request before referral chasing.
enum UpdateOutcome {
    Done,
    Referred(Referral),
}

fn check_update_result(result: OperationResult) -> ConnectionResult<OperationResult> {
    if result.is_success() || result.is_referral() {
        Ok(result)
    } else {
        Err(ConnectionError::from_result_code(result.code, result.message))
    }
}

/// [`ConnectionWrapper`] on top of a [`DirectorySession`] transport.
pub struct DirectoryConnectionWrapper {
    connection: Weak<Connection>,
    manager: Weak<ConnectionManager>,
    session: SessionSlot,
    state: Mutex<ConnectionState>,
    binary_attributes: RwLock<HashSet<String>>,
}

impl DirectoryConnectionWrapper {
    pub(crate) fn new(connection: Weak<Connection>, manager: Weak<ConnectionManager>) -> Self {
        Self {
            connection,
            manager,
            session: Arc::new(tokio::sync::Mutex::new(None)),
            state: Mutex::new(ConnectionState::Disconnected),
            binary_attributes: RwLock::new(HashSet::new()),
        }
    }

    fn connection(&self) -> ConnectionResult<Arc<Connection>> {
        self.connection
            .upgrade()
            .ok_or_else(|| ConnectionError::internal("connection no longer exists"))
    }

    fn manager(&self) -> ConnectionResult<Arc<ConnectionManager>> {
        self.manager
            .upgrade()
            .ok_or_else(|| ConnectionError::internal("connection manager no longer exists"))
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    /// Run a job, closing the transport if it is cancelled.
    async fn run_and_monitor<T, Fut>(
        &self,
        monitor: &StudioProgressMonitor,
        job: Fut,
    ) -> ConnectionResult<T>
    where
        T: Send + 'static,
        Fut: Future<Output = ConnectionResult<T>> + Send + 'static,
    {
        match run_monitored(monitor, job).await {
            Ok(result) => result,
            Err(ConnectionError::Cancelled) => {
                debug!("Operation cancelled, closing transport");
                self.close_session().await;
                Err(ConnectionError::Cancelled)
            }
            Err(e) => Err(e),
        }
    }

    async fn close_session(&self) {
        let session = self.session.lock().await.take();
        if let Some(mut session) = session {
            if let Err(e) = session.close().await {
                debug!(error = %e, "Error closing directory session");
            }
        }
        self.set_state(ConnectionState::Disconnected);
    }

    async fn open_session(&self, monitor: &StudioProgressMonitor) -> ConnectionResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        let connection = self.connection()?;
        let manager = self.manager()?;
        let request = SessionRequest::for_parameter(
            connection.parameter(),
            manager.settings().validate_certificates,
            manager.certificate_trust(),
        );
        let factory = manager.session_factory();

        debug!(url = %request.url(), "Connecting to directory server");
        let session = self
            .run_and_monitor(monitor, async move { factory.open(&request).await })
            .await?;

        *self.session.lock().await = Some(session);
        self.set_state(ConnectionState::Connected);
        info!(
            connection = %connection.id(),
            host = %connection.host(),
            port = connection.port(),
            "Connected to directory server"
        );
        Ok(())
    }

    async fn authenticate(&self, monitor: &StudioProgressMonitor) -> ConnectionResult<()> {
        let connection = self.connection()?;
        let manager = self.manager()?;
        let parameter = connection.parameter();
        let method = parameter.auth_method;

        let credentials = if method == AuthenticationMethod::None {
            Credentials::anonymous()
        } else {
            let handler = manager
                .auth_handler()
                .ok_or(AuthenticationError::NoAuthHandler)?;
            match handler.credentials(parameter).await {
                None => {
                    debug!(connection = %connection.id(), "Credential request declined");
                    monitor.set_cancelled();
                    return Err(AuthenticationError::NoCredentials {
                        connection: connection.name().to_string(),
                    }
                    .into());
                }
                Some(credentials) if !credentials.is_complete() => {
                    return Err(AuthenticationError::NoCredentials {
                        connection: connection.name().to_string(),
                    }
                    .into());
                }
                Some(credentials) => credentials,
            }
        };

        debug!(
            principal = ?credentials.bind_principal,
            method = method.as_str(),
            "Binding to directory server"
        );
        let session = Arc::clone(&self.session);
        self.run_and_monitor(monitor, async move {
            let mut slot = session.lock().await;
            let session = slot.as_mut().ok_or(ConnectionError::NotConnected)?;
            session.bind(method, &credentials).await
        })
        .await?;

        self.set_state(ConnectionState::Bound);
        Ok(())
    }

    async fn ensure_bound(&self, monitor: &StudioProgressMonitor) -> ConnectionResult<()> {
        if self.state() == ConnectionState::Bound {
            return Ok(());
        }
        self.open_session(monitor).await?;
        self.authenticate(monitor).await
    }

    /// Run a job against a bound session, reconnecting and retrying once
    /// after a transient failure.
    async fn check_connection_and_run<T, F, Fut>(
        &self,
        monitor: &StudioProgressMonitor,
        job: F,
    ) -> ConnectionResult<T>
    where
        T: Send + 'static,
        F: Fn(SessionSlot) -> Fut + Send + Sync,
        Fut: Future<Output = ConnectionResult<T>> + Send + 'static,
    {
        self.ensure_bound(monitor).await?;

        match self
            .run_and_monitor(monitor, job(Arc::clone(&self.session)))
            .await
        {
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Transient failure, reconnecting and retrying once");
                self.close_session().await;
                self.ensure_bound(monitor).await?;
                self.run_and_monitor(monitor, job(Arc::clone(&self.session)))
                    .await
            }
            other => other,
        }
    }

    fn reject_read_only(
        &self,
        connection: &Connection,
        monitor: &StudioProgressMonitor,
    ) -> ConnectionResult<()> {
        if connection.is_read_only() {
            let error = ConnectionError::ReadOnly {
                connection: connection.name().to_string(),
            };
            debug!(connection = %connection.id(), "Rejected update on read-only connection");
            monitor.report_error(&error);
            return Err(error);
        }
        Ok(())
    }

    /// Run a mutating request and hand every logger the outcome.
    ///
    /// A referral result is logged as an error and returned for chasing;
    /// other errors are reported to the monitor.
    async fn perform_update<F, Fut, L>(
        &self,
        monitor: &StudioProgressMonitor,
        job: F,
        log: L,
    ) -> ConnectionResult<UpdateOutcome>
    where
        F: Fn(SessionSlot) -> Fut + Send + Sync,
        Fut: Future<Output = ConnectionResult<OperationResult>> + Send + 'static,
        L: Fn(&dyn LdapLogger, &Connection, Option<&ConnectionError>) + Send + Sync,
    {
        let connection = self.connection()?;
        let manager = self.manager()?;

        let outcome = match self.check_connection_and_run(monitor, job).await {
            Ok(result) if result.is_referral() => {
                Referral::from_strings(result.referrals.as_slice()).map(UpdateOutcome::Referred)
            }
            Ok(_) => Ok(UpdateOutcome::Done),
            Err(e) => Err(e),
        };

        let referral_error = match &outcome {
            Ok(UpdateOutcome::Referred(referral)) => Some(ConnectionError::operation_failed(
                RC_REFERRAL,
                format!("referral {referral}"),
            )),
            _ => None,
        };
        let logged_error = referral_error.as_ref().or(outcome.as_ref().err());
        for logger in manager.loggers() {
            log(logger.as_ref(), &connection, logged_error);
        }

        if let Err(e) = &outcome {
            monitor.report_error(e);
        }
        outcome
    }

    /// Queue a referral returned by a mutating request and resolve the
    /// connection to follow it with.
    async fn follow_update_referral(
        &self,
        referral: Referral,
        referrals_info: Option<SharedReferralsInfo>,
        monitor: &StudioProgressMonitor,
    ) -> ConnectionResult<(Arc<Connection>, LdapUrl, SharedReferralsInfo)> {
        let connection = self.connection()?;
        let manager = self.manager()?;
        let info = referrals_info.unwrap_or_else(ReferralsInfo::shared);

        let next = {
            let mut guard = info.lock();
            guard
                .add_referral(referral)
                .map(|()| guard.next_referral())
        };
        let next = match next {
            Ok(Some(next)) => next,
            Ok(None) => return Err(ConnectionError::internal("referral queue is empty")),
            Err(e) => {
                warn!(error = %e, "Referral loop detected");
                monitor.report_error(&e);
                return Err(e);
            }
        };

        let url = next.first_url().clone();
        match manager.referral_connection(&connection, &next).await {
            Some(target) => {
                debug!(
                    url = %url,
                    target = %target.id(),
                    "Following referral"
                );
                Ok((target, url, info))
            }
            None => {
                debug!(referral = %next, "Referral not followed, cancelling operation");
                monitor.set_cancelled();
                Err(ConnectionError::Cancelled)
            }
        }
    }
}

#[async_trait]
impl ConnectionWrapper for DirectoryConnectionWrapper {
    #[instrument(skip_all)]
    async fn connect(&self, monitor: &StudioProgressMonitor) -> ConnectionResult<()> {
        let result = self.open_session(monitor).await;
        if let Err(e) = &result {
            warn!(error = %e, "Connect failed");
            monitor.report_error(e);
        }
        result
    }

    #[instrument(skip_all)]
    async fn bind(&self, monitor: &StudioProgressMonitor) -> ConnectionResult<()> {
        let result = match self.open_session(monitor).await {
            Ok(()) => self.authenticate(monitor).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!(error = %e, "Bind failed");
            monitor.report_error(e);
        }
        result
    }

    async fn unbind(&self) {
        self.close_session().await;
    }

    async fn disconnect(&self) {
        if self.is_connected() {
            debug!("Disconnecting from directory server");
        }
        self.close_session().await;
    }

    fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_binary_attributes(&self, attributes: &[String]) {
        *self.binary_attributes.write() = attributes.iter().map(|a| a.to_lowercase()).collect();
    }

    #[instrument(skip(self, monitor, referrals_info), fields(base = %request.base, filter = %request.filter))]
    async fn search(
        &self,
        request: SearchParameter,
        monitor: &StudioProgressMonitor,
        referrals_info: Option<SharedReferralsInfo>,
    ) -> ConnectionResult<StudioSearchEnumeration> {
        let connection = self.connection()?;
        let manager = self.manager()?;
        let request_num = manager.next_search_request_num();

        let mut wire_request = request.clone();
        wire_request.controls = request.effective_controls();

        let outcome = self
            .check_connection_and_run(monitor, move |slot| {
                let request = wire_request.clone();
                async move {
                    let mut slot = slot.lock().await;
                    let session = slot.as_mut().ok_or(ConnectionError::NotConnected)?;
                    let mut cursor = session.search(&request).await?;
                    let first = cursor.next().await?;
                    if let Some(SearchResponse::Done(result)) = &first {
                        if !result.is_referral() && !result.is_search_done_ok() {
                            let error = ConnectionError::from_result_code(
                                result.code,
                                result.message.clone(),
                            );
                            if error.is_transient() {
                                return Err(error);
                            }
                        }
                    }
                    Ok((cursor, first))
                }
            })
            .await;

        for logger in manager.loggers() {
            logger.log_search_request(&connection, &request, request_num, outcome.as_ref().err());
        }

        match outcome {
            Ok((cursor, first_response)) => Ok(StudioSearchEnumeration::new(SearchContext {
                connection,
                manager,
                cursor,
                first_response,
                request,
                referrals_info: referrals_info.unwrap_or_else(ReferralsInfo::shared),
                monitor: monitor.clone(),
                request_num,
                binary_attributes: self.binary_attributes.read().clone(),
            })),
            Err(e) => {
                for logger in manager.loggers() {
                    logger.log_search_result_done(&connection, 0, request_num, Some(&e));
                }
                if referrals_info.is_none() {
                    monitor.report_error(&e);
                }
                Err(e)
            }
        }
    }

    #[instrument(skip(self, modifications, controls, monitor, referrals_info))]
    async fn modify_entry(
        &self,
        dn: &str,
        modifications: &[Modification],
        controls: &[Control],
        monitor: &StudioProgressMonitor,
        referrals_info: Option<SharedReferralsInfo>,
    ) -> ConnectionResult<()> {
        let connection = self.connection()?;
        self.reject_read_only(&connection, monitor)?;

        let target_dn = dn.to_string();
        let mods = modifications.to_vec();
        let ctrls = controls.to_vec();
        let outcome = self
            .perform_update(
                monitor,
                move |slot| {
                    let (dn, mods, ctrls) = (target_dn.clone(), mods.clone(), ctrls.clone());
                    async move {
                        let mut slot = slot.lock().await;
                        let session = slot.as_mut().ok_or(ConnectionError::NotConnected)?;
                        check_update_result(session.modify(&dn, &mods, &ctrls).await?)
                    }
                },
                |logger, connection, error| {
                    logger.log_changetype_modify(connection, dn, modifications, controls, error);
                },
            )
            .await?;

        match outcome {
            UpdateOutcome::Done => Ok(()),
            UpdateOutcome::Referred(referral) => {
                let (target, url, info) = self
                    .follow_update_referral(referral, referrals_info, monitor)
                    .await?;
                let dn = if url.has_dn() { url.dn.as_str() } else { dn };
                target
                    .wrapper()
                    .modify_entry(dn, modifications, controls, monitor, Some(info))
                    .await
            }
        }
    }

    #[instrument(skip(self, controls, monitor, referrals_info))]
    async fn rename_entry(
        &self,
        old_dn: &str,
        new_dn: &str,
        delete_old_rdn: bool,
        controls: &[Control],
        monitor: &StudioProgressMonitor,
        referrals_info: Option<SharedReferralsInfo>,
    ) -> ConnectionResult<()> {
        let connection = self.connection()?;
        self.reject_read_only(&connection, monitor)?;

        let (new_rdn, new_parent) = split_rdn(new_dn);
        let (_, old_parent) = split_rdn(old_dn);
        let new_superior = (!new_parent.eq_ignore_ascii_case(old_parent))
            .then(|| new_parent.to_string());
        let source_dn = old_dn.to_string();
        let new_rdn = new_rdn.to_string();
        let ctrls = controls.to_vec();

        let outcome = self
            .perform_update(
                monitor,
                move |slot| {
                    let (dn, rdn, superior, ctrls) = (
                        source_dn.clone(),
                        new_rdn.clone(),
                        new_superior.clone(),
                        ctrls.clone(),
                    );
                    async move {
                        let mut slot = slot.lock().await;
                        let session = slot.as_mut().ok_or(ConnectionError::NotConnected)?;
                        check_update_result(
                            session
                                .modify_dn(&dn, &rdn, delete_old_rdn, superior.as_deref(), &ctrls)
                                .await?,
                        )
                    }
                },
                |logger, connection, error| {
                    logger.log_changetype_mod_dn(
                        connection,
                        old_dn,
                        new_dn,
                        delete_old_rdn,
                        controls,
                        error,
                    );
                },
            )
            .await?;

        match outcome {
            UpdateOutcome::Done => Ok(()),
            UpdateOutcome::Referred(referral) => {
                let (target, _, info) = self
                    .follow_update_referral(referral, referrals_info, monitor)
                    .await?;
                target
                    .wrapper()
                    .rename_entry(old_dn, new_dn, delete_old_rdn, controls, monitor, Some(info))
                    .await
            }
        }
    }

    #[instrument(skip(self, entry, controls, monitor, referrals_info), fields(dn = %entry.dn))]
    async fn create_entry(
        &self,
        entry: &Entry,
        controls: &[Control],
        monitor: &StudioProgressMonitor,
        referrals_info: Option<SharedReferralsInfo>,
    ) -> ConnectionResult<()> {
        let connection = self.connection()?;
        self.reject_read_only(&connection, monitor)?;

        let new_entry = entry.clone();
        let ctrls = controls.to_vec();
        let outcome = self
            .perform_update(
                monitor,
                move |slot| {
                    let (entry, ctrls) = (new_entry.clone(), ctrls.clone());
                    async move {
                        let mut slot = slot.lock().await;
                        let session = slot.as_mut().ok_or(ConnectionError::NotConnected)?;
                        check_update_result(session.add(&entry, &ctrls).await?)
                    }
                },
                |logger, connection, error| {
                    logger.log_changetype_add(connection, entry, controls, error);
                },
            )
            .await?;

        match outcome {
            UpdateOutcome::Done => Ok(()),
            UpdateOutcome::Referred(referral) => {
                let (target, url, info) = self
                    .follow_update_referral(referral, referrals_info, monitor)
                    .await?;
                let mut referred = entry.clone();
                if url.has_dn() {
                    referred.dn = url.dn.clone();
                }
                target
                    .wrapper()
                    .create_entry(&referred, controls, monitor, Some(info))
                    .await
            }
        }
    }

    #[instrument(skip(self, controls, monitor, referrals_info))]
    async fn delete_entry(
        &self,
        dn: &str,
        controls: &[Control],
        monitor: &StudioProgressMonitor,
        referrals_info: Option<SharedReferralsInfo>,
    ) -> ConnectionResult<()> {
        let connection = self.connection()?;
        self.reject_read_only(&connection, monitor)?;

        let target_dn = dn.to_string();
        let ctrls = controls.to_vec();
        let outcome = self
            .perform_update(
                monitor,
                move |slot| {
                    let (dn, ctrls) = (target_dn.clone(), ctrls.clone());
                    async move {
                        let mut slot = slot.lock().await;
                        let session = slot.as_mut().ok_or(ConnectionError::NotConnected)?;
                        check_update_result(session.delete(&dn, &ctrls).await?)
                    }
                },
                |logger, connection, error| {
                    logger.log_changetype_delete(connection, dn, controls, error);
                },
            )
            .await?;

        match outcome {
            UpdateOutcome::Done => Ok(()),
            UpdateOutcome::Referred(referral) => {
                let (target, url, info) = self
                    .follow_update_referral(referral, referrals_info, monitor)
                    .await?;
                let dn = if url.has_dn() { url.dn.as_str() } else { dn };
                target
                    .wrapper()
                    .delete_entry(dn, controls, monitor, Some(info))
                    .await
            }
        }
    }
}
