//! Common test utilities for connection tests.
//!
//! These tests run against a scripted in-memory directory instead of a
//! live server.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Once};
use studio_connection::async_trait;
use studio_connection::prelude::*;

static INIT: Once = Once::new();

/// Initialize test logging once per test binary.
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init()
            .ok();
    });
}

/// Scripted behaviour of one server.
#[derive(Default)]
pub struct ServerScript {
    /// Responses per lowercase search base; unknown bases return an empty result.
    pub searches: HashMap<String, Vec<SearchResponse>>,
    /// Errors returned by the next search requests.
    pub search_faults: VecDeque<ConnectionError>,
    /// Search done results of the next search requests, sent before any entry.
    pub search_done_faults: VecDeque<OperationResult>,
    /// Cursors deliver the scripted entries and references, then never
    /// deliver another response.
    pub hang_searches: bool,
    /// Results of the next update requests; success afterwards.
    pub update_results: VecDeque<ConnectionResult<OperationResult>>,
}

/// Requests one server received.
#[derive(Debug, Default, Clone)]
pub struct ServerStats {
    pub opens: usize,
    pub binds: usize,
    pub closes: usize,
    pub searches: Vec<SearchParameter>,
    pub updates: Vec<String>,
}

#[derive(Default)]
struct DirectoryState {
    scripts: HashMap<String, ServerScript>,
    stats: HashMap<String, ServerStats>,
}

/// In-memory directory serving any number of `host:port` servers.
#[derive(Clone, Default)]
pub struct MockDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

fn server_key(host: &str, port: u16) -> String {
    format!("{}:{port}", host.to_lowercase())
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Change the script of a server.
    pub fn script(&self, host: &str, port: u16, f: impl FnOnce(&mut ServerScript)) {
        let mut state = self.state.lock();
        f(state.scripts.entry(server_key(host, port)).or_default());
    }

    /// Script the responses of a search base.
    pub fn on_search(&self, host: &str, port: u16, base: &str, responses: Vec<SearchResponse>) {
        self.script(host, port, |s| {
            s.searches.insert(base.to_lowercase(), responses);
        });
    }

    /// Requests a server received so far.
    pub fn stats(&self, host: &str, port: u16) -> ServerStats {
        self.state
            .lock()
            .stats
            .get(&server_key(host, port))
            .cloned()
            .unwrap_or_default()
    }

    /// Number of transports opened to any server.
    pub fn total_opens(&self) -> usize {
        self.state.lock().stats.values().map(|s| s.opens).sum()
    }

    fn with_server<T>(&self, key: &str, f: impl FnOnce(&mut ServerScript, &mut ServerStats) -> T) -> T {
        let mut state = self.state.lock();
        let state = &mut *state;
        let script = state.scripts.entry(key.to_string()).or_default();
        let stats = state.stats.entry(key.to_string()).or_default();
        f(script, stats)
    }
}

#[async_trait]
impl SessionFactory for MockDirectory {
    async fn open(&self, request: &SessionRequest) -> ConnectionResult<Box<dyn DirectorySession>> {
        let key = server_key(&request.host, request.port);
        self.with_server(&key, |_, stats| stats.opens += 1);
        Ok(Box::new(MockSession {
            key,
            directory: self.clone(),
        }))
    }
}

struct MockSession {
    key: String,
    directory: MockDirectory,
}

impl MockSession {
    fn update(&self, description: String) -> ConnectionResult<OperationResult> {
        self.directory.with_server(&self.key, |script, stats| {
            stats.updates.push(description);
            script
                .update_results
                .pop_front()
                .unwrap_or_else(|| Ok(OperationResult::success()))
        })
    }
}

#[async_trait]
impl DirectorySession for MockSession {
    async fn bind(
        &mut self,
        _method: AuthenticationMethod,
        _credentials: &Credentials,
    ) -> ConnectionResult<()> {
        self.directory.with_server(&self.key, |_, stats| stats.binds += 1);
        Ok(())
    }

    async fn search(
        &mut self,
        request: &SearchParameter,
    ) -> ConnectionResult<Box<dyn SearchCursor>> {
        self.directory.with_server(&self.key, |script, stats| {
            stats.searches.push(request.clone());
            if let Some(fault) = script.search_faults.pop_front() {
                return Err(fault);
            }
            if let Some(result) = script.search_done_faults.pop_front() {
                let responses = vec![SearchResponse::Done(result)];
                return Ok(Box::new(VecSearchCursor::new(responses)) as Box<dyn SearchCursor>);
            }
            let responses = script
                .searches
                .get(&request.base.to_lowercase())
                .cloned()
                .unwrap_or_else(|| vec![SearchResponse::Done(OperationResult::success())]);
            if script.hang_searches {
                let responses = responses
                    .into_iter()
                    .filter(|r| !matches!(r, SearchResponse::Done(_)))
                    .collect();
                return Ok(Box::new(HangingCursor { responses }) as Box<dyn SearchCursor>);
            }
            Ok(Box::new(VecSearchCursor::new(responses)) as Box<dyn SearchCursor>)
        })
    }

    async fn modify(
        &mut self,
        dn: &str,
        _modifications: &[Modification],
        _controls: &[Control],
    ) -> ConnectionResult<OperationResult> {
        self.update(format!("modify {dn}"))
    }

    async fn add(&mut self, entry: &Entry, _controls: &[Control]) -> ConnectionResult<OperationResult> {
        self.update(format!("add {}", entry.dn))
    }

    async fn delete(&mut self, dn: &str, _controls: &[Control]) -> ConnectionResult<OperationResult> {
        self.update(format!("delete {dn}"))
    }

    async fn modify_dn(
        &mut self,
        dn: &str,
        new_rdn: &str,
        _delete_old_rdn: bool,
        new_superior: Option<&str>,
        _controls: &[Control],
    ) -> ConnectionResult<OperationResult> {
        self.update(format!(
            "moddn {dn} {new_rdn} {}",
            new_superior.unwrap_or("-")
        ))
    }

    async fn close(&mut self) -> ConnectionResult<()> {
        self.directory.with_server(&self.key, |_, stats| stats.closes += 1);
        Ok(())
    }
}

/// A cursor whose search result done never arrives.
struct HangingCursor {
    responses: VecDeque<SearchResponse>,
}

#[async_trait]
impl SearchCursor for HangingCursor {
    async fn next(&mut self) -> ConnectionResult<Option<SearchResponse>> {
        match self.responses.pop_front() {
            Some(response) => Ok(Some(response)),
            None => std::future::pending().await,
        }
    }
}

/// Declines every referral.
pub struct DecliningResolver;

#[async_trait]
impl ReferralConnectionResolver for DecliningResolver {
    async fn resolve(
        &self,
        _manager: &Arc<ConnectionManager>,
        _origin: &Arc<Connection>,
        _referral: &Referral,
    ) -> Option<Arc<Connection>> {
        None
    }
}

/// Never supplies credentials.
pub struct DecliningAuthHandler;

#[async_trait]
impl AuthHandler for DecliningAuthHandler {
    async fn credentials(&self, _parameter: &ConnectionParameter) -> Option<Credentials> {
        None
    }
}

/// Settings writing audit logs below `log_directory`.
pub fn test_settings(log_directory: &Path) -> ConnectionCoreSettings {
    ConnectionCoreSettings::default().with_log_directory(log_directory)
}

/// Manager with stored credentials and same-credentials referral resolution.
pub fn test_manager(directory: &MockDirectory, log_directory: &Path) -> Arc<ConnectionManager> {
    ConnectionManager::builder(Arc::new(directory.clone()))
        .with_settings(test_settings(log_directory))
        .with_auth_handler(Arc::new(StoredCredentialsAuthHandler))
        .with_referral_resolver(Arc::new(SameCredentialsReferralResolver))
        .build()
        .unwrap()
}

/// Parameters of a simple-bind connection to `host:389`.
pub fn test_parameter(host: &str) -> ConnectionParameter {
    ConnectionParameter::new(host, host, 389)
        .with_credentials("cn=admin,dc=example,dc=com", "secret")
}

pub fn entry(dn: &str) -> SearchResponse {
    SearchResponse::Entry(Entry::new(dn).with_attribute("cn", ["value"]))
}

pub fn reference(url: &str) -> SearchResponse {
    SearchResponse::Reference(vec![url.to_string()])
}

pub fn done() -> SearchResponse {
    SearchResponse::Done(OperationResult::success())
}

/// DNs of a list of results.
pub fn dns(results: &[StudioSearchResult]) -> Vec<String> {
    results.iter().map(|r| r.dn().to_string()).collect()
}
