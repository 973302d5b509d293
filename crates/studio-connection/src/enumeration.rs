//! Search result enumeration
//!
//! Pulls responses from a search cursor and applies the referral handling
//! policy of the request. Followed referrals are searched depth-first: the
//! results of a referred search are returned before the next queued
//! referral is visited.

use futures_util::future::BoxFuture;
use futures_util::stream::{self, Stream};
use futures_util::FutureExt;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionManager};
use crate::error::{ConnectionError, ConnectionResult};
use crate::monitor::StudioProgressMonitor;
use crate::operation::{Control, Entry, SearchParameter, SearchResponse};
use crate::referral::{Referral, SharedReferralsInfo};
use crate::transport::SearchCursor;
use crate::types::ReferralHandlingMethod;
use crate::url::LdapUrl;
use crate::wrapper::run_monitored;

/// One result delivered by a [`StudioSearchEnumeration`].
#[derive(Debug, Clone)]
pub struct StudioSearchResult {
    entry: Entry,
    connection: Option<Arc<Connection>>,
    is_continued_search_result: bool,
    continuation_url: Option<LdapUrl>,
}

impl StudioSearchResult {
    fn new(entry: Entry, connection: Arc<Connection>) -> Self {
        Self {
            entry,
            connection: Some(connection),
            is_continued_search_result: false,
            continuation_url: None,
        }
    }

    /// Placeholder for a referral URL left to the caller.
    fn continuation(url: LdapUrl) -> Self {
        Self {
            entry: Entry::new(url.dn.clone()),
            connection: None,
            is_continued_search_result: false,
            continuation_url: Some(url),
        }
    }

    fn continued(mut self) -> Self {
        self.is_continued_search_result = true;
        self
    }

    /// The entry.
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Consume the result, returning the entry.
    pub fn into_entry(self) -> Entry {
        self.entry
    }

    /// DN of the entry.
    pub fn dn(&self) -> &str {
        &self.entry.dn
    }

    /// The connection that returned the entry; `None` for placeholders.
    pub fn connection(&self) -> Option<&Arc<Connection>> {
        self.connection.as_ref()
    }

    /// Whether the result came from a followed referral rather than the
    /// searched server. Placeholders of manually followed referrals are not
    /// continued results; they carry a [`continuation_url`](Self::continuation_url).
    pub fn is_continued_search_result(&self) -> bool {
        self.is_continued_search_result
    }

    /// Referral URL of a placeholder result.
    pub fn continuation_url(&self) -> Option<&LdapUrl> {
        self.continuation_url.as_ref()
    }
}

/// Everything an enumeration needs from the search that started it.
pub(crate) struct SearchContext {
    pub(crate) connection: Arc<Connection>,
    pub(crate) manager: Arc<ConnectionManager>,
    pub(crate) cursor: Box<dyn SearchCursor>,
    /// Response already read from the cursor; `None` if it was exhausted.
    pub(crate) first_response: Option<SearchResponse>,
    pub(crate) request: SearchParameter,
    pub(crate) referrals_info: SharedReferralsInfo,
    pub(crate) monitor: StudioProgressMonitor,
    pub(crate) request_num: u64,
    pub(crate) binary_attributes: HashSet<String>,
}

/// Lazily enumerates the results of one search, following referrals as
/// the request's referral handling method says.
pub struct StudioSearchEnumeration {
    connection: Arc<Connection>,
    manager: Arc<ConnectionManager>,
    cursor: Option<Box<dyn SearchCursor>>,
    buffered: Option<SearchResponse>,
    request: SearchParameter,
    referrals_info: SharedReferralsInfo,
    pending: VecDeque<Referral>,
    manual_urls: VecDeque<LdapUrl>,
    nested: Option<Box<StudioSearchEnumeration>>,
    monitor: StudioProgressMonitor,
    request_num: u64,
    binary_attributes: HashSet<String>,
    response_controls: Vec<Control>,
    result_count: u64,
    depth: usize,
    finished: bool,
}

impl StudioSearchEnumeration {
    pub(crate) fn new(context: SearchContext) -> Self {
        Self {
            connection: context.connection,
            manager: context.manager,
            cursor: context.first_response.is_some().then_some(context.cursor),
            buffered: context.first_response,
            request: context.request,
            referrals_info: context.referrals_info,
            pending: VecDeque::new(),
            manual_urls: VecDeque::new(),
            nested: None,
            monitor: context.monitor,
            request_num: context.request_num,
            binary_attributes: context.binary_attributes,
            response_controls: Vec::new(),
            result_count: 0,
            depth: 0,
            finished: false,
        }
    }

    /// The connection the search was sent to.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// The search request.
    pub fn request(&self) -> &SearchParameter {
        &self.request
    }

    /// Controls of the search result done message, once received.
    pub fn response_controls(&self) -> &[Control] {
        &self.response_controls
    }

    /// Number of results returned so far.
    pub fn result_count(&self) -> u64 {
        self.result_count
    }

    /// The next result, or `None` once the search and every followed
    /// referral are exhausted.
    pub fn next(&mut self) -> BoxFuture<'_, ConnectionResult<Option<StudioSearchResult>>> {
        async move {
            if self.finished {
                return Ok(None);
            }
            match self.advance().await {
                Ok(Some(result)) => {
                    self.result_count += 1;
                    Ok(Some(result))
                }
                Ok(None) => {
                    self.finish(None);
                    Ok(None)
                }
                Err(e) => {
                    if e.is_cancelled() {
                        debug!(request_num = self.request_num, "Search cancelled, closing transport");
                        self.connection.wrapper().disconnect().await;
                    }
                    if self.depth == 0 {
                        self.monitor.report_error(&e);
                    }
                    self.finish(Some(&e));
                    Err(e)
                }
            }
        }
        .boxed()
    }

    /// Drain the enumeration into a vector.
    pub async fn collect_all(mut self) -> ConnectionResult<Vec<StudioSearchResult>> {
        let mut results = Vec::new();
        while let Some(result) = self.next().await? {
            results.push(result);
        }
        Ok(results)
    }

    /// Adapt the enumeration into a stream ending after the first error.
    pub fn into_stream(self) -> impl Stream<Item = ConnectionResult<StudioSearchResult>> + Send {
        stream::unfold(self, |mut enumeration| async move {
            match enumeration.next().await {
                Ok(Some(result)) => Some((Ok(result), enumeration)),
                Ok(None) => None,
                Err(e) => Some((Err(e), enumeration)),
            }
        })
    }

    fn follows_referrals(&self) -> bool {
        matches!(
            self.request.referral_handling,
            ReferralHandlingMethod::Follow | ReferralHandlingMethod::FollowManually
        )
    }

    async fn advance(&mut self) -> ConnectionResult<Option<StudioSearchResult>> {
        loop {
            if self.monitor.is_cancelled() {
                return Err(ConnectionError::Cancelled);
            }

            if self.cursor.is_some() {
                match self.poll_cursor().await? {
                    Some(SearchResponse::Entry(mut entry)) => {
                        entry.apply_binary_attributes(&self.binary_attributes);
                        for logger in self.manager.loggers() {
                            logger.log_search_result_entry(
                                &self.connection,
                                &entry,
                                self.request_num,
                                None,
                            );
                        }
                        return Ok(Some(StudioSearchResult::new(
                            entry,
                            Arc::clone(&self.connection),
                        )));
                    }
                    Some(SearchResponse::Reference(urls)) => {
                        for logger in self.manager.loggers() {
                            logger.log_search_result_reference(
                                &self.connection,
                                &urls,
                                self.request_num,
                                None,
                            );
                        }
                        if self.follows_referrals() {
                            self.queue_referral(&urls)?;
                        }
                    }
                    Some(SearchResponse::Done(result)) => {
                        self.cursor = None;
                        self.response_controls = result.controls.clone();
                        if result.is_referral() {
                            if self.follows_referrals() && !result.referrals.is_empty() {
                                self.queue_referral(&result.referrals)?;
                            }
                        } else if !result.is_search_done_ok() {
                            return Err(ConnectionError::from_result_code(
                                result.code,
                                result.message,
                            ));
                        }
                    }
                    None => self.cursor = None,
                }
                continue;
            }

            match self.request.referral_handling {
                ReferralHandlingMethod::FollowManually => {
                    if let Some(url) = self.manual_urls.pop_front() {
                        return Ok(Some(StudioSearchResult::continuation(url)));
                    }
                    if let Some(referral) = self.take_next_referral() {
                        self.manual_urls.extend(referral.urls().iter().cloned());
                        continue;
                    }
                }
                ReferralHandlingMethod::Follow => {
                    if let Some(nested) = self.nested.as_mut() {
                        match nested.next().await? {
                            Some(result) => return Ok(Some(result.continued())),
                            None => {
                                self.nested = None;
                                continue;
                            }
                        }
                    }
                    if let Some(referral) = self.take_next_referral() {
                        self.nested = self.follow(&referral).await?;
                        continue;
                    }
                }
                ReferralHandlingMethod::Ignore | ReferralHandlingMethod::Manage => {}
            }

            return Ok(None);
        }
    }

    async fn poll_cursor(&mut self) -> ConnectionResult<Option<SearchResponse>> {
        if let Some(response) = self.buffered.take() {
            return Ok(Some(response));
        }
        let Some(mut cursor) = self.cursor.take() else {
            return Ok(None);
        };

        let (cursor, response) = run_monitored(&self.monitor, async move {
            let response = cursor.next().await;
            (cursor, response)
        })
        .await?;

        let response = response?;
        if response.is_some() {
            self.cursor = Some(cursor);
        }
        Ok(response)
    }

    /// Queue a reference or referral for this enumeration.
    ///
    /// Malformed URLs are skipped; a target seen before in this operation
    /// is a referral loop.
    fn queue_referral(&mut self, urls: &[String]) -> ConnectionResult<()> {
        let referral = match Referral::from_strings(urls) {
            Ok(referral) => referral,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed referral");
                return Ok(());
            }
        };

        self.referrals_info.lock().add_referral(referral.clone())?;
        debug!(referral = %referral, request_num = self.request_num, "Referral queued");
        self.pending.push_back(referral);
        Ok(())
    }

    fn take_next_referral(&mut self) -> Option<Referral> {
        let referral = self.pending.pop_front()?;
        self.referrals_info.lock().take_referral(&referral);
        Some(referral)
    }

    /// Start the search of a referred server.
    ///
    /// A referral the resolver declines, or whose search fails, yields no
    /// results; cancellation propagates.
    async fn follow(
        &mut self,
        referral: &Referral,
    ) -> ConnectionResult<Option<Box<StudioSearchEnumeration>>> {
        let Some(target) = self
            .manager
            .referral_connection(&self.connection, referral)
            .await
        else {
            debug!(referral = %referral, "No connection for referral, skipping");
            return Ok(None);
        };

        let url = referral.first_url();
        let request = self.request.for_referral(url);
        debug!(
            url = %url,
            target = %target.id(),
            base = %request.base,
            "Following search referral"
        );

        match target
            .wrapper()
            .search(request, &self.monitor, Some(Arc::clone(&self.referrals_info)))
            .await
        {
            Ok(mut nested) => {
                nested.depth = self.depth + 1;
                Ok(Some(Box::new(nested)))
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                warn!(url = %url, error = %e, "Referred search failed, skipping");
                Ok(None)
            }
        }
    }

    fn finish(&mut self, error: Option<&ConnectionError>) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.cursor = None;
        self.buffered = None;
        self.nested = None;
        for logger in self.manager.loggers() {
            logger.log_search_result_done(
                &self.connection,
                self.result_count,
                self.request_num,
                error,
            );
        }
    }
}

impl std::fmt::Debug for StudioSearchEnumeration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StudioSearchEnumeration")
            .field("connection", &self.connection.id())
            .field("request", &self.request)
            .field("request_num", &self.request_num)
            .field("result_count", &self.result_count)
            .field("pending_referrals", &self.pending.len())
            .field("depth", &self.depth)
            .field("finished", &self.finished)
            .finish()
    }
}
