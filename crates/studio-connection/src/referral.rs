//! Referral bookkeeping
//!
//! [`ReferralsInfo`] tracks the referral targets still to visit and those
//! already visited during one top-level operation, and detects loops.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::error::{ConnectionError, ConnectionResult};
use crate::url::LdapUrl;

/// One referral target: the URL and the DN it points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReferralUrlAndDn {
    url: LdapUrl,
    dn: String,
}

impl ReferralUrlAndDn {
    /// Create a target.
    pub fn new(url: LdapUrl, dn: impl Into<String>) -> Self {
        Self { url, dn: dn.into() }
    }

    /// The referral URL.
    pub fn url(&self) -> &LdapUrl {
        &self.url
    }

    /// The DN the referral points at.
    pub fn dn(&self) -> &str {
        &self.dn
    }
}

/// The alternative URLs carried by one referral or continuation reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Referral {
    urls: Vec<LdapUrl>,
}

impl Referral {
    /// Build a referral from URL strings.
    pub fn from_strings<S: AsRef<str>>(urls: &[S]) -> ConnectionResult<Self> {
        let urls = urls
            .iter()
            .map(|u| LdapUrl::parse(u.as_ref()))
            .collect::<ConnectionResult<Vec<_>>>()?;
        Self::new(urls)
    }

    /// Build a referral from parsed URLs. At least one URL is required;
    /// repeated URLs are kept once, in first-seen order.
    pub fn new(urls: Vec<LdapUrl>) -> ConnectionResult<Self> {
        if urls.is_empty() {
            return Err(ConnectionError::InvalidLdapUrl {
                url: String::new(),
                message: "referral without URL".to_string(),
            });
        }
        let mut unique: Vec<LdapUrl> = Vec::with_capacity(urls.len());
        for url in urls {
            if !unique.contains(&url) {
                unique.push(url);
            }
        }
        Ok(Self { urls: unique })
    }

    /// All URLs.
    pub fn urls(&self) -> &[LdapUrl] {
        &self.urls
    }

    /// The URL that is followed.
    pub fn first_url(&self) -> &LdapUrl {
        // Construction guarantees at least one URL.
        &self.urls[0]
    }

    fn targets(&self) -> impl Iterator<Item = ReferralUrlAndDn> + '_ {
        self.urls
            .iter()
            .map(|url| ReferralUrlAndDn::new(url.clone(), url.dn.clone()))
    }
}

impl fmt::Display for Referral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let urls: Vec<String> = self.urls.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", urls.join(", "))
    }
}

/// Referral targets to visit and already visited during one operation.
///
/// A target is in at most one of the two lists. Adding a target that is in
/// either list is a loop.
#[derive(Debug, Default)]
pub struct ReferralsInfo {
    to_process: VecDeque<Referral>,
    processed: Vec<ReferralUrlAndDn>,
}

/// A `ReferralsInfo` shared by every hop of one operation.
pub type SharedReferralsInfo = Arc<Mutex<ReferralsInfo>>;

impl ReferralsInfo {
    /// Create empty bookkeeping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create empty bookkeeping to share across hops.
    pub fn shared() -> SharedReferralsInfo {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Queue a referral.
    ///
    /// Fails with [`ConnectionError::ReferralLoop`] if any of its targets is
    /// already queued or was already visited.
    pub fn add_referral(&mut self, referral: Referral) -> ConnectionResult<()> {
        for target in referral.targets() {
            if self.contains(&target) {
                return Err(ConnectionError::ReferralLoop {
                    url: target.url().to_string(),
                    dn: target.dn().to_string(),
                });
            }
        }
        self.to_process.push_back(referral);
        Ok(())
    }

    /// Take the oldest queued referral and mark its targets visited.
    pub fn next_referral(&mut self) -> Option<Referral> {
        let referral = self.to_process.pop_front()?;
        self.processed.extend(referral.targets());
        Some(referral)
    }

    /// Take a specific queued referral and mark its targets visited.
    ///
    /// Returns `false` if it was not queued.
    pub fn take_referral(&mut self, referral: &Referral) -> bool {
        match self.to_process.iter().position(|r| r == referral) {
            Some(idx) => {
                if let Some(taken) = self.to_process.remove(idx) {
                    self.processed.extend(taken.targets());
                }
                true
            }
            None => false,
        }
    }

    /// Whether referrals are queued.
    pub fn has_more_referrals(&self) -> bool {
        !self.to_process.is_empty()
    }

    /// Whether a target is queued or visited.
    pub fn contains(&self, target: &ReferralUrlAndDn) -> bool {
        self.processed.contains(target)
            || self
                .to_process
                .iter()
                .any(|r| r.targets().any(|t| &t == target))
    }

    /// Visited targets, oldest first.
    pub fn processed(&self) -> &[ReferralUrlAndDn] {
        &self.processed
    }

    /// Number of queued referrals.
    pub fn pending_count(&self) -> usize {
        self.to_process.len()
    }
}
