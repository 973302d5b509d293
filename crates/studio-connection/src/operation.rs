//! Operation types
//!
//! Entries, modifications, controls and search parameters passed through
//! the connection wrapper.

use serde::{Deserialize, Serialize};

use crate::types::{AliasDereferencingMethod, ReferralHandlingMethod, SearchScope};
use crate::url::LdapUrl;

/// OID of the ManageDsaIT control (RFC 3296).
pub const MANAGE_DSA_IT_OID: &str = "2.16.840.1.113730.3.4.2";

/// LDAP result code for success.
pub const RC_SUCCESS: u32 = 0;
/// LDAP result code for an exceeded time limit.
pub const RC_TIME_LIMIT_EXCEEDED: u32 = 3;
/// LDAP result code for an exceeded size limit.
pub const RC_SIZE_LIMIT_EXCEEDED: u32 = 4;
/// LDAP result code for an exceeded administrative limit.
pub const RC_ADMIN_LIMIT_EXCEEDED: u32 = 11;

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// UTF-8 value.
    Text(String),
    /// Binary value.
    Binary(Vec<u8>),
}

impl AttributeValue {
    /// Raw bytes of the value.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            AttributeValue::Text(s) => s.as_bytes(),
            AttributeValue::Binary(b) => b,
        }
    }

    /// The value as text, if it is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            AttributeValue::Binary(_) => None,
        }
    }

    /// Convert to a binary value.
    #[must_use]
    pub fn into_binary(self) -> Self {
        match self {
            AttributeValue::Text(s) => AttributeValue::Binary(s.into_bytes()),
            binary => binary,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::Text(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::Text(s)
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(b: Vec<u8>) -> Self {
        AttributeValue::Binary(b)
    }
}

/// An attribute with its values, keeping the user-provided name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub values: Vec<AttributeValue>,
}

impl Attribute {
    /// Create an attribute.
    pub fn new<V: Into<AttributeValue>>(
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Case-insensitive name comparison.
    #[must_use]
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// A directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Entry {
    pub dn: String,
    pub attributes: Vec<Attribute>,
}

impl Entry {
    /// Create an entry without attributes.
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: Vec::new(),
        }
    }

    /// Add an attribute, returning the entry.
    #[must_use]
    pub fn with_attribute<V: Into<AttributeValue>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.attributes.push(Attribute::new(name, values));
        self
    }

    /// Look up an attribute by case-insensitive name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.is_named(name))
    }

    /// Mark the values of the given (lowercase) attribute names as binary.
    pub(crate) fn apply_binary_attributes(&mut self, names: &std::collections::HashSet<String>) {
        if names.is_empty() {
            return;
        }
        for attribute in &mut self.attributes {
            if names.contains(&attribute.name.to_lowercase()) {
                attribute.values = std::mem::take(&mut attribute.values)
                    .into_iter()
                    .map(AttributeValue::into_binary)
                    .collect();
            }
        }
    }
}

/// Kind of a modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModificationOperation {
    Add,
    Remove,
    Replace,
}

impl ModificationOperation {
    /// LDIF mod-spec keyword.
    #[must_use]
    pub fn ldif_keyword(&self) -> &'static str {
        match self {
            ModificationOperation::Add => "add",
            ModificationOperation::Remove => "delete",
            ModificationOperation::Replace => "replace",
        }
    }
}

/// A single modification of a modify request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    pub operation: ModificationOperation,
    pub attribute: Attribute,
}

impl Modification {
    /// Add values.
    pub fn add<V: Into<AttributeValue>>(
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self {
            operation: ModificationOperation::Add,
            attribute: Attribute::new(name, values),
        }
    }

    /// Remove values, or the whole attribute when no values are given.
    pub fn remove<V: Into<AttributeValue>>(
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self {
            operation: ModificationOperation::Remove,
            attribute: Attribute::new(name, values),
        }
    }

    /// Replace all values.
    pub fn replace<V: Into<AttributeValue>>(
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self {
            operation: ModificationOperation::Replace,
            attribute: Attribute::new(name, values),
        }
    }
}

/// A request or response control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    pub oid: String,
    #[serde(default)]
    pub critical: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<u8>>,
}

impl Control {
    /// Create a non-critical control without value.
    pub fn new(oid: impl Into<String>) -> Self {
        Self {
            oid: oid.into(),
            critical: false,
            value: None,
        }
    }

    /// The ManageDsaIT control.
    #[must_use]
    pub fn manage_dsa_it() -> Self {
        Self {
            oid: MANAGE_DSA_IT_OID.to_string(),
            critical: false,
            value: None,
        }
    }

    /// Mark the control critical.
    #[must_use]
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Set the control value.
    #[must_use]
    pub fn with_value(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// Outcome of a directory operation as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OperationResult {
    pub code: u32,
    pub message: String,
    pub matched_dn: String,
    pub referrals: Vec<String>,
    pub controls: Vec<Control>,
}

impl OperationResult {
    /// A successful result.
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    /// A result with the given code and message.
    pub fn with_code(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            ..Self::default()
        }
    }

    /// A referral result carrying the given URLs.
    #[must_use]
    pub fn referral(urls: Vec<String>) -> Self {
        Self {
            code: crate::error::RC_REFERRAL,
            message: "referral".to_string(),
            referrals: urls,
            ..Self::default()
        }
    }

    /// Whether the server reported success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == RC_SUCCESS
    }

    /// Whether the server returned a referral.
    #[must_use]
    pub fn is_referral(&self) -> bool {
        self.code == crate::error::RC_REFERRAL
    }

    /// Whether the result ends a search without error.
    ///
    /// Exceeded limits still deliver the entries returned so far.
    #[must_use]
    pub fn is_search_done_ok(&self) -> bool {
        matches!(
            self.code,
            RC_SUCCESS
                | RC_TIME_LIMIT_EXCEEDED
                | RC_SIZE_LIMIT_EXCEEDED
                | RC_ADMIN_LIMIT_EXCEEDED
        ) || self.is_referral()
    }
}

/// One item delivered by a search cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchResponse {
    /// A search result entry.
    Entry(Entry),
    /// A search continuation reference with its URLs.
    Reference(Vec<String>),
    /// The final search result done message.
    Done(OperationResult),
}

/// Parameters of one search request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParameter {
    pub base: String,
    pub filter: String,
    #[serde(default)]
    pub scope: SearchScope,
    /// `None` requests all user attributes, an empty list requests none (`1.1`).
    #[serde(default)]
    pub returning_attributes: Option<Vec<String>>,
    #[serde(default)]
    pub count_limit: i32,
    #[serde(default)]
    pub time_limit: i32,
    #[serde(default)]
    pub alias_dereferencing: AliasDereferencingMethod,
    #[serde(default)]
    pub referral_handling: ReferralHandlingMethod,
    #[serde(default)]
    pub controls: Vec<Control>,
}

impl SearchParameter {
    /// Create a subtree search.
    pub fn new(base: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            filter: filter.into(),
            scope: SearchScope::Subtree,
            returning_attributes: None,
            count_limit: 0,
            time_limit: 0,
            alias_dereferencing: AliasDereferencingMethod::default(),
            referral_handling: ReferralHandlingMethod::default(),
            controls: Vec::new(),
        }
    }

    /// Set the scope.
    #[must_use]
    pub fn with_scope(mut self, scope: SearchScope) -> Self {
        self.scope = scope;
        self
    }

    /// Set the returning attributes.
    #[must_use]
    pub fn with_attributes<S: Into<String>>(
        mut self,
        attributes: impl IntoIterator<Item = S>,
    ) -> Self {
        self.returning_attributes = Some(attributes.into_iter().map(Into::into).collect());
        self
    }

    /// Set the size limit.
    #[must_use]
    pub fn with_count_limit(mut self, count_limit: i32) -> Self {
        self.count_limit = count_limit;
        self
    }

    /// Set the time limit in seconds.
    #[must_use]
    pub fn with_time_limit(mut self, time_limit: i32) -> Self {
        self.time_limit = time_limit;
        self
    }

    /// Set the alias dereferencing method.
    #[must_use]
    pub fn with_alias_dereferencing(mut self, method: AliasDereferencingMethod) -> Self {
        self.alias_dereferencing = method;
        self
    }

    /// Set the referral handling method.
    #[must_use]
    pub fn with_referral_handling(mut self, method: ReferralHandlingMethod) -> Self {
        self.referral_handling = method;
        self
    }

    /// Add a request control.
    #[must_use]
    pub fn with_control(mut self, control: Control) -> Self {
        self.controls.push(control);
        self
    }

    /// Controls sent on the wire: the request controls plus ManageDsaIT
    /// when referrals are managed.
    #[must_use]
    pub fn effective_controls(&self) -> Vec<Control> {
        let mut controls = self.controls.clone();
        if self.referral_handling == ReferralHandlingMethod::Manage
            && !controls.iter().any(|c| c.oid == MANAGE_DSA_IT_OID)
        {
            controls.push(Control::manage_dsa_it());
        }
        controls
    }

    /// Derive the request to send to a referred server.
    ///
    /// Base, filter, scope and attributes come from the URL when present;
    /// limits, alias dereferencing, referral handling and controls are inherited.
    #[must_use]
    pub fn for_referral(&self, url: &LdapUrl) -> Self {
        let mut derived = self.clone();
        if url.has_dn() {
            derived.base = url.dn.clone();
        }
        if let Some(filter) = url.filter.as_ref().filter(|f| !f.is_empty()) {
            derived.filter = filter.clone();
        }
        if let Some(scope) = url.scope {
            derived.scope = scope;
        }
        if !url.attributes.is_empty() {
            derived.returning_attributes = Some(url.attributes.clone());
        }
        derived
    }
}

/// Split a DN into its leading RDN and the parent DN.
///
/// Escaped commas (`\,`) do not split.
#[must_use]
pub fn split_rdn(dn: &str) -> (&str, &str) {
    let bytes = dn.as_bytes();
    let mut escaped = false;
    for (idx, b) in bytes.iter().enumerate() {
        match b {
            b'\\' if !escaped => escaped = true,
            b',' if !escaped => return (dn[..idx].trim(), dn[idx + 1..].trim()),
            _ => escaped = false,
        }
    }
    (dn.trim(), "")
}
