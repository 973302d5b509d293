//! Conversions between connection core types and ldap3 types.

use ldap3::controls::RawControl;
use ldap3::{DerefAliases, LdapError, LdapResult, Mod, Scope, SearchEntry};
use std::collections::HashSet;
use studio_connection::error::ConnectionError;
use studio_connection::operation::{
    Attribute, AttributeValue, Control, Entry, Modification, ModificationOperation,
    OperationResult,
};
use studio_connection::types::{AliasDereferencingMethod, SearchScope};

/// LDAP result code of a filter error.
const RC_FILTER_ERROR: u32 = 87;

pub(crate) fn scope(scope: SearchScope) -> Scope {
    match scope {
        SearchScope::Object => Scope::Base,
        SearchScope::OneLevel => Scope::OneLevel,
        SearchScope::Subtree => Scope::Subtree,
    }
}

pub(crate) fn deref_aliases(method: AliasDereferencingMethod) -> DerefAliases {
    match method {
        AliasDereferencingMethod::Never => DerefAliases::Never,
        AliasDereferencingMethod::Search => DerefAliases::Searching,
        AliasDereferencingMethod::Finding => DerefAliases::Finding,
        AliasDereferencingMethod::Always => DerefAliases::Always,
    }
}

/// Attribute list of a search request; an empty list asks for none.
pub(crate) fn returning_attributes(attributes: Option<&[String]>) -> Vec<String> {
    match attributes {
        None => Vec::new(),
        Some([]) => vec!["1.1".to_string()],
        Some(list) => list.to_vec(),
    }
}

pub(crate) fn raw_controls(controls: &[Control]) -> Vec<RawControl> {
    controls
        .iter()
        .map(|c| RawControl {
            ctype: c.oid.clone(),
            crit: c.critical,
            val: c.value.clone(),
        })
        .collect()
}

pub(crate) fn operation_result(result: LdapResult) -> OperationResult {
    OperationResult {
        code: result.rc,
        message: result.text,
        matched_dn: result.matched,
        referrals: result.refs,
        controls: result
            .ctrls
            .into_iter()
            .map(|ldap3::controls::Control(_, raw)| Control {
                oid: raw.ctype,
                critical: raw.crit,
                value: raw.val,
            })
            .collect(),
    }
}

/// Entry with text attributes first, each group sorted by name.
pub(crate) fn entry(search_entry: SearchEntry) -> Entry {
    let mut text: Vec<Attribute> = search_entry
        .attrs
        .into_iter()
        .map(|(name, values)| Attribute {
            name,
            values: values.into_iter().map(AttributeValue::Text).collect(),
        })
        .collect();
    text.sort_by(|a, b| a.name.cmp(&b.name));

    let mut binary: Vec<Attribute> = search_entry
        .bin_attrs
        .into_iter()
        .map(|(name, values)| Attribute {
            name,
            values: values.into_iter().map(AttributeValue::Binary).collect(),
        })
        .collect();
    binary.sort_by(|a, b| a.name.cmp(&b.name));

    text.extend(binary);
    Entry {
        dn: search_entry.dn,
        attributes: text,
    }
}

fn value_set(attribute: &Attribute) -> HashSet<Vec<u8>> {
    attribute
        .values
        .iter()
        .map(|v| v.as_bytes().to_vec())
        .collect()
}

pub(crate) fn modifications(modifications: &[Modification]) -> Vec<Mod<Vec<u8>>> {
    modifications
        .iter()
        .map(|m| {
            let name = m.attribute.name.clone().into_bytes();
            let values = value_set(&m.attribute);
            match m.operation {
                ModificationOperation::Add => Mod::Add(name, values),
                ModificationOperation::Remove => Mod::Delete(name, values),
                ModificationOperation::Replace => Mod::Replace(name, values),
            }
        })
        .collect()
}

pub(crate) fn add_attributes(entry: &Entry) -> Vec<(Vec<u8>, HashSet<Vec<u8>>)> {
    entry
        .attributes
        .iter()
        .map(|a| (a.name.clone().into_bytes(), value_set(a)))
        .collect()
}

/// Map an ldap3 failure of an operation on an open session.
pub(crate) fn operation_error(error: LdapError) -> ConnectionError {
    match error {
        LdapError::LdapResult { result } => {
            ConnectionError::from_result_code(result.rc, result.text)
        }
        LdapError::FilterParsing { .. } => {
            ConnectionError::operation_failed(RC_FILTER_ERROR, "invalid search filter")
        }
        e @ (LdapError::Io { .. }
        | LdapError::EndOfStream { .. }
        | LdapError::Timeout { .. }
        | LdapError::OpSend { .. }
        | LdapError::ResultRecv { .. }) => {
            ConnectionError::communication_with_source("connection to directory server lost", e)
        }
        other => ConnectionError::Internal {
            message: other.to_string(),
            source: Some(Box::new(other)),
        },
    }
}
