//! LDIF audit logging
//!
//! Observers recording every wire operation of a connection in LDIF form
//! into rotating files, one file set per connection and logger.

pub mod ldif;
pub mod modification;
pub mod rotation;
pub mod search;

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::ConnectionError;
use crate::ids::ConnectionId;
use crate::operation::{Control, Entry, Modification, SearchParameter};

pub use modification::LdifModificationLogger;
pub use rotation::RotatingFileWriter;
pub use search::LdifSearchLogger;

/// Receives every operation issued by connection wrappers.
///
/// All methods default to doing nothing, so loggers implement only what
/// they record. `error` is the failure of the operation, if any.
pub trait LdapLogger: Send + Sync {
    /// Logger name for diagnostics.
    fn name(&self) -> &str;

    /// A search request was sent.
    fn log_search_request(
        &self,
        _connection: &Connection,
        _request: &SearchParameter,
        _request_num: u64,
        _error: Option<&ConnectionError>,
    ) {
    }

    /// A search returned an entry.
    fn log_search_result_entry(
        &self,
        _connection: &Connection,
        _entry: &Entry,
        _request_num: u64,
        _error: Option<&ConnectionError>,
    ) {
    }

    /// A search returned a continuation reference.
    fn log_search_result_reference(
        &self,
        _connection: &Connection,
        _urls: &[String],
        _request_num: u64,
        _error: Option<&ConnectionError>,
    ) {
    }

    /// A search finished after returning `count` results.
    fn log_search_result_done(
        &self,
        _connection: &Connection,
        _count: u64,
        _request_num: u64,
        _error: Option<&ConnectionError>,
    ) {
    }

    /// An add request was sent.
    fn log_changetype_add(
        &self,
        _connection: &Connection,
        _entry: &Entry,
        _controls: &[Control],
        _error: Option<&ConnectionError>,
    ) {
    }

    /// A delete request was sent.
    fn log_changetype_delete(
        &self,
        _connection: &Connection,
        _dn: &str,
        _controls: &[Control],
        _error: Option<&ConnectionError>,
    ) {
    }

    /// A modify request was sent.
    fn log_changetype_modify(
        &self,
        _connection: &Connection,
        _dn: &str,
        _modifications: &[Modification],
        _controls: &[Control],
        _error: Option<&ConnectionError>,
    ) {
    }

    /// A modify DN request was sent.
    fn log_changetype_mod_dn(
        &self,
        _connection: &Connection,
        _old_dn: &str,
        _new_dn: &str,
        _delete_old_rdn: bool,
        _controls: &[Control],
        _error: Option<&ConnectionError>,
    ) {
    }

    /// The connection was removed; release its resources.
    fn dispose(&self, _connection: &Connection) {}
}

/// File name pattern of a connection's log of the given kind.
pub fn log_file_pattern(directory: &Path, id: ConnectionId, kind: &str) -> String {
    directory
        .join(format!("{id}-{kind}-%u-%g.ldiflog"))
        .to_string_lossy()
        .into_owned()
}

/// Comment lines opening every logged record.
pub(crate) fn record_header(
    label: &str,
    connection: &Connection,
    error: Option<&ConnectionError>,
) -> String {
    let status = if error.is_some() { "ERROR" } else { "OK" };
    let mut header = ldif::comment_line(&format!("#!{label} {status}"));
    header.push_str(&ldif::comment_line(&format!(
        "#!CONNECTION ldap://{}:{}",
        connection.host(),
        connection.port()
    )));
    header.push_str(&ldif::comment_line(&format!(
        "#!DATE {}",
        Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ")
    )));
    if let Some(error) = error {
        header.push_str(&ldif::comment_line(&format!("#!ERROR {error}")));
    }
    header
}

/// Lowercase lookup set of masked attribute names.
pub(crate) fn masked_set(names: &[String]) -> HashSet<String> {
    names.iter().map(|n| n.to_lowercase()).collect()
}

/// Rotating writers of one logger, created lazily per connection.
#[derive(Debug)]
pub(crate) struct ConnectionLogFiles {
    kind: &'static str,
    directory: PathBuf,
    limit_bytes: u64,
    count: u32,
    writers: HashMap<ConnectionId, RotatingFileWriter>,
}

impl ConnectionLogFiles {
    pub(crate) fn new(kind: &'static str, directory: PathBuf, size_kb: u64, count: u32) -> Self {
        Self {
            kind,
            directory,
            limit_bytes: size_kb.saturating_mul(1000),
            count,
            writers: HashMap::new(),
        }
    }

    fn pattern(&self, id: ConnectionId) -> String {
        log_file_pattern(&self.directory, id, self.kind)
    }

    /// Append a record to the connection's log, opening it on first use.
    pub(crate) fn write(&mut self, connection: &Connection, record: &str) {
        let id = connection.id();
        if !self.writers.contains_key(&id) {
            let pattern = self.pattern(id);
            match RotatingFileWriter::open(&pattern, self.limit_bytes, self.count) {
                Ok(writer) => {
                    debug!(pattern = %pattern, kind = self.kind, "Opened audit log");
                    self.writers.insert(id, writer);
                }
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Failed to open audit log");
                    return;
                }
            }
        }
        if let Some(writer) = self.writers.get_mut(&id) {
            if let Err(e) = writer.write_record(record) {
                warn!(connection = %id, kind = self.kind, error = %e, "Failed to write audit log");
            }
        }
    }

    /// Existing log files of a connection, newest first.
    pub(crate) fn files(&self, id: ConnectionId) -> Vec<PathBuf> {
        rotation::existing_files(&self.pattern(id), self.count)
    }

    /// Close the connection's writer.
    pub(crate) fn dispose(&mut self, id: ConnectionId) {
        if let Some(mut writer) = self.writers.remove(&id) {
            writer.close();
        }
    }

    /// Whether new rotation parameters differ from the current ones.
    pub(crate) fn differs(&self, directory: &Path, size_kb: u64, count: u32) -> bool {
        self.directory != directory
            || self.limit_bytes != size_kb.saturating_mul(1000)
            || self.count != count
    }

    /// Close every writer and adopt new rotation parameters.
    ///
    /// With `remove_surplus`, generations at or above the new count are
    /// deleted for every connection that had an open writer.
    pub(crate) fn reconfigure(
        &mut self,
        directory: PathBuf,
        size_kb: u64,
        count: u32,
        remove_surplus: bool,
    ) {
        let ids: Vec<ConnectionId> = self.writers.keys().copied().collect();
        for writer in self.writers.values_mut() {
            writer.close();
        }
        self.writers.clear();

        if remove_surplus {
            for id in ids {
                let pattern = self.pattern(id);
                if let Err(e) = rotation::remove_generations_from(&pattern, count) {
                    warn!(pattern = %pattern, error = %e, "Failed to delete surplus log files");
                }
            }
        }

        self.directory = directory;
        self.limit_bytes = size_kb.saturating_mul(1000);
        self.count = count;
    }

    /// Number of open writers.
    pub(crate) fn open_count(&self) -> usize {
        self.writers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_pattern() {
        let id = ConnectionId::parse("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let pattern = log_file_pattern(Path::new("/var/log/studio"), id, "search");
        assert_eq!(
            pattern,
            "/var/log/studio/550e8400-e29b-41d4-a716-446655440000-search-%u-%g.ldiflog"
        );
    }

    #[test]
    fn test_masked_set_is_lowercase() {
        let set = masked_set(&["userPassword".to_string()]);
        assert!(set.contains("userpassword"));
    }
}
