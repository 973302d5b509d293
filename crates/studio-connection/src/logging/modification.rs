//! LDIF modification log
//!
//! Records add, delete, modify and modify DN requests as LDIF change records.

use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::ldif::LdifRecord;
use super::{masked_set, record_header, ConnectionLogFiles, LdapLogger};
use crate::config::ModificationLogSettings;
use crate::connection::Connection;
use crate::error::ConnectionError;
use crate::operation::{split_rdn, AttributeValue, Control, Entry, Modification};

/// Kind segment of the modification log file names.
pub const MODIFICATION_LOG_KIND: &str = "modifications";

/// Writes modification requests to a rotating LDIF log per connection.
#[derive(Debug)]
pub struct LdifModificationLogger {
    settings: RwLock<ModificationLogSettings>,
    masked: RwLock<HashSet<String>>,
    files: Mutex<ConnectionLogFiles>,
}

impl LdifModificationLogger {
    /// Create a logger writing below `directory`.
    pub fn new(directory: impl Into<PathBuf>, settings: ModificationLogSettings) -> Self {
        let files = ConnectionLogFiles::new(
            MODIFICATION_LOG_KIND,
            directory.into(),
            settings.file_size_kb,
            settings.file_count,
        );
        Self {
            masked: RwLock::new(masked_set(&settings.masked_attributes)),
            settings: RwLock::new(settings),
            files: Mutex::new(files),
        }
    }

    /// Whether modifications are logged.
    pub fn is_enabled(&self) -> bool {
        self.settings.read().enabled
    }

    /// Adopt new settings.
    ///
    /// A change of directory, size or count closes every open log and
    /// deletes generations beyond the new count.
    pub fn apply_settings(&self, directory: &Path, settings: ModificationLogSettings) {
        {
            let mut files = self.files.lock();
            if files.differs(directory, settings.file_size_kb, settings.file_count) {
                debug!(
                    count = settings.file_count,
                    size_kb = settings.file_size_kb,
                    "Modification log rotation changed, closing open logs"
                );
                files.reconfigure(
                    directory.to_path_buf(),
                    settings.file_size_kb,
                    settings.file_count,
                    true,
                );
            }
        }
        *self.masked.write() = masked_set(&settings.masked_attributes);
        *self.settings.write() = settings;
    }

    /// Log files of a connection, newest first.
    pub fn files(&self, connection: &Connection) -> Vec<PathBuf> {
        self.files.lock().files(connection.id())
    }

    /// Number of connections with an open log.
    pub fn open_log_count(&self) -> usize {
        self.files.lock().open_count()
    }

    fn is_masked(&self, attribute: &str) -> bool {
        self.masked.read().contains(&attribute.to_lowercase())
    }

    fn log(&self, connection: &Connection, record: &str, error: Option<&ConnectionError>) {
        let mut text = record_header("RESULT", connection, error);
        text.push_str(record);
        self.files.lock().write(connection, &text);
    }
}

impl LdapLogger for LdifModificationLogger {
    fn name(&self) -> &str {
        "ldif-modification"
    }

    fn log_changetype_add(
        &self,
        connection: &Connection,
        entry: &Entry,
        controls: &[Control],
        error: Option<&ConnectionError>,
    ) {
        if !self.is_enabled() {
            return;
        }

        let mut record = LdifRecord::new(&entry.dn);
        record.push_controls(controls).push_changetype("add");
        for attribute in &entry.attributes {
            record.push_values(
                &attribute.name,
                &attribute.values,
                self.is_masked(&attribute.name),
            );
        }
        self.log(connection, &record.finish(), error);
    }

    fn log_changetype_delete(
        &self,
        connection: &Connection,
        dn: &str,
        controls: &[Control],
        error: Option<&ConnectionError>,
    ) {
        if !self.is_enabled() {
            return;
        }

        let mut record = LdifRecord::new(dn);
        record.push_controls(controls).push_changetype("delete");
        self.log(connection, &record.finish(), error);
    }

    fn log_changetype_modify(
        &self,
        connection: &Connection,
        dn: &str,
        modifications: &[Modification],
        controls: &[Control],
        error: Option<&ConnectionError>,
    ) {
        if !self.is_enabled() {
            return;
        }

        let mut record = LdifRecord::new(dn);
        record.push_controls(controls).push_changetype("modify");
        for modification in modifications {
            let name = &modification.attribute.name;
            record.push_line(format!(
                "{}: {}",
                modification.operation.ldif_keyword(),
                name
            ));
            record.push_values(name, &modification.attribute.values, self.is_masked(name));
            record.push_line("-");
        }
        self.log(connection, &record.finish(), error);
    }

    fn log_changetype_mod_dn(
        &self,
        connection: &Connection,
        old_dn: &str,
        new_dn: &str,
        delete_old_rdn: bool,
        controls: &[Control],
        error: Option<&ConnectionError>,
    ) {
        if !self.is_enabled() {
            return;
        }

        let (new_rdn, new_superior) = split_rdn(new_dn);
        let mut record = LdifRecord::new(old_dn);
        record
            .push_controls(controls)
            .push_changetype("moddn")
            .push_attr_val("newrdn", &AttributeValue::Text(new_rdn.to_string()))
            .push_line(format!("deleteoldrdn: {}", u8::from(delete_old_rdn)));
        if !new_superior.is_empty() {
            record.push_attr_val(
                "newsuperior",
                &AttributeValue::Text(new_superior.to_string()),
            );
        }
        self.log(connection, &record.finish(), error);
    }

    fn dispose(&self, connection: &Connection) {
        self.files.lock().dispose(connection.id());
    }
}
