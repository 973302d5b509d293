//! LDIF search log
//!
//! Records search requests as comment blocks, returned entries as LDIF
//! content records, and references and result-done messages as comments.

use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::ldif::LdifRecord;
use super::{masked_set, record_header, ConnectionLogFiles, LdapLogger};
use crate::config::SearchLogSettings;
use crate::connection::Connection;
use crate::error::ConnectionError;
use crate::operation::{Entry, SearchParameter};
use crate::types::{AuthenticationMethod, EncryptionMethod};
use crate::url::LdapUrl;

/// Kind segment of the search log file names.
pub const SEARCH_LOG_KIND: &str = "search";

/// Writes search traffic to a rotating LDIF log per connection.
#[derive(Debug)]
pub struct LdifSearchLogger {
    settings: RwLock<SearchLogSettings>,
    masked: RwLock<HashSet<String>>,
    files: Mutex<ConnectionLogFiles>,
}

impl LdifSearchLogger {
    /// Create a logger writing below `directory`.
    pub fn new(directory: impl Into<PathBuf>, settings: SearchLogSettings) -> Self {
        let files = ConnectionLogFiles::new(
            SEARCH_LOG_KIND,
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

    /// Whether requests and result-done records are logged.
    pub fn is_request_log_enabled(&self) -> bool {
        self.settings.read().request_log_enabled
    }

    /// Whether entries and references are logged.
    pub fn is_result_entry_log_enabled(&self) -> bool {
        self.settings.read().result_entry_log_enabled
    }

    /// Adopt new settings; a rotation change closes every open log.
    pub fn apply_settings(&self, directory: &Path, settings: SearchLogSettings) {
        {
            let mut files = self.files.lock();
            if files.differs(directory, settings.file_size_kb, settings.file_count) {
                debug!(
                    count = settings.file_count,
                    size_kb = settings.file_size_kb,
                    "Search log rotation changed, closing open logs"
                );
                files.reconfigure(
                    directory.to_path_buf(),
                    settings.file_size_kb,
                    settings.file_count,
                    false,
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

    fn log(
        &self,
        connection: &Connection,
        label: &str,
        record: &str,
        error: Option<&ConnectionError>,
    ) {
        let mut text = record_header(label, connection, error);
        text.push_str(record);
        self.files.lock().write(connection, &text);
    }
}

/// URL equivalent of a search request on a connection.
pub fn search_url(connection: &Connection, request: &SearchParameter) -> LdapUrl {
    let secure = connection.parameter().encryption_method == EncryptionMethod::Ldaps;
    let attributes = match &request.returning_attributes {
        None => Vec::new(),
        Some(list) if list.is_empty() => vec!["1.1".to_string()],
        Some(list) => list.clone(),
    };
    LdapUrl::new(connection.host(), connection.port(), secure)
        .with_dn(request.base.clone())
        .with_attributes(attributes)
        .with_scope(request.scope)
        .with_filter(request.filter.clone())
}

/// `ldapsearch` invocation equivalent to a search request on a connection.
pub fn search_command_line(connection: &Connection, request: &SearchParameter) -> String {
    let parameter = connection.parameter();
    let mut args: Vec<String> = vec!["ldapsearch".to_string()];

    let scheme = parameter.encryption_method.scheme();
    args.push(format!(
        "-H {scheme}://{}:{}",
        connection.host(),
        connection.port()
    ));
    if parameter.encryption_method == EncryptionMethod::StartTls {
        args.push("-ZZ".to_string());
    }

    match parameter.auth_method {
        AuthenticationMethod::None => args.push("-x".to_string()),
        AuthenticationMethod::Simple => {
            args.push("-x".to_string());
            if let Some(principal) = &parameter.bind_principal {
                args.push(format!("-D \"{principal}\""));
                args.push("-W".to_string());
            }
        }
        sasl => {
            args.push(format!("-Y {}", sasl.as_str()));
            if let Some(principal) = &parameter.bind_principal {
                args.push(format!("-U \"{principal}\""));
            }
            if let Some(realm) = &parameter.sasl_realm {
                args.push(format!("-R \"{realm}\""));
            }
        }
    }

    args.push(format!("-b \"{}\"", request.base));
    args.push(format!("-s {}", request.scope.as_url_str()));
    args.push(format!(
        "-a {}",
        request.alias_dereferencing.command_line_arg()
    ));
    if request.count_limit > 0 {
        args.push(format!("-z {}", request.count_limit));
    }
    if request.time_limit > 0 {
        args.push(format!("-l {}", request.time_limit));
    }
    args.push(format!("\"{}\"", request.filter));
    match &request.returning_attributes {
        None => {}
        Some(list) if list.is_empty() => args.push("1.1".to_string()),
        Some(list) => args.extend(list.iter().cloned()),
    }
    args.join(" ")
}

impl LdapLogger for LdifSearchLogger {
    fn name(&self) -> &str {
        "ldif-search"
    }

    fn log_search_request(
        &self,
        connection: &Connection,
        request: &SearchParameter,
        request_num: u64,
        error: Option<&ConnectionError>,
    ) {
        if !self.is_request_log_enabled() {
            return;
        }

        let attributes = match &request.returning_attributes {
            None => "*".to_string(),
            Some(list) if list.is_empty() => "1.1".to_string(),
            Some(list) => list.join(" "),
        };

        let mut record = LdifRecord::comments();
        record
            .push_comment(&format!(
                "# LDAP URL     : {}",
                search_url(connection, request)
            ))
            .push_comment(&format!(
                "# command line : {}",
                search_command_line(connection, request)
            ))
            .push_comment(&format!("# baseObject   : {}", request.base))
            .push_comment(&format!("# scope        : {}", request.scope.ldif_label()))
            .push_comment(&format!(
                "# derefAliases : {}",
                request.alias_dereferencing.ldif_label()
            ))
            .push_comment(&format!("# sizeLimit    : {}", request.count_limit))
            .push_comment(&format!("# timeLimit    : {}", request.time_limit))
            .push_comment("# typesOnly    : False")
            .push_comment(&format!("# filter       : {}", request.filter))
            .push_comment(&format!("# attributes   : {attributes}"));
        for control in request.effective_controls() {
            record.push_comment(&format!("# control      : {}", control.oid));
        }

        self.log(
            connection,
            &format!("SEARCH REQUEST ({request_num})"),
            &record.finish(),
            error,
        );
    }

    fn log_search_result_entry(
        &self,
        connection: &Connection,
        entry: &Entry,
        request_num: u64,
        error: Option<&ConnectionError>,
    ) {
        if !self.is_result_entry_log_enabled() {
            return;
        }

        let masked = self.masked.read().clone();
        let mut record = LdifRecord::new(&entry.dn);
        for attribute in &entry.attributes {
            record.push_values(
                &attribute.name,
                &attribute.values,
                masked.contains(&attribute.name.to_lowercase()),
            );
        }

        self.log(
            connection,
            &format!("SEARCH RESULT ENTRY ({request_num})"),
            &record.finish(),
            error,
        );
    }

    fn log_search_result_reference(
        &self,
        connection: &Connection,
        urls: &[String],
        request_num: u64,
        error: Option<&ConnectionError>,
    ) {
        if !self.is_result_entry_log_enabled() {
            return;
        }

        let mut record = LdifRecord::comments();
        record.push_comment(&format!("# reference : [{}]", urls.join(", ")));

        self.log(
            connection,
            &format!("SEARCH RESULT REFERENCE ({request_num})"),
            &record.finish(),
            error,
        );
    }

    fn log_search_result_done(
        &self,
        connection: &Connection,
        count: u64,
        request_num: u64,
        error: Option<&ConnectionError>,
    ) {
        if !self.is_request_log_enabled() {
            return;
        }

        let mut record = LdifRecord::comments();
        record.push_comment(&format!("# numEntries : {count}"));

        self.log(
            connection,
            &format!("SEARCH RESULT DONE ({request_num})"),
            &record.finish(),
            error,
        );
    }

    fn dispose(&self, connection: &Connection) {
        self.files.lock().dispose(connection.id());
    }
}
