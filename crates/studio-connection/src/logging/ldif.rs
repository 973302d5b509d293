//! LDIF rendering
//!
//! RFC 2849 lines for the audit logs: values that are not safe strings are
//! base64 encoded, long lines are folded at 76 columns.

use base64::Engine;

use crate::operation::{AttributeValue, Control};

/// Column at which value lines are folded.
pub const LINE_WIDTH: usize = 76;

/// Replacement for values of masked attributes.
pub const MASKED_VALUE: &str = "**********";

/// Whether `value` can be written without base64 encoding.
pub fn is_safe_string(value: &str) -> bool {
    let bytes = value.as_bytes();
    let Some(first) = bytes.first() else {
        return true;
    };
    if matches!(first, b' ' | b':' | b'<') {
        return false;
    }
    if bytes.last() == Some(&b' ') {
        return false;
    }
    bytes
        .iter()
        .all(|b| *b != 0 && *b != b'\n' && *b != b'\r' && b.is_ascii())
}

fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// `name: value` or `name:: base64`.
pub fn attr_val_line(name: &str, value: &AttributeValue) -> String {
    match value {
        AttributeValue::Text(text) if is_safe_string(text) => {
            if text.is_empty() {
                format!("{name}:")
            } else {
                format!("{name}: {text}")
            }
        }
        other => format!("{name}:: {}", encode_base64(other.as_bytes())),
    }
}

/// `control: oid criticality[:: base64]`.
pub fn control_line(control: &Control) -> String {
    let mut line = format!("control: {} {}", control.oid, control.critical);
    if let Some(value) = &control.value {
        line.push_str(":: ");
        line.push_str(&encode_base64(value));
    }
    line
}

/// Fold a line at [`LINE_WIDTH`], continuation lines start with a space.
pub fn fold(line: &str) -> String {
    if line.len() <= LINE_WIDTH {
        return line.to_string();
    }

    let mut out = String::with_capacity(line.len() + line.len() / LINE_WIDTH * 2);
    let mut width = 0;
    let mut limit = LINE_WIDTH;
    for c in line.chars() {
        let len = c.len_utf8();
        if width + len > limit {
            out.push_str("\n ");
            width = 0;
            // the leading space counts towards the width
            limit = LINE_WIDTH - 1;
        }
        out.push(c);
        width += len;
    }
    out
}

/// One LDIF record under construction.
#[derive(Debug, Default, Clone)]
pub struct LdifRecord {
    lines: Vec<String>,
}

impl LdifRecord {
    /// Start a record with its `dn:` line.
    pub fn new(dn: &str) -> Self {
        let mut record = Self::default();
        record.push_attr_val("dn", &AttributeValue::Text(dn.to_string()));
        record
    }

    /// Start a record of comment lines only.
    pub fn comments() -> Self {
        Self::default()
    }

    /// Append a comment line; a leading `#` is added when missing and line
    /// breaks are replaced with spaces.
    pub fn push_comment(&mut self, comment: &str) -> &mut Self {
        let single = single_line(comment);
        if single.starts_with('#') {
            self.lines.push(single);
        } else {
            self.lines.push(format!("# {single}"));
        }
        self
    }

    /// Append `control:` lines.
    pub fn push_controls(&mut self, controls: &[Control]) -> &mut Self {
        for control in controls {
            self.lines.push(fold(&control_line(control)));
        }
        self
    }

    /// Append a `changetype:` line.
    pub fn push_changetype(&mut self, changetype: &str) -> &mut Self {
        self.lines.push(format!("changetype: {changetype}"));
        self
    }

    /// Append an attribute value line.
    pub fn push_attr_val(&mut self, name: &str, value: &AttributeValue) -> &mut Self {
        self.lines.push(fold(&attr_val_line(name, value)));
        self
    }

    /// Append the values of an attribute, masking them if requested.
    pub fn push_values<'a>(
        &mut self,
        name: &str,
        values: impl IntoIterator<Item = &'a AttributeValue>,
        masked: bool,
    ) -> &mut Self {
        for value in values {
            if masked {
                self.lines.push(format!("{name}: {MASKED_VALUE}"));
            } else {
                self.push_attr_val(name, value);
            }
        }
        self
    }

    /// Append a raw line.
    pub fn push_line(&mut self, line: impl Into<String>) -> &mut Self {
        self.lines.push(line.into());
        self
    }

    /// Render the record followed by an empty separator line.
    pub fn finish(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

/// Render a comment line, replacing line breaks with spaces.
pub fn comment_line(comment: &str) -> String {
    format!("{}\n", single_line(comment))
}

fn single_line(comment: &str) -> String {
    comment.replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_strings() {
        assert!(is_safe_string("John Doe"));
        assert!(is_safe_string(""));
        assert!(!is_safe_string(" leading"));
        assert!(!is_safe_string(":colon"));
        assert!(!is_safe_string("<less"));
        assert!(!is_safe_string("trailing "));
        assert!(!is_safe_string("line\nbreak"));
        assert!(!is_safe_string("Müller"));
    }

    #[test]
    fn test_attr_val_line() {
        assert_eq!(attr_val_line("cn", &"John".into()), "cn: John");
        assert_eq!(attr_val_line("cn", &"Müller".into()), "cn:: TcO8bGxlcg==");
        assert_eq!(
            attr_val_line("jpegPhoto", &AttributeValue::Binary(vec![0, 1, 2])),
            "jpegPhoto:: AAEC"
        );
        assert_eq!(attr_val_line("description", &"".into()), "description:");
    }

    #[test]
    fn test_control_line() {
        let control = Control::manage_dsa_it();
        assert_eq!(
            control_line(&control),
            "control: 2.16.840.1.113730.3.4.2 false"
        );
        let control = Control::new("1.2.3").critical().with_value(vec![1u8]);
        assert_eq!(control_line(&control), "control: 1.2.3 true:: AQ==");
    }

    #[test]
    fn test_fold_long_line() {
        let value = "x".repeat(200);
        let folded = fold(&format!("description: {value}"));
        let lines: Vec<&str> = folded.split('\n').collect();
        assert!(lines.len() > 1);
        assert_eq!(lines[0].len(), LINE_WIDTH);
        for continuation in &lines[1..] {
            assert!(continuation.starts_with(' '));
            assert!(continuation.len() <= LINE_WIDTH);
        }
        let unfolded: String = folded.replace("\n ", "");
        assert_eq!(unfolded, format!("description: {value}"));
    }

    #[test]
    fn test_record_finish() {
        let mut record = LdifRecord::new("cn=a,dc=example");
        record
            .push_changetype("add")
            .push_values("cn", [&AttributeValue::from("a")], false)
            .push_values("userPassword", [&AttributeValue::from("secret")], true);
        assert_eq!(
            record.finish(),
            "dn: cn=a,dc=example\nchangetype: add\ncn: a\nuserPassword: **********\n\n"
        );
    }

    #[test]
    fn test_comment_line_strips_breaks() {
        assert_eq!(comment_line("#!ERROR a\r\nb"), "#!ERROR a  b\n");
    }

    #[test]
    fn test_push_comment_keeps_one_line() {
        let mut record = LdifRecord::comments();
        record
            .push_comment("# filter       : (cn=a)\n(cn=b)")
            .push_comment("numEntries : 1");
        assert_eq!(
            record.finish(),
            "# filter       : (cn=a) (cn=b)\n# numEntries : 1\n\n"
        );
    }
}
