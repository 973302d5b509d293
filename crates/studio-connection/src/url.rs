//! LDAP URLs
//!
//! Parsing and rendering of `ldap[s]://host:port/dn?attributes?scope?filter?extensions`
//! URLs as carried by referrals and search continuation references.

use std::fmt;
use url::{Host, Url};

use crate::error::{ConnectionError, ConnectionResult};
use crate::types::SearchScope;

/// A parsed LDAP URL. Components are stored percent-decoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LdapUrl {
    /// `ldaps` scheme.
    pub secure: bool,
    /// Host, empty when the URL leaves it to the client.
    pub host: String,
    /// Explicit port.
    pub port: Option<u16>,
    /// Distinguished name, empty when absent.
    pub dn: String,
    /// Requested attributes, empty when absent.
    pub attributes: Vec<String>,
    /// Scope, `None` when unspecified.
    pub scope: Option<SearchScope>,
    /// Filter, `None` when absent.
    pub filter: Option<String>,
    /// Extensions, kept verbatim.
    pub extensions: Vec<String>,
}

impl LdapUrl {
    /// Create a URL for a server with no DN.
    pub fn new(host: impl Into<String>, port: u16, secure: bool) -> Self {
        Self {
            secure,
            host: host.into(),
            port: Some(port),
            dn: String::new(),
            attributes: Vec::new(),
            scope: None,
            filter: None,
            extensions: Vec::new(),
        }
    }

    /// Parse an LDAP URL.
    ///
    /// The generic URL syntax is parsed by [`url::Url`]; the DN and the
    /// `?`-separated components are split and percent-decoded here.
    pub fn parse(input: &str) -> ConnectionResult<Self> {
        let invalid = |message: &str| ConnectionError::InvalidLdapUrl {
            url: input.to_string(),
            message: message.to_string(),
        };

        let parsed = Url::parse(input.trim()).map_err(|e| invalid(&e.to_string()))?;
        let secure = match parsed.scheme() {
            "ldaps" => true,
            "ldap" => false,
            _ => return Err(invalid("scheme must be ldap:// or ldaps://")),
        };
        if !parsed.has_authority() {
            return Err(invalid("scheme must be ldap:// or ldaps://"));
        }
        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(invalid("user information is not allowed"));
        }
        if parsed.fragment().is_some() {
            return Err(invalid("fragment is not allowed"));
        }

        let host = match parsed.host() {
            Some(Host::Domain(domain)) => decode(domain).map_err(|m| invalid(&m))?,
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => String::new(),
        };
        let port = match parsed.port() {
            Some(0) => return Err(invalid("invalid port '0'")),
            port => port,
        };

        let mut url = Self {
            secure,
            host,
            port,
            dn: String::new(),
            attributes: Vec::new(),
            scope: None,
            filter: None,
            extensions: Vec::new(),
        };

        let path = parsed.path();
        let query = parsed.query();
        if path.is_empty() {
            if query.is_some() {
                return Err(invalid("search components require a '/' before them"));
            }
            return Ok(url);
        }

        let dn = path.strip_prefix('/').unwrap_or(path);
        url.dn = decode(dn).map_err(|m| invalid(&m))?;

        let Some(query) = query else {
            return Ok(url);
        };
        let mut parts = query.splitn(4, '?');
        if let Some(attributes) = parts.next() {
            url.attributes = decode_list(attributes).map_err(|m| invalid(&m))?;
        }
        if let Some(scope) = parts.next() {
            if !scope.is_empty() {
                url.scope = Some(
                    scope
                        .parse::<SearchScope>()
                        .map_err(|e| invalid(&e.to_string()))?,
                );
            }
        }
        if let Some(filter) = parts.next() {
            if !filter.is_empty() {
                url.filter = Some(decode(filter).map_err(|m| invalid(&m))?);
            }
        }
        if let Some(extensions) = parts.next() {
            url.extensions = decode_list(extensions).map_err(|m| invalid(&m))?;
        }

        Ok(url)
    }

    /// Explicit port, or the scheme default.
    #[must_use]
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(if self.secure { 636 } else { 389 })
    }

    /// Whether the URL carries a DN.
    #[must_use]
    pub fn has_dn(&self) -> bool {
        !self.dn.is_empty()
    }

    /// Set the DN, returning the URL.
    #[must_use]
    pub fn with_dn(mut self, dn: impl Into<String>) -> Self {
        self.dn = dn.into();
        self
    }

    /// Set the scope, returning the URL.
    #[must_use]
    pub fn with_scope(mut self, scope: SearchScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Set the filter, returning the URL.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Set the attributes, returning the URL.
    #[must_use]
    pub fn with_attributes(mut self, attributes: Vec<String>) -> Self {
        self.attributes = attributes;
        self
    }
}

impl fmt::Display for LdapUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", if self.secure { "ldaps" } else { "ldap" })?;
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            write!(f, "{}", self.host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        write!(f, "/{}", encode(&self.dn))?;

        // Trailing empty components are dropped.
        let components = [
            self.attributes
                .iter()
                .map(|a| encode(a))
                .collect::<Vec<_>>()
                .join(","),
            self.scope
                .map(|s| s.as_url_str().to_string())
                .unwrap_or_default(),
            self.filter.as_deref().map(encode).unwrap_or_default(),
            self.extensions
                .iter()
                .map(|e| encode(e))
                .collect::<Vec<_>>()
                .join(","),
        ];
        let used = components
            .iter()
            .rposition(|c| !c.is_empty())
            .map_or(0, |idx| idx + 1);
        for component in &components[..used] {
            write!(f, "?{component}")?;
        }
        Ok(())
    }
}

fn decode(component: &str) -> Result<String, String> {
    urlencoding::decode(component)
        .map(|c| c.into_owned())
        .map_err(|e| format!("invalid percent-encoding: {e}"))
}

fn decode_list(component: &str) -> Result<Vec<String>, String> {
    component
        .split(',')
        .filter(|c| !c.is_empty())
        .map(decode)
        .collect()
}

fn encode(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    for c in component.chars() {
        if c.is_ascii_alphanumeric() || "=,+-._~*()!$&';:@".contains(c) {
            out.push(c);
        } else {
            let mut buf = [0u8; 4];
            out.push_str(&urlencoding::encode(c.encode_utf8(&mut buf)));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_url() {
        let url =
            LdapUrl::parse("ldap://ldap.example.com:1389/ou=people,dc=example,dc=com?cn,mail?one?(uid=jdoe)")
                .unwrap();
        assert!(!url.secure);
        assert_eq!(url.host, "ldap.example.com");
        assert_eq!(url.port, Some(1389));
        assert_eq!(url.dn, "ou=people,dc=example,dc=com");
        assert_eq!(url.attributes, vec!["cn", "mail"]);
        assert_eq!(url.scope, Some(SearchScope::OneLevel));
        assert_eq!(url.filter.as_deref(), Some("(uid=jdoe)"));
    }

    #[test]
    fn test_parse_minimal_url() {
        let url = LdapUrl::parse("ldaps://directory").unwrap();
        assert!(url.secure);
        assert_eq!(url.host, "directory");
        assert_eq!(url.port, None);
        assert_eq!(url.port_or_default(), 636);
        assert!(!url.has_dn());
        assert!(url.scope.is_none());
        assert!(url.filter.is_none());
    }

    #[test]
    fn test_parse_percent_encoded_dn() {
        let url = LdapUrl::parse("ldap://host/cn=John%20Doe,dc=example??base?(objectClass%3D*)")
            .unwrap();
        assert_eq!(url.dn, "cn=John Doe,dc=example");
        assert!(url.attributes.is_empty());
        assert_eq!(url.scope, Some(SearchScope::Object));
        assert_eq!(url.filter.as_deref(), Some("(objectClass=*)"));
    }

    #[test]
    fn test_parse_ipv6_host() {
        let url = LdapUrl::parse("ldap://[::1]:10389/dc=example").unwrap();
        assert_eq!(url.host, "::1");
        assert_eq!(url.port, Some(10389));
        assert_eq!(url.to_string(), "ldap://[::1]:10389/dc=example");
    }

    #[test]
    fn test_parse_errors() {
        assert!(LdapUrl::parse("http://host/dc=example").is_err());
        assert!(LdapUrl::parse("ldap://host:notaport/").is_err());
        assert!(LdapUrl::parse("ldap://host/dc=example??children").is_err());
        assert!(LdapUrl::parse("ldap://host?cn").is_err());
        assert!(LdapUrl::parse("ldap://user@host/dc=example").is_err());
        assert!(LdapUrl::parse("ldap:dc=example").is_err());
    }

    #[test]
    fn test_parse_host_without_path() {
        let url = LdapUrl::parse("ldap://host:1389").unwrap();
        assert_eq!(url.host, "host");
        assert_eq!(url.port, Some(1389));
        assert!(!url.has_dn());

        let url = LdapUrl::parse("ldap://192.0.2.1/dc=example?cn").unwrap();
        assert_eq!(url.host, "192.0.2.1");
        assert_eq!(url.attributes, vec!["cn"]);
    }

    #[test]
    fn test_display_drops_trailing_empty_components() {
        let url = LdapUrl::new("host", 389, false).with_dn("dc=example,dc=com");
        assert_eq!(url.to_string(), "ldap://host:389/dc=example,dc=com");

        let url = url.with_filter("(cn=a b)");
        assert_eq!(
            url.to_string(),
            "ldap://host:389/dc=example,dc=com???(cn=a%20b)"
        );
    }

    #[test]
    fn test_display_parses_back() {
        let url = LdapUrl::new("host", 10389, true)
            .with_dn("ou=a?b,dc=example")
            .with_scope(SearchScope::Subtree)
            .with_attributes(vec!["cn".to_string()]);
        let parsed = LdapUrl::parse(&url.to_string()).unwrap();
        assert_eq!(parsed, url);
    }
}
