//! Resource locator parsing.
//!
//! A deliberately small RFC 3986 splitter: enough to recover scheme, host,
//! port, path and query for policy checks. Anything it cannot split is
//! reported as malformed rather than guessed at.

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Schemes whose locators address a remote host.
pub const REMOTE_SCHEMES: &[&str] = &["http", "https", "ftp", "ws", "wss"];

/// Schemes that carry executable or inline content.
pub const SCRIPT_SCHEMES: &[&str] = &["javascript", "vbscript", "data"];

/// A split resource locator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    /// Lowercased scheme.
    pub scheme: String,
    /// Lowercased host, empty for host-less locators.
    pub host: String,
    /// Explicit port, if any.
    pub port: Option<u16>,
    /// Path component, not decoded.
    pub path: String,
    /// Query component without the `?`, not decoded.
    pub query: Option<String>,
}

impl Locator {
    /// Returns true if the scheme addresses a remote host.
    pub fn is_remote(&self) -> bool {
        REMOTE_SCHEMES.contains(&self.scheme.as_str())
    }

    /// Returns true if the scheme carries executable content.
    pub fn is_script(&self) -> bool {
        SCRIPT_SCHEMES.contains(&self.scheme.as_str())
    }

    /// Splits the query into `(name, value)` pairs, percent-decoded.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let Some(query) = &self.query else {
            return Vec::new();
        };
        query
            .split('&')
            .filter(|p| !p.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((k, v)) => (percent_decode(k), percent_decode(v)),
                None => (percent_decode(pair), String::new()),
            })
            .collect()
    }

    /// Returns true if `host` equals, or is a subdomain of, an allowed host.
    pub fn host_allowed(&self, allowed: &[String]) -> bool {
        allowed.iter().any(|a| {
            let a = a.to_ascii_lowercase();
            self.host == a || self.host.ends_with(&format!(".{}", a))
        })
    }
}

/// Why a locator could not be split.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocatorError {
    /// Empty input.
    #[error("empty locator")]
    Empty,
    /// Whitespace or control characters inside the locator.
    #[error("locator contains whitespace or control characters")]
    IllegalCharacter,
    /// No `scheme:` prefix.
    #[error("locator has no scheme")]
    MissingScheme,
    /// A remote scheme without a host.
    #[error("remote locator has no host")]
    MissingHost,
    /// Port is not a number in range.
    #[error("invalid port: {0}")]
    InvalidPort(String),
}

/// Compiled locator grammar.
#[derive(Debug, Clone)]
pub struct LocatorParser {
    grammar: Regex,
}

impl LocatorParser {
    /// Compiles the grammar.
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            grammar: Regex::new(
                r"^(?P<scheme>[A-Za-z][A-Za-z0-9+.\-]*):(?://(?P<authority>[^/?#]*))?(?P<path>[^?#]*)(?:\?(?P<query>[^#]*))?(?:#.*)?$",
            )?,
        })
    }

    /// Splits `uri`.
    pub fn parse(&self, uri: &str) -> Result<Locator, LocatorError> {
        if uri.is_empty() {
            return Err(LocatorError::Empty);
        }
        if uri.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(LocatorError::IllegalCharacter);
        }
        let caps = self.grammar.captures(uri).ok_or(LocatorError::MissingScheme)?;

        let scheme = caps["scheme"].to_ascii_lowercase();
        let authority = caps.name("authority").map(|m| m.as_str()).unwrap_or("");
        // Drop userinfo; `user:pass@host` must not smuggle a host past the check.
        let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
        let (host, port) = split_host_port(host_port)?;

        let locator = Locator {
            scheme,
            host: host.to_ascii_lowercase(),
            port,
            path: caps.name("path").map(|m| m.as_str().to_string()).unwrap_or_default(),
            query: caps.name("query").map(|m| m.as_str().to_string()),
        };
        if locator.is_remote() && locator.host.is_empty() {
            return Err(LocatorError::MissingHost);
        }
        Ok(locator)
    }
}

fn split_host_port(host_port: &str) -> Result<(&str, Option<u16>), LocatorError> {
    // Bracketed IPv6 literal.
    if let Some(rest) = host_port.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or(LocatorError::MissingHost)?;
        let port = match tail.strip_prefix(':') {
            Some(p) => Some(parse_port(p)?),
            None => None,
        };
        return Ok((host, port));
    }
    match host_port.rsplit_once(':') {
        Some((host, p)) => Ok((host, Some(parse_port(p)?))),
        None => Ok((host_port, None)),
    }
}

fn parse_port(p: &str) -> Result<u16, LocatorError> {
    p.parse::<u16>()
        .map_err(|_| LocatorError::InvalidPort(p.to_string()))
}

/// Decodes `%XX` escapes and `+`. Invalid escapes are kept verbatim.
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi << 4) | lo);
                        i += 3;
                        continue;
                    }
                    _ => out.push(b'%'),
                }
            }
            b'+' => out.push(b' '),
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> LocatorParser {
        LocatorParser::new().unwrap()
    }

    #[test]
    fn test_parse_https() {
        let loc = parser()
            .parse("https://User:pw@Docs.Example.com:8443/a/b?q=1&x=%3Cy%3E#frag")
            .unwrap();
        assert_eq!(loc.scheme, "https");
        assert_eq!(loc.host, "docs.example.com");
        assert_eq!(loc.port, Some(8443));
        assert_eq!(loc.path, "/a/b");
        assert_eq!(
            loc.query_pairs(),
            vec![("q".to_string(), "1".to_string()), ("x".to_string(), "<y>".to_string())]
        );
    }

    #[test]
    fn test_parse_file_locator_has_no_host() {
        let loc = parser().parse("file:///docs/readme.md").unwrap();
        assert_eq!(loc.scheme, "file");
        assert!(loc.host.is_empty());
        assert_eq!(loc.path, "/docs/readme.md");
        assert!(!loc.is_remote());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parser().parse(""), Err(LocatorError::Empty));
        assert_eq!(parser().parse("no scheme here"), Err(LocatorError::IllegalCharacter));
        assert_eq!(parser().parse("/just/a/path"), Err(LocatorError::MissingScheme));
        assert_eq!(parser().parse("https:///path"), Err(LocatorError::MissingHost));
        assert!(matches!(
            parser().parse("http://host:99999/"),
            Err(LocatorError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_host_allowed_matches_subdomains() {
        let loc = parser().parse("https://api.docs.rs/crate").unwrap();
        assert!(loc.host_allowed(&["docs.rs".to_string()]));
        assert!(!loc.host_allowed(&["example.com".to_string()]));

        let lookalike = parser().parse("https://evildocs.rs/").unwrap();
        assert!(!lookalike.host_allowed(&["docs.rs".to_string()]));
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("%3Cscript%3E"), "<script>");
        assert_eq!(percent_decode("a+b"), "a b");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
    }
}
