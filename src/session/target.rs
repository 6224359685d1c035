//! Target validation.
//!
//! A [`Target`] is only ever produced by [`validate`]; there is no public
//! constructor, so every target in the system has passed the same checks
//! whether it came from a form or a cookie.

use std::fmt;
use url::{Host, Url};

/// Upstream scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated upstream endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    scheme: Scheme,
    host: String,
    port: u16,
    authority: String,
    path: String,
    query: Option<String>,
    raw: String,
}

impl Target {
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Host suitable for connecting (IPv6 without brackets).
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host[:port]` as it should appear in a `Host` header.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Base path of the target, always starting with `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// The candidate string exactly as submitted.
    pub fn as_submitted(&self) -> &str {
        &self.raw
    }

    /// Absolute URL for `path_and_query` on this target.
    pub fn url_for(&self, path_and_query: &str) -> String {
        format!("{}://{}{}", self.scheme, self.authority, path_and_query)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.authority, self.path)
    }
}

/// The candidate must literally read `<scheme>://<authority>` with a
/// non-empty authority; lenient URL parsing would otherwise repair
/// `http:host` or `http:///host` into something valid.
fn has_literal_authority(candidate: &str) -> bool {
    let Some((scheme, rest)) = candidate.split_once("://") else {
        return false;
    };
    if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
        return false;
    }
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    !rest[..authority_end].is_empty()
}

/// Validate a candidate URL into a [`Target`].
pub fn validate(candidate: &str) -> Option<Target> {
    if !has_literal_authority(candidate) {
        return None;
    }

    let url = Url::parse(candidate).ok()?;
    let scheme = match url.scheme() {
        "http" => Scheme::Http,
        "https" => Scheme::Https,
        _ => return None,
    };

    let host = match url.host()? {
        Host::Domain(domain) if domain.is_empty() => return None,
        Host::Domain(domain) => domain.to_string(),
        Host::Ipv4(addr) => addr.to_string(),
        Host::Ipv6(addr) => addr.to_string(),
    };
    let host_str = url.host_str()?;
    let authority = match url.port() {
        Some(port) => format!("{}:{}", host_str, port),
        None => host_str.to_string(),
    };
    let path = match url.path() {
        "" => "/".to_string(),
        path => path.to_string(),
    };

    Some(Target {
        scheme,
        port: url.port().unwrap_or_else(|| scheme.default_port()),
        host,
        authority,
        path,
        query: url.query().filter(|q| !q.is_empty()).map(str::to_string),
        raw: candidate.to_string(),
    })
}
