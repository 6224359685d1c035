//! Client-held session cookies.

use std::collections::HashMap;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Active target for this browser.
pub const PROXY_TARGET: &str = "ProxyTarget";
/// Last validated target, kept for form prefill.
pub const LAST_TARGET: &str = "LastTarget";

/// Everything except RFC 3986 unreserved characters is encoded, so the
/// value never contains `;`, `,`, `=` or whitespace.
const COOKIE_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Parse a `Cookie` request header. Later duplicates win.
pub fn parse_cookie_header(header: &str) -> HashMap<String, String> {
    header
        .split(';')
        .filter_map(|part| part.trim().split_once('='))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect()
}

pub fn encode_value(value: &str) -> String {
    utf8_percent_encode(value, COOKIE_VALUE).to_string()
}

pub fn decode_value(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

/// `Set-Cookie` value for a session cookie carrying `value`.
pub fn session_cookie(name: &str, value: &str) -> String {
    format!("{}={}; Path=/; HttpOnly", name, encode_value(value))
}

/// `Set-Cookie` value that expires `name` immediately.
pub fn expired_cookie(name: &str) -> String {
    format!(
        "{}=deleted; Path=/; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=0; HttpOnly",
        name
    )
}

/// Both cookies written after a successful selection.
pub fn selection_cookies(submitted: &str) -> Vec<String> {
    vec![
        session_cookie(PROXY_TARGET, submitted),
        session_cookie(LAST_TARGET, submitted),
    ]
}
