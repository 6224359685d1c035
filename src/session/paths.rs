//! Upstream path construction.
//!
//! The target's path is always a directory prefix: a requested path is
//! appended to it, and `/` maps to the target path itself.

use url::form_urlencoded;

use crate::session::target::Target;

/// Query key used to submit a target; never forwarded upstream.
pub const SELECTION_PARAM: &str = "target";

/// Join a target base path with a requested path.
pub fn combine_paths(base: &str, requested: &str) -> String {
    let base = if base.is_empty() { "/" } else { base };
    let requested = if requested.is_empty() { "/" } else { requested };

    let combined = if requested == "/" {
        base.to_string()
    } else if base == "/" {
        requested.to_string()
    } else {
        let requested = requested.trim_start_matches('/');
        format!("{}/{}", base.trim_end_matches('/'), requested)
    };

    if combined.starts_with('/') {
        combined
    } else {
        format!("/{}", combined)
    }
}

/// Drop every `target` pair from a raw query and re-encode the rest in
/// order. `None` when nothing remains.
pub fn strip_selection_param(query: &str) -> Option<String> {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    let mut kept = 0usize;
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        if key == SELECTION_PARAM {
            continue;
        }
        serializer.append_pair(&key, &value);
        kept += 1;
    }
    (kept > 0).then(|| serializer.finish())
}

/// First non-empty `target` value in a urlencoded string.
pub fn selection_value(encoded: &[u8]) -> Option<String> {
    form_urlencoded::parse(encoded)
        .find(|(key, _)| key == SELECTION_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Build the upstream path and query for a forwarded request.
///
/// `requested` is `None` when the request itself selected the target, in
/// which case the target's own path is fetched.
pub fn upstream_path(target: &Target, requested: Option<&str>, query: Option<&str>) -> String {
    let mut path = match requested {
        Some(requested) => combine_paths(target.path(), requested),
        None => combine_paths(target.path(), "/"),
    };

    let forwarded = query.and_then(strip_selection_param);
    let parts: Vec<&str> = target.query().into_iter().chain(forwarded.as_deref()).collect();
    if !parts.is_empty() {
        path.push('?');
        path.push_str(&parts.join("&"));
    }
    path
}

/// Whether the path (query ignored) names a continuous stream.
pub fn is_stream_path(path_and_query: &str, suffixes: &[String]) -> bool {
    let path = path_and_query
        .split_once('?')
        .map_or(path_and_query, |(path, _)| path)
        .to_ascii_lowercase();
    suffixes
        .iter()
        .any(|suffix| path.ends_with(&suffix.to_ascii_lowercase()))
}
