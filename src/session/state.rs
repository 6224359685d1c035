//! Per-request session state.
//!
//! Every request resolves to exactly one [`SessionState`]. Transitions are
//! evaluated in a fixed order and the first match wins:
//!
//! ```text
//! 1. path == /reset                         → Reset
//! 2. POST carrying a target                 → NewSelectionViaPost | InvalidSubmission
//! 3. GET/HEAD carrying ?target=             → NewSelectionViaQuery | InvalidSubmission
//! 4. ProxyTarget cookie that validates      → ActiveSession
//! 5. anything else                          → NoSelection
//! ```

use std::collections::HashMap;

use crate::http::IncomingRequest;
use crate::session::cookies::{self, LAST_TARGET, PROXY_TARGET};
use crate::session::paths::selection_value;
use crate::session::target::{validate, Target};

/// Path that clears the active target.
pub const RESET_PATH: &str = "/reset";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Where a request stands with respect to target selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Expire `ProxyTarget`, keep `LastTarget`, show the form.
    Reset { prefill: Option<String> },

    /// A POST selected a valid target: set cookies and redirect.
    NewSelectionViaPost { target: Target },

    /// A GET/HEAD selected a valid target via the query: forward at once.
    NewSelectionViaQuery { target: Target },

    /// A submitted target failed validation.
    InvalidSubmission { candidate: String },

    /// A valid `ProxyTarget` cookie names the target.
    ActiveSession { target: Target },

    /// Nothing selected. `stale_cookie` is set when a `ProxyTarget` cookie
    /// was present but did not validate, so it can be expired.
    NoSelection {
        prefill: Option<String>,
        stale_cookie: bool,
    },
}

impl SessionState {
    /// Short name for logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Reset { .. } => "reset",
            SessionState::NewSelectionViaPost { .. } => "select_post",
            SessionState::NewSelectionViaQuery { .. } => "select_query",
            SessionState::InvalidSubmission { .. } => "invalid_submission",
            SessionState::ActiveSession { .. } => "active",
            SessionState::NoSelection { .. } => "no_selection",
        }
    }
}

/// Cookies and submission extracted from a request.
struct Inputs {
    cookies: HashMap<String, String>,
    submitted: Option<String>,
}

impl Inputs {
    fn from_request(request: &IncomingRequest) -> Self {
        let cookies = request
            .headers
            .get("Cookie")
            .map(cookies::parse_cookie_header)
            .unwrap_or_default();

        let from_query = request
            .query()
            .and_then(|query| selection_value(query.as_bytes()));

        let submitted = if request.method == "POST" {
            form_submission(request).or(from_query)
        } else {
            from_query
        };

        Self { cookies, submitted }
    }

    fn prefill(&self) -> Option<String> {
        self.cookies
            .get(LAST_TARGET)
            .map(|value| cookies::decode_value(value))
            .filter(|value| !value.is_empty())
    }
}

fn form_submission(request: &IncomingRequest) -> Option<String> {
    let body = request.body.as_deref()?;
    let is_form = request
        .headers
        .get("Content-Type")
        .map(|ct| ct.to_ascii_lowercase().starts_with(FORM_CONTENT_TYPE))
        .unwrap_or(false);
    if !is_form {
        return None;
    }
    selection_value(body)
}

/// Resolve the session state for a request.
pub fn resolve(request: &IncomingRequest) -> SessionState {
    let inputs = Inputs::from_request(request);

    if request.path() == RESET_PATH {
        return SessionState::Reset {
            prefill: inputs.prefill(),
        };
    }

    if let Some(candidate) = inputs.submitted.as_deref() {
        return match validate(candidate) {
            Some(target) if request.method == "POST" => {
                SessionState::NewSelectionViaPost { target }
            }
            Some(target) => SessionState::NewSelectionViaQuery { target },
            None => SessionState::InvalidSubmission {
                candidate: candidate.to_string(),
            },
        };
    }

    let cookie = inputs.cookies.get(PROXY_TARGET);
    if let Some(target) = cookie.and_then(|value| validate(&cookies::decode_value(value))) {
        return SessionState::ActiveSession { target };
    }

    SessionState::NoSelection {
        prefill: inputs.prefill(),
        stale_cookie: cookie.is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Headers;

    fn request(method: &str, target: &str, headers: &[(&str, &str)], body: Option<&str>) -> IncomingRequest {
        IncomingRequest {
            method: method.to_string(),
            target: target.to_string(),
            version: "HTTP/1.1".to_string(),
            headers: headers.iter().copied().collect::<Headers>(),
            body: body.map(|b| b.as_bytes().to_vec()),
        }
    }

    const FORM: (&str, &str) = ("Content-Type", "application/x-www-form-urlencoded");
    const ACTIVE: (&str, &str) = ("Cookie", "ProxyTarget=http%3A%2F%2Fexample.com%2Ffoo; LastTarget=http%3A%2F%2Fold");

    #[test]
    fn reset_wins_over_everything() {
        let state = resolve(&request("POST", "/reset", &[FORM, ACTIVE], Some("target=http://x")));
        assert_eq!(
            state,
            SessionState::Reset {
                prefill: Some("http://old".into())
            }
        );
    }

    #[test]
    fn post_submission_selects() {
        let state = resolve(&request("POST", "/", &[FORM], Some("target=http%3A%2F%2F10.0.0.5%3A8080")));
        match state {
            SessionState::NewSelectionViaPost { target } => {
                assert_eq!(target.as_submitted(), "http://10.0.0.5:8080")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn post_body_requires_form_content_type() {
        let state = resolve(&request("POST", "/", &[("Content-Type", "text/plain")], Some("target=http://x")));
        assert!(matches!(state, SessionState::NoSelection { .. }));
    }

    #[test]
    fn post_falls_back_to_query_submission() {
        let state = resolve(&request("POST", "/?target=http://a.example", &[], None));
        assert!(matches!(state, SessionState::NewSelectionViaPost { .. }));
    }

    #[test]
    fn invalid_submission_beats_valid_cookie() {
        let state = resolve(&request("POST", "/", &[FORM, ACTIVE], Some("target=ftp://nope")));
        assert_eq!(
            state,
            SessionState::InvalidSubmission {
                candidate: "ftp://nope".into()
            }
        );
    }

    #[test]
    fn get_query_submission_selects() {
        let state = resolve(&request("GET", "/?target=http%3A%2F%2Fcam%2Fview", &[ACTIVE], None));
        match state {
            SessionState::NewSelectionViaQuery { target } => assert_eq!(target.path(), "/view"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn empty_submission_is_ignored() {
        let state = resolve(&request("GET", "/?target=", &[ACTIVE], None));
        assert!(matches!(state, SessionState::ActiveSession { .. }));
    }

    #[test]
    fn valid_cookie_is_active_session() {
        let state = resolve(&request("GET", "/bar", &[ACTIVE], None));
        match state {
            SessionState::ActiveSession { target } => {
                assert_eq!(target.authority(), "example.com");
                assert_eq!(target.path(), "/foo");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn corrupted_cookie_falls_back_to_form() {
        let state = resolve(&request(
            "GET",
            "/",
            &[("Cookie", "ProxyTarget=garbage; LastTarget=http%3A%2F%2Flast")],
            None,
        ));
        assert_eq!(
            state,
            SessionState::NoSelection {
                prefill: Some("http://last".into()),
                stale_cookie: true
            }
        );
    }

    #[test]
    fn fresh_client_gets_form() {
        assert_eq!(
            resolve(&request("GET", "/", &[], None)),
            SessionState::NoSelection {
                prefill: None,
                stale_cookie: false
            }
        );
    }
}
