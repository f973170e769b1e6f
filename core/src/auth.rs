//! Credentials attached to outgoing requests.
//!
//! The client treats a credential as an opaque capability: it calls
//! `apply` once on every request before it is sent and never inspects what
//! was attached.

use std::fmt;
use std::sync::Arc;

use crate::http::HttpRequest;

/// Attaches authentication to an outgoing request.
pub trait Credential {
    fn apply(&self, request: &mut HttpRequest);
}

impl<C: Credential + ?Sized> Credential for &C {
    fn apply(&self, request: &mut HttpRequest) {
        (**self).apply(request)
    }
}

impl<C: Credential + ?Sized> Credential for Arc<C> {
    fn apply(&self, request: &mut HttpRequest) {
        (**self).apply(request)
    }
}

/// Service token sent as `Authorization: Scope-Probe token=<token>`.
///
/// An empty token attaches nothing, which is how an unauthenticated
/// (local) instance is addressed.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn new(token: &str) -> Self {
        Self(token.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Credential for Token {
    fn apply(&self, request: &mut HttpRequest) {
        if !self.0.is_empty() {
            request.set_header("Authorization", &format!("Scope-Probe token={}", self.0));
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Token(<none>)")
        } else {
            f.write_str("Token(<redacted>)")
        }
    }
}
