//! Error types for the deployment API client.
//!
//! # Design
//! Every failure surfaced by `Client` is a `ClientError` whose `Display` names
//! the phase that failed (URL construction, encoding, execution, decoding) and
//! whose `source()` is the underlying cause. A non-200 reply is an `ApiError`
//! carrying exactly what the server sent, so callers can branch on the status
//! code without string matching.

use std::error::Error as StdError;
use std::fmt::{self, Write as _};

use thiserror::Error;

/// A route could not be turned into a URL. Always a caller mistake.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("no route named {0:?}")]
    UnknownRoute(String),

    #[error("query parameters must come in key/value pairs, got {0} values")]
    OddParameters(usize),

    #[error("route {route} needs a value for path parameter {placeholder:?}")]
    MissingPathParameter { route: String, placeholder: String },

    #[error("invalid endpoint URL")]
    InvalidEndpoint(#[from] url::ParseError),

    #[error("endpoint {0:?} cannot be used as a base URL")]
    EndpointCannotBeBase(String),
}

/// The transport could not complete the exchange (connect, DNS, timeout, ...).
#[derive(Debug)]
pub struct TransportError(Box<dyn StdError + Send + Sync>);

impl TransportError {
    pub fn new<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self(err.into())
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

/// The server answered with a status other than 200 OK.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status_code} {status}: {body}")]
pub struct ApiError {
    pub status_code: u16,
    /// Reason phrase, e.g. `Not Found`. See `HttpResponse::status_text`.
    pub status: String,
    /// Response body with surrounding whitespace trimmed.
    pub body: String,
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        self.status_code == 404
    }
}

/// Errors returned by `Client` operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("constructing URL")]
    Route(#[source] RouteError),

    #[error("encoding request body")]
    Encode(#[source] serde_json::Error),

    #[error("executing HTTP request")]
    Transport(#[source] TransportError),

    #[error("executing HTTP request")]
    Api(#[source] ApiError),

    /// Also covers I/O failures while reading the body.
    #[error("decoding response from server")]
    Decode(#[source] serde_json::Error),
}

impl ClientError {
    /// The server's rejection, if this error carries one.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            ClientError::Api(err) => Some(err),
            _ => None,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        self.api_error().map(|err| err.status_code)
    }

    /// The phase context followed by every cause, joined with `": "`.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut cause = self.source();
        while let Some(err) = cause {
            let _ = write!(out, ": {err}");
            cause = err.source();
        }
        out
    }
}

impl From<RouteError> for ClientError {
    fn from(err: RouteError) -> Self {
        ClientError::Route(err)
    }
}

impl From<ApiError> for ClientError {
    fn from(err: ApiError) -> Self {
        ClientError::Api(err)
    }
}
