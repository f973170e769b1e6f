//! Synchronous, route-based client for the deployment API.
//!
//! # Overview
//! Turns a named operation plus parameters into an authenticated HTTP
//! request, sends it through a pluggable `Transport`, and decodes the reply
//! into a typed value or a structured `ClientError`.
//!
//! # Design
//! - `RouteTable` maps operation names to path templates and resolves them
//!   against the configured endpoint. It is injected, never global.
//! - `Client` funnels every operation through three primitives (`get`,
//!   `post_with_response`, `post`) and one status classifier (`execute`).
//! - Authentication is an opaque `Credential` applied once per request.
//! - DTOs are defined independently from the mock-server crate; integration
//!   tests catch schema drift.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod routes;
pub mod types;

pub use auth::{Credential, Token};
pub use client::Client;
pub use config::{ClientConfig, ConfigError};
pub use error::{ApiError, ClientError, RouteError, TransportError};
pub use http::{HttpMethod, HttpRequest, HttpResponse, ResponseBody, Transport, UreqTransport};
pub use routes::{QueryParams, Route, RouteTable};
pub use types::{
    Container, FluxdStatus, GitConfig, GitStatus, HistoryEntry, ImageDescription, ImageStatus,
    InstanceConfig, Job, JobId, PostReleaseResponse, ReleaseJobParams, ReleaseKind, ServiceId,
    ServiceStatus, SlackConfig, Status,
};
