//! Wire DTOs for the deployment API.
//!
//! # Design
//! These types mirror the mock-server's schema but are defined independently;
//! the integration tests catch any drift between the two crates. Field names
//! follow the service's JSON (PascalCase for status records, snake_case for
//! release bookkeeping). Status records also accept lowercase keys, since
//! servers in the wild emit both.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Service spec that selects every service.
pub const SERVICE_SPEC_ALL: &str = "<all>";
/// Image spec that releases the newest image for each container.
pub const IMAGE_SPEC_LATEST: &str = "<all latest>";

/// Namespaced service identifier, e.g. `default/helloworld`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(pub String);

impl ServiceId {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self(format!("{namespace}/{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a queued release job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageDescription {
    #[serde(rename = "ID", alias = "id")]
    pub id: String,
    #[serde(default, alias = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Container {
    #[serde(alias = "name")]
    pub name: String,
    #[serde(alias = "current")]
    pub current: ImageDescription,
    #[serde(default, alias = "available")]
    pub available: Vec<ImageDescription>,
}

/// A running service as reported by `ListServices`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceStatus {
    #[serde(rename = "ID", alias = "id")]
    pub id: ServiceId,
    #[serde(default, alias = "containers")]
    pub containers: Vec<Container>,
    #[serde(default, alias = "status")]
    pub status: String,
    #[serde(default, alias = "automated")]
    pub automated: bool,
    #[serde(default, alias = "locked")]
    pub locked: bool,
}

/// Images available to each container of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageStatus {
    #[serde(rename = "ID", alias = "id")]
    pub id: ServiceId,
    #[serde(default, alias = "containers")]
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseKind {
    Plan,
    Execute,
}

impl ReleaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseKind::Plan => "plan",
            ReleaseKind::Execute => "execute",
        }
    }
}

/// Parameters of a release. Sent as query parameters, not as a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseJobParams {
    pub image_spec: String,
    pub kind: ReleaseKind,
    pub service_specs: Vec<String>,
    pub excludes: Vec<ServiceId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostReleaseResponse {
    #[serde(default)]
    pub status: String,
    pub release_id: JobId,
}

/// A release job and its progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub log: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HistoryEntry {
    #[serde(alias = "stamp")]
    pub stamp: DateTime<Utc>,
    #[serde(alias = "data")]
    pub data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitConfig {
    #[serde(rename = "URL", alias = "url")]
    pub url: String,
    pub branch: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlackConfig {
    #[serde(rename = "hookURL")]
    pub hook_url: String,
    pub username: String,
}

/// Per-instance settings read by `GetConfig` and written by `SetConfig`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub git: GitConfig,
    #[serde(default)]
    pub slack: SlackConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FluxdStatus {
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitStatus {
    pub configured: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Health summary of the service and its daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub fluxsvc: String,
    pub fluxd: FluxdStatus,
    pub git: GitStatus,
}
