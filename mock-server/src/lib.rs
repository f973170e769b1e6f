use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Path, Query, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub const ALL_SERVICES: &str = "<all>";
pub const ALL_LATEST: &str = "<all latest>";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageDescription {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Container {
    pub name: String,
    pub current: ImageDescription,
    pub available: Vec<ImageDescription>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceStatus {
    #[serde(rename = "ID")]
    pub id: String,
    pub containers: Vec<Container>,
    pub status: String,
    pub automated: bool,
    pub locked: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageStatus {
    #[serde(rename = "ID")]
    pub id: String,
    pub containers: Vec<Container>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: String,
    pub done: bool,
    pub success: bool,
    pub log: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HistoryEntry {
    pub stamp: DateTime<Utc>,
    pub data: String,
    #[serde(skip)]
    pub service: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitConfig {
    #[serde(rename = "URL")]
    pub url: String,
    pub branch: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlackConfig {
    #[serde(rename = "hookURL")]
    pub hook_url: String,
    pub username: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub git: GitConfig,
    #[serde(default)]
    pub slack: SlackConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Status {
    pub fluxsvc: String,
    pub fluxd: serde_json::Value,
    pub git: serde_json::Value,
}

/// Everything the mock service knows about one instance.
#[derive(Clone, Debug, Default)]
pub struct Deployment {
    pub services: Vec<ServiceStatus>,
    pub config: InstanceConfig,
    pub jobs: HashMap<String, Job>,
    pub history: Vec<HistoryEntry>,
    /// When set, requests must carry `Authorization: Scope-Probe token=<token>`.
    pub token: Option<String>,
}

fn image(id: &str) -> ImageDescription {
    ImageDescription {
        id: id.to_string(),
        created_at: None,
    }
}

fn service(id: &str, container: &str, current: &str, available: &[&str]) -> ServiceStatus {
    ServiceStatus {
        id: id.to_string(),
        containers: vec![Container {
            name: container.to_string(),
            current: image(current),
            available: available.iter().map(|a| image(a)).collect(),
        }],
        status: "ready".to_string(),
        automated: false,
        locked: false,
    }
}

impl Deployment {
    /// A small cluster with three services across two namespaces.
    pub fn seeded() -> Self {
        let mut dns = service("kube-system/dns", "kubedns", "kubedns:1.9", &["kubedns:1.9"]);
        dns.locked = true;
        Self {
            services: vec![
                service(
                    "default/helloworld",
                    "helloworld",
                    "helloworld:master-a000001",
                    &["helloworld:master-a000002", "helloworld:master-a000001"],
                ),
                service("default/sidecar", "sidecar", "sidecar:1.0", &["sidecar:1.1", "sidecar:1.0"]),
                dns,
            ],
            config: InstanceConfig {
                git: GitConfig {
                    url: "git@github.com:example/deploy".to_string(),
                    branch: "master".to_string(),
                    path: "k8s".to_string(),
                    key: String::new(),
                },
                slack: SlackConfig::default(),
            },
            ..Self::default()
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }
}

pub type Db = Arc<RwLock<Deployment>>;

type Pairs = Vec<(String, String)>;
type Rejection = (StatusCode, String);

fn first<'a>(pairs: &'a Pairs, key: &str) -> Option<&'a str> {
    pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

fn all<'a>(pairs: &'a Pairs, key: &str) -> Vec<&'a str> {
    pairs.iter().filter(|(k, _)| k == key).map(|(_, v)| v.as_str()).collect()
}

fn required<'a>(pairs: &'a Pairs, key: &str) -> Result<&'a str, Rejection> {
    first(pairs, key).ok_or_else(|| (StatusCode::BAD_REQUEST, format!("missing {key}")))
}

fn not_found(what: &str, id: &str) -> Rejection {
    (StatusCode::NOT_FOUND, format!("{what} {id} not found"))
}

pub fn app() -> Router {
    app_with(Deployment::seeded())
}

pub fn app_with(deployment: Deployment) -> Router {
    let db: Db = Arc::new(RwLock::new(deployment));
    Router::new()
        .route("/v6/services", get(list_services))
        .route("/v6/images", get(list_images))
        .route("/v6/release", post(post_release))
        .route("/v6/release/{id}", get(get_release))
        .route("/v6/automate", post(automate))
        .route("/v6/deautomate", post(deautomate))
        .route("/v6/lock", post(lock))
        .route("/v6/unlock", post(unlock))
        .route("/v6/history", get(history))
        .route("/v6/config", get(get_config).post(set_config))
        .route("/v6/config/deploy-keys", post(generate_deploy_keys))
        .route("/v6/status", get(status))
        .layer(middleware::from_fn_with_state(db.clone(), require_token))
        .with_state(db)
}

/// A router that answers every request with `status` and `body`.
pub fn canned(status: StatusCode, body: &'static str) -> Router {
    Router::new().fallback(move || async move { (status, body) })
}

pub async fn serve(listener: TcpListener, router: Router) -> Result<(), std::io::Error> {
    axum::serve(listener, router).await
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    serve(listener, app()).await
}

async fn require_token(State(db): State<Db>, req: Request, next: Next) -> Response {
    let expected = db.read().await.token.clone();
    if let Some(token) = expected {
        let wanted = format!("Scope-Probe token={token}");
        let presented = req.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        if presented != Some(wanted.as_str()) {
            tracing::warn!(uri = %req.uri(), "rejected request without valid token");
            return (StatusCode::UNAUTHORIZED, "invalid service token").into_response();
        }
    }
    next.run(req).await
}

async fn list_services(State(db): State<Db>, Query(q): Query<Pairs>) -> Json<Vec<ServiceStatus>> {
    let state = db.read().await;
    let services = match first(&q, "namespace").filter(|ns| !ns.is_empty()) {
        Some(ns) => {
            let prefix = format!("{ns}/");
            state
                .services
                .iter()
                .filter(|s| s.id.starts_with(&prefix))
                .cloned()
                .collect()
        }
        None => state.services.clone(),
    };
    Json(services)
}

async fn list_images(
    State(db): State<Db>,
    Query(q): Query<Pairs>,
) -> Result<Json<Vec<ImageStatus>>, Rejection> {
    let spec = required(&q, "service")?;
    let state = db.read().await;
    let images: Vec<ImageStatus> = state
        .services
        .iter()
        .filter(|s| spec == ALL_SERVICES || s.id == spec)
        .map(|s| ImageStatus {
            id: s.id.clone(),
            containers: s.containers.clone(),
        })
        .collect();
    if images.is_empty() {
        return Err(not_found("service", spec));
    }
    Ok(Json(images))
}

async fn post_release(
    State(db): State<Db>,
    Query(q): Query<Pairs>,
) -> Result<Json<serde_json::Value>, Rejection> {
    let image_spec = required(&q, "image")?;
    let kind = required(&q, "kind")?;
    if kind != "plan" && kind != "execute" {
        return Err((StatusCode::BAD_REQUEST, format!("invalid release kind {kind:?}")));
    }
    let specs = all(&q, "service");
    let excludes = all(&q, "exclude");

    let mut state = db.write().await;
    let now = Utc::now();
    let mut log = Vec::new();
    let mut released = Vec::new();
    for svc in state.services.iter_mut() {
        let selected = specs.iter().any(|s| *s == ALL_SERVICES || *s == svc.id);
        if !selected || excludes.contains(&svc.id.as_str()) {
            continue;
        }
        if svc.locked {
            log.push(format!("skipped {}: locked", svc.id));
            continue;
        }
        for container in svc.containers.iter_mut() {
            let target = if image_spec == ALL_LATEST {
                container.available.first().cloned()
            } else {
                Some(image(image_spec))
            };
            if let Some(target) = target {
                log.push(format!("{}: {} -> {}", svc.id, container.current.id, target.id));
                if kind == "execute" {
                    container.current = target;
                }
            }
        }
        released.push(svc.id.clone());
    }
    if kind == "execute" {
        for id in &released {
            state.history.push(HistoryEntry {
                stamp: now,
                data: format!("Release: {image_spec}"),
                service: id.clone(),
            });
        }
    }

    let id = Uuid::new_v4().to_string();
    let job = Job {
        id: id.clone(),
        status: "complete".to_string(),
        done: true,
        success: true,
        log,
    };
    state.jobs.insert(id.clone(), job);
    tracing::info!(release_id = %id, kind, services = released.len(), "release queued");
    Ok(Json(serde_json::json!({ "status": "queued", "release_id": id })))
}

async fn get_release(State(db): State<Db>, Path(id): Path<String>) -> Result<Json<Job>, Rejection> {
    let state = db.read().await;
    state.jobs.get(&id).cloned().map(Json).ok_or_else(|| not_found("job", &id))
}

async fn update_service(
    db: &Db,
    q: &Pairs,
    event: &str,
    apply: impl FnOnce(&mut ServiceStatus),
) -> Result<StatusCode, Rejection> {
    let id = required(q, "service")?;
    let mut state = db.write().await;
    let svc = state
        .services
        .iter_mut()
        .find(|s| s.id == id)
        .ok_or_else(|| not_found("service", id))?;
    apply(svc);
    state.history.push(HistoryEntry {
        stamp: Utc::now(),
        data: event.to_string(),
        service: id.to_string(),
    });
    Ok(StatusCode::OK)
}

async fn automate(State(db): State<Db>, Query(q): Query<Pairs>) -> Result<StatusCode, Rejection> {
    update_service(&db, &q, "Automated", |s| s.automated = true).await
}

async fn deautomate(State(db): State<Db>, Query(q): Query<Pairs>) -> Result<StatusCode, Rejection> {
    update_service(&db, &q, "Deautomated", |s| s.automated = false).await
}

async fn lock(State(db): State<Db>, Query(q): Query<Pairs>) -> Result<StatusCode, Rejection> {
    update_service(&db, &q, "Locked", |s| s.locked = true).await
}

async fn unlock(State(db): State<Db>, Query(q): Query<Pairs>) -> Result<StatusCode, Rejection> {
    update_service(&db, &q, "Unlocked", |s| s.locked = false).await
}

async fn history(
    State(db): State<Db>,
    Query(q): Query<Pairs>,
) -> Result<Json<Vec<HistoryEntry>>, Rejection> {
    let spec = required(&q, "service")?;
    let state = db.read().await;
    if spec != ALL_SERVICES && !state.services.iter().any(|s| s.id == spec) {
        return Err(not_found("service", spec));
    }
    let mut entries: Vec<HistoryEntry> = state
        .history
        .iter()
        .filter(|e| spec == ALL_SERVICES || e.service == spec)
        .cloned()
        .collect();
    entries.reverse();
    Ok(Json(entries))
}

async fn get_config(State(db): State<Db>) -> Json<InstanceConfig> {
    Json(db.read().await.config.clone())
}

async fn set_config(State(db): State<Db>, Json(config): Json<InstanceConfig>) -> StatusCode {
    db.write().await.config = config;
    StatusCode::OK
}

async fn generate_deploy_keys(State(db): State<Db>) -> StatusCode {
    let key = format!("ssh-rsa {} flux-generated", Uuid::new_v4().simple());
    db.write().await.config.git.key = key;
    StatusCode::OK
}

async fn status(State(db): State<Db>) -> Json<Status> {
    let state = db.read().await;
    Json(Status {
        fluxsvc: "mock".to_string(),
        fluxd: serde_json::json!({ "connected": true }),
        git: serde_json::json!({ "configured": !state.config.git.url.is_empty() }),
    })
}
