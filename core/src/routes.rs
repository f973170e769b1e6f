//! Named routes and URL resolution.
//!
//! # Design
//! A `RouteTable` maps logical operation names (`"ListServices"`,
//! `"GetRelease"`, ...) to path templates. The table is handed to the client
//! at construction time; nothing here is global. Resolution never touches the
//! network, so every `RouteError` is a local mistake by the caller.

use std::collections::HashMap;

use url::Url;

use crate::error::RouteError;

pub const LIST_SERVICES: &str = "ListServices";
pub const LIST_IMAGES: &str = "ListImages";
pub const POST_RELEASE: &str = "PostRelease";
pub const GET_RELEASE: &str = "GetRelease";
pub const AUTOMATE: &str = "Automate";
pub const DEAUTOMATE: &str = "Deautomate";
pub const LOCK: &str = "Lock";
pub const UNLOCK: &str = "Unlock";
pub const HISTORY: &str = "History";
pub const GET_CONFIG: &str = "GetConfig";
pub const SET_CONFIG: &str = "SetConfig";
pub const GENERATE_DEPLOY_KEYS: &str = "GenerateDeployKeys";
pub const STATUS: &str = "Status";

/// A named path template such as `/v6/release/{id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub name: String,
    pub template: String,
}

impl Route {
    pub fn new(name: &str, template: &str) -> Self {
        Self {
            name: name.to_string(),
            template: template.to_string(),
        }
    }

    fn segments(&self) -> impl Iterator<Item = &str> {
        self.template.split('/').filter(|s| !s.is_empty())
    }
}

/// Returns the placeholder name if `segment` is of the form `{name}`.
fn placeholder(segment: &str) -> Option<&str> {
    segment.strip_prefix('{')?.strip_suffix('}')
}

/// Ordered key/value pairs. Repeated keys are kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a flat `[key1, value1, key2, value2, ...]` list.
    pub fn from_flat(flat: &[&str]) -> Result<Self, RouteError> {
        if flat.len() % 2 != 0 {
            return Err(RouteError::OddParameters(flat.len()));
        }
        Ok(Self(
            flat.chunks_exact(2)
                .map(|pair| (pair[0].to_string(), pair[1].to_string()))
                .collect(),
        ))
    }

    pub fn push(&mut self, key: &str, value: &str) {
        self.0.push((key.to_string(), value.to_string()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Remove and return the value of the first pair named `key`.
    fn take(&mut self, key: &str) -> Option<String> {
        let index = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(index).1)
    }
}

/// Immutable lookup from route name to template.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The routes served by the deployment service.
    pub fn standard() -> Self {
        Self::new()
            .with_route(LIST_SERVICES, "/v6/services")
            .with_route(LIST_IMAGES, "/v6/images")
            .with_route(POST_RELEASE, "/v6/release")
            .with_route(GET_RELEASE, "/v6/release/{id}")
            .with_route(AUTOMATE, "/v6/automate")
            .with_route(DEAUTOMATE, "/v6/deautomate")
            .with_route(LOCK, "/v6/lock")
            .with_route(UNLOCK, "/v6/unlock")
            .with_route(HISTORY, "/v6/history")
            .with_route(GET_CONFIG, "/v6/config")
            .with_route(SET_CONFIG, "/v6/config")
            .with_route(GENERATE_DEPLOY_KEYS, "/v6/config/deploy-keys")
            .with_route(STATUS, "/v6/status")
    }

    pub fn with_route(mut self, name: &str, template: &str) -> Self {
        self.routes.insert(name.to_string(), Route::new(name, template));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Route> {
        self.routes.get(name)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Resolve `route_name` against `endpoint`.
    ///
    /// `params` is a flat key/value list. Each `{placeholder}` in the
    /// template consumes the first pair with the matching key; everything
    /// left over is appended to the query string in order, duplicates
    /// included. The endpoint's own path is kept as a prefix.
    pub fn resolve(&self, endpoint: &str, route_name: &str, params: &[&str]) -> Result<Url, RouteError> {
        let route = self
            .get(route_name)
            .ok_or_else(|| RouteError::UnknownRoute(route_name.to_string()))?;
        let mut params = QueryParams::from_flat(params)?;

        let mut url = Url::parse(endpoint)?;
        url.set_query(None);
        url.set_fragment(None);
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| RouteError::EndpointCannotBeBase(endpoint.to_string()))?;
            path.pop_if_empty();
            for segment in route.segments() {
                match placeholder(segment) {
                    Some(key) => {
                        let value = params.take(key).ok_or_else(|| RouteError::MissingPathParameter {
                            route: route.name.clone(),
                            placeholder: key.to_string(),
                        })?;
                        path.push(&value);
                    }
                    None => {
                        path.push(segment);
                    }
                }
            }
        }

        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter());
        }
        Ok(url)
    }
}
