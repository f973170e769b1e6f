//! Route-based RPC client for the deployment API.
//!
//! # Design
//! `Client` holds a transport, a credential, a route table and an endpoint,
//! and keeps no other state between calls. Every typed operation is a thin
//! wrapper over one of three primitives:
//!
//! - `get` resolves the route, sends a GET and always decodes the body.
//! - `post_with_response` optionally encodes a JSON body, sends a POST and
//!   decodes the reply only when it is non-empty.
//! - `post` / `post_with_body` are `post_with_response` with the reply
//!   discarded.
//!
//! All three go through `execute`, the single place where the status code is
//! classified. Response bodies are owned values; they are released when they
//! go out of scope on every return path.

use std::io::Read;

use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use tracing::{debug, warn};

use crate::auth::{Credential, Token};
use crate::config::ClientConfig;
use crate::error::{ApiError, ClientError};
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Transport, UreqTransport};
use crate::routes::{self, RouteTable};
use crate::types::{
    HistoryEntry, ImageStatus, InstanceConfig, Job, JobId, PostReleaseResponse, ReleaseJobParams,
    ServiceId, ServiceStatus, Status,
};

/// Synchronous client for the deployment API.
///
/// Safe to share between threads when the transport and credential are.
pub struct Client<T, C> {
    transport: T,
    credential: C,
    routes: RouteTable,
    endpoint: String,
}

impl Client<UreqTransport, Token> {
    /// A client over `ureq` with the standard route table.
    pub fn from_config(config: &ClientConfig) -> Self {
        Client::new(
            UreqTransport::new(config.timeout),
            RouteTable::standard(),
            &config.endpoint,
            Token::new(&config.token),
        )
    }
}

impl<T: Transport, C: Credential> Client<T, C> {
    pub fn new(transport: T, routes: RouteTable, endpoint: &str, credential: C) -> Self {
        Self {
            transport,
            credential,
            routes,
            endpoint: endpoint.to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn list_services(&self, namespace: &str) -> Result<Vec<ServiceStatus>, ClientError> {
        self.get(routes::LIST_SERVICES, &["namespace", namespace])
    }

    pub fn list_images(&self, service_spec: &str) -> Result<Vec<ImageStatus>, ClientError> {
        self.get(routes::LIST_IMAGES, &["service", service_spec])
    }

    /// Queue a release and return its job id.
    pub fn post_release(&self, params: &ReleaseJobParams) -> Result<JobId, ClientError> {
        let mut args = vec!["image", params.image_spec.as_str(), "kind", params.kind.as_str()];
        for spec in &params.service_specs {
            args.extend(["service", spec.as_str()]);
        }
        for excluded in &params.excludes {
            args.extend(["exclude", excluded.as_str()]);
        }
        let resp: Option<PostReleaseResponse> =
            self.post_with_response(routes::POST_RELEASE, None::<&()>, &args)?;
        Ok(resp.unwrap_or_default().release_id)
    }

    pub fn get_release(&self, id: &JobId) -> Result<Job, ClientError> {
        self.get(routes::GET_RELEASE, &["id", id.as_str()])
    }

    pub fn automate(&self, service: &ServiceId) -> Result<(), ClientError> {
        self.post(routes::AUTOMATE, &["service", service.as_str()])
    }

    pub fn deautomate(&self, service: &ServiceId) -> Result<(), ClientError> {
        self.post(routes::DEAUTOMATE, &["service", service.as_str()])
    }

    pub fn lock(&self, service: &ServiceId) -> Result<(), ClientError> {
        self.post(routes::LOCK, &["service", service.as_str()])
    }

    pub fn unlock(&self, service: &ServiceId) -> Result<(), ClientError> {
        self.post(routes::UNLOCK, &["service", service.as_str()])
    }

    pub fn history(&self, service_spec: &str) -> Result<Vec<HistoryEntry>, ClientError> {
        self.get(routes::HISTORY, &["service", service_spec])
    }

    pub fn get_config(&self) -> Result<InstanceConfig, ClientError> {
        self.get(routes::GET_CONFIG, &[])
    }

    pub fn set_config(&self, config: &InstanceConfig) -> Result<(), ClientError> {
        self.post_with_body(routes::SET_CONFIG, config, &[])
    }

    pub fn generate_deploy_keys(&self) -> Result<(), ClientError> {
        self.post(routes::GENERATE_DEPLOY_KEYS, &[])
    }

    pub fn status(&self) -> Result<Status, ClientError> {
        self.get(routes::STATUS, &[])
    }

    /// GET `route` and decode the body as `D`.
    ///
    /// The body is decoded even when empty, so an empty 200 reply is a
    /// `ClientError::Decode`. `post_with_response` treats the same reply as
    /// success.
    pub fn get<D: DeserializeOwned>(&self, route: &str, params: &[&str]) -> Result<D, ClientError> {
        let request = self.request(HttpMethod::Get, route, params)?;
        let response = self.dispatch(request)?;
        serde_json::from_reader(response.body).map_err(ClientError::Decode)
    }

    /// POST to `route` with query parameters only, discarding the reply.
    pub fn post(&self, route: &str, params: &[&str]) -> Result<(), ClientError> {
        self.post_with_response::<IgnoredAny, ()>(route, None, params)
            .map(|_| ())
    }

    /// POST `body` as JSON, discarding the reply.
    pub fn post_with_body<B>(&self, route: &str, body: &B, params: &[&str]) -> Result<(), ClientError>
    where
        B: Serialize + ?Sized,
    {
        self.post_with_response::<IgnoredAny, B>(route, Some(body), params)
            .map(|_| ())
    }

    /// POST to `route`, encoding `body` as JSON when present.
    ///
    /// Returns `Ok(None)` when the server replies with an empty body, and the
    /// decoded value otherwise.
    pub fn post_with_response<D, B>(
        &self,
        route: &str,
        body: Option<&B>,
        params: &[&str],
    ) -> Result<Option<D>, ClientError>
    where
        D: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut request = self.request(HttpMethod::Post, route, params)?;
        if let Some(body) = body {
            let encoded = serde_json::to_string(body).map_err(ClientError::Encode)?;
            request.set_header("Content-Type", "application/json");
            request.body = Some(encoded);
        }
        let mut response = self.dispatch(request)?;
        let mut bytes = Vec::new();
        response
            .body
            .read_to_end(&mut bytes)
            .map_err(|e| ClientError::Decode(serde_json::Error::io(e)))?;
        if bytes.is_empty() {
            return Ok(None);
        }
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(ClientError::Decode)
    }

    /// Send `request` and classify the reply.
    ///
    /// A 200 response is handed back unread. Anything else is drained
    /// (read errors ignored), trimmed and returned as `ClientError::Api`.
    /// The credential is not applied here.
    pub fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ClientError> {
        debug!(method = %request.method, url = %request.url, "executing request");
        let mut response = self.transport.send(request).map_err(ClientError::Transport)?;
        if response.status == 200 {
            return Ok(response);
        }

        let mut bytes = Vec::new();
        let _ = response.body.read_to_end(&mut bytes);
        let err = ApiError {
            status_code: response.status,
            status: response.status_text.clone(),
            body: String::from_utf8_lossy(&bytes).trim().to_string(),
        };
        warn!(
            method = %request.method,
            url = %request.url,
            status = err.status_code,
            "request rejected by server"
        );
        Err(err.into())
    }

    fn request(&self, method: HttpMethod, route: &str, params: &[&str]) -> Result<HttpRequest, ClientError> {
        let url = self.routes.resolve(&self.endpoint, route, params)?;
        Ok(HttpRequest::new(method, url.as_str()))
    }

    /// Attach the credential to the finished request and execute it.
    fn dispatch(&self, mut request: HttpRequest) -> Result<HttpResponse, ClientError> {
        self.credential.apply(&mut request);
        self.execute(&request)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::io::{self, Cursor};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use serde::Deserialize;

    use super::*;
    use crate::error::TransportError;
    use crate::http::ResponseBody;
    use crate::types::ReleaseKind;

    const ENDPOINT: &str = "http://flux.test";

    /// Body that keeps `open` incremented until it is dropped.
    struct TrackedBody {
        inner: Cursor<Vec<u8>>,
        open: Arc<AtomicUsize>,
    }

    impl Read for TrackedBody {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl Drop for TrackedBody {
        fn drop(&mut self) {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct FailingBody;

    impl Read for FailingBody {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("connection reset"))
        }
    }

    enum Reply {
        Respond(u16, &'static str, &'static str),
        /// Answer 200 with the request body.
        Echo,
        Unreadable(u16, &'static str),
        Fail,
    }

    #[derive(Default)]
    struct FakeTransport {
        replies: Mutex<VecDeque<Reply>>,
        sent: Mutex<Vec<HttpRequest>>,
        open: Arc<AtomicUsize>,
    }

    impl FakeTransport {
        fn replying(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ..Self::default()
            }
        }

        fn ok(body: &'static str) -> Self {
            Self::replying(vec![Reply::Respond(200, "OK", body)])
        }

        fn sent(&self) -> Vec<HttpRequest> {
            self.sent.lock().unwrap().clone()
        }

        fn open_bodies(&self) -> usize {
            self.open.load(Ordering::SeqCst)
        }

        fn tracked(&self, status: u16, text: &str, bytes: Vec<u8>) -> HttpResponse {
            self.open.fetch_add(1, Ordering::SeqCst);
            HttpResponse {
                status,
                status_text: text.to_string(),
                headers: Vec::new(),
                body: ResponseBody::new(TrackedBody {
                    inner: Cursor::new(bytes),
                    open: Arc::clone(&self.open),
                }),
            }
        }
    }

    impl Transport for FakeTransport {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.sent.lock().unwrap().push(request.clone());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("unscripted request");
            match reply {
                Reply::Respond(status, text, body) => Ok(self.tracked(status, text, body.into())),
                Reply::Echo => {
                    let body = request.body.clone().unwrap_or_default();
                    Ok(self.tracked(200, "OK", body.into_bytes()))
                }
                Reply::Unreadable(status, text) => Ok(HttpResponse {
                    status,
                    status_text: text.to_string(),
                    headers: Vec::new(),
                    body: ResponseBody::new(FailingBody),
                }),
                Reply::Fail => Err(TransportError::new("connection refused")),
            }
        }
    }

    #[derive(Default)]
    struct CountingCredential(AtomicUsize);

    impl CountingCredential {
        fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    impl Credential for CountingCredential {
        fn apply(&self, request: &mut HttpRequest) {
            self.0.fetch_add(1, Ordering::SeqCst);
            request.set_header("Authorization", "Scope-Probe token=test");
        }
    }

    fn client<'a>(
        transport: &'a FakeTransport,
        credential: &'a CountingCredential,
    ) -> Client<&'a FakeTransport, &'a CountingCredential> {
        Client::new(transport, RouteTable::standard(), ENDPOINT, credential)
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Payload {
        name: String,
        replicas: u32,
        tags: Vec<String>,
    }

    #[test]
    fn list_services_decodes_200_body() {
        let transport = FakeTransport::ok(r#"[{"id":"svc-a"}]"#);
        let cred = CountingCredential::default();
        let services = client(&transport, &cred).list_services("default").unwrap();

        assert_eq!(services.len(), 1);
        assert_eq!(services[0].id.as_str(), "svc-a");
        let sent = transport.sent();
        assert_eq!(sent[0].method, HttpMethod::Get);
        assert_eq!(sent[0].url, "http://flux.test/v6/services?namespace=default");
        assert!(sent[0].body.is_none());
    }

    #[test]
    fn get_with_empty_body_is_decode_error() {
        let transport = FakeTransport::ok("");
        let cred = CountingCredential::default();
        let err = client(&transport, &cred).status().unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)), "{err:?}");
        assert_eq!(err.to_string(), "decoding response from server");
    }

    #[test]
    fn post_with_empty_body_returns_none() {
        let transport = FakeTransport::ok("");
        let cred = CountingCredential::default();
        let out: Option<Payload> = client(&transport, &cred)
            .post_with_response(routes::POST_RELEASE, None::<&()>, &[])
            .unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn post_with_body_decodes_non_empty_reply() {
        let transport = FakeTransport::ok(r#"{"status":"queued","release_id":"job-7"}"#);
        let cred = CountingCredential::default();
        let out: Option<PostReleaseResponse> = client(&transport, &cred)
            .post_with_response(routes::POST_RELEASE, None::<&()>, &[])
            .unwrap();
        assert_eq!(out.unwrap().release_id, JobId("job-7".to_string()));
    }

    #[test]
    fn non_200_is_api_error_with_trimmed_body() {
        for status in [404, 500] {
            let transport = FakeTransport::replying(vec![Reply::Respond(status, "Nope", "  not json\n")]);
            let cred = CountingCredential::default();
            let err = client(&transport, &cred).get_config().unwrap_err();

            let api = err.api_error().expect("api error");
            assert_eq!(api.status_code, status);
            assert_eq!(api.status, "Nope");
            assert_eq!(api.body, "not json");
        }
    }

    #[test]
    fn non_200_on_post_is_api_error() {
        let transport = FakeTransport::replying(vec![Reply::Respond(409, "Conflict", "service locked")]);
        let cred = CountingCredential::default();
        let err = client(&transport, &cred)
            .lock(&ServiceId::new("default", "web"))
            .unwrap_err();
        assert_eq!(err.status_code(), Some(409));
        assert_eq!(err.chain(), "executing HTTP request: 409 Conflict: service locked");
    }

    #[test]
    fn non_2xx_success_codes_are_still_rejected() {
        let transport = FakeTransport::replying(vec![Reply::Respond(204, "No Content", "")]);
        let cred = CountingCredential::default();
        let err = client(&transport, &cred).generate_deploy_keys().unwrap_err();
        assert_eq!(err.status_code(), Some(204));
    }

    #[test]
    fn unreadable_error_body_yields_empty_text() {
        let transport = FakeTransport::replying(vec![Reply::Unreadable(502, "Bad Gateway")]);
        let cred = CountingCredential::default();
        let err = client(&transport, &cred).status().unwrap_err();
        let api = err.api_error().unwrap();
        assert_eq!(api.status_code, 502);
        assert_eq!(api.body, "");
    }

    #[test]
    fn unreadable_success_body_on_post_is_decode_error() {
        let transport = FakeTransport::replying(vec![Reply::Unreadable(200, "OK")]);
        let cred = CountingCredential::default();
        let err = client(&transport, &cred).generate_deploy_keys().unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
    }

    #[test]
    fn transport_failure_is_surfaced() {
        let transport = FakeTransport::replying(vec![Reply::Fail]);
        let cred = CountingCredential::default();
        let err = client(&transport, &cred).status().unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
        assert_eq!(err.status_code(), None);
        assert_eq!(err.chain(), "executing HTTP request: connection refused");
    }

    #[test]
    fn route_error_sends_nothing() {
        let transport = FakeTransport::default();
        let cred = CountingCredential::default();
        let c = client(&transport, &cred);

        let err = c.get::<IgnoredAny>("Missing", &[]).unwrap_err();
        assert!(matches!(err, ClientError::Route(_)));
        let err = c.post(routes::LOCK, &["service"]).unwrap_err();
        assert!(matches!(err, ClientError::Route(_)));

        assert!(transport.sent().is_empty());
        assert_eq!(cred.count(), 0);
    }

    #[test]
    fn encode_error_sends_nothing() {
        let transport = FakeTransport::default();
        let cred = CountingCredential::default();
        let body: HashMap<(u8, u8), u8> = HashMap::from([((1, 2), 3)]);

        let err = client(&transport, &cred)
            .post_with_body(routes::SET_CONFIG, &body, &[])
            .unwrap_err();
        assert!(matches!(err, ClientError::Encode(_)));
        assert_eq!(err.to_string(), "encoding request body");
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn credential_applied_once_per_request() {
        let transport = FakeTransport::replying(vec![
            Reply::Respond(200, "OK", "{}"),
            Reply::Respond(200, "OK", ""),
            Reply::Respond(200, "OK", ""),
            Reply::Respond(200, "OK", "null"),
        ]);
        let cred = CountingCredential::default();
        let c = client(&transport, &cred);

        c.get::<IgnoredAny>(routes::STATUS, &[]).unwrap();
        c.post(routes::GENERATE_DEPLOY_KEYS, &[]).unwrap();
        c.post_with_body(routes::SET_CONFIG, &InstanceConfig::default(), &[])
            .unwrap();
        c.post_with_response::<IgnoredAny, _>(routes::POST_RELEASE, Some(&"x"), &[])
            .unwrap();

        assert_eq!(cred.count(), 4);
        for req in transport.sent() {
            let auth: Vec<_> = req
                .headers
                .iter()
                .filter(|(n, _)| n.eq_ignore_ascii_case("authorization"))
                .collect();
            assert_eq!(auth.len(), 1, "{req:?}");
        }
    }

    #[test]
    fn token_credential_reaches_the_transport() {
        let transport = FakeTransport::ok("{}");
        let c = Client::new(&transport, RouteTable::standard(), ENDPOINT, Token::new("s3cret"));
        c.get::<IgnoredAny>(routes::STATUS, &[]).unwrap();
        assert_eq!(
            transport.sent()[0].header("Authorization"),
            Some("Scope-Probe token=s3cret")
        );
    }

    #[test]
    fn post_body_is_json_with_content_type() {
        let transport = FakeTransport::ok("");
        let cred = CountingCredential::default();
        let payload = Payload {
            name: "web".to_string(),
            replicas: 3,
            tags: vec!["a".to_string()],
        };
        client(&transport, &cred)
            .post_with_body(routes::SET_CONFIG, &payload, &[])
            .unwrap();

        let sent = transport.sent();
        assert_eq!(sent[0].method, HttpMethod::Post);
        assert_eq!(sent[0].header("content-type"), Some("application/json"));
        let body: serde_json::Value = serde_json::from_str(sent[0].body.as_deref().unwrap()).unwrap();
        assert_eq!(body["name"], "web");
        assert_eq!(body["replicas"], 3);
    }

    #[test]
    fn bare_post_has_no_body() {
        let transport = FakeTransport::ok("");
        let cred = CountingCredential::default();
        client(&transport, &cred)
            .automate(&ServiceId::new("default", "web"))
            .unwrap();

        let sent = transport.sent();
        assert_eq!(sent[0].url, "http://flux.test/v6/automate?service=default%2Fweb");
        assert!(sent[0].body.is_none());
        assert_eq!(sent[0].header("content-type"), None);
    }

    #[test]
    fn discarded_reply_must_still_be_json() {
        let transport = FakeTransport::ok("definitely not json");
        let cred = CountingCredential::default();
        let err = client(&transport, &cred)
            .unlock(&ServiceId::new("default", "web"))
            .unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
    }

    #[test]
    fn post_release_repeats_service_and_exclude() {
        let transport = FakeTransport::ok(r#"{"status":"queued","release_id":"job-1"}"#);
        let cred = CountingCredential::default();
        let params = ReleaseJobParams {
            image_spec: "web:2".to_string(),
            kind: ReleaseKind::Plan,
            service_specs: vec!["default/a".to_string(), "default/b".to_string()],
            excludes: vec![ServiceId::new("default", "c")],
        };
        let id = client(&transport, &cred).post_release(&params).unwrap();
        assert_eq!(id.as_str(), "job-1");

        let sent = transport.sent();
        assert_eq!(
            sent[0].url,
            "http://flux.test/v6/release?image=web%3A2&kind=plan&service=default%2Fa&service=default%2Fb&exclude=default%2Fc"
        );
    }

    #[test]
    fn get_release_puts_id_in_path() {
        let transport = FakeTransport::ok(r#"{"id":"job-1","status":"done","done":true,"success":true}"#);
        let cred = CountingCredential::default();
        let job = client(&transport, &cred)
            .get_release(&JobId("job-1".to_string()))
            .unwrap();
        assert!(job.done && job.success);
        assert_eq!(transport.sent()[0].url, "http://flux.test/v6/release/job-1");
    }

    #[test]
    fn echoed_body_round_trips() {
        let transport = FakeTransport::replying(vec![Reply::Echo]);
        let cred = CountingCredential::default();
        let payload = Payload {
            name: "web".to_string(),
            replicas: 2,
            tags: vec!["blue".to_string(), "canary".to_string()],
        };
        let back: Option<Payload> = client(&transport, &cred)
            .post_with_response(routes::SET_CONFIG, Some(&payload), &[])
            .unwrap();
        assert_eq!(back, Some(payload));
    }

    #[test]
    fn response_bodies_are_released_on_every_path() {
        let transport = FakeTransport::replying(vec![
            Reply::Respond(200, "OK", r#"{"fluxsvc":"1.0","fluxd":{"connected":true},"git":{"configured":false}}"#),
            Reply::Respond(200, "OK", "garbage"),
            Reply::Respond(500, "Internal Server Error", "boom"),
            Reply::Respond(200, "OK", ""),
            Reply::Respond(200, "OK", "garbage"),
            Reply::Respond(503, "Service Unavailable", "later"),
        ]);
        let cred = CountingCredential::default();
        let c = client(&transport, &cred);

        assert!(c.status().is_ok());
        assert_eq!(transport.open_bodies(), 0);
        assert!(c.status().is_err());
        assert_eq!(transport.open_bodies(), 0);
        assert!(c.status().is_err());
        assert_eq!(transport.open_bodies(), 0);
        assert!(c.generate_deploy_keys().is_ok());
        assert_eq!(transport.open_bodies(), 0);
        assert!(c.generate_deploy_keys().is_err());
        assert_eq!(transport.open_bodies(), 0);
        assert!(c.generate_deploy_keys().is_err());
        assert_eq!(transport.open_bodies(), 0);
    }

    #[test]
    fn execute_hands_back_unread_200() {
        let transport = FakeTransport::ok("raw text");
        let cred = CountingCredential::default();
        let c = client(&transport, &cred);
        let req = HttpRequest::new(HttpMethod::Get, "http://flux.test/anything");

        let mut resp = c.execute(&req).unwrap();
        assert_eq!(transport.open_bodies(), 1);
        let mut text = String::new();
        resp.body.read_to_string(&mut text).unwrap();
        assert_eq!(text, "raw text");
        drop(resp);
        assert_eq!(transport.open_bodies(), 0);
        assert_eq!(cred.count(), 0);
    }
}
