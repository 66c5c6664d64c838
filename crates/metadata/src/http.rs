//! Request shim shared by every provider client.
//!
//! Handles URL joining, authentication injection, payload-scaled timeouts,
//! 429 back-off with `Retry-After`, and a single token refresh on 401/405.
//! Public GET responses can be kept in the shared [`Cache`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cinemeld_cache::{Cache, CacheKey, Policy, Tier};
use cinemeld_core::error::ErrorKind;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::MetadataError;

/// Retries granted to authenticated mutating requests on 429.
pub const MUTATING_RETRY_BUDGET: u32 = 10;
/// Retries granted to every other request on 429.
pub const DEFAULT_RETRY_BUDGET: u32 = 1;
/// Wait used when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(1);
const MAX_RETRY_WAIT: Duration = Duration::from_secs(120);

/// Expected size of a response; selects the request timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Payload {
    #[default]
    Small,
    Medium,
    Large,
}

impl Payload {
    pub fn timeout(self) -> Duration {
        match self {
            Self::Small => Duration::from_secs(30),
            Self::Medium => Duration::from_secs(60),
            Self::Large => Duration::from_secs(90),
        }
    }
}

/// Supplies and renews bearer tokens.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Option<String>;
    /// Exchange the stored refresh token for a new access token, persist it
    /// and return it.
    async fn refresh(&self) -> Result<String, MetadataError>;
}

#[derive(Clone)]
pub enum Auth {
    Public,
    Bearer(Arc<dyn TokenSource>),
    QueryKey { name: &'static str, value: String },
    HeaderKey { name: &'static str, value: String },
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Public => f.write_str("Public"),
            Self::Bearer(_) => f.write_str("Bearer"),
            Self::QueryKey { name, .. } => write!(f, "QueryKey({name})"),
            Self::HeaderKey { name, .. } => write!(f, "HeaderKey({name})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub headers: Vec<(String, String)>,
    pub payload: Payload,
    pub authenticated: bool,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: Vec::new(),
            payload: Payload::Small,
            authenticated: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// A request with a JSON body defaults to POST.
    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        let mut req = Self::new(Method::POST, path);
        req.body = Some(body);
        req
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn query_opt<V: ToString>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.query(key, v),
            None => self,
        }
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }

    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Send without credentials even when the client has them.
    pub fn public(mut self) -> Self {
        self.authenticated = false;
        self
    }

    pub fn is_mutating(&self) -> bool {
        self.method != Method::GET && self.method != Method::HEAD
    }
}

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn header_u32(&self, name: &str) -> Option<u32> {
        self.header(name).and_then(|v| v.trim().parse().ok())
    }
}

/// One configured provider endpoint.
pub struct ProviderHttp {
    provider: &'static str,
    base: String,
    client: reqwest::Client,
    auth: Auth,
    default_headers: Vec<(String, String)>,
    auth_disabled: AtomicBool,
    cache: Option<(Arc<Cache>, Tier)>,
}

/// Response headers worth keeping with a cached body.
const KEPT_HEADERS: &[&str] = &[
    "x-pagination-page-count",
    "x-pagination-item-count",
    "x-pagination-page",
];

#[derive(Serialize, Deserialize)]
struct StoredResponse {
    body: String,
    headers: Vec<(String, String)>,
}

impl std::fmt::Debug for ProviderHttp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHttp")
            .field("provider", &self.provider)
            .field("base", &self.base)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

impl ProviderHttp {
    pub fn new(provider: &'static str, base: impl Into<String>, auth: Auth) -> Self {
        Self {
            provider,
            base: base.into(),
            client: reqwest::Client::new(),
            auth,
            default_headers: Vec::new(),
            auth_disabled: AtomicBool::new(false),
            cache: None,
        }
    }

    /// Keep successful public GET responses for `tier`.
    pub fn with_cache(mut self, cache: Arc<Cache>, tier: Tier) -> Self {
        self.cache = Some((cache, tier));
        self
    }

    pub fn with_header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.default_headers.push((key.to_string(), value.into()));
        self
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// True once authentication failed for good in this session.
    pub fn auth_disabled(&self) -> bool {
        self.auth_disabled.load(Ordering::SeqCst)
    }

    /// Re-enable authenticated requests, e.g. after a new device login.
    pub fn reset_auth(&self) {
        self.auth_disabled.store(false, Ordering::SeqCst);
    }

    fn bearer(&self, req: &Request) -> Option<&Arc<dyn TokenSource>> {
        match &self.auth {
            Auth::Bearer(source) if req.authenticated => Some(source),
            _ => None,
        }
    }

    /// Send with rate-limit retries and token refresh. Any HTTP status is
    /// returned as a response; only transport failures are errors.
    pub async fn send(&self, req: &Request) -> Result<RawResponse, MetadataError> {
        let bearer = self.bearer(req);
        let budget = if bearer.is_some() && req.is_mutating() {
            MUTATING_RETRY_BUDGET
        } else {
            DEFAULT_RETRY_BUDGET
        };
        let mut retries = 0u32;
        let mut refreshed = false;

        loop {
            if bearer.is_some() && self.auth_disabled() {
                return Err(MetadataError::Disabled(self.provider));
            }

            let resp = self.dispatch(req).await?;
            match resp.status {
                429 if retries < budget => {
                    retries += 1;
                    let wait = retry_after(&resp).unwrap_or(DEFAULT_RETRY_WAIT);
                    warn!(
                        provider = self.provider,
                        path = %req.path,
                        retry = retries,
                        wait_secs = wait.as_secs(),
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(wait).await;
                }
                401 | 405 => match bearer {
                    Some(source) if !refreshed => {
                        refreshed = true;
                        debug!(provider = self.provider, "token rejected, refreshing");
                        if let Err(e) = source.refresh().await {
                            warn!(provider = self.provider, error = %e, "token refresh failed");
                            self.auth_disabled.store(true, Ordering::SeqCst);
                            return Err(MetadataError::Auth {
                                provider: self.provider,
                                status: resp.status,
                            });
                        }
                    }
                    Some(_) => {
                        self.auth_disabled.store(true, Ordering::SeqCst);
                        return Ok(resp);
                    }
                    None => return Ok(resp),
                },
                _ => return Ok(resp),
            }
        }
    }

    async fn dispatch(&self, req: &Request) -> Result<RawResponse, MetadataError> {
        let url = self.url(&req.path);
        let mut builder = self
            .client
            .request(req.method.clone(), &url)
            .timeout(req.payload.timeout());

        let mut query = req.query.clone();
        match &self.auth {
            Auth::QueryKey { name, value } => query.push((name.to_string(), value.clone())),
            Auth::HeaderKey { name, value } => builder = builder.header(*name, value),
            Auth::Bearer(source) if req.authenticated => {
                if let Some(token) = source.access_token().await {
                    builder = builder.bearer_auth(token);
                }
            }
            _ => {}
        }
        if !query.is_empty() {
            builder = builder.query(&query);
        }
        for (k, v) in self.default_headers.iter().chain(req.headers.iter()) {
            builder = builder.header(k.as_str(), v.as_str());
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        debug!(provider = self.provider, method = %req.method, url = %url, "provider request");
        let resp = builder.send().await.map_err(|e| self.transport_error(e))?;
        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let body = resp.text().await.map_err(|e| self.transport_error(e))?;
        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> MetadataError {
        let message = if e.is_timeout() {
            format!("timeout: {e}")
        } else {
            e.to_string()
        };
        MetadataError::Network {
            provider: self.provider,
            message,
        }
    }

    /// Map a non-success status to its error.
    pub fn check(&self, resp: &RawResponse) -> Result<(), MetadataError> {
        let provider = self.provider;
        match ErrorKind::from_status(resp.status) {
            None => Ok(()),
            Some(ErrorKind::NotFound) => Err(MetadataError::NotFound),
            Some(ErrorKind::RateLimited) => Err(MetadataError::RateLimited { provider }),
            Some(ErrorKind::Authentication) => Err(MetadataError::Auth {
                provider,
                status: resp.status,
            }),
            Some(ErrorKind::Client) => Err(MetadataError::Client {
                provider,
                status: resp.status,
            }),
            Some(_) => Err(MetadataError::Server {
                provider,
                status: resp.status,
            }),
        }
    }

    /// Send and decode a JSON response. An HTML page where JSON was expected
    /// counts as a server error.
    pub async fn json(&self, req: &Request) -> Result<JsonResponse, MetadataError> {
        let resp = self.fetch(req).await?;

        let trimmed = resp.body.trim_start();
        if trimmed.is_empty() {
            return Ok(JsonResponse {
                body: serde_json::Value::Null,
                headers: resp.headers,
            });
        }
        if trimmed.starts_with('<') {
            warn!(provider = self.provider, path = %req.path, "html page instead of json");
            return Err(MetadataError::Server {
                provider: self.provider,
                status: resp.status,
            });
        }
        match serde_json::from_str(trimmed) {
            Ok(body) => Ok(JsonResponse {
                body,
                headers: resp.headers,
            }),
            Err(e) => {
                let fragment: String = trimmed.chars().take(200).collect();
                warn!(provider = self.provider, path = %req.path, %fragment, "undecodable response");
                Err(MetadataError::Data {
                    provider: self.provider,
                    message: e.to_string(),
                })
            }
        }
    }

    /// Send and return the body text of a successful response.
    pub async fn text(&self, req: &Request) -> Result<String, MetadataError> {
        Ok(self.fetch(req).await?.body)
    }

    /// Send and check, going through the response cache when the request
    /// is a public GET.
    async fn fetch(&self, req: &Request) -> Result<RawResponse, MetadataError> {
        let cache = match &self.cache {
            Some((cache, tier)) if req.method == Method::GET && self.bearer(req).is_none() => Some((cache, *tier)),
            _ => None,
        };
        let Some((cache, tier)) = cache else {
            let resp = self.send(req).await?;
            self.check(&resp)?;
            return Ok(resp);
        };

        let key = CacheKey::new(
            &format!("{}.{}", self.provider, req.path),
            &(&self.base, &req.query),
        );
        let stored = cache
            .fetch(&key, Policy::Cached(tier), || async {
                let resp = self.send(req).await?;
                self.check(&resp)?;
                let headers = KEPT_HEADERS
                    .iter()
                    .filter_map(|name| resp.header(name).map(|v| (name.to_string(), v.to_string())))
                    .collect();
                Ok::<_, MetadataError>(StoredResponse {
                    body: resp.body,
                    headers,
                })
            })
            .await?;

        let mut headers = HeaderMap::new();
        for (name, value) in stored.headers {
            if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value)) {
                headers.insert(name, value);
            }
        }
        Ok(RawResponse {
            status: 200,
            headers,
            body: stored.body,
        })
    }
}

#[derive(Debug, Clone)]
pub struct JsonResponse {
    pub body: serde_json::Value,
    pub headers: HeaderMap,
}

impl JsonResponse {
    /// Total page count advertised by paginated endpoints.
    pub fn page_count(&self) -> Option<u32> {
        self.headers
            .get("x-pagination-page-count")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }
}

fn retry_after(resp: &RawResponse) -> Option<Duration> {
    let secs: f64 = resp.header("retry-after")?.trim().parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(secs).min(MAX_RETRY_WAIT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StaticToken {
        token: Mutex<String>,
        refreshes: Mutex<u32>,
        fail: bool,
    }

    impl StaticToken {
        fn new(token: &str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                token: Mutex::new(token.into()),
                refreshes: Mutex::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl TokenSource for StaticToken {
        async fn access_token(&self) -> Option<String> {
            Some(self.token.lock().unwrap().clone())
        }

        async fn refresh(&self) -> Result<String, MetadataError> {
            *self.refreshes.lock().unwrap() += 1;
            if self.fail {
                return Err(MetadataError::Auth {
                    provider: "test",
                    status: 401,
                });
            }
            *self.token.lock().unwrap() = "fresh".into();
            Ok("fresh".into())
        }
    }

    #[tokio::test]
    async fn retries_after_429_honouring_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/movies/trending"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/movies/trending"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([1, 2])))
            .mount(&server)
            .await;

        let http = ProviderHttp::new("trakt", server.uri(), Auth::Public);
        let started = Instant::now();
        let resp = http.json(&Request::get("movies/trending")).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(resp.body, serde_json::json!([1, 2]));
    }

    #[tokio::test]
    async fn authenticated_post_gets_ten_retries_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sync/history"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .expect(u64::from(MUTATING_RETRY_BUDGET) + 1)
            .mount(&server)
            .await;

        let http = ProviderHttp::new("trakt", server.uri(), Auth::Bearer(StaticToken::new("t", false)));
        let err = http
            .json(&Request::post("sync/history", serde_json::json!({"movies": []})))
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn public_gets_are_served_from_the_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/movie/popular"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-pagination-page-count", "7")
                    .set_body_json(serde_json::json!({"results": [1]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let pool = cinemeld_db::open(":memory:").await.unwrap();
        let config = cinemeld_cache::CacheConfig {
            codec: Some(cinemeld_cache::Codec::None),
            ..Default::default()
        };
        let cache = Arc::new(Cache::open(pool, config).await.unwrap());
        let http = ProviderHttp::new("tmdb", server.uri(), Auth::Public).with_cache(cache, Tier::Short);
        let req = Request::get("movie/popular").query("page", 1);

        let first = http.json(&req).await.unwrap();
        let second = http.json(&req).await.unwrap();
        assert_eq!(first.body, second.body);
        assert_eq!(second.page_count(), Some(7));
    }

    #[tokio::test]
    async fn unauthenticated_get_retries_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .expect(2)
            .mount(&server)
            .await;

        let http = ProviderHttp::new("tmdb", server.uri(), Auth::Public);
        let err = http.json(&Request::get("discover/movie")).await.unwrap_err();
        assert!(matches!(err, MetadataError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn refreshes_token_once_on_401_and_resends() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sync/last_activities"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"all": "x"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sync/last_activities"))
            .and(header("authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let token = StaticToken::new("stale", false);
        let http = ProviderHttp::new("trakt", server.uri(), Auth::Bearer(token.clone()));
        let resp = http.json(&Request::get("sync/last_activities")).await.unwrap();
        assert_eq!(resp.body["all"], "x");
        assert_eq!(*token.refreshes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_refresh_disables_authenticated_calls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let http = ProviderHttp::new("trakt", server.uri(), Auth::Bearer(StaticToken::new("t", true)));
        let err = http.json(&Request::get("sync/watched/movies")).await.unwrap_err();
        assert!(matches!(err, MetadataError::Auth { status: 401, .. }));
        assert!(http.auth_disabled());
        let err = http.json(&Request::get("sync/watched/movies")).await.unwrap_err();
        assert!(matches!(err, MetadataError::Disabled("trakt")));
    }

    #[tokio::test]
    async fn forbidden_is_a_client_error_without_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let token = StaticToken::new("t", false);
        let http = ProviderHttp::new("trakt", server.uri(), Auth::Bearer(token.clone()));
        let err = http.json(&Request::post("sync/history", serde_json::json!({}))).await.unwrap_err();
        assert!(matches!(err, MetadataError::Client { status: 403, .. }));
        assert_eq!(*token.refreshes.lock().unwrap(), 0);
        assert!(!http.auth_disabled());
    }

    #[tokio::test]
    async fn statuses_map_onto_error_kinds() {
        let server = MockServer::start().await;
        Mock::given(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(path("/broken"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(path("/html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;
        Mock::given(path("/garbage"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&server)
            .await;

        let http = ProviderHttp::new("tmdb", server.uri(), Auth::QueryKey {
            name: "api_key",
            value: "k".into(),
        });
        assert!(matches!(http.json(&Request::get("missing")).await, Err(MetadataError::NotFound)));
        assert!(matches!(
            http.json(&Request::get("broken")).await,
            Err(MetadataError::Server { status: 503, .. })
        ));
        assert!(matches!(http.json(&Request::get("html")).await, Err(MetadataError::Server { .. })));
        assert!(matches!(http.json(&Request::get("garbage")).await, Err(MetadataError::Data { .. })));
    }

    #[test]
    fn url_joining_tolerates_slashes() {
        let http = ProviderHttp::new("trakt", "https://api.trakt.tv/", Auth::Public);
        assert_eq!(http.url("/movies/1"), "https://api.trakt.tv/movies/1");
        assert_eq!(http.url("movies/1"), "https://api.trakt.tv/movies/1");
        assert_eq!(Payload::Large.timeout(), Duration::from_secs(90));
    }
}
