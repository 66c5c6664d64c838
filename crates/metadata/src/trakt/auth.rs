//! Trakt OAuth: device login and refresh-token exchange.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use cinemeld_core::concurrency::AbortFlag;
use cinemeld_core::host::Settings;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::wire::{DeviceCode, TokenResponse};
use crate::MetadataError;
use crate::http::{Auth, ProviderHttp, Request, TokenSource};

const REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

pub const KEY_ACCESS: &str = "trakt.token.access";
pub const KEY_REFRESH: &str = "trakt.token.refresh";
pub const KEY_EXPIRES: &str = "trakt.token.expires";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    fn from_response(resp: TokenResponse) -> Self {
        let created = resp
            .created_at
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_else(Utc::now);
        Self {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
            expires_at: resp
                .expires_in
                .map(|secs| created + chrono::Duration::seconds(secs)),
        }
    }
}

/// Where tokens live between sessions.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> Option<Credentials>;
    async fn save(&self, credentials: &Credentials);
    async fn clear(&self);
}

/// Tokens kept in the host settings.
pub struct SettingsCredentials {
    settings: Arc<dyn Settings>,
}

impl SettingsCredentials {
    pub fn new(settings: Arc<dyn Settings>) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl CredentialStore for SettingsCredentials {
    async fn load(&self) -> Option<Credentials> {
        let access_token = self.settings.get(KEY_ACCESS).await.filter(|s| !s.is_empty())?;
        let refresh_token = self.settings.get(KEY_REFRESH).await.unwrap_or_default();
        let expires_at = self
            .settings
            .get(KEY_EXPIRES)
            .await
            .and_then(|s| s.parse::<i64>().ok())
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single());
        Some(Credentials {
            access_token,
            refresh_token,
            expires_at,
        })
    }

    async fn save(&self, credentials: &Credentials) {
        self.settings.set(KEY_ACCESS, &credentials.access_token).await;
        self.settings.set(KEY_REFRESH, &credentials.refresh_token).await;
        let expires = credentials
            .expires_at
            .map(|t| t.timestamp().to_string())
            .unwrap_or_default();
        self.settings.set(KEY_EXPIRES, &expires).await;
    }

    async fn clear(&self) {
        for key in [KEY_ACCESS, KEY_REFRESH, KEY_EXPIRES] {
            self.settings.set(key, "").await;
        }
    }
}

/// How a device login ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAuthOutcome {
    Approved,
    Denied,
    Expired,
    AlreadyUsed,
    InvalidCode,
    Cancelled,
}

pub struct TraktAuth {
    http: ProviderHttp,
    client_id: String,
    client_secret: String,
    store: Arc<dyn CredentialStore>,
    current: RwLock<Option<Credentials>>,
}

impl TraktAuth {
    pub fn new(
        base: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        let client_id = client_id.into();
        Self {
            http: ProviderHttp::new("trakt", base, Auth::Public)
                .with_header("trakt-api-version", "2")
                .with_header("trakt-api-key", client_id.clone()),
            client_id,
            client_secret: client_secret.into(),
            store,
            current: RwLock::new(None),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub async fn credentials(&self) -> Option<Credentials> {
        if let Some(c) = self.current.read().await.clone() {
            return Some(c);
        }
        let loaded = self.store.load().await?;
        *self.current.write().await = Some(loaded.clone());
        Some(loaded)
    }

    pub async fn is_authenticated(&self) -> bool {
        self.credentials().await.is_some()
    }

    async fn store_tokens(&self, resp: TokenResponse) -> Credentials {
        let credentials = Credentials::from_response(resp);
        self.store.save(&credentials).await;
        *self.current.write().await = Some(credentials.clone());
        credentials
    }

    pub async fn logout(&self) {
        self.store.clear().await;
        *self.current.write().await = None;
    }

    pub async fn device_code(&self) -> Result<DeviceCode, MetadataError> {
        let resp = self
            .http
            .json(&Request::post(
                "oauth/device/code",
                json!({ "client_id": self.client_id }),
            ))
            .await?;
        serde_json::from_value(resp.body).map_err(|e| MetadataError::Data {
            provider: "trakt",
            message: e.to_string(),
        })
    }

    /// Poll until the user approves or rejects the code, it expires, or
    /// `abort` fires.
    pub async fn poll_device(
        &self,
        code: &DeviceCode,
        abort: &AbortFlag,
    ) -> Result<DeviceAuthOutcome, MetadataError> {
        let mut interval = Duration::from_secs(code.interval.max(1));
        let deadline = tokio::time::Instant::now() + Duration::from_secs(code.expires_in);
        let body = json!({
            "code": code.device_code,
            "client_id": self.client_id,
            "client_secret": self.client_secret,
        });

        loop {
            if tokio::time::Instant::now() >= deadline {
                return Ok(DeviceAuthOutcome::Expired);
            }
            tokio::select! {
                _ = abort.aborted() => return Ok(DeviceAuthOutcome::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }

            let resp = self
                .http
                .send(&Request::post("oauth/device/token", body.clone()))
                .await?;
            match resp.status {
                200 => {
                    let tokens: TokenResponse =
                        serde_json::from_str(&resp.body).map_err(|e| MetadataError::Data {
                            provider: "trakt",
                            message: e.to_string(),
                        })?;
                    self.store_tokens(tokens).await;
                    info!("trakt device login approved");
                    return Ok(DeviceAuthOutcome::Approved);
                }
                400 => {}
                404 => return Ok(DeviceAuthOutcome::InvalidCode),
                409 => return Ok(DeviceAuthOutcome::AlreadyUsed),
                410 => return Ok(DeviceAuthOutcome::Expired),
                418 => return Ok(DeviceAuthOutcome::Denied),
                429 => interval += Duration::from_secs(1),
                _ => self.http.check(&resp)?,
            }
        }
    }
}

#[async_trait]
impl TokenSource for TraktAuth {
    async fn access_token(&self) -> Option<String> {
        self.credentials().await.map(|c| c.access_token)
    }

    async fn refresh(&self) -> Result<String, MetadataError> {
        let Some(current) = self.credentials().await else {
            return Err(MetadataError::Auth {
                provider: "trakt",
                status: 401,
            });
        };
        let resp = self
            .http
            .json(&Request::post(
                "oauth/token",
                json!({
                    "refresh_token": current.refresh_token,
                    "client_id": self.client_id,
                    "client_secret": self.client_secret,
                    "redirect_uri": REDIRECT_URI,
                    "grant_type": "refresh_token",
                }),
            ))
            .await;
        let body = match resp {
            Ok(r) => r.body,
            Err(e) => {
                warn!(error = %e, "trakt token refresh rejected");
                return Err(e);
            }
        };
        let tokens: TokenResponse = serde_json::from_value(body).map_err(|e| MetadataError::Data {
            provider: "trakt",
            message: e.to_string(),
        })?;
        let credentials = self.store_tokens(tokens).await;
        info!("trakt access token refreshed");
        Ok(credentials.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinemeld_core::testing::MemorySettings;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store() -> (Arc<MemorySettings>, Arc<SettingsCredentials>) {
        let settings = Arc::new(MemorySettings::with_values(&[
            (KEY_ACCESS, "old"),
            (KEY_REFRESH, "r1"),
        ]));
        let creds = Arc::new(SettingsCredentials::new(settings.clone()));
        (settings, creds)
    }

    #[tokio::test]
    async fn credentials_round_trip_through_settings() {
        let (settings, creds) = store();
        let loaded = creds.load().await.unwrap();
        assert_eq!(loaded.access_token, "old");
        assert_eq!(loaded.expires_at, None);

        creds.clear().await;
        assert!(creds.load().await.is_none());
        assert_eq!(settings.get(KEY_REFRESH).await.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn device_login_polls_until_approved() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/device/token"))
            .respond_with(ResponseTemplate::new(400))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/device/token"))
            .and(body_partial_json(json!({ "code": "dev" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "a2", "refresh_token": "r2", "expires_in": 7776000, "created_at": 1700000000
            })))
            .mount(&server)
            .await;

        let (settings, creds) = store();
        let auth = TraktAuth::new(&server.uri(), "id", "secret", creds);
        let code = DeviceCode {
            device_code: "dev".into(),
            user_code: "ABCD".into(),
            verification_url: "https://trakt.tv/activate".into(),
            expires_in: 30,
            interval: 1,
        };
        let outcome = auth.poll_device(&code, &AbortFlag::new()).await.unwrap();
        assert_eq!(outcome, DeviceAuthOutcome::Approved);
        assert_eq!(settings.get(KEY_ACCESS).await.as_deref(), Some("a2"));
        assert_eq!(
            settings.get(KEY_EXPIRES).await.as_deref(),
            Some("1707776000")
        );
    }

    #[tokio::test]
    async fn denied_device_login_stops_polling() {
        let server = MockServer::start().await;
        Mock::given(path("/oauth/device/token"))
            .respond_with(ResponseTemplate::new(418))
            .expect(1)
            .mount(&server)
            .await;
        let (_, creds) = store();
        let auth = TraktAuth::new(&server.uri(), "id", "secret", creds);
        let code = DeviceCode {
            device_code: "dev".into(),
            user_code: "ABCD".into(),
            verification_url: "u".into(),
            expires_in: 30,
            interval: 1,
        };
        assert_eq!(
            auth.poll_device(&code, &AbortFlag::new()).await.unwrap(),
            DeviceAuthOutcome::Denied
        );
    }
}
