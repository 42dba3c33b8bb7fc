//! OAuth access tokens for the BigQuery API

use crate::config::WarehouseConfig;
use crate::VelocityError;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery.readonly";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Tokens this close to expiry are refreshed before use.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

pub struct ServiceAccountKey {
    client_email: String,
    private_key_id: Option<String>,
    token_uri: String,
    signing_key: EncodingKey,
}

#[derive(Deserialize)]
struct ServiceAccountJson {
    client_email: String,
    private_key: String,
    #[serde(default)]
    private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

#[derive(Deserialize)]
pub struct AuthorizedUserKey {
    client_id: String,
    client_secret: String,
    refresh_token: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

/// Where access tokens come from, most explicit first.
pub enum Credentials {
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUserKey),
    StaticToken(String),
    /// Ambient credentials from the GCE metadata server.
    Metadata,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServiceAccount(key) => write!(f, "ServiceAccount({})", key.client_email),
            Self::AuthorizedUser(_) => f.write_str("AuthorizedUser"),
            Self::StaticToken(_) => f.write_str("StaticToken"),
            Self::Metadata => f.write_str("Metadata"),
        }
    }
}

impl Credentials {
    /// Pick credentials: JSON payload from config, then a pre-issued token,
    /// then the key file named by `key_file`, then the metadata server.
    pub fn resolve(config: &WarehouseConfig, key_file: Option<&Path>) -> crate::Result<Self> {
        if let Some(payload) = config.service_account_key.as_deref() {
            return Self::from_json(payload);
        }
        if let Some(token) = config.access_token.as_deref() {
            return Ok(Self::StaticToken(token.trim().to_string()));
        }
        if let Some(path) = key_file {
            let payload = std::fs::read_to_string(path).map_err(|e| {
                VelocityError::Configuration(format!(
                    "cannot read credentials file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            return Self::from_json(&payload);
        }
        Ok(Self::Metadata)
    }

    /// Parse a Google credential JSON document.
    pub fn from_json(payload: &str) -> crate::Result<Self> {
        let value: Value = serde_json::from_str(payload).map_err(invalid_key)?;

        match value.get("type").and_then(Value::as_str) {
            Some("service_account") => {
                let json: ServiceAccountJson =
                    serde_json::from_value(value).map_err(invalid_key)?;
                let signing_key =
                    EncodingKey::from_rsa_pem(json.private_key.as_bytes()).map_err(invalid_key)?;
                Ok(Self::ServiceAccount(ServiceAccountKey {
                    client_email: json.client_email,
                    private_key_id: json.private_key_id,
                    token_uri: json.token_uri,
                    signing_key,
                }))
            }
            Some("authorized_user") => {
                let key: AuthorizedUserKey = serde_json::from_value(value).map_err(invalid_key)?;
                Ok(Self::AuthorizedUser(key))
            }
            Some(other) => Err(invalid_key(format!("unsupported credential type {:?}", other))),
            None => Err(invalid_key("missing \"type\" field")),
        }
    }
}

fn invalid_key(e: impl std::fmt::Display) -> VelocityError {
    VelocityError::Configuration(format!("invalid service account key: {}", e))
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

/// Hands out bearer tokens, refreshing them shortly before they expire.
pub struct TokenProvider {
    http: reqwest::Client,
    credentials: Credentials,
    cached: Mutex<Option<AccessToken>>,
}

impl TokenProvider {
    pub fn new(http: reqwest::Client, credentials: Credentials) -> Self {
        info!(credentials = ?credentials, "warehouse credentials resolved");
        Self {
            http,
            credentials,
            cached: Mutex::new(None),
        }
    }

    pub async fn bearer(&self) -> crate::Result<String> {
        if let Credentials::StaticToken(token) = &self.credentials {
            return Ok(token.clone());
        }

        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + EXPIRY_MARGIN {
                return Ok(token.value.clone());
            }
        }

        let response = self.fetch().await?;
        let lifetime = Duration::from_secs(response.expires_in.unwrap_or(3600));
        debug!(lifetime_secs = lifetime.as_secs(), "refreshed warehouse access token");

        let value = response.access_token;
        *cached = Some(AccessToken {
            value: value.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(value)
    }

    async fn fetch(&self) -> crate::Result<TokenResponse> {
        let request = match &self.credentials {
            Credentials::ServiceAccount(key) => {
                let assertion = sign_assertion(key)?;
                self.http.post(&key.token_uri).form(&[
                    ("grant_type", JWT_BEARER_GRANT),
                    ("assertion", assertion.as_str()),
                ])
            }
            Credentials::AuthorizedUser(key) => self.http.post(&key.token_uri).form(&[
                ("grant_type", "refresh_token"),
                ("client_id", key.client_id.as_str()),
                ("client_secret", key.client_secret.as_str()),
                ("refresh_token", key.refresh_token.as_str()),
            ]),
            Credentials::Metadata => self
                .http
                .get(METADATA_TOKEN_URL)
                .header("Metadata-Flavor", "Google"),
            Credentials::StaticToken(token) => {
                return Ok(TokenResponse {
                    access_token: token.clone(),
                    expires_in: None,
                })
            }
        };

        let response = request
            .send()
            .await
            .map_err(|e| VelocityError::DataSource(format!("token request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(VelocityError::DataSource(format!(
                "token request failed with status {}: {}",
                status, text
            )));
        }
        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| VelocityError::DataSource(format!("invalid token response: {}", e)))
    }
}

fn sign_assertion(key: &ServiceAccountKey) -> crate::Result<String> {
    let iat = time::OffsetDateTime::now_utc().unix_timestamp();
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: BIGQUERY_SCOPE,
        aud: &key.token_uri,
        iat,
        exp: iat + ASSERTION_LIFETIME_SECS,
    };
    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();

    jsonwebtoken::encode(&header, &claims, &key.signing_key)
        .map_err(|e| VelocityError::DataSource(format!("cannot sign token assertion: {}", e)))
}
