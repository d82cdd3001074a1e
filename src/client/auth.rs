//! Google credentials and OAuth2 access tokens

use chrono::{DateTime, Duration, Utc};
use eyre::{Context, Result, eyre};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// OAuth2 scope needed to run query jobs
pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_LIFETIME_SECS: i64 = 3600;

/// Service account key file (`"type": "service_account"`)
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub private_key_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

/// User credentials written by `gcloud auth application-default login`
#[derive(Clone, Deserialize)]
pub struct AuthorizedUserKey {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default)]
    pub quota_project_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CredentialFile {
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUserKey),
}

/// Credentials used to authenticate BigQuery requests
#[derive(Clone)]
pub enum Credentials {
    /// Sign a JWT with the service account key and exchange it for a token
    ServiceAccount(ServiceAccountKey),
    /// Exchange a refresh token for an access token
    AuthorizedUser(AuthorizedUserKey),
    /// Use a pre-minted access token as-is
    AccessToken(String),
}

impl Credentials {
    /// Load credentials from a Google credential JSON file
    ///
    /// # Errors
    /// Returns an error if the file can't be read, isn't valid JSON, or has an
    /// unsupported `type`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials file: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Invalid credentials file: {}", path.display()))
    }

    /// Parse credentials from the contents of a credential file
    pub fn from_json(content: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(content).context("Credentials are not valid JSON")?;
        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| eyre!("Credentials are missing the 'type' field"))?;
        match kind.as_str() {
            "service_account" | "authorized_user" => {}
            other => eyre::bail!("Unsupported credentials type: {}", other),
        }

        let file: CredentialFile = serde_json::from_value(value)
            .with_context(|| format!("Malformed {} credentials", kind))?;
        Ok(match file {
            CredentialFile::ServiceAccount(key) => Self::ServiceAccount(key),
            CredentialFile::AuthorizedUser(key) => Self::AuthorizedUser(key),
        })
    }

    /// The project id recorded in the credentials, if any
    pub fn project_id(&self) -> Option<&str> {
        match self {
            Self::ServiceAccount(key) => key.project_id.as_deref(),
            Self::AuthorizedUser(key) => key.quota_project_id.as_deref(),
            Self::AccessToken(_) => None,
        }
    }

    /// Fetch a fresh access token for the given scope
    ///
    /// # Errors
    /// Returns an error if signing fails, the token endpoint can't be reached,
    /// or it rejects the request.
    pub async fn fetch_token(&self, http: &reqwest::Client, scope: &str) -> Result<AccessToken> {
        match self {
            Self::ServiceAccount(key) => {
                log::debug!("Requesting access token for {}", key.client_email);
                let assertion = key.assertion(scope, Utc::now())?;
                let form = [("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())];
                request_token(http, &key.token_uri, &form).await
            }
            Self::AuthorizedUser(key) => {
                log::debug!("Refreshing access token for client {}", key.client_id);
                let form = [
                    ("grant_type", "refresh_token"),
                    ("client_id", key.client_id.as_str()),
                    ("client_secret", key.client_secret.as_str()),
                    ("refresh_token", key.refresh_token.as_str()),
                ];
                request_token(http, &key.token_uri, &form).await
            }
            Self::AccessToken(token) => Ok(AccessToken {
                token: token.clone(),
                expires_at: None,
            }),
        }
    }
}

impl std::fmt::Display for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServiceAccount(key) => write!(f, "ServiceAccount({})", key.client_email),
            Self::AuthorizedUser(_) => write!(f, "AuthorizedUser"),
            Self::AccessToken(_) => write!(f, "AccessToken"),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

impl ServiceAccountKey {
    fn claims<'a>(&'a self, scope: &'a str, now: DateTime<Utc>) -> Claims<'a> {
        let iat = now.timestamp();
        Claims {
            iss: &self.client_email,
            scope,
            aud: &self.token_uri,
            iat,
            exp: iat + TOKEN_LIFETIME_SECS,
        }
    }

    /// Build the signed RS256 JWT sent to the token endpoint
    fn assertion(&self, scope: &str, now: DateTime<Utc>) -> Result<String> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.private_key_id.clone();
        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .context("Service account private key is not a valid RSA PEM key")?;
        jsonwebtoken::encode(&header, &self.claims(scope, now), &key)
            .context("Failed to sign service account JWT")
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct TokenError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

async fn request_token(
    http: &reqwest::Client,
    token_uri: &str,
    form: &[(&str, &str)],
) -> Result<AccessToken> {
    let response = http
        .post(token_uri)
        .form(form)
        .send()
        .await
        .with_context(|| format!("Failed to reach token endpoint {}", token_uri))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .context("Failed to read token response")?;

    if !status.is_success() {
        let detail = match serde_json::from_str::<TokenError>(&body) {
            Ok(e) => match e.error_description {
                Some(description) => format!("{}: {}", e.error, description),
                None => e.error,
            },
            Err(_) => body,
        };
        eyre::bail!("Authentication failed ({}): {}", status, detail);
    }

    let token: TokenResponse =
        serde_json::from_str(&body).context("Failed to parse token response")?;
    Ok(AccessToken {
        token: token.access_token,
        expires_at: token
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs)),
    })
}

/// A bearer token and its expiry
#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// Whether the token expires within `margin` of `now`
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at - margin <= now)
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
