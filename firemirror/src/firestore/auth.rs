//! Service-account credentials and OAuth access tokens.
//!
//! A service account signs a short-lived JWT assertion with its RSA key and
//! exchanges it at the account's token endpoint for a bearer token. Tokens are
//! cached until shortly before they expire. Emulator mode skips all of this and
//! sends the fixed token the emulator accepts.
//!
use std::{fmt, path::Path};

use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use tracing::debug;
use zeroize::Zeroizing;

use super::http::deserialize_json;
use crate::{
    config::{
        DATASTORE_SCOPE, DEFAULT_TOKEN_URI, EMULATOR_TOKEN, JWT_BEARER_GRANT_TYPE,
        TOKEN_LIFETIME_SECS, TOKEN_REFRESH_MARGIN_SECS,
    },
    error::{CredentialsError, FileSnafu, HttpSnafu, MissingSnafu, ParseSnafu, StoreError},
};

/// Service-account key, as downloaded from the cloud console.
#[derive(Clone)]
pub struct Credentials {
    pub project_id: String,
    pub client_email: Option<String>,
    pub token_uri: String,
    private_key: Option<Zeroizing<String>>,
}

// don't print the private key
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    client_email: Option<String>,
    #[serde(default)]
    private_key: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

impl Credentials {
    /// Loads a service-account JSON key file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CredentialsError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).context(FileSnafu { path })?;
        let file: CredentialsFile = serde_json::from_slice(&bytes).context(ParseSnafu { path })?;
        Self::from_parts(file)
    }

    /// Parses a service-account key from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, CredentialsError> {
        let file: CredentialsFile =
            serde_json::from_str(json).context(ParseSnafu { path: "<inline>" })?;
        Self::from_parts(file)
    }

    /// Credentials that carry only a project id. Enough for the emulator.
    pub fn project_only(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            client_email: None,
            token_uri: DEFAULT_TOKEN_URI.to_string(),
            private_key: None,
        }
    }

    fn from_parts(file: CredentialsFile) -> Result<Self, CredentialsError> {
        let project_id = non_empty(file.project_id).context(MissingSnafu {
            key: "project_id",
        })?;
        Ok(Self {
            project_id,
            client_email: non_empty(file.client_email),
            token_uri: non_empty(file.token_uri).unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
            private_key: non_empty(file.private_key).map(Zeroizing::new),
        })
    }

    /// True if these credentials can sign token requests.
    pub fn can_sign(&self) -> bool {
        self.client_email.is_some() && self.private_key.is_some()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

/// Claims of the JWT bearer assertion.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub(crate) struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

impl AssertionClaims {
    fn new(client_email: &str, token_uri: &str, now: DateTime<Utc>) -> Self {
        let iat = now.timestamp();
        Self {
            iss: client_email.to_string(),
            scope: DATASTORE_SCOPE.to_string(),
            aud: token_uri.to_string(),
            iat,
            exp: iat + TOKEN_LIFETIME_SECS,
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    TOKEN_LIFETIME_SECS
}

#[derive(Clone)]
struct AccessToken {
    value: Zeroizing<String>,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + TimeDelta::seconds(TOKEN_REFRESH_MARGIN_SECS) < self.expires_at
    }
}

enum TokenSource {
    Emulator,
    ServiceAccount {
        client_email: String,
        token_uri: String,
        key: EncodingKey,
    },
}

/// Supplies bearer tokens for Firestore requests.
pub struct TokenProvider {
    source: TokenSource,
    client: reqwest::Client,
    cached: Mutex<Option<AccessToken>>,
}

impl fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.source {
            TokenSource::Emulator => "emulator",
            TokenSource::ServiceAccount { .. } => "service_account",
        };
        f.debug_struct("TokenProvider").field("source", &kind).finish()
    }
}

impl TokenProvider {
    /// Token provider for the local emulator.
    pub fn emulator(client: reqwest::Client) -> Self {
        Self {
            source: TokenSource::Emulator,
            client,
            cached: Mutex::new(None),
        }
    }

    /// Token provider that signs assertions with a service-account key.
    pub fn service_account(
        credentials: &Credentials,
        client: reqwest::Client,
    ) -> Result<Self, StoreError> {
        let (Some(client_email), Some(private_key)) =
            (&credentials.client_email, &credentials.private_key)
        else {
            return Err(CredentialsError::Missing {
                key: "client_email and private_key".to_string(),
            }
            .into());
        };
        let key = EncodingKey::from_rsa_pem(private_key.as_bytes()).map_err(|err| {
            StoreError::Auth {
                message: format!("invalid private_key: {err}"),
            }
        })?;
        Ok(Self {
            source: TokenSource::ServiceAccount {
                client_email: client_email.clone(),
                token_uri: credentials.token_uri.clone(),
                key,
            },
            client,
            cached: Mutex::new(None),
        })
    }

    /// A valid access token, fetching a new one if the cached token is stale.
    pub async fn access_token(&self) -> Result<Zeroizing<String>, StoreError> {
        let TokenSource::ServiceAccount {
            client_email,
            token_uri,
            key,
        } = &self.source
        else {
            return Ok(Zeroizing::new(EMULATOR_TOKEN.to_string()));
        };

        let now = Utc::now();
        let cached = self.cached.lock().clone();
        if let Some(token) = cached.filter(|token| token.is_fresh(now)) {
            return Ok(token.value);
        }

        let claims = AssertionClaims::new(client_email, token_uri, now);
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, key)
            .map_err(|err| StoreError::Auth {
                message: format!("signing token request: {err}"),
            })?;
        let assertion = Zeroizing::new(assertion);

        debug!(%token_uri, "requesting access token");
        let response = self
            .client
            .post(token_uri)
            .form(&[
                ("grant_type", JWT_BEARER_GRANT_TYPE),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .context(HttpSnafu {
                method: "POST",
                url: token_uri,
            })?;
        let status = response.status();
        let body = response.bytes().await.context(HttpSnafu {
            method: "POST",
            url: token_uri,
        })?;
        if !status.is_success() {
            return Err(StoreError::Auth {
                message: format!(
                    "token endpoint returned {status}: {}",
                    String::from_utf8_lossy(&body)
                ),
            });
        }
        // token responses are never trace-logged
        let TokenResponse {
            access_token,
            expires_in,
        } = deserialize_json(&body)?;

        let token = AccessToken {
            value: Zeroizing::new(access_token),
            expires_at: now + TimeDelta::seconds(expires_in),
        };
        *self.cached.lock() = Some(token.clone());
        Ok(token.value)
    }
}
