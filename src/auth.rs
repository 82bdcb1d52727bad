use chrono::{DateTime, Duration, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use tokio::sync::Mutex;

use crate::credentials::{create_assertion, RS256KeyPair, ServiceAccountCredential};
use crate::errors::{BigQueryError, BigQueryResult};

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Tokens this close to expiry are refreshed before use
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Clone)]
struct AccessToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_MARGIN_SECS) < self.expires_at
    }
}

/// An authenticated handle for Google APIs, backed by a service account
///
/// The handle owns the parsed credential, so when the bearer token runs out
/// it is exchanged again without decoding the key file a second time.
pub struct GoogleAuthClient {
    credential: ServiceAccountCredential,
    key_pair: RS256KeyPair,
    scope: String,
    http: reqwest::Client,
    token: Mutex<Option<AccessToken>>,
}

impl std::fmt::Debug for GoogleAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleAuthClient")
            .field("client_email", &self.credential.client_email)
            .field("scope", &self.scope)
            .finish()
    }
}

impl GoogleAuthClient {
    /// Parse the signing key and perform the first token exchange
    ///
    /// A credential the token endpoint rejects fails here rather than on the first query.
    pub async fn connect(
        credential: ServiceAccountCredential,
        scope: &str,
        http: reqwest::Client,
    ) -> BigQueryResult<Self> {
        let key_pair = credential.key_pair()?;
        let client = GoogleAuthClient {
            credential,
            key_pair,
            scope: scope.to_owned(),
            http,
            token: Mutex::new(None),
        };
        client.access_token().await?;
        Ok(client)
    }

    pub fn client_email(&self) -> &str {
        &self.credential.client_email
    }

    /// Get a bearer token, exchanging a new one if the cached one is about to expire
    pub async fn access_token(&self) -> BigQueryResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Utc::now())) {
            return Ok(token.token.clone());
        }
        let token = self.exchange().await?;
        *cached = Some(token.clone());
        Ok(token.token)
    }

    async fn exchange(&self) -> BigQueryResult<AccessToken> {
        log::debug!(
            "Exchanging assertion for {} at {}",
            self.credential.client_email,
            self.credential.token_uri
        );
        let assertion = create_assertion(&self.key_pair, &self.credential, &self.scope)?;
        let issued_at = Utc::now();
        let wire = self
            .http
            .post(&self.credential.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?
            .json::<TokenWireResult>()
            .await?;
        let token = wire.into_result()?;
        Ok(AccessToken {
            token: token.access_token,
            expires_at: issued_at + Duration::seconds(token.expires_in),
        })
    }
}

//
// Wire types
//

#[derive(Deserialize, Debug)]
struct WireToken {
    access_token: String,
    expires_in: i64,
    // token_type: String,
}

#[derive(Deserialize, Debug)]
struct WireTokenError {
    error: String,
    #[serde(default)]
    error_description: String,
}

#[derive(Debug)]
enum TokenWireResult {
    Ok(WireToken),
    Error(WireTokenError),
}

// See `GoogleWireResult`: untagged enums cannot read `expires_in` under `arbitrary_precision`.
impl<'de> Deserialize<'de> for TokenWireResult {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let result = if value.get("access_token").is_some() {
            serde_json::from_value(value).map(TokenWireResult::Ok)
        } else {
            serde_json::from_value(value).map(TokenWireResult::Error)
        };
        result.map_err(D::Error::custom)
    }
}

impl TokenWireResult {
    fn into_result(self) -> BigQueryResult<WireToken> {
        match self {
            TokenWireResult::Ok(token) => Ok(token),
            TokenWireResult::Error(wire) => Err(BigQueryError::Authentication {
                error: wire.error,
                description: wire.error_description,
            }),
        }
    }
}
