//! Service account authentication for Google Cloud Pub/Sub.
//!
//! Requests carry an OAuth2 bearer token. The token is obtained by signing a
//! JWT assertion with the service account's RSA key (RS256) and exchanging it
//! at the key's `token_uri`:
//!
//! - header: `{"alg":"RS256","typ":"JWT","kid":<private_key_id>}`
//! - claims: `iss` (client email), `scope`, `aud` (token uri), `iat`, `exp`
//!
//! [`TokenProvider`] caches the token and refreshes it shortly before expiry.
//!
//! # Example
//!
//! ```rust,no_run
//! use pos_relay::client::auth::{ServiceAccountKey, TokenProvider};
//!
//! # async fn example() -> pos_relay::Result<()> {
//! let key = ServiceAccountKey::from_file("service-account.json")?;
//! let provider = TokenProvider::new(reqwest::Client::new(), key)?;
//! let token = provider.token().await?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL, Engine};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer as _};
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::Mutex;

use crate::error::{ApiError, Error};

/// OAuth scope granting Pub/Sub access
pub const PUBSUB_SCOPE: &str = "https://www.googleapis.com/auth/pubsub";

/// Token endpoint used when the key file does not name one
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Assertion lifetime; Google caps it at one hour
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Refresh this long before the cached token expires
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// The fields of a service account JSON key file the relay uses
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    /// Service account email, the assertion issuer
    pub client_email: String,
    /// PKCS#8 PEM private key
    pub private_key: String,
    /// Key id, sent as the JWT `kid`
    #[serde(default)]
    pub private_key_id: Option<String>,
    /// OAuth token endpoint
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    /// Parse a key from its JSON text
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| Error::Config(format!("invalid service account key: {}", e)))
    }

    /// Read and parse a key file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read credentials {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }
}

/// RS256 signer for JWT assertions
#[derive(Debug)]
pub struct Signer {
    signing_key: SigningKey<Sha256>,
}

impl Signer {
    /// Create a signer from a PKCS#8 PEM private key
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if the PEM is not a valid RSA private key.
    pub fn new(private_key_pem: &str) -> Result<Self, Error> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)?;
        Ok(Self {
            signing_key: SigningKey::<Sha256>::new(private_key),
        })
    }

    /// Sign `message`, returning the base64url (unpadded) signature
    pub fn sign(&self, message: &[u8]) -> String {
        let signature = self.signing_key.sign(message);
        BASE64_URL.encode(signature.to_bytes())
    }
}

#[derive(Serialize)]
struct JwtHeader<'a> {
    alg: &'static str,
    typ: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<&'a str>,
}

#[derive(Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Build a signed JWT assertion for `key`, issued at `issued_at` (Unix seconds)
pub fn assertion(key: &ServiceAccountKey, signer: &Signer, issued_at: i64) -> Result<String, Error> {
    let header = JwtHeader {
        alg: "RS256",
        typ: "JWT",
        kid: key.private_key_id.as_deref(),
    };
    let claims = JwtClaims {
        iss: &key.client_email,
        scope: PUBSUB_SCOPE,
        aud: &key.token_uri,
        iat: issued_at,
        exp: issued_at + ASSERTION_LIFETIME_SECS,
    };

    let signing_input = format!(
        "{}.{}",
        BASE64_URL.encode(serde_json::to_vec(&header)?),
        BASE64_URL.encode(serde_json::to_vec(&claims)?)
    );
    let signature = signer.sign(signing_input.as_bytes());
    Ok(format!("{}.{}", signing_input, signature))
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    ASSERTION_LIFETIME_SECS as u64
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Fetches and caches OAuth2 access tokens for a service account
#[derive(Debug)]
pub struct TokenProvider {
    http: Client,
    key: ServiceAccountKey,
    signer: Signer,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    /// Create a provider; the key is parsed up front so bad keys fail early
    pub fn new(http: Client, key: ServiceAccountKey) -> Result<Self, Error> {
        let signer = Signer::new(&key.private_key)?;
        Ok(Self {
            http,
            key,
            signer,
            cached: Mutex::new(None),
        })
    }

    /// A valid access token, fetching a new one if needed
    pub async fn token(&self) -> Result<String, Error> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let fresh = self.fetch().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    /// Drop the cached token, e.g. after a 401
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn fetch(&self) -> Result<CachedToken, Error> {
        let now = chrono::Utc::now().timestamp();
        let jwt = assertion(&self.key, &self.signer, now)?;
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", JWT_BEARER_GRANT)
            .append_pair("assertion", &jwt)
            .finish();

        let response = self
            .http
            .post(&self.key.token_uri)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Api(ApiError::new(
                status.as_u16(),
                format!("token exchange failed: {}", text),
            )));
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(REFRESH_MARGIN);
        tracing::debug!(expires_in = token.expires_in, "obtained access token");

        Ok(CachedToken {
            value: token.access_token,
            refresh_at: Instant::now() + lifetime,
        })
    }
}
