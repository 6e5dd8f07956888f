//! Shared HTTP and token plumbing for the OIDC adapter

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use multipass_core::{MultipassError, Result};

/// HTTP client with bounded retry, tied to the provider it serves so
/// transport failures surface as `BackendUnavailable` for that provider.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    provider: String,
    max_retries: u32,
    retry_delay_ms: u64,
}

impl HttpClient {
    pub fn new(provider: impl Into<String>, max_retries: u32, retry_delay_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| {
                MultipassError::internal(format!("Failed to create HTTP client: {err}"))
            })?;
        Ok(Self {
            client,
            provider: provider.into(),
            max_retries,
            retry_delay_ms,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Name of the provider this client serves.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Executes a request, retrying transport errors and 5xx/429 responses
    /// with exponential backoff. Any other response is returned for the
    /// caller to inspect; exhausting the retries yields
    /// `BackendUnavailable`.
    pub async fn execute(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.retry_delay_ms * 2u64.pow(attempt - 1);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let Some(builder) = request.try_clone() else {
                return Err(MultipassError::internal(
                    "Request cannot be cloned for retry",
                ));
            };
            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() || status.as_u16() == 429 {
                        last_error = Some(format!("HTTP {status}"));
                        continue;
                    }
                    return Ok(response);
                }
                Err(err) => {
                    last_error = Some(err.to_string());
                }
            }
        }

        Err(MultipassError::backend_unavailable(
            &self.provider,
            format!(
                "Request failed after {} retries: {}",
                self.max_retries,
                last_error.unwrap_or_default()
            ),
        ))
    }
}

/// Cache of JWKS documents, keyed by URI. Caches keys only, never
/// authentication results.
pub struct JwksCache {
    keys: RwLock<HashMap<String, CachedJwks>>,
    ttl_secs: u64,
}

struct CachedJwks {
    keys: JwkSet,
    fetched_at: DateTime<Utc>,
}

impl JwksCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            ttl_secs,
        }
    }

    pub async fn get_or_fetch(&self, jwks_uri: &str, http: &HttpClient) -> Result<JwkSet> {
        {
            let cache = self.keys.read().await;
            if let Some(cached) = cache.get(jwks_uri) {
                let age = (Utc::now() - cached.fetched_at).num_seconds();
                if age >= 0 && (age as u64) < self.ttl_secs {
                    return Ok(cached.keys.clone());
                }
            }
        }

        debug!("Fetching JWKS from {}", jwks_uri);
        let response = http.execute(http.client().get(jwks_uri)).await?;
        let jwks: JwkSet = response.json().await.map_err(|err| {
            MultipassError::backend_unavailable(
                http.provider(),
                format!("Failed to parse JWKS: {err}"),
            )
        })?;

        let mut cache = self.keys.write().await;
        cache.insert(
            jwks_uri.to_string(),
            CachedJwks {
                keys: jwks.clone(),
                fetched_at: Utc::now(),
            },
        );
        Ok(jwks)
    }
}

/// JSON Web Key Set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

/// JSON Web Key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
}

impl JwkSet {
    pub fn find_key(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|key| key.kid.as_deref() == Some(kid))
    }

    /// A decoding key plus the signing algorithm for the given key id.
    pub fn get_decoding_key(&self, kid: &str) -> Result<(DecodingKey, Algorithm)> {
        let jwk = self.find_key(kid).ok_or_else(|| {
            MultipassError::identity_retrieval(format!("Key {kid} not found in JWKS"))
        })?;

        let algorithm = match jwk.alg.as_deref() {
            Some(alg) => algorithm_from_str(alg)?,
            None => Algorithm::RS256,
        };

        let key = match jwk.kty.as_str() {
            "RSA" => {
                let n = jwk.n.as_ref().ok_or_else(|| {
                    MultipassError::identity_retrieval("RSA key missing 'n' parameter")
                })?;
                let e = jwk.e.as_ref().ok_or_else(|| {
                    MultipassError::identity_retrieval("RSA key missing 'e' parameter")
                })?;
                DecodingKey::from_rsa_components(n, e).map_err(|err| {
                    MultipassError::identity_retrieval(format!("Invalid RSA key: {err}"))
                })?
            }
            "EC" => {
                let x = jwk.x.as_ref().ok_or_else(|| {
                    MultipassError::identity_retrieval("EC key missing 'x' parameter")
                })?;
                let y = jwk.y.as_ref().ok_or_else(|| {
                    MultipassError::identity_retrieval("EC key missing 'y' parameter")
                })?;
                DecodingKey::from_ec_components(x, y).map_err(|err| {
                    MultipassError::identity_retrieval(format!("Invalid EC key: {err}"))
                })?
            }
            other => {
                return Err(MultipassError::identity_retrieval(format!(
                    "Unsupported key type: {other}"
                )))
            }
        };
        Ok((key, algorithm))
    }
}

/// OIDC discovery document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcDiscovery {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,
    pub jwks_uri: String,
}

impl OidcDiscovery {
    pub async fn fetch(issuer: &str, http: &HttpClient) -> Result<Self> {
        let url = format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        );
        debug!("Fetching OIDC discovery from {}", url);
        let response = http.execute(http.client().get(&url)).await?;
        response.json().await.map_err(|err| {
            MultipassError::backend_unavailable(
                http.provider(),
                format!("Failed to parse OIDC discovery: {err}"),
            )
        })
    }
}

/// Validates a JWT and returns its claims. Validation failures (expired,
/// wrong audience, bad signature) surface as `IdentityRetrieval`.
pub fn validate_jwt<T: for<'de> Deserialize<'de>>(
    token: &str,
    decoding_key: &DecodingKey,
    validation: &Validation,
) -> Result<T> {
    let token_data = decode::<T>(token, decoding_key, validation).map_err(|err| {
        MultipassError::identity_retrieval(format!("Token validation failed: {err}"))
    })?;
    Ok(token_data.claims)
}

/// Key id from a JWT header.
pub fn extract_jwt_kid(token: &str) -> Result<String> {
    let header = decode_header(token).map_err(|err| {
        MultipassError::identity_retrieval(format!("Failed to decode JWT header: {err}"))
    })?;
    header
        .kid
        .ok_or_else(|| MultipassError::identity_retrieval("JWT header missing 'kid'"))
}

fn algorithm_from_str(alg: &str) -> Result<Algorithm> {
    match alg {
        "RS256" => Ok(Algorithm::RS256),
        "RS384" => Ok(Algorithm::RS384),
        "RS512" => Ok(Algorithm::RS512),
        "ES256" => Ok(Algorithm::ES256),
        "ES384" => Ok(Algorithm::ES384),
        "PS256" => Ok(Algorithm::PS256),
        "PS384" => Ok(Algorithm::PS384),
        "PS512" => Ok(Algorithm::PS512),
        other => Err(MultipassError::identity_retrieval(format!(
            "Unsupported algorithm: {other}"
        ))),
    }
}
