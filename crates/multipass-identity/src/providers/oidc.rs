//! OAuth2 / OpenID Connect backend
//!
//! The auth side exchanges an authorization code (or validates a bearer
//! ID token directly) against any OIDC-compliant service, using the
//! discovery document to locate endpoints. The identity side normalizes
//! the validated claims through configurable claim mappings.
//!
//! The backend type name is `oidc`.

use async_trait::async_trait;
use jsonwebtoken::Validation;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use multipass_core::{
    attrs, convert_attributes, AuthInfo, AuthProvider, AuthProviderConfig, AuthProviderFactory,
    AuthenticationResult, GroupResolution, IdentityInfo, IdentityProvider, IdentityProviderConfig,
    IdentityProviderFactory, LoginRequest, LoginStyle, MultipassError, Result,
};

use super::common::{extract_jwt_kid, validate_jwt, HttpClient, JwksCache, OidcDiscovery};
use super::parse_options;

pub const OIDC_BACKEND: &str = "oidc";

fn default_scopes() -> Vec<String> {
    vec!["openid".to_string(), "profile".to_string(), "email".to_string()]
}

fn default_clock_skew() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Clone, Deserialize)]
struct OidcOptions {
    /// Issuer URL, used for discovery and issuer validation.
    issuer_url: String,
    client_id: String,
    client_secret: String,
    /// Redirect URI registered with the authorization server.
    redirect_uri: String,
    /// Endpoint overrides; discovery fills anything left unset.
    #[serde(default)]
    authorization_endpoint: Option<String>,
    #[serde(default)]
    token_endpoint: Option<String>,
    #[serde(default)]
    jwks_uri: Option<String>,
    #[serde(default = "default_scopes")]
    scopes: Vec<String>,
    #[serde(default = "default_clock_skew")]
    clock_skew_secs: u64,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
}

/// Authenticates via OIDC authorization-code exchange or direct token
/// validation.
pub struct OidcAuthProvider {
    name: String,
    title: String,
    identity_provider: Option<String>,
    options: OidcOptions,
    http: HttpClient,
    jwks: JwksCache,
    discovery: Option<OidcDiscovery>,
}

impl OidcAuthProvider {
    pub async fn from_config(config: &AuthProviderConfig) -> Result<Self> {
        let options: OidcOptions = parse_options(&config.name, &config.options)?;
        let http = HttpClient::new(&config.name, options.max_retries, 1000)?;

        // Discovery is best-effort at construction; explicit endpoint
        // overrides and the issuer-based fallbacks cover the rest.
        let discovery = OidcDiscovery::fetch(&options.issuer_url, &http).await.ok();

        Ok(Self {
            name: config.name.clone(),
            title: config.title.clone().unwrap_or_else(|| config.name.clone()),
            identity_provider: config.identity_provider.clone(),
            options,
            http,
            jwks: JwksCache::new(3600),
            discovery,
        })
    }

    fn authorization_endpoint(&self) -> String {
        self.options
            .authorization_endpoint
            .clone()
            .or_else(|| {
                self.discovery
                    .as_ref()
                    .map(|d| d.authorization_endpoint.clone())
            })
            .unwrap_or_else(|| format!("{}/authorize", self.options.issuer_url))
    }

    fn token_endpoint(&self) -> String {
        self.options
            .token_endpoint
            .clone()
            .or_else(|| self.discovery.as_ref().map(|d| d.token_endpoint.clone()))
            .unwrap_or_else(|| format!("{}/token", self.options.issuer_url))
    }

    fn jwks_uri(&self) -> String {
        self.options
            .jwks_uri
            .clone()
            .or_else(|| self.discovery.as_ref().map(|d| d.jwks_uri.clone()))
            .unwrap_or_else(|| format!("{}/.well-known/jwks.json", self.options.issuer_url))
    }

    fn issuer(&self) -> String {
        self.discovery
            .as_ref()
            .map(|d| d.issuer.clone())
            .unwrap_or_else(|| self.options.issuer_url.clone())
    }

    fn scopes(&self) -> String {
        self.options.scopes.join(" ")
    }

    /// Validates an ID token and returns its claims.
    async fn validate_id_token(&self, token: &str) -> Result<HashMap<String, Value>> {
        let kid = extract_jwt_kid(token)?;
        let jwks = self.jwks.get_or_fetch(&self.jwks_uri(), &self.http).await?;
        let (key, algorithm) = jwks.get_decoding_key(&kid)?;

        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[self.issuer()]);
        validation.set_audience(&[&self.options.client_id]);
        validation.leeway = self.options.clock_skew_secs;

        let claims: Value = validate_jwt(token, &key, &validation)?;
        match claims {
            Value::Object(map) => Ok(map.into_iter().collect()),
            _ => Err(MultipassError::identity_retrieval(
                "ID token claims are not an object",
            )),
        }
    }

    async fn login_with_code(&self, code: &str) -> Result<AuthenticationResult> {
        let params = [
            ("client_id", self.options.client_id.as_str()),
            ("client_secret", self.options.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.options.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];

        let request = self.http.client().post(self.token_endpoint()).form(&params);
        let response = match self.http.execute(request).await {
            Ok(response) => response,
            Err(MultipassError::BackendUnavailable { message, .. }) => {
                return Ok(AuthenticationResult::unavailable(message));
            }
            Err(err) => return Err(err),
        };

        if response.status().is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Ok(AuthenticationResult::rejected(format!(
                "Token exchange rejected: {body}"
            )));
        }
        if !response.status().is_success() {
            return Ok(AuthenticationResult::unavailable(format!(
                "Token endpoint returned HTTP {}",
                response.status()
            )));
        }

        let token_response: OidcTokenResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(err) => {
                return Ok(AuthenticationResult::unavailable(format!(
                    "Failed to parse token response: {err}"
                )));
            }
        };
        let Some(id_token) = token_response.id_token.as_deref() else {
            return Ok(AuthenticationResult::rejected("No ID token in token response"));
        };

        match self.validate_id_token(id_token).await {
            Ok(mut claims) => {
                debug!("Validated ID token for subject");
                claims.insert(
                    "access_token".to_string(),
                    Value::String(token_response.access_token),
                );
                Ok(AuthenticationResult::success(AuthInfo::new(
                    &self.name, claims,
                )))
            }
            Err(MultipassError::BackendUnavailable { message, .. }) => {
                Ok(AuthenticationResult::unavailable(message))
            }
            Err(MultipassError::IdentityRetrieval { message }) => {
                Ok(AuthenticationResult::rejected(message))
            }
            Err(err) => Err(err),
        }
    }

    async fn login_with_token(&self, token: &str) -> Result<AuthenticationResult> {
        match self.validate_id_token(token).await {
            Ok(claims) => Ok(AuthenticationResult::success(AuthInfo::new(
                &self.name, claims,
            ))),
            Err(MultipassError::BackendUnavailable { message, .. }) => {
                Ok(AuthenticationResult::unavailable(message))
            }
            Err(MultipassError::IdentityRetrieval { message }) => {
                Ok(AuthenticationResult::rejected(message))
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl AuthProvider for OidcAuthProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> &str {
        OIDC_BACKEND
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn login_style(&self) -> LoginStyle {
        LoginStyle::Redirect
    }

    fn paired_identity_provider(&self) -> Option<&str> {
        self.identity_provider.as_deref()
    }

    async fn initiate_login(&self, state: &str) -> Result<String> {
        Ok(format!(
            "{}?client_id={}&response_type=code&redirect_uri={}&scope={}&state={}",
            self.authorization_endpoint(),
            urlencoding::encode(&self.options.client_id),
            urlencoding::encode(&self.options.redirect_uri),
            urlencoding::encode(&self.scopes()),
            urlencoding::encode(state),
        ))
    }

    #[instrument(skip(self, request), fields(provider = %self.name))]
    async fn process_login(&self, request: &LoginRequest) -> Result<AuthenticationResult> {
        match request {
            LoginRequest::Callback { params } => {
                if let Some(error) = params.get("error") {
                    return Ok(AuthenticationResult::rejected(format!(
                        "Authorization failed: {error}"
                    )));
                }
                let Some(code) = params.get("code") else {
                    return Ok(AuthenticationResult::rejected("Missing authorization code"));
                };
                self.login_with_code(code).await
            }
            LoginRequest::Token { token } => self.login_with_token(token).await,
            LoginRequest::Form { .. } => Err(MultipassError::internal(
                "OIDC authentication expects a callback or a bearer token",
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OidcTokenResponse {
    access_token: String,
    #[serde(default)]
    id_token: Option<String>,
}

/// Claim name configuration for normalizing ID-token claims.
#[derive(Debug, Clone, Deserialize)]
pub struct ClaimMappings {
    #[serde(default = "default_subject_claim")]
    pub subject_claim: String,
    #[serde(default = "default_email_claim")]
    pub email_claim: String,
    #[serde(default = "default_name_claim")]
    pub name_claim: String,
    #[serde(default = "default_given_name_claim")]
    pub given_name_claim: String,
    #[serde(default = "default_family_name_claim")]
    pub family_name_claim: String,
    #[serde(default = "default_groups_claim")]
    pub groups_claim: String,
}

fn default_subject_claim() -> String {
    "sub".to_string()
}
fn default_email_claim() -> String {
    "email".to_string()
}
fn default_name_claim() -> String {
    "name".to_string()
}
fn default_given_name_claim() -> String {
    "given_name".to_string()
}
fn default_family_name_claim() -> String {
    "family_name".to_string()
}
fn default_groups_claim() -> String {
    "groups".to_string()
}

impl Default for ClaimMappings {
    fn default() -> Self {
        Self {
            subject_claim: default_subject_claim(),
            email_claim: default_email_claim(),
            name_claim: default_name_claim(),
            given_name_claim: default_given_name_claim(),
            family_name_claim: default_family_name_claim(),
            groups_claim: default_groups_claim(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct OidcIdentityOptions {
    #[serde(default)]
    claim_mappings: ClaimMappings,
}

/// Normalizes validated ID-token claims into the identity model.
pub struct OidcIdentityProvider {
    name: String,
    title: String,
    group_resolution: GroupResolution,
    options: OidcIdentityOptions,
}

impl OidcIdentityProvider {
    pub fn from_config(config: &IdentityProviderConfig) -> Result<Self> {
        Ok(Self {
            name: config.name.clone(),
            title: config.title.clone().unwrap_or_else(|| config.name.clone()),
            group_resolution: config.group_resolution.clone(),
            options: parse_options(&config.name, &config.options)?,
        })
    }
}

#[async_trait]
impl IdentityProvider for OidcIdentityProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> &str {
        OIDC_BACKEND
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn group_resolution(&self) -> &GroupResolution {
        &self.group_resolution
    }

    async fn get_identity_from_auth(&self, auth: &AuthInfo) -> Result<Option<IdentityInfo>> {
        let mappings = &self.options.claim_mappings;
        let Some(identifier) = auth.get_str(&mappings.subject_claim) else {
            return Err(MultipassError::identity_retrieval(format!(
                "ID token is missing the {} claim",
                mappings.subject_claim
            )));
        };
        let mapping = HashMap::from([
            (attrs::EMAIL.to_string(), mappings.email_claim.clone()),
            (attrs::DISPLAY_NAME.to_string(), mappings.name_claim.clone()),
            (
                attrs::FIRST_NAME.to_string(),
                mappings.given_name_claim.clone(),
            ),
            (
                attrs::LAST_NAME.to_string(),
                mappings.family_name_claim.clone(),
            ),
            (attrs::GROUPS.to_string(), mappings.groups_claim.clone()),
        ]);
        let data = convert_attributes(auth.data(), &mapping, None);
        Ok(Some(IdentityInfo::new(&self.name, identifier, data)))
    }
}

pub struct OidcAuthFactory;

#[async_trait]
impl AuthProviderFactory for OidcAuthFactory {
    fn backend(&self) -> &'static str {
        OIDC_BACKEND
    }

    async fn create(&self, config: &AuthProviderConfig) -> Result<Arc<dyn AuthProvider>> {
        Ok(Arc::new(OidcAuthProvider::from_config(config).await?))
    }
}

pub struct OidcIdentityFactory;

#[async_trait]
impl IdentityProviderFactory for OidcIdentityFactory {
    fn backend(&self) -> &'static str {
        OIDC_BACKEND
    }

    async fn create(&self, config: &IdentityProviderConfig) -> Result<Arc<dyn IdentityProvider>> {
        Ok(Arc::new(OidcIdentityProvider::from_config(config)?))
    }
}
