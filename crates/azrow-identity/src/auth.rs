//! Azure AD OAuth2 authentication.
//!
//! Supports the client-credentials flow (app-only tokens) with either a
//! client secret or a certificate-signed JWT assertion, and the
//! authorization-code flow for user tokens, against the Microsoft Identity
//! Platform v2.0 endpoints of a tenant's authority.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use url::Url;

use crate::client::IdentityHttp;
use crate::types::{
    AccessToken, AuthContext, AuthMode, IdentityConfig, IdentityError, IdentityErrorKind,
    IdentityResult, TenantInfo, TokenResponse, UserAccount, UserTokenRequest, UserTokenResult,
};

const ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";
/// Scopes always requested alongside user scopes.
const OIDC_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];
/// Lifetime of a client assertion, seconds.
const ASSERTION_LIFETIME: i64 = 600;

fn token_url(authority: &str) -> String {
    format!("{}/oauth2/v2.0/token", authority.trim_end_matches('/'))
}

fn authorize_url(authority: &str) -> String {
    format!("{}/oauth2/v2.0/authorize", authority.trim_end_matches('/'))
}

/// Source of app-only bearer tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Token for `{scope}/.default` in `tenant`. `clear_cache` drops any
    /// cached token first.
    async fn acquire_token(
        &self,
        tenant: &TenantInfo,
        auth: &AuthContext,
        scope: &str,
        clear_cache: bool,
    ) -> IdentityResult<String>;
}

// ─── Confidential client ─────────────────────────────────────────────

/// An app registration bound to one tenant authority.
pub struct ConfidentialClient {
    http: IdentityHttp,
    auth: AuthContext,
    authority: String,
    tokens: Mutex<HashMap<String, AccessToken>>,
}

impl ConfidentialClient {
    pub fn new(http: IdentityHttp, auth: AuthContext, authority: impl Into<String>) -> IdentityResult<Self> {
        let authority = authority.into();
        if auth.client_id.is_empty() || authority.is_empty() {
            return Err(IdentityError::new(
                IdentityErrorKind::Validation,
                "client_id and authority are required",
            ));
        }
        let missing = match &auth.mode {
            AuthMode::ClientSecret { client_secret } => client_secret.is_empty(),
            AuthMode::Certificate {
                thumbprint,
                private_key,
            } => thumbprint.is_empty() || private_key.is_empty(),
        };
        if missing {
            return Err(IdentityError::new(
                IdentityErrorKind::Validation,
                format!("{} credential is empty", auth.mode.name()),
            ));
        }
        Ok(Self {
            http,
            auth,
            authority,
            tokens: Mutex::new(HashMap::new()),
        })
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub async fn clear_cache(&self) {
        self.tokens.lock().await.clear();
    }

    /// App-only token for `{scope}/.default`, served from cache until it expires.
    pub async fn acquire_token_by_client_credential(&self, scope: &str) -> IdentityResult<AccessToken> {
        let scope = format!("{}/.default", scope.trim_end_matches('/'));
        if let Some(token) = self.tokens.lock().await.get(&scope) {
            if !token.is_expired() {
                return Ok(token.clone());
            }
        }

        let url = token_url(&self.authority);
        debug!("Azure AD token request → {} ({})", url, scope);
        let mut form = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", self.auth.client_id.clone()),
            ("scope", scope.clone()),
        ];
        form.extend(self.credential_params(&url)?);

        let resp: TokenResponse = self.http.post_form(&url, &as_pairs(&form)).await?;
        let token = token_from_response(resp);
        self.tokens.lock().await.insert(scope, token.clone());
        Ok(token)
    }

    /// Login page URL for the authorization-code flow.
    pub fn auth_code_url(&self, request: &UserTokenRequest) -> IdentityResult<String> {
        let mut url = Url::parse(&authorize_url(&self.authority))
            .map_err(|e| IdentityError::new(IdentityErrorKind::Validation, format!("authority: {e}")))?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("client_id", &self.auth.client_id)
                .append_pair("scope", &user_scopes(&request.scopes))
                .append_pair("redirect_uri", &request.redirect_uri)
                .append_pair("response_type", "code")
                .append_pair("response_mode", "query");
            if let Some(state) = request.state.as_deref().filter(|s| !s.is_empty()) {
                q.append_pair("state", state);
            }
        }
        Ok(url.into())
    }

    /// Redeem an authorization code for a user token.
    pub async fn acquire_token_by_code(
        &self,
        request: &UserTokenRequest,
        code: &str,
    ) -> IdentityResult<(AccessToken, Option<UserAccount>)> {
        let url = token_url(&self.authority);
        debug!("Azure AD code redemption → {}", url);
        let mut form = vec![
            ("grant_type", "authorization_code".to_string()),
            ("client_id", self.auth.client_id.clone()),
            ("scope", user_scopes(&request.scopes)),
            ("code", code.to_string()),
            ("redirect_uri", request.redirect_uri.clone()),
        ];
        form.extend(self.credential_params(&url)?);

        let resp: TokenResponse = self.http.post_form(&url, &as_pairs(&form)).await?;
        let account = resp
            .id_token
            .as_deref()
            .and_then(|t| account_from_id_token(t, &self.authority));
        Ok((token_from_response(resp), account))
    }

    fn credential_params(&self, audience: &str) -> IdentityResult<Vec<(&'static str, String)>> {
        Ok(match &self.auth.mode {
            AuthMode::ClientSecret { client_secret } => {
                vec![("client_secret", client_secret.clone())]
            }
            AuthMode::Certificate {
                thumbprint,
                private_key,
            } => vec![
                ("client_assertion_type", ASSERTION_TYPE.to_string()),
                (
                    "client_assertion",
                    client_assertion(&self.auth.client_id, thumbprint, private_key, audience)?,
                ),
            ],
        })
    }
}

fn as_pairs<'a>(form: &'a [(&'a str, String)]) -> Vec<(&'a str, &'a str)> {
    form.iter().map(|(k, v)| (*k, v.as_str())).collect()
}

fn user_scopes(scopes: &[String]) -> String {
    let mut all: Vec<&str> = scopes.iter().map(String::as_str).collect();
    for s in OIDC_SCOPES {
        if !all.contains(&s) {
            all.push(s);
        }
    }
    all.join(" ")
}

/// Convert the raw token endpoint response into a cached `AccessToken`.
fn token_from_response(resp: TokenResponse) -> AccessToken {
    let expires_at = resp
        .expires_in
        .map(|secs| Utc::now() + Duration::seconds(secs as i64));

    AccessToken {
        access_token: resp.access_token,
        token_type: resp.token_type,
        expires_at,
    }
}

// ─── Certificate assertion ───────────────────────────────────────────

#[derive(Debug, Serialize)]
struct AssertionClaims {
    aud: String,
    iss: String,
    sub: String,
    jti: String,
    nbf: i64,
    exp: i64,
}

/// `x5t` header value: the hex thumbprint's bytes, base64url-encoded.
pub fn thumbprint_x5t(thumbprint: &str) -> IdentityResult<String> {
    let cleaned: String = thumbprint.chars().filter(|c| !c.is_whitespace() && *c != ':').collect();
    let bytes = hex::decode(cleaned).map_err(|e| {
        IdentityError::new(IdentityErrorKind::Certificate, format!("Invalid thumbprint: {e}"))
    })?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// RS256 client assertion for the token endpoint at `audience`.
pub fn client_assertion(
    client_id: &str,
    thumbprint: &str,
    private_key: &str,
    audience: &str,
) -> IdentityResult<String> {
    let now = Utc::now().timestamp();
    let claims = AssertionClaims {
        aud: audience.to_string(),
        iss: client_id.to_string(),
        sub: client_id.to_string(),
        jti: uuid::Uuid::new_v4().to_string(),
        nbf: now,
        exp: now + ASSERTION_LIFETIME,
    };

    let header = Header {
        alg: Algorithm::RS256,
        x5t: Some(thumbprint_x5t(thumbprint)?),
        ..Default::default()
    };

    // Normalise PEM line breaks.
    let pem = private_key.replace("\\n", "\n");
    let key = EncodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| {
        IdentityError::new(IdentityErrorKind::Certificate, format!("Failed to load private key: {e}"))
    })?;

    encode(&header, &claims, &key).map_err(|e| {
        IdentityError::new(IdentityErrorKind::Certificate, format!("Failed to encode JWT: {e}"))
    })
}

// ─── ID token ────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct IdTokenClaims {
    #[serde(default)]
    oid: Option<String>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    tid: Option<String>,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Account details from an (unverified) ID token payload.
fn account_from_id_token(id_token: &str, authority: &str) -> Option<UserAccount> {
    let payload = id_token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: IdTokenClaims = serde_json::from_slice(&bytes).ok()?;

    let local = claims.oid.or(claims.sub).unwrap_or_default();
    let tenant_id = claims.tid.unwrap_or_default();
    let environment = Url::parse(authority)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();
    Some(UserAccount {
        home_account_id: format!("{local}.{tenant_id}"),
        environment,
        tenant_id,
        username: claims.preferred_username.unwrap_or_default(),
        local_account_id: local,
        name: claims.name,
    })
}

// ─── Client registry ─────────────────────────────────────────────────

/// One [`ConfidentialClient`] per tenant and authentication mode.
pub struct ClientRegistry {
    http: IdentityHttp,
    clients: Mutex<HashMap<String, Arc<ConfidentialClient>>>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new(&IdentityConfig::default())
    }
}

impl ClientRegistry {
    pub fn new(config: &IdentityConfig) -> Self {
        Self {
            http: IdentityHttp::new(config),
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn client_key(tenant: &TenantInfo, auth: &AuthContext) -> String {
        format!("{}|{}", tenant.key(), auth.mode.name())
    }

    /// Existing client for the tenant/mode pair, or a new one.
    pub async fn client(&self, tenant: &TenantInfo, auth: &AuthContext) -> IdentityResult<Arc<ConfidentialClient>> {
        let key = Self::client_key(tenant, auth);
        let mut clients = self.clients.lock().await;
        if let Some(c) = clients.get(&key) {
            return Ok(Arc::clone(c));
        }

        let authority = tenant.authority_url.as_deref().ok_or_else(|| {
            IdentityError::new(IdentityErrorKind::Validation, "tenant has no authority URL")
        })?;
        debug!("new confidential client for {}", key);
        let client = Arc::new(ConfidentialClient::new(self.http.clone(), auth.clone(), authority)?);
        clients.insert(key, Arc::clone(&client));
        Ok(client)
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }

    /// Redeem `request.code` when present; otherwise, or if redemption
    /// fails, return the login URL to send the user to.
    pub async fn user_token(
        &self,
        tenant: &TenantInfo,
        auth: &AuthContext,
        request: &UserTokenRequest,
        clear_cache: bool,
    ) -> IdentityResult<UserTokenResult> {
        let client = self.client(tenant, auth).await?;
        if clear_cache {
            client.clear_cache().await;
        }

        let mut redeem_error = None;
        if let Some(code) = request.code.as_deref().filter(|c| !c.is_empty()) {
            match client.acquire_token_by_code(request, code).await {
                Ok((token, account)) => {
                    return Ok(UserTokenResult::Token {
                        access_token: token.access_token,
                        account,
                    })
                }
                Err(e) => {
                    error!("could not redeem code: {}", e);
                    redeem_error = Some(format!("Could not redeem code: {}", e.message));
                }
            }
        }

        Ok(UserTokenResult::Redirect {
            redirect: client.auth_code_url(request)?,
            error: redeem_error,
        })
    }
}

#[async_trait]
impl TokenProvider for ClientRegistry {
    async fn acquire_token(
        &self,
        tenant: &TenantInfo,
        auth: &AuthContext,
        scope: &str,
        clear_cache: bool,
    ) -> IdentityResult<String> {
        let client = self.client(tenant, auth).await?;
        if clear_cache {
            client.clear_cache().await;
        }
        Ok(client.acquire_token_by_client_credential(scope).await?.access_token)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
