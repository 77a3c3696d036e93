//! Core types for Azure AD authentication and request shaping.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Error types ─────────────────────────────────────────────────────

/// Categorised error kinds for identity operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdentityErrorKind {
    Auth,
    NotFound,
    Forbidden,
    RateLimit,
    BadRequest,
    ServerError,
    Network,
    Parse,
    Validation,
    Certificate,
    NotConfigured,
}

impl fmt::Display for IdentityErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth => write!(f, "Authentication error"),
            Self::NotFound => write!(f, "Resource not found"),
            Self::Forbidden => write!(f, "Forbidden"),
            Self::RateLimit => write!(f, "Rate limit exceeded"),
            Self::BadRequest => write!(f, "Bad request"),
            Self::ServerError => write!(f, "Server error"),
            Self::Network => write!(f, "Network error"),
            Self::Parse => write!(f, "Parse error"),
            Self::Validation => write!(f, "Validation error"),
            Self::Certificate => write!(f, "Certificate error"),
            Self::NotConfigured => write!(f, "Not configured"),
        }
    }
}

/// Main error type for identity operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityError {
    pub kind: IdentityErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl IdentityError {
    pub fn new(kind: IdentityErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
        }
    }

    pub fn with_status(kind: IdentityErrorKind, message: impl Into<String>, status: u16) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: Some(status),
        }
    }

    /// Keeps the response body as the message so callers can still
    /// extract the service's error payload.
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            400 => IdentityErrorKind::BadRequest,
            401 => IdentityErrorKind::Auth,
            403 => IdentityErrorKind::Forbidden,
            404 => IdentityErrorKind::NotFound,
            429 => IdentityErrorKind::RateLimit,
            500..=599 => IdentityErrorKind::ServerError,
            _ => IdentityErrorKind::Network,
        };
        Self::with_status(kind, body.to_string(), status)
    }

    pub fn not_configured(what: &str) -> Self {
        Self::new(
            IdentityErrorKind::NotConfigured,
            format!("{what} authentication is not configured"),
        )
    }
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::error::Error for IdentityError {}

impl From<IdentityError> for String {
    fn from(e: IdentityError) -> String {
        e.to_string()
    }
}

pub type IdentityResult<T> = Result<T, IdentityError>;

// ─── App credentials ─────────────────────────────────────────────────

/// How the application proves its identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "authenticationMode", rename_all = "camelCase")]
pub enum AuthMode {
    #[serde(rename_all = "camelCase")]
    ClientSecret { client_secret: String },
    /// SharePoint app-only calls accept certificates only.
    #[serde(rename_all = "camelCase")]
    Certificate { thumbprint: String, private_key: String },
}

impl AuthMode {
    /// Stable name used in client cache keys.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ClientSecret { .. } => "clientSecret",
            Self::Certificate { .. } => "certificate",
        }
    }
}

/// App registration used for app-only and user tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    pub client_id: String,
    #[serde(flatten)]
    pub mode: AuthMode,
}

impl AuthContext {
    pub fn client_secret(client_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            mode: AuthMode::ClientSecret {
                client_secret: secret.into(),
            },
        }
    }

    pub fn certificate(
        client_id: impl Into<String>,
        thumbprint: impl Into<String>,
        private_key: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            mode: AuthMode::Certificate {
                thumbprint: thumbprint.into(),
                private_key: private_key.into(),
            },
        }
    }
}

// ─── Tenants ─────────────────────────────────────────────────────────

/// National cloud a tenant lives in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AzureEnvironment {
    #[default]
    Production,
    Ppe,
    China,
    Germany,
    USGovernment,
}

impl AzureEnvironment {
    /// Azure AD login host for this cloud.
    pub fn login_endpoint(self) -> &'static str {
        match self {
            Self::Production => "https://login.microsoftonline.com",
            Self::Ppe => "https://login.windows-ppe.net",
            Self::China => "https://login.chinacloudapi.cn",
            Self::Germany => "https://login.microsoftonline.de",
            Self::USGovernment => "https://login.microsoftonline.us",
        }
    }

    /// Map a `cloud_instance_name` from an OpenID configuration.
    pub fn from_cloud_instance(instance: &str) -> Self {
        match instance.to_ascii_lowercase().as_str() {
            "microsoftonline.us" => Self::USGovernment,
            "microsoftonline.de" => Self::Germany,
            "chinacloudapi.cn" | "partner.microsoftonline.cn" => Self::China,
            "windows-ppe.net" => Self::Ppe,
            _ => Self::Production,
        }
    }
}

/// Result of tenant discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantInfo {
    pub environment: AzureEnvironment,
    pub id_or_name: Option<String>,
    pub authority_url: Option<String>,
    pub valid: bool,
    pub ms_graph_host: Option<String>,
}

impl TenantInfo {
    /// Tenant addressed directly by id or verified domain.
    pub fn new(environment: AzureEnvironment, id_or_name: impl Into<String>) -> Self {
        let id_or_name = id_or_name.into();
        Self {
            environment,
            authority_url: Some(format!("{}/{}", environment.login_endpoint(), id_or_name)),
            id_or_name: Some(id_or_name),
            valid: true,
            ms_graph_host: None,
        }
    }

    pub fn key(&self) -> &str {
        self.id_or_name.as_deref().unwrap_or_default()
    }
}

// ─── Tokens ──────────────────────────────────────────────────────────

/// Cached bearer token.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// Expired, or within a minute of expiring.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(exp) => Utc::now() + chrono::Duration::seconds(60) >= exp,
            None => false,
        }
    }
}

/// Raw token endpoint response.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub id_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".into()
}

// ─── User tokens ─────────────────────────────────────────────────────

/// Authorization-code request for a signed-in user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTokenRequest {
    pub scopes: Vec<String>,
    /// Page that receives `code` after the user logs in.
    pub redirect_uri: String,
    #[serde(default)]
    pub state: Option<String>,
    /// Code from the redirect, to redeem.
    #[serde(default)]
    pub code: Option<String>,
}

/// Account the user token was issued to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    pub home_account_id: String,
    pub environment: String,
    pub tenant_id: String,
    pub username: String,
    pub local_account_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserTokenResult {
    Token {
        access_token: String,
        account: Option<UserAccount>,
    },
    /// Send the user to `redirect`; `error` says why a code was not redeemed.
    Redirect {
        redirect: String,
        error: Option<String>,
    },
}

impl UserTokenResult {
    pub fn success(&self) -> bool {
        matches!(self, Self::Token { .. })
    }
}

// ─── Configuration ───────────────────────────────────────────────────

/// HTTP settings for the identity crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentityConfig {
    pub request_timeout_secs: u64,
    /// Host queried for OpenID configurations during discovery.
    pub discovery_endpoint: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            discovery_endpoint: AzureEnvironment::Production.login_endpoint().to_string(),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
