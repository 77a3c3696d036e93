//! Microsoft Graph request context.

use std::sync::Arc;

use crate::auth::TokenProvider;
use crate::request::RequestConfig;
use crate::types::{AuthContext, IdentityError, IdentityResult, TenantInfo};

/// Resource scope for Microsoft Graph.
pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com";

/// Per-call token options for Graph and SharePoint contexts.
#[derive(Debug, Clone, Default)]
pub struct TokenOptions {
    /// Use this token instead of an app-only one.
    pub user_token: Option<String>,
    pub clear_token_cache: bool,
}

impl TokenOptions {
    pub fn user(token: impl Into<String>) -> Self {
        Self {
            user_token: Some(token.into()),
            clear_token_cache: false,
        }
    }
}

impl From<bool> for TokenOptions {
    fn from(clear_token_cache: bool) -> Self {
        Self {
            user_token: None,
            clear_token_cache,
        }
    }
}

/// Resolve the bearer token for a call: the caller's user token when
/// given, otherwise an app-only token for `scope`.
pub(crate) async fn bearer_token(
    provider: &dyn TokenProvider,
    auth: &AuthContext,
    tenant: &TenantInfo,
    scope: &str,
    options: &TokenOptions,
) -> IdentityResult<String> {
    match options.user_token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => Ok(token.to_string()),
        None => {
            provider
                .acquire_token(tenant, auth, scope, options.clear_token_cache)
                .await
        }
    }
}

/// Builds bearer request configs for Graph calls. Secret and certificate
/// credentials both work.
pub struct GraphContext {
    auth: AuthContext,
    provider: Arc<dyn TokenProvider>,
}

impl GraphContext {
    pub fn new(auth: Option<AuthContext>, provider: Arc<dyn TokenProvider>) -> IdentityResult<Self> {
        let auth = auth.ok_or_else(|| IdentityError::not_configured("Graph"))?;
        Ok(Self { auth, provider })
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    pub async fn request_config(
        &self,
        tenant: &TenantInfo,
        options: impl Into<TokenOptions>,
    ) -> IdentityResult<RequestConfig> {
        let options = options.into();
        let token = bearer_token(self.provider.as_ref(), &self.auth, tenant, GRAPH_SCOPE, &options).await?;
        RequestConfig::bearer(&token, None)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
