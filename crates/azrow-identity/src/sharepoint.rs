//! SharePoint Online request context.

use std::sync::Arc;

use crate::auth::TokenProvider;
use crate::graph::{bearer_token, TokenOptions};
use crate::request::{ContentType, RequestConfig};
use crate::types::{AuthContext, IdentityError, IdentityResult, TenantInfo};

/// Resource scope for a SharePoint host.
pub fn site_scope(host: &str) -> String {
    format!("https://{}", host.trim_end_matches('/'))
}

/// Builds bearer request configs for SharePoint REST calls.
///
/// App-only tokens need certificate credentials; SharePoint rejects
/// secret-based app tokens unless custom app authentication is enabled
/// on the tenant.
pub struct SharePointContext {
    auth: AuthContext,
    provider: Arc<dyn TokenProvider>,
}

impl SharePointContext {
    pub fn new(auth: Option<AuthContext>, provider: Arc<dyn TokenProvider>) -> IdentityResult<Self> {
        let auth = auth.ok_or_else(|| IdentityError::not_configured("SharePoint"))?;
        Ok(Self { auth, provider })
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    pub async fn request_config(
        &self,
        tenant: &TenantInfo,
        host: &str,
        options: impl Into<TokenOptions>,
    ) -> IdentityResult<RequestConfig> {
        let options = options.into();
        let scope = site_scope(host);
        let token = bearer_token(self.provider.as_ref(), &self.auth, tenant, &scope, &options).await?;
        RequestConfig::bearer(&token, Some(ContentType::JsonNoMetadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::RecordingProvider;
    use crate::types::{AzureEnvironment, IdentityErrorKind};
    use reqwest::header::{ACCEPT, CONTENT_TYPE};

    #[test]
    fn scope_from_host() {
        assert_eq!(site_scope("contoso.sharepoint.com"), "https://contoso.sharepoint.com");
        assert_eq!(site_scope("contoso.sharepoint.com/"), "https://contoso.sharepoint.com");
    }

    #[test]
    fn requires_auth() {
        let err = SharePointContext::new(None, Arc::new(RecordingProvider::default())).err().unwrap();
        assert_eq!(err.kind, IdentityErrorKind::NotConfigured);
    }

    #[tokio::test]
    async fn app_only_config() {
        let provider = Arc::new(RecordingProvider::default());
        let ctx = SharePointContext::new(
            Some(AuthContext::certificate("app", "0102", "pem")),
            provider.clone(),
        )
        .unwrap();
        let tenant = TenantInfo::new(AzureEnvironment::Production, "contoso.onmicrosoft.com");
        let cfg = ctx.request_config(&tenant, "contoso.sharepoint.com", false).await.unwrap();
        assert_eq!(cfg.authorization(), Some("Bearer app-https://contoso.sharepoint.com"));
        assert_eq!(cfg.headers()[CONTENT_TYPE], "application/json; odata=nometadata");
        assert_eq!(cfg.headers()[ACCEPT], "application/json; odata=nometadata");
        assert_eq!(provider.calls.lock().await[0].1, "https://contoso.sharepoint.com");
    }

    #[tokio::test]
    async fn user_token_keeps_content_type() {
        let provider = Arc::new(RecordingProvider::default());
        let ctx = SharePointContext::new(Some(AuthContext::client_secret("app", "s")), provider.clone()).unwrap();
        let tenant = TenantInfo::new(AzureEnvironment::Production, "contoso.onmicrosoft.com");
        let cfg = ctx
            .request_config(&tenant, "contoso.sharepoint.com", TokenOptions::user("u"))
            .await
            .unwrap();
        assert_eq!(cfg.authorization(), Some("Bearer u"));
        assert_eq!(cfg.headers()[ACCEPT], "application/json; odata=nometadata");
        assert!(provider.calls.lock().await.is_empty());
    }
}
