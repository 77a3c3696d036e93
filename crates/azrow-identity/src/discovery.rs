//! Tenant discovery from a host name.
//!
//! SharePoint hosts (`contoso.sharepoint.com`, `contoso-admin.sharepoint.us`)
//! map to the tenant's initial domain; any other host (an Exchange e-mail
//! domain, a verified custom domain) is looked up as is. The tenant's OpenID
//! configuration yields the tenant id and cloud.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use log::{debug, warn};
use serde::Deserialize;
use tokio::sync::{Mutex, OnceCell};

use crate::client::IdentityHttp;
use crate::types::{AzureEnvironment, IdentityConfig, TenantInfo};

#[derive(Debug, Deserialize)]
struct OpenIdConfiguration {
    token_endpoint: String,
    #[serde(default)]
    cloud_instance_name: Option<String>,
    #[serde(default)]
    msgraph_host: Option<String>,
}

/// Tenant name to look up for `host` (already lowercased).
pub fn friendly_name(host: &str) -> String {
    if !host.contains(".sharepoint.") {
        return host.to_string();
    }
    let parts: Vec<&str> = host.split('.').collect();
    let first = parts[0].strip_suffix("-admin").unwrap_or(parts[0]);
    let tld = match parts.last() {
        Some(&"us") => "us",
        Some(&"de") => "de",
        _ => "com",
    };
    format!("{first}.onmicrosoft.{tld}")
}

/// Third path component of `https://host/{tenant}/oauth2/...`.
pub fn tenant_id_from_token_endpoint(endpoint: &str) -> Option<String> {
    endpoint
        .replacen("//", "/", 1)
        .split('/')
        .nth(2)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Memoizing tenant discoverer; one lookup per host for its lifetime.
pub struct TenantDiscovery {
    http: IdentityHttp,
    endpoint: String,
    known: Mutex<HashMap<String, Arc<OnceCell<TenantInfo>>>>,
}

impl Default for TenantDiscovery {
    fn default() -> Self {
        Self::new(&IdentityConfig::default())
    }
}

impl TenantDiscovery {
    pub fn new(config: &IdentityConfig) -> Self {
        Self {
            http: IdentityHttp::new(config),
            endpoint: config.discovery_endpoint.trim_end_matches('/').to_string(),
            known: Mutex::new(HashMap::new()),
        }
    }

    /// Discover the tenant behind `host`. Failures yield `valid: false` and
    /// are memoized too.
    pub async fn discover(&self, host: &str) -> TenantInfo {
        let host = host.to_lowercase();
        let cell = {
            let mut known = self.known.lock().await;
            Arc::clone(known.entry(host.clone()).or_default())
        };
        cell.get_or_init(|| self.lookup(&host)).await.clone()
    }

    async fn lookup(&self, host: &str) -> TenantInfo {
        let name = friendly_name(host);
        let url = format!("{}/{}/v2.0/.well-known/openid-configuration", self.endpoint, name);
        debug!("tenant discovery {} → {}", host, url);

        let config: OpenIdConfiguration = match self.http.get_json(&url).await {
            Ok(c) => c,
            Err(e) => {
                warn!("tenant discovery for {} failed: {}", host, e);
                return TenantInfo::default();
            }
        };

        let environment = config
            .cloud_instance_name
            .as_deref()
            .map(AzureEnvironment::from_cloud_instance)
            .unwrap_or_default();
        let id_or_name = tenant_id_from_token_endpoint(&config.token_endpoint).unwrap_or(name);

        TenantInfo {
            ms_graph_host: config.msgraph_host,
            ..TenantInfo::new(environment, id_or_name)
        }
    }
}

/// Process-wide [`TenantDiscovery`] with default settings.
pub async fn discover_tenant_info(host: &str) -> TenantInfo {
    static DISCOVERY: OnceLock<TenantDiscovery> = OnceLock::new();
    DISCOVERY.get_or_init(TenantDiscovery::default).discover(host).await
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{serve, Reply};

    const CONFIG: &str = r#"{
        "token_endpoint": "https://login.microsoftonline.com/7d034656-be03-457d-8d82-60e90cf5f400/oauth2/token",
        "cloud_instance_name": "microsoftonline.com",
        "msgraph_host": "graph.microsoft.com"
    }"#;

    fn discovery_at(url: String) -> TenantDiscovery {
        TenantDiscovery::new(&IdentityConfig {
            discovery_endpoint: url,
            ..Default::default()
        })
    }

    #[test]
    fn sharepoint_hosts_map_to_initial_domain() {
        assert_eq!(friendly_name("contoso.sharepoint.com"), "contoso.onmicrosoft.com");
        assert_eq!(friendly_name("contoso-admin.sharepoint.com"), "contoso.onmicrosoft.com");
        assert_eq!(friendly_name("contoso.sharepoint.us"), "contoso.onmicrosoft.us");
        assert_eq!(friendly_name("contoso.sharepoint.de"), "contoso.onmicrosoft.de");
        assert_eq!(friendly_name("contoso.sharepoint.cn"), "contoso.onmicrosoft.com");
        assert_eq!(friendly_name("contoso.com"), "contoso.com");
    }

    #[test]
    fn tenant_id_extraction() {
        assert_eq!(
            tenant_id_from_token_endpoint("https://login.microsoftonline.com/abc/oauth2/token").as_deref(),
            Some("abc")
        );
        assert_eq!(tenant_id_from_token_endpoint("nonsense"), None);
    }

    #[tokio::test]
    async fn discovers_and_memoizes() {
        let server = serve(vec![Reply::json(200, CONFIG)]).await;
        let d = discovery_at(server.url(""));

        let info = d.discover("Contoso.SharePoint.com").await;
        assert!(info.valid);
        assert_eq!(info.id_or_name.as_deref(), Some("7d034656-be03-457d-8d82-60e90cf5f400"));
        assert_eq!(
            info.authority_url.as_deref(),
            Some("https://login.microsoftonline.com/7d034656-be03-457d-8d82-60e90cf5f400")
        );
        assert_eq!(info.environment, AzureEnvironment::Production);
        assert_eq!(info.ms_graph_host.as_deref(), Some("graph.microsoft.com"));

        let again = d.discover("contoso.sharepoint.com").await;
        assert_eq!(again, info);
        assert_eq!(server.hits(), 1);
        assert_eq!(
            server.requests().await[0].path,
            "/contoso.onmicrosoft.com/v2.0/.well-known/openid-configuration"
        );
    }

    #[tokio::test]
    async fn concurrent_lookups_share_one_request() {
        let server = serve(vec![Reply::json(200, CONFIG)]).await;
        let d = discovery_at(server.url(""));
        let (a, b) = tokio::join!(d.discover("contoso.com"), d.discover("CONTOSO.COM"));
        assert_eq!(a, b);
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn government_cloud() {
        let body = r#"{"token_endpoint":"https://login.microsoftonline.us/t-gov/oauth2/token","cloud_instance_name":"microsoftonline.us"}"#;
        let server = serve(vec![Reply::json(200, body)]).await;
        let info = discovery_at(server.url("")).discover("fabrikam.sharepoint.us").await;
        assert_eq!(info.environment, AzureEnvironment::USGovernment);
        assert_eq!(info.authority_url.as_deref(), Some("https://login.microsoftonline.us/t-gov"));
    }

    #[tokio::test]
    async fn failure_is_invalid() {
        let server = serve(vec![Reply::json(400, r#"{"error":"invalid_tenant"}"#)]).await;
        let info = discovery_at(server.url("")).discover("nobody.example").await;
        assert!(!info.valid);
        assert!(info.id_or_name.is_none());
        assert!(info.authority_url.is_none());
    }
}
