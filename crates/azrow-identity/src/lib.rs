//! # azrow-identity
//!
//! Azure AD authentication and request shaping for Microsoft 365 REST calls.
//!
//! ## Features
//!
//! - **App-only tokens** – client secret or certificate (JWT assertion), cached per scope
//! - **Client registry** – one confidential client per tenant and auth mode
//! - **User tokens** – authorization-code redemption or a login redirect
//! - **Tenant discovery** – SharePoint host / domain → tenant id, cloud, authority
//! - **TTL cache** – memoize async lookups with success / failure lifetimes
//! - **Request configs** – bearer headers for Graph and SharePoint, error payload extraction

pub mod types;
pub mod client;
pub mod auth;
pub mod discovery;
pub mod cache;
pub mod request;
pub mod graph;
pub mod sharepoint;

#[cfg(test)]
mod testing;

pub use auth::{client_assertion, thumbprint_x5t, ClientRegistry, ConfidentialClient, TokenProvider};
pub use cache::{CacheOptions, Fetched, TtlCache};
pub use client::IdentityHttp;
pub use discovery::{discover_tenant_info, TenantDiscovery};
pub use graph::{GraphContext, TokenOptions, GRAPH_SCOPE};
pub use request::{error_data, insecure_client, ContentType, ErrorData, RequestConfig};
pub use sharepoint::{site_scope, SharePointContext};
pub use types::{
    AccessToken, AuthContext, AuthMode, AzureEnvironment, IdentityConfig, IdentityError,
    IdentityErrorKind, IdentityResult, TenantInfo, UserAccount, UserTokenRequest,
    UserTokenResult,
};
