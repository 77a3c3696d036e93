//! Request configuration for bearer-authenticated REST calls.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use crate::types::{IdentityError, IdentityErrorKind, IdentityResult};

/// Content types understood by Graph and SharePoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Json,
    /// SharePoint REST without OData metadata.
    JsonNoMetadata,
    Xml,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::JsonNoMetadata => "application/json; odata=nometadata",
            Self::Xml => "application/xml",
        }
    }
}

/// Headers to attach to an outgoing request.
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
    headers: HeaderMap,
}

impl RequestConfig {
    /// `authorization` is used verbatim; the content type is sent as both
    /// `Content-Type` and `Accept`.
    pub fn new(authorization: Option<&str>, content_type: Option<ContentType>) -> IdentityResult<Self> {
        let mut headers = HeaderMap::new();
        if let Some(auth) = authorization.filter(|a| !a.is_empty()) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(auth).map_err(|e| {
                    IdentityError::new(IdentityErrorKind::Auth, format!("Header value error: {e}"))
                })?,
            );
        }
        if let Some(ct) = content_type {
            let value = HeaderValue::from_static(ct.as_str());
            headers.insert(CONTENT_TYPE, value.clone());
            headers.insert(ACCEPT, value);
        }
        Ok(Self { headers })
    }

    pub fn bearer(token: &str, content_type: Option<ContentType>) -> IdentityResult<Self> {
        Self::new(Some(&format!("Bearer {token}")), content_type)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn authorization(&self) -> Option<&str> {
        self.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok())
    }

    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        request.headers(self.headers.clone())
    }
}

/// HTTP client that accepts self-signed certificates.
pub fn insecure_client(timeout: Duration) -> IdentityResult<Client> {
    Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(timeout)
        .build()
        .map_err(|e| IdentityError::new(IdentityErrorKind::Network, format!("{e}")))
}

/// Code and message pulled out of a failed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    pub code: String,
    pub message: String,
}

#[derive(Deserialize)]
struct ODataErrorEnvelope {
    #[serde(rename = "odata.error", alias = "error")]
    error: Option<ODataErrorBody>,
}

#[derive(Deserialize)]
struct ODataErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<ODataErrorMessage>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ODataErrorMessage {
    Text(String),
    Localized { value: Option<String> },
}

/// Extract `odata.error.code` / `message.value` from a response body,
/// falling back to `"Unknown"` / `"Unspecified error"`.
pub fn error_data(body: &str) -> ErrorData {
    let mut data = ErrorData {
        code: "Unknown".into(),
        message: "Unspecified error".into(),
    };
    let Ok(ODataErrorEnvelope { error: Some(err) }) = serde_json::from_str(body) else {
        return data;
    };
    if let Some(code) = err.code.filter(|c| !c.is_empty()) {
        data.code = code;
    }
    let message = match err.message {
        Some(ODataErrorMessage::Text(t)) => Some(t),
        Some(ODataErrorMessage::Localized { value }) => value,
        None => None,
    };
    if let Some(message) = message.filter(|m| !m.is_empty()) {
        data.message = message;
    }
    data
}

impl From<&IdentityError> for ErrorData {
    fn from(e: &IdentityError) -> Self {
        let mut data = error_data(&e.message);
        if data.code == "Unknown" {
            if let Some(status) = e.status_code {
                data.code = status.to_string();
            }
        }
        if data.message == "Unspecified error" && !e.message.is_empty() && !e.message.starts_with('{') {
            data.message = e.message.clone();
        }
        data
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_header() {
        let c = RequestConfig::bearer("abc", None).unwrap();
        assert_eq!(c.authorization(), Some("Bearer abc"));
        assert!(c.headers().get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn content_type_sets_accept() {
        let c = RequestConfig::bearer("t", Some(ContentType::JsonNoMetadata)).unwrap();
        assert_eq!(c.headers()[CONTENT_TYPE], "application/json; odata=nometadata");
        assert_eq!(c.headers()[ACCEPT], "application/json; odata=nometadata");
    }

    #[test]
    fn no_token_no_header() {
        let c = RequestConfig::new(None, Some(ContentType::Xml)).unwrap();
        assert!(c.authorization().is_none());
        assert_eq!(c.headers()[ACCEPT], "application/xml");
        assert!(RequestConfig::new(Some(""), None).unwrap().headers().is_empty());
    }

    #[test]
    fn invalid_header_value() {
        assert!(RequestConfig::bearer("bad\ntoken", None).is_err());
    }

    #[test]
    fn apply_attaches_headers() {
        let c = RequestConfig::bearer("t", Some(ContentType::Json)).unwrap();
        let req = c.apply(Client::new().get("http://localhost/")).build().unwrap();
        assert_eq!(req.headers()[AUTHORIZATION], "Bearer t");
        assert_eq!(req.headers()[ACCEPT], "application/json");
    }

    #[test]
    fn insecure_client_builds() {
        assert!(insecure_client(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn error_data_from_odata_payload() {
        let d = error_data(
            r#"{"odata.error":{"code":"-2130575338, Microsoft.SharePoint.SPException","message":{"lang":"en-US","value":"List does not exist"}}}"#,
        );
        assert_eq!(d.code, "-2130575338, Microsoft.SharePoint.SPException");
        assert_eq!(d.message, "List does not exist");
    }

    #[test]
    fn error_data_from_graph_payload() {
        let d = error_data(r#"{"error":{"code":"itemNotFound","message":"Not found"}}"#);
        assert_eq!(d.code, "itemNotFound");
        assert_eq!(d.message, "Not found");
    }

    #[test]
    fn error_data_fallbacks() {
        let d = error_data("<html>oops</html>");
        assert_eq!(d, ErrorData { code: "Unknown".into(), message: "Unspecified error".into() });
        let d = error_data(r#"{"odata.error":{}}"#);
        assert_eq!(d.code, "Unknown");
    }

    #[test]
    fn error_data_from_identity_error() {
        let e = IdentityError::from_status(404, r#"{"odata.error":{"code":"NotFound","message":{"value":"gone"}}}"#);
        assert_eq!(ErrorData::from(&e), ErrorData { code: "NotFound".into(), message: "gone".into() });
        let e = IdentityError::from_status(502, "bad gateway");
        assert_eq!(ErrorData::from(&e), ErrorData { code: "502".into(), message: "bad gateway".into() });
    }
}
