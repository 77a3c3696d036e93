//! Table-storage configuration and connection-string parsing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::overflow::TABLE_COLUMN_LENGTH_LIMIT;
use crate::types::{TablesError, TablesResult};

/// Well-known emulator account (Azurite / storage emulator).
pub const DEV_ACCOUNT_NAME: &str = "devstoreaccount1";
pub const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
pub const DEV_TABLE_ENDPOINT: &str = "http://127.0.0.1:10002/devstoreaccount1";

/// Settings handed to [`crate::accessor::TableAccessor::from_config`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TableStorageConfig {
    pub connection_string: String,
    /// Longest string a `Table` writes into one column before splitting it
    /// into overflow columns, in UTF-16 units.
    pub column_length_limit: usize,
    pub request_timeout_secs: u64,
}

impl Default for TableStorageConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            column_length_limit: TABLE_COLUMN_LENGTH_LIMIT,
            request_timeout_secs: 30,
        }
    }
}

impl TableStorageConfig {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            ..Default::default()
        }
    }

    /// Emulator shortcut.
    pub fn development() -> Self {
        Self::new("UseDevelopmentStorage=true")
    }
}

/// Credentials used to authorize table requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageCredential {
    SharedKey { account_name: String, account_key: String },
    /// Query string of a shared access signature, without the leading `?`.
    Sas(String),
}

/// A parsed storage connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub account_name: String,
    pub table_endpoint: String,
    pub credential: StorageCredential,
}

impl ConnectionString {
    pub fn parse(input: &str) -> TablesResult<Self> {
        let parts: HashMap<String, String> = input
            .split(';')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| {
                p.split_once('=')
                    .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
                    .ok_or_else(|| TablesError::ConnectionString(format!("malformed segment '{p}'")))
            })
            .collect::<TablesResult<_>>()?;

        if parts
            .get("usedevelopmentstorage")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        {
            let endpoint = parts
                .get("developmentstorageproxyuri")
                .map(|proxy| format!("{}:10002/{}", proxy.trim_end_matches('/'), DEV_ACCOUNT_NAME))
                .unwrap_or_else(|| DEV_TABLE_ENDPOINT.to_string());
            return Ok(Self {
                account_name: DEV_ACCOUNT_NAME.into(),
                table_endpoint: endpoint,
                credential: StorageCredential::SharedKey {
                    account_name: DEV_ACCOUNT_NAME.into(),
                    account_key: DEV_ACCOUNT_KEY.into(),
                },
            });
        }

        let account_name = parts.get("accountname").cloned().unwrap_or_default();

        let table_endpoint = match parts.get("tableendpoint") {
            Some(ep) => ep.trim_end_matches('/').to_string(),
            None => {
                if account_name.is_empty() {
                    return Err(TablesError::ConnectionString(
                        "AccountName or TableEndpoint is required".into(),
                    ));
                }
                let protocol = parts
                    .get("defaultendpointsprotocol")
                    .map(String::as_str)
                    .unwrap_or("https");
                let suffix = parts
                    .get("endpointsuffix")
                    .map(String::as_str)
                    .unwrap_or("core.windows.net");
                format!("{protocol}://{account_name}.table.{suffix}")
            }
        };

        let credential = match (parts.get("accountkey"), parts.get("sharedaccesssignature")) {
            (Some(key), _) if !account_name.is_empty() => StorageCredential::SharedKey {
                account_name: account_name.clone(),
                account_key: key.clone(),
            },
            (_, Some(sas)) => StorageCredential::Sas(sas.trim_start_matches('?').to_string()),
            _ => {
                return Err(TablesError::ConnectionString(
                    "AccountName/AccountKey or SharedAccessSignature is required".into(),
                ))
            }
        };

        Ok(Self {
            account_name,
            table_endpoint,
            credential,
        })
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_storage() {
        let cs = ConnectionString::parse("UseDevelopmentStorage=true").unwrap();
        assert_eq!(cs.account_name, DEV_ACCOUNT_NAME);
        assert_eq!(cs.table_endpoint, DEV_TABLE_ENDPOINT);
        assert!(matches!(cs.credential, StorageCredential::SharedKey { .. }));
    }

    #[test]
    fn account_key_string() {
        let cs = ConnectionString::parse(
            "DefaultEndpointsProtocol=https;AccountName=acme;AccountKey=a2V5;EndpointSuffix=core.windows.net",
        )
        .unwrap();
        assert_eq!(cs.table_endpoint, "https://acme.table.core.windows.net");
        assert_eq!(
            cs.credential,
            StorageCredential::SharedKey {
                account_name: "acme".into(),
                account_key: "a2V5".into()
            }
        );
    }

    #[test]
    fn key_value_with_equals_padding() {
        let cs = ConnectionString::parse("AccountName=acme;AccountKey=abc==").unwrap();
        match cs.credential {
            StorageCredential::SharedKey { account_key, .. } => assert_eq!(account_key, "abc=="),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sas_with_explicit_endpoint() {
        let cs = ConnectionString::parse(
            "TableEndpoint=https://acme.table.core.windows.net/;SharedAccessSignature=?sv=2020&sig=x",
        )
        .unwrap();
        assert_eq!(cs.table_endpoint, "https://acme.table.core.windows.net");
        assert_eq!(cs.credential, StorageCredential::Sas("sv=2020&sig=x".into()));
    }

    #[test]
    fn missing_credentials() {
        assert!(ConnectionString::parse("AccountName=acme").is_err());
        assert!(ConnectionString::parse("garbage").is_err());
        assert!(ConnectionString::parse("").is_err());
    }

    #[test]
    fn config_defaults_from_json() {
        let cfg: TableStorageConfig =
            serde_json::from_str(r#"{"connectionString":"UseDevelopmentStorage=true"}"#).unwrap();
        assert_eq!(cfg.column_length_limit, TABLE_COLUMN_LENGTH_LIMIT);
        assert_eq!(cfg.request_timeout_secs, 30);
    }
}
