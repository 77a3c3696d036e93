//! Local emulator detection.

use std::time::Duration;

use log::debug;
use reqwest::header::SERVER;

/// Blob endpoint of a default local Azurite.
pub const DEFAULT_AZURITE_ENDPOINT: &str = "http://127.0.0.1:10000/";

/// True when `endpoint` answers with an Azurite `Server` header.
///
/// Any response status counts; connection failures and other servers do not.
pub async fn is_azurite_running(endpoint: &str) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            debug!("azurite probe: client build failed: {}", e);
            return false;
        }
    };

    match client.get(endpoint).send().await {
        Ok(resp) => resp
            .headers()
            .get(SERVER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(is_azurite_server),
        Err(e) => {
            debug!("azurite probe {} failed: {}", endpoint, e);
            false
        }
    }
}

fn is_azurite_server(server: &str) -> bool {
    server.to_ascii_lowercase().contains("azurite")
}
