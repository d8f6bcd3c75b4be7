//! HTTP client construction and request header mapping

use crate::error::RangedlError;
use rangedl_types::Settings;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, NoProxy, Proxy};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Build the shared HTTP client from settings
pub fn build_client(settings: &Settings) -> Result<Client, RangedlError> {
    let mut builder = Client::builder()
        .user_agent(settings.user_agent.as_str())
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
        .timeout(Duration::from_secs(settings.request_timeout_secs));

    let proxy = &settings.proxy;
    match proxy.mode.as_str() {
        "none" => {
            builder = builder.no_proxy();
        }
        "manual" => {
            let no_proxy = proxy.no_proxy.as_deref().and_then(NoProxy::from_string);
            if let Some(http) = &proxy.http_proxy {
                let p = Proxy::http(http)
                    .map_err(|e| RangedlError::Config(format!("http proxy: {}", e)))?
                    .no_proxy(no_proxy.clone());
                builder = builder.proxy(p);
            }
            if let Some(https) = &proxy.https_proxy {
                let p = Proxy::https(https)
                    .map_err(|e| RangedlError::Config(format!("https proxy: {}", e)))?
                    .no_proxy(no_proxy);
                builder = builder.proxy(p);
            }
        }
        // reqwest honors HTTP(S)_PROXY / NO_PROXY from the environment by default
        "system" => {}
        other => {
            return Err(RangedlError::Config(format!("unknown proxy mode '{}'", other)));
        }
    }

    debug!(
        "Building HTTP client (user agent {:?}, timeout {}s, proxy mode {})",
        settings.user_agent, settings.request_timeout_secs, proxy.mode
    );
    builder
        .build()
        .map_err(|e| RangedlError::Config(e.to_string()))
}

/// Convert caller-supplied headers into a `HeaderMap`
pub fn header_map(headers: &HashMap<String, String>) -> Result<HeaderMap, RangedlError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| RangedlError::InvalidHeader(format!("{}: {}", key, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| RangedlError::InvalidHeader(format!("{}: {}", key, e)))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rangedl_types::ProxySettings;

    #[test]
    fn maps_valid_headers() {
        let mut headers = HashMap::new();
        headers.insert("Referer".to_string(), "https://example.com/".to_string());
        headers.insert("x-token".to_string(), "abc".to_string());
        let map = header_map(&headers).unwrap();
        assert_eq!(map.get("referer").unwrap(), "https://example.com/");
        assert_eq!(map.get("X-Token").unwrap(), "abc");
    }

    #[test]
    fn rejects_invalid_header_names() {
        let mut headers = HashMap::new();
        headers.insert("bad header".to_string(), "v".to_string());
        assert!(matches!(
            header_map(&headers),
            Err(RangedlError::InvalidHeader(_))
        ));
    }

    #[test]
    fn rejects_unknown_proxy_mode() {
        let settings = Settings {
            proxy: ProxySettings {
                mode: "carrier-pigeon".to_string(),
                ..ProxySettings::default()
            },
            ..Settings::default()
        };
        assert!(matches!(build_client(&settings), Err(RangedlError::Config(_))));
    }

    #[test]
    fn builds_manual_proxy_client() {
        let settings = Settings {
            proxy: ProxySettings {
                mode: "manual".to_string(),
                http_proxy: Some("http://127.0.0.1:3128".to_string()),
                https_proxy: Some("http://127.0.0.1:3128".to_string()),
                no_proxy: Some("localhost,127.0.0.1".to_string()),
            },
            ..Settings::default()
        };
        assert!(build_client(&settings).is_ok());
    }
}
