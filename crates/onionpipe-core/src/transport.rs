//! Anonymizing transport: HTTP through a local Tor SOCKS proxy.
//!
//! Uses async reqwest internally on a shared runtime but presents a blocking
//! interface; the pipeline is strictly one request at a time.

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::Url;
use reqwest::header::HeaderMap;
use serde::Deserialize;

use crate::control::{ControlError, TorControl};
use crate::error::FetchError;
use crate::pacing::SharedClock;

/// Tor endpoint and request settings
#[derive(Debug, Clone)]
pub struct TorConfig {
    pub proxy_host: String,
    /// SOCKS port (9150 for Tor Browser, 9050 for system tor)
    pub proxy_port: u16,
    pub control_port: u16,
    pub control_password: Option<String>,
    pub connect_timeout: Duration,
    /// Whole-request timeout (connect + read)
    pub timeout: Duration,
    /// Wait after NEWNYM before issuing requests
    pub settle: Duration,
    /// Accept self-signed/invalid certificates (onion-only endpoints)
    pub accept_invalid_certs: bool,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            proxy_host: "127.0.0.1".to_string(),
            proxy_port: 9150,
            control_port: 9051,
            control_password: None,
            connect_timeout: Duration::from_secs(60),
            timeout: Duration::from_secs(60),
            settle: Duration::from_secs(3),
            accept_invalid_certs: false,
        }
    }
}

impl TorConfig {
    /// `socks5h` so hostnames (including .onion) resolve inside Tor
    pub fn proxy_url(&self) -> String {
        format!("socks5h://{}:{}", self.proxy_host, self.proxy_port)
    }
}

/// One outgoing GET
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub headers: HeaderMap,
}

/// Response with any status; status classification is the caller's job
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: Url,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network seam of the pipeline
pub trait Transport {
    fn send(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;

    /// Force a new circuit. Blocks for the stabilization interval on success.
    fn rotate_identity(&self) -> Result<(), ControlError>;
}

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// reqwest client routed through Tor plus its control port
pub struct TorTransport {
    client: reqwest::Client,
    control: TorControl,
}

impl std::fmt::Debug for TorTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TorTransport")
            .field("control", &self.control)
            .finish_non_exhaustive()
    }
}

impl TorTransport {
    pub fn new(config: &TorConfig, clock: SharedClock) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .proxy(reqwest::Proxy::all(config.proxy_url())?)
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .pool_max_idle_per_host(2);

        if config.accept_invalid_certs {
            log::warn!("TLS certificate validation disabled");
            builder = builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }

        let control = TorControl::new(
            config.proxy_host.clone(),
            config.control_port,
            config.control_password.clone(),
            config.settle,
            clock,
        );

        Ok(Self {
            client: builder.build()?,
            control,
        })
    }
}

impl Transport for TorTransport {
    fn send(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        SHARED_RUNTIME.handle().block_on(async {
            let response = self
                .client
                .get(request.url.clone())
                .headers(request.headers.clone())
                .send()
                .await
                .map_err(|e| FetchError::from_reqwest(&e))?;

            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let url = response.url().clone();
            let body = response.text().await.map_err(|e| {
                if e.is_timeout() {
                    FetchError::from_reqwest(&e)
                } else {
                    FetchError::Parse(format!("undecodable body: {e}"))
                }
            })?;

            Ok(FetchResponse {
                url,
                status,
                headers,
                body,
            })
        })
    }

    fn rotate_identity(&self) -> Result<(), ControlError> {
        self.control.new_identity()
    }
}

/// Exit check endpoint operated by the Tor project
pub const TOR_CHECK_URL: &str = "https://check.torproject.org/api/ip";

/// Result of the exit probe
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TorExit {
    #[serde(rename = "IsTor")]
    pub is_tor: bool,
    #[serde(rename = "IP", default)]
    pub ip: String,
}

/// Ask check.torproject.org whether traffic leaves through Tor.
pub fn probe_exit(transport: &impl Transport) -> Result<TorExit, FetchError> {
    let url = Url::parse(TOR_CHECK_URL).map_err(|e| FetchError::Parse(e.to_string()))?;
    let response = transport.send(&FetchRequest {
        url,
        headers: HeaderMap::new(),
    })?;
    if !response.is_success() {
        return Err(FetchError::Status {
            status: response.status,
            challenge: false,
            snippet: snippet(&response.body),
        });
    }
    parse_exit(&response.body)
}

fn parse_exit(body: &str) -> Result<TorExit, FetchError> {
    serde_json::from_str(body).map_err(|e| FetchError::Parse(e.to_string()))
}

/// First 200 chars of a body, for logs
pub fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_url_uses_socks5h() {
        let config = TorConfig::default();
        assert_eq!(config.proxy_url(), "socks5h://127.0.0.1:9150");
    }

    #[test]
    fn default_config_is_strict_tls() {
        assert!(!TorConfig::default().accept_invalid_certs);
    }

    #[test]
    fn parse_exit_tor() {
        let exit = parse_exit(r#"{"IsTor":true,"IP":"185.220.101.1"}"#).unwrap();
        assert!(exit.is_tor);
        assert_eq!(exit.ip, "185.220.101.1");
    }

    #[test]
    fn parse_exit_garbage() {
        assert!(matches!(parse_exit("<html>"), Err(FetchError::Parse(_))));
    }

    #[test]
    fn snippet_truncates() {
        let body = "x".repeat(500);
        assert_eq!(snippet(&body).len(), 200);
        assert_eq!(snippet("short"), "short");
    }

    #[test]
    fn response_success_range() {
        let mut resp = FetchResponse {
            url: Url::parse("http://example.onion/").unwrap(),
            status: 204,
            headers: HeaderMap::new(),
            body: String::new(),
        };
        assert!(resp.is_success());
        resp.status = 302;
        assert!(!resp.is_success());
    }
}
