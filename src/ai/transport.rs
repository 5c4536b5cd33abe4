use reqwest::{Client, Proxy};
use serde::Deserialize;
use thiserror::Error;

use crate::domain::ProxySettings;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("proxy host/port missing")]
    MissingHostOrPort,
    #[error("invalid proxy port: {0}")]
    InvalidPort(String),
    #[error("unsupported proxy scheme: {0}")]
    UnsupportedScheme(String),
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyScheme {
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyScheme {
    fn parse(raw: &str) -> Result<Self, ProxyError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            "socks4" => Ok(Self::Socks4),
            "socks5" => Ok(Self::Socks5),
            other => Err(ProxyError::UnsupportedScheme(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Socks4 => "socks4",
            Self::Socks5 => "socks5",
        }
    }
}

/// Proxy request as it arrives from the options page; the port may be a
/// string or a number.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyRequest {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: serde_json::Value,
    #[serde(default)]
    pub scheme: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    pub host: String,
    pub port: u16,
    pub scheme: ProxyScheme,
}

impl ProxyTarget {
    pub fn from_parts(host: &str, port: &str, scheme: &str) -> Result<Self, ProxyError> {
        let host: String = host.chars().filter(|c| !c.is_whitespace()).collect();
        let port = port.trim();
        if host.is_empty() || port.is_empty() {
            return Err(ProxyError::MissingHostOrPort);
        }
        let port = port
            .parse::<u16>()
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| ProxyError::InvalidPort(port.to_string()))?;
        Ok(Self {
            host,
            port,
            scheme: ProxyScheme::parse(scheme)?,
        })
    }

    pub fn from_request(request: &ProxyRequest) -> Result<Self, ProxyError> {
        let port = match &request.port {
            serde_json::Value::String(port) => port.clone(),
            serde_json::Value::Number(port) => port.to_string(),
            _ => String::new(),
        };
        Self::from_parts(&request.host, &port, request.scheme.as_deref().unwrap_or("http"))
    }

    /// Restores the proxy persisted by a previous session, if it is enabled
    /// and complete.
    pub fn from_settings(settings: &ProxySettings) -> Option<Self> {
        if !settings.enabled {
            return None;
        }
        match Self::from_parts(&settings.host, &settings.port, &settings.scheme) {
            Ok(target) => Some(target),
            Err(err) => {
                tracing::warn!(target: "provider", error = %err, "ignoring stored proxy settings");
                None
            }
        }
    }

    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

pub fn build_http_client(proxy: Option<&ProxyTarget>) -> Result<Client, ProxyError> {
    let mut builder =
        Client::builder().user_agent(format!("tab-grouper/{}", env!("CARGO_PKG_VERSION")));
    if let Some(target) = proxy {
        builder = builder.proxy(Proxy::all(target.url())?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn validates_host_port_and_scheme() {
        let target = ProxyTarget::from_parts(" 127.0.0.1 ", "1080", "SOCKS5").unwrap();
        assert_eq!(target.url(), "socks5://127.0.0.1:1080");

        assert!(matches!(
            ProxyTarget::from_parts("", "8080", "http"),
            Err(ProxyError::MissingHostOrPort)
        ));
        assert!(matches!(
            ProxyTarget::from_parts("proxy", "0", "http"),
            Err(ProxyError::InvalidPort(_))
        ));
        assert!(matches!(
            ProxyTarget::from_parts("proxy", "70000", "http"),
            Err(ProxyError::InvalidPort(_))
        ));
        assert!(matches!(
            ProxyTarget::from_parts("proxy", "8080", "ftp"),
            Err(ProxyError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn request_accepts_numeric_port() {
        let request: ProxyRequest =
            serde_json::from_value(json!({ "host": "proxy.lan", "port": 3128 })).unwrap();
        let target = ProxyTarget::from_request(&request).unwrap();
        assert_eq!(target.scheme, ProxyScheme::Http);
        assert_eq!(target.port, 3128);
    }

    #[test]
    fn disabled_settings_yield_no_proxy() {
        let settings = ProxySettings {
            enabled: false,
            host: "proxy".into(),
            port: "8080".into(),
            scheme: "http".into(),
        };
        assert!(ProxyTarget::from_settings(&settings).is_none());
        let enabled = ProxySettings { enabled: true, ..settings };
        assert!(ProxyTarget::from_settings(&enabled).is_some());
    }
}
