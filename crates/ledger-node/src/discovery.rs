//! External address discovery, used once at startup to fill `meta.address`.

use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

use tracing::{info, warn};

use crate::constants::FALLBACK_EXTERNAL_IP;
use crate::error::{NodeError, NodeResult};

pub trait IpDiscovery {
    fn discover_external_ip(&self) -> impl Future<Output = NodeResult<String>> + Send;
}

/// A fixed, operator-supplied address.
#[derive(Debug, Clone)]
pub struct StaticIp(pub String);

impl IpDiscovery for StaticIp {
    async fn discover_external_ip(&self) -> NodeResult<String> {
        Ok(self.0.clone())
    }
}

/// Asks a plain-text "what is my IP" service.
#[derive(Debug, Clone)]
pub struct HttpIpDiscovery {
    client: reqwest::Client,
    url: String,
}

impl HttpIpDiscovery {
    pub fn new(url: impl Into<String>, timeout: Duration) -> NodeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NodeError::Discovery(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl IpDiscovery for HttpIpDiscovery {
    async fn discover_external_ip(&self) -> NodeResult<String> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|e| NodeError::Discovery(e.to_string()))?
            .text()
            .await
            .map_err(|e| NodeError::Discovery(e.to_string()))?;
        let ip = body.trim();
        ip.parse::<IpAddr>()
            .map_err(|_| NodeError::Discovery(format!("not an IP address: {ip:?}")))?;
        Ok(ip.to_string())
    }
}

/// Runs `discovery`, falling back to loopback when it fails.
pub async fn resolve_external_ip(discovery: &impl IpDiscovery) -> String {
    match discovery.discover_external_ip().await {
        Ok(ip) => {
            info!(%ip, "Discovered external IP");
            ip
        }
        Err(error) => {
            warn!(%error, fallback = FALLBACK_EXTERNAL_IP, "External IP discovery failed");
            FALLBACK_EXTERNAL_IP.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl IpDiscovery for Broken {
        async fn discover_external_ip(&self) -> NodeResult<String> {
            Err(NodeError::Discovery("offline".into()))
        }
    }

    #[tokio::test]
    async fn static_ip_is_returned_verbatim() {
        let ip = resolve_external_ip(&StaticIp("203.0.113.7".into())).await;
        assert_eq!(ip, "203.0.113.7");
    }

    #[tokio::test]
    async fn failure_falls_back_to_loopback() {
        assert_eq!(resolve_external_ip(&Broken).await, FALLBACK_EXTERNAL_IP);
    }

    #[tokio::test]
    async fn unreachable_service_falls_back() {
        let discovery =
            HttpIpDiscovery::new("http://127.0.0.1:9/ip", Duration::from_millis(500)).unwrap();
        assert_eq!(resolve_external_ip(&discovery).await, FALLBACK_EXTERNAL_IP);
    }
}
