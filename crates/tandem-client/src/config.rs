use std::time::Duration;

use url::Url;

use crate::error::ClientError;

/// Server ping cadence on the gateway socket. Two missed pongs drop the connection.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Requests slower than this surface as a failed send.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Always ends with `/` so relative paths join under it.
    pub base_url: Url,
    pub token: String,
    pub heartbeat_interval: Duration,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, ClientError> {
        let base_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))?;
        match base_url.scheme() {
            "http" | "https" => {}
            other => return Err(ClientError::UnsupportedScheme(other.to_string())),
        }
        Ok(Self {
            base_url,
            token: token.into(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
            request_timeout: REQUEST_TIMEOUT,
        })
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base_url.join(path)?)
    }

    /// The gateway lives at `/gateway` on the same host, over ws(s).
    pub fn gateway_url(&self) -> Result<Url, ClientError> {
        let mut url = self.endpoint("gateway")?;
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => return Err(ClientError::UnsupportedScheme(other.to_string())),
        };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::UnsupportedScheme(scheme.to_string()))?;
        Ok(url)
    }
}
