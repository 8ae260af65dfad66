//! Blocking HTTP client facade installed into the Lua global namespace.

use std::time::Duration;

use crate::device::DeviceError;

const USER_AGENT: &str = concat!("actuate/", env!("CARGO_PKG_VERSION"));

/// One completed request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Thin wrapper over a blocking `reqwest` client with the configured
/// timeout and a default User-Agent.
pub struct HttpClient {
    client: reqwest::blocking::Client,
}

impl HttpClient {
    pub fn new(timeout_seconds: u64) -> Result<Self, DeviceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DeviceError::new(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn get(&self, url: &str) -> Result<HttpResponse, DeviceError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| DeviceError::new(format!("GET {url} failed: {e}")))?;
        Self::read(response)
    }

    pub fn post(&self, url: &str, body: String) -> Result<HttpResponse, DeviceError> {
        let response = self
            .client
            .post(url)
            .body(body)
            .send()
            .map_err(|e| DeviceError::new(format!("POST {url} failed: {e}")))?;
        Self::read(response)
    }

    fn read(response: reqwest::blocking::Response) -> Result<HttpResponse, DeviceError> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| DeviceError::new(format!("cannot read response body: {e}")))?;
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn client_builds_with_timeout() {
        assert!(HttpClient::new(5).is_ok());
    }

    #[test]
    fn invalid_url_is_an_error() {
        let client = HttpClient::new(1).unwrap();
        assert!(client.get("not a url").is_err());
    }
}
