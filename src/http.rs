use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::config::RegistryEndpoint;
use crate::error::{transport_error, RegistryError, Result};

const POOL_MAX_IDLE_PER_HOST: usize = 30;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub(crate) struct HttpSession {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSession {
    pub(crate) fn new(endpoint: &RegistryEndpoint) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .tcp_keepalive(Some(TCP_KEEPALIVE))
            .timeout(endpoint.request_timeout)
            .build()
            .map_err(RegistryError::RegistryUnreachable)?;

        Ok(HttpSession {
            client,
            base_url: endpoint.base_url().to_string(),
        })
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build `<base>/v2/<path>`. `path` must not start with a slash.
    pub(crate) fn v2_url(&self, path: &str) -> String {
        format!("{}/v2/{}", self.base_url, path)
    }

    /// Registries may return `Location` as an absolute URL or as a path
    /// relative to the registry root; either way the result is absolute.
    pub(crate) fn resolve_location(&self, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            location.to_string()
        } else if location.starts_with('/') {
            format!("{}{}", self.base_url, location)
        } else {
            format!("{}/{}", self.base_url, location)
        }
    }

    /// `GET /v2/` version probe. A 200 means the v2 API is spoken here;
    /// any other status means it is not. Transport failures propagate.
    pub(crate) async fn check_api(&self) -> Result<bool> {
        let url = self.v2_url("");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| transport_error("version probe", err))?;
        Ok(response.status() == StatusCode::OK)
    }
}

/// Pull the `Location` header off a response, if present and readable.
pub(crate) fn location_header(response: &Response) -> Result<Option<String>> {
    match response.headers().get(reqwest::header::LOCATION) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|s| Some(s.to_string()))
            .map_err(|_| RegistryError::protocol(response.status(), "unreadable Location header")),
    }
}

/// Read the `Docker-Content-Digest` header, if present.
pub(crate) fn content_digest_header(response: &Response) -> Option<&str> {
    response
        .headers()
        .get("Docker-Content-Digest")
        .and_then(|value| value.to_str().ok())
}

/// Consume an error response into a protocol error carrying a body excerpt.
pub(crate) async fn unexpected_status(response: Response) -> RegistryError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    RegistryError::protocol(status, &body)
}

/// Decode a successful response body as JSON, mapping decode failures onto
/// the protocol-error bucket (the status was fine, the body was not).
pub(crate) async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|err| transport_error("response body", err))?;
    serde_json::from_slice(&bytes).map_err(|err| {
        RegistryError::protocol(status, &format!("malformed JSON body: {err}"))
    })
}
