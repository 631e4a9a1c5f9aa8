//! Repository catalog and tag listing, following `Link` pagination where
//! the registry offers it.

use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::RetryConfig;
use crate::error::Result;
use crate::http::{parse_json, unexpected_status, HttpSession};
use crate::retry::send_with_retry;

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    repositories: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TagListResponse {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// `GET /v2/_catalog`.
pub(crate) async fn list_repositories(
    session: &HttpSession,
    retry: &RetryConfig,
) -> Result<Vec<String>> {
    let mut url = session.v2_url("_catalog");
    let mut repositories = Vec::new();

    loop {
        let response = send_with_retry(retry, "catalog GET", || {
            session.client().get(&url).send()
        })
        .await?;

        if response.status() != StatusCode::OK {
            return Err(unexpected_status(response).await);
        }

        let next = next_link(response.headers()).map(|link| session.resolve_location(&link));
        let page: CatalogResponse = parse_json(response).await?;
        repositories.extend(page.repositories.unwrap_or_default());

        match next {
            Some(next_url) => url = next_url,
            None => return Ok(repositories),
        }
    }
}

/// `GET /v2/{name}/tags/list`. A `null` or missing `tags` field is an
/// empty repository, not an error.
pub(crate) async fn list_tags(
    session: &HttpSession,
    retry: &RetryConfig,
    repository: &str,
) -> Result<Vec<String>> {
    let mut url = session.v2_url(&format!("{repository}/tags/list"));
    let mut tags = Vec::new();

    loop {
        let response = send_with_retry(retry, "tags GET", || {
            session.client().get(&url).send()
        })
        .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(crate::error::RegistryError::NotFound(repository.to_string()));
        }
        if response.status() != StatusCode::OK {
            return Err(unexpected_status(response).await);
        }

        let next = next_link(response.headers()).map(|link| session.resolve_location(&link));
        let page: TagListResponse = parse_json(response).await?;
        tags.extend(page.tags.unwrap_or_default());

        match next {
            Some(next_url) => url = next_url,
            None => return Ok(tags),
        }
    }
}

/// Extract the `rel="next"` target from a `Link` header, if any.
fn next_link(headers: &reqwest::header::HeaderMap) -> Option<String> {
    let value = headers.get(reqwest::header::LINK)?.to_str().ok()?;
    for part in value.split(',') {
        let part = part.trim();
        if !part.contains("rel=\"next\"") {
            continue;
        }
        let start = part.find('<')?;
        let end = part.find('>')?;
        if start < end {
            return Some(part[start + 1..end].to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, LINK};

    #[test]
    fn next_link_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(next_link(&headers), None);

        headers.insert(
            LINK,
            "</v2/_catalog?last=app&n=100>; rel=\"next\"".parse().unwrap(),
        );
        assert_eq!(
            next_link(&headers).as_deref(),
            Some("/v2/_catalog?last=app&n=100")
        );

        headers.insert(
            LINK,
            "</v2/other>; rel=\"prev\", </v2/_catalog?last=zap>; rel=\"next\""
                .parse()
                .unwrap(),
        );
        assert_eq!(next_link(&headers).as_deref(), Some("/v2/_catalog?last=zap"));

        headers.insert(LINK, "</v2/other>; rel=\"prev\"".parse().unwrap());
        assert_eq!(next_link(&headers), None);
    }
}
