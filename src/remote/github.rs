// SPDX-License-Identifier: MIT OR Apache-2.0

//! GitHub starred-repository listing and README retrieval.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::retry::{RemoteFailure, RetryPolicy};
use crate::config::{GithubConfig, RemoteConfig};
use crate::errors::StarsError;

const GITHUB_API_VERSION: &str = "2022-11-28";

/// One entry of the starred listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StarItem {
    pub id: i64,
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub html_url: String,
}

/// Source of starred repositories.
///
/// Implemented by [`GithubClient`]; tests substitute in-memory fakes.
#[async_trait]
pub trait StarSource: Send + Sync {
    /// Fetches one listing page (1-based), oldest star first.
    async fn list_starred(&self, page: u32, per_page: u32) -> Result<Vec<StarItem>, RemoteFailure>;

    /// Fetches the decoded README. `Ok(None)` when the repository has none
    /// or the API refused.
    async fn fetch_readme(&self, full_name: &str) -> Result<Option<String>, RemoteFailure>;
}

#[derive(Debug, Deserialize)]
struct ReadmeResponse {
    content: Option<String>,
}

/// REST client for api.github.com (or a compatible base URL).
pub struct GithubClient {
    client: reqwest::Client,
    api_url: String,
    retry: RetryPolicy,
}

impl GithubClient {
    /// Builds a client from configuration. A missing token is a configuration error.
    pub fn new(github: &GithubConfig, remote: &RemoteConfig) -> Result<Self> {
        let token = github.token().ok_or_else(|| {
            StarsError::config("GITHUB_TOKEN is not set; a token is required to list stars")
        })?;

        let headers = api_headers(token)?;

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(remote.timeout())
            .build()
            .context("Failed to build GitHub HTTP client")?;

        Ok(Self {
            client,
            api_url: github.api_url().to_string(),
            retry: remote.retry_policy(),
        })
    }

    /// Builds the listing request for one page, oldest star first.
    fn starred_request(&self, page: u32, per_page: u32) -> reqwest::Result<reqwest::Request> {
        self.client
            .get(format!("{}/user/starred", self.api_url))
            .query(&[
                ("per_page", per_page.to_string()),
                ("page", page.to_string()),
                ("sort", "created".to_string()),
                ("direction", "asc".to_string()),
            ])
            .build()
    }

    async fn get_page_once(&self, page: u32, per_page: u32) -> Result<Vec<StarItem>, RemoteFailure> {
        let request = self
            .starred_request(page, per_page)
            .map_err(|e| RemoteFailure::permanent(format!("build starred request: {}", e)))?;
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| RemoteFailure::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteFailure::from_status(status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| RemoteFailure::permanent(format!("parse starred page {}: {}", page, e)))
    }

    async fn get_readme_once(&self, full_name: &str) -> Result<Option<String>, RemoteFailure> {
        let url = format!("{}/repos/{}/readme", self.api_url, full_name);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RemoteFailure::from_reqwest(&e))?;

        let status = response.status();
        if status != StatusCode::OK {
            let failure = RemoteFailure::from_status(status, "");
            if failure.transient {
                return Err(failure);
            }
            tracing::debug!(repo = full_name, %status, "no README available");
            return Ok(None);
        }

        let body: ReadmeResponse = response
            .json()
            .await
            .map_err(|e| RemoteFailure::permanent(format!("parse README for {}: {}", full_name, e)))?;

        Ok(body.content.as_deref().and_then(decode_readme_content))
    }
}

#[async_trait]
impl StarSource for GithubClient {
    async fn list_starred(&self, page: u32, per_page: u32) -> Result<Vec<StarItem>, RemoteFailure> {
        self.retry
            .run("list_starred", || self.get_page_once(page, per_page))
            .await
    }

    async fn fetch_readme(&self, full_name: &str) -> Result<Option<String>, RemoteFailure> {
        self.retry
            .run("fetch_readme", || self.get_readme_once(full_name))
            .await
    }
}

/// Headers sent with every GitHub API call.
fn api_headers(token: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/vnd.github+json"),
    );
    headers.insert(
        "x-github-api-version",
        HeaderValue::from_static(GITHUB_API_VERSION),
    );
    let mut auth = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| StarsError::config("GITHUB_TOKEN contains invalid characters"))?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("starsearch/", env!("CARGO_PKG_VERSION"))),
    );
    Ok(headers)
}

/// Decodes the base64 `content` field of the README endpoint.
///
/// GitHub wraps the payload at 60 columns, so whitespace is stripped first.
/// Invalid UTF-8 is replaced rather than rejected.
pub fn decode_readme_content(content: &str) -> Option<String> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }
    match STANDARD.decode(compact.as_bytes()) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(err) => {
            tracing::warn!(error = %err, "README content is not valid base64");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_wrapped_base64() {
        let encoded = STANDARD.encode("# uv\nAn extremely fast package manager.");
        let (head, tail) = encoded.split_at(10);
        let wrapped = format!("{}\n{}\n", head, tail);
        assert_eq!(
            decode_readme_content(&wrapped).as_deref(),
            Some("# uv\nAn extremely fast package manager.")
        );
    }

    #[test]
    fn replaces_invalid_utf8() {
        let encoded = STANDARD.encode([b'o', b'k', 0xff, b'!']);
        let decoded = decode_readme_content(&encoded).unwrap();
        assert!(decoded.starts_with("ok"));
        assert!(decoded.ends_with('!'));
    }

    #[test]
    fn rejects_garbage_and_empty() {
        assert_eq!(decode_readme_content(""), None);
        assert_eq!(decode_readme_content("%%%not-base64%%%"), None);
    }

    #[test]
    fn star_item_accepts_null_description() {
        let item: StarItem = serde_json::from_str(
            r#"{"id": 7, "full_name": "a/b", "description": null, "html_url": "https://github.com/a/b", "stargazers_count": 3}"#,
        )
        .unwrap();
        assert_eq!(item.id, 7);
        assert!(item.description.is_none());
    }

    fn client_for(api_url: &str) -> GithubClient {
        let github = GithubConfig {
            token: Some("ghp_test".to_string()),
            api_url: Some(api_url.to_string()),
            ..GithubConfig::default()
        };
        GithubClient::new(&github, &RemoteConfig::default()).unwrap()
    }

    #[test]
    fn starred_request_asks_for_oldest_first() {
        let client = client_for("https://api.example.test");
        let request = client.starred_request(4, 30).unwrap();
        let url = request.url();

        assert_eq!(request.method(), reqwest::Method::GET);
        assert_eq!(url.host_str(), Some("api.example.test"));
        assert_eq!(url.path(), "/user/starred");
        let query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            query,
            vec![
                ("per_page".to_string(), "30".to_string()),
                ("page".to_string(), "4".to_string()),
                ("sort".to_string(), "created".to_string()),
                ("direction".to_string(), "asc".to_string()),
            ]
        );
    }

    #[test]
    fn api_headers_carry_auth_and_version() {
        let headers = api_headers("ghp_test").unwrap();
        assert_eq!(headers[ACCEPT], "application/vnd.github+json");
        assert_eq!(headers["x-github-api-version"], GITHUB_API_VERSION);
        assert_eq!(headers[AUTHORIZATION], "Bearer ghp_test");
        assert!(headers[AUTHORIZATION].is_sensitive());
        assert!(headers[USER_AGENT]
            .to_str()
            .unwrap()
            .starts_with("starsearch/"));
    }

    #[test]
    fn token_with_newline_is_rejected() {
        let err = api_headers("abc\ndef").unwrap_err();
        assert!(matches!(
            StarsError::classify(&err),
            Some(StarsError::Configuration(_))
        ));
    }

    #[test]
    fn missing_token_is_configuration_error() {
        let err = GithubClient::new(&GithubConfig::default(), &RemoteConfig::default())
            .err()
            .unwrap();
        assert!(matches!(
            StarsError::classify(&err),
            Some(StarsError::Configuration(_))
        ));
    }
}
