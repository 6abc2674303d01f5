//! HTTP client for the chat backend's REST collaborators

use crate::error::ChatError;

/// Thin wrapper over `reqwest::Client` pinned to one API base URL.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub async fn get(&self, path: &str) -> Result<reqwest::Response, ChatError> {
        let url = self.url(path);
        tracing::debug!("GET {}", url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ChatError::Transport(format!("GET {} failed: {}", url, e)))?;
        check_response(resp, &url).await
    }

    pub async fn post_multipart(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
    ) -> Result<reqwest::Response, ChatError> {
        let url = self.url(path);
        tracing::debug!("POST {} (multipart)", url);
        let resp = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ChatError::Transport(format!("POST {} failed: {}", url, e)))?;
        check_response(resp, &url).await
    }
}

/// Turn non-success statuses into a clear transport error, with the body
/// text attached when the server bothered to send one.
async fn check_response(
    resp: reqwest::Response,
    url: &str,
) -> Result<reqwest::Response, ChatError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ChatError::Transport(format!(
            "HTTP {} for {}: {}",
            status.as_u16(),
            url,
            body
        )));
    }
    Ok(resp)
}
