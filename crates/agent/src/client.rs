//! Outbound calls from an agent to the directory.

use std::time::Duration;

use async_trait::async_trait;
use p2pshare_types::{IndexStats, Peer, PeerIdRequest, SearchRequest, SearchResponse};
use reqwest::{Client, Response};
use serde::Serialize;
use url::Url;

use crate::error::AgentError;

/// The directory operations a peer agent relies on.
#[async_trait]
pub trait DirectoryApi: Send + Sync {
    async fn register(&self, peer: &Peer) -> Result<(), AgentError>;
    async fn unregister(&self, peer_id: &str) -> Result<(), AgentError>;
    async fn heartbeat(&self, peer_id: &str) -> Result<(), AgentError>;
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, AgentError>;
    async fn stats(&self) -> Result<IndexStats, AgentError>;
}

/// [`DirectoryApi`] over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpDirectoryClient {
    client: Client,
    base_url: String,
}

impl HttpDirectoryClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AgentError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: normalize_base_url(base_url)?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<Response, AgentError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self.client.post(url).json(body).send().await?;
        check_status(endpoint, response).await
    }
}

#[async_trait]
impl DirectoryApi for HttpDirectoryClient {
    async fn register(&self, peer: &Peer) -> Result<(), AgentError> {
        self.post("/register", peer).await?;
        Ok(())
    }

    async fn unregister(&self, peer_id: &str) -> Result<(), AgentError> {
        self.post("/unregister", &PeerIdRequest::new(peer_id))
            .await?;
        Ok(())
    }

    async fn heartbeat(&self, peer_id: &str) -> Result<(), AgentError> {
        self.post("/heartbeat", &PeerIdRequest::new(peer_id))
            .await?;
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, AgentError> {
        let response = self.post("/search", request).await?;
        Ok(response.json().await?)
    }

    async fn stats(&self) -> Result<IndexStats, AgentError> {
        let url = format!("{}/stats", self.base_url);
        let response = self.client.get(url).send().await?;
        let response = check_status("/stats", response).await?;
        Ok(response.json().await?)
    }
}

/// Turn a non-success response into [`AgentError::Status`].
pub(crate) async fn check_status(endpoint: &str, response: Response) -> Result<Response, AgentError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AgentError::Status {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        body,
    })
}

/// Accept `host:port` or a full URL and strip any path, query and trailing
/// slash.
pub fn normalize_base_url(address: &str) -> Result<String, AgentError> {
    let trimmed = address.trim();
    let candidate = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    let mut url = Url::parse(&candidate)?;
    url.set_path("");
    url.set_query(None);
    url.set_fragment(None);
    let mut normalized = url.to_string();
    while normalized.ends_with('/') {
        normalized.pop();
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_urls_are_normalized() {
        assert_eq!(
            normalize_base_url("127.0.0.1:8080").unwrap(),
            "http://127.0.0.1:8080"
        );
        assert_eq!(
            normalize_base_url(" http://dir.local:8080/ignored?x=1 ").unwrap(),
            "http://dir.local:8080"
        );
        assert!(normalize_base_url("").is_err());
    }
}
