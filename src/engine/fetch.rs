// ========================================
// HTTP取得
// ========================================

use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

use crate::error::FetchError;

pub type FetchFuture = Pin<Box<dyn Future<Output = Result<Value, FetchError>> + Send + 'static>>;

/// remote データソースが使う取得処理
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> FetchFuture;
}

/// クロージャをそのまま Fetcher として使えるようにする（テスト・ホスト用）
impl<F> Fetcher for F
where
    F: Fn(&str) -> FetchFuture + Send + Sync,
{
    fn fetch(&self, url: &str) -> FetchFuture {
        self(url)
    }
}

/// reqwest による GET + JSON デコード
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> FetchFuture {
        let request = self.client.get(url);
        let url = url.to_string();
        Box::pin(async move {
            log::debug!("GET {}", url);
            let response = request
                .send()
                .await
                .map_err(|e| FetchError::Network(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status(status.as_u16()));
            }

            let text = response
                .text()
                .await
                .map_err(|e| FetchError::Network(e.to_string()))?;
            serde_json::from_str(&text).map_err(|e| FetchError::Decode(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_closure_fetcher() {
        let fetcher = |url: &str| -> FetchFuture {
            let url = url.to_string();
            Box::pin(async move { Ok(json!({ "url": url })) })
        };
        let value = fetcher.fetch("/api/users").await.unwrap();
        assert_eq!(value, json!({ "url": "/api/users" }));
    }
}
