use crate::error::CustodyError;
use async_trait::async_trait;
use futures::future::join_all;
use std::time::Duration;
use tracing::{info, warn};
use zeroize::Zeroize;

/// One secret fragment: the share-holder's index and its evaluation bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct ShareFragment {
    pub index: u8,
    pub bytes: Vec<u8>,
}

impl Drop for ShareFragment {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for ShareFragment {
    // Fragment bytes never reach logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareFragment")
            .field("index", &self.index)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Fragments gathered for a single reconstruction attempt. Never persisted.
pub type ShareSet = Vec<ShareFragment>;

/// Source of key-share fragments, one per configured share holder.
#[async_trait]
pub trait ShareSource: Send + Sync {
    /// Collect whatever fragments the endpoints yield. Individual endpoint
    /// failures are tolerated; the quorum check belongs to reconstruction.
    async fn collect(&self) -> ShareSet;
}

/// Fetches fragments from N independent share-holder services over HTTP.
///
/// Each endpoint returns its fragment as a comma-separated list of byte
/// values; the fragment index is the endpoint's 1-based position in the
/// configured list. No endpoint is trusted individually.
pub struct ShareFetcher {
    client: reqwest::Client,
    endpoints: Vec<String>,
}

impl ShareFetcher {
    pub fn new(endpoints: Vec<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client, endpoints }
    }

    async fn fetch_one(&self, index: u8, endpoint: &str) -> Result<ShareFragment, CustodyError> {
        let response = self
            .client
            .get(endpoint)
            .send()
            .await
            .map_err(|e| CustodyError::ShareEndpoint(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(CustodyError::ShareEndpoint(format!(
                "endpoint returned {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| CustodyError::ShareEndpoint(format!("body read failed: {}", e)))?;

        let bytes = parse_fragment(&body)?;
        Ok(ShareFragment { index, bytes })
    }
}

#[async_trait]
impl ShareSource for ShareFetcher {
    async fn collect(&self) -> ShareSet {
        let requests = self.endpoints.iter().enumerate().map(|(pos, endpoint)| {
            let index = (pos + 1) as u8;
            async move { (index, endpoint, self.fetch_one(index, endpoint).await) }
        });

        let mut shares = ShareSet::new();
        for (index, endpoint, result) in join_all(requests).await {
            match result {
                Ok(fragment) => shares.push(fragment),
                Err(e) => {
                    warn!(index, endpoint, error = %e, "share endpoint failed, continuing");
                }
            }
        }

        info!(
            collected = shares.len(),
            configured = self.endpoints.len(),
            "share fetch completed"
        );
        shares
    }
}

/// Parse a comma-separated list of decimal byte values.
fn parse_fragment(body: &str) -> Result<Vec<u8>, CustodyError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(CustodyError::ShareEndpoint("empty payload".to_string()));
    }

    trimmed
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<u8>()
                .map_err(|_| CustodyError::ShareEndpoint(format!("malformed byte value: {:?}", part)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};

    #[test]
    fn parses_comma_separated_bytes() {
        assert_eq!(parse_fragment("1,2,3").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_fragment(" 255 , 0 ,7\n").unwrap(), vec![255, 0, 7]);
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(parse_fragment("").is_err());
        assert!(parse_fragment("   ").is_err());
        assert!(parse_fragment("1,2,boom").is_err());
        assert!(parse_fragment("300,1").is_err());
        assert!(parse_fragment("1,,2").is_err());
    }

    #[test]
    fn debug_never_prints_fragment_bytes() {
        let fragment = ShareFragment {
            index: 1,
            bytes: vec![42, 43, 44],
        };
        let rendered = format!("{:?}", fragment);
        assert!(!rendered.contains("42"));
        assert!(rendered.contains("index"));
    }

    async fn spawn_endpoint(payload: Option<&'static str>) -> String {
        let app = match payload {
            Some(body) => Router::new().route("/", get(move || async move { body })),
            None => Router::new().route(
                "/",
                get(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "down") }),
            ),
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn collects_from_reachable_endpoints_only() {
        // 5 configured, 2 unreachable: 3 fragments collected
        let mut endpoints = Vec::new();
        endpoints.push(spawn_endpoint(Some("1,2,3")).await);
        endpoints.push(spawn_endpoint(None).await);
        endpoints.push(spawn_endpoint(Some("4,5,6")).await);
        endpoints.push("http://127.0.0.1:1/".to_string()); // connection refused
        endpoints.push(spawn_endpoint(Some("7,8,9")).await);

        let fetcher = ShareFetcher::new(endpoints, Duration::from_secs(2));
        let shares = fetcher.collect().await;

        assert_eq!(shares.len(), 3);
        let indices: Vec<u8> = shares.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn mostly_unreachable_yields_a_single_fragment() {
        let mut endpoints = vec![
            "http://127.0.0.1:1/".to_string(),
            "http://127.0.0.1:1/".to_string(),
        ];
        endpoints.push(spawn_endpoint(Some("9,9,9")).await);
        endpoints.push("http://127.0.0.1:1/".to_string());
        endpoints.push(spawn_endpoint(None).await);

        let fetcher = ShareFetcher::new(endpoints, Duration::from_secs(2));
        let shares = fetcher.collect().await;

        assert_eq!(shares.len(), 1);
        assert_eq!(shares[0].index, 3);
    }
}
