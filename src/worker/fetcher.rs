//! Network access for the worker.

use async_trait::async_trait;

use crate::error::{CacheError, Result};
use crate::worker::{strip_hop_by_hop, FetchRequest, FetchResponse};

// == Fetcher ==
/// Performs a real network request.
///
/// An `Err` means the network could not produce a response at all; HTTP
/// error statuses come back as `Ok`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse>;
}

/// `reqwest`-backed fetcher used by the proxy.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        let mut headers = request.headers.clone();
        strip_hop_by_hop(&mut headers);

        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(headers)
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| network_error(&request.url, e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| network_error(&request.url, e))?;

        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}

fn network_error(url: &url::Url, error: reqwest::Error) -> CacheError {
    if error.is_timeout() {
        CacheError::Timeout(url.to_string())
    } else {
        CacheError::Network(format!("{url}: {error}"))
    }
}
