//! Opening the streamed prediction request.

use std::time::Duration;

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use reqwest::Client;
use shared::protocol::PredictRequest;
use tracing::{debug, info};
use url::Url;

use crate::error::OracleError;

pub type ByteStream = BoxStream<'static, Result<Vec<u8>, OracleError>>;

pub const PREDICT_PATH: &str = "astrology/predict";
pub const TENANT_HEADER: &str = "X-Tenant-Slug";

#[async_trait]
pub trait OracleTransport: Send + Sync {
    /// Starts a prediction and hands back the raw response body.
    async fn open(&self, query: &str, verification_token: &str) -> Result<ByteStream, OracleError>;
}

pub struct HttpOracleTransport {
    http: Client,
    predict_url: Url,
    tenant: String,
}

impl HttpOracleTransport {
    pub fn new(
        api_url: &Url,
        tenant: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, OracleError> {
        let http = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(OracleError::from)?;
        Ok(Self {
            http,
            predict_url: endpoint(api_url, PREDICT_PATH)
                .map_err(|err| OracleError::Validation(format!("invalid api url: {err}")))?,
            tenant: tenant.into(),
        })
    }
}

/// Joins `path` onto `base`, keeping any path prefix `base` already carries.
pub(crate) fn endpoint(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path)
}

#[async_trait]
impl OracleTransport for HttpOracleTransport {
    async fn open(&self, query: &str, verification_token: &str) -> Result<ByteStream, OracleError> {
        info!(url = %self.predict_url, "opening oracle stream");
        let res = self
            .http
            .post(self.predict_url.clone())
            .header(TENANT_HEADER, &self.tenant)
            .json(&PredictRequest {
                query: query.to_string(),
                turnstile_token: verification_token.to_string(),
            })
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(OracleError::Transport(format!(
                "The connection to the astral plane was severed: {}",
                status.as_u16()
            )));
        }
        debug!(status = status.as_u16(), "oracle stream accepted");

        Ok(res
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(OracleError::from))
            .boxed())
    }
}

/// Replays a recorded response body in fixed-size chunks.
#[derive(Debug, Clone)]
pub struct ReplayTransport {
    body: Vec<u8>,
    chunk_size: usize,
    chunk_delay: Option<Duration>,
}

impl ReplayTransport {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            chunk_size: usize::MAX,
            chunk_delay: None,
        }
    }

    pub fn chunked(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }
}

#[async_trait]
impl OracleTransport for ReplayTransport {
    async fn open(&self, _query: &str, _verification_token: &str) -> Result<ByteStream, OracleError> {
        let chunks: Vec<Vec<u8>> = self
            .body
            .chunks(self.chunk_size.min(self.body.len().max(1)))
            .map(<[u8]>::to_vec)
            .collect();
        let delay = self.chunk_delay;
        Ok(futures::stream::iter(chunks)
            .then(move |chunk| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok::<_, OracleError>(chunk)
            })
            .boxed())
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
