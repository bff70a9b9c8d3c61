//! Admin review of crowd-sourced edit requests.

mod board;
mod diff;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use shared::{
    domain::{PageId, RequestId},
    error::ApiError,
    protocol::{EditRequest, PageTextUpdate, RequestUpdate},
};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

pub use board::{BoardTab, PendingAction, ReviewAction, ReviewBoard, ReviewDraft, NOTICE_FAILED};
pub use diff::{DiffView, LineChange, SplitRow};

use crate::transport::{endpoint, TENANT_HEADER};

const REQUESTS_PATH: &str = "requests/";
const PAGE_REQUEST_PATH: &str = "page/request/";

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("review request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{detail}")]
    Api { status: u16, detail: String },
    #[error("invalid api url: {0}")]
    Url(#[from] url::ParseError),
    #[error("unknown edit request {0}")]
    UnknownRequest(RequestId),
    #[error("edit request {0} is no longer pending")]
    NotPending(RequestId),
    #[error("no edit request selected")]
    NoSelection,
}

#[async_trait]
pub trait ReviewClient: Send + Sync {
    async fn list_requests(&self) -> Result<Vec<EditRequest>, ReviewError>;
    async fn update_request(
        &self,
        id: &RequestId,
        update: &RequestUpdate,
    ) -> Result<EditRequest, ReviewError>;
    /// Writes approved text into the page's OCR or translation content.
    async fn update_page_text(
        &self,
        page_id: &PageId,
        update: &PageTextUpdate,
    ) -> Result<(), ReviewError>;
}

pub struct HttpReviewClient {
    http: Client,
    base: Url,
    tenant: String,
    access_token: Option<String>,
}

impl HttpReviewClient {
    pub fn new(
        api_url: &Url,
        tenant: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, ReviewError> {
        let http = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self {
            http,
            base: api_url.clone(),
            tenant: tenant.into(),
            access_token: None,
        })
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token.filter(|t| !t.trim().is_empty());
        self
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ReviewError> {
        let url = endpoint(&self.base, path)?;
        debug!(%method, %url, "review api call");
        let mut req = self
            .http
            .request(method, url)
            .header(TENANT_HEADER, &self.tenant);
        if let Some(token) = &self.access_token {
            req = req.bearer_auth(token);
        }
        Ok(req)
    }
}

/// Turns a non-2xx response into [`ReviewError::Api`], preferring the body's `detail`.
async fn check_status(res: Response) -> Result<Response, ReviewError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let detail = match res.json::<ApiError>().await {
        Ok(body) => body.detail,
        Err(_) => format!(
            "HTTP {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("unexpected status")
        ),
    };
    Err(ReviewError::Api {
        status: status.as_u16(),
        detail,
    })
}

#[async_trait]
impl ReviewClient for HttpReviewClient {
    async fn list_requests(&self) -> Result<Vec<EditRequest>, ReviewError> {
        let res = self.request(Method::GET, REQUESTS_PATH)?.send().await?;
        let requests: Vec<EditRequest> = check_status(res).await?.json().await?;
        info!(count = requests.len(), "fetched edit requests");
        Ok(requests)
    }

    async fn update_request(
        &self,
        id: &RequestId,
        update: &RequestUpdate,
    ) -> Result<EditRequest, ReviewError> {
        let res = self
            .request(Method::PUT, &format!("{REQUESTS_PATH}{id}"))?
            .json(update)
            .send()
            .await?;
        Ok(check_status(res).await?.json().await?)
    }

    async fn update_page_text(
        &self,
        page_id: &PageId,
        update: &PageTextUpdate,
    ) -> Result<(), ReviewError> {
        let res = self
            .request(Method::PUT, &format!("{PAGE_REQUEST_PATH}{page_id}"))?
            .json(update)
            .send()
            .await?;
        check_status(res).await?;
        info!(page_id = %page_id, kind = %update.request_type, "page text updated");
        Ok(())
    }
}

#[cfg(test)]
#[path = "../tests/review_client_tests.rs"]
mod tests;
