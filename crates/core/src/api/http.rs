use super::{ApiError, LibraryApi};
use crate::types::{Book, BookId, ReviewRecord, ReviewRequest};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Library API client over HTTP with bearer authentication.

#[derive(Debug, Clone)]
pub struct HttpLibraryApi {
    base_url: Url,
    client: Client,
}

impl HttpLibraryApi {
    /// Builds a client rooted at `base_url`; a zero timeout keeps the transport default.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| ApiError::InvalidUrl(format!("{base_url}: {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut builder = Client::builder();
        if !timeout.is_zero() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url, ApiError> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| ApiError::InvalidUrl(format!("{path}: {e}")))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn secured(&self, method: Method, url: Url, token: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/json")
    }
}

#[derive(Debug, Deserialize)]
struct ReviewSearchResponse {
    #[serde(rename = "_embedded")]
    embedded: EmbeddedReviews,
}

#[derive(Debug, Deserialize)]
struct EmbeddedReviews {
    #[serde(default)]
    reviews: Vec<ReviewRecord>,
}

#[async_trait]
impl LibraryApi for HttpLibraryApi {
    async fn book(&self, book_id: BookId) -> Result<Book, ApiError> {
        let url = self.url(&format!("api/books/{book_id}"), &[])?;
        send_json(self.client.get(url)).await
    }

    async fn reviews(&self, book_id: BookId) -> Result<Vec<ReviewRecord>, ApiError> {
        let url = self.url(
            "api/reviews/search/findByBookId",
            &[("bookId", book_id.to_string())],
        )?;
        let page: ReviewSearchResponse = send_json(self.client.get(url)).await?;
        Ok(page.embedded.reviews)
    }

    async fn user_review_exists(&self, token: &str, book_id: BookId) -> Result<bool, ApiError> {
        let url = self.url(
            "api/reviews/secure/user/book",
            &[("bookId", book_id.to_string())],
        )?;
        send_json(self.secured(Method::GET, url, token)).await
    }

    async fn current_loans_count(&self, token: &str) -> Result<u32, ApiError> {
        let url = self.url("api/books/secure/currentloans/count", &[])?;
        send_json(self.secured(Method::GET, url, token)).await
    }

    async fn is_checked_out(&self, token: &str, book_id: BookId) -> Result<bool, ApiError> {
        let url = self.url(
            "api/books/secure/ischeckedout/byuser",
            &[("bookId", book_id.to_string())],
        )?;
        send_json(self.secured(Method::GET, url, token)).await
    }

    async fn checkout(&self, token: &str, book_id: BookId) -> Result<(), ApiError> {
        let url = self.url(
            "api/books/secure/checkout",
            &[("bookId", book_id.to_string())],
        )?;
        send(self.secured(Method::PUT, url, token)).await?;
        Ok(())
    }

    async fn submit_review(&self, token: &str, review: &ReviewRequest) -> Result<(), ApiError> {
        let url = self.url("api/reviews/secure", &[])?;
        send(self.secured(Method::POST, url, token).json(review)).await?;
        Ok(())
    }
}

async fn send(request: RequestBuilder) -> Result<Response, ApiError> {
    let response = request
        .send()
        .await
        .map_err(|e| ApiError::Transport(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
        });
    }
    Ok(response)
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ApiError> {
    send(request)
        .await?
        .json()
        .await
        .map_err(|e| ApiError::InvalidResponse(e.to_string()))
}
