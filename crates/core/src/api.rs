use crate::types::{Book, BookId, ReviewRecord, ReviewRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

#[cfg(feature = "api-http")]
mod http;
#[cfg(feature = "api-http")]
#[cfg_attr(docsrs, doc(cfg(feature = "api-http")))]
pub use http::HttpLibraryApi;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Connection, timeout or body transfer failure.
    #[error("library api request failed: {0}")]
    Transport(String),
    #[error("http status {status} from library api")]
    Status { status: u16 },
    #[error("library api response invalid: {0}")]
    InvalidResponse(String),
    #[error("secured endpoint requires a bearer token")]
    Unauthenticated,
    #[error("invalid library api url: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// Whether repeating the same request could reasonably succeed.
    ///
    /// Transport failures, `429` and `5xx` are retryable; other statuses are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status } => *status == 429 || (500..600).contains(status),
            Self::InvalidResponse(_) | Self::Unauthenticated | Self::InvalidUrl(_) => false,
        }
    }
}

/// Endpoints of the library API used by the book page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Book,
    Reviews,
    UserReview,
    LoansCount,
    CheckedOut,
    Checkout,
    SubmitReview,
}

impl Endpoint {
    pub fn is_secured(self) -> bool {
        !matches!(self, Self::Book | Self::Reviews)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Book => "book",
            Self::Reviews => "reviews",
            Self::UserReview => "user_review",
            Self::LoansCount => "loans_count",
            Self::CheckedOut => "checked_out",
            Self::Checkout => "checkout",
            Self::SubmitReview => "submit_review",
        };
        f.write_str(name)
    }
}

/// Remote library API as seen by a book page.
///
/// Secured calls take the bearer token explicitly; callers never reach them
/// without one.
#[async_trait]
pub trait LibraryApi: Send + Sync {
    async fn book(&self, book_id: BookId) -> Result<Book, ApiError>;
    async fn reviews(&self, book_id: BookId) -> Result<Vec<ReviewRecord>, ApiError>;
    async fn user_review_exists(&self, token: &str, book_id: BookId) -> Result<bool, ApiError>;
    async fn current_loans_count(&self, token: &str) -> Result<u32, ApiError>;
    async fn is_checked_out(&self, token: &str, book_id: BookId) -> Result<bool, ApiError>;
    async fn checkout(&self, token: &str, book_id: BookId) -> Result<(), ApiError>;
    async fn submit_review(&self, token: &str, review: &ReviewRequest) -> Result<(), ApiError>;
}

#[async_trait]
impl<T> LibraryApi for Box<T>
where
    T: LibraryApi + ?Sized,
{
    async fn book(&self, book_id: BookId) -> Result<Book, ApiError> {
        (**self).book(book_id).await
    }

    async fn reviews(&self, book_id: BookId) -> Result<Vec<ReviewRecord>, ApiError> {
        (**self).reviews(book_id).await
    }

    async fn user_review_exists(&self, token: &str, book_id: BookId) -> Result<bool, ApiError> {
        (**self).user_review_exists(token, book_id).await
    }

    async fn current_loans_count(&self, token: &str) -> Result<u32, ApiError> {
        (**self).current_loans_count(token).await
    }

    async fn is_checked_out(&self, token: &str, book_id: BookId) -> Result<bool, ApiError> {
        (**self).is_checked_out(token, book_id).await
    }

    async fn checkout(&self, token: &str, book_id: BookId) -> Result<(), ApiError> {
        (**self).checkout(token, book_id).await
    }

    async fn submit_review(&self, token: &str, review: &ReviewRequest) -> Result<(), ApiError> {
        (**self).submit_review(token, review).await
    }
}

/// Seed data for [`MockLibraryApi`], loadable from TOML or JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockFixture {
    #[serde(default)]
    pub books: Vec<Book>,
    #[serde(default)]
    pub reviews: Vec<ReviewRecord>,
    /// Books already on loan to the signed-in user.
    #[serde(default)]
    pub checked_out: Vec<BookId>,
    #[serde(default)]
    pub user_email: Option<String>,
}

#[derive(Debug, Default)]
struct MockState {
    books: HashMap<BookId, Book>,
    reviews: Vec<ReviewRecord>,
    checked_out: HashSet<BookId>,
    calls: HashMap<Endpoint, usize>,
}

/// In-memory library API.
///
/// Behaves like a small, well-behaved server: checkouts reduce availability
/// and raise the loan count, submitted reviews show up in searches. Failures
/// and latency can be injected per endpoint.
#[derive(Debug)]
pub struct MockLibraryApi {
    user_email: String,
    accepted_token: Option<String>,
    failures: HashMap<Endpoint, u16>,
    delays: HashMap<Endpoint, Duration>,
    state: Mutex<MockState>,
}

impl Default for MockLibraryApi {
    fn default() -> Self {
        Self {
            user_email: "reader@example.com".to_string(),
            accepted_token: None,
            failures: HashMap::new(),
            delays: HashMap::new(),
            state: Mutex::new(MockState::default()),
        }
    }
}

impl MockLibraryApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: MockFixture) -> Self {
        let mut api = Self::new();
        if let Some(email) = fixture.user_email {
            api.user_email = email;
        }
        let state = api.state.get_mut().unwrap_or_else(|e| e.into_inner());
        state.books = fixture.books.into_iter().map(|b| (b.id, b)).collect();
        state.reviews = fixture.reviews;
        state.checked_out = fixture.checked_out.into_iter().collect();
        api
    }

    /// Loads a fixture from a TOML or JSON file.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let fixture: MockFixture = if path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .eq_ignore_ascii_case("json")
        {
            serde_json::from_str(&content)?
        } else {
            toml::from_str(&content)?
        };
        Ok(Self::from_fixture(fixture))
    }

    /// A catalogue with one reviewed book (id 1) and one unreviewed book (id 2).
    pub fn sample() -> Self {
        Self::from_fixture(MockFixture {
            books: vec![
                Book {
                    id: 1,
                    title: "Crash Course in Rust".to_string(),
                    author: "Ferris".to_string(),
                    description: "Ownership, borrowing and lifetimes from first principles."
                        .to_string(),
                    copies: 10,
                    copies_available: 10,
                    category: "BE".to_string(),
                    img: None,
                },
                Book {
                    id: 2,
                    title: "Async in Practice".to_string(),
                    author: "Corro".to_string(),
                    description: "Futures, executors and structured cancellation.".to_string(),
                    copies: 2,
                    copies_available: 2,
                    category: "BE".to_string(),
                    img: None,
                },
            ],
            reviews: vec![
                ReviewRecord {
                    id: 1,
                    user_email: "alice@example.com".to_string(),
                    date: "2024-03-01".to_string(),
                    rating: 4.0,
                    book_id: 1,
                    review_description: Some("Clear and practical.".to_string()),
                },
                ReviewRecord {
                    id: 2,
                    user_email: "bob@example.com".to_string(),
                    date: "2024-03-04".to_string(),
                    rating: 5.0,
                    book_id: 1,
                    review_description: None,
                },
            ],
            checked_out: Vec::new(),
            user_email: None,
        })
    }

    /// Only `token` is accepted on secured endpoints; others get `401`.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.accepted_token = Some(token.into());
        self
    }

    pub fn with_user_email(mut self, email: impl Into<String>) -> Self {
        self.user_email = email.into();
        self
    }

    /// Makes every call to `endpoint` answer with `status`.
    pub fn with_failure(mut self, endpoint: Endpoint, status: u16) -> Self {
        self.failures.insert(endpoint, status);
        self
    }

    pub fn with_delay(mut self, endpoint: Endpoint, delay: Duration) -> Self {
        self.delays.insert(endpoint, delay);
        self
    }

    /// Number of requests received for `endpoint`, including failed ones.
    pub fn calls(&self, endpoint: Endpoint) -> usize {
        self.lock()
            .map(|state| state.calls.get(&endpoint).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn book_snapshot(&self, book_id: BookId) -> Option<Book> {
        self.lock().ok()?.books.get(&book_id).cloned()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MockState>, ApiError> {
        self.state
            .lock()
            .map_err(|_| ApiError::Transport("mock state poisoned".to_string()))
    }

    async fn enter(&self, endpoint: Endpoint, token: Option<&str>) -> Result<(), ApiError> {
        *self.lock()?.calls.entry(endpoint).or_insert(0) += 1;
        if let Some(delay) = self.delays.get(&endpoint) {
            tokio::time::sleep(*delay).await;
        }
        if let Some(status) = self.failures.get(&endpoint) {
            return Err(ApiError::Status { status: *status });
        }
        if endpoint.is_secured() {
            let token = token.unwrap_or_default();
            let accepted = match &self.accepted_token {
                Some(expected) => expected == token,
                None => !token.is_empty(),
            };
            if !accepted {
                return Err(ApiError::Status { status: 401 });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LibraryApi for MockLibraryApi {
    async fn book(&self, book_id: BookId) -> Result<Book, ApiError> {
        self.enter(Endpoint::Book, None).await?;
        self.lock()?
            .books
            .get(&book_id)
            .cloned()
            .ok_or(ApiError::Status { status: 404 })
    }

    async fn reviews(&self, book_id: BookId) -> Result<Vec<ReviewRecord>, ApiError> {
        self.enter(Endpoint::Reviews, None).await?;
        Ok(self
            .lock()?
            .reviews
            .iter()
            .filter(|r| r.book_id == book_id)
            .cloned()
            .collect())
    }

    async fn user_review_exists(&self, token: &str, book_id: BookId) -> Result<bool, ApiError> {
        self.enter(Endpoint::UserReview, Some(token)).await?;
        Ok(self
            .lock()?
            .reviews
            .iter()
            .any(|r| r.book_id == book_id && r.user_email == self.user_email))
    }

    async fn current_loans_count(&self, token: &str) -> Result<u32, ApiError> {
        self.enter(Endpoint::LoansCount, Some(token)).await?;
        Ok(self.lock()?.checked_out.len() as u32)
    }

    async fn is_checked_out(&self, token: &str, book_id: BookId) -> Result<bool, ApiError> {
        self.enter(Endpoint::CheckedOut, Some(token)).await?;
        Ok(self.lock()?.checked_out.contains(&book_id))
    }

    async fn checkout(&self, token: &str, book_id: BookId) -> Result<(), ApiError> {
        self.enter(Endpoint::Checkout, Some(token)).await?;
        let mut state = self.lock()?;
        if state.checked_out.contains(&book_id) {
            return Err(ApiError::Status { status: 409 });
        }
        let book = state
            .books
            .get_mut(&book_id)
            .ok_or(ApiError::Status { status: 404 })?;
        if book.copies_available == 0 {
            return Err(ApiError::Status { status: 409 });
        }
        book.copies_available -= 1;
        state.checked_out.insert(book_id);
        Ok(())
    }

    async fn submit_review(&self, token: &str, review: &ReviewRequest) -> Result<(), ApiError> {
        self.enter(Endpoint::SubmitReview, Some(token)).await?;
        let mut state = self.lock()?;
        if state
            .reviews
            .iter()
            .any(|r| r.book_id == review.book_id && r.user_email == self.user_email)
        {
            return Err(ApiError::Status { status: 409 });
        }
        let id = state.reviews.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        state.reviews.push(ReviewRecord {
            id,
            user_email: self.user_email.clone(),
            date: "today".to_string(),
            rating: review.rating,
            book_id: review.book_id,
            review_description: review.review_description.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_checkout_reduces_availability() {
        let api = MockLibraryApi::sample();
        api.checkout("t", 2).await.expect("checkout");
        assert_eq!(api.book_snapshot(2).map(|b| b.copies_available), Some(1));
        assert_eq!(api.current_loans_count("t").await.expect("count"), 1);
        let again = api.checkout("t", 2).await.expect_err("already on loan");
        assert!(matches!(again, ApiError::Status { status: 409 }));
    }

    #[tokio::test]
    async fn mock_rejects_wrong_token() {
        let api = MockLibraryApi::sample().with_token("good");
        let err = api.current_loans_count("bad").await.expect_err("401");
        assert!(matches!(err, ApiError::Status { status: 401 }));
        assert_eq!(api.calls(Endpoint::LoansCount), 1);
    }

    #[test]
    fn mock_fixture_loads_from_toml() {
        let path = std::env::temp_dir().join(format!(
            "bookdesk-fixture-{}-{}.toml",
            std::process::id(),
            line!()
        ));
        fs::write(
            &path,
            r#"
user_email = "me@example.com"
checked_out = [3]

[[books]]
id = 3
title = "Fixture"
copies = 1
copiesAvailable = 0
"#,
        )
        .expect("write fixture");
        let api = MockLibraryApi::from_path(&path).expect("load fixture");
        fs::remove_file(&path).expect("cleanup");

        assert_eq!(api.user_email, "me@example.com");
        assert_eq!(api.book_snapshot(3).map(|b| b.title), Some("Fixture".to_string()));
    }
}