use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier the library API uses for books.
pub type BookId = i64;

/// Book snapshot as returned by `GET /api/books/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: BookId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub copies: u32,
    #[serde(default)]
    pub copies_available: u32,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub img: Option<String>,
}

/// Review as the server stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRecord {
    pub id: i64,
    #[serde(default)]
    pub user_email: String,
    #[serde(default)]
    pub date: String,
    pub rating: f64,
    pub book_id: BookId,
    #[serde(default)]
    pub review_description: Option<String>,
}

/// Review as the page displays it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: i64,
    pub user_email: String,
    pub date: String,
    pub rating: f64,
    pub book_id: BookId,
    pub review_description: Option<String>,
}

impl From<ReviewRecord> for Review {
    fn from(record: ReviewRecord) -> Self {
        Self {
            id: record.id,
            user_email: record.user_email,
            date: record.date,
            rating: record.rating,
            book_id: record.book_id,
            review_description: record.review_description,
        }
    }
}

/// Body of `POST /api/reviews/secure`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    pub rating: f64,
    pub book_id: BookId,
    pub review_description: Option<String>,
}

/// Authentication context handed to a page by whoever owns sign-in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub authenticated: bool,
    pub access_token: Option<String>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            access_token: Some(token.into()),
        }
    }

    /// Returns the bearer token when the session may call secured endpoints.
    ///
    /// An authenticated session without a token is treated like an anonymous one.
    pub fn token(&self) -> Option<&str> {
        if !self.authenticated {
            return None;
        }
        self.access_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }
}

/// Extracts a book id from a page path such as `/checkout/42`.
///
/// A bare number is accepted as well.
///
/// # Examples
///
/// ```
/// use bookdesk_core::types::book_id_from_path;
///
/// assert_eq!(book_id_from_path("/checkout/42"), Some(42));
/// assert_eq!(book_id_from_path("7"), Some(7));
/// assert_eq!(book_id_from_path("/checkout/abc"), None);
/// ```
pub fn book_id_from_path(path: &str) -> Option<BookId> {
    let trimmed = path.trim();
    if let Ok(id) = trimmed.parse::<BookId>() {
        return Some(id);
    }
    trimmed.split('/').nth(2)?.parse().ok()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonEnvelope {
    pub status: String,
    pub phase: String,
    pub message: String,
    pub details: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    #[default]
    Desktop,
    Mobile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    /// Request timeout in milliseconds; `0` leaves the transport default.
    pub timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8083".to_string(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub token_env_var: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_env_var: "BOOKDESK_TOKEN".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub layout: Layout,
    pub max_loans: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            layout: Layout::Desktop,
            max_loans: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub auth: AuthConfig,
    pub display: DisplayConfig,
}
