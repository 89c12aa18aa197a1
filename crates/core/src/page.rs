//! Book detail page controller.
//!
//! A [`BookPage`] owns five fetch units that run as independent tasks and a
//! readiness gate that folds their state into one [`PageView`]. Two of the
//! fetched flags feed back into other units:
//!
//! - a change of the checkout flag restarts the book and loan-count units
//! - a change of the review-left flag restarts the review-list unit
//!
//! A successful checkout or review supersedes the matching read still in
//! flight, so a late answer from before the write cannot undo it.
//!
//! All in-flight tasks belong to the page and are aborted when it is
//! unmounted or dropped.

use crate::api::{ApiError, LibraryApi};
use crate::rating::average_rating;
use crate::types::{Book, BookId, Review, ReviewRequest, Session};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, info, warn, Instrument};

/// One independent read the page performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchUnit {
    Book,
    Reviews,
    UserReview,
    LoansCount,
    CheckedOut,
}

impl FetchUnit {
    pub const ALL: [FetchUnit; 5] = [
        FetchUnit::Book,
        FetchUnit::Reviews,
        FetchUnit::UserReview,
        FetchUnit::LoansCount,
        FetchUnit::CheckedOut,
    ];

    fn index(self) -> usize {
        match self {
            Self::Book => 0,
            Self::Reviews => 1,
            Self::UserReview => 2,
            Self::LoansCount => 3,
            Self::CheckedOut => 4,
        }
    }

    /// Whether the unit needs a bearer token.
    pub fn is_secured(self) -> bool {
        matches!(self, Self::UserReview | Self::LoansCount | Self::CheckedOut)
    }

    /// Message shown to the reader when this unit fails.
    pub fn failure_message(self) -> &'static str {
        match self {
            Self::Book | Self::LoansCount => "Something went wrong!",
            Self::Reviews => "Something went wrong while fetching reviews!",
            Self::UserReview => "Something went wrong while fetching user review!",
            Self::CheckedOut => "Something went wrong while checking out the book!",
        }
    }
}

impl fmt::Display for FetchUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Book => "book",
            Self::Reviews => "reviews",
            Self::UserReview => "user_review",
            Self::LoansCount => "loans_count",
            Self::CheckedOut => "checked_out",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PageError {
    #[error("library api failure: {0}")]
    Api(#[from] ApiError),
    #[error("sign in required")]
    Unauthenticated,
    #[error("invalid review: {0}")]
    InvalidReview(String),
    #[error("page is not mounted")]
    Unmounted,
}

/// Everything the page shows once every unit has resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageSnapshot {
    pub book: Book,
    pub reviews: Vec<Review>,
    pub average_rating: f64,
    pub review_left: bool,
    pub loans_count: u32,
    pub checked_out: bool,
    pub authenticated: bool,
}

/// Output of the readiness gate.
#[derive(Debug, Clone, PartialEq)]
pub enum PageView {
    Loading,
    Error(String),
    Ready(PageSnapshot),
}

#[derive(Debug)]
enum UnitOutcome {
    Book(Book),
    Reviews(Vec<Review>),
    ReviewLeft(bool),
    LoansCount(u32),
    CheckedOut(bool),
}

#[derive(Debug)]
struct UnitEvent {
    unit: FetchUnit,
    generation: u64,
    result: Result<UnitOutcome, ApiError>,
}

#[derive(Debug)]
struct UnitStatus {
    pending: bool,
    generation: u64,
    error: Option<&'static str>,
    failed_at: u64,
    task: Option<AbortHandle>,
}

impl Default for UnitStatus {
    fn default() -> Self {
        Self {
            pending: true,
            generation: 0,
            error: None,
            failed_at: 0,
            task: None,
        }
    }
}

/// Controller for one book detail page instance.
///
/// # Examples
///
/// ```no_run
/// use bookdesk_core::api::MockLibraryApi;
/// use bookdesk_core::page::{BookPage, PageView};
/// use bookdesk_core::types::Session;
///
/// # async fn demo() {
/// let mut page = BookPage::new(MockLibraryApi::sample(), 1, Session::anonymous());
/// page.mount();
/// page.settle().await;
/// assert!(matches!(page.view(), PageView::Ready(_)));
/// # }
/// ```
pub struct BookPage<A>
where
    A: LibraryApi + 'static,
{
    api: Arc<A>,
    book_id: BookId,
    session: Session,
    units: [UnitStatus; 5],
    failures: u64,
    mounted: bool,
    tasks: JoinSet<UnitEvent>,
    book: Option<Book>,
    reviews: Vec<Review>,
    average_rating: f64,
    review_left: bool,
    loans_count: u32,
    checked_out: bool,
}

impl<A> BookPage<A>
where
    A: LibraryApi + 'static,
{
    pub fn new(api: A, book_id: BookId, session: Session) -> Self {
        Self::with_shared(Arc::new(api), book_id, session)
    }

    /// Builds a page over an API handle shared with other pages.
    pub fn with_shared(api: Arc<A>, book_id: BookId, session: Session) -> Self {
        Self {
            api,
            book_id,
            session,
            units: Default::default(),
            failures: 0,
            mounted: false,
            tasks: JoinSet::new(),
            book: None,
            reviews: Vec::new(),
            average_rating: 0.0,
            review_left: false,
            loans_count: 0,
            checked_out: false,
        }
    }

    pub fn book_id(&self) -> BookId {
        self.book_id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn shared_api(&self) -> Arc<A> {
        Arc::clone(&self.api)
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Starts all five units. Must run inside a tokio runtime.
    pub fn mount(&mut self) {
        self.mounted = true;
        debug!(book_id = self.book_id, "mounting book page");
        for unit in FetchUnit::ALL {
            self.start(unit);
        }
    }

    /// Aborts every in-flight unit and waits for the tasks to wind down.
    ///
    /// Results that were still in flight are discarded; the page keeps the
    /// state it had.
    pub async fn unmount(&mut self) {
        self.mounted = false;
        self.tasks.shutdown().await;
        for status in &mut self.units {
            status.task = None;
        }
        debug!(book_id = self.book_id, "book page unmounted");
    }

    /// Replaces the session and restarts the units that depend on it.
    pub fn set_session(&mut self, session: Session) {
        if self.session == session {
            return;
        }
        self.session = session;
        if self.mounted {
            self.start(FetchUnit::UserReview);
            self.start(FetchUnit::LoansCount);
            self.start(FetchUnit::CheckedOut);
        }
    }

    pub fn is_pending(&self, unit: FetchUnit) -> bool {
        self.units[unit.index()].pending
    }

    pub fn has_pending(&self) -> bool {
        self.units.iter().any(|s| s.pending)
    }

    /// Number of unit tasks not yet collected.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Failed units with their messages, oldest failure first.
    pub fn unit_errors(&self) -> Vec<(FetchUnit, &'static str)> {
        let mut errors: Vec<_> = FetchUnit::ALL
            .into_iter()
            .filter_map(|unit| {
                let status = &self.units[unit.index()];
                status.error.map(|msg| (status.failed_at, unit, msg))
            })
            .collect();
        errors.sort_by_key(|(at, _, _)| *at);
        errors.into_iter().map(|(_, unit, msg)| (unit, msg)).collect()
    }

    /// Readiness gate.
    ///
    /// Loading while any unit is pending; otherwise the most recent failure
    /// wins over content.
    pub fn view(&self) -> PageView {
        if self.has_pending() {
            return PageView::Loading;
        }
        if let Some((_, message)) = self.unit_errors().last() {
            return PageView::Error((*message).to_string());
        }
        match &self.book {
            Some(book) => PageView::Ready(PageSnapshot {
                book: book.clone(),
                reviews: self.reviews.clone(),
                average_rating: self.average_rating,
                review_left: self.review_left,
                loans_count: self.loans_count,
                checked_out: self.checked_out,
                authenticated: self.session.is_authenticated(),
            }),
            None => PageView::Loading,
        }
    }

    /// Collects the next finished unit and applies it.
    ///
    /// Returns the unit whose result was applied, or `None` once no task is
    /// left to collect. Aborted and superseded results are skipped.
    pub async fn step(&mut self) -> Option<FetchUnit> {
        loop {
            match self.tasks.join_next().await? {
                Ok(event) => {
                    let unit = event.unit;
                    if self.apply(event) {
                        return Some(unit);
                    }
                }
                Err(err) if err.is_cancelled() => continue,
                Err(err) => warn!(error = %err, "fetch unit task failed"),
            }
        }
    }

    /// Drives the page until no unit is pending.
    pub async fn settle(&mut self) {
        while self.has_pending() {
            if self.step().await.is_none() {
                break;
            }
        }
        if self.mounted {
            // A unit whose task vanished (panicked) must not hold the gate forever.
            for unit in FetchUnit::ALL {
                if self.units[unit.index()].pending {
                    self.record_failure(unit);
                }
            }
        }
    }

    /// Checks the book out for the signed-in reader.
    ///
    /// On success the checkout flag is set, which refreshes the book and the
    /// loan count; call [`BookPage::settle`] to wait for them. Failures are
    /// returned untouched and change nothing.
    pub async fn checkout(&mut self) -> Result<(), PageError> {
        if !self.mounted {
            return Err(PageError::Unmounted);
        }
        let token = self
            .session
            .token()
            .ok_or(PageError::Unauthenticated)?
            .to_string();
        self.api.checkout(&token, self.book_id).await?;
        info!(book_id = self.book_id, "book checked out");
        self.supersede(FetchUnit::CheckedOut);
        self.set_checked_out(true);
        Ok(())
    }

    /// Submits a review for this book.
    ///
    /// On success the review-left flag is set, which refreshes the review list.
    pub async fn submit_review(
        &mut self,
        rating: f64,
        description: Option<String>,
    ) -> Result<(), PageError> {
        if !self.mounted {
            return Err(PageError::Unmounted);
        }
        let token = self
            .session
            .token()
            .ok_or(PageError::Unauthenticated)?
            .to_string();
        if !rating.is_finite() {
            return Err(PageError::InvalidReview(format!(
                "rating must be a number, got {rating}"
            )));
        }
        let request = ReviewRequest {
            rating,
            book_id: self.book_id,
            review_description: description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
        };
        self.api.submit_review(&token, &request).await?;
        info!(book_id = self.book_id, rating, "review submitted");
        self.supersede(FetchUnit::UserReview);
        self.set_review_left(true);
        Ok(())
    }

    fn start(&mut self, unit: FetchUnit) {
        let book_id = self.book_id;
        let token = self.session.token().map(str::to_string);
        self.supersede(unit);
        let status = &mut self.units[unit.index()];
        status.pending = true;
        let generation = status.generation;

        let token = match (unit.is_secured(), token) {
            (false, _) => None,
            (true, Some(token)) => Some(token),
            (true, None) => {
                debug!(%unit, "no session; using default");
                status.pending = false;
                if let Some(outcome) = default_outcome(unit) {
                    self.store(outcome);
                }
                return;
            }
        };

        let api = Arc::clone(&self.api);
        let span = tracing::debug_span!("fetch_unit", %unit, book_id, generation);
        let handle = self.tasks.spawn(
            async move {
                debug!("fetch started");
                let result = fetch(api.as_ref(), unit, book_id, token.as_deref()).await;
                debug!(ok = result.is_ok(), "fetch finished");
                UnitEvent {
                    unit,
                    generation,
                    result,
                }
            }
            .instrument(span),
        );
        self.units[unit.index()].task = Some(handle);
    }

    /// Invalidates whatever `unit` has in flight and clears its error.
    ///
    /// A result from an older generation is dropped by `apply`.
    fn supersede(&mut self, unit: FetchUnit) {
        let status = &mut self.units[unit.index()];
        if let Some(previous) = status.task.take() {
            previous.abort();
        }
        status.generation += 1;
        status.pending = false;
        status.error = None;
    }

    fn apply(&mut self, event: UnitEvent) -> bool {
        let status = &mut self.units[event.unit.index()];
        if !status.pending || status.generation != event.generation {
            debug!(unit = %event.unit, "dropping superseded result");
            return false;
        }
        status.pending = false;
        status.task = None;
        match event.result {
            Ok(outcome) => self.store(outcome),
            Err(err) => {
                warn!(
                    unit = %event.unit,
                    book_id = self.book_id,
                    retryable = err.is_retryable(),
                    error = %err,
                    "fetch unit failed"
                );
                self.record_failure(event.unit);
            }
        }
        true
    }

    fn record_failure(&mut self, unit: FetchUnit) {
        self.failures += 1;
        let status = &mut self.units[unit.index()];
        status.pending = false;
        status.error = Some(unit.failure_message());
        status.failed_at = self.failures;
    }

    fn store(&mut self, outcome: UnitOutcome) {
        match outcome {
            UnitOutcome::Book(book) => self.book = Some(book),
            UnitOutcome::Reviews(reviews) => {
                self.average_rating = average_rating(reviews.iter().map(|r| r.rating));
                self.reviews = reviews;
            }
            UnitOutcome::ReviewLeft(flag) => self.set_review_left(flag),
            UnitOutcome::LoansCount(count) => self.loans_count = count,
            UnitOutcome::CheckedOut(flag) => self.set_checked_out(flag),
        }
    }

    fn set_checked_out(&mut self, flag: bool) {
        if self.checked_out == flag {
            return;
        }
        self.checked_out = flag;
        self.start(FetchUnit::Book);
        self.start(FetchUnit::LoansCount);
    }

    fn set_review_left(&mut self, flag: bool) {
        if self.review_left == flag {
            return;
        }
        self.review_left = flag;
        self.start(FetchUnit::Reviews);
    }
}

impl<A> fmt::Debug for BookPage<A>
where
    A: LibraryApi + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BookPage")
            .field("book_id", &self.book_id)
            .field("mounted", &self.mounted)
            .field("in_flight", &self.tasks.len())
            .field("checked_out", &self.checked_out)
            .field("review_left", &self.review_left)
            .finish_non_exhaustive()
    }
}

/// Value a secured unit takes when there is no session to ask with.
fn default_outcome(unit: FetchUnit) -> Option<UnitOutcome> {
    match unit {
        FetchUnit::UserReview => Some(UnitOutcome::ReviewLeft(false)),
        FetchUnit::LoansCount => Some(UnitOutcome::LoansCount(0)),
        FetchUnit::CheckedOut => Some(UnitOutcome::CheckedOut(false)),
        FetchUnit::Book | FetchUnit::Reviews => None,
    }
}

async fn fetch<A>(
    api: &A,
    unit: FetchUnit,
    book_id: BookId,
    token: Option<&str>,
) -> Result<UnitOutcome, ApiError>
where
    A: LibraryApi + ?Sized,
{
    match unit {
        FetchUnit::Book => api.book(book_id).await.map(UnitOutcome::Book),
        FetchUnit::Reviews => api
            .reviews(book_id)
            .await
            .map(|records| UnitOutcome::Reviews(records.into_iter().map(Review::from).collect())),
        FetchUnit::UserReview => {
            let token = token.ok_or(ApiError::Unauthenticated)?;
            api.user_review_exists(token, book_id)
                .await
                .map(UnitOutcome::ReviewLeft)
        }
        FetchUnit::LoansCount => {
            let token = token.ok_or(ApiError::Unauthenticated)?;
            api.current_loans_count(token)
                .await
                .map(UnitOutcome::LoansCount)
        }
        FetchUnit::CheckedOut => {
            let token = token.ok_or(ApiError::Unauthenticated)?;
            api.is_checked_out(token, book_id)
                .await
                .map(UnitOutcome::CheckedOut)
        }
    }
}
