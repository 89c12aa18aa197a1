//! Plain-text rendering of a book page.

use crate::page::{PageSnapshot, PageView};
use crate::rating::format_rating;
use crate::types::{Layout, Review};
use std::fmt::Write;

/// How many reviews the page lists before pointing at the full list.
pub const LATEST_REVIEWS: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub layout: Layout,
    pub max_loans: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            layout: Layout::Desktop,
            max_loans: 5,
        }
    }
}

impl RenderOptions {
    fn width(&self) -> usize {
        match self.layout {
            Layout::Desktop => 78,
            Layout::Mobile => 40,
        }
    }
}

/// What the checkout box offers the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutState {
    SignInRequired,
    CheckedOut,
    LoanLimitReached,
    Available,
    Unavailable,
}

pub fn checkout_state(snapshot: &PageSnapshot, max_loans: u32) -> CheckoutState {
    if !snapshot.authenticated {
        CheckoutState::SignInRequired
    } else if snapshot.checked_out {
        CheckoutState::CheckedOut
    } else if snapshot.loans_count >= max_loans {
        CheckoutState::LoanLimitReached
    } else if snapshot.book.copies_available == 0 {
        CheckoutState::Unavailable
    } else {
        CheckoutState::Available
    }
}

pub fn render_view(view: &PageView, options: RenderOptions) -> String {
    match view {
        PageView::Loading => "Loading...\n".to_string(),
        PageView::Error(message) => format!("{message}\n"),
        PageView::Ready(snapshot) => render_snapshot(snapshot, options),
    }
}

pub fn render_snapshot(snapshot: &PageSnapshot, options: RenderOptions) -> String {
    let width = options.width();
    let mut out = String::new();
    let book = &snapshot.book;
    let cover = if book.img.is_some() {
        "[cover image]"
    } else {
        "[no cover: default placeholder]"
    };

    match options.layout {
        Layout::Desktop => {
            let _ = writeln!(out, "{}  {}", cover, book.title);
            let _ = writeln!(out, "{:width$}  {}", "", book.author, width = cover.len());
        }
        Layout::Mobile => {
            let _ = writeln!(out, "{cover}");
            let _ = writeln!(out);
            let _ = writeln!(out, "{}", book.title);
            let _ = writeln!(out, "{}", book.author);
        }
    }
    for line in wrap(&book.description, width) {
        let _ = writeln!(out, "{line}");
    }
    let _ = writeln!(out, "Rating: {}/5", format_rating(snapshot.average_rating));
    let _ = writeln!(out);

    render_checkout_box(&mut out, snapshot, options);
    let _ = writeln!(out, "{}", "-".repeat(width));
    render_latest_reviews(&mut out, &snapshot.reviews, width);
    out
}

fn render_checkout_box(out: &mut String, snapshot: &PageSnapshot, options: RenderOptions) {
    let book = &snapshot.book;
    if snapshot.authenticated {
        let _ = writeln!(
            out,
            "{}/{} books checked out",
            snapshot.loans_count, options.max_loans
        );
    }
    if book.copies_available > 0 {
        let _ = writeln!(out, "Available");
    } else {
        let _ = writeln!(out, "Wait List");
    }
    let _ = writeln!(
        out,
        "{} copies / {} available",
        book.copies, book.copies_available
    );

    let action = match checkout_state(snapshot, options.max_loans) {
        CheckoutState::SignInRequired => "Sign in to check out this book.",
        CheckoutState::CheckedOut => "Book checked out. Enjoy!",
        CheckoutState::LoanLimitReached => "Too many books checked out.",
        CheckoutState::Unavailable => "No copies available right now.",
        CheckoutState::Available => "Ready to check out: `checkout`",
    };
    let _ = writeln!(out, "{action}");

    let review = if !snapshot.authenticated {
        "Sign in to be able to leave a review."
    } else if snapshot.review_left {
        "Thank you for your review!"
    } else {
        "Leave a review: `review <rating> [text]`"
    };
    let _ = writeln!(out, "{review}");
}

fn render_latest_reviews(out: &mut String, reviews: &[Review], width: usize) {
    let _ = writeln!(out, "Latest Reviews:");
    if reviews.is_empty() {
        let _ = writeln!(out, "Currently there are no reviews for this book.");
        return;
    }
    for review in reviews.iter().take(LATEST_REVIEWS) {
        let _ = writeln!(
            out,
            "{}/5  {}  {}",
            format_rating(review.rating),
            review.user_email,
            review.date
        );
        if let Some(text) = &review.review_description {
            for line in wrap(text, width.saturating_sub(2)) {
                let _ = writeln!(out, "  {line}");
            }
        }
    }
    if reviews.len() > LATEST_REVIEWS {
        let _ = writeln!(out, "... {} reviews in total", reviews.len());
    }
}

fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Book;

    fn snapshot(authenticated: bool) -> PageSnapshot {
        PageSnapshot {
            book: Book {
                id: 42,
                title: "Rust in Action".to_string(),
                author: "Ferris".to_string(),
                description: "A long description of ownership and borrowing.".to_string(),
                copies: 4,
                copies_available: 2,
                category: "BE".to_string(),
                img: None,
            },
            reviews: (1..=4)
                .map(|i| Review {
                    id: i,
                    user_email: format!("r{i}@example.com"),
                    date: "2024-01-01".to_string(),
                    rating: 4.0,
                    book_id: 42,
                    review_description: Some("fine".to_string()),
                })
                .collect(),
            average_rating: 4.0,
            review_left: false,
            loans_count: 1,
            checked_out: false,
            authenticated,
        }
    }

    #[test]
    fn anonymous_reader_is_asked_to_sign_in() {
        let text = render_snapshot(&snapshot(false), RenderOptions::default());
        assert!(text.contains("Sign in to check out this book."));
        assert!(text.contains("Sign in to be able to leave a review."));
        assert!(!text.contains("books checked out"));
        assert!(text.contains("Rating: 4.0/5"));
    }

    #[test]
    fn only_latest_reviews_are_listed() {
        let text = render_snapshot(&snapshot(true), RenderOptions::default());
        assert_eq!(text.matches("@example.com").count(), LATEST_REVIEWS);
        assert!(text.contains("4 reviews in total"));
    }

    #[test]
    fn loan_limit_blocks_checkout() {
        let mut s = snapshot(true);
        s.loans_count = 5;
        assert_eq!(checkout_state(&s, 5), CheckoutState::LoanLimitReached);
        s.checked_out = true;
        assert_eq!(checkout_state(&s, 5), CheckoutState::CheckedOut);
    }

    #[test]
    fn mobile_layout_wraps_narrower() {
        let options = RenderOptions {
            layout: Layout::Mobile,
            max_loans: 5,
        };
        let text = render_snapshot(&snapshot(true), options);
        assert!(text.lines().all(|l| l.chars().count() <= 40));
        assert!(text.starts_with("[no cover: default placeholder]\n"));
    }

    #[test]
    fn gate_states_render_plainly() {
        let options = RenderOptions::default();
        assert_eq!(render_view(&PageView::Loading, options), "Loading...\n");
        assert_eq!(
            render_view(&PageView::Error("Something went wrong!".to_string()), options),
            "Something went wrong!\n"
        );
    }

    #[test]
    fn wrap_keeps_words_whole() {
        assert_eq!(wrap("a bb ccc dddd", 6), vec!["a bb", "ccc", "dddd"]);
        assert!(wrap("", 10).is_empty());
    }
}
