#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::broken_intra_doc_links)]

//! Core library for the bookdesk CLI.
//!
//! `bookdesk_core` provides:
//! - the book detail page controller via [`page`]
//! - library API clients via [`api`]
//! - aggregate star ratings via [`rating`]
//! - text rendering of a page via [`render`]
//! - interactive page sessions via [`repl`]
//! - shared data model and configuration types via [`types`]
//!
//! # Quick Start
//!
//! ```no_run
//! use bookdesk_core::api::MockLibraryApi;
//! use bookdesk_core::page::{BookPage, PageView};
//! use bookdesk_core::types::Session;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let mut page = BookPage::new(MockLibraryApi::sample(), 1, Session::bearer("token"));
//! page.mount();
//! page.settle().await;
//!
//! page.checkout().await?;
//! page.settle().await;
//! if let PageView::Ready(snapshot) = page.view() {
//!     assert!(snapshot.checked_out);
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod page;
pub mod rating;
pub mod render;
pub mod repl;
pub mod types;
