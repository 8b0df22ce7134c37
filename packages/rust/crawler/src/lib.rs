//! Remote catalog access for lawledger.
//!
//! - [`session`]: retrying HTTP executor and the shared cookie cache
//! - [`cookies`]: single-flight cookie cache and the headless browser handshake
//! - [`listing`]: listing payloads and response classification
//! - [`catalog`]: listing pages and download resolution with anti-bot handling
//! - [`engine`]: bounded-concurrency per-category metadata crawler

pub mod catalog;
pub mod cookies;
pub mod engine;
pub mod listing;
pub mod session;

pub use catalog::CatalogClient;
pub use cookies::{BrowserCookieSource, CookieCache, CookieMap, CookieSource};
pub use engine::{CrawlReport, MetadataCrawler};
pub use listing::{ListingPage, ListingResponse, ListingScope, classify_listing, page_count};
pub use session::{RequestOptions, RetryPolicy, SessionManager};
