//! The search service seam.
//!
//! The streamer talks to a [`SearchBackend`], which knows how to open a cursor over a query and
//! how to advance it. Two implementations are provided:
//! - [`MemoryBackend`], an in-process backend over a fixed list of documents.
//! - [`ElasticsearchBackend`] (feature `elastic`), which speaks the Elasticsearch scroll API.

#[cfg(feature = "elastic")]
pub mod elastic;
pub mod memory;

#[cfg(feature = "elastic")]
pub use elastic::ElasticsearchBackend;
pub use memory::MemoryBackend;

use crate::err::Result;
use crate::record::RawRecord;

use std::fmt;
use std::time::Duration;

/// Opaque continuation token handed out by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScrollId(String);

impl ScrollId {
    pub fn new(id: impl Into<String>) -> Self {
        ScrollId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScrollId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parameters of the initial, cursor-opening search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub indices: Vec<String>,
    pub query: String,
    pub page_size: usize,
    /// Query-level cap on the number of records.
    pub limit: Option<usize>,
    pub return_fields: Vec<String>,
    pub keep_alive: Duration,
}

/// One page of results together with the cursor state needed to fetch the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    pub scroll_id: Option<ScrollId>,
    /// Total number of documents matching the query.
    pub total: u64,
    pub hits: Vec<RawRecord>,
}

impl SearchPage {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

pub trait SearchBackend {
    /// Runs `request` and opens a cursor over its results, returning the first page.
    fn search(&self, request: &SearchRequest) -> Result<SearchPage>;

    /// Fetches the page after the one `scroll_id` was returned with, renewing the cursor for
    /// another `keep_alive`.
    ///
    /// An expired or unknown token fails with [`crate::BackendError::CursorExpired`].
    fn scroll(&self, scroll_id: &ScrollId, keep_alive: Duration) -> Result<SearchPage>;
}

impl<B: SearchBackend + ?Sized> SearchBackend for &B {
    fn search(&self, request: &SearchRequest) -> Result<SearchPage> {
        (**self).search(request)
    }

    fn scroll(&self, scroll_id: &ScrollId, keep_alive: Duration) -> Result<SearchPage> {
        (**self).scroll(scroll_id, keep_alive)
    }
}

impl<B: SearchBackend + ?Sized> SearchBackend for Box<B> {
    fn search(&self, request: &SearchRequest) -> Result<SearchPage> {
        (**self).search(request)
    }

    fn scroll(&self, scroll_id: &ScrollId, keep_alive: Duration) -> Result<SearchPage> {
        (**self).scroll(scroll_id, keep_alive)
    }
}

/// Formats a keep-alive the way search services expect it (`1m`, `30s`, `1500ms`).
pub fn format_keep_alive(keep_alive: Duration) -> String {
    let millis = keep_alive.as_millis();
    if millis % 60_000 == 0 && millis > 0 {
        format!("{}m", millis / 60_000)
    } else if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{}ms", millis)
    }
}
