use crate::backend::{ScrollId, SearchBackend, SearchPage, SearchRequest};
use crate::err::{BackendError, Result};
use crate::record::RawRecord;

use log::trace;
use serde_json::Value;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::time::Duration;

/// A request observed by a [`MemoryBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Search(SearchRequest),
    Scroll {
        scroll_id: ScrollId,
        keep_alive: Duration,
    },
}

#[derive(Debug)]
struct Cursor {
    hits: Vec<RawRecord>,
    offset: usize,
    page_size: usize,
}

/// An in-process search backend over a fixed list of documents.
///
/// Every document belongs to an index; a search only sees documents in the requested indices.
/// The query `*` (or an empty query) matches everything, any other query matches documents that
/// have a string field containing it. Tokens are single-use: each advance hands out a new one and
/// forgets the old.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    documents: Vec<RawRecord>,
    cursors: RefCell<HashMap<String, Cursor>>,
    next_token: Cell<u64>,
    calls: RefCell<Vec<BackendCall>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend::default()
    }

    pub fn with_documents(documents: impl IntoIterator<Item = RawRecord>) -> Self {
        MemoryBackend {
            documents: documents.into_iter().collect(),
            ..MemoryBackend::default()
        }
    }

    pub fn push(&mut self, document: RawRecord) {
        self.documents.push(document);
    }

    /// Every request received so far, in order.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.borrow().clone()
    }

    pub fn scroll_count(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, BackendCall::Scroll { .. }))
            .count()
    }

    /// Number of cursors still waiting to be advanced.
    pub fn open_cursors(&self) -> usize {
        self.cursors.borrow().len()
    }

    /// Drops every open cursor, as if their keep-alive ran out.
    pub fn expire_cursors(&self) {
        self.cursors.borrow_mut().clear();
    }

    fn matches(document: &RawRecord, request: &SearchRequest) -> bool {
        let in_index = match &document.index {
            Some(index) => request.indices.iter().any(|i| i == index),
            None => false,
        };
        if !in_index {
            return false;
        }

        let query = request.query.trim();
        if query.is_empty() || query == "*" {
            return true;
        }

        document
            .source
            .values()
            .any(|v| matches!(v, Value::String(s) if s.contains(query)))
    }

    fn project(document: &RawRecord, fields: &[String]) -> RawRecord {
        if fields.is_empty() {
            return document.clone();
        }

        let source = document
            .source
            .iter()
            .filter(|(k, _)| fields.iter().any(|f| f == *k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        RawRecord {
            id: document.id.clone(),
            index: document.index.clone(),
            source,
        }
    }

    fn issue_token(&self) -> String {
        let n = self.next_token.get();
        self.next_token.set(n + 1);
        format!("memory-cursor-{}", n)
    }

    fn next_page(&self, mut cursor: Cursor) -> SearchPage {
        let end = (cursor.offset + cursor.page_size).min(cursor.hits.len());
        let hits = cursor.hits[cursor.offset..end].to_vec();
        cursor.offset = end;
        let total = cursor.hits.len() as u64;

        // An empty page closes the cursor, there is nothing left to hand out a token for.
        if hits.is_empty() {
            trace!("Cursor drained after {} records", total);
            return SearchPage {
                scroll_id: None,
                total,
                hits,
            };
        }

        let token = self.issue_token();
        trace!("Issued `{}` after offset {}", token, cursor.offset);
        self.cursors.borrow_mut().insert(token.clone(), cursor);

        SearchPage {
            scroll_id: Some(ScrollId::new(token)),
            total,
            hits,
        }
    }
}

impl SearchBackend for MemoryBackend {
    fn search(&self, request: &SearchRequest) -> Result<SearchPage> {
        self.calls
            .borrow_mut()
            .push(BackendCall::Search(request.clone()));

        let hits = self
            .documents
            .iter()
            .filter(|d| Self::matches(d, request))
            .map(|d| Self::project(d, &request.return_fields))
            .collect();

        Ok(self.next_page(Cursor {
            hits,
            offset: 0,
            page_size: request.page_size.max(1),
        }))
    }

    fn scroll(&self, scroll_id: &ScrollId, keep_alive: Duration) -> Result<SearchPage> {
        self.calls.borrow_mut().push(BackendCall::Scroll {
            scroll_id: scroll_id.clone(),
            keep_alive,
        });

        let cursor = self
            .cursors
            .borrow_mut()
            .remove(scroll_id.as_str())
            .ok_or_else(|| BackendError::CursorExpired {
                scroll_id: scroll_id.to_string(),
            })?;

        Ok(self.next_page(cursor))
    }
}
