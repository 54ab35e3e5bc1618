use crate::backend::{ScrollId, SearchBackend, SearchPage, SearchRequest};
use crate::collection::{CollectionRef, CollectionResolver};
use crate::err::{MalformedInputError, Result};
use crate::event::StructuredEvent;
use crate::normalize::normalize_record;
use crate::record::{PAYLOAD_FIELD, RawRecord, TIMESTAMP_FIELD};

use log::{debug, info, trace, warn};

use std::time::Duration;
use std::vec::IntoIter;

pub const DEFAULT_PAGE_SIZE: usize = 500;
pub const DEFAULT_LIMIT: usize = 10_000;
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    page_size: usize,
    limit: Option<usize>,
    keep_alive: Duration,
    return_fields: Vec<String>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        StreamSettings {
            page_size: DEFAULT_PAGE_SIZE,
            limit: Some(DEFAULT_LIMIT),
            keep_alive: DEFAULT_KEEP_ALIVE,
            return_fields: vec![PAYLOAD_FIELD.to_string(), TIMESTAMP_FIELD.to_string()],
        }
    }
}

impl StreamSettings {
    pub fn new() -> Self {
        StreamSettings::default()
    }

    /// Records per backend round trip. Zero is treated as one.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Caps the number of records a stream yields. `None` streams every match.
    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// How long the backend keeps the cursor open between two advances.
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn return_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.return_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn get_page_size(&self) -> usize {
        self.page_size
    }

    pub fn get_limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn get_keep_alive(&self) -> Duration {
        self.keep_alive
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    /// The initial search has not been sent yet.
    Pending,
    Open,
    Exhausted,
}

/// Lazily pages through the results of one query.
///
/// The initial search is sent on the first call to `next`, every following page is fetched with
/// the token handed out by the previous one. The stream ends on the first empty page, once the
/// limit is reached, or after a backend error.
#[derive(Debug)]
pub struct EventStream<B: SearchBackend> {
    backend: B,
    request: SearchRequest,
    state: CursorState,
    page: IntoIter<RawRecord>,
    scroll_id: Option<ScrollId>,
    total_hits: Option<u64>,
    remaining: Option<u64>,
    yielded: usize,
    pages: usize,
}

/// Opens a stream over the records of `collection` matching `query`.
///
/// The collection is resolved right away, an unknown collection fails here and no search is sent.
pub fn stream_events<R, B>(
    resolver: &R,
    backend: B,
    collection: &CollectionRef,
    query: &str,
    settings: &StreamSettings,
) -> Result<EventStream<B>>
where
    R: CollectionResolver + ?Sized,
    B: SearchBackend,
{
    let indices = resolver.resolve(collection)?;
    info!(
        "Streaming `{}` from collection `{}` ({} indices)",
        query,
        collection,
        indices.len()
    );

    let request = SearchRequest {
        indices,
        query: query.to_string(),
        page_size: settings.page_size,
        limit: settings.limit,
        return_fields: settings.return_fields.clone(),
        keep_alive: settings.keep_alive,
    };

    Ok(EventStream::new(backend, request))
}

impl<B: SearchBackend> EventStream<B> {
    pub fn new(backend: B, request: SearchRequest) -> Self {
        EventStream {
            backend,
            request,
            state: CursorState::Pending,
            page: Vec::new().into_iter(),
            scroll_id: None,
            total_hits: None,
            remaining: None,
            yielded: 0,
            pages: 0,
        }
    }

    /// Total matches reported with the first page, `None` before it arrived.
    pub fn total_hits(&self) -> Option<u64> {
        self.total_hits
    }

    /// Estimate of the records still to come.
    pub fn remaining(&self) -> Option<u64> {
        self.remaining
    }

    /// Number of pages received so far, empty ones included.
    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn request(&self) -> &SearchRequest {
        &self.request
    }

    /// Feeds every record through [`normalize_record`].
    pub fn normalized(self) -> impl Iterator<Item = Result<StructuredEvent>> {
        self.map(|record| record.and_then(|r| normalize_record(&r)))
    }

    fn limit_reached(&self) -> bool {
        self.request.limit.is_some_and(|limit| self.yielded >= limit)
    }

    fn fetch_page(&mut self) -> Result<SearchPage> {
        match self.state {
            CursorState::Pending => self.backend.search(&self.request),
            CursorState::Open => match self.scroll_id.take() {
                Some(scroll_id) => {
                    trace!("Advancing cursor `{}`", scroll_id);
                    self.backend.scroll(&scroll_id, self.request.keep_alive)
                }
                // No token, nothing to advance.
                None => Ok(self.empty_page()),
            },
            CursorState::Exhausted => Ok(self.empty_page()),
        }
    }

    fn empty_page(&self) -> SearchPage {
        SearchPage {
            scroll_id: None,
            total: self.total_hits.unwrap_or(0),
            hits: Vec::new(),
        }
    }

    /// Loads the next page. Returns `false` when there is nothing more to read.
    fn advance(&mut self) -> Result<bool> {
        let page = self.fetch_page()?;
        self.pages += 1;

        if self.state == CursorState::Pending {
            debug!("Query matched {} records", page.total);
            self.total_hits = Some(page.total);
            self.remaining = Some(page.total);
        }

        debug!("Page {} holds {} records", self.pages, page.hits.len());

        if page.is_empty() {
            self.state = CursorState::Exhausted;
            return Ok(false);
        }

        self.state = CursorState::Open;
        self.scroll_id = page.scroll_id;
        self.page = page.hits.into_iter();
        Ok(true)
    }

    fn check_record(&self, record: RawRecord) -> Result<RawRecord> {
        if record.payload().is_none() {
            warn!("Hit `{}` has no `{}`", record.display_id(), PAYLOAD_FIELD);
            return Err(MalformedInputError::MissingPayload {
                id: record.display_id().to_string(),
                field: PAYLOAD_FIELD.to_string(),
            }
            .into());
        }
        Ok(record)
    }
}

impl<B: SearchBackend> Iterator for EventStream<B> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.limit_reached() {
                if self.state != CursorState::Exhausted {
                    debug!("Limit of {} records reached", self.yielded);
                    self.state = CursorState::Exhausted;
                }
                return None;
            }

            if let Some(record) = self.page.next() {
                self.yielded += 1;
                self.remaining = self.remaining.map(|r| r.saturating_sub(1));
                trace!("Yielding record {}", self.yielded);
                return Some(self.check_record(record));
            }

            if self.state == CursorState::Exhausted {
                return None;
            }

            match self.advance() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => {
                    self.state = CursorState::Exhausted;
                    self.scroll_id = None;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl<B: SearchBackend> std::iter::FusedIterator for EventStream<B> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{BackendCall, MemoryBackend};
    use crate::collection::CollectionMap;
    use crate::err::ErrorKind;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    fn doc(index: &str, id: usize) -> RawRecord {
        match json!({"xml_string": format!("<Event>{}</Event>", id), "timestamp": id}) {
            Value::Object(map) => RawRecord::new(map).with_id(id.to_string()).with_index(index),
            _ => unreachable!(),
        }
    }

    fn collections() -> CollectionMap {
        CollectionMap::new().with_collection("1", ["timeline-a"])
    }

    #[test]
    fn test_nothing_is_sent_before_first_next() {
        let backend = MemoryBackend::with_documents((0..3).map(|i| doc("timeline-a", i)));
        let stream = stream_events(
            &collections(),
            &backend,
            &"1".into(),
            "*",
            &StreamSettings::new(),
        )
        .unwrap();

        assert!(backend.calls().is_empty());
        assert_eq!(stream.total_hits(), None);
    }

    #[test]
    fn test_first_search_carries_settings() {
        let backend = MemoryBackend::with_documents((0..3).map(|i| doc("timeline-a", i)));
        let settings = StreamSettings::new()
            .page_size(2)
            .keep_alive(Duration::from_secs(120));

        let mut stream =
            stream_events(&collections(), &backend, &"1".into(), "*", &settings).unwrap();
        stream.next().unwrap().unwrap();

        assert_eq!(stream.total_hits(), Some(3));
        assert_eq!(stream.remaining(), Some(2));

        match &backend.calls()[0] {
            BackendCall::Search(request) => {
                assert_eq!(request.indices, vec!["timeline-a".to_string()]);
                assert_eq!(request.page_size, 2);
                assert_eq!(request.limit, Some(DEFAULT_LIMIT));
                assert_eq!(request.keep_alive, Duration::from_secs(120));
                assert_eq!(
                    request.return_fields,
                    vec!["xml_string".to_string(), "timestamp".to_string()]
                );
            }
            other => panic!("expected a search, got {:?}", other),
        }
    }

    #[test]
    fn test_stops_at_limit_without_fetching_more() {
        let backend = MemoryBackend::with_documents((0..10).map(|i| doc("timeline-a", i)));
        let settings = StreamSettings::new().page_size(3).limit(Some(4));

        let stream =
            stream_events(&collections(), &backend, &"1".into(), "*", &settings).unwrap();
        let ids: Vec<_> = stream.map(|r| r.unwrap().id.unwrap()).collect();

        assert_eq!(ids, vec!["0", "1", "2", "3"]);
        // First page plus one advance.
        assert_eq!(backend.calls().len(), 2);
    }

    #[test]
    fn test_hit_without_payload_is_reported_and_skipped() {
        let mut backend = MemoryBackend::new();
        backend.push(doc("timeline-a", 0));
        backend.push(
            RawRecord::new(serde_json::Map::new())
                .with_id("empty")
                .with_index("timeline-a"),
        );
        backend.push(doc("timeline-a", 2));

        let results: Vec<_> = stream_events(
            &collections(),
            &backend,
            &"1".into(),
            "*",
            &StreamSettings::new(),
        )
        .unwrap()
        .collect();

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert_eq!(
            results[1].as_ref().unwrap_err().kind(),
            ErrorKind::MalformedInput
        );
        assert!(results[2].is_ok());
    }

    #[test]
    fn test_missing_scroll_id_ends_the_stream() {
        struct OnePage;

        impl SearchBackend for OnePage {
            fn search(&self, _: &SearchRequest) -> Result<SearchPage> {
                Ok(SearchPage {
                    scroll_id: None,
                    total: 1,
                    hits: vec![doc("timeline-a", 0)],
                })
            }

            fn scroll(&self, _: &ScrollId, _: Duration) -> Result<SearchPage> {
                panic!("there is no cursor to advance")
            }
        }

        let stream = stream_events(
            &collections(),
            OnePage,
            &"1".into(),
            "*",
            &StreamSettings::new(),
        )
        .unwrap();

        assert_eq!(stream.count(), 1);
    }
}
