use crate::backend::{ScrollId, SearchBackend, SearchPage, SearchRequest, format_keep_alive};
use crate::config::BackendConfig;
use crate::err::{BackendError, Result};
use crate::record::RawRecord;

use log::debug;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use std::time::Duration;

/// [`SearchBackend`] over the Elasticsearch scroll API.
#[derive(Debug, Clone)]
pub struct ElasticsearchBackend {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ScrollResponse {
    #[serde(rename = "_scroll_id")]
    scroll_id: Option<String>,
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    total: Total,
    #[serde(default)]
    hits: Vec<RawRecord>,
}

// Before 7.0 `hits.total` is a bare number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Total {
    Legacy(u64),
    Tracked { value: u64 },
}

impl Total {
    fn value(&self) -> u64 {
        match *self {
            Total::Legacy(v) | Total::Tracked { value: v } => v,
        }
    }
}

impl ElasticsearchBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let base_url = config.base_url();
        let client = Client::builder()
            .timeout(config.get_timeout())
            .build()
            .map_err(|e| BackendError::Transport {
                url: base_url.clone(),
                message: e.to_string(),
            })?;

        Ok(ElasticsearchBackend { client, base_url })
    }

    fn post(&self, url: String, body: &Value) -> Result<(StatusCode, String)> {
        debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .map_err(|e| BackendError::Transport {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().map_err(|e| BackendError::Transport {
            url: url.clone(),
            message: e.to_string(),
        })?;

        Ok((status, text))
    }
}

impl SearchBackend for ElasticsearchBackend {
    fn search(&self, request: &SearchRequest) -> Result<SearchPage> {
        let url = search_url(&self.base_url, request);
        let (status, text) = self.post(url.clone(), &search_body(request))?;

        if !status.is_success() {
            return Err(BackendError::Status {
                url,
                status: status.as_u16(),
                body: text,
            }
            .into());
        }

        parse_page(&text)
    }

    fn scroll(&self, scroll_id: &ScrollId, keep_alive: Duration) -> Result<SearchPage> {
        let url = format!("{}/_search/scroll", self.base_url);
        let (status, text) = self.post(url.clone(), &scroll_body(scroll_id, keep_alive))?;

        if status == StatusCode::NOT_FOUND {
            return Err(BackendError::CursorExpired {
                scroll_id: scroll_id.to_string(),
            }
            .into());
        }

        if !status.is_success() {
            return Err(BackendError::Status {
                url,
                status: status.as_u16(),
                body: text,
            }
            .into());
        }

        parse_page(&text)
    }
}

pub(crate) fn search_url(base_url: &str, request: &SearchRequest) -> String {
    format!(
        "{}/{}/_search?scroll={}",
        base_url,
        request.indices.join(","),
        format_keep_alive(request.keep_alive)
    )
}

pub(crate) fn search_body(request: &SearchRequest) -> Value {
    let size = match request.limit {
        Some(limit) => request.page_size.min(limit),
        None => request.page_size,
    };

    json!({
        "query": {
            "query_string": {
                "query": request.query,
            }
        },
        "size": size,
        "_source": request.return_fields,
        "sort": ["_doc"],
        "track_total_hits": true,
    })
}

pub(crate) fn scroll_body(scroll_id: &ScrollId, keep_alive: Duration) -> Value {
    json!({
        "scroll": format_keep_alive(keep_alive),
        "scroll_id": scroll_id.as_str(),
    })
}

pub(crate) fn parse_page(text: &str) -> Result<SearchPage> {
    let response: ScrollResponse = serde_json::from_str(text).map_err(BackendError::from)?;

    Ok(SearchPage {
        scroll_id: response.scroll_id.map(ScrollId::new),
        total: response.hits.total.value(),
        hits: response.hits.hits,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::err::ErrorKind;
    use pretty_assertions::assert_eq;

    fn request() -> SearchRequest {
        SearchRequest {
            indices: vec!["timeline-a".to_string(), "timeline-b".to_string()],
            query: "data_type:\"windows:evtx:record\"".to_string(),
            page_size: 500,
            limit: Some(10_000),
            return_fields: vec!["xml_string".to_string(), "timestamp".to_string()],
            keep_alive: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_search_request_shape() {
        let request = request();

        assert_eq!(
            search_url("http://localhost:9200", &request),
            "http://localhost:9200/timeline-a,timeline-b/_search?scroll=1m"
        );

        let body = search_body(&request);
        assert_eq!(body["size"], 500);
        assert_eq!(
            body["query"]["query_string"]["query"],
            "data_type:\"windows:evtx:record\""
        );
        assert_eq!(body["_source"], json!(["xml_string", "timestamp"]));
    }

    #[test]
    fn test_small_limit_shrinks_page() {
        let mut request = request();
        request.limit = Some(20);

        assert_eq!(search_body(&request)["size"], 20);
    }

    #[test]
    fn test_scroll_body() {
        let body = scroll_body(&ScrollId::new("DXF1ZXJ5"), Duration::from_secs(60));
        assert_eq!(body, json!({"scroll": "1m", "scroll_id": "DXF1ZXJ5"}));
    }

    #[test]
    fn test_parses_tracked_total() {
        let page = parse_page(
            r#"{
                "_scroll_id": "DXF1ZXJ5",
                "took": 3,
                "hits": {
                    "total": {"value": 2, "relation": "eq"},
                    "hits": [
                        {"_index": "timeline-a", "_id": "1", "_source": {"xml_string": "<Event/>"}},
                        {"_index": "timeline-a", "_id": "2", "_source": {"xml_string": "<Event/>"}}
                    ]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(page.scroll_id, Some(ScrollId::new("DXF1ZXJ5")));
        assert_eq!(page.total, 2);
        assert_eq!(page.hits.len(), 2);
        assert_eq!(page.hits[1].id.as_deref(), Some("2"));
    }

    #[test]
    fn test_parses_legacy_total() {
        let page =
            parse_page(r#"{"_scroll_id": "abc", "hits": {"total": 0, "hits": []}}"#).unwrap();

        assert_eq!(page.total, 0);
        assert!(page.is_empty());
    }

    #[test]
    fn test_garbage_response_is_a_backend_error() {
        let err = parse_page("<html>gateway timeout</html>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Backend);
    }
}
