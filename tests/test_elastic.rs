#![cfg(feature = "elastic")]

use fixtures::*;

use evtx_graph::{
    BackendConfig, BackendError, CollectionMap, ElasticsearchBackend, ErrorKind, EvtxGraphError,
    StreamSettings, stream_events,
};
use pretty_assertions::assert_eq;
use std::time::Duration;

fn backend(server: &CannedServer) -> ElasticsearchBackend {
    bypass_proxies_for_loopback();
    let config = BackendConfig::new()
        .port(server.port)
        .timeout(Some(Duration::from_secs(10)));
    ElasticsearchBackend::new(&config).unwrap()
}

fn collections() -> CollectionMap {
    CollectionMap::new().with_collection("1", ["timeline-security"])
}

#[test]
fn test_streams_every_page_over_http() {
    ensure_env_logger_initialized();
    let first: Vec<_> = (0..2).map(|n| event_hit("timeline-security", n)).collect();
    let second = vec![event_hit("timeline-security", 2)];

    let server = CannedServer::start(vec![
        (200, scroll_response("cursor-1", 3, &first)),
        (200, scroll_response("cursor-2", 3, &second)),
        (200, scroll_response("cursor-3", 3, &[])),
    ]);

    let settings = StreamSettings::new().page_size(2);
    let stream =
        stream_events(&collections(), backend(&server), &"1".into(), "*", &settings).unwrap();

    let sequences: Vec<String> = stream
        .normalized()
        .map(|event| event.unwrap().data("Sequence").unwrap().to_string())
        .collect();
    assert_eq!(sequences, vec!["0", "1", "2"]);

    let requests = server.join();
    assert_eq!(requests.len(), 3);
    assert!(
        requests[0].starts_with("POST /timeline-security/_search?scroll=1m "),
        "unexpected initial search: {}",
        requests[0]
    );
    assert!(requests[0].contains(r#""size":2"#));
    assert!(requests[1].starts_with("POST /_search/scroll "));
    assert!(requests[1].contains(r#""scroll_id":"cursor-1""#));
    assert!(requests[2].contains(r#""scroll_id":"cursor-2""#));
}

#[test]
fn test_not_found_on_scroll_is_an_expired_cursor() {
    ensure_env_logger_initialized();
    let first: Vec<_> = (0..2).map(|n| event_hit("timeline-security", n)).collect();

    let server = CannedServer::start(vec![
        (200, scroll_response("cursor-1", 5, &first)),
        (
            404,
            r#"{"error":{"type":"search_context_missing_exception"},"status":404}"#.to_string(),
        ),
    ]);

    let settings = StreamSettings::new().page_size(2);
    let mut stream =
        stream_events(&collections(), backend(&server), &"1".into(), "*", &settings).unwrap();

    assert!(stream.next().unwrap().is_ok());
    assert!(stream.next().unwrap().is_ok());

    match stream.next() {
        Some(Err(EvtxGraphError::Backend(BackendError::CursorExpired { scroll_id }))) => {
            assert_eq!(scroll_id, "cursor-1");
        }
        other => panic!("expected an expired cursor, got {:?}", other),
    }

    // The error ends the stream, nothing else is requested.
    assert!(stream.next().is_none());
    assert!(stream.next().is_none());
    assert_eq!(server.join().len(), 2);
}

#[test]
fn test_server_error_ends_the_stream() {
    ensure_env_logger_initialized();
    let first = vec![event_hit("timeline-security", 0)];

    let server = CannedServer::start(vec![
        (200, scroll_response("cursor-1", 4, &first)),
        (500, r#"{"error":"node failure"}"#.to_string()),
    ]);

    let settings = StreamSettings::new().page_size(1);
    let results: Vec<_> =
        stream_events(&collections(), backend(&server), &"1".into(), "*", &settings)
            .unwrap()
            .collect();

    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());

    let err = results[1].as_ref().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backend);
    match err {
        EvtxGraphError::Backend(BackendError::Status { status, body, url }) => {
            assert_eq!(*status, 500);
            assert!(body.contains("node failure"));
            assert!(url.ends_with("/_search/scroll"));
        }
        other => panic!("expected a status error, got {:?}", other),
    }

    assert_eq!(server.join().len(), 2);
}

#[test]
fn test_failed_initial_search_is_a_status_error() {
    ensure_env_logger_initialized();
    let server = CannedServer::start(vec![(
        404,
        r#"{"error":{"type":"index_not_found_exception"},"status":404}"#.to_string(),
    )]);

    let mut stream = stream_events(
        &collections(),
        backend(&server),
        &"1".into(),
        "*",
        &StreamSettings::new(),
    )
    .unwrap();

    match stream.next() {
        Some(Err(EvtxGraphError::Backend(BackendError::Status { status, .. }))) => {
            assert_eq!(status, 404)
        }
        other => panic!("expected a status error, got {:?}", other),
    }
    assert!(stream.next().is_none());
    assert_eq!(server.join().len(), 1);
}
