//! Streams Windows event records out of a search index and reduces their XML payloads to a
//! structured form.
//!
//! ```no_run
//! use evtx_graph::{CollectionMap, MemoryBackend, StreamSettings, stream_events};
//!
//! let collections = CollectionMap::new().with_collection("1", ["timeline-a"]);
//! let backend = MemoryBackend::new();
//!
//! let stream = stream_events(&collections, &backend, &"1".into(), "*", &StreamSettings::new())?;
//! for event in stream.normalized() {
//!     println!("{:?}", event?.data("TargetUserName"));
//! }
//! # Ok::<(), evtx_graph::EvtxGraphError>(())
//! ```

pub use backend::{MemoryBackend, ScrollId, SearchBackend, SearchPage, SearchRequest};
#[cfg(feature = "elastic")]
pub use backend::ElasticsearchBackend;
pub use collection::{CollectionMap, CollectionRef, CollectionResolver};
pub use config::BackendConfig;
pub use err::{BackendError, ErrorKind, EvtxGraphError, MalformedInputError, Result};
pub use event::{StructuredEvent, SystemField};
pub use normalize::{normalize, normalize_record, sanitize};
pub use record::RawRecord;
pub use stream::{EventStream, StreamSettings, stream_events};
pub use views::{View, get_view, list_views};

pub mod backend;
pub mod collection;
pub mod config;
pub mod err;
pub mod event;
pub mod normalize;
pub mod record;
pub mod stream;
pub mod views;
