use thiserror::Error;

pub type Result<T> = std::result::Result<T, EvtxGraphError>;

/// Coarse classification of an [`EvtxGraphError`], for callers that only care about the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    MalformedInput,
    Backend,
}

#[derive(Debug, Error)]
pub enum EvtxGraphError {
    #[error("collection `{collection}` does not exist")]
    CollectionNotFound { collection: String },

    #[error("graph view {id} does not exist (catalog has {count} views)")]
    ViewNotFound { id: usize, count: usize },

    #[error("malformed input: {0}")]
    MalformedInput(#[from] MalformedInputError),

    #[error("search backend failed: {0}")]
    Backend(#[from] BackendError),
}

impl EvtxGraphError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EvtxGraphError::CollectionNotFound { .. } | EvtxGraphError::ViewNotFound { .. } => {
                ErrorKind::NotFound
            }
            EvtxGraphError::MalformedInput(_) => ErrorKind::MalformedInput,
            EvtxGraphError::Backend(_) => ErrorKind::Backend,
        }
    }
}

#[derive(Debug, Error)]
pub enum MalformedInputError {
    #[error("offset {position}: failed to parse XML: {message}")]
    Xml { position: u64, message: String },

    #[error("document has no root element")]
    EmptyDocument,

    #[error("offset {position}: found content after the root element")]
    TrailingContent { position: u64 },

    #[error("element <{element}> was never closed")]
    UnclosedElement { element: String },

    #[error("event is missing the `{section}` section")]
    MissingSection { section: &'static str },

    #[error("`EventData` child <{element}> has no `Name` attribute")]
    MissingDataName { element: String },

    #[error("record {id} has no `{field}` payload")]
    MissingPayload { id: String, field: String },

    #[error("required form field `{field}` is empty")]
    MissingFormField { field: String },
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("{url} responded with HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("unexpected response from search backend: {message}")]
    InvalidResponse { message: String },

    #[error("continuation token `{scroll_id}` is expired or unknown")]
    CursorExpired { scroll_id: String },

    #[error("`serde_json` failed with error: {0}")]
    Json(#[from] serde_json::Error),
}
