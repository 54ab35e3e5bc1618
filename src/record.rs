use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding the raw event XML.
pub const PAYLOAD_FIELD: &str = "xml_string";
/// Field holding the event time, in microseconds since the Unix epoch.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// One search hit, as returned by the backend.
///
/// `source` is left untyped; only [`PAYLOAD_FIELD`] and [`TIMESTAMP_FIELD`] are interpreted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "_index", default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(rename = "_source", default)]
    pub source: Map<String, Value>,
}

impl RawRecord {
    pub fn new(source: Map<String, Value>) -> Self {
        RawRecord {
            id: None,
            index: None,
            source,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.source.get(field)
    }

    /// The XML payload, if present and a string.
    pub fn payload(&self) -> Option<&str> {
        self.get(PAYLOAD_FIELD).and_then(Value::as_str)
    }

    /// The event time.
    ///
    /// Integers are read as microseconds since the epoch, strings as RFC 3339.
    pub fn timestamp(&self) -> Option<Timestamp> {
        match self.get(TIMESTAMP_FIELD)? {
            Value::Number(n) => Timestamp::from_microsecond(n.as_i64()?).ok(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Identifier used in diagnostics.
    pub(crate) fn display_id(&self) -> &str {
        self.id.as_deref().unwrap_or("<unknown>")
    }
}
