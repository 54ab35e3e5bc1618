use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

/// A `System` child: its sanitized text and its attributes as they appear in the document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SystemField {
    pub value: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

/// A Windows event reduced to its `System` and `EventData` sections.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StructuredEvent {
    #[serde(rename = "System")]
    pub system: BTreeMap<String, SystemField>,
    #[serde(rename = "EventData")]
    pub event_data: BTreeMap<String, Option<String>>,
}

impl StructuredEvent {
    pub fn system_value(&self, name: &str) -> Option<&str> {
        self.system.get(name)?.value.as_deref()
    }

    pub fn system_attribute(&self, name: &str, attribute: &str) -> Option<&str> {
        self.system
            .get(name)?
            .attributes
            .get(attribute)
            .map(String::as_str)
    }

    pub fn data(&self, name: &str) -> Option<&str> {
        self.event_data.get(name)?.as_deref()
    }

    /// `EventID` parsed as a number, when present.
    pub fn event_id(&self) -> Option<u32> {
        self.system_value("EventID")?.trim().parse().ok()
    }
}
