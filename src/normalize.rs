//! Reduces a rendered Windows event (`<Event xmlns="http://schemas.microsoft.com/win/2004/08/events/event">`)
//! to a [`StructuredEvent`].
//!
//! ```xml
//! <Event xmlns="http://schemas.microsoft.com/win/2004/08/events/event">
//!   <System>
//!     <EventID>4624</EventID>
//!     <Computer>-</Computer>
//!   </System>
//!   <EventData>
//!     <Data Name="TargetUserName">alice</Data>
//!   </EventData>
//! </Event>
//! ```
//!
//! `System` children are keyed by their local tag name and keep their attributes, `EventData`
//! children are keyed by their `Name` attribute. The sentinels `-` and a lone space become `None`.

use crate::err::{EvtxGraphError, MalformedInputError, Result};
use crate::event::{StructuredEvent, SystemField};
use crate::record::{PAYLOAD_FIELD, RawRecord};

use log::trace;
use quick_xml::NsReader;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};

use std::collections::BTreeMap;

pub const EVENT_NAMESPACE: &str = "http://schemas.microsoft.com/win/2004/08/events/event";

/// Texts that Windows renders in place of a missing value.
const NULL_SENTINELS: [&str; 2] = ["-", " "];

/// Maps the null sentinels to `None`, anything else (including `""`) is kept as is.
pub fn sanitize(value: Option<String>) -> Option<String> {
    value.filter(|v| !NULL_SENTINELS.contains(&v.as_str()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    System,
    EventData,
}

impl Section {
    fn from_local_name(name: &[u8]) -> Option<Section> {
        match name {
            b"System" => Some(Section::System),
            b"EventData" => Some(Section::EventData),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct OpenField {
    name: String,
    attributes: BTreeMap<String, String>,
    text: Option<String>,
    /// Cleared once a child element starts, text after it does not belong to this field.
    collecting: bool,
    depth: usize,
}

#[derive(Debug, Default)]
struct EventBuilder {
    system: Option<BTreeMap<String, SystemField>>,
    event_data: Option<BTreeMap<String, Option<String>>>,
    section: Option<(Section, usize)>,
    field: Option<OpenField>,
}

impl EventBuilder {
    fn has_section(&self, section: Section) -> bool {
        match section {
            Section::System => self.system.is_some(),
            Section::EventData => self.event_data.is_some(),
        }
    }

    /// Handles an opening tag at `depth` (the number of currently open ancestors).
    /// `self_closing` elements are finished right away.
    fn open(
        &mut self,
        element: &BytesStart,
        in_event_namespace: bool,
        depth: usize,
        self_closing: bool,
        position: u64,
    ) -> Result<()> {
        if let Some(field) = self.field.as_mut() {
            // Nested markup inside a field is not part of the record.
            field.collecting = false;
            return Ok(());
        }

        if let Some((section, section_depth)) = self.section {
            if depth == section_depth + 1 {
                let field = Self::field_from_element(section, element, depth, self_closing, position)?;
                if self_closing {
                    self.finish_field(field);
                } else {
                    self.field = Some(field);
                }
            }
            return Ok(());
        }

        if !in_event_namespace {
            return Ok(());
        }

        if let Some(section) = Section::from_local_name(element.local_name().as_ref()) {
            if self.has_section(section) {
                return Ok(());
            }

            trace!("Found `{:?}` section at depth {}", section, depth);
            match section {
                Section::System => self.system = Some(BTreeMap::new()),
                Section::EventData => self.event_data = Some(BTreeMap::new()),
            }

            if !self_closing {
                self.section = Some((section, depth));
            }
        }

        Ok(())
    }

    /// Handles a closing tag, `depth` being the depth of the element that closed.
    fn close(&mut self, depth: usize) {
        if self.field.as_ref().is_some_and(|f| f.depth == depth) {
            if let Some(field) = self.field.take() {
                self.finish_field(field);
            }
            return;
        }

        if self.section.is_some_and(|(_, d)| d == depth) {
            self.section = None;
        }
    }

    /// Text directly inside an element at `depth`.
    fn text(&mut self, text: &str, depth: usize) {
        if let Some(field) = self.field.as_mut() {
            if field.collecting && field.depth == depth {
                field.text.get_or_insert_with(String::new).push_str(text);
            }
        }
    }

    fn field_from_element(
        section: Section,
        element: &BytesStart,
        depth: usize,
        self_closing: bool,
        position: u64,
    ) -> Result<OpenField> {
        let attributes = attributes(element, position)?;
        let name = match section {
            Section::System => lossy(element.local_name().as_ref()),
            Section::EventData => match attributes.get("Name") {
                Some(name) => name.clone(),
                None => {
                    return Err(MalformedInputError::MissingDataName {
                        element: lossy(element.name().as_ref()),
                    }
                    .into());
                }
            },
        };

        Ok(OpenField {
            name,
            attributes,
            // `<a></a>` has empty text, `<a/>` has none.
            text: if self_closing {
                None
            } else {
                Some(String::new())
            },
            collecting: true,
            depth,
        })
    }

    fn finish_field(&mut self, field: OpenField) {
        let value = sanitize(field.text);

        match self.section.map(|(s, _)| s) {
            Some(Section::System) => {
                if let Some(system) = self.system.as_mut() {
                    system.insert(
                        field.name,
                        SystemField {
                            value,
                            attributes: field.attributes,
                        },
                    );
                }
            }
            Some(Section::EventData) => {
                if let Some(event_data) = self.event_data.as_mut() {
                    event_data.insert(field.name, value);
                }
            }
            None => {}
        }
    }

    fn finish(self) -> Result<StructuredEvent> {
        let system = self.system.ok_or(MalformedInputError::MissingSection {
            section: "System",
        })?;
        let event_data = self.event_data.ok_or(MalformedInputError::MissingSection {
            section: "EventData",
        })?;

        Ok(StructuredEvent { system, event_data })
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// The attributes of `element`, without namespace declarations.
fn attributes(element: &BytesStart, position: u64) -> Result<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();

    for attr in element.attributes() {
        let attr = attr.map_err(|e| xml_error(position, e.into()))?;
        let key = attr.key.as_ref();
        if key == b"xmlns" || key.starts_with(b"xmlns:") {
            continue;
        }

        let value = attr
            .unescape_value()
            .map_err(|e| xml_error(position, e.into()))?
            .into_owned();
        map.insert(lossy(key), value);
    }

    Ok(map)
}

fn xml_error(position: u64, err: quick_xml::Error) -> EvtxGraphError {
    MalformedInputError::Xml {
        position,
        message: err.to_string(),
    }
    .into()
}

fn unbound_prefix(position: u64, prefix: &[u8]) -> EvtxGraphError {
    MalformedInputError::Xml {
        position,
        message: format!("namespace prefix `{}` is not bound", lossy(prefix)),
    }
    .into()
}

/// Prefixed attribute names must resolve too, `xml:` and `xmlns:` are always bound.
fn check_attribute_prefixes(
    reader: &NsReader<&[u8]>,
    element: &BytesStart,
    position: u64,
) -> Result<()> {
    for attr in element.attributes().flatten() {
        match attr.key.prefix() {
            Some(prefix) if !matches!(prefix.as_ref(), b"xml" | b"xmlns") => {}
            _ => continue,
        }

        if let (ResolveResult::Unknown(prefix), _) = reader.resolve_attribute(attr.key) {
            return Err(unbound_prefix(position, &prefix));
        }
    }
    Ok(())
}

fn is_event_namespace(ns: &ResolveResult) -> bool {
    matches!(ns, ResolveResult::Bound(Namespace(n)) if *n == EVENT_NAMESPACE.as_bytes())
}

/// Parses one event payload into a [`StructuredEvent`].
pub fn normalize(xml: &str) -> Result<StructuredEvent> {
    let mut reader = NsReader::from_str(xml);
    let mut builder = EventBuilder::default();
    let mut open: Vec<String> = Vec::new();
    let mut seen_root = false;

    loop {
        let position = reader.buffer_position() as u64;
        let (in_event_namespace, event) = match reader.read_resolved_event() {
            Ok((ResolveResult::Unknown(prefix), _)) => {
                return Err(unbound_prefix(position, &prefix));
            }
            Ok((ns, event)) => (is_event_namespace(&ns), event),
            Err(e) => return Err(xml_error(position, e)),
        };

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                if open.is_empty() && seen_root {
                    return Err(MalformedInputError::TrailingContent { position }.into());
                }
                seen_root = true;
                check_attribute_prefixes(&reader, e, position)?;

                let self_closing = matches!(event, Event::Empty(_));
                builder.open(e, in_event_namespace, open.len(), self_closing, position)?;

                if !self_closing {
                    open.push(lossy(e.name().as_ref()));
                }
            }
            Event::End(_) => {
                open.pop();
                builder.close(open.len());
            }
            Event::Text(ref t) => {
                let text = t.unescape().map_err(|e| xml_error(position, e.into()))?;
                if open.is_empty() {
                    if !text.trim().is_empty() {
                        return Err(if seen_root {
                            MalformedInputError::TrailingContent { position }.into()
                        } else {
                            MalformedInputError::Xml {
                                position,
                                message: "text before the root element".to_string(),
                            }
                            .into()
                        });
                    }
                    continue;
                }
                builder.text(&text, open.len() - 1);
            }
            Event::CData(t) => {
                if open.is_empty() {
                    return Err(MalformedInputError::Xml {
                        position,
                        message: "CDATA outside of the root element".to_string(),
                    }
                    .into());
                }
                let bytes = t.into_inner();
                builder.text(&String::from_utf8_lossy(&bytes), open.len() - 1);
            }
            Event::Eof => break,
            Event::Comment(_) | Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
        }
    }

    if let Some(element) = open.pop() {
        return Err(MalformedInputError::UnclosedElement { element }.into());
    }

    if !seen_root {
        return Err(MalformedInputError::EmptyDocument.into());
    }

    builder.finish()
}

/// Normalizes the payload of a search hit.
pub fn normalize_record(record: &RawRecord) -> Result<StructuredEvent> {
    match record.payload() {
        Some(xml) => normalize(xml),
        None => Err(MalformedInputError::MissingPayload {
            id: record.display_id().to_string(),
            field: PAYLOAD_FIELD.to_string(),
        }
        .into()),
    }
}
