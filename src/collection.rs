use crate::err::{EvtxGraphError, Result};

use log::debug;
use serde::Deserialize;

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Logical identifier of a set of indexed documents (a sketch, a case, a timeline group).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollectionRef(String);

impl CollectionRef {
    pub fn new(name: impl Into<String>) -> Self {
        CollectionRef(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CollectionRef {
    fn from(name: &str) -> Self {
        CollectionRef::new(name)
    }
}

impl From<u64> for CollectionRef {
    fn from(id: u64) -> Self {
        CollectionRef::new(id.to_string())
    }
}

/// Maps a logical collection to the physical index names backing it.
pub trait CollectionResolver {
    /// Returns the physical index names, or [`EvtxGraphError::CollectionNotFound`].
    fn resolve(&self, collection: &CollectionRef) -> Result<Vec<String>>;
}

impl<R: CollectionResolver + ?Sized> CollectionResolver for &R {
    fn resolve(&self, collection: &CollectionRef) -> Result<Vec<String>> {
        (**self).resolve(collection)
    }
}

/// A resolver over an explicit `collection -> [index, ...]` table.
///
/// On disk this is a JSON object, e.g. `{"1": ["timeline-a", "timeline-b"]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct CollectionMap {
    collections: BTreeMap<String, Vec<String>>,
}

impl CollectionMap {
    pub fn new() -> Self {
        CollectionMap::default()
    }

    pub fn with_collection<I, S>(mut self, name: impl Into<String>, indices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(name, indices);
        self
    }

    pub fn insert<I, S>(&mut self, name: impl Into<String>, indices: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections
            .insert(name.into(), indices.into_iter().map(Into::into).collect());
    }

    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let f = File::open(path.as_ref())?;
        let map = serde_json::from_reader(BufReader::new(f))?;
        Ok(map)
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

impl CollectionResolver for CollectionMap {
    fn resolve(&self, collection: &CollectionRef) -> Result<Vec<String>> {
        match self.collections.get(collection.as_str()) {
            // A collection without any timelines has nothing to search.
            Some(indices) if !indices.is_empty() => {
                debug!("Collection `{}` resolved to {:?}", collection, indices);
                Ok(indices.clone())
            }
            _ => Err(EvtxGraphError::CollectionNotFound {
                collection: collection.to_string(),
            }),
        }
    }
}
