//! Inspection report and the readers that contribute to it.

use std::path::Path;

use disktree_common::DisktreeResult;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

use crate::filesystem::read_fstab;

/// Ordered collection of named elements, serialized as one JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    elements: Vec<(String, Value)>,
}

impl Report {
    /// Create an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an element, replacing an earlier one of the same name in place.
    pub fn add(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(slot) = self.elements.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.elements.push((name, value));
        }
    }

    /// Look up an element.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.elements
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Element names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().map(|(n, _)| n.as_str())
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether the report is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Run a reader over a tree and add what it found.
    ///
    /// # Errors
    ///
    /// Returns the reader's error.
    pub fn explore(
        &mut self,
        reader: &dyn TreeReader,
        tree: &Path,
        is_ostree: bool,
    ) -> DisktreeResult<()> {
        if let Some((name, value)) = reader.explore(tree, is_ostree)? {
            tracing::debug!(element = %name, "Reader contributed element");
            self.add(name, value);
        }
        Ok(())
    }
}

impl Serialize for Report {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.elements.len()))?;
        for (name, value) in &self.elements {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Reads facts from a mounted, read-only tree.
pub trait TreeReader {
    /// Inspect `tree` and return a named element, or `None` if there is
    /// nothing to report.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree holds data that cannot be read.
    fn explore(&self, tree: &Path, is_ostree: bool) -> DisktreeResult<Option<(String, Value)>>;
}

/// Reports the parsed filesystem table of a tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct FstabReader;

impl TreeReader for FstabReader {
    fn explore(&self, tree: &Path, _is_ostree: bool) -> DisktreeResult<Option<(String, Value)>> {
        let Some(entries) = read_fstab(tree)? else {
            return Ok(None);
        };
        Ok(Some(("fstab".to_string(), serde_json::to_value(entries)?)))
    }
}

/// The readers shipped with the engine.
#[must_use]
pub fn default_readers() -> Vec<Box<dyn TreeReader>> {
    vec![Box::new(FstabReader)]
}
