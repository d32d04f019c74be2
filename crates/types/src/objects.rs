use std::collections::btree_map;
use std::collections::BTreeMap;

use bytes::Bytes;

/// One ingestion event: a set of artifacts keyed by their path.
///
/// Paths are namespaced by a leading category (`submissions/...`, `blocks/...`).
/// Iteration is always in path order, so processing a batch is deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectsToSave(BTreeMap<String, Bytes>);

impl ObjectsToSave {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, data: impl Into<Bytes>) {
        self.0.insert(path.into(), data.into());
    }

    pub fn get(&self, path: &str) -> Option<&Bytes> {
        self.0.get(path)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Bytes> {
        self.0.iter()
    }

    /// Entries whose path starts with the given prefix, in path order.
    pub fn with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Bytes)> + 'a {
        self.0.iter().filter(move |(path, _)| path.starts_with(prefix))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of payload bytes in the batch
    pub fn total_bytes(&self) -> usize {
        self.0.values().map(|b| b.len()).sum()
    }
}

impl FromIterator<(String, Bytes)> for ObjectsToSave {
    fn from_iter<I: IntoIterator<Item = (String, Bytes)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ObjectsToSave {
    type Item = (&'a String, &'a Bytes);
    type IntoIter = btree_map::Iter<'a, String, Bytes>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
