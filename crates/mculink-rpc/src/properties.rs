use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

/// Key/value strings reported by the device.
///
/// Replaced as a whole on every fetch, like [`crate::FunctionMap`].
#[derive(Debug, Default)]
pub struct PropertyMap {
    table: ArcSwap<BTreeMap<String, String>>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse alternating NUL-terminated keys and values.
    ///
    /// A key without a following value is dropped.
    pub fn parse_pairs(payload: &[u8]) -> BTreeMap<String, String> {
        let body = payload.strip_suffix(&[0]).unwrap_or(payload);
        let mut fields = body.split(|&b| b == 0);
        let mut pairs = BTreeMap::new();
        while let (Some(key), Some(value)) = (fields.next(), fields.next()) {
            pairs.insert(
                String::from_utf8_lossy(key).into_owned(),
                String::from_utf8_lossy(value).into_owned(),
            );
        }
        pairs
    }

    pub fn install(&self, pairs: BTreeMap<String, String>) {
        self.table.store(Arc::new(pairs));
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.table.load().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.table.load().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.table.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.load().is_empty()
    }

    pub fn clear(&self) {
        self.table.store(Arc::new(BTreeMap::new()));
    }

    /// Key-sorted snapshot.
    pub fn entries(&self) -> Vec<(String, String)> {
        self.table
            .load()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
