use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::error::{LinkError, Result};

/// Most functions a device table can address with a one-byte offset.
pub const MAX_FUNCTIONS: usize = 256;

/// Offset of the device's name-table function.
pub const MAPPING_OFFSET: u8 = 0;

/// Well-known device function returning the property table.
pub const GET_PROPERTIES: &str = "a2jGetProperties";

/// Well-known device function carrying chunked transfers.
pub const CHUNK_DISPATCH: &str = "a2jMany";

/// Immutable snapshot of a function table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionTable {
    offsets: HashMap<String, u8>,
}

impl FunctionTable {
    /// Parse a name-table reply: NUL-terminated names, the Nth name at offset N.
    ///
    /// A trailing name without terminator is accepted. Empty names keep their
    /// offset slot but are not addressable; names beyond offset 255 are ignored.
    pub fn parse(payload: &[u8]) -> Self {
        let body = payload.strip_suffix(&[0]).unwrap_or(payload);
        let offsets = body
            .split(|&b| b == 0)
            .take(MAX_FUNCTIONS)
            .enumerate()
            .filter(|(_, name)| !name.is_empty())
            .map(|(offset, name)| (String::from_utf8_lossy(name).into_owned(), offset as u8))
            .collect();
        Self { offsets }
    }

    pub fn get(&self, name: &str) -> Option<u8> {
        self.offsets.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// `(name, offset)` pairs in offset order.
    pub fn entries(&self) -> Vec<(String, u8)> {
        let mut entries: Vec<_> = self
            .offsets
            .iter()
            .map(|(name, offset)| (name.clone(), *offset))
            .collect();
        entries.sort_by_key(|(name, offset)| (*offset, name.clone()));
        entries
    }
}

/// Maps symbolic device function names to their one-byte offsets.
///
/// Readers always see a complete table: fetches build a new table and swap
/// it in as a whole.
#[derive(Debug)]
pub struct FunctionMap {
    table: ArcSwap<FunctionTable>,
    fixed: bool,
}

impl FunctionMap {
    /// An empty map that is filled from the device on connect.
    pub fn fetched() -> Self {
        Self {
            table: ArcSwap::from_pointee(FunctionTable::default()),
            fixed: false,
        }
    }

    /// A caller-supplied mapping, used verbatim for the link's lifetime.
    pub fn fixed(mapping: HashMap<String, u8>) -> Result<Self> {
        if mapping.len() > MAX_FUNCTIONS {
            return Err(LinkError::InvalidArgument(format!(
                "fixed function mapping has {} entries (max {MAX_FUNCTIONS})",
                mapping.len()
            )));
        }
        Ok(Self {
            table: ArcSwap::from_pointee(FunctionTable { offsets: mapping }),
            fixed: true,
        })
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    /// Parse a name-table reply into a table.
    pub fn parse_name_table(payload: &[u8]) -> FunctionTable {
        FunctionTable::parse(payload)
    }

    /// Replace the table. Ignored for a fixed map.
    pub fn install(&self, table: FunctionTable) {
        if !self.fixed {
            self.table.store(Arc::new(table));
        }
    }

    /// Offset of `name`, or −1 when unknown.
    pub fn lookup(&self, name: &str) -> i16 {
        self.get(name).map_or(-1, i16::from)
    }

    pub fn get(&self, name: &str) -> Option<u8> {
        self.table.load().get(name)
    }

    /// Offset of `name`, or [`LinkError::UnknownFunction`].
    pub fn resolve(&self, name: &str) -> Result<u8> {
        self.get(name)
            .ok_or_else(|| LinkError::UnknownFunction(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.table.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.load().is_empty()
    }

    /// Drop a fetched table. A fixed mapping survives.
    pub fn clear(&self) {
        if !self.fixed {
            self.table.store(Arc::new(FunctionTable::default()));
        }
    }

    /// `(name, offset)` pairs in offset order.
    pub fn names(&self) -> Vec<(String, u8)> {
        self.table.load().entries()
    }
}

impl Default for FunctionMap {
    fn default() -> Self {
        Self::fetched()
    }
}
