use std::collections::HashMap;

use tracing::debug;

use crate::error::{Result, TagStormError};
use crate::tree::{StanzaId, TagStorm};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    /// Several defining stanzas may share a value.
    Multi,
    /// Two stanzas resolving to the same value is an error.
    Unique,
}

/// Maps the effective value of one tag to the stanzas that resolve to it.
#[derive(Debug, Clone)]
pub struct StanzaIndex {
    tag: String,
    map: HashMap<String, Vec<StanzaId>>,
}

impl StanzaIndex {
    /// Index every stanza that resolves `tag`, own or inherited, in tree
    /// order. Under [`IndexMode::Unique`] any second stanza resolving to the
    /// same value is a collision, including a child that inherits it.
    pub fn build(storm: &TagStorm, tag: &str, mode: IndexMode) -> Result<StanzaIndex> {
        let mut map: HashMap<String, Vec<StanzaId>> = HashMap::new();
        for id in storm.walk() {
            let Some(val) = storm.find_val(id, tag) else {
                continue;
            };
            let ids = map.entry(val.to_string()).or_default();
            if mode == IndexMode::Unique && !ids.is_empty() {
                return Err(TagStormError::NotUnique {
                    tag: tag.to_string(),
                    value: val.to_string(),
                    file: storm.file_name().to_string(),
                });
            }
            ids.push(id);
        }
        debug!(tag, values = map.len(), "built stanza index");
        Ok(StanzaIndex {
            tag: tag.to_string(),
            map,
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// First stanza in tree order with this value: the defining one.
    pub fn get(&self, val: &str) -> Option<StanzaId> {
        self.map.get(val).and_then(|ids| ids.first().copied())
    }

    pub fn get_all(&self, val: &str) -> &[StanzaId] {
        self.map.get(val).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }
}

impl TagStorm {
    pub fn index(&self, tag: &str) -> Result<StanzaIndex> {
        StanzaIndex::build(self, tag, IndexMode::Multi)
    }

    pub fn unique_index(&self, tag: &str) -> Result<StanzaIndex> {
        StanzaIndex::build(self, tag, IndexMode::Unique)
    }
}
