//! Shared table declarations
//!
//! A `MapSpec` fixes the key and value width of a kernel table. Seeded
//! entries are encoded through a `Layout` and checked against those widths,
//! so the loader only ever sees byte strings of the declared size.

pub mod catalog;

use crate::layout::Layout;
use crate::{KitError, Result};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MapKind {
    Hash,
    LruHash,
    Array,
    ProgramArray,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MapEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MapSpec {
    pub name: String,
    pub kind: MapKind,
    pub key_size: usize,
    pub value_size: usize,
    pub max_entries: u32,
    pub entries: Vec<MapEntry>,
}

impl MapSpec {
    pub fn new(name: &str, kind: MapKind, key_size: usize, value_size: usize, max_entries: u32) -> Self {
        Self {
            name: name.to_string(),
            kind,
            key_size,
            value_size,
            max_entries,
            entries: Vec::new(),
        }
    }

    /// Declare a table whose widths are those of `K` and `V`
    pub fn typed<K: Layout, V: Layout>(name: &str, kind: MapKind, max_entries: u32) -> Self {
        Self::new(name, kind, K::WIDTH, V::WIDTH, max_entries)
    }

    /// Program array indexed by `u32`, holding program fds
    pub fn program_array(name: &str, max_entries: u32) -> Self {
        Self::new(name, MapKind::ProgramArray, 4, 4, max_entries)
    }

    /// Encode and append a pre-seeded entry
    pub fn seed<K: Layout, V: Layout>(mut self, key: &K, value: &V) -> Result<Self> {
        self.push_raw(key.encode()?, value.encode()?)?;
        Ok(self)
    }

    /// Append an already encoded entry
    pub fn push_raw(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.check_width("key", self.key_size, key.len())?;
        self.check_width("value", self.value_size, value.len())?;
        if self.kind == MapKind::ProgramArray {
            return Err(KitError::ConfigError(format!(
                "program array {} is filled from dispatch routes, not seeded",
                self.name
            )));
        }
        if self.entries.len() as u32 >= self.max_entries {
            return Err(KitError::ConfigError(format!(
                "map {} holds at most {} entries",
                self.name, self.max_entries
            )));
        }
        self.entries.push(MapEntry { key, value });
        Ok(())
    }

    fn check_width(&self, field: &'static str, expected: usize, actual: usize) -> Result<()> {
        if expected != actual {
            return Err(KitError::LayoutMismatch {
                map: self.name.clone(),
                field,
                expected,
                actual,
            });
        }
        Ok(())
    }

    pub fn is_seeded(&self) -> bool {
        !self.entries.is_empty()
    }
}

/// Ordered set of table declarations with unique names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MapCatalog {
    maps: Vec<MapSpec>,
}

impl MapCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table; a second declaration of the same name is an error
    pub fn declare(&mut self, map: MapSpec) -> Result<()> {
        if self.get(&map.name).is_some() {
            return Err(KitError::DuplicateMap(map.name));
        }
        self.maps.push(map);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&MapSpec> {
        self.maps.iter().find(|m| m.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MapSpec> {
        self.maps.iter()
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Re-check every seeded entry against its declared widths
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for map in &self.maps {
            if !names.insert(map.name.as_str()) {
                return Err(KitError::DuplicateMap(map.name.clone()));
            }
            for entry in &map.entries {
                map.check_width("key", map.key_size, entry.key.len())?;
                map.check_width("value", map.value_size, entry.value.len())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{DnsName, Ipv4Value};
    use std::net::Ipv4Addr;

    #[test]
    fn test_duplicate_map_rejected() {
        let mut catalog = MapCatalog::new();
        catalog
            .declare(MapSpec::new("read_cache", MapKind::LruHash, 8, 32, 1024))
            .unwrap();
        let err = catalog
            .declare(MapSpec::new("read_cache", MapKind::Hash, 8, 32, 1024))
            .unwrap_err();
        assert!(matches!(err, KitError::DuplicateMap(name) if name == "read_cache"));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_seed_checks_widths() {
        let map = MapSpec::typed::<DnsName, Ipv4Value>("dns_table", MapKind::Hash, 8)
            .seed(&DnsName::new("google.fr"), &Ipv4Value(Ipv4Addr::LOCALHOST))
            .unwrap();
        assert_eq!(map.entries.len(), 1);

        // u32 values do not fit a table declared with u8 values
        let err = MapSpec::typed::<u32, u8>("http_resp_pattern", MapKind::Hash, 8)
            .seed(&1u32, &1u32)
            .unwrap_err();
        assert!(matches!(
            err,
            KitError::LayoutMismatch {
                field: "value",
                expected: 1,
                actual: 4,
                ..
            }
        ));
    }

    #[test]
    fn test_raw_entry_must_match_key_width() {
        let mut map = MapSpec::new("piped_progs", MapKind::Hash, 4, 512, 8);
        let err = map.push_raw(vec![0; 3], vec![0; 512]).unwrap_err();
        assert!(matches!(
            err,
            KitError::LayoutMismatch {
                field: "key",
                expected: 4,
                actual: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_program_array_not_seedable() {
        let mut map = MapSpec::program_array("xdp_progs", 16);
        assert!(map.push_raw(vec![0; 4], vec![0; 4]).is_err());
    }

    #[test]
    fn test_seed_respects_capacity() {
        let mut map = MapSpec::typed::<u32, u32>("dns_name_gen", MapKind::Array, 1);
        map.push_raw(vec![0; 4], vec![0; 4]).unwrap();
        assert!(map.push_raw(vec![0; 4], vec![0; 4]).is_err());
    }
}
