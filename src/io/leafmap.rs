use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use std::path::Path;

use super::read_text;
use crate::error::{DltError, DltResult};
use crate::tree::RootedTree;

/// Guest leaf name to host leaf name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeafMap {
    pairs: BTreeMap<String, String>,
}

impl LeafMap {
    pub fn from_pairs<I, G, H>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (G, H)>,
        G: Into<String>,
        H: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(g, h)| (g.into(), h.into()))
                .collect(),
        }
    }

    pub fn insert(&mut self, guest: &str, host: &str) {
        self.pairs.insert(guest.to_string(), host.to_string());
    }

    pub fn host_of(&self, guest: &str) -> Option<&str> {
        self.pairs.get(guest).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Two whitespace separated columns per line. Blank lines and `#`
    /// comments are skipped.
    pub fn parse(content: &str) -> Result<Self> {
        let mut map = LeafMap::default();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() != 2 {
                bail!(
                    "leaf map line {}: expected 2 columns, found {}",
                    lineno + 1,
                    cols.len()
                );
            }
            map.insert(cols[0], cols[1]);
        }
        Ok(map)
    }

    /// Host leaf vertex for every guest leaf; `None` for internal vertices.
    pub fn resolve(&self, guest: &RootedTree, host: &RootedTree) -> DltResult<Vec<Option<usize>>> {
        let host_leaves: BTreeMap<&str, usize> = host
            .leaves()
            .into_iter()
            .filter_map(|x| host.name(x).map(|n| (n, x)))
            .collect();
        let mut sigma = vec![None; guest.n_vertices()];
        for u in guest.leaves() {
            let name = guest.name(u).unwrap_or_default();
            let host_name = self
                .host_of(name)
                .ok_or_else(|| DltError::UnmappedGuestLeaf(name.to_string()))?;
            let x = host_leaves
                .get(host_name)
                .ok_or_else(|| DltError::UnknownHostLeaf(host_name.to_string()))?;
            sigma[u] = Some(*x);
        }
        Ok(sigma)
    }
}

pub fn read_leaf_map(path: &Path) -> Result<LeafMap> {
    let content = read_text(path)?;
    LeafMap::parse(&content).with_context(|| format!("failed to parse {:?}", path))
}
