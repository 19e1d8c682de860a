use std::fmt;

use log::warn;

use crate::discretiser::{EpochDiscretiser, EpochPt};
use crate::error::{DltError, DltResult};
use crate::snapshot::Snapshot;
use crate::tree::RootedTree;

#[derive(Debug, Clone, PartialEq)]
struct Limits {
    leaf_arcs: Vec<usize>,
    lo: Vec<EpochPt>,
    up: Vec<EpochPt>,
}

/// Placement bounds of every guest vertex on the discretised host tree,
/// plus the leaf-epoch arc index each guest leaf is pinned to.
#[derive(Debug, Clone)]
pub struct ReconciliationHelper {
    limits: Snapshot<Limits>,
}

impl ReconciliationHelper {
    /// `sigma[u]` is the host leaf that guest leaf `u` maps to.
    pub fn new(
        guest: &RootedTree,
        disc: &EpochDiscretiser,
        sigma: &[Option<usize>],
    ) -> DltResult<Self> {
        Ok(Self {
            limits: Snapshot::new(compute_limits(guest, disc, sigma)?),
        })
    }

    pub fn update(
        &mut self,
        guest: &RootedTree,
        disc: &EpochDiscretiser,
        sigma: &[Option<usize>],
    ) -> DltResult<()> {
        self.limits.replace(compute_limits(guest, disc, sigma)?);
        Ok(())
    }

    /// Lowest point at which `u` may be placed.
    pub fn lo(&self, u: usize) -> EpochPt {
        self.limits.lo[u]
    }

    /// Highest point at which `u` may be placed.
    pub fn up(&self, u: usize) -> EpochPt {
        self.limits.up[u]
    }

    /// Arc index in the leaf epoch of guest leaf `u`.
    pub fn leaf_arc(&self, u: usize) -> usize {
        self.limits.leaf_arcs[u]
    }

    pub fn cache(&mut self) {
        self.limits.cache();
    }

    pub fn restore_cache(&mut self) {
        self.limits.restore();
    }

    pub fn clear_cache(&mut self) {
        self.limits.clear_cache();
    }
}

fn compute_limits(
    guest: &RootedTree,
    disc: &EpochDiscretiser,
    sigma: &[Option<usize>],
) -> DltResult<Limits> {
    let n = guest.n_vertices();
    let leaf_epoch = disc.epoch(0);
    let mut leaf_arcs = vec![0; n];
    for u in guest.leaves() {
        let label = || guest.name(u).unwrap_or("?").to_string();
        let x = sigma
            .get(u)
            .copied()
            .flatten()
            .ok_or_else(|| DltError::UnmappedGuestLeaf(label()))?;
        leaf_arcs[u] = leaf_epoch
            .arc_index(x)
            .ok_or_else(|| DltError::UnknownHostLeaf(label()))?;
    }

    // A guest tree deeper than the grid saturates at the tip, where no
    // vertex may be placed, so it gets zero likelihood.
    let top = disc.pt_at_top();
    let mut lo = vec![EpochPt::LEAF; n];
    for u in guest.post_order() {
        if let Some((l, r)) = guest.children(u) {
            let below = lo[l].max(lo[r]);
            lo[u] = disc.pt_above_strict(below).unwrap_or(top);
        }
    }
    if lo.iter().any(|&pt| pt == top) {
        warn!("guest tree is deeper than the discretised host tree");
    }

    let mut up = vec![EpochPt::LEAF; n];
    for u in guest.pre_order() {
        if guest.is_leaf(u) {
            continue;
        }
        up[u] = match guest.parent(u) {
            None => EpochPt::new(top.epoch, top.index - 1),
            Some(p) => disc.pt_below_strict(up[p]).unwrap_or(EpochPt::LEAF),
        };
    }

    Ok(Limits { leaf_arcs, lo, up })
}

impl fmt::Display for ReconciliationHelper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RECONCILIATION HELPER")?;
        writeln!(f, "Vertex\tLower limit\tUpper limit")?;
        for u in 0..self.limits.lo.len() {
            writeln!(f, "{u}\t{}\t{}", self.limits.lo[u], self.limits.up[u])?;
        }
        Ok(())
    }
}
