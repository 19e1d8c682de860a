//! Most parsimonious (LCA) reconciliation, used to seed starting rates.

use log::debug;

use crate::discretiser::EpochDiscretiser;
use crate::error::{DltError, DltResult};
use crate::probs::DltRates;
use crate::tree::{GuestTree, HostTree};

const RATE_FLOOR: f64 = 1e-3;

/// Host vertex every guest vertex maps to under the LCA mapping.
pub fn lca_map(guest: &GuestTree, host: &HostTree, sigma: &[Option<usize>]) -> DltResult<Vec<usize>> {
    let g = guest.tree();
    let mut map = vec![0; g.n_vertices()];
    for u in g.post_order() {
        map[u] = match g.children(u) {
            None => sigma
                .get(u)
                .copied()
                .flatten()
                .ok_or_else(|| DltError::UnmappedGuestLeaf(g.name(u).unwrap_or("?").to_string()))?,
            Some((l, r)) => host
                .tree()
                .lca(map[l], map[r])
                .ok_or(DltError::NoCommonAncestor(map[l], map[r]))?,
        };
    }
    Ok(map)
}

/// Guest vertices mapped to the same host vertex as one of their children.
pub fn count_duplications(guest: &GuestTree, map: &[usize]) -> usize {
    let g = guest.tree();
    (0..g.n_vertices())
        .filter(|&u| match g.children(u) {
            Some((l, r)) => map[u] == map[l] || map[u] == map[r],
            None => false,
        })
        .count()
}

/// Starting rates from the parsimony duplication count spread over the
/// total host arc time.
pub fn seed_rates(disc: &EpochDiscretiser, n_duplications: usize) -> DltResult<DltRates> {
    let per_time = n_duplications as f64 / disc.total_arc_time();
    let rates = DltRates::new(
        0.5 * per_time + RATE_FLOOR,
        per_time + RATE_FLOOR,
        0.5 * per_time + RATE_FLOOR,
    )?;
    debug!("seeded rates from {n_duplications} parsimony duplications: {rates:?}");
    Ok(rates)
}
