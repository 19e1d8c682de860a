use std::fmt;

use log::{debug, warn};
use ndarray::Array1;

use crate::discretiser::{EpochDiscretiser, EpochPt};
use crate::maps::PointMap;
use crate::probs::EpochDltProbs;
use crate::rates::RatePdf;
use crate::reconciliation::ReconciliationHelper;
use crate::snapshot::Snapshot;
use crate::tree::{GuestTree, HostTree};

/// Read-only inputs of the dynamic program.
#[derive(Clone, Copy)]
pub struct ModelContext<'a> {
    pub host: &'a HostTree,
    pub guest: &'a GuestTree,
    pub disc: &'a EpochDiscretiser,
    pub probs: &'a EpochDltProbs,
    pub helper: &'a ReconciliationHelper,
    pub rate_pdf: &'a RatePdf,
}

impl ModelContext<'_> {
    /// Probability of the planted subtree of `u` given that its lineage
    /// starts at `s`, for every arc of `s`'s epoch.
    pub fn lineage_probs(&self, at_u: &PointMap, u: usize, s: EpochPt) -> Array1<f64> {
        let w = self.disc.n_arcs(s.epoch);
        let s_time = self.disc.time(s);
        let length = self.guest.length(u);
        let qef = self.probs.one_to_one();
        let mut lins = Array1::zeros(w);

        if self.guest.tree().is_leaf(u) {
            let sigma = self.helper.leaf_arc(u);
            let dens = self.rate_pdf.pdf_for(length, s_time);
            let block = qef.block(EpochPt::LEAF, s);
            for e in 0..w {
                lins[e] = block[(sigma, e)] * dens;
            }
            return lins;
        }

        // The last time of an epoch is stored again as time 0 of the next.
        let mut t = self.helper.lo(u);
        if t.epoch >= self.disc.n_epochs() {
            return lins;
        }
        if self.disc.is_last(t) {
            t = EpochPt::new(t.epoch + 1, 0);
        }
        while t < s {
            let dens = self.rate_pdf.pdf_for(length, s_time - self.disc.time(t));
            let ats = at_u.row(t);
            let block = qef.block(t, s);
            for e in 0..w {
                for (f, a) in ats.iter().enumerate() {
                    lins[e] += block[(f, e)] * dens * a;
                }
            }
            t = self.disc.pt_above_not_last(t);
        }
        lins
    }

    /// Duplication and transfer terms of placing `u` at `s` on arc `e`.
    /// Returns `(duplication, transfer)` weights, both scaled by the
    /// slice width.
    pub fn event_terms(&self, lc: &[f64], rc: &[f64], s: EpochPt, e: usize) -> (f64, f64) {
        let dt = self.disc.timestep(s.epoch);
        let dup = dt * 2.0 * self.probs.rates().duplication * lc[e] * rc[e];
        if lc.len() < 2 {
            return (dup, 0.0);
        }
        let tau = self.probs.transfer_factor(lc.len());
        let lc_sum: f64 = lc.iter().sum();
        let rc_sum: f64 = rc.iter().sum();
        let trans = dt * tau * (lc[e] * (rc_sum - rc[e]) + rc[e] * (lc_sum - lc[e]));
        (dup, trans)
    }
}

/// "at" and "below" tables of one guest vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexTables {
    pub at: PointMap,
    pub below: PointMap,
}

impl VertexTables {
    fn new(disc: &EpochDiscretiser) -> Self {
        Self {
            at: PointMap::new(disc),
            below: PointMap::new(disc),
        }
    }
}

/// Dynamic program over the guest tree giving the probability of the guest
/// tree and its branch lengths.
#[derive(Debug, Clone)]
pub struct DltrsModel {
    tables: Vec<Snapshot<VertexTables>>,
    /// Guest root and the stem tip it hangs from.
    anchor: Snapshot<(usize, EpochPt)>,
}

impl DltrsModel {
    pub fn new(ctx: &ModelContext) -> Self {
        let n = ctx.guest.tree().n_vertices();
        let mut model = Self {
            tables: (0..n)
                .map(|_| Snapshot::new(VertexTables::new(ctx.disc)))
                .collect(),
            anchor: Snapshot::new((ctx.guest.tree().root(), ctx.disc.pt_at_top())),
        };
        model.full_update(ctx);
        model
    }

    pub fn at(&self, u: usize) -> &PointMap {
        &self.tables[u].at
    }

    pub fn below(&self, u: usize) -> &PointMap {
        &self.tables[u].below
    }

    pub fn tables(&self, u: usize) -> &VertexTables {
        &self.tables[u]
    }

    /// Probability of the guest tree with a lineage starting at the tip of
    /// the host stem.
    pub fn likelihood(&self) -> f64 {
        let (root, top) = *self.anchor;
        self.tables[root].below.get(top, 0)
    }

    /// Clears every table and recomputes all of them.
    pub fn full_update(&mut self, ctx: &ModelContext) {
        let n = ctx.guest.tree().n_vertices();
        if self.tables.len() != n {
            self.tables = (0..n)
                .map(|_| Snapshot::new(VertexTables::new(ctx.disc)))
                .collect();
        }
        for t in &mut self.tables {
            t.replace(VertexTables::new(ctx.disc));
        }
        self.anchor
            .replace((ctx.guest.tree().root(), ctx.disc.pt_at_top()));
        for u in ctx.guest.tree().post_order() {
            self.update_at(ctx, u);
        }
        self.update_top(ctx);
        debug!("full DP update: likelihood {:e}", self.likelihood());
    }

    /// Recomputes only the vertices whose branch lengths changed and their
    /// ancestors. Gives the same tables as `full_update`.
    pub fn partial_update(&mut self, ctx: &ModelContext, changed: &[usize]) {
        let affected = ctx.guest.tree().spanning_root_subtree(changed);
        for &u in &affected {
            self.update_at(ctx, u);
        }
        self.update_top(ctx);
        debug!(
            "partial DP update over {} vertices: likelihood {:e}",
            affected.len(),
            self.likelihood()
        );
    }

    /// Vertices whose tables a partial update for `changed` may write.
    pub fn touched_by_partial(guest: &GuestTree, changed: &[usize]) -> Vec<usize> {
        let tree = guest.tree();
        let mut touched = tree.spanning_root_subtree(changed);
        let parents = touched.clone();
        for u in parents {
            if let Some((l, r)) = tree.children(u) {
                touched.push(l);
                touched.push(r);
            }
        }
        touched.sort_unstable();
        touched.dedup();
        touched
    }

    pub fn cache_all(&mut self) {
        self.anchor.cache();
        for t in &mut self.tables {
            t.cache();
        }
    }

    pub fn cache_vertices(&mut self, vertices: &[usize]) {
        for &u in vertices {
            self.tables[u].cache();
        }
    }

    pub fn restore_cache(&mut self) {
        self.anchor.restore();
        for t in &mut self.tables {
            t.restore();
        }
    }

    pub fn clear_cache(&mut self) {
        self.anchor.clear_cache();
        for t in &mut self.tables {
            t.clear_cache();
        }
    }

    fn update_top(&mut self, ctx: &ModelContext) {
        let (root, top) = *self.anchor;
        self.update_below(ctx, root, top);
        let p = self.likelihood();
        if !p.is_finite() {
            warn!("non-finite guest tree likelihood {p}");
        }
    }

    fn update_at(&mut self, ctx: &ModelContext, u: usize) {
        let Some((lc, rc)) = ctx.guest.tree().children(u) else {
            return;
        };
        let up = ctx.helper.up(u);
        let mut s = ctx.helper.lo(u);
        while s <= up {
            if s.index == 0 {
                self.at_speciation(ctx, u, lc, rc, s);
            } else {
                self.at_dup_or_transfer(ctx, u, lc, rc, s);
            }
            s = ctx.disc.pt_above(s);
        }
    }

    /// The two children occupy the two arcs leaving the split, in either
    /// order. Every other arc gets 0.
    fn at_speciation(&mut self, ctx: &ModelContext, u: usize, lc: usize, rc: usize, s: EpochPt) {
        let Some(sb) = ctx.disc.pt_below(s) else {
            return;
        };
        let Some(g) = ctx.disc.split_index(s.epoch) else {
            return;
        };
        let l = &self.tables[lc].below;
        let r = &self.tables[rc].below;
        let mut row = Array1::zeros(ctx.disc.n_arcs(s.epoch));
        row[g] = l.get(sb, g) * r.get(sb, g + 1) + l.get(sb, g + 1) * r.get(sb, g);
        self.tables[u].at.set_row(s, &row);
    }

    fn at_dup_or_transfer(
        &mut self,
        ctx: &ModelContext,
        u: usize,
        lc: usize,
        rc: usize,
        s: EpochPt,
    ) {
        self.update_below(ctx, lc, s);
        self.update_below(ctx, rc, s);
        let lins_l = self.tables[lc].below.row(s).to_vec();
        let lins_r = self.tables[rc].below.row(s).to_vec();
        let row: Array1<f64> = (0..lins_l.len())
            .map(|e| {
                let (dup, trans) = ctx.event_terms(&lins_l, &lins_r, s, e);
                dup + trans
            })
            .collect();
        self.tables[u].at.set_row(s, &row);
    }

    fn update_below(&mut self, ctx: &ModelContext, u: usize, s: EpochPt) {
        let lins = ctx.lineage_probs(&self.tables[u].at, u, s);
        self.tables[u].below.set_row(s, &lins);
    }
}

impl fmt::Display for DltrsModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DLTRS MODEL")?;
        writeln!(f, "Number of guest vertices: {}", self.tables.len())?;
        writeln!(f, "Likelihood: {:e}", self.likelihood())
    }
}
