//! Backtracking through the DP tables to produce concrete realisations.
//!
//! Both modes walk the guest tree from the root down. Every internal vertex
//! picks a placement below its parent's, then an event type, which fixes
//! where its two children start. Stochastic mode samples each choice in
//! proportion to its weight; MAP mode greedily takes the heaviest one.

use log::trace;
use rand::Rng;

use crate::discretiser::EpochPt;
use crate::error::{DltError, DltResult};
use crate::model::{DltrsModel, ModelContext};
use crate::realisation::{PlacedVertex, Realisation, TransferLineage, VertexType};
use crate::tree::RootedTree;
use crate::utils::{argmax, choose_index};

trait Chooser {
    fn pick(&mut self, weights: &[f64]) -> usize;

    /// Duplication against the summed (or best) transfer alternative.
    fn prefer_duplication(&mut self, dup: f64, trans_sum: f64, trans_max: f64) -> bool;
}

struct Stochastic<'a, R: Rng>(&'a mut R);

impl<R: Rng> Chooser for Stochastic<'_, R> {
    fn pick(&mut self, weights: &[f64]) -> usize {
        choose_index(weights, &mut *self.0)
    }

    fn prefer_duplication(&mut self, dup: f64, trans_sum: f64, _trans_max: f64) -> bool {
        let total = dup + trans_sum;
        if !(total > 0.0) {
            return true;
        }
        self.0.r#gen::<f64>() * total < dup
    }
}

struct Greedy;

impl Chooser for Greedy {
    fn pick(&mut self, weights: &[f64]) -> usize {
        argmax(weights)
    }

    fn prefer_duplication(&mut self, dup: f64, _trans_sum: f64, trans_max: f64) -> bool {
        !(trans_max > 0.0) || dup > trans_max
    }
}

/// Draws realisations in proportion to their probability under the
/// current tables.
#[derive(Debug, Clone)]
pub struct RealisationSampler<R: Rng> {
    rng: R,
}

impl<R: Rng> RealisationSampler<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    pub fn sample(&mut self, ctx: &ModelContext, model: &DltrsModel) -> DltResult<Realisation> {
        realise(ctx, model, &mut Stochastic(&mut self.rng))
    }
}

/// Greedy maximum-weight realisation. Deterministic for fixed tables.
pub fn max_probability_realisation(
    ctx: &ModelContext,
    model: &DltrsModel,
) -> DltResult<Realisation> {
    realise(ctx, model, &mut Greedy)
}

/// Which child leaves the donor arc in a transfer.
#[derive(Clone, Copy)]
enum Moved {
    Left,
    Right,
}

fn realise<C: Chooser>(
    ctx: &ModelContext,
    model: &DltrsModel,
    chooser: &mut C,
) -> DltResult<Realisation> {
    let tree = ctx.guest.tree();
    let disc = ctx.disc;
    let n = tree.n_vertices();
    let mut starts = vec![(disc.pt_at_top(), 0usize); n];
    let mut placed: Vec<Option<PlacedVertex>> = vec![None; n];

    for u in tree.pre_order() {
        let (s, e) = starts[u];
        let s_time = disc.time(s);

        let Some((lc, rc)) = tree.children(u) else {
            let arc = ctx.helper.leaf_arc(u);
            let leaf_epoch = disc.epoch(0);
            placed[u] = Some(PlacedVertex {
                kind: VertexType::Leaf,
                pt: EpochPt::LEAF,
                arc,
                n_arcs: leaf_epoch.n_arcs(),
                host_vertex: leaf_epoch.arc(arc),
                abs_time: 0.0,
                arc_time: s_time,
                transfer: None,
            });
            continue;
        };

        let (t, f) = choose_placement(ctx, model, chooser, u, s, e)?;
        let t_time = disc.time(t);
        let epoch = disc.epoch(t.epoch);
        let mut kind = VertexType::Speciation;
        let mut transfer = None;

        if t.index == 0 {
            let (sb, g) = match (disc.pt_below(t), disc.split_index(t.epoch)) {
                (Some(sb), Some(g)) => (sb, g),
                _ => return Err(DltError::NoValidPlacement(u)),
            };
            let l = model.below(lc);
            let r = model.below(rc);
            let orders = [
                l.get(sb, g) * r.get(sb, g + 1),
                l.get(sb, g + 1) * r.get(sb, g),
            ];
            let (gl, gr) = if chooser.pick(&orders) == 0 {
                (g, g + 1)
            } else {
                (g + 1, g)
            };
            starts[lc] = (sb, gl);
            starts[rc] = (sb, gr);
        } else {
            let lins_l = model.below(lc).row(t).to_vec();
            let lins_r = model.below(rc).row(t).to_vec();
            let w = lins_l.len();
            let (dup, _) = ctx.event_terms(&lins_l, &lins_r, t, f);
            let trans: Vec<f64> = (0..w)
                .map(|x| ctx.event_terms(&lins_l, &lins_r, t, x).1)
                .collect();
            let trans_sum: f64 = trans.iter().sum();
            let trans_max = trans.iter().copied().fold(0.0, f64::max);

            let mut moved = None;
            if !chooser.prefer_duplication(dup, trans_sum, trans_max) {
                let dt = disc.timestep(t.epoch);
                let tau = ctx.probs.transfer_factor(w);
                let mut moves = Vec::with_capacity(2 * w);
                let mut weights = Vec::with_capacity(2 * w);
                for h in (0..w).filter(|&h| h != f) {
                    moves.push((Moved::Right, h));
                    weights.push(dt * tau * lins_l[f] * lins_r[h]);
                    moves.push((Moved::Left, h));
                    weights.push(dt * tau * lins_r[f] * lins_l[h]);
                }
                if weights.iter().sum::<f64>() > 0.0 {
                    moved = Some(moves[chooser.pick(&weights)]);
                }
            }

            match moved {
                None => {
                    kind = VertexType::Duplication;
                    starts[lc] = (t, f);
                    starts[rc] = (t, f);
                }
                Some((side, h)) => {
                    kind = VertexType::Transfer;
                    transfer = Some(TransferLineage {
                        from: f,
                        to: h,
                        special: false,
                    });
                    let (stay, go) = match side {
                        Moved::Right => (lc, rc),
                        Moved::Left => (rc, lc),
                    };
                    starts[stay] = (t, f);
                    starts[go] = (t, h);
                }
            }
        }

        let host_vertex = epoch.arc(f);
        if kind == VertexType::Duplication
            && let Some(tr) = tree
                .parent(u)
                .and_then(|p| placed[p].as_ref())
                .and_then(|pv| escaped_duplication(pv, ctx.host.tree(), host_vertex, f))
        {
            kind = VertexType::Transfer;
            transfer = Some(tr);
        }

        trace!("guest vertex {u}: {kind} at {t} arc {f}");
        placed[u] = Some(PlacedVertex {
            kind,
            pt: t,
            arc: f,
            n_arcs: epoch.n_arcs(),
            host_vertex,
            abs_time: t_time,
            arc_time: s_time - t_time,
            transfer,
        });
    }

    let vertices = placed
        .into_iter()
        .enumerate()
        .map(|(u, v)| v.ok_or(DltError::NoValidPlacement(u)))
        .collect::<DltResult<Vec<_>>>()?;
    Ok(Realisation::new(tree.clone(), vertices))
}

/// A duplication whose parent is a duplication on an arc that is not above
/// it must have reached its arc through a transfer the tables do not record.
fn escaped_duplication(
    parent: &PlacedVertex,
    host: &RootedTree,
    host_vertex: usize,
    arc: usize,
) -> Option<TransferLineage> {
    let escaped = !host.is_ancestor_or_self(parent.host_vertex, host_vertex);
    (parent.kind == VertexType::Duplication && escaped).then_some(TransferLineage {
        from: parent.arc,
        to: arc,
        special: true,
    })
}

/// Picks the point and arc of `u` given that its lineage starts at arc `e`
/// of `s`.
fn choose_placement<C: Chooser>(
    ctx: &ModelContext,
    model: &DltrsModel,
    chooser: &mut C,
    u: usize,
    s: EpochPt,
    e: usize,
) -> DltResult<(EpochPt, usize)> {
    let disc = ctx.disc;
    let at_u = model.at(u);
    let qef = ctx.probs.one_to_one();
    let length = ctx.guest.length(u);
    let s_time = disc.time(s);

    let mut candidates = Vec::new();
    let mut weights = Vec::new();
    let mut t = ctx.helper.lo(u);
    if t.epoch < disc.n_epochs() && disc.is_last(t) {
        t = EpochPt::new(t.epoch + 1, 0);
    }
    while t.epoch < disc.n_epochs() && t < s {
        let dens = ctx.rate_pdf.pdf_for(length, s_time - disc.time(t));
        let block = qef.block(t, s);
        for (f, a) in at_u.row(t).iter().enumerate() {
            if *a > 0.0 {
                candidates.push((t, f));
                weights.push(a * block[(f, e)] * dens);
            }
        }
        t = disc.pt_above_not_last(t);
    }

    if candidates.is_empty() {
        return Err(DltError::NoValidPlacement(u));
    }
    Ok(candidates[chooser.pick(&weights)])
}
