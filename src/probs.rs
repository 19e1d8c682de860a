use std::fmt;

use log::{debug, trace};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::discretiser::{EpochDiscretiser, EpochPt};
use crate::error::{DltError, DltResult};
use crate::maps::{PointMap, PointPairMap};
use crate::ode::{OdeSystem, OdeTolerance, integrate};
use crate::snapshot::Snapshot;

/// Duplication, loss and transfer rates per time unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DltRates {
    pub duplication: f64,
    pub loss: f64,
    pub transfer: f64,
}

impl DltRates {
    pub fn new(duplication: f64, loss: f64, transfer: f64) -> DltResult<Self> {
        let rates = Self {
            duplication,
            loss,
            transfer,
        };
        rates.validate()?;
        Ok(rates)
    }

    pub fn validate(&self) -> DltResult<()> {
        for (name, value) in [
            ("duplication", self.duplication),
            ("loss", self.loss),
            ("transfer", self.transfer),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(DltError::InvalidRate { name, value });
            }
        }
        Ok(())
    }

    pub fn sum(&self) -> f64 {
        self.duplication + self.loss + self.transfer
    }
}

/// Transfer rate towards one specific arc among `n_arcs` contemporaries.
pub fn transfer_factor(transfer: f64, n_arcs: usize, normalise: bool) -> f64 {
    if normalise && n_arcs > 1 {
        transfer / (n_arcs - 1) as f64
    } else {
        transfer
    }
}

fn clamp_prob(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// Coupled extinction and one-to-one system of one epoch with `w` arcs.
/// State layout: `y[e]` is Qe for arc `e`, `y[w + e * w + f]` is the
/// probability that a lineage in upper arc `e` has its sole survivor in
/// lower arc `f`.
struct EpochOde {
    w: usize,
    dup: f64,
    loss: f64,
    rate_sum: f64,
    tau: f64,
}

impl OdeSystem for EpochOde {
    fn dim(&self) -> usize {
        self.w + self.w * self.w
    }

    fn derivatives(&self, _t: f64, y: &[f64], dydt: &mut [f64]) {
        let w = self.w;
        let sum_qe: f64 = y[..w].iter().sum();
        let mut sum_qxf = vec![0.0; w];
        for e in 0..w {
            for f in 0..w {
                sum_qxf[f] += y[w + e * w + f];
            }
        }
        for e in 0..w {
            let qe = y[e];
            let sum_qg = sum_qe - qe;
            dydt[e] = self.dup * qe * qe + self.tau * qe * sum_qg + self.loss - self.rate_sum * qe;
            for f in 0..w {
                let ef = w + e * w + f;
                let qef = y[ef];
                dydt[ef] = 2.0 * self.dup * qe * qef
                    + self.tau * (qe * (sum_qxf[f] - qef) + qef * sum_qg)
                    - self.rate_sum * qef;
            }
        }
    }
}

/// Extinction probabilities (Qe) for every discretisation point and
/// one-to-one probabilities (Qef) for every ordered point pair.
#[derive(Debug, Clone)]
pub struct EpochDltProbs {
    rates: Snapshot<DltRates>,
    normalise_transfer: bool,
    tol: OdeTolerance,
    qe: Snapshot<PointMap>,
    qef: Snapshot<PointPairMap>,
}

impl EpochDltProbs {
    pub fn new(
        disc: &EpochDiscretiser,
        rates: DltRates,
        normalise_transfer: bool,
        tol: OdeTolerance,
    ) -> DltResult<Self> {
        rates.validate()?;
        let mut probs = Self {
            rates: Snapshot::new(rates),
            normalise_transfer,
            tol,
            qe: Snapshot::new(PointMap::new(disc)),
            qef: Snapshot::new(PointPairMap::new(disc)),
        };
        probs.update(disc);
        Ok(probs)
    }

    pub fn rates(&self) -> DltRates {
        *self.rates
    }

    /// Changes the rates. Takes effect at the next `update`.
    pub fn set_rates(&mut self, rates: DltRates) -> DltResult<()> {
        rates.validate()?;
        self.rates.replace(rates);
        Ok(())
    }

    pub fn normalise_transfer(&self) -> bool {
        self.normalise_transfer
    }

    pub fn tolerance(&self) -> OdeTolerance {
        self.tol
    }

    /// Transfer factor for an epoch with `n_arcs` arcs.
    pub fn transfer_factor(&self, n_arcs: usize) -> f64 {
        transfer_factor(self.rates.transfer, n_arcs, self.normalise_transfer)
    }

    pub fn extinction(&self) -> &PointMap {
        &self.qe
    }

    pub fn one_to_one(&self) -> &PointPairMap {
        &self.qef
    }

    pub fn qe(&self, pt: EpochPt, arc: usize) -> f64 {
        self.qe.get(pt, arc)
    }

    /// Probability that a lineage at (`upper`, `upper_arc`) has exactly one
    /// surviving descendant, found at (`lower`, `lower_arc`).
    pub fn qef(&self, lower: EpochPt, lower_arc: usize, upper: EpochPt, upper_arc: usize) -> f64 {
        self.qef.get(lower, lower_arc, upper, upper_arc)
    }

    pub fn cache(&mut self) {
        self.rates.cache();
        self.qe.cache();
        self.qef.cache();
    }

    pub fn restore_cache(&mut self) {
        self.rates.restore();
        self.qe.restore();
        self.qef.restore();
    }

    pub fn clear_cache(&mut self) {
        self.rates.clear_cache();
        self.qe.clear_cache();
        self.qef.clear_cache();
    }

    /// Recomputes both maps from scratch for the given discretisation.
    pub fn update(&mut self, disc: &EpochDiscretiser) {
        let mut qe = PointMap::new(disc);
        let mut qef = PointPairMap::new(disc);
        self.within_epochs(disc, &mut qe, &mut qef);
        between_epochs(disc, &qe, &mut qef);
        self.qe.replace(qe);
        self.qef.replace(qef);
        debug!(
            "DLT probabilities updated: dup={}, loss={}, trans={}",
            self.rates.duplication, self.rates.loss, self.rates.transfer
        );
    }

    fn within_epochs(&self, disc: &EpochDiscretiser, qe: &mut PointMap, qef: &mut PointPairMap) {
        let rates = *self.rates;
        let top = disc.n_epochs() - 1;
        let mut boundary = vec![0.0; disc.n_arcs(0)];

        for i in 0..top {
            let ep = disc.epoch(i);
            let w = ep.n_arcs();
            let last = ep.last_index();
            let system = EpochOde {
                w,
                dup: rates.duplication,
                loss: rates.loss,
                rate_sum: rates.sum(),
                tau: self.transfer_factor(w),
            };
            for wt in 0..=last {
                let lower = EpochPt::new(i, wt);
                let mut y0 = vec![0.0; system.dim()];
                if wt == 0 {
                    y0[..w].copy_from_slice(&boundary);
                } else {
                    for (e, v) in qe.row(lower).iter().enumerate() {
                        y0[e] = *v;
                    }
                }
                for e in 0..w {
                    y0[w + e * w + e] = 1.0;
                }
                let mut samples = integrate(&system, ep.time(wt), y0, &ep.times()[wt..], self.tol);
                for ws in wt..=last {
                    let Some((_, y)) = samples.next() else { break };
                    let upper = EpochPt::new(i, ws);
                    if wt == 0 {
                        for e in 0..w {
                            qe.set(upper, e, clamp_prob(y[e]));
                        }
                    }
                    let block = qef.block_mut(lower, upper);
                    for e in 0..w {
                        for f in 0..w {
                            block[(f, e)] = clamp_prob(y[w + e * w + f]);
                        }
                    }
                }
                trace!("epoch {i}, lower time {wt}: {} solver steps", samples.steps());
            }

            // Arcs split and split+1 join into one arc of the epoch above.
            let split = disc.split_index(i + 1).unwrap_or(0);
            let at_top = qe.row(EpochPt::new(i, last));
            boundary = (0..w)
                .filter(|&k| k != split + 1)
                .map(|k| {
                    if k == split {
                        at_top[k] * at_top[k + 1]
                    } else {
                        at_top[k]
                    }
                })
                .collect();
        }

        self.stem_epoch(disc, boundary[0], qe, qef);
    }

    /// Single-arc stem: plain birth-death, no transfers.
    fn stem_epoch(&self, disc: &EpochDiscretiser, d0: f64, qe: &mut PointMap, qef: &mut PointPairMap) {
        let top = disc.n_epochs() - 1;
        let ep = disc.epoch(top);
        let last = ep.last_index();
        let full = self.pt_ut(ep.timestep());
        let half = self.pt_ut(ep.timestep() / 2.0);
        for wt in 0..=last {
            let mut d = if wt == 0 {
                d0
            } else {
                qe.get(EpochPt::new(top, wt), 0)
            };
            let mut o2o = 1.0;
            for ws in wt..=last {
                let upper = EpochPt::new(top, ws);
                if wt == 0 {
                    qe.set(upper, 0, clamp_prob(d));
                }
                qef.set(EpochPt::new(top, wt), 0, upper, 0, clamp_prob(o2o));
                let (p, u) = if ws == 0 || ws + 1 == last { half } else { full };
                let denom = 1.0 - u * d;
                o2o *= p * (1.0 - u) / (denom * denom);
                d = 1.0 - p * (1.0 - d) / denom;
            }
        }
    }

    /// Birth-death survival `P(t)` and geometric parameter `u_t` over `t`.
    fn pt_ut(&self, t: f64) -> (f64, f64) {
        let dup = self.rates.duplication;
        let loss = self.rates.loss;
        if (dup - loss).abs() < 1e-9 {
            let denom = 1.0 + loss * t;
            (1.0 / denom, loss * t / denom)
        } else if loss < 1e-9 {
            (1.0, 1.0 - (-dup * t).exp())
        } else {
            let diff = loss - dup;
            let e = (diff * t).exp();
            let denom = dup - loss * e;
            (-diff / denom, dup * (1.0 - e) / denom)
        }
    }
}

/// Fills in point pairs that lie in different epochs. For upper epoch `i`
/// the lineage passes the boundary with epoch `z = i - 1`, where arc `g`
/// of epoch `i` covers arcs `g` and `g + 1` of `z`; one of those two must
/// die out.
fn between_epochs(disc: &EpochDiscretiser, qe: &PointMap, qef: &mut PointPairMap) {
    for i in 1..disc.n_epochs() {
        let z = i - 1;
        let z_top = EpochPt::new(z, disc.epoch(z).last_index());
        let Some(g) = disc.split_index(i) else {
            continue;
        };
        let d_left = qe.get(z_top, g);
        let d_right = qe.get(z_top, g + 1);
        let w_i = disc.n_arcs(i);
        let last_i = disc.epoch(i).last_index();
        let i_low = EpochPt::new(i, 0);

        for j in 0..i {
            for t in 0..disc.epoch(j).n_times() {
                let lower = EpochPt::new(j, t);
                let below = qef.block(lower, z_top);
                // Columns of epoch z folded onto the arcs of epoch i.
                let mut folded = Array2::<f64>::zeros((below.nrows(), w_i));
                for f in 0..below.nrows() {
                    for h in 0..w_i {
                        folded[(f, h)] = if h < g {
                            below[(f, h)]
                        } else if h == g {
                            below[(f, g)] * d_right + below[(f, g + 1)] * d_left
                        } else {
                            below[(f, h + 1)]
                        };
                    }
                }
                for s in 0..=last_i {
                    let upper = EpochPt::new(i, s);
                    let joined = folded.dot(qef.block(i_low, upper));
                    qef.block_mut(lower, upper).assign(&joined);
                }
            }
        }
    }
}

impl fmt::Display for EpochDltProbs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "EPOCH DLT PROBS")?;
        writeln!(f, "Duplication rate: {}", self.rates.duplication)?;
        writeln!(f, "Loss rate: {}", self.rates.loss)?;
        writeln!(f, "Transfer rate: {}", self.rates.transfer)?;
        writeln!(f, "Normalised transfer: {}", self.normalise_transfer)?;
        writeln!(f, "Relative ODE tolerance: {}", self.tol.rel)?;
        writeln!(f, "Absolute ODE tolerance: {}", self.tol.abs)
    }
}
