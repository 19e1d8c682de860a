use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{DltError, DltResult};
use crate::tree::HostTree;

/// Smallest timespan an epoch may have. Coinciding divergence times are
/// pulled apart by this amount.
pub const MIN_SPLICE_DELTA: f64 = 0.0001;

/// Bounds on the number of slices per epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiscretisationConfig {
    pub n_min: usize,
    pub n_max: usize,
    /// Approximate slice width. Ignored when `n_min == n_max`.
    pub delta_t: f64,
    /// Fixed slice count for the stem epoch.
    pub n_stem: Option<usize>,
}

impl Default for DiscretisationConfig {
    fn default() -> Self {
        Self {
            n_min: 3,
            n_max: 10,
            delta_t: 0.05,
            n_stem: None,
        }
    }
}

impl DiscretisationConfig {
    pub fn fixed(n: usize) -> Self {
        Self {
            n_min: n,
            n_max: n,
            delta_t: 0.0,
            n_stem: None,
        }
    }

    pub fn validate(&self) -> DltResult<()> {
        if self.n_min < 2 || self.n_max < self.n_min {
            return Err(DltError::InvalidDiscretisationBounds {
                n_min: self.n_min,
                n_max: self.n_max,
            });
        }
        if self.n_min != self.n_max && !(self.delta_t > 0.0) {
            return Err(DltError::InvalidTimestep(self.delta_t));
        }
        if let Some(n) = self.n_stem
            && n == 0
        {
            return Err(DltError::InvalidStemSlices(n));
        }
        Ok(())
    }

    /// Number of slices for an epoch spanning `span` time units.
    pub fn slices_for(&self, span: f64) -> usize {
        if self.n_min == self.n_max {
            return self.n_min;
        }
        let approx = (span / self.delta_t - 1e-6).ceil();
        let approx = if approx.is_finite() && approx > 0.0 {
            approx as usize
        } else {
            0
        };
        approx.clamp(self.n_min, self.n_max)
    }

    /// Stem slice count used when none is given: `min(round(log2 k), k, 10)`
    /// for `k` guest leaves, or `None` when that comes out as 0.
    pub fn default_stem_slices(n_guest_leaves: usize) -> Option<usize> {
        let k = n_guest_leaves;
        if k == 0 {
            return None;
        }
        let h = (k as f64).log2().round() as usize;
        let n = h.min(k).min(10);
        (n > 0).then_some(n)
    }
}

/// Time interval of the host tree with a fixed set of contemporary arcs.
///
/// Holds `n + 2` times for `n` slices: the lower boundary, the `n` slice
/// midpoints and the upper boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct Epoch {
    arcs: Vec<usize>,
    times: Vec<f64>,
    timestep: f64,
}

impl Epoch {
    pub fn new(arcs: Vec<usize>, lower: f64, upper: f64, n_slices: usize) -> Self {
        let timestep = (upper - lower) / n_slices as f64;
        let mut times = Vec::with_capacity(n_slices + 2);
        times.push(lower);
        for m in 0..n_slices {
            times.push(lower + timestep / 2.0 + m as f64 * timestep);
        }
        times.push(upper);
        Self {
            arcs,
            times,
            timestep,
        }
    }

    /// Host vertices heading the arcs, in left-to-right order.
    pub fn arcs(&self) -> &[usize] {
        &self.arcs
    }

    pub fn arc(&self, k: usize) -> usize {
        self.arcs[k]
    }

    pub fn arc_index(&self, x: usize) -> Option<usize> {
        self.arcs.iter().position(|&a| a == x)
    }

    pub fn n_arcs(&self) -> usize {
        self.arcs.len()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn time(&self, index: usize) -> f64 {
        self.times[index]
    }

    pub fn n_times(&self) -> usize {
        self.times.len()
    }

    pub fn n_slices(&self) -> usize {
        self.times.len() - 2
    }

    pub fn n_points(&self) -> usize {
        self.times.len() * self.arcs.len()
    }

    pub fn last_index(&self) -> usize {
        self.times.len() - 1
    }

    pub fn lower_time(&self) -> f64 {
        self.times[0]
    }

    pub fn upper_time(&self) -> f64 {
        self.times[self.times.len() - 1]
    }

    pub fn timestep(&self) -> f64 {
        self.timestep
    }

    pub fn timespan(&self) -> f64 {
        self.upper_time() - self.lower_time()
    }
}

/// A discretised time: epoch number and time index within the epoch.
/// Ordered bottom-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EpochPt {
    pub epoch: usize,
    pub index: usize,
}

impl EpochPt {
    pub const LEAF: EpochPt = EpochPt { epoch: 0, index: 0 };

    pub fn new(epoch: usize, index: usize) -> Self {
        Self { epoch, index }
    }
}

impl fmt::Display for EpochPt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.epoch, self.index)
    }
}

/// Splits a host tree into epochs, leaves first.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochDiscretiser {
    config: DiscretisationConfig,
    epochs: Vec<Epoch>,
    splits: Vec<Option<usize>>,
    vertex_epochs: Vec<usize>,
}

impl EpochDiscretiser {
    pub fn new(host: &HostTree, config: DiscretisationConfig) -> DltResult<Self> {
        config.validate()?;
        let mut d = Self {
            config,
            epochs: Vec::new(),
            splits: Vec::new(),
            vertex_epochs: Vec::new(),
        };
        d.update(host);
        Ok(d)
    }

    /// Rebuilds every epoch from the host tree.
    pub fn update(&mut self, host: &HostTree) {
        let tree = host.tree();
        let mut arcs = tree.leaves();
        let n_epochs = tree.n_leaves();
        let mut epochs = Vec::with_capacity(n_epochs);
        let mut splits = Vec::with_capacity(n_epochs);
        let mut vertex_epochs = vec![0; tree.n_vertices()];
        splits.push(None);

        let mut lower = 0.0;
        while arcs.len() > 1 {
            let mut split = 0;
            let mut upper = f64::MAX;
            for (j, &x) in arcs.iter().enumerate() {
                if let Some(p) = tree.parent(x)
                    && host.time(p) < upper
                {
                    split = j;
                    upper = host.time(p);
                }
            }
            if upper < lower + MIN_SPLICE_DELTA {
                upper = lower + MIN_SPLICE_DELTA;
            }
            let n = self.config.slices_for(upper - lower);
            epochs.push(Epoch::new(arcs.clone(), lower, upper, n));
            splits.push(Some(split));

            // Parent takes the left child's slot; right child is dropped.
            let parent = tree.parent(arcs[split]).unwrap_or(tree.root());
            arcs[split] = parent;
            arcs.remove(split + 1);
            vertex_epochs[parent] = epochs.len();
            lower = upper;
        }

        let mut upper = host.top_time();
        if upper < lower + MIN_SPLICE_DELTA {
            upper = lower + MIN_SPLICE_DELTA;
        }
        let n = self
            .config
            .n_stem
            .unwrap_or_else(|| self.config.slices_for(upper - lower));
        epochs.push(Epoch::new(arcs, lower, upper, n));

        self.epochs = epochs;
        self.splits = splits;
        self.vertex_epochs = vertex_epochs;
        debug!(
            "discretised host tree: {} epochs, {} points, min timestep {:.6}",
            self.n_epochs(),
            self.total_points(),
            self.min_timestep()
        );
    }

    pub fn config(&self) -> &DiscretisationConfig {
        &self.config
    }

    pub fn epochs(&self) -> &[Epoch] {
        &self.epochs
    }

    pub fn epoch(&self, i: usize) -> &Epoch {
        &self.epochs[i]
    }

    pub fn n_epochs(&self) -> usize {
        self.epochs.len()
    }

    pub fn n_arcs(&self, i: usize) -> usize {
        self.epochs[i].n_arcs()
    }

    /// Index of the arc in epoch `i` that splits at its lower boundary.
    /// `None` for the leaf epoch.
    pub fn split_index(&self, i: usize) -> Option<usize> {
        self.splits[i]
    }

    /// Epoch whose lower boundary is vertex `x` (0 for leaves).
    pub fn epoch_above(&self, x: usize) -> usize {
        self.vertex_epochs[x]
    }

    /// Epoch whose upper boundary is vertex `x`. Undefined for leaves.
    pub fn epoch_below(&self, x: usize) -> Option<usize> {
        self.vertex_epochs[x].checked_sub(1)
    }

    /// Discretised time of host vertex `x`.
    pub fn vertex_time(&self, x: usize) -> f64 {
        self.epochs[self.vertex_epochs[x]].lower_time()
    }

    pub fn time(&self, pt: EpochPt) -> f64 {
        self.epochs[pt.epoch].time(pt.index)
    }

    pub fn timestep(&self, i: usize) -> f64 {
        self.epochs[i].timestep()
    }

    pub fn root_to_leaf_time(&self) -> f64 {
        self.epochs[self.epochs.len() - 1].lower_time()
    }

    pub fn top_to_leaf_time(&self) -> f64 {
        self.epochs[self.epochs.len() - 1].upper_time()
    }

    pub fn min_timestep(&self) -> f64 {
        self.epochs
            .iter()
            .map(Epoch::timestep)
            .fold(f64::MAX, f64::min)
    }

    /// Summed length of all arcs, stem included.
    pub fn total_arc_time(&self) -> f64 {
        self.epochs
            .iter()
            .map(|ep| ep.timespan() * ep.n_arcs() as f64)
            .sum()
    }

    /// Number of times over all epochs. With `unique`, shared epoch
    /// boundaries are counted once.
    pub fn total_times(&self, unique: bool) -> usize {
        let sum: usize = self.epochs.iter().map(Epoch::n_times).sum();
        if unique {
            sum - (self.epochs.len() - 1)
        } else {
            sum
        }
    }

    pub fn total_points(&self) -> usize {
        self.epochs.iter().map(Epoch::n_points).sum()
    }

    pub fn is_last(&self, pt: EpochPt) -> bool {
        pt.index + 1 == self.epochs[pt.epoch].n_times()
    }

    /// The tip of the stem arc.
    pub fn pt_at_top(&self) -> EpochPt {
        let e = self.epochs.len() - 1;
        EpochPt::new(e, self.epochs[e].last_index())
    }

    /// Next time down. The lower boundary of an epoch steps to the upper
    /// boundary of the epoch below, which is the same absolute time.
    pub fn pt_below(&self, pt: EpochPt) -> Option<EpochPt> {
        if pt.index > 0 {
            Some(EpochPt::new(pt.epoch, pt.index - 1))
        } else if pt.epoch > 0 {
            let e = pt.epoch - 1;
            Some(EpochPt::new(e, self.epochs[e].last_index()))
        } else {
            None
        }
    }

    /// Like `pt_below` but never returns a point with the same time.
    pub fn pt_below_strict(&self, pt: EpochPt) -> Option<EpochPt> {
        if pt.index > 0 {
            Some(EpochPt::new(pt.epoch, pt.index - 1))
        } else if pt.epoch > 0 {
            let e = pt.epoch - 1;
            Some(EpochPt::new(e, self.epochs[e].last_index() - 1))
        } else {
            None
        }
    }

    pub fn pt_above(&self, pt: EpochPt) -> EpochPt {
        if pt.index + 1 >= self.epochs[pt.epoch].n_times() {
            EpochPt::new(pt.epoch + 1, 0)
        } else {
            EpochPt::new(pt.epoch, pt.index + 1)
        }
    }

    /// Like `pt_above` but skips the boundary time shared with the next epoch.
    /// `None` at the tip of the stem.
    pub fn pt_above_strict(&self, pt: EpochPt) -> Option<EpochPt> {
        let epoch = self.epochs.get(pt.epoch)?;
        if pt.index + 1 < epoch.n_times() {
            Some(EpochPt::new(pt.epoch, pt.index + 1))
        } else if pt.epoch + 1 < self.epochs.len() {
            Some(EpochPt::new(pt.epoch + 1, 1))
        } else {
            None
        }
    }

    /// Like `pt_above` but never lands on the last time of an epoch.
    pub fn pt_above_not_last(&self, pt: EpochPt) -> EpochPt {
        if pt.index + 2 >= self.epochs[pt.epoch].n_times() {
            EpochPt::new(pt.epoch + 1, 0)
        } else {
            EpochPt::new(pt.epoch, pt.index + 1)
        }
    }
}

impl fmt::Display for EpochDiscretiser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "EPOCH DISCRETISER")?;
        writeln!(f, "Min no. of slices: {}", self.config.n_min)?;
        writeln!(f, "Max no. of slices: {}", self.config.n_max)?;
        writeln!(f, "Approx. timestep: {}", self.config.delta_t)?;
        if let Some(n) = self.config.n_stem {
            writeln!(f, "Stem no. of slices: {n}")?;
        }
        let stem = &self.epochs[self.epochs.len() - 1];
        writeln!(f, "Discretised stem timespan: {}", stem.timespan())?;
        writeln!(f, "Discretised root-to-leaf timespan: {}", self.root_to_leaf_time())?;
        writeln!(f, "No. of epochs: {}", self.n_epochs())?;
        writeln!(f, "Total no. of times: {}", self.total_times(false))?;
        writeln!(f, "Total no. of unique times: {}", self.total_times(true))?;
        writeln!(f, "Total no. of points: {}", self.total_points())?;
        writeln!(f, "Epoch\tPoints\tTimestep\tTimespan\tArcs\tSplit")?;
        for (i, ep) in self.epochs.iter().enumerate().rev() {
            let split = self.splits[i].map_or_else(|| "-".to_string(), |s| s.to_string());
            writeln!(
                f,
                "{i}\t{}*{}={}\t{:.6}\t{:.6}--{:.6}\t{:?}\t{split}",
                ep.n_arcs(),
                ep.n_times(),
                ep.n_points(),
                ep.timestep(),
                ep.lower_time(),
                ep.upper_time(),
                ep.arcs(),
            )?;
        }
        Ok(())
    }
}
