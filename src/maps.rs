use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1};

use crate::discretiser::{EpochDiscretiser, EpochPt};

/// One value per arc at every discretised time. Epoch `i` holds an
/// `n_times x n_arcs` block.
#[derive(Debug, Clone, PartialEq)]
pub struct PointMap {
    epochs: Vec<Array2<f64>>,
}

impl PointMap {
    pub fn new(disc: &EpochDiscretiser) -> Self {
        Self {
            epochs: disc
                .epochs()
                .iter()
                .map(|ep| Array2::zeros((ep.n_times(), ep.n_arcs())))
                .collect(),
        }
    }

    pub fn get(&self, pt: EpochPt, arc: usize) -> f64 {
        self.epochs[pt.epoch][(pt.index, arc)]
    }

    pub fn set(&mut self, pt: EpochPt, arc: usize, value: f64) {
        self.epochs[pt.epoch][(pt.index, arc)] = value;
    }

    pub fn row(&self, pt: EpochPt) -> ArrayView1<'_, f64> {
        self.epochs[pt.epoch].row(pt.index)
    }

    pub fn row_mut(&mut self, pt: EpochPt) -> ArrayViewMut1<'_, f64> {
        self.epochs[pt.epoch].row_mut(pt.index)
    }

    pub fn set_row(&mut self, pt: EpochPt, values: &Array1<f64>) {
        self.row_mut(pt).assign(values);
    }

    /// Every stored value, epoch by epoch.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.epochs.iter().flat_map(|b| b.iter().copied())
    }
}

/// Upper-triangular `n x n` storage for index pairs `i <= j`, packed
/// row by row.
#[derive(Debug, Clone, PartialEq)]
pub struct Triangular<T> {
    n: usize,
    data: Vec<T>,
}

impl<T> Triangular<T> {
    pub fn from_fn<F: FnMut(usize, usize) -> T>(n: usize, mut f: F) -> Self {
        let mut data = Vec::with_capacity(n * (n + 1) / 2);
        for i in 0..n {
            for j in i..n {
                data.push(f(i, j));
            }
        }
        Self { n, data }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    #[inline]
    fn offset(&self, i: usize, j: usize) -> usize {
        debug_assert!(
            i <= j && j < self.n,
            "triangular index ({i}, {j}) out of range for n={}",
            self.n
        );
        i * (2 * self.n - i - 1) / 2 + j
    }

    pub fn get(&self, i: usize, j: usize) -> &T {
        &self.data[self.offset(i, j)]
    }

    pub fn get_mut(&mut self, i: usize, j: usize) -> &mut T {
        let k = self.offset(i, j);
        &mut self.data[k]
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }
}

/// Values for every ordered pair of discretised times `lower <= upper`.
/// The block for a pair is indexed `[lower arc, upper arc]`.
///
/// Times are numbered globally with shared epoch boundaries counted twice,
/// so the upper time of epoch `i` and the lower time of epoch `i + 1` are
/// distinct entries.
#[derive(Debug, Clone, PartialEq)]
pub struct PointPairMap {
    offsets: Vec<usize>,
    blocks: Triangular<Array2<f64>>,
}

impl PointPairMap {
    pub fn new(disc: &EpochDiscretiser) -> Self {
        let mut offsets = Vec::with_capacity(disc.n_epochs());
        let mut epoch_of = Vec::new();
        for (i, ep) in disc.epochs().iter().enumerate() {
            offsets.push(epoch_of.len());
            epoch_of.extend(std::iter::repeat_n(i, ep.n_times()));
        }
        let blocks = Triangular::from_fn(epoch_of.len(), |a, b| {
            Array2::zeros((disc.n_arcs(epoch_of[a]), disc.n_arcs(epoch_of[b])))
        });
        Self { offsets, blocks }
    }

    #[inline]
    fn global(&self, pt: EpochPt) -> usize {
        self.offsets[pt.epoch] + pt.index
    }

    pub fn block(&self, lower: EpochPt, upper: EpochPt) -> &Array2<f64> {
        self.blocks.get(self.global(lower), self.global(upper))
    }

    pub fn block_mut(&mut self, lower: EpochPt, upper: EpochPt) -> &mut Array2<f64> {
        let (a, b) = (self.global(lower), self.global(upper));
        self.blocks.get_mut(a, b)
    }

    pub fn get(&self, lower: EpochPt, lower_arc: usize, upper: EpochPt, upper_arc: usize) -> f64 {
        self.block(lower, upper)[(lower_arc, upper_arc)]
    }

    pub fn set(
        &mut self,
        lower: EpochPt,
        lower_arc: usize,
        upper: EpochPt,
        upper_arc: usize,
        value: f64,
    ) {
        self.block_mut(lower, upper)[(lower_arc, upper_arc)] = value;
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.blocks.iter().flat_map(|b| b.iter().copied())
    }
}
