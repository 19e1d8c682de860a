use thiserror::Error;

/// Setup-time failures. Numerical trouble during a recompute is never reported
/// here; it shows up as a non-finite likelihood instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DltError {
    #[error("invalid discretisation bounds: n_min={n_min}, n_max={n_max} (need 2 <= n_min <= n_max)")]
    InvalidDiscretisationBounds { n_min: usize, n_max: usize },

    #[error("invalid discretisation timestep {0} (must be > 0 when n_min != n_max)")]
    InvalidTimestep(f64),

    #[error("invalid stem slice count {0} (must be >= 1)")]
    InvalidStemSlices(usize),

    #[error("tree is not bifurcating at vertex {vertex} ({n_children} children)")]
    NonBifurcating { vertex: String, n_children: usize },

    #[error("host tree is not ultrametric: leaf {leaf} has time {time}")]
    NotUltrametric { leaf: String, time: f64 },

    #[error("host tree lacks a positive stem time (root branch length {0:?})")]
    MissingStemTime(Option<f64>),

    #[error("host tree arc above {0} has non-positive length")]
    NonPositiveArc(String),

    #[error("invalid {name} rate {value} (must be finite and >= 0)")]
    InvalidRate { name: &'static str, value: f64 },

    #[error("invalid edge rate density: {0}")]
    InvalidRateDensity(String),

    #[error("guest leaf {0} has no host leaf mapping")]
    UnmappedGuestLeaf(String),

    #[error("host leaf {0} does not exist in host tree")]
    UnknownHostLeaf(String),

    #[error("vertex count mismatch: expected {expected}, found {found}")]
    VertexCountMismatch { expected: usize, found: usize },

    #[error("newick syntax error at byte {pos}: {msg}")]
    Newick { pos: usize, msg: String },

    #[error("no valid placement for guest vertex {0}")]
    NoValidPlacement(usize),

    #[error("host vertices {0} and {1} have no common ancestor")]
    NoCommonAncestor(usize, usize),

    #[error("cannot access parameter file {path}: {msg}")]
    ParamsIo { path: String, msg: String },

    #[error("failed to parse parameter file {path}: {msg}")]
    ParamsFormat { path: String, msg: String },
}

pub type DltResult<T> = Result<T, DltError>;
