pub mod discretiser;
pub mod engine;
pub mod error;
pub mod io;
pub mod maps;
pub mod model;
pub mod mpr;
pub mod ode;
pub mod probs;
pub mod progress;
pub mod rates;
pub mod realisation;
pub mod reconciliation;
pub mod sampler;
pub mod snapshot;
pub mod tree;
pub mod utils;

pub use discretiser::{DiscretisationConfig, EpochDiscretiser, EpochPt};
pub use engine::{Change, EngineConfig, ReconciliationEngine};
pub use error::{DltError, DltResult};
pub use model::DltrsModel;
pub use probs::{DltRates, EpochDltProbs};
pub use realisation::Realisation;
pub use sampler::RealisationSampler;
pub use tree::{GuestTree, HostTree};
