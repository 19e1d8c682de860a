use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::engine::{EngineConfig, ReconciliationEngine};
use crate::error::{DltError, DltResult};

/// Realisation output settings of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub realisations: usize,
    pub map: bool,
    pub seed: u64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            realisations: 0,
            map: false,
            seed: 1,
        }
    }
}

/// Everything needed to rerun a likelihood evaluation, plus the result of
/// the run that wrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParams {
    #[serde(flatten)]
    pub config: EngineConfig,
    #[serde(default)]
    pub sampling: SamplingParams,
    #[serde(default)]
    pub log_likelihood: Option<f64>,
}

impl RunParams {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            sampling: SamplingParams::default(),
            log_likelihood: None,
        }
    }

    /// Current settings of `engine` and its log-likelihood.
    pub fn from_engine(
        config: EngineConfig,
        sampling: SamplingParams,
        engine: &ReconciliationEngine,
    ) -> Self {
        Self {
            config: EngineConfig {
                rates: engine.rates(),
                rate_density: engine.rate_pdf().params(),
                ..config
            },
            sampling,
            log_likelihood: Some(engine.likelihood().ln()),
        }
    }
}

fn io_error(path: &Path, err: impl std::fmt::Display) -> DltError {
    DltError::ParamsIo {
        path: path.display().to_string(),
        msg: err.to_string(),
    }
}

/// Writes `params` as pretty JSON.
pub fn save_params(path: &Path, params: &RunParams) -> DltResult<()> {
    let file = File::create(path).map_err(|e| io_error(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, params).map_err(|e| io_error(path, e))?;
    writer.flush().map_err(|e| io_error(path, e))
}

/// Reads a parameter file and checks the rates and discretisation bounds it
/// holds, so a bad file fails before any tree is touched.
pub fn load_params(path: &Path) -> DltResult<RunParams> {
    let file = File::open(path).map_err(|e| io_error(path, e))?;
    let params: RunParams =
        serde_json::from_reader(BufReader::new(file)).map_err(|e| DltError::ParamsFormat {
            path: path.display().to_string(),
            msg: e.to_string(),
        })?;
    params.config.rates.validate()?;
    params.config.discretisation.validate()?;
    Ok(params)
}
