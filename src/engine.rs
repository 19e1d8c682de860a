use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::discretiser::{DiscretisationConfig, EpochDiscretiser};
use crate::error::{DltError, DltResult};
use crate::io::leafmap::LeafMap;
use crate::model::{DltrsModel, ModelContext};
use crate::ode::OdeTolerance;
use crate::probs::{DltRates, EpochDltProbs};
use crate::rates::{EdgeRateDensity, RatePdf};
use crate::reconciliation::ReconciliationHelper;
use crate::snapshot::Snapshot;
use crate::tree::{GuestTree, HostTree};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub discretisation: DiscretisationConfig,
    pub rates: DltRates,
    pub normalise_transfer: bool,
    pub rate_density: EdgeRateDensity,
    pub tolerance: OdeTolerance,
}

impl EngineConfig {
    pub fn new(rates: DltRates) -> Self {
        Self {
            discretisation: DiscretisationConfig::default(),
            rates,
            normalise_transfer: true,
            rate_density: EdgeRateDensity::default(),
            tolerance: OdeTolerance::default(),
        }
    }
}

/// What changed since the last recompute.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Host tree times.
    Host,
    /// Duplication, loss or transfer rate.
    Rates,
    /// Guest tree topology.
    Topology,
    /// Guest branch lengths; `Some` lists the vertices whose length changed.
    Lengths(Option<Vec<usize>>),
    /// Edge rate density parameters.
    RateDensity,
}

/// Owns the discretised host tree, the DLT probabilities, the placement
/// limits and the DP tables, and keeps them consistent under
/// cache / mutate / recompute / restore cycles.
#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    host: Snapshot<HostTree>,
    guest: Snapshot<GuestTree>,
    leaf_map: LeafMap,
    sigma: Snapshot<Vec<Option<usize>>>,
    rate_pdf: Snapshot<RatePdf>,
    disc: Snapshot<EpochDiscretiser>,
    probs: EpochDltProbs,
    helper: ReconciliationHelper,
    model: DltrsModel,
}

impl ReconciliationEngine {
    pub fn new(
        host: HostTree,
        guest: GuestTree,
        leaf_map: LeafMap,
        config: EngineConfig,
    ) -> DltResult<Self> {
        let sigma = leaf_map.resolve(guest.tree(), host.tree())?;
        let rate_pdf = RatePdf::new(config.rate_density)?;
        let disc = EpochDiscretiser::new(&host, config.discretisation)?;
        let probs = EpochDltProbs::new(
            &disc,
            config.rates,
            config.normalise_transfer,
            config.tolerance,
        )?;
        let helper = ReconciliationHelper::new(guest.tree(), &disc, &sigma)?;
        let model = DltrsModel::new(&ModelContext {
            host: &host,
            guest: &guest,
            disc: &disc,
            probs: &probs,
            helper: &helper,
            rate_pdf: &rate_pdf,
        });
        Ok(Self {
            host: Snapshot::new(host),
            guest: Snapshot::new(guest),
            leaf_map,
            sigma: Snapshot::new(sigma),
            rate_pdf: Snapshot::new(rate_pdf),
            disc: Snapshot::new(disc),
            probs,
            helper,
            model,
        })
    }

    pub fn context(&self) -> ModelContext<'_> {
        ModelContext {
            host: &self.host,
            guest: &self.guest,
            disc: &self.disc,
            probs: &self.probs,
            helper: &self.helper,
            rate_pdf: &self.rate_pdf,
        }
    }

    pub fn host(&self) -> &HostTree {
        &self.host
    }

    pub fn guest(&self) -> &GuestTree {
        &self.guest
    }

    pub fn discretiser(&self) -> &EpochDiscretiser {
        &self.disc
    }

    pub fn probs(&self) -> &EpochDltProbs {
        &self.probs
    }

    pub fn helper(&self) -> &ReconciliationHelper {
        &self.helper
    }

    pub fn model(&self) -> &DltrsModel {
        &self.model
    }

    pub fn rate_pdf(&self) -> &RatePdf {
        &self.rate_pdf
    }

    pub fn rates(&self) -> DltRates {
        self.probs.rates()
    }

    pub fn likelihood(&self) -> f64 {
        self.model.likelihood()
    }

    pub fn set_rates(&mut self, rates: DltRates) -> DltResult<()> {
        self.probs.set_rates(rates)
    }

    /// New absolute times for the host tree, same topology.
    pub fn set_host_times(&mut self, times: Vec<f64>, stem_time: f64) -> DltResult<()> {
        let host = HostTree::with_times(self.host.tree().clone(), times, stem_time)?;
        self.host.replace(host);
        Ok(())
    }

    /// Replaces the guest tree. The vertex count must not change.
    pub fn set_guest_tree(&mut self, guest: GuestTree) -> DltResult<()> {
        let expected = self.guest.tree().n_vertices();
        let found = guest.tree().n_vertices();
        if expected != found {
            return Err(DltError::VertexCountMismatch { expected, found });
        }
        self.guest.replace(guest);
        Ok(())
    }

    pub fn set_length(&mut self, u: usize, length: f64) {
        self.guest.current_mut().set_length(u, length);
    }

    pub fn set_rate_density(&mut self, density: EdgeRateDensity) -> DltResult<()> {
        self.rate_pdf.replace(RatePdf::new(density)?);
        Ok(())
    }

    /// Saves everything `change` may overwrite. Call before mutating.
    pub fn cache(&mut self, change: &Change) {
        match change {
            Change::Host => {
                self.host.cache();
                self.disc.cache();
                self.probs.cache();
                self.helper.cache();
                self.model.cache_all();
            }
            Change::Rates => {
                self.probs.cache();
                self.model.cache_all();
            }
            Change::Topology => {
                self.guest.cache();
                self.sigma.cache();
                self.helper.cache();
                self.model.cache_all();
            }
            Change::Lengths(Some(changed)) => {
                self.guest.cache();
                let touched = DltrsModel::touched_by_partial(&self.guest, changed);
                self.model.cache_vertices(&touched);
            }
            Change::Lengths(None) => {
                self.guest.cache();
                self.model.cache_all();
            }
            Change::RateDensity => {
                self.rate_pdf.cache();
                self.model.cache_all();
            }
        }
    }

    /// Brings every derived quantity up to date with `change` and returns
    /// the new likelihood.
    pub fn recompute(&mut self, change: &Change) -> DltResult<f64> {
        debug!("recompute after {change:?}");
        match change {
            Change::Host => {
                self.disc.current_mut().update(&self.host);
                self.probs.update(&self.disc);
                self.helper
                    .update(self.guest.tree(), &self.disc, &self.sigma)?;
                self.full_update();
            }
            Change::Rates => {
                self.probs.update(&self.disc);
                self.full_update();
            }
            Change::Topology => {
                let sigma = self.leaf_map.resolve(self.guest.tree(), self.host.tree())?;
                self.sigma.replace(sigma);
                self.helper
                    .update(self.guest.tree(), &self.disc, &self.sigma)?;
                self.full_update();
            }
            Change::Lengths(Some(changed)) => {
                let ctx = ModelContext {
                    host: &self.host,
                    guest: &self.guest,
                    disc: &self.disc,
                    probs: &self.probs,
                    helper: &self.helper,
                    rate_pdf: &self.rate_pdf,
                };
                self.model.partial_update(&ctx, changed);
            }
            Change::Lengths(None) | Change::RateDensity => self.full_update(),
        }
        Ok(self.model.likelihood())
    }

    /// Rolls back to the state saved by the last `cache`.
    pub fn restore_cache(&mut self) {
        self.host.restore();
        self.guest.restore();
        self.sigma.restore();
        self.rate_pdf.restore();
        self.disc.restore();
        self.probs.restore_cache();
        self.helper.restore_cache();
        self.model.restore_cache();
    }

    /// Accepts the current state and drops the saved one.
    pub fn clear_cache(&mut self) {
        self.host.clear_cache();
        self.guest.clear_cache();
        self.sigma.clear_cache();
        self.rate_pdf.clear_cache();
        self.disc.clear_cache();
        self.probs.clear_cache();
        self.helper.clear_cache();
        self.model.clear_cache();
    }

    fn full_update(&mut self) {
        let ctx = ModelContext {
            host: &self.host,
            guest: &self.guest,
            disc: &self.disc,
            probs: &self.probs,
            helper: &self.helper,
            rate_pdf: &self.rate_pdf,
        };
        self.model.full_update(&ctx);
    }
}

impl fmt::Display for ReconciliationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Host vertices: {}", self.host.tree().n_vertices())?;
        writeln!(f, "Guest vertices: {}", self.guest.tree().n_vertices())?;
        writeln!(f, "Edge rate density: {}", self.rate_pdf.params())?;
        writeln!(f, "Total host arc time: {}", self.disc.total_arc_time())?;
        writeln!(f, "Min timestep: {}", self.disc.min_timestep())?;
        write!(f, "{}", *self.disc)?;
        write!(f, "{}", self.probs)?;
        write!(f, "{}", self.model)
    }
}
