//! Adaptive Dormand–Prince 5(4) integration exposed as an iterator over
//! requested output times.
//!
//! The solver never overshoots an output time: every step is shortened so
//! that it lands exactly on the next requested time, and the state there is
//! yielded as-is. Consumers see a finite sequence of `(t, y)` pairs and need
//! no knowledge of the stepping.

use serde::{Deserialize, Serialize};

/// Right-hand side of `dy/dt = f(t, y)`.
pub trait OdeSystem {
    fn dim(&self) -> usize;
    fn derivatives(&self, t: f64, y: &[f64], dydt: &mut [f64]);
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OdeTolerance {
    pub rel: f64,
    pub abs: f64,
}

impl Default for OdeTolerance {
    fn default() -> Self {
        Self { rel: 1e-6, abs: 1e-6 }
    }
}

const C2: f64 = 1.0 / 5.0;
const C3: f64 = 3.0 / 10.0;
const C4: f64 = 4.0 / 5.0;
const C5: f64 = 8.0 / 9.0;

const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;

const B1: f64 = 35.0 / 384.0;
const B3: f64 = 500.0 / 1113.0;
const B4: f64 = 125.0 / 192.0;
const B5: f64 = -2187.0 / 6784.0;
const B6: f64 = 11.0 / 84.0;

// Difference between the 5th and embedded 4th order weights.
const E1: f64 = 71.0 / 57600.0;
const E3: f64 = -71.0 / 16695.0;
const E4: f64 = 71.0 / 1920.0;
const E5: f64 = -17253.0 / 339200.0;
const E6: f64 = 22.0 / 525.0;
const E7: f64 = -1.0 / 40.0;

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 5.0;
const MIN_STEP: f64 = 1e-12;

/// Lazy sequence of `(t, y(t))` at the requested output times.
pub struct OdeSamples<'a, S: OdeSystem> {
    system: &'a S,
    tol: OdeTolerance,
    t: f64,
    y: Vec<f64>,
    h: f64,
    outputs: std::vec::IntoIter<f64>,
    k: [Vec<f64>; 7],
    y_stage: Vec<f64>,
    y_new: Vec<f64>,
    steps: usize,
}

/// Starts integrating `system` from `(t0, y0)`. `output_times` must be
/// non-decreasing and not below `t0`; an output equal to `t0` yields `y0`.
pub fn integrate<'a, S: OdeSystem>(
    system: &'a S,
    t0: f64,
    y0: Vec<f64>,
    output_times: &[f64],
    tol: OdeTolerance,
) -> OdeSamples<'a, S> {
    let n = system.dim();
    debug_assert_eq!(y0.len(), n);
    let span = output_times.last().map_or(0.0, |&t| t - t0);
    OdeSamples {
        system,
        tol,
        t: t0,
        y: y0,
        h: (span * 0.1).max(MIN_STEP),
        outputs: output_times.to_vec().into_iter(),
        k: std::array::from_fn(|_| vec![0.0; n]),
        y_stage: vec![0.0; n],
        y_new: vec![0.0; n],
        steps: 0,
    }
}

impl<S: OdeSystem> OdeSamples<'_, S> {
    /// Accepted steps so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    fn stage(&mut self, t: f64, h: f64, weights: &[(usize, f64)], out: usize) {
        for i in 0..self.y.len() {
            let mut acc = 0.0;
            for &(j, a) in weights {
                acc += a * self.k[j][i];
            }
            self.y_stage[i] = self.y[i] + h * acc;
        }
        let (y_stage, k) = (&self.y_stage, &mut self.k);
        self.system.derivatives(t, y_stage, &mut k[out]);
    }

    /// One trial step of width `h`. Leaves the candidate in `y_new` and
    /// returns the scaled error norm.
    fn try_step(&mut self, h: f64) -> f64 {
        let t = self.t;
        let (y, k) = (&self.y, &mut self.k);
        self.system.derivatives(t, y, &mut k[0]);
        self.stage(t + C2 * h, h, &[(0, A21)], 1);
        self.stage(t + C3 * h, h, &[(0, A31), (1, A32)], 2);
        self.stage(t + C4 * h, h, &[(0, A41), (1, A42), (2, A43)], 3);
        self.stage(t + C5 * h, h, &[(0, A51), (1, A52), (2, A53), (3, A54)], 4);
        self.stage(
            t + h,
            h,
            &[(0, A61), (1, A62), (2, A63), (3, A64), (4, A65)],
            5,
        );
        for i in 0..self.y.len() {
            self.y_new[i] = self.y[i]
                + h * (B1 * self.k[0][i]
                    + B3 * self.k[2][i]
                    + B4 * self.k[3][i]
                    + B5 * self.k[4][i]
                    + B6 * self.k[5][i]);
        }
        let (y_new, k) = (&self.y_new, &mut self.k);
        self.system.derivatives(t + h, y_new, &mut k[6]);

        let mut sum = 0.0;
        for i in 0..self.y.len() {
            let err = h
                * (E1 * self.k[0][i]
                    + E3 * self.k[2][i]
                    + E4 * self.k[3][i]
                    + E5 * self.k[4][i]
                    + E6 * self.k[5][i]
                    + E7 * self.k[6][i]);
            let scale = self.tol.abs + self.tol.rel * self.y[i].abs().max(self.y_new[i].abs());
            sum += (err / scale).powi(2);
        }
        if self.y.is_empty() {
            0.0
        } else {
            (sum / self.y.len() as f64).sqrt()
        }
    }

    fn advance_to(&mut self, target: f64) {
        while self.t < target {
            let remaining = target - self.t;
            let landing = self.h >= remaining;
            let h = if landing { remaining } else { self.h };
            let err = self.try_step(h);
            let factor = if err == 0.0 {
                MAX_FACTOR
            } else {
                (SAFETY * err.powf(-0.2)).clamp(MIN_FACTOR, MAX_FACTOR)
            };
            if err <= 1.0 || h <= MIN_STEP || !err.is_finite() {
                std::mem::swap(&mut self.y, &mut self.y_new);
                self.t = if landing { target } else { self.t + h };
                self.steps += 1;
                if !landing {
                    self.h = (h * factor).max(MIN_STEP);
                }
            } else {
                self.h = (h * factor).max(MIN_STEP);
            }
        }
    }
}

impl<S: OdeSystem> Iterator for OdeSamples<'_, S> {
    type Item = (f64, Vec<f64>);

    fn next(&mut self) -> Option<Self::Item> {
        let target = self.outputs.next()?;
        self.advance_to(target);
        Some((target, self.y.clone()))
    }
}
