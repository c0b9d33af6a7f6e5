//! Time integration of the truncated CME.
//!
//! The solver only needs a stateful integrator that can advance to a target
//! time, hand back a copy of its solution, and roll back to a saved restore
//! point under a new operator. [`Integrator`] captures that contract;
//! [`Rk45Integrator`] is the reference implementation (Dormand–Prince 4(5)
//! with PI step-size control).

use ndarray::{Array1, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{FspError, Result};
use crate::rhs::Rhs;

/// Stateful integrator with snapshot / restore.
pub trait Integrator {
    /// Replace operator, solution and time outright; the restore point moves
    /// to `t0`.
    fn reset(&mut self, rhs: Rhs, y0: Array1<f64>, t0: f64);

    /// Advance the solution to `target_time` under the current operator.
    fn step(&mut self, target_time: f64) -> Result<()>;

    /// Current integration time.
    fn time(&self) -> f64;

    /// Copy of the current solution vector.
    fn solution(&self) -> Array1<f64>;

    /// Mark the current time as the restore point.
    fn set_restore_point(&mut self);

    /// Time of the last restore point.
    fn restore_time(&self) -> f64;

    /// Roll back to the restore-point time with a new operator and a new
    /// starting vector (which may live on a different domain).
    fn restore(&mut self, rhs: Rhs, y0: Array1<f64>);
}

/// Configuration for [`Rk45Integrator`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorConfig {
    /// Relative tolerance. Default: 1e-8
    pub rtol: f64,
    /// Absolute tolerance. Default: 1e-12
    pub atol: f64,
    /// Initial step size; 0 picks one from the interval. Default: 0
    pub h0: f64,
    /// Smallest step before giving up. Default: 1e-14
    pub h_min: f64,
    /// Largest step. Default: infinite
    pub h_max: f64,
    /// Step budget per call to `step`. Default: 100_000
    pub max_steps: usize,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            rtol: 1e-8,
            atol: 1e-12,
            h0: 0.0,
            h_min: 1e-14,
            h_max: f64::INFINITY,
            max_steps: 100_000,
        }
    }
}

impl IntegratorConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.rtol.is_finite() || self.rtol <= 0.0 {
            return Err(FspError::InvalidModel("rtol must be finite and > 0".into()));
        }
        if !self.atol.is_finite() || self.atol <= 0.0 {
            return Err(FspError::InvalidModel("atol must be finite and > 0".into()));
        }
        if self.h_min <= 0.0 || self.h_max < self.h_min {
            return Err(FspError::InvalidModel(
                "step bounds must satisfy 0 < h_min <= h_max".into(),
            ));
        }
        if self.max_steps == 0 {
            return Err(FspError::InvalidModel("max_steps must be > 0".into()));
        }
        Ok(())
    }
}

// Dormand–Prince coefficients.
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

// 5th-order solution weights (FSAL: also row 7 of the tableau).
const B1: f64 = 35.0 / 384.0;
const B3: f64 = 500.0 / 1113.0;
const B4: f64 = 125.0 / 192.0;
const B5: f64 = -2187.0 / 6784.0;
const B6: f64 = 11.0 / 84.0;

// Difference between 5th- and embedded 4th-order weights.
const E1: f64 = 71.0 / 57600.0;
const E3: f64 = -71.0 / 16695.0;
const E4: f64 = 71.0 / 1920.0;
const E5: f64 = -17253.0 / 339200.0;
const E6: f64 = 22.0 / 525.0;
const E7: f64 = -1.0 / 40.0;

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 5.0;

/// Adaptive Dormand–Prince 4(5) integrator.
pub struct Rk45Integrator {
    config: IntegratorConfig,
    rhs: Option<Rhs>,
    t: f64,
    y: Array1<f64>,
    /// Step size carried between calls to `step`.
    h: Option<f64>,
    restore_t: f64,
}

impl Rk45Integrator {
    /// Create an integrator with no operator installed; call
    /// [`Integrator::reset`] before stepping.
    pub fn new(config: IntegratorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            rhs: None,
            t: 0.0,
            y: Array1::zeros(0),
            h: None,
            restore_t: 0.0,
        })
    }

    pub fn config(&self) -> &IntegratorConfig {
        &self.config
    }

    fn initial_step(&self, span: f64) -> f64 {
        if self.config.h0 > 0.0 {
            self.config.h0.min(self.config.h_max).min(span)
        } else {
            (span * 1e-3)
                .max(self.config.h_min)
                .min(self.config.h_max)
                .min(span)
        }
    }

    /// Weighted RMS norm of the local error estimate.
    fn error_norm(&self, err: &Array1<f64>, y_old: &Array1<f64>, y_new: &Array1<f64>) -> f64 {
        let n = err.len().max(1) as f64;
        let mut acc = 0.0;
        Zip::from(err).and(y_old).and(y_new).for_each(|&e, &a, &b| {
            let scale = self.config.atol + self.config.rtol * a.abs().max(b.abs());
            acc += (e / scale).powi(2);
        });
        (acc / n).sqrt()
    }
}

/// `y + h * Σ c_i k_i`.
fn stage(y: &Array1<f64>, h: f64, terms: &[(f64, &Array1<f64>)]) -> Array1<f64> {
    let mut out = y.clone();
    for &(c, k) in terms {
        out.scaled_add(h * c, k);
    }
    out
}

impl Integrator for Rk45Integrator {
    fn reset(&mut self, rhs: Rhs, y0: Array1<f64>, t0: f64) {
        debug_assert_eq!(y0.len(), rhs.size());
        self.rhs = Some(rhs);
        self.y = y0;
        self.t = t0;
        self.restore_t = t0;
        self.h = None;
    }

    fn step(&mut self, target_time: f64) -> Result<()> {
        if !target_time.is_finite() {
            return Err(FspError::Integration(format!(
                "target time {target_time} is not finite"
            )));
        }
        if target_time < self.t {
            return Err(FspError::Integration(format!(
                "cannot step backwards from t = {} to t = {}",
                self.t, target_time
            )));
        }
        let span = target_time - self.t;
        if span == 0.0 {
            return Ok(());
        }
        let rhs = self
            .rhs
            .clone()
            .ok_or_else(|| FspError::Integration("no operator installed".to_string()))?;

        let mut h = self.h.unwrap_or_else(|| self.initial_step(span));
        let mut k1 = rhs.velocity(self.t, self.y.view());
        let mut err_prev: f64 = 1e-4;
        let mut steps = 0usize;

        while self.t < target_time {
            if steps >= self.config.max_steps {
                return Err(FspError::Integration(format!(
                    "exceeded {} steps before reaching t = {}",
                    self.config.max_steps, target_time
                )));
            }
            steps += 1;

            let remaining = target_time - self.t;
            let last = h >= remaining;
            let h_try = if last { remaining } else { h };
            let t = self.t;
            let y = &self.y;

            let k2 = rhs.velocity(t + C2 * h_try, stage(y, h_try, &[(A21, &k1)]).view());
            let k3 = rhs.velocity(
                t + C3 * h_try,
                stage(y, h_try, &[(A31, &k1), (A32, &k2)]).view(),
            );
            let k4 = rhs.velocity(
                t + C4 * h_try,
                stage(y, h_try, &[(A41, &k1), (A42, &k2), (A43, &k3)]).view(),
            );
            let k5 = rhs.velocity(
                t + C5 * h_try,
                stage(y, h_try, &[(A51, &k1), (A52, &k2), (A53, &k3), (A54, &k4)]).view(),
            );
            let k6 = rhs.velocity(
                t + h_try,
                stage(
                    y,
                    h_try,
                    &[(A61, &k1), (A62, &k2), (A63, &k3), (A64, &k4), (A65, &k5)],
                )
                .view(),
            );
            let y_new = stage(
                y,
                h_try,
                &[(B1, &k1), (B3, &k3), (B4, &k4), (B5, &k5), (B6, &k6)],
            );
            let k7 = rhs.velocity(t + h_try, y_new.view());

            let err = stage(
                &Array1::zeros(y.len()),
                h_try,
                &[(E1, &k1), (E3, &k3), (E4, &k4), (E5, &k5), (E6, &k6), (E7, &k7)],
            );
            let err_norm = self.error_norm(&err, y, &y_new);

            if !err_norm.is_finite() {
                return Err(FspError::Integration(format!(
                    "non-finite error estimate at t = {t}"
                )));
            }

            if err_norm <= 1.0 {
                self.t = if last { target_time } else { t + h_try };
                self.y = y_new;
                k1 = k7;

                // PI controller.
                let err_clamped = err_norm.max(1e-10);
                let factor = (SAFETY * err_clamped.powf(-0.7 / 5.0) * err_prev.powf(0.4 / 5.0))
                    .clamp(MIN_FACTOR, MAX_FACTOR);
                err_prev = err_clamped;
                // Keep the pre-truncation step for the next call.
                if !last {
                    h = (h_try * factor).min(self.config.h_max);
                }
            } else {
                let factor = (SAFETY * err_norm.powf(-1.0 / 5.0)).clamp(MIN_FACTOR, 1.0);
                h = h_try * factor;
                if h < self.config.h_min {
                    return Err(FspError::Integration(format!(
                        "step size {h:e} below minimum at t = {t}"
                    )));
                }
            }
        }

        self.h = Some(h.max(self.config.h_min));
        Ok(())
    }

    fn time(&self) -> f64 {
        self.t
    }

    fn solution(&self) -> Array1<f64> {
        self.y.clone()
    }

    fn set_restore_point(&mut self) {
        self.restore_t = self.t;
    }

    fn restore_time(&self) -> f64 {
        self.restore_t
    }

    fn restore(&mut self, rhs: Rhs, y0: Array1<f64>) {
        debug_assert_eq!(y0.len(), rhs.size());
        self.rhs = Some(rhs);
        self.y = y0;
        self.t = self.restore_t;
        self.h = None;
    }
}
