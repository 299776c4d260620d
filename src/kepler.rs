//! Solve Kepler's equation `M = E - e sin E` for batches of orbits.
//!
//! Elements are partitioned by eccentricity into three disjoint sets that are
//! solved in bulk:
//!
//! * `e == 0`: the eccentric anomaly is the mean anomaly.
//! * `0 < e < 0.95`: Newton-Raphson seeded at `E = M`.
//! * `e >= 0.95`: Mikkola's analytical approximation (Mikkola 1987, Celestial
//!   Mechanics 40, 329-334) followed by one fourth order correction.
//!
//! Newton elements that have not converged after `max_iter` iterations are
//! merged into the analytical batch rather than reported as failures.
//!
//! Callers are expected to reduce the mean anomaly to `[0, 2π)` first.

use std::f64::consts::PI;

use itertools::izip;
use multiversion::multiversion;
use ndarray::{Array1, ArrayView1};
use tracing::debug;

use crate::orbit::DPI;

/// Eccentricities at or above this value skip Newton-Raphson.
pub const HIGH_ECCENTRICITY: f64 = 0.95;

/// Settings for the iterative part of the anomaly solver.
#[derive(Debug, Clone, Copy)]
pub struct KeplerSolver {
    /// Absolute tolerance on the Newton correction.
    pub tolerance: f64,
    /// Number of Newton iterations after the two initial corrections before
    /// the remaining elements are handed to the analytical solver.
    pub max_iter: usize,
}

impl Default for KeplerSolver {
    fn default() -> Self {
        Self {
            tolerance: 1e-9,
            max_iter: 100,
        }
    }
}

impl KeplerSolver {
    /// Eccentric anomalies for paired mean anomalies and eccentricities.
    pub fn solve(&self, manom: ArrayView1<f64>, ecc: ArrayView1<f64>) -> Array1<f64> {
        let manom = manom.to_vec();
        let ecc = ecc.to_vec();
        Array1::from_vec(self.solve_slice(&manom, &ecc))
    }

    /// Slice version of [`KeplerSolver::solve`].
    pub fn solve_slice(&self, manom: &[f64], ecc: &[f64]) -> Vec<f64> {
        assert_eq!(manom.len(), ecc.len());

        let mut eanom = vec![f64::NAN; manom.len()];
        let mut low = Vec::new();
        let mut high = Vec::new();

        for (i, (&m, &e)) in manom.iter().zip(ecc).enumerate() {
            if e == 0.0 {
                eanom[i] = m;
            } else if e < HIGH_ECCENTRICITY {
                low.push(i);
            } else {
                high.push(i);
            }
        }

        if !low.is_empty() {
            let low_manom: Vec<f64> = low.iter().map(|&i| manom[i]).collect();
            let low_ecc: Vec<f64> = low.iter().map(|&i| ecc[i]).collect();
            let (low_eanom, unconverged) = self.newton_solver(&low_manom, &low_ecc);
            for (&i, &value) in low.iter().zip(&low_eanom) {
                eanom[i] = value;
            }
            if !unconverged.is_empty() {
                debug!(
                    count = unconverged.len(),
                    max_iter = self.max_iter,
                    "Newton solver exhausted, switching to analytical solver"
                );
                high.extend(unconverged.into_iter().map(|local| low[local]));
            }
        }

        if !high.is_empty() {
            let high_manom: Vec<f64> = high.iter().map(|&i| manom[i]).collect();
            let high_ecc: Vec<f64> = high.iter().map(|&i| ecc[i]).collect();
            let high_eanom = mikkola_solver_wrapper(&high_manom, &high_ecc);
            for (&i, &value) in high.iter().zip(&high_eanom) {
                eanom[i] = value;
            }
        }

        eanom
    }

    /// Newton-Raphson iteration. Returns the eccentric anomalies and the
    /// (local) indices of the elements that did not converge.
    pub(crate) fn newton_solver(&self, manom: &[f64], ecc: &[f64]) -> (Vec<f64>, Vec<usize>) {
        let mut eanom = manom.to_vec();

        for _ in 0..2 {
            for (eanom, &m, &e) in izip!(eanom.iter_mut(), manom, ecc) {
                *eanom -= newton_step(*eanom, m, e);
            }
        }

        let mut diff: Vec<f64> = izip!(&eanom, manom, ecc)
            .map(|(&eanom, &m, &e)| newton_step(eanom, m, e))
            .collect();
        let mut active: Vec<usize> = (0..eanom.len())
            .filter(|&i| diff[i].abs() > self.tolerance)
            .collect();

        let mut niter = 0;
        while !active.is_empty() && niter < self.max_iter {
            for &i in &active {
                eanom[i] -= diff[i];
                diff[i] = newton_step(eanom[i], manom[i], ecc[i]);
            }
            active.retain(|&i| diff[i].abs() > self.tolerance);
            niter += 1;
        }

        (eanom, active)
    }
}

/// Eccentric anomalies using the default solver settings.
pub fn ecc_anom(manom: ArrayView1<f64>, ecc: ArrayView1<f64>) -> Array1<f64> {
    KeplerSolver::default().solve(manom, ecc)
}

#[inline]
fn newton_step(eanom: f64, manom: f64, ecc: f64) -> f64 {
    (eanom - ecc * eanom.sin() - manom) / (1.0 - ecc * eanom.cos())
}

/// Analytical solver with the mean anomaly reflected into `[0, π]`.
pub(crate) fn mikkola_solver_wrapper(manom: &[f64], ecc: &[f64]) -> Vec<f64> {
    let reflected: Vec<bool> = manom.iter().map(|&m| m > PI).collect();
    let manom: Vec<f64> = manom
        .iter()
        .zip(&reflected)
        .map(|(&m, &flip)| if flip { DPI - m } else { m })
        .collect();

    let mut eanom = vec![0.0; manom.len()];
    mikkola_kernel(&manom, ecc, &mut eanom);

    for (eanom, &flip) in eanom.iter_mut().zip(&reflected) {
        if flip {
            *eanom = DPI - *eanom;
        }
    }
    eanom
}

#[multiversion(targets("x86_64+avx+avx2", "x86+sse"))]
fn mikkola_kernel(manom: &[f64], ecc: &[f64], out: &mut [f64]) {
    for (out, &m, &e) in izip!(out.iter_mut(), manom, ecc) {
        *out = mikkola(m, e);
    }
}

#[inline]
fn mikkola(manom: f64, ecc: f64) -> f64 {
    let alpha = (1.0 - ecc) / (4.0 * ecc + 0.5);
    let beta = (0.5 * manom) / (4.0 * ecc + 0.5);

    let aux = (beta * beta + alpha.powi(3)).sqrt();
    let z = (beta + aux).cbrt();

    let s0 = z - alpha / z;
    let s1 = s0 - (0.078 * s0.powi(5)) / (1.0 + ecc);
    let e0 = manom + ecc * (3.0 * s1 - 4.0 * s1.powi(3));

    let (se0, ce0) = e0.sin_cos();

    let f = e0 - ecc * se0 - manom;
    let f1 = 1.0 - ecc * ce0;
    let f2 = ecc * se0;
    let f3 = ecc * ce0;
    let f4 = -f2;
    let u1 = -f / f1;
    let u2 = -f / (f1 + 0.5 * f2 * u1);
    let u3 = -f / (f1 + 0.5 * f2 * u2 + (1.0 / 6.0) * f3 * u2 * u2);
    let u4 = -f / (f1 + 0.5 * f2 * u3 + (1.0 / 6.0) * f3 * u3 * u3 + (1.0 / 24.0) * f4 * u3.powi(3));

    e0 + u4
}
