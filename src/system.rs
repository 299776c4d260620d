//! The fit context: observations, reference epoch and parameter priors.

use std::{collections::HashMap, f64::consts::PI};

use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};
use tracing::info;

use crate::kepler::KeplerSolver;
use crate::orbit::{calc_orbit_grid, radec_to_seppa, OrbitBatch, NUM_ELEMENTS};
use crate::priors::{GaussianPrior, LogUniformPrior, Prior, SinPrior, UniformPrior};
use crate::sampler::{OrbitError, Result};

/// Names of the fitted parameters, in parameter-axis order.
pub const PARAM_NAMES: [&str; NUM_ELEMENTS] =
    ["sma1", "ecc1", "inc1", "aop1", "pan1", "epp1", "plx", "mtot"];

/// Coordinate system of the two quantities of an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantType {
    /// RA and Dec offsets [arcsec]
    RaDec,
    /// Separation [arcsec] and position angle [deg]
    SepPa,
}

/// One row of the observation table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// Epoch [MJD]
    pub epoch: f64,
    pub quant1: f64,
    pub quant1_err: f64,
    pub quant2: f64,
    pub quant2_err: f64,
    pub quant_type: QuantType,
}

impl Observation {
    pub fn radec(epoch: f64, ra: f64, ra_err: f64, dec: f64, dec_err: f64) -> Self {
        Self {
            epoch,
            quant1: ra,
            quant1_err: ra_err,
            quant2: dec,
            quant2_err: dec_err,
            quant_type: QuantType::RaDec,
        }
    }

    pub fn seppa(epoch: f64, sep: f64, sep_err: f64, pa: f64, pa_err: f64) -> Self {
        Self {
            epoch,
            quant1: sep,
            quant1_err: sep_err,
            quant2: pa,
            quant2_err: pa_err,
            quant_type: QuantType::SepPa,
        }
    }
}

/// A single-companion system to fit.
#[derive(Debug, Clone)]
pub struct System {
    data_table: Vec<Observation>,
    input_table: Vec<Observation>,
    tau_ref_epoch: f64,
    sys_priors: Vec<Prior>,
    param_idx: HashMap<String, usize>,
    mass: f64,
    solver: KeplerSolver,
}

impl System {
    /// Create a system from an observation table and one prior per element,
    /// in [`PARAM_NAMES`] order.
    pub fn new(
        data_table: Vec<Observation>,
        tau_ref_epoch: f64,
        sys_priors: Vec<Prior>,
    ) -> Result<Self> {
        if data_table.is_empty() {
            return Err(OrbitError::InvalidSystem("the data table is empty".into()));
        }
        if sys_priors.len() != NUM_ELEMENTS {
            return Err(OrbitError::InvalidSystem(format!(
                "expected {} priors, got {}",
                NUM_ELEMENTS,
                sys_priors.len()
            )));
        }
        let param_idx = PARAM_NAMES
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.to_string(), idx))
            .collect();
        Ok(Self {
            input_table: data_table.clone(),
            data_table,
            tau_ref_epoch,
            sys_priors,
            param_idx,
            mass: 0.0,
            solver: KeplerSolver::default(),
        })
    }

    /// Create a system with the standard priors.
    ///
    /// Semi-major axis is log-uniform on `[0.001, 1e4)` AU, eccentricity and
    /// tau uniform on `[0, 1)`, inclination isotropic, both angles uniform on
    /// `[0, 2π)`. Parallax and total mass are Gaussian when an error is given
    /// and fixed otherwise.
    pub fn with_default_priors(
        data_table: Vec<Observation>,
        tau_ref_epoch: f64,
        system_mass: f64,
        plx: f64,
        mass_err: f64,
        plx_err: f64,
    ) -> Result<Self> {
        let plx_prior = if plx_err > 0.0 {
            Prior::new(GaussianPrior::new(plx, plx_err, true)?)
        } else {
            Prior::Fixed(plx)
        };
        let mass_prior = if mass_err > 0.0 {
            Prior::new(GaussianPrior::new(system_mass, mass_err, true)?)
        } else {
            Prior::Fixed(system_mass)
        };
        let priors = vec![
            Prior::new(LogUniformPrior::new(0.001, 1e4)?),
            Prior::new(UniformPrior::new(0.0, 1.0)?),
            Prior::new(SinPrior),
            Prior::new(UniformPrior::new(0.0, 2.0 * PI)?),
            Prior::new(UniformPrior::new(0.0, 2.0 * PI)?),
            Prior::new(UniformPrior::new(0.0, 1.0)?),
            plx_prior,
            mass_prior,
        ];
        Self::new(data_table, tau_ref_epoch, priors)
    }

    /// Mass of the orbiting body [Msun]; zero (the default) treats it as a
    /// test particle in the radial velocity model.
    pub fn with_body_mass(mut self, mass: f64) -> Self {
        self.mass = mass;
        self
    }

    pub fn with_solver(mut self, solver: KeplerSolver) -> Self {
        self.solver = solver;
        self
    }

    pub fn data_table(&self) -> &[Observation] {
        &self.data_table
    }

    /// The observations as given, before any coordinate conversion.
    pub fn input_table(&self) -> &[Observation] {
        &self.input_table
    }

    pub fn tau_ref_epoch(&self) -> f64 {
        self.tau_ref_epoch
    }

    pub fn sys_priors(&self) -> &[Prior] {
        &self.sys_priors
    }

    pub fn param_idx(&self) -> &HashMap<String, usize> {
        &self.param_idx
    }

    pub fn body_mass(&self) -> f64 {
        self.mass
    }

    pub fn solver(&self) -> &KeplerSolver {
        &self.solver
    }

    /// Rows holding RA/Dec offsets.
    pub fn radec(&self) -> Vec<usize> {
        self.rows_of(QuantType::RaDec)
    }

    /// Rows holding separation and position angle.
    pub fn seppa(&self) -> Vec<usize> {
        self.rows_of(QuantType::SepPa)
    }

    fn rows_of(&self, quant_type: QuantType) -> Vec<usize> {
        self.data_table
            .iter()
            .enumerate()
            .filter(|(_, obs)| obs.quant_type == quant_type)
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Epochs relative to `tau_ref_epoch`.
    pub fn epochs(&self) -> Array1<f64> {
        self.data_table
            .iter()
            .map(|obs| obs.epoch - self.tau_ref_epoch)
            .collect()
    }

    /// Observed quantities, `(n_obs, 2)`.
    pub fn data(&self) -> Array2<f64> {
        self.table_columns(|obs| [obs.quant1, obs.quant2])
    }

    /// Observation errors, `(n_obs, 2)`.
    pub fn errors(&self) -> Array2<f64> {
        self.table_columns(|obs| [obs.quant1_err, obs.quant2_err])
    }

    fn table_columns(&self, columns: impl Fn(&Observation) -> [f64; 2]) -> Array2<f64> {
        let mut out = Array2::zeros((self.data_table.len(), 2));
        for (mut row, obs) in out.axis_iter_mut(Axis(0)).zip(&self.data_table) {
            let [quant1, quant2] = columns(obs);
            row[0] = quant1;
            row[1] = quant2;
        }
        out
    }

    /// Rewrite RA/Dec rows of the data table as separation and position
    /// angle. The original rows stay available in [`System::input_table`].
    ///
    /// The separation error is the mean of the RA and Dec errors and the
    /// position angle error is that error seen at the measured separation.
    pub fn convert_data_table_radec2seppa(&mut self) {
        let radec = self.radec();
        if radec.is_empty() {
            return;
        }
        info!(
            rows = radec.len(),
            "Converting ra/dec data points in data_table to sep/pa"
        );
        for idx in radec {
            let obs = &mut self.data_table[idx];
            let (sep, pa) = radec_to_seppa(obs.quant1, obs.quant2);
            let sep_err = 0.5 * (obs.quant1_err + obs.quant2_err);
            let pa_err = (sep_err / sep).to_degrees();
            *obs = Observation::seppa(obs.epoch, sep, sep_err, pa, pa_err);
        }
    }

    /// Model predictions for a `(NUM_ELEMENTS, M)` parameter batch.
    ///
    /// Returns `(n_obs, 2, M)`: RA/Dec offsets for RA/Dec rows, separation and
    /// position angle for Sep/PA rows.
    pub fn compute_model(&self, params: ArrayView2<f64>) -> Array3<f64> {
        let orbits = OrbitBatch::from_params(params);
        let epochs = self.epochs();
        let proj = calc_orbit_grid(
            epochs.view().insert_axis(Axis(0)),
            &orbits,
            self.mass,
            &self.solver,
        );

        let mut model = Array3::zeros((self.data_table.len(), 2, orbits.len()));
        for (j, obs) in self.data_table.iter().enumerate() {
            for i in 0..orbits.len() {
                let ra = proj.raoff[[i, j]];
                let dec = proj.deoff[[i, j]];
                let (quant1, quant2) = match obs.quant_type {
                    QuantType::RaDec => (ra, dec),
                    QuantType::SepPa => radec_to_seppa(ra, dec),
                };
                model[[j, 0, i]] = quant1;
                model[[j, 1, i]] = quant2;
            }
        }
        model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;

    use crate::orbit::{calc_orbit, OrbitElements};

    fn table() -> Vec<Observation> {
        vec![
            Observation::radec(55_000.0, 0.3, 0.01, 0.4, 0.03),
            Observation::seppa(55_400.0, 0.5, 0.02, 40.0, 1.0),
            Observation::radec(55_800.0, -0.1, 0.02, 0.2, 0.02),
        ]
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            System::with_default_priors(vec![], 50_000.0, 1.0, 50.0, 0.0, 0.0),
            Err(OrbitError::InvalidSystem(_))
        ));
        assert!(matches!(
            System::new(table(), 50_000.0, vec![Prior::Fixed(1.0)]),
            Err(OrbitError::InvalidSystem(_))
        ));
    }

    #[test]
    fn default_priors_fix_plx_without_error() {
        let system = System::with_default_priors(table(), 50_000.0, 1.2, 40.0, 0.1, 0.0).unwrap();
        assert!(system.sys_priors()[6].is_fixed());
        assert!(!system.sys_priors()[7].is_fixed());
        assert_eq!(system.param_idx()["pan1"], 4);
        assert_eq!(system.radec(), vec![0, 2]);
        assert_eq!(system.seppa(), vec![1]);
    }

    #[test]
    fn radec_rows_convert_to_seppa() {
        let mut system = System::with_default_priors(table(), 50_000.0, 1.0, 50.0, 0.0, 0.0).unwrap();
        system.convert_data_table_radec2seppa();

        assert!(system.radec().is_empty());
        assert_eq!(system.input_table(), &table()[..]);

        let obs = system.data_table()[0];
        assert_abs_diff_eq!(obs.quant1, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(obs.quant2, 0.75f64.atan().to_degrees(), epsilon = 1e-12);
        assert_abs_diff_eq!(obs.quant1_err, 0.02, epsilon = 1e-12);
        assert_abs_diff_eq!(obs.quant2_err, (0.02f64 / 0.5).to_degrees(), epsilon = 1e-12);
        assert_eq!(system.data_table()[1], table()[1]);
    }

    #[test]
    fn model_follows_row_type() {
        let system = System::with_default_priors(table(), 50_000.0, 1.0, 50.0, 0.0, 0.0).unwrap();
        let orbit = OrbitElements {
            sma: 5.0,
            ecc: 0.3,
            inc: 0.8,
            aop: 1.0,
            pan: 2.0,
            tau: 0.4,
            plx: 50.0,
            mtot: 1.0,
        };
        let params = orbit.to_params();
        let model = system.compute_model(params.view());
        assert_eq!(model.dim(), (3, 2, 1));

        let proj = calc_orbit(
            system.epochs().view(),
            &OrbitBatch::from_params(params.view()),
            0.0,
        );
        assert_abs_diff_eq!(model[[0, 0, 0]], proj.raoff[[0, 0]], epsilon = 1e-12);
        assert_abs_diff_eq!(model[[2, 1, 0]], proj.deoff[[0, 2]], epsilon = 1e-12);
        let (sep, pa) = radec_to_seppa(proj.raoff[[0, 1]], proj.deoff[[0, 1]]);
        assert_abs_diff_eq!(model[[1, 0, 0]], sep, epsilon = 1e-12);
        assert_abs_diff_eq!(model[[1, 1, 0]], pa, epsilon = 1e-12);
    }

    #[test]
    fn custom_solver_is_used_for_the_model() {
        let solver = KeplerSolver {
            tolerance: 1e-13,
            max_iter: 0,
        };
        let default = System::with_default_priors(table(), 50_000.0, 1.0, 50.0, 0.0, 0.0).unwrap();
        let custom = default.clone().with_solver(solver);
        assert_eq!(custom.solver().max_iter, 0);

        let params = OrbitElements {
            sma: 5.0,
            ecc: 0.6,
            inc: 0.8,
            aop: 1.0,
            pan: 2.0,
            tau: 0.4,
            plx: 50.0,
            mtot: 1.0,
        }
        .to_params();
        let expected = default.compute_model(params.view());
        let model = custom.compute_model(params.view());
        for (a, b) in model.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
    }
}
