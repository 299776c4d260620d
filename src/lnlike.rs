//! Log likelihood of model predictions given the observations.

use std::fmt::Debug;
use std::sync::Arc;

use ndarray::{Array1, Array2, Array3, ArrayView2, ArrayView3, Axis};

use crate::system::System;

/// Per-point log likelihood.
///
/// Arguments are the observed quantities `(n_obs, 2)`, their errors
/// `(n_obs, 2)`, the model `(n_obs, 2, M)` and the rows holding separation
/// and position angle. Returns `(n_obs, 2, M)`.
pub type LnLikeFn = fn(ArrayView2<f64>, ArrayView2<f64>, ArrayView3<f64>, &[usize]) -> Array3<f64>;

/// Additional log likelihood term of a `(n_params, M)` parameter batch,
/// returning one value per orbit.
pub type CustomLnLike = dyn Fn(ArrayView2<f64>) -> Array1<f64> + Send + Sync;

/// Gaussian log likelihood without normalization, `-0.5 (data - model)^2 / err^2`.
///
/// Position angle residuals of Sep/PA rows are wrapped into `[-180, 180)`
/// degrees before squaring.
pub fn chi2_lnlike(
    data: ArrayView2<f64>,
    errors: ArrayView2<f64>,
    model: ArrayView3<f64>,
    seppa_indices: &[usize],
) -> Array3<f64> {
    let (n_obs, n_quant, n_orbits) = model.dim();
    assert_eq!(data.dim(), (n_obs, n_quant));
    assert_eq!(errors.dim(), (n_obs, n_quant));

    Array3::from_shape_fn((n_obs, n_quant, n_orbits), |(obs, quant, orbit)| {
        let mut residual = data[[obs, quant]] - model[[obs, quant, orbit]];
        if quant == 1 && seppa_indices.contains(&obs) {
            residual = (residual + 180.0).rem_euclid(360.0) - 180.0;
        }
        let sigma = errors[[obs, quant]];
        -0.5 * residual * residual / (sigma * sigma)
    })
}

/// Sum a `(n_obs, 2, M)` array over the first two axes, skipping NaN.
pub fn nansum_per_orbit(lnlikes: ArrayView3<f64>) -> Array1<f64> {
    let mut total = Array1::zeros(lnlikes.len_of(Axis(2)));
    for plane in lnlikes.outer_iter() {
        for row in plane.outer_iter() {
            for (total, &value) in total.iter_mut().zip(row.iter()) {
                if !value.is_nan() {
                    *total += value;
                }
            }
        }
    }
    total
}

/// Likelihood shared by the samplers: a system with a snapshot of its data
/// table, the per-point likelihood and an optional custom term.
#[derive(Clone)]
pub struct Likelihood {
    system: System,
    data: Array2<f64>,
    errors: Array2<f64>,
    seppa: Vec<usize>,
    lnlike: LnLikeFn,
    custom_lnlike: Option<Arc<CustomLnLike>>,
}

impl Debug for Likelihood {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Likelihood")
            .field("system", &self.system)
            .field("seppa", &self.seppa)
            .field("custom_lnlike", &self.custom_lnlike.is_some())
            .finish()
    }
}

impl Likelihood {
    pub fn new(system: System) -> Self {
        let mut likelihood = Self {
            data: Array2::zeros((0, 2)),
            errors: Array2::zeros((0, 2)),
            seppa: Vec::new(),
            system,
            lnlike: chi2_lnlike,
            custom_lnlike: None,
        };
        likelihood.refresh();
        likelihood
    }

    /// Replace the per-point likelihood.
    pub fn with_lnlike(mut self, lnlike: LnLikeFn) -> Self {
        self.lnlike = lnlike;
        self
    }

    /// Add `custom` to the summed likelihood of every orbit.
    pub fn with_custom_lnlike<F>(mut self, custom: F) -> Self
    where
        F: Fn(ArrayView2<f64>) -> Array1<f64> + Send + Sync + 'static,
    {
        self.custom_lnlike = Some(Arc::new(custom));
        self
    }

    pub fn system(&self) -> &System {
        &self.system
    }

    /// Convert RA/Dec rows of the system's data table to Sep/PA.
    pub fn convert_data_table_radec2seppa(&mut self) {
        self.system.convert_data_table_radec2seppa();
        self.refresh();
    }

    fn refresh(&mut self) {
        self.data = self.system.data();
        self.errors = self.system.errors();
        self.seppa = self.system.seppa();
    }

    /// Summed log likelihood of every column of a `(n_params, M)` batch.
    pub fn log_likelihood(&self, params: ArrayView2<f64>) -> Array1<f64> {
        let model = self.system.compute_model(params);
        let lnlikes = (self.lnlike)(
            self.data.view(),
            self.errors.view(),
            model.view(),
            &self.seppa,
        );
        let mut total = nansum_per_orbit(lnlikes.view());
        if let Some(custom) = &self.custom_lnlike {
            total += &custom(params);
        }
        total
    }
}
