use ndarray::{Array1, Array2, ArrayView2};
use thiserror::Error;

use crate::lnlike::Likelihood;

#[derive(Error, Debug)]
pub enum OrbitError {
    #[error("Total orbits ({total_orbits}) must be greater than the number of walkers ({num_walkers})")]
    TooFewOrbits {
        total_orbits: usize,
        num_walkers: usize,
    },

    #[error("Invalid value provided for temp: {temp}. Must be integer in [0, {num_temps})")]
    InvalidTemperature { temp: usize, num_temps: usize },

    #[error("Invalid param name: {name}. Valid names are: {}", valid.join(", "))]
    UnknownParameter { name: String, valid: Vec<String> },

    #[error("Parameter {0} is fixed and has no chain")]
    FixedParameter(String),

    #[error("Invalid walker index {walker}. Must be integer in [0, {num_walkers})")]
    InvalidWalker { walker: usize, num_walkers: usize },

    #[error("Invalid parameter column {column}. Must be integer in [0, {num_columns})")]
    InvalidColumn { column: usize, num_columns: usize },

    #[error("Cannot remove {burn} + {trim} steps from a chain of {nsteps} steps")]
    InvalidChop {
        burn: usize,
        trim: usize,
        nsteps: usize,
    },

    #[error("No chain available, run the sampler first")]
    EmptyChain,

    #[error("Invalid sampler settings: {0}")]
    InvalidSettings(String),

    #[error("Invalid system: {0}")]
    InvalidSystem(String),

    #[error("Invalid distribution parameters: {0}")]
    Distribution(String),

    #[error(transparent)]
    Sink(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, OrbitError>;

/// Common interface of the orbit samplers.
///
/// Implementors supply the likelihood they evaluate and the sampling loop;
/// likelihood evaluation itself is shared.
pub trait Sampler {
    /// Shared likelihood of the fit.
    fn likelihood(&self) -> &Likelihood;

    /// Produce at least `total_orbits` posterior samples and return the samples
    /// of this run, `(n_samples, n_params)`. The samples are also handed to
    /// the sampler's results sink.
    fn run_sampler(&mut self, total_orbits: usize) -> Result<Array2<f64>>;

    /// Summed log likelihood of each column of `params` (`(n_params, M)`).
    fn evaluate_log_likelihood(&self, params: ArrayView2<f64>) -> Array1<f64> {
        self.likelihood().log_likelihood(params)
    }
}
