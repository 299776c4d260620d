//! Bayesian fits of Keplerian orbits to sparse relative astrometry.
//!
//! A [`System`] holds the observations and the priors of the eight orbital
//! elements. Two samplers turn its [`Likelihood`] into posterior samples:
//! [`Ofti`], a rejection sampler that scales and rotates prior draws onto the
//! best measured epoch, and [`Mcmc`], an affine-invariant ensemble sampler
//! with optional parallel tempering.

pub mod chain;
pub mod kepler;
pub mod lnlike;
pub mod mcmc;
pub mod ofti;
pub mod orbit;
pub mod priors;
pub mod results;
pub(crate) mod sampler;
pub mod system;

pub use chain::ChainState;
pub use kepler::{ecc_anom, KeplerSolver};
pub use lnlike::{chi2_lnlike, CustomLnLike, Likelihood, LnLikeFn};
pub use mcmc::{ChainSelection, Mcmc, McmcSettings, ParamLayout};
pub use ofti::{Ofti, OftiSettings};
pub use orbit::{calc_orbit, calc_orbit_grid, radec_to_seppa, OrbitBatch, OrbitElements, Projection};
pub use priors::{
    all_lnpriors, GaussianPrior, LinearPrior, LogUniformPrior, Prior, PriorDistribution, SinPrior,
    UniformPrior,
};
pub use results::{ArrowResults, Results, ResultsSink};
pub use sampler::{OrbitError, Result, Sampler};
pub use system::{Observation, QuantType, System, PARAM_NAMES};
