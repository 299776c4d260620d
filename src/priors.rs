use std::{f64::consts::PI, fmt::Debug, sync::Arc};

use ndarray::{Array1, ArrayView1};
use rand::{Rng, RngCore};
use rand_distr::{Distribution, Normal, Uniform};

use crate::sampler::{OrbitError, Result};

/// A distribution that parameters can be drawn from and scored against.
pub trait PriorDistribution: Debug + Send + Sync {
    /// Draw `num_samples` independent values.
    fn draw_samples(&self, num_samples: usize, rng: &mut dyn RngCore) -> Array1<f64>;

    /// Log probability density at `value`, `-inf` outside the support.
    fn compute_lnprob(&self, value: f64) -> f64;
}

/// Prior of one orbital parameter.
///
/// Fixed parameters are not sampled. Samplers strip them from the sampled
/// parameter vector and put them back before the model is evaluated.
#[derive(Debug, Clone)]
pub enum Prior {
    Fixed(f64),
    Distribution(Arc<dyn PriorDistribution>),
}

impl Prior {
    pub fn new<P: PriorDistribution + 'static>(prior: P) -> Self {
        Prior::Distribution(Arc::new(prior))
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self, Prior::Fixed(_))
    }

    /// Draw from the distribution, or repeat the fixed value.
    pub fn draw_samples(&self, num_samples: usize, rng: &mut dyn RngCore) -> Array1<f64> {
        match self {
            Prior::Fixed(value) => Array1::from_elem(num_samples, *value),
            Prior::Distribution(prior) => prior.draw_samples(num_samples, rng),
        }
    }
}

impl From<f64> for Prior {
    fn from(value: f64) -> Self {
        Prior::Fixed(value)
    }
}

/// Sum of the log prior densities of one parameter vector.
///
/// `params` and `priors` are paired by position.
pub fn all_lnpriors(params: ArrayView1<f64>, priors: &[Arc<dyn PriorDistribution>]) -> f64 {
    debug_assert_eq!(params.len(), priors.len());
    let mut logp = 0.0;
    for (&value, prior) in params.iter().zip(priors) {
        logp += prior.compute_lnprob(value);
        if logp == f64::NEG_INFINITY {
            break;
        }
    }
    logp
}

fn sample_n<D: Distribution<f64>>(
    dist: &D,
    num_samples: usize,
    rng: &mut dyn RngCore,
) -> Array1<f64> {
    Array1::from_shape_fn(num_samples, |_| dist.sample(&mut *rng))
}

/// Uniform density on `[min, max)`.
#[derive(Debug, Clone)]
pub struct UniformPrior {
    min: f64,
    max: f64,
    dist: Uniform<f64>,
}

impl UniformPrior {
    pub fn new(min: f64, max: f64) -> Result<Self> {
        let dist = Uniform::new(min, max).map_err(|err| {
            OrbitError::Distribution(format!("uniform prior on [{min}, {max}): {err}"))
        })?;
        Ok(Self { min, max, dist })
    }
}

impl PriorDistribution for UniformPrior {
    fn draw_samples(&self, num_samples: usize, rng: &mut dyn RngCore) -> Array1<f64> {
        sample_n(&self.dist, num_samples, rng)
    }

    fn compute_lnprob(&self, value: f64) -> f64 {
        if value >= self.min && value < self.max {
            -(self.max - self.min).ln()
        } else {
            f64::NEG_INFINITY
        }
    }
}

/// Density proportional to `1/x` on `[min, max)` (Jeffreys prior).
#[derive(Debug, Clone)]
pub struct LogUniformPrior {
    min: f64,
    max: f64,
    log_norm: f64,
    dist: Uniform<f64>,
}

impl LogUniformPrior {
    pub fn new(min: f64, max: f64) -> Result<Self> {
        if !(min > 0.0) {
            return Err(OrbitError::Distribution(format!(
                "log-uniform prior needs a positive lower bound, got {min}"
            )));
        }
        let dist = Uniform::new(min.ln(), max.ln()).map_err(|err| {
            OrbitError::Distribution(format!("log-uniform prior on [{min}, {max}): {err}"))
        })?;
        Ok(Self {
            min,
            max,
            log_norm: (max / min).ln().ln(),
            dist,
        })
    }
}

impl PriorDistribution for LogUniformPrior {
    fn draw_samples(&self, num_samples: usize, rng: &mut dyn RngCore) -> Array1<f64> {
        sample_n(&self.dist, num_samples, rng).mapv_into(f64::exp)
    }

    fn compute_lnprob(&self, value: f64) -> f64 {
        if value >= self.min && value < self.max {
            -value.ln() - self.log_norm
        } else {
            f64::NEG_INFINITY
        }
    }
}

/// Normal density, optionally truncated to non-negative values.
#[derive(Debug, Clone)]
pub struct GaussianPrior {
    mu: f64,
    sigma: f64,
    no_negatives: bool,
    dist: Normal<f64>,
}

impl GaussianPrior {
    pub fn new(mu: f64, sigma: f64, no_negatives: bool) -> Result<Self> {
        if !(sigma > 0.0) {
            return Err(OrbitError::Distribution(format!(
                "gaussian prior needs a positive width, got {sigma}"
            )));
        }
        let dist = Normal::new(mu, sigma)
            .map_err(|err| OrbitError::Distribution(format!("gaussian prior: {err}")))?;
        Ok(Self {
            mu,
            sigma,
            no_negatives,
            dist,
        })
    }
}

impl PriorDistribution for GaussianPrior {
    fn draw_samples(&self, num_samples: usize, rng: &mut dyn RngCore) -> Array1<f64> {
        Array1::from_shape_fn(num_samples, |_| loop {
            let value = self.dist.sample(&mut *rng);
            if !self.no_negatives || value >= 0.0 {
                break value;
            }
        })
    }

    fn compute_lnprob(&self, value: f64) -> f64 {
        if self.no_negatives && value < 0.0 {
            return f64::NEG_INFINITY;
        }
        let z = (value - self.mu) / self.sigma;
        -0.5 * z * z - ((2.0 * PI).sqrt() * self.sigma).ln()
    }
}

/// Density proportional to `sin(x)` on `(0, π)`: isotropic inclinations.
#[derive(Debug, Clone, Copy, Default)]
pub struct SinPrior;

impl PriorDistribution for SinPrior {
    fn draw_samples(&self, num_samples: usize, rng: &mut dyn RngCore) -> Array1<f64> {
        Array1::from_shape_fn(num_samples, |_| {
            let cos_inc: f64 = rng.random_range(-1.0..1.0);
            cos_inc.acos()
        })
    }

    fn compute_lnprob(&self, value: f64) -> f64 {
        if value > 0.0 && value < PI {
            (value.sin() / 2.0).ln()
        } else {
            f64::NEG_INFINITY
        }
    }
}

/// Density `m x + b` on `[0, -b/m]`, normalized. Requires `m < 0 < b`.
#[derive(Debug, Clone, Copy)]
pub struct LinearPrior {
    m: f64,
    b: f64,
    norm: f64,
}

impl LinearPrior {
    pub fn new(m: f64, b: f64) -> Result<Self> {
        if !(m < 0.0 && b > 0.0) {
            return Err(OrbitError::Distribution(format!(
                "linear prior needs a negative slope and positive intercept, got m={m}, b={b}"
            )));
        }
        Ok(Self {
            m,
            b,
            norm: -b * b / (2.0 * m),
        })
    }
}

impl PriorDistribution for LinearPrior {
    fn draw_samples(&self, num_samples: usize, rng: &mut dyn RngCore) -> Array1<f64> {
        Array1::from_shape_fn(num_samples, |_| {
            let u: f64 = rng.random();
            let disc = (self.b * self.b + 2.0 * self.m * u * self.norm).max(0.0);
            (-self.b + disc.sqrt()) / self.m
        })
    }

    fn compute_lnprob(&self, value: f64) -> f64 {
        let density = self.m * value + self.b;
        if value >= 0.0 && density > 0.0 {
            density.ln() - self.norm.ln()
        } else {
            f64::NEG_INFINITY
        }
    }
}
