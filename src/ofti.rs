//! Orbits For The Impatient: rejection sampling with scale-and-rotate.
//!
//! Candidate orbits are drawn from the priors and then rescaled in
//! semi-major axis and rotated in the longitude of the ascending node so they
//! reproduce the observation with the smallest separation error (the anchor
//! epoch) up to a Gaussian draw from its uncertainty. The mean anomaly at the
//! anchor epoch is preserved, so only the remaining observations decide
//! acceptance.

use itertools::Itertools;
use ndarray::{array, s, Array1, Array2, ArrayView2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use tracing::{debug, info};

use crate::lnlike::Likelihood;
use crate::orbit::{calc_orbit_grid, period_days, radec_to_seppa, OrbitBatch, DPI, NUM_ELEMENTS};
use crate::results::{Results, ResultsSink};
use crate::sampler::{OrbitError, Result, Sampler};

#[derive(Debug, Clone, Copy)]
pub struct OftiSettings {
    /// Number of candidate orbits prepared per rejection round.
    pub batch_size: usize,
    /// Seed of the sampler's random number generator.
    pub seed: u64,
}

impl Default for OftiSettings {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            seed: 0,
        }
    }
}

/// The observation every candidate is scaled and rotated onto.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    index: usize,
    epoch: f64,
    sep: f64,
    sep_err: f64,
    pa: f64,
    pa_err: f64,
}

pub struct Ofti<S: ResultsSink = Results> {
    likelihood: Likelihood,
    settings: OftiSettings,
    anchor: Anchor,
    rng: ChaCha8Rng,
    results: S,
}

impl Ofti<Results> {
    /// Create a sampler that collects its samples in memory.
    pub fn new(likelihood: Likelihood, settings: OftiSettings) -> Result<Self> {
        let tau_ref_epoch = likelihood.system().tau_ref_epoch();
        Self::with_results(likelihood, settings, Results::new("OFTI", tau_ref_epoch))
    }
}

impl<S: ResultsSink> Ofti<S> {
    /// Create a sampler that hands accepted orbits to `results`.
    ///
    /// RA/Dec rows of the system's data table are converted to separation and
    /// position angle.
    pub fn with_results(
        mut likelihood: Likelihood,
        settings: OftiSettings,
        results: S,
    ) -> Result<Self> {
        if settings.batch_size == 0 {
            return Err(OrbitError::InvalidSettings(
                "batch_size must be positive".into(),
            ));
        }
        likelihood.convert_data_table_radec2seppa();

        let system = likelihood.system();
        let table = system.data_table();
        let index = table
            .iter()
            .position_min_by(|a, b| a.quant1_err.total_cmp(&b.quant1_err))
            .ok_or_else(|| OrbitError::InvalidSystem("the data table is empty".into()))?;
        let obs = table[index];
        let anchor = Anchor {
            index,
            epoch: obs.epoch - system.tau_ref_epoch(),
            sep: obs.quant1,
            sep_err: obs.quant1_err,
            pa: obs.quant2,
            pa_err: obs.quant2_err,
        };

        Ok(Self {
            likelihood,
            rng: ChaCha8Rng::seed_from_u64(settings.seed),
            settings,
            anchor,
            results,
        })
    }

    pub fn results(&self) -> &S {
        &self.results
    }

    pub fn into_results(self) -> S {
        self.results
    }

    /// Row of the data table used for scale-and-rotate.
    pub fn anchor_index(&self) -> usize {
        self.anchor.index
    }

    /// Draw `num_samples` candidates from the priors and scale and rotate them
    /// onto the anchor observation. Returns `(NUM_ELEMENTS, n)` with
    /// `n <= num_samples`, see [`Ofti::scale_and_rotate`].
    pub fn prepare_samples(&mut self, num_samples: usize) -> Result<Array2<f64>> {
        let system = self.likelihood.system();
        let mut samples = Array2::zeros((NUM_ELEMENTS, num_samples));
        for (mut row, prior) in samples.outer_iter_mut().zip(system.sys_priors()) {
            row.assign(&prior.draw_samples(num_samples, &mut self.rng));
        }
        self.scale_and_rotate(samples)
    }

    /// Rescale semi-major axis and rotate the ascending node of each
    /// `(NUM_ELEMENTS, n)` candidate so it passes through the anchor
    /// observation perturbed by its uncertainty. `tau` is shifted so the mean
    /// anomaly at the anchor epoch stays the same.
    ///
    /// Candidates whose perturbed separation is not positive have no valid
    /// semi-major axis and are dropped.
    pub fn scale_and_rotate(&mut self, mut samples: Array2<f64>) -> Result<Array2<f64>> {
        let system = self.likelihood.system();
        let anchor = self.anchor;
        let num_samples = samples.ncols();
        let proj = calc_orbit_grid(
            array![[anchor.epoch]].view(),
            &OrbitBatch::from_params(samples.view()),
            system.body_mass(),
            system.solver(),
        );

        let sep_offset = Normal::new(0.0, anchor.sep_err)
            .map_err(|err| OrbitError::Distribution(format!("separation offsets: {err}")))?;
        let pa_offset = Normal::new(0.0, anchor.pa_err)
            .map_err(|err| OrbitError::Distribution(format!("position angle offsets: {err}")))?;

        let mut valid = Vec::with_capacity(num_samples);
        for i in 0..num_samples {
            let sma = samples[[0, i]];
            let tau = samples[[5, i]];
            let mtot = samples[[7, i]];

            let meananno = anchor.epoch / period_days(sma, mtot) - tau;
            let (sep, pa) = radec_to_seppa(proj.raoff[[i, 0]], proj.deoff[[i, 0]]);

            let sep_target = anchor.sep + sep_offset.sample(&mut self.rng);
            let pa_target = anchor.pa + pa_offset.sample(&mut self.rng);

            let sma = sma * sep_target / sep;
            if !(sma > 0.0 && sma.is_finite()) {
                continue;
            }
            let pan = (samples[[4, i]] + (pa_target - pa).to_radians()).rem_euclid(DPI);
            let tau = (anchor.epoch / period_days(sma, mtot) - meananno).rem_euclid(1.0);

            samples[[0, i]] = sma;
            samples[[4, i]] = pan;
            samples[[5, i]] = tau;
            valid.push(i);
        }

        if valid.len() < num_samples {
            debug!(
                dropped = num_samples - valid.len(),
                "candidates with a non-positive separation at the anchor"
            );
            samples = samples.select(Axis(1), &valid);
        }
        Ok(samples)
    }

    /// Accept each candidate when its log likelihood exceeds the log of a
    /// uniform draw.
    ///
    /// This treats `exp(lnlike)` as an acceptance probability, which holds for
    /// likelihoods without a normalization constant such as
    /// [`crate::lnlike::chi2_lnlike`]. Orbits without a positive semi-major
    /// axis are never accepted. Returns the accepted orbits
    /// `(n_accepted, NUM_ELEMENTS)` and their log likelihoods.
    pub fn reject(&mut self, samples: ArrayView2<f64>) -> (Array2<f64>, Array1<f64>) {
        let lnlikes = self.likelihood.log_likelihood(samples);
        let accepted: Vec<usize> = lnlikes
            .iter()
            .enumerate()
            .filter(|&(idx, &lnlike)| {
                samples[[0, idx]] > 0.0 && lnlike > self.rng.random::<f64>().ln()
            })
            .map(|(idx, _)| idx)
            .collect();
        (
            samples.select(Axis(1), &accepted).reversed_axes(),
            lnlikes.select(Axis(0), &accepted),
        )
    }

    /// Prepare and reject batches of `batch_size` candidates until exactly
    /// `total_orbits` orbits are accepted. The orbits, `(total_orbits,
    /// NUM_ELEMENTS)`, are also added to the results.
    pub fn run(&mut self, total_orbits: usize, batch_size: usize) -> Result<Array2<f64>> {
        if batch_size == 0 {
            return Err(OrbitError::InvalidSettings(
                "batch_size must be positive".into(),
            ));
        }
        let mut output_orbits = Array2::zeros((total_orbits, NUM_ELEMENTS));
        let mut output_lnlikes = Array1::zeros(total_orbits);
        let mut n_saved = 0;
        let mut n_tried = 0;

        while n_saved < total_orbits {
            let samples = self.prepare_samples(batch_size)?;
            let (accepted, lnlikes) = self.reject(samples.view());
            n_tried += batch_size;

            let n_keep = accepted.nrows().min(total_orbits - n_saved);
            if n_keep == 0 {
                continue;
            }
            output_orbits
                .slice_mut(s![n_saved..n_saved + n_keep, ..])
                .assign(&accepted.slice(s![..n_keep, ..]));
            output_lnlikes
                .slice_mut(s![n_saved..n_saved + n_keep])
                .assign(&lnlikes.slice(s![..n_keep]));
            n_saved += n_keep;

            debug!(found = n_saved, total = total_orbits, "orbits found");
        }

        info!(
            total = total_orbits,
            candidates = n_tried,
            "Rejection sampling complete"
        );
        self.results
            .add_samples(output_orbits.view(), output_lnlikes.view())?;
        Ok(output_orbits)
    }
}

impl<S: ResultsSink> Sampler for Ofti<S> {
    fn likelihood(&self) -> &Likelihood {
        &self.likelihood
    }

    fn run_sampler(&mut self, total_orbits: usize) -> Result<Array2<f64>> {
        self.run(total_orbits, self.settings.batch_size)
    }
}
