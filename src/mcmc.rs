//! Affine-invariant ensemble sampling with optional parallel tempering.
//!
//! Walkers move with the stretch move of Goodman & Weare (2010). With more
//! than one temperature, each temperature runs its own ensemble on the
//! tempered posterior `beta * lnlike + lnprior` and adjacent temperatures
//! exchange walkers after every sweep. Only the lowest temperature
//! (`beta = 1`) samples the posterior.
//!
//! Fixed parameters never enter the sampled space. They are put back at their
//! original positions before the likelihood is evaluated and in the
//! posterior handed to the results.

use std::ops::Range;
use std::sync::Arc;

use ndarray::{s, Array1, Array2, Array3, Array4, ArrayView1, ArrayView2, ArrayView3, Axis};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info};

use crate::chain::{flatten_steps, ChainState};
use crate::lnlike::Likelihood;
use crate::priors::{all_lnpriors, Prior, PriorDistribution};
use crate::results::{Results, ResultsSink};
use crate::sampler::{OrbitError, Result, Sampler};
use crate::system::PARAM_NAMES;

#[derive(Debug, Clone)]
pub struct McmcSettings {
    /// Number of temperatures. Values above one enable parallel tempering.
    pub num_temps: usize,
    /// Walkers per temperature. Must be even and at least 2.
    pub num_walkers: usize,
    /// Worker threads for likelihood evaluation.
    pub num_threads: usize,
    /// Scale `a` of the stretch move proposal, `z` in `[1/a, a]`.
    pub stretch_scale: f64,
    /// Ratio between adjacent temperatures. The default depends on the
    /// number of free parameters.
    pub temperature_step: Option<f64>,
    pub seed: u64,
}

impl Default for McmcSettings {
    fn default() -> Self {
        Self {
            num_temps: 20,
            num_walkers: 1000,
            num_threads: 1,
            stretch_scale: 2.0,
            temperature_step: None,
            seed: 0,
        }
    }
}

impl McmcSettings {
    fn validate(&self) -> Result<()> {
        if self.num_walkers < 2 || self.num_walkers % 2 != 0 {
            return Err(OrbitError::InvalidSettings(format!(
                "num_walkers must be even and at least 2, got {}",
                self.num_walkers
            )));
        }
        if self.num_threads == 0 {
            return Err(OrbitError::InvalidSettings(
                "num_threads must be positive".into(),
            ));
        }
        if !(self.stretch_scale > 1.0) {
            return Err(OrbitError::InvalidSettings(format!(
                "stretch_scale must be greater than 1, got {}",
                self.stretch_scale
            )));
        }
        if let Some(step) = self.temperature_step {
            if !(step > 1.0) {
                return Err(OrbitError::InvalidSettings(format!(
                    "temperature_step must be greater than 1, got {step}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Slot {
    Free(usize),
    Fixed(f64),
}

/// Where the sampled (free) parameters and the fixed values go in a full
/// parameter vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamLayout {
    slots: Vec<Slot>,
    num_free: usize,
}

impl ParamLayout {
    /// Split priors into the layout and the distributions of the free
    /// parameters, in order.
    pub fn from_priors(priors: &[Prior]) -> (Self, Vec<Arc<dyn PriorDistribution>>) {
        let mut free = Vec::new();
        let slots = priors
            .iter()
            .map(|prior| match prior {
                Prior::Fixed(value) => Slot::Fixed(*value),
                Prior::Distribution(dist) => {
                    free.push(dist.clone());
                    Slot::Free(free.len() - 1)
                }
            })
            .collect();
        let layout = Self {
            slots,
            num_free: free.len(),
        };
        (layout, free)
    }

    pub fn num_params(&self) -> usize {
        self.slots.len()
    }

    pub fn num_free(&self) -> usize {
        self.num_free
    }

    /// Column of full parameter `index` among the free parameters, `None`
    /// when it is fixed.
    pub fn free_column(&self, index: usize) -> Option<usize> {
        match self.slots.get(index)? {
            Slot::Free(column) => Some(*column),
            Slot::Fixed(_) => None,
        }
    }

    /// Full parameter vector from the free parameters.
    pub fn fill(&self, sampled: ArrayView1<f64>) -> Array1<f64> {
        assert_eq!(sampled.len(), self.num_free);
        self.slots
            .iter()
            .map(|slot| match *slot {
                Slot::Free(column) => sampled[column],
                Slot::Fixed(value) => value,
            })
            .collect()
    }

    /// Full parameters of `(n, num_free)` samples, `(n, num_params)`.
    pub fn fill_batch(&self, sampled: ArrayView2<f64>) -> Array2<f64> {
        assert_eq!(sampled.ncols(), self.num_free);
        Array2::from_shape_fn((sampled.nrows(), self.slots.len()), |(row, col)| {
            match self.slots[col] {
                Slot::Free(column) => sampled[[row, column]],
                Slot::Fixed(value) => value,
            }
        })
    }
}

/// Walker selection for [`Mcmc::examine_chains`].
#[derive(Debug, Clone, Default)]
pub struct ChainSelection {
    /// Parameter names, all free parameters when `None`.
    pub param_list: Option<Vec<String>>,
    pub temp: usize,
    /// Explicit walkers, all walkers when `None`.
    pub walker_list: Option<Vec<usize>>,
    /// Pick this many distinct walkers at random. Takes precedence over
    /// `walker_list`.
    pub n_walkers: Option<usize>,
    /// Steps to return, all steps when `None`.
    pub step_range: Option<Range<usize>>,
}

#[derive(Debug, Clone, Copy)]
struct StretchMove {
    a: f64,
}

impl StretchMove {
    /// Draw from `g(z) ∝ 1/sqrt(z)` on `[1/a, a]`.
    fn sample_z<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let u: f64 = rng.random();
        ((self.a - 1.0) * u + 1.0).powi(2) / self.a
    }
}

/// Walker positions with their cached log likelihoods and log priors.
struct Walkers {
    pos: Array3<f64>,
    lnlike: Array2<f64>,
    lnprior: Array2<f64>,
}

pub struct Mcmc<S: ResultsSink = Results> {
    likelihood: Likelihood,
    settings: McmcSettings,
    num_temps: usize,
    use_pt: bool,
    layout: ParamLayout,
    priors: Vec<Arc<dyn PriorDistribution>>,
    betas: Array1<f64>,
    stretch: StretchMove,
    session: ChainState,
    pool: Option<ThreadPool>,
    rng: ChaCha8Rng,
    results: S,
}

impl Mcmc<Results> {
    pub fn new(likelihood: Likelihood, settings: McmcSettings) -> Result<Self> {
        let tau_ref_epoch = likelihood.system().tau_ref_epoch();
        Self::with_results(likelihood, settings, Results::new("MCMC", tau_ref_epoch))
    }
}

impl<S: ResultsSink> Mcmc<S> {
    /// Create a sampler with every walker at every temperature drawn
    /// independently from the priors.
    pub fn with_results(
        likelihood: Likelihood,
        settings: McmcSettings,
        results: S,
    ) -> Result<Self> {
        settings.validate()?;

        let use_pt = settings.num_temps > 1;
        let num_temps = settings.num_temps.max(1);
        let num_walkers = settings.num_walkers;

        let (layout, priors) = ParamLayout::from_priors(likelihood.system().sys_priors());
        let num_free = layout.num_free();
        if num_free == 0 {
            return Err(OrbitError::InvalidSettings(
                "every parameter is fixed, nothing to sample".into(),
            ));
        }

        let pool = if settings.num_threads > 1 {
            let pool = ThreadPoolBuilder::new()
                .num_threads(settings.num_threads)
                .thread_name(|i| format!("orbit-lnlike-{i}"))
                .build()
                .map_err(|err| OrbitError::InvalidSettings(format!("thread pool: {err}")))?;
            Some(pool)
        } else {
            None
        };

        let mut rng = ChaCha8Rng::seed_from_u64(settings.seed);
        let mut curr_pos = Array3::zeros((num_temps, num_walkers, num_free));
        for (column, prior) in priors.iter().enumerate() {
            let draws = prior.draw_samples(num_temps * num_walkers, &mut rng);
            for (idx, &value) in draws.iter().enumerate() {
                curr_pos[[idx / num_walkers, idx % num_walkers, column]] = value;
            }
        }

        let step = settings
            .temperature_step
            .unwrap_or_else(|| 1.0 + 2.0 * 4f64.ln().sqrt() / (num_free as f64).sqrt());
        let betas = Array1::from_shape_fn(num_temps, |k| step.powi(-(k as i32)));

        debug!(
            num_temps,
            num_walkers,
            num_free,
            fixed = layout.num_params() - num_free,
            "Initialized walkers from the priors"
        );

        Ok(Self {
            session: ChainState::new(curr_pos, use_pt, layout.num_params()),
            stretch: StretchMove {
                a: settings.stretch_scale,
            },
            likelihood,
            settings,
            num_temps,
            use_pt,
            layout,
            priors,
            betas,
            pool,
            rng,
            results,
        })
    }

    pub fn results(&self) -> &S {
        &self.results
    }

    pub fn into_results(self) -> S {
        self.results
    }

    pub fn settings(&self) -> &McmcSettings {
        &self.settings
    }

    /// Chain state of the latest run.
    pub fn session(&self) -> &ChainState {
        &self.session
    }

    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    pub fn num_temps(&self) -> usize {
        self.num_temps
    }

    pub fn use_pt(&self) -> bool {
        self.use_pt
    }

    /// Inverse temperatures, starting at 1.
    pub fn betas(&self) -> ArrayView1<f64> {
        self.betas.view()
    }

    /// Insert the fixed parameters into a vector of free parameters.
    pub fn fill_in_fixed_params(&self, sampled: ArrayView1<f64>) -> Array1<f64> {
        self.layout.fill(sampled)
    }

    /// Insert the fixed parameters into `(n, num_free)` free parameters.
    pub fn fill_in_fixed_params_batch(&self, sampled: ArrayView2<f64>) -> Array2<f64> {
        self.layout.fill_batch(sampled)
    }

    /// Log likelihood and log prior of `(n, num_free)` positions.
    ///
    /// The likelihood is only evaluated where the prior is finite and is
    /// `-inf` elsewhere.
    fn evaluate(&self, positions: ArrayView2<f64>) -> (Array1<f64>, Array1<f64>) {
        let lnprior: Array1<f64> = positions
            .outer_iter()
            .map(|row| all_lnpriors(row, &self.priors))
            .collect();
        let supported: Vec<usize> = lnprior
            .iter()
            .enumerate()
            .filter(|(_, lnp)| lnp.is_finite())
            .map(|(idx, _)| idx)
            .collect();

        let params = self
            .fill_in_fixed_params_batch(positions)
            .select(Axis(0), &supported);
        let values = self.log_likelihood_rows(params.view());

        let mut lnlike = Array1::from_elem(positions.nrows(), f64::NEG_INFINITY);
        for (&idx, &value) in supported.iter().zip(&values) {
            lnlike[idx] = value;
        }
        (lnlike, lnprior)
    }

    /// Log likelihood of `(n, num_params)` full parameter rows, split across
    /// the thread pool when there is one.
    fn log_likelihood_rows(&self, params: ArrayView2<f64>) -> Vec<f64> {
        let Some(pool) = &self.pool else {
            return self.likelihood.log_likelihood(params.t()).to_vec();
        };

        let (n_rows, n_params) = params.dim();
        let flat: Vec<f64> = params.iter().copied().collect();
        let chunk = n_rows.div_ceil(pool.current_num_threads()).max(1);
        let likelihood = &self.likelihood;

        let mut out = vec![0.0; n_rows];
        pool.install(|| {
            out.par_chunks_mut(chunk)
                .zip(flat.par_chunks(chunk * n_params))
                .for_each(|(out, rows)| {
                    let rows = Array2::from_shape_fn((out.len(), n_params), |(row, col)| {
                        rows[row * n_params + col]
                    });
                    let values = likelihood.log_likelihood(rows.t());
                    for (out, value) in out.iter_mut().zip(values.iter()) {
                        *out = *value;
                    }
                });
        });
        out
    }

    fn current_walkers(&self) -> Walkers {
        let pos = self.session.curr_pos().to_owned();
        let (num_temps, num_walkers, num_free) = pos.dim();
        let flat = Array2::from_shape_fn((num_temps * num_walkers, num_free), |(row, col)| {
            pos[[row / num_walkers, row % num_walkers, col]]
        });
        let (lnlike, lnprior) = self.evaluate(flat.view());
        let shape = (num_temps, num_walkers);
        Walkers {
            lnlike: Array2::from_shape_fn(shape, |(t, w)| lnlike[t * num_walkers + w]),
            lnprior: Array2::from_shape_fn(shape, |(t, w)| lnprior[t * num_walkers + w]),
            pos,
        }
    }

    /// One stretch-move update of every walker at every temperature,
    /// followed by temperature swaps.
    fn sweep(&mut self, walkers: &mut Walkers) {
        let (num_temps, num_walkers, num_free) = walkers.pos.dim();
        let half = num_walkers / 2;

        for (active, complement) in [(0..half, half..num_walkers), (half..num_walkers, 0..half)] {
            let n_active = active.len();
            let mut proposals = Array2::zeros((num_temps * n_active, num_free));
            let mut zs = Vec::with_capacity(num_temps * n_active);
            for temp in 0..num_temps {
                for (k, walker) in active.clone().enumerate() {
                    let z = self.stretch.sample_z(&mut self.rng);
                    let partner = self.rng.random_range(complement.clone());
                    let current = walkers.pos.slice(s![temp, walker, ..]);
                    let other = walkers.pos.slice(s![temp, partner, ..]);
                    proposals
                        .row_mut(temp * n_active + k)
                        .assign(&(&other + &((&current - &other) * z)));
                    zs.push(z);
                }
            }

            let (lnlike, lnprior) = self.evaluate(proposals.view());

            for temp in 0..num_temps {
                let beta = self.betas[temp];
                let mut accepted = 0;
                for (k, walker) in active.clone().enumerate() {
                    let idx = temp * n_active + k;
                    let new = beta * lnlike[idx] + lnprior[idx];
                    if !new.is_finite() {
                        continue;
                    }
                    let old =
                        beta * walkers.lnlike[[temp, walker]] + walkers.lnprior[[temp, walker]];
                    let log_ratio = (num_free as f64 - 1.0) * zs[idx].ln() + new - old;
                    if self.rng.random::<f64>().ln() < log_ratio {
                        walkers
                            .pos
                            .slice_mut(s![temp, walker, ..])
                            .assign(&proposals.row(idx));
                        walkers.lnlike[[temp, walker]] = lnlike[idx];
                        walkers.lnprior[[temp, walker]] = lnprior[idx];
                        accepted += 1;
                    }
                }
                self.session.record_moves(temp, accepted);
            }
        }
        self.session.record_sweep();

        if self.use_pt {
            self.swap_temperatures(walkers);
        }
    }

    /// Propose exchanges between randomly paired walkers of adjacent
    /// temperatures, hottest pair first.
    fn swap_temperatures(&mut self, walkers: &mut Walkers) {
        let num_walkers = walkers.pos.len_of(Axis(1));
        for temp in (1..self.num_temps).rev() {
            let dbeta = self.betas[temp - 1] - self.betas[temp];
            let mut hot: Vec<usize> = (0..num_walkers).collect();
            let mut cold: Vec<usize> = (0..num_walkers).collect();
            hot.shuffle(&mut self.rng);
            cold.shuffle(&mut self.rng);

            let mut accepted = 0;
            for (&i, &j) in hot.iter().zip(&cold) {
                let log_accept =
                    dbeta * (walkers.lnlike[[temp, i]] - walkers.lnlike[[temp - 1, j]]);
                if self.rng.random::<f64>().ln() < log_accept {
                    swap_walker(walkers, (temp, i), (temp - 1, j));
                    accepted += 1;
                }
            }
            self.session.record_swaps(temp, accepted);
        }
        self.session.record_swap_sweep();
    }

    /// Run `burn_steps` discarded sweeps, then `ceil(total_orbits /
    /// num_walkers)` sweeps of which every `thin`-th is stored.
    ///
    /// The walkers continue from where the previous call stopped. The stored
    /// chain of the session is replaced by the steps of this call. The lowest temperature
    /// posterior of this call, `(num_walkers * stored_steps, num_params)`, is
    /// returned and added to the results.
    pub fn run(
        &mut self,
        total_orbits: usize,
        burn_steps: usize,
        thin: usize,
    ) -> Result<Array2<f64>> {
        let num_walkers = self.settings.num_walkers;
        if total_orbits <= num_walkers {
            return Err(OrbitError::TooFewOrbits {
                total_orbits,
                num_walkers,
            });
        }
        if thin == 0 {
            return Err(OrbitError::InvalidSettings("thin must be positive".into()));
        }
        let nsteps = total_orbits.div_ceil(num_walkers);
        if thin > nsteps {
            return Err(OrbitError::InvalidSettings(format!(
                "thin ({thin}) is larger than the {nsteps} steps of this run"
            )));
        }

        let mut walkers = self.current_walkers();
        for _ in 0..burn_steps {
            self.sweep(&mut walkers);
        }
        self.session.set_curr_pos(walkers.pos.clone());
        self.session.reset();
        info!(burn_steps, "Burn in complete");

        let stored = nsteps / thin;
        let num_free = self.layout.num_free();
        let mut chain = Array4::zeros((self.num_temps, num_walkers, stored, num_free));
        let mut lnlikes = Array3::zeros((self.num_temps, num_walkers, stored));

        let mut slot = 0;
        for step in 1..=nsteps {
            self.sweep(&mut walkers);
            if step % thin == 0 {
                chain.slice_mut(s![.., .., slot, ..]).assign(&walkers.pos);
                lnlikes.slice_mut(s![.., .., slot]).assign(&walkers.lnlike);
                slot += 1;
            }
            if step % 5 == 0 {
                debug!(step, nsteps, "steps completed");
            }
        }
        self.session.set_curr_pos(walkers.pos);

        let post = self.fill_post(chain.index_axis(Axis(0), 0));
        let flat_post = flatten_steps(post.view());
        let flat_lnlikes: Array1<f64> = lnlikes.index_axis(Axis(0), 0).iter().copied().collect();
        self.session.store(chain, lnlikes, post);

        self.results
            .add_samples(flat_post.view(), flat_lnlikes.view())?;

        info!(
            nsteps,
            stored,
            acceptance = self.session.acceptance_fraction()[0],
            "Run complete"
        );
        Ok(flat_post)
    }

    /// `(walkers, steps, num_free)` to `(walkers, steps, num_params)`.
    fn fill_post(&self, chain: ArrayView3<f64>) -> Array3<f64> {
        let (num_walkers, nsteps, _) = chain.dim();
        let mut post = Array3::zeros((num_walkers, nsteps, self.layout.num_params()));
        for (mut out, walker) in post.outer_iter_mut().zip(chain.outer_iter()) {
            out.assign(&self.fill_in_fixed_params_batch(walker));
        }
        post
    }

    /// Permanently drop the first `burn` and last `trim` stored steps and
    /// replace the results with the remaining posterior.
    pub fn chop_chains(&mut self, burn: usize, trim: usize) -> Result<()> {
        self.session.chop(burn, trim)?;
        self.results.clear()?;
        self.results
            .add_samples(self.session.post().view(), self.session.lnlikes().view())?;
        info!(
            burn,
            trim,
            nsteps = self.session.nsteps(),
            "Chains chopped"
        );
        Ok(())
    }

    /// Walker trajectories of the selected parameters, one `(walkers, steps)`
    /// array per parameter.
    pub fn examine_chains(&mut self, selection: &ChainSelection) -> Result<Vec<Array2<f64>>> {
        if self.session.nsteps() == 0 {
            return Err(OrbitError::EmptyChain);
        }
        if selection.temp >= self.num_temps {
            return Err(OrbitError::InvalidTemperature {
                temp: selection.temp,
                num_temps: self.num_temps,
            });
        }

        let num_walkers = self.settings.num_walkers;
        let walkers = match (&selection.n_walkers, &selection.walker_list) {
            (Some(n), _) => {
                if *n > num_walkers {
                    return Err(OrbitError::InvalidSettings(format!(
                        "cannot select {n} of {num_walkers} walkers"
                    )));
                }
                rand::seq::index::sample(&mut self.rng, num_walkers, *n).into_vec()
            }
            (None, Some(list)) => list.clone(),
            (None, None) => (0..num_walkers).collect(),
        };

        let columns = match &selection.param_list {
            None => (0..self.layout.num_free()).collect(),
            Some(names) => names
                .iter()
                .map(|name| self.free_column_of(name))
                .collect::<Result<Vec<_>>>()?,
        };

        columns
            .into_iter()
            .map(|column| {
                self.session.walker_trajectories(
                    selection.temp,
                    column,
                    &walkers,
                    selection.step_range.clone(),
                )
            })
            .collect()
    }

    fn free_column_of(&self, name: &str) -> Result<usize> {
        let index = *self
            .likelihood
            .system()
            .param_idx()
            .get(name)
            .ok_or_else(|| OrbitError::UnknownParameter {
                name: name.to_string(),
                valid: PARAM_NAMES.iter().map(|name| name.to_string()).collect(),
            })?;
        self.layout
            .free_column(index)
            .ok_or_else(|| OrbitError::FixedParameter(name.to_string()))
    }
}

fn swap_walker(walkers: &mut Walkers, a: (usize, usize), b: (usize, usize)) {
    let num_free = walkers.pos.len_of(Axis(2));
    for k in 0..num_free {
        walkers.pos.swap([a.0, a.1, k], [b.0, b.1, k]);
    }
    walkers.lnlike.swap([a.0, a.1], [b.0, b.1]);
    walkers.lnprior.swap([a.0, a.1], [b.0, b.1]);
}

impl<S: ResultsSink> Sampler for Mcmc<S> {
    fn likelihood(&self) -> &Likelihood {
        &self.likelihood
    }

    fn run_sampler(&mut self, total_orbits: usize) -> Result<Array2<f64>> {
        self.run(total_orbits, 0, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use crate::system::{Observation, System};

    fn likelihood() -> Likelihood {
        let data = vec![
            Observation::radec(55_000.0, 0.25, 0.02, 0.31, 0.02),
            Observation::radec(55_600.0, 0.18, 0.02, 0.36, 0.02),
            Observation::seppa(56_200.0, 0.41, 0.03, 20.0, 2.0),
        ];
        let system = System::with_default_priors(data, 55_000.0, 1.1, 40.0, 0.0, 0.0).unwrap();
        Likelihood::new(system)
    }

    fn settings(num_temps: usize, num_walkers: usize) -> McmcSettings {
        McmcSettings {
            num_temps,
            num_walkers,
            seed: 11,
            ..McmcSettings::default()
        }
    }

    fn layout(fixed: &[Option<f64>]) -> ParamLayout {
        let priors: Vec<Prior> = fixed
            .iter()
            .map(|value| match value {
                Some(value) => Prior::Fixed(*value),
                None => Prior::new(crate::priors::UniformPrior::new(0.0, 1.0).unwrap()),
            })
            .collect();
        ParamLayout::from_priors(&priors).0
    }

    proptest! {
        #[test]
        fn fixed_params_return_to_their_index(
            fixed in prop::collection::vec(prop::option::of(-10.0f64..10.0), 1..12),
            rows in 1usize..5,
        ) {
            let layout = layout(&fixed);
            let num_free = fixed.iter().filter(|value| value.is_none()).count();
            prop_assert_eq!(layout.num_free(), num_free);

            let sampled = Array2::from_shape_fn((rows, num_free), |(r, c)| (100 * r + c) as f64 + 0.5);
            let full = layout.fill_batch(sampled.view());
            prop_assert_eq!(full.dim(), (rows, fixed.len()));

            for r in 0..rows {
                let single = layout.fill(sampled.row(r));
                prop_assert_eq!(single.len(), fixed.len());
                let mut free = 0;
                for (index, value) in fixed.iter().enumerate() {
                    let expected = match value {
                        Some(value) => *value,
                        None => {
                            free += 1;
                            sampled[[r, free - 1]]
                        }
                    };
                    prop_assert_eq!(single[index], expected);
                    prop_assert_eq!(full[[r, index]], expected);
                }
            }
        }
    }

    #[test]
    fn layout_maps_free_columns() {
        let layout = layout(&[None, Some(3.0), None, Some(4.0)]);
        assert_eq!(layout.free_column(0), Some(0));
        assert_eq!(layout.free_column(1), None);
        assert_eq!(layout.free_column(2), Some(1));
        assert_eq!(layout.free_column(9), None);
    }

    #[test]
    fn rejects_invalid_settings() {
        for settings in [
            settings(2, 3),
            settings(2, 0),
            McmcSettings {
                stretch_scale: 1.0,
                ..settings(1, 4)
            },
            McmcSettings {
                num_threads: 0,
                ..settings(1, 4)
            },
            McmcSettings {
                temperature_step: Some(0.5),
                ..settings(2, 4)
            },
        ] {
            assert!(matches!(
                Mcmc::new(likelihood(), settings),
                Err(OrbitError::InvalidSettings(_))
            ));
        }
    }

    #[test]
    fn too_few_orbits() {
        let mut mcmc = Mcmc::new(likelihood(), settings(2, 10)).unwrap();
        assert!(matches!(
            mcmc.run(10, 0, 1),
            Err(OrbitError::TooFewOrbits {
                total_orbits: 10,
                num_walkers: 10
            })
        ));
        assert_eq!(mcmc.session().nsteps(), 0);
    }

    #[test]
    fn beta_ladder() {
        let mcmc = Mcmc::new(
            likelihood(),
            McmcSettings {
                temperature_step: Some(2.0),
                ..settings(4, 4)
            },
        )
        .unwrap();
        assert_eq!(mcmc.betas().to_vec(), vec![1.0, 0.5, 0.25, 0.125]);

        let ensemble = Mcmc::new(likelihood(), settings(1, 4)).unwrap();
        assert!(!ensemble.use_pt());
        assert_eq!(ensemble.betas().to_vec(), vec![1.0]);
    }

    #[test]
    fn tempered_run_shapes() {
        let mut mcmc = Mcmc::new(likelihood(), settings(3, 10)).unwrap();
        let post = mcmc.run(45, 2, 1).unwrap();

        let session = mcmc.session();
        assert_eq!(post.dim(), (50, 8));
        assert_eq!(session.chain().dim(), (3, 10, 5, 6));
        assert_eq!(session.lnlikes().len(), 50);
        assert_eq!(session.lnlikes_alltemps().unwrap().dim(), (3, 10, 5));
        assert_eq!(session.post(), post);
        assert_eq!(mcmc.results().len(), 50);

        // Fixed parallax and mass come back at their indices.
        assert!(post.column(6).iter().all(|&plx| plx == 40.0));
        assert!(post.column(7).iter().all(|&mtot| mtot == 1.1));
        assert!(mcmc.results().lnlike.iter().all(|lnlike| lnlike.is_finite()));

        let last = session.chain().slice(s![.., .., 4, ..]).to_owned();
        assert_eq!(session.curr_pos().to_owned(), last);
    }

    #[test]
    fn runs_resume_from_last_positions() {
        let mut mcmc = Mcmc::new(likelihood(), settings(1, 8)).unwrap();
        mcmc.run(40, 0, 1).unwrap();
        assert_eq!(mcmc.session().nsteps(), 5);
        let first = mcmc.session().chain().to_owned();
        let last_pos = mcmc.session().curr_pos().to_owned();
        assert_eq!(
            first.slice(s![0, .., 4, ..]),
            last_pos.index_axis(Axis(0), 0)
        );

        let second = mcmc.run(24, 0, 1).unwrap();
        assert_eq!(second.nrows(), 24);
        assert_eq!(mcmc.session().nsteps(), 3);
        assert!(mcmc.session().lnlikes_alltemps().is_none());
        assert_eq!(mcmc.results().len(), 64);
        assert_eq!(mcmc.session().post(), second);
    }

    #[test]
    fn thinning_stores_every_kth_step() {
        let mut mcmc = Mcmc::new(likelihood(), settings(1, 4)).unwrap();
        let post = mcmc.run(40, 0, 3).unwrap();
        assert_eq!(mcmc.session().nsteps(), 3);
        assert_eq!(post.nrows(), 12);
        assert!(matches!(
            mcmc.run(40, 0, 0),
            Err(OrbitError::InvalidSettings(_))
        ));
        assert!(matches!(
            mcmc.run(40, 0, 11),
            Err(OrbitError::InvalidSettings(_))
        ));
        assert_eq!(mcmc.results().len(), 12);
        assert_eq!(mcmc.session().nsteps(), 3);
    }

    #[test]
    fn fixed_params_fill_sampler_vectors() {
        let mcmc = Mcmc::new(likelihood(), settings(1, 4)).unwrap();
        let sampled = Array1::from(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let full = mcmc.fill_in_fixed_params(sampled.view());
        assert_eq!(full, Array1::from(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 40.0, 1.1]));

        let batch = mcmc.fill_in_fixed_params_batch(sampled.view().insert_axis(Axis(0)));
        assert_eq!(batch.row(0), full);
    }

    #[test]
    fn chop_updates_results() {
        let mut mcmc = Mcmc::new(likelihood(), settings(2, 4)).unwrap();
        mcmc.run(48, 0, 1).unwrap();
        mcmc.chop_chains(2, 3).unwrap();
        assert_eq!(mcmc.session().nsteps(), 7);
        assert_eq!(mcmc.results().len(), 28);
        assert_eq!(mcmc.results().post, mcmc.session().post());
        assert!(mcmc.chop_chains(5, 5).is_err());
    }

    #[test]
    fn threads_do_not_change_the_chain() {
        let mut serial = Mcmc::new(likelihood(), settings(2, 6)).unwrap();
        let mut threaded = Mcmc::new(
            likelihood(),
            McmcSettings {
                num_threads: 3,
                ..settings(2, 6)
            },
        )
        .unwrap();
        let a = serial.run(30, 1, 1).unwrap();
        let b = threaded.run(30, 1, 1).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn examine_chains_selects() {
        let mut mcmc = Mcmc::new(likelihood(), settings(2, 6)).unwrap();
        assert!(matches!(
            mcmc.examine_chains(&ChainSelection::default()),
            Err(OrbitError::EmptyChain)
        ));
        mcmc.run(60, 0, 1).unwrap();

        let all = mcmc.examine_chains(&ChainSelection::default()).unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(all[0].dim(), (6, 10));

        let selection = ChainSelection {
            param_list: Some(vec!["ecc1".into(), "epp1".into()]),
            temp: 1,
            walker_list: Some(vec![5, 0]),
            step_range: Some(2..4),
            ..ChainSelection::default()
        };
        let traces = mcmc.examine_chains(&selection).unwrap();
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[1].dim(), (2, 2));
        assert_abs_diff_eq!(traces[0][[0, 1]], mcmc.session().chain()[[1, 5, 3, 1]]);

        let random = ChainSelection {
            n_walkers: Some(3),
            ..ChainSelection::default()
        };
        assert_eq!(mcmc.examine_chains(&random).unwrap()[0].nrows(), 3);

        let bad_temp = ChainSelection {
            temp: 2,
            ..ChainSelection::default()
        };
        assert!(matches!(
            mcmc.examine_chains(&bad_temp),
            Err(OrbitError::InvalidTemperature { temp: 2, num_temps: 2 })
        ));
        let unknown = ChainSelection {
            param_list: Some(vec!["sma2".into()]),
            ..ChainSelection::default()
        };
        assert!(matches!(
            mcmc.examine_chains(&unknown),
            Err(OrbitError::UnknownParameter { .. })
        ));
        let fixed = ChainSelection {
            param_list: Some(vec!["plx".into()]),
            ..ChainSelection::default()
        };
        assert!(matches!(
            mcmc.examine_chains(&fixed),
            Err(OrbitError::FixedParameter(_))
        ));
    }
}
