use std::ops::Range;

use ndarray::{s, Array1, Array2, Array3, Array4, ArrayView3, ArrayView4, Axis};

use crate::sampler::{OrbitError, Result};

/// Mutable state of a Markov chain run.
///
/// Created by the sampler at construction, refilled by every
/// `run_sampler` call and trimmed by `chop_chains`. Stored steps are kept per
/// temperature even in ensemble mode, where there is a single temperature.
#[derive(Debug, Clone)]
pub struct ChainState {
    tempered: bool,
    /// Walker positions over the free parameters, `(temps, walkers, free)`.
    curr_pos: Array3<f64>,
    /// `(temps, walkers, steps, free)`
    chain: Array4<f64>,
    /// `(temps, walkers, steps)`
    lnlikes_alltemps: Array3<f64>,
    /// Lowest temperature samples with fixed parameters, `(walkers, steps, params)`.
    post: Array3<f64>,
    accepted: Array1<usize>,
    proposed: usize,
    swaps_accepted: Array1<usize>,
    swaps_proposed: usize,
}

impl ChainState {
    pub(crate) fn new(curr_pos: Array3<f64>, tempered: bool, num_params: usize) -> Self {
        let (num_temps, num_walkers, num_free) = curr_pos.dim();
        Self {
            tempered,
            chain: Array4::zeros((num_temps, num_walkers, 0, num_free)),
            lnlikes_alltemps: Array3::zeros((num_temps, num_walkers, 0)),
            post: Array3::zeros((num_walkers, 0, num_params)),
            accepted: Array1::zeros(num_temps),
            proposed: 0,
            swaps_accepted: Array1::zeros(num_temps.saturating_sub(1)),
            swaps_proposed: 0,
            curr_pos,
        }
    }

    pub fn num_temps(&self) -> usize {
        self.chain.len_of(Axis(0))
    }

    pub fn num_walkers(&self) -> usize {
        self.chain.len_of(Axis(1))
    }

    /// Number of stored steps, read from the chain itself.
    pub fn nsteps(&self) -> usize {
        self.chain.len_of(Axis(2))
    }

    pub fn is_tempered(&self) -> bool {
        self.tempered
    }

    /// Current walker positions, `(temps, walkers, free)`.
    pub fn curr_pos(&self) -> ArrayView3<f64> {
        self.curr_pos.view()
    }

    pub(crate) fn set_curr_pos(&mut self, curr_pos: Array3<f64>) {
        assert_eq!(curr_pos.dim(), self.curr_pos.dim());
        self.curr_pos = curr_pos;
    }

    /// The stored chain, `(temps, walkers, steps, free)`.
    pub fn chain(&self) -> ArrayView4<f64> {
        self.chain.view()
    }

    /// Stored chain of one temperature, `(walkers, steps, free)`.
    pub fn chain_at(&self, temp: usize) -> Result<ArrayView3<f64>> {
        if temp >= self.num_temps() {
            return Err(OrbitError::InvalidTemperature {
                temp,
                num_temps: self.num_temps(),
            });
        }
        Ok(self.chain.index_axis(Axis(0), temp))
    }

    /// Log likelihoods of the lowest temperature, flattened walker-major.
    pub fn lnlikes(&self) -> Array1<f64> {
        self.lnlikes_alltemps
            .index_axis(Axis(0), 0)
            .iter()
            .copied()
            .collect()
    }

    /// Log likelihoods of every temperature, `(temps, walkers, steps)`.
    /// Only kept when tempering.
    pub fn lnlikes_alltemps(&self) -> Option<ArrayView3<f64>> {
        self.is_tempered().then(|| self.lnlikes_alltemps.view())
    }

    /// Lowest temperature samples including fixed parameters, flattened
    /// walker-major to `(walkers * steps, params)`.
    pub fn post(&self) -> Array2<f64> {
        flatten_steps(self.post.view())
    }

    /// Drop the stored steps and the move statistics, keeping the walker
    /// positions.
    pub(crate) fn reset(&mut self) {
        let (num_temps, num_walkers, num_free) = self.curr_pos.dim();
        let num_params = self.post.len_of(Axis(2));
        self.chain = Array4::zeros((num_temps, num_walkers, 0, num_free));
        self.lnlikes_alltemps = Array3::zeros((num_temps, num_walkers, 0));
        self.post = Array3::zeros((num_walkers, 0, num_params));
        self.accepted.fill(0);
        self.proposed = 0;
        self.swaps_accepted.fill(0);
        self.swaps_proposed = 0;
    }

    /// Replace the stored steps with those of a new run.
    pub(crate) fn store(&mut self, chain: Array4<f64>, lnlikes: Array3<f64>, post: Array3<f64>) {
        let (num_temps, num_walkers, nsteps, num_free) = chain.dim();
        assert_eq!(
            (num_temps, num_walkers, num_free),
            self.curr_pos.dim(),
            "chain shape must match the walker layout"
        );
        assert_eq!(lnlikes.dim(), (num_temps, num_walkers, nsteps));
        assert_eq!(
            post.dim(),
            (num_walkers, nsteps, self.post.len_of(Axis(2)))
        );
        self.chain = chain;
        self.lnlikes_alltemps = lnlikes;
        self.post = post;
    }

    /// Drop the first `burn` and last `trim` stored steps from the chain, the
    /// log likelihoods and the posterior.
    pub fn chop(&mut self, burn: usize, trim: usize) -> Result<()> {
        let nsteps = self.nsteps();
        let removed = burn.checked_add(trim).filter(|&removed| removed <= nsteps);
        if removed.is_none() {
            return Err(OrbitError::InvalidChop { burn, trim, nsteps });
        }
        let keep = burn..nsteps - trim;
        self.chain = self.chain.slice(s![.., .., keep.clone(), ..]).to_owned();
        self.lnlikes_alltemps = self
            .lnlikes_alltemps
            .slice(s![.., .., keep.clone()])
            .to_owned();
        self.post = self.post.slice(s![.., keep, ..]).to_owned();
        Ok(())
    }

    /// Positions of the selected walkers over a step range for one free
    /// parameter column, `(walkers, steps)`.
    pub fn walker_trajectories(
        &self,
        temp: usize,
        column: usize,
        walkers: &[usize],
        steps: Option<Range<usize>>,
    ) -> Result<Array2<f64>> {
        let chain = self.chain_at(temp)?;
        let num_columns = chain.len_of(Axis(2));
        if column >= num_columns {
            return Err(OrbitError::InvalidColumn {
                column,
                num_columns,
            });
        }
        let nsteps = chain.len_of(Axis(1));
        let steps = steps.unwrap_or(0..nsteps);
        let start = steps.start.min(nsteps);
        let steps = start..steps.end.clamp(start, nsteps);

        let mut out = Array2::zeros((walkers.len(), steps.len()));
        for (mut row, &walker) in out.outer_iter_mut().zip(walkers) {
            if walker >= self.num_walkers() {
                return Err(OrbitError::InvalidWalker {
                    walker,
                    num_walkers: self.num_walkers(),
                });
            }
            row.assign(&chain.slice(s![walker, steps.clone(), column]));
        }
        Ok(out)
    }

    pub(crate) fn record_moves(&mut self, temp: usize, accepted: usize) {
        self.accepted[temp] += accepted;
    }

    pub(crate) fn record_sweep(&mut self) {
        self.proposed += self.num_walkers();
    }

    pub(crate) fn record_swaps(&mut self, temp: usize, accepted: usize) {
        self.swaps_accepted[temp - 1] += accepted;
    }

    pub(crate) fn record_swap_sweep(&mut self) {
        self.swaps_proposed += self.num_walkers();
    }

    /// Fraction of accepted stretch moves per temperature.
    pub fn acceptance_fraction(&self) -> Array1<f64> {
        fraction(&self.accepted, self.proposed)
    }

    /// Fraction of accepted swaps between temperature `k - 1` and `k`, at
    /// position `k - 1`.
    pub fn swap_acceptance_fraction(&self) -> Array1<f64> {
        fraction(&self.swaps_accepted, self.swaps_proposed)
    }
}

fn fraction(counts: &Array1<usize>, total: usize) -> Array1<f64> {
    if total == 0 {
        return Array1::zeros(counts.len());
    }
    counts.mapv(|count| count as f64 / total as f64)
}

/// `(walkers, steps, n)` to `(walkers * steps, n)`, walker-major.
pub(crate) fn flatten_steps(values: ArrayView3<f64>) -> Array2<f64> {
    let (walkers, steps, n) = values.dim();
    Array2::from_shape_fn((walkers * steps, n), |(row, col)| {
        values[[row / steps, row % steps, col]]
    })
}
