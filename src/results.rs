use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{ArrayRef, Float64Builder, RecordBatch, RecordBatchOptions};
use arrow::datatypes::{DataType, Field, Schema};
use ndarray::{concatenate, Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::system::PARAM_NAMES;

/// Destination of accepted posterior samples.
///
/// Samplers call `add_samples` once per run with the samples of that run.
pub trait ResultsSink: Send {
    /// Append `post` (`(n, n_params)`) and the matching log likelihoods (`n`).
    fn add_samples(&mut self, post: ArrayView2<f64>, lnlike: ArrayView1<f64>) -> Result<()>;

    /// Drop every stored sample.
    fn clear(&mut self) -> Result<()>;
}

/// In-memory posterior.
#[derive(Debug, Clone)]
pub struct Results {
    pub sampler_name: String,
    pub tau_ref_epoch: f64,
    pub post: Array2<f64>,
    pub lnlike: Array1<f64>,
}

impl Results {
    pub fn new(sampler_name: impl Into<String>, tau_ref_epoch: f64) -> Self {
        Self {
            sampler_name: sampler_name.into(),
            tau_ref_epoch,
            post: Array2::zeros((0, PARAM_NAMES.len())),
            lnlike: Array1::zeros(0),
        }
    }

    pub fn len(&self) -> usize {
        self.lnlike.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lnlike.is_empty()
    }
}

impl ResultsSink for Results {
    fn add_samples(&mut self, post: ArrayView2<f64>, lnlike: ArrayView1<f64>) -> Result<()> {
        if post.nrows() != lnlike.len() {
            bail!(
                "{} samples but {} log likelihoods",
                post.nrows(),
                lnlike.len()
            );
        }
        self.post = concatenate(Axis(0), &[self.post.view(), post.view()])
            .context("Posterior samples have the wrong number of parameters")?;
        self.lnlike = concatenate(Axis(0), &[self.lnlike.view(), lnlike.view()])
            .context("Could not append log likelihoods")?;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.post = Array2::zeros((0, self.post.ncols()));
        self.lnlike = Array1::zeros(0);
        Ok(())
    }
}

/// Posterior accumulated into Arrow columns, one `Float64` column per
/// parameter and one for the log likelihood.
pub struct ArrowResults {
    sampler_name: String,
    tau_ref_epoch: f64,
    columns: Vec<(String, Float64Builder)>,
    lnlike: Float64Builder,
    draw_count: usize,
}

impl ArrowResults {
    pub fn new(sampler_name: impl Into<String>, tau_ref_epoch: f64) -> Self {
        Self::with_names(sampler_name, tau_ref_epoch, PARAM_NAMES.iter().copied())
    }

    pub fn with_names<'a>(
        sampler_name: impl Into<String>,
        tau_ref_epoch: f64,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            sampler_name: sampler_name.into(),
            tau_ref_epoch,
            columns: names
                .into_iter()
                .map(|name| (name.to_string(), Float64Builder::new()))
                .collect(),
            lnlike: Float64Builder::new(),
            draw_count: 0,
        }
    }

    /// Build the record batch. Schema metadata carries the sampler name and
    /// the reference epoch.
    pub fn finalize(mut self) -> Result<RecordBatch> {
        let mut fields: Vec<Field> = self
            .columns
            .iter()
            .map(|(name, _)| Field::new(name, DataType::Float64, false))
            .collect();
        fields.push(Field::new("lnlike", DataType::Float64, false));

        let mut arrays: Vec<ArrayRef> = self
            .columns
            .iter_mut()
            .map(|(_, builder)| Arc::new(builder.finish()) as ArrayRef)
            .collect();
        arrays.push(Arc::new(self.lnlike.finish()));

        let metadata = [
            ("sampler_name".to_string(), self.sampler_name.clone()),
            ("tau_ref_epoch".to_string(), self.tau_ref_epoch.to_string()),
        ]
        .into_iter()
        .collect();
        let schema = Schema::new(fields).with_metadata(metadata);
        let options = RecordBatchOptions::new().with_row_count(Some(self.draw_count));
        RecordBatch::try_new_with_options(Arc::new(schema), arrays, &options)
            .context("Could not convert posterior to RecordBatch")
    }
}

impl ResultsSink for ArrowResults {
    fn add_samples(&mut self, post: ArrayView2<f64>, lnlike: ArrayView1<f64>) -> Result<()> {
        if post.ncols() != self.columns.len() {
            bail!(
                "Expected {} parameters per sample, got {}",
                self.columns.len(),
                post.ncols()
            );
        }
        if post.nrows() != lnlike.len() {
            bail!(
                "{} samples but {} log likelihoods",
                post.nrows(),
                lnlike.len()
            );
        }
        for ((_, builder), column) in self.columns.iter_mut().zip(post.columns()) {
            for &value in column {
                builder.append_value(value);
            }
        }
        for &value in lnlike {
            self.lnlike.append_value(value);
        }
        self.draw_count += lnlike.len();
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        for (_, builder) in self.columns.iter_mut() {
            *builder = Float64Builder::new();
        }
        self.lnlike = Float64Builder::new();
        self.draw_count = 0;
        Ok(())
    }
}
