//! Estimator wrapper that excludes an ignore channel from training.
//!
//! The labels handed to a [`LazyModel`] carry one extra channel, a binary
//! mask of pixels to ignore. At compile time every loss and metric is
//! wrapped so that this channel is popped from the labels and the
//! predictions are zeroed where it is set. Everything else is delegated to
//! the wrapped estimator.

use burn::prelude::*;
use tracing::info;

use super::{
    estimator::{
        BatchSource, CompileOptions, Evaluation, FitConfig, History, LossSpec, MetricSpec,
        SegmentationEstimator,
    },
    masked::{MaskedLoss, MaskedMetric},
    registry::{LossRegistry, MetricRegistry},
};
use crate::error::Result;

pub struct LazyModel<B: Backend, E: SegmentationEstimator<B>> {
    inner: E,
    ignore_channel_index: isize,
    losses: LossRegistry<B>,
    metrics: MetricRegistry<B>,
}

impl<B: Backend, E: SegmentationEstimator<B>> LazyModel<B, E> {
    /// Wrap `inner`, treating label channel `ignore_channel_index` as the
    /// ignore mask. Negative indices count from the last channel.
    pub fn new(inner: E, ignore_channel_index: isize) -> Self {
        Self::with_registries(
            inner,
            ignore_channel_index,
            LossRegistry::with_defaults(),
            MetricRegistry::with_defaults(),
        )
    }

    pub fn with_registries(
        inner: E,
        ignore_channel_index: isize,
        losses: LossRegistry<B>,
        metrics: MetricRegistry<B>,
    ) -> Self {
        Self {
            inner,
            ignore_channel_index,
            losses,
            metrics,
        }
    }

    pub fn ignore_channel_index(&self) -> isize {
        self.ignore_channel_index
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut E {
        &mut self.inner
    }

    pub fn into_inner(self) -> E {
        self.inner
    }

    pub fn losses_mut(&mut self) -> &mut LossRegistry<B> {
        &mut self.losses
    }

    pub fn metrics_mut(&mut self) -> &mut MetricRegistry<B> {
        &mut self.metrics
    }

    fn mask_loss(&self, spec: LossSpec<B>) -> Result<LossSpec<B>> {
        let base = match spec {
            LossSpec::Name(name) => self.losses.get(&name)?,
            LossSpec::Loss(loss) => loss,
        };

        Ok(LossSpec::Loss(Box::new(MaskedLoss::new(
            base,
            self.ignore_channel_index,
        ))))
    }

    fn mask_metric(&self, spec: MetricSpec<B>) -> Result<MetricSpec<B>> {
        let masked = match spec {
            MetricSpec::Name(name) => {
                MaskedMetric::new(self.metrics.get(&name)?, self.ignore_channel_index)
            }
            MetricSpec::Metric(metric) => MaskedMetric::new(metric, self.ignore_channel_index),
            MetricSpec::Stateful(metric) => {
                MaskedMetric::from_stateful(metric, self.ignore_channel_index)
            }
        };

        Ok(MetricSpec::Stateful(Box::new(masked)))
    }
}

impl<B: Backend, E: SegmentationEstimator<B>> SegmentationEstimator<B> for LazyModel<B, E> {
    fn compile(&mut self, options: CompileOptions<B>) -> Result<()> {
        let CompileOptions {
            loss,
            metrics,
            optimizer,
            learning_rate,
        } = options;

        let loss = loss.map(|spec| self.mask_loss(spec)).transpose()?;
        let metrics = metrics
            .into_iter()
            .map(|spec| self.mask_metric(spec))
            .collect::<Result<Vec<_>>>()?;

        info!(
            ignore_channel_index = self.ignore_channel_index,
            "Compiling with ignore-channel masking"
        );

        self.inner.compile(CompileOptions {
            loss,
            metrics,
            optimizer,
            learning_rate,
        })
    }

    fn fit(
        &mut self,
        data: &dyn BatchSource<B>,
        validation: Option<&dyn BatchSource<B>>,
        config: &FitConfig,
    ) -> Result<History> {
        self.inner.fit(data, validation, config)
    }

    fn evaluate(&mut self, data: &dyn BatchSource<B>) -> Result<Evaluation> {
        self.inner.evaluate(data)
    }

    fn call(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        self.inner.call(images)
    }
}
