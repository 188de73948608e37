//! Loss and metric adapters that neutralize ignored pixels.
//!
//! Both adapters split the ignore channel off the labels and zero the
//! predictions wherever it is set before handing the pair to the wrapped
//! loss or metric.

use burn::prelude::*;

use super::{
    loss::SegmentationLoss,
    metrics::{MeanMetric, SegmentationMetric, StatefulMetric},
};
use crate::{error::Result, masking::apply_ignore_mask};

pub struct MaskedLoss<B: Backend> {
    base: Box<dyn SegmentationLoss<B>>,
    ignore_channel_index: isize,
}

impl<B: Backend> MaskedLoss<B> {
    pub fn new(base: Box<dyn SegmentationLoss<B>>, ignore_channel_index: isize) -> Self {
        Self {
            base,
            ignore_channel_index,
        }
    }

    pub fn ignore_channel_index(&self) -> isize {
        self.ignore_channel_index
    }

    pub fn base(&self) -> &dyn SegmentationLoss<B> {
        self.base.as_ref()
    }
}

impl<B: Backend> SegmentationLoss<B> for MaskedLoss<B> {
    fn name(&self) -> String {
        format!("masked_{}", self.base.name())
    }

    fn forward(&self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Result<Tensor<B, 1>> {
        let (labels, masked) = apply_ignore_mask(y_true, y_pred, self.ignore_channel_index)?;
        self.base.forward(labels, masked)
    }
}

pub struct MaskedMetric<B: Backend> {
    inner: Box<dyn StatefulMetric<B>>,
    name: Option<String>,
    ignore_channel_index: isize,
}

impl<B: Backend> MaskedMetric<B> {
    /// Wrap a batch metric. The reported name is the base metric's name.
    pub fn new(metric: Box<dyn SegmentationMetric<B>>, ignore_channel_index: isize) -> Self {
        Self::from_stateful(Box::new(MeanMetric::new(metric)), ignore_channel_index)
    }

    /// Wrap a metric that already keeps its own running state.
    pub fn from_stateful(metric: Box<dyn StatefulMetric<B>>, ignore_channel_index: isize) -> Self {
        Self {
            inner: metric,
            name: None,
            ignore_channel_index,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn ignore_channel_index(&self) -> isize {
        self.ignore_channel_index
    }
}

impl<B: Backend> StatefulMetric<B> for MaskedMetric<B> {
    fn name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.inner.name())
    }

    fn update_state(&mut self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Result<f64> {
        let (labels, masked) = apply_ignore_mask(y_true, y_pred, self.ignore_channel_index)?;
        self.inner.update_state(labels, masked)
    }

    fn result(&self) -> f64 {
        self.inner.result()
    }

    fn reset_state(&mut self) {
        self.inner.reset_state()
    }
}
