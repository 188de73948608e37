//! Segmentation losses over channels-last tensors.
//!
//! Every loss takes `y_true` and `y_pred` of shape
//! `[batch, height, width, classes]` and returns a one-element tensor.

mod cross_entropy;
mod overlap;
mod regression;

use burn::prelude::*;

use crate::error::{Error, Result};

pub use cross_entropy::{
    BinaryCrossEntropyLoss, BinaryCrossEntropyLossConfig, CategoricalCrossEntropyLoss,
    CategoricalCrossEntropyLossConfig,
};
pub use overlap::{DiceLoss, DiceLossConfig, JaccardLoss, JaccardLossConfig};
pub use regression::{MeanAbsoluteErrorLoss, MeanSquaredErrorLoss};

/// A scalar loss over `(y_true, y_pred)` pairs.
pub trait SegmentationLoss<B: Backend>: Send + Sync {
    /// Identifier used in logs and training history.
    fn name(&self) -> String;

    fn forward(&self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Result<Tensor<B, 1>>;
}

impl<B: Backend> SegmentationLoss<B> for Box<dyn SegmentationLoss<B>> {
    fn name(&self) -> String {
        self.as_ref().name()
    }

    fn forward(&self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Result<Tensor<B, 1>> {
        self.as_ref().forward(y_true, y_pred)
    }
}

pub(crate) fn check_same_shape<B: Backend, const D: usize>(
    context: &str,
    y_true: &Tensor<B, D>,
    y_pred: &Tensor<B, D>,
) -> Result<()> {
    let expected = y_true.dims();
    let actual = y_pred.dims();

    if expected != actual {
        return Err(Error::ShapeMismatch {
            context: context.to_string(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }

    Ok(())
}

/// Sum over batch and spatial axes, one value per class.
pub(crate) fn per_class_sum<B: Backend>(tensor: Tensor<B, 4>) -> Tensor<B, 1> {
    let [batch, height, width, classes] = tensor.dims();
    tensor
        .reshape([batch * height * width, classes])
        .sum_dim(0)
        .reshape([classes])
}

/// `sum(w * s) / sum(w)` over per-class scores; plain mean when no
/// weights are given.
pub(crate) fn class_average<B: Backend>(
    scores: Tensor<B, 1>,
    weights: Option<&[f32]>,
) -> Result<Tensor<B, 1>> {
    let Some(weights) = weights else {
        return Ok(scores.mean());
    };

    let [classes] = scores.dims();
    if weights.len() != classes {
        return Err(Error::ShapeMismatch {
            context: "class weights".to_string(),
            expected: vec![classes],
            actual: vec![weights.len()],
        });
    }

    let total: f32 = weights.iter().sum();
    if total <= 0.0 {
        return Err(Error::InvalidConfig(
            "class weights must not all be zero".to_string(),
        ));
    }

    let weights = Tensor::<B, 1>::from_floats(weights, &scores.device());
    Ok((scores * weights).sum().div_scalar(total))
}

pub(crate) fn one_minus<B: Backend>(tensor: Tensor<B, 1>) -> Tensor<B, 1> {
    tensor.neg().add_scalar(1.0)
}
