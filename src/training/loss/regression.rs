use burn::prelude::*;

use super::{SegmentationLoss, check_same_shape};
use crate::error::Result;

#[derive(Clone, Debug, Default)]
pub struct MeanSquaredErrorLoss;

impl<B: Backend> SegmentationLoss<B> for MeanSquaredErrorLoss {
    fn name(&self) -> String {
        "mean_squared_error".to_string()
    }

    fn forward(&self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Result<Tensor<B, 1>> {
        check_same_shape("mean_squared_error", &y_true, &y_pred)?;
        Ok((y_pred - y_true).powf_scalar(2.0).mean())
    }
}

#[derive(Clone, Debug, Default)]
pub struct MeanAbsoluteErrorLoss;

impl<B: Backend> SegmentationLoss<B> for MeanAbsoluteErrorLoss {
    fn name(&self) -> String {
        "mean_absolute_error".to_string()
    }

    fn forward(&self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Result<Tensor<B, 1>> {
        check_same_shape("mean_absolute_error", &y_true, &y_pred)?;
        Ok((y_pred - y_true).abs().mean())
    }
}
