//! Cross-entropy losses on one-hot, channels-last targets.
//!
//! Targets are dense `[batch, height, width, classes]` tensors instead of
//! integer class maps, so label smoothing and class weights apply directly
//! on the class axis.

use burn::{prelude::*, tensor::activation::log_softmax};

use super::{SegmentationLoss, check_same_shape};
use crate::error::{Error, Result};

/// Keeps `log(0)` out of the computation.
const EPSILON: f32 = 1e-7;

/// Configuration to create a [BinaryCrossEntropyLoss].
#[derive(Config, Debug)]
pub struct BinaryCrossEntropyLossConfig {
    /// Apply a sigmoid to the predictions before scoring.
    #[config(default = false)]
    pub logits: bool,
}

impl BinaryCrossEntropyLossConfig {
    pub fn init(&self) -> BinaryCrossEntropyLoss {
        BinaryCrossEntropyLoss {
            logits: self.logits,
        }
    }
}

/// Element-wise binary cross-entropy averaged over every value.
#[derive(Clone, Debug)]
pub struct BinaryCrossEntropyLoss {
    logits: bool,
}

impl<B: Backend> SegmentationLoss<B> for BinaryCrossEntropyLoss {
    fn name(&self) -> String {
        "binary_crossentropy".to_string()
    }

    fn forward(&self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Result<Tensor<B, 1>> {
        check_same_shape("binary_crossentropy", &y_true, &y_pred)?;

        let probs = if self.logits {
            burn::tensor::activation::sigmoid(y_pred)
        } else {
            y_pred
        };
        let probs = probs.clamp(EPSILON, 1.0 - EPSILON);

        let positive = y_true.clone() * probs.clone().log();
        let negative = (y_true.ones_like() - y_true) * (probs.ones_like() - probs).log();

        Ok((positive + negative).mean().neg())
    }
}

/// Configuration to create a [CategoricalCrossEntropyLoss].
#[derive(Config, Debug)]
pub struct CategoricalCrossEntropyLossConfig {
    /// Optional label smoothing factor (between 0.0 and 1.0).
    ///
    /// Hard labels {0, 1} will be changed to y_smoothed = y(1 - α) + α / nr_classes.
    pub smoothing: Option<f32>,

    /// Optional class weights, one per label channel, all positive.
    pub weights: Option<Vec<f32>>,

    /// Whether predictions are logits (true) or probabilities (false).
    #[config(default = false)]
    pub logits: bool,
}

impl CategoricalCrossEntropyLossConfig {
    pub fn init(&self) -> CategoricalCrossEntropyLoss {
        self.assertions();
        CategoricalCrossEntropyLoss {
            smoothing: self.smoothing,
            weights: self.weights.clone(),
            logits: self.logits,
        }
    }

    fn assertions(&self) {
        if let Some(alpha) = self.smoothing {
            assert!(
                (0.0..=1.).contains(&alpha),
                "Alpha of Cross-entropy loss with smoothed labels should be in interval [0, 1]. Got {}",
                alpha
            );
        };
        if let Some(weights) = self.weights.as_ref() {
            assert!(
                weights.iter().all(|e| e > &0.),
                "Weights of cross-entropy have to be positive."
            );
        }
    }
}

/// Per-pixel categorical cross-entropy, averaged over pixels.
#[derive(Clone, Debug)]
pub struct CategoricalCrossEntropyLoss {
    smoothing: Option<f32>,
    weights: Option<Vec<f32>>,
    logits: bool,
}

impl CategoricalCrossEntropyLoss {
    fn smoothed_targets<B: Backend>(&self, targets: Tensor<B, 4>) -> Tensor<B, 4> {
        match self.smoothing {
            Some(alpha) => {
                let classes = targets.dims()[3] as f32;
                targets.mul_scalar(1. - alpha).add_scalar(alpha / classes)
            }
            None => targets,
        }
    }

    fn class_weights<B: Backend>(&self, shape: [usize; 4], device: &B::Device) -> Result<Option<Tensor<B, 4>>> {
        let Some(weights) = self.weights.as_ref() else {
            return Ok(None);
        };

        let [batch, height, width, classes] = shape;
        if weights.len() != classes {
            return Err(Error::ShapeMismatch {
                context: "cross-entropy class weights".to_string(),
                expected: vec![classes],
                actual: vec![weights.len()],
            });
        }

        let weights = Tensor::<B, 1>::from_floats(weights.as_slice(), device)
            .reshape([1, 1, 1, classes])
            .repeat_dim(0, batch)
            .repeat_dim(1, height)
            .repeat_dim(2, width);

        Ok(Some(weights))
    }
}

impl<B: Backend> SegmentationLoss<B> for CategoricalCrossEntropyLoss {
    fn name(&self) -> String {
        "categorical_crossentropy".to_string()
    }

    fn forward(&self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Result<Tensor<B, 1>> {
        check_same_shape("categorical_crossentropy", &y_true, &y_pred)?;

        let shape = y_pred.dims();
        let device = y_pred.device();

        let log_probs = if self.logits {
            log_softmax(y_pred, 3)
        } else {
            y_pred.clamp(EPSILON, 1.0).log()
        };

        let mut terms = self.smoothed_targets(y_true) * log_probs;
        if let Some(weights) = self.class_weights::<B>(shape, &device)? {
            terms = terms * weights;
        }

        Ok(terms.sum_dim(3).mean().neg())
    }
}
