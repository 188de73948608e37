use burn::prelude::*;

use super::{SegmentationLoss, check_same_shape, class_average, one_minus, per_class_sum};
use crate::error::Result;

#[derive(Config, Debug)]
pub struct DiceLossConfig {
    #[config(default = 1e-5)]
    pub smooth: f32,

    /// Weight of recall relative to precision. `1.0` gives the dice score.
    #[config(default = 1.0)]
    pub beta: f32,

    /// Optional per-class weights, one per label channel.
    pub class_weights: Option<Vec<f32>>,
}

impl DiceLossConfig {
    pub fn init(&self) -> DiceLoss {
        self.assertions();
        DiceLoss {
            smooth: self.smooth,
            beta: self.beta,
            class_weights: self.class_weights.clone(),
        }
    }

    fn assertions(&self) {
        assert!(
            self.smooth >= 0.,
            "Smoothing factor must be non-negative. Got {}",
            self.smooth
        );
        assert!(self.beta > 0., "Beta must be positive. Got {}", self.beta);
        if let Some(weights) = self.class_weights.as_ref() {
            assert!(
                weights.iter().all(|w| *w >= 0.),
                "Class weights of dice loss have to be non-negative."
            );
        }
    }
}

/// `1 - F-beta score` computed per class over the whole batch, then averaged.
#[derive(Clone, Debug)]
pub struct DiceLoss {
    smooth: f32,
    beta: f32,
    class_weights: Option<Vec<f32>>,
}

impl<B: Backend> SegmentationLoss<B> for DiceLoss {
    fn name(&self) -> String {
        "dice_loss".to_string()
    }

    fn forward(&self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Result<Tensor<B, 1>> {
        check_same_shape("dice_loss", &y_true, &y_pred)?;

        let true_positives = per_class_sum(y_true.clone() * y_pred.clone());
        let false_positives = per_class_sum(y_pred) - true_positives.clone();
        let false_negatives = per_class_sum(y_true) - true_positives.clone();

        let beta_sq = self.beta * self.beta;
        let numerator = true_positives.mul_scalar(1.0 + beta_sq);
        let denominator =
            numerator.clone() + false_negatives.mul_scalar(beta_sq) + false_positives;

        let score = (numerator + self.smooth) / (denominator + self.smooth);

        Ok(one_minus(class_average(
            score,
            self.class_weights.as_deref(),
        )?))
    }
}

#[derive(Config, Debug)]
pub struct JaccardLossConfig {
    #[config(default = 1e-5)]
    pub smooth: f32,

    /// Optional per-class weights, one per label channel.
    pub class_weights: Option<Vec<f32>>,
}

impl JaccardLossConfig {
    pub fn init(&self) -> JaccardLoss {
        self.assertions();
        JaccardLoss {
            smooth: self.smooth,
            class_weights: self.class_weights.clone(),
        }
    }

    fn assertions(&self) {
        assert!(
            self.smooth >= 0.,
            "Smoothing factor must be non-negative. Got {}",
            self.smooth
        );
        if let Some(weights) = self.class_weights.as_ref() {
            assert!(
                weights.iter().all(|w| *w >= 0.),
                "Class weights of jaccard loss have to be non-negative."
            );
        }
    }
}

/// `1 - IoU` with soft intersection and union per class.
#[derive(Clone, Debug)]
pub struct JaccardLoss {
    smooth: f32,
    class_weights: Option<Vec<f32>>,
}

impl<B: Backend> SegmentationLoss<B> for JaccardLoss {
    fn name(&self) -> String {
        "jaccard_loss".to_string()
    }

    fn forward(&self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Result<Tensor<B, 1>> {
        check_same_shape("jaccard_loss", &y_true, &y_pred)?;

        let intersection = per_class_sum(y_true.clone() * y_pred.clone());
        // union = pred_sum + target_sum - intersection
        let union = per_class_sum(y_pred) + per_class_sum(y_true) - intersection.clone();

        let iou = (intersection + self.smooth) / (union + self.smooth);

        Ok(one_minus(class_average(
            iou,
            self.class_weights.as_deref(),
        )?))
    }
}
