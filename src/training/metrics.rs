//! Segmentation metrics.
//!
//! [`SegmentationMetric`] scores a single batch. [`StatefulMetric`] is the
//! incremental contract used during training: `update_state` folds a batch
//! into a running value, `result` reads it, `reset_state` clears it.
//! [`MeanMetric`] turns any batch metric into a stateful one by keeping a
//! batch-size weighted running mean.

use burn::{prelude::*, tensor::ElementConversion};

use super::loss::{check_same_shape, per_class_sum};
use crate::error::Result;

/// A batch-level score over channels-last `(y_true, y_pred)` pairs.
pub trait SegmentationMetric<B: Backend>: Send + Sync {
    fn name(&self) -> String;

    fn compute(&self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Result<f64>;
}

/// A metric accumulating over many batches.
pub trait StatefulMetric<B: Backend>: Send {
    fn name(&self) -> String;

    /// Fold one batch into the running state and return the running value.
    fn update_state(&mut self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Result<f64>;

    fn result(&self) -> f64;

    fn reset_state(&mut self);
}

/// Running, batch-size weighted mean of a [`SegmentationMetric`].
pub struct MeanMetric<B: Backend> {
    metric: Box<dyn SegmentationMetric<B>>,
    name: String,
    total: f64,
    count: usize,
}

impl<B: Backend> MeanMetric<B> {
    pub fn new(metric: Box<dyn SegmentationMetric<B>>) -> Self {
        let name = metric.name();
        Self {
            metric,
            name,
            total: 0.0,
            count: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<B: Backend> StatefulMetric<B> for MeanMetric<B> {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn update_state(&mut self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Result<f64> {
        let batch_size = y_true.dims()[0];
        let value = self.metric.compute(y_true, y_pred)?;

        self.total += value * batch_size as f64;
        self.count += batch_size;

        Ok(self.result())
    }

    fn result(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }

    fn reset_state(&mut self) {
        self.total = 0.0;
        self.count = 0;
    }
}

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    tensor.into_scalar().elem::<f64>()
}

/// Fraction of pixels whose arg-max class matches the label's arg-max.
///
/// Single-channel tensors are thresholded at 0.5 instead.
#[derive(Clone, Debug, Default)]
pub struct Accuracy;

impl<B: Backend> SegmentationMetric<B> for Accuracy {
    fn name(&self) -> String {
        "accuracy".to_string()
    }

    fn compute(&self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Result<f64> {
        check_same_shape("accuracy", &y_true, &y_pred)?;

        if y_true.dims()[3] == 1 {
            return BinaryAccuracy::default().compute(y_true, y_pred);
        }

        let matches = y_pred.argmax(3).equal(y_true.argmax(3)).float();
        Ok(scalar(matches.mean()))
    }
}

/// Fraction of values where `y_pred > threshold` agrees with `y_true > 0.5`.
#[derive(Clone, Debug)]
pub struct BinaryAccuracy {
    pub threshold: f64,
}

impl Default for BinaryAccuracy {
    fn default() -> Self {
        Self { threshold: 0.5 }
    }
}

impl<B: Backend> SegmentationMetric<B> for BinaryAccuracy {
    fn name(&self) -> String {
        "binary_accuracy".to_string()
    }

    fn compute(&self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Result<f64> {
        check_same_shape("binary_accuracy", &y_true, &y_pred)?;

        let predicted = y_pred.greater_elem(self.threshold).int();
        let expected = y_true.greater_elem(0.5).int();

        Ok(scalar(predicted.equal(expected).float().mean()))
    }
}

/// Soft intersection-over-union averaged over classes.
///
/// With a threshold the predictions are binarized first.
#[derive(Clone, Debug)]
pub struct IoUScore {
    pub smooth: f64,
    pub threshold: Option<f64>,
}

impl Default for IoUScore {
    fn default() -> Self {
        Self {
            smooth: 1e-5,
            threshold: None,
        }
    }
}

impl<B: Backend> SegmentationMetric<B> for IoUScore {
    fn name(&self) -> String {
        "iou_score".to_string()
    }

    fn compute(&self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Result<f64> {
        check_same_shape("iou_score", &y_true, &y_pred)?;

        let y_pred = match self.threshold {
            Some(threshold) => y_pred.greater_elem(threshold).float(),
            None => y_pred,
        };

        let intersection = per_class_sum(y_true.clone() * y_pred.clone());
        let union = per_class_sum(y_true) + per_class_sum(y_pred) - intersection.clone();
        let iou = (intersection + self.smooth) / (union + self.smooth);

        Ok(scalar(iou.mean()))
    }
}

/// Hard IoU on arg-max class maps, averaged over the classes that appear
/// in either the labels or the predictions.
#[derive(Clone, Debug, Default)]
pub struct MeanIoU;

impl<B: Backend> SegmentationMetric<B> for MeanIoU {
    fn name(&self) -> String {
        "mean_iou".to_string()
    }

    fn compute(&self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Result<f64> {
        check_same_shape("mean_iou", &y_true, &y_pred)?;

        let n_classes = y_true.dims()[3];
        let targets = y_true.argmax(3);
        let predictions = y_pred.argmax(3);

        let mut total_iou = 0.0;
        let mut valid_classes = 0;

        for class_idx in 0..n_classes {
            let target_mask = targets.clone().equal_elem(class_idx as i64).float();
            let pred_mask = predictions.clone().equal_elem(class_idx as i64).float();

            let intersection = scalar((target_mask.clone() * pred_mask.clone()).sum());
            let union = scalar(
                (target_mask.clone() + pred_mask.clone() - target_mask * pred_mask).sum(),
            );

            if union > 0.0 {
                total_iou += intersection / union;
                valid_classes += 1;
            }
        }

        if valid_classes > 0 {
            Ok(total_iou / valid_classes as f64)
        } else {
            Ok(0.0)
        }
    }
}

/// Soft F-beta score averaged over classes. `beta = 1` is the dice score.
#[derive(Clone, Debug)]
pub struct FScore {
    pub beta: f64,
    pub smooth: f64,
    pub threshold: Option<f64>,
}

impl Default for FScore {
    fn default() -> Self {
        Self {
            beta: 1.0,
            smooth: 1e-5,
            threshold: None,
        }
    }
}

impl<B: Backend> SegmentationMetric<B> for FScore {
    fn name(&self) -> String {
        format!("f{}_score", self.beta)
    }

    fn compute(&self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Result<f64> {
        check_same_shape("f_score", &y_true, &y_pred)?;

        let y_pred = match self.threshold {
            Some(threshold) => y_pred.greater_elem(threshold).float(),
            None => y_pred,
        };

        let true_positives = per_class_sum(y_true.clone() * y_pred.clone());
        let false_positives = per_class_sum(y_pred) - true_positives.clone();
        let false_negatives = per_class_sum(y_true) - true_positives.clone();

        let beta_sq = self.beta * self.beta;
        let numerator = true_positives.mul_scalar(1.0 + beta_sq);
        let denominator =
            numerator.clone() + false_negatives.mul_scalar(beta_sq) + false_positives;
        let score = (numerator + self.smooth) / (denominator + self.smooth);

        Ok(scalar(score.mean()))
    }
}

#[derive(Clone, Debug, Default)]
pub struct MeanSquaredError;

impl<B: Backend> SegmentationMetric<B> for MeanSquaredError {
    fn name(&self) -> String {
        "mean_squared_error".to_string()
    }

    fn compute(&self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Result<f64> {
        check_same_shape("mean_squared_error", &y_true, &y_pred)?;
        Ok(scalar((y_pred - y_true).powf_scalar(2.0).mean()))
    }
}

#[derive(Clone, Debug, Default)]
pub struct MeanAbsoluteError;

impl<B: Backend> SegmentationMetric<B> for MeanAbsoluteError {
    fn name(&self) -> String {
        "mean_absolute_error".to_string()
    }

    fn compute(&self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Result<f64> {
        check_same_shape("mean_absolute_error", &y_true, &y_pred)?;
        Ok(scalar((y_pred - y_true).abs().mean()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::TestBackend;

    fn labels(device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 4> {
        // Four pixels: classes 0, 1, 1, 0.
        Tensor::from_floats(
            [[[[1.0, 0.0], [0.0, 1.0]], [[0.0, 1.0], [1.0, 0.0]]]],
            device,
        )
    }

    #[test]
    fn accuracy_counts_matching_argmax() {
        let device = Default::default();
        let y_pred = Tensor::<TestBackend, 4>::from_floats(
            [[[[0.9, 0.1], [0.2, 0.8]], [[0.7, 0.3], [0.6, 0.4]]]],
            &device,
        );

        let value = Accuracy.compute(labels(&device), y_pred).unwrap();

        assert!((value - 0.75).abs() < 1e-6);
    }

    #[test]
    fn binary_accuracy_thresholds_predictions() {
        let device = Default::default();
        let y_true = Tensor::<TestBackend, 4>::from_floats([[[[1.0], [0.0]], [[1.0], [0.0]]]], &device);
        let y_pred = Tensor::<TestBackend, 4>::from_floats([[[[0.7], [0.2]], [[0.4], [0.9]]]], &device);

        let value = BinaryAccuracy::default().compute(y_true, y_pred).unwrap();

        assert!((value - 0.5).abs() < 1e-6);
    }

    #[test]
    fn mean_iou_of_perfect_prediction_is_one() {
        let device = Default::default();
        let value = MeanIoU.compute(labels(&device), labels(&device)).unwrap();

        assert!((value - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_score_and_f_score_agree_on_perfect_prediction() {
        let device = Default::default();

        let iou = IoUScore::default()
            .compute(labels(&device), labels(&device))
            .unwrap();
        let f1 = FScore::default()
            .compute(labels(&device), labels(&device))
            .unwrap();

        assert!((iou - 1.0).abs() < 1e-6);
        assert!((f1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn mean_metric_weights_by_batch_size() {
        let device = Default::default();
        let mut metric = MeanMetric::<TestBackend>::new(Box::new(MeanAbsoluteError));

        // One sample with error 1.0, then three samples with error 0.0.
        metric
            .update_state(
                Tensor::ones([1, 1, 1, 1], &device),
                Tensor::zeros([1, 1, 1, 1], &device),
            )
            .unwrap();
        let running = metric
            .update_state(
                Tensor::ones([3, 1, 1, 1], &device),
                Tensor::ones([3, 1, 1, 1], &device),
            )
            .unwrap();

        assert!((running - 0.25).abs() < 1e-6);
        assert_eq!(metric.name(), "mean_absolute_error");

        metric.reset_state();
        assert_eq!(metric.result(), 0.0);
    }

    #[test]
    fn mean_metric_name_can_be_overridden() {
        let metric = MeanMetric::<TestBackend>::new(Box::new(Accuracy)).with_name("pixel_acc");

        assert_eq!(metric.name(), "pixel_acc");
    }
}
