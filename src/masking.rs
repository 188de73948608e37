//! Channel masking for partially annotated label tensors.
//!
//! Label tensors are channels-last. One of their channels marks pixels that
//! were never annotated; these helpers split that channel off and neutralize
//! the matching predictions before a loss or metric sees them.

use burn::prelude::*;

use crate::error::{Error, Result};

/// Resolve a possibly negative channel index against `channels`.
pub fn resolve_channel_index(index: isize, channels: usize) -> Result<usize> {
    let resolved = if index < 0 {
        index + channels as isize
    } else {
        index
    };

    if resolved < 0 || resolved >= channels as isize {
        return Err(Error::InvalidChannelIndex { index, channels });
    }

    Ok(resolved as usize)
}

/// Split one channel off the last axis.
///
/// Returns the tensor without that channel (remaining channels keep their
/// order) and the extracted channel with its length-1 axis retained, so it
/// broadcasts against remainder-shaped tensors.
///
/// A single-channel input yields a remainder with zero channels.
pub fn pop_channel<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
    channel_index: isize,
) -> Result<(Tensor<B, D>, Tensor<B, D>)> {
    let dims = tensor.dims();
    let axis = D - 1;
    let channels = dims[axis];
    let index = resolve_channel_index(channel_index, channels)?;

    let extracted = tensor.clone().narrow(axis, index, 1);

    let mut parts = Vec::with_capacity(2);
    if index > 0 {
        parts.push(tensor.clone().narrow(axis, 0, index));
    }
    if index + 1 < channels {
        parts.push(tensor.clone().narrow(axis, index + 1, channels - index - 1));
    }

    let remainder = match parts.len() {
        0 => {
            let mut shape = dims;
            shape[axis] = 0;
            Tensor::zeros(shape, &tensor.device())
        }
        1 => parts.remove(0),
        _ => Tensor::cat(parts, axis),
    };

    Ok((remainder, extracted))
}

/// Zero every prediction channel wherever `ignore_mask` is set.
///
/// `ignore_mask` has a single channel valued in `{0, 1}`. Ignored pixels are
/// driven to zero rather than excluded, so the downstream loss still scores
/// them as zero-valued predictions.
pub fn mask_predictions<B: Backend, const D: usize>(
    y_pred: Tensor<B, D>,
    ignore_mask: Tensor<B, D>,
) -> Result<Tensor<B, D>> {
    let pred_dims = y_pred.dims();
    let mask_dims = ignore_mask.dims();
    let axis = D - 1;

    let leading_match = pred_dims[..axis] == mask_dims[..axis];
    if !leading_match || mask_dims[axis] != 1 {
        let mut expected = pred_dims.to_vec();
        expected[axis] = 1;
        return Err(Error::ShapeMismatch {
            context: "ignore mask".to_string(),
            expected,
            actual: mask_dims.to_vec(),
        });
    }

    let channels = pred_dims[axis];
    if channels == 0 {
        return Ok(y_pred);
    }

    let keep = ignore_mask.ones_like() - ignore_mask;
    Ok(y_pred * keep.repeat_dim(axis, channels))
}

/// Strip the ignore channel from `y_true` and mask `y_pred` with it.
///
/// Returns `(labels, masked_predictions)`.
pub fn apply_ignore_mask<B: Backend, const D: usize>(
    y_true: Tensor<B, D>,
    y_pred: Tensor<B, D>,
    ignore_channel_index: isize,
) -> Result<(Tensor<B, D>, Tensor<B, D>)> {
    let (labels, ignore_mask) = pop_channel(y_true, ignore_channel_index)?;
    let masked = mask_predictions(y_pred, ignore_mask)?;

    Ok((labels, masked))
}

#[cfg(test)]
mod tests {
    use burn::tensor::{Distribution, ElementConversion};

    use super::*;
    use crate::tests::TestBackend;

    fn values<const D: usize>(tensor: Tensor<TestBackend, D>) -> Vec<f32> {
        tensor.into_data().convert::<f32>().to_vec::<f32>().unwrap()
    }

    #[test]
    fn pop_channel_removes_one_channel_and_keeps_axis() {
        let device = Default::default();
        let tensor =
            Tensor::<TestBackend, 4>::random([2, 3, 3, 4], Distribution::Default, &device);

        let (remainder, extracted) = pop_channel(tensor, 1).unwrap();

        assert_eq!(remainder.dims(), [2, 3, 3, 3]);
        assert_eq!(extracted.dims(), [2, 3, 3, 1]);
    }

    #[test]
    fn pop_channel_reassembles_to_the_input() {
        let device = Default::default();
        let channels = 4;
        let tensor =
            Tensor::<TestBackend, 4>::random([2, 5, 5, channels], Distribution::Default, &device);

        for index in 0..channels {
            let (remainder, extracted) = pop_channel(tensor.clone(), index as isize).unwrap();

            let mut parts = Vec::new();
            if index > 0 {
                parts.push(remainder.clone().narrow(3, 0, index));
            }
            parts.push(extracted);
            if index < channels - 1 {
                parts.push(remainder.narrow(3, index, channels - 1 - index));
            }
            let rebuilt = Tensor::cat(parts, 3);

            assert_eq!(values(rebuilt), values(tensor.clone()));
        }
    }

    #[test]
    fn negative_indices_count_from_the_end() {
        let device = Default::default();
        let tensor =
            Tensor::<TestBackend, 4>::random([1, 4, 4, 3], Distribution::Default, &device);

        for index in -3isize..=-1 {
            let (rem_neg, ext_neg) = pop_channel(tensor.clone(), index).unwrap();
            let (rem_pos, ext_pos) = pop_channel(tensor.clone(), index + 3).unwrap();

            assert_eq!(values(rem_neg), values(rem_pos));
            assert_eq!(values(ext_neg), values(ext_pos));
        }
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let device = Default::default();
        let tensor = Tensor::<TestBackend, 4>::zeros([1, 2, 2, 3], &device);

        assert!(matches!(
            pop_channel(tensor.clone(), 3),
            Err(Error::InvalidChannelIndex {
                index: 3,
                channels: 3
            })
        ));
        assert!(matches!(
            pop_channel(tensor, -4),
            Err(Error::InvalidChannelIndex { .. })
        ));
    }

    #[test]
    fn works_on_any_rank() {
        let device = Default::default();
        let tensor = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]], &device);

        let (remainder, extracted) = pop_channel(tensor, -1).unwrap();

        assert_eq!(values(remainder), vec![1.0, 2.0, 4.0, 5.0]);
        assert_eq!(values(extracted), vec![3.0, 6.0]);
    }

    #[test]
    fn mask_predictions_zeroes_ignored_pixels_on_every_channel() {
        let device = Default::default();
        let y_pred = Tensor::<TestBackend, 4>::from_floats(
            [[[[0.2, 0.8], [0.6, 0.4]], [[0.9, 0.1], [0.5, 0.5]]]],
            &device,
        );
        let mask = Tensor::<TestBackend, 4>::from_floats([[[[1.0], [0.0]], [[0.0], [1.0]]]], &device);

        let masked = mask_predictions(y_pred, mask).unwrap();

        assert_eq!(values(masked), vec![0.0, 0.0, 0.6, 0.4, 0.9, 0.1, 0.0, 0.0]);
    }

    #[test]
    fn mask_predictions_rejects_mismatched_spatial_shape() {
        let device = Default::default();
        let y_pred = Tensor::<TestBackend, 4>::zeros([1, 4, 4, 2], &device);
        let mask = Tensor::<TestBackend, 4>::zeros([1, 2, 2, 1], &device);

        assert!(matches!(
            mask_predictions(y_pred, mask),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn all_zero_mask_leaves_predictions_untouched() {
        let device = Default::default();
        let y_true = Tensor::<TestBackend, 4>::cat(
            vec![
                Tensor::ones([1, 3, 3, 2], &device),
                Tensor::zeros([1, 3, 3, 1], &device),
            ],
            3,
        );
        let y_pred =
            Tensor::<TestBackend, 4>::random([1, 3, 3, 2], Distribution::Default, &device);

        let (labels, masked) = apply_ignore_mask(y_true, y_pred.clone(), -1).unwrap();

        assert_eq!(labels.dims(), [1, 3, 3, 2]);
        let diff = (masked - y_pred).abs().sum().into_scalar().elem::<f32>();
        assert_eq!(diff, 0.0);
    }
}
