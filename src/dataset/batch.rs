use burn::prelude::*;
use derive_new::new;

/// Channels-last images `[batch, height, width, 3]` and masks
/// `[batch, height, width, classes]`.
///
/// When training through a [`LazyModel`](crate::training::LazyModel) the
/// masks carry one extra channel, the ignore mask.
#[derive(new, Clone, Debug)]
pub struct SegmentationBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub masks: Tensor<B, 4>,
}
