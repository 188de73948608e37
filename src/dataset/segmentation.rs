use std::sync::Arc;

use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder, batcher::Batcher},
        dataset::Dataset,
    },
    prelude::*,
};

use super::{SegmentationBatch, SegmentationItem};

#[derive(Clone, Debug)]
pub struct SegmentationBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> SegmentationBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<SegmentationItem, SegmentationBatch<B>> for SegmentationBatcher<B> {
    fn batch(&self, items: Vec<SegmentationItem>) -> SegmentationBatch<B> {
        let mut images = Vec::with_capacity(items.len());
        let mut masks = Vec::with_capacity(items.len());

        for item in items {
            let [height, width, classes] = [item.height, item.width, item.classes];

            images.push(Tensor::<B, 3>::from_data(
                TensorData::new(item.image, Shape::new([height, width, 3]))
                    .convert::<B::FloatElem>(),
                &self.device,
            ));
            masks.push(Tensor::<B, 3>::from_data(
                TensorData::new(item.mask, Shape::new([height, width, classes]))
                    .convert::<B::FloatElem>(),
                &self.device,
            ));
        }

        SegmentationBatch::new(Tensor::stack(images, 0), Tensor::stack(masks, 0))
    }
}

#[derive(Config, Debug)]
pub struct DataLoaderConfig {
    #[config(default = "8")]
    pub batch_size: usize,
    #[config(default = "4")]
    pub num_workers: usize,
    /// Reshuffle every epoch with this seed. `None` keeps dataset order.
    pub shuffle_seed: Option<u64>,
}

/// Batches of `dataset` on `device`, ready for
/// [`SegmentationEstimator::fit`](crate::training::SegmentationEstimator::fit).
pub fn segmentation_dataloader<B, D>(
    dataset: D,
    device: B::Device,
    config: &DataLoaderConfig,
) -> Arc<dyn DataLoader<SegmentationBatch<B>>>
where
    B: Backend,
    D: Dataset<SegmentationItem> + 'static,
{
    let builder = DataLoaderBuilder::new(SegmentationBatcher::<B>::new(device))
        .batch_size(config.batch_size)
        .num_workers(config.num_workers);

    match config.shuffle_seed {
        Some(seed) => builder.shuffle(seed).build(dataset),
        None => builder.build(dataset),
    }
}
