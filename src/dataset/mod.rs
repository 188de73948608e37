//! Segmentation data: batches, colour-coded masks and folder datasets.

mod batch;
#[cfg(feature = "dataset")]
mod color;
#[cfg(feature = "dataset")]
mod crop;
#[cfg(feature = "dataset")]
mod folder;
#[cfg(feature = "dataset")]
mod segmentation;

pub use batch::SegmentationBatch;

#[cfg(feature = "dataset")]
pub use color::{
    ClassColor, ColorMap, ColorMapConfig, combine_binary_masks, mask_by_color, onehot_to_rgb,
    rgb_to_onehot,
};
#[cfg(feature = "dataset")]
pub use crop::{center_crop_box, random_crop_origin};
#[cfg(feature = "dataset")]
pub use folder::{
    FolderDatasetConfig, SUPPORTED_FILES, SegmentationFolderDataset, SegmentationItem,
    SegmentationPair, Subset,
};
#[cfg(feature = "dataset")]
pub use segmentation::{DataLoaderConfig, SegmentationBatcher, segmentation_dataloader};
