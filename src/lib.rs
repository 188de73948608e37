pub mod dataset;
pub mod error;
pub mod masking;
pub mod model;

#[cfg(feature = "training")]
pub mod training;

#[cfg(feature = "dataset")]
pub mod utils;

pub use error::{Error, IdentifierKind, Result};
pub use masking::{apply_ignore_mask, mask_predictions, pop_channel};
pub use model::SegmentationNetwork;

#[cfg(feature = "unet")]
pub use model::{UNet, UNetConfig};

#[cfg(feature = "dataset")]
pub use dataset::{ColorMap, FolderDatasetConfig, SegmentationFolderDataset};

#[cfg(feature = "training")]
pub use training::{
    CompileOptions, Estimator, FitConfig, LazyModel, MaskedLoss, MaskedMetric,
    SegmentationEstimator,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
