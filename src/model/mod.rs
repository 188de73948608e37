#[cfg(feature = "unet")]
mod blocks;
#[cfg(feature = "unet")]
mod unet;

use burn::prelude::*;

#[cfg(feature = "unet")]
pub use blocks::{
    ConvBlock, ConvBlockConfig, DecoderBlock, DecoderBlockConfig, EncoderBlock, EncoderBlockConfig,
};
#[cfg(feature = "unet")]
pub use unet::{OutputActivation, UNet, UNetConfig};

/// A trainable network mapping a channels-last image batch
/// `[batch, height, width, channels]` to a channels-last prediction batch
/// `[batch, height, width, classes]`.
pub trait SegmentationNetwork<B: Backend> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4>;
}
