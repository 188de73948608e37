use burn::{
    nn::{
        PaddingConfig2d,
        conv::{Conv2d, Conv2dConfig},
    },
    prelude::*,
    tensor::activation::{sigmoid, softmax},
};

use super::{
    SegmentationNetwork,
    blocks::{
        ConvBlock, ConvBlockConfig, DecoderBlock, DecoderBlockConfig, EncoderBlock,
        EncoderBlockConfig,
    },
};

/// Activation applied to the logits of the last 1x1 convolution.
#[derive(Config, Debug)]
pub enum OutputActivation {
    Softmax,
    Sigmoid,
    Identity,
}

/// U-Net with a configurable number of down/up-sampling stages.
///
/// Inputs and outputs are channels-last (`[batch, height, width, channels]`);
/// height and width must be divisible by `2^depth`.
#[derive(Module, Debug)]
pub struct UNet<B: Backend> {
    encoders: Vec<EncoderBlock<B>>,
    bottleneck: ConvBlock<B>,
    decoders: Vec<DecoderBlock<B>>,
    conv: Conv2d<B>,
    conv_1x1: Conv2d<B>,
    use_softmax: bool,
    use_sigmoid: bool,
    num_classes: usize,
}

#[derive(Config, Debug)]
pub struct UNetConfig {
    #[config(default = "3")]
    input_channels: usize,
    #[config(default = "2")]
    num_classes: usize,
    #[config(default = "64")]
    base_channels: usize,
    #[config(default = "4")]
    depth: usize,
    #[config(default = "0.1")]
    dropout: f64,
    #[config(default = "OutputActivation::Softmax")]
    activation: OutputActivation,
}

impl UNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> UNet<B> {
        self.assertions();

        let filters = |level: usize| self.base_channels << level;

        let encoders = (0..self.depth)
            .map(|level| {
                let input_channels = if level == 0 {
                    self.input_channels
                } else {
                    filters(level - 1)
                };
                EncoderBlockConfig::new(
                    ConvBlockConfig::new(input_channels, filters(level)).with_dropout(self.dropout),
                )
                .init(device)
            })
            .collect();

        let bottleneck = ConvBlockConfig::new(filters(self.depth - 1), filters(self.depth))
            .with_dropout(self.dropout)
            .init(device);

        let decoders = (0..self.depth)
            .rev()
            .map(|level| {
                DecoderBlockConfig::new(filters(level + 1), filters(level))
                    .with_dropout(self.dropout)
                    .init(device)
            })
            .collect();

        UNet {
            encoders,
            bottleneck,
            decoders,
            conv: Conv2dConfig::new([self.base_channels, self.base_channels], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            conv_1x1: Conv2dConfig::new([self.base_channels, self.num_classes], [1, 1])
                .init(device),
            use_softmax: matches!(self.activation, OutputActivation::Softmax),
            use_sigmoid: matches!(self.activation, OutputActivation::Sigmoid),
            num_classes: self.num_classes,
        }
    }

    fn assertions(&self) {
        assert!(self.depth >= 1, "U-Net depth must be at least 1");
        assert!(
            self.input_channels >= 1,
            "U-Net needs at least one input channel"
        );
        assert!(
            self.num_classes >= 1,
            "U-Net needs at least one output class"
        );
        assert!(
            self.base_channels >= 1,
            "U-Net needs at least one base channel"
        );
    }
}

impl<B: Backend> UNet<B> {
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Forward pass on channels-last images.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        // burn convolutions are channels-first.
        let mut x = images.permute([0, 3, 1, 2]);

        let mut skips = Vec::with_capacity(self.encoders.len());
        for encoder in &self.encoders {
            let (pooled, skip) = encoder.forward(x);
            skips.push(skip);
            x = pooled;
        }

        x = self.bottleneck.forward(x);

        for (decoder, skip) in self.decoders.iter().zip(skips.into_iter().rev()) {
            x = decoder.forward(x, skip);
        }

        let x = self.conv.forward(x);
        let x = self.conv_1x1.forward(x);

        let x = if self.use_softmax {
            softmax(x, 1)
        } else if self.use_sigmoid {
            sigmoid(x)
        } else {
            x
        };

        x.permute([0, 2, 3, 1])
    }
}

impl<B: Backend> SegmentationNetwork<B> for UNet<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        UNet::forward(self, images)
    }
}
