use burn::{
    nn::{
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, PaddingConfig2d, Relu,
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
    },
    prelude::*,
};

/// Two 3x3 convolutions, each followed by batch norm and ReLU.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv1: Conv2d<B>,
    norm1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    norm2: BatchNorm<B, 2>,
    activation: Relu,
    dropout: Dropout,
}

impl<B: Backend> ConvBlock<B> {
    /// Shapes are channels-first: `[batch, channels, height, width]`.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv1.forward(x);
        let x = self.norm1.forward(x);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);

        let x = self.conv2.forward(x);
        let x = self.norm2.forward(x);
        self.activation.forward(x)
    }
}

#[derive(Config, Debug)]
pub struct ConvBlockConfig {
    input_channels: usize,
    num_filters: usize,
    #[config(default = "0.1")]
    dropout: f64,
}

impl ConvBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvBlock<B> {
        ConvBlock {
            conv1: Conv2dConfig::new([self.input_channels, self.num_filters], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            norm1: BatchNormConfig::new(self.num_filters).init(device),
            conv2: Conv2dConfig::new([self.num_filters, self.num_filters], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            norm2: BatchNormConfig::new(self.num_filters).init(device),
            activation: Relu::new(),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}

/// Convolution block followed by 2x2 max pooling. Returns the pooled
/// features and the skip connection.
#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    conv_block: ConvBlock<B>,
    max_pool: MaxPool2d,
}

impl<B: Backend> EncoderBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let skip_features = self.conv_block.forward(x);
        let x = self.max_pool.forward(skip_features.clone());

        (x, skip_features)
    }
}

#[derive(Config, Debug)]
pub struct EncoderBlockConfig {
    conv_block: ConvBlockConfig,
}

impl EncoderBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> EncoderBlock<B> {
        EncoderBlock {
            conv_block: self.conv_block.init(device),
            max_pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }
}

/// 2x transposed-convolution upsampling, concatenation with the skip
/// connection, then a convolution block.
#[derive(Module, Debug)]
pub struct DecoderBlock<B: Backend> {
    upsample: ConvTranspose2d<B>,
    conv_block: ConvBlock<B>,
}

impl<B: Backend> DecoderBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>, skip_features: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.upsample.forward(x);
        let x = Tensor::cat(vec![x, skip_features], 1);

        self.conv_block.forward(x)
    }
}

#[derive(Config, Debug)]
pub struct DecoderBlockConfig {
    input_channels: usize,
    num_filters: usize,
    #[config(default = "0.1")]
    dropout: f64,
}

impl DecoderBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> DecoderBlock<B> {
        DecoderBlock {
            upsample: ConvTranspose2dConfig::new([self.input_channels, self.num_filters], [2, 2])
                .with_stride([2, 2])
                .init(device),
            // Upsampled features and skip features are concatenated, hence 2x.
            conv_block: ConvBlockConfig::new(self.num_filters * 2, self.num_filters)
                .with_dropout(self.dropout)
                .init(device),
        }
    }
}
