use burn::{prelude::*, tensor::activation::relu};
use nn::{
    conv::{Conv2d, Conv2dConfig},
    pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
    BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
};

use super::FEATURES;

const POOL: usize = 0;

/// Channel counts per convolution; `POOL` marks a 2x2 max-pool.
const VGG16_LAYOUT: [usize; 18] = [
    64, 64, POOL, 128, 128, POOL, 256, 256, 256, POOL, 512, 512, 512, POOL, 512, 512, 512, POOL,
];
const VGG19_LAYOUT: [usize; 21] = [
    64, 64, POOL, 128, 128, POOL, 256, 256, 256, 256, POOL, 512, 512, 512, 512, POOL, 512, 512,
    512, 512, POOL,
];

const POOLED_SIZE: usize = 7;
const HIDDEN: usize = 4096;

#[derive(Module, Debug)]
pub struct VggConv<B: Backend> {
    conv: Conv2d<B>,
    norm: Option<BatchNorm<B, 2>>,
}

impl<B: Backend> VggConv<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };
        relu(x)
    }
}

#[derive(Module, Debug)]
pub enum VggLayer<B: Backend> {
    Conv(VggConv<B>),
    Pool(MaxPool2d),
}

impl<B: Backend> VggLayer<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            VggLayer::Conv(conv) => conv.forward(x),
            VggLayer::Pool(pool) => pool.forward(x),
        }
    }
}

#[derive(Module, Debug)]
pub struct Vgg<B: Backend> {
    layers: Vec<VggLayer<B>>,
    avg_pool: AdaptiveAvgPool2d,

    fc1: Linear<B>,
    fc2: Linear<B>,
    fc3: Linear<B>,
    dropout: Dropout,
}

impl<B: Backend> Vgg<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.layers.iter().fold(x, |x, layer| layer.forward(x));
        let x = self.avg_pool.forward(x).flatten(1, 3);

        let x = self.dropout.forward(relu(self.fc1.forward(x)));
        let x = self.dropout.forward(relu(self.fc2.forward(x)));
        self.fc3.forward(x)
    }
}

#[derive(Config, Debug)]
pub struct VggConfig {
    pub layout: Vec<usize>,

    #[config(default = false)]
    pub batch_norm: bool,
}

impl VggConfig {
    pub fn vgg16() -> Self {
        Self::new(VGG16_LAYOUT.to_vec())
    }

    pub fn vgg19() -> Self {
        Self::new(VGG19_LAYOUT.to_vec())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Vgg<B> {
        let mut input_channel = 3;
        let mut layers = vec![];

        for &channels in &self.layout {
            if channels == POOL {
                layers.push(VggLayer::Pool(
                    MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
                ));
                continue;
            }

            layers.push(VggLayer::Conv(VggConv {
                conv: Conv2dConfig::new([input_channel, channels], [3, 3])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .init(device),
                norm: self
                    .batch_norm
                    .then(|| BatchNormConfig::new(channels).init(device)),
            }));
            input_channel = channels;
        }

        Vgg {
            layers,
            avg_pool: AdaptiveAvgPool2dConfig::new([POOLED_SIZE, POOLED_SIZE]).init(),
            fc1: LinearConfig::new(input_channel * POOLED_SIZE * POOLED_SIZE, HIDDEN).init(device),
            fc2: LinearConfig::new(HIDDEN, HIDDEN).init(device),
            fc3: LinearConfig::new(HIDDEN, FEATURES).init(device),
            dropout: DropoutConfig::new(0.5).init(),
        }
    }
}
