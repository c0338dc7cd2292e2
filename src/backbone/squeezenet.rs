use burn::{prelude::*, tensor::activation::relu};
use nn::{
    conv::{Conv2d, Conv2dConfig},
    pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
    Dropout, DropoutConfig, PaddingConfig2d,
};

use super::FEATURES;

const STEM_CHANNELS: usize = 64;

/// SqueezeNet 1.1 fire modules: squeeze, expand 1x1, expand 3x3.
/// A max-pool runs before the modules at index 0, 2 and 4.
const FIRE_SETTINGS: [(usize, usize, usize); 8] = [
    (16, 64, 64),
    (16, 64, 64),
    (32, 128, 128),
    (32, 128, 128),
    (48, 192, 192),
    (48, 192, 192),
    (64, 256, 256),
    (64, 256, 256),
];
const POOL_BEFORE: [usize; 3] = [0, 2, 4];

#[derive(Module, Debug)]
pub struct Fire<B: Backend> {
    squeeze: Conv2d<B>,
    expand1x1: Conv2d<B>,
    expand3x3: Conv2d<B>,
}

impl<B: Backend> Fire<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.squeeze.forward(x));

        Tensor::cat(
            vec![
                relu(self.expand1x1.forward(x.clone())),
                relu(self.expand3x3.forward(x)),
            ],
            1,
        )
    }

    fn new(
        input: usize,
        (squeeze, expand1x1, expand3x3): (usize, usize, usize),
        device: &B::Device,
    ) -> Self {
        Self {
            squeeze: Conv2dConfig::new([input, squeeze], [1, 1]).init(device),
            expand1x1: Conv2dConfig::new([squeeze, expand1x1], [1, 1]).init(device),
            expand3x3: Conv2dConfig::new([squeeze, expand3x3], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
        }
    }
}

#[derive(Module, Debug)]
pub struct SqueezeNet<B: Backend> {
    stem: Conv2d<B>,
    max_pool: MaxPool2d,
    fires: Vec<Fire<B>>,

    dropout: Dropout,
    classifier: Conv2d<B>,
    avg_pool: AdaptiveAvgPool2d,
}

impl<B: Backend> SqueezeNet<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = relu(self.stem.forward(x));

        for (index, fire) in self.fires.iter().enumerate() {
            if POOL_BEFORE.contains(&index) {
                x = self.max_pool.forward(x);
            }
            x = fire.forward(x);
        }

        let x = self.dropout.forward(x);
        let x = relu(self.classifier.forward(x));
        self.avg_pool.forward(x).flatten(1, 3)
    }
}

pub fn squeezenet1_1<B: Backend>(device: &B::Device) -> SqueezeNet<B> {
    let mut input_channel = STEM_CHANNELS;
    let mut fires = vec![];

    for settings in FIRE_SETTINGS {
        fires.push(Fire::new(input_channel, settings, device));
        input_channel = settings.1 + settings.2;
    }

    SqueezeNet {
        stem: Conv2dConfig::new([3, STEM_CHANNELS], [3, 3])
            .with_stride([2, 2])
            .init(device),
        max_pool: MaxPool2dConfig::new([3, 3]).with_strides([2, 2]).init(),
        fires,
        dropout: DropoutConfig::new(0.5).init(),
        classifier: Conv2dConfig::new([input_channel, FEATURES], [1, 1]).init(device),
        avg_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
    }
}
