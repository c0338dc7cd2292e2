use burn::prelude::*;
use nn::{
    pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
    Dropout, DropoutConfig, Linear, LinearConfig,
};

use super::FEATURES;
use crate::module::{
    activation::hard_swish,
    conv_norm::{ConvNorm, ConvNormConfig},
    inverted_residual::{InvertedResidual, InvertedResidualConfig, NORM_EPSILON, NORM_MOMENTUM},
};

const STEM_CHANNELS: usize = 16;
const LAST_CHANNELS: usize = 1024;

const INVERTED_RESIDUAL_SETTINGS: [(usize, usize, usize, bool, bool, usize); 11] = [
    // kernel, expanded, out, squeeze-excitation, hard-swish, stride
    (3, 16, 16, true, false, 2),
    (3, 72, 24, false, false, 2),
    (3, 88, 24, false, false, 1),
    (5, 96, 40, true, true, 2),
    (5, 240, 40, true, true, 1),
    (5, 240, 40, true, true, 1),
    (5, 120, 48, true, true, 1),
    (5, 144, 48, true, true, 1),
    (5, 288, 96, true, true, 2),
    (5, 576, 96, true, true, 1),
    (5, 576, 96, true, true, 1),
];

#[derive(Module, Debug)]
struct Classifier<B: Backend> {
    hidden: Linear<B>,
    dropout: Dropout,
    output: Linear<B>,
}

impl<B: Backend> Classifier<B> {
    fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = hard_swish(self.hidden.forward(x));
        let x = self.dropout.forward(x);
        self.output.forward(x)
    }
}

/// MobileNetV3-Small.
#[derive(Module, Debug)]
pub struct MobileNetV3<B: Backend> {
    stem: ConvNorm<B>,
    blocks: Vec<InvertedResidual<B>>,
    last: ConvNorm<B>,

    avg_pool: AdaptiveAvgPool2d,
    classifier: Classifier<B>,
}

impl<B: Backend> MobileNetV3<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = hard_swish(self.stem.forward(x));
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        let x = hard_swish(self.last.forward(x));

        let x = self.avg_pool.forward(x);
        let x = x.flatten(1, 3);
        self.classifier.forward(x)
    }
}

pub fn mobilenet_v3_small<B: Backend>(device: &B::Device) -> MobileNetV3<B> {
    let conv_norm = |channels, kernel, stride| {
        ConvNormConfig::square(channels, kernel, stride)
            .with_epsilon(NORM_EPSILON)
            .with_momentum(NORM_MOMENTUM)
            .init(device)
    };

    let mut input_channel = STEM_CHANNELS;
    let stem = conv_norm([3, input_channel], 3, 2);

    let mut blocks = vec![];
    for (kernel, expanded, output, squeeze_excitation, hard_swish, stride) in
        INVERTED_RESIDUAL_SETTINGS
    {
        blocks.push(
            InvertedResidualConfig::new(
                [input_channel, output],
                expanded,
                kernel,
                stride,
                squeeze_excitation,
                hard_swish,
            )
            .init(device),
        );
        input_channel = output;
    }

    let last_conv_channels = 6 * input_channel;
    let last = conv_norm([input_channel, last_conv_channels], 1, 1);

    MobileNetV3 {
        stem,
        blocks,
        last,
        avg_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        classifier: Classifier {
            hidden: LinearConfig::new(last_conv_channels, LAST_CHANNELS).init(device),
            dropout: DropoutConfig::new(0.2).init(),
            output: LinearConfig::new(LAST_CHANNELS, FEATURES).init(device),
        },
    }
}
