use burn::prelude::*;

use super::{
    activation::relu_or_hard_swish,
    conv_norm::{ConvNorm, ConvNormConfig},
    squeeze_excitation::{SqueezeExcitation, SqueezeExcitationConfig},
};

pub const NORM_EPSILON: f64 = 1e-3;
pub const NORM_MOMENTUM: f64 = 0.01;

/// Rounds `value` to the nearest multiple of `divisor` without dropping more than 10%.
pub fn make_divisible(value: usize, divisor: usize) -> usize {
    let rounded = ((value + divisor / 2) / divisor * divisor).max(divisor);
    if (rounded as f64) < 0.9 * value as f64 {
        rounded + divisor
    } else {
        rounded
    }
}

#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    pub expand: Option<ConvNorm<B>>,
    pub depthwise: ConvNorm<B>,
    pub squeeze_excitation: Option<SqueezeExcitation<B>>,
    pub project: ConvNorm<B>,

    pub hard_swish: bool,
    pub is_identity: bool,
}

impl<B: Backend> InvertedResidual<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let original = x.clone();

        let x = match &self.expand {
            Some(expand) => relu_or_hard_swish(expand.forward(x), self.hard_swish),
            None => x,
        };

        let x = relu_or_hard_swish(self.depthwise.forward(x), self.hard_swish);

        let x = match &self.squeeze_excitation {
            Some(squeeze_excitation) => squeeze_excitation.forward(x),
            None => x,
        };

        let x = self.project.forward(x);

        if self.is_identity {
            original + x
        } else {
            x
        }
    }
}

#[derive(Config, Debug)]
pub struct InvertedResidualConfig {
    pub channels: [usize; 2],
    pub expanded_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub squeeze_excitation: bool,
    pub hard_swish: bool,
}

impl InvertedResidualConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> InvertedResidual<B> {
        let [input, output] = self.channels;
        let hidden = self.expanded_channels;

        let conv_norm = |channels, kernel, stride| {
            ConvNormConfig::square(channels, kernel, stride)
                .with_epsilon(NORM_EPSILON)
                .with_momentum(NORM_MOMENTUM)
        };

        let expand = (hidden != input).then(|| conv_norm([input, hidden], 1, 1).init(device));

        let squeeze_excitation = self.squeeze_excitation.then(|| {
            SqueezeExcitationConfig::new(hidden, make_divisible(hidden / 4, 8)).init(device)
        });

        InvertedResidual {
            expand,

            depthwise: conv_norm([hidden, hidden], self.kernel_size, self.stride)
                .with_groups(hidden)
                .init(device),

            squeeze_excitation,

            project: conv_norm([hidden, output], 1, 1).init(device),

            hard_swish: self.hard_swish,
            is_identity: self.stride == 1 && input == output,
        }
    }
}
