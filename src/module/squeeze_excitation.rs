use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
    },
    prelude::*,
    tensor::activation::relu,
};

use super::activation::hard_sigmoid;

/// Channel attention: pooled channels go through a bottleneck and rescale the input.
#[derive(Module, Debug)]
pub struct SqueezeExcitation<B: Backend> {
    avg_pool: AdaptiveAvgPool2d,
    fc1: Conv2d<B>,
    fc2: Conv2d<B>,
}

impl<B: Backend> SqueezeExcitation<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let scale = self.avg_pool.forward(x.clone());
        let scale = relu(self.fc1.forward(scale));
        let scale = hard_sigmoid(self.fc2.forward(scale));

        x * scale
    }
}

#[derive(Config, Debug)]
pub struct SqueezeExcitationConfig {
    pub channels: usize,
    pub squeeze_channels: usize,
}

impl SqueezeExcitationConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> SqueezeExcitation<B> {
        SqueezeExcitation {
            avg_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc1: Conv2dConfig::new([self.channels, self.squeeze_channels], [1, 1]).init(device),
            fc2: Conv2dConfig::new([self.squeeze_channels, self.channels], [1, 1]).init(device),
        }
    }
}
