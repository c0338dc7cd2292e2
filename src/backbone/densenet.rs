use burn::{prelude::*, tensor::activation::relu};
use nn::{
    conv::{Conv2d, Conv2dConfig},
    pool::{
        AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, AvgPool2d, AvgPool2dConfig, MaxPool2d,
        MaxPool2dConfig,
    },
    BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d,
};

use super::FEATURES;
use crate::module::conv_norm::{ConvNorm, ConvNormConfig};

/// Batch norm, relu, then convolution.
#[derive(Module, Debug)]
pub struct NormConv<B: Backend> {
    norm: BatchNorm<B, 2>,
    conv: Conv2d<B>,
}

impl<B: Backend> NormConv<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.norm.forward(x));
        self.conv.forward(x)
    }

    fn new(channels: [usize; 2], kernel: usize, device: &B::Device) -> Self {
        Self {
            norm: BatchNormConfig::new(channels[0]).init(device),
            conv: Conv2dConfig::new(channels, [kernel, kernel])
                .with_padding(PaddingConfig2d::Explicit(kernel / 2, kernel / 2))
                .with_bias(false)
                .init(device),
        }
    }
}

#[derive(Module, Debug)]
pub struct DenseLayer<B: Backend> {
    bottleneck: NormConv<B>,
    conv: NormConv<B>,
}

impl<B: Backend> DenseLayer<B> {
    /// Returns only the new feature maps; the caller concatenates.
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.conv.forward(self.bottleneck.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct Transition<B: Backend> {
    conv: NormConv<B>,
    pool: AvgPool2d,
}

#[derive(Module, Debug)]
pub struct DenseBlock<B: Backend> {
    layers: Vec<DenseLayer<B>>,
    transition: Option<Transition<B>>,
}

impl<B: Backend> DenseBlock<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.layers.iter().fold(x, |x, layer| {
            let new_features = layer.forward(x.clone());
            Tensor::cat(vec![x, new_features], 1)
        });

        match &self.transition {
            Some(transition) => transition.pool.forward(transition.conv.forward(x)),
            None => x,
        }
    }
}

#[derive(Module, Debug)]
pub struct DenseNet<B: Backend> {
    stem: ConvNorm<B>,
    max_pool: MaxPool2d,
    blocks: Vec<DenseBlock<B>>,
    norm: BatchNorm<B, 2>,

    avg_pool: AdaptiveAvgPool2d,
    classifier: Linear<B>,
}

impl<B: Backend> DenseNet<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = relu(self.stem.forward(x));
        let x = self.max_pool.forward(x);
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        let x = relu(self.norm.forward(x));

        let x = self.avg_pool.forward(x).flatten(1, 3);
        self.classifier.forward(x)
    }
}

#[derive(Config, Debug)]
pub struct DenseNetConfig {
    #[config(default = 32)]
    pub growth_rate: usize,

    #[config(default = "[6, 12, 24, 16]")]
    pub block_layers: [usize; 4],

    #[config(default = 64)]
    pub initial_features: usize,

    #[config(default = 4)]
    pub bottleneck_factor: usize,
}

impl DenseNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> DenseNet<B> {
        let mut channels = self.initial_features;
        let mut blocks = vec![];

        for (index, &count) in self.block_layers.iter().enumerate() {
            let layers = (0..count)
                .map(|layer| {
                    let input = channels + layer * self.growth_rate;
                    let hidden = self.bottleneck_factor * self.growth_rate;
                    DenseLayer {
                        bottleneck: NormConv::new([input, hidden], 1, device),
                        conv: NormConv::new([hidden, self.growth_rate], 3, device),
                    }
                })
                .collect();
            channels += count * self.growth_rate;

            let transition = (index + 1 < self.block_layers.len()).then(|| {
                let output = channels / 2;
                let transition = Transition {
                    conv: NormConv::new([channels, output], 1, device),
                    pool: AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
                };
                channels = output;
                transition
            });

            blocks.push(DenseBlock { layers, transition });
        }

        DenseNet {
            stem: ConvNormConfig::square([3, self.initial_features], 7, 2).init(device),
            max_pool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            blocks,
            norm: BatchNormConfig::new(channels).init(device),
            avg_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            classifier: LinearConfig::new(channels, FEATURES).init(device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn densenet121_ends_with_1024_channels() {
        let device = Default::default();
        let model = DenseNetConfig::new().init::<NdArray<f32>>(&device);

        assert_eq!(model.blocks.len(), 4);
        assert_eq!(model.blocks.iter().map(|block| block.layers.len()).sum::<usize>(), 58);
        assert!(model.blocks[3].transition.is_none());
        assert_eq!(model.classifier.weight.dims(), [1024, FEATURES]);
    }
}
