use burn::{prelude::*, tensor::activation::relu};
use nn::{
    pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
    Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
};

use super::FEATURES;
use crate::module::conv_norm::{ConvNorm, ConvNormConfig};

const NORM_EPSILON: f64 = 1e-3;

enum StageSetting {
    /// `(1x1, 3x3 reduce, 3x3, 5x5 reduce, 5x5, pool projection)` channels.
    Block([usize; 6]),
    /// Stride-2 max-pool between blocks.
    Pool { kernel: usize, padding: usize },
}

const STAGE_SETTINGS: [StageSetting; 11] = [
    StageSetting::Block([64, 96, 128, 16, 32, 32]),
    StageSetting::Block([128, 128, 192, 32, 96, 64]),
    StageSetting::Pool {
        kernel: 3,
        padding: 1,
    },
    StageSetting::Block([192, 96, 208, 16, 48, 64]),
    StageSetting::Block([160, 112, 224, 24, 64, 64]),
    StageSetting::Block([128, 128, 256, 24, 64, 64]),
    StageSetting::Block([112, 144, 288, 32, 64, 64]),
    StageSetting::Block([256, 160, 320, 32, 128, 128]),
    StageSetting::Pool {
        kernel: 2,
        padding: 0,
    },
    StageSetting::Block([256, 160, 320, 32, 128, 128]),
    StageSetting::Block([384, 192, 384, 48, 128, 128]),
];

#[derive(Module, Debug)]
pub struct BasicConv<B: Backend> {
    conv: ConvNorm<B>,
}

impl<B: Backend> BasicConv<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        relu(self.conv.forward(x))
    }

    fn new(channels: [usize; 2], kernel: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            conv: ConvNormConfig::square(channels, kernel, stride)
                .with_epsilon(NORM_EPSILON)
                .init(device),
        }
    }
}

fn max_pool(kernel: usize, stride: usize, padding: usize) -> MaxPool2d {
    MaxPool2dConfig::new([kernel, kernel])
        .with_strides([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .init()
}

#[derive(Module, Debug)]
pub struct Inception<B: Backend> {
    branch1: BasicConv<B>,
    branch2: Vec<BasicConv<B>>,
    branch3: Vec<BasicConv<B>>,
    pool: MaxPool2d,
    branch4: BasicConv<B>,
}

impl<B: Backend> Inception<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let sequential = |convs: &[BasicConv<B>], x: Tensor<B, 4>| {
            convs.iter().fold(x, |x, conv| conv.forward(x))
        };

        Tensor::cat(
            vec![
                self.branch1.forward(x.clone()),
                sequential(&self.branch2, x.clone()),
                sequential(&self.branch3, x.clone()),
                self.branch4.forward(self.pool.forward(x)),
            ],
            1,
        )
    }

    fn new(input: usize, settings: [usize; 6], device: &B::Device) -> Self {
        let [ch1x1, ch3x3_reduce, ch3x3, ch5x5_reduce, ch5x5, pool_projection] = settings;

        Self {
            branch1: BasicConv::new([input, ch1x1], 1, 1, device),
            branch2: vec![
                BasicConv::new([input, ch3x3_reduce], 1, 1, device),
                BasicConv::new([ch3x3_reduce, ch3x3], 3, 1, device),
            ],
            // 3x3 kernel in the "5x5" branch, matching torchvision weight layouts
            branch3: vec![
                BasicConv::new([input, ch5x5_reduce], 1, 1, device),
                BasicConv::new([ch5x5_reduce, ch5x5], 3, 1, device),
            ],
            pool: max_pool(3, 1, 1),
            branch4: BasicConv::new([input, pool_projection], 1, 1, device),
        }
    }

    fn output_channels(settings: [usize; 6]) -> usize {
        settings[0] + settings[2] + settings[4] + settings[5]
    }
}

#[derive(Module, Debug)]
pub enum InceptionStage<B: Backend> {
    Block(Inception<B>),
    Pool(MaxPool2d),
}

impl<B: Backend> InceptionStage<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            InceptionStage::Block(block) => block.forward(x),
            InceptionStage::Pool(pool) => pool.forward(x),
        }
    }
}

/// GoogLeNet without the auxiliary classifiers.
#[derive(Module, Debug)]
pub struct GoogLeNet<B: Backend> {
    conv1: BasicConv<B>,
    conv2: BasicConv<B>,
    conv3: BasicConv<B>,
    max_pool: MaxPool2d,
    stages: Vec<InceptionStage<B>>,

    avg_pool: AdaptiveAvgPool2d,
    dropout: Dropout,
    fc: Linear<B>,
}

impl<B: Backend> GoogLeNet<B> {
    pub fn features(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.max_pool.forward(self.conv1.forward(x));
        let x = self.conv3.forward(self.conv2.forward(x));
        let x = self.max_pool.forward(x);
        self.stages.iter().fold(x, |x, stage| stage.forward(x))
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.features(x);
        let x = self.avg_pool.forward(x).flatten(1, 3);
        let x = self.dropout.forward(x);
        self.fc.forward(x)
    }
}

pub fn googlenet<B: Backend>(device: &B::Device) -> GoogLeNet<B> {
    let mut input_channel = 192;
    let mut stages = vec![];

    for setting in STAGE_SETTINGS {
        match setting {
            StageSetting::Block(settings) => {
                stages.push(InceptionStage::Block(Inception::new(
                    input_channel,
                    settings,
                    device,
                )));
                input_channel = Inception::<B>::output_channels(settings);
            }
            StageSetting::Pool { kernel, padding } => {
                stages.push(InceptionStage::Pool(max_pool(kernel, 2, padding)))
            }
        }
    }

    GoogLeNet {
        conv1: BasicConv::new([3, 64], 7, 2, device),
        conv2: BasicConv::new([64, 64], 1, 1, device),
        conv3: BasicConv::new([64, 192], 3, 1, device),
        max_pool: max_pool(3, 2, 1),
        stages,
        avg_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        dropout: DropoutConfig::new(0.2).init(),
        fc: LinearConfig::new(input_channel, FEATURES).init(device),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn stage_four_ends_with_a_two_by_two_pool() {
        let pools: Vec<_> = STAGE_SETTINGS
            .iter()
            .filter_map(|setting| match setting {
                StageSetting::Pool { kernel, padding } => Some((*kernel, *padding)),
                StageSetting::Block(_) => None,
            })
            .collect();

        assert_eq!(pools, vec![(3, 1), (2, 0)]);
    }

    #[test]
    fn features_downsample_by_32() {
        let device = Default::default();
        let model = googlenet::<NdArray<f32>>(&device);

        let features = model.features(Tensor::zeros([1, 3, 64, 64], &device));

        assert_eq!(features.dims(), [1, 1024, 2, 2]);
    }
}
