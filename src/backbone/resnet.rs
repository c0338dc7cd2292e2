use burn::{prelude::*, tensor::activation::relu};
use nn::{
    pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
    Linear, LinearConfig, PaddingConfig2d,
};

use super::FEATURES;
use crate::module::conv_norm::{ConvNorm, ConvNormConfig};

const STAGE_WIDTHS: [usize; 4] = [64, 128, 256, 512];
const BOTTLENECK_EXPANSION: usize = 4;

#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: ConvNorm<B>,
    conv2: ConvNorm<B>,
    downsample: Option<ConvNorm<B>>,
}

impl<B: Backend> BasicBlock<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };

        let x = relu(self.conv1.forward(x));
        let x = self.conv2.forward(x);

        relu(x + identity)
    }
}

#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    reduce: ConvNorm<B>,
    conv: ConvNorm<B>,
    expand: ConvNorm<B>,
    downsample: Option<ConvNorm<B>>,
}

impl<B: Backend> Bottleneck<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };

        let x = relu(self.reduce.forward(x));
        let x = relu(self.conv.forward(x));
        let x = self.expand.forward(x);

        relu(x + identity)
    }
}

#[derive(Module, Debug)]
pub enum ResidualBlock<B: Backend> {
    Basic(BasicBlock<B>),
    Bottleneck(Bottleneck<B>),
}

impl<B: Backend> ResidualBlock<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            ResidualBlock::Basic(block) => block.forward(x),
            ResidualBlock::Bottleneck(block) => block.forward(x),
        }
    }
}

#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    stem: ConvNorm<B>,
    max_pool: MaxPool2d,
    blocks: Vec<ResidualBlock<B>>,

    avg_pool: AdaptiveAvgPool2d,
    fc: Linear<B>,
}

impl<B: Backend> ResNet<B> {
    pub fn features(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.stem.forward(x));
        let x = self.max_pool.forward(x);
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.features(x);
        let x = self.avg_pool.forward(x);
        self.fc.forward(x.flatten(1, 3))
    }
}

#[derive(Config, Debug)]
pub struct ResNetConfig {
    /// Number of residual blocks in each of the four stages.
    pub layers: [usize; 4],
    pub bottleneck: bool,
}

impl ResNetConfig {
    pub fn resnet18() -> Self {
        Self::new([2, 2, 2, 2], false)
    }

    pub fn resnet50() -> Self {
        Self::new([3, 4, 6, 3], true)
    }

    pub fn resnet101() -> Self {
        Self::new([3, 4, 23, 3], true)
    }

    fn expansion(&self) -> usize {
        if self.bottleneck {
            BOTTLENECK_EXPANSION
        } else {
            1
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNet<B> {
        let mut input_channel = STAGE_WIDTHS[0];
        let mut blocks = vec![];

        for (stage, (&width, &count)) in STAGE_WIDTHS.iter().zip(&self.layers).enumerate() {
            let first_stride = if stage == 0 { 1 } else { 2 };

            for index in 0..count {
                let stride = if index == 0 { first_stride } else { 1 };
                blocks.push(self.block(input_channel, width, stride, device));
                input_channel = width * self.expansion();
            }
        }

        ResNet {
            stem: ConvNormConfig::square([3, STAGE_WIDTHS[0]], 7, 2).init(device),
            max_pool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            blocks,
            avg_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(input_channel, FEATURES).init(device),
        }
    }

    fn block<B: Backend>(
        &self,
        input: usize,
        width: usize,
        stride: usize,
        device: &B::Device,
    ) -> ResidualBlock<B> {
        let output = width * self.expansion();
        let downsample = (stride != 1 || input != output).then(|| {
            ConvNormConfig::new(
                [input, output],
                [1, 1],
                [stride, stride],
                PaddingConfig2d::Valid,
            )
            .init(device)
        });

        if self.bottleneck {
            ResidualBlock::Bottleneck(Bottleneck {
                reduce: ConvNormConfig::square([input, width], 1, 1).init(device),
                conv: ConvNormConfig::square([width, width], 3, stride).init(device),
                expand: ConvNormConfig::square([width, output], 1, 1).init(device),
                downsample,
            })
        } else {
            ResidualBlock::Basic(BasicBlock {
                conv1: ConvNormConfig::square([input, width], 3, stride).init(device),
                conv2: ConvNormConfig::square([width, width], 3, 1).init(device),
                downsample,
            })
        }
    }
}
