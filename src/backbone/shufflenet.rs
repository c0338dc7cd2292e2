use burn::{prelude::*, tensor::activation::relu};
use nn::{
    pool::{MaxPool2d, MaxPool2dConfig},
    Linear, LinearConfig, PaddingConfig2d,
};

use super::FEATURES;
use crate::module::conv_norm::{ConvNorm, ConvNormConfig};

const STAGE_REPEATS: [usize; 3] = [4, 8, 4];
/// ShuffleNetV2 x1.0: stem, three stages, final 1x1 convolution.
const STAGE_OUT_CHANNELS: [usize; 5] = [24, 116, 232, 464, 1024];

/// Interleaves channels across `groups` so the two branches mix.
pub fn channel_shuffle<B: Backend>(x: Tensor<B, 4>, groups: usize) -> Tensor<B, 4> {
    let [batch, channels, height, width] = x.dims();

    x.reshape([batch, groups, channels / groups, height, width])
        .swap_dims(1, 2)
        .reshape([batch, channels, height, width])
}

/// Depthwise 3x3 (no activation) then pointwise 1x1 with relu.
#[derive(Module, Debug)]
pub struct Shortcut<B: Backend> {
    depthwise: ConvNorm<B>,
    pointwise: ConvNorm<B>,
}

impl<B: Backend> Shortcut<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        relu(self.pointwise.forward(self.depthwise.forward(x)))
    }
}

#[derive(Module, Debug)]
pub struct ShuffleUnit<B: Backend> {
    /// Present only on downsampling units; plain units pass half the channels through.
    shortcut: Option<Shortcut<B>>,
    reduce: ConvNorm<B>,
    depthwise: ConvNorm<B>,
    expand: ConvNorm<B>,
}

impl<B: Backend> ShuffleUnit<B> {
    fn branch(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.reduce.forward(x));
        let x = self.depthwise.forward(x);
        relu(self.expand.forward(x))
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match &self.shortcut {
            Some(shortcut) => Tensor::cat(vec![shortcut.forward(x.clone()), self.branch(x)], 1),
            None => {
                let half = x.dims()[1] / 2;
                let passthrough = x.clone().narrow(1, 0, half);
                let processed = self.branch(x.narrow(1, half, half));
                Tensor::cat(vec![passthrough, processed], 1)
            }
        };

        channel_shuffle(x, 2)
    }

    fn new(input: usize, output: usize, stride: usize, device: &B::Device) -> Self {
        let branch = output / 2;
        let branch_input = if stride > 1 { input } else { branch };

        let shortcut = (stride > 1).then(|| Shortcut {
            depthwise: ConvNormConfig::square([input, input], 3, stride)
                .with_groups(input)
                .init(device),
            pointwise: ConvNormConfig::square([input, branch], 1, 1).init(device),
        });

        Self {
            shortcut,
            reduce: ConvNormConfig::square([branch_input, branch], 1, 1).init(device),
            depthwise: ConvNormConfig::square([branch, branch], 3, stride)
                .with_groups(branch)
                .init(device),
            expand: ConvNormConfig::square([branch, branch], 1, 1).init(device),
        }
    }
}

#[derive(Module, Debug)]
pub struct ShuffleNetV2<B: Backend> {
    stem: ConvNorm<B>,
    max_pool: MaxPool2d,
    units: Vec<ShuffleUnit<B>>,
    last: ConvNorm<B>,
    fc: Linear<B>,
}

impl<B: Backend> ShuffleNetV2<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = relu(self.stem.forward(x));
        let x = self.max_pool.forward(x);
        let x = self.units.iter().fold(x, |x, unit| unit.forward(x));
        let x = relu(self.last.forward(x));

        let x = x.mean_dim(3).mean_dim(2).flatten(1, 3);
        self.fc.forward(x)
    }
}

pub fn shufflenet_v2_x1_0<B: Backend>(device: &B::Device) -> ShuffleNetV2<B> {
    let mut input_channel = STAGE_OUT_CHANNELS[0];
    let mut units = vec![];

    for (&repeats, &output) in STAGE_REPEATS.iter().zip(&STAGE_OUT_CHANNELS[1..4]) {
        units.push(ShuffleUnit::new(input_channel, output, 2, device));
        for _ in 1..repeats {
            units.push(ShuffleUnit::new(output, output, 1, device));
        }
        input_channel = output;
    }

    let last_channels = STAGE_OUT_CHANNELS[4];

    ShuffleNetV2 {
        stem: ConvNormConfig::square([3, STAGE_OUT_CHANNELS[0]], 3, 2).init(device),
        max_pool: MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(),
        units,
        last: ConvNormConfig::square([input_channel, last_channels], 1, 1).init(device),
        fc: LinearConfig::new(last_channels, FEATURES).init(device),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn channel_shuffle_interleaves_groups() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1>::from_floats([0., 1., 2., 3., 4., 5.], &device)
            .reshape([1, 6, 1, 1]);

        let shuffled = channel_shuffle(x, 2).into_data().to_vec::<f32>().unwrap();

        assert_eq!(shuffled, vec![0., 3., 1., 4., 2., 5.]);
    }
}
