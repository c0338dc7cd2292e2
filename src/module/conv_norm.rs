use burn::{module::Module, nn::conv::Conv2d, prelude::*};
use nn::{conv::Conv2dConfig, BatchNorm, BatchNormConfig, PaddingConfig2d};

/// Convolution followed by batch norm. Activations are left to the caller.
#[derive(Module, Debug)]
pub struct ConvNorm<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
}

impl<B: Backend> ConvNorm<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        self.norm.forward(x)
    }
}

#[derive(Config, Debug)]
pub struct ConvNormConfig {
    channels: [usize; 2],

    kernel_size: [usize; 2],

    stride: [usize; 2],

    padding: PaddingConfig2d,

    #[config(default = "1")]
    groups: usize,

    #[config(default = false)]
    bias: bool,

    #[config(default = 1e-5)]
    epsilon: f64,

    #[config(default = 0.1)]
    momentum: f64,
}

impl ConvNormConfig {
    /// Square kernel with `kernel / 2` padding, so stride 1 keeps the spatial size.
    pub fn square(channels: [usize; 2], kernel: usize, stride: usize) -> Self {
        Self::new(
            channels,
            [kernel, kernel],
            [stride, stride],
            PaddingConfig2d::Explicit(kernel / 2, kernel / 2),
        )
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvNorm<B> {
        ConvNorm {
            conv: Conv2dConfig::new(self.channels, self.kernel_size)
                .with_stride(self.stride)
                .with_padding(self.padding.clone())
                .with_groups(self.groups)
                .with_bias(self.bias)
                .init(device),
            norm: BatchNormConfig::new(self.channels[1])
                .with_epsilon(self.epsilon)
                .with_momentum(self.momentum)
                .init(device),
        }
    }
}
