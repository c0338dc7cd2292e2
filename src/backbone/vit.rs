use burn::{module::Param, prelude::*};
use nn::{
    transformer::{TransformerEncoder, TransformerEncoderConfig, TransformerEncoderInput},
    Dropout, DropoutConfig, Initializer, LayerNorm, LayerNormConfig, Linear, LinearConfig,
};

use super::FEATURES;
use crate::transform::CHANNEL_COUNT;

/// Vision transformer with a class token and learned position embeddings.
#[derive(Module, Debug)]
pub struct VisionTransformer<B: Backend> {
    patch_norm: LayerNorm<B>,
    patch_embedding: Linear<B>,
    embedding_norm: LayerNorm<B>,

    cls_token: Param<Tensor<B, 3>>,
    position_embedding: Param<Tensor<B, 3>>,
    embedding_dropout: Dropout,

    encoder: TransformerEncoder<B>,
    norm: LayerNorm<B>,
    head: Linear<B>,

    patch_size: usize,
}

impl<B: Backend> VisionTransformer<B> {
    /// Splits `[N, C, H, W]` into `[N, patches, patch * patch * C]`.
    fn patches(&self, x: Tensor<B, 4>) -> Tensor<B, 3> {
        let [batch, channels, height, width] = x.dims();
        let patch = self.patch_size;
        let (rows, columns) = (height / patch, width / patch);

        x.reshape([batch, channels, rows, patch, columns, patch])
            .permute([0, 2, 4, 3, 5, 1])
            .reshape([batch, rows * columns, patch * patch * channels])
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.patches(x);
        let [batch, _, _] = x.dims();

        let x = self.patch_norm.forward(x);
        let x = self.patch_embedding.forward(x);
        let x = self.embedding_norm.forward(x);

        let cls_tokens = Tensor::cat(vec![self.cls_token.val(); batch], 0);
        let x = Tensor::cat(vec![cls_tokens, x], 1);
        let x = x + self.position_embedding.val();
        let x = self.embedding_dropout.forward(x);

        let x = self.encoder.forward(TransformerEncoderInput::new(x));
        let x = self.norm.forward(x);

        let [_, _, dim] = x.dims();
        let cls = x.narrow(1, 0, 1).reshape([batch, dim]);
        self.head.forward(cls)
    }
}

#[derive(Config, Debug)]
pub struct VisionTransformerConfig {
    pub image_size: usize,

    #[config(default = 32)]
    pub patch_size: usize,

    #[config(default = 512)]
    pub dim: usize,

    #[config(default = 6)]
    pub depth: usize,

    #[config(default = 16)]
    pub heads: usize,

    #[config(default = 512)]
    pub mlp_dim: usize,

    #[config(default = 0.1)]
    pub dropout: f64,

    #[config(default = 0.1)]
    pub embedding_dropout: f64,
}

impl VisionTransformerConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> VisionTransformer<B> {
        let patches_per_side = self.image_size / self.patch_size;
        let patch_count = patches_per_side * patches_per_side;
        let patch_dim = CHANNEL_COUNT * self.patch_size * self.patch_size;
        let embedding = Initializer::Normal {
            mean: 0.,
            std: 1.,
        };

        VisionTransformer {
            patch_norm: LayerNormConfig::new(patch_dim).init(device),
            patch_embedding: LinearConfig::new(patch_dim, self.dim).init(device),
            embedding_norm: LayerNormConfig::new(self.dim).init(device),

            cls_token: embedding.init([1, 1, self.dim], device),
            position_embedding: embedding.init([1, patch_count + 1, self.dim], device),
            embedding_dropout: DropoutConfig::new(self.embedding_dropout).init(),

            encoder: TransformerEncoderConfig::new(self.dim, self.mlp_dim, self.heads, self.depth)
                .with_dropout(self.dropout)
                .with_norm_first(true)
                .init(device),
            norm: LayerNormConfig::new(self.dim).init(device),
            head: LinearConfig::new(self.dim, FEATURES).init(device),

            patch_size: self.patch_size,
        }
    }
}
