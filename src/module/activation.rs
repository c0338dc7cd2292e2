use burn::{
    prelude::Backend,
    tensor::{activation::relu, Tensor},
};

pub fn relu6<B: Backend, const D: usize>(input: Tensor<B, D>) -> Tensor<B, D> {
    relu(input).clamp_max(6)
}

pub fn hard_sigmoid<B: Backend, const D: usize>(input: Tensor<B, D>) -> Tensor<B, D> {
    relu6(input + 3.) / 6.
}

pub fn hard_swish<B: Backend, const D: usize>(input: Tensor<B, D>) -> Tensor<B, D> {
    input.clone() * hard_sigmoid(input)
}

/// Applies `hard_swish` when `hard` is set, plain `relu` otherwise.
pub fn relu_or_hard_swish<B: Backend, const D: usize>(input: Tensor<B, D>, hard: bool) -> Tensor<B, D> {
    if hard {
        hard_swish(input)
    } else {
        relu(input)
    }
}
