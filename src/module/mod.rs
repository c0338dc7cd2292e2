pub mod activation;
pub mod conv_norm;
pub mod inverted_residual;
pub mod squeeze_excitation;
