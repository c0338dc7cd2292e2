use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    path::Path,
};

use burn::{
    module::{ModuleVisitor, ParamId},
    prelude::*,
    record::{CompactRecorder, Recorder},
    tensor::activation::relu,
    train::ClassificationOutput,
};
use clap::ValueEnum;
use nn::{
    loss::CrossEntropyLossConfig, BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear,
    LinearConfig,
};
use serde::{Deserialize, Serialize};

use crate::{
    backbone::{Backbone, BackboneKind, FEATURES},
    error::{self, Error},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NetworkVersion {
    /// Dropout and a linear layer on top of the backbone.
    Legacy,
    /// Adds relu and batch norm over the backbone features before dropout.
    Experimental,
}

#[derive(Module, Debug)]
pub struct LegacyHead<B: Backend> {
    dropout: Dropout,
    linear: Linear<B>,
}

#[derive(Module, Debug)]
pub struct ExperimentalHead<B: Backend> {
    norm: BatchNorm<B, 1>,
    dropout: Dropout,
    linear: Linear<B>,
}

#[derive(Module, Debug)]
pub enum Head<B: Backend> {
    Legacy(LegacyHead<B>),
    Experimental(ExperimentalHead<B>),
}

impl<B: Backend> Head<B> {
    fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        match self {
            Head::Legacy(head) => head.linear.forward(head.dropout.forward(x)),
            Head::Experimental(head) => {
                let [batch, features] = x.dims();
                let x = relu(x).reshape([batch, features, 1]);
                let x = head.norm.forward(x).reshape([batch, features]);
                head.linear.forward(head.dropout.forward(x))
            }
        }
    }
}

#[derive(Module, Debug)]
pub struct Model<B: Backend> {
    backbone: Backbone<B>,
    head: Head<B>,
}

impl<B: Backend> Model<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.backbone.forward(images);
        self.head.forward(features)
    }

    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);

        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }

    /// Replaces the backbone weights with a record saved by [`CompactRecorder`].
    pub fn load_backbone(mut self, path: &Path, device: &B::Device) -> error::Result<Self> {
        self.backbone = load_checked(self.backbone, path, device)?;
        Ok(self)
    }

    /// Replaces every weight with a checkpoint saved by [`CompactRecorder`].
    pub fn load_checkpoint(self, path: &Path, device: &B::Device) -> error::Result<Self> {
        load_checked(self, path, device)
    }
}

#[derive(Default)]
struct ParamShapes(Vec<Vec<usize>>);

impl<B: Backend> ModuleVisitor<B> for ParamShapes {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        self.0.push(tensor.dims().to_vec());
    }
}

fn param_shapes<B: Backend, M: Module<B>>(module: &M) -> Vec<Vec<usize>> {
    let mut shapes = ParamShapes::default();
    module.visit(&mut shapes);
    shapes.0
}

/// Loads the record at `path` into `module`.
///
/// burn panics when a record holds another enum variant or a different
/// number of layers, and silently accepts tensors of the wrong shape; both
/// are reported as [`Error::Record`] instead.
pub fn load_checked<B: Backend, M: Module<B>>(
    module: M,
    path: &Path,
    device: &B::Device,
) -> error::Result<M> {
    let mismatch = |message: &str| Error::Record {
        path: path.to_path_buf(),
        message: message.to_string(),
    };

    let expected = param_shapes(&module);
    let record: M::Record = CompactRecorder::new()
        .load(path.to_path_buf(), device)
        .map_err(|error| Error::record(path, error))?;

    let loaded = catch_unwind(AssertUnwindSafe(|| module.load_record(record)))
        .map_err(|_| mismatch("record layout does not match the model"))?;

    if param_shapes(&loaded) != expected {
        return Err(mismatch("parameter shapes do not match the model"));
    }

    Ok(loaded)
}

#[derive(Config, Debug)]
pub struct ModelConfig {
    pub backbone: BackboneKind,
    pub classes: usize,

    #[config(default = 0.5)]
    pub dropout: f64,

    #[config(default = "NetworkVersion::Legacy")]
    pub network: NetworkVersion,

    #[config(default = "crate::transform::WIDTH")]
    pub image_size: usize,
}

impl ModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Model<B> {
        let dropout = DropoutConfig::new(self.dropout).init();
        let linear = LinearConfig::new(FEATURES, self.classes).init(device);

        let head = match self.network {
            NetworkVersion::Legacy => Head::Legacy(LegacyHead { dropout, linear }),
            NetworkVersion::Experimental => Head::Experimental(ExperimentalHead {
                norm: BatchNormConfig::new(FEATURES).init(device),
                dropout,
                linear,
            }),
        };

        Model {
            backbone: self.backbone.init(self.image_size, device),
            head,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = NdArray<f32>;

    #[test]
    fn both_heads_emit_one_logit_per_class() {
        let device = Default::default();

        for network in [NetworkVersion::Legacy, NetworkVersion::Experimental] {
            let model = ModelConfig::new(BackboneKind::SqueezeNet, 4)
                .with_network(network)
                .with_image_size(64)
                .init::<TestBackend>(&device);

            let output = model.forward(Tensor::zeros([3, 3, 64, 64], &device));

            assert_eq!(output.dims(), [3, 4]);
        }
    }

    #[test]
    fn classification_output_carries_loss_and_targets() {
        let device = Default::default();
        let model = ModelConfig::new(BackboneKind::ShuffleNetV2, 4)
            .with_network(NetworkVersion::Experimental)
            .with_image_size(64)
            .init::<Autodiff<TestBackend>>(&device);
        let targets = Tensor::from_ints([0, 3], &device);

        let output = model.forward_classification(Tensor::ones([2, 3, 64, 64], &device), targets);

        assert_eq!(output.output.dims(), [2, 4]);
        assert_eq!(output.targets.dims(), [2]);
        let loss = output.loss.into_scalar();
        assert!(loss.is_finite() && loss > 0.);
    }

    #[test]
    fn backbone_record_replaces_initial_weights() {
        let temp = tempfile::tempdir().unwrap();
        let record = temp.path().join("backbone");
        let device = Default::default();
        let config = ModelConfig::new(BackboneKind::SqueezeNet, 4).with_image_size(64);
        config
            .init::<TestBackend>(&device)
            .backbone
            .save_file(&record, &CompactRecorder::new())
            .unwrap();

        let first = config
            .init::<TestBackend>(&device)
            .load_backbone(&record, &device)
            .unwrap();
        let second = config
            .init::<TestBackend>(&device)
            .load_backbone(&record, &device)
            .unwrap();

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 64, 64], &device);
        assert_eq!(
            first.backbone.forward(input.clone()).into_data(),
            second.backbone.forward(input).into_data()
        );
    }

    #[test]
    fn backbone_record_of_another_network_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let record = temp.path().join("squeezenet");
        let device = Default::default();
        ModelConfig::new(BackboneKind::SqueezeNet, 4)
            .init::<TestBackend>(&device)
            .backbone
            .save_file(&record, &CompactRecorder::new())
            .unwrap();

        let result = ModelConfig::new(BackboneKind::ShuffleNetV2, 4)
            .init::<TestBackend>(&device)
            .load_backbone(&record, &device);

        assert!(matches!(result, Err(Error::Record { .. })));
    }

    #[test]
    fn checkpoint_with_other_class_count_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let checkpoint = temp.path().join("finetuned");
        let device = Default::default();
        ModelConfig::new(BackboneKind::SqueezeNet, 4)
            .init::<TestBackend>(&device)
            .save_file(&checkpoint, &CompactRecorder::new())
            .unwrap();

        let mismatched = ModelConfig::new(BackboneKind::SqueezeNet, 3)
            .init::<TestBackend>(&device)
            .load_checkpoint(&checkpoint, &device);
        let matching = ModelConfig::new(BackboneKind::SqueezeNet, 4)
            .init::<TestBackend>(&device)
            .load_checkpoint(&checkpoint, &device);

        assert!(matches!(mismatched, Err(Error::Record { .. })));
        assert!(matching.is_ok());
    }

    #[test]
    fn missing_backbone_record_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let device = Default::default();

        let result = ModelConfig::new(BackboneKind::SqueezeNet, 4)
            .init::<TestBackend>(&device)
            .load_backbone(&temp.path().join("absent"), &device);

        assert!(matches!(result, Err(Error::Record { .. })));
    }
}
