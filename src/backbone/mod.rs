//! Feature extractors selectable by integer id.
//!
//! Every backbone maps `[N, 3, H, W]` images to `[N, 1000]` features, the
//! shape of an ImageNet classifier, so pretrained weights converted to burn
//! records can be dropped in unchanged.

pub mod densenet;
pub mod googlenet;
pub mod mobilenet_v3;
pub mod resnet;
pub mod shufflenet;
pub mod squeezenet;
pub mod vgg;
pub mod vit;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use densenet::{DenseNet, DenseNetConfig};
use googlenet::{googlenet, GoogLeNet};
use mobilenet_v3::{mobilenet_v3_small, MobileNetV3};
use resnet::{ResNet, ResNetConfig};
use shufflenet::{shufflenet_v2_x1_0, ShuffleNetV2};
use squeezenet::{squeezenet1_1, SqueezeNet};
use vgg::{Vgg, VggConfig};
use vit::{VisionTransformer, VisionTransformerConfig};

pub const FEATURES: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackboneKind {
    MobileNetV3Small,
    ResNet18,
    Vgg16,
    DenseNet121,
    ShuffleNetV2,
    Vit,
    Vgg19,
    Vgg19Bn,
    ResNet101,
    ResNet50,
    SqueezeNet,
    GoogLeNet,
}

impl BackboneKind {
    pub const ALL: [BackboneKind; 12] = [
        BackboneKind::MobileNetV3Small,
        BackboneKind::ResNet18,
        BackboneKind::Vgg16,
        BackboneKind::DenseNet121,
        BackboneKind::ShuffleNetV2,
        BackboneKind::Vit,
        BackboneKind::Vgg19,
        BackboneKind::Vgg19Bn,
        BackboneKind::ResNet101,
        BackboneKind::ResNet50,
        BackboneKind::SqueezeNet,
        BackboneKind::GoogLeNet,
    ];

    pub fn from_id(id: i64) -> Result<Self> {
        usize::try_from(id)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
            .ok_or(Error::UnsupportedBackbone(id))
    }

    pub fn id(&self) -> i64 {
        Self::ALL
            .iter()
            .position(|kind| kind == self)
            .map_or(-1, |index| index as i64)
    }

    /// Name used in artifact file names.
    pub fn name(&self) -> &'static str {
        match self {
            BackboneKind::MobileNetV3Small => "MobileNetV3Small",
            BackboneKind::ResNet18 => "ResNet18",
            BackboneKind::Vgg16 => "VGG16",
            BackboneKind::DenseNet121 => "DenseNet121",
            BackboneKind::ShuffleNetV2 => "ShuffleNetV2",
            BackboneKind::Vit => "ViT",
            BackboneKind::Vgg19 => "VGG19",
            BackboneKind::Vgg19Bn => "VGG19BN",
            BackboneKind::ResNet101 => "ResNet101",
            BackboneKind::ResNet50 => "ResNet50",
            BackboneKind::SqueezeNet => "SqueezeNet",
            BackboneKind::GoogLeNet => "GoogLeNet",
        }
    }

    pub fn init<B: Backend>(&self, image_size: usize, device: &B::Device) -> Backbone<B> {
        match self {
            BackboneKind::MobileNetV3Small => Backbone::MobileNetV3(mobilenet_v3_small(device)),
            BackboneKind::ResNet18 => Backbone::ResNet(ResNetConfig::resnet18().init(device)),
            BackboneKind::ResNet50 => Backbone::ResNet(ResNetConfig::resnet50().init(device)),
            BackboneKind::ResNet101 => Backbone::ResNet(ResNetConfig::resnet101().init(device)),
            BackboneKind::Vgg16 => Backbone::Vgg(VggConfig::vgg16().init(device)),
            BackboneKind::Vgg19 => Backbone::Vgg(VggConfig::vgg19().init(device)),
            BackboneKind::Vgg19Bn => {
                Backbone::Vgg(VggConfig::vgg19().with_batch_norm(true).init(device))
            }
            BackboneKind::DenseNet121 => Backbone::DenseNet(DenseNetConfig::new().init(device)),
            BackboneKind::ShuffleNetV2 => Backbone::ShuffleNetV2(shufflenet_v2_x1_0(device)),
            BackboneKind::Vit => {
                Backbone::Vit(VisionTransformerConfig::new(image_size).init(device))
            }
            BackboneKind::SqueezeNet => Backbone::SqueezeNet(squeezenet1_1(device)),
            BackboneKind::GoogLeNet => Backbone::GoogLeNet(googlenet(device)),
        }
    }
}

impl std::fmt::Display for BackboneKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Module, Debug)]
pub enum Backbone<B: Backend> {
    MobileNetV3(MobileNetV3<B>),
    ResNet(ResNet<B>),
    Vgg(Vgg<B>),
    DenseNet(DenseNet<B>),
    ShuffleNetV2(ShuffleNetV2<B>),
    Vit(VisionTransformer<B>),
    SqueezeNet(SqueezeNet<B>),
    GoogLeNet(GoogLeNet<B>),
}

impl<B: Backend> Backbone<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            Backbone::MobileNetV3(model) => model.forward(x),
            Backbone::ResNet(model) => model.forward(x),
            Backbone::Vgg(model) => model.forward(x),
            Backbone::DenseNet(model) => model.forward(x),
            Backbone::ShuffleNetV2(model) => model.forward(x),
            Backbone::Vit(model) => model.forward(x),
            Backbone::SqueezeNet(model) => model.forward(x),
            Backbone::GoogLeNet(model) => model.forward(x),
        }
    }
}
