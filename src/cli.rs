use std::path::PathBuf;

use burn::optim::{momentum::MomentumConfig, SgdConfig};
use clap::{Parser, ValueEnum};

use crate::{
    backbone::BackboneKind,
    error::Result,
    metrics::Average,
    model::{ModelConfig, NetworkVersion},
    training::{ExperimentConfig, RunOptions},
    transform::TransformVersion,
    SONG_TYPES,
};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Gpu,
    Cpu,
}

#[derive(Parser, Debug)]
#[command(
    name = "melspec-genre",
    about = "Fine-tune an image backbone to classify house sub-genres from mel-spectrograms",
    allow_negative_numbers = true
)]
pub struct Args {
    /// Backbone id: 0 mobilenet_v3_small, 1 resnet18, 2 vgg16, 3 densenet121,
    /// 4 shufflenet_v2_x1_0, 5 vit, 6 vgg19, 7 vgg19_bn, 8 resnet101, 9 resnet50,
    /// 10 squeezenet1_1, 11 googlenet.
    #[arg(long, default_value_t = -1)]
    pub id: i64,
    /// Learning rate.
    #[arg(long, default_value_t = 2e-3)]
    pub lr: f64,
    #[arg(long, default_value_t = 20)]
    pub epochs: usize,
    /// Dropout probability of the classification head.
    #[arg(long, default_value_t = 0.5)]
    pub dropout: f64,
    /// Backbone record to start from instead of random weights.
    #[arg(long)]
    pub pretrained: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = NetworkVersion::Legacy)]
    pub network_version: NetworkVersion,
    /// Augmentation applied to the training split.
    #[arg(long, value_enum, default_value_t = TransformVersion::Legacy)]
    pub transforms_version: TransformVersion,
    #[arg(long, default_value_t = 4)]
    pub batch_size: usize,
    /// Directory holding train/, val/ and test/.
    #[arg(long, default_value = "./melspecgrams/")]
    pub data_dir: PathBuf,
    #[arg(long)]
    pub do_train: bool,
    /// Average reported after evaluation.
    #[arg(long, value_enum, default_value_t = Average::Weighted)]
    pub metric: Average,
    #[arg(long, value_enum, default_value_t = Device::Gpu)]
    pub device: Device,
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
    #[arg(long, default_value = "./logs")]
    pub log_dir: PathBuf,
    /// Checkpoint to evaluate when not training.
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,
    /// SGD momentum; plain SGD when absent.
    #[arg(long)]
    pub momentum: Option<f64>,
    #[arg(long)]
    pub skip_initial_eval: bool,
}

impl Args {
    pub fn experiment_config(&self) -> Result<ExperimentConfig> {
        let model = ModelConfig::new(BackboneKind::from_id(self.id)?, SONG_TYPES.len())
            .with_dropout(self.dropout)
            .with_network(self.network_version);

        let momentum = self.momentum.map(|momentum| {
            MomentumConfig::new()
                .with_momentum(momentum)
                .with_dampening(0.)
        });
        let optimizer = SgdConfig::new().with_momentum(momentum);

        Ok(ExperimentConfig::new(model, optimizer)
            .with_epoch_count(self.epochs)
            .with_batch_size(self.batch_size)
            .with_seed(self.seed)
            .with_learning_rate(self.lr)
            .with_transforms(self.transforms_version)
            .with_eval_first(!self.skip_initial_eval)
            .with_average(self.metric))
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            data_dir: self.data_dir.clone(),
            log_root: self.log_dir.clone(),
            do_train: self.do_train,
            checkpoint: self.checkpoint.clone(),
            pretrained: self.pretrained.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn defaults_follow_the_reference_experiment() {
        let args = Args::try_parse_from(["melspec-genre", "--id", "1"]).unwrap();
        let config = args.experiment_config().unwrap();

        assert_eq!(config.model.backbone, BackboneKind::ResNet18);
        assert_eq!(config.model.classes, 4);
        assert_eq!(config.learning_rate, 2e-3);
        assert_eq!(config.epoch_count, 20);
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.average, Average::Weighted);
        assert!(config.eval_first);
        assert!(serde_json::to_value(&config.optimizer).unwrap()["momentum"].is_null());
        assert_eq!(args.device, Device::Gpu);
        assert!(!args.run_options().do_train);
    }

    #[test]
    fn default_id_is_rejected() {
        let args = Args::try_parse_from(["melspec-genre"]).unwrap();

        assert!(matches!(
            args.experiment_config(),
            Err(Error::UnsupportedBackbone(-1))
        ));
    }

    #[test]
    fn flags_reach_the_config() {
        let args = Args::try_parse_from([
            "melspec-genre",
            "--id",
            "10",
            "--network-version",
            "experimental",
            "--transforms-version",
            "experimental",
            "--metric",
            "macro",
            "--momentum",
            "0.9",
            "--skip-initial-eval",
            "--device",
            "cpu",
        ])
        .unwrap();
        let config = args.experiment_config().unwrap();

        assert_eq!(config.model.backbone, BackboneKind::SqueezeNet);
        assert_eq!(config.model.network, NetworkVersion::Experimental);
        assert_eq!(config.transforms, TransformVersion::Experimental);
        assert_eq!(config.average, Average::Macro);
        let optimizer = serde_json::to_value(&config.optimizer).unwrap();
        assert_eq!(optimizer["momentum"]["momentum"], 0.9);
        assert_eq!(optimizer["momentum"]["dampening"], 0.0);
        assert!(!config.eval_first);
        assert_eq!(args.device, Device::Cpu);
    }
}
