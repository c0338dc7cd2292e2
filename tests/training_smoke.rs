use std::{fs, path::Path};

use burn::{
    backend::{ndarray::NdArrayDevice, Autodiff, NdArray},
    optim::SgdConfig,
};
use image::{Rgb, RgbImage};
use melspec_genre::{
    backbone::BackboneKind,
    error::Error,
    history::TrainingLog,
    model::ModelConfig,
    training::{run, ExperimentConfig, RunOptions},
    SONG_TYPES,
};

type Backend = Autodiff<NdArray<f32>>;

fn write_dataset(root: &Path) {
    for split in ["train", "val", "test"] {
        let dir = root.join(split);
        fs::create_dir_all(&dir).unwrap();
        for (class, song_type) in SONG_TYPES.iter().enumerate() {
            let color = Rgb([(class * 80) as u8, 128, 255 - (class * 80) as u8]);
            RgbImage::from_pixel(32, 32, color)
                .save(dir.join(format!("{song_type}_0.jpg")))
                .unwrap();
        }
    }
}

fn config() -> ExperimentConfig {
    let model = ModelConfig::new(BackboneKind::SqueezeNet, SONG_TYPES.len());
    ExperimentConfig::new(model, SgdConfig::new())
        .with_epoch_count(1)
        .with_batch_size(2)
}

fn options(root: &Path, do_train: bool) -> RunOptions {
    RunOptions {
        data_dir: root.join("data"),
        log_root: root.join("logs"),
        do_train,
        checkpoint: None,
        pretrained: None,
    }
}

#[test]
fn one_epoch_run_writes_every_artifact() {
    let temp = tempfile::tempdir().unwrap();
    write_dataset(&temp.path().join("data"));
    let options = options(temp.path(), true);

    let run_dir = run::<Backend>(&options, &config(), NdArrayDevice::Cpu).unwrap();

    let name = run_dir.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.ends_with("_SqueezeNet_LR_0.002EPOCH_1"), "{name}");
    assert!(run_dir.join("finetuned_SqueezeNet.mpk").is_file());
    assert!(run_dir.join("config.json").is_file());

    let log = TrainingLog::load(&run_dir.join("training_log.json")).unwrap();
    assert_eq!(log.epochs.len(), 1);
    assert!(log.epochs[0].train_loss.is_finite());
    assert!((0. ..=1.).contains(&log.epochs[0].val_accuracy));

    let scalars = fs::read_to_string(run_dir.join("scalars.jsonl")).unwrap();
    assert_eq!(scalars.lines().count(), 6);

    for split in ["val", "test"] {
        let plot = options
            .log_root
            .join(format!("SqueezeNet - confusion matrix on the {split} set.png"));
        assert!(plot.is_file(), "{}", plot.display());

        let report = fs::read_to_string(run_dir.join(format!("classification_report_{split}.json")))
            .unwrap();
        let report: serde_json::Value = serde_json::from_str(&report).unwrap();
        assert_eq!(report["weighted avg"]["support"], 4);
        assert!(report["future house"]["precision"].is_number());
    }

    let evaluate_only = RunOptions {
        log_root: temp.path().join("eval_logs"),
        do_train: false,
        checkpoint: Some(run_dir.join("finetuned_SqueezeNet.mpk")),
        ..options
    };
    let eval_dir = run::<Backend>(&evaluate_only, &config(), NdArrayDevice::Cpu).unwrap();

    assert!(eval_dir.join("classification_report_test.json").is_file());
    assert!(!eval_dir.join("training_log.json").exists());
}

#[test]
fn evaluation_without_training_needs_a_checkpoint() {
    let temp = tempfile::tempdir().unwrap();
    write_dataset(&temp.path().join("data"));

    let result = run::<Backend>(&options(temp.path(), false), &config(), NdArrayDevice::Cpu);

    assert!(matches!(result, Err(Error::MissingCheckpoint)));
}

#[test]
fn missing_data_dir_fails_before_training() {
    let temp = tempfile::tempdir().unwrap();

    let result = run::<Backend>(&options(temp.path(), true), &config(), NdArrayDevice::Cpu);

    assert!(matches!(result, Err(Error::Io { .. })));
    assert!(!temp.path().join("logs").exists());
}
