use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer, SgdConfig},
    prelude::*,
    record::CompactRecorder,
    tensor::backend::AutodiffBackend,
    train::ClassificationOutput,
};
use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    backbone::BackboneKind,
    data::{MelSpectrogramBatch, MelSpectrogramBatcher, MelSpectrogramDataset, Split},
    error::{self, Error},
    history::{EpochRecord, ScalarWriter, TrainingLog},
    metrics::{confusion_matrix, Average, ClassificationReport},
    model::{Model, ModelConfig},
    plot::save_confusion_matrix,
    transform::TransformVersion,
    DISPLAY_LABELS, SONG_TYPES,
};

#[derive(Config)]
pub struct ExperimentConfig {
    pub model: ModelConfig,

    pub optimizer: SgdConfig,

    #[config(default = 20)]
    pub epoch_count: usize,

    #[config(default = 4)]
    pub batch_size: usize,

    #[config(default = 0)]
    pub seed: u64,

    #[config(default = 2.0e-3)]
    pub learning_rate: f64,

    /// Augmentation for the training split; val and test always use the legacy transform.
    #[config(default = "TransformVersion::Legacy")]
    pub transforms: TransformVersion,

    /// Evaluate val and test once before the first epoch.
    #[config(default = true)]
    pub eval_first: bool,

    #[config(default = "Average::Weighted")]
    pub average: Average,
}

/// Paths and switches that describe one invocation rather than the experiment.
#[derive(Clone, Debug)]
pub struct RunOptions {
    pub data_dir: PathBuf,
    pub log_root: PathBuf,
    pub do_train: bool,
    pub checkpoint: Option<PathBuf>,
    pub pretrained: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct EpochMetrics {
    pub loss: f64,
    pub accuracy: f64,
}

#[derive(Default)]
struct EpochAccumulator {
    loss_sum: f64,
    batches: usize,
    correct: usize,
    items: usize,
}

impl EpochAccumulator {
    fn update<B: Backend>(&mut self, output: &ClassificationOutput<B>) {
        let [batch_size, _] = output.output.dims();
        let predictions = output.output.clone().argmax(1).squeeze::<1>(1);
        let correct = predictions
            .equal(output.targets.clone())
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>();

        self.loss_sum += output.loss.clone().into_scalar().elem::<f64>();
        self.batches += 1;
        self.correct += correct as usize;
        self.items += batch_size;
    }

    fn finish(self, split: Split) -> error::Result<EpochMetrics> {
        if self.items == 0 {
            return Err(Error::EmptyEpoch {
                split: split.to_string(),
            });
        }

        Ok(EpochMetrics {
            loss: self.loss_sum / self.batches as f64,
            accuracy: self.correct as f64 / self.items as f64,
        })
    }
}

/// Drives one pass over `loader`, handing every batch to `step` and
/// accumulating the mean batch loss and the accuracy over all items.
pub fn run_epoch<B, F>(
    loader: &dyn DataLoader<MelSpectrogramBatch<B>>,
    split: Split,
    epoch: usize,
    mut step: F,
) -> error::Result<EpochMetrics>
where
    B: Backend,
    F: FnMut(MelSpectrogramBatch<B>) -> ClassificationOutput<B>,
{
    let mut accumulator = EpochAccumulator::default();

    for (iteration, batch) in loader.iter().enumerate() {
        let output = step(batch);
        accumulator.update(&output);
        debug!(%split, epoch, iteration, "batch");
    }

    accumulator.finish(split)
}

pub fn train_epoch<B, O>(
    mut model: Model<B>,
    optimizer: &mut O,
    learning_rate: f64,
    loader: &dyn DataLoader<MelSpectrogramBatch<B>>,
    epoch: usize,
) -> error::Result<(Model<B>, EpochMetrics)>
where
    B: AutodiffBackend,
    O: Optimizer<Model<B>, B>,
{
    let metrics = run_epoch(loader, Split::Train, epoch, |batch| {
        let output = model.forward_classification(batch.images, batch.targets);
        let grads = GradientsParams::from_grads(output.loss.backward(), &model);
        model = optimizer.step(learning_rate, model.clone(), grads);
        output
    })?;

    info!(epoch, loss = metrics.loss, accuracy = metrics.accuracy, "train");
    Ok((model, metrics))
}

pub fn evaluate<B: Backend>(
    model: &Model<B>,
    loader: &dyn DataLoader<MelSpectrogramBatch<B>>,
    split: Split,
    epoch: usize,
) -> error::Result<EpochMetrics> {
    let metrics = run_epoch(loader, split, epoch, |batch| {
        model.forward_classification(batch.images, batch.targets)
    })?;

    info!(epoch, loss = metrics.loss, accuracy = metrics.accuracy, "{split}");
    Ok(metrics)
}

fn to_indices<B: Backend>(tensor: Tensor<B, 1, Int>) -> Vec<usize> {
    tensor
        .into_data()
        .iter::<i64>()
        .map(|value| value as usize)
        .collect()
}

/// Returns `(targets, predictions)` over every item of `loader`.
pub fn predict<B: Backend>(
    model: &Model<B>,
    loader: &dyn DataLoader<MelSpectrogramBatch<B>>,
) -> (Vec<usize>, Vec<usize>) {
    let mut targets = vec![];
    let mut predictions = vec![];

    for batch in loader.iter() {
        let output = model.forward(batch.images);
        predictions.extend(to_indices(output.argmax(1).squeeze::<1>(1)));
        targets.extend(to_indices(batch.targets));
    }

    (targets, predictions)
}

pub struct Loaders<B: AutodiffBackend> {
    pub train: Arc<dyn DataLoader<MelSpectrogramBatch<B>>>,
    pub val: Arc<dyn DataLoader<MelSpectrogramBatch<B::InnerBackend>>>,
    pub test: Arc<dyn DataLoader<MelSpectrogramBatch<B::InnerBackend>>>,
}

impl<B: AutodiffBackend> Loaders<B> {
    pub fn new(
        config: &ExperimentConfig,
        [train, val, test]: [MelSpectrogramDataset; 3],
        device: &B::Device,
    ) -> Self {
        let batcher_train = MelSpectrogramBatcher::<B>::new(device.clone());
        let batcher_valid = MelSpectrogramBatcher::<B::InnerBackend>::new(device.clone());

        // No worker threads: the seeded shuffle spans the whole split and batch order repeats.
        let build_valid = |dataset: MelSpectrogramDataset| {
            DataLoaderBuilder::new(batcher_valid.clone())
                .batch_size(config.batch_size)
                .shuffle(config.seed)
                .build(dataset)
        };

        Self {
            train: DataLoaderBuilder::new(batcher_train)
                .batch_size(config.batch_size)
                .shuffle(config.seed)
                .build(train),
            val: build_valid(val),
            test: build_valid(test),
        }
    }
}

/// Fits `model` for `config.epoch_count` epochs, evaluating val and test after each one.
pub fn train<B: AutodiffBackend>(
    config: &ExperimentConfig,
    mut model: Model<B>,
    loaders: &Loaders<B>,
    scalars: &mut ScalarWriter,
) -> error::Result<(Model<B>, TrainingLog)> {
    let mut optimizer = config.optimizer.init::<B, Model<B>>();
    let mut log = TrainingLog::default();

    if config.eval_first {
        let valid = model.valid();
        evaluate(&valid, loaders.val.as_ref(), Split::Val, 0)?;
        evaluate(&valid, loaders.test.as_ref(), Split::Test, 0)?;
    }

    for epoch in 1..=config.epoch_count {
        let (trained, train) = train_epoch(
            model,
            &mut optimizer,
            config.learning_rate,
            loaders.train.as_ref(),
            epoch,
        )?;
        model = trained;

        let valid = model.valid();
        let val = evaluate(&valid, loaders.val.as_ref(), Split::Val, epoch)?;
        let test = evaluate(&valid, loaders.test.as_ref(), Split::Test, epoch)?;

        let record = EpochRecord::new(epoch, train, val, test);
        scalars.add_record(&record)?;
        log.push(record);
    }

    if let Some(best) = log.best_val_accuracy() {
        info!(epoch = best.epoch, accuracy = best.val_accuracy, "best val accuracy");
    }

    Ok((model, log))
}

/// `<date>_<unix time>_<backbone>_LR_<lr>EPOCH_<epochs>`
pub fn run_name(
    backbone: BackboneKind,
    learning_rate: f64,
    epochs: usize,
    now: DateTime<Local>,
) -> String {
    format!(
        "{}_{}_{}_LR_{}EPOCH_{}",
        now.format("%Y-%m-%d"),
        now.timestamp_micros() as f64 / 1e6,
        backbone.name(),
        learning_rate,
        epochs
    )
}

pub fn checkpoint_name(backbone: BackboneKind) -> String {
    format!("finetuned_{}", backbone.name())
}

fn batch_count(items: usize, batch_size: usize) -> usize {
    items.div_ceil(batch_size.max(1))
}

/// Writes the confusion matrix plot and the classification report of `model` on `split`.
fn report<B: Backend>(
    model: &Model<B>,
    loader: &dyn DataLoader<MelSpectrogramBatch<B>>,
    split: Split,
    config: &ExperimentConfig,
    log_root: &Path,
    run_dir: &Path,
) -> error::Result<()> {
    let backbone = config.model.backbone;
    let (targets, predictions) = predict(model, loader);
    let matrix = confusion_matrix(&targets, &predictions, SONG_TYPES.len());

    let plot_path = log_root.join(format!(
        "{} - confusion matrix on the {split} set.png",
        backbone.name()
    ));
    save_confusion_matrix(&matrix, &DISPLAY_LABELS, backbone.name(), &plot_path)?;

    let report = ClassificationReport::from_confusion_matrix(&matrix, &SONG_TYPES);
    let report_path = run_dir.join(format!("classification_report_{split}.json"));
    let pretty = serde_json::to_string_pretty(&report).map_err(|source| Error::Json {
        path: report_path.clone(),
        source,
    })?;
    fs::write(&report_path, &pretty).map_err(|source| Error::io(&report_path, source))?;
    info!("{split} precision/recall/f1-score/support: {pretty}");

    let average = report.average(config.average);
    info!(
        %split,
        average = ?config.average,
        precision = average.precision,
        recall = average.recall,
        f1 = average.f1_score,
        "summary"
    );
    Ok(())
}

/// Loads the three splits, optionally trains, then evaluates the checkpoint on val and test.
///
/// Returns the run directory holding the artifacts.
pub fn run<B: AutodiffBackend>(
    options: &RunOptions,
    config: &ExperimentConfig,
    device: B::Device,
) -> error::Result<PathBuf> {
    B::seed(config.seed);

    let data_dir = &options.data_dir;
    let datasets = [
        MelSpectrogramDataset::load(data_dir, Split::Train, config.transforms, config.seed)?,
        MelSpectrogramDataset::load(data_dir, Split::Val, TransformVersion::Legacy, config.seed)?,
        MelSpectrogramDataset::load(data_dir, Split::Test, TransformVersion::Legacy, config.seed)?,
    ];

    let [train_len, val_len, test_len] = [0, 1, 2].map(|index| datasets[index].len());
    info!(train = train_len, val = val_len, test = test_len, "dataset length");
    info!(
        train = batch_count(train_len, config.batch_size),
        val = batch_count(val_len, config.batch_size),
        test = batch_count(test_len, config.batch_size),
        "dataloader length"
    );

    let loaders = Loaders::<B>::new(config, datasets, &device);

    let backbone = config.model.backbone;
    let run_dir = options.log_root.join(run_name(
        backbone,
        config.learning_rate,
        config.epoch_count,
        Local::now(),
    ));
    fs::create_dir_all(&run_dir).map_err(|source| Error::io(&run_dir, source))?;

    let checkpoint = if options.do_train {
        let mut model = config.model.init::<B>(&device);
        if let Some(pretrained) = &options.pretrained {
            model = model.load_backbone(pretrained, &device)?;
            info!(path = %pretrained.display(), "loaded pretrained backbone");
        }
        info!(%backbone, pretrained = options.pretrained.is_some(), "backbone");

        let config_path = run_dir.join("config.json");
        config
            .save(&config_path)
            .map_err(|source| Error::io(&config_path, source))?;

        let mut scalars = ScalarWriter::create(&run_dir.join("scalars.jsonl"))?;
        let (model, log) = train(config, model, &loaders, &mut scalars)?;
        log.save(&run_dir.join("training_log.json"))?;

        let checkpoint = run_dir.join(checkpoint_name(backbone));
        model
            .save_file(&checkpoint, &CompactRecorder::new())
            .map_err(|error| Error::record(&checkpoint, error))?;
        info!(path = %checkpoint.display(), "saved checkpoint");
        checkpoint
    } else {
        options.checkpoint.clone().ok_or(Error::MissingCheckpoint)?
    };

    let model = config
        .model
        .init::<B::InnerBackend>(&device)
        .load_checkpoint(&checkpoint, &device)?;

    for (split, loader) in [(Split::Val, &loaders.val), (Split::Test, &loaders.test)] {
        report(
            &model,
            loader.as_ref(),
            split,
            config,
            &options.log_root,
            &run_dir,
        )?;
    }

    Ok(run_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MelSpectrogram;
    use burn::backend::{Autodiff, NdArray};
    use chrono::TimeZone;

    type TrainBackend = Autodiff<NdArray<f32>>;

    /// Solid-colour items in class order, the order `MelSpectrogramDataset::load` yields.
    fn dataset(per_class: usize) -> MelSpectrogramDataset {
        let items = (0..SONG_TYPES.len() as u32)
            .flat_map(|label| {
                // red, green, blue, then white
                let image = [0, 1, 2].map(|channel| {
                    let lit = label == 3 || channel == label;
                    [[if lit { 200u8 } else { 0 }; 96]; 96]
                });
                (0..per_class).map(move |_| MelSpectrogram { image, label })
            })
            .collect();
        MelSpectrogramDataset::new(items)
    }

    fn config() -> ExperimentConfig {
        ExperimentConfig::new(
            ModelConfig::new(BackboneKind::SqueezeNet, SONG_TYPES.len()),
            SgdConfig::new(),
        )
    }

    fn train_order(config: &ExperimentConfig) -> Vec<Vec<usize>> {
        let loaders = Loaders::<TrainBackend>::new(
            config,
            [dataset(4), dataset(1), dataset(1)],
            &Default::default(),
        );
        loaders
            .train
            .iter()
            .map(|batch| to_indices(batch.targets))
            .collect()
    }

    #[test]
    fn seeded_loaders_repeat_their_order_and_mix_classes() {
        let config = config().with_seed(3);

        let first = train_order(&config);
        let second = train_order(&config);

        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
        assert_eq!(first.iter().map(Vec::len).sum::<usize>(), 16);
        assert!(
            first
                .iter()
                .any(|batch| batch.iter().any(|&label| label != batch[0])),
            "{first:?}"
        );
    }

    #[test]
    fn train_epoch_updates_the_model() {
        let device = Default::default();
        let config = config();
        let loaders = Loaders::<TrainBackend>::new(
            &config,
            [dataset(2), dataset(1), dataset(1)],
            &device,
        );
        let model = config.model.init::<TrainBackend>(&device);
        let mut optimizer = config.optimizer.init::<TrainBackend, Model<TrainBackend>>();
        let input = Tensor::<NdArray<f32>, 4>::ones([1, 3, 96, 96], &device);
        let before = model.valid().forward(input.clone()).into_data();

        let (model, metrics) =
            train_epoch(model, &mut optimizer, 1e-2, loaders.train.as_ref(), 1).unwrap();

        let after = model.valid().forward(input).into_data();
        assert_ne!(before, after);
        assert!(metrics.loss.is_finite());
        assert!((0. ..=1.).contains(&metrics.accuracy));
    }

    #[test]
    fn run_name_encodes_date_backbone_and_hyperparameters() {
        let now = Local.with_ymd_and_hms(2024, 3, 5, 12, 30, 0).unwrap();

        let name = run_name(BackboneKind::ResNet18, 2e-3, 20, now);

        assert!(name.starts_with("2024-03-05_"), "{name}");
        assert!(name.ends_with("_ResNet18_LR_0.002EPOCH_20"), "{name}");
    }

    #[test]
    fn loader_length_rounds_up() {
        assert_eq!(batch_count(9, 4), 3);
        assert_eq!(batch_count(8, 4), 2);
        assert_eq!(batch_count(0, 4), 0);
    }

    #[test]
    fn empty_epoch_is_an_error() {
        assert!(matches!(
            EpochAccumulator::default().finish(Split::Val),
            Err(Error::EmptyEpoch { split }) if split == "val"
        ));
    }
}
