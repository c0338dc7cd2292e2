use std::{fs, path::Path};

use burn::{
    backend::NdArray,
    data::{dataloader::batcher::Batcher, dataset::Dataset},
};
use image::{Rgb, RgbImage};
use melspec_genre::{
    data::{MelSpectrogramBatcher, MelSpectrogramDataset, Split},
    transform::TransformVersion,
    SONG_TYPES,
};

/// Writes a horizontal gradient per file so augmentation has something to change.
fn write_split(root: &Path, split: &str, per_class: usize) {
    let dir = root.join(split);
    fs::create_dir_all(&dir).unwrap();
    for (class, song_type) in SONG_TYPES.iter().enumerate() {
        for index in 0..per_class {
            let image = RgbImage::from_fn(48, 40, |x, y| {
                Rgb([(x * 5) as u8, (y * 6) as u8, (class * 60 + index * 10) as u8])
            });
            image.save(dir.join(format!("{song_type}_{index}.jpg"))).unwrap();
        }
    }
}

fn images(dataset: &MelSpectrogramDataset) -> Vec<Vec<u8>> {
    dataset
        .iter()
        .map(|item| item.image.iter().flatten().flatten().copied().collect())
        .collect()
}

#[test]
fn experimental_transform_is_reproducible_for_a_seed() {
    let temp = tempfile::tempdir().unwrap();
    write_split(temp.path(), "train", 3);

    let load = |seed| {
        MelSpectrogramDataset::load(temp.path(), Split::Train, TransformVersion::Experimental, seed)
            .unwrap()
    };
    let first = load(7);
    let second = load(7);
    let other = load(8);

    assert_eq!(first.len(), 12);
    assert_eq!(first.labels(), second.labels());
    assert_eq!(images(&first), images(&second));
    assert_ne!(images(&first), images(&other));
}

#[test]
fn legacy_transform_ignores_the_seed() {
    let temp = tempfile::tempdir().unwrap();
    write_split(temp.path(), "test", 1);

    let load = |seed| {
        MelSpectrogramDataset::load(temp.path(), Split::Test, TransformVersion::Legacy, seed)
            .unwrap()
    };

    assert_eq!(images(&load(1)), images(&load(2)));
}

#[test]
fn batches_are_normalized_nchw() {
    let temp = tempfile::tempdir().unwrap();
    write_split(temp.path(), "val", 1);
    let dataset =
        MelSpectrogramDataset::load(temp.path(), Split::Val, TransformVersion::Legacy, 0).unwrap();

    let batcher = MelSpectrogramBatcher::<NdArray<f32>>::new(Default::default());
    let batch = batcher.batch(dataset.iter().collect());

    assert_eq!(batch.images.dims(), [4, 3, 96, 96]);
    assert_eq!(batch.targets.dims(), [4]);
    let max = batch.images.max().into_scalar();
    assert!(max <= (1. - 0.406) / 0.225 + 1e-4, "{max}");
    let targets: Vec<i64> = batch.targets.into_data().iter::<i64>().collect();
    assert_eq!(targets, vec![1, 0, 3, 2]);
}
