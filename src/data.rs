use std::{
    fs,
    path::{Path, PathBuf},
};

use burn::{
    data::{
        dataloader::batcher::Batcher,
        dataset::{Dataset, InMemDataset},
    },
    prelude::*,
};
use image::ImageReader;
use rand::{rngs::StdRng, SeedableRng};
use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{Error, Result},
    transform::{Pixels, TransformVersion, CHANNEL_COUNT, HEIGHT, MEAN, STD, WIDTH},
    SONG_TYPES,
};

const IMAGE_EXTENSION: &str = ".jpg";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct MelSpectrogram {
    pub image: Pixels,
    pub label: u32,
}

pub struct MelSpectrogramDataset {
    pub dataset: InMemDataset<MelSpectrogram>,
}

impl Dataset<MelSpectrogram> for MelSpectrogramDataset {
    fn get(&self, index: usize) -> Option<MelSpectrogram> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

impl MelSpectrogramDataset {
    pub fn new(items: Vec<MelSpectrogram>) -> Self {
        Self {
            dataset: InMemDataset::new(items),
        }
    }

    /// Reads every `<genre>_<n>.jpg` under `data_dir/<split>`.
    ///
    /// Files are visited in name order and each one gets its own rng derived
    /// from `seed`, so the result does not depend on thread scheduling.
    pub fn load(
        data_dir: &Path,
        split: Split,
        transform: TransformVersion,
        seed: u64,
    ) -> Result<Self> {
        let split_dir = data_dir.join(split.as_str());
        let paths = list_images(&split_dir)?;
        if paths.is_empty() {
            return Err(Error::EmptySplit(split_dir));
        }

        let items = paths
            .par_iter()
            .enumerate()
            .map(|(index, path)| {
                let label = label_of(path)?;
                let image = ImageReader::open(path)
                    .map_err(|source| Error::io(path, source))?
                    .decode()
                    .map_err(|source| Error::Image {
                        path: path.clone(),
                        source,
                    })?;

                let mut rng = StdRng::seed_from_u64(seed ^ (index as u64).rotate_left(32));
                Ok(MelSpectrogram {
                    image: transform.apply(&image, &mut rng),
                    label,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(split = %split, count = items.len(), "loaded spectrograms");

        Ok(Self::new(items))
    }

    pub fn labels(&self) -> Vec<u32> {
        self.dataset.iter().map(|item| item.label).collect()
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|source| Error::io(dir, source))?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| Error::io(dir, source))?;
        if entry.file_name().to_string_lossy().contains(IMAGE_EXTENSION) {
            paths.push(entry.path());
        }
    }
    paths.sort();

    Ok(paths)
}

/// Maps a file name such as `bass house_12.jpg` to its index in [`SONG_TYPES`].
pub fn label_of(path: &Path) -> Result<u32> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_default();
    let genre = file_name.split('_').next().unwrap_or_default();

    SONG_TYPES
        .iter()
        .position(|song_type| *song_type == genre)
        .map(|index| index as u32)
        .ok_or_else(|| Error::UnknownLabel {
            path: path.to_path_buf(),
            label: genre.to_string(),
        })
}

#[derive(Clone, Debug)]
pub struct MelSpectrogramBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

#[derive(Clone)]
pub struct MelSpectrogramBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> MelSpectrogramBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<MelSpectrogram, MelSpectrogramBatch<B>> for MelSpectrogramBatcher<B> {
    fn batch(&self, items: Vec<MelSpectrogram>) -> MelSpectrogramBatch<B> {
        let mean = Tensor::<B, 1>::from_floats(MEAN, &self.device).reshape([1, CHANNEL_COUNT, 1, 1]);
        let std = Tensor::<B, 1>::from_floats(STD, &self.device).reshape([1, CHANNEL_COUNT, 1, 1]);

        let images = items
            .iter()
            .map(|item| TensorData::from(item.image).convert::<B::FloatElem>())
            .map(|data| Tensor::<B, 3>::from_data(data, &self.device))
            .map(|tensor| tensor.reshape([1, CHANNEL_COUNT, HEIGHT, WIDTH]))
            .map(|tensor| tensor / 255.)
            .map(|tensor| (tensor - mean.clone()) / std.clone())
            .collect();

        let targets = items
            .iter()
            .map(|item| {
                Tensor::<B, 1, Int>::from_data(
                    [(item.label as i64).elem::<B::IntElem>()],
                    &self.device,
                )
            })
            .collect();

        let images = Tensor::cat(images, 0).to_device(&self.device);
        let targets = Tensor::cat(targets, 0).to_device(&self.device);

        MelSpectrogramBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::{Rgb, RgbImage};

    type TestBackend = NdArray<f32>;

    fn write_image(dir: &Path, name: &str, color: [u8; 3]) {
        RgbImage::from_pixel(20, 12, Rgb(color))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn label_comes_from_file_name_prefix() {
        assert_eq!(label_of(Path::new("x/future house_1.jpg")).unwrap(), 0);
        assert_eq!(label_of(Path::new("melodic house_2_b.jpg")).unwrap(), 3);
        assert!(matches!(
            label_of(Path::new("techno_3.jpg")),
            Err(Error::UnknownLabel { label, .. }) if label == "techno"
        ));
    }

    #[test]
    fn load_skips_non_jpg_and_sorts() {
        let temp = tempfile::tempdir().unwrap();
        let train = temp.path().join("train");
        fs::create_dir_all(&train).unwrap();
        write_image(&train, "progressive house_1.jpg", [255, 0, 0]);
        write_image(&train, "bass house_1.jpg", [0, 255, 0]);
        write_image(&train, "bass house_2.png", [0, 0, 255]);
        fs::write(train.join("notes.txt"), "ignored").unwrap();

        let dataset =
            MelSpectrogramDataset::load(temp.path(), Split::Train, TransformVersion::Legacy, 0)
                .unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.labels(), vec![1, 2]);
        let first = dataset.get(0).unwrap();
        assert!(first.image[1][0][0] > 200);
        assert!(first.image[0][0][0] < 50);
    }

    #[test]
    fn missing_or_empty_split_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        assert!(matches!(
            MelSpectrogramDataset::load(temp.path(), Split::Val, TransformVersion::Legacy, 0),
            Err(Error::Io { .. })
        ));

        fs::create_dir_all(temp.path().join("val")).unwrap();
        assert!(matches!(
            MelSpectrogramDataset::load(temp.path(), Split::Val, TransformVersion::Legacy, 0),
            Err(Error::EmptySplit(_))
        ));
    }

    #[test]
    fn batcher_normalizes_and_stacks() {
        let device = Default::default();
        let white = MelSpectrogram {
            image: [[[255; WIDTH]; HEIGHT]; CHANNEL_COUNT],
            label: 2,
        };
        let black = MelSpectrogram {
            image: [[[0; WIDTH]; HEIGHT]; CHANNEL_COUNT],
            label: 0,
        };

        let batch = MelSpectrogramBatcher::<TestBackend>::new(device).batch(vec![white, black]);

        assert_eq!(batch.images.dims(), [2, CHANNEL_COUNT, HEIGHT, WIDTH]);
        let targets = batch.targets.into_data().convert::<i64>().to_vec::<i64>().unwrap();
        assert_eq!(targets, vec![2, 0]);

        let values = batch.images.into_data().to_vec::<f32>().unwrap();
        let expected_white = (1. - MEAN[0]) / STD[0];
        let expected_black = (0. - MEAN[2]) / STD[2];
        assert!((values[0] - expected_white).abs() < 1e-5);
        assert!((values.last().copied().unwrap() - expected_black).abs() < 1e-5);
    }
}
