use clap::ValueEnum;
use image::{imageops::FilterType, DynamicImage, RgbImage};
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const WIDTH: usize = 96;
pub const HEIGHT: usize = 96;
pub const CHANNEL_COUNT: usize = 3;

/// ImageNet channel statistics, matching what pretrained backbones expect.
pub const MEAN: [f32; CHANNEL_COUNT] = [0.485, 0.456, 0.406];
pub const STD: [f32; CHANNEL_COUNT] = [0.229, 0.224, 0.225];

const POSTERIZE_BITS: u8 = 2;
const POSTERIZE_PROBABILITY: f64 = 0.25;
const BRIGHTNESS_RANGE: (f32, f32) = (0.5, 1.0);

pub type Pixels = [[[u8; WIDTH]; HEIGHT]; CHANNEL_COUNT];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransformVersion {
    /// Resize and normalize only.
    Legacy,
    /// Adds random posterize and brightness jitter before normalization.
    Experimental,
}

impl TransformVersion {
    /// Converts a decoded image into the fixed-size channel-first pixel layout,
    /// applying the version's augmentation.
    pub fn apply<R: Rng>(&self, image: &DynamicImage, rng: &mut R) -> Pixels {
        let mut image = resize(image);

        if *self == TransformVersion::Experimental {
            if rng.gen_bool(POSTERIZE_PROBABILITY) {
                posterize(&mut image, POSTERIZE_BITS);
            }
            let factor = rng.gen_range(BRIGHTNESS_RANGE.0..=BRIGHTNESS_RANGE.1);
            adjust_brightness(&mut image, factor);
        }

        to_pixels(&image)
    }
}

pub fn resize(image: &DynamicImage) -> RgbImage {
    image::imageops::resize(
        &image.to_rgb8(),
        WIDTH as u32,
        HEIGHT as u32,
        FilterType::Triangle,
    )
}

/// Keeps the `bits` most significant bits of every channel.
pub fn posterize(image: &mut RgbImage, bits: u8) {
    let mask = !u8::MAX.checked_shr(bits.into()).unwrap_or(0);
    for pixel in image.pixels_mut() {
        pixel.0 = pixel.0.map(|value| value & mask);
    }
}

/// Blends with a black image: a factor of 0 gives black, 1 leaves the image unchanged.
pub fn adjust_brightness(image: &mut RgbImage, factor: f32) {
    for pixel in image.pixels_mut() {
        pixel.0 = pixel
            .0
            .map(|value| (value as f32 * factor).round().clamp(0., 255.) as u8);
    }
}

fn to_pixels(image: &RgbImage) -> Pixels {
    let mut pixels = [[[0; WIDTH]; HEIGHT]; CHANNEL_COUNT];

    for (x, y, pixel) in image.enumerate_pixels() {
        let (h, w) = (y as usize, x as usize);
        let [r, g, b] = pixel.0;
        pixels[0][h][w] = r;
        pixels[1][h][w] = g;
        pixels[2][h][w] = b;
    }

    pixels
}
