//! Renders confusion matrices as PNG heatmaps.

use std::path::Path;

use image::{Rgb, RgbImage};
use ndarray::Array2;

use crate::error::{Error, Result};

const CELL: u32 = 72;
const MARGIN: u32 = 48;
const TITLE_HEIGHT: u32 = 40;
const SCALE: u32 = 4;
const GLYPH_WIDTH: u32 = 3;
const GLYPH_HEIGHT: u32 = 5;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const DARK: Rgb<u8> = Rgb([0, 0, 0]);
const LIGHT: Rgb<u8> = Rgb([255, 255, 255]);

/// Anchor colors of the viridis ramp, evenly spaced over [0, 1].
const VIRIDIS: [[f32; 3]; 5] = [
    [68., 1., 84.],
    [59., 82., 139.],
    [33., 145., 140.],
    [94., 201., 98.],
    [253., 231., 37.],
];

pub fn viridis(value: f32) -> Rgb<u8> {
    let position = value.clamp(0., 1.) * (VIRIDIS.len() - 1) as f32;
    let index = (position.floor() as usize).min(VIRIDIS.len() - 2);
    let t = position - index as f32;

    let [low, high] = [VIRIDIS[index], VIRIDIS[index + 1]];
    Rgb([0, 1, 2].map(|channel| {
        (low[channel] + (high[channel] - low[channel]) * t).round() as u8
    }))
}

/// 3x5 bitmaps, one row per `u8`, three low bits used.
fn glyph(character: char) -> [u8; 5] {
    match character {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b010, 0b010, 0b010],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'A' => [0b010, 0b101, 0b111, 0b101, 0b101],
        'B' => [0b110, 0b101, 0b110, 0b101, 0b110],
        'C' => [0b011, 0b100, 0b100, 0b100, 0b011],
        'D' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'E' => [0b111, 0b100, 0b110, 0b100, 0b111],
        'F' => [0b111, 0b100, 0b110, 0b100, 0b100],
        'G' => [0b011, 0b100, 0b101, 0b101, 0b011],
        'H' => [0b101, 0b101, 0b111, 0b101, 0b101],
        'I' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'J' => [0b001, 0b001, 0b001, 0b101, 0b010],
        'K' => [0b101, 0b101, 0b110, 0b101, 0b101],
        'L' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'M' => [0b101, 0b111, 0b111, 0b101, 0b101],
        'N' => [0b110, 0b101, 0b101, 0b101, 0b101],
        'O' => [0b010, 0b101, 0b101, 0b101, 0b010],
        'P' => [0b110, 0b101, 0b110, 0b100, 0b100],
        'Q' => [0b010, 0b101, 0b101, 0b110, 0b011],
        'R' => [0b110, 0b101, 0b110, 0b101, 0b101],
        'S' => [0b011, 0b100, 0b010, 0b001, 0b110],
        'T' => [0b111, 0b010, 0b010, 0b010, 0b010],
        'U' => [0b101, 0b101, 0b101, 0b101, 0b111],
        'V' => [0b101, 0b101, 0b101, 0b101, 0b010],
        'W' => [0b101, 0b101, 0b111, 0b111, 0b101],
        'X' => [0b101, 0b101, 0b010, 0b101, 0b101],
        'Y' => [0b101, 0b101, 0b010, 0b010, 0b010],
        'Z' => [0b111, 0b001, 0b010, 0b100, 0b111],
        _ => [0; 5],
    }
}

fn text_width(text: &str) -> u32 {
    let count = text.chars().count() as u32;
    (count * (GLYPH_WIDTH + 1)).saturating_sub(1) * SCALE
}

/// Draws `text` centered on `(center_x, center_y)`.
fn draw_text(image: &mut RgbImage, text: &str, center_x: u32, center_y: u32, color: Rgb<u8>) {
    let left = center_x.saturating_sub(text_width(text) / 2);
    let top = center_y.saturating_sub(GLYPH_HEIGHT * SCALE / 2);

    for (index, character) in text.chars().enumerate() {
        let origin = left + index as u32 * (GLYPH_WIDTH + 1) * SCALE;
        for (row, bits) in glyph(character.to_ascii_uppercase()).iter().enumerate() {
            for column in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - column)) == 0 {
                    continue;
                }
                for dy in 0..SCALE {
                    for dx in 0..SCALE {
                        let x = origin + column * SCALE + dx;
                        let y = top + row as u32 * SCALE + dy;
                        if x < image.width() && y < image.height() {
                            image.put_pixel(x, y, color);
                        }
                    }
                }
            }
        }
    }
}

/// Heatmap with `title` above it, counts in each cell and `labels` along
/// both axes (predictions left to right, true labels top to bottom).
///
/// Text is drawn in upper case.
pub fn render_confusion_matrix(matrix: &Array2<u64>, labels: &[&str], title: &str) -> RgbImage {
    let classes = matrix.nrows() as u32;
    let side = MARGIN + classes * CELL;
    let mut image = RgbImage::from_pixel(side, TITLE_HEIGHT + side, BACKGROUND);
    let max = matrix.iter().copied().max().unwrap_or(0).max(1) as f32;

    draw_text(&mut image, title, side / 2, TITLE_HEIGHT / 2, DARK);

    for ((row, column), &count) in matrix.indexed_iter() {
        let intensity = count as f32 / max;
        let fill = viridis(intensity);
        let (left, top) = (
            MARGIN + column as u32 * CELL,
            TITLE_HEIGHT + row as u32 * CELL,
        );

        for y in top..top + CELL {
            for x in left..left + CELL {
                image.put_pixel(x, y, fill);
            }
        }

        let text_color = if intensity < 0.5 { LIGHT } else { DARK };
        draw_text(
            &mut image,
            &count.to_string(),
            left + CELL / 2,
            top + CELL / 2,
            text_color,
        );
    }

    for (index, label) in labels.iter().enumerate().take(classes as usize) {
        let center = index as u32 * CELL + CELL / 2;
        draw_text(&mut image, label, MARGIN / 2, TITLE_HEIGHT + center, DARK);
        draw_text(
            &mut image,
            label,
            MARGIN + center,
            TITLE_HEIGHT + classes * CELL + MARGIN / 2,
            DARK,
        );
    }

    image
}

pub fn save_confusion_matrix(
    matrix: &Array2<u64>,
    labels: &[&str],
    title: &str,
    path: &Path,
) -> Result<()> {
    render_confusion_matrix(matrix, labels, title)
        .save(path)
        .map_err(|source| Error::Image {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn viridis_spans_purple_to_yellow() {
        assert_eq!(viridis(0.), Rgb([68, 1, 84]));
        assert_eq!(viridis(1.), Rgb([253, 231, 37]));
        assert_eq!(viridis(2.), Rgb([253, 231, 37]));
    }

    #[test]
    fn cells_are_colored_by_count() {
        let matrix = array![[4u64, 0], [1, 3]];
        let image = render_confusion_matrix(&matrix, &["FH", "BH"], "");

        let side = MARGIN + 2 * CELL;
        assert_eq!(image.dimensions(), (side, TITLE_HEIGHT + side));
        // corners avoid the centered digits
        assert_eq!(*image.get_pixel(MARGIN + 1, TITLE_HEIGHT + 1), viridis(1.));
        assert_eq!(*image.get_pixel(MARGIN + CELL + 1, TITLE_HEIGHT + 1), viridis(0.));
    }

    #[test]
    fn title_is_drawn_above_the_cells() {
        let matrix = array![[1u64, 0], [0, 1]];
        let dark_in_title_band = |image: &RgbImage| {
            (0..TITLE_HEIGHT)
                .flat_map(|y| (0..image.width()).map(move |x| (x, y)))
                .filter(|&(x, y)| *image.get_pixel(x, y) == DARK)
                .count()
        };

        let untitled = render_confusion_matrix(&matrix, &["FH", "BH"], "");
        let titled = render_confusion_matrix(&matrix, &["FH", "BH"], "SqueezeNet");

        assert_eq!(dark_in_title_band(&untitled), 0);
        assert!(dark_in_title_band(&titled) > 0);
    }

    #[test]
    fn every_letter_has_a_glyph() {
        for letter in 'A'..='Z' {
            assert_ne!(glyph(letter), [0; 5], "{letter}");
        }
    }

    #[test]
    fn writes_png() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("matrix.png");

        save_confusion_matrix(&array![[1u64]], &["MH"], "ViT", &path).unwrap();

        let written = image::open(&path).unwrap();
        assert_eq!(written.width(), MARGIN + CELL);
    }
}
