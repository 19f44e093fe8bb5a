// THEORY:
// Adapters are the only place where outside array representations meet the
// engine. Each one takes a caller-owned buffer, checks its size, and copies it
// into a canonical `Grid`. Nothing returned here borrows from the caller.
//
// The `image` crate is the host-side array type of choice: score maps travel as
// `ImageBuffer<Luma<f32>, _>`, binary maps and small label maps as `GrayImage`,
// and label maps with more than 255 kernels as 16-bit luma buffers. The reverse
// direction (grid to PNG) exists for inspecting masks and label maps on disk.

use std::path::Path;

use image::{GrayImage, ImageBuffer, Luma};

use crate::core_modules::error::GroupingError;
use crate::core_modules::grid::{EmbeddingGrid, Grid};

pub type ScoreImage = ImageBuffer<Luma<f32>, Vec<f32>>;
pub type LabelImage16 = ImageBuffer<Luma<u16>, Vec<u16>>;

pub fn score_from_luma32f(image: &ScoreImage) -> Result<Grid<f32>, GroupingError> {
    let (width, height) = image.dimensions();
    Grid::new(width as usize, height as usize, image.as_raw().clone())
}

/// Any non-zero pixel is foreground.
pub fn mask_from_gray(image: &GrayImage) -> Result<Grid<bool>, GroupingError> {
    let (width, height) = image.dimensions();
    Grid::new(
        width as usize,
        height as usize,
        image.as_raw().iter().map(|&value| value != 0).collect(),
    )
}

pub fn labels_from_gray(image: &GrayImage) -> Result<Grid<i32>, GroupingError> {
    let (width, height) = image.dimensions();
    Grid::new(
        width as usize,
        height as usize,
        image.as_raw().iter().map(|&value| i32::from(value)).collect(),
    )
}

pub fn labels_from_luma16(image: &LabelImage16) -> Result<Grid<i32>, GroupingError> {
    let (width, height) = image.dimensions();
    Grid::new(
        width as usize,
        height as usize,
        image.as_raw().iter().map(|&value| i32::from(value)).collect(),
    )
}

/// Reads a 0/1 (or any non-zero) byte buffer, row-major.
pub fn mask_from_bytes(width: usize, height: usize, bytes: &[u8]) -> Result<Grid<bool>, GroupingError> {
    Grid::new(width, height, bytes.iter().map(|&value| value != 0).collect())
}

/// Reads an H×W×C buffer in channel-last order.
pub fn embedding_from_hwc(
    width: usize,
    height: usize,
    channels: usize,
    data: &[f32],
) -> Result<EmbeddingGrid, GroupingError> {
    EmbeddingGrid::new(width, height, channels, data.to_vec())
}

/// Reads a C×H×W buffer (network output layout) and transposes it to H×W×C.
pub fn embedding_from_chw(
    width: usize,
    height: usize,
    channels: usize,
    data: &[f32],
) -> Result<EmbeddingGrid, GroupingError> {
    let plane = width * height;
    if data.len() != plane * channels {
        return Err(GroupingError::BufferLength {
            what: "embedding",
            expected: plane * channels,
            actual: data.len(),
        });
    }
    let mut hwc = Vec::with_capacity(data.len());
    for pixel in 0..plane {
        for channel in 0..channels {
            hwc.push(data[channel * plane + pixel]);
        }
    }
    EmbeddingGrid::new(width, height, channels, hwc)
}

/// Foreground where the score is strictly above `threshold`.
pub fn mask_from_scores(score: &Grid<f32>, threshold: f32) -> Grid<bool> {
    score.map(|&value| value > threshold)
}

/// Grid dimensions as image dimensions, `None` if either exceeds `u32`.
fn image_dims((width, height): (usize, usize)) -> Option<(u32, u32)> {
    Some((u32::try_from(width).ok()?, u32::try_from(height).ok()?))
}

pub fn mask_to_gray(mask: &Grid<bool>) -> Option<GrayImage> {
    let (width, height) = image_dims(mask.dims())?;
    GrayImage::from_raw(
        width,
        height,
        mask.as_slice().iter().map(|&set| if set { 255 } else { 0 }).collect(),
    )
}

/// Labels above 255 saturate. Negative labels map to 0.
pub fn labels_to_gray(labels: &Grid<i32>) -> Option<GrayImage> {
    let (width, height) = image_dims(labels.dims())?;
    GrayImage::from_raw(
        width,
        height,
        labels.as_slice().iter().map(|&label| label.clamp(0, 255) as u8).collect(),
    )
}

/// Writes a mask as an 8-bit PNG (255 = foreground).
pub fn save_mask_png(path: impl AsRef<Path>, mask: &Grid<bool>) -> Result<(), image::ImageError> {
    let image = mask_to_gray(mask).ok_or_else(|| {
        image::ImageError::Parameter(image::error::ParameterError::from_kind(
            image::error::ParameterErrorKind::DimensionMismatch,
        ))
    })?;
    image.save(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_image_round_trips_into_grid() {
        let image = ScoreImage::from_fn(3, 2, |x, y| Luma([(x + 10 * y) as f32]));
        let grid = score_from_luma32f(&image).unwrap();
        assert_eq!(grid.dims(), (3, 2));
        assert_eq!(grid.get(2, 1), Some(&12.0));
    }

    #[test]
    fn gray_mask_treats_any_nonzero_as_foreground() {
        let image = GrayImage::from_raw(3, 1, vec![0, 1, 200]).unwrap();
        let mask = mask_from_gray(&image).unwrap();
        assert_eq!(mask.as_slice(), &[false, true, true]);
    }

    #[test]
    fn label_images_keep_values() {
        let gray = GrayImage::from_raw(2, 1, vec![0, 7]).unwrap();
        assert_eq!(labels_from_gray(&gray).unwrap().as_slice(), &[0, 7]);

        let wide = LabelImage16::from_raw(2, 1, vec![300, 1]).unwrap();
        assert_eq!(labels_from_luma16(&wide).unwrap().as_slice(), &[300, 1]);
    }

    #[test]
    fn chw_embedding_is_transposed() {
        // 2 pixels, 2 channels: plane 0 = [a0, b0], plane 1 = [a1, b1]
        let grid = embedding_from_chw(2, 1, 2, &[1.0, 2.0, 10.0, 20.0]).unwrap();
        assert_eq!(grid.vector(0, 0), &[1.0, 10.0]);
        assert_eq!(grid.vector(1, 0), &[2.0, 20.0]);
    }

    #[test]
    fn wrong_buffer_sizes_are_rejected() {
        assert!(mask_from_bytes(2, 2, &[1, 0, 1]).unwrap_err().is_shape_mismatch());
        assert!(embedding_from_chw(2, 2, 3, &[0.0; 11]).unwrap_err().is_shape_mismatch());
        assert!(embedding_from_hwc(2, 2, 3, &[0.0; 13]).unwrap_err().is_shape_mismatch());
    }

    #[test]
    fn score_threshold_builds_mask() {
        let score = Grid::from_rows(vec![vec![0.1, 0.5, 0.9]]).unwrap();
        assert_eq!(mask_from_scores(&score, 0.5).as_slice(), &[false, false, true]);
    }

    #[test]
    fn labels_saturate_when_dumped() {
        let labels = Grid::from_rows(vec![vec![-2, 3, 999]]).unwrap();
        let image = labels_to_gray(&labels).unwrap();
        assert_eq!(image.as_raw(), &vec![0, 3, 255]);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn oversized_grids_are_not_truncated() {
        // Zero rows keep the buffer empty while the width overflows u32.
        let wide = u32::MAX as usize + 1;
        assert!(mask_to_gray(&Grid::filled(wide, 0, false)).is_none());
        assert!(labels_to_gray(&Grid::filled(wide, 0, 0)).is_none());
        assert!(labels_to_gray(&Grid::filled(0, wide, 0)).is_none());
    }

    #[test]
    fn mask_png_is_written() {
        let mask = Grid::from_rows(vec![vec![true, false], vec![false, true]]).unwrap();
        let path = std::env::temp_dir().join("pixel_group_mask_dump.png");
        save_mask_png(&path, &mask).expect("Error Saving File.");

        let reloaded = image::open(&path).unwrap().to_luma8();
        assert_eq!(reloaded.as_raw(), &vec![255, 0, 0, 255]);
        let _ = std::fs::remove_file(path);
    }
}
