//! Seed statistics: the representative embedding of every kernel instance.
//!
//! The representative of kernel `k` is the mean embedding over every pixel
//! labeled `k`. Large grids are reduced in parallel over fixed row strips.
//! The strip partition depends only on the grid height, and strip partials are
//! merged in strip order, so the parallel and sequential paths agree bit for
//! bit.

use rayon::prelude::*;
use tracing::debug;

use crate::core_modules::grid::{EmbeddingGrid, Grid};

/// Rows per strip. Fixed so the reduction order never depends on the thread count.
const ROWS_PER_STRIP: usize = 64;

/// Per-kernel pixel counts and mean embeddings. Index 0 (background) is kept
/// for uniform indexing but never populated.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelStats {
    channels: usize,
    counts: Vec<usize>,
    means: Vec<f32>,
}

struct StripPartial {
    counts: Vec<usize>,
    sums: Vec<f64>,
}

impl StripPartial {
    fn zeroed(kernel_region_num: usize, channels: usize) -> Self {
        Self {
            counts: vec![0; kernel_region_num],
            sums: vec![0.0; kernel_region_num * channels],
        }
    }
}

impl KernelStats {
    /// Computes the representatives for labels `1..kernel_region_num`.
    ///
    /// Labels outside that range are ignored; callers validate them first.
    /// The strip reduction runs on the rayon pool once the grid has at least
    /// `parallel_min_pixels` pixels.
    pub fn compute(
        embedding: &EmbeddingGrid,
        kernel_label: &Grid<i32>,
        kernel_region_num: usize,
        parallel_min_pixels: usize,
    ) -> Self {
        let channels = embedding.channels();
        let height = kernel_label.height();
        let num_strips = height.div_ceil(ROWS_PER_STRIP);
        let parallel = kernel_label.len() >= parallel_min_pixels && num_strips > 1;

        let accumulate = |strip: usize| {
            let mut partial = StripPartial::zeroed(kernel_region_num, channels);
            let first_row = strip * ROWS_PER_STRIP;
            let last_row = (first_row + ROWS_PER_STRIP).min(height);
            let width = kernel_label.width();
            for index in first_row * width..last_row * width {
                let label = kernel_label.as_slice()[index];
                if label <= 0 || label as usize >= kernel_region_num {
                    continue;
                }
                let label = label as usize;
                partial.counts[label] += 1;
                let sums = &mut partial.sums[label * channels..(label + 1) * channels];
                for (sum, value) in sums.iter_mut().zip(embedding.vector_at(index)) {
                    *sum += f64::from(*value);
                }
            }
            partial
        };

        let partials: Vec<StripPartial> = if parallel {
            (0..num_strips).into_par_iter().map(accumulate).collect()
        } else {
            (0..num_strips).map(accumulate).collect()
        };

        let mut total = StripPartial::zeroed(kernel_region_num, channels);
        for partial in partials {
            for (count, strip_count) in total.counts.iter_mut().zip(&partial.counts) {
                *count += strip_count;
            }
            for (sum, strip_sum) in total.sums.iter_mut().zip(&partial.sums) {
                *sum += strip_sum;
            }
        }

        let mut means = vec![0.0f32; kernel_region_num * channels];
        for label in 1..kernel_region_num {
            let count = total.counts[label];
            if count == 0 {
                continue;
            }
            let range = label * channels..(label + 1) * channels;
            for (mean, sum) in means[range.clone()].iter_mut().zip(&total.sums[range]) {
                *mean = (*sum / count as f64) as f32;
            }
        }

        debug!(
            kernels = kernel_region_num.saturating_sub(1),
            strips = num_strips,
            parallel,
            "computed kernel representatives"
        );

        Self {
            channels,
            counts: total.counts,
            means,
        }
    }

    pub fn kernel_region_num(&self) -> usize {
        self.counts.len()
    }

    /// Number of pixels carrying `label`.
    pub fn pixel_count(&self, label: usize) -> usize {
        self.counts.get(label).copied().unwrap_or(0)
    }

    /// The mean embedding of `label`, or `None` for background, unknown labels
    /// and kernels without any pixels.
    pub fn representative(&self, label: usize) -> Option<&[f32]> {
        if label == 0 || self.pixel_count(label) == 0 {
            return None;
        }
        Some(&self.means[label * self.channels..(label + 1) * self.channels])
    }

    /// Euclidean distance between `vector` and the representative of `label`.
    pub fn distance_to(&self, label: usize, vector: &[f32]) -> Option<f32> {
        self.representative(label)
            .map(|mean| euclidean_distance(mean, vector))
    }
}

#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(lhs, rhs)| {
            let diff = lhs - rhs;
            diff * diff
        })
        .sum::<f32>()
        .sqrt()
}
