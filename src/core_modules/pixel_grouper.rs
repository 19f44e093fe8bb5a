// THEORY:
// The `pixel_grouper` is the engine of the crate. It implements embedding-guided
// region growing, the post-processing step of PAN-style text detectors: a
// segmentation network predicts shrunk "kernels" (the confident cores of text
// instances) plus a per-pixel embedding, and every remaining text pixel has to
// be handed to the kernel whose embedding it resembles.
//
// Key architectural principles & algorithm steps:
// 1.  **Fail fast**: Every input is validated (shapes, arguments, label range)
//     before a single pixel is assigned. An invalid call has no partial output.
// 2.  **Seed statistics**: Each kernel's representative embedding is the mean
//     over all pixels carrying its label (see `kernel_stats`).
// 3.  **Seeding**: Every foreground kernel pixel is assigned to its own label.
//     Only kernel contour pixels enter the growth queue; interior kernel pixels
//     are surrounded by their own kernel and have nothing left to claim.
// 4.  **Region growing**: A FIFO breadth-first search over 4-connected
//     neighbours (left, right, up, down). A neighbour is claimed when it is
//     foreground, still unassigned, and its embedding lies strictly closer than
//     `distance_threshold` to the claiming kernel's representative. The first
//     kernel to reach a pixel keeps it, so the result depends only on the input.
// 5.  **Aggregation**: Every assignment is recorded immediately in the owning
//     `InstanceRecord`, so pixel lists come out in assignment order and the
//     score sums always match them exactly.

use crate::core_modules::error::GroupingError;
use crate::core_modules::grid::{EmbeddingGrid, Grid, Point};
use crate::core_modules::instance::{GroupingResult, InstanceRecord};
use crate::core_modules::kernel_stats::{KernelStats, euclidean_distance};

pub mod pixel_grouper {
    use super::*;
    use std::collections::VecDeque;
    use tracing::debug;

    /// Grids below this many pixels compute their seed statistics sequentially.
    pub const DEFAULT_PARALLEL_MIN_PIXELS: usize = 1 << 20;

    /// 4-connectivity, visited in this order: left, right, up, down.
    const NEIGHBOURS: [(isize, isize); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];

    /// Marks a pixel that no kernel has claimed (yet).
    const UNASSIGNED: u32 = 0;

    /// The five per-pixel maps of one grouping call, already in canonical form.
    #[derive(Debug, Clone)]
    pub struct GroupingInputs {
        pub score: Grid<f32>,
        pub mask: Grid<bool>,
        pub embedding: EmbeddingGrid,
        pub kernel_label: Grid<i32>,
        pub kernel_contour: Grid<bool>,
    }

    impl GroupingInputs {
        /// `(width, height)` of the score map, which every other map must match.
        pub fn dims(&self) -> (usize, usize) {
            self.score.dims()
        }

        pub fn group(
            &self,
            kernel_region_num: usize,
            distance_threshold: f32,
            parallel_min_pixels: usize,
        ) -> Result<GroupingResult, GroupingError> {
            group_with_parallelism(
                &self.score,
                &self.mask,
                &self.embedding,
                &self.kernel_label,
                &self.kernel_contour,
                kernel_region_num,
                distance_threshold,
                parallel_min_pixels,
            )
        }
    }

    /// Groups the foreground pixels around the kernel instances.
    ///
    /// Returns exactly `kernel_region_num` records indexed by kernel label.
    /// Record 0 is the background and always empty.
    pub fn group(
        score: &Grid<f32>,
        mask: &Grid<bool>,
        embedding: &EmbeddingGrid,
        kernel_label: &Grid<i32>,
        kernel_contour: &Grid<bool>,
        kernel_region_num: usize,
        distance_threshold: f32,
    ) -> Result<GroupingResult, GroupingError> {
        group_with_parallelism(
            score,
            mask,
            embedding,
            kernel_label,
            kernel_contour,
            kernel_region_num,
            distance_threshold,
            DEFAULT_PARALLEL_MIN_PIXELS,
        )
    }

    /// Same as [`group`], with an explicit pixel count above which the seed
    /// statistics are reduced on the rayon pool.
    #[allow(clippy::too_many_arguments)]
    pub fn group_with_parallelism(
        score: &Grid<f32>,
        mask: &Grid<bool>,
        embedding: &EmbeddingGrid,
        kernel_label: &Grid<i32>,
        kernel_contour: &Grid<bool>,
        kernel_region_num: usize,
        distance_threshold: f32,
        parallel_min_pixels: usize,
    ) -> Result<GroupingResult, GroupingError> {
        validate(
            score,
            mask,
            embedding,
            kernel_label,
            kernel_contour,
            kernel_region_num,
            distance_threshold,
        )?;

        // --- 1. Seed Statistics ---
        let stats = KernelStats::compute(embedding, kernel_label, kernel_region_num, parallel_min_pixels);

        let (width, height) = score.dims();
        let scores = score.as_slice();
        let foreground = mask.as_slice();
        let labels = kernel_label.as_slice();
        let contours = kernel_contour.as_slice();

        let mut records: Vec<InstanceRecord> = (0..kernel_region_num).map(InstanceRecord::empty).collect();
        let mut assignment = vec![UNASSIGNED; width * height];
        let mut queue: VecDeque<usize> = VecDeque::new();

        // --- 2. Seeding ---
        for index in 0..width * height {
            let label = labels[index];
            if label == 0 || !foreground[index] {
                continue;
            }
            assignment[index] = label as u32;
            records[label as usize].push(point_at(index, width), scores[index]);
            if contours[index] {
                queue.push_back(index);
            }
        }
        let seeded = queue.len();

        // --- 3. Region Growing ---
        while let Some(index) = queue.pop_front() {
            let label = assignment[index] as usize;
            let Some(representative) = stats.representative(label) else {
                continue;
            };
            let x = (index % width) as isize;
            let y = (index / width) as isize;

            for (dx, dy) in NEIGHBOURS {
                let nx = x + dx;
                let ny = y + dy;
                if nx < 0 || ny < 0 || nx >= width as isize || ny >= height as isize {
                    continue;
                }
                let neighbour = ny as usize * width + nx as usize;
                if !foreground[neighbour] || assignment[neighbour] != UNASSIGNED {
                    continue;
                }
                // Written as a negated `<` so a NaN distance never claims a pixel.
                let distance = euclidean_distance(embedding.vector_at(neighbour), representative);
                if !(distance < distance_threshold) {
                    continue;
                }
                assignment[neighbour] = label as u32;
                records[label].push(point_at(neighbour, width), scores[neighbour]);
                queue.push_back(neighbour);
            }
        }

        let result = GroupingResult { records };
        debug!(
            width,
            height,
            kernel_region_num,
            seeds = seeded,
            assigned = result.assigned_pixels(),
            "grouped pixels"
        );
        Ok(result)
    }

    /// Checks every precondition of [`group`] without doing any work.
    pub fn validate(
        score: &Grid<f32>,
        mask: &Grid<bool>,
        embedding: &EmbeddingGrid,
        kernel_label: &Grid<i32>,
        kernel_contour: &Grid<bool>,
        kernel_region_num: usize,
        distance_threshold: f32,
    ) -> Result<(), GroupingError> {
        let expected = score.dims();
        check_dims("mask", expected, mask.dims())?;
        check_dims("embedding", expected, embedding.dims())?;
        check_dims("kernel_label", expected, kernel_label.dims())?;
        check_dims("kernel_contour", expected, kernel_contour.dims())?;

        if kernel_region_num < 1 {
            return Err(GroupingError::InvalidArgument(
                "kernel_region_num must be at least 1".to_string(),
            ));
        }
        if kernel_region_num > u32::MAX as usize {
            return Err(GroupingError::InvalidArgument(format!(
                "kernel_region_num {} does not fit the assignment map",
                kernel_region_num
            )));
        }
        if distance_threshold.is_nan() || distance_threshold < 0.0 {
            return Err(GroupingError::InvalidArgument(format!(
                "distance_threshold must be non-negative, got {}",
                distance_threshold
            )));
        }

        let width = kernel_label.width();
        if let Some(index) = kernel_label
            .as_slice()
            .iter()
            .position(|&label| label < 0 || label as usize >= kernel_region_num)
        {
            let point = point_at(index, width);
            return Err(GroupingError::LabelOutOfRange {
                label: kernel_label.as_slice()[index],
                x: point.x,
                y: point.y,
                kernel_region_num,
            });
        }
        Ok(())
    }

    fn check_dims(
        what: &'static str,
        (expected_width, expected_height): (usize, usize),
        (width, height): (usize, usize),
    ) -> Result<(), GroupingError> {
        if (width, height) != (expected_width, expected_height) {
            return Err(GroupingError::ShapeMismatch {
                what,
                expected_width,
                expected_height,
                width,
                height,
            });
        }
        Ok(())
    }

    #[inline]
    fn point_at(index: usize, width: usize) -> Point {
        Point::new((index % width) as u32, (index / width) as u32)
    }
}
