// THEORY:
// An `InstanceRecord` is the summary of one grown kernel instance: which pixels
// ended up belonging to it and how confident the score map was about them.
// It is the spatial equivalent of a detected text region, before any polygon
// fitting happens downstream.
//
// Key architectural principles:
// 1.  **Exact aggregation**: The record keeps the raw score sum and the pixel
//     list. The average confidence and the pixel count are derived on demand, so
//     they can never drift away from the pixels they describe.
// 2.  **Stable wire shape**: Downstream text-detection code consumes records as
//     `[avg_confidence, pixel_count, x_0, y_0, x_1, y_1, ...]`. `to_flat` and
//     `from_flat` are the only places that know about that layout.
// 3.  **Background slot**: Index 0 of a `GroupingResult` is the background
//     "instance". It is always present and always empty, so record `i` is
//     always kernel label `i`.

use crate::core_modules::error::GroupingError;
use crate::core_modules::grid::Point;

/// All pixels assigned to one kernel instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRecord {
    /// The kernel label this record belongs to.
    pub label: usize,
    /// Sum of `score` over `pixels`, accumulated in f64.
    pub score_sum: f64,
    /// Assigned pixels, in the order they were assigned.
    pub pixels: Vec<Point>,
}

impl InstanceRecord {
    pub fn empty(label: usize) -> Self {
        Self {
            label,
            score_sum: 0.0,
            pixels: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, point: Point, score: f32) {
        self.pixels.push(point);
        self.score_sum += f64::from(score);
    }

    pub fn pixel_count(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Mean score over the assigned pixels, 0.0 for an empty instance.
    pub fn avg_confidence(&self) -> f32 {
        if self.pixels.is_empty() {
            0.0
        } else {
            (self.score_sum / self.pixels.len() as f64) as f32
        }
    }

    /// Flattens to `[avg_confidence, pixel_count, x_0, y_0, ...]`.
    pub fn to_flat(&self) -> Vec<f32> {
        let mut flat = Vec::with_capacity(2 + self.pixels.len() * 2);
        flat.push(self.avg_confidence());
        flat.push(self.pixels.len() as f32);
        for point in &self.pixels {
            flat.push(point.x as f32);
            flat.push(point.y as f32);
        }
        flat
    }

    /// Parses a flattened record. The score sum is reconstructed from the
    /// average, so it is only as precise as the f32 it came from.
    pub fn from_flat(label: usize, flat: &[f32]) -> Result<Self, GroupingError> {
        let [avg, count, coords @ ..] = flat else {
            return Err(GroupingError::MalformedEncoding(format!(
                "record {} has {} values, need at least 2",
                label,
                flat.len()
            )));
        };
        let count = as_count(*count).ok_or_else(|| {
            GroupingError::MalformedEncoding(format!(
                "record {} has non-integral pixel count {}",
                label, count
            ))
        })?;
        if count.checked_mul(2) != Some(coords.len()) {
            return Err(GroupingError::MalformedEncoding(format!(
                "record {} announces {} pixels but carries {} coordinates",
                label,
                count,
                coords.len()
            )));
        }

        let coordinate = |value: f32| {
            as_count(value)
                .and_then(|value| u32::try_from(value).ok())
                .ok_or_else(|| {
                    GroupingError::MalformedEncoding(format!(
                        "record {} has invalid coordinate {}",
                        label, value
                    ))
                })
        };
        let pixels = coords
            .chunks_exact(2)
            .map(|pair| Ok(Point::new(coordinate(pair[0])?, coordinate(pair[1])?)))
            .collect::<Result<Vec<_>, GroupingError>>()?;
        Ok(Self {
            label,
            score_sum: f64::from(*avg) * count as f64,
            pixels,
        })
    }
}

/// Converts a float that is supposed to hold a non-negative integer.
pub(crate) fn as_count(value: f32) -> Option<usize> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 {
        Some(value as usize)
    } else {
        None
    }
}

/// The full output of one grouping call: exactly `kernel_region_num` records,
/// indexed by kernel label, background included.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupingResult {
    pub records: Vec<InstanceRecord>,
}

impl GroupingResult {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The kernel instances proper, i.e. every record except background.
    pub fn instances(&self) -> &[InstanceRecord] {
        self.records.get(1..).unwrap_or(&[])
    }

    /// Total number of pixels assigned across all instances.
    pub fn assigned_pixels(&self) -> usize {
        self.records.iter().map(InstanceRecord::pixel_count).sum()
    }

    pub fn to_nested(&self) -> Vec<Vec<f32>> {
        self.records.iter().map(InstanceRecord::to_flat).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_record_flattens_to_two_zeros() {
        assert_eq!(InstanceRecord::empty(3).to_flat(), vec![0.0, 0.0]);
    }

    #[test]
    fn flat_layout_is_avg_count_then_xy_pairs() {
        let mut record = InstanceRecord::empty(1);
        record.push(Point::new(2, 5), 0.5);
        record.push(Point::new(3, 5), 1.0);
        assert_eq!(record.to_flat(), vec![0.75, 2.0, 2.0, 5.0, 3.0, 5.0]);
    }

    #[test]
    fn from_flat_rejects_count_mismatch() {
        let err = InstanceRecord::from_flat(1, &[0.5, 2.0, 1.0, 1.0]).unwrap_err();
        assert!(matches!(err, GroupingError::MalformedEncoding(_)));
    }

    #[test]
    fn from_flat_rejects_huge_count() {
        let err = InstanceRecord::from_flat(1, &[0.5, 1e30, 0.0, 0.0]).unwrap_err();
        assert!(matches!(err, GroupingError::MalformedEncoding(_)));
    }

    #[test]
    fn from_flat_rejects_fractional_count() {
        let err = InstanceRecord::from_flat(1, &[0.5, 0.5]).unwrap_err();
        assert!(matches!(err, GroupingError::MalformedEncoding(_)));
    }

    #[test]
    fn from_flat_rejects_invalid_coordinates() {
        for bad in [-1.0, 2.5, f32::NAN, f32::INFINITY, 1e12] {
            let err = InstanceRecord::from_flat(1, &[0.5, 1.0, bad, 0.0]).unwrap_err();
            assert!(matches!(err, GroupingError::MalformedEncoding(_)), "accepted x = {}", bad);
            let err = InstanceRecord::from_flat(1, &[0.5, 1.0, 0.0, bad]).unwrap_err();
            assert!(matches!(err, GroupingError::MalformedEncoding(_)), "accepted y = {}", bad);
        }
    }

    #[test]
    fn from_flat_restores_pixels() {
        let record = InstanceRecord::from_flat(2, &[0.25, 1.0, 7.0, 9.0]).unwrap();
        assert_eq!(record.label, 2);
        assert_eq!(record.pixels, vec![Point::new(7, 9)]);
        assert!((record.avg_confidence() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn instances_skip_background() {
        let result = GroupingResult {
            records: vec![InstanceRecord::empty(0), InstanceRecord::empty(1)],
        };
        assert_eq!(result.instances().len(), 1);
        assert_eq!(result.instances()[0].label, 1);
    }
}
