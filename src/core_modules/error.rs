use thiserror::Error;

/// Everything that can go wrong in a single grouping call.
///
/// All variants are raised during validation, before any region growth starts,
/// so a failed call never leaves partial output behind.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GroupingError {
    #[error("Shape mismatch for {what}: expected {expected_width}x{expected_height}, got {width}x{height}")]
    ShapeMismatch {
        what: &'static str,
        expected_width: usize,
        expected_height: usize,
        width: usize,
        height: usize,
    },

    #[error("Buffer for {what} has {actual} elements, expected {expected}")]
    BufferLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Kernel label {label} at ({x}, {y}) is outside [0, {kernel_region_num})")]
    LabelOutOfRange {
        label: i32,
        x: u32,
        y: u32,
        kernel_region_num: usize,
    },

    #[error("Malformed legacy encoding: {0}")]
    MalformedEncoding(String),
}

impl GroupingError {
    /// True for both dimension disagreements and wrongly sized backing buffers.
    pub fn is_shape_mismatch(&self) -> bool {
        matches!(
            self,
            GroupingError::ShapeMismatch { .. } | GroupingError::BufferLength { .. }
        )
    }
}
