pub mod adapters;
pub mod encoding;
pub mod error;
pub mod grid;
pub mod instance;
pub mod kernel_stats;
pub mod pixel_grouper;
