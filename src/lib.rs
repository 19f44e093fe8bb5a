// THEORY:
// This file is the main entry point for the `pixel_group` library crate.
// The public surface is deliberately small: callers hand a set of per-pixel maps
// (score, mask, embedding, kernel labels, kernel contours) to either the
// synchronous `GroupingPipeline` or the asynchronous `ParallelPipeline` and get
// back one record per kernel instance.
//
// The engine itself (`core_modules::pixel_grouper`) only ever sees the canonical
// grid types from `core_modules::grid`. Everything that deals with other
// representations (nested rows, `image` buffers, the legacy flattened output)
// lives at the edges, in `adapters` and `encoding`.

pub mod core_modules;
pub mod log_setup;
pub mod parallel_pipeline;
pub mod pipeline;

pub use core_modules::error::GroupingError;
pub use core_modules::grid::{EmbeddingGrid, Grid, Point};
pub use core_modules::instance::{GroupingResult, InstanceRecord};
pub use core_modules::pixel_grouper::pixel_grouper::{GroupingInputs, group};
