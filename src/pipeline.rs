// THEORY:
// The `pipeline` module is the top-level synchronous API of the crate. It wraps
// the grouping engine with the concerns that sit around a single call: reading
// configuration, choosing the output encoding, logging, and remembering a short
// summary of the last run for whoever is monitoring the process.
//
// The engine itself stays a pure function. Everything here is boundary.

use std::env;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core_modules::encoding::{EncodedOutput, OutputEncoding};
use crate::core_modules::error::GroupingError;
use crate::core_modules::pixel_grouper::pixel_grouper::DEFAULT_PARALLEL_MIN_PIXELS;

// Re-export key data structures for the public API.
pub use crate::core_modules::pixel_grouper::pixel_grouper::GroupingInputs;

/// Configuration for the grouping pipelines.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Emit the legacy flattened encoding instead of one record per kernel.
    pub legacy_flatten: bool,
    /// Grids with at least this many pixels reduce their seed statistics on the
    /// rayon pool.
    pub parallel_min_pixels: usize,
    /// Number of workers used by `ParallelPipeline`.
    pub worker_pool_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            legacy_flatten: false,
            parallel_min_pixels: DEFAULT_PARALLEL_MIN_PIXELS,
            worker_pool_size: num_cpus::get(),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },

    #[error("worker_pool_size must be at least 1")]
    NoWorkers,
}

impl PipelineConfig {
    /// Reads `PIXEL_GROUP_LEGACY_FLATTEN`, `PIXEL_GROUP_PARALLEL_MIN_PIXELS` and
    /// `PIXEL_GROUP_WORKERS`. Unset variables keep their defaults; set but
    /// unparsable ones are an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Same as [`PipelineConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            legacy_flatten: parse_var(&lookup, "PIXEL_GROUP_LEGACY_FLATTEN", parse_bool)?
                .unwrap_or(defaults.legacy_flatten),
            parallel_min_pixels: parse_var(&lookup, "PIXEL_GROUP_PARALLEL_MIN_PIXELS", |s| s.parse().ok())?
                .unwrap_or(defaults.parallel_min_pixels),
            worker_pool_size: parse_var(&lookup, "PIXEL_GROUP_WORKERS", |s| s.parse().ok())?
                .unwrap_or(defaults.worker_pool_size),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_pool_size == 0 {
            return Err(ConfigError::NoWorkers);
        }
        Ok(())
    }

    pub fn output_encoding(&self) -> OutputEncoding {
        OutputEncoding::from_legacy_flag(self.legacy_flatten)
    }
}

fn parse_var<T, L, P>(lookup: &L, var: &'static str, parse: P) -> Result<Option<T>, ConfigError>
where
    L: Fn(&'static str) -> Option<String>,
    P: Fn(&str) -> Option<T>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => parse(value.trim())
            .map(Some)
            .ok_or(ConfigError::InvalidValue { var, value }),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// One grouping call: the five maps plus the two scalar arguments.
#[derive(Debug, Clone)]
pub struct GroupingRequest {
    pub inputs: GroupingInputs,
    pub kernel_region_num: usize,
    pub distance_threshold: f32,
}

/// What the pipeline remembers about its most recent successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub width: usize,
    pub height: usize,
    pub kernel_region_num: usize,
    pub non_empty_instances: usize,
    pub assigned_pixels: usize,
    pub elapsed: Duration,
}

/// The main, top-level struct for synchronous grouping.
pub struct GroupingPipeline {
    config: PipelineConfig,
    processed: u64,
    last_summary: Option<RunSummary>,
}

impl GroupingPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            processed: 0,
            last_summary: None,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Groups one request and encodes the records per the configuration.
    pub fn group(&mut self, request: &GroupingRequest) -> Result<EncodedOutput, GroupingError> {
        let started = Instant::now();
        let (width, height) = request.inputs.dims();
        debug!(
            width,
            height,
            channels = request.inputs.embedding.channels(),
            kernel_region_num = request.kernel_region_num,
            distance_threshold = request.distance_threshold,
            "grouping request"
        );

        let result = request
            .inputs
            .group(
                request.kernel_region_num,
                request.distance_threshold,
                self.config.parallel_min_pixels,
            )
            .inspect_err(|err| warn!("rejected grouping request: {}", err))?;

        let summary = RunSummary {
            width,
            height,
            kernel_region_num: request.kernel_region_num,
            non_empty_instances: result.instances().iter().filter(|r| !r.is_empty()).count(),
            assigned_pixels: result.assigned_pixels(),
            elapsed: started.elapsed(),
        };
        info!(
            instances = summary.non_empty_instances,
            assigned = summary.assigned_pixels,
            elapsed_us = summary.elapsed.as_micros() as u64,
            "grouped {}x{} grid",
            width,
            height
        );

        self.processed += 1;
        self.last_summary = Some(summary);
        Ok(self.config.output_encoding().encode(&result))
    }

    /// Number of requests grouped successfully so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn last_summary(&self) -> Option<&RunSummary> {
        self.last_summary.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::grid::{EmbeddingGrid, Grid};
    use std::collections::HashMap;

    fn request() -> GroupingRequest {
        let mut kernel_label = Grid::filled(3, 1, 0);
        kernel_label.set(0, 0, 1);
        GroupingRequest {
            inputs: GroupingInputs {
                score: Grid::filled(3, 1, 0.5),
                mask: Grid::filled(3, 1, true),
                embedding: EmbeddingGrid::uniform(3, 1, &[0.0, 1.0]),
                kernel_label,
                kernel_contour: Grid::filled(3, 1, true),
            },
            kernel_region_num: 2,
            distance_threshold: 0.5,
        }
    }

    fn lookup(vars: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let vars: HashMap<&'static str, String> = vars.iter().map(|(k, v)| (*k, v.to_string())).collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn nested_output_by_default() {
        let mut pipeline = GroupingPipeline::new(PipelineConfig::default());
        let output = pipeline.group(&request()).unwrap();
        assert_eq!(
            output,
            EncodedOutput::Nested(vec![vec![0.0, 0.0], vec![0.5, 3.0, 0.0, 0.0, 1.0, 0.0, 2.0, 0.0]])
        );
        assert_eq!(pipeline.processed(), 1);
        let summary = pipeline.last_summary().unwrap();
        assert_eq!(summary.non_empty_instances, 1);
        assert_eq!(summary.assigned_pixels, 3);
    }

    #[test]
    fn legacy_flag_switches_encoding() {
        let config = PipelineConfig {
            legacy_flatten: true,
            ..PipelineConfig::default()
        };
        let mut pipeline = GroupingPipeline::new(config);
        let output = pipeline.group(&request()).unwrap();
        assert_eq!(output.encoding(), OutputEncoding::LegacyFlat);
        assert_eq!(
            output.into_nested(2).unwrap(),
            vec![vec![0.0, 0.0], vec![0.5, 3.0, 0.0, 0.0, 1.0, 0.0, 2.0, 0.0]]
        );
    }

    #[test]
    fn failed_request_leaves_state_untouched() {
        let mut pipeline = GroupingPipeline::new(PipelineConfig::default());
        let mut bad = request();
        bad.kernel_region_num = 1;
        let err = pipeline.group(&bad).unwrap_err();
        assert!(matches!(err, GroupingError::LabelOutOfRange { .. }));
        assert_eq!(pipeline.processed(), 0);
        assert!(pipeline.last_summary().is_none());
    }

    #[test]
    fn request_built_from_image_buffers() {
        use crate::core_modules::adapters::{
            ScoreImage, embedding_from_chw, labels_from_gray, mask_from_gray, score_from_luma32f,
        };
        use image::{GrayImage, Luma};

        let score = ScoreImage::from_fn(4, 1, |x, _| Luma([0.2 * (x + 1) as f32]));
        let mask = GrayImage::from_raw(4, 1, vec![255, 255, 255, 0]).unwrap();
        let labels = GrayImage::from_raw(4, 1, vec![1, 0, 0, 0]).unwrap();
        // Channel planes, as a network would emit them.
        let embedding = embedding_from_chw(4, 1, 2, &[0.0, 0.1, 0.1, 0.1, 0.0, 0.0, 0.0, 0.0]).unwrap();

        let request = GroupingRequest {
            inputs: GroupingInputs {
                score: score_from_luma32f(&score).unwrap(),
                mask: mask_from_gray(&mask).unwrap(),
                embedding,
                kernel_contour: mask_from_gray(&labels).unwrap(),
                kernel_label: labels_from_gray(&labels).unwrap(),
            },
            kernel_region_num: 2,
            distance_threshold: 0.5,
        };

        let mut pipeline = GroupingPipeline::new(PipelineConfig::default());
        let nested = pipeline.group(&request).unwrap().into_nested(2).unwrap();
        assert_eq!(nested[1][1], 3.0);
        assert_eq!(&nested[1][2..], &[0.0, 0.0, 1.0, 0.0, 2.0, 0.0]);
        assert!((nested[1][0] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn config_reads_variables() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("PIXEL_GROUP_LEGACY_FLATTEN", "yes"),
            ("PIXEL_GROUP_PARALLEL_MIN_PIXELS", "4096"),
            ("PIXEL_GROUP_WORKERS", " 3 "),
        ]))
        .unwrap();
        assert!(config.legacy_flatten);
        assert_eq!(config.parallel_min_pixels, 4096);
        assert_eq!(config.worker_pool_size, 3);
    }

    #[test]
    fn config_defaults_when_unset() {
        let config = PipelineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn config_rejects_garbage_and_zero_workers() {
        let err = PipelineConfig::from_lookup(lookup(&[("PIXEL_GROUP_LEGACY_FLATTEN", "maybe")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                var: "PIXEL_GROUP_LEGACY_FLATTEN",
                value: "maybe".to_string()
            }
        );

        let err = PipelineConfig::from_lookup(lookup(&[("PIXEL_GROUP_WORKERS", "0")])).unwrap_err();
        assert_eq!(err, ConfigError::NoWorkers);
    }
}
