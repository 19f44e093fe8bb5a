// Example runner for the `pixel_group` library.
//
// Builds a small synthetic scene with two text instances whose embeddings are
// far apart, groups it once synchronously and once through the worker pool,
// and prints the per-instance records.

use anyhow::{Context, Result};
use pixel_group::core_modules::adapters::mask_from_scores;
use pixel_group::core_modules::encoding::EncodedOutput;
use pixel_group::log_setup::setup_logging;
use pixel_group::parallel_pipeline::ParallelPipeline;
use pixel_group::pipeline::{GroupingInputs, GroupingPipeline, GroupingRequest, PipelineConfig};
use pixel_group::{EmbeddingGrid, Grid};

const WIDTH: usize = 12;
const HEIGHT: usize = 5;

fn synthetic_request() -> GroupingRequest {
    let mut score = Grid::filled(WIDTH, HEIGHT, 0.0f32);
    let mut embedding = EmbeddingGrid::uniform(WIDTH, HEIGHT, &[0.0, 0.0]);
    let mut kernel_label = Grid::filled(WIDTH, HEIGHT, 0i32);
    let mut kernel_contour = Grid::filled(WIDTH, HEIGHT, false);

    // Two text blocks: columns 0..5 and 7..12, rows 0..5.
    for y in 0..HEIGHT {
        for x in (0..5).chain(7..WIDTH) {
            let left = x < 5;
            score.set(x, y, if left { 0.8 } else { 0.6 });
            embedding.set_vector(x, y, if left { &[0.05, 0.0] } else { &[10.0, 10.05] });
        }
    }

    // One kernel row in the middle of each block.
    for x in 1..4 {
        kernel_label.set(x, 2, 1);
        kernel_contour.set(x, 2, true);
        embedding.set_vector(x, 2, &[0.0, 0.0]);
    }
    for x in 8..11 {
        kernel_label.set(x, 2, 2);
        kernel_contour.set(x, 2, true);
        embedding.set_vector(x, 2, &[10.0, 10.0]);
    }

    // Foreground is wherever the score map is confident.
    let mask = mask_from_scores(&score, 0.5);

    GroupingRequest {
        inputs: GroupingInputs {
            score,
            mask,
            embedding,
            kernel_label,
            kernel_contour,
        },
        kernel_region_num: 3,
        distance_threshold: 0.8,
    }
}

fn print_records(title: &str, output: EncodedOutput, kernel_region_num: usize) -> Result<()> {
    println!("{}", title);
    let records = output
        .into_nested(kernel_region_num)
        .context("decoding grouping output")?;
    for (label, record) in records.iter().enumerate() {
        println!(
            "  instance {}: avg confidence {:.3}, {} pixels",
            label, record[0], record[1] as usize
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging("info");
    println!("Pixel Group Engine - Example Runner");

    let config = PipelineConfig::from_env().context("reading pipeline configuration")?;
    let request = synthetic_request();

    let mut pipeline = GroupingPipeline::new(config.clone());
    let output = pipeline.group(&request).context("grouping synthetic scene")?;
    print_records("Synchronous pipeline:", output, request.kernel_region_num)?;

    let parallel = ParallelPipeline::new(config)?;
    let batch = vec![request.clone(), request.clone()];
    for (i, result) in parallel.process_batch(batch).await.into_iter().enumerate() {
        let output = result.with_context(|| format!("grouping batch item {}", i))?;
        print_records(&format!("Worker pool, item {}:", i), output, request.kernel_region_num)?;
    }
    parallel.shutdown().await;

    Ok(())
}
