//! Process one scanned caution card and print the result document.
//!
//! Usage:
//!   cargo run --example process_card -- \
//!       <scan> <template> <alignment_mask> <manual_mask> <coordinates.json>
//!
//! Diagnostic artifacts are dumped into `debug_output/`.

use std::path::PathBuf;
use std::sync::Arc;

use cardscan::core::DirectorySink;
use cardscan::{FormPipeline, PipelineConfig, PipelineParams};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1).map(PathBuf::from);
    let (Some(scan), Some(template), Some(alignment_mask), Some(manual_mask), Some(coords)) = (
        args.next(),
        args.next(),
        args.next(),
        args.next(),
        args.next(),
    ) else {
        eprintln!(
            "usage: process_card <scan> <template> <alignment_mask> <manual_mask> <coordinates.json>"
        );
        std::process::exit(2);
    };

    let config = PipelineConfig {
        template_path: template,
        alignment_mask_path: alignment_mask,
        manual_mask_path: manual_mask,
        coordinates_path: coords,
        params: PipelineParams::default(),
    };

    let pipeline =
        FormPipeline::new(&config)?.with_diagnostics(Arc::new(DirectorySink::new("debug_output")));

    let result = pipeline.process_path(&scan)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
