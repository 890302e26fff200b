//! chronpipe - historical newspaper acquisition, OCR, and enrichment
//! pipeline.

use chronpipe::cli;
use chronpipe::error::PipelineError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let default_filter = if cli::is_verbose() { "chronpipe=info" } else { "chronpipe=warn" };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(err) = cli::run().await {
        eprintln!("error: {err:#}");
        std::process::exit(exit_code_for(&err));
    }
}

/// Map the failing command's error onto the exit-code table: a
/// `PipelineError` surfaced through `anyhow` keeps its own code, anything
/// else (argument parsing, I/O outside the taxonomy) is a generic failure.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<PipelineError>().map(PipelineError::exit_code).unwrap_or(1)
}
