//! Lesion analysis CLI tool
//!
//! Command-line interface for the lesionscan library: analyze images,
//! inspect the analysis archive, and fetch model weights.

#[cfg(feature = "cli")]
use lesionscan::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
