pub mod cli;
pub mod counts_core;
pub mod errors;
pub mod external_tools;
#[cfg(feature = "htslib")]
mod htslib_index;
pub mod pipeline;
pub mod source;
pub mod writer;

use cli::Bam2CountsArgs;
use errors::Result;
use std::sync::Once;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: Once = Once::new();

pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    });
}

pub fn run_from_args(args: Bam2CountsArgs) -> Result<()> {
    pipeline::run(&args)
}
