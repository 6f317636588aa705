use mimalloc::MiMalloc;
use std::process::ExitCode;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> ExitCode {
    allele_counts::init_tracing();
    match allele_counts::cli::parse_from_env().and_then(allele_counts::run_from_args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("bam2counts: {error}");
            ExitCode::from(1)
        }
    }
}
