use crate::errors::{AppError, Result};
use crate::external_tools::ExternalTools;
use bio::io::{bed, fasta};
use rust_htslib::bam::index;
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

pub(crate) fn build_bam_index(bam: &Path, threads: usize) -> Result<()> {
    info!(bam = %bam.display(), threads, backend = "rust-htslib", "indexing filtered alignments");
    let n_threads = u32::try_from(threads).unwrap_or(u32::MAX);
    index::build(bam, None, index::Type::Bai, n_threads).map_err(|err| AppError::ParseError {
        message: format!("failed to build BAM index for {}: {err}", bam.display()),
    })
}

// Non-BED region files (CHROM/POS tables) skip the check.
pub(crate) fn unknown_region_contigs(regions: &str, fasta_path: &str) -> Result<Vec<String>> {
    let fai_path = ExternalTools::fasta_index_path(fasta_path);
    let fai = fasta::Index::from_file(&fai_path).map_err(|err| AppError::ParseError {
        message: format!("failed to open FASTA index {}: {err}", fai_path.display()),
    })?;
    let known: HashSet<String> = fai.sequences().into_iter().map(|seq| seq.name).collect();

    let mut reader = bed::Reader::from_file(regions).map_err(|err| AppError::ParseError {
        message: format!("failed to open region file {regions}: {err}"),
    })?;

    let mut unknown = Vec::new();
    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                warn!(regions = %regions, error = %err, "region file is not BED; skipping contig check");
                return Ok(Vec::new());
            }
        };
        let chrom = record.chrom();
        if !known.contains(chrom) && !unknown.iter().any(|seen| seen == chrom) {
            unknown.push(chrom.to_string());
        }
    }
    Ok(unknown)
}
