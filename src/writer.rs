use std::io::{BufWriter, Write, stdout};
use std::path::Path;

use crate::counts_core::{NucleotideCounts, SiteRecord, counts_header};
use crate::errors::Result;
use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::Builder;
use tracing::debug;

pub fn write_counts_header<W: Write + ?Sized>(writer: &mut W) -> Result<()> {
    writer.write_all(counts_header().join("\t").as_bytes())?;
    writer.write_all(b"\n")?;
    Ok(())
}

pub fn write_counts_row<W: Write + ?Sized>(
    writer: &mut W,
    record: &SiteRecord<'_>,
    counts: &NucleotideCounts,
) -> Result<()> {
    let [a, c, g, t] = counts.as_array();
    writeln!(
        writer,
        "{}\t{}\t{}\t{}\t{a}\t{c}\t{g}\t{t}",
        record.chromosome, record.position, record.id, record.reference
    )?;
    Ok(())
}

// File outputs are staged next to the destination and renamed into place on success.
pub fn with_text_output_writer<T, F>(path: &str, write_fn: F) -> Result<T>
where
    F: FnOnce(&mut dyn Write) -> Result<T>,
{
    if path == "-" {
        let mut out = stdout().lock();
        let value = write_fn(&mut out)?;
        out.flush()?;
        return Ok(value);
    }

    let output_path = Path::new(path);
    let parent_dir = match output_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut staged = Builder::new()
        .prefix(".bam2counts_")
        .suffix(".partial")
        .tempfile_in(parent_dir)?;

    let value = if path.ends_with(".gz") {
        let mut encoder = GzEncoder::new(
            BufWriter::new(staged.as_file_mut()),
            Compression::default(),
        );
        let value = write_fn(&mut encoder)?;
        encoder.finish()?.flush()?;
        value
    } else {
        let mut buf = BufWriter::new(staged.as_file_mut());
        let value = write_fn(&mut buf)?;
        buf.flush()?;
        value
    };

    staged.persist(output_path).map_err(|err| err.error)?;
    debug!(output = %path, "persisted staged output");
    Ok(value)
}
