use crate::cli::{Bam2CountsArgs, IndexBackend};
use crate::errors::{AppError, Result};
use crate::external_tools::{CommandStream, ExternalTools, FilterSettings, read_capture};
use flate2::read::MultiGzDecoder;
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::Child;
use tempfile::{Builder, NamedTempFile, TempDir};
use tracing::{info, warn};

const SORTED_BAM_NAME: &str = "filtered.sorted.bam";

pub trait VariantCallSource {
    fn describe(&self) -> String;
    fn open(&self) -> Result<VariantCallStream>;
}

pub fn source_for_args(args: &Bam2CountsArgs) -> Box<dyn VariantCallSource> {
    match args.input.as_deref() {
        Some(path) => Box::new(TextSource::new(path)),
        None => Box::new(ToolchainSource::from_args(args)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSource {
    path: String,
}

impl TextSource {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
        }
    }
}

impl VariantCallSource for TextSource {
    fn describe(&self) -> String {
        if self.path == "-" {
            "stdin".to_string()
        } else {
            self.path.clone()
        }
    }

    fn open(&self) -> Result<VariantCallStream> {
        info!(input = %self.describe(), "opening variant-call text input");
        if self.path == "-" {
            return Ok(VariantCallStream::from_reader(Box::new(BufReader::new(
                std::io::stdin(),
            ))));
        }
        let file = File::open(&self.path)?;
        if self.path.ends_with(".gz") {
            Ok(VariantCallStream::from_reader(Box::new(BufReader::new(
                MultiGzDecoder::new(file),
            ))))
        } else {
            Ok(VariantCallStream::from_reader(Box::new(BufReader::new(file))))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainSource {
    tools: ExternalTools,
    settings: FilterSettings,
    bam: String,
    fasta: String,
    regions: String,
    tmp_dir: Option<String>,
    keep_temp: bool,
    index_backend: IndexBackend,
}

impl ToolchainSource {
    pub fn from_args(args: &Bam2CountsArgs) -> Self {
        Self {
            tools: ExternalTools::from_args(args),
            settings: FilterSettings::from_args(args),
            bam: args.bam.clone(),
            fasta: args.fasta.clone(),
            regions: args.regions.clone(),
            tmp_dir: args.tmp_dir.clone(),
            keep_temp: args.keep_temp,
            index_backend: args.index_backend,
        }
    }

    fn create_workdir(&self) -> Result<WorkDir> {
        let mut builder = Builder::new();
        builder.prefix("bam2counts_");
        let dir = match self.tmp_dir.as_deref() {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        if self.keep_temp {
            let kept = dir.keep();
            info!(workdir = %kept.display(), "keeping intermediate files");
            Ok(WorkDir::Kept(kept))
        } else {
            Ok(WorkDir::Managed(dir))
        }
    }

    fn index_sorted_bam(&self, sorted_bam: &Path) -> Result<()> {
        match self.index_backend {
            IndexBackend::Samtools => self.tools.index_bam(sorted_bam, self.settings.threads),
            #[cfg(feature = "htslib")]
            IndexBackend::RustHtslib => {
                crate::htslib_index::build_bam_index(sorted_bam, self.settings.threads)
            }
        }
    }

    #[cfg(feature = "htslib")]
    fn warn_unknown_region_contigs(&self) -> Result<()> {
        let unknown = crate::htslib_index::unknown_region_contigs(&self.regions, &self.fasta)?;
        if !unknown.is_empty() {
            warn!(
                regions = %self.regions,
                contigs = %unknown.join(","),
                "region file names contigs missing from the reference; they yield no sites"
            );
        }
        Ok(())
    }

    #[cfg(not(feature = "htslib"))]
    fn warn_unknown_region_contigs(&self) -> Result<()> {
        Ok(())
    }
}

impl VariantCallSource for ToolchainSource {
    fn describe(&self) -> String {
        format!("{} regions={}", self.bam, self.regions)
    }

    fn open(&self) -> Result<VariantCallStream> {
        self.tools.check_dependencies()?;
        for (label, path) in [
            ("--bam", &self.bam),
            ("--fasta", &self.fasta),
            ("--regions", &self.regions),
        ] {
            if !Path::new(path).is_file() {
                return Err(AppError::InvalidValue {
                    flag: label.to_string(),
                    value: path.clone(),
                    reason: "file does not exist".to_string(),
                });
            }
        }

        let workdir = self.create_workdir()?;
        let sorted_bam = workdir.path().join(SORTED_BAM_NAME);

        self.tools
            .filter_and_sort_bam(&self.bam, &sorted_bam, &self.settings, workdir.path())?;
        self.index_sorted_bam(&sorted_bam)?;
        self.tools.ensure_fasta_index(&self.fasta)?;
        self.warn_unknown_region_contigs()?;

        let stream = self.tools.spawn_mpileup_stream(
            &sorted_bam,
            &self.fasta,
            &self.regions,
            &self.settings,
            workdir.path(),
        )?;
        Ok(VariantCallStream::from_command_stream(stream, workdir))
    }
}

#[derive(Debug)]
enum WorkDir {
    Managed(TempDir),
    Kept(PathBuf),
}

impl WorkDir {
    fn path(&self) -> &Path {
        match self {
            Self::Managed(dir) => dir.path(),
            Self::Kept(path) => path.as_path(),
        }
    }
}

#[derive(Debug)]
struct StreamProcess {
    child: Child,
    stderr_capture: NamedTempFile,
    command: String,
    finished: bool,
}

impl StreamProcess {
    fn read_stderr(&self) -> String {
        read_capture(&self.stderr_capture)
    }
}

pub struct VariantCallStream {
    reader: Box<dyn BufRead>,
    line_buffer: Vec<u8>,
    process: Option<StreamProcess>,
    _workdir: Option<WorkDir>,
}

impl VariantCallStream {
    pub fn from_reader(reader: Box<dyn BufRead>) -> Self {
        Self {
            reader,
            line_buffer: Vec::with_capacity(256),
            process: None,
            _workdir: None,
        }
    }

    fn from_command_stream(stream: CommandStream, workdir: WorkDir) -> Self {
        let process = StreamProcess {
            child: stream.child,
            stderr_capture: stream.stderr_capture,
            command: stream.command,
            finished: false,
        };
        Self {
            reader: Box::new(BufReader::new(stream.stdout)),
            line_buffer: Vec::with_capacity(256),
            process: Some(process),
            _workdir: Some(workdir),
        }
    }

    fn ensure_process_completed(&mut self) -> Result<()> {
        let Some(process) = self.process.as_mut() else {
            return Ok(());
        };
        if process.finished {
            return Ok(());
        }

        let status = process.child.wait()?;
        process.finished = true;
        info!(command = %process.command, code = ?status.code(), "mpileup stream completed");
        if !status.success() {
            return Err(AppError::CommandFailed {
                command: process.command.clone(),
                code: status.code(),
                stderr: process.read_stderr(),
            });
        }
        Ok(())
    }

    pub fn next_line(&mut self) -> Result<Option<Cow<'_, str>>> {
        self.line_buffer.clear();
        let read = self.reader.read_until(b'\n', &mut self.line_buffer)?;
        if read == 0 {
            // EOF from a child is only clean once it exits zero.
            self.ensure_process_completed()?;
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(trim_line_end(
            &self.line_buffer,
        ))))
    }
}

impl Drop for VariantCallStream {
    fn drop(&mut self) {
        let Some(process) = self.process.as_mut() else {
            return;
        };
        if process.finished {
            return;
        }

        match process.child.try_wait() {
            Ok(Some(_)) => {
                process.finished = true;
            }
            Ok(None) => {
                warn!(command = %process.command, "terminating unfinished mpileup stream");
                let _ = process.child.kill();
                let _ = process.child.wait();
                process.finished = true;
            }
            Err(_) => {
                let _ = process.child.kill();
            }
        }
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 {
        let value = line[end - 1];
        if value == b'\n' || value == b'\r' {
            end -= 1;
        } else {
            break;
        }
    }
    &line[..end]
}
