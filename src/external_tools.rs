use crate::cli::Bam2CountsArgs;
use crate::errors::{AppError, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use tempfile::{Builder, NamedTempFile};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterSettings {
    pub threads: usize,
    pub min_mapq: u32,
    pub exclude_flags: u32,
    pub max_depth: u32,
}

impl FilterSettings {
    pub fn from_args(args: &Bam2CountsArgs) -> Self {
        Self {
            threads: args.threads,
            min_mapq: args.min_mapq,
            exclude_flags: args.exclude_flags,
            max_depth: args.max_depth,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalTools {
    pub samtools: String,
    pub bcftools: String,
}

#[derive(Debug)]
pub struct CommandStream {
    pub child: Child,
    pub stdout: ChildStdout,
    pub stderr_capture: NamedTempFile,
    pub command: String,
}

pub(crate) fn read_capture(capture: &NamedTempFile) -> String {
    let mut bytes = Vec::new();
    if let Ok(mut file) = capture.reopen() {
        let _ = file.read_to_end(&mut bytes);
    }
    String::from_utf8_lossy(&bytes).trim_end().to_string()
}

impl ExternalTools {
    pub fn from_args(args: &Bam2CountsArgs) -> Self {
        Self {
            samtools: args.samtools.clone(),
            bcftools: args.bcftools.clone(),
        }
    }

    pub fn check_dependencies(&self) -> Result<()> {
        for tool in [&self.samtools, &self.bcftools] {
            if !self.exists_command(tool) {
                return Err(AppError::CommandNotFound {
                    command: tool.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn filter_view_command(&self, bam: &str, settings: &FilterSettings) -> Vec<String> {
        vec![
            self.samtools.clone(),
            "view".to_string(),
            "-u".to_string(),
            "-q".to_string(),
            settings.min_mapq.to_string(),
            "-F".to_string(),
            settings.exclude_flags.to_string(),
            bam.to_string(),
        ]
    }

    pub fn sort_command(&self, output_bam: &Path, settings: &FilterSettings) -> Vec<String> {
        vec![
            self.samtools.clone(),
            "sort".to_string(),
            "-@".to_string(),
            settings.threads.to_string(),
            "-o".to_string(),
            output_bam.to_string_lossy().into_owned(),
            "-".to_string(),
        ]
    }

    pub fn mpileup_command(
        &self,
        bam: &Path,
        fasta: &str,
        regions: &str,
        settings: &FilterSettings,
    ) -> Vec<String> {
        vec![
            self.bcftools.clone(),
            "mpileup".to_string(),
            "--threads".to_string(),
            settings.threads.to_string(),
            "-f".to_string(),
            fasta.to_string(),
            "-R".to_string(),
            regions.to_string(),
            "-a".to_string(),
            "INFO/AD".to_string(),
            "-d".to_string(),
            settings.max_depth.to_string(),
            "-Ov".to_string(),
            bam.to_string_lossy().into_owned(),
        ]
    }

    /// `samtools view -u ... | samtools sort -o <output_bam> -`.
    pub fn filter_and_sort_bam(
        &self,
        bam: &str,
        output_bam: &Path,
        settings: &FilterSettings,
        scratch_dir: &Path,
    ) -> Result<()> {
        let view_argv = self.filter_view_command(bam, settings);
        let sort_argv = self.sort_command(output_bam, settings);
        let view_label = view_argv.join(" ");
        let sort_label = sort_argv.join(" ");
        info!(view = %view_label, sort = %sort_label, "filtering and sorting alignments");

        let view_stderr = stderr_capture_in(scratch_dir, "view")?;
        let sort_stderr = stderr_capture_in(scratch_dir, "sort")?;

        let mut view = Command::new(&view_argv[0])
            .args(&view_argv[1..])
            .stdout(Stdio::piped())
            .stderr(Stdio::from(view_stderr.reopen()?))
            .spawn()
            .map_err(|err| AppError::from_spawn(&self.samtools, err))?;
        let view_stdout = view.stdout.take().ok_or_else(|| AppError::ParseError {
            message: format!("failed to capture stdout for command: {view_label}"),
        })?;

        let sort_status = Command::new(&sort_argv[0])
            .args(&sort_argv[1..])
            .stdin(Stdio::from(view_stdout))
            .stderr(Stdio::from(sort_stderr.reopen()?))
            .status();
        let sort_status = match sort_status {
            Ok(status) => status,
            Err(err) => {
                let _ = view.kill();
                let _ = view.wait();
                return Err(AppError::from_spawn(&self.samtools, err));
            }
        };
        let view_status = view.wait()?;

        if !view_status.success() {
            return Err(AppError::CommandFailed {
                command: view_label,
                code: view_status.code(),
                stderr: read_capture(&view_stderr),
            });
        }
        if !sort_status.success() {
            return Err(AppError::CommandFailed {
                command: sort_label,
                code: sort_status.code(),
                stderr: read_capture(&sort_stderr),
            });
        }
        Ok(())
    }

    pub fn index_bam(&self, bam: &Path, threads: usize) -> Result<()> {
        let mut command = Command::new(&self.samtools);
        command
            .arg("index")
            .arg("-@")
            .arg(threads.to_string())
            .arg(bam);
        let label = format!("{} index -@ {} {}", self.samtools, threads, bam.display());
        info!(command = %label, "indexing filtered alignments");
        self.run_to_completion(command, &self.samtools, label)
    }

    pub fn fasta_index_path(fasta: &str) -> PathBuf {
        let mut path = Path::new(fasta).as_os_str().to_os_string();
        path.push(".fai");
        PathBuf::from(path)
    }

    /// Runs `samtools faidx` unless `<fasta>.fai` already exists.
    pub fn ensure_fasta_index(&self, fasta: &str) -> Result<()> {
        if Self::fasta_index_path(fasta).is_file() {
            return Ok(());
        }
        let mut command = Command::new(&self.samtools);
        command.arg("faidx").arg(fasta);
        let label = format!("{} faidx {}", self.samtools, fasta);
        info!(command = %label, "indexing reference sequence");
        self.run_to_completion(command, &self.samtools, label)
    }

    pub fn spawn_mpileup_stream(
        &self,
        bam: &Path,
        fasta: &str,
        regions: &str,
        settings: &FilterSettings,
        scratch_dir: &Path,
    ) -> Result<CommandStream> {
        let argv = self.mpileup_command(bam, fasta, regions, settings);
        let command_label = argv.join(" ");
        let stderr_capture = stderr_capture_in(scratch_dir, "mpileup")?;
        let stderr_file = stderr_capture.reopen()?;

        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdout(Stdio::piped())
            .stderr(Stdio::from(stderr_file));
        info!(command = %command_label, "spawning mpileup stream");

        let mut child = command
            .spawn()
            .map_err(|err| AppError::from_spawn(&self.bcftools, err))?;
        let stdout = child.stdout.take().ok_or_else(|| AppError::ParseError {
            message: format!("failed to capture stdout for command: {command_label}"),
        })?;

        Ok(CommandStream {
            child,
            stdout,
            stderr_capture,
            command: command_label,
        })
    }

    fn run_to_completion(
        &self,
        mut command: Command,
        command_name: &str,
        label: String,
    ) -> Result<()> {
        let output = command
            .output()
            .map_err(|err| AppError::from_spawn(command_name, err))?;
        if !output.status.success() {
            return Err(AppError::CommandFailed {
                command: label,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
            });
        }
        Ok(())
    }

    pub fn exists_command(&self, cmd: &str) -> bool {
        if cmd.contains(std::path::MAIN_SEPARATOR) {
            return Path::new(cmd).is_file();
        }
        std::env::var_os("PATH").is_some_and(|paths| {
            std::env::split_paths(&paths)
                .map(|dir| dir.join(cmd))
                .any(|full| full.is_file())
        })
    }
}

fn stderr_capture_in(scratch_dir: &Path, stage: &str) -> Result<NamedTempFile> {
    Ok(Builder::new()
        .prefix(&format!("bam2counts_{stage}_stderr_"))
        .suffix(".log")
        .tempfile_in(scratch_dir)?)
}
