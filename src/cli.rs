use crate::errors::{AppError, Result};
use clap::error::ErrorKind;
use clap::{ArgAction, Parser};

#[derive(Debug, Clone, Parser)]
#[command(disable_help_flag = true, disable_version_flag = true)]
struct CliArgs {
    #[arg(short = 'i', long = "input")]
    input: Option<String>,
    #[arg(short = 'b', long = "bam")]
    bam: Option<String>,
    #[arg(short = 'F', long = "fasta")]
    fasta: Option<String>,
    #[arg(short = 'R', long = "regions")]
    regions: Option<String>,
    #[arg(short = 'o', long = "output", default_value = "-")]
    out: String,
    #[arg(short = '@', long = "threads", default_value = "1")]
    threads: String,
    #[arg(short = 'q', long = "min-mapq", default_value = "20")]
    min_mapq: String,
    #[arg(long = "exclude-flags", default_value = "1796")]
    exclude_flags: String,
    #[arg(short = 'd', long = "max-depth", default_value = "250")]
    max_depth: String,
    #[arg(short = 'S', long = "samtools", default_value = "samtools")]
    samtools: String,
    #[arg(short = 'B', long = "bcftools", default_value = "bcftools")]
    bcftools: String,
    #[arg(long = "tmp-dir")]
    tmp_dir: Option<String>,
    #[arg(long = "keep-temp", action = ArgAction::SetTrue)]
    keep_temp: bool,
    #[arg(long = "index-backend", default_value = "samtools")]
    index_backend: String,
    #[arg(long = "progress", action = ArgAction::SetTrue)]
    progress: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBackend {
    Samtools,
    #[cfg(feature = "htslib")]
    RustHtslib,
}

impl IndexBackend {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "samtools" => Ok(Self::Samtools),
            #[cfg(feature = "htslib")]
            "rust-htslib" => Ok(Self::RustHtslib),
            #[cfg(not(feature = "htslib"))]
            "rust-htslib" => Err(AppError::InvalidValue {
                flag: "--index-backend".to_string(),
                value: value.to_string(),
                reason: "binary built without feature \"htslib\"; rebuild with --features htslib"
                    .to_string(),
            }),
            other => Err(AppError::InvalidValue {
                flag: "--index-backend".to_string(),
                value: other.to_string(),
                reason: "supported backends are \"samtools\"(default) and \"rust-htslib\""
                    .to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bam2CountsArgs {
    pub input: Option<String>,
    pub bam: String,
    pub fasta: String,
    pub regions: String,
    pub out: String,
    pub threads: usize,
    pub min_mapq: u32,
    pub exclude_flags: u32,
    pub max_depth: u32,
    pub samtools: String,
    pub bcftools: String,
    pub tmp_dir: Option<String>,
    pub keep_temp: bool,
    pub index_backend: IndexBackend,
    pub progress: bool,
}

impl Default for Bam2CountsArgs {
    fn default() -> Self {
        Self {
            input: None,
            bam: String::new(),
            fasta: String::new(),
            regions: String::new(),
            out: "-".to_string(),
            threads: 1,
            min_mapq: 20,
            exclude_flags: 0x704,
            max_depth: 250,
            samtools: "samtools".to_string(),
            bcftools: "bcftools".to_string(),
            tmp_dir: None,
            keep_temp: false,
            index_backend: IndexBackend::Samtools,
            progress: false,
        }
    }
}

impl Bam2CountsArgs {
    pub fn uses_precomputed_input(&self) -> bool {
        self.input.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(AppError::InvalidValue {
                flag: "--threads".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.uses_precomputed_input() {
            return Ok(());
        }
        for (field, value) in [
            ("--bam", &self.bam),
            ("--fasta", &self.fasta),
            ("--regions", &self.regions),
        ] {
            if value.is_empty() {
                return Err(AppError::MissingRequired {
                    field: format!("{field} (required without --input)"),
                });
            }
        }
        Ok(())
    }
}

pub fn parse_from_env() -> Result<Bam2CountsArgs> {
    parse_args(std::env::args())
}

pub fn parse_args<I, S>(args: I) -> Result<Bam2CountsArgs>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut tokens: Vec<String> = args.into_iter().map(Into::into).collect();
    if tokens.is_empty() {
        tokens.push("bam2counts".to_string());
    }

    let cli = CliArgs::try_parse_from(tokens).map_err(map_clap_error)?;

    let parsed = Bam2CountsArgs {
        input: cli.input,
        bam: cli.bam.unwrap_or_default(),
        fasta: cli.fasta.unwrap_or_default(),
        regions: cli.regions.unwrap_or_default(),
        out: cli.out,
        threads: parse_usize("--threads", &cli.threads)?,
        min_mapq: parse_u32("--min-mapq", &cli.min_mapq)?,
        exclude_flags: parse_flags("--exclude-flags", &cli.exclude_flags)?,
        max_depth: parse_u32("--max-depth", &cli.max_depth)?,
        samtools: cli.samtools,
        bcftools: cli.bcftools,
        tmp_dir: cli.tmp_dir,
        keep_temp: cli.keep_temp,
        index_backend: IndexBackend::parse(&cli.index_backend)?,
        progress: cli.progress,
    };

    parsed.validate()?;
    Ok(parsed)
}

fn map_clap_error(error: clap::Error) -> AppError {
    let kind = error.kind();
    let rendered = error.to_string();
    match kind {
        ErrorKind::UnknownArgument => AppError::UnsupportedArgument {
            arg: first_quoted_token(&rendered).unwrap_or(rendered),
        },
        ErrorKind::TooFewValues | ErrorKind::WrongNumberOfValues => AppError::MissingValue {
            flag: first_quoted_token(&rendered).unwrap_or_else(|| "argument".to_string()),
        },
        _ => AppError::ParseError {
            message: clap_error_message(&rendered),
        },
    }
}

fn first_quoted_token(message: &str) -> Option<String> {
    let start = message.find('\'')?;
    let end = message[start + 1..].find('\'')?;
    Some(message[start + 1..start + 1 + end].to_string())
}

fn clap_error_message(message: &str) -> String {
    message
        .lines()
        .find_map(|line| line.strip_prefix("error: "))
        .or_else(|| message.lines().next())
        .unwrap_or("failed to parse arguments")
        .to_string()
}

fn parse_usize(flag: &str, value: &str) -> Result<usize> {
    value.parse::<usize>().map_err(|_| AppError::InvalidValue {
        flag: flag.to_string(),
        value: value.to_string(),
        reason: "must be a positive integer".to_string(),
    })
}

fn parse_u32(flag: &str, value: &str) -> Result<u32> {
    value.parse::<u32>().map_err(|_| AppError::InvalidValue {
        flag: flag.to_string(),
        value: value.to_string(),
        reason: "must be a non-negative integer".to_string(),
    })
}

/// SAM flag masks are accepted as decimal or `0x`-prefixed hex.
fn parse_flags(flag: &str, value: &str) -> Result<u32> {
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse::<u32>(),
    };
    parsed.map_err(|_| AppError::InvalidValue {
        flag: flag.to_string(),
        value: value.to_string(),
        reason: "must be a decimal or 0x-prefixed hexadecimal flag mask".to_string(),
    })
}
