use crate::cli::Bam2CountsArgs;
use crate::counts_core::{SiteRecord, count_line};
use crate::errors::Result;
use crate::source::{VariantCallStream, source_for_args};
use crate::writer;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::Write;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformSummary {
    pub lines_read: u64,
    pub comment_lines: u64,
    pub rows_emitted: u64,
    pub sites_without_allele_depth: u64,
    pub malformed_depths: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmitterState {
    AwaitingHeader,
    PerLine,
}

pub struct CountTableEmitter<'w> {
    out: &'w mut dyn Write,
    state: EmitterState,
    summary: TransformSummary,
}

impl<'w> CountTableEmitter<'w> {
    pub fn new(out: &'w mut dyn Write) -> Self {
        Self {
            out,
            state: EmitterState::AwaitingHeader,
            summary: TransformSummary::default(),
        }
    }

    fn ensure_header(&mut self) -> Result<()> {
        if self.state == EmitterState::AwaitingHeader {
            writer::write_counts_header(&mut *self.out)?;
            self.state = EmitterState::PerLine;
        }
        Ok(())
    }

    pub fn push_line<'l>(&mut self, line: &'l str) -> Result<Option<SiteRecord<'l>>> {
        self.ensure_header()?;
        self.summary.lines_read += 1;

        let Some((record, site)) = count_line(line) else {
            self.summary.comment_lines += 1;
            return Ok(None);
        };
        if !site.has_allele_depth {
            self.summary.sites_without_allele_depth += 1;
        }
        self.summary.malformed_depths += site.malformed_depths as u64;

        writer::write_counts_row(&mut *self.out, &record, &site.counts)?;
        self.summary.rows_emitted += 1;
        Ok(Some(record))
    }

    pub fn finish(mut self) -> Result<TransformSummary> {
        self.ensure_header()?;
        Ok(self.summary)
    }
}

pub fn transform_stream(
    stream: &mut VariantCallStream,
    out: &mut dyn Write,
    progress: &mut PipelineProgress,
) -> Result<TransformSummary> {
    let mut emitter = CountTableEmitter::new(out);
    while let Some(line) = stream.next_line()? {
        if let Some(record) = emitter.push_line(&line)? {
            progress.on_emitted(record.chromosome, record.position);
        }
    }
    let summary = emitter.finish()?;
    progress.finish(&summary);
    Ok(summary)
}

pub fn run(args: &Bam2CountsArgs) -> Result<()> {
    let source = source_for_args(args);
    let scope = source.describe();
    info!(
        source = %scope,
        output = %args.out,
        threads = args.threads,
        precomputed = args.uses_precomputed_input(),
        "starting count table run"
    );

    let started = Instant::now();
    let mut stream = source.open()?;
    let mut progress = PipelineProgress::new(args.progress, &args.out, &scope);

    let summary = writer::with_text_output_writer(&args.out, |out| {
        transform_stream(&mut stream, out, &mut progress)
    })?;

    if summary.malformed_depths > 0 {
        warn!(
            malformed = summary.malformed_depths,
            "allele depth values that were not integers were counted as 0"
        );
    }
    info!(
        output = %args.out,
        lines = summary.lines_read,
        comments = summary.comment_lines,
        rows = summary.rows_emitted,
        without_allele_depth = summary.sites_without_allele_depth,
        elapsed_ms = started.elapsed().as_millis(),
        "completed count table run"
    );
    Ok(())
}

#[derive(Debug)]
pub struct PipelineProgress {
    progress_bar: Option<ProgressBar>,
    emitted_rows: u64,
    finished: bool,
}

impl PipelineProgress {
    const UPDATE_EVERY: u64 = 10_000;

    pub fn new(enabled: bool, output: &str, scope: &str) -> Self {
        let progress_bar = if enabled {
            let bar = ProgressBar::new_spinner();
            bar.set_draw_target(ProgressDrawTarget::stderr_with_hz(4));
            let style = ProgressStyle::with_template("{spinner:.green} {elapsed_precise} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            bar.set_style(style);
            bar.enable_steady_tick(Duration::from_millis(200));
            bar.set_message(format!("starting output={output} source={scope}"));
            Some(bar)
        } else {
            None
        };

        Self {
            progress_bar,
            emitted_rows: 0,
            finished: false,
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, "", "")
    }

    fn on_emitted(&mut self, chromosome: &str, position: &str) {
        self.emitted_rows += 1;
        if (self.emitted_rows == 1 || self.emitted_rows.is_multiple_of(Self::UPDATE_EVERY))
            && let Some(bar) = &self.progress_bar
        {
            bar.set_message(format!(
                "rows={} locus={chromosome}:{position}",
                self.emitted_rows
            ));
        }
    }

    fn finish(&mut self, summary: &TransformSummary) {
        if let Some(bar) = &self.progress_bar {
            bar.finish_with_message(format!(
                "done lines={} rows={}",
                summary.lines_read, summary.rows_emitted
            ));
        }
        self.finished = true;
    }
}

impl Drop for PipelineProgress {
    fn drop(&mut self) {
        if !self.finished
            && let Some(bar) = &self.progress_bar
        {
            bar.finish_and_clear();
        }
    }
}
