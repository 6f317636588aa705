use allele_counts::counts_core::counts_header;
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

const SITES_VCF: &str = "testdata/sites.mpileup.vcf";
const SITES_GOLDEN: &str = "testdata/sites.counts.tsv";
const COMMENTS_ONLY_VCF: &str = "testdata/comments_only.vcf";
const MALFORMED_VCF: &str = "testdata/malformed.vcf";

fn workspace_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

fn scratch_output(name: &str) -> PathBuf {
    let dir = workspace_dir().join("target").join("it_count_table");
    fs::create_dir_all(&dir).expect("expected scratch directory");
    let path = dir.join(name);
    let _ = fs::remove_file(&path);
    path
}

fn run_binary(args: &[&str]) -> std::process::Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_bam2counts"));
    command.args(args).current_dir(workspace_dir());
    command
        .output()
        .expect("expected bam2counts binary to execute")
}

fn run_binary_with_stdin(args: &[&str], stdin: &[u8]) -> std::process::Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_bam2counts"))
        .args(args)
        .current_dir(workspace_dir())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("expected bam2counts binary to spawn");
    child
        .stdin
        .take()
        .expect("expected piped stdin")
        .write_all(stdin)
        .expect("expected stdin write");
    child
        .wait_with_output()
        .expect("expected bam2counts binary to finish")
}

fn expected_header() -> String {
    format!("{}\n", counts_header().join("\t"))
}

fn assert_success(output: &std::process::Output) {
    assert!(
        output.status.success(),
        "expected success: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

fn data_line_count(path: &str) -> usize {
    fs::read_to_string(workspace_dir().join(path))
        .expect("expected fixture")
        .lines()
        .filter(|line| !line.starts_with('#'))
        .count()
}

#[test]
fn text_input_matches_golden_table() {
    let out = scratch_output("sites.counts.tsv");
    let out_str = out.to_string_lossy().to_string();

    let output = run_binary(&["-i", SITES_VCF, "-o", &out_str]);
    assert_success(&output);

    let actual = fs::read_to_string(&out).expect("expected output content");
    let golden =
        fs::read_to_string(workspace_dir().join(SITES_GOLDEN)).expect("expected golden table");
    assert_eq!(actual, golden);
    assert_eq!(actual.lines().count(), data_line_count(SITES_VCF) + 1);
}

#[test]
fn stdin_to_stdout_streams_rows() {
    let input = fs::read(workspace_dir().join(SITES_VCF)).expect("expected fixture");
    let output = run_binary_with_stdin(&["-i", "-"], &input);
    assert_success(&output);

    let stdout = String::from_utf8(output.stdout).expect("expected utf8 stdout");
    assert!(stdout.starts_with(&expected_header()));
    assert_eq!(
        stdout,
        fs::read_to_string(workspace_dir().join(SITES_GOLDEN)).expect("expected golden table")
    );
}

#[test]
fn comment_only_input_writes_header_only() {
    let output = run_binary(&["-i", COMMENTS_ONLY_VCF]);
    assert_success(&output);
    assert_eq!(String::from_utf8_lossy(&output.stdout), expected_header());
}

#[test]
fn malformed_lines_degrade_to_partial_counts() {
    let output = run_binary(&["-i", MALFORMED_VCF]);
    assert_success(&output);

    let stdout = String::from_utf8(output.stdout).expect("expected utf8 stdout");
    let rows: Vec<&str> = stdout.lines().skip(1).collect();
    assert_eq!(
        rows,
        [
            "chr20\t70001\t.\tA\t5\t3\t0\t0",
            "chr20\t70002\t.\tA\t5\t3\t0\t0",
            "chr20\t70003\t.\tA\t0\t3\t0\t0",
            "chr20\t70004\t.\tC\t0\t0\t0\t0",
            "chr20\t70005\t.\tT\t0\t0\t0\t7",
        ]
    );
    assert_eq!(rows.len(), data_line_count(MALFORMED_VCF));
}

#[test]
fn gzip_input_and_output_round_through_binary() {
    let gz_input = scratch_output("sites.mpileup.vcf.gz");
    {
        let plain = fs::read(workspace_dir().join(SITES_VCF)).expect("expected fixture");
        let mut encoder = GzEncoder::new(
            File::create(&gz_input).expect("expected gz input"),
            Compression::default(),
        );
        encoder.write_all(&plain).expect("expected gz write");
        encoder.finish().expect("expected gz finish");
    }
    let gz_output = scratch_output("sites.counts.tsv.gz");

    let output = run_binary(&[
        "-i",
        &gz_input.to_string_lossy(),
        "-o",
        &gz_output.to_string_lossy(),
    ]);
    assert_success(&output);

    let mut text = String::new();
    MultiGzDecoder::new(File::open(&gz_output).expect("expected gz output"))
        .read_to_string(&mut text)
        .expect("expected gz decode");
    assert_eq!(
        text,
        fs::read_to_string(workspace_dir().join(SITES_GOLDEN)).expect("expected golden table")
    );
}

#[test]
fn repeated_runs_are_byte_identical() {
    let first = run_binary(&["-i", SITES_VCF]);
    let second = run_binary(&["-i", SITES_VCF]);
    assert_success(&first);
    assert_success(&second);
    assert_eq!(first.stdout, second.stdout);
}

#[test]
fn missing_input_file_fails_without_output() {
    let out = scratch_output("missing_input.counts.tsv");
    let output = run_binary(&[
        "-i",
        "testdata/does_not_exist.vcf",
        "-o",
        &out.to_string_lossy(),
    ]);

    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("bam2counts: io error"));
    assert!(!out.exists());
}

#[test]
fn toolchain_run_fails_fast_when_tools_are_missing() {
    let output = run_binary(&[
        "-b",
        "testdata/sample.bam",
        "-F",
        "testdata/ref.fa",
        "-R",
        "testdata/roi.bed",
        "-S",
        "missing_samtools_for_count_table_test",
        "-B",
        "missing_bcftools_for_count_table_test",
    ]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("required command not found in PATH: missing_samtools_for_count_table_test"),
        "unexpected stderr: {stderr}"
    );
    assert!(output.stdout.is_empty());
}

#[test]
fn toolchain_run_requires_alignment_inputs() {
    let output = run_binary(&["-b", "testdata/sample.bam"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("missing required argument: --fasta"));
}

#[cfg(unix)]
mod fake_toolchain {
    use super::{assert_success, expected_header, run_binary};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    const FAKE_SAMTOOLS: &str = r#"#!/bin/sh
case "$1" in
  view) printf 'BAM\001' ;;
  sort) cat > /dev/null ;;
  index) ;;
  faidx) : > "$2.fai" ;;
  *) exit 64 ;;
esac
"#;

    const MPILEUP_ROWS: &str = r"printf '##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\nchr1\t5\t.\tA\tC,<*>\t0\t.\tDP=9;AD=6,3,0\n'";

    struct Fixture {
        dir: tempfile::TempDir,
        samtools: PathBuf,
        bcftools: PathBuf,
    }

    impl Fixture {
        fn new(bcftools_body: &str) -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            for name in ["sample.bam", "ref.fa", "roi.bed"] {
                fs::write(dir.path().join(name), "").expect("input placeholder");
            }
            let samtools = write_script(dir.path(), "samtools", FAKE_SAMTOOLS);
            let bcftools = write_script(
                dir.path(),
                "bcftools",
                &format!("#!/bin/sh\n{bcftools_body}\n"),
            );
            Self {
                dir,
                samtools,
                bcftools,
            }
        }

        fn path(&self, name: &str) -> String {
            self.dir.path().join(name).to_string_lossy().into_owned()
        }

        fn run(&self, out: &str) -> std::process::Output {
            run_binary(&[
                "-b",
                &self.path("sample.bam"),
                "-F",
                &self.path("ref.fa"),
                "-R",
                &self.path("roi.bed"),
                "--tmp-dir",
                &self.dir.path().to_string_lossy(),
                "-S",
                &self.samtools.to_string_lossy(),
                "-B",
                &self.bcftools.to_string_lossy(),
                "-o",
                out,
            ])
        }
    }

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).expect("write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
        path
    }

    #[test]
    fn toolchain_rows_reach_output() {
        let fixture = Fixture::new(MPILEUP_ROWS);
        let out = fixture.path("counts.tsv");

        let output = fixture.run(&out);
        assert_success(&output);

        let text = fs::read_to_string(&out).expect("expected output table");
        assert_eq!(text, format!("{}chr1\t5\t.\tA\t6\t3\t0\t0\n", expected_header()));
        assert!(Path::new(&fixture.path("ref.fa.fai")).is_file());
    }

    #[test]
    fn failing_mpileup_leaves_no_output() {
        let fixture = Fixture::new(&format!(
            "{MPILEUP_ROWS}\necho 'mpileup exploded' >&2\nexit 2"
        ));
        let out = fixture.path("counts.tsv");

        let output = fixture.run(&out);
        assert_eq!(output.status.code(), Some(1));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("command failed"), "unexpected stderr: {stderr}");
        assert!(stderr.contains("mpileup"), "unexpected stderr: {stderr}");
        assert!(stderr.contains("(exit: Some(2))"), "unexpected stderr: {stderr}");
        assert!(stderr.contains("mpileup exploded"), "unexpected stderr: {stderr}");
        assert!(!Path::new(&out).exists());
    }

    #[test]
    fn failing_sort_stops_before_mpileup() {
        let fixture = Fixture::new(MPILEUP_ROWS);
        write_script(
            fixture.dir.path(),
            "samtools",
            "#!/bin/sh\ncase \"$1\" in\n  view) printf 'BAM' ;;\n  sort) cat > /dev/null; echo 'sort ran out of space' >&2; exit 1 ;;\nesac\n",
        );
        let out = fixture.path("counts.tsv");

        let output = fixture.run(&out);
        assert_eq!(output.status.code(), Some(1));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("sort -@ 1"), "unexpected stderr: {stderr}");
        assert!(stderr.contains("sort ran out of space"), "unexpected stderr: {stderr}");
        assert!(!Path::new(&out).exists());
    }
}
