//! twixanon - Anonymize Siemens twix MRI raw-data files
//!
//! This tool removes patient information from both header copies of a twix
//! file, writes the anonymized container to a mirrored output path, and
//! appends the scan metadata of every file to a CSV summary.

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam::channel::unbounded;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{debug, error, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use twixanon_core::{
    Anonymizer, AnonymizerConfig, Error, MetadataRecord, Mode, ResizePolicy, RuleSet, WriterConfig,
};
use walkdir::WalkDir;

/// Anonymize Siemens twix MRI raw-data files
#[derive(Parser, Debug)]
#[command(name = "twixanon")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Twix file, or directory of twix files, to anonymize
    #[arg(short, long)]
    input: PathBuf,

    /// Output directory for anonymized files and the metadata CSV
    #[arg(short, long)]
    output: PathBuf,

    /// Overwrite existing output files and rewrite the CSV
    #[arg(short, long)]
    force: bool,

    /// Only extract metadata; do not write anonymized files
    #[arg(short, long = "meta-only", alias = "meta_only")]
    meta_only: bool,

    /// Metadata CSV path [default: <output>/<input stem>.csv]
    #[arg(long)]
    csv: Option<PathBuf>,

    /// JSON rule set to use instead of the built-in rules
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Write an anonymization report next to every output file
    #[arg(long)]
    report: bool,

    /// How text length changes are reconciled with the container: fixed
    /// keeps every file length, reflow grows or shrinks headers
    #[arg(long, default_value = "fixed")]
    resize: ResizePolicy,

    /// Number of worker threads (0 = number of CPUs)
    #[arg(short, long, default_value = "0")]
    jobs: usize,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// One input file and where its anonymized copy goes
#[derive(Debug, Clone, PartialEq, Eq)]
struct Job {
    input: PathBuf,
    output: PathBuf,
}

/// What happened to a file
#[derive(Debug, Clone, PartialEq, Eq)]
enum Status {
    Anonymized,
    MetadataOnly,
    Skipped(String),
    Failed(String),
}

#[derive(Debug)]
struct FileResult {
    job: Job,
    status: Status,
    metadata: Option<MetadataRecord>,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct RunStats {
    anonymized: usize,
    metadata_only: usize,
    skipped: usize,
    failed: usize,
}

impl RunStats {
    fn record(&mut self, status: &Status) {
        match status {
            Status::Anonymized => self.anonymized += 1,
            Status::MetadataOnly => self.metadata_only += 1,
            Status::Skipped(_) => self.skipped += 1,
            Status::Failed(_) => self.failed += 1,
        }
    }

    fn unsuccessful(&self) -> usize {
        self.skipped + self.failed
    }

    fn print_summary(&self) {
        info!(
            "Summary: {} anonymized, {} metadata only, {} skipped, {} failed",
            self.anonymized, self.metadata_only, self.skipped, self.failed
        );
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    let stats = run(&cli)?;
    stats.print_summary();

    if stats.unsuccessful() > 0 {
        bail!(
            "{} file(s) skipped and {} file(s) failed",
            stats.skipped,
            stats.failed
        );
    }
    Ok(())
}

/// Processes every input and writes the CSV
fn run(cli: &Cli) -> Result<RunStats> {
    if !cli.input.exists() {
        bail!("Input path does not exist: {}", cli.input.display());
    }

    let rules = load_rules(cli.rules.as_deref())?;
    info!("Using rule set {}", rules.version());
    let config = AnonymizerConfig {
        writer: WriterConfig::new().resize(cli.resize),
        ..Default::default()
    };
    let anonymizer = Anonymizer::with_config(rules, config);

    fs::create_dir_all(&cli.output)
        .with_context(|| format!("Failed to create directory: {}", cli.output.display()))?;

    let jobs = collect_jobs(&cli.input, &cli.output)?;
    if cli.meta_only {
        info!("Only extracting metadata, no anonymized files are written");
    }
    info!("Processing {} file(s)", jobs.len());

    let mut results = process_jobs(cli, &anonymizer, jobs);
    results.sort_by(|a, b| a.job.input.cmp(&b.job.input));

    let mut stats = RunStats::default();
    for result in &results {
        stats.record(&result.status);
        match &result.status {
            Status::Anonymized => info!(
                "Anonymized {} -> {}",
                result.job.input.display(),
                result.job.output.display()
            ),
            Status::MetadataOnly => debug!("Read metadata of {}", result.job.input.display()),
            Status::Skipped(reason) => warn!("Skipped {}: {}", result.job.input.display(), reason),
            Status::Failed(reason) => error!("Failed {}: {}", result.job.input.display(), reason),
        }
    }

    let records: Vec<(&Path, &MetadataRecord)> = results
        .iter()
        .filter_map(|r| r.metadata.as_ref().map(|m| (r.job.input.as_path(), m)))
        .collect();
    let csv_path = cli
        .csv
        .clone()
        .unwrap_or_else(|| default_csv_path(&cli.input, &cli.output));
    if !records.is_empty() {
        write_csv(&csv_path, &records, cli.force)?;
        info!("Wrote {} metadata row(s) to {}", records.len(), csv_path.display());
    }

    Ok(stats)
}

fn load_rules(path: Option<&Path>) -> Result<RuleSet> {
    match path {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("Failed to read rule set: {}", path.display()))?;
            RuleSet::from_json(&json)
                .with_context(|| format!("Invalid rule set: {}", path.display()))
        }
        None => Ok(RuleSet::builtin()),
    }
}

/// Lists input files and their mirrored output paths
fn collect_jobs(input: &Path, output: &Path) -> Result<Vec<Job>> {
    if input.is_file() {
        let name = input
            .file_name()
            .with_context(|| format!("Input path has no file name: {}", input.display()))?;
        return Ok(vec![Job {
            input: input.to_path_buf(),
            output: output.join(name),
        }]);
    }
    if !input.is_dir() {
        bail!("Input path is neither a file nor a directory: {}", input.display());
    }

    info!("Scanning directory: {}", input.display());
    let mut jobs = Vec::new();
    for entry in WalkDir::new(input)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() || !is_twix_file(path) {
            trace!("Skipping {}", path.display());
            continue;
        }
        let relative = path.strip_prefix(input).unwrap_or(path);
        jobs.push(Job {
            input: path.to_path_buf(),
            output: output.join(relative),
        });
    }
    jobs.sort_by(|a, b| a.input.cmp(&b.input));
    Ok(jobs)
}

/// Twix raw-data files carry the `.dat` extension
fn is_twix_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false);
    let dat = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("dat"))
        .unwrap_or(false);
    dat && !hidden
}

fn default_csv_path(input: &Path, output: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("metadata");
    output.join(format!("{}.csv", stem))
}

/// Runs jobs on a pool of worker threads fed by a channel
fn process_jobs(cli: &Cli, anonymizer: &Anonymizer, jobs: Vec<Job>) -> Vec<FileResult> {
    let workers = match cli.jobs {
        0 => thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
        n => n,
    }
    .min(jobs.len().max(1));
    debug!("Starting {} worker(s)", workers);

    let (job_tx, job_rx) = unbounded::<Job>();
    let (result_tx, result_rx) = unbounded::<FileResult>();
    for job in jobs {
        // The receiver is alive until the scope below ends
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    thread::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for job in job_rx.iter() {
                    let result = process_job(cli, anonymizer, job);
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(result_tx);

    result_rx.iter().collect()
}

/// Processes one file; never panics or returns early on per-file errors
fn process_job(cli: &Cli, anonymizer: &Anonymizer, job: Job) -> FileResult {
    let mode = if cli.meta_only { Mode::MetaOnly } else { Mode::Full };

    if mode == Mode::Full && job.output.exists() && !cli.force {
        return FileResult {
            status: Status::Failed(format!(
                "output already exists: {} (use --force to overwrite)",
                job.output.display()
            )),
            job,
            metadata: None,
        };
    }

    trace!("Reading {}", job.input.display());
    let outcome = match anonymizer.process_file(&job.input, mode) {
        Ok(outcome) => outcome,
        Err(e) => {
            let status = if e.is_skippable() {
                Status::Skipped(e.to_string())
            } else {
                Status::Failed(e.to_string())
            };
            return FileResult {
                job,
                status,
                metadata: None,
            };
        }
    };

    let status = match (&outcome.output, mode) {
        (Some(bytes), Mode::Full) => {
            match write_outputs(cli, &job.output, bytes, outcome.report.as_ref()) {
                Ok(()) => Status::Anonymized,
                Err(e) => Status::Failed(format!("{:#}", e)),
            }
        }
        _ => Status::MetadataOnly,
    };

    // Metadata of a file whose anonymized copy could not be written is not reported
    let metadata = match status {
        Status::Failed(_) => None,
        _ => Some(outcome.metadata),
    };
    FileResult {
        job,
        status,
        metadata,
    }
}

fn write_outputs(
    cli: &Cli,
    output: &Path,
    bytes: &[u8],
    report: Option<&twixanon_core::AnonymizationReport>,
) -> Result<()> {
    write_file(output, bytes, cli.force)?;
    if let Some(report) = report.filter(|_| cli.report) {
        let path = report_path(output);
        let json = report.to_json()?;
        write_file(&path, json.as_bytes(), true)?;
        debug!("Wrote report {}", path.display());
    }
    Ok(())
}

fn report_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(".report.json");
    PathBuf::from(name)
}

/// Writes a file through a temporary file in the same directory
fn write_file(output_path: &Path, content: &[u8], force: bool) -> Result<()> {
    let parent = match output_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let mut file = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temporary file in: {}", parent.display()))?;
    file.write_all(content).map_err(|e| Error::file_write(output_path, e))?;

    if force {
        file.persist(output_path)
    } else {
        file.persist_noclobber(output_path)
    }
    .map_err(|e| Error::file_write(output_path, e.error))?;

    Ok(())
}

/// Appends metadata rows, writing the header only when the file is created
fn write_csv(path: &Path, records: &[(&Path, &MetadataRecord)], force: bool) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let append = path.exists() && !force;
    let file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .with_context(|| format!("Failed to open CSV: {}", path.display()))?;

    let mut writer = csv::Writer::from_writer(file);
    if !append {
        let mut header = vec!["file"];
        header.extend(MetadataRecord::COLUMNS);
        writer.write_record(&header)?;
    }
    for (input, record) in records {
        let file = input.to_string_lossy().into_owned();
        let mut row = vec![file.as_str()];
        row.extend(record.to_row());
        writer.write_record(&row)?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write CSV: {}", path.display()))?;
    Ok(())
}
