use crate::config::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_EXTRACT_DIR, DEFAULT_INNER_ARCHIVE_PATTERN,
    DEFAULT_OUTPUT_DIR, MAX_NESTING_DEPTH,
};
use crate::error::{PipelineError, Result};
use crate::extract::{self, InnerArchiveMatcher};
use crate::merge::ConsolidatedTables;
use crate::models::EntityType;
use crate::scan::{self, ConsolidateOptions};
use crate::stats::PipelineStats;
use crate::writer;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub struct PipelineConfig {
    pub input: PathBuf,
    pub extract_dir: PathBuf,
    pub output_dir: PathBuf,
    pub inner_archive_pattern: String,
    pub max_nesting: usize,
    pub workers: usize,
    pub channel_capacity: usize,
    pub bundle: bool,
    pub keep_temp: bool,
    pub progress: bool,
}

impl PipelineConfig {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            extract_dir: PathBuf::from(DEFAULT_EXTRACT_DIR),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            inner_archive_pattern: DEFAULT_INNER_ARCHIVE_PATTERN.to_string(),
            max_nesting: MAX_NESTING_DEPTH,
            workers: num_cpus::get(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            bundle: true,
            keep_temp: false,
            progress: false,
        }
    }
}

/// What a successful run produced.
#[derive(Debug)]
pub struct RunSummary {
    pub rows: Vec<(EntityType, usize)>,
    pub table_files: Vec<PathBuf>,
    pub bundle: Option<PathBuf>,
    pub archives_extracted: u64,
    pub entries_extracted: u64,
    pub files_matched: u64,
    pub records_read: u64,
    pub duplicates_dropped: u64,
    pub extraction_time: Duration,
    pub consolidation_time: Duration,
    pub write_time: Duration,
}

/// Extract, consolidate and write one feed.
///
/// The working directories are checked before anything is deleted: neither may
/// hold the input archive or the current directory, and they may not overlap.
/// Stale working directories from an earlier run are then removed. The
/// extraction directory (and the output directory, once bundled) are removed on
/// success unless `keep_temp` is set; on failure everything is left in place.
pub fn run(config: &PipelineConfig) -> Result<RunSummary> {
    let matcher = InnerArchiveMatcher::new(&config.inner_archive_pattern)?;
    let stats = PipelineStats::new();

    check_working_dirs(config)?;
    remove_stale(&config.extract_dir)?;
    remove_stale(&config.output_dir)?;
    if let Some(bundle) = writer::bundle_path(&config.output_dir) {
        if bundle.is_file() {
            fs::remove_file(&bundle).map_err(|e| PipelineError::io(&bundle, e))?;
        }
    }

    let start = Instant::now();
    extract::extract_archive(
        &config.input,
        &config.extract_dir,
        &matcher,
        config.max_nesting,
        &stats,
    )?;
    let extraction_time = start.elapsed();

    let start = Instant::now();
    let progress = make_spinner(config.progress);
    let tables = scan::consolidate(
        &config.extract_dir,
        ConsolidateOptions {
            workers: config.workers,
            channel_capacity: config.channel_capacity,
        },
        &stats,
        &progress,
    )?;
    let consolidation_time = start.elapsed();
    info!(
        files = stats.files(),
        records = stats.records(),
        kept = stats.merged(),
        duplicates = stats.duplicates(),
        "Consolidation complete"
    );

    let start = Instant::now();
    let (table_files, bundle) = write_output(&tables, config, &stats)?;
    let write_time = start.elapsed();

    if !config.keep_temp {
        cleanup(&config.extract_dir);
        if bundle.is_some() {
            cleanup(&config.output_dir);
        }
    }

    Ok(RunSummary {
        rows: tables.row_counts(),
        table_files,
        bundle,
        archives_extracted: stats.archives(),
        entries_extracted: stats.entries(),
        files_matched: stats.files(),
        records_read: stats.records(),
        duplicates_dropped: stats.duplicates(),
        extraction_time,
        consolidation_time,
        write_time,
    })
}

fn write_output(
    tables: &ConsolidatedTables,
    config: &PipelineConfig,
    stats: &PipelineStats,
) -> Result<(Vec<PathBuf>, Option<PathBuf>)> {
    let table_files = writer::write_tables(tables, &config.output_dir, stats)?;
    let bundle = if config.bundle {
        Some(writer::bundle_directory(&config.output_dir)?)
    } else {
        None
    };
    Ok((table_files, bundle))
}

/// Refuses working directories that a stale-directory sweep would destroy
/// something in.
fn check_working_dirs(config: &PipelineConfig) -> Result<()> {
    let input = resolve(&config.input)?;
    let cwd = std::env::current_dir()
        .and_then(|dir| dir.canonicalize())
        .map_err(|e| PipelineError::io(".", e))?;
    let extract_dir = resolve(&config.extract_dir)?;
    let output_dir = resolve(&config.output_dir)?;

    for (dir, configured) in [
        (&extract_dir, &config.extract_dir),
        (&output_dir, &config.output_dir),
    ] {
        let reason = if input.starts_with(dir) {
            "it contains the input archive"
        } else if cwd.starts_with(dir) {
            "it contains the current directory"
        } else {
            continue;
        };
        return Err(PipelineError::UnsafeWorkingDir {
            dir: configured.clone(),
            reason,
        });
    }

    if extract_dir.starts_with(&output_dir) || output_dir.starts_with(&extract_dir) {
        return Err(PipelineError::UnsafeWorkingDir {
            dir: config.output_dir.clone(),
            reason: "it overlaps the extraction directory",
        });
    }

    if writer::bundle_path(&output_dir).is_some_and(|bundle| bundle == input) {
        return Err(PipelineError::UnsafeWorkingDir {
            dir: config.output_dir.clone(),
            reason: "its bundle would replace the input archive",
        });
    }
    Ok(())
}

/// Absolute form of `path` with symlinks resolved as far as the path exists.
fn resolve(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path).map_err(|e| PipelineError::io(path, e))?;
    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    loop {
        if let Ok(mut resolved) = existing.canonicalize() {
            resolved.extend(missing.iter().rev());
            return Ok(resolved);
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name);
                existing = parent;
            }
            _ => return Ok(absolute.clone()),
        }
    }
}

fn remove_stale(dir: &Path) -> Result<()> {
    if dir.exists() {
        info!(dir = %dir.display(), "Removing stale working directory");
        fs::remove_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
    }
    Ok(())
}

fn cleanup(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        warn!(dir = %dir.display(), error = %e, "Failed to remove working directory");
    }
}

fn make_spinner(enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        pb.set_style(style);
    }
    pb.set_message("Merging records");
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}
