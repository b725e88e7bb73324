use crate::config::WRITER_BUFFER_SIZE;
use crate::error::{PipelineError, Result};
use crate::merge::{ConsolidatedTables, Table};
use crate::stats::PipelineStats;
use csv::WriterBuilder;
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Writes every table to `<output_dir>/<entity>.txt`, header first.
///
/// Tables are written in parallel, one file each. Returns the written paths in
/// entity order.
pub fn write_tables(
    tables: &ConsolidatedTables,
    output_dir: &Path,
    stats: &PipelineStats,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir).map_err(|e| PipelineError::io(output_dir, e))?;

    let tables: Vec<&Table> = tables.iter().collect();
    let paths = tables
        .par_iter()
        .map(|table| -> Result<PathBuf> {
            let path = output_dir.join(table.entity().file_name());
            write_table(table, &path)?;
            stats.inc_tables();
            debug!(path = %path.display(), rows = table.len(), "Wrote table");
            Ok(path)
        })
        .collect::<Result<Vec<_>>>()?;

    info!(dir = %output_dir.display(), tables = paths.len(), "Tables written");
    Ok(paths)
}

/// Rows are written as read, so a row may be wider or narrower than the header.
pub fn write_table(table: &Table, path: &Path) -> Result<()> {
    let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
    let mut writer = WriterBuilder::new()
        .flexible(true)
        .from_writer(BufWriter::with_capacity(WRITER_BUFFER_SIZE, file));

    for row in table.iter_with_header() {
        writer
            .write_record(row)
            .map_err(|e| PipelineError::io(path, e.into()))?;
    }
    writer.flush().map_err(|e| PipelineError::io(path, e))?;
    Ok(())
}

/// Path of the bundle produced for `dir`: the same name with `.zip` appended.
pub fn bundle_path(dir: &Path) -> Option<PathBuf> {
    let mut name = dir.file_name()?.to_os_string();
    name.push(".zip");
    Some(dir.with_file_name(name))
}

/// Compresses every file under `dir` into a zip next to it and returns its path.
///
/// Entry names are relative to `dir` and use `/` separators.
pub fn bundle_directory(dir: &Path) -> Result<PathBuf> {
    let archive_path = bundle_path(dir).ok_or_else(|| {
        PipelineError::io(
            dir,
            io::Error::new(io::ErrorKind::InvalidInput, "directory has no name to bundle under"),
        )
    })?;

    let file = File::create(&archive_path).map_err(|e| PipelineError::io(&archive_path, e))?;
    let mut zip = ZipWriter::new(BufWriter::with_capacity(WRITER_BUFFER_SIZE, file));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries = 0usize;
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        zip.start_file(name, options)
            .map_err(|e| PipelineError::archive(&archive_path, e))?;
        let mut source = BufReader::new(
            File::open(entry.path()).map_err(|e| PipelineError::io(entry.path(), e))?,
        );
        io::copy(&mut source, &mut zip).map_err(|e| PipelineError::io(entry.path(), e))?;
        entries += 1;
    }

    let mut inner = zip
        .finish()
        .map_err(|e| PipelineError::archive(&archive_path, e))?;
    inner.flush().map_err(|e| PipelineError::io(&archive_path, e))?;

    info!(archive = %archive_path.display(), entries, "Output bundled");
    Ok(archive_path)
}
