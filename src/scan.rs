//! Tree scanning and concurrent consolidation.
//!
//! One scanner thread walks the extracted tree and queues every recognized entity
//! file. A fixed pool of producer threads each takes a file, streams its rows and
//! sends them down a shared record channel. The calling thread is the only
//! consumer: it owns the [`ConsolidatedTables`] and merges rows as they arrive.
//!
//! The record channel closes once every producer has dropped its sender, which
//! ends the consumer loop. Any failure sets a shared abort flag so the remaining
//! threads stop early, and the first real error is returned once every thread has
//! been joined.

use crate::config::PROGRESS_INTERVAL;
use crate::error::{PipelineError, Result};
use crate::merge::ConsolidatedTables;
use crate::models::{EntityType, Record};
use crate::stats::PipelineStats;
use crossbeam_channel::{bounded, Receiver, Sender};
use indicatif::ProgressBar;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};
use walkdir::WalkDir;

/// A feed file whose name matched an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityFile {
    pub path: PathBuf,
    pub entity: EntityType,
}

#[derive(Debug, Clone, Copy)]
pub struct ConsolidateOptions {
    /// Producer threads reading entity files concurrently.
    pub workers: usize,
    /// Records buffered ahead of the consumer. 0 makes every send a hand-off.
    pub channel_capacity: usize,
}

/// Visits every file under `root` and calls `dispatch` for each recognized entity
/// file as soon as it is found. Returning `false` from `dispatch` stops the walk.
pub fn scan_tree<F>(root: &Path, mut dispatch: F) -> Result<()>
where
    F: FnMut(EntityFile) -> bool,
{
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(entity) = EntityType::from_path(entry.path()) else {
            continue;
        };
        if !dispatch(EntityFile {
            path: entry.into_path(),
            entity,
        }) {
            break;
        }
    }
    Ok(())
}

/// Collects every entity file under `root` in walk order.
pub fn find_entity_files(root: &Path) -> Result<Vec<EntityFile>> {
    let mut files = Vec::new();
    scan_tree(root, |file| {
        files.push(file);
        true
    })?;
    Ok(files)
}

/// Streams the data rows of one entity file, skipping its header row.
///
/// Rows are handed to `emit` in file order. Returning `false` from `emit` stops
/// reading early. A row whose field count differs from the header, or that is not
/// valid UTF-8, fails the whole file. Returns the number of rows emitted.
pub fn read_entity_file<F>(file: &EntityFile, mut emit: F) -> Result<u64>
where
    F: FnMut(Record) -> bool,
{
    let handle = File::open(&file.path).map_err(|e| PipelineError::io(&file.path, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(BufReader::new(handle));

    let source: Arc<Path> = Arc::from(file.path.as_path());
    let mut count = 0u64;
    for result in reader.records() {
        let fields = result.map_err(|e| PipelineError::parse(&file.path, e))?;
        if !emit(Record::new(Arc::clone(&source), file.entity, fields)) {
            break;
        }
        count += 1;
    }
    Ok(count)
}

/// Runs the scanner, the producer pool and the merge consumer over `root`.
pub fn consolidate(
    root: &Path,
    options: ConsolidateOptions,
    stats: &PipelineStats,
    progress: &ProgressBar,
) -> Result<ConsolidatedTables> {
    let workers = options.workers.max(1);
    info!(
        root = %root.display(),
        workers,
        channel_capacity = options.channel_capacity,
        "Consolidating entity files"
    );

    let abort = AtomicBool::new(false);
    let (file_tx, file_rx) = bounded::<EntityFile>(workers);
    let (record_tx, record_rx) = bounded::<Record>(options.channel_capacity);

    thread::scope(|s| {
        let abort = &abort;

        let scanner = s.spawn(move || run_scanner(root, file_tx, abort, stats));

        let producers: Vec<_> = (0..workers)
            .map(|_| {
                let file_rx = file_rx.clone();
                let record_tx = record_tx.clone();
                s.spawn(move || run_producer(file_rx, record_tx, abort, stats))
            })
            .collect();
        drop(file_rx);
        drop(record_tx);

        let tables = run_consumer(record_rx, stats, progress);

        let mut first_error = None;
        let scan_result = scanner
            .join()
            .unwrap_or(Err(PipelineError::WorkerPanicked { role: "scanner" }));
        if let Err(e) = scan_result {
            first_error.get_or_insert(e);
        }
        for producer in producers {
            let result = producer
                .join()
                .unwrap_or(Err(PipelineError::WorkerPanicked { role: "producer" }));
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(tables),
        }
    })
}

fn run_scanner(
    root: &Path,
    file_tx: Sender<EntityFile>,
    abort: &AtomicBool,
    stats: &PipelineStats,
) -> Result<()> {
    let result = scan_tree(root, |file| {
        if abort.load(Ordering::Relaxed) {
            return false;
        }
        debug!(path = %file.path.display(), entity = %file.entity, "Dispatching entity file");
        stats.inc_files();
        file_tx.send(file).is_ok()
    });
    if result.is_err() {
        abort.store(true, Ordering::Relaxed);
    }
    result
}

fn run_producer(
    file_rx: Receiver<EntityFile>,
    record_tx: Sender<Record>,
    abort: &AtomicBool,
    stats: &PipelineStats,
) -> Result<()> {
    for file in file_rx {
        if abort.load(Ordering::Relaxed) {
            break;
        }
        let result = read_entity_file(&file, |record| {
            !abort.load(Ordering::Relaxed) && record_tx.send(record).is_ok()
        });
        match result {
            Ok(rows) => {
                stats.add_records(rows);
                debug!(path = %file.path.display(), rows, "Finished entity file");
            }
            Err(e) => {
                abort.store(true, Ordering::Relaxed);
                return Err(e);
            }
        }
    }
    Ok(())
}

fn run_consumer(
    record_rx: Receiver<Record>,
    stats: &PipelineStats,
    progress: &ProgressBar,
) -> ConsolidatedTables {
    let mut tables = ConsolidatedTables::new();
    let mut seen = 0u64;
    for record in record_rx {
        if tables.merge(record) {
            stats.inc_merged();
        } else {
            stats.inc_duplicates();
        }
        seen += 1;
        if seen % PROGRESS_INTERVAL == 0 {
            progress.set_message(format!("{seen} records merged"));
            progress.tick();
        }
    }
    progress.finish_with_message(format!("{seen} records merged"));
    tables
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, contents: &str) -> PathBuf {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    fn options(workers: usize, channel_capacity: usize) -> ConsolidateOptions {
        ConsolidateOptions {
            workers,
            channel_capacity,
        }
    }

    #[test]
    fn find_entity_files_skips_unrecognized() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "1/google_transit/stops.txt", "stop_id\n");
        write(tmp.path(), "1/google_transit/transfers.txt", "from_stop_id\n");
        write(tmp.path(), "2/google_transit/routes.txt", "route_id\n");
        write(tmp.path(), "notes/stops.csv", "stop_id\n");
        fs::create_dir_all(tmp.path().join("stops.txt.d")).unwrap();

        let mut found: Vec<EntityType> = find_entity_files(tmp.path())
            .unwrap()
            .into_iter()
            .map(|f| f.entity)
            .collect();
        found.sort();
        assert_eq!(found, vec![EntityType::Routes, EntityType::Stops]);
    }

    #[test]
    fn scan_tree_fails_on_missing_root() {
        let tmp = TempDir::new().unwrap();
        let err = find_entity_files(&tmp.path().join("missing")).unwrap_err();
        assert!(matches!(err, PipelineError::Walk(_)));
    }

    #[test]
    fn read_entity_file_skips_header_and_keeps_order() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            tmp.path(),
            "stops.txt",
            "stop_id,stop_name,stop_lat,stop_lon\nS2,Two,0,0\nS1,One,0,0\nS3,Three,0,0\n",
        );
        let file = EntityFile {
            path,
            entity: EntityType::Stops,
        };

        let mut ids = Vec::new();
        let count = read_entity_file(&file, |r| {
            ids.push(r.fields.get(0).unwrap().to_string());
            true
        })
        .unwrap();

        assert_eq!(count, 3);
        assert_eq!(ids, vec!["S2", "S1", "S3"]);
    }

    #[test]
    fn read_entity_file_counts_only_accepted_rows() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            tmp.path(),
            "stops.txt",
            "stop_id,stop_name,stop_lat,stop_lon\nS1,One,0,0\nS2,Two,0,0\nS3,Three,0,0\n",
        );
        let file = EntityFile {
            path,
            entity: EntityType::Stops,
        };

        assert_eq!(read_entity_file(&file, |_| false).unwrap(), 0);

        let mut accepted = 0;
        let count = read_entity_file(&file, |_| {
            accepted += 1;
            accepted <= 2
        })
        .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn read_entity_file_rejects_ragged_rows() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            tmp.path(),
            "stops.txt",
            "stop_id,stop_name,stop_lat,stop_lon\nS1,One,0,0\nS2,Two\n",
        );
        let file = EntityFile {
            path,
            entity: EntityType::Stops,
        };

        let err = read_entity_file(&file, |_| true).unwrap_err();
        assert!(matches!(err, PipelineError::Parse { .. }));
    }

    #[test]
    fn read_entity_file_rejects_invalid_utf8() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("stops.txt");
        let mut bytes = b"stop_id,stop_name,stop_lat,stop_lon\nS1,".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        bytes.extend_from_slice(b",0,0\n");
        fs::write(&path, bytes).unwrap();
        let file = EntityFile {
            path,
            entity: EntityType::Stops,
        };

        let err = read_entity_file(&file, |_| true).unwrap_err();
        assert!(matches!(err, PipelineError::Parse { .. }));
    }

    #[test]
    fn consolidate_merges_across_files() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "1/google_transit/stops.txt",
            "stop_id,stop_name,stop_lat,stop_lon\nS1,Main St,-37.8,144.9\nS2,High St,-37.9,145.0\n",
        );
        write(
            tmp.path(),
            "2/google_transit/stops.txt",
            "stop_id,stop_name,stop_lat,stop_lon\nS1,Main Street,-37.81,144.95\nS3,Low St,-38.0,145.1\n",
        );

        let stats = PipelineStats::new();
        let tables = consolidate(tmp.path(), options(4, 0), &stats, &ProgressBar::hidden()).unwrap();

        let stops = tables.get(EntityType::Stops).unwrap();
        assert_eq!(stops.len(), 3);
        assert_eq!(stats.files(), 2);
        assert_eq!(stats.records(), 4);
        assert_eq!(stats.merged(), 3);
        assert_eq!(stats.duplicates(), 1);
    }

    #[test]
    fn consolidate_with_no_files_yields_header_only_tables() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "readme.md", "nothing here");

        let tables = consolidate(
            tmp.path(),
            options(2, 16),
            &PipelineStats::new(),
            &ProgressBar::hidden(),
        )
        .unwrap();
        assert_eq!(tables.total_rows(), 0);
        assert_eq!(tables.iter().count(), EntityType::ALL.len());
    }

    #[test]
    fn consolidate_propagates_parse_errors() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "a/stops.txt",
            "stop_id,stop_name,stop_lat,stop_lon\nS1,One,0,0\n",
        );
        write(
            tmp.path(),
            "b/routes.txt",
            "route_id,agency_id\nR1,A,extra\n",
        );

        let err = consolidate(
            tmp.path(),
            options(1, 0),
            &PipelineStats::new(),
            &ProgressBar::hidden(),
        )
        .unwrap_err();
        match err {
            PipelineError::Parse { path, .. } => assert!(path.ends_with("b/routes.txt")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
