use crate::config::{DEFAULT_INNER_ARCHIVE_PATTERN, EXTRACT_BUFFER_SIZE};
use crate::error::{PipelineError, Result};
use crate::stats::PipelineStats;
use regex::Regex;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use zip::ZipArchive;

/// Decides which extracted files are themselves archives to unpack.
///
/// Matching is done on the file's base name only. A matched archive is unpacked
/// into a sibling directory named after the file without its extension, so
/// `1/google_transit.zip` lands in `1/google_transit/`.
#[derive(Debug, Clone)]
pub struct InnerArchiveMatcher {
    pattern: Regex,
}

impl Default for InnerArchiveMatcher {
    fn default() -> Self {
        Self {
            pattern: Regex::new(DEFAULT_INNER_ARCHIVE_PATTERN)
                .expect("default inner archive pattern is valid"),
        }
    }
}

impl InnerArchiveMatcher {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn is_match(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| self.pattern.is_match(name))
    }

    pub fn target_dir(&self, archive: &Path) -> PathBuf {
        let stem = archive.file_stem().unwrap_or(archive.as_os_str());
        match archive.parent() {
            Some(parent) => parent.join(stem),
            None => PathBuf::from(stem),
        }
    }
}

/// Outcome of a recursive extraction.
#[derive(Debug, Default)]
pub struct ExtractionReport {
    /// Every archive unpacked, root first.
    pub archives: Vec<PathBuf>,
    /// Regular files written across all levels.
    pub files_written: usize,
}

/// Joins an archive entry name onto `dest` without letting it leave `dest`.
///
/// The name is resolved lexically: `.` is skipped, `..` pops a previously pushed
/// component, and absolute names or a `..` that would climb above `dest` return
/// `None`.
pub fn safe_join(dest: &Path, entry_name: &str) -> Option<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(entry_name).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    let mut out = dest.to_path_buf();
    out.extend(parts);
    Some(out)
}

/// Unpacks every entry of `archive` into `dest`, returning the files written.
///
/// All entry names are checked before anything is written, so an archive with a
/// single escaping entry leaves `dest` untouched. Existing content in `dest` is
/// left alone; files with the same relative path are overwritten.
pub fn unzip(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(archive).map_err(|e| PipelineError::io(archive, e))?;
    let mut zip = ZipArchive::new(BufReader::new(file))
        .map_err(|e| PipelineError::archive(archive, e))?;

    let mut targets = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let entry = zip
            .by_index(i)
            .map_err(|e| PipelineError::archive(archive, e))?;
        let name = entry.name().to_string();
        let Some(target) = safe_join(dest, &name) else {
            return Err(PipelineError::PathTraversal {
                archive: archive.to_path_buf(),
                entry: name,
            });
        };
        targets.push((target, entry.is_dir()));
    }

    fs::create_dir_all(dest).map_err(|e| PipelineError::io(dest, e))?;

    let mut written = Vec::new();
    for (i, (target, is_dir)) in targets.into_iter().enumerate() {
        if is_dir {
            fs::create_dir_all(&target).map_err(|e| PipelineError::io(&target, e))?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }

        let mut entry = zip
            .by_index(i)
            .map_err(|e| PipelineError::archive(archive, e))?;
        let out = File::create(&target).map_err(|e| PipelineError::io(&target, e))?;
        let mut writer = BufWriter::with_capacity(EXTRACT_BUFFER_SIZE, out);
        io::copy(&mut entry, &mut writer).map_err(|e| copy_error(archive, &target, e))?;
        writer.flush().map_err(|e| PipelineError::io(&target, e))?;

        written.push(target);
    }

    Ok(written)
}

/// Decompression failures surface from `io::copy` as `InvalidData`; report
/// those against the archive rather than the file being written.
fn copy_error(archive: &Path, target: &Path, e: io::Error) -> PipelineError {
    if e.kind() == io::ErrorKind::InvalidData {
        PipelineError::archive(archive, zip::result::ZipError::Io(e))
    } else {
        PipelineError::io(target, e)
    }
}

/// Unpacks `archive` into `dest`, then unpacks every inner archive found among
/// the extracted files, to at most `max_depth` levels below the root.
pub fn extract_archive(
    archive: &Path,
    dest: &Path,
    matcher: &InnerArchiveMatcher,
    max_depth: usize,
    stats: &PipelineStats,
) -> Result<ExtractionReport> {
    info!(archive = %archive.display(), dest = %dest.display(), "Extracting archive");
    let mut report = ExtractionReport::default();
    extract_level(archive, dest, matcher, 0, max_depth, stats, &mut report)?;
    info!(
        archives = report.archives.len(),
        files = report.files_written,
        "Extraction complete"
    );
    Ok(report)
}

fn extract_level(
    archive: &Path,
    dest: &Path,
    matcher: &InnerArchiveMatcher,
    depth: usize,
    max_depth: usize,
    stats: &PipelineStats,
    report: &mut ExtractionReport,
) -> Result<()> {
    if depth > max_depth {
        return Err(PipelineError::NestingTooDeep {
            path: archive.to_path_buf(),
            limit: max_depth,
        });
    }

    let written = unzip(archive, dest)?;
    stats.inc_archives();
    stats.add_entries(written.len() as u64);
    report.archives.push(archive.to_path_buf());
    report.files_written += written.len();

    for inner in written.iter().filter(|p| matcher.is_match(p)) {
        let inner_dest = matcher.target_dir(inner);
        debug!(
            archive = %inner.display(),
            dest = %inner_dest.display(),
            depth = depth + 1,
            "Found inner archive"
        );
        extract_level(inner, &inner_dest, matcher, depth + 1, max_depth, stats, report)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, FileOptions::default()).unwrap();
            } else {
                writer.start_file(*name, FileOptions::default()).unwrap();
                writer.write_all(data).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        fs::write(path, zip_bytes(entries)).unwrap();
    }

    #[test]
    fn safe_join_accepts_nested_names() {
        let dest = Path::new("/work/gtfs_in");
        assert_eq!(
            safe_join(dest, "1/google_transit.zip"),
            Some(PathBuf::from("/work/gtfs_in/1/google_transit.zip"))
        );
        assert_eq!(
            safe_join(dest, "./a/../b.txt"),
            Some(PathBuf::from("/work/gtfs_in/b.txt"))
        );
    }

    #[test]
    fn safe_join_rejects_escapes() {
        let dest = Path::new("/work/gtfs_in");
        assert_eq!(safe_join(dest, "../evil.txt"), None);
        assert_eq!(safe_join(dest, "a/../../evil.txt"), None);
        assert_eq!(safe_join(dest, "/etc/passwd"), None);
    }

    #[test]
    fn matcher_default_targets_sibling_dir() {
        let m = InnerArchiveMatcher::default();
        let p = Path::new("gtfs_in/2/google_transit.zip");
        assert!(m.is_match(p));
        assert!(!m.is_match(Path::new("gtfs_in/2/other.zip")));
        assert_eq!(m.target_dir(p), PathBuf::from("gtfs_in/2/google_transit"));
    }

    #[test]
    fn matcher_rejects_bad_pattern() {
        assert!(matches!(
            InnerArchiveMatcher::new("("),
            Err(PipelineError::InvalidPattern(_))
        ));
    }

    #[test]
    fn unzip_preserves_structure() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("feed.zip");
        write_zip(
            &archive,
            &[("1/", "".as_bytes()), ("1/stops.txt", "stop_id\nS1\n".as_bytes()), ("readme.txt", "hi".as_bytes())],
        );

        let dest = tmp.path().join("out");
        let written = unzip(&archive, &dest).unwrap();

        assert_eq!(written.len(), 2);
        assert_eq!(
            fs::read_to_string(dest.join("1/stops.txt")).unwrap(),
            "stop_id\nS1\n"
        );
        assert!(dest.join("readme.txt").is_file());
    }

    #[test]
    fn unzip_rejects_traversal_and_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("evil.zip");
        write_zip(&archive, &[("ok.txt", "fine".as_bytes()), ("../escaped.txt", "bad".as_bytes())]);

        let dest = tmp.path().join("out");
        let err = unzip(&archive, &dest).unwrap_err();

        assert!(matches!(err, PipelineError::PathTraversal { ref entry, .. } if entry == "../escaped.txt"));
        assert!(!tmp.path().join("escaped.txt").exists());
        assert!(!dest.join("ok.txt").exists());
    }

    #[test]
    fn unzip_keeps_unrelated_content() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("keep.me"), "x").unwrap();

        let archive = tmp.path().join("feed.zip");
        write_zip(&archive, &[("a.txt", "a".as_bytes())]);
        unzip(&archive, &dest).unwrap();

        assert!(dest.join("keep.me").exists());
        assert!(dest.join("a.txt").exists());
    }

    #[test]
    fn unzip_fails_on_corrupt_archive() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("broken.zip");
        fs::write(&archive, "this is not a zip file".as_bytes()).unwrap();

        let err = unzip(&archive, &tmp.path().join("out")).unwrap_err();
        assert!(matches!(err, PipelineError::Archive { .. }));
    }

    #[test]
    fn unzip_fails_on_missing_archive() {
        let tmp = TempDir::new().unwrap();
        let err = unzip(&tmp.path().join("absent.zip"), &tmp.path().join("out")).unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }

    #[test]
    fn extract_archive_unpacks_nested_bundles() {
        let tmp = TempDir::new().unwrap();
        let inner = zip_bytes(&[("stops.txt", "stop_id,stop_name,stop_lat,stop_lon\nS1,Main St,-37.8,144.9\n".as_bytes())]);
        let archive = tmp.path().join("gtfs.zip");
        write_zip(
            &archive,
            &[("1/google_transit.zip", inner.as_slice()), ("2/google_transit.zip", inner.as_slice())],
        );

        let dest = tmp.path().join("gtfs_in");
        let stats = PipelineStats::new();
        let report = extract_archive(
            &archive,
            &dest,
            &InnerArchiveMatcher::default(),
            8,
            &stats,
        )
        .unwrap();

        assert_eq!(report.archives.len(), 3);
        assert_eq!(stats.archives(), 3);
        assert!(dest.join("1/google_transit/stops.txt").is_file());
        assert!(dest.join("2/google_transit/stops.txt").is_file());
        assert!(dest.join("1/google_transit.zip").is_file());
    }

    #[test]
    fn extract_archive_enforces_depth_limit() {
        let tmp = TempDir::new().unwrap();
        let level2 = zip_bytes(&[("stops.txt", "stop_id\n".as_bytes())]);
        let level1 = zip_bytes(&[("google_transit.zip", level2.as_slice())]);
        let archive = tmp.path().join("root.zip");
        write_zip(&archive, &[("google_transit.zip", level1.as_slice())]);

        let err = extract_archive(
            &archive,
            &tmp.path().join("out"),
            &InnerArchiveMatcher::default(),
            1,
            &PipelineStats::new(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::NestingTooDeep { limit: 1, .. }));
    }
}
