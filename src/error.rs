use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Everything that can abort a consolidation run.
///
/// Each variant names the path it failed on so the top-level diagnostic points
/// at the offending archive, entry or table file.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to read archive {}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("archive {} contains entry {entry:?} that escapes the extraction directory", archive.display())]
    PathTraversal { archive: PathBuf, entry: String },

    #[error("archive {} is nested more than {limit} levels deep", path.display())]
    NestingTooDeep { path: PathBuf, limit: usize },

    #[error("I/O error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to walk extracted tree")]
    Walk(#[from] walkdir::Error),

    #[error("malformed row in {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("refusing to use {} as a working directory: {reason}", dir.display())]
    UnsafeWorkingDir { dir: PathBuf, reason: &'static str },

    #[error("{role} thread panicked")]
    WorkerPanicked { role: &'static str },

    #[error("invalid inner archive pattern")]
    InvalidPattern(#[from] regex::Error),
}

impl PipelineError {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn archive(path: impl AsRef<Path>, source: zip::result::ZipError) -> Self {
        Self::Archive {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn parse(path: impl AsRef<Path>, source: csv::Error) -> Self {
        Self::Parse {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}
