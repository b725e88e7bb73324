/// Default pattern for archives that trigger another extraction level
/// (the regional `google_transit.zip` bundles inside the PTV distribution)
pub const DEFAULT_INNER_ARCHIVE_PATTERN: &str = r"^google_transit\.zip$";

/// Maximum number of nested archive levels below the root archive
pub const MAX_NESTING_DEPTH: usize = 8;

/// Transient directory the input archive is unpacked into
pub const DEFAULT_EXTRACT_DIR: &str = "gtfs_in";

/// Directory the consolidated tables are written to
pub const DEFAULT_OUTPUT_DIR: &str = "gtfs_out";

/// Extension of recognized entity files
pub const ENTITY_FILE_EXTENSION: &str = "txt";

/// Records buffered between producers and the merge consumer (0 = rendezvous)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Progress update interval (tick every N merged records)
pub const PROGRESS_INTERVAL: u64 = 10_000;

/// Buffer size for table writers
pub const WRITER_BUFFER_SIZE: usize = 128 * 1024;

/// Buffer size for archive entry copies
pub const EXTRACT_BUFFER_SIZE: usize = 256 * 1024;
