use std::sync::atomic::{AtomicU64, Ordering};

/// Counters collected over one consolidation run
#[derive(Default, Debug)]
pub struct PipelineStats {
    pub archives_extracted: AtomicU64,
    pub entries_extracted: AtomicU64,
    pub files_matched: AtomicU64,
    pub records_read: AtomicU64,
    pub records_merged: AtomicU64,
    pub duplicates_dropped: AtomicU64,
    pub tables_written: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_archives(&self) {
        self.archives_extracted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_entries(&self, count: u64) {
        self.entries_extracted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_files(&self) {
        self.files_matched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_records(&self, count: u64) {
        self.records_read.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_merged(&self) {
        self.records_merged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_duplicates(&self) {
        self.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tables(&self) {
        self.tables_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn archives(&self) -> u64 {
        self.archives_extracted.load(Ordering::Relaxed)
    }

    pub fn entries(&self) -> u64 {
        self.entries_extracted.load(Ordering::Relaxed)
    }

    pub fn files(&self) -> u64 {
        self.files_matched.load(Ordering::Relaxed)
    }

    pub fn records(&self) -> u64 {
        self.records_read.load(Ordering::Relaxed)
    }

    pub fn merged(&self) -> u64 {
        self.records_merged.load(Ordering::Relaxed)
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates_dropped.load(Ordering::Relaxed)
    }

    pub fn tables(&self) -> u64 {
        self.tables_written.load(Ordering::Relaxed)
    }
}
