//! ptvprep: GTFS feed consolidation for graph bulk import
//!
//! Public transport distributions such as the PTV GTFS release ship as a zip of
//! numbered mode directories, each holding its own `google_transit.zip`. This
//! crate turns such a distribution into one CSV table per entity type, with
//! duplicate rows removed, ready for `neo4j-admin` style bulk loading.
//!
//! 1. **Extraction** -- Unpack the root archive and, recursively, every inner
//!    archive whose name matches the configured pattern, refusing entries that
//!    would escape the extraction directory
//! 2. **Consolidation** -- Walk the unpacked tree, read every recognized entity file
//!    on a pool of producer threads and merge the rows on a single consumer
//! 3. **Output** -- Write one `<entity>.txt` per entity type and optionally bundle
//!    the output directory into a zip
//!
//! # Architecture
//!
//! - **Fan-out / fan-in** -- Producers stream rows into a bounded crossbeam
//!   channel; the consumer is the only owner of the merged tables, so no locks
//! - **First row wins** -- A row whose natural key was already seen is dropped
//!   whole; which duplicate wins depends on producer interleaving
//! - **Hash-indexed dedup** -- Each table keeps an `FxHashSet` of its keys
//! - **Fail fast** -- Every error is a [`error::PipelineError`] returned up to the
//!   caller; producers stop as soon as any of them fails
//!
//! # Key Modules
//!
//! - [`extract`] -- Recursive zip extraction with path-traversal checks
//! - [`scan`] -- Tree scanner, record producers and the merge loop
//! - [`merge`] -- Per-type tables with first-write-wins deduplication
//! - [`writer`] -- CSV table output and zip bundling
//! - [`models`] -- Entity types, fixed headers and natural keys
//! - [`pipeline`] -- End-to-end driver and working directory lifecycle
//! - [`stats`] -- Thread-safe atomic counters
//! - [`config`] -- Defaults and buffer sizes
//!
//! # Example Usage
//!
//! ```bash
//! # Consolidate a PTV release into gtfs_out.zip
//! ptvprep gtfs.zip
//!
//! # Keep plain CSVs and the extracted tree around for inspection
//! ptvprep gtfs.zip --no-bundle --keep-temp -v
//! ```

pub mod config;
pub mod error;
pub mod extract;
pub mod merge;
pub mod models;
pub mod pipeline;
pub mod scan;
pub mod stats;
pub mod writer;
