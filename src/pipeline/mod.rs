//! The batch steps behind the CLI commands.
//!
//! ```text
//! cover ──▶ {run}/{cell}.json ──aggregate──▶ {run}/{cell}.pmtiles ──downsample──▶ {run}/{extent}-{p}.pmtiles
//! ```
//!
//! `cover` creates the run; every later step takes its id explicitly. Each
//! step can be rerun: finished units are detected by their outputs and
//! skipped.

mod aggregate;
mod batch;
mod cover;
mod downsample;
mod inspect;

pub use aggregate::{plan_from_manifest, AggregateOptions, Aggregator};
pub use batch::{run_bounded, BatchSummary};
pub use cover::{cover, CoverReport};
pub use downsample::{downsample, DownsampleOptions};
pub use inspect::{inspect, ArchiveReport};
