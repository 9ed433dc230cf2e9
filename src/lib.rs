//! `ts-sort` sorts streams of timestamped line records that do not fit into memory.
//!
//! Every input line carries an unsigned integer sort key, by default the `timestamp` field of a JSON
//! object. Lines are buffered into a byte arena bounded by a memory budget. When the arena is full
//! its index is sorted on a worker pool and the chunk is spilled to a scratch file. At the end of
//! input the chunks are combined by a streaming k-way merge that keeps a single record per chunk in
//! memory. If the whole input fits into the budget nothing touches the disk.
//! For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Bounded memory:**
//!   buffered payload bytes never exceed the configured budget; a record larger than the budget is
//!   reported as an error instead of being split or dropped.
//! * **Stable and deterministic:**
//!   records with equal keys keep their input order, so the same input always yields the same output.
//! * **Malformed input tolerance:**
//!   lines without a valid key are appended verbatim to a quarantine file and counted.
//! * **Multithreading support:**
//!   chunks are sorted on a fixed-size rayon pool; any other [`SortPool`] can be plugged in.
//!
//! # Example
//!
//! ```no_run
//! use std::io::{self, prelude::*};
//! use std::path;
//!
//! use env_logger;
//! use log;
//!
//! use ts_sort::{ExternalSorter, ExternalSorterBuilder};
//!
//! fn main() {
//!     env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();
//!
//!     let sorter: ExternalSorter = ExternalSorterBuilder::new()
//!         .with_scratch_dir(path::Path::new("./tmp"))
//!         .with_budget(512 * 1024 * 1024)
//!         .build()
//!         .unwrap();
//!
//!     let stats = sorter.sort(io::stdin().lock(), io::BufWriter::new(io::stdout().lock())).unwrap();
//!     eprintln!("{}", stats);
//! }
//! ```

pub mod buffer;
pub mod check;
pub mod chunk;
pub mod merger;
pub mod pool;
pub mod quarantine;
pub mod record;
pub mod scratch;
pub mod sort;

pub use buffer::{Arena, ArenaBuilder, DEFAULT_BUDGET};
pub use check::{check_sorted, CheckOutcome};
pub use chunk::{ChunkReader, ChunkWriter};
pub use merger::{BinaryHeapMerger, MergeSource};
pub use pool::{SequentialPool, SortPool};
pub use record::{JsonFieldKey, KeyExtractor, MalformedRecord, Record};
pub use sort::{ExternalSorter, ExternalSorterBuilder, SortError, SortStats};
