//! External sorter.

use log;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};

use crate::buffer::{Arena, ArenaBuilder, DEFAULT_BUDGET};
use crate::chunk::{ChunkReader, ChunkWriter};
use crate::merger::BinaryHeapMerger;
use crate::pool::{build_thread_pool, SortPool};
use crate::quarantine::{Quarantine, QUARANTINE_FILE_NAME};
use crate::record::{JsonFieldKey, KeyExtractor, RecordReader};
use crate::scratch::ScratchSpace;

/// Default scratch root, relative to the working directory.
pub const DEFAULT_SCRATCH_DIR: &str = "tmp";

/// Lines between two progress reports.
const PROGRESS_INTERVAL: u64 = 1_000_000;

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Scratch directory or chunk file creation error.
    Scratch(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Chunk file write or read-back error.
    Chunk(io::Error),
    /// Input data stream error.
    Input(io::Error),
    /// Output data stream error.
    Output(io::Error),
    /// Quarantine file error.
    Quarantine(io::Error),
    /// A single record does not fit into the memory budget.
    OversizedRecord { line: u64, size: usize, budget: usize },
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::Scratch(err) => Some(err),
            SortError::ThreadPoolBuildError(err) => Some(err),
            SortError::Chunk(err) => Some(err),
            SortError::Input(err) => Some(err),
            SortError::Output(err) => Some(err),
            SortError::Quarantine(err) => Some(err),
            SortError::OversizedRecord { .. } => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::Scratch(err) => write!(f, "scratch directory or chunk file not created: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::Chunk(err) => write!(f, "chunk I/O operation failed: {}", err),
            SortError::Input(err) => write!(f, "input data stream error: {}", err),
            SortError::Output(err) => write!(f, "output data stream error: {}", err),
            SortError::Quarantine(err) => write!(f, "quarantine file error: {}", err),
            SortError::OversizedRecord { line, size, budget } => write!(
                f,
                "record at line {} takes {} bytes which does not fit into the {} bytes memory budget",
                line, size, budget
            ),
        }
    }
}

/// Statistics of a completed sort run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortStats {
    /// Input lines read.
    pub lines: u64,
    /// Input lines quarantined as malformed.
    pub malformed: u64,
    /// Records written to the output.
    pub records: u64,
    /// Chunks spilled to disk. Zero means the input was sorted in memory.
    pub chunks: usize,
}

impl SortStats {
    pub fn malformed_percent(&self) -> f64 {
        if self.lines == 0 {
            0.0
        } else {
            self.malformed as f64 / self.lines as f64 * 100.0
        }
    }
}

impl Display for SortStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} lines, {} malformed ({:.2}%), {} records written, {} chunks spilled",
            self.lines,
            self.malformed,
            self.malformed_percent(),
            self.records,
            self.chunks
        )
    }
}

/// Sorting run phases. Reading and flushing strictly alternate on the calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Reading,
    Flushing,
    EndOfInput,
    Merging,
    InMemorySort,
    Done,
}

fn transition(phase: &mut Phase, next: Phase) {
    log::debug!("{:?} -> {:?}", phase, next);
    *phase = next;
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder<K = JsonFieldKey>
where
    K: KeyExtractor,
{
    /// Number of threads to be used to sort data in parallel.
    threads_number: Option<usize>,
    /// Memory budget in bytes.
    budget: u64,
    /// Whether to reserve the whole budget up front.
    preallocate: bool,
    /// Directory to be used to store temporary data.
    scratch_dir: Option<Box<Path>>,
    /// Malformed lines file.
    quarantine_path: Option<Box<Path>>,
    /// Chunk file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Whether to keep chunk files after a successful run.
    keep_chunks: bool,
    /// Sort key extractor.
    key_extractor: K,
}

impl ExternalSorterBuilder<JsonFieldKey> {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }
}

impl<K> ExternalSorterBuilder<K>
where
    K: KeyExtractor,
{
    /// Builds an [`ExternalSorter`] sorting on a rayon thread pool.
    pub fn build(self) -> Result<ExternalSorter<K>, SortError> {
        let thread_pool = build_thread_pool(self.threads_number).map_err(SortError::ThreadPoolBuildError)?;

        return Ok(self.build_with_pool(thread_pool));
    }

    /// Builds an [`ExternalSorter`] sorting on the provided pool. The threads number setting is ignored.
    pub fn build_with_pool<P: SortPool>(self, pool: P) -> ExternalSorter<K, P> {
        let scratch_dir = self
            .scratch_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SCRATCH_DIR));
        let quarantine_path = self
            .quarantine_path
            .map(PathBuf::from)
            .unwrap_or_else(|| scratch_dir.join(QUARANTINE_FILE_NAME));

        ExternalSorter::new(
            pool,
            ArenaBuilder::new(self.budget, self.preallocate),
            scratch_dir,
            quarantine_path,
            self.rw_buf_size,
            self.keep_chunks,
            self.key_extractor,
        )
    }

    /// Sets number of threads to be used to sort data in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder<K> {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets memory budget in bytes.
    pub fn with_budget(mut self, budget: u64) -> ExternalSorterBuilder<K> {
        self.budget = budget;
        return self;
    }

    /// Sets whether the whole budget is allocated up front.
    pub fn with_preallocate(mut self, preallocate: bool) -> ExternalSorterBuilder<K> {
        self.preallocate = preallocate;
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_scratch_dir(mut self, path: &Path) -> ExternalSorterBuilder<K> {
        self.scratch_dir = Some(path.into());
        return self;
    }

    /// Sets the file malformed lines are appended to.
    pub fn with_quarantine_path(mut self, path: &Path) -> ExternalSorterBuilder<K> {
        self.quarantine_path = Some(path.into());
        return self;
    }

    /// Sets chunk read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder<K> {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Sets whether chunk files are kept on disk after a successful run.
    pub fn with_keep_chunks(mut self, keep_chunks: bool) -> ExternalSorterBuilder<K> {
        self.keep_chunks = keep_chunks;
        return self;
    }

    /// Sets sort key extractor.
    pub fn with_key_extractor<K2: KeyExtractor>(self, key_extractor: K2) -> ExternalSorterBuilder<K2> {
        ExternalSorterBuilder {
            threads_number: self.threads_number,
            budget: self.budget,
            preallocate: self.preallocate,
            scratch_dir: self.scratch_dir,
            quarantine_path: self.quarantine_path,
            rw_buf_size: self.rw_buf_size,
            keep_chunks: self.keep_chunks,
            key_extractor,
        }
    }
}

impl<K> Default for ExternalSorterBuilder<K>
where
    K: KeyExtractor + Default,
{
    fn default() -> Self {
        ExternalSorterBuilder {
            threads_number: None,
            budget: DEFAULT_BUDGET,
            preallocate: false,
            scratch_dir: None,
            quarantine_path: None,
            rw_buf_size: None,
            keep_chunks: false,
            key_extractor: K::default(),
        }
    }
}

/// External sorter of timestamped lines.
///
/// Every run reads the whole input before writing anything, so a failed run leaves the output
/// untouched. Records with equal keys keep their input order.
pub struct ExternalSorter<K = JsonFieldKey, P = rayon::ThreadPool>
where
    K: KeyExtractor,
    P: SortPool,
{
    /// Chunk sorting pool.
    pool: P,
    /// Chunk arena builder.
    arena_builder: ArenaBuilder,
    /// Scratch root; every run gets its own directory inside.
    scratch_dir: PathBuf,
    /// Malformed lines file.
    quarantine_path: PathBuf,
    /// Chunk file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Whether to keep chunk files after a successful run.
    keep_chunks: bool,
    /// Sort key extractor.
    key_extractor: K,
}

impl<K, P> ExternalSorter<K, P>
where
    K: KeyExtractor,
    P: SortPool,
{
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `pool` - Pool chunk indexes are sorted on.
    /// * `arena_builder` - Builder of the arena records are buffered in; defines the memory budget.
    /// * `scratch_dir` - Directory to store chunk files in. Created on the first spill if missing.
    /// * `quarantine_path` - File malformed lines are appended to. Created on the first malformed line.
    /// * `rw_buf_size` - Chunks file read/write buffer size.
    /// * `keep_chunks` - Keep chunk files on disk after a successful run.
    /// * `key_extractor` - Sort key extractor.
    pub fn new(
        pool: P,
        arena_builder: ArenaBuilder,
        scratch_dir: PathBuf,
        quarantine_path: PathBuf,
        rw_buf_size: Option<usize>,
        keep_chunks: bool,
        key_extractor: K,
    ) -> Self {
        ExternalSorter {
            pool,
            arena_builder,
            scratch_dir,
            quarantine_path,
            rw_buf_size,
            keep_chunks,
            key_extractor,
        }
    }

    /// Memory budget in bytes.
    pub fn budget(&self) -> usize {
        self.arena_builder.budget()
    }

    /// Sorts lines from the input by key and writes them to the output, one per line.
    ///
    /// Malformed lines are appended to the quarantine file and skipped.
    ///
    /// # Arguments
    /// * `input` - Input stream lines are read from
    /// * `output` - Output stream sorted lines are written to
    pub fn sort<R, W>(&self, input: R, mut output: W) -> Result<SortStats, SortError>
    where
        R: BufRead,
        W: Write,
    {
        let mut phase = Phase::Reading;
        let mut scratch: Option<ScratchSpace> = None;
        let mut quarantine = Quarantine::new(&self.quarantine_path);
        let mut arena = self.arena_builder.build();
        let mut reader = RecordReader::new(input, &self.key_extractor);

        log::info!("reading records ...");
        while let Some(line) = reader.read_line().map_err(SortError::Input)? {
            if line.number % PROGRESS_INTERVAL == 0 {
                log::info!("read {} lines", line.number);
            }

            let key = match line.key {
                Ok(key) => key,
                Err(reason) => {
                    log::warn!("malformed line {}: {}", line.number, reason);
                    quarantine.push(line.payload).map_err(SortError::Quarantine)?;
                    continue;
                }
            };

            if !arena.admits(line.payload) {
                return Err(SortError::OversizedRecord {
                    line: line.number,
                    size: Arena::serialized_size(line.payload),
                    budget: arena.budget(),
                });
            }
            if !arena.fits(line.payload) {
                transition(&mut phase, Phase::Flushing);
                self.flush(&mut arena, &mut scratch)?;
                transition(&mut phase, Phase::Reading);
            }
            arena.push(key, line.payload);
        }

        transition(&mut phase, Phase::EndOfInput);
        quarantine.flush().map_err(SortError::Quarantine)?;

        let records = if scratch.is_some() {
            if !arena.is_empty() {
                transition(&mut phase, Phase::Flushing);
                self.flush(&mut arena, &mut scratch)?;
            }
            drop(arena);

            transition(&mut phase, Phase::Merging);
            self.merge(scratch.iter().flat_map(ScratchSpace::chunks), &mut output)?
        } else {
            transition(&mut phase, Phase::InMemorySort);
            self.write_in_memory(&mut arena, &mut output)?
        };
        output.flush().map_err(SortError::Output)?;
        transition(&mut phase, Phase::Done);

        let stats = SortStats {
            lines: reader.lines(),
            malformed: reader.malformed(),
            records,
            chunks: scratch.as_ref().map_or(0, ScratchSpace::chunk_count),
        };
        log::info!("sorting done: {}", stats);
        if stats.malformed > 0 {
            log::info!("malformed lines saved to {}", quarantine.path().display());
        }

        if let Some(scratch) = scratch {
            if let Some(path) = scratch.finish(self.keep_chunks).map_err(SortError::Scratch)? {
                log::info!("chunk files kept in {}", path.display());
            }
        }

        return Ok(stats);
    }

    /// Sorts the arena and spills it into the next chunk file. The run directory is created on the
    /// first spill, so inputs sorted in memory never touch the scratch root.
    fn flush(&self, arena: &mut Arena, scratch: &mut Option<ScratchSpace>) -> Result<(), SortError> {
        let scratch = match scratch {
            Some(scratch) => scratch,
            None => scratch.insert(ScratchSpace::create(&self.scratch_dir).map_err(SortError::Scratch)?),
        };
        let chunk_num = scratch.chunk_count() + 1;

        log::info!("sorting chunk {} of size {} ...", chunk_num, arena.len());
        arena.sort(&self.pool);

        log::info!("flushing chunk {} ...", chunk_num);
        let (_, file) = scratch.next_chunk().map_err(SortError::Scratch)?;
        let mut chunk_writer = ChunkWriter::new(file, self.rw_buf_size);
        chunk_writer.dump(arena.records()).map_err(SortError::Chunk)?;
        let records = chunk_writer.finish().map_err(SortError::Chunk)?;
        log::info!("flushed chunk {} ({} records)", chunk_num, records);

        arena.clear();

        return Ok(());
    }

    fn merge<'a, I, W>(&self, chunk_paths: I, output: &mut W) -> Result<u64, SortError>
    where
        I: IntoIterator<Item = &'a PathBuf>,
        W: Write,
    {
        let chunks = chunk_paths
            .into_iter()
            .map(|path| ChunkReader::open(path, self.rw_buf_size))
            .collect::<Result<Vec<_>, _>>()
            .map_err(SortError::Chunk)?;

        log::info!("merging {} chunks ...", chunks.len());
        let mut records = 0;
        for record in BinaryHeapMerger::new(chunks) {
            let record = record.map_err(SortError::Chunk)?;
            write_line(output, &record.payload).map_err(SortError::Output)?;
            records += 1;
        }

        return Ok(records);
    }

    fn write_in_memory<W: Write>(&self, arena: &mut Arena, output: &mut W) -> Result<u64, SortError> {
        log::info!("sorting {} records in memory ...", arena.len());
        arena.sort(&self.pool);

        log::info!("writing ...");
        let mut records = 0;
        for record in arena.records() {
            write_line(output, record.payload).map_err(SortError::Output)?;
            records += 1;
        }

        return Ok(records);
    }
}

fn write_line<W: Write>(output: &mut W, payload: &[u8]) -> io::Result<()> {
    output.write_all(payload)?;
    output.write_all(b"\n")
}
