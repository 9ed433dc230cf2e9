//! Worker pools used to sort chunk indexes.

use log;
use rayon;
use rayon::slice::ParallelSliceMut;

use crate::buffer::IndexEntry;

/// Sorts a chunk index by key, breaking ties by arena offset.
///
/// Implementations block until the index is fully sorted.
pub trait SortPool {
    fn sort_index(&self, index: &mut [IndexEntry]);
}

impl<P: SortPool + ?Sized> SortPool for &P {
    fn sort_index(&self, index: &mut [IndexEntry]) {
        (**self).sort_index(index)
    }
}

/// Fork-join parallel sort on a fixed-size rayon pool.
impl SortPool for rayon::ThreadPool {
    fn sort_index(&self, index: &mut [IndexEntry]) {
        self.install(|| index.par_sort_unstable_by_key(IndexEntry::sort_key));
    }
}

/// Sorts on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialPool;

impl SortPool for SequentialPool {
    fn sort_index(&self, index: &mut [IndexEntry]) {
        index.sort_unstable_by_key(IndexEntry::sort_key);
    }
}

/// Builds a rayon pool with `threads_number` workers, or one per available core if [`None`].
pub fn build_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, rayon::ThreadPoolBuildError> {
    let mut thread_pool_builder = rayon::ThreadPoolBuilder::new().thread_name(|idx| format!("ts-sort-{}", idx));

    if let Some(threads_number) = threads_number {
        log::info!("initializing thread-pool (threads: {})", threads_number);
        thread_pool_builder = thread_pool_builder.num_threads(threads_number);
    } else {
        log::info!("initializing thread-pool (threads: default)");
    }

    return thread_pool_builder.build();
}

#[cfg(test)]
mod test {
    use rand::seq::SliceRandom;
    use rstest::*;

    use super::{build_thread_pool, SequentialPool, SortPool};
    use crate::buffer::IndexEntry;

    fn shuffled_index() -> Vec<IndexEntry> {
        let mut index: Vec<IndexEntry> = (0..1000)
            .map(|offset| IndexEntry {
                key: (offset % 37) as u64,
                offset,
                len: 0,
            })
            .collect();
        index.shuffle(&mut rand::thread_rng());

        return index;
    }

    fn assert_sorted(index: &[IndexEntry]) {
        assert!(index.windows(2).all(|w| w[0].sort_key() < w[1].sort_key()));
    }

    #[rstest]
    #[case(Some(1))]
    #[case(Some(4))]
    #[case(None)]
    fn test_thread_pool_sort(#[case] threads_number: Option<usize>) {
        let pool = build_thread_pool(threads_number).unwrap();
        let mut index = shuffled_index();

        pool.sort_index(&mut index);

        assert_eq!(index.len(), 1000);
        assert_sorted(&index);
    }

    #[test]
    fn test_sequential_sort() {
        let mut index = shuffled_index();
        SequentialPool.sort_index(&mut index);
        assert_sorted(&index);
    }
}
