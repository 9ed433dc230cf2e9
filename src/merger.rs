//! Binary heap merger.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::error::Error;

use crate::record::Record;

/// A sorted sequence of records consumed one at a time.
pub trait MergeSource {
    type Error: Error;

    /// Returns the key of the current record, or [`None`] if the source is exhausted.
    fn peek_key(&self) -> Option<u64>;

    /// Takes the current record and moves to the next one.
    fn advance(&mut self) -> Result<Option<Record>, Self::Error>;

    fn is_exhausted(&self) -> bool {
        self.peek_key().is_none()
    }
}

/// Binary heap merger implementation.
/// Merges multiple sorted sources into a single sorted output.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of records,
/// *n* is the number of sources.
///
/// Records with equal keys are emitted in source order: everything from source 0 before source 1
/// and so on.
pub struct BinaryHeapMerger<S: MergeSource> {
    // binary heap is max-heap by default so we reverse it to convert it to min-heap
    heads: BinaryHeap<Reverse<(u64, usize)>>,
    sources: Vec<S>,
}

impl<S: MergeSource> BinaryHeapMerger<S> {
    /// Creates an instance of a binary heap merger.
    /// Source records should be sorted in ascending key order otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `sources` - Sources to be merged in a single sorted one
    pub fn new<I>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
    {
        let sources = Vec::from_iter(sources);
        let mut heads = BinaryHeap::with_capacity(sources.len());
        for (idx, source) in sources.iter().enumerate() {
            if let Some(key) = source.peek_key() {
                heads.push(Reverse((key, idx)));
            }
        }

        return BinaryHeapMerger { heads, sources };
    }
}

impl<S: MergeSource> Iterator for BinaryHeapMerger<S> {
    type Item = Result<Record, S::Error>;

    /// Returns the next record from the sources in ascending key order.
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Reverse((_, idx)) = self.heads.pop()?;
            let source = &mut self.sources[idx];

            let record = match source.advance() {
                Ok(record) => record,
                Err(err) => return Some(Err(err)),
            };
            if let Some(key) = source.peek_key() {
                self.heads.push(Reverse((key, idx)));
            }

            if let Some(record) = record {
                return Some(Ok(record));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use rstest::*;
    use std::collections::VecDeque;
    use std::io::{self, ErrorKind};

    use super::{BinaryHeapMerger, MergeSource};
    use crate::record::Record;

    /// In-memory source; an `Err` entry fails the read that would make it current.
    struct VecSource {
        current: Option<Record>,
        rest: VecDeque<Result<Record, &'static str>>,
    }

    impl VecSource {
        fn new(items: Vec<Result<u64, &'static str>>) -> Self {
            Self::from_records(
                items
                    .into_iter()
                    .map(|item| item.map(|key| Record::new(key, key.to_string())))
                    .collect(),
            )
        }

        fn from_records(items: Vec<Result<Record, &'static str>>) -> Self {
            let mut source = VecSource {
                current: None,
                rest: VecDeque::from(items),
            };
            source.advance().unwrap();
            source
        }
    }

    impl MergeSource for VecSource {
        type Error = io::Error;

        fn peek_key(&self) -> Option<u64> {
            self.current.as_ref().map(|r| r.key)
        }

        fn advance(&mut self) -> Result<Option<Record>, io::Error> {
            let next = match self.rest.pop_front() {
                Some(Ok(record)) => Some(record),
                Some(Err(msg)) => return Err(io::Error::new(ErrorKind::Other, msg)),
                None => None,
            };
            Ok(std::mem::replace(&mut self.current, next))
        }
    }

    #[rstest]
    #[case(
        vec![],
        vec![],
    )]
    #[case(
        vec![
            vec![],
            vec![]
        ],
        vec![],
    )]
    #[case(
        vec![
            vec![Ok(4), Ok(5), Ok(7)],
            vec![Ok(1), Ok(6)],
            vec![Ok(3)],
            vec![],
        ],
        vec![Ok(1), Ok(3), Ok(4), Ok(5), Ok(6), Ok(7)],
    )]
    #[case(
        vec![
            vec![Ok(1), Ok(5)],
            vec![Ok(3), Ok(4)],
        ],
        vec![Ok(1), Ok(3), Ok(4), Ok(5)],
    )]
    #[case(
        vec![
            vec![Ok(3), Ok(3), Err("test error")],
            vec![Ok(1), Ok(2)],
        ],
        vec![Ok(1), Ok(2), Ok(3), Err("test error")],
    )]
    fn test_merger(#[case] sources: Vec<Vec<Result<u64, &'static str>>>, #[case] expected: Vec<Result<u64, &str>>) {
        let merger = BinaryHeapMerger::new(sources.into_iter().map(VecSource::new));
        let actual: Vec<Result<u64, String>> = merger
            .map(|r| r.map(|record| record.key).map_err(|err| err.to_string()))
            .collect();
        let expected: Vec<Result<u64, String>> = expected.into_iter().map(|r| r.map_err(String::from)).collect();

        assert_eq!(actual, expected);
    }

    #[test]
    fn test_merger_length_and_order() {
        let sources: Vec<Vec<Result<u64, &'static str>>> = (0..7u64)
            .map(|chunk| (0..50u64).map(|i| Ok(i * 7 + chunk % 3)).collect())
            .collect();
        let total: usize = sources.iter().map(Vec::len).sum();

        let merger = BinaryHeapMerger::new(sources.into_iter().map(VecSource::new));
        let keys: Vec<u64> = merger.map(|r| r.unwrap().key).collect();
        assert_eq!(keys.len(), total);
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_merger_ties_follow_source_order() {
        let first = VecSource::from_records(vec![Ok(Record::new(1, "a-1")), Ok(Record::new(2, "a-2"))]);
        let second = VecSource::from_records(vec![Ok(Record::new(2, "b-2")), Ok(Record::new(2, "b-2'"))]);
        let third = VecSource::from_records(vec![Ok(Record::new(0, "c-0")), Ok(Record::new(2, "c-2"))]);

        let merger = BinaryHeapMerger::new(vec![first, second, third]);
        let payloads: Vec<String> = merger
            .map(|r| String::from_utf8(r.unwrap().payload).unwrap())
            .collect();

        assert_eq!(payloads, vec!["c-0", "a-1", "a-2", "b-2", "b-2'", "c-2"]);
    }
}
