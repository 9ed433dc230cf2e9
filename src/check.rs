//! Sortedness check of a line stream.

use std::io::{self, prelude::*};

use log;

use crate::record::{KeyExtractor, RecordReader};

/// Result of a sortedness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Every record key is greater than or equal to the previous one.
    Sorted { lines: u64, malformed: u64 },
    /// The record at `line` (1-based) has a smaller key than the record before it.
    Unsorted { line: u64 },
}

/// Checks that records of the input come in non-decreasing key order.
///
/// Malformed lines are skipped. Stops at the first out-of-order record.
pub fn check_sorted<R, K>(input: R, key_extractor: K) -> io::Result<CheckOutcome>
where
    R: BufRead,
    K: KeyExtractor,
{
    let mut reader = RecordReader::new(input, key_extractor);
    let mut last_key = 0;

    while let Some(line) = reader.read_line()? {
        match line.key {
            Ok(key) if key < last_key => return Ok(CheckOutcome::Unsorted { line: line.number }),
            Ok(key) => last_key = key,
            Err(reason) => log::warn!("malformed line {}: {}", line.number, reason),
        }
    }

    return Ok(CheckOutcome::Sorted {
        lines: reader.lines(),
        malformed: reader.malformed(),
    });
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use rstest::*;

    use super::{check_sorted, CheckOutcome};
    use crate::record::JsonFieldKey;

    #[rstest]
    #[case("", CheckOutcome::Sorted { lines: 0, malformed: 0 })]
    #[case(
        "{\"timestamp\":1}\n{\"timestamp\":1}\n{\"timestamp\":5}\n",
        CheckOutcome::Sorted { lines: 3, malformed: 0 }
    )]
    #[case(
        "{\"timestamp\":1}\nbroken\n{\"timestamp\":2}",
        CheckOutcome::Sorted { lines: 3, malformed: 1 }
    )]
    #[case(
        "{\"timestamp\":3}\n{\"timestamp\":4}\n{\"timestamp\":2}\n{\"timestamp\":1}\n",
        CheckOutcome::Unsorted { line: 3 }
    )]
    #[case(
        "{\"timestamp\":3}\n{\"timestamp\":\"1\"}\n{\"timestamp\":2}\n",
        CheckOutcome::Unsorted { line: 3 }
    )]
    fn test_check_sorted(#[case] input: &str, #[case] expected: CheckOutcome) {
        let outcome = check_sorted(Cursor::new(input), JsonFieldKey::default()).unwrap();
        assert_eq!(outcome, expected);
    }
}
