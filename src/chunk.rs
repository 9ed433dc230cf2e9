//! Packed chunk files.
//!
//! A chunk is a sequence of records with no header, footer or checksum. Each record is laid out as
//!
//! ```text
//! +-------------+-------------+-----------------+
//! | key: u64 LE | len: u64 LE | payload: len B  |
//! +-------------+-------------+-----------------+
//! ```
//!
//! Reaching the end of file at a record boundary ends the chunk; anywhere else it is an error.

use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;

use crate::buffer::RecordRef;
use crate::merger::MergeSource;
use crate::record::Record;

/// Writes one record in the packed layout.
pub fn write_record<W: Write>(writer: &mut W, key: u64, payload: &[u8]) -> io::Result<()> {
    writer.write_all(&key.to_le_bytes())?;
    writer.write_all(&(payload.len() as u64).to_le_bytes())?;
    writer.write_all(payload)?;

    return Ok(());
}

/// Reads one record in the packed layout. Returns [`None`] on a clean end of input.
pub fn read_record<R: BufRead>(reader: &mut R) -> io::Result<Option<Record>> {
    if reader.fill_buf()?.is_empty() {
        return Ok(None);
    }

    let key = read_u64(reader)?;
    let len = read_u64(reader)?;

    // the payload is read incrementally so a corrupted length can not trigger a huge allocation
    let mut payload = Vec::new();
    let read = reader.by_ref().take(len).read_to_end(&mut payload)?;
    if read as u64 != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("truncated record payload: expected {} bytes, got {}", len, read),
        ));
    }

    return Ok(Some(Record { key, payload }));
}

fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;

    return Ok(u64::from_le_bytes(buf));
}

/// Sequential writer of a single chunk file.
pub struct ChunkWriter {
    writer: io::BufWriter<fs::File>,
    records: u64,
}

impl ChunkWriter {
    pub fn new(file: fs::File, buf_size: Option<usize>) -> Self {
        let writer = match buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, file),
            None => io::BufWriter::new(file),
        };

        ChunkWriter { writer, records: 0 }
    }

    /// Dumps records to the chunk. Records must come in ascending key order.
    pub fn dump<'a>(&mut self, records: impl IntoIterator<Item = RecordRef<'a>>) -> io::Result<()> {
        for record in records {
            write_record(&mut self.writer, record.key, record.payload)?;
            self.records += 1;
        }

        return Ok(());
    }

    /// Flushes and closes the chunk file. Returns the number of records written.
    pub fn finish(self) -> io::Result<u64> {
        let file = self.writer.into_inner().map_err(|err| err.into_error())?;
        file.sync_data()?;

        return Ok(self.records);
    }
}

/// Merge cursor over a chunk file.
///
/// Holds at most one decoded record: the current one.
pub struct ChunkReader {
    reader: io::BufReader<fs::File>,
    current: Option<Record>,
}

impl ChunkReader {
    /// Opens a chunk and reads its first record.
    pub fn open(path: &Path, buf_size: Option<usize>) -> io::Result<Self> {
        let file = fs::File::open(path)?;
        let mut reader = match buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
            None => io::BufReader::new(file),
        };
        let current = read_record(&mut reader)?;

        return Ok(ChunkReader { reader, current });
    }
}

impl MergeSource for ChunkReader {
    type Error = io::Error;

    fn peek_key(&self) -> Option<u64> {
        self.current.as_ref().map(|record| record.key)
    }

    fn advance(&mut self) -> Result<Option<Record>, Self::Error> {
        let next = read_record(&mut self.reader)?;

        return Ok(std::mem::replace(&mut self.current, next));
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io::{self, Cursor};

    use rstest::*;

    use super::{read_record, write_record, ChunkReader, ChunkWriter};
    use crate::buffer::RecordRef;
    use crate::merger::MergeSource;
    use crate::record::Record;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn test_packed_layout() {
        let mut buf = Vec::new();
        write_record(&mut buf, 0x0102, b"ab").unwrap();

        assert_eq!(
            buf,
            vec![0x02, 0x01, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, b'a', b'b']
        );

        let mut reader = Cursor::new(buf);
        assert_eq!(read_record(&mut reader).unwrap(), Some(Record::new(0x0102, "ab")));
        assert_eq!(read_record(&mut reader).unwrap(), None);
    }

    #[rstest]
    #[case(4)]
    #[case(12)]
    #[case(17)]
    fn test_truncated_record(#[case] cut: usize) {
        let mut buf = Vec::new();
        write_record(&mut buf, 7, b"payload").unwrap();
        buf.truncate(cut);

        let err = read_record(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[rstest]
    fn test_chunk_round_trip(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("chunk-0");
        let saved = vec![
            Record::new(1, ""),
            Record::new(2, r#"{"timestamp": 2}"#),
            Record::new(2, "binary \x00\x01 payload"),
            Record::new(u64::MAX, "last"),
        ];

        let mut writer = ChunkWriter::new(fs::File::create(&path).unwrap(), Some(3));
        writer
            .dump(saved.iter().map(|r| RecordRef {
                key: r.key,
                payload: &r.payload,
            }))
            .unwrap();
        assert_eq!(writer.finish().unwrap(), 4);

        let mut reader = ChunkReader::open(&path, None).unwrap();
        let mut restored = Vec::new();
        while let Some(key) = reader.peek_key() {
            let record = reader.advance().unwrap().unwrap();
            assert_eq!(record.key, key);
            restored.push(record);
        }

        assert_eq!(restored, saved);
        assert!(reader.advance().unwrap().is_none());
    }

    #[rstest]
    fn test_empty_chunk(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("chunk-0");
        fs::File::create(&path).unwrap();

        let reader = ChunkReader::open(&path, None).unwrap();
        assert!(reader.is_exhausted());
    }
}
