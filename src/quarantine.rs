//! Side file collecting rejected input lines.

use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};

use log;

/// Default quarantine file name, relative to the scratch directory.
pub const QUARANTINE_FILE_NAME: &str = "malformed.jsonl";

/// Appends malformed lines verbatim to a file that is created on the first write.
pub struct Quarantine {
    path: PathBuf,
    writer: Option<io::BufWriter<fs::File>>,
    count: u64,
}

impl Quarantine {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Quarantine {
            path: path.into(),
            writer: None,
            count: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of lines quarantined by this instance.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn push(&mut self, line: &[u8]) -> io::Result<()> {
        if self.writer.is_none() {
            self.writer = Some(self.open()?);
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.write_all(line)?;
            writer.write_all(b"\n")?;
            self.count += 1;
        }

        return Ok(());
    }

    fn open(&self) -> io::Result<io::BufWriter<fs::File>> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new().create(true).append(true).open(&self.path)?;
        log::debug!("quarantining malformed lines to {}", self.path.display());

        return Ok(io::BufWriter::new(file));
    }

    /// Flushes pending lines to disk. A no-op if nothing was quarantined.
    pub fn flush(&mut self) -> io::Result<()> {
        match &mut self.writer {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use rstest::*;

    use super::Quarantine;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[rstest]
    fn test_quarantine_lazy_creation(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("nested").join("bad.jsonl");
        let mut quarantine = Quarantine::new(&path);

        quarantine.flush().unwrap();
        assert!(!path.exists());

        quarantine.push(b"{oops").unwrap();
        quarantine.push(b"").unwrap();
        quarantine.flush().unwrap();

        assert_eq!(quarantine.count(), 2);
        assert_eq!(fs::read(&path).unwrap(), b"{oops\n\n");
    }

    #[rstest]
    fn test_quarantine_appends(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("bad.jsonl");
        fs::write(&path, b"earlier\n").unwrap();

        let mut quarantine = Quarantine::new(&path);
        quarantine.push(b"later").unwrap();
        quarantine.flush().unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"earlier\nlater\n");
    }
}
