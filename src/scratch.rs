//! Scratch space for chunk files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log;
use tempfile;

/// Per-run directory holding sequentially numbered chunk files.
///
/// The directory is created with a unique name under the scratch root, so chunks of concurrent or
/// earlier runs are never picked up. It is removed when the scratch space is dropped unless
/// [`ScratchSpace::finish`] is asked to keep it.
pub struct ScratchSpace {
    dir: tempfile::TempDir,
    chunks: Vec<PathBuf>,
}

impl ScratchSpace {
    /// Creates the scratch root if missing and a fresh run directory inside it.
    pub fn create(root: &Path) -> io::Result<Self> {
        fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new().prefix("ts-sort-").tempdir_in(root)?;

        log::info!("using {} as a scratch directory", dir.path().display());

        return Ok(ScratchSpace {
            dir,
            chunks: Vec::new(),
        });
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Creates the next chunk file. Chunk numbers start at 0.
    pub fn next_chunk(&mut self) -> io::Result<(usize, fs::File)> {
        let chunk_num = self.chunks.len();
        let path = self.dir.path().join(format!("chunk-{}", chunk_num));
        let file = fs::OpenOptions::new().write(true).create_new(true).open(&path)?;

        log::debug!("created chunk file {}", path.display());
        self.chunks.push(path);

        return Ok((chunk_num, file));
    }

    /// Paths of the chunks created so far, in creation order.
    pub fn chunks(&self) -> &[PathBuf] {
        &self.chunks
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Releases the scratch space. Returns the run directory path if it was kept on disk.
    pub fn finish(self, keep: bool) -> io::Result<Option<PathBuf>> {
        if keep {
            return Ok(Some(self.dir.into_path()));
        }
        self.dir.close()?;

        return Ok(None);
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use rstest::*;

    use super::ScratchSpace;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[rstest]
    fn test_chunk_numbering(tmp_dir: tempfile::TempDir) {
        let root = tmp_dir.path().join("scratch");
        let mut scratch = ScratchSpace::create(&root).unwrap();
        assert!(scratch.path().starts_with(&root));

        for expected in 0..3 {
            let (chunk_num, mut file) = scratch.next_chunk().unwrap();
            assert_eq!(chunk_num, expected);
            file.write_all(b"data").unwrap();
        }

        assert_eq!(scratch.chunk_count(), 3);
        let names: Vec<String> = scratch
            .chunks()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["chunk-0", "chunk-1", "chunk-2"]);
    }

    #[rstest]
    fn test_runs_are_isolated(tmp_dir: tempfile::TempDir) {
        let mut first = ScratchSpace::create(tmp_dir.path()).unwrap();
        let mut second = ScratchSpace::create(tmp_dir.path()).unwrap();
        assert_ne!(first.path(), second.path());

        assert_eq!(first.next_chunk().unwrap().0, 0);
        assert_eq!(second.next_chunk().unwrap().0, 0);
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn test_finish(tmp_dir: tempfile::TempDir, #[case] keep: bool) {
        let mut scratch = ScratchSpace::create(tmp_dir.path()).unwrap();
        scratch.next_chunk().unwrap();
        let path = scratch.path().to_path_buf();

        let kept = scratch.finish(keep).unwrap();

        assert_eq!(kept.as_deref(), if keep { Some(path.as_path()) } else { None });
        assert_eq!(path.join("chunk-0").exists(), keep);
    }

    #[rstest]
    fn test_drop_removes_chunks(tmp_dir: tempfile::TempDir) {
        let mut scratch = ScratchSpace::create(tmp_dir.path()).unwrap();
        scratch.next_chunk().unwrap();
        let path = scratch.path().to_path_buf();

        drop(scratch);

        assert!(!path.exists());
    }
}
