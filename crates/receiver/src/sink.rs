//! Pre-sized output file accepting positional writes.
//!
//! Several sessions write one sink at the same time. Their ranges never
//! overlap (distinct block indices map to distinct offsets), so writes go
//! straight to a shared `std::fs::File` on the blocking pool.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Output file of one transfer.
#[derive(Debug)]
pub struct OutputSink {
    path: PathBuf,
    file: Arc<File>,
}

impl OutputSink {
    /// Creates (or reuses) `path` and sets its length to `size`.
    ///
    /// Existing bytes inside the range are kept; every block overwrites
    /// its own range anyway.
    pub async fn create(path: PathBuf, size: u64) -> io::Result<Self> {
        tokio::task::spawn_blocking(move || -> io::Result<Self> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;
            file.set_len(size)?;
            Ok(Self {
                path,
                file: Arc::new(file),
            })
        })
        .await
        .map_err(io::Error::other)?
    }

    /// Wraps an already open file. A read-only handle makes every write fail.
    #[cfg(test)]
    pub(crate) fn from_file(path: PathBuf, file: File) -> Self {
        Self {
            path,
            file: Arc::new(file),
        }
    }

    /// Writes `data` at absolute byte `offset`.
    pub async fn write_at(&self, offset: u64, data: Vec<u8>) -> io::Result<()> {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || write_all_at(&file, &data, offset))
            .await
            .map_err(io::Error::other)?
    }

    /// Flushes file contents and metadata to disk.
    pub async fn sync_all(&self) -> io::Result<()> {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || file.sync_all())
            .await
            .map_err(io::Error::other)?
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole block",
                ));
            }
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_presizes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let sink = OutputSink::create(path.clone(), 4096).await.unwrap();
        assert_eq!(sink.path(), path);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);
    }

    #[tokio::test]
    async fn create_resizes_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        std::fs::write(&path, vec![1u8; 10_000]).unwrap();

        OutputSink::create(path.clone(), 100).await.unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 100);
    }

    #[tokio::test]
    async fn out_of_order_writes_land_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let sink = OutputSink::create(path.clone(), 11).await.unwrap();

        sink.write_at(6, b"World".to_vec()).await.unwrap();
        sink.write_at(0, b"Hello ".to_vec()).await.unwrap();
        sink.sync_all().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"Hello World");
    }

    #[tokio::test]
    async fn unwritten_ranges_stay_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sparse.bin");
        let sink = OutputSink::create(path.clone(), 8).await.unwrap();

        sink.write_at(4, vec![0xFF; 4]).await.unwrap();
        sink.sync_all().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), [0, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[tokio::test]
    async fn read_only_handle_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ro.bin");
        std::fs::write(&path, [0u8; 4]).unwrap();
        let sink = OutputSink::from_file(path.clone(), File::open(&path).unwrap());

        assert!(sink.write_at(0, b"abcd".to_vec()).await.is_err());
        assert_eq!(std::fs::read(&path).unwrap(), [0u8; 4]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_disjoint_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("par.bin");
        let sink = Arc::new(OutputSink::create(path.clone(), 64 * 1024).await.unwrap());

        let handles: Vec<_> = (0..64u64)
            .map(|i| {
                let sink = Arc::clone(&sink);
                tokio::spawn(async move { sink.write_at(i * 1024, vec![i as u8; 1024]).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let data = std::fs::read(&path).unwrap();
        for (i, chunk) in data.chunks(1024).enumerate() {
            assert!(chunk.iter().all(|&b| b == i as u8), "chunk {i}");
        }
    }
}
