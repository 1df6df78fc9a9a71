// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Durable storage for recordings
//
// A store holds named, append-only recordings. Only the recorder opens a recording
// for append; replay and conversion open recordings for reading.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, trace};

/// Append target for serialized frames
#[async_trait]
pub trait FrameSink: Send {
    /// Append bytes; returns once the write completed
    async fn append(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Release the target after all appends completed
    async fn close(&mut self) -> io::Result<()>;
}

/// Storage usage estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageEstimate {
    pub usage: u64,
    pub quota: Option<u64>,
}

impl StorageEstimate {
    pub fn is_exhausted(&self) -> bool {
        matches!(self.quota, Some(quota) if self.usage >= quota)
    }
}

/// Named recording storage
#[async_trait]
pub trait RecordingStore: Send + Sync {
    async fn exists(&self, name: &str) -> io::Result<bool>;

    /// Open a recording for append, creating it when `create` is set
    async fn open(&self, name: &str, create: bool) -> io::Result<Box<dyn FrameSink>>;

    /// Open a recording for streaming reads
    async fn reader(&self, name: &str) -> io::Result<Box<dyn AsyncRead + Send + Unpin>>;

    /// Read a whole recording into memory
    async fn read(&self, name: &str) -> io::Result<Vec<u8>>;

    async fn remove(&self, name: &str) -> io::Result<()>;

    async fn usage(&self) -> io::Result<StorageEstimate>;
}

/// Directory-backed store, one file per recording
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
    quota: Option<u64>,
}

impl FsStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            quota: None,
        }
    }

    pub fn with_quota(mut self, quota: u64) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a recording name to its file path
    pub fn path_for(&self, name: &str) -> io::Result<PathBuf> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\'])
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid recording name: {:?}", name),
            ));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl RecordingStore for FsStore {
    async fn exists(&self, name: &str) -> io::Result<bool> {
        fs::try_exists(self.path_for(name)?).await
    }

    async fn open(&self, name: &str, create: bool) -> io::Result<Box<dyn FrameSink>> {
        let path = self.path_for(name)?;
        if create {
            fs::create_dir_all(&self.root).await?;
        }

        let file = OpenOptions::new().append(true).create(create).open(&path).await?;
        debug!(path = ?path, create, "Opened recording for append");

        Ok(Box::new(FileSink { file, path }))
    }

    async fn reader(&self, name: &str) -> io::Result<Box<dyn AsyncRead + Send + Unpin>> {
        let file = File::open(self.path_for(name)?).await?;
        Ok(Box::new(file))
    }

    async fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path_for(name)?).await
    }

    async fn remove(&self, name: &str) -> io::Result<()> {
        fs::remove_file(self.path_for(name)?).await
    }

    async fn usage(&self) -> io::Result<StorageEstimate> {
        let mut usage = 0u64;
        match fs::read_dir(&self.root).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await? {
                    let metadata = entry.metadata().await?;
                    if metadata.is_file() {
                        usage += metadata.len();
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        Ok(StorageEstimate {
            usage,
            quota: self.quota,
        })
    }
}

struct FileSink {
    file: File,
    path: PathBuf,
}

#[async_trait]
impl FrameSink for FileSink {
    async fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes).await?;
        self.file.flush().await?;
        trace!(bytes = bytes.len(), "Appended to recording file");
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        debug!(path = ?self.path, "Closed recording file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_append_and_read_back() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = FsStore::new(dir.path());

        assert!(!store.exists("session.bin").await?);

        let mut sink = store.open("session.bin", true).await?;
        sink.append(b"hello ").await?;
        sink.append(b"world").await?;
        sink.close().await?;

        assert!(store.exists("session.bin").await?);
        assert_eq!(store.read("session.bin").await?, b"hello world");

        let mut reader = store.reader("session.bin").await?;
        let mut buf = String::new();
        reader.read_to_string(&mut buf).await?;
        assert_eq!(buf, "hello world");

        Ok(())
    }

    #[tokio::test]
    async fn test_open_without_create_fails_for_missing() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());

        assert!(store.open("missing.bin", false).await.is_err());
    }

    #[tokio::test]
    async fn test_usage_and_quota() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = FsStore::new(dir.path()).with_quota(8);

        let mut sink = store.open("a.bin", true).await?;
        sink.append(&[0u8; 5]).await?;
        sink.close().await?;

        let estimate = store.usage().await?;
        assert_eq!(estimate.usage, 5);
        assert!(!estimate.is_exhausted());

        let mut sink = store.open("b.bin", true).await?;
        sink.append(&[0u8; 3]).await?;
        sink.close().await?;
        assert!(store.usage().await?.is_exhausted());

        store.remove("a.bin").await?;
        assert_eq!(store.usage().await?.usage, 3);
        Ok(())
    }

    #[test]
    fn test_rejects_path_like_names() {
        let store = FsStore::new("/tmp/recordings");
        assert!(store.path_for("../escape").is_err());
        assert!(store.path_for("nested/name").is_err());
        assert!(store.path_for("").is_err());
        assert!(store.path_for("ok.bin").is_ok());
    }
}
