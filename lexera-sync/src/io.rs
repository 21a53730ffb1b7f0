/// Disk access used by tracked files.
///
/// `LocalDisk` writes atomically (write to .tmp, fsync, rename, fsync directory),
/// refuses to write empty content over a non-empty file, and retries failed
/// writes a bounded number of times.
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

#[async_trait]
pub trait DiskIo: Send + Sync {
    async fn read(&self, path: &Path) -> io::Result<String>;

    async fn write(&self, path: &Path, content: &str) -> io::Result<()>;

    async fn exists(&self, path: &Path) -> bool;
}

/// Per-call options for a save.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Take a preparatory backup with this label before writing.
    pub backup_label: Option<String>,
    /// Refuse content the file variant considers invalid.
    pub validate: bool,
}

impl WriteOptions {
    pub fn validated() -> Self {
        Self {
            validate: true,
            ..Self::default()
        }
    }

    pub fn with_backup(mut self, label: &str) -> Self {
        self.backup_label = Some(label.to_string());
        self
    }
}

#[derive(Debug, Clone)]
pub struct LocalDisk {
    retries: u32,
    retry_delay: Duration,
}

impl Default for LocalDisk {
    fn default() -> Self {
        Self::new(2, Duration::from_millis(50))
    }
}

impl LocalDisk {
    pub fn new(retries: u32, retry_delay: Duration) -> Self {
        Self {
            retries,
            retry_delay,
        }
    }
}

#[async_trait]
impl DiskIo for LocalDisk {
    async fn read(&self, path: &Path) -> io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    async fn write(&self, path: &Path, content: &str) -> io::Result<()> {
        let mut attempt = 0;
        loop {
            let target: PathBuf = path.to_path_buf();
            let text = content.to_string();
            let result = tokio::task::spawn_blocking(move || atomic_write(&target, &text))
                .await
                .unwrap_or_else(|e| Err(io::Error::new(io::ErrorKind::Other, e)));

            match result {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::InvalidInput || attempt >= self.retries => {
                    return Err(e)
                }
                Err(e) => {
                    attempt += 1;
                    log::warn!(
                        "[lexera.io.write] Write to {:?} failed ({}), retry {}/{}",
                        path,
                        e,
                        attempt,
                        self.retries
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }
}

/// Atomic write with fsync.
pub fn atomic_write(path: &Path, content: &str) -> io::Result<()> {
    if content.trim().is_empty() {
        if let Ok(existing) = fs::read_to_string(path) {
            if !existing.trim().is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "Refusing to overwrite non-empty file with empty content",
                ));
            }
        }
    }

    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }

    let tmp_path = path.with_extension("lexera-sync.tmp");
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    fs::rename(&tmp_path, path)?;

    // fsync directory for rename durability
    if let Some(dir) = path.parent() {
        if let Ok(d) = fs::File::open(dir) {
            let _ = d.sync_all();
        }
    }
    Ok(())
}
