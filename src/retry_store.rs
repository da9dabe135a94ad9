use crate::{convert::time_to_string, models::Envelope, Error};
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::SystemTime,
};

const FILE_SUFFIX: &str = ".ai.json";
const TEMP_SUFFIX: &str = ".tmp";

#[derive(Serialize)]
struct PersistedBatchRef<'a> {
    created: String,
    items: &'a [Envelope],
}

#[derive(Deserialize)]
struct PersistedBatch {
    #[allow(dead_code)]
    created: String,
    items: Vec<Envelope>,
}

/// A batch file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StoredFile {
    pub(crate) path: PathBuf,
    pub(crate) size: u64,
}

/// Directory of failed batches, one file per batch.
///
/// File names start with the zero padded creation time in milliseconds, so sorting them by name
/// yields the oldest batch first.
#[derive(Debug)]
pub(crate) struct RetryStore {
    directory: PathBuf,
    sequence: AtomicU64,
    // Held for the whole evict-then-write step so concurrent writers see each other's files.
    write_lock: tokio::sync::Mutex<()>,
}

impl RetryStore {
    pub(crate) fn new(directory: PathBuf) -> Self {
        RetryStore {
            directory,
            sequence: AtomicU64::new(0),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Writes a batch, evicting the oldest batches until it fits into `max_bytes`. Batches
    /// larger than the whole quota are dropped. Returns whether the batch was written.
    pub(crate) async fn persist(&self, items: &[Envelope], max_bytes: u64) -> Result<bool, Error> {
        let content = encode(items)?;
        let size = content.len() as u64;
        if size > max_bytes {
            tracing::warn!(
                size,
                max_bytes,
                count = items.len(),
                "Dropping telemetry batch larger than the disk quota"
            );
            return Ok(false);
        }

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(Error::Storage)?;
        let files = self.list().await?;
        for file in eviction_candidates(&files, size, max_bytes) {
            tracing::warn!(
                path = %file.path.display(),
                "Evicting stored telemetry batch to stay within the disk quota"
            );
            remove_if_exists(tokio::fs::remove_file(&file.path).await)?;
        }

        let (temp_path, path) = self.next_paths();
        tokio::fs::write(&temp_path, &content)
            .await
            .map_err(Error::Storage)?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .map_err(Error::Storage)?;
        tracing::debug!(
            path = %path.display(),
            count = items.len(),
            "Stored telemetry batch for retry"
        );
        Ok(true)
    }

    /// Blocking variant of [`persist`](Self::persist) for a process that is about to exit. Only
    /// does plain file system calls.
    pub(crate) fn save_on_crash(&self, items: &[Envelope], max_bytes: u64) -> Result<bool, Error> {
        let content = encode(items)?;
        let size = content.len() as u64;
        if size > max_bytes {
            tracing::warn!(
                size,
                max_bytes,
                count = items.len(),
                "Dropping telemetry batch larger than the disk quota"
            );
            return Ok(false);
        }

        fs::create_dir_all(&self.directory).map_err(Error::Storage)?;
        let files = self.list_blocking()?;
        for file in eviction_candidates(&files, size, max_bytes) {
            remove_if_exists(fs::remove_file(&file.path))?;
        }

        let (temp_path, path) = self.next_paths();
        fs::write(&temp_path, &content).map_err(Error::Storage)?;
        fs::rename(&temp_path, &path).map_err(Error::Storage)?;
        Ok(true)
    }

    /// Stored batches, oldest first.
    pub(crate) async fn list(&self) -> Result<Vec<StoredFile>, Error> {
        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Error::Storage(err)),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(Error::Storage)? {
            if !is_batch_file(&entry.path()) {
                continue;
            }
            let size = match entry.metadata().await {
                Ok(metadata) => metadata.len(),
                // Deleted by a concurrent eviction or sweep.
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(Error::Storage(err)),
            };
            files.push(StoredFile {
                path: entry.path(),
                size,
            });
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    fn list_blocking(&self) -> Result<Vec<StoredFile>, Error> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Error::Storage(err)),
        };
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(Error::Storage)?;
            if !is_batch_file(&entry.path()) {
                continue;
            }
            if let Ok(metadata) = entry.metadata() {
                files.push(StoredFile {
                    path: entry.path(),
                    size: metadata.len(),
                });
            }
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    /// Reads a stored batch. Fails with [`Error::StorageFormat`] when the file is not a batch.
    pub(crate) async fn read(&self, path: &Path) -> Result<Vec<Envelope>, Error> {
        let content = tokio::fs::read(path).await.map_err(Error::Storage)?;
        let batch: PersistedBatch =
            serde_json::from_slice(&content).map_err(Error::StorageFormat)?;
        Ok(batch.items)
    }

    pub(crate) async fn delete(&self, path: &Path) -> Result<(), Error> {
        remove_if_exists(tokio::fs::remove_file(path).await)
    }

    fn next_paths(&self) -> (PathBuf, PathBuf) {
        let millis = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let name = format!(
            "{:020}-{}-{:010}{}",
            millis,
            std::process::id(),
            self.sequence.fetch_add(1, Ordering::Relaxed),
            FILE_SUFFIX
        );
        let path = self.directory.join(&name);
        let temp_path = self.directory.join(format!("{}{}", name, TEMP_SUFFIX));
        (temp_path, path)
    }
}

fn encode(items: &[Envelope]) -> Result<Vec<u8>, Error> {
    serde_json::to_vec(&PersistedBatchRef {
        created: time_to_string(SystemTime::now()),
        items,
    })
    .map_err(Error::StorageFormat)
}

fn is_batch_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map_or(false, |name| name.ends_with(FILE_SUFFIX))
}

/// Oldest files that have to go so a new file of `size` bytes fits into `max_bytes`.
fn eviction_candidates(files: &[StoredFile], size: u64, max_bytes: u64) -> &[StoredFile] {
    let mut total: u64 = files.iter().map(|file| file.size).sum();
    let mut count = 0;
    for file in files {
        if total + size <= max_bytes {
            break;
        }
        total -= file.size;
        count += 1;
    }
    &files[..count]
}

fn remove_if_exists(result: io::Result<()>) -> Result<(), Error> {
    match result {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(Error::Storage(err)),
        _ => Ok(()),
    }
}
