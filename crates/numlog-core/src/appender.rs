//! Append-only persistence for first-seen tokens.
//!
//! The log is truncated once when the [`LogAppender`] is created and only ever
//! appended to afterwards. Each [`append`](LogAppender::append) writes one
//! complete `token\n` record while holding the file lock, so records from
//! concurrent callers never interleave.
//!
//! ## Failure policy
//!
//! An append is only attempted by the caller that won
//! [`DedupStore::try_insert`](crate::DedupStore::try_insert) for the token. If
//! the write fails, the token is **not** removed from the store: it stays
//! "seen" and later submissions of it are still counted as duplicates, so the
//! log may miss a token under disk failure but never holds one twice. Failed
//! appends are not retried.
//!
//! The log path is truncated without coordinating with readers from a previous
//! run. That is fine for a single server process; do not point two servers at
//! the same file.

use crate::{
    Error, Result,
    types::Token,
};
use std::path::{Path, PathBuf};
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};

/// When appended records are forced to stable storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncPolicy {
    /// `fdatasync` after every record.
    #[default]
    EveryRecord,
    /// Leave it to the OS; records are still flushed out of process buffers.
    OsManaged,
}

impl SyncPolicy {
    pub const fn from_fsync(fsync: bool) -> Self {
        if fsync {
            Self::EveryRecord
        } else {
            Self::OsManaged
        }
    }
}

/// Serialized writer for the token log.
#[derive(Debug)]
pub struct LogAppender {
    path: PathBuf,
    file: Mutex<File>,
    sync: SyncPolicy,
}

impl LogAppender {
    /// Creates (or truncates) the log at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LogOpen`] if the file cannot be opened for writing.
    pub async fn create(path: impl Into<PathBuf>, sync: SyncPolicy) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await
            .map_err(|source| Error::LogOpen {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            file: Mutex::new(file),
            sync,
        })
    }

    /// Appends `token` followed by `\n`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LogWrite`] if the write, flush, or sync fails. The
    /// file may then hold a partial record at its tail; no further cleanup is
    /// attempted.
    pub async fn append(&self, token: Token) -> Result<()> {
        let record = format!("{token}\n");

        let mut file = self.file.lock().await;
        let written = async {
            file.write_all(record.as_bytes()).await?;
            // tokio buffers writes internally; flush so the record is handed
            // to the OS before the lock is released.
            file.flush().await?;
            if self.sync == SyncPolicy::EveryRecord {
                file.sync_data().await?;
            }
            Ok::<(), std::io::Error>(())
        }
        .await;

        written.map_err(|source| Error::LogWrite {
            path: self.path.clone(),
            source,
        })
    }

    /// Flushes buffered data and syncs the file to disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LogWrite`] if the flush or sync fails.
    pub async fn close(&self) -> Result<()> {
        let mut file = self.file.lock().await;
        let closed = async {
            file.flush().await?;
            file.sync_all().await
        }
        .await;

        closed.map_err(|source| Error::LogWrite {
            path: self.path.clone(),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn sync_policy(&self) -> SyncPolicy {
        self.sync
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TOKEN_LEN;
    use std::{collections::HashSet, sync::Arc};

    fn token(value: u32) -> Token {
        Token::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn create_truncates_existing_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("numbers.log");
        std::fs::write(&path, "leftover\nfrom\nlast run\n").unwrap();

        let appender = LogAppender::create(&path, SyncPolicy::OsManaged)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");

        appender.append(token(42)).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "000000042\n");
    }

    #[tokio::test]
    async fn appends_in_call_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("numbers.log");
        let appender = LogAppender::create(&path, SyncPolicy::EveryRecord)
            .await
            .unwrap();

        for value in [900_987_658, 987_658, 123_456_789] {
            appender.append(token(value)).await.unwrap();
        }
        appender.close().await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "900987658\n000987658\n123456789\n"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_never_interleave() {
        const TASKS: u32 = 8;
        const PER_TASK: u32 = 50;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("numbers.log");
        let appender = Arc::new(
            LogAppender::create(&path, SyncPolicy::OsManaged)
                .await
                .unwrap(),
        );

        let handles: Vec<_> = (0..TASKS)
            .map(|task| {
                let appender = Arc::clone(&appender);
                tokio::spawn(async move {
                    for i in 0..PER_TASK {
                        appender.append(token(task * 1_000 + i)).await.unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), (TASKS * PER_TASK) as usize);
        assert!(lines.iter().all(|line| line.len() == TOKEN_LEN));
        let distinct: HashSet<&str> = lines.iter().copied().collect();
        assert_eq!(distinct.len(), lines.len());
    }

    #[tokio::test]
    async fn open_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("numbers.log");

        let err = LogAppender::create(&path, SyncPolicy::OsManaged)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LogOpen { .. }));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn write_failure_is_a_log_write_error() {
        // Writes to /dev/full always fail with ENOSPC.
        let Ok(appender) = LogAppender::create("/dev/full", SyncPolicy::OsManaged).await else {
            return;
        };

        let err = appender.append(token(1)).await.unwrap_err();
        assert!(err.is_log_write(), "unexpected error: {err}");
    }
}
