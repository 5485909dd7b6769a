//! `Directory` wrapper with targeted fault injection for bucket paths.
//!
//! Lives under `tests/support/` so it is not compiled as its own test target.

use rankd::storage::Directory;
use rankd::RankResult;
use std::io;
use std::sync::{Arc, Mutex};

/// Failpoints and counters, shared with the test body.
#[derive(Default)]
pub struct FaultConfig {
    /// Fail every write (plain or durable) of a file inside the bucket.
    pub fail_bucket_writes: bool,
    /// Fail every delete inside the bucket.
    pub fail_bucket_deletes: bool,
    /// Make the bucket directory itself unsyncable.
    pub fail_bucket_sync: bool,
    /// Writes attempted against bucket paths.
    pub write_calls: usize,
}

/// Wraps any `Directory`; faults apply only to paths under `bucket/`.
pub struct FaultyDirectory {
    inner: Arc<dyn Directory>,
    bucket: String,
    cfg: Arc<Mutex<FaultConfig>>,
}

impl FaultyDirectory {
    pub fn new(inner: Arc<dyn Directory>, bucket: &str) -> Self {
        Self {
            inner,
            bucket: format!("{bucket}/"),
            cfg: Arc::new(Mutex::new(FaultConfig::default())),
        }
    }

    pub fn cfg(&self) -> Arc<Mutex<FaultConfig>> {
        self.cfg.clone()
    }

    fn in_bucket(&self, path: &str) -> bool {
        path.starts_with(&self.bucket)
    }

    fn check_write(&self, path: &str) -> RankResult<()> {
        if !self.in_bucket(path) {
            return Ok(());
        }
        let mut cfg = self.cfg.lock().unwrap();
        cfg.write_calls += 1;
        if cfg.fail_bucket_writes {
            return Err(io::Error::other("injected write failure").into());
        }
        Ok(())
    }
}

impl Directory for FaultyDirectory {
    fn create_file(&self, path: &str) -> RankResult<Box<dyn io::Write>> {
        self.check_write(path)?;
        self.inner.create_file(path)
    }

    fn open_file(&self, path: &str) -> RankResult<Box<dyn io::Read>> {
        self.inner.open_file(path)
    }

    fn exists(&self, path: &str) -> bool {
        self.inner.exists(path)
    }

    fn delete(&self, path: &str) -> RankResult<()> {
        let fail = self.in_bucket(path)
            && !path.ends_with(".tmp")
            && self.cfg.lock().unwrap().fail_bucket_deletes;
        if fail {
            return Err(io::Error::other("injected delete failure").into());
        }
        self.inner.delete(path)
    }

    fn atomic_rename(&self, from: &str, to: &str) -> RankResult<()> {
        self.inner.atomic_rename(from, to)
    }

    fn create_dir_all(&self, path: &str) -> RankResult<()> {
        self.inner.create_dir_all(path)
    }

    fn list_dir(&self, path: &str) -> RankResult<Vec<String>> {
        self.inner.list_dir(path)
    }

    fn atomic_write(&self, path: &str, data: &[u8]) -> RankResult<()> {
        self.check_write(path)?;
        self.inner.atomic_write(path, data)
    }

    fn file_path(&self, path: &str) -> Option<std::path::PathBuf> {
        // A path that does not exist makes any fsync of the bucket fail.
        if path == self.bucket.trim_end_matches('/') && self.cfg.lock().unwrap().fail_bucket_sync {
            return Some(std::env::temp_dir().join("rankd-missing").join(path));
        }
        self.inner.file_path(path)
    }
}
