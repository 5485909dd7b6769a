//! Named key/value namespace over a [`Directory`].
//!
//! A bucket is one directory holding one file per key. It offers the
//! semantics the persistence pipeline relies on:
//! - atomic per-key `put` (readers see the old or the new value, never a mix);
//! - `delete` of a key;
//! - an ordered full `scan`.
//!
//! Key files are named one of two ways:
//! - `k` + lowercase hex of the key's UTF-8 bytes when that fits in
//!   [`MAX_INLINE_KEY_FILE_NAME`]; the file holds the value only.
//! - `h` + lowercase hex of the key's SHA-256 otherwise; the file holds
//!   `[key_len u32 LE][key][value]`, and a file whose stored key differs from
//!   the requested one is treated as a different key.
//!
//! Keys longer than [`MAX_KEY_BYTES`] are rejected.

use crate::error::{RankError, RankResult};
use crate::formats::{
    HASHED_KEY_FILE_PREFIX, KEY_FILE_PREFIX, MAX_INLINE_KEY_FILE_NAME, MAX_KEY_BYTES, TEMP_SUFFIX,
};
use crate::storage::{self, Directory, DurableDirectory};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::io::{self, Read};
use std::sync::Arc;

/// Key/value namespace stored as a directory of files.
pub struct Bucket {
    dir: Arc<dyn Directory>,
    name: String,
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket").field("name", &self.name).finish()
    }
}

impl Bucket {
    /// Open bucket `name` in `dir`, creating it on a fresh store.
    pub fn open_or_create(dir: impl Into<Arc<dyn Directory>>, name: &str) -> RankResult<Self> {
        validate_bucket_name(name)?;
        let dir = dir.into();
        dir.create_dir_all(name)?;
        Ok(Self {
            dir,
            name: name.to_owned(),
        })
    }

    /// Open an existing bucket without creating anything.
    ///
    /// Fails with [`RankError::MissingPath`] when the bucket directory is absent.
    pub fn open(dir: impl Into<Arc<dyn Directory>>, name: &str) -> RankResult<Self> {
        validate_bucket_name(name)?;
        let dir = dir.into();
        if !dir.exists(name) {
            return Err(RankError::MissingPath(
                dir.file_path(name).unwrap_or_else(|| name.into()),
            ));
        }
        Ok(Self {
            dir,
            name: name.to_owned(),
        })
    }

    /// Bucket name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn path_of(&self, file: &str) -> String {
        format!("{}/{}", self.name, file)
    }

    /// Replace the value stored under `key`.
    ///
    /// Filesystem backends get temp-file + `fsync` + rename + directory sync;
    /// other backends use their plain atomic write.
    pub fn put(&self, key: &str, value: &[u8]) -> RankResult<()> {
        check_key_len(key)?;
        let file = key_file_name(key);
        let path = self.path_of(&file);

        let framed;
        let data = if is_hashed(&file) {
            if self.dir.exists(&path) {
                let stored = read_key_header(&mut *self.dir.open_file(&path)?, &file)?;
                if stored != key {
                    return Err(RankError::InvalidState(format!(
                        "key file {file} already holds a different key"
                    )));
                }
            }
            let mut buf = Vec::with_capacity(4 + key.len() + value.len());
            write_key_header(&mut buf, key)?;
            buf.extend_from_slice(value);
            framed = buf;
            &framed[..]
        } else {
            value
        };

        if self.dir.file_path(&path).is_some() {
            self.dir.atomic_write_durable(&path, data)
        } else {
            self.dir.atomic_write(&path, data)
        }
    }

    /// Value stored under `key`, if any.
    pub fn get(&self, key: &str) -> RankResult<Option<Vec<u8>>> {
        if key.len() > MAX_KEY_BYTES {
            return Ok(None);
        }
        let file = key_file_name(key);
        let path = self.path_of(&file);
        if !self.dir.exists(&path) {
            return Ok(None);
        }
        let mut r = self.dir.open_file(&path)?;
        if is_hashed(&file) && read_key_header(&mut *r, &file)? != key {
            return Ok(None);
        }
        let mut buf = Vec::new();
        r.read_to_end(&mut buf)?;
        Ok(Some(buf))
    }

    /// Remove `key`. Returns whether it existed.
    pub fn delete(&self, key: &str) -> RankResult<bool> {
        if key.len() > MAX_KEY_BYTES {
            return Ok(false);
        }
        let file = key_file_name(key);
        let path = self.path_of(&file);
        if !self.dir.exists(&path) {
            return Ok(false);
        }
        if is_hashed(&file) && read_key_header(&mut *self.dir.open_file(&path)?, &file)? != key {
            return Ok(false);
        }
        self.dir.delete(&path)?;
        Ok(true)
    }

    /// All keys, in byte order. In-flight temp files are skipped.
    pub fn keys(&self) -> RankResult<Vec<String>> {
        Ok(self.key_files()?.into_iter().map(|(key, _)| key).collect())
    }

    /// `(key, file name)` for every stored key, sorted by key.
    fn key_files(&self) -> RankResult<Vec<(String, String)>> {
        let mut out = Vec::new();
        for file in self.dir.list_dir(&self.name)? {
            if file.ends_with(TEMP_SUFFIX) {
                continue;
            }
            let key = if is_hashed(&file) {
                read_key_header(&mut *self.dir.open_file(&self.path_of(&file))?, &file)?
            } else {
                decode_key(&file)?
            };
            out.push((key, file));
        }
        out.sort();
        Ok(out)
    }

    /// Visit every `(key, value)` in key order. Stops at the first error.
    ///
    /// Returns the number of pairs visited.
    pub fn scan(&self, mut visit: impl FnMut(&str, Vec<u8>) -> RankResult<()>) -> RankResult<usize> {
        let files = self.key_files()?;
        let mut n = 0;
        for (key, file) in files {
            let mut r = self.dir.open_file(&self.path_of(&file))?;
            if is_hashed(&file) {
                read_key_header(&mut *r, &file)?;
            }
            let mut buf = Vec::new();
            r.read_to_end(&mut buf)?;
            visit(&key, buf)?;
            n += 1;
        }
        Ok(n)
    }

    /// Make deletions and renames inside the bucket durable. No-op for
    /// backends without a filesystem path.
    pub fn close(&self) -> RankResult<()> {
        if self.dir.file_path(&self.name).is_some() {
            storage::sync_file(&*self.dir, &self.name)?;
        }
        Ok(())
    }
}

fn validate_bucket_name(name: &str) -> RankResult<()> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(RankError::InvalidConfig(format!(
            "bucket name must be a single path component: {name:?}"
        )));
    }
    Ok(())
}

/// Reject keys the store cannot hold.
pub fn check_key_len(key: &str) -> RankResult<()> {
    if key.len() > MAX_KEY_BYTES {
        return Err(RankError::NameTooLong {
            len: key.len(),
            max: MAX_KEY_BYTES,
        });
    }
    Ok(())
}

fn is_hashed(file: &str) -> bool {
    file.starts_with(HASHED_KEY_FILE_PREFIX)
}

/// File name `key` is stored under: inline hex when short, SHA-256 otherwise.
pub fn key_file_name(key: &str) -> String {
    if 1 + 2 * key.len() <= MAX_INLINE_KEY_FILE_NAME {
        return encode_key(key);
    }
    let mut out = String::with_capacity(1 + 64);
    out.push(HASHED_KEY_FILE_PREFIX);
    for b in Sha256::digest(key.as_bytes()).iter() {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Inline file name for `key`.
pub fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(1 + key.len() * 2);
    out.push(KEY_FILE_PREFIX);
    for b in key.bytes() {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Key for inline file name `file`; anything not produced by [`key_file_name`]
/// is corruption.
pub fn decode_key(file: &str) -> RankResult<String> {
    let bad = || RankError::Format(format!("unexpected file in bucket: {file:?}"));
    if file.len() > MAX_INLINE_KEY_FILE_NAME {
        return Err(bad());
    }
    let hex = file.strip_prefix(KEY_FILE_PREFIX).ok_or_else(bad)?;
    if hex.len() % 2 != 0 || !hex.bytes().all(|c| matches!(c, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(bad());
    }
    let bytes = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| bad()))
        .collect::<RankResult<Vec<u8>>>()?;
    String::from_utf8(bytes).map_err(|_| bad())
}

fn write_key_header(out: &mut Vec<u8>, key: &str) -> RankResult<()> {
    let len = u32::try_from(key.len()).map_err(|_| RankError::NameTooLong {
        len: key.len(),
        max: MAX_KEY_BYTES,
    })?;
    out.write_u32::<LittleEndian>(len)?;
    out.extend_from_slice(key.as_bytes());
    Ok(())
}

/// Read the stored key of hashed file `file` and check it hashes to `file`.
fn read_key_header(r: &mut dyn Read, file: &str) -> RankResult<String> {
    let bad = |what: &str| RankError::Format(format!("{what} in bucket file {file:?}"));
    let eof = |e: io::Error, what: &str| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            bad(what)
        } else {
            RankError::Io(e)
        }
    };

    let len = r
        .read_u32::<LittleEndian>()
        .map_err(|e| eof(e, "truncated key header"))? as usize;
    if len > MAX_KEY_BYTES {
        return Err(bad("key length out of range"));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(|e| eof(e, "truncated key"))?;
    let key = String::from_utf8(buf).map_err(|_| bad("non-UTF-8 key"))?;
    if key_file_name(&key) != file {
        return Err(bad("stored key does not match file name"));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FsDirectory, MemoryDirectory};

    #[test]
    fn key_encoding_preserves_order() {
        let mut keys = vec!["global", "", "a", "ab", "b", "排行", "weekly/eu"];
        let mut files: Vec<String> = keys.iter().map(|k| encode_key(k)).collect();
        keys.sort();
        files.sort();
        let decoded: Vec<String> = files.iter().map(|f| decode_key(f).unwrap()).collect();
        assert_eq!(decoded, keys);
    }

    #[test]
    fn decode_key_rejects_foreign_files() {
        let overlong = format!("k{}", "61".repeat(101));
        for f in ["global", "k0", "kzz", "kff", "x67", overlong.as_str()] {
            assert!(decode_key(f).unwrap_err().is_corruption(), "{f}");
        }
    }

    #[test]
    fn put_get_delete_scan_in_memory() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        let b = Bucket::open_or_create(dir, "RANKING").unwrap();
        b.put("weekly", b"w1").unwrap();
        b.put("global", b"g1").unwrap();
        b.put("weekly", b"w2").unwrap();

        assert_eq!(b.get("weekly").unwrap().as_deref(), Some(&b"w2"[..]));
        assert_eq!(b.get("missing").unwrap(), None);

        let mut seen = Vec::new();
        let n = b
            .scan(|k, v| {
                seen.push((k.to_string(), v));
                Ok(())
            })
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(
            seen,
            vec![
                ("global".to_string(), b"g1".to_vec()),
                ("weekly".to_string(), b"w2".to_vec())
            ]
        );

        assert!(b.delete("global").unwrap());
        assert!(!b.delete("global").unwrap());
        assert_eq!(b.keys().unwrap(), vec!["weekly"]);
    }

    #[test]
    fn fs_bucket_survives_reopen_and_skips_temp_files() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let dir: Arc<dyn Directory> = Arc::new(FsDirectory::new(tmp.path()).unwrap());
            let b = Bucket::open_or_create(dir, "RANKING").unwrap();
            b.put("global", b"g").unwrap();
            b.close().unwrap();
        }
        std::fs::write(tmp.path().join("RANKING").join("k00.tmp"), b"partial").unwrap();

        let dir: Arc<dyn Directory> = Arc::new(FsDirectory::new(tmp.path()).unwrap());
        let b = Bucket::open_or_create(dir, "RANKING").unwrap();
        assert_eq!(b.keys().unwrap(), vec!["global"]);
        assert_eq!(b.get("global").unwrap().as_deref(), Some(&b"g"[..]));
    }

    #[test]
    fn long_keys_use_bounded_hashed_file_names() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        let b = Bucket::open_or_create(dir.clone(), "RANKING").unwrap();
        let short = "s".repeat(100);
        let long = "x".repeat(130);
        let huge = "y".repeat(1000);

        assert!(key_file_name(&short).starts_with(KEY_FILE_PREFIX));
        assert_eq!(key_file_name(&long).len(), 65);
        assert_eq!(key_file_name(&huge).len(), 65);

        b.put(&huge, b"h").unwrap();
        b.put(&long, b"l1").unwrap();
        b.put(&long, b"l2").unwrap();
        b.put(&short, b"s").unwrap();
        b.put("global", b"g").unwrap();

        assert_eq!(b.get(&long).unwrap().as_deref(), Some(&b"l2"[..]));
        assert_eq!(b.get(&huge).unwrap().as_deref(), Some(&b"h"[..]));
        assert_eq!(b.keys().unwrap(), vec!["global".to_string(), short, long.clone(), huge.clone()]);

        let mut seen = Vec::new();
        b.scan(|k, v| {
            seen.push((k.len(), v));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen[2], (130, b"l2".to_vec()));
        assert_eq!(seen[3], (1000, b"h".to_vec()));

        assert!(b.delete(&long).unwrap());
        assert!(!b.delete(&long).unwrap());
        assert_eq!(b.get(&long).unwrap(), None);
    }

    #[test]
    fn hashed_file_with_foreign_key_is_corruption() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        let b = Bucket::open_or_create(dir.clone(), "RANKING").unwrap();
        let long = "x".repeat(130);
        let mut framed = Vec::new();
        write_key_header(&mut framed, &"z".repeat(130)).unwrap();
        framed.extend_from_slice(b"v");
        dir.atomic_write(&format!("RANKING/{}", key_file_name(&long)), &framed)
            .unwrap();

        assert!(b.get(&long).unwrap_err().is_corruption());
        assert!(b.keys().unwrap_err().is_corruption());
    }

    #[test]
    fn oversized_key_is_refused() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        let b = Bucket::open_or_create(dir, "RANKING").unwrap();
        let key = "k".repeat(MAX_KEY_BYTES + 1);
        assert!(matches!(b.put(&key, b"v").unwrap_err(), RankError::NameTooLong { .. }));
        assert_eq!(b.get(&key).unwrap(), None);
        assert!(!b.delete(&key).unwrap());
    }

    #[test]
    fn open_requires_existing_bucket() {
        let tmp = tempfile::tempdir().unwrap();
        let dir: Arc<dyn Directory> = Arc::new(FsDirectory::new(tmp.path()).unwrap());
        let err = Bucket::open(dir.clone(), "RANKING").unwrap_err();
        assert!(matches!(err, RankError::MissingPath(_)), "{err}");
        assert!(!tmp.path().join("RANKING").exists());

        Bucket::open_or_create(dir.clone(), "RANKING").unwrap();
        let b = Bucket::open(dir, "RANKING").unwrap();
        assert!(b.keys().unwrap().is_empty());
    }

    #[test]
    fn rejects_bad_bucket_names() {
        for name in ["", "a/b", "..", "."] {
            let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
            let err = Bucket::open_or_create(dir, name).unwrap_err();
            assert!(matches!(err, RankError::InvalidConfig(_)));
        }
    }
}
