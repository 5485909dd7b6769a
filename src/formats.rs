//! On-disk format constants.

/// Magic bytes at the start of every ranking-set snapshot.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"RKSN";
/// Current on-disk format version for snapshots.
pub const FORMAT_VERSION: u32 = 1;

/// Default bucket (namespace directory) holding one snapshot per named set.
pub const DEFAULT_BUCKET: &str = "RANKING";

/// Prefix of inline key files inside a bucket.
///
/// Short keys are stored as `k` + lowercase hex of the UTF-8 name, so the
/// empty name still maps to a valid file name.
pub const KEY_FILE_PREFIX: char = 'k';

/// Prefix of key files named by the SHA-256 of a key too long to inline.
///
/// Such files start with `[key_len u32 LE][key bytes]` before the value.
pub const HASHED_KEY_FILE_PREFIX: char = 'h';

/// Longest inline key file name (`k` + hex). Leaves room for [`TEMP_SUFFIX`]
/// under the common 255-byte file name limit.
pub const MAX_INLINE_KEY_FILE_NAME: usize = 201;

/// Longest key (set name) in bytes the store accepts.
pub const MAX_KEY_BYTES: usize = 32 * 1024;

/// Suffix used by in-flight temporary files; scans skip these.
pub const TEMP_SUFFIX: &str = ".tmp";
