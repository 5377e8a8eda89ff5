//! Shared versioned file store.
//!
//! A process-wide mapping from normalized path key to an append-only
//! revision history. One reader-writer lock guards the whole map: a PUT
//! holds the write lock only for the tail compare and the append, readers
//! capture a revision handle under the read lock and stream it after
//! release.

use std::collections::HashMap;
use std::sync::RwLock;

use bytes::Bytes;
use thiserror::Error;

/// One accepted version of a file's contents.
///
/// Cheap to clone; the underlying buffer is immutable and shared, so a
/// reader may keep streaming it while writers append further revisions to
/// the same file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Revision(Bytes);

impl Revision {
    fn new(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Revision {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Which revision of a file a read refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RevisionRef {
    Latest,
    /// 1-based; 0 is always out of range.
    Numbered(u64),
}

/// Read-side failures. `Display` strings are the wire error bodies.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("no such file")]
    NoSuchFile,
    #[error("no such revision")]
    NoSuchRevision,
}

#[derive(Debug, Default)]
struct FileNode {
    revisions: Vec<Revision>,
}

/// Concurrent map from normalized path key to revision history.
#[derive(Debug, Default)]
pub struct Store {
    files: RwLock<HashMap<String, FileNode>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` as a new revision of `key` and returns its 1-based
    /// id. A payload equal to the current tail byte-for-byte is absorbed:
    /// no revision is created and the existing tail id comes back.
    /// Deduplication never looks past the tail.
    pub fn put(&self, key: &str, bytes: Vec<u8>) -> u64 {
        let mut files = self.files.write().expect("store lock poisoned");
        let node = files.entry(key.to_owned()).or_default();
        if let Some(tail) = node.revisions.last() {
            if tail.as_bytes() == bytes.as_slice() {
                return node.revisions.len() as u64;
            }
        }
        node.revisions.push(Revision::new(bytes));
        node.revisions.len() as u64
    }

    /// Resolves `which` against `key`. A missing file is reported before
    /// an out-of-range revision.
    pub fn get(&self, key: &str, which: RevisionRef) -> Result<Revision, LookupError> {
        let files = self.files.read().expect("store lock poisoned");
        let node = files.get(key).ok_or(LookupError::NoSuchFile)?;
        match which {
            RevisionRef::Latest => node.revisions.last().cloned().ok_or(LookupError::NoSuchFile),
            RevisionRef::Numbered(n) => {
                if n == 0 || n > node.revisions.len() as u64 {
                    return Err(LookupError::NoSuchRevision);
                }
                Ok(node.revisions[(n - 1) as usize].clone())
            }
        }
    }

    /// Consistent `(key, revision_count)` pairs for directory projection,
    /// gathered under one read-lock scan.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let files = self.files.read().expect("store lock poisoned");
        files
            .iter()
            .map(|(key, node)| (key.clone(), node.revisions.len() as u64))
            .collect()
    }
}
