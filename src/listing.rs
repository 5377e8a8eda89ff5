//! Directory projection over the flat key space.
//!
//! Synthesizes a one-level listing (files plus collapsed subdirectory
//! markers) from a store snapshot and a target directory prefix.

use std::collections::BTreeMap;
use std::fmt;

use crate::path;

/// Metadata attached to one listing entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File { revision: u64 },
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Dir => f.write_str("DIR"),
            EntryKind::File { revision } => write!(f, "r{revision}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// Projects the immediate children of `dir` from a store snapshot.
///
/// The target is normalized like any path and given a trailing `/`; keys
/// under that prefix contribute either a file entry (tagged with the
/// latest revision) or a collapsed `name/` directory marker. Names come
/// back deduplicated in ascending byte order. An unmatched prefix yields
/// an empty listing, not an error.
pub fn project(snapshot: &[(String, u64)], dir: &str) -> Vec<ListEntry> {
    let mut prefix = path::normalize_key(dir);
    if !prefix.ends_with('/') {
        prefix.push('/');
    }

    let mut entries: BTreeMap<String, EntryKind> = BTreeMap::new();
    for (key, revision_count) in snapshot {
        let Some(rel) = key.strip_prefix(&prefix) else {
            continue;
        };
        match rel.split_once('/') {
            // A deeper key collapses to its first segment. File display
            // names never contain '/', so the marker cannot shadow one.
            Some((segment, _)) => {
                entries.insert(format!("{segment}/"), EntryKind::Dir);
            }
            None => {
                entries.insert(
                    rel.to_owned(),
                    EntryKind::File {
                        revision: *revision_count,
                    },
                );
            }
        }
    }

    entries
        .into_iter()
        .map(|(name, kind)| ListEntry { name, kind })
        .collect()
}
