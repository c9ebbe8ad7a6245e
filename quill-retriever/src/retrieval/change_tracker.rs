//! Fingerprint diffing between the stored index and the current corpus.
//!
//! This is the piece that makes re-indexing incremental: only documents
//! whose content hash changed are re-chunked and re-embedded, and documents
//! that vanished from the corpus are removed from the store.

use std::collections::{HashMap, HashSet};

use super::source::DocumentSnapshot;

/// blake3 hash of a document's raw bytes.
pub type Fingerprint = [u8; 32];

/// Partition of the current corpus relative to the previous index build.
#[derive(Debug, Default)]
pub struct IndexDelta {
    /// Documents whose id was not in the previous build.
    pub added: Vec<DocumentSnapshot>,
    /// Documents whose fingerprint changed since the previous build.
    pub modified: Vec<DocumentSnapshot>,
    /// Ids present previously but absent from the current corpus, sorted.
    pub removed: Vec<String>,
    /// Ids whose fingerprint is unchanged; these are left untouched.
    pub unchanged: Vec<String>,
}

impl IndexDelta {
    /// True when the pass has nothing to write or delete.
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}

/// Compare the previous build's fingerprints with the current snapshots.
///
/// With no previous fingerprints (first run) every document is `added`.
pub fn diff(
    previous: &HashMap<String, Fingerprint>,
    current: Vec<DocumentSnapshot>,
) -> IndexDelta {
    let mut delta = IndexDelta::default();
    let mut current_ids: HashSet<String> = HashSet::with_capacity(current.len());

    for doc in current {
        current_ids.insert(doc.id.clone());
        match previous.get(&doc.id) {
            None => delta.added.push(doc),
            Some(stored) if *stored != doc.fingerprint => delta.modified.push(doc),
            Some(_) => delta.unchanged.push(doc.id),
        }
    }

    delta.removed = previous
        .keys()
        .filter(|id| !current_ids.contains(*id))
        .cloned()
        .collect();
    delta.removed.sort();

    delta
}
