//! Test utilities for building blobs and trees.

use backstore_api::*;

use crate::{id::hash_content, random_bytes};

/// Create a blob with the given contents, its id being the content hash.
pub fn make_blob(contents: &[u8]) -> Blob {
    Blob::new(hash_content(contents), bytes::Bytes::copy_from_slice(contents))
}

/// Create a blob with random contents.
pub fn random_blob() -> Blob {
    make_blob(&random_bytes(64))
}

/// Create a tree from (name, id, kind) entries, its id being the hash
/// of the rendered entries.
pub fn make_tree(entries: &[(&str, ObjectId, TreeEntryKind)]) -> Tree {
    let entries: Vec<TreeEntry> = entries
        .iter()
        .map(|(name, id, kind)| TreeEntry {
            name: name.to_string(),
            id: id.clone(),
            kind: *kind,
        })
        .collect();
    let mut rendered = Vec::new();
    for entry in entries.iter() {
        rendered.extend_from_slice(entry.name.as_bytes());
        rendered.push(0);
        rendered.extend_from_slice(&entry.id);
    }
    Tree::new(hash_content(&rendered), entries)
}

/// Proxy metadata for a test object living at `path`.
pub fn proxy_for(path: &str, id: &ObjectId) -> ProxyHash {
    ProxyHash::new(path, id.clone())
}
