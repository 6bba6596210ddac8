//! Fetchable object types.

use crate::*;

/// The kind of a fetchable object.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum ObjectKind {
    /// File contents.
    Blob,

    /// A directory listing.
    Tree,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blob => f.write_str("blob"),
            Self::Tree => f.write_str("tree"),
        }
    }
}

/// The kind of an import request, i.e. the shape of the remote call
/// that services it. Requests are only ever batched with requests
/// of the same import kind.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum ImportKind {
    /// A single blob.
    Blob,

    /// A single tree.
    Tree,

    /// A batch of blobs, fetched only to warm the local store.
    Prefetch,
}

impl ImportKind {
    /// All import kinds, in index order.
    pub const ALL: [ImportKind; 3] =
        [ImportKind::Blob, ImportKind::Tree, ImportKind::Prefetch];

    /// A dense index for per-kind tables.
    pub fn index(&self) -> usize {
        match self {
            Self::Blob => 0,
            Self::Tree => 1,
            Self::Prefetch => 2,
        }
    }
}

impl std::fmt::Display for ImportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blob => f.write_str("blob"),
            Self::Tree => f.write_str("tree"),
            Self::Prefetch => f.write_str("prefetch"),
        }
    }
}

/// The deduplication key of an import: at most one import request
/// per key is outstanding at any time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    /// What kind of object this is.
    pub kind: ObjectKind,

    /// The content hash of the object.
    pub id: ObjectId,
}

impl ObjectKey {
    /// Key of a blob.
    pub fn blob(id: ObjectId) -> Self {
        Self {
            kind: ObjectKind::Blob,
            id,
        }
    }

    /// Key of a tree.
    pub fn tree(id: ObjectId) -> Self {
        Self {
            kind: ObjectKind::Tree,
            id,
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// File contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    /// The id of this blob.
    pub id: ObjectId,

    /// The contents.
    pub contents: bytes::Bytes,
}

impl Blob {
    /// Construct a new blob.
    pub fn new(id: ObjectId, contents: impl Into<bytes::Bytes>) -> Self {
        Self {
            id,
            contents: contents.into(),
        }
    }
}

/// The kind of a tree entry.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum TreeEntryKind {
    /// Regular file.
    File,

    /// Executable file.
    Executable,

    /// Symbolic link.
    Symlink,

    /// Sub directory.
    Directory,
}

impl TreeEntryKind {
    /// The object kind this entry points to.
    pub fn object_kind(&self) -> ObjectKind {
        match self {
            Self::Directory => ObjectKind::Tree,
            _ => ObjectKind::Blob,
        }
    }
}

/// A single named entry of a tree.
#[derive(
    Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
pub struct TreeEntry {
    /// The entry name (a single path component).
    pub name: String,

    /// The id of the referenced object.
    pub id: ObjectId,

    /// What the entry is.
    pub kind: TreeEntryKind,
}

/// A directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    /// The id of this tree.
    pub id: ObjectId,

    /// Entries sorted by name.
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    /// Construct a new tree, sorting the entries by name.
    pub fn new(id: ObjectId, mut entries: Vec<TreeEntry>) -> Self {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Self { id, entries }
    }

    /// Look up an entry by name.
    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries
            .binary_search_by(|e| e.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.entries[i])
    }
}

/// The metadata the remote source needs to locate an object: the
/// repository path it lives at and the revision the remote knows it by.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct ProxyHash {
    /// Repository-relative path, "" for a root tree.
    pub path: String,

    /// The remote revision of the object.
    pub revision: ObjectId,
}

impl ProxyHash {
    /// Construct proxy metadata.
    pub fn new(path: impl Into<String>, revision: ObjectId) -> Self {
        Self {
            path: path.into(),
            revision,
        }
    }

    /// Proxy metadata of a root tree.
    pub fn root(revision: ObjectId) -> Self {
        Self::new("", revision)
    }

    /// Proxy metadata of a child entry of the tree this proxy refers to.
    pub fn child(&self, entry: &TreeEntry) -> Self {
        let path = if self.path.is_empty() {
            entry.name.clone()
        } else {
            format!("{}/{}", self.path, entry.name)
        };
        Self::new(path, entry.id.clone())
    }
}
