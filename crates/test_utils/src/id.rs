//! Test utilities associated with ids.

use backstore_api::{ObjectId, RootId};
use sha2::{Digest, Sha256};

use crate::random_bytes;

/// Create a random 20 byte object id.
pub fn random_object_id() -> ObjectId {
    ObjectId::from(random_bytes(20))
}

/// Create a list of random object ids.
pub fn create_object_id_list(num: u16) -> Vec<ObjectId> {
    (0..num).map(|_| random_object_id()).collect()
}

/// Create a random root id.
pub fn random_root_id() -> RootId {
    RootId::parse(&random_object_id().to_hex())
        .expect("20 random bytes render as a valid root id")
}

/// The content hash used by tests: sha256 truncated to 20 bytes.
pub fn hash_content(content: &[u8]) -> ObjectId {
    let mut hasher = Sha256::new();
    hasher.update(content);
    ObjectId::from(hasher.finalize()[..20].to_vec())
}
