//! Types dealing with object identity.

use crate::*;

macro_rules! imp_deref {
    ($i:ty, $t:ty) => {
        impl std::ops::Deref for $i {
            type Target = $t;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }
    };
}

macro_rules! imp_from {
    ($a:ty, $b:ty, $i:ident => $e:expr) => {
        impl From<$b> for $a {
            fn from($i: $b) -> Self {
                $e
            }
        }
    };
}

/// Content hash identifying a blob or a tree.
///
/// These bytes are the raw hash, without prefix or suffix. They are
/// displayed (and serialized) as lowercase hex.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub bytes::Bytes);

imp_deref!(ObjectId, bytes::Bytes);
imp_from!(ObjectId, bytes::Bytes, b => ObjectId(b));
imp_from!(ObjectId, Vec<u8>, b => ObjectId(bytes::Bytes::from(b)));

impl ObjectId {
    /// Parse an id from its hex representation.
    pub fn from_hex(s: &str) -> StoreResult<Self> {
        hex::decode(s).map(|b| ObjectId(b.into())).map_err(|e| {
            StoreError::invalid_argument(format!(
                "invalid hex object id {s:?}: {e}"
            ))
        })
    }

    /// Render this id as lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl serde::Serialize for ObjectId {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for ObjectId {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        let s: String = serde::Deserialize::deserialize(deserializer)?;
        ObjectId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Number of hex digits in a rendered root id.
pub const ROOT_ID_HEX_LEN: usize = 40;

/// Identifies a root (a commit) in the source control repository.
///
/// The canonical form is [ROOT_ID_HEX_LEN] lowercase hex digits,
/// see [RootId::parse].
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct RootId(pub std::sync::Arc<str>);

imp_deref!(RootId, str);

impl RootId {
    /// Parse a root id, normalizing it to lowercase.
    pub fn parse(s: &str) -> StoreResult<Self> {
        let s = s.trim();
        if s.len() != ROOT_ID_HEX_LEN
            || !s.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(StoreError::invalid_argument(format!(
                "root id must be {ROOT_ID_HEX_LEN} hex digits, got {s:?}"
            )));
        }
        Ok(Self(s.to_ascii_lowercase().into_boxed_str().into()))
    }
}

impl std::fmt::Display for RootId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn object_id_hex() {
        let id = ObjectId::from(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!("deadbeef", id.to_string());
        assert_eq!(id, ObjectId::from_hex("deadbeef").unwrap());
        assert!(ObjectId::from_hex("xyz").is_err());
    }

    #[test]
    fn object_id_serde() {
        let id = ObjectId::from(vec![1, 2, 255]);
        let enc = serde_json::to_string(&id).unwrap();
        assert_eq!("\"0102ff\"", enc);
        let dec: ObjectId = serde_json::from_str(&enc).unwrap();
        assert_eq!(id, dec);
    }

    #[test]
    fn root_id_parse() {
        let upper = "ABCDEF0123456789ABCDEF0123456789ABCDEF01";
        let root = RootId::parse(upper).unwrap();
        assert_eq!(upper.to_ascii_lowercase(), root.to_string());

        assert!(RootId::parse("").is_err());
        assert!(RootId::parse("abc").is_err());
        assert!(RootId::parse(&"g".repeat(ROOT_ID_HEX_LEN)).is_err());
        assert!(matches!(
            RootId::parse("abc"),
            Err(StoreError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn root_id_serde() {
        let root = RootId::parse(&"a1".repeat(ROOT_ID_HEX_LEN / 2)).unwrap();
        let enc = serde_json::to_string(&root).unwrap();
        assert_eq!(format!("\"{root}\""), enc);
        let dec: RootId = serde_json::from_str(&enc).unwrap();
        assert_eq!(root, dec);
    }
}
