//! Remote document codec.
//!
//! A document is the entity's JSON object with `sync_flag` removed. Keys are
//! ordered (`serde_json::Map` is a `BTreeMap`), so the serialized form of a
//! document is deterministic and its SHA-256 digest is a content identity.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use chama_core::types::{Collection, Entity};

use crate::error::SyncError;

/// A remote document: field name → JSON value.
pub type Document = Map<String, Value>;

const SYNC_FLAG: &str = "sync_flag";

/// Remote form of `entity`.
pub fn to_document<E: Entity>(entity: &E) -> Result<Document, SyncError> {
    match serde_json::to_value(entity)? {
        Value::Object(mut map) => {
            map.remove(SYNC_FLAG);
            Ok(map)
        }
        other => Err(SyncError::MalformedDocument {
            collection: entity.collection().name().to_string(),
            key: entity.key(),
            reason: format!("expected an object, got {other}"),
        }),
    }
}

/// Decode a remote document received for `collection`/`key`.
///
/// The result is marked synced: it is, by definition, what the remote holds.
pub fn from_document<E: Entity>(
    collection: Collection,
    key: &str,
    document: &Document,
) -> Result<E, SyncError> {
    let malformed = |reason: String| SyncError::MalformedDocument {
        collection: collection.name().to_string(),
        key: key.to_string(),
        reason,
    };

    let mut map = document.clone();
    map.insert(SYNC_FLAG.to_string(), Value::Bool(true));
    let entity: E = serde_json::from_value(Value::Object(map)).map_err(|e| malformed(e.to_string()))?;

    if entity.collection() != collection {
        return Err(malformed(format!(
            "belongs to {}",
            entity.collection().name()
        )));
    }
    if entity.key() != key {
        return Err(malformed(format!("carries key {}", entity.key())));
    }
    Ok(entity)
}

/// Hex SHA-256 of the document's serialized form.
pub fn digest(document: &Document) -> Result<String, SyncError> {
    let bytes = serde_json::to_vec(document)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}
