//! In-memory [`LocalStore`], for ephemeral sessions and tests.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;

use crate::error::StoreError;
use crate::store::LocalStore;
use crate::types::{Collection, Entity};

type Table = BTreeMap<(Collection, String), Value>;

/// Entities kept as JSON values keyed by `(collection, key)`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Table>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> Result<MutexGuard<'_, Table>, StoreError> {
        self.entries.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn decode<E: Entity>(value: &Value) -> Result<E, StoreError> {
    Ok(serde_json::from_value(value.clone())?)
}

impl LocalStore for MemoryStore {
    fn insert<E: Entity>(&self, entity: &E) -> Result<(), StoreError> {
        let mut entries = self.guard()?;
        let slot = (entity.collection(), entity.key());
        if entries.contains_key(&slot) {
            return Err(StoreError::AlreadyExists {
                collection: slot.0.name().to_string(),
                key: slot.1,
            });
        }
        entries.insert(slot, serde_json::to_value(entity)?);
        Ok(())
    }

    fn update<E: Entity>(&self, entity: &E) -> Result<(), StoreError> {
        let mut entries = self.guard()?;
        let slot = (entity.collection(), entity.key());
        if !entries.contains_key(&slot) {
            return Err(StoreError::NotFound {
                collection: slot.0.name().to_string(),
                key: slot.1,
            });
        }
        entries.insert(slot, serde_json::to_value(entity)?);
        Ok(())
    }

    fn delete(&self, collection: Collection, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .guard()?
            .remove(&(collection, key.to_string()))
            .is_some())
    }

    fn get<E: Entity>(&self, collection: Collection, key: &str) -> Result<Option<E>, StoreError> {
        self.guard()?
            .get(&(collection, key.to_string()))
            .map(decode)
            .transpose()
    }

    fn list<E: Entity>(&self, collection: Collection) -> Result<Vec<E>, StoreError> {
        self.guard()?
            .iter()
            .filter(|((c, _), _)| *c == collection)
            .map(|(_, value)| decode(value))
            .collect()
    }

    fn modify<E, R, Err, F>(&self, collection: Collection, key: &str, f: F) -> Result<R, Err>
    where
        E: Entity,
        Err: From<StoreError>,
        F: FnOnce(Option<E>) -> Result<(Option<E>, R), Err>,
    {
        let mut entries = self.guard()?;
        let slot = (collection, key.to_string());
        let current = entries.get(&slot).map(decode::<E>).transpose()?;
        let (next, result) = f(current)?;
        if let Some(next) = next {
            let value = serde_json::to_value(&next).map_err(StoreError::from)?;
            entries.insert((next.collection(), next.key()), value);
        }
        Ok(result)
    }
}
