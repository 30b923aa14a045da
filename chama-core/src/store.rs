//! Per-device local store.
//!
//! # Storage layout
//!
//! ```text
//! ~/.chama/
//!   store/
//!     <collection>/
//!       <key>.yaml      (one file per entity — mode 0600)
//! ```
//!
//! # API pattern
//!
//! Path helpers come in two forms:
//! - `fn_at(home: &Path, …)` — explicit home; used in tests with `TempDir`
//! - `fn(…)` — derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Every write goes through `.yaml.tmp` + `rename`, so a single-entity
//! operation is atomic on disk. Read-modify-write sequences are serialized by
//! the store lock through [`LocalStore::modify`].

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::StoreError;
use crate::types::{Collection, Entity};

// ---------------------------------------------------------------------------
// 1. Contract
// ---------------------------------------------------------------------------

/// Durable keyed storage for every [`Collection`].
pub trait LocalStore: Send + Sync {
    /// Insert a new entity. Fails with [`StoreError::AlreadyExists`].
    fn insert<E: Entity>(&self, entity: &E) -> Result<(), StoreError>;

    /// Replace an existing entity. Fails with [`StoreError::NotFound`].
    fn update<E: Entity>(&self, entity: &E) -> Result<(), StoreError>;

    /// Remove an entity; returns whether it existed.
    fn delete(&self, collection: Collection, key: &str) -> Result<bool, StoreError>;

    fn get<E: Entity>(&self, collection: Collection, key: &str) -> Result<Option<E>, StoreError>;

    /// Every entity of a collection, ordered by key.
    fn list<E: Entity>(&self, collection: Collection) -> Result<Vec<E>, StoreError>;

    /// Entities whose local mutations have not been acknowledged remotely.
    fn list_unsynced<E: Entity>(&self, collection: Collection) -> Result<Vec<E>, StoreError> {
        Ok(self
            .list::<E>(collection)?
            .into_iter()
            .filter(|e| !e.sync_flag())
            .collect())
    }

    /// Lookup by canonical key (falls back to nothing; callers try the
    /// provisional key themselves).
    fn find_by_canonical<E: Entity>(
        &self,
        collection: Collection,
        canonical: &str,
    ) -> Result<Option<E>, StoreError> {
        Ok(self
            .list::<E>(collection)?
            .into_iter()
            .find(|e| e.canonical_key().as_deref() == Some(canonical)))
    }

    /// Atomic read-modify-write of one entity.
    ///
    /// `f` receives the current value (if any) and returns the value to write
    /// (`None` leaves the store untouched) plus a result for the caller. An
    /// error from `f` aborts without writing.
    fn modify<E, R, Err, F>(&self, collection: Collection, key: &str, f: F) -> Result<R, Err>
    where
        E: Entity,
        Err: From<StoreError>,
        F: FnOnce(Option<E>) -> Result<(Option<E>, R), Err>;
}

// ---------------------------------------------------------------------------
// 2. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.chama/` — pure, no I/O.
pub fn chama_root(home: &Path) -> PathBuf {
    home.join(".chama")
}

/// `<home>/.chama/store/` — pure, no I/O.
pub fn store_root_at(home: &Path) -> PathBuf {
    chama_root(home).join("store")
}

/// `<home>/.chama/store/` (convenience, uses `dirs::home_dir()`).
pub fn store_root() -> Result<PathBuf, StoreError> {
    Ok(store_root_at(&home()?))
}

/// `<root>/<collection>/<key>.yaml` — pure, no I/O.
pub fn entity_path(root: &Path, collection: Collection, key: &str) -> PathBuf {
    root.join(collection.name()).join(format!("{key}.yaml"))
}

// ---------------------------------------------------------------------------
// 3. File-backed store
// ---------------------------------------------------------------------------

/// One YAML file per entity under a store root.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// Open (and create) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
            set_dir_permissions(&root)?;
        }
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    /// Store at `<home>/.chama/store/`.
    pub fn open_at(home: &Path) -> Result<Self, StoreError> {
        Self::new(store_root_at(home))
    }

    /// `open_at` convenience wrapper.
    pub fn open() -> Result<Self, StoreError> {
        Self::open_at(&home()?)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, collection: Collection) -> Result<PathBuf, StoreError> {
        let dir = self.root.join(collection.name());
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
            set_dir_permissions(&dir)?;
        }
        Ok(dir)
    }

    fn read<E: Entity>(&self, collection: Collection, key: &str) -> Result<Option<E>, StoreError> {
        let path = entity_path(&self.root, collection, key);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        serde_yaml::from_str(&contents)
            .map(Some)
            .map_err(|e| StoreError::Parse { path, source: e })
    }

    /// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
    fn write<E: Entity>(&self, entity: &E) -> Result<(), StoreError> {
        let collection = entity.collection();
        let key = entity.key();
        let dir = self.collection_dir(collection)?;
        let path = dir.join(format!("{key}.yaml"));
        let tmp_path = dir.join(format!("{key}.yaml.tmp"));

        let yaml = serde_yaml::to_string(entity)?;
        std::fs::write(&tmp_path, yaml)?;
        set_file_permissions(&tmp_path)?;
        std::fs::rename(&tmp_path, &path)?;
        tracing::debug!(collection = %collection, key = %key, "stored entity");
        Ok(())
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>, StoreError> {
        self.lock.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl LocalStore for FileStore {
    fn insert<E: Entity>(&self, entity: &E) -> Result<(), StoreError> {
        let _guard = self.guard()?;
        let path = entity_path(&self.root, entity.collection(), &entity.key());
        if path.exists() {
            return Err(StoreError::AlreadyExists {
                collection: entity.collection().name().to_string(),
                key: entity.key(),
            });
        }
        self.write(entity)
    }

    fn update<E: Entity>(&self, entity: &E) -> Result<(), StoreError> {
        let _guard = self.guard()?;
        let path = entity_path(&self.root, entity.collection(), &entity.key());
        if !path.exists() {
            return Err(StoreError::NotFound {
                collection: entity.collection().name().to_string(),
                key: entity.key(),
            });
        }
        self.write(entity)
    }

    fn delete(&self, collection: Collection, key: &str) -> Result<bool, StoreError> {
        let _guard = self.guard()?;
        let path = entity_path(&self.root, collection, key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn get<E: Entity>(&self, collection: Collection, key: &str) -> Result<Option<E>, StoreError> {
        let _guard = self.guard()?;
        self.read(collection, key)
    }

    fn list<E: Entity>(&self, collection: Collection) -> Result<Vec<E>, StoreError> {
        let _guard = self.guard()?;
        let dir = self.root.join(collection.name());
        if !dir.exists() {
            return Ok(vec![]);
        }

        let mut entries: Vec<_> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .collect();
        entries.sort_by_key(|e| e.file_name());

        let mut result = Vec::new();
        for entry in entries {
            let fname = entry.file_name();
            let name = fname.to_string_lossy();
            if !name.ends_with(".yaml") {
                continue;
            }
            let contents = std::fs::read_to_string(entry.path())?;
            let entity: E = serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse {
                path: entry.path(),
                source: e,
            })?;
            result.push(entity);
        }
        Ok(result)
    }

    fn modify<E, R, Err, F>(&self, collection: Collection, key: &str, f: F) -> Result<R, Err>
    where
        E: Entity,
        Err: From<StoreError>,
        F: FnOnce(Option<E>) -> Result<(Option<E>, R), Err>,
    {
        let _guard = self.guard()?;
        let current = self.read::<E>(collection, key)?;
        let (next, result) = f(current)?;
        if let Some(next) = next {
            self.write(&next)?;
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

pub(crate) fn home() -> Result<PathBuf, StoreError> {
    dirs::home_dir().ok_or(StoreError::HomeNotFound)
}

#[cfg(unix)]
pub(crate) fn set_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
pub(crate) fn set_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
pub(crate) fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
pub(crate) fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityKind, FinancialRecord, ProvisionalId, RecordStatus, UserId};
    use chrono::Utc;
    use tempfile::TempDir;

    fn record(id: &str) -> FinancialRecord {
        let now = Utc::now();
        FinancialRecord {
            provisional_id: ProvisionalId::from(id),
            canonical_id: None,
            kind: EntityKind::Borrowing,
            status: RecordStatus::Pending,
            amount: 5000,
            created_by: UserId::from("alice"),
            notes: None,
            related_to: None,
            sync_flag: false,
            created_at: now,
            updated_at: now,
        }
    }

    const BORROWINGS: Collection = Collection::Records(EntityKind::Borrowing);

    #[test]
    fn entity_path_is_correct() {
        let home = TempDir::new().expect("tempdir");
        let path = entity_path(&store_root_at(home.path()), BORROWINGS, "p1");
        assert!(path.ends_with(".chama/store/borrowings/p1.yaml"));
    }

    #[test]
    fn store_dir_created_with_perms() {
        let home = TempDir::new().expect("tempdir");
        let store = FileStore::open_at(home.path()).expect("open");
        assert!(store.root().exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(store.root()).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o700);
        }
    }

    #[test]
    fn insert_and_get_roundtrip() {
        let home = TempDir::new().expect("tempdir");
        let store = FileStore::open_at(home.path()).expect("open");
        let rec = record("p1");
        store.insert(&rec).expect("insert");
        let loaded: FinancialRecord = store.get(BORROWINGS, "p1").expect("get").expect("present");
        assert_eq!(loaded, rec);
    }

    #[test]
    fn insert_twice_is_rejected() {
        let home = TempDir::new().expect("tempdir");
        let store = FileStore::open_at(home.path()).expect("open");
        store.insert(&record("p1")).expect("insert");
        let err = store.insert(&record("p1")).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[test]
    fn update_missing_is_not_found() {
        let home = TempDir::new().expect("tempdir");
        let store = FileStore::open_at(home.path()).expect("open");
        let err = store.update(&record("ghost")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn atomic_write_cleans_up_tmp() {
        let home = TempDir::new().expect("tempdir");
        let store = FileStore::open_at(home.path()).expect("open");
        store.insert(&record("p1")).expect("insert");
        let tmp = entity_path(store.root(), BORROWINGS, "p1").with_file_name("p1.yaml.tmp");
        assert!(!tmp.exists(), ".tmp must be gone after successful save");
    }

    #[test]
    fn list_unsynced_filters_synced_entities() {
        let home = TempDir::new().expect("tempdir");
        let store = FileStore::open_at(home.path()).expect("open");
        let mut synced = record("a");
        synced.sync_flag = true;
        store.insert(&synced).expect("insert");
        store.insert(&record("b")).expect("insert");

        let unsynced: Vec<FinancialRecord> = store.list_unsynced(BORROWINGS).expect("list");
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].provisional_id.0, "b");
    }

    #[test]
    fn modify_error_leaves_entity_untouched() {
        let home = TempDir::new().expect("tempdir");
        let store = FileStore::open_at(home.path()).expect("open");
        store.insert(&record("p1")).expect("insert");

        let result: Result<(), StoreError> =
            store.modify(BORROWINGS, "p1", |current: Option<FinancialRecord>| {
                assert!(current.is_some());
                Err(StoreError::Poisoned)
            });
        assert!(result.is_err());
        let loaded: FinancialRecord = store.get(BORROWINGS, "p1").unwrap().unwrap();
        assert_eq!(loaded.amount, 5000);
    }

    #[test]
    fn concurrent_modify_loses_no_update() {
        let home = TempDir::new().expect("tempdir");
        let store = FileStore::open_at(home.path()).expect("open");
        let mut seed = record("p1");
        seed.amount = 0;
        store.insert(&seed).expect("insert");

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        store
                            .modify::<FinancialRecord, _, StoreError, _>(BORROWINGS, "p1", |current| {
                                let mut next = current.expect("present");
                                next.amount += 1;
                                Ok((Some(next), ()))
                            })
                            .expect("modify");
                    }
                });
            }
        });

        let loaded: FinancialRecord = store.get(BORROWINGS, "p1").unwrap().unwrap();
        assert_eq!(loaded.amount, 200);
    }

    #[test]
    fn delete_reports_presence() {
        let home = TempDir::new().expect("tempdir");
        let store = FileStore::open_at(home.path()).expect("open");
        store.insert(&record("p1")).expect("insert");
        assert!(store.delete(BORROWINGS, "p1").expect("delete"));
        assert!(!store.delete(BORROWINGS, "p1").expect("delete again"));
    }

    #[test]
    fn list_empty_when_collection_missing() {
        let home = TempDir::new().expect("tempdir");
        let store = FileStore::open_at(home.path()).expect("open");
        let list: Vec<FinancialRecord> = store.list(BORROWINGS).expect("list");
        assert!(list.is_empty());
    }

    #[test]
    fn home_not_found_error_message() {
        assert!(StoreError::HomeNotFound.to_string().contains("home directory"));
    }
}
