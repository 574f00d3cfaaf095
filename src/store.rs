//! Key-value store trait
//!
//! The ledger persists nothing itself. It needs scalar get/set/delete,
//! hash-field get/set/delete/length, and an optimistic primitive: [`watch`]
//! a key, then [`exec_watched`] a batch of writes that is applied only if the
//! key has not been modified since the watch was taken.
//!
//! [`watch`]: KeyValueStore::watch
//! [`exec_watched`]: KeyValueStore::exec_watched

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Error raised by the store client
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached
    #[error("Connection error: {0}")]
    Connection(Box<str>),
    /// Unexpected reply
    #[error("Protocol error: {0}")]
    Protocol(Box<str>),
    /// Scalar operation on a hash, or the reverse
    #[error("Wrong type for key '{0}'")]
    WrongType(Box<str>),
}

/// Acknowledgement for a write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreReply {
    /// Plain acknowledgement (scalar set)
    Ok,
    /// Integer reply (fields created, entries deleted)
    Count(u64),
}

/// Change-tracking handle returned by [`KeyValueStore::watch`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Watch {
    /// Watched key
    pub key: Box<str>,
    /// Modification counter observed when the watch was taken
    pub version: u64,
}

/// Write queued inside a conditional transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxOp {
    /// Set a scalar value
    #[allow(missing_docs)]
    Set { key: Box<str>, value: String },
    /// Delete a key
    #[allow(missing_docs)]
    Del { key: Box<str> },
    /// Set a hash field
    #[allow(missing_docs)]
    HSet { key: Box<str>, field: Box<str>, value: String },
    /// Delete a hash field
    #[allow(missing_docs)]
    HDel { key: Box<str>, field: Box<str> },
}

/// Async key-value client used by the ledger
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Read a scalar value
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    /// Write a scalar value
    async fn set(&self, key: &str, value: String) -> Result<StoreReply, StoreError>;
    /// Delete a key, returning the number of keys removed
    async fn del(&self, key: &str) -> Result<u64, StoreError>;

    /// Read a hash field
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;
    /// Set a hash field, returning the number of fields created
    async fn hset(&self, key: &str, field: &str, value: String) -> Result<u64, StoreError>;
    /// Delete a hash field, returning the number of fields removed
    async fn hdel(&self, key: &str, field: &str) -> Result<u64, StoreError>;
    /// Number of fields in a hash (0 if the key is absent)
    async fn hlen(&self, key: &str) -> Result<u64, StoreError>;

    /// Start tracking modifications of `key`
    async fn watch(&self, key: &str) -> Result<Watch, StoreError>;
    /// Apply `ops` atomically if the watched key is unmodified.
    ///
    /// Returns `None` when the transaction was aborted by a concurrent write.
    async fn exec_watched(
        &self,
        watch: Watch,
        ops: Vec<TxOp>,
    ) -> Result<Option<Vec<StoreReply>>, StoreError>;
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: String) -> Result<StoreReply, StoreError> {
        (**self).set(key, value).await
    }

    async fn del(&self, key: &str) -> Result<u64, StoreError> {
        (**self).del(key).await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        (**self).hget(key, field).await
    }

    async fn hset(&self, key: &str, field: &str, value: String) -> Result<u64, StoreError> {
        (**self).hset(key, field, value).await
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<u64, StoreError> {
        (**self).hdel(key, field).await
    }

    async fn hlen(&self, key: &str) -> Result<u64, StoreError> {
        (**self).hlen(key).await
    }

    async fn watch(&self, key: &str) -> Result<Watch, StoreError> {
        (**self).watch(key).await
    }

    async fn exec_watched(
        &self,
        watch: Watch,
        ops: Vec<TxOp>,
    ) -> Result<Option<Vec<StoreReply>>, StoreError> {
        (**self).exec_watched(watch, ops).await
    }
}

#[derive(Clone, Debug)]
enum StoredValue {
    Scalar(String),
    Hash(HashMap<Box<str>, String>),
}

#[derive(Default)]
struct Inner {
    keep_empty_hashes: bool,
    values: HashMap<Box<str>, StoredValue>,
    // Bumped on every write, including deletes; never removed so that a
    // delete-then-recreate is still observed by an outstanding watch.
    versions: HashMap<Box<str>, u64>,
}

impl Inner {
    fn touch(&mut self, key: &str) {
        *self.versions.entry(key.into()).or_insert(0) += 1;
    }

    fn version(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn hash(&self, key: &str) -> Result<Option<&HashMap<Box<str>, String>>, StoreError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(StoredValue::Hash(hash)) => Ok(Some(hash)),
            Some(StoredValue::Scalar(_)) => Err(StoreError::WrongType(key.into())),
        }
    }

    fn apply(&mut self, op: TxOp) -> Result<StoreReply, StoreError> {
        match op {
            TxOp::Set { key, value } => {
                self.touch(&key);
                self.values.insert(key, StoredValue::Scalar(value));
                Ok(StoreReply::Ok)
            }
            TxOp::Del { key } => {
                let removed = self.values.remove(&key).is_some();
                if removed {
                    self.touch(&key);
                }
                Ok(StoreReply::Count(u64::from(removed)))
            }
            TxOp::HSet { key, field, value } => {
                self.hash(&key)?;
                self.touch(&key);
                let entry = self
                    .values
                    .entry(key)
                    .or_insert_with(|| StoredValue::Hash(HashMap::new()));
                let created = match entry {
                    StoredValue::Hash(hash) => hash.insert(field, value).is_none(),
                    StoredValue::Scalar(_) => false,
                };
                Ok(StoreReply::Count(u64::from(created)))
            }
            TxOp::HDel { key, field } => {
                self.hash(&key)?;
                let (removed, now_empty) = match self.values.get_mut(&key) {
                    Some(StoredValue::Hash(hash)) => {
                        let removed = hash.remove(&field).is_some();
                        (removed, hash.is_empty())
                    }
                    _ => (false, false),
                };
                if now_empty && !self.keep_empty_hashes {
                    self.values.remove(&key);
                }
                if removed {
                    self.touch(&key);
                }
                Ok(StoreReply::Count(u64::from(removed)))
            }
        }
    }
}

/// In-memory store for testing and embedding
pub struct InMemoryStore {
    data: RwLock<Inner>,
}

impl InMemoryStore {
    /// An empty store
    pub fn new() -> Self {
        Self {
            data: RwLock::new(Inner::default()),
        }
    }

    /// A store that keeps a hash key alive after its last field is deleted.
    ///
    /// By default an emptied hash stops existing, as in Redis.
    pub fn keeping_empty_hashes() -> Self {
        Self {
            data: RwLock::new(Inner {
                keep_empty_hashes: true,
                ..Inner::default()
            }),
        }
    }

    /// Whether `key` currently exists
    pub fn contains_key(&self, key: &str) -> bool {
        self.data
            .read()
            .map(|d| d.values.contains_key(key))
            .unwrap_or(false)
    }

    /// Field names of the hash at `key`, sorted
    pub fn fields(&self, key: &str) -> Vec<String> {
        let data = match self.data.read() {
            Ok(data) => data,
            Err(_) => return Vec::new(),
        };
        let mut fields: Vec<String> = match data.values.get(key) {
            Some(StoredValue::Hash(hash)) => hash.keys().map(|f| f.to_string()).collect(),
            _ => Vec::new(),
        };
        fields.sort();
        fields
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>, StoreError> {
        self.data
            .read()
            .map_err(|e| StoreError::Connection(e.to_string().into()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>, StoreError> {
        self.data
            .write()
            .map_err(|e| StoreError::Connection(e.to_string().into()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.read()?.values.get(key) {
            None => Ok(None),
            Some(StoredValue::Scalar(value)) => Ok(Some(value.clone())),
            Some(StoredValue::Hash(_)) => Err(StoreError::WrongType(key.into())),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<StoreReply, StoreError> {
        self.write()?.apply(TxOp::Set {
            key: key.into(),
            value,
        })
    }

    async fn del(&self, key: &str) -> Result<u64, StoreError> {
        match self.write()?.apply(TxOp::Del { key: key.into() })? {
            StoreReply::Count(n) => Ok(n),
            StoreReply::Ok => Ok(0),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let data = self.read()?;
        Ok(data.hash(key)?.and_then(|hash| hash.get(field).cloned()))
    }

    async fn hset(&self, key: &str, field: &str, value: String) -> Result<u64, StoreError> {
        let reply = self.write()?.apply(TxOp::HSet {
            key: key.into(),
            field: field.into(),
            value,
        })?;
        Ok(match reply {
            StoreReply::Count(n) => n,
            StoreReply::Ok => 0,
        })
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<u64, StoreError> {
        let reply = self.write()?.apply(TxOp::HDel {
            key: key.into(),
            field: field.into(),
        })?;
        Ok(match reply {
            StoreReply::Count(n) => n,
            StoreReply::Ok => 0,
        })
    }

    async fn hlen(&self, key: &str) -> Result<u64, StoreError> {
        let data = self.read()?;
        Ok(data.hash(key)?.map(|hash| hash.len() as u64).unwrap_or(0))
    }

    async fn watch(&self, key: &str) -> Result<Watch, StoreError> {
        let data = self.read()?;
        Ok(Watch {
            key: key.into(),
            version: data.version(key),
        })
    }

    async fn exec_watched(
        &self,
        watch: Watch,
        ops: Vec<TxOp>,
    ) -> Result<Option<Vec<StoreReply>>, StoreError> {
        let mut data = self.write()?;
        if data.version(&watch.key) != watch.version {
            return Ok(None);
        }
        let mut replies = Vec::with_capacity(ops.len());
        for op in ops {
            replies.push(data.apply(op)?);
        }
        Ok(Some(replies))
    }
}
