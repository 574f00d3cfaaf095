//! The compensation ledger
//!
//! `add` records how to undo a step, `run` invokes the recorded compensation
//! and deletes it on success, `remove` drops it once it is no longer needed.
//! Every call first resolves an [`Address`] from the instance's
//! [`AddressingMode`]; the rest of the algorithm only looks at the address.

use crate::record::{self, CompensationRecord};
use crate::stats::LedgerStats;
use crate::{
    ActionRegistry, Address, AddressingMode, CompensatingAction, KeyValueStore, LedgerConfig,
    LedgerError, LedgerKey, LedgerObserver, LedgerStatsSnapshot, RecordFailure, RetainPolicy,
    ServiceKey, StoreReply, TracingObserver, TxOp,
};
use futures::future::join_all;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Result of a successful `run`
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutput {
    /// Result of the single recorded action
    Single(Value),
    /// Results of every recorded action, in list order
    Batch(Vec<Value>),
}

impl RunOutput {
    /// All results, in list order
    pub fn into_values(self) -> Vec<Value> {
        match self {
            Self::Single(value) => vec![value],
            Self::Batch(values) => values,
        }
    }

    /// The result of a single-record run
    pub fn as_single(&self) -> Option<&Value> {
        match self {
            Self::Single(value) => Some(value),
            Self::Batch(_) => None,
        }
    }
}

/// What `settle` left in a record list field
enum Settled {
    /// The field is gone
    Removed,
    /// Records appended meanwhile were written back
    Retained(usize),
    /// Every rewrite attempt lost to a concurrent writer
    Conflicted,
}

/// Durable ledger of pending compensations
pub struct CompensationLedger<S> {
    store: S,
    config: LedgerConfig,
    mode: AddressingMode,
    actions: RwLock<Arc<ActionRegistry>>,
    observer: Arc<dyn LedgerObserver>,
    stats: Arc<LedgerStats>,
}

impl<S: KeyValueStore> CompensationLedger<S> {
    /// Create a ledger over an already-connected store
    pub fn new(config: LedgerConfig, store: S, actions: ActionRegistry) -> Self {
        let mode = AddressingMode::resolve(&config);
        tracing::debug!(mode = mode.name(), actions = actions.len(), "Compensation ledger created");
        Self {
            store,
            config,
            mode,
            actions: RwLock::new(Arc::new(actions)),
            observer: Arc::new(TracingObserver),
            stats: Arc::new(LedgerStats::new()),
        }
    }

    /// Replace the default [`TracingObserver`]
    pub fn with_observer(mut self, observer: Arc<dyn LedgerObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Addressing mode resolved at construction
    pub fn mode(&self) -> &AddressingMode {
        &self.mode
    }

    /// Configuration the ledger was built with
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Underlying store client
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Current counter values
    pub fn stats(&self) -> LedgerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Snapshot of the registered actions
    pub fn actions(&self) -> Arc<ActionRegistry> {
        match self.actions.read() {
            Ok(actions) => actions.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Swap the whole action registry.
    ///
    /// Runs already in flight keep the registry they started with.
    pub fn replace_actions(&self, actions: ActionRegistry) {
        let mut current = self.actions.write().unwrap_or_else(|e| e.into_inner());
        *current = Arc::new(actions);
    }

    /// Register or replace one action
    pub fn register_action(&self, name: impl Into<Box<str>>, action: impl CompensatingAction) {
        let mut current = self.actions.write().unwrap_or_else(|e| e.into_inner());
        Arc::make_mut(&mut *current).register(name, action);
    }

    /// Record a compensation.
    ///
    /// `service_key` must be `Some` exactly when the service key is injected
    /// per call. The action name is not checked against the registry until
    /// `run`.
    pub async fn add(
        &self,
        key: &str,
        service_key: Option<&str>,
        action: &str,
        parameters: Vec<Value>,
    ) -> Result<StoreReply, LedgerError> {
        self.add_record(key, service_key, CompensationRecord::new(action, parameters))
            .await
    }

    /// [`add`](Self::add) with a prebuilt record
    pub async fn add_record(
        &self,
        key: &str,
        service_key: Option<&str>,
        record: CompensationRecord,
    ) -> Result<StoreReply, LedgerError> {
        let address = self.mode.address(key, service_key)?;
        let reply = match &address {
            Address::Key { key } => {
                let raw = record.encode().map_err(LedgerError::Encode)?;
                self.store.set(key.as_str(), raw).await?
            }
            Address::Field { key, service_key } => {
                let raw = record.encode().map_err(LedgerError::Encode)?;
                let created = self
                    .store
                    .hset(key.as_str(), service_key.as_str(), raw)
                    .await?;
                StoreReply::Count(created)
            }
            Address::FieldList { key, service_key } => {
                self.append(&address, key, service_key, &record).await?
            }
        };

        LedgerStats::incr(&self.stats.records_added);
        self.observer.on_record_added(&address, &record.action);
        Ok(reply)
    }

    /// Watch, read, append, write conditionally; retried on conflict.
    async fn append(
        &self,
        address: &Address,
        key: &LedgerKey,
        service_key: &ServiceKey,
        record: &CompensationRecord,
    ) -> Result<StoreReply, LedgerError> {
        let policy = &self.config.append_retry;
        let max_attempts = policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let watch = self.store.watch(key.as_str()).await?;
            let existing = self.store.hget(key.as_str(), service_key.as_str()).await?;
            let raw = record::append_encoded(existing.as_deref(), record).map_err(|source| {
                LedgerError::Decode {
                    key: key.clone(),
                    source,
                }
            })?;

            let ops = vec![TxOp::HSet {
                key: key.0.clone(),
                field: service_key.0.clone(),
                value: raw,
            }];
            if let Some(replies) = self.store.exec_watched(watch, ops).await? {
                return Ok(replies.into_iter().next().unwrap_or(StoreReply::Ok));
            }

            LedgerStats::incr(&self.stats.append_conflicts);
            self.observer.on_append_conflict(address, attempt);
            if attempt < max_attempts {
                tokio::time::sleep(policy.backoff(attempt)).await;
            }
        }

        Err(LedgerError::AppendConflict {
            key: key.clone(),
            service_key: service_key.clone(),
            attempts: max_attempts,
        })
    }

    /// Invoke the recorded compensation(s) and delete them on success.
    ///
    /// On failure the entry is left in place for a later retry.
    pub async fn run(&self, key: &str, service_key: Option<&str>) -> Result<RunOutput, LedgerError> {
        let address = self.mode.address(key, service_key)?;
        let actions = self.actions();

        let raw = self.read(&address).await?.ok_or_else(|| LedgerError::NotFound {
            key: address.key().clone(),
            service_key: address.service_key().cloned(),
        })?;

        match &address {
            Address::Key { .. } | Address::Field { .. } => self
                .run_single(&address, &raw, &actions)
                .await
                .map(RunOutput::Single),
            Address::FieldList { key, service_key } => self
                .run_batch(&address, key, service_key, &raw, &actions)
                .await
                .map(RunOutput::Batch),
        }
    }

    async fn run_single(
        &self,
        address: &Address,
        raw: &str,
        actions: &ActionRegistry,
    ) -> Result<Value, LedgerError> {
        let record = CompensationRecord::decode(raw).map_err(|source| LedgerError::Decode {
            key: address.key().clone(),
            source,
        })?;
        let action = actions
            .get(&record.action)
            .ok_or_else(|| LedgerError::UnknownAction {
                action: record.action.clone(),
            })?;

        LedgerStats::incr(&self.stats.runs_started);
        LedgerStats::incr(&self.stats.actions_invoked);
        self.observer.on_run_started(address, 1);
        let started = Instant::now();

        match action.compensate(record.parameters).await {
            Ok(result) => {
                self.delete(address).await?;
                if address.service_key().is_some() {
                    self.compact_after_success(address).await;
                }
                LedgerStats::incr(&self.stats.runs_completed);
                self.observer
                    .on_run_completed(address, 1, started.elapsed().as_millis() as u64);
                Ok(result)
            }
            Err(error) => {
                LedgerStats::incr(&self.stats.runs_failed);
                LedgerStats::incr(&self.stats.actions_failed);
                self.observer.on_run_failed(address, &record.action, &error);
                Err(LedgerError::Action {
                    action: record.action,
                    source: error,
                })
            }
        }
    }

    async fn run_batch(
        &self,
        address: &Address,
        key: &LedgerKey,
        service_key: &ServiceKey,
        raw: &str,
        actions: &ActionRegistry,
    ) -> Result<Vec<Value>, LedgerError> {
        let records = record::decode_list(raw).map_err(|source| LedgerError::Decode {
            key: key.clone(),
            source,
        })?;
        // Every action must resolve before any of them runs
        let resolved = records
            .iter()
            .map(|record| {
                actions
                    .get(&record.action)
                    .ok_or_else(|| LedgerError::UnknownAction {
                        action: record.action.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        LedgerStats::incr(&self.stats.runs_started);
        self.observer.on_run_started(address, records.len());
        let started = Instant::now();

        let outcomes = join_all(records.iter().zip(&resolved).map(|(record, action)| {
            LedgerStats::incr(&self.stats.actions_invoked);
            action.compensate(record.parameters.clone())
        }))
        .await;

        let mut results = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        let mut succeeded = Vec::new();
        for (index, (record, outcome)) in records.into_iter().zip(outcomes).enumerate() {
            match outcome {
                Ok(result) => {
                    results.push(result);
                    succeeded.push(record);
                }
                Err(error) => {
                    LedgerStats::incr(&self.stats.actions_failed);
                    self.observer.on_run_failed(address, &record.action, &error);
                    failures.push(RecordFailure {
                        index,
                        action: record.action,
                        error,
                    });
                }
            }
        }

        if failures.is_empty() {
            match self.settle(address, key, service_key, &succeeded).await? {
                Settled::Removed => self.compact_after_success(address).await,
                Settled::Retained(late) => tracing::debug!(
                    key = %key,
                    service_key = %service_key,
                    late,
                    "Kept compensations appended during the run"
                ),
                Settled::Conflicted => {}
            }
            LedgerStats::incr(&self.stats.runs_completed);
            self.observer
                .on_run_completed(address, results.len(), started.elapsed().as_millis() as u64);
            return Ok(results);
        }

        LedgerStats::incr(&self.stats.runs_failed);
        if self.config.retain_on_failure == RetainPolicy::FailedOnly && !succeeded.is_empty() {
            if let Err(error) = self.settle(address, key, service_key, &succeeded).await {
                tracing::warn!(
                    key = %key,
                    service_key = %service_key,
                    error = %error,
                    "Could not drop succeeded compensations; retaining all"
                );
            }
        }

        Err(LedgerError::Batch {
            key: key.clone(),
            service_key: service_key.clone(),
            failures,
            succeeded: succeeded.len(),
        })
    }

    /// Remove the records that ran from a record list.
    ///
    /// Works on a freshly read list under watch, so records appended while
    /// the actions ran are kept. Each executed record removes one equal entry.
    /// If every attempt conflicts the list is left as it is.
    async fn settle(
        &self,
        address: &Address,
        key: &LedgerKey,
        service_key: &ServiceKey,
        executed: &[CompensationRecord],
    ) -> Result<Settled, LedgerError> {
        let policy = &self.config.append_retry;
        let max_attempts = policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let watch = self.store.watch(key.as_str()).await?;
            let Some(raw) = self.store.hget(key.as_str(), service_key.as_str()).await? else {
                return Ok(Settled::Removed);
            };
            let mut remaining = record::decode_list(&raw).map_err(|source| LedgerError::Decode {
                key: key.clone(),
                source,
            })?;
            for done in executed {
                if let Some(pos) = remaining.iter().position(|r| r == done) {
                    remaining.remove(pos);
                }
            }

            let (op, settled) = if remaining.is_empty() {
                let op = TxOp::HDel {
                    key: key.0.clone(),
                    field: service_key.0.clone(),
                };
                (op, Settled::Removed)
            } else {
                let op = TxOp::HSet {
                    key: key.0.clone(),
                    field: service_key.0.clone(),
                    value: record::encode_list(&remaining).map_err(LedgerError::Encode)?,
                };
                (op, Settled::Retained(remaining.len()))
            };
            if self.store.exec_watched(watch, vec![op]).await?.is_some() {
                return Ok(settled);
            }

            LedgerStats::incr(&self.stats.append_conflicts);
            self.observer.on_append_conflict(address, attempt);
            if attempt < max_attempts {
                tokio::time::sleep(policy.backoff(attempt)).await;
            }
        }

        tracing::warn!(
            key = %key,
            service_key = %service_key,
            attempts = max_attempts,
            "Record list kept changing; executed compensations left in place"
        );
        Ok(Settled::Conflicted)
    }

    /// Delete a whole entry or one service key's field.
    ///
    /// Absent entries are not an error; the returned count is then 0. The
    /// container is only compacted when `compact_on_remove` is set.
    pub async fn remove(&self, key: &str, service_key: Option<&str>) -> Result<u64, LedgerError> {
        let key = LedgerKey::new(key);
        let address = match service_key {
            Some(service_key) => Address::Field {
                key,
                service_key: ServiceKey::new(service_key),
            },
            None => Address::Key { key },
        };

        let removed = self.delete(&address).await?;
        if removed > 0 {
            LedgerStats::incr(&self.stats.entries_removed);
        }
        self.observer.on_entry_removed(&address, removed);

        if self.config.compact_on_remove && address.service_key().is_some() {
            self.compact_after_success(&address).await;
        }
        Ok(removed)
    }

    async fn read(&self, address: &Address) -> Result<Option<String>, LedgerError> {
        let raw = match address {
            Address::Key { key } => self.store.get(key.as_str()).await?,
            Address::Field { key, service_key } | Address::FieldList { key, service_key } => {
                self.store.hget(key.as_str(), service_key.as_str()).await?
            }
        };
        Ok(raw)
    }

    async fn delete(&self, address: &Address) -> Result<u64, LedgerError> {
        let removed = match address {
            Address::Key { key } => self.store.del(key.as_str()).await?,
            Address::Field { key, service_key } | Address::FieldList { key, service_key } => {
                self.store.hdel(key.as_str(), service_key.as_str()).await?
            }
        };
        Ok(removed)
    }

    /// [`compact`](Self::compact) once the entry itself is already gone.
    ///
    /// The caller's operation has taken effect by then, so a store error is
    /// logged instead of returned.
    async fn compact_after_success(&self, address: &Address) {
        if let Err(error) = self.compact(address).await {
            tracing::warn!(key = %address.key(), error = %error, "Container compaction failed");
        }
    }

    /// Delete the container key if it has no fields left.
    ///
    /// The delete is conditional on the key being unmodified since the field
    /// count was read, so a concurrent `add` is never swept away.
    async fn compact(&self, address: &Address) -> Result<bool, LedgerError> {
        let key = address.key();
        let watch = self.store.watch(key.as_str()).await?;
        if self.store.hlen(key.as_str()).await? > 0 {
            return Ok(false);
        }

        let ops = vec![TxOp::Del { key: key.0.clone() }];
        match self.store.exec_watched(watch, ops).await? {
            Some(replies) if replies.first() == Some(&StoreReply::Count(1)) => {
                LedgerStats::incr(&self.stats.containers_compacted);
                self.observer.on_container_compacted(address);
                Ok(true)
            }
            // Already gone: the store dropped the emptied hash itself
            Some(_) => Ok(false),
            None => {
                tracing::debug!(key = %key, "Container changed during compaction; kept");
                Ok(false)
            }
        }
    }
}
