//! In-memory store backend for testing and development.
//!
//! Holds hashes, sorted sets and sets behind a single mutex, so every batch
//! and procedure runs as one indivisible unit exactly as a single-threaded
//! store would execute it. Procedures are executed natively; the backend only
//! tracks which handles are loaded so that a store restart can be simulated
//! with [`InMemoryBackend::flush_procedures`].

use crate::backend::{
    BatchGuard, Command, Delivery, Procedure, ProcedureCall, ProcedureHandle, ProcedureReply,
    Reply, ScoreBound, StoreBackend,
};
use crate::clock::{Clock, StoreTime, SystemClock};
use crate::error::BackendError;
use crate::keys::{fr_field, rc_field, QueueKeys, FIELD_TOTALRECV};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::trace;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

const TOPIC_CAPACITY: usize = 64;

// ============================================================================
// Internal Storage Structures
// ============================================================================

#[derive(Debug, Default)]
struct SortedSet {
    ordered: BTreeSet<(i64, String)>,
    scores: HashMap<String, i64>,
}

impl SortedSet {
    /// Insert or rescore; returns true if the member is new
    fn insert(&mut self, member: &str, score: i64) -> bool {
        let previous = self.scores.insert(member.to_string(), score);
        if let Some(old) = previous {
            self.ordered.remove(&(old, member.to_string()));
        }
        self.ordered.insert((score, member.to_string()));
        previous.is_none()
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ordered.remove(&(score, member.to_string()));
                true
            }
            None => false,
        }
    }

    /// Lowest-scored member with score <= max, ties broken by member order
    fn first_due(&self, max: i64) -> Option<String> {
        self.ordered
            .iter()
            .next()
            .filter(|(score, _)| *score <= max)
            .map(|(_, member)| member.clone())
    }

    fn count(&self, min: ScoreBound, max: ScoreBound) -> usize {
        self.ordered
            .iter()
            .filter(|(score, _)| min.admits_min(*score) && max.admits_max(*score))
            .count()
    }

    fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

#[derive(Debug)]
enum Value {
    Hash(HashMap<String, Bytes>),
    SortedSet(SortedSet),
    Set(BTreeSet<String>),
}

impl Value {
    fn is_empty(&self) -> bool {
        match self {
            Self::Hash(hash) => hash.is_empty(),
            Self::SortedSet(zset) => zset.is_empty(),
            Self::Set(set) => set.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Hash,
    SortedSet,
    Set,
}

impl Kind {
    fn of(command: &Command) -> Option<Kind> {
        match command {
            Command::HGet { .. }
            | Command::HMGet { .. }
            | Command::HSet { .. }
            | Command::HIncrBy { .. }
            | Command::HDel { .. } => Some(Kind::Hash),
            Command::ZAdd { .. }
            | Command::ZRem { .. }
            | Command::ZScore { .. }
            | Command::ZCard { .. }
            | Command::ZCount { .. } => Some(Kind::SortedSet),
            Command::SAdd { .. } | Command::SRem { .. } | Command::SMembers { .. } => {
                Some(Kind::Set)
            }
            Command::Del { .. } => None,
        }
    }

    fn matches(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Kind::Hash, Value::Hash(_))
                | (Kind::SortedSet, Value::SortedSet(_))
                | (Kind::Set, Value::Set(_))
        )
    }
}

/// Keyspace plus the procedure registry
#[derive(Debug, Default)]
struct Store {
    data: HashMap<String, Value>,
    procedures: HashMap<ProcedureHandle, Procedure>,
}

impl Store {
    fn wrong_type(key: &str) -> BackendError {
        BackendError::WrongType {
            key: key.to_string(),
        }
    }

    fn hash(&self, key: &str) -> Result<Option<&HashMap<String, Bytes>>, BackendError> {
        match self.data.get(key) {
            None => Ok(None),
            Some(Value::Hash(hash)) => Ok(Some(hash)),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    fn hash_mut(&mut self, key: &str) -> Result<&mut HashMap<String, Bytes>, BackendError> {
        match self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Value::Hash(HashMap::new()))
        {
            Value::Hash(hash) => Ok(hash),
            _ => Err(Self::wrong_type(key)),
        }
    }

    fn zset(&self, key: &str) -> Result<Option<&SortedSet>, BackendError> {
        match self.data.get(key) {
            None => Ok(None),
            Some(Value::SortedSet(zset)) => Ok(Some(zset)),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    fn zset_mut(&mut self, key: &str) -> Result<&mut SortedSet, BackendError> {
        match self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Value::SortedSet(SortedSet::default()))
        {
            Value::SortedSet(zset) => Ok(zset),
            _ => Err(Self::wrong_type(key)),
        }
    }

    fn set_mut(&mut self, key: &str) -> Result<&mut BTreeSet<String>, BackendError> {
        match self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Value::Set(BTreeSet::new()))
        {
            Value::Set(set) => Ok(set),
            _ => Err(Self::wrong_type(key)),
        }
    }

    /// Drop a key whose collection became empty
    fn prune(&mut self, key: &str) {
        if self.data.get(key).is_some_and(Value::is_empty) {
            self.data.remove(key);
        }
    }

    fn read_integer(&self, key: &str, field: &str) -> Result<Option<i64>, BackendError> {
        match self.hash(key)?.and_then(|hash| hash.get(field)) {
            None => Ok(None),
            Some(bytes) => parse_integer(bytes)
                .map(Some)
                .ok_or_else(|| BackendError::CorruptValue {
                    key: format!("{}.{}", key, field),
                    expected: "integer".to_string(),
                }),
        }
    }

    /// Reject a batch that would fail part-way through
    fn check(&self, command: &Command) -> Result<(), BackendError> {
        let key = command.key();
        if let (Some(kind), Some(value)) = (Kind::of(command), self.data.get(key)) {
            if !kind.matches(value) {
                return Err(Self::wrong_type(key));
            }
        }
        if let Command::HIncrBy { key, field, .. } = command {
            self.read_integer(key, field)?;
        }
        Ok(())
    }

    /// Check every command, then apply them in order
    fn apply(&mut self, commands: Vec<Command>) -> Result<Vec<Reply>, BackendError> {
        for command in &commands {
            self.check(command)?;
        }
        trace!(commands = commands.len(), "Applying write batch");
        commands
            .into_iter()
            .map(|command| self.execute(command))
            .collect()
    }

    fn guard_holds(&self, guard: &BatchGuard) -> Result<bool, BackendError> {
        let present = |key: &str, field: &str| -> Result<bool, BackendError> {
            Ok(self.hash(key)?.is_some_and(|hash| hash.contains_key(field)))
        };
        match guard {
            BatchGuard::FieldExists { key, field } => present(key, field),
            BatchGuard::FieldAbsent { key, field } => Ok(!present(key, field)?),
        }
    }

    fn execute(&mut self, command: Command) -> Result<Reply, BackendError> {
        let reply = match command {
            Command::HGet { key, field } => match self.hash(&key)?.and_then(|h| h.get(&field)) {
                Some(value) => Reply::Bulk(value.clone()),
                None => Reply::Nil,
            },
            Command::HMGet { key, fields } => {
                let hash = self.hash(&key)?;
                Reply::Array(
                    fields
                        .iter()
                        .map(|field| match hash.and_then(|h| h.get(field)) {
                            Some(value) => Reply::Bulk(value.clone()),
                            None => Reply::Nil,
                        })
                        .collect(),
                )
            }
            Command::HSet { key, field, value } => {
                let added = self.hash_mut(&key)?.insert(field, value).is_none();
                Reply::Integer(i64::from(added))
            }
            Command::HIncrBy { key, field, by } => {
                let current = self.read_integer(&key, &field)?.unwrap_or(0);
                let next = current + by;
                self.hash_mut(&key)?
                    .insert(field, Bytes::from(next.to_string()));
                Reply::Integer(next)
            }
            Command::HDel { key, fields } => {
                let removed = match self.data.get_mut(&key) {
                    None => 0,
                    Some(Value::Hash(hash)) => {
                        fields.iter().filter(|f| hash.remove(*f).is_some()).count()
                    }
                    Some(_) => return Err(Self::wrong_type(&key)),
                };
                self.prune(&key);
                Reply::Integer(removed as i64)
            }
            Command::ZAdd { key, member, score } => {
                let added = self.zset_mut(&key)?.insert(&member, score);
                Reply::Integer(i64::from(added))
            }
            Command::ZRem { key, member } => {
                let removed = match self.data.get_mut(&key) {
                    None => false,
                    Some(Value::SortedSet(zset)) => zset.remove(&member),
                    Some(_) => return Err(Self::wrong_type(&key)),
                };
                self.prune(&key);
                Reply::Integer(i64::from(removed))
            }
            Command::ZScore { key, member } => {
                match self.zset(&key)?.and_then(|z| z.scores.get(&member)) {
                    Some(score) => Reply::Bulk(Bytes::from(score.to_string())),
                    None => Reply::Nil,
                }
            }
            Command::ZCard { key } => {
                Reply::Integer(self.zset(&key)?.map_or(0, |z| z.scores.len()) as i64)
            }
            Command::ZCount { key, min, max } => {
                Reply::Integer(self.zset(&key)?.map_or(0, |z| z.count(min, max)) as i64)
            }
            Command::SAdd { key, member } => {
                Reply::Integer(i64::from(self.set_mut(&key)?.insert(member)))
            }
            Command::SRem { key, member } => {
                let removed = match self.data.get_mut(&key) {
                    None => false,
                    Some(Value::Set(set)) => set.remove(&member),
                    Some(_) => return Err(Self::wrong_type(&key)),
                };
                self.prune(&key);
                Reply::Integer(i64::from(removed))
            }
            Command::SMembers { key } => match self.data.get(&key) {
                None => Reply::Array(Vec::new()),
                Some(Value::Set(set)) => Reply::Array(
                    set.iter()
                        .map(|member| Reply::Bulk(Bytes::from(member.clone())))
                        .collect(),
                ),
                Some(_) => return Err(Self::wrong_type(&key)),
            },
            Command::Del { key } => Reply::Integer(i64::from(self.data.remove(&key).is_some())),
        };
        Ok(reply)
    }

    // ------------------------------------------------------------------------
    // Procedures
    // ------------------------------------------------------------------------

    fn run(&mut self, call: ProcedureCall) -> Result<ProcedureReply, BackendError> {
        match call {
            ProcedureCall::Receive {
                keys,
                now_ms,
                new_due_ms,
            } => {
                let Some(id) = self.first_due(&keys, now_ms)? else {
                    return Ok(ProcedureReply::Delivered(None));
                };
                let delivery = self.record_delivery(&keys, id, now_ms)?;
                self.zset_mut(&keys.index)?
                    .insert(&delivery.id, new_due_ms);
                Ok(ProcedureReply::Delivered(Some(delivery)))
            }
            ProcedureCall::Pop { keys, now_ms } => {
                let Some(id) = self.first_due(&keys, now_ms)? else {
                    return Ok(ProcedureReply::Delivered(None));
                };
                let delivery = self.record_delivery(&keys, id, now_ms)?;
                self.execute(Command::ZRem {
                    key: keys.index.clone(),
                    member: delivery.id.clone(),
                })?;
                self.execute(Command::HDel {
                    key: keys.hash.clone(),
                    fields: vec![
                        delivery.id.clone(),
                        rc_field(&delivery.id),
                        fr_field(&delivery.id),
                    ],
                })?;
                Ok(ProcedureReply::Delivered(Some(delivery)))
            }
            ProcedureCall::ChangeVisibility {
                keys,
                id,
                new_due_ms,
            } => {
                let exists = self
                    .zset(&keys.index)?
                    .is_some_and(|zset| zset.scores.contains_key(&id));
                if exists {
                    self.zset_mut(&keys.index)?.insert(&id, new_due_ms);
                }
                Ok(ProcedureReply::Updated(exists))
            }
        }
    }

    fn first_due(&self, keys: &QueueKeys, now_ms: i64) -> Result<Option<String>, BackendError> {
        Ok(self.zset(&keys.index)?.and_then(|zset| zset.first_due(now_ms)))
    }

    /// Bump counters for a selected message and read back its body and stamps
    fn record_delivery(
        &mut self,
        keys: &QueueKeys,
        id: String,
        now_ms: i64,
    ) -> Result<Delivery, BackendError> {
        let rc_key = rc_field(&id);
        let fr_key = fr_field(&id);
        self.check(&Command::HIncrBy {
            key: keys.hash.clone(),
            field: rc_key.clone(),
            by: 1,
        })?;
        self.check(&Command::HIncrBy {
            key: keys.hash.clone(),
            field: FIELD_TOTALRECV.to_string(),
            by: 1,
        })?;

        let body = self
            .hash(&keys.hash)?
            .and_then(|hash| hash.get(&id))
            .cloned()
            .ok_or_else(|| BackendError::CorruptValue {
                key: format!("{}.{}", keys.hash, id),
                expected: "message body".to_string(),
            })?;

        self.execute(Command::HIncrBy {
            key: keys.hash.clone(),
            field: FIELD_TOTALRECV.to_string(),
            by: 1,
        })?;
        let rc = self
            .execute(Command::HIncrBy {
                key: keys.hash.clone(),
                field: rc_key,
                by: 1,
            })?
            .as_integer(&keys.hash)?;

        let fr = if rc == 1 {
            self.hash_mut(&keys.hash)?
                .insert(fr_key, Bytes::from(now_ms.to_string()));
            now_ms
        } else {
            self.read_integer(&keys.hash, &fr_key)?.unwrap_or(now_ms)
        };

        Ok(Delivery {
            id,
            body,
            rc: rc.max(0) as u64,
            fr,
        })
    }
}

fn parse_integer(bytes: &Bytes) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

// ============================================================================
// InMemoryBackend
// ============================================================================

/// In-memory store implementing [`StoreBackend`].
///
/// Clones share the same store, so several queue handles built on clones
/// behave like separate processes attached to one server.
#[derive(Clone)]
pub struct InMemoryBackend {
    store: Arc<Mutex<Store>>,
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryBackend {
    /// Create a backend running on wall-clock time
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a backend that reads time from the given clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Arc::new(Mutex::new(Store::default())),
            topics: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    /// Forget every loaded procedure, as a store restart would
    pub fn flush_procedures(&self) -> Result<(), BackendError> {
        self.lock()?.procedures.clear();
        Ok(())
    }

    /// Subscribe to a notification topic
    pub fn subscribe(&self, topic: &str) -> Result<broadcast::Receiver<String>, BackendError> {
        let mut topics = self.topics.lock().map_err(|_| poisoned())?;
        Ok(topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe())
    }

    /// Number of keys currently stored
    pub fn key_count(&self) -> Result<usize, BackendError> {
        Ok(self.lock()?.data.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Store>, BackendError> {
        self.store.lock().map_err(|_| poisoned())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend").finish_non_exhaustive()
    }
}

fn poisoned() -> BackendError {
    BackendError::Unavailable {
        message: "in-memory store lock poisoned".to_string(),
    }
}

#[async_trait]
impl StoreBackend for InMemoryBackend {
    async fn read(&self, commands: Vec<Command>) -> Result<Vec<Reply>, BackendError> {
        if let Some(command) = commands.iter().find(|c| !c.is_read_only()) {
            return Err(BackendError::InvalidCommand {
                message: format!("{:?} is not read-only", command),
            });
        }
        let mut store = self.lock()?;
        commands
            .into_iter()
            .map(|command| store.execute(command))
            .collect()
    }

    async fn atomic_write_batch(&self, commands: Vec<Command>) -> Result<Vec<Reply>, BackendError> {
        self.lock()?.apply(commands)
    }

    async fn guarded_write_batch(
        &self,
        guard: BatchGuard,
        commands: Vec<Command>,
    ) -> Result<Option<Vec<Reply>>, BackendError> {
        let mut store = self.lock()?;
        if !store.guard_holds(&guard)? {
            trace!(key = guard.key(), "Batch guard failed, nothing written");
            return Ok(None);
        }
        store.apply(commands).map(Some)
    }

    async fn load_procedure(&self, procedure: Procedure) -> Result<ProcedureHandle, BackendError> {
        let handle = procedure.handle();
        self.lock()?.procedures.insert(handle.clone(), procedure);
        Ok(handle)
    }

    async fn atomic_procedure(
        &self,
        handle: &ProcedureHandle,
        call: ProcedureCall,
    ) -> Result<ProcedureReply, BackendError> {
        let mut store = self.lock()?;
        let loaded = store.procedures.get(handle).copied();
        match loaded {
            Some(loaded) if loaded == call.procedure() => store.run(call),
            Some(loaded) => Err(BackendError::InvalidCommand {
                message: format!(
                    "handle {} belongs to {}, not {}",
                    handle,
                    loaded,
                    call.procedure()
                ),
            }),
            None => Err(BackendError::ProcedureNotLoaded {
                handle: handle.to_string(),
            }),
        }
    }

    async fn current_time(&self) -> Result<StoreTime, BackendError> {
        Ok(self.clock.now())
    }

    async fn publish(&self, topic: &str, payload: String) -> Result<usize, BackendError> {
        let topics = self.topics.lock().map_err(|_| poisoned())?;
        Ok(topics
            .get(topic)
            .and_then(|sender| sender.send(payload).ok())
            .unwrap_or(0))
    }
}
