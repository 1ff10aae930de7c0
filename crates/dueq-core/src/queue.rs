//! Queue facade.
//!
//! [`MessageQueue`] is the entry point for producers and consumers. Each
//! operation validates its input before touching the store, reads the queue's
//! settings together with the store clock, and then submits its mutation as a
//! single atomic batch or procedure call. Batches that write to a queue are
//! guarded on the queue's `vt` field, so a queue deleted after the settings
//! read is reported as missing and never partly recreated.

use crate::backend::{BatchGuard, Command, Reply, ScoreBound, StoreBackend};
use crate::clock::StoreTime;
use crate::config::DueqConfig;
use crate::engine::ProcedureEngine;
use crate::error::{BackendError, QueueError, QueueResult, ValidationError};
use crate::id::{IdGenerator, MessageId};
use crate::keys::{
    message_fields, Namespace, QueueKeys, FIELD_CREATED, FIELD_DELAY, FIELD_MAXSIZE,
    FIELD_MODIFIED, FIELD_TOTALRECV, FIELD_TOTALSENT, FIELD_VT,
};
use crate::message::{
    validate_delay, validate_vt, MaxSize, QueueAttributes, QueueAttributesUpdate, QueueName,
    QueueRecord, ReceivedMessage,
};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;

/// Handle for queue operations against one backend and namespace
pub struct MessageQueue {
    backend: Arc<dyn StoreBackend>,
    engine: ProcedureEngine,
    ids: IdGenerator,
    namespace: Namespace,
    realtime: bool,
    defaults: QueueRecord,
}

impl MessageQueue {
    /// Create a handle, loading the store procedures.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Configuration`] if `config` is invalid and
    /// [`QueueError::Backend`] if procedures cannot be loaded.
    pub async fn connect(backend: Arc<dyn StoreBackend>, config: &DueqConfig) -> QueueResult<Self> {
        config.validate()?;
        let namespace = config.namespace()?;
        let defaults = config.defaults.to_record()?;
        let engine = ProcedureEngine::start(Arc::clone(&backend)).await?;

        info!(namespace = %namespace, realtime = config.realtime, "Queue handle ready");
        Ok(Self {
            backend,
            engine,
            ids: IdGenerator::new(),
            namespace,
            realtime: config.realtime,
            defaults,
        })
    }

    /// Replace the id generator, e.g. with a seeded one for reproducible ids
    pub fn with_id_generator(mut self, ids: IdGenerator) -> Self {
        self.ids = ids;
        self
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Topic on which queue depth is published after each send
    pub fn notification_topic(&self, queue: &QueueName) -> String {
        self.namespace.queue_keys(queue).topic
    }

    // ========================================================================
    // Queue Lifecycle
    // ========================================================================

    /// Create a queue with the configured default settings
    pub async fn create_queue(&self, queue: &QueueName) -> QueueResult<bool> {
        self.create_queue_with(queue, self.defaults).await
    }

    /// Create a queue with explicit settings.
    ///
    /// Fails with [`QueueError::QueueAlreadyExists`] if the queue exists, in
    /// which case its settings are left untouched.
    #[instrument(skip_all, fields(queue = %queue))]
    pub async fn create_queue_with(
        &self,
        queue: &QueueName,
        settings: QueueRecord,
    ) -> QueueResult<bool> {
        settings.validate()?;
        let keys = self.namespace.queue_keys(queue);
        let now_ms = self.backend.current_time().await?.as_millis();

        let fields = [
            (FIELD_VT, settings.vt.to_string()),
            (FIELD_DELAY, settings.delay.to_string()),
            (FIELD_MAXSIZE, i64::from(settings.maxsize).to_string()),
            (FIELD_CREATED, now_ms.to_string()),
            (FIELD_MODIFIED, now_ms.to_string()),
        ];
        let mut commands: Vec<Command> = fields
            .into_iter()
            .map(|(field, value)| Command::HSet {
                key: keys.hash.clone(),
                field: field.to_string(),
                value: Bytes::from(value),
            })
            .collect();
        commands.push(Command::SAdd {
            key: self.namespace.registry_key(),
            member: queue.to_string(),
        });

        let guard = BatchGuard::FieldAbsent {
            key: keys.hash.clone(),
            field: FIELD_VT.to_string(),
        };
        if self
            .backend
            .guarded_write_batch(guard, commands)
            .await?
            .is_none()
        {
            return Err(QueueError::QueueAlreadyExists {
                queue_name: queue.to_string(),
            });
        }

        info!(vt = settings.vt, delay = settings.delay, maxsize = %settings.maxsize, "Queue created");
        Ok(true)
    }

    /// Names of every queue in the namespace, sorted
    pub async fn list_queues(&self) -> QueueResult<Vec<QueueName>> {
        let key = self.namespace.registry_key();
        let replies = self
            .backend
            .read(vec![Command::SMembers { key: key.clone() }])
            .await?;

        let members = replies
            .into_iter()
            .next()
            .map(|reply| reply.into_array(&key))
            .transpose()?
            .unwrap_or_default();

        let mut names = Vec::with_capacity(members.len());
        for member in members {
            let raw = member.into_bulk(&key)?.unwrap_or_default();
            let name = std::str::from_utf8(&raw)
                .ok()
                .and_then(|text| QueueName::new(text).ok())
                .ok_or_else(|| BackendError::CorruptValue {
                    key: key.clone(),
                    expected: "queue name".to_string(),
                })?;
            names.push(name);
        }
        names.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(names)
    }

    /// Delete a queue with all of its messages
    #[instrument(skip_all, fields(queue = %queue))]
    pub async fn delete_queue(&self, queue: &QueueName) -> QueueResult<()> {
        let keys = self.namespace.queue_keys(queue);
        let replies = self
            .backend
            .atomic_write_batch(vec![
                Command::Del {
                    key: keys.hash.clone(),
                },
                Command::Del {
                    key: keys.index.clone(),
                },
                Command::SRem {
                    key: self.namespace.registry_key(),
                    member: queue.to_string(),
                },
            ])
            .await?;

        if first_integer(&replies, &keys.hash)? == 0 {
            return Err(queue_not_found(queue));
        }
        info!("Queue deleted");
        Ok(())
    }

    /// Settings, counters and depth of a queue
    #[instrument(skip_all, fields(queue = %queue))]
    pub async fn get_queue_attributes(&self, queue: &QueueName) -> QueueResult<QueueAttributes> {
        let keys = self.namespace.queue_keys(queue);
        let now_ms = self.backend.current_time().await?.as_millis();

        let mut replies = self
            .backend
            .read(vec![
                Command::HMGet {
                    key: keys.hash.clone(),
                    fields: [
                        FIELD_VT,
                        FIELD_DELAY,
                        FIELD_MAXSIZE,
                        FIELD_TOTALRECV,
                        FIELD_TOTALSENT,
                        FIELD_CREATED,
                        FIELD_MODIFIED,
                    ]
                    .iter()
                    .map(|f| f.to_string())
                    .collect(),
                },
                Command::ZCard {
                    key: keys.index.clone(),
                },
                Command::ZCount {
                    key: keys.index.clone(),
                    min: ScoreBound::Inclusive(now_ms),
                    max: ScoreBound::PosInfinity,
                },
            ])
            .await?
            .into_iter();

        let values = parse_fields(next_reply(&mut replies, &keys.hash)?, &keys.hash)?;
        let Some(record) = parse_record(&values, &keys.hash)? else {
            return Err(queue_not_found(queue));
        };
        let msgs = next_reply(&mut replies, &keys.index)?.as_integer(&keys.index)?;
        let hiddenmsgs = next_reply(&mut replies, &keys.index)?.as_integer(&keys.index)?;
        let counter = |i: usize| values.get(i).copied().flatten().unwrap_or(0);

        Ok(QueueAttributes {
            vt: record.vt,
            delay: record.delay,
            maxsize: record.maxsize,
            totalrecv: non_negative(counter(3)),
            totalsent: non_negative(counter(4)),
            created: counter(5),
            modified: counter(6),
            msgs: non_negative(msgs),
            hiddenmsgs: non_negative(hiddenmsgs),
        })
    }

    /// Change the supplied settings of a queue and return its attributes
    #[instrument(skip_all, fields(queue = %queue))]
    pub async fn set_queue_attributes(
        &self,
        queue: &QueueName,
        update: QueueAttributesUpdate,
    ) -> QueueResult<QueueAttributes> {
        update.validate()?;
        if update == QueueAttributesUpdate::default() {
            return Err(ValidationError::InvalidFormat {
                field: "attributes".to_string(),
                message: "at least one of vt, delay or maxsize must be supplied".to_string(),
            }
            .into());
        }

        let keys = self.namespace.queue_keys(queue);
        let now = self.backend.current_time().await?;

        let hset = |field: &str, value: String| Command::HSet {
            key: keys.hash.clone(),
            field: field.to_string(),
            value: Bytes::from(value),
        };
        let mut commands = vec![hset(FIELD_MODIFIED, now.as_millis().to_string())];
        if let Some(vt) = update.vt {
            commands.push(hset(FIELD_VT, vt.to_string()));
        }
        if let Some(delay) = update.delay {
            commands.push(hset(FIELD_DELAY, delay.to_string()));
        }
        if let Some(maxsize) = update.maxsize {
            commands.push(hset(FIELD_MAXSIZE, i64::from(maxsize).to_string()));
        }
        if self
            .backend
            .guarded_write_batch(queue_exists(&keys), commands)
            .await?
            .is_none()
        {
            return Err(queue_not_found(queue));
        }

        info!(vt = ?update.vt, delay = ?update.delay, maxsize = ?update.maxsize, "Queue attributes updated");
        self.get_queue_attributes(queue).await
    }

    // ========================================================================
    // Message Operations
    // ========================================================================

    /// Enqueue a message, due after `delay` seconds or the queue's default delay
    #[instrument(skip_all, fields(queue = %queue, size = body.len()))]
    pub async fn send_message(
        &self,
        queue: &QueueName,
        body: Bytes,
        delay: Option<u32>,
    ) -> QueueResult<MessageId> {
        if let Some(delay) = delay {
            validate_delay(delay)?;
        }
        let keys = self.namespace.queue_keys(queue);
        let (record, now) = self.queue_record(queue, &keys).await?;

        if !record.maxsize.admits(body.len()) {
            let max_size = match record.maxsize {
                MaxSize::Bytes(bytes) => bytes as usize,
                MaxSize::Unlimited => usize::MAX,
            };
            return Err(QueueError::PayloadTooLarge {
                size: body.len(),
                max_size,
            });
        }

        let id = self.ids.generate(now)?;
        let delay = delay.unwrap_or(record.delay);
        let due_ms = now.as_millis() + seconds_to_millis(delay);

        let mut commands = vec![
            Command::ZAdd {
                key: keys.index.clone(),
                member: id.as_str().to_string(),
                score: due_ms,
            },
            Command::HSet {
                key: keys.hash.clone(),
                field: id.as_str().to_string(),
                value: body,
            },
            Command::HIncrBy {
                key: keys.hash.clone(),
                field: FIELD_TOTALSENT.to_string(),
                by: 1,
            },
        ];
        if self.realtime {
            commands.push(Command::ZCard {
                key: keys.index.clone(),
            });
        }
        let Some(replies) = self
            .backend
            .guarded_write_batch(queue_exists(&keys), commands)
            .await?
        else {
            return Err(queue_not_found(queue));
        };
        debug!(message_id = %id, due_ms, "Message sent");

        if self.realtime {
            let depth = replies
                .get(3)
                .map(|reply| reply.as_integer(&keys.index))
                .transpose()?
                .unwrap_or(0);
            self.notify(&keys, depth).await;
        }
        Ok(id)
    }

    /// Deliver the next due message and hide it for `vt` seconds or the
    /// queue's default visibility timeout
    #[instrument(skip_all, fields(queue = %queue))]
    pub async fn receive_message(
        &self,
        queue: &QueueName,
        vt: Option<u32>,
    ) -> QueueResult<Option<ReceivedMessage>> {
        if let Some(vt) = vt {
            validate_vt(vt)?;
        }
        let keys = self.namespace.queue_keys(queue);
        let (record, now) = self.queue_record(queue, &keys).await?;

        let now_ms = now.as_millis();
        let vt = vt.unwrap_or(record.vt);
        let received = self
            .engine
            .receive(&keys, now_ms, now_ms + seconds_to_millis(vt))
            .await?;

        if let Some(ref msg) = received {
            debug!(message_id = %msg.id, rc = msg.rc, "Message received");
        }
        Ok(received)
    }

    /// Deliver the next due message and delete it
    #[instrument(skip_all, fields(queue = %queue))]
    pub async fn pop_message(&self, queue: &QueueName) -> QueueResult<Option<ReceivedMessage>> {
        let keys = self.namespace.queue_keys(queue);
        let (_, now) = self.queue_record(queue, &keys).await?;

        let popped = self.engine.pop(&keys, now.as_millis()).await?;
        if let Some(ref msg) = popped {
            debug!(message_id = %msg.id, rc = msg.rc, "Message popped");
        }
        Ok(popped)
    }

    /// Delete a message; returns `false` if there was nothing to delete
    #[instrument(skip_all, fields(queue = %queue, message_id = %id))]
    pub async fn delete_message(&self, queue: &QueueName, id: &MessageId) -> QueueResult<bool> {
        let keys = self.namespace.queue_keys(queue);
        let replies = self
            .backend
            .atomic_write_batch(vec![
                Command::ZRem {
                    key: keys.index.clone(),
                    member: id.as_str().to_string(),
                },
                Command::HDel {
                    key: keys.hash.clone(),
                    fields: message_fields(id),
                },
            ])
            .await?;

        let removed_entry = first_integer(&replies, &keys.index)? == 1;
        let removed_fields = replies
            .get(1)
            .map(|reply| reply.as_integer(&keys.hash))
            .transpose()?
            .unwrap_or(0)
            > 0;
        let deleted = removed_entry && removed_fields;
        debug!(deleted, "Message delete");
        Ok(deleted)
    }

    /// Make a message due `vt` seconds from now.
    ///
    /// Returns `false` if the message does not exist.
    #[instrument(skip_all, fields(queue = %queue, message_id = %id))]
    pub async fn change_message_visibility(
        &self,
        queue: &QueueName,
        id: &MessageId,
        vt: u32,
    ) -> QueueResult<bool> {
        validate_vt(vt)?;
        let keys = self.namespace.queue_keys(queue);
        let (_, now) = self.queue_record(queue, &keys).await?;

        let new_due_ms = now.as_millis() + seconds_to_millis(vt);
        match self.engine.change_visibility(&keys, id, new_due_ms).await {
            Ok(()) => {
                debug!(new_due_ms, "Visibility changed");
                Ok(true)
            }
            Err(QueueError::MessageNotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Read a queue's settings and the store time in one round trip
    async fn queue_record(
        &self,
        queue: &QueueName,
        keys: &QueueKeys,
    ) -> QueueResult<(QueueRecord, StoreTime)> {
        let now = self.backend.current_time().await?;
        let replies = self
            .backend
            .read(vec![Command::HMGet {
                key: keys.hash.clone(),
                fields: vec![
                    FIELD_VT.to_string(),
                    FIELD_DELAY.to_string(),
                    FIELD_MAXSIZE.to_string(),
                ],
            }])
            .await?;

        let reply = replies.into_iter().next().ok_or_else(|| missing_reply(&keys.hash))?;
        let values = parse_fields(reply, &keys.hash)?;
        match parse_record(&values, &keys.hash)? {
            Some(record) => Ok((record, now)),
            None => Err(queue_not_found(queue)),
        }
    }

    /// Publish the queue depth; failures are logged and dropped
    async fn notify(&self, keys: &QueueKeys, depth: i64) {
        match self.backend.publish(&keys.topic, depth.to_string()).await {
            Ok(receivers) => debug!(topic = %keys.topic, depth, receivers, "Published queue depth"),
            Err(err) => warn!(topic = %keys.topic, error = %err, "Dropped queue depth notification"),
        }
    }
}

impl std::fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("namespace", &self.namespace)
            .field("realtime", &self.realtime)
            .finish_non_exhaustive()
    }
}

/// Guard that holds while the queue's settings exist
fn queue_exists(keys: &QueueKeys) -> BatchGuard {
    BatchGuard::FieldExists {
        key: keys.hash.clone(),
        field: FIELD_VT.to_string(),
    }
}

fn queue_not_found(queue: &QueueName) -> QueueError {
    QueueError::QueueNotFound {
        queue_name: queue.to_string(),
    }
}

fn missing_reply(key: &str) -> BackendError {
    BackendError::CorruptValue {
        key: key.to_string(),
        expected: "reply".to_string(),
    }
}

fn seconds_to_millis(seconds: u32) -> i64 {
    i64::from(seconds) * 1_000
}

fn non_negative(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn first_integer(replies: &[Reply], key: &str) -> Result<i64, BackendError> {
    replies
        .first()
        .ok_or_else(|| missing_reply(key))?
        .as_integer(key)
}

fn next_reply(replies: &mut impl Iterator<Item = Reply>, key: &str) -> Result<Reply, BackendError> {
    replies.next().ok_or_else(|| missing_reply(key))
}

/// Decode an HMGET reply into optional integers
fn parse_fields(reply: Reply, key: &str) -> Result<Vec<Option<i64>>, BackendError> {
    reply
        .into_array(key)?
        .into_iter()
        .map(|value| value.parse_integer(key))
        .collect()
}

/// Build settings from `[vt, delay, maxsize]`; `None` if the queue is absent
fn parse_record(values: &[Option<i64>], key: &str) -> Result<Option<QueueRecord>, BackendError> {
    let corrupt = |expected: &str| BackendError::CorruptValue {
        key: key.to_string(),
        expected: expected.to_string(),
    };
    let (Some(vt), Some(delay), Some(maxsize)) = (
        values.first().copied().flatten(),
        values.get(1).copied().flatten(),
        values.get(2).copied().flatten(),
    ) else {
        return Ok(None);
    };

    Ok(Some(QueueRecord {
        vt: u32::try_from(vt).map_err(|_| corrupt("vt"))?,
        delay: u32::try_from(delay).map_err(|_| corrupt("delay"))?,
        maxsize: MaxSize::try_from(maxsize).map_err(|_| corrupt("maxsize"))?,
    }))
}
