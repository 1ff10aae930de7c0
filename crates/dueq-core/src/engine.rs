//! Atomic operations engine.
//!
//! Wraps the three select-and-mutate procedures. Procedure handles are loaded
//! into a cache when the engine starts; if the store later reports a handle
//! missing (it restarted and lost its compiled procedures) the engine reloads
//! that one procedure and retries the call once.

use crate::backend::{Procedure, ProcedureCall, ProcedureHandle, ProcedureReply, StoreBackend};
use crate::error::{BackendError, QueueError, QueueResult};
use crate::id::MessageId;
use crate::keys::QueueKeys;
use crate::message::ReceivedMessage;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;

/// Runs receive, pop and change-visibility against a backend
pub struct ProcedureEngine {
    backend: Arc<dyn StoreBackend>,
    handles: RwLock<HashMap<Procedure, ProcedureHandle>>,
}

impl ProcedureEngine {
    /// Load every procedure and build the handle cache
    pub async fn start(backend: Arc<dyn StoreBackend>) -> Result<Self, BackendError> {
        let mut handles = HashMap::new();
        for procedure in Procedure::ALL {
            let handle = backend.load_procedure(procedure).await?;
            debug!(procedure = %procedure, handle = %handle, "Loaded procedure");
            handles.insert(procedure, handle);
        }
        Ok(Self {
            backend,
            handles: RwLock::new(handles),
        })
    }

    /// Deliver the earliest due message and hide it until `new_due_ms`
    pub async fn receive(
        &self,
        keys: &QueueKeys,
        now_ms: i64,
        new_due_ms: i64,
    ) -> QueueResult<Option<ReceivedMessage>> {
        let reply = self
            .call(ProcedureCall::Receive {
                keys: keys.clone(),
                now_ms,
                new_due_ms,
            })
            .await?;
        delivered(reply)
    }

    /// Deliver the earliest due message and delete it
    pub async fn pop(&self, keys: &QueueKeys, now_ms: i64) -> QueueResult<Option<ReceivedMessage>> {
        let reply = self
            .call(ProcedureCall::Pop {
                keys: keys.clone(),
                now_ms,
            })
            .await?;
        delivered(reply)
    }

    /// Move a message's due-time.
    ///
    /// Fails with [`QueueError::MessageNotFound`] if the message has no index
    /// entry.
    pub async fn change_visibility(
        &self,
        keys: &QueueKeys,
        id: &MessageId,
        new_due_ms: i64,
    ) -> QueueResult<()> {
        let reply = self
            .call(ProcedureCall::ChangeVisibility {
                keys: keys.clone(),
                id: id.as_str().to_string(),
                new_due_ms,
            })
            .await?;
        match reply {
            ProcedureReply::Updated(true) => Ok(()),
            ProcedureReply::Updated(false) => Err(QueueError::MessageNotFound {
                message_id: id.to_string(),
            }),
            ProcedureReply::Delivered(_) => Err(mismatched(Procedure::ChangeVisibility).into()),
        }
    }

    async fn call(&self, call: ProcedureCall) -> Result<ProcedureReply, BackendError> {
        let procedure = call.procedure();
        let handle = match self.cached(procedure)? {
            Some(handle) => handle,
            None => self.reload(procedure).await?,
        };

        match self.backend.atomic_procedure(&handle, call.clone()).await {
            Err(BackendError::ProcedureNotLoaded { .. }) => {
                warn!(procedure = %procedure, handle = %handle, "Procedure missing from store, reloading");
                let handle = self.reload(procedure).await?;
                self.backend.atomic_procedure(&handle, call).await
            }
            other => other,
        }
    }

    fn cached(&self, procedure: Procedure) -> Result<Option<ProcedureHandle>, BackendError> {
        let handles = self.handles.read().map_err(|_| cache_poisoned())?;
        Ok(handles.get(&procedure).cloned())
    }

    async fn reload(&self, procedure: Procedure) -> Result<ProcedureHandle, BackendError> {
        let handle = self.backend.load_procedure(procedure).await?;
        self.handles
            .write()
            .map_err(|_| cache_poisoned())?
            .insert(procedure, handle.clone());
        Ok(handle)
    }
}

impl std::fmt::Debug for ProcedureEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcedureEngine").finish_non_exhaustive()
    }
}

fn delivered(reply: ProcedureReply) -> QueueResult<Option<ReceivedMessage>> {
    let delivery = match reply {
        ProcedureReply::Delivered(None) => return Ok(None),
        ProcedureReply::Delivered(Some(delivery)) => delivery,
        ProcedureReply::Updated(_) => return Err(mismatched(Procedure::Receive).into()),
    };

    let id = MessageId::from_store(delivery.id);
    let sent_at = id
        .sent_at_millis()
        .ok_or_else(|| BackendError::CorruptValue {
            key: id.to_string(),
            expected: "message id with a timestamp prefix".to_string(),
        })?;

    Ok(Some(ReceivedMessage {
        id,
        body: delivery.body,
        rc: delivery.rc,
        fr: delivery.fr,
        sent_at,
    }))
}

fn mismatched(procedure: Procedure) -> BackendError {
    BackendError::InvalidCommand {
        message: format!("unexpected reply shape from {}", procedure),
    }
}

fn cache_poisoned() -> BackendError {
    BackendError::Unavailable {
        message: "procedure cache lock poisoned".to_string(),
    }
}
