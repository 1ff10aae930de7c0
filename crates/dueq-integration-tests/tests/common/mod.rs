//! Common test utilities for dueq integration tests
//!
//! This module provides:
//! - Test tracing setup
//! - A store fixture with a manual clock that several queue handles can share
//! - Shared test data builders

use dueq_core::{
    DueqConfig, IdGenerator, InMemoryBackend, ManualClock, MessageQueue, QueueName, StoreTime,
};
use std::sync::Arc;

/// Fixed start time for deterministic tests
#[allow(dead_code)]
pub const START: StoreTime = StoreTime::from_secs(1_700_000_000);

/// Install a test-writer subscriber once per test binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dueq_core=debug")
        .with_test_writer()
        .try_init();
}

/// One store shared by any number of queue handles
#[allow(dead_code)]
pub struct TestStore {
    pub backend: InMemoryBackend,
    pub clock: ManualClock,
}

#[allow(dead_code)]
impl TestStore {
    /// Store on a manual clock starting at [`START`]
    pub fn manual() -> Self {
        init_tracing();
        let clock = ManualClock::new(START);
        let backend = InMemoryBackend::with_clock(Arc::new(clock.clone()));
        Self { backend, clock }
    }

    /// Store on wall-clock time; the manual clock is unused
    pub fn wall_clock() -> Self {
        init_tracing();
        Self {
            backend: InMemoryBackend::new(),
            clock: ManualClock::new(START),
        }
    }

    /// A new handle, as a separate process attached to the same store would have
    pub async fn handle(&self) -> anyhow::Result<MessageQueue> {
        self.handle_with(DueqConfig::default()).await
    }

    pub async fn handle_with(&self, config: DueqConfig) -> anyhow::Result<MessageQueue> {
        let queue = MessageQueue::connect(Arc::new(self.backend.clone()), &config).await?;
        Ok(queue)
    }

    /// A handle producing reproducible ids
    pub async fn seeded_handle(&self, seed: u64) -> anyhow::Result<MessageQueue> {
        Ok(self.handle().await?.with_id_generator(IdGenerator::seeded(seed)))
    }
}

#[allow(dead_code)]
pub fn queue_name(raw: &str) -> QueueName {
    QueueName::new(raw).expect("test queue name is valid")
}
