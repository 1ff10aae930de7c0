//! Integration tests for queue lifecycle across handles and namespaces
//!
//! These tests verify:
//! - Queues created by one handle are visible to another
//! - Namespaces sharing a store stay isolated
//! - Reconfiguration and deletion take effect for every handle
//! - Realtime depth notifications reach subscribers

mod common;

use bytes::Bytes;
use common::{queue_name, TestStore, START};
use dueq_core::{DueqConfig, MaxSize, QueueAttributesUpdate, QueueError, QueueRecord};
use std::time::Duration;

fn namespaced(namespace: &str) -> DueqConfig {
    DueqConfig {
        namespace: namespace.to_string(),
        ..DueqConfig::default()
    }
}

mod registry {
    use super::*;

    /// Verify a queue created by one handle is listed and usable by another.
    #[tokio::test]
    async fn test_queue_visible_to_second_handle() -> anyhow::Result<()> {
        let store = TestStore::manual();
        let admin = store.handle().await?;
        let worker = store.handle().await?;

        admin.create_queue(&queue_name("orders")).await?;
        admin.create_queue(&queue_name("audit")).await?;

        let names: Vec<String> = worker
            .list_queues()
            .await?
            .into_iter()
            .map(|q| q.to_string())
            .collect();
        assert_eq!(names, vec!["audit", "orders"]);

        let err = worker
            .create_queue(&queue_name("orders"))
            .await
            .expect_err("second create must fail");
        assert!(matches!(err, QueueError::QueueAlreadyExists { .. }));
        Ok(())
    }

    /// Verify namespaces on one store never see each other's queues.
    #[tokio::test]
    async fn test_namespaces_are_isolated() -> anyhow::Result<()> {
        let store = TestStore::manual();
        let blue = store.handle_with(namespaced("blue")).await?;
        let green = store.handle_with(namespaced("green")).await?;
        let q = queue_name("jobs");

        blue.create_queue(&q).await?;
        green.create_queue(&q).await?;
        blue.send_message(&q, Bytes::from_static(b"blue job"), None)
            .await?;

        assert!(green.receive_message(&q, None).await?.is_none());
        let msg = blue.receive_message(&q, None).await?.expect("due");
        assert_eq!(msg.body_str(), Some("blue job"));

        blue.delete_queue(&q).await?;
        assert!(blue.list_queues().await?.is_empty());
        assert_eq!(green.list_queues().await?.len(), 1);
        Ok(())
    }

    /// Verify deleting a queue removes its store keys and invalidates it for others.
    #[tokio::test]
    async fn test_delete_queue_removes_everything() -> anyhow::Result<()> {
        let store = TestStore::manual();
        let admin = store.handle().await?;
        let worker = store.handle().await?;
        let q = queue_name("temp");

        admin.create_queue(&q).await?;
        for _ in 0..3 {
            worker.send_message(&q, Bytes::from_static(b"x"), None).await?;
        }
        worker.receive_message(&q, None).await?;

        admin.delete_queue(&q).await?;
        assert_eq!(store.backend.key_count()?, 0);

        let err = worker
            .receive_message(&q, None)
            .await
            .expect_err("queue is gone");
        assert!(matches!(err, QueueError::QueueNotFound { .. }));
        assert!(matches!(
            admin.delete_queue(&q).await,
            Err(QueueError::QueueNotFound { .. })
        ));
        Ok(())
    }
}

mod settings {
    use super::*;

    /// Verify reconfiguration by one handle changes behaviour for another.
    #[tokio::test]
    async fn test_reconfigured_delay_applies_to_other_handles() -> anyhow::Result<()> {
        let store = TestStore::manual();
        let admin = store.handle().await?;
        let producer = store.handle().await?;
        let q = queue_name("delayed");

        admin.create_queue(&q).await?;
        store.clock.advance(Duration::from_secs(1));
        let attrs = admin
            .set_queue_attributes(&q, QueueAttributesUpdate::default().delay(60))
            .await?;
        assert_eq!(attrs.delay, 60);
        assert_eq!(attrs.created, START.as_millis());
        assert_eq!(attrs.modified, START.as_millis() + 1_000);

        producer
            .send_message(&q, Bytes::from_static(b"later"), None)
            .await?;
        assert!(producer.receive_message(&q, None).await?.is_none());
        assert_eq!(producer.get_queue_attributes(&q).await?.hiddenmsgs, 1);

        store.clock.advance(Duration::from_secs(60));
        assert!(producer.receive_message(&q, None).await?.is_some());
        Ok(())
    }

    /// Verify the size limit follows reconfiguration, including unlimited.
    #[tokio::test]
    async fn test_maxsize_changes() -> anyhow::Result<()> {
        let store = TestStore::manual();
        let queue = store.handle().await?;
        let q = queue_name("sized");

        queue
            .create_queue_with(
                &q,
                QueueRecord {
                    maxsize: MaxSize::new(1024)?,
                    ..QueueRecord::default()
                },
            )
            .await?;

        let big = Bytes::from(vec![b'a'; 2048]);
        assert!(matches!(
            queue.send_message(&q, big.clone(), None).await,
            Err(QueueError::PayloadTooLarge { size: 2048, max_size: 1024 })
        ));

        queue
            .set_queue_attributes(
                &q,
                QueueAttributesUpdate::default().maxsize(MaxSize::Unlimited),
            )
            .await?;
        queue.send_message(&q, big, None).await?;

        let received = queue.receive_message(&q, None).await?.expect("due");
        assert_eq!(received.body.len(), 2048);
        Ok(())
    }

    /// Verify configured defaults seed new queues.
    #[tokio::test]
    async fn test_configured_defaults_seed_new_queues() -> anyhow::Result<()> {
        let store = TestStore::manual();
        let mut config = DueqConfig::default();
        config.defaults.vt = 5;
        config.defaults.delay = 2;
        let queue = store.handle_with(config).await?;
        let q = queue_name("defaults");

        queue.create_queue(&q).await?;
        let attrs = queue.get_queue_attributes(&q).await?;
        assert_eq!(attrs.vt, 5);
        assert_eq!(attrs.delay, 2);
        assert_eq!(attrs.maxsize, MaxSize::Bytes(65536));
        Ok(())
    }
}

mod realtime {
    use super::*;

    /// Verify subscribers receive the queue depth after each send.
    #[tokio::test]
    async fn test_depth_published_on_send() -> anyhow::Result<()> {
        let store = TestStore::manual();
        let config = DueqConfig {
            realtime: true,
            ..DueqConfig::default()
        };
        let queue = store.handle_with(config).await?;
        let q = queue_name("live");
        queue.create_queue(&q).await?;

        let mut rx = store.backend.subscribe(&queue.notification_topic(&q))?;
        queue.send_message(&q, Bytes::from_static(b"one"), None).await?;
        queue.send_message(&q, Bytes::from_static(b"two"), None).await?;

        assert_eq!(rx.recv().await?, "1");
        assert_eq!(rx.recv().await?, "2");
        Ok(())
    }

    /// Verify nothing is published when realtime is off.
    #[tokio::test]
    async fn test_no_publish_without_realtime() -> anyhow::Result<()> {
        let store = TestStore::manual();
        let queue = store.handle().await?;
        let q = queue_name("quiet");
        queue.create_queue(&q).await?;

        let mut rx = store.backend.subscribe(&queue.notification_topic(&q))?;
        queue.send_message(&q, Bytes::from_static(b"one"), None).await?;

        assert!(rx.try_recv().is_err());
        Ok(())
    }
}
