use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use anyhow::Result;
use futures_util::future::join_all;
use notification_dispatch::{
    clients::{
        consumer::{Consumer, MessageHandler},
        dispatch::NotificationDispatcher,
        publisher::Publisher,
    },
    error::DispatchError,
    models::{
        request::{EmailRequest, PushRequest},
        retry::RetryPolicy,
        topology::{EMAIL_QUEUE, PUSH_QUEUE},
    },
};
use serde_json::json;

use crate::common::{MemoryBroker, MemoryStatusStore, ScriptedHandler, wait_until};

fn dispatcher(broker: &MemoryBroker, max_pending: usize) -> NotificationDispatcher {
    let manager = broker.manager();
    let publisher = Publisher::new(manager.clone(), max_pending);
    NotificationDispatcher::new(manager, publisher)
}

fn email_request() -> EmailRequest {
    EmailRequest {
        user_email: "user@example.com".to_string(),
        template_code: "welcome".to_string(),
        template_data: HashMap::from([("name".to_string(), json!("Ada"))]),
        ..EmailRequest::default()
    }
}

fn push_request() -> PushRequest {
    PushRequest {
        push_token: "fcm_token_abcdefghijklmnop:APA91b".to_string(),
        template_code: "order_shipped".to_string(),
        ..PushRequest::default()
    }
}

/// Test: Without a live channel the facade fails fast and publishes nothing
#[tokio::test]
async fn test_no_channel_fails_without_publishing() -> Result<()> {
    let broker = MemoryBroker::new();
    let dispatcher = dispatcher(&broker, 8);

    let result = dispatcher.send_email(email_request()).await;
    assert!(matches!(result, Err(DispatchError::BrokerUnavailable(_))));

    let result = dispatcher.send_push(push_request()).await;
    assert!(matches!(result, Err(DispatchError::BrokerUnavailable(_))));

    assert_eq!(broker.publish_count(), 0);

    Ok(())
}

/// Test: Email defaults are filled in and the message is routed to the email queue
#[tokio::test]
async fn test_send_email_applies_defaults() -> Result<()> {
    let broker = MemoryBroker::connected().await;
    let dispatcher = dispatcher(&broker, 8);

    let receipt = dispatcher.send_email(email_request()).await?;

    assert!(receipt.success);
    let digits = receipt
        .notification_id
        .strip_prefix("email_")
        .expect("default id should start with email_");
    assert!(!digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()));
    assert!(receipt.request_id.is_some());

    let published = broker.published();
    assert_eq!(published.len(), 1);

    let body = &published[0].body;
    assert_eq!(published[0].routing_key, "email");
    assert_eq!(body["priority"], 5);
    assert_eq!(body["retry_count"], 0);
    assert_eq!(body["channel"], "email");
    assert_eq!(body["recipient"], "user@example.com");
    assert_eq!(body["variables"]["name"], "Ada");
    assert_eq!(body["message_id"], receipt.notification_id.as_str());
    assert_eq!(body["request_id"], receipt.request_id.unwrap().as_str());
    assert_eq!(broker.queue_depth(EMAIL_QUEUE), 1);

    Ok(())
}

/// Test: Caller supplied identifiers and priority are preserved
#[tokio::test]
async fn test_send_email_keeps_caller_ids() -> Result<()> {
    let broker = MemoryBroker::connected().await;
    let dispatcher = dispatcher(&broker, 8);

    let receipt = dispatcher
        .send_email(EmailRequest {
            notification_id: Some("notif-42".to_string()),
            request_id: Some("req-42".to_string()),
            priority: Some(9),
            ..email_request()
        })
        .await?;

    assert_eq!(receipt.notification_id, "notif-42");
    assert_eq!(receipt.request_id.as_deref(), Some("req-42"));

    let sent = &broker.published()[0];
    assert_eq!(sent.properties.message_id, "notif-42");
    assert_eq!(sent.properties.priority, Some(9));
    assert_eq!(sent.body["priority"], 9);

    Ok(())
}

/// Test: Push requests route to the push queue and return no request id
#[tokio::test]
async fn test_send_push_routes_to_push_queue() -> Result<()> {
    let broker = MemoryBroker::connected().await;
    let dispatcher = dispatcher(&broker, 8);

    let receipt = dispatcher
        .send_push(PushRequest {
            platform: Some("ios".to_string()),
            ..push_request()
        })
        .await?;

    assert!(receipt.success);
    assert!(receipt.notification_id.starts_with("push_"));
    assert!(receipt.request_id.is_none());

    let body = &broker.published()[0].body;
    assert_eq!(body["channel"], "push");
    assert_eq!(body["platform"], "ios");
    assert_eq!(broker.queue_depth(PUSH_QUEUE), 1);
    assert_eq!(broker.queue_depth(EMAIL_QUEUE), 0);

    Ok(())
}

/// Test: Invalid requests are rejected as validation errors and never queued
#[tokio::test]
async fn test_invalid_requests_rejected() -> Result<()> {
    let broker = MemoryBroker::connected().await;
    let dispatcher = dispatcher(&broker, 8);

    let bad_email = dispatcher
        .send_email(EmailRequest {
            user_email: "not-an-email".to_string(),
            ..email_request()
        })
        .await;
    assert!(matches!(bad_email, Err(DispatchError::Validation(_))));

    let no_template = dispatcher
        .send_email(EmailRequest {
            template_code: " ".to_string(),
            ..email_request()
        })
        .await;
    assert!(matches!(no_template, Err(DispatchError::Validation(_))));

    let bad_priority = dispatcher
        .send_push(PushRequest {
            priority: Some(0),
            ..push_request()
        })
        .await;
    assert!(matches!(bad_priority, Err(DispatchError::Validation(_))));

    let bad_token = dispatcher
        .send_push(PushRequest {
            push_token: "short".to_string(),
            ..push_request()
        })
        .await;
    assert!(matches!(bad_token, Err(DispatchError::Validation(_))));

    assert_eq!(broker.publish_count(), 0);

    Ok(())
}

/// Test: Backpressure is reported as a delivery error distinct from validation
#[tokio::test]
async fn test_backpressure_propagates() -> Result<()> {
    let broker = MemoryBroker::connected().await;
    let dispatcher = dispatcher(&broker, 0);

    let result = dispatcher.send_email(email_request()).await;

    match result {
        Err(e @ DispatchError::Backpressure(_)) => assert!(e.is_retryable()),
        other => panic!("expected backpressure, got {:?}", other),
    }
    assert_eq!(broker.publish_count(), 0);

    Ok(())
}

/// Test: Concurrent sends without ids each get a distinct id and are each delivered
#[tokio::test]
async fn test_concurrent_default_ids_are_distinct() -> Result<()> {
    let broker = MemoryBroker::connected().await;
    let dispatcher = dispatcher(&broker, 64);

    let sends = (0..20).map(|i| {
        dispatcher.send_email(EmailRequest {
            user_email: format!("user{}@example.com", i),
            ..email_request()
        })
    });
    let receipts = join_all(sends)
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

    let ids: HashSet<String> = receipts
        .iter()
        .map(|receipt| receipt.notification_id.clone())
        .collect();
    assert_eq!(ids.len(), 20, "{:?}", ids);
    assert!(ids.iter().all(|id| id.starts_with("email_")));

    let manager = broker.manager();
    let consumer = Consumer::new(
        Arc::clone(&manager),
        Publisher::new(manager, 64),
        RetryPolicy::new(3),
        4,
    )
    .with_status_store(Arc::new(MemoryStatusStore::default()));

    let handler = ScriptedHandler::succeeding();
    let task_handler: Arc<dyn MessageHandler> = handler.clone();
    let task = tokio::spawn(async move {
        let _ = consumer.consume(EMAIL_QUEUE, task_handler).await;
    });

    wait_until(|| handler.calls() == 20).await?;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert_eq!(handler.calls(), 20, "every notification reaches the handler");
    assert_eq!(broker.queue_depth(EMAIL_QUEUE), 0);

    task.abort();
    Ok(())
}

/// Test: After a connection error sends keep failing until the owner acquires again
#[tokio::test]
async fn test_sends_resume_after_owner_reacquires() -> Result<()> {
    let broker = MemoryBroker::connected().await;
    let manager = broker.manager();
    let dispatcher = dispatcher(&broker, 8);

    manager.invalidate().await;

    for _ in 0..2 {
        let result = dispatcher.send_email(email_request()).await;
        assert!(matches!(result, Err(DispatchError::BrokerUnavailable(_))));
    }
    assert_eq!(broker.publish_count(), 0);

    manager.acquire().await?;

    dispatcher.send_email(email_request()).await?;
    assert_eq!(broker.publish_count(), 1);

    Ok(())
}
