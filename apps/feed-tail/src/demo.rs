//! Scripted feed used when no live store is wired in.
//!
//! The script walks through every recovery path once: a transient network
//! timeout, a failover, and a lost resume position, then idles until shutdown.

use feed_core::{ChangeEvent, FeedPosition, OperationType, StoreError, StoreErrorKind};
use feed_runtime::{ScriptEnd, ScriptedFeedSource, SubscriptionScript};
use serde_json::json;

fn order_event(op: OperationType, token: &str, collection: &str, id: u32) -> ChangeEvent {
    let event = ChangeEvent::new(op, FeedPosition::new(token), collection)
        .with_document_key(json!({ "_id": id }));
    match op {
        OperationType::Delete => event,
        _ => event.with_document(json!({
            "_id": id,
            "status": if op == OperationType::Insert { "placed" } else { "shipped" },
        })),
    }
}

pub fn demo_source(collection: &str) -> ScriptedFeedSource {
    ScriptedFeedSource::new([
        SubscriptionScript::deliver(
            vec![
                order_event(OperationType::Insert, "0001", collection, 1),
                order_event(OperationType::Update, "0002", collection, 1),
            ],
            ScriptEnd::Fail(StoreError::from_server_code(89, "network timeout")),
        ),
        SubscriptionScript::reject(StoreError::new(
            StoreErrorKind::NotPrimary,
            "not primary; election in progress",
        )),
        SubscriptionScript::deliver(
            vec![
                order_event(OperationType::Insert, "0003", collection, 2),
                order_event(OperationType::Delete, "0004", collection, 1),
            ],
            ScriptEnd::Fail(StoreError::from_server_code(
                286,
                "resume point may no longer be in the oplog",
            )),
        ),
        SubscriptionScript::deliver(
            vec![order_event(OperationType::Insert, "0005", collection, 3)],
            ScriptEnd::HoldOpen,
        ),
    ])
}
