/*
[INPUT]:  Correlated requests from callers, replies/acks from the read loop
[OUTPUT]: Woken waiters with replies, typed operation failures
[POS]:    WebSocket layer - request id generation and reply correlation
[UPDATE]: When reply matching rules or operation result semantics change
*/

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use crate::error::{OkxError, Result};
use crate::ws::message::{ControlEvent, OperationReply};

/// What a waiter is woken with.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Event(ControlEvent),
    Operation(OperationReply),
}

#[derive(Debug)]
struct PendingEntry {
    op: String,
    fallback_key: Option<String>,
    issued_at: Instant,
    tx: oneshot::Sender<Result<Reply>>,
}

type Table = Arc<Mutex<HashMap<String, PendingEntry>>>;

fn lock(table: &Table) -> MutexGuard<'_, HashMap<String, PendingEntry>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-flight correlated requests keyed by correlation id.
#[derive(Debug, Default)]
pub struct PendingOperations {
    table: Table,
}

impl PendingOperations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a fresh id. The slot is released when the returned guard drops.
    pub fn register(&self, op: &str, fallback_key: Option<String>) -> PendingSlot {
        let (tx, rx) = oneshot::channel();
        let mut table = lock(&self.table);

        let mut id = new_request_id();
        while table.contains_key(&id) {
            id = new_request_id();
        }

        table.insert(
            id.clone(),
            PendingEntry {
                op: op.to_string(),
                fallback_key,
                issued_at: Instant::now(),
                tx,
            },
        );

        PendingSlot {
            id,
            rx,
            table: self.table.clone(),
        }
    }

    /// Wake the waiter registered under `id`. Returns false for unknown or
    /// already released ids; such late replies are discarded.
    pub fn resolve(&self, id: &str, reply: Reply) -> bool {
        let entry = lock(&self.table).remove(id);
        match entry {
            Some(entry) => {
                debug!(
                    id,
                    op = %entry.op,
                    elapsed_ms = entry.issued_at.elapsed().as_millis() as u64,
                    "pending operation resolved"
                );
                let _ = entry.tx.send(Ok(reply));
                true
            }
            None => false,
        }
    }

    /// Wake the oldest waiter registered with descriptor key `key`.
    pub fn resolve_by_key(&self, key: &str, reply: Reply) -> bool {
        let entry = {
            let mut table = lock(&self.table);
            let id = table
                .iter()
                .filter(|(_, entry)| entry.fallback_key.as_deref() == Some(key))
                .min_by_key(|(_, entry)| entry.issued_at)
                .map(|(id, _)| id.clone());
            id.and_then(|id| table.remove(&id))
        };
        match entry {
            Some(entry) => {
                let _ = entry.tx.send(Ok(reply));
                true
            }
            None => false,
        }
    }

    /// Fail every waiter, e.g. when the connection carrying them dropped.
    pub fn fail_all(&self, make_err: impl Fn() -> OkxError) -> usize {
        let drained: Vec<PendingEntry> = lock(&self.table).drain().map(|(_, entry)| entry).collect();
        let count = drained.len();
        for entry in drained {
            let _ = entry.tx.send(Err(make_err()));
        }
        count
    }

    pub fn len(&self) -> usize {
        lock(&self.table).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.table).is_empty()
    }

    /// Register, send with the generated id, then wait for the reply.
    pub async fn round_trip<F, Fut>(
        &self,
        op: &str,
        fallback_key: Option<String>,
        timeout: Duration,
        send: F,
    ) -> Result<Reply>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut slot = self.register(op, fallback_key);
        send(slot.id().to_string()).await?;
        slot.wait(timeout).await
    }
}

/// Guard for one pending entry; dropping it frees the id.
#[derive(Debug)]
pub struct PendingSlot {
    id: String,
    rx: oneshot::Receiver<Result<Reply>>,
    table: Table,
}

impl PendingSlot {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn wait(&mut self, timeout: Duration) -> Result<Reply> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(OkxError::ConnectionLost),
            Err(_) => Err(OkxError::timeout(timeout)),
        }
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        lock(&self.table).remove(&self.id);
    }
}

/// 32 alphanumeric characters, the longest id the server echoes back.
pub fn new_request_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Map an operation reply onto success, partial failure or rejection.
///
/// Code `"2"` is the server's "partial success" code for batches and is
/// treated like a zero code carrying failed items.
pub fn evaluate_reply(reply: OperationReply) -> Result<OperationReply> {
    let failures = reply.item_failures();
    match reply.code.as_str() {
        "0" if failures.is_empty() => Ok(reply),
        "0" | "2" if !failures.is_empty() => Err(OkxError::PartialFailure {
            failures,
            reply: Box::new(reply),
        }),
        _ => Err(OkxError::OperationRejected {
            code: reply.code.clone(),
            message: reply.msg.clone(),
            reply: Box::new(reply),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn reply(id: &str, code: &str, items: Vec<serde_json::Value>) -> OperationReply {
        OperationReply {
            id: id.to_string(),
            op: "batch-orders".to_string(),
            code: code.to_string(),
            msg: String::new(),
            data: items,
            in_time: None,
            out_time: None,
        }
    }

    #[test]
    fn test_request_id_shape() {
        let id = new_request_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, new_request_id());
    }

    #[tokio::test]
    async fn test_resolve_wakes_waiter() {
        let pending = PendingOperations::new();
        let mut slot = pending.register("order", None);
        let id = slot.id().to_string();
        assert!(pending.resolve(&id, Reply::Operation(reply(&id, "0", vec![]))));

        let result = slot.wait(Duration::from_secs(1)).await.unwrap();
        assert!(matches!(result, Reply::Operation(r) if r.id == id));
        drop(slot);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_releases_slot_and_discards_late_reply() {
        let pending = PendingOperations::new();
        let id = {
            let mut slot = pending.register("order", None);
            let err = slot.wait(Duration::from_millis(10)).await.unwrap_err();
            assert!(matches!(err, OkxError::Timeout { .. }));
            slot.id().to_string()
        };
        assert!(pending.is_empty());
        assert!(!pending.resolve(&id, Reply::Operation(reply(&id, "0", vec![]))));
    }

    #[tokio::test]
    async fn test_fail_all_reports_connection_lost() {
        let pending = PendingOperations::new();
        let mut a = pending.register("order", None);
        let mut b = pending.register("subscribe", Some("books|||||".to_string()));
        assert_eq!(pending.fail_all(|| OkxError::ConnectionLost), 2);
        assert!(matches!(a.wait(Duration::from_secs(1)).await, Err(OkxError::ConnectionLost)));
        assert!(matches!(b.wait(Duration::from_secs(1)).await, Err(OkxError::ConnectionLost)));
    }

    #[tokio::test]
    async fn test_resolve_by_key_picks_oldest() {
        let pending = PendingOperations::new();
        let mut first = pending.register("subscribe", Some("k".to_string()));
        let _second = pending.register("subscribe", Some("k".to_string()));
        let event = ControlEvent {
            id: None,
            event: "subscribe".to_string(),
            code: None,
            msg: None,
            arg: None,
            conn_id: None,
        };
        assert!(pending.resolve_by_key("k", Reply::Event(event)));
        assert!(first.wait(Duration::from_secs(1)).await.is_ok());
        assert_eq!(pending.len(), 1);
        assert!(!pending.resolve_by_key("other", Reply::Operation(reply("x", "0", vec![]))));
    }

    #[tokio::test]
    async fn test_round_trip_send_failure_releases_slot() {
        let pending = PendingOperations::new();
        let result = pending
            .round_trip("order", None, Duration::from_secs(1), |_id| async {
                Err(OkxError::NotConnected)
            })
            .await;
        assert!(matches!(result, Err(OkxError::NotConnected)));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_evaluate_success() {
        let ok = reply("1", "0", vec![json!({"sCode": "0"})]);
        assert_eq!(evaluate_reply(ok.clone()).unwrap(), ok);
    }

    #[rstest]
    #[case("0")]
    #[case("2")]
    fn test_evaluate_partial_failure_keeps_all_items(#[case] code: &str) {
        let partial = reply(
            "1",
            code,
            vec![json!({"ordId": "1", "sCode": "0"}), json!({"ordId": "", "sCode": "51000"})],
        );
        match evaluate_reply(partial) {
            Err(OkxError::PartialFailure { failures, reply }) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].code, "51000");
                assert_eq!(reply.data.len(), 2);
            }
            other => panic!("expected partial failure, got {other:?}"),
        }
    }

    #[test]
    fn test_evaluate_rejected() {
        let rejected = reply("1", "60013", vec![]);
        assert!(matches!(
            evaluate_reply(rejected),
            Err(OkxError::OperationRejected { code, .. }) if code == "60013"
        ));
        let all_failed = reply("1", "1", vec![json!({"sCode": "51000"})]);
        assert!(matches!(
            evaluate_reply(all_failed),
            Err(OkxError::OperationRejected { .. })
        ));
    }
}
