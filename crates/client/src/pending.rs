//! Pending-call table: correlates inbound replies with waiting callers.
//!
//! Lookup is two-tier. A reply carrying a correlation id resolves the entry
//! registered under that id. A reply without one resolves the oldest entry
//! (lowest registration sequence) whose expected action equals the reply's
//! `action`. Anything else is dropped.

use std::collections::HashMap;

use mc_domain::trace::{MatchedBy, TraceEvent};
use mc_domain::{Error, Result};
use mc_protocol::{action_of, correlation_id_of, Reply};
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Receiver half handed to the caller that registered a call.
pub(crate) type ReplySlot = oneshot::Receiver<Result<Reply>>;

struct PendingCall {
    expected_action: String,
    seq: u64,
    tx: oneshot::Sender<Result<Reply>>,
}

#[derive(Default)]
struct TableInner {
    calls: HashMap<String, PendingCall>,
    next_seq: u64,
    closed: bool,
}

/// How an inbound message was handled by [`PendingTable::dispatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Dispatch {
    Delivered {
        correlation_id: String,
        matched_by: MatchedBy,
    },
    Dropped,
}

/// All calls in flight on one connection.
///
/// Each entry is resolved exactly once: by a reply, by [`fail_all`], or by
/// [`remove`]. Once `fail_all` has run the table is closed and rejects new
/// registrations.
///
/// [`fail_all`]: PendingTable::fail_all
/// [`remove`]: PendingTable::remove
#[derive(Default)]
pub(crate) struct PendingTable {
    inner: Mutex<TableInner>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `correlation_id`.
    pub fn register(&self, correlation_id: &str, expected_action: &str) -> Result<ReplySlot> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::ConnectionClosed);
        }
        if inner.calls.contains_key(correlation_id) {
            return Err(Error::DuplicateCorrelationId(correlation_id.to_owned()));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let (tx, rx) = oneshot::channel();
        inner.calls.insert(
            correlation_id.to_owned(),
            PendingCall {
                expected_action: expected_action.to_owned(),
                seq,
                tx,
            },
        );
        Ok(rx)
    }

    /// Withdraw a call. A caller still waiting on it receives
    /// [`Error::Cancelled`]. Returns `false` if no such entry exists.
    pub fn remove(&self, correlation_id: &str, reason: &str) -> bool {
        let removed = self.inner.lock().calls.remove(correlation_id);
        match removed {
            Some(call) => {
                let _ = call.tx.send(Err(Error::Cancelled));
                TraceEvent::CallAbandoned {
                    correlation_id: correlation_id.to_owned(),
                    reason: reason.to_owned(),
                }
                .emit();
                true
            }
            None => false,
        }
    }

    /// Route one inbound message to its waiter, or drop it.
    pub fn dispatch(&self, message: Reply) -> Dispatch {
        let action = action_of(&message).map(str::to_owned);
        let correlation_id = correlation_id_of(&message).map(str::to_owned);

        let claimed = {
            let mut inner = self.inner.lock();
            match &correlation_id {
                Some(id) => inner
                    .calls
                    .remove(id)
                    .map(|call| (id.clone(), call, MatchedBy::CorrelationId)),
                None => action
                    .as_deref()
                    .and_then(|action| take_oldest_for_action(&mut inner.calls, action))
                    .map(|(id, call)| (id, call, MatchedBy::Action)),
            }
        };

        let Some((id, call, matched_by)) = claimed else {
            let reason = if correlation_id.is_some() {
                "no pending call with this correlation id"
            } else {
                "no pending call for this action"
            };
            TraceEvent::MessageDropped {
                action,
                correlation_id,
                reason: reason.into(),
            }
            .emit();
            return Dispatch::Dropped;
        };

        TraceEvent::CallResolved {
            action: call.expected_action,
            correlation_id: id.clone(),
            matched_by,
        }
        .emit();
        // The receiver may have been dropped between lookup and send; the
        // caller's guard is about to clean up, so the reply is simply lost.
        let _ = call.tx.send(Ok(message));
        Dispatch::Delivered {
            correlation_id: id,
            matched_by,
        }
    }

    /// Resolve every outstanding call with [`Error::ConnectionClosed`] and
    /// reject later registrations. Returns how many calls were failed.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<PendingCall> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.calls.drain().map(|(_, call)| call).collect()
        };
        let count = drained.len();
        for call in drained {
            let _ = call.tx.send(Err(Error::ConnectionClosed));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().calls.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Remove and return the lowest-sequence live entry expecting `action`.
/// Entries whose caller has already gone away are discarded on the way.
fn take_oldest_for_action(
    calls: &mut HashMap<String, PendingCall>,
    action: &str,
) -> Option<(String, PendingCall)> {
    calls.retain(|_, call| !(call.expected_action == action && call.tx.is_closed()));
    let id = calls
        .iter()
        .filter(|(_, call)| call.expected_action == action)
        .min_by_key(|(_, call)| call.seq)
        .map(|(id, _)| id.clone())?;
    calls.remove_entry(&id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reply(value: serde_json::Value) -> Reply {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("fixture must be an object"),
        }
    }

    #[tokio::test]
    async fn resolves_by_correlation_id() {
        let table = PendingTable::new();
        let rx_a = table.register("a", "meshes").unwrap();
        let rx_b = table.register("b", "meshes").unwrap();

        let outcome = table.dispatch(reply(json!({"action": "meshes", "responseid": "b", "n": 2})));
        assert_eq!(
            outcome,
            Dispatch::Delivered {
                correlation_id: "b".into(),
                matched_by: MatchedBy::CorrelationId
            }
        );
        let got = rx_b.await.unwrap().unwrap();
        assert_eq!(got["n"], 2);
        assert_eq!(table.len(), 1);
        drop(rx_a);
    }

    #[tokio::test]
    async fn legacy_camel_case_id_is_honoured() {
        let table = PendingTable::new();
        let rx = table.register("x1", "nodes").unwrap();
        table.dispatch(reply(json!({"action": "nodes", "responseId": "x1"})));
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn id_less_reply_goes_to_oldest_matching_action() {
        let table = PendingTable::new();
        let rx_first = table.register("first", "serverinfo").unwrap();
        let _rx_other = table.register("other", "users").unwrap();
        let rx_second = table.register("second", "serverinfo").unwrap();

        let outcome = table.dispatch(reply(json!({"action": "serverinfo", "tag": 1})));
        assert_eq!(
            outcome,
            Dispatch::Delivered {
                correlation_id: "first".into(),
                matched_by: MatchedBy::Action
            }
        );
        table.dispatch(reply(json!({"action": "serverinfo", "tag": 2})));

        assert_eq!(rx_first.await.unwrap().unwrap()["tag"], 1);
        assert_eq!(rx_second.await.unwrap().unwrap()["tag"], 2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn unknown_id_is_dropped_without_fallback() {
        let table = PendingTable::new();
        let _rx = table.register("live", "meshes").unwrap();
        let outcome = table.dispatch(reply(json!({"action": "meshes", "responseid": "stale"})));
        assert_eq!(outcome, Dispatch::Dropped);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn unsolicited_event_is_dropped() {
        let table = PendingTable::new();
        let _rx = table.register("live", "meshes").unwrap();
        assert_eq!(table.dispatch(reply(json!({"action": "event"}))), Dispatch::Dropped);
        assert_eq!(table.dispatch(reply(json!({"nothing": true}))), Dispatch::Dropped);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let table = PendingTable::new();
        let _rx = table.register("dup", "meshes").unwrap();
        let err = table.register("dup", "nodes").unwrap_err();
        assert!(matches!(err, Error::DuplicateCorrelationId(id) if id == "dup"));
    }

    #[tokio::test]
    async fn fail_all_resolves_everyone_and_closes() {
        let table = PendingTable::new();
        let rxs: Vec<_> = (0..5)
            .map(|i| table.register(&format!("c{i}"), "meshes").unwrap())
            .collect();

        assert_eq!(table.fail_all(), 5);
        for rx in rxs {
            assert!(matches!(rx.await.unwrap(), Err(Error::ConnectionClosed)));
        }
        assert!(table.is_empty());
        assert!(matches!(
            table.register("late", "meshes"),
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn removed_call_gets_cancelled_and_late_reply_is_dropped() {
        let table = PendingTable::new();
        let rx = table.register("gone", "meshes").unwrap();
        let _rx_next = table.register("next", "meshes").unwrap();

        assert!(table.remove("gone", "cancelled"));
        assert!(!table.remove("gone", "cancelled"));
        assert!(matches!(rx.await.unwrap(), Err(Error::Cancelled)));

        let outcome = table.dispatch(reply(json!({"action": "meshes", "responseid": "gone"})));
        assert_eq!(outcome, Dispatch::Dropped);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn fallback_skips_callers_that_went_away() {
        let table = PendingTable::new();
        let rx_dead = table.register("dead", "nodes").unwrap();
        let _rx_live = table.register("live", "nodes").unwrap();
        drop(rx_dead);

        let outcome = table.dispatch(reply(json!({"action": "nodes"})));
        assert_eq!(
            outcome,
            Dispatch::Delivered {
                correlation_id: "live".into(),
                matched_by: MatchedBy::Action
            }
        );
        assert!(table.is_empty());
    }
}
