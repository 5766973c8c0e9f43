//! Test doubles for the registry: an in-memory transport that records what
//! was written and a validator that trusts its input.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use taskfeed_auth::{AuthError, SessionClaim, TokenValidator};
use taskfeed_core::{DomainEvent, TaskId, TaskSnapshot, UserId};
use tokio::sync::watch;

use super::transport::{CloseReason, Transport, TransportError};

/// Accepts any non-empty credential as the user id. `"expired"` is rejected
/// as expired.
pub(crate) struct StaticValidator;

impl TokenValidator for StaticValidator {
    fn validate(&self, credential: &str) -> Result<SessionClaim, AuthError> {
        match credential {
            "" => Err(AuthError::Missing),
            "expired" => Err(AuthError::Expired),
            user => Ok(SessionClaim {
                user_id: UserId::from(user),
                expires_at: Utc::now() + chrono::Duration::hours(1),
            }),
        }
    }
}

#[derive(Default)]
struct Record {
    sent: Vec<String>,
    attempts: usize,
    pings: usize,
    closes: Vec<CloseReason>,
}

enum Behavior {
    Ok,
    Fail,
    PanicOn(&'static str),
}

/// Handle for inspecting and steering a [`CountingTransport`].
#[derive(Clone)]
pub(crate) struct TransportProbe {
    record: Arc<Mutex<Record>>,
    gate: Arc<watch::Sender<bool>>,
}

impl TransportProbe {
    /// Every text frame written, greeting included.
    pub(crate) fn sent(&self) -> Vec<String> {
        self.record.lock().sent.clone()
    }

    /// Text frames other than the greeting.
    pub(crate) fn events(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|s| !s.contains("connection_established"))
            .collect()
    }

    /// Calls to `send_text`, including blocked and failed ones.
    pub(crate) fn attempts(&self) -> usize {
        self.record.lock().attempts
    }

    pub(crate) fn pings(&self) -> usize {
        self.record.lock().pings
    }

    pub(crate) fn close_count(&self) -> usize {
        self.record.lock().closes.len()
    }

    pub(crate) fn close_reasons(&self) -> Vec<CloseReason> {
        self.record.lock().closes.clone()
    }

    /// Let blocked writes through.
    pub(crate) fn release(&self) {
        let _ = self.gate.send_replace(true);
    }
}

/// Records writes and closes; can be stalled, made to fail or to panic.
pub(crate) struct CountingTransport {
    record: Arc<Mutex<Record>>,
    gate: watch::Receiver<bool>,
    behavior: Behavior,
}

impl CountingTransport {
    fn build(open: bool, behavior: Behavior) -> (Self, TransportProbe) {
        let record = Arc::new(Mutex::new(Record::default()));
        let (tx, rx) = watch::channel(open);
        let transport = Self {
            record: Arc::clone(&record),
            gate: rx,
            behavior,
        };
        let probe = TransportProbe {
            record,
            gate: Arc::new(tx),
        };
        (transport, probe)
    }

    /// A well-behaved client.
    pub(crate) fn new() -> (Self, TransportProbe) {
        Self::build(true, Behavior::Ok)
    }

    /// Writes block until [`TransportProbe::release`].
    pub(crate) fn stalled() -> (Self, TransportProbe) {
        Self::build(false, Behavior::Ok)
    }

    /// Every write fails.
    pub(crate) fn failing() -> (Self, TransportProbe) {
        Self::build(true, Behavior::Fail)
    }

    /// Panics when asked to write text containing `needle`.
    pub(crate) fn panicking_on(needle: &'static str) -> (Self, TransportProbe) {
        Self::build(true, Behavior::PanicOn(needle))
    }
}

#[async_trait]
impl Transport for CountingTransport {
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        self.record.lock().attempts += 1;
        match self.behavior {
            Behavior::Fail => return Err(TransportError("connection reset".into())),
            Behavior::PanicOn(needle) if text.contains(needle) => {
                panic!("transport exploded on {needle}")
            }
            _ => {}
        }
        let opened = self.gate.wait_for(|open| *open).await.is_ok();
        if !opened {
            return Err(TransportError("gate dropped".into()));
        }
        self.record.lock().sent.push(text.to_string());
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.record.lock().pings += 1;
        Ok(())
    }

    async fn close(&mut self, reason: CloseReason) {
        self.record.lock().closes.push(reason);
    }
}

/// Poll `cond` until it holds, failing the test after two seconds.
pub(crate) async fn eventually(cond: impl Fn() -> bool) {
    let wait = async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .expect("condition not reached within 2s");
}

fn snapshot(id: i64, title: &str) -> TaskSnapshot {
    let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    TaskSnapshot {
        id: TaskId::new(id),
        title: title.to_string(),
        description: None,
        completed: false,
        created_at: at,
        updated_at: at,
    }
}

pub(crate) fn created(id: i64, title: &str) -> DomainEvent {
    DomainEvent::TaskCreated(snapshot(id, title))
}

pub(crate) fn updated(id: i64, title: &str) -> DomainEvent {
    DomainEvent::TaskUpdated(snapshot(id, title))
}
