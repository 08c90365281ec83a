//! In-process request/response bus used to carry encoded command frames
//! between a requester and the entity that hosts the commands.
//!
//! Requests are routed to whichever listener is bound at the destination
//! address. Responses are matched back to the pending request by correlation
//! id, so a listener only ever needs `send` to answer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Request,
    Response,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub correlation_id: u64,
    pub from: String,
    pub to: String,
    pub payload: Bytes,
}

impl Envelope {
    /// Builds a request frame. The correlation id is assigned by the bus.
    pub fn request(from: impl Into<String>, to: impl Into<String>, payload: Bytes) -> Self {
        Self {
            kind: EnvelopeKind::Request,
            correlation_id: 0,
            from: from.into(),
            to: to.into(),
            payload,
        }
    }

    /// Builds the response frame answering this request.
    pub fn reply(&self, payload: Bytes) -> Self {
        Self {
            kind: EnvelopeKind::Response,
            correlation_id: self.correlation_id,
            from: self.to.clone(),
            to: self.from.clone(),
            payload,
        }
    }
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus channel closed")]
    Closed,
    #[error("address {0} is already bound")]
    AddressInUse(String),
    #[error("no listener bound at {0}")]
    Unreachable(String),
    #[error("no pending request for correlation id {0}")]
    UnknownCorrelation(u64),
}

pub type BusResult<T> = Result<T, BusError>;

pub trait Bus: Send + Sync {
    /// Claims `address` and returns the queue of requests sent to it.
    fn bind(&self, address: &str) -> BusResult<mpsc::UnboundedReceiver<Envelope>>;
    fn unbind(&self, address: &str);
    /// Fire-and-forget delivery of a request or response frame.
    fn send(&self, envelope: Envelope) -> BusResult<()>;
    /// Sends a request and returns a handle resolving to its correlated response.
    fn request(&self, envelope: Envelope) -> BusResult<PendingReply>;
}

/// Response half of an in-flight request.
#[derive(Debug)]
pub struct PendingReply {
    correlation_id: u64,
    receiver: oneshot::Receiver<Envelope>,
}

impl PendingReply {
    pub fn correlation_id(&self) -> u64 {
        self.correlation_id
    }

    pub async fn recv(self) -> BusResult<Envelope> {
        self.receiver.await.map_err(|_| BusError::Closed)
    }
}

/// Simple in-memory bus for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct LocalBus {
    listeners: parking_lot::RwLock<HashMap<String, mpsc::UnboundedSender<Envelope>>>,
    pending: parking_lot::Mutex<HashMap<u64, oneshot::Sender<Envelope>>>,
    next_correlation: AtomicU64,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    fn route(&self, envelope: Envelope) -> BusResult<()> {
        let guard = self.listeners.read();
        let Some(listener) = guard.get(&envelope.to) else {
            return Err(BusError::Unreachable(envelope.to));
        };
        listener.send(envelope).map_err(|_| BusError::Closed)
    }
}

impl Bus for LocalBus {
    fn bind(&self, address: &str) -> BusResult<mpsc::UnboundedReceiver<Envelope>> {
        let mut guard = self.listeners.write();
        if guard.get(address).is_some_and(|tx| !tx.is_closed()) {
            return Err(BusError::AddressInUse(address.to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        guard.insert(address.to_string(), tx);
        Ok(rx)
    }

    fn unbind(&self, address: &str) {
        self.listeners.write().remove(address);
    }

    fn send(&self, envelope: Envelope) -> BusResult<()> {
        match envelope.kind {
            EnvelopeKind::Request => self.route(envelope),
            EnvelopeKind::Response => {
                let waiter = self.pending.lock().remove(&envelope.correlation_id);
                match waiter {
                    // The requester may have given up; that is not an error for the sender.
                    Some(tx) => {
                        let _ = tx.send(envelope);
                        Ok(())
                    }
                    None => Err(BusError::UnknownCorrelation(envelope.correlation_id)),
                }
            }
        }
    }

    fn request(&self, mut envelope: Envelope) -> BusResult<PendingReply> {
        let correlation_id = self.next_correlation.fetch_add(1, Ordering::Relaxed) + 1;
        envelope.kind = EnvelopeKind::Request;
        envelope.correlation_id = correlation_id;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(correlation_id, tx);
        if let Err(err) = self.route(envelope) {
            self.pending.lock().remove(&correlation_id);
            return Err(err);
        }

        Ok(PendingReply {
            correlation_id,
            receiver: rx,
        })
    }
}
