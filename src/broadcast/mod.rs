//! Dashboard fan-out.
//!
//! The [`Broadcaster`] keeps the set of authenticated dashboard clients. Each
//! member owns a bounded outbound queue; a broadcast serializes the envelope
//! once and offers it to every queue without waiting. Full queues drop the
//! frame for that member only. Closed queues are pruned.

pub mod auth;
pub mod session;

pub use auth::{
    authenticator_for, AuthError, DashboardAuthenticator, DashboardPrincipal,
    SharedSecretAuthenticator, SignedTokenAuthenticator,
};
pub use session::DashboardSession;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::ingest::TelemetryForwarder;
use crate::telemetry::{DashboardFrame, TelemetryMap, TelemetryMessage};

struct Member {
    subject: String,
    tx: mpsc::Sender<Arc<str>>,
}

/// Receiving half handed to a dashboard session.
pub struct Subscription {
    pub id: u64,
    pub frames: mpsc::Receiver<Arc<str>>,
}

pub struct Broadcaster {
    members: Mutex<HashMap<u64, Member>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Broadcaster {
    pub fn new(buffer: usize) -> Self {
        Self {
            members: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Member>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an authenticated client.
    pub fn subscribe(&self, subject: &str) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, frames) = mpsc::channel(self.buffer);
        let mut members = self.lock();
        members.insert(
            id,
            Member {
                subject: subject.to_string(),
                tx,
            },
        );
        info!(member = id, subject, clients = members.len(), "Dashboard subscribed");
        Subscription { id, frames }
    }

    pub fn unsubscribe(&self, id: u64) {
        let mut members = self.lock();
        if let Some(member) = members.remove(&id) {
            info!(member = id, subject = %member.subject, clients = members.len(), "Dashboard unsubscribed");
        }
    }

    pub fn member_count(&self) -> usize {
        self.lock().len()
    }

    /// Offer one telemetry envelope to every member. Returns how many accepted it.
    pub fn broadcast(&self, vin: &str, data: &TelemetryMap) -> usize {
        let frame = DashboardFrame::Telemetry {
            vin,
            timestamp: Utc::now().timestamp_millis(),
            data,
        };
        let text: Arc<str> = match frame.to_json() {
            Ok(text) => text.into(),
            Err(e) => {
                warn!(vin, error = %e, "Failed to encode telemetry envelope");
                return 0;
            }
        };

        let mut members = self.lock();
        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, member) in members.iter() {
            match member.tx.try_send(Arc::clone(&text)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(member = id, subject = %member.subject, vin, "Dashboard queue full, dropping frame");
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }
        for id in closed {
            members.remove(&id);
            debug!(member = id, "Pruned closed dashboard member");
        }
        debug!(vin, delivered, clients = members.len(), "Broadcast telemetry");
        delivered
    }
}

impl TelemetryForwarder for Broadcaster {
    fn forward(&self, vin: &str, message: &TelemetryMessage) {
        self.broadcast(vin, &message.data);
    }
}
