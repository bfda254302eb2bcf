//! Membership registry: the only state shared between server sessions.
//!
//! Each registered username maps to an [`Outbound`] handle, the sending half
//! of a bounded queue drained by that connection's writer task. Delivering a
//! line never waits on the peer, so one slow or dead connection can only lose
//! its own messages.

use std::{collections::BTreeMap, num::NonZeroUsize};

use tokio::sync::{
    Mutex,
    mpsc::{self, error::TrySendError},
};
use tracing::{debug, warn};

use crate::protocol::ServerLine;

/// Lines a connection may have queued before further deliveries are dropped.
pub const DEFAULT_OUTBOUND_CAPACITY: NonZeroUsize = match NonZeroUsize::new(128) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

/// Write handle for one connection.
#[derive(Debug, Clone)]
pub struct Outbound {
    queue: mpsc::Sender<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The connection has fallen too far behind.
    QueueFull,
    /// The connection's writer has stopped.
    Disconnected,
}

impl Outbound {
    pub fn channel(capacity: NonZeroUsize) -> (Self, mpsc::Receiver<String>) {
        let (queue, receiver) = mpsc::channel(capacity.get());
        (Self { queue }, receiver)
    }

    /// Queues `line` for the connection without waiting.
    pub fn deliver(&self, line: &str) -> Result<(), DeliveryError> {
        self.queue.try_send(line.to_string()).map_err(|err| match err {
            TrySendError::Full(_) => DeliveryError::QueueFull,
            TrySendError::Closed(_) => DeliveryError::Disconnected,
        })
    }
}

/// Logs a failed delivery. Failures are per target and never propagate.
pub fn log_failed_delivery(target: &str, error: DeliveryError) {
    match error {
        DeliveryError::QueueFull => warn!(%target, "outbound queue full; dropping line"),
        DeliveryError::Disconnected => debug!(%target, "target disconnected; dropping line"),
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    members: Mutex<BTreeMap<String, Outbound>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `requested`, appending `_2`, `_3`, ... when the name is
    /// taken. Picking the name and inserting it happen under one lock.
    pub async fn register(&self, requested: &str, handle: Outbound) -> String {
        let mut members = self.members.lock().await;
        let assigned = unique_name(requested, |candidate| members.contains_key(candidate));
        members.insert(assigned.clone(), handle);
        assigned
    }

    /// Returns whether `name` was registered.
    pub async fn unregister(&self, name: &str) -> bool {
        self.members.lock().await.remove(name).is_some()
    }

    pub async fn lookup(&self, name: &str) -> Option<Outbound> {
        self.members.lock().await.get(name).cloned()
    }

    /// Registered names in sorted order.
    pub async fn snapshot(&self) -> Vec<String> {
        self.members.lock().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.members.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.lock().await.is_empty()
    }

    /// Sends `line` to every registered connection and returns how many
    /// accepted it.
    ///
    /// Targets are snapshotted and the lock released before delivery, so a
    /// concurrent join may or may not see this line.
    pub async fn broadcast(&self, line: &str) -> usize {
        let targets: Vec<(String, Outbound)> = {
            let members = self.members.lock().await;
            members
                .iter()
                .map(|(name, handle)| (name.clone(), handle.clone()))
                .collect()
        };

        let mut delivered = 0;
        for (name, handle) in &targets {
            match handle.deliver(line) {
                Ok(()) => delivered += 1,
                Err(error) => log_failed_delivery(name, error),
            }
        }
        delivered
    }

    /// Broadcasts the current roster to everyone, unfiltered.
    ///
    /// The roster is built and queued under one lock acquisition, so rosters
    /// reach every connection in the order the membership changed.
    pub async fn broadcast_roster(&self) -> usize {
        let members = self.members.lock().await;
        let roster = ServerLine::Roster {
            names: members.keys().cloned().collect(),
        }
        .to_string();

        let mut delivered = 0;
        for (name, handle) in members.iter() {
            match handle.deliver(&roster) {
                Ok(()) => delivered += 1,
                Err(error) => log_failed_delivery(name, error),
            }
        }
        delivered
    }
}

fn unique_name<F>(requested: &str, taken: F) -> String
where
    F: Fn(&str) -> bool,
{
    if !taken(requested) {
        return requested.to_string();
    }

    let mut suffix = 2u64;
    loop {
        let candidate = format!("{requested}_{suffix}");
        if !taken(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}
