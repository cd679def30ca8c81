//! In-process completion events.
//!
//! When a processing job finishes, interested parts of the app (Salesforce
//! upload view, history view) learn about it through this bus rather than by
//! polling the controller. Delivery is synchronous on the publisher's task;
//! a panicking listener is isolated and never takes down delivery to others.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::warn;

use crate::api::types::JobStatus;

/// History keeps at most this many events.
const HISTORY_CAP: usize = 10;
/// History keeps events no older than this.
const HISTORY_MAX_AGE: Duration = Duration::from_secs(300);

/// Announcement that a backend processing job reached a terminal state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingCompleted {
    pub processing_id: String,
    pub file_name: String,
    pub status: JobStatus,
    pub result_url: Option<String>,
    pub record_count: Option<u64>,
    /// Unix timestamp (seconds) of publication.
    pub completed_at: u64,
}

type Listener = Arc<dyn Fn(&ProcessingCompleted) + Send + Sync>;

#[derive(Default)]
struct BusState {
    listeners: Vec<(u64, Listener)>,
    history: VecDeque<(Instant, ProcessingCompleted)>,
}

/// Fan-out bus for [`ProcessingCompleted`] events.
#[derive(Default)]
pub struct ProcessingEventBus {
    state: Mutex<BusState>,
    next_id: AtomicU64,
}

impl ProcessingEventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a listener. It stays subscribed until the returned
    /// [`Subscription`] is dropped.
    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(&ProcessingCompleted) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.state
            .lock()
            .unwrap()
            .listeners
            .push((id, Arc::new(listener)));
        Subscription {
            id,
            bus: Arc::downgrade(self),
        }
    }

    /// Delivers an event to every current listener, then records it.
    ///
    /// Listeners run synchronously but outside the bus lock, so a listener
    /// may subscribe or publish without deadlocking. A panicking listener is
    /// logged and skipped.
    pub fn publish(&self, event: ProcessingCompleted) {
        let listeners: Vec<(u64, Listener)> = self.state.lock().unwrap().listeners.clone();
        for (id, listener) in &listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                warn!("[EVENTS] Listener {} panicked handling {}", id, event.processing_id);
            }
        }

        let mut state = self.state.lock().unwrap();
        state.history.push_back((Instant::now(), event));
        Self::prune(&mut state.history);
    }

    /// Recent events, newest last. At most 10, none older than 5 minutes.
    pub fn recent(&self) -> Vec<ProcessingCompleted> {
        let mut state = self.state.lock().unwrap();
        Self::prune(&mut state.history);
        state.history.iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().unwrap().listeners.len()
    }

    fn prune(history: &mut VecDeque<(Instant, ProcessingCompleted)>) {
        let now = Instant::now();
        while let Some((at, _)) = history.front() {
            if now.duration_since(*at) > HISTORY_MAX_AGE {
                history.pop_front();
            } else {
                break;
            }
        }
        while history.len() > HISTORY_CAP {
            history.pop_front();
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.state
            .lock()
            .unwrap()
            .listeners
            .retain(|(lid, _)| *lid != id);
    }
}

/// RAII handle for a bus subscription; dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    bus: Weak<ProcessingEventBus>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}
