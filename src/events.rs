// -----------------------------
// Upward notifications
// -----------------------------

use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::telemetry::TelemetrySnapshot;

#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    Connected,
    Disconnected,
    IsInCockpitChanged(bool),
    FlightStarted,
    FlightStopped,
    Error(String),
    RequiredDataRefreshed(Arc<TelemetrySnapshot>),
    HudDataRefreshed(Arc<TelemetrySnapshot>),
    ActiveAircraftChanged(String),
}

/// Fan-out to any number of subscribers. Channels are unbounded so a
/// publisher never waits on a slow consumer; dropped receivers are pruned.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<SupervisorEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<SupervisorEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: SupervisorEvent) {
        let mut subs = self.subscribers.lock();
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
