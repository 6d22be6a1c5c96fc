//! Session lifecycle for one simulator link.
//!
//! The supervisor opens and closes the link, turns link events into
//! [`SupervisorEvent`]s, and keeps the session alive: an unsolicited
//! disconnect always reconnects, and a link error triggers one guarded
//! recovery.
//!
//! # Threads
//!
//! - A dispatcher thread consumes [`LinkEvent`]s in arrival order.
//! - Each poll timer has its own worker (see [`crate::poller`]).
//! - Reconnect cycles started by link events run on a short-lived thread so
//!   the dispatcher keeps draining while a cycle waits out its drain delay.
//!
//! Every lifecycle call bumps an epoch. A cycle only tears down or opens the
//! link while its epoch is current, so at most one cycle ends up opening a
//! session, and `stop` cancels any pending reconnect. Teardown and connect
//! handling both run under the `lifecycle` lock: once `stop` returns, no
//! timer exists until the next session connects.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::config::SupervisorConfig;
use crate::definitions::{DataCategory, HudBarType};
use crate::error::LinkError;
use crate::events::{EventBus, SupervisorEvent};
use crate::flight::{CameraState, FlightStateDetector, FlightTransition};
use crate::hud::{HudSelector, HudState};
use crate::link::{LinkEvent, SimulatorLink};
use crate::poller::TelemetryPoller;
use crate::sequencer::{ActuationSequencer, SequencerTiming};
use crate::telemetry::{SimDataItem, SnapshotCell, TelemetrySnapshot, CAMERA_STATE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connected,
}

const NOT_OPEN: u64 = u64::MAX;
const IDLE: u64 = u64::MAX;

struct Shared<L: SimulatorLink> {
    link: Arc<L>,
    config: SupervisorConfig,
    link_tx: Sender<LinkEvent>,
    bus: EventBus,
    poller: Arc<TelemetryPoller>,
    hud: HudSelector<L>,
    sequencer: ActuationSequencer<L>,
    snapshot: SnapshotCell,
    detector: Mutex<FlightStateDetector>,
    session: Mutex<SessionState>,

    // RecoveryGuard: epoch of the running recovery, IDLE when none.
    recovering: AtomicU64,
    recoveries: AtomicU64,

    lifecycle: Mutex<()>,
    epoch: AtomicU64,
    // Epoch of the cycle whose open is current; NOT_OPEN when closed.
    open_epoch: AtomicU64,
}

pub struct ConnectionSupervisor<L: SimulatorLink> {
    shared: Arc<Shared<L>>,
    shutdown_tx: Sender<()>,
    dispatcher: Option<JoinHandle<()>>,
}

impl<L: SimulatorLink> ConnectionSupervisor<L> {
    pub fn new(link: Arc<L>, config: SupervisorConfig) -> Self {
        let config = config.normalized();
        let (link_tx, link_rx) = unbounded::<LinkEvent>();
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let poller = Arc::new(TelemetryPoller::new(
            config.required_interval,
            config.hud_interval,
        ));
        let snapshot = SnapshotCell::new();
        let hud = HudSelector::new(link.clone(), poller.clone(), config.hud_settle_delay);
        let sequencer = ActuationSequencer::new(
            link.clone(),
            snapshot.clone(),
            SequencerTiming {
                telemetry_refresh_wait: config.telemetry_refresh_wait,
                settle: config.actuation_settle_delay,
            },
        );

        let shared = Arc::new(Shared {
            link,
            config,
            link_tx,
            bus: EventBus::new(),
            poller,
            hud,
            sequencer,
            snapshot,
            detector: Mutex::new(FlightStateDetector::new()),
            session: Mutex::new(SessionState::Disconnected),
            recovering: AtomicU64::new(IDLE),
            recoveries: AtomicU64::new(0),
            lifecycle: Mutex::new(()),
            epoch: AtomicU64::new(0),
            open_epoch: AtomicU64::new(NOT_OPEN),
        });

        let weak = Arc::downgrade(&shared);
        let dispatcher = thread::spawn(move || dispatch_loop(weak, link_rx, shutdown_rx));

        Self {
            shared,
            shutdown_tx,
            dispatcher: Some(dispatcher),
        }
    }

    pub fn subscribe(&self) -> Receiver<SupervisorEvent> {
        self.shared.bus.subscribe()
    }

    /// Stops any session, waits the drain delay, opens a new one. Open
    /// failures surface as `Error` events and start the recovery loop.
    pub fn start(&self) {
        info!("starting simulator session");
        self.shared.cycle();
    }

    pub fn stop(&self, is_application_exit: bool) {
        info!(app_exit = is_application_exit, "stopping simulator session");
        let epoch = self.shared.next_epoch();
        self.shared.teardown(epoch, !is_application_exit);
    }

    pub fn stop_and_reconnect(&self) {
        info!("reconnecting simulator session");
        self.shared.cycle();
    }

    pub fn set_hud_bar_config(&self, config: HudBarType) {
        self.shared.hud.set_hud_bar_config(config);
    }

    pub fn stop_hud_bar(&self) {
        self.shared.hud.stop_hud_bar();
    }

    pub fn hud_state(&self) -> HudState {
        self.shared.hud.state()
    }

    pub fn sequencer(&self) -> &ActuationSequencer<L> {
        &self.shared.sequencer
    }

    pub fn session_state(&self) -> SessionState {
        *self.shared.session.lock()
    }

    pub fn latest_snapshot(&self) -> Option<Arc<TelemetrySnapshot>> {
        self.shared.snapshot.latest()
    }

    pub fn camera_state(&self) -> CameraState {
        self.shared.detector.lock().current()
    }

    pub fn reset_flight_detector(&self) {
        self.shared.detector.lock().reset();
    }

    pub fn is_required_polling(&self) -> bool {
        self.shared.poller.is_required_running()
    }

    pub fn is_hud_polling(&self) -> bool {
        self.shared.poller.is_hud_running()
    }

    pub fn is_recovering(&self) -> bool {
        self.shared.recovering.load(Ordering::Acquire) != IDLE
    }

    /// Error-triggered recoveries started since construction.
    pub fn recoveries_started(&self) -> u64 {
        self.shared.recoveries.load(Ordering::Acquire)
    }
}

impl<L: SimulatorLink> Drop for ConnectionSupervisor<L> {
    fn drop(&mut self) {
        self.stop(true);
        let _ = self.shutdown_tx.send(());
        if let Some(h) = self.dispatcher.take() {
            let _ = h.join();
        }
    }
}

fn dispatch_loop<L: SimulatorLink>(
    shared: Weak<Shared<L>>,
    link_rx: Receiver<LinkEvent>,
    shutdown_rx: Receiver<()>,
) {
    loop {
        select! {
            recv(link_rx) -> ev => {
                let Ok(ev) = ev else { break };
                let Some(s) = shared.upgrade() else { break };
                s.dispatch(ev);
            }
            recv(shutdown_rx) -> _ => break,
        }
    }
    trace!("link event dispatcher exited");
}

impl<L: SimulatorLink> Shared<L> {
    fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// No start/stop happened since the current session was opened.
    fn is_live(&self) -> bool {
        self.open_epoch.load(Ordering::Acquire) == self.epoch.load(Ordering::Acquire)
    }

    /// Moves the epoch past `current`, failing if another lifecycle call
    /// already did.
    fn claim_after(&self, current: u64) -> Option<u64> {
        if current == NOT_OPEN {
            return None;
        }
        self.epoch
            .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| current + 1)
    }

    fn set_session(&self, state: SessionState) -> SessionState {
        std::mem::replace(&mut *self.session.lock(), state)
    }

    /// Drops both timers, closes the link, and publishes `Disconnected` once
    /// if a connected session ended and `notify` is set. Returns false, doing
    /// nothing, when `epoch` has been superseded.
    fn teardown(&self, epoch: u64, notify: bool) -> bool {
        let was = {
            let _l = self.lifecycle.lock();
            if self.epoch.load(Ordering::Acquire) != epoch {
                debug!(epoch, "teardown superseded");
                return false;
            }
            self.poller.release();
            self.open_epoch.store(NOT_OPEN, Ordering::Release);
            if let Err(e) = self.link.close() {
                debug!(error = %e, "close failed");
            }
            self.set_session(SessionState::Disconnected)
        };
        if notify && was == SessionState::Connected {
            self.bus.publish(SupervisorEvent::Disconnected);
        }
        true
    }

    /// Waits the drain delay, then opens unless superseded. `None` means a
    /// newer lifecycle call took over.
    fn open_after_drain(&self, epoch: u64) -> Option<Result<(), LinkError>> {
        thread::sleep(self.config.drain_delay);
        let _l = self.lifecycle.lock();
        if self.epoch.load(Ordering::Acquire) != epoch {
            debug!(epoch, "reconnect superseded");
            return None;
        }
        self.open_epoch.store(epoch, Ordering::Release);
        let r = self.link.open(self.link_tx.clone());
        if r.is_err() {
            self.open_epoch.store(NOT_OPEN, Ordering::Release);
        }
        Some(r)
    }

    fn cycle(self: &Arc<Self>) {
        let epoch = self.next_epoch();
        self.run_cycle(epoch);
    }

    /// Stop, drain, open. A failed open escalates like a link error.
    fn run_cycle(self: &Arc<Self>, epoch: u64) {
        if !self.teardown(epoch, true) {
            return;
        }
        if let Some(Err(e)) = self.open_after_drain(epoch) {
            self.escalate(format!("open failed: {e}"), epoch);
        }
    }

    /// Publishes the error and, if `epoch` is still current and no recovery
    /// is running for it, stops polling and starts one.
    fn escalate(self: &Arc<Self>, message: String, epoch: u64) {
        warn!(error = %message, "simulator session error");
        self.bus.publish(SupervisorEvent::Error(message));

        let running = self.recovering.load(Ordering::Acquire);
        if running != IDLE && running == self.epoch.load(Ordering::Acquire) {
            warn!("recovery already in progress; error dropped");
            return;
        }
        // Claimed before spawning so a stop issued meanwhile still wins. Only
        // one caller can claim a given epoch.
        let Some(epoch) = self.claim_after(epoch) else {
            debug!("error from a closed session; no recovery");
            return;
        };
        // A superseded recovery still exits on its own.
        self.recovering.store(epoch, Ordering::Release);
        self.poller.stop_all();
        self.recoveries.fetch_add(1, Ordering::AcqRel);

        let me = self.clone();
        thread::spawn(move || {
            me.recover(epoch);
            let _ = me.recovering.compare_exchange(
                epoch,
                IDLE,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        });
    }

    /// Reconnects until an open succeeds or a newer lifecycle call takes over.
    fn recover(&self, epoch: u64) {
        loop {
            if !self.teardown(epoch, true) {
                return;
            }
            match self.open_after_drain(epoch) {
                None => return,
                Some(Ok(())) => {
                    info!("simulator session recovered");
                    return;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "reconnect attempt failed");
                    self.bus.publish(SupervisorEvent::Error(format!("open failed: {e}")));
                }
            }
        }
    }

    fn dispatch(self: &Arc<Self>, ev: LinkEvent) {
        match ev {
            LinkEvent::Connected => self.on_connected(),
            LinkEvent::Disconnected => self.on_disconnected(),
            LinkEvent::Error(message) => {
                let open = self.open_epoch.load(Ordering::Acquire);
                self.escalate(message, open);
            }
            LinkEvent::SystemEvent(e) => {
                trace!(event = %e.name, data = e.data, "system event");
            }
            LinkEvent::DataReceived(DataCategory::Required, items) => self.on_required_data(items),
            LinkEvent::DataReceived(DataCategory::Hud, items) => {
                let snapshot = Arc::new(TelemetrySnapshot::new(items));
                self.bus.publish(SupervisorEvent::HudDataRefreshed(snapshot));
            }
            LinkEvent::ActiveAircraftChanged(name) => {
                self.bus.publish(SupervisorEvent::ActiveAircraftChanged(name));
            }
        }
    }

    fn on_connected(&self) {
        let _l = self.lifecycle.lock();
        if !self.is_live() {
            debug!("connect from a superseded session ignored");
            return;
        }
        self.poller.recreate(&self.link);
        self.poller.start_required();
        self.hud.restore();

        // A stop may have landed during the HUD settle wait.
        if !self.is_live() {
            self.poller.release();
            debug!("session stopped while connecting");
            return;
        }
        let was = self.set_session(SessionState::Connected);
        if was == SessionState::Connected {
            return;
        }
        info!("simulator connected");
        self.bus.publish(SupervisorEvent::Connected);
    }

    fn on_disconnected(self: &Arc<Self>) {
        let Some(epoch) = self.claim_after(self.open_epoch.load(Ordering::Acquire)) else {
            debug!("disconnect from a closed session ignored");
            return;
        };
        info!("simulator disconnected");
        self.poller.stop_all();
        if self.set_session(SessionState::Disconnected) == SessionState::Connected {
            self.bus.publish(SupervisorEvent::Disconnected);
        }
        let me = self.clone();
        thread::spawn(move || me.run_cycle(epoch));
    }

    fn on_required_data(&self, items: Vec<SimDataItem>) {
        let snapshot = Arc::new(TelemetrySnapshot::new(items));
        self.snapshot.replace(snapshot.clone());

        if let Some(mode) = snapshot.get_i32(CAMERA_STATE) {
            let transitions = self.detector.lock().observe(mode);
            let mut flight_stopped = false;
            for t in transitions {
                let ev = match t {
                    FlightTransition::FlightStarted => {
                        info!("flight started");
                        SupervisorEvent::FlightStarted
                    }
                    FlightTransition::FlightStopped => {
                        info!("flight stopped");
                        flight_stopped = true;
                        SupervisorEvent::FlightStopped
                    }
                    FlightTransition::CockpitChanged(in_cockpit) => {
                        SupervisorEvent::IsInCockpitChanged(in_cockpit)
                    }
                };
                self.bus.publish(ev);
            }
            if flight_stopped {
                self.hud.clear();
            }
        }

        self.bus.publish(SupervisorEvent::RequiredDataRefreshed(snapshot));
    }
}
