//! End-to-end tests for the connection supervisor.
//!
//! A scripted in-memory link stands in for SimConnect: tests push samples and
//! link events into it and observe the supervisor's published events.
//!
//! Run with: `cargo test --test supervisor_integration`

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use simconnect_supervisor::telemetry::{CAMERA_STATE, PLANE_IN_PARKING_SPOT, TRACK_IR_ENABLE};
use simconnect_supervisor::{
    ActionEvent, ConnectionSupervisor, DataCategory, HudBarType, HudDefinition, LinkError,
    LinkEvent, SessionState, SimDataItem, SimulatorLink, SupervisorConfig, SupervisorEvent,
    WritableVariable,
};

// ============================================================================
// Scripted link
// ============================================================================

#[derive(Default)]
struct LinkState {
    events: Option<Sender<LinkEvent>>,
    open: bool,
    opens: usize,
    closes: usize,
    fail_opens: usize,
    fail_requests: bool,
    pending: Vec<DataCategory>,
    required_samples: VecDeque<Vec<SimDataItem>>,
    hud_definitions: Vec<HudDefinition>,
    actions: Vec<(ActionEvent, u32)>,
    variables: Vec<(WritableVariable, f64)>,
}

#[derive(Default)]
struct ScriptedLink {
    state: Mutex<LinkState>,
}

impl ScriptedLink {
    fn failing_opens(n: usize) -> Self {
        let link = Self::default();
        link.state.lock().fail_opens = n;
        link
    }

    fn push_required(&self, sample: Vec<SimDataItem>) {
        self.state.lock().required_samples.push_back(sample);
    }

    fn emit(&self, ev: LinkEvent) {
        let tx = self.state.lock().events.clone();
        if let Some(tx) = tx {
            tx.send(ev).unwrap();
        }
    }

    fn opens(&self) -> usize {
        self.state.lock().opens
    }

    fn hud_definitions(&self) -> Vec<HudDefinition> {
        self.state.lock().hud_definitions.clone()
    }

    fn actions(&self) -> Vec<(ActionEvent, u32)> {
        self.state.lock().actions.clone()
    }
}

impl SimulatorLink for ScriptedLink {
    fn open(&self, events: Sender<LinkEvent>) -> Result<(), LinkError> {
        let mut st = self.state.lock();
        st.opens += 1;
        st.events = Some(events.clone());
        if st.fail_opens > 0 {
            st.fail_opens -= 1;
            return Err(LinkError::LibraryLoad("scripted failure".into()));
        }
        st.open = true;
        drop(st);
        events.send(LinkEvent::Connected).map_err(|_| LinkError::Closed)
    }

    fn close(&self) -> Result<(), LinkError> {
        let mut st = self.state.lock();
        st.closes += 1;
        st.open = false;
        st.pending.clear();
        Ok(())
    }

    fn request_data(&self, category: DataCategory) -> Result<(), LinkError> {
        let mut st = self.state.lock();
        if !st.open {
            return Err(LinkError::NotConnected);
        }
        if st.fail_requests {
            return Err(LinkError::Call {
                call: "request",
                hresult: "0x80004005".into(),
            });
        }
        st.pending.push(category);
        Ok(())
    }

    fn drain(&self) -> Result<(), LinkError> {
        let mut st = self.state.lock();
        let pending = std::mem::take(&mut st.pending);
        let Some(tx) = st.events.clone() else {
            return Ok(());
        };
        for category in pending {
            match category {
                DataCategory::Required => {
                    if let Some(sample) = st.required_samples.pop_front() {
                        let _ = tx.send(LinkEvent::DataReceived(category, sample));
                    }
                }
                DataCategory::Hud => {
                    let sample = vec![SimDataItem::new("SIMULATION RATE", 1.0)];
                    let _ = tx.send(LinkEvent::DataReceived(category, sample));
                }
            }
        }
        Ok(())
    }

    fn transmit_action(&self, action: ActionEvent, value: u32) -> Result<(), LinkError> {
        self.state.lock().actions.push((action, value));
        Ok(())
    }

    fn set_variable(&self, variable: WritableVariable, value: f64) -> Result<(), LinkError> {
        self.state.lock().variables.push((variable, value));
        Ok(())
    }

    fn set_hud_definition(&self, definition: HudDefinition) -> Result<(), LinkError> {
        let mut st = self.state.lock();
        st.hud_definitions.push(definition);
        if st.open {
            Ok(())
        } else {
            Err(LinkError::NotConnected)
        }
    }
}

// ============================================================================
// Test Helpers
// ============================================================================

const WAIT: Duration = Duration::from_secs(3);

fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        required_interval: Duration::from_millis(15),
        hud_interval: Duration::from_millis(15),
        drain_delay: Duration::from_millis(30),
        hud_settle_delay: Duration::from_millis(15),
        telemetry_refresh_wait: Duration::from_millis(40),
        actuation_settle_delay: Duration::from_millis(1),
        ..SupervisorConfig::default()
    }
}

fn supervisor(link: ScriptedLink) -> (Arc<ScriptedLink>, ConnectionSupervisor<ScriptedLink>) {
    supervisor_with(link, fast_config())
}

fn supervisor_with(
    link: ScriptedLink,
    config: SupervisorConfig,
) -> (Arc<ScriptedLink>, ConnectionSupervisor<ScriptedLink>) {
    let link = Arc::new(link);
    let sup = ConnectionSupervisor::new(link.clone(), config);
    (link, sup)
}

/// Long HUD settle wait, so a stop can land inside a HUD switch.
fn slow_hud_config() -> SupervisorConfig {
    SupervisorConfig {
        hud_settle_delay: Duration::from_millis(300),
        ..fast_config()
    }
}

fn assert_fully_stopped(sup: &ConnectionSupervisor<ScriptedLink>) {
    assert!(!sup.is_required_polling());
    assert!(!sup.is_hud_polling());
    assert_eq!(sup.session_state(), SessionState::Disconnected);
}

fn sample(camera: f64) -> Vec<SimDataItem> {
    vec![
        SimDataItem::new(CAMERA_STATE, camera),
        SimDataItem::new(PLANE_IN_PARKING_SPOT, 1.0),
        SimDataItem::new(TRACK_IR_ENABLE, 0.0),
    ]
}

/// Receives events until `pred` matches one, returning everything seen.
fn collect_until(
    rx: &Receiver<SupervisorEvent>,
    mut pred: impl FnMut(&SupervisorEvent) -> bool,
) -> Vec<SupervisorEvent> {
    let deadline = Instant::now() + WAIT;
    let mut seen = Vec::new();
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(left) {
            Ok(ev) => {
                let done = pred(&ev);
                seen.push(ev);
                if done {
                    return seen;
                }
            }
            Err(_) => panic!("timed out waiting for event; saw {seen:?}"),
        }
    }
}

fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}

/// Names events for order assertions, dropping data refreshes.
fn lifecycle(events: &[SupervisorEvent]) -> Vec<String> {
    events
        .iter()
        .filter(|e| {
            !matches!(
                e,
                SupervisorEvent::RequiredDataRefreshed(_) | SupervisorEvent::HudDataRefreshed(_)
            )
        })
        .map(|e| match e {
            SupervisorEvent::Error(_) => "Error".to_string(),
            other => format!("{other:?}"),
        })
        .collect()
}

fn is_refresh(e: &SupervisorEvent) -> bool {
    matches!(e, SupervisorEvent::RequiredDataRefreshed(_))
}

// ============================================================================
// Flight detection
// ============================================================================

#[test]
fn test_connect_then_flight_start() {
    let (link, sup) = supervisor(ScriptedLink::default());
    let rx = sup.subscribe();
    link.push_required(sample(15.0));
    link.push_required(sample(2.0));

    sup.start();
    let mut refreshes = 0;
    let events = collect_until(&rx, |e| {
        if is_refresh(e) {
            refreshes += 1;
        }
        refreshes == 2
    });

    assert_eq!(events[0], SupervisorEvent::Connected);
    assert_eq!(events.iter().filter(|e| is_refresh(e)).count(), 2);
    // Flight start precedes the cockpit entry, and both precede the refresh
    // of the sample that caused them.
    assert_eq!(
        lifecycle(&events),
        vec!["Connected", "FlightStarted", "IsInCockpitChanged(true)"]
    );
    assert!(!events.contains(&SupervisorEvent::FlightStopped));
    assert_eq!(sup.session_state(), SessionState::Connected);
    assert!(sup.is_required_polling());

    // Samples exhausted: no further refreshes, state is stable.
    thread::sleep(Duration::from_millis(60));
    assert!(rx.try_iter().all(|e| !is_refresh(&e)));
}

#[test]
fn test_flight_stop_tears_down_hud() {
    let (link, sup) = supervisor(ScriptedLink::default());
    let rx = sup.subscribe();
    sup.start();
    collect_until(&rx, |e| *e == SupervisorEvent::Connected);

    sup.set_hud_bar_config(HudBarType::GenericAircraft);
    assert!(sup.is_hud_polling());
    collect_until(&rx, |e| matches!(e, SupervisorEvent::HudDataRefreshed(_)));

    link.push_required(sample(15.0));
    link.push_required(sample(2.0));
    collect_until(&rx, |e| *e == SupervisorEvent::FlightStarted);
    assert!(sup.is_hud_polling());

    link.push_required(sample(15.0));
    let events = collect_until(&rx, |e| *e == SupervisorEvent::IsInCockpitChanged(false));
    let names = lifecycle(&events);
    let stopped = names.iter().position(|n| n == "FlightStopped").unwrap();
    assert_eq!(names[stopped + 1], "IsInCockpitChanged(false)");

    wait_for(|| !sup.is_hud_polling());
    let hud = sup.hud_state();
    assert!(!hud.active);
    assert_eq!(hud.config, HudBarType::None);
    assert!(sup.is_required_polling());
}

#[test]
fn test_unknown_camera_modes_do_not_mask_flight_stop() {
    let (link, sup) = supervisor(ScriptedLink::default());
    let rx = sup.subscribe();
    for mode in [15.0, 2.0, 3.0, 9.0, 15.0] {
        link.push_required(sample(mode));
    }
    sup.start();
    let events = collect_until(&rx, |e| *e == SupervisorEvent::IsInCockpitChanged(false));
    assert_eq!(
        lifecycle(&events),
        vec![
            "Connected",
            "FlightStarted",
            "IsInCockpitChanged(true)",
            "FlightStopped",
            "IsInCockpitChanged(false)"
        ]
    );
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_stop_twice_publishes_one_disconnect() {
    let (_link, sup) = supervisor(ScriptedLink::default());
    let rx = sup.subscribe();
    sup.start();
    collect_until(&rx, |e| *e == SupervisorEvent::Connected);
    sup.set_hud_bar_config(HudBarType::GenericAircraft);

    sup.stop(false);
    sup.stop(false);

    thread::sleep(Duration::from_millis(50));
    let disconnects = rx
        .try_iter()
        .filter(|e| *e == SupervisorEvent::Disconnected)
        .count();
    assert_eq!(disconnects, 1);
    assert!(!sup.is_required_polling());
    assert!(!sup.is_hud_polling());
    assert_eq!(sup.session_state(), SessionState::Disconnected);
}

#[test]
fn test_application_exit_stop_is_silent() {
    let (link, sup) = supervisor(ScriptedLink::default());
    let rx = sup.subscribe();
    sup.start();
    collect_until(&rx, |e| *e == SupervisorEvent::Connected);

    sup.stop(true);
    thread::sleep(Duration::from_millis(100));
    assert!(rx.try_iter().all(|e| e != SupervisorEvent::Disconnected));
    assert_eq!(link.opens(), 1);
}

#[test]
fn test_unsolicited_disconnect_reconnects() {
    let (link, sup) = supervisor(ScriptedLink::default());
    let rx = sup.subscribe();
    sup.start();
    collect_until(&rx, |e| *e == SupervisorEvent::Connected);

    link.emit(LinkEvent::Disconnected);
    let events = collect_until(&rx, |e| *e == SupervisorEvent::Connected);
    assert_eq!(lifecycle(&events), vec!["Disconnected", "Connected"]);
    assert_eq!(link.opens(), 2);
    assert!(sup.is_required_polling());
}

#[test]
fn test_manual_reconnect() {
    let (link, sup) = supervisor(ScriptedLink::default());
    let rx = sup.subscribe();
    sup.start();
    collect_until(&rx, |e| *e == SupervisorEvent::Connected);

    sup.stop_and_reconnect();
    let events = collect_until(&rx, |e| *e == SupervisorEvent::Connected);
    assert_eq!(lifecycle(&events), vec!["Disconnected", "Connected"]);
    assert_eq!(link.opens(), 2);
}

// ============================================================================
// Error recovery
// ============================================================================

#[test]
fn test_error_storm_runs_one_recovery() {
    let (link, sup) = supervisor(ScriptedLink::default());
    let rx = sup.subscribe();
    sup.start();
    collect_until(&rx, |e| *e == SupervisorEvent::Connected);

    link.emit(LinkEvent::Error("exception 1".into()));
    link.emit(LinkEvent::Error("exception 2".into()));
    link.emit(LinkEvent::Error("exception 3".into()));

    let events = collect_until(&rx, |e| *e == SupervisorEvent::Connected);
    let errors: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, SupervisorEvent::Error(_)))
        .cloned()
        .collect();
    assert_eq!(
        errors,
        vec![
            SupervisorEvent::Error("exception 1".into()),
            SupervisorEvent::Error("exception 2".into()),
            SupervisorEvent::Error("exception 3".into()),
        ]
    );
    wait_for(|| !sup.is_recovering());

    // Let any wrongly queued recovery surface before counting.
    thread::sleep(Duration::from_millis(150));
    assert_eq!(sup.recoveries_started(), 1);
    assert_eq!(link.opens(), 2);
    assert_eq!(sup.session_state(), SessionState::Connected);
}

#[test]
fn test_open_failures_retry_until_connected() {
    let (link, sup) = supervisor(ScriptedLink::failing_opens(2));
    let rx = sup.subscribe();
    sup.start();

    let events = collect_until(&rx, |e| *e == SupervisorEvent::Connected);
    assert_eq!(lifecycle(&events), vec!["Error", "Error", "Connected"]);
    assert_eq!(link.opens(), 3);
    assert_eq!(sup.recoveries_started(), 1);
    wait_for(|| !sup.is_recovering());
}

#[test]
fn test_stop_cancels_pending_recovery() {
    let (link, sup) = supervisor(ScriptedLink::failing_opens(usize::MAX));
    let rx = sup.subscribe();
    sup.start();
    collect_until(&rx, |e| matches!(e, SupervisorEvent::Error(_)));

    sup.stop(false);
    wait_for(|| !sup.is_recovering());
    let opens = link.opens();
    thread::sleep(Duration::from_millis(150));
    assert_eq!(link.opens(), opens);
    assert!(!sup.is_required_polling());
    assert_eq!(sup.session_state(), SessionState::Disconnected);
}

#[test]
fn test_stop_during_hud_switch_leaves_timers_stopped() {
    let (_link, sup) = supervisor_with(ScriptedLink::default(), slow_hud_config());
    let rx = sup.subscribe();
    sup.start();
    collect_until(&rx, |e| *e == SupervisorEvent::Connected);

    thread::scope(|s| {
        s.spawn(|| sup.set_hud_bar_config(HudBarType::GenericAircraft));
        thread::sleep(Duration::from_millis(50));
        sup.stop(false);
    });

    assert_fully_stopped(&sup);
    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(lifecycle(&events), vec!["Disconnected"]);
    // Selection is kept for the next session.
    assert!(sup.hud_state().active);

    thread::sleep(Duration::from_millis(100));
    assert_fully_stopped(&sup);
    assert!(rx.try_iter().all(|e| matches!(e, SupervisorEvent::HudDataRefreshed(_))));
}

#[test]
fn test_stop_while_connect_restores_hud() {
    let (_link, sup) = supervisor_with(ScriptedLink::default(), slow_hud_config());
    let rx = sup.subscribe();
    sup.set_hud_bar_config(HudBarType::GenericAircraft);

    // Connect handling is now inside the HUD settle wait.
    sup.start();
    thread::sleep(Duration::from_millis(80));
    sup.stop(false);

    assert_fully_stopped(&sup);
    thread::sleep(Duration::from_millis(100));
    assert_fully_stopped(&sup);
    let events: Vec<_> = rx.try_iter().collect();
    assert!(lifecycle(&events).is_empty(), "unexpected events {events:?}");
}

#[test]
fn test_stop_right_after_disconnect_cancels_reconnect() {
    let (link, sup) = supervisor(ScriptedLink::default());
    let rx = sup.subscribe();
    sup.start();
    collect_until(&rx, |e| *e == SupervisorEvent::Connected);

    link.emit(LinkEvent::Disconnected);
    sup.stop(false);

    thread::sleep(Duration::from_millis(150));
    assert_fully_stopped(&sup);
    assert_eq!(link.opens(), 1);
    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(lifecycle(&events), vec!["Disconnected"]);
}

#[test]
fn test_tick_failures_stay_silent() {
    let (link, sup) = supervisor(ScriptedLink::default());
    let rx = sup.subscribe();
    link.push_required(sample(15.0));
    sup.start();
    collect_until(&rx, is_refresh);

    link.state.lock().fail_requests = true;
    link.push_required(sample(2.0));
    thread::sleep(Duration::from_millis(100));

    assert!(rx.try_iter().all(|e| !matches!(e, SupervisorEvent::Error(_))));
    assert!(sup.is_required_polling());
    assert_eq!(sup.recoveries_started(), 0);
    // Previous sample is still served.
    let snap = sup.latest_snapshot().unwrap();
    assert_eq!(snap.get_i32(CAMERA_STATE), Some(15));
}

// ============================================================================
// HUD selection
// ============================================================================

#[test]
fn test_same_hud_config_twice_is_noop() {
    let (link, sup) = supervisor(ScriptedLink::default());
    let rx = sup.subscribe();
    sup.start();
    collect_until(&rx, |e| *e == SupervisorEvent::Connected);

    sup.set_hud_bar_config(HudBarType::Pmdg737);
    sup.set_hud_bar_config(HudBarType::Pmdg737);
    assert_eq!(link.hud_definitions(), vec![HudDefinition::Pmdg737HudBar]);
    assert!(sup.is_hud_polling());
}

#[test]
fn test_hud_selected_while_disconnected_starts_on_connect() {
    let (link, sup) = supervisor(ScriptedLink::default());
    let rx = sup.subscribe();

    sup.set_hud_bar_config(HudBarType::GenericAircraft);
    assert!(!sup.is_hud_polling());
    assert!(sup.hud_state().active);

    sup.start();
    collect_until(&rx, |e| *e == SupervisorEvent::Connected);
    assert!(sup.is_hud_polling());
    assert_eq!(
        link.hud_definitions(),
        vec![HudDefinition::GenericHudBar, HudDefinition::GenericHudBar]
    );
    collect_until(&rx, |e| matches!(e, SupervisorEvent::HudDataRefreshed(_)));
    // HUD samples never replace the required snapshot.
    assert!(sup.latest_snapshot().is_none());
}

#[test]
fn test_stop_hud_bar_keeps_selection_for_reconnect() {
    let (_link, sup) = supervisor(ScriptedLink::default());
    let rx = sup.subscribe();
    sup.start();
    collect_until(&rx, |e| *e == SupervisorEvent::Connected);
    sup.set_hud_bar_config(HudBarType::GenericAircraft);

    sup.stop_hud_bar();
    assert!(!sup.is_hud_polling());
    assert!(sup.hud_state().active);

    sup.stop_and_reconnect();
    collect_until(&rx, |e| *e == SupervisorEvent::Connected);
    assert!(sup.is_hud_polling());
}

// ============================================================================
// Sequencer through the supervisor
// ============================================================================

#[test]
fn test_power_sequence_uses_live_snapshot() {
    let (link, sup) = supervisor(ScriptedLink::default());
    let rx = sup.subscribe();

    // No sample yet: silent no-op.
    sup.sequencer().turn_off_power(true);
    sup.sequencer().turn_on_power(true);
    assert!(link.actions().is_empty());

    link.push_required(sample(15.0));
    sup.start();
    collect_until(&rx, is_refresh);

    sup.sequencer().turn_on_power(true);
    sup.sequencer().turn_on_avionics(true);
    sup.sequencer().turn_off_avionics(true);
    sup.sequencer().turn_off_power(true);
    sup.sequencer().turn_off_power(true);

    assert_eq!(
        link.actions(),
        vec![
            (ActionEvent::MasterBatterySet, 1),
            (ActionEvent::AvionicsMasterSet, 1),
            (ActionEvent::AvionicsMasterSet, 0),
            (ActionEvent::MasterBatterySet, 0),
        ]
    );
}

#[test]
fn test_active_aircraft_is_forwarded() {
    let (link, sup) = supervisor(ScriptedLink::default());
    let rx = sup.subscribe();
    sup.start();
    collect_until(&rx, |e| *e == SupervisorEvent::Connected);

    link.emit(LinkEvent::ActiveAircraftChanged("Asobo C172".into()));
    let events = collect_until(&rx, |e| matches!(e, SupervisorEvent::ActiveAircraftChanged(_)));
    assert_eq!(
        events.last(),
        Some(&SupervisorEvent::ActiveAircraftChanged("Asobo C172".into()))
    );
}
