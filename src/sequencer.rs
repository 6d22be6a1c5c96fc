//! Cold-start power, avionics, track-IR and camera actuation.
//!
//! Every procedure is safe to call speculatively: an unmet precondition is a
//! silent no-op, and link failures are logged and absorbed.
//!
//! Power and avionics use a latch ("we turned it on") so "off" only undoes
//! our own "on". Track-IR is the other way round: "off" inspects the live
//! simvar so a user-enabled device is respected, and remembers that it did
//! the turn-off so "on" can restore it later.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::definitions::{ActionEvent, WritableVariable};
use crate::error::LinkError;
use crate::link::SimulatorLink;
use crate::telemetry::{SnapshotCell, PLANE_IN_PARKING_SPOT, TRACK_IR_ENABLE};

#[derive(Debug, Clone, Copy)]
pub struct SequencerTiming {
    /// Wait for one fresh required sample before reading the snapshot.
    pub telemetry_refresh_wait: Duration,
    /// Pause after fire-and-forget writes.
    pub settle: Duration,
}

pub struct ActuationSequencer<L: SimulatorLink> {
    link: Arc<L>,
    snapshot: SnapshotCell,
    timing: SequencerTiming,
    power_on: AtomicBool,
    avionics_on: AtomicBool,
    track_ir_managed: AtomicBool,
}

impl<L: SimulatorLink> ActuationSequencer<L> {
    pub fn new(link: Arc<L>, snapshot: SnapshotCell, timing: SequencerTiming) -> Self {
        Self {
            link,
            snapshot,
            timing,
            power_on: AtomicBool::new(false),
            avionics_on: AtomicBool::new(false),
            track_ir_managed: AtomicBool::new(false),
        }
    }

    pub fn is_power_latched(&self) -> bool {
        self.power_on.load(Ordering::Acquire)
    }

    pub fn is_avionics_latched(&self) -> bool {
        self.avionics_on.load(Ordering::Acquire)
    }

    pub fn is_track_ir_managed(&self) -> bool {
        self.track_ir_managed.load(Ordering::Acquire)
    }

    fn has_snapshot(&self) -> bool {
        self.snapshot.latest().is_some()
    }

    /// Waits one telemetry cycle, then reads the parking-spot flag.
    fn plane_in_parking_spot(&self) -> bool {
        thread::sleep(self.timing.telemetry_refresh_wait);
        self.snapshot
            .latest()
            .and_then(|s| s.get_bool(PLANE_IN_PARKING_SPOT))
            .unwrap_or(false)
    }

    fn transmit(&self, action: ActionEvent, value: u32) {
        absorb(
            "transmit action",
            self.link.transmit_action(action, value),
        );
    }

    fn write(&self, variable: WritableVariable, value: f64) {
        absorb("set variable", self.link.set_variable(variable, value));
    }

    fn settle(&self) {
        thread::sleep(self.timing.settle);
    }

    pub fn turn_on_power(&self, is_required_for_cold_start: bool) {
        if !is_required_for_cold_start || !self.has_snapshot() {
            return;
        }
        if !self.plane_in_parking_spot() {
            return;
        }
        debug!("turn on battery power");
        self.power_on.store(true, Ordering::Release);
        self.transmit(ActionEvent::MasterBatterySet, 1);
    }

    pub fn turn_off_power(&self, is_required_for_cold_start: bool) {
        if !is_required_for_cold_start || !self.has_snapshot() {
            return;
        }
        if !self.power_on.load(Ordering::Acquire) {
            return;
        }
        debug!("turn off battery power");
        self.transmit(ActionEvent::MasterBatterySet, 0);
        self.power_on.store(false, Ordering::Release);
    }

    pub fn turn_on_avionics(&self, is_required_for_cold_start: bool) {
        if !is_required_for_cold_start || !self.has_snapshot() {
            return;
        }
        if !self.plane_in_parking_spot() {
            return;
        }
        debug!("turn on avionics");
        self.avionics_on.store(true, Ordering::Release);
        self.transmit(ActionEvent::AvionicsMasterSet, 1);
    }

    pub fn turn_off_avionics(&self, is_required_for_cold_start: bool) {
        if !is_required_for_cold_start || !self.has_snapshot() {
            return;
        }
        if !self.avionics_on.load(Ordering::Acquire) {
            return;
        }
        debug!("turn off avionics");
        self.transmit(ActionEvent::AvionicsMasterSet, 0);
        self.avionics_on.store(false, Ordering::Release);
    }

    /// Restores track-IR only if this sequencer turned it off.
    pub fn turn_on_track_ir(&self) {
        if !self.has_snapshot() || !self.track_ir_managed.load(Ordering::Acquire) {
            return;
        }
        debug!("turn on track ir");
        self.write(WritableVariable::TrackIrEnable, 1.0);
        self.track_ir_managed.store(false, Ordering::Release);
    }

    pub fn turn_off_track_ir(&self) {
        let enabled = match self.snapshot.latest() {
            Some(s) => s.get_bool(TRACK_IR_ENABLE).unwrap_or(false),
            None => return,
        };
        if !enabled {
            return;
        }
        debug!("turn off track ir");
        self.write(WritableVariable::TrackIrEnable, 0.0);
        self.track_ir_managed.store(true, Ordering::Release);
        self.settle();
    }

    pub fn turn_on_active_pause(&self) {
        debug!("active pause on");
        self.transmit(ActionEvent::PauseSet, 1);
        self.settle();
    }

    pub fn turn_off_active_pause(&self) {
        debug!("active pause off");
        self.transmit(ActionEvent::PauseSet, 0);
        self.settle();
    }

    pub fn increase_sim_rate(&self) {
        self.transmit(ActionEvent::SimRateIncr, 1);
        self.settle();
    }

    pub fn decrease_sim_rate(&self) {
        self.transmit(ActionEvent::SimRateDecr, 1);
        self.settle();
    }

    pub fn set_cockpit_camera_zoom_level(&self, zoom_level: i32) {
        self.write(WritableVariable::CockpitCameraZoom, f64::from(zoom_level));
        self.settle();
    }

    pub fn set_camera_request_action(&self, action: i32) {
        self.write(WritableVariable::CameraRequestAction, f64::from(action));
        self.settle();
    }

    pub fn set_camera_view_type_and_index0(&self, value: i32) {
        self.write(WritableVariable::CameraViewTypeAndIndex0, f64::from(value));
        self.settle();
    }

    pub fn set_camera_view_type_and_index1(&self, value: i32) {
        self.write(WritableVariable::CameraViewTypeAndIndex1, f64::from(value));
        self.settle();
    }
}

fn absorb(what: &'static str, r: Result<(), LinkError>) {
    if let Err(e) = r {
        warn!(error = %e, "{what} failed");
    }
}
