//! Flight session detection from the simulator camera mode.
//!
//! The camera mode repeats every tick while nothing changes, so the detector
//! only reacts when the observed mode differs from the stored one. Only the
//! cockpit, load-screen and home-screen modes are ever stored; any other mode
//! (external views, drone camera, menus we do not know) passes through so it
//! cannot mask the next real transition.

pub const CAMERA_STATE_COCKPIT: i32 = 2;
pub const CAMERA_STATE_LOAD_SCREEN: i32 = 11;
pub const CAMERA_STATE_HOME_SCREEN: i32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CameraState {
    #[default]
    Unknown,
    HomeOrLoadScreen,
    Cockpit,
    Other,
}

impl CameraState {
    pub fn from_mode(mode: i32) -> Self {
        match mode {
            CAMERA_STATE_COCKPIT => CameraState::Cockpit,
            CAMERA_STATE_LOAD_SCREEN | CAMERA_STATE_HOME_SCREEN => CameraState::HomeOrLoadScreen,
            _ => CameraState::Other,
        }
    }

    fn is_tracked(self) -> bool {
        matches!(self, CameraState::Cockpit | CameraState::HomeOrLoadScreen)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightTransition {
    FlightStarted,
    FlightStopped,
    CockpitChanged(bool),
}

#[derive(Debug, Default)]
pub struct FlightStateDetector {
    current: CameraState,
}

impl FlightStateDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> CameraState {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = CameraState::Unknown;
    }

    /// Feeds one camera-mode sample; returns the transitions it causes, in
    /// publication order.
    pub fn observe(&mut self, camera_mode: i32) -> Vec<FlightTransition> {
        let observed = CameraState::from_mode(camera_mode);
        let mut out = Vec::new();

        if observed == self.current {
            return out;
        }

        match (self.current, observed) {
            (CameraState::HomeOrLoadScreen, CameraState::Cockpit) => {
                out.push(FlightTransition::FlightStarted);
                out.push(FlightTransition::CockpitChanged(true));
            }
            (CameraState::Cockpit, CameraState::HomeOrLoadScreen) => {
                out.push(FlightTransition::FlightStopped);
                out.push(FlightTransition::CockpitChanged(false));
            }
            (_, CameraState::Cockpit) => out.push(FlightTransition::CockpitChanged(true)),
            _ => {}
        }

        if observed.is_tracked() {
            self.current = observed;
        }
        out
    }
}
