//! HUD bar telemetry selection.
//!
//! Switching definitions is stop, settle, switch, start. The settle wait lets
//! a request issued under the old definition finish before the link starts
//! answering with the new field set.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::definitions::HudBarType;
use crate::link::SimulatorLink;
use crate::poller::TelemetryPoller;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HudState {
    /// A configuration was requested and should survive reconnects.
    pub active: bool,
    pub config: HudBarType,
}

pub struct HudSelector<L: SimulatorLink> {
    link: Arc<L>,
    poller: Arc<TelemetryPoller>,
    settle: Duration,
    state: Mutex<HudState>,
    // Held for a whole switch so concurrent callers queue up behind it.
    sequence: Mutex<()>,
}

impl<L: SimulatorLink> HudSelector<L> {
    pub fn new(link: Arc<L>, poller: Arc<TelemetryPoller>, settle: Duration) -> Self {
        Self {
            link,
            poller,
            settle,
            state: Mutex::new(HudState::default()),
            sequence: Mutex::new(()),
        }
    }

    pub fn state(&self) -> HudState {
        *self.state.lock()
    }

    pub fn set_hud_bar_config(&self, config: HudBarType) {
        let _seq = self.sequence.lock();
        {
            let mut st = self.state.lock();
            if self.poller.is_hud_running() && st.config == config {
                return;
            }
            st.config = config;
            st.active = true;
        }

        self.poller.stop_hud();
        thread::sleep(self.settle);

        if let Err(e) = self.link.set_hud_definition(config.definition()) {
            debug!(hud = %config, error = %e, "set hud definition failed");
        }
        if !config.is_none() {
            self.poller.start_hud();
        }
        info!(hud = %config, "hud bar configured");
    }

    /// Stops HUD polling but keeps the selection for the next connect.
    pub fn stop_hud_bar(&self) {
        self.poller.stop_hud();
    }

    /// Re-applies the selection after a connect, if one was active.
    pub fn restore(&self) {
        let st = self.state();
        if st.active {
            self.set_hud_bar_config(st.config);
        }
    }

    /// Flight ended: drop the selection and stop polling.
    pub fn clear(&self) {
        let _seq = self.sequence.lock();
        *self.state.lock() = HudState::default();
        self.poller.stop_hud();
    }
}
