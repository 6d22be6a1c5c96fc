//! Repeating telemetry poll timers.
//!
//! Each [`PollTimer`] owns one worker thread, so its ticks never overlap.
//! A tick failure is swallowed: the timer keeps running and the failure is
//! only visible at trace level.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::trace;

use crate::definitions::DataCategory;
use crate::error::LinkError;
use crate::link::SimulatorLink;

#[derive(Debug)]
enum TimerCmd {
    Start,
    Stop,
    Shutdown,
}

pub struct PollTimer {
    name: &'static str,
    tx: Sender<TimerCmd>,
    running: Arc<AtomicBool>,
}

impl PollTimer {
    /// Spawns the worker in the stopped state.
    pub fn spawn<F>(name: &'static str, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Result<(), LinkError> + Send + 'static,
    {
        let (tx, rx) = unbounded::<TimerCmd>();
        let running = Arc::new(AtomicBool::new(false));
        let running_c = running.clone();

        thread::spawn(move || {
            let mut enabled = false;
            let mut next = Instant::now();
            loop {
                let cmd = if enabled {
                    rx.recv_timeout(next.saturating_duration_since(Instant::now()))
                } else {
                    rx.recv().map_err(|_| RecvTimeoutError::Disconnected)
                };
                match cmd {
                    Ok(TimerCmd::Start) => {
                        if !enabled {
                            enabled = true;
                            next = Instant::now() + interval;
                        }
                    }
                    Ok(TimerCmd::Stop) => enabled = false,
                    Ok(TimerCmd::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        // A stop issued since the last command wins over a due tick.
                        if running_c.load(Ordering::Acquire) {
                            if let Err(e) = tick() {
                                trace!(timer = name, error = %e, "poll tick failed");
                            }
                        }
                        next += interval;
                        let now = Instant::now();
                        if next < now {
                            next = now + interval;
                        }
                    }
                }
            }
            trace!(timer = name, "poll timer exited");
        });

        Self { name, tx, running }
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::Release);
        let _ = self.tx.send(TimerCmd::Start);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let _ = self.tx.send(TimerCmd::Stop);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl Drop for PollTimer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        let _ = self.tx.send(TimerCmd::Shutdown);
    }
}

/// One poll cycle: request, then drain, strictly in that order.
pub fn poll_once<L: SimulatorLink>(link: &L, category: DataCategory) -> Result<(), LinkError> {
    link.request_data(category)?;
    link.drain()
}

/// The required-data and HUD-data timers of one session.
///
/// Timers exist only between a link `Connected` and the next teardown;
/// start/stop calls made while none exist are no-ops.
pub struct TelemetryPoller {
    required_interval: Duration,
    hud_interval: Duration,
    required: Mutex<Option<PollTimer>>,
    hud: Mutex<Option<PollTimer>>,
}

impl TelemetryPoller {
    pub fn new(required_interval: Duration, hud_interval: Duration) -> Self {
        Self {
            required_interval,
            hud_interval,
            required: Mutex::new(None),
            hud: Mutex::new(None),
        }
    }

    /// Replaces both timers with fresh, stopped ones.
    pub fn recreate<L: SimulatorLink>(&self, link: &Arc<L>) {
        let l = link.clone();
        let required = PollTimer::spawn("required", self.required_interval, move || {
            poll_once(l.as_ref(), DataCategory::Required)
        });
        let l = link.clone();
        let hud = PollTimer::spawn("hud", self.hud_interval, move || {
            poll_once(l.as_ref(), DataCategory::Hud)
        });
        // Old timers shut down on drop.
        *self.required.lock() = Some(required);
        *self.hud.lock() = Some(hud);
    }

    pub fn start_required(&self) {
        if let Some(t) = self.required.lock().as_ref() {
            t.start();
        }
    }

    pub fn start_hud(&self) {
        if let Some(t) = self.hud.lock().as_ref() {
            t.start();
        }
    }

    pub fn stop_hud(&self) {
        if let Some(t) = self.hud.lock().as_ref() {
            t.stop();
        }
    }

    pub fn stop_all(&self) {
        if let Some(t) = self.required.lock().as_ref() {
            t.stop();
        }
        self.stop_hud();
    }

    /// Drops both timers. Later start calls are no-ops until `recreate`.
    pub fn release(&self) {
        self.required.lock().take();
        self.hud.lock().take();
    }

    pub fn is_required_running(&self) -> bool {
        self.required
            .lock()
            .as_ref()
            .map(PollTimer::is_running)
            .unwrap_or(false)
    }

    pub fn is_hud_running(&self) -> bool {
        self.hud
            .lock()
            .as_ref()
            .map(PollTimer::is_running)
            .unwrap_or(false)
    }
}
