use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use tracing::{info, warn};

use simconnect_supervisor::logging::init_logging;
use simconnect_supervisor::{
    ConnectionSupervisor, HudBarType, SimConnectLink, SimulatorLink, SupervisorConfig,
    SupervisorEvent,
};

// -----------------------------
// Event log worker
// -----------------------------
fn event_worker(rx: Receiver<SupervisorEvent>) {
    for ev in rx.iter() {
        match ev {
            SupervisorEvent::RequiredDataRefreshed(s) => {
                tracing::debug!(fields = s.len(), "required data refreshed");
            }
            SupervisorEvent::HudDataRefreshed(s) => {
                tracing::trace!(fields = s.len(), "hud data refreshed");
            }
            SupervisorEvent::Error(e) => warn!(error = %e, "session error"),
            other => info!(event = ?other, "session event"),
        }
    }
}

fn on_off(arg: Option<&str>) -> Option<bool> {
    match arg {
        Some("on") => Some(true),
        Some("off") => Some(false),
        _ => None,
    }
}

fn number(arg: Option<&str>) -> Option<i32> {
    arg.and_then(|a| a.parse().ok())
}

/// Returns false when the user asked to quit.
fn run_command<L: SimulatorLink>(sup: &ConnectionSupervisor<L>, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else {
        return true;
    };
    let arg = parts.next();
    let seq = sup.sequencer();

    match (cmd, arg) {
        ("quit" | "exit", _) => return false,
        ("reconnect", _) => sup.stop_and_reconnect(),
        ("stop", _) => sup.stop(false),
        ("hud", Some(kind)) => match kind.parse::<HudBarType>() {
            Ok(h) => sup.set_hud_bar_config(h),
            Err(e) => warn!("{e}"),
        },
        ("power", a) => match on_off(a) {
            Some(true) => seq.turn_on_power(true),
            Some(false) => seq.turn_off_power(true),
            None => warn!("usage: power on|off"),
        },
        ("avionics", a) => match on_off(a) {
            Some(true) => seq.turn_on_avionics(true),
            Some(false) => seq.turn_off_avionics(true),
            None => warn!("usage: avionics on|off"),
        },
        ("trackir", a) => match on_off(a) {
            Some(true) => seq.turn_on_track_ir(),
            Some(false) => seq.turn_off_track_ir(),
            None => warn!("usage: trackir on|off"),
        },
        ("pause", a) => match on_off(a) {
            Some(true) => seq.turn_on_active_pause(),
            Some(false) => seq.turn_off_active_pause(),
            None => warn!("usage: pause on|off"),
        },
        ("rate", Some("+")) => seq.increase_sim_rate(),
        ("rate", Some("-")) => seq.decrease_sim_rate(),
        ("zoom", a) => match number(a) {
            Some(n) => seq.set_cockpit_camera_zoom_level(n),
            None => warn!("usage: zoom <level>"),
        },
        ("camera", a) => match number(a) {
            Some(n) => seq.set_camera_request_action(n),
            None => warn!("usage: camera <action>"),
        },
        ("view", a) => match number(a) {
            Some(n) => seq.set_camera_view_type_and_index0(n),
            None => warn!("usage: view <type>"),
        },
        ("view1", a) => match number(a) {
            Some(n) => seq.set_camera_view_type_and_index1(n),
            None => warn!("usage: view1 <index>"),
        },
        ("status", _) => info!(
            session = ?sup.session_state(),
            camera = ?sup.camera_state(),
            hud = %sup.hud_state().config,
            hud_polling = sup.is_hud_polling(),
            "status"
        ),
        _ => warn!(command = line, "unknown command"),
    }
    true
}

// -----------------------------
// main
// -----------------------------
fn main() -> Result<()> {
    init_logging("info").map_err(|e| anyhow::anyhow!("logging init failed: {e}"))?;

    let config = match std::env::args_os().nth(1) {
        Some(path) => SupervisorConfig::load(&path)
            .with_context(|| format!("Load config {} failed", path.to_string_lossy()))?,
        None => SupervisorConfig::default(),
    };

    let link = Arc::new(SimConnectLink::new(
        config.app_name.clone(),
        config.library_paths.clone(),
    ));
    let sup = ConnectionSupervisor::new(link, config);

    {
        let rx = sup.subscribe();
        thread::spawn(move || event_worker(rx));
    }

    sup.start();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Read stdin failed")?;
        if !run_command(&sup, line.trim()) {
            break;
        }
    }

    sup.stop(true);
    Ok(())
}
