//! Supervises a SimConnect session with Microsoft Flight Simulator.
//!
//! - [`supervisor`] keeps the session alive and republishes lifecycle events
//! - [`poller`] runs the required and HUD telemetry timers
//! - [`flight`] infers flight start/stop from the camera mode
//! - [`hud`] switches the HUD telemetry definition
//! - [`sequencer`] drives cold-start power, avionics, track-IR and camera
//! - [`link`] is the transport seam, [`simconnect`] its SimConnect implementation

pub mod config;
pub mod definitions;
pub mod error;
pub mod events;
pub mod flight;
pub mod hud;
pub mod link;
pub mod logging;
pub mod poller;
pub mod sequencer;
pub mod simconnect;
pub mod supervisor;
pub mod telemetry;

pub use config::SupervisorConfig;
pub use definitions::{ActionEvent, DataCategory, HudBarType, HudDefinition, WritableVariable};
pub use error::{ConfigError, LinkError};
pub use events::SupervisorEvent;
pub use flight::{CameraState, FlightStateDetector, FlightTransition};
pub use hud::HudState;
pub use link::{LinkEvent, SimulatorLink, SystemEvent};
pub use sequencer::ActuationSequencer;
pub use simconnect::SimConnectLink;
pub use supervisor::{ConnectionSupervisor, SessionState};
pub use telemetry::{SimDataItem, SimValue, SnapshotCell, TelemetrySnapshot};
