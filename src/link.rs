//! The transport seam between the supervisor and the simulator process.
//!
//! Implementations push [`LinkEvent`]s into the sender handed to
//! [`SimulatorLink::open`]. Data samples are pushed from inside
//! [`SimulatorLink::drain`], so a tick's samples are queued before the tick
//! returns.

use crossbeam_channel::Sender;

use crate::definitions::{ActionEvent, DataCategory, HudDefinition, WritableVariable};
use crate::error::LinkError;
use crate::telemetry::SimDataItem;

/// Simulator system event, e.g. `SimStart` or `Pause`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemEvent {
    pub name: String,
    pub data: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Connected,
    /// Unsolicited session loss. Never emitted for an explicit `close`.
    Disconnected,
    Error(String),
    SystemEvent(SystemEvent),
    DataReceived(DataCategory, Vec<SimDataItem>),
    ActiveAircraftChanged(String),
}

pub trait SimulatorLink: Send + Sync + 'static {
    /// Opens a session; events for it go to `events`. Emits `Connected` once the
    /// session is usable.
    fn open(&self, events: Sender<LinkEvent>) -> Result<(), LinkError>;

    /// Idempotent.
    fn close(&self) -> Result<(), LinkError>;

    fn request_data(&self, category: DataCategory) -> Result<(), LinkError>;

    /// Delivers every pending inbound message before returning.
    fn drain(&self) -> Result<(), LinkError>;

    fn transmit_action(&self, action: ActionEvent, value: u32) -> Result<(), LinkError>;

    fn set_variable(&self, variable: WritableVariable, value: f64) -> Result<(), LinkError>;

    /// Switches the field set requested for [`DataCategory::Hud`].
    fn set_hud_definition(&self, definition: HudDefinition) -> Result<(), LinkError>;
}
