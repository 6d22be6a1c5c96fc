// -----------------------------
// Data categories & definitions
// -----------------------------

use std::fmt;

use crate::telemetry::{CAMERA_STATE, PLANE_IN_PARKING_SPOT, TRACK_IR_ENABLE};

/// Which polled sample set a request or delivery belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataCategory {
    Required,
    Hud,
}

/// A field requested from the simulator: (simvar name, unit).
pub type FieldDef = (&'static str, &'static str);

pub const REQUIRED_FIELDS: &[FieldDef] = &[
    (CAMERA_STATE, "Number"),
    (PLANE_IN_PARKING_SPOT, "Bool"),
    (TRACK_IR_ENABLE, "Bool"),
];

const GENERIC_HUD_FIELDS: &[FieldDef] = &[
    ("ELEVATOR TRIM PCT", "Percent"),
    ("AILERON TRIM PCT", "Percent"),
    ("RUDDER TRIM PCT", "Percent"),
    ("BRAKE PARKING POSITION", "Bool"),
    ("GEAR HANDLE POSITION", "Bool"),
    ("FLAPS HANDLE INDEX", "Number"),
    ("SIMULATION RATE", "Number"),
];

const PMDG_737_HUD_FIELDS: &[FieldDef] = &[
    ("ELEVATOR TRIM POSITION", "Degrees"),
    ("RUDDER TRIM PCT", "Percent"),
    ("BRAKE PARKING POSITION", "Bool"),
    ("GEAR HANDLE POSITION", "Bool"),
    ("FLAPS HANDLE INDEX", "Number"),
    ("AUTOPILOT MASTER", "Bool"),
    ("SIMULATION RATE", "Number"),
];

/// HUD bar selection made by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HudBarType {
    #[default]
    None,
    GenericAircraft,
    Pmdg737,
}

impl HudBarType {
    pub fn definition(self) -> HudDefinition {
        match self {
            HudBarType::None => HudDefinition::NoHudBar,
            HudBarType::GenericAircraft => HudDefinition::GenericHudBar,
            HudBarType::Pmdg737 => HudDefinition::Pmdg737HudBar,
        }
    }

    pub fn is_none(self) -> bool {
        self == HudBarType::None
    }
}

impl fmt::Display for HudBarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::GenericAircraft => write!(f, "Generic"),
            Self::Pmdg737 => write!(f, "PMDG 737"),
        }
    }
}

impl std::str::FromStr for HudBarType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "generic" => Ok(Self::GenericAircraft),
            "pmdg737" | "pmdg_737" => Ok(Self::Pmdg737),
            other => Err(format!("unknown hud bar type {other:?}")),
        }
    }
}

/// Field set the link requests for the HUD category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HudDefinition {
    NoHudBar,
    GenericHudBar,
    Pmdg737HudBar,
}

impl HudDefinition {
    pub fn fields(self) -> &'static [FieldDef] {
        match self {
            HudDefinition::NoHudBar => &[],
            HudDefinition::GenericHudBar => GENERIC_HUD_FIELDS,
            HudDefinition::Pmdg737HudBar => PMDG_737_HUD_FIELDS,
        }
    }
}

/// Discrete simulator events the sequencer transmits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionEvent {
    MasterBatterySet,
    AvionicsMasterSet,
    PauseSet,
    SimRateIncr,
    SimRateDecr,
}

impl ActionEvent {
    pub const ALL: [ActionEvent; 5] = [
        ActionEvent::MasterBatterySet,
        ActionEvent::AvionicsMasterSet,
        ActionEvent::PauseSet,
        ActionEvent::SimRateIncr,
        ActionEvent::SimRateDecr,
    ];

    pub fn sim_event_name(self) -> &'static str {
        match self {
            ActionEvent::MasterBatterySet => "MASTER_BATTERY_SET",
            ActionEvent::AvionicsMasterSet => "AVIONICS_MASTER_SET",
            ActionEvent::PauseSet => "PAUSE_SET",
            ActionEvent::SimRateIncr => "SIM_RATE_INCR",
            ActionEvent::SimRateDecr => "SIM_RATE_DECR",
        }
    }
}

/// Simvars the sequencer writes directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WritableVariable {
    CockpitCameraZoom,
    CameraRequestAction,
    CameraViewTypeAndIndex0,
    CameraViewTypeAndIndex1,
    TrackIrEnable,
}

impl WritableVariable {
    pub const ALL: [WritableVariable; 5] = [
        WritableVariable::CockpitCameraZoom,
        WritableVariable::CameraRequestAction,
        WritableVariable::CameraViewTypeAndIndex0,
        WritableVariable::CameraViewTypeAndIndex1,
        WritableVariable::TrackIrEnable,
    ];

    pub fn field(self) -> FieldDef {
        match self {
            WritableVariable::CockpitCameraZoom => ("COCKPIT CAMERA ZOOM", "Percentage"),
            WritableVariable::CameraRequestAction => ("CAMERA REQUEST ACTION", "Enum"),
            WritableVariable::CameraViewTypeAndIndex0 => ("CAMERA VIEW TYPE AND INDEX:0", "Enum"),
            WritableVariable::CameraViewTypeAndIndex1 => ("CAMERA VIEW TYPE AND INDEX:1", "Enum"),
            WritableVariable::TrackIrEnable => (TRACK_IR_ENABLE, "Bool"),
        }
    }
}
