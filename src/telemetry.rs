//! Telemetry samples as delivered by the simulator link.
//!
//! A [`TelemetrySnapshot`] is immutable once built. The supervisor keeps the
//! latest required sample in a [`SnapshotCell`] and swaps the whole `Arc` on
//! every refresh, so readers always see a complete sample.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

// Required-definition property names
pub const CAMERA_STATE: &str = "CAMERA STATE";
pub const PLANE_IN_PARKING_SPOT: &str = "ATC ON PARKING SPOT";
pub const TRACK_IR_ENABLE: &str = "TRACK IR ENABLE";

#[derive(Debug, Clone, PartialEq)]
pub enum SimValue {
    Number(f64),
    Text(String),
}

impl SimValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SimValue::Number(x) => Some(*x),
            SimValue::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Non-zero numbers are true.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SimValue::Text(s) if s.eq_ignore_ascii_case("true") => Some(true),
            SimValue::Text(s) if s.eq_ignore_ascii_case("false") => Some(false),
            _ => self.as_f64().map(|x| x != 0.0),
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        self.as_f64()
            .filter(|x| x.is_finite())
            .map(|x| x.round() as i32)
    }
}

impl From<f64> for SimValue {
    fn from(x: f64) -> Self {
        SimValue::Number(x)
    }
}

impl From<&str> for SimValue {
    fn from(s: &str) -> Self {
        SimValue::Text(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimDataItem {
    pub name: String,
    pub value: SimValue,
}

impl SimDataItem {
    pub fn new(name: impl Into<String>, value: impl Into<SimValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One full telemetry sample, in definition order.
#[derive(Debug, Clone)]
pub struct TelemetrySnapshot {
    items: Vec<SimDataItem>,
    received_at: Instant,
}

impl TelemetrySnapshot {
    pub fn new(items: Vec<SimDataItem>) -> Self {
        Self {
            items,
            received_at: Instant::now(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&SimValue> {
        self.items.iter().find(|d| d.name == name).map(|d| &d.value)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(SimValue::as_bool)
    }

    pub fn get_i32(&self, name: &str) -> Option<i32> {
        self.get(name).and_then(SimValue::as_i32)
    }

    pub fn items(&self) -> &[SimDataItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn received_at(&self) -> Instant {
        self.received_at
    }
}

impl PartialEq for TelemetrySnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

/// Single-writer, many-reader holder of the latest required sample.
#[derive(Debug, Clone, Default)]
pub struct SnapshotCell {
    inner: Arc<RwLock<Option<Arc<TelemetrySnapshot>>>>,
}

impl SnapshotCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, snapshot: Arc<TelemetrySnapshot>) {
        *self.inner.write() = Some(snapshot);
    }

    pub fn latest(&self) -> Option<Arc<TelemetrySnapshot>> {
        self.inner.read().clone()
    }
}
