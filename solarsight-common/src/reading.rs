use std::fmt;

/// Multiply an unsigned 16-bit register value by its scale factor.
pub fn scale_raw(raw: u16, scale: f64) -> f64 {
    f64::from(raw) * scale
}

/// Format an engineering value as an MQTT payload.
///
/// Payloads are ASCII decimal with exactly two fraction digits and no unit.
///
/// # Example
/// ```
/// use solarsight_common::reading::format_payload;
///
/// assert_eq!(format_payload(245.3), "245.30");
/// ```
pub fn format_payload(value: f64) -> String {
    format!("{:.2}", value)
}

/// One successfully read sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Sensor display name.
    pub sensor: String,

    /// Topic the reading is published on.
    pub topic: String,

    /// Raw register value as returned by the device.
    pub raw: u16,

    /// Scaled engineering value.
    pub value: f64,

    /// Engineering unit (for logging only, not published).
    pub unit: String,
}

impl Reading {
    /// Build a reading from a raw register value and its scale factor.
    pub fn new(
        sensor: impl Into<String>,
        topic: impl Into<String>,
        raw: u16,
        scale: f64,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            sensor: sensor.into(),
            topic: topic.into(),
            raw,
            value: scale_raw(raw, scale),
            unit: unit.into(),
        }
    }

    /// The payload published for this reading.
    pub fn payload(&self) -> String {
        format_payload(self.value)
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} {}", self.sensor, self.payload(), self.unit)
    }
}

/// Aggregate outcome of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    /// Every sensor was read.
    Ok,
    /// At least one sensor read failed.
    Err,
}

impl CycleStatus {
    /// Status for a cycle given whether any read failed.
    pub fn from_failed(failed: bool) -> Self {
        if failed { Self::Err } else { Self::Ok }
    }

    /// The literal status payload.
    pub fn as_payload(&self) -> &'static str {
        match self {
            CycleStatus::Ok => "ok",
            CycleStatus::Err => "err",
        }
    }
}

impl fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_payload())
    }
}
