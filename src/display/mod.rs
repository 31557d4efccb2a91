//! # Display Module
//!
//! Plain-text rendering for the display adapter.
//!
//! This module handles:
//! - Formatting the latest sample frame with its units
//! - Formatting generic status maps (`status`/`timestamp` header, indented fields)
//! - Converting epoch seconds to the configured display timezone
//! - The `DisplaySink` seam the driver writes text to

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, Local, Utc};
use serde_json::{Map, Value};
use std::fmt::Write;

use crate::record::frame::{SampleFrame, UnitMap};

/// Text shown when a record holds no frames yet
pub const NO_DATA_TEXT: &str = "No data available";

const INDENT: &str = "    ";

/// Timezone used when rendering timestamps for humans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayZone {
    /// System local time
    Local,
    /// Fixed UTC offset (UTC itself is offset zero)
    Fixed(FixedOffset),
}

impl DisplayZone {
    /// Parse `local`, `utc` or a `+HH:MM` / `-HH:MM` offset
    ///
    /// # Examples
    ///
    /// ```
    /// use telemetry_archiver::display::DisplayZone;
    ///
    /// assert_eq!(DisplayZone::parse("local"), Some(DisplayZone::Local));
    /// assert!(DisplayZone::parse("+05:30").is_some());
    /// assert!(DisplayZone::parse("Mars/Olympus").is_none());
    /// ```
    pub fn parse(zone: &str) -> Option<Self> {
        let zone = zone.trim();
        match zone.to_ascii_lowercase().as_str() {
            "local" => Some(DisplayZone::Local),
            "utc" | "z" => FixedOffset::east_opt(0).map(DisplayZone::Fixed),
            _ => parse_offset(zone).map(DisplayZone::Fixed),
        }
    }
}

fn parse_offset(offset: &str) -> Option<FixedOffset> {
    let (sign, rest) = match offset.as_bytes().first()? {
        b'+' => (1, &offset[1..]),
        b'-' => (-1, &offset[1..]),
        _ => return None,
    };

    let (hours, minutes) = rest.split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if !(0..=23).contains(&hours) || !(0..=59).contains(&minutes) {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Resolved timezone plus a validated strftime format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplaySettings {
    zone: DisplayZone,
    time_format: String,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            zone: DisplayZone::Local,
            time_format: "%Y-%m-%d %H:%M:%S".to_string(),
        }
    }
}

impl DisplaySettings {
    /// Returns `None` if `time_format` has an unknown or malformed specifier
    pub fn new(zone: DisplayZone, time_format: &str) -> Option<Self> {
        if time_format.is_empty() || StrftimeItems::new(time_format).any(|item| matches!(item, Item::Error)) {
            return None;
        }

        Some(Self {
            zone,
            time_format: time_format.to_string(),
        })
    }

    /// Render epoch seconds in the configured zone and format
    pub fn format_timestamp(&self, epoch_secs: f64) -> String {
        format_timestamp(epoch_secs, self.zone, &self.time_format)
    }
}

/// Render epoch seconds with `format` in `zone`
///
/// Falls back to the raw number if the instant is out of range.
pub fn format_timestamp(epoch_secs: f64, zone: DisplayZone, format: &str) -> String {
    let secs = epoch_secs.floor();
    let nanos = ((epoch_secs - secs) * 1e9).round().clamp(0.0, 999_999_999.0) as u32;

    let Some(utc) = DateTime::<Utc>::from_timestamp(secs as i64, nanos) else {
        return epoch_secs.to_string();
    };

    let mut out = String::new();
    let written = match zone {
        DisplayZone::Local => write!(out, "{}", utc.with_timezone(&Local).format(format)),
        DisplayZone::Fixed(offset) => write!(out, "{}", utc.with_timezone(&offset).format(format)),
    };

    if written.is_err() {
        return epoch_secs.to_string();
    }
    out
}

/// Timestamp line followed by one `name: value unit` line per field
pub fn format_latest(frame: &SampleFrame, units: Option<&UnitMap>, settings: &DisplaySettings) -> String {
    let mut lines = vec![format!("timestamp: {}", settings.format_timestamp(frame.timestamp))];

    for (name, value) in &frame.fields {
        match units.and_then(|units| units.get(name)).filter(|unit| !unit.is_empty()) {
            Some(unit) => lines.push(format!("{}: {} {}", name, value, unit)),
            None => lines.push(format!("{}: {}", name, value)),
        }
    }

    lines.join("\n")
}

/// Generic status formatter
///
/// The first line is `status: <status>, <timestamp>`; every other key follows
/// on its own indented line. `{data, unit}` objects render as `<data> [<unit>]`.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use telemetry_archiver::display::format_key_values;
///
/// let status = json!({
///     "status": "connected",
///     "timestamp": "12:00:01",
///     "uva": {"data": 1.2, "unit": "%"}
/// });
/// let text = format_key_values(status.as_object().unwrap());
/// assert_eq!(text, "status: connected, 12:00:01\n    uva: 1.2 [%]");
/// ```
pub fn format_key_values(values: &Map<String, Value>) -> String {
    let mut header = format!(
        "status: {}",
        values.get("status").map(render_value).unwrap_or_else(|| "-".to_string())
    );
    if let Some(timestamp) = values.get("timestamp") {
        header.push_str(", ");
        header.push_str(&render_value(timestamp));
    }

    let mut lines = vec![header];
    for (key, value) in values {
        if key == "status" || key == "timestamp" {
            continue;
        }
        lines.push(format!("{}{}: {}", INDENT, key, render_value(value)));
    }

    lines.join("\n")
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => match (map.get("data"), map.get("unit")) {
            (Some(data), Some(unit)) => format!("{} [{}]", render_value(data), render_value(unit)),
            _ => value.to_string(),
        },
        other => other.to_string(),
    }
}

/// Destination for rendered text
pub trait DisplaySink: Send {
    fn show(&mut self, text: &str);
}

/// Prints each update to stdout
#[derive(Debug, Default)]
pub struct StdoutDisplay;

impl DisplaySink for StdoutDisplay {
    fn show(&mut self, text: &str) {
        println!("{}\n", text);
    }
}
