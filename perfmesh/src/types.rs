// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Shared types.

use std::error::Error;
use std::fmt;

use byte_unit::Byte;
use serde::{Deserialize, de};
use serde_yaml::Value;

// Fusion errors

#[macro_export]
/// Build a [FusionError::Configuration] from a format string
macro_rules! config_error {
    ($($arg:tt)*) => {
        Err($crate::types::FusionError::Configuration(format!($($arg)*)))
    };
}

#[macro_export]
/// Build a [FusionError::MalformedSource] from a format string
macro_rules! malformed {
    ($($arg:tt)*) => {
        Err($crate::types::FusionError::MalformedSource(format!($($arg)*)))
    };
}

/// The two failure kinds of the fusion pipeline.
///
/// Numeric degeneracy (zero cycles, zero bandwidth) is never an error, it
/// resolves to a saturation of zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FusionError {
    /// Unknown or missing architecture identifier.
    Configuration(String),

    /// A source record that cannot be resolved against the graph or that
    /// violates a capacity invariant.
    MalformedSource(String),
}

impl fmt::Display for FusionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FusionError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            FusionError::MalformedSource(msg) => write!(f, "Malformed source: {msg}"),
        }
    }
}

impl Error for FusionError {}

/// The FusionResult is the return type for most augmentation functions
pub type FusionResult = Result<(), FusionError>;

/// The step of a chip load that produced an error.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Architecture,
    Netlist,
    Queues,
    CorePerf,
    OpPerf,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Stage::Architecture => write!(f, "architecture"),
            Stage::Netlist => write!(f, "netlist"),
            Stage::Queues => write!(f, "queues"),
            Stage::CorePerf => write!(f, "core performance"),
            Stage::OpPerf => write!(f, "op performance"),
        }
    }
}

/// Error returned by a whole chip load, tagged with where it happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadError {
    pub chip_id: u32,
    pub epoch: u32,
    pub stage: Stage,
    pub error: FusionError,
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "chip {} epoch {}: {} stage failed: {}",
            self.chip_id, self.epoch, self.stage, self.error
        )
    }
}

impl Error for LoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.error)
    }
}

/// Parse a value which could be an integer or a string and return u64 value
///
/// The string can be a hex string with underscores or a Byte string that
/// specifies units. Some examples are:
///  0x10000000
///  0x1000_0000
///  96KiB
pub fn parse_byte_str<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: de::Deserializer<'de>,
{
    // Profilers write addresses both as numbers and as strings, so go via a
    // generic `Value` first.
    let value: Value = Deserialize::deserialize(deserializer)?;
    byte_value(&value).map_err(de::Error::custom)
}

pub fn parse_optional_byte_str<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: de::Deserializer<'de>,
{
    Ok(Some(parse_byte_str(deserializer)?))
}

fn byte_value(value: &Value) -> Result<u64, String> {
    if let Some(number) = value.as_u64() {
        return Ok(number);
    }

    let Some(s) = value.as_str() else {
        return Err(format!(
            "'{value:?}': Unsupported type for Deserialize (should be u64 or String)"
        ));
    };

    let lowercase = s.trim().to_lowercase();
    if lowercase.starts_with("0x") {
        let without_underscore = lowercase.replace('_', "");
        let without_0x = without_underscore.trim_start_matches("0x");
        u64::from_str_radix(without_0x, 16)
            .map_err(|e| format!("Unable to parse {s} as hex string: {e}"))
    } else {
        let ignore_case = false;
        Byte::parse_str(s, ignore_case)
            .map(|num_bytes| num_bytes.as_u64())
            .map_err(|e| format!("Unable to parse {s} as Byte string: {e}"))
    }
}

/// Parse a performance metric.
///
/// Analyzer reports use numbers, numeric strings and placeholders such as
/// `"N/A"` interchangeably. Anything that is not a finite number reads as 0.
pub fn parse_metric<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: de::Deserializer<'de>,
{
    let value: Value = Deserialize::deserialize(deserializer)?;
    Ok(metric_value(&value))
}

/// As [parse_metric] but rounded down to a whole cycle count.
pub fn parse_cycles<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: de::Deserializer<'de>,
{
    let value: Value = Deserialize::deserialize(deserializer)?;
    if let Some(number) = value.as_u64() {
        return Ok(number);
    }
    let metric = metric_value(&value);
    if metric > 0.0 {
        Ok(metric as u64)
    } else {
        Ok(0)
    }
}

pub(crate) fn metric_value(value: &Value) -> f64 {
    let metric = match value {
        Value::Number(number) => number.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if metric.is_finite() { metric } else { 0.0 }
}
