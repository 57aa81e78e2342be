// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Types that map directly to the profiler output files.
//!
//! Callers read the files and hand the text to [from_yaml] or [from_json].
//! Nothing in this crate touches the filesystem.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_yaml::Value;

use crate::entity::{
    LinkName, Measurements, NodeKind, OperandBandwidth, OperandKind, QueueLocation, SlowestOperand,
};
use crate::malformed;
use crate::types::{
    FusionError, metric_value, parse_byte_str, parse_cycles, parse_metric, parse_optional_byte_str,
};

pub fn from_yaml<T: DeserializeOwned>(text: &str) -> Result<T, FusionError> {
    serde_yaml::from_str(text)
        .map_err(|e| FusionError::MalformedSource(format!("serde_yaml::from_str failed: {e}")))
}

pub fn from_json<T: DeserializeOwned>(text: &str) -> Result<T, FusionError> {
    serde_json::from_str(text)
        .map_err(|e| FusionError::MalformedSource(format!("serde_json::from_str failed: {e}")))
}

// Netlist analyzer output

#[derive(Debug, Deserialize)]
pub struct NetlistRecord {
    pub chip_id: Option<u32>,
    pub arch: Option<String>,
    #[serde(default, deserialize_with = "parse_cycles")]
    pub slowest_op_cycles: u64,
    #[serde(default, deserialize_with = "parse_cycles")]
    pub bw_limited_op_cycles: u64,
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub dram_channels: Vec<DramChannelRecord>,
    /// Operands of each operation, from the graph descriptor.
    #[serde(default)]
    pub operations: BTreeMap<String, OperationRecord>,
}

#[derive(Debug, Deserialize)]
pub struct NodeRecord {
    pub location: [u32; 2],
    #[serde(rename = "type")]
    pub kind: Option<NodeKind>,
    pub op_name: Option<String>,
    #[serde(default, deserialize_with = "parse_cycles")]
    pub op_cycles: u64,
    #[serde(default)]
    pub links: BTreeMap<LinkName, LinkRecord>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LinkRecord {
    /// Volume the profiler reports for the link, checked against the pipes.
    #[serde(default, deserialize_with = "parse_cycles")]
    pub total_data_in_bytes: u64,
    #[serde(default, deserialize_with = "parse_metric")]
    pub max_link_bw: f64,
    /// Bytes moved by each pipe crossing the link.
    #[serde(default)]
    pub mapped_pipes: BTreeMap<String, u64>,
}

#[derive(Debug, Deserialize)]
pub struct DramChannelRecord {
    pub channel_id: u32,
    /// Link records of each subchannel node, by subchannel.
    #[serde(default)]
    pub subchannels: Vec<BTreeMap<LinkName, LinkRecord>>,
    pub dram_inout: Option<LinkRecord>,
    pub dram0_inout: Option<LinkRecord>,
    pub dram1_inout: Option<LinkRecord>,
}

impl DramChannelRecord {
    pub fn bank_links(&self) -> impl Iterator<Item = (LinkName, &LinkRecord)> {
        [
            (LinkName::DramInout, &self.dram_inout),
            (LinkName::Dram0Inout, &self.dram0_inout),
            (LinkName::Dram1Inout, &self.dram1_inout),
        ]
        .into_iter()
        .filter_map(|(name, record)| record.as_ref().map(|r| (name, r)))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct OperationRecord {
    #[serde(rename = "type")]
    pub op_type: Option<String>,
    #[serde(default)]
    pub inputs: Vec<OperandRecord>,
    #[serde(default)]
    pub outputs: Vec<OperandRecord>,
}

#[derive(Debug, Deserialize)]
pub struct OperandRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: OperandKind,
}

// Queue descriptor

#[derive(Debug, Default, Deserialize)]
#[serde(transparent)]
pub struct QueueDescriptor {
    pub queues: BTreeMap<String, QueueRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QueueRecord {
    pub location: String,
    #[serde(default)]
    pub allocation_info: Vec<AllocationRecord>,
    pub entries: Option<u64>,
    pub data_format: Option<String>,
}

impl QueueRecord {
    /// Where the queue lives, from a `LOCATION::<place>` string.
    #[must_use]
    pub fn queue_location(&self) -> QueueLocation {
        static LOCATION_RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"LOCATION::(\w+)").unwrap());

        let place = LOCATION_RE
            .captures(&self.location)
            .and_then(|c| c.get(1))
            .map_or(self.location.as_str(), |m| m.as_str());
        match place.to_uppercase().as_str() {
            "DRAM" => QueueLocation::Dram,
            "HOST" => QueueLocation::Host,
            _ => QueueLocation::Unknown,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AllocationRecord {
    #[serde(deserialize_with = "parse_byte_str")]
    pub address: u64,
    pub channel: u32,
    #[serde(default)]
    pub subchannel: u32,
}

// Per-core performance (L1 profile and core measurements)

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CorePerfRecord {
    /// Keyed by `"x-y"` core location.
    pub worker_cores: BTreeMap<String, WorkerCoreRecord>,
    /// Keyed by `"x-y"` core location.
    #[serde(default)]
    pub core_measurements: BTreeMap<String, MeasurementsRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkerCoreRecord {
    #[serde(default)]
    pub binary_buffers: Vec<BufferRecord>,
    #[serde(default)]
    pub data_buffers: Vec<BufferRecord>,
    pub core_attributes: Option<CoreAttributesRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BufferRecord {
    pub buffer_name: Option<String>,
    #[serde(deserialize_with = "parse_byte_str")]
    pub start_address: u64,
    #[serde(deserialize_with = "parse_byte_str")]
    pub reserved_size_bytes: u64,
    #[serde(default, deserialize_with = "parse_byte_str")]
    pub consumed_size_bytes: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CoreAttributesRecord {
    #[serde(default, deserialize_with = "parse_optional_byte_str")]
    pub l1_size_bytes: Option<u64>,
    pub op_name: Option<String>,
}

// Performance analyzer results

#[derive(Debug, Default, Deserialize)]
pub struct MeasurementsRecord {
    pub warnings: Option<String>,
    #[serde(default, deserialize_with = "parse_cycles")]
    pub kernel_total_runtime: u64,
    #[serde(default, deserialize_with = "parse_cycles")]
    pub kernel_runtime_per_input: u64,
    #[serde(default, deserialize_with = "parse_cycles")]
    pub model_runtime_per_input: u64,
    #[serde(default, deserialize_with = "parse_metric")]
    pub kernel_math_utilization: f64,
    #[serde(default, deserialize_with = "parse_metric")]
    pub model_math_utilization: f64,
    #[serde(default, deserialize_with = "parse_metric")]
    pub bw_limited_factor: f64,
    pub slowest_operand: Option<String>,
    #[serde(default, deserialize_with = "parse_cycles")]
    pub bw_bound_total_runtime: u64,
    #[serde(default, deserialize_with = "parse_cycles")]
    pub bw_bound_runtime_per_input: u64,
    #[serde(default, deserialize_with = "parse_metric")]
    pub bw_bound_math_utilization: f64,
    /// `input_pipe_bw_<n>`, `required_output_bw_<n>` and friends.
    #[serde(flatten)]
    pub operand_bandwidths: BTreeMap<String, Value>,
}

impl MeasurementsRecord {
    pub fn to_measurements(&self) -> Result<Measurements, FusionError> {
        let slowest_operand = match self.slowest_operand.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(operand) => Some(operand.parse::<SlowestOperand>()?),
        };

        let mut inputs: BTreeMap<usize, OperandBandwidth> = BTreeMap::new();
        let mut outputs: BTreeMap<usize, OperandBandwidth> = BTreeMap::new();
        static OPERAND_BW_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(
                r"^(input_pipe_bw|output_pipe_bw|required_input_bw|required_output_bw)_(\d+)$",
            )
            .unwrap()
        });

        for (key, value) in &self.operand_bandwidths {
            let Some(captures) = OPERAND_BW_RE.captures(key) else {
                continue;
            };
            let Ok(index) = captures[2].parse::<usize>() else {
                return malformed!("Invalid operand index in '{key}'");
            };
            let (operands, required) = match &captures[1] {
                "input_pipe_bw" => (&mut inputs, false),
                "required_input_bw" => (&mut inputs, true),
                "output_pipe_bw" => (&mut outputs, false),
                _ => (&mut outputs, true),
            };
            let bandwidth = operands.entry(index).or_insert_with(|| OperandBandwidth {
                index,
                ..Default::default()
            });
            if required {
                bandwidth.required = metric_value(value);
            } else {
                bandwidth.available = metric_value(value);
            }
        }

        let warnings = self
            .warnings
            .iter()
            .flat_map(|w| w.split(';'))
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Measurements {
            kernel_total_runtime: self.kernel_total_runtime,
            kernel_runtime_per_input: self.kernel_runtime_per_input,
            model_runtime_per_input: self.model_runtime_per_input,
            kernel_math_utilization: self.kernel_math_utilization,
            model_math_utilization: self.model_math_utilization,
            bw_limited_factor: self.bw_limited_factor,
            slowest_operand,
            bw_bound_total_runtime: self.bw_bound_total_runtime,
            bw_bound_runtime_per_input: self.bw_bound_runtime_per_input,
            bw_bound_math_utilization: self.bw_bound_math_utilization,
            inputs: inputs.into_values().collect(),
            outputs: outputs.into_values().collect(),
            warnings,
        })
    }
}

/// Aggregate results keyed by operation name.
#[derive(Debug, Default, Deserialize)]
#[serde(transparent)]
pub struct OpPerfRecord {
    pub operations: BTreeMap<String, OpPerfEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OpPerfEntry {
    pub op_measurements: MeasurementsRecord,
}

// Cluster descriptor

#[derive(Debug, Deserialize)]
pub struct ClusterDescriptor {
    /// Chip id to `[x, y, rack, shelf]`.
    pub chips: BTreeMap<u32, Vec<u32>>,
    #[serde(default)]
    pub ethernet_connections: Vec<[EthEndpointRecord; 2]>,
    /// Each entry maps a host device index to a chip id.
    #[serde(default)]
    pub chips_with_mmio: Vec<BTreeMap<u32, u32>>,
}

#[derive(Copy, Clone, Debug, Deserialize)]
pub struct EthEndpointRecord {
    pub chip: u32,
    pub chan: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_locations() {
        let descriptor: QueueDescriptor = from_yaml(
            "
q0:
  location: LOCATION::DRAM
  allocation-info: [{address: 0x3000_0000, channel: 1, subchannel: 0}]
  entries: 4
  data-format: Float16_b
q1: {location: LOCATION::HOST, entries: 1}
q2: {location: nowhere}
",
        )
        .unwrap();
        let location = |name: &str| descriptor.queues[name].queue_location();
        assert_eq!(location("q0"), QueueLocation::Dram);
        assert_eq!(location("q1"), QueueLocation::Host);
        assert_eq!(location("q2"), QueueLocation::Unknown);
        assert_eq!(descriptor.queues["q0"].allocation_info[0].address, 0x3000_0000);
    }

    #[test]
    fn operand_bandwidths_are_grouped() {
        let record: MeasurementsRecord = from_json(
            r#"{
                "bw_limited_factor": 2.5,
                "slowest_operand": "input-1",
                "input_pipe_bw_0": 30.0,
                "required_input_bw_0": 10.0,
                "input_pipe_bw_1": 5.5,
                "required_input_bw_1": 22.0,
                "output_pipe_bw_0": "N/A",
                "warnings": "slow input; ",
                "grid_size": "[1,2]"
            }"#,
        )
        .unwrap();
        let measurements = record.to_measurements().unwrap();
        assert_eq!(measurements.slowest_operand, Some(SlowestOperand::Input(1)));
        assert_eq!(measurements.inputs.len(), 2);
        assert_eq!(measurements.inputs[1].available, 5.5);
        assert_eq!(measurements.inputs[1].required, 22.0);
        assert_eq!(measurements.outputs[0].available, 0.0);
        assert_eq!(measurements.warnings, vec!["slow input".to_string()]);
    }

    #[test]
    #[should_panic(expected = "unknown variant `noc2_in_up`")]
    fn unknown_link_name() {
        let _: NetlistRecord = from_yaml(
            "
nodes:
  - location: [1, 1]
    links:
      noc2_in_up: {mapped_pipes: {\"P1\": 10}}
",
        )
        .unwrap();
    }

    #[test]
    fn cluster_descriptor() {
        let descriptor: ClusterDescriptor = from_yaml(
            "
chips: {0: [0, 0, 0, 0], 1: [1, 0, 0, 0]}
ethernet_connections:
  - [{chip: 0, chan: 0}, {chip: 1, chan: 1}]
chips_with_mmio:
  - 0: 0
",
        )
        .unwrap();
        assert_eq!(descriptor.chips[&1], vec![1, 0, 0, 0]);
        assert_eq!(descriptor.ethernet_connections[0][1].chan, 1);
        assert_eq!(descriptor.chips_with_mmio[0][&0], 0);
    }
}
