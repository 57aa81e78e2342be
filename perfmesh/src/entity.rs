// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Records held by a [ChipGraph](crate::ChipGraph).
//!
//! Entities refer to one another by id (node uid, link id, pipe id,
//! operation and queue names) and are resolved through the owning graph.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::l1_layout::L1Layout;
use crate::malformed;
use crate::types::FusionError;

/// Grid coordinate of a node on a chip.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Loc {
    pub x: u32,
    pub y: u32,
}

impl Loc {
    #[must_use]
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.x, self.y)
    }
}

/// Parses the `"x-y"` form used as a key by profiler reports.
impl FromStr for Loc {
    type Err = FusionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((x, y)) = s.trim().split_once('-') else {
            return malformed!("Invalid core location '{s}'");
        };
        match (x.parse(), y.parse()) {
            (Ok(x), Ok(y)) => Ok(Loc { x, y }),
            _ => malformed!("Invalid core location '{s}'"),
        }
    }
}

/// Build the uid of the node at `loc` on chip `chip_id`.
#[must_use]
pub fn node_uid(chip_id: u32, loc: Loc) -> String {
    format!("{chip_id}-{}-{}", loc.x, loc.y)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Core,
    Dram,
    #[serde(rename = "eth")]
    Ethernet,
    Pcie,
    Router,
    Arc,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NodeKind::Core => write!(f, "core"),
            NodeKind::Dram => write!(f, "dram"),
            NodeKind::Ethernet => write!(f, "eth"),
            NodeKind::Pcie => write!(f, "pcie"),
            NodeKind::Router => write!(f, "router"),
            NodeKind::Arc => write!(f, "arc"),
        }
    }
}

/// Link classes that the bandwidth engine treats differently.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum LinkKind {
    Noc0,
    Noc1,
    Dram,
    Pcie,
    Ethernet,
}

impl LinkKind {
    pub const ALL: [LinkKind; 5] = [
        LinkKind::Noc0,
        LinkKind::Noc1,
        LinkKind::Dram,
        LinkKind::Pcie,
        LinkKind::Ethernet,
    ];
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LinkKind::Noc0 => write!(f, "NOC0"),
            LinkKind::Noc1 => write!(f, "NOC1"),
            LinkKind::Dram => write!(f, "DRAM"),
            LinkKind::Pcie => write!(f, "PCIE"),
            LinkKind::Ethernet => write!(f, "ETHERNET"),
        }
    }
}

/// Link names as written by the netlist analyzer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkName {
    Noc0LinkIn,
    Noc0LinkOut,
    Noc0InNorth,
    Noc0OutSouth,
    Noc0InWest,
    Noc0OutEast,
    Noc1LinkIn,
    Noc1LinkOut,
    Noc1InSouth,
    Noc1OutNorth,
    Noc1InEast,
    Noc1OutWest,
    Noc0Noc2axi,
    Noc1Noc2axi,
    DramInout,
    Dram0Inout,
    Dram1Inout,
    ToEthernet,
    FromEthernet,
    PcieInout,
}

impl LinkName {
    #[must_use]
    pub fn kind(&self) -> LinkKind {
        match self {
            LinkName::Noc0LinkIn
            | LinkName::Noc0LinkOut
            | LinkName::Noc0InNorth
            | LinkName::Noc0OutSouth
            | LinkName::Noc0InWest
            | LinkName::Noc0OutEast
            | LinkName::Noc0Noc2axi => LinkKind::Noc0,
            LinkName::Noc1LinkIn
            | LinkName::Noc1LinkOut
            | LinkName::Noc1InSouth
            | LinkName::Noc1OutNorth
            | LinkName::Noc1InEast
            | LinkName::Noc1OutWest
            | LinkName::Noc1Noc2axi => LinkKind::Noc1,
            LinkName::DramInout | LinkName::Dram0Inout | LinkName::Dram1Inout => LinkKind::Dram,
            LinkName::ToEthernet | LinkName::FromEthernet => LinkKind::Ethernet,
            LinkName::PcieInout => LinkKind::Pcie,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkName::Noc0LinkIn => "noc0_link_in",
            LinkName::Noc0LinkOut => "noc0_link_out",
            LinkName::Noc0InNorth => "noc0_in_north",
            LinkName::Noc0OutSouth => "noc0_out_south",
            LinkName::Noc0InWest => "noc0_in_west",
            LinkName::Noc0OutEast => "noc0_out_east",
            LinkName::Noc1LinkIn => "noc1_link_in",
            LinkName::Noc1LinkOut => "noc1_link_out",
            LinkName::Noc1InSouth => "noc1_in_south",
            LinkName::Noc1OutNorth => "noc1_out_north",
            LinkName::Noc1InEast => "noc1_in_east",
            LinkName::Noc1OutWest => "noc1_out_west",
            LinkName::Noc0Noc2axi => "noc0_noc2axi",
            LinkName::Noc1Noc2axi => "noc1_noc2axi",
            LinkName::DramInout => "dram_inout",
            LinkName::Dram0Inout => "dram0_inout",
            LinkName::Dram1Inout => "dram1_inout",
            LinkName::ToEthernet => "to_ethernet",
            LinkName::FromEthernet => "from_ethernet",
            LinkName::PcieInout => "pcie_inout",
        }
    }
}

impl fmt::Display for LinkName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ComputeNode {
    pub uid: String,
    pub kind: NodeKind,
    pub loc: Loc,
    /// Incident link ids, in creation order.
    pub links: Vec<String>,
    pub op_name: Option<String>,
    pub op_cycles: u64,
    pub queues: BTreeSet<String>,
    pub dram_channel: Option<u32>,
    pub dram_subchannel: Option<u32>,
    pub l1: Option<L1Layout>,
    pub timing: Option<Measurements>,
}

impl ComputeNode {
    #[must_use]
    pub fn new(uid: String, kind: NodeKind, loc: Loc) -> Self {
        Self {
            uid,
            kind,
            loc,
            links: Vec::new(),
            op_name: None,
            op_cycles: 0,
            queues: BTreeSet::new(),
            dram_channel: None,
            dram_subchannel: None,
            l1: None,
            timing: None,
        }
    }
}

/// A physical wire or port on the chip.
///
/// Data fields are filled in by fusion. The derived bandwidth fields are only
/// written by [crate::bandwidth].
#[derive(Clone, Debug, PartialEq)]
pub struct Link {
    pub id: String,
    pub name: LinkName,
    pub kind: LinkKind,
    pub endpoints: Vec<String>,
    pub pipes: BTreeSet<String>,
    pub total_data_bytes: u64,

    /// Fixed bytes/cycle for links that do not depend on clock or channel
    /// bandwidth.
    pub nominal_bandwidth: f64,

    max_bandwidth_per_cycle: f64,
    bytes_per_cycle: f64,
    saturation_percent: f64,
    normalized_saturation_percent: Option<f64>,
}

impl Link {
    #[must_use]
    pub fn new(
        id: String,
        name: LinkName,
        endpoints: Vec<String>,
        nominal_bandwidth: f64,
    ) -> Self {
        Self {
            id,
            name,
            kind: name.kind(),
            endpoints,
            pipes: BTreeSet::new(),
            total_data_bytes: 0,
            nominal_bandwidth,
            max_bandwidth_per_cycle: nominal_bandwidth,
            bytes_per_cycle: 0.0,
            saturation_percent: 0.0,
            normalized_saturation_percent: None,
        }
    }

    #[must_use]
    pub fn max_bandwidth_per_cycle(&self) -> f64 {
        self.max_bandwidth_per_cycle
    }

    #[must_use]
    pub fn bytes_per_cycle(&self) -> f64 {
        self.bytes_per_cycle
    }

    #[must_use]
    pub fn saturation_percent(&self) -> f64 {
        self.saturation_percent
    }

    /// Saturation against the slowest graph of the epoch. Only set on
    /// ethernet links.
    #[must_use]
    pub fn normalized_saturation_percent(&self) -> Option<f64> {
        self.normalized_saturation_percent
    }

    pub(crate) fn set_nominal_bandwidth(&mut self, bandwidth: f64) {
        self.nominal_bandwidth = bandwidth;
    }

    pub(crate) fn set_derived(
        &mut self,
        max_bandwidth: f64,
        bytes_per_cycle: f64,
        saturation: f64,
    ) {
        self.max_bandwidth_per_cycle = max_bandwidth;
        self.bytes_per_cycle = bytes_per_cycle;
        self.saturation_percent = saturation;
    }

    pub(crate) fn set_normalized_saturation(&mut self, saturation: f64) {
        self.normalized_saturation_percent = Some(saturation);
    }
}

/// A scheduled data transfer and the links it crosses, in order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pipe {
    pub id: String,
    pub route: Vec<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperandKind {
    Operation,
    Queue,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Operand {
    pub name: String,
    pub kind: OperandKind,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Operation {
    pub name: String,
    pub op_type: Option<String>,
    pub nodes: BTreeSet<String>,
    pub inputs: Vec<Operand>,
    pub outputs: Vec<Operand>,
    pub performance: Option<Measurements>,
}

impl Operation {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum QueueLocation {
    Dram,
    Host,
    #[default]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueAllocation {
    pub address: u64,
    pub channel: u32,
    pub subchannel: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Queue {
    pub name: String,
    pub nodes: BTreeSet<String>,
    pub location: QueueLocation,
    pub entries: Option<u64>,
    pub data_format: Option<String>,
    pub allocations: Vec<QueueAllocation>,
}

impl Queue {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// Operand that bounds an operation's runtime.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlowestOperand {
    Input(usize),
    Output,
}

impl FromStr for SlowestOperand {
    type Err = FusionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "output" {
            return Ok(SlowestOperand::Output);
        }
        match s.strip_prefix("input-").map(str::parse) {
            Some(Ok(index)) => Ok(SlowestOperand::Input(index)),
            _ => malformed!("Invalid slowest operand '{s}'"),
        }
    }
}

impl fmt::Display for SlowestOperand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SlowestOperand::Input(index) => write!(f, "input-{index}"),
            SlowestOperand::Output => write!(f, "output"),
        }
    }
}

/// Available and required bandwidth of one operand, in bytes/cycle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OperandBandwidth {
    pub index: usize,
    pub available: f64,
    pub required: f64,
}

/// Timing measured by the performance analyzer, for a core or a whole
/// operation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Measurements {
    pub kernel_total_runtime: u64,
    pub kernel_runtime_per_input: u64,
    pub model_runtime_per_input: u64,
    pub kernel_math_utilization: f64,
    pub model_math_utilization: f64,
    pub bw_limited_factor: f64,
    pub slowest_operand: Option<SlowestOperand>,
    pub bw_bound_total_runtime: u64,
    pub bw_bound_runtime_per_input: u64,
    pub bw_bound_math_utilization: f64,
    pub inputs: Vec<OperandBandwidth>,
    pub outputs: Vec<OperandBandwidth>,
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loc_from_key() {
        assert_eq!("3-11".parse::<Loc>().unwrap(), Loc::new(3, 11));
        assert_eq!(Loc::new(3, 11).to_string(), "3-11");
        assert_eq!(node_uid(2, Loc::new(3, 11)), "2-3-11");
    }

    #[test]
    #[should_panic(expected = "Invalid core location '3_11'")]
    fn loc_bad_key() {
        "3_11".parse::<Loc>().unwrap();
    }

    #[test]
    fn link_names_map_to_kinds() {
        assert_eq!(LinkName::Noc0InWest.kind(), LinkKind::Noc0);
        assert_eq!(LinkName::Noc1Noc2axi.kind(), LinkKind::Noc1);
        assert_eq!(LinkName::Dram1Inout.kind(), LinkKind::Dram);
        assert_eq!(LinkName::FromEthernet.kind(), LinkKind::Ethernet);
        assert_eq!(LinkName::PcieInout.kind(), LinkKind::Pcie);

        let name: LinkName = serde_yaml::from_str("noc1_out_north").unwrap();
        assert_eq!(name, LinkName::Noc1OutNorth);
        assert_eq!(name.as_str(), "noc1_out_north");
    }

    #[test]
    fn slowest_operand() {
        assert_eq!(
            "input-2".parse::<SlowestOperand>().unwrap(),
            SlowestOperand::Input(2)
        );
        assert_eq!(
            "output".parse::<SlowestOperand>().unwrap(),
            SlowestOperand::Output
        );
        assert!("inputs".parse::<SlowestOperand>().is_err());
    }
}
