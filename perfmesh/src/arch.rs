// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Fixed per-architecture grid descriptions.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config_error;
use crate::entity::{Loc, NodeKind};
use crate::types::{FusionError, parse_byte_str};

const GRAYSKULL_TEMPLATE: &str = include_str!("../arch/grayskull.yaml");
const WORMHOLE_TEMPLATE: &str = include_str!("../arch/wormhole.yaml");

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Grayskull,
    Wormhole,
}

impl FromStr for Architecture {
    type Err = FusionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" => config_error!("No architecture specified"),
            "grayskull" => Ok(Architecture::Grayskull),
            "wormhole" | "wormhole_b0" => Ok(Architecture::Wormhole),
            _ => config_error!("Unknown architecture '{s}'"),
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Architecture::Grayskull => write!(f, "grayskull"),
            Architecture::Wormhole => write!(f, "wormhole"),
        }
    }
}

#[derive(Copy, Clone, Debug, Deserialize)]
pub struct GridSection {
    pub x_size: u32,
    pub y_size: u32,
}

/// Grid description of one architecture.
///
/// Locations use the `"x-y"` form. Cells not listed under any other kind are
/// functional worker cores.
#[derive(Debug, Deserialize)]
pub struct ArchTemplate {
    pub arch_name: Architecture,
    pub grid: GridSection,
    #[serde(deserialize_with = "parse_byte_str")]
    pub l1_size_bytes: u64,
    pub noc_link_bandwidth: f64,
    pub dram_banks_per_channel: u32,
    pub arc: Vec<String>,
    pub pcie: Vec<String>,
    /// One entry per DRAM channel, listing its subchannel locations.
    pub dram: Vec<Vec<String>>,
    /// Ordered by ethernet channel.
    pub eth: Vec<String>,
    pub router_only: Vec<String>,
}

impl ArchTemplate {
    pub fn for_arch(arch: Architecture) -> Result<Self, FusionError> {
        let template = match arch {
            Architecture::Grayskull => GRAYSKULL_TEMPLATE,
            Architecture::Wormhole => WORMHOLE_TEMPLATE,
        };
        Self::from_string(template)
    }

    pub fn from_string(template: &str) -> Result<Self, FusionError> {
        let template: ArchTemplate = serde_yaml::from_str(template)
            .map_err(|e| FusionError::Configuration(format!("serde_yaml::from_str failed: {e}")))?;
        template.validate()?;
        Ok(template)
    }

    fn validate(&self) -> Result<(), FusionError> {
        if self.grid.x_size == 0 || self.grid.y_size == 0 {
            return config_error!("{}: empty grid", self.arch_name);
        }
        if !(1..=2).contains(&self.dram_banks_per_channel) {
            return config_error!(
                "{}: unsupported {} DRAM banks per channel",
                self.arch_name,
                self.dram_banks_per_channel
            );
        }
        if self.dram.iter().any(Vec::is_empty) {
            return config_error!("{}: DRAM channel without subchannels", self.arch_name);
        }
        self.node_kinds().map(|_| ())
    }

    /// Kind of every grid cell.
    pub fn node_kinds(&self) -> Result<BTreeMap<Loc, NodeKind>, FusionError> {
        let mut kinds = BTreeMap::new();
        for y in 0..self.grid.y_size {
            for x in 0..self.grid.x_size {
                kinds.insert(Loc::new(x, y), NodeKind::Core);
            }
        }

        let mut assigned = BTreeMap::new();
        let listed = [
            (NodeKind::Arc, self.arc.iter().collect::<Vec<_>>()),
            (NodeKind::Pcie, self.pcie.iter().collect()),
            (NodeKind::Dram, self.dram.iter().flatten().collect()),
            (NodeKind::Ethernet, self.eth.iter().collect()),
            (NodeKind::Router, self.router_only.iter().collect()),
        ];
        for (kind, locations) in listed {
            for location in locations {
                let loc = self.parse_loc(location)?;
                if let Some(previous) = assigned.insert(loc, kind) {
                    return config_error!(
                        "{}: location {loc} listed as both {previous} and {kind}",
                        self.arch_name
                    );
                }
                kinds.insert(loc, kind);
            }
        }
        Ok(kinds)
    }

    pub fn dram_channels(&self) -> Result<Vec<Vec<Loc>>, FusionError> {
        self.dram
            .iter()
            .map(|channel| channel.iter().map(|l| self.parse_loc(l)).collect())
            .collect()
    }

    pub fn eth_locations(&self) -> Result<Vec<Loc>, FusionError> {
        self.eth.iter().map(|l| self.parse_loc(l)).collect()
    }

    fn parse_loc(&self, location: &str) -> Result<Loc, FusionError> {
        let loc: Loc = location
            .parse()
            .map_err(|e| FusionError::Configuration(format!("{}: {e}", self.arch_name)))?;
        if loc.x >= self.grid.x_size || loc.y >= self.grid.y_size {
            return config_error!("{}: location {loc} outside the grid", self.arch_name);
        }
        Ok(loc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_identifiers() {
        assert_eq!(
            "Wormhole_B0".parse::<Architecture>().unwrap(),
            Architecture::Wormhole
        );
        assert_eq!(
            "grayskull".parse::<Architecture>().unwrap(),
            Architecture::Grayskull
        );
    }

    #[test]
    #[should_panic(expected = "Unknown architecture 'blackhole'")]
    fn unknown_identifier() {
        "blackhole".parse::<Architecture>().unwrap();
    }

    #[test]
    #[should_panic(expected = "No architecture specified")]
    fn empty_identifier() {
        " ".parse::<Architecture>().unwrap();
    }

    #[test]
    fn wormhole_template() {
        let template = ArchTemplate::for_arch(Architecture::Wormhole).unwrap();
        let kinds = template.node_kinds().unwrap();
        assert_eq!(kinds.len(), 120);
        assert_eq!(kinds[&Loc::new(0, 10)], NodeKind::Arc);
        assert_eq!(kinds[&Loc::new(9, 6)], NodeKind::Ethernet);
        assert_eq!(kinds[&Loc::new(1, 1)], NodeKind::Core);
        assert_eq!(template.l1_size_bytes, 1_499_136);
        assert_eq!(template.eth_locations().unwrap()[1], Loc::new(1, 0));
    }

    #[test]
    fn grayskull_template() {
        let template = ArchTemplate::for_arch(Architecture::Grayskull).unwrap();
        let kinds = template.node_kinds().unwrap();
        let cores = kinds.values().filter(|k| **k == NodeKind::Core).count();
        assert_eq!(cores, 120);
        assert_eq!(template.l1_size_bytes, 1024 * 1024);
        assert!(template.eth_locations().unwrap().is_empty());
    }

    #[test]
    #[should_panic(expected = "location 1-1 listed as both dram and eth")]
    fn location_listed_twice() {
        ArchTemplate::from_string(
            "
arch_name: wormhole
grid: { x_size: 2, y_size: 2 }
l1_size_bytes: 1024
noc_link_bandwidth: 32
dram_banks_per_channel: 1
arc: []
pcie: []
dram: [[\"1-1\"]]
eth: [\"1-1\"]
router_only: []
",
        )
        .unwrap();
    }
}
