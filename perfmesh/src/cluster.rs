// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Inter-chip ethernet topology of one epoch.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use log::{debug, info};

use crate::ChipGraph;
use crate::arch::{ArchTemplate, Architecture};
use crate::entity::{LinkKind, node_uid};
use crate::malformed;
use crate::sources::ClusterDescriptor;
use crate::types::FusionError;

/// Physical placement of a chip: grid position, rack and shelf.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterCoordinates {
    pub x: u32,
    pub y: u32,
    pub rack: u32,
    pub shelf: u32,
}

impl ClusterCoordinates {
    fn from_record(chip_id: u32, record: &[u32]) -> Result<Self, FusionError> {
        let [x, y, rack, shelf] = record else {
            return malformed!(
                "Chip {chip_id} has coordinates {record:?}, expected [x, y, rack, shelf]"
            );
        };
        Ok(Self {
            x: *x,
            y: *y,
            rack: *rack,
            shelf: *shelf,
        })
    }
}

#[derive(Clone, Debug)]
pub struct ClusterChip {
    pub id: u32,
    pub coordinates: ClusterCoordinates,
    /// Whether the host can reach the chip directly over PCIe.
    pub mmio: bool,
    /// Ethernet node UIDs indexed by channel.
    pub eth: Vec<String>,
    connected_chips_by_eth: BTreeMap<String, u32>,
}

impl ClusterChip {
    #[must_use]
    pub fn connected_chip(&self, eth_uid: &str) -> Option<u32> {
        self.connected_chips_by_eth.get(eth_uid).copied()
    }

    pub fn connections(&self) -> impl Iterator<Item = (&str, u32)> {
        self.connected_chips_by_eth
            .iter()
            .map(|(uid, chip)| (uid.as_str(), *chip))
    }

    fn eth_uid(&self, channel: u32) -> Result<&str, FusionError> {
        match self.eth.get(channel as usize) {
            Some(uid) => Ok(uid),
            None => malformed!("Chip {} has no ethernet channel {channel}", self.id),
        }
    }
}

/// Side of a chip that an ethernet connection leaves from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    Left,
    Right,
    Top,
    Bottom,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Direction::Left => write!(f, "left"),
            Direction::Right => write!(f, "right"),
            Direction::Top => write!(f, "top"),
            Direction::Bottom => write!(f, "bottom"),
        }
    }
}

/// Direction of `other` as seen from `own`.
///
/// Rows grow downwards, so a smaller `y` is on top. A change of row wins over
/// a change of column, and a chip at the same position has no direction.
#[must_use]
pub fn classify(own: &ClusterCoordinates, other: &ClusterCoordinates) -> Option<Direction> {
    match (other.x.cmp(&own.x), other.y.cmp(&own.y)) {
        (_, Ordering::Less) => Some(Direction::Top),
        (_, Ordering::Greater) => Some(Direction::Bottom),
        (Ordering::Less, Ordering::Equal) => Some(Direction::Left),
        (Ordering::Greater, Ordering::Equal) => Some(Direction::Right),
        (Ordering::Equal, Ordering::Equal) => None,
    }
}

pub type DirectionBuckets = BTreeMap<Direction, Vec<String>>;

#[derive(Clone, Debug)]
pub struct Cluster {
    chips: BTreeMap<u32, ClusterChip>,
    columns: u32,
    rows: u32,
}

impl Cluster {
    /// Build the chips and their ethernet connectivity.
    ///
    /// Every chip is assumed to be of architecture `arch`, whose template
    /// gives the ethernet core of each channel.
    pub fn from_descriptor(
        descriptor: &ClusterDescriptor,
        arch: Architecture,
    ) -> Result<Self, FusionError> {
        let eth_locations = ArchTemplate::for_arch(arch)?.eth_locations()?;

        let mmio_chips: BTreeSet<u32> = descriptor
            .chips_with_mmio
            .iter()
            .flat_map(|entry| entry.values().copied())
            .collect();

        let mut chips = BTreeMap::new();
        let mut columns = 0;
        let mut rows = 0;
        for (id, record) in &descriptor.chips {
            let coordinates = ClusterCoordinates::from_record(*id, record)?;
            let (Some(column_end), Some(row_end)) =
                (coordinates.x.checked_add(1), coordinates.y.checked_add(1))
            else {
                return malformed!("Chip {id} coordinates {record:?} are out of range");
            };
            columns = columns.max(column_end);
            rows = rows.max(row_end);
            let chip = ClusterChip {
                id: *id,
                coordinates,
                mmio: mmio_chips.contains(id),
                eth: eth_locations.iter().map(|loc| node_uid(*id, *loc)).collect(),
                connected_chips_by_eth: BTreeMap::new(),
            };
            chips.insert(*id, chip);
        }

        let mut cluster = Self {
            chips,
            columns,
            rows,
        };
        for [first, second] in &descriptor.ethernet_connections {
            cluster.connect(first.chip, first.chan, second.chip)?;
            cluster.connect(second.chip, second.chan, first.chip)?;
        }

        info!(
            "Cluster of {} chips on a {}x{} grid, {} ethernet connections",
            cluster.chips.len(),
            columns,
            rows,
            descriptor.ethernet_connections.len()
        );
        Ok(cluster)
    }

    fn connect(&mut self, chip_id: u32, channel: u32, other: u32) -> Result<(), FusionError> {
        if !self.chips.contains_key(&other) {
            return malformed!("Ethernet connection to unknown chip {other}");
        }
        let Some(chip) = self.chips.get_mut(&chip_id) else {
            return malformed!("Ethernet connection from unknown chip {chip_id}");
        };
        let uid = chip.eth_uid(channel)?.to_string();
        chip.connected_chips_by_eth.insert(uid, other);
        Ok(())
    }

    pub fn chips(&self) -> impl Iterator<Item = &ClusterChip> {
        self.chips.values()
    }

    #[must_use]
    pub fn chip(&self, id: u32) -> Option<&ClusterChip> {
        self.chips.get(&id)
    }

    /// Number of (columns, rows) in the chip grid.
    #[must_use]
    pub fn grid_size(&self) -> (u32, u32) {
        (self.columns, self.rows)
    }

    /// Group the connected ethernet nodes of a chip by direction.
    pub fn directions(&self, chip_id: u32) -> Result<DirectionBuckets, FusionError> {
        let Some(chip) = self.chips.get(&chip_id) else {
            return malformed!("Unknown chip {chip_id}");
        };

        let mut buckets = DirectionBuckets::new();
        for uid in &chip.eth {
            let Some(other_id) = chip.connected_chip(uid) else {
                continue;
            };
            let Some(other) = self.chips.get(&other_id) else {
                continue;
            };
            match classify(&chip.coordinates, &other.coordinates) {
                Some(direction) => buckets.entry(direction).or_default().push(uid.clone()),
                None => debug!("{uid}: connection to chip {other_id} has no direction"),
            }
        }
        Ok(buckets)
    }
}

/// A pipe and the chip it was first found on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipeEntry {
    pub id: String,
    pub chip_id: u32,
}

/// Pipes of an epoch that leave a chip, one entry per pipe id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EpochPipes {
    pub ethernet: Vec<PipeEntry>,
    pub pcie: Vec<PipeEntry>,
}

impl EpochPipes {
    /// Gather the ethernet and PCIe pipes of `graphs`.
    ///
    /// A pipe id is kept the first time it is seen, in graph order and
    /// ethernet before PCIe within a graph. Later sightings are dropped.
    pub fn gather<'a>(graphs: impl IntoIterator<Item = &'a ChipGraph>) -> Self {
        let mut seen = BTreeSet::new();
        let mut pipes = Self::default();
        for graph in graphs {
            for (kind, list) in [
                (LinkKind::Ethernet, &mut pipes.ethernet),
                (LinkKind::Pcie, &mut pipes.pcie),
            ] {
                for id in graph.pipes_on(kind) {
                    if seen.insert(id.to_string()) {
                        list.push(PipeEntry {
                            id: id.to_string(),
                            chip_id: graph.chip_id(),
                        });
                    }
                }
            }
        }
        pipes.ethernet.sort_by(|a, b| a.id.cmp(&b.id));
        pipes.pcie.sort_by(|a, b| a.id.cmp(&b.id));
        pipes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ethernet.len() + self.pcie.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cluster view of one epoch.
#[derive(Clone, Debug)]
pub struct ClusterTopology {
    pub epoch: u32,
    /// Direction buckets of every chip in the cluster.
    pub directions: BTreeMap<u32, DirectionBuckets>,
    pub pipes: EpochPipes,
}

impl ClusterTopology {
    pub fn assemble<'a>(
        epoch: u32,
        graphs: impl IntoIterator<Item = &'a ChipGraph>,
        cluster: &Cluster,
    ) -> Result<Self, FusionError> {
        let graphs: Vec<&ChipGraph> = graphs.into_iter().collect();
        for graph in &graphs {
            if graph.epoch() != epoch {
                return malformed!(
                    "Chip {} graph is from epoch {}, not {epoch}",
                    graph.chip_id(),
                    graph.epoch()
                );
            }
            if cluster.chip(graph.chip_id()).is_none() {
                return malformed!("Chip {} is not in the cluster", graph.chip_id());
            }
        }

        let mut directions = BTreeMap::new();
        for chip in cluster.chips() {
            directions.insert(chip.id, cluster.directions(chip.id)?);
        }

        let pipes = EpochPipes::gather(graphs);
        info!(
            "Epoch {epoch}: {} ethernet and {} PCIe pipes",
            pipes.ethernet.len(),
            pipes.pcie.len()
        );
        Ok(Self {
            epoch,
            directions,
            pipes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(x: u32, y: u32) -> ClusterCoordinates {
        ClusterCoordinates {
            x,
            y,
            ..Default::default()
        }
    }

    #[test]
    fn single_axis_directions() {
        let own = at(1, 1);
        assert_eq!(classify(&own, &at(0, 1)), Some(Direction::Left));
        assert_eq!(classify(&own, &at(2, 1)), Some(Direction::Right));
        assert_eq!(classify(&own, &at(1, 0)), Some(Direction::Top));
        assert_eq!(classify(&own, &at(1, 2)), Some(Direction::Bottom));
    }

    #[test]
    fn diagonal_directions_follow_the_row() {
        let own = at(1, 1);
        assert_eq!(classify(&own, &at(2, 2)), Some(Direction::Bottom));
        assert_eq!(classify(&own, &at(0, 2)), Some(Direction::Bottom));
        assert_eq!(classify(&own, &at(0, 0)), Some(Direction::Top));
        assert_eq!(classify(&own, &at(2, 0)), Some(Direction::Top));
    }

    #[test]
    fn same_position_has_no_direction() {
        let own = at(1, 1);
        assert_eq!(classify(&own, &own), None);
    }

    #[test]
    #[should_panic(expected = "expected [x, y, rack, shelf]")]
    fn short_coordinates() {
        ClusterCoordinates::from_record(0, &[1, 2]).unwrap();
    }
}
