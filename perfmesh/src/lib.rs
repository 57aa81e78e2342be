// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Fusion of accelerator profiler output into per-chip topology graphs.
//!
//! A [ChipGraph] is created from an architecture template by
//! [builder::build_skeleton], augmented by the stages in [fusion] and then
//! annotated with link bandwidth figures by [bandwidth]. Graphs of the same
//! temporal epoch can be joined into a cluster view with [cluster].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use crate::arch::Architecture;
use crate::entity::{ComputeNode, Link, LinkKind, LinkName, Loc, Operation, Pipe, Queue};
use crate::types::{FusionError, FusionResult};

pub mod arch;
pub mod bandwidth;
pub mod builder;
pub mod cluster;
pub mod entity;
pub mod fusion;
pub mod l1_layout;
pub mod sources;
pub mod test_helpers;
pub mod types;

/// Everything known about one chip during one temporal epoch.
///
/// Entities refer to each other by id. Only the fusion stages add to a graph
/// and only the bandwidth engine rewrites the derived link figures.
#[derive(Clone, Debug, PartialEq)]
pub struct ChipGraph {
    chip_id: u32,
    epoch: u32,
    arch: Architecture,
    columns: u32,
    rows: u32,
    l1_capacity: u64,
    total_workload_cycles: u64,
    max_bw_limited_factor: f64,
    nodes: BTreeMap<String, ComputeNode>,
    node_uid_by_loc: BTreeMap<Loc, String>,
    links: BTreeMap<String, Link>,
    link_ids_by_kind: BTreeMap<LinkKind, Vec<String>>,
    /// Node uids of each DRAM channel, by subchannel.
    dram_channels: Vec<Vec<String>>,
    pipes: BTreeMap<String, Pipe>,
    operations: BTreeMap<String, Operation>,
    queues: BTreeMap<String, Queue>,
}

impl ChipGraph {
    pub(crate) fn new(
        chip_id: u32,
        epoch: u32,
        arch: Architecture,
        columns: u32,
        rows: u32,
        l1_capacity: u64,
    ) -> Self {
        Self {
            chip_id,
            epoch,
            arch,
            columns,
            rows,
            l1_capacity,
            total_workload_cycles: 0,
            max_bw_limited_factor: 0.0,
            nodes: BTreeMap::new(),
            node_uid_by_loc: BTreeMap::new(),
            links: BTreeMap::new(),
            link_ids_by_kind: BTreeMap::new(),
            dram_channels: Vec::new(),
            pipes: BTreeMap::new(),
            operations: BTreeMap::new(),
            queues: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn chip_id(&self) -> u32 {
        self.chip_id
    }

    #[must_use]
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    #[must_use]
    pub fn arch(&self) -> Architecture {
        self.arch
    }

    /// Grid size as (columns, rows).
    #[must_use]
    pub fn grid_size(&self) -> (u32, u32) {
        (self.columns, self.rows)
    }

    #[must_use]
    pub fn l1_capacity(&self) -> u64 {
        self.l1_capacity
    }

    #[must_use]
    pub fn total_workload_cycles(&self) -> u64 {
        self.total_workload_cycles
    }

    /// Largest bandwidth-limited factor of any operation on this chip.
    #[must_use]
    pub fn max_bw_limited_factor(&self) -> f64 {
        self.max_bw_limited_factor
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ComputeNode> {
        self.nodes.values()
    }

    #[must_use]
    pub fn node(&self, uid: &str) -> Option<&ComputeNode> {
        self.nodes.get(uid)
    }

    pub fn node_uid_from_loc(&self, loc: Loc) -> Result<&str, FusionError> {
        match self.node_uid_by_loc.get(&loc) {
            Some(uid) => Ok(uid),
            None => malformed!("No node at {loc} on chip {}", self.chip_id),
        }
    }

    pub fn node_at(&self, loc: Loc) -> Result<&ComputeNode, FusionError> {
        let uid = self.node_uid_from_loc(loc)?;
        self.node_from_uid(uid)
    }

    pub fn node_from_uid(&self, uid: &str) -> Result<&ComputeNode, FusionError> {
        match self.nodes.get(uid) {
            Some(node) => Ok(node),
            None => malformed!("No node '{uid}'"),
        }
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    #[must_use]
    pub fn link(&self, id: &str) -> Option<&Link> {
        self.links.get(id)
    }

    pub fn links_of_kind(&self, kind: LinkKind) -> impl Iterator<Item = &Link> {
        self.link_ids_by_kind
            .get(&kind)
            .into_iter()
            .flatten()
            .filter_map(|id| self.links.get(id))
    }

    pub fn pipes(&self) -> impl Iterator<Item = &Pipe> {
        self.pipes.values()
    }

    #[must_use]
    pub fn pipe(&self, id: &str) -> Option<&Pipe> {
        self.pipes.get(id)
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.operations.values()
    }

    #[must_use]
    pub fn operation(&self, name: &str) -> Option<&Operation> {
        self.operations.get(name)
    }

    pub fn queues(&self) -> impl Iterator<Item = &Queue> {
        self.queues.values()
    }

    #[must_use]
    pub fn queue(&self, name: &str) -> Option<&Queue> {
        self.queues.get(name)
    }

    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn num_links(&self) -> usize {
        self.links.len()
    }

    #[must_use]
    pub fn num_pipes(&self) -> usize {
        self.pipes.len()
    }

    #[must_use]
    pub fn num_dram_channels(&self) -> usize {
        self.dram_channels.len()
    }

    /// Ids of the pipes that cross any link of `kind`.
    #[must_use]
    pub fn pipes_on(&self, kind: LinkKind) -> BTreeSet<&str> {
        self.links_of_kind(kind)
            .flat_map(|link| link.pipes.iter().map(String::as_str))
            .collect()
    }

    /// Check that every id stored in the graph resolves.
    pub fn check_integrity(&self) -> FusionResult {
        let mut errors = Vec::new();

        for link in self.links.values() {
            if link.endpoints.is_empty() || link.endpoints.len() > 2 {
                errors.push(format!(
                    "Link {} has {} endpoints",
                    link.id,
                    link.endpoints.len()
                ));
            }
            for endpoint in &link.endpoints {
                if !self.nodes.contains_key(endpoint) {
                    errors.push(format!("Link {} has unknown endpoint {endpoint}", link.id));
                }
            }
            for pipe in &link.pipes {
                if !self.pipes.contains_key(pipe) {
                    errors.push(format!("Link {} carries unknown pipe {pipe}", link.id));
                }
            }
        }

        for pipe in self.pipes.values() {
            for link_id in &pipe.route {
                if !self.links.contains_key(link_id) {
                    errors.push(format!("Pipe {} routed over unknown link {link_id}", pipe.id));
                }
            }
        }

        for node in self.nodes.values() {
            if let Some(op_name) = &node.op_name
                && !self.operations.contains_key(op_name)
            {
                errors.push(format!("Node {} runs unknown operation {op_name}", node.uid));
            }
            for queue in &node.queues {
                if !self.queues.contains_key(queue) {
                    errors.push(format!("Node {} holds unknown queue {queue}", node.uid));
                }
            }
        }

        for operation in self.operations.values() {
            for uid in &operation.nodes {
                if !self.nodes.contains_key(uid) {
                    errors.push(format!("Operation {} on unknown node {uid}", operation.name));
                }
            }
        }

        for queue in self.queues.values() {
            for uid in &queue.nodes {
                if !self.nodes.contains_key(uid) {
                    errors.push(format!("Queue {} on unknown node {uid}", queue.name));
                }
            }
        }

        if !errors.is_empty() {
            return malformed!(
                "Chip {} epoch {} failed integrity check:\n{}",
                self.chip_id,
                self.epoch,
                errors.join("\n")
            );
        }
        Ok(())
    }

    pub(crate) fn add_node(&mut self, node: ComputeNode) -> FusionResult {
        if self.node_uid_by_loc.contains_key(&node.loc) || self.nodes.contains_key(&node.uid) {
            return config_error!("Duplicate node {}", node.uid);
        }
        self.node_uid_by_loc.insert(node.loc, node.uid.clone());
        self.nodes.insert(node.uid.clone(), node);
        Ok(())
    }

    pub(crate) fn add_link(&mut self, link: Link) -> FusionResult {
        if self.links.contains_key(&link.id) {
            return config_error!("Duplicate link {}", link.id);
        }
        for endpoint in &link.endpoints {
            match self.nodes.get_mut(endpoint) {
                Some(node) => node.links.push(link.id.clone()),
                None => return config_error!("Link {} has unknown endpoint {endpoint}", link.id),
            }
        }
        self.link_ids_by_kind
            .entry(link.kind)
            .or_default()
            .push(link.id.clone());
        self.links.insert(link.id.clone(), link);
        Ok(())
    }

    pub(crate) fn set_dram_channels(&mut self, channels: Vec<Vec<String>>) {
        self.dram_channels = channels;
    }

    pub(crate) fn dram_channel_nodes(&self, channel: u32) -> Result<&[String], FusionError> {
        match self.dram_channels.get(channel as usize) {
            Some(uids) => Ok(uids),
            None => malformed!("No DRAM channel {channel} on chip {}", self.chip_id),
        }
    }

    pub(crate) fn node_mut(&mut self, uid: &str) -> Result<&mut ComputeNode, FusionError> {
        match self.nodes.get_mut(uid) {
            Some(node) => Ok(node),
            None => malformed!("No node '{uid}'"),
        }
    }

    pub(crate) fn link_mut(&mut self, id: &str) -> Option<&mut Link> {
        self.links.get_mut(id)
    }

    /// Id of the link that a node reports as `name`.
    ///
    /// Incoming NOC ports are the outgoing port of the upstream neighbour, so
    /// both ends of a wire resolve to the same link.
    pub fn link_id_from_name(&self, loc: Loc, name: LinkName) -> Result<String, FusionError> {
        let (columns, rows) = (self.columns, self.rows);
        let (loc, name) = match name {
            LinkName::Noc0InWest => (
                Loc::new((loc.x + columns - 1) % columns, loc.y),
                LinkName::Noc0OutEast,
            ),
            LinkName::Noc0InNorth => (
                Loc::new(loc.x, (loc.y + rows - 1) % rows),
                LinkName::Noc0OutSouth,
            ),
            LinkName::Noc1InEast => (Loc::new((loc.x + 1) % columns, loc.y), LinkName::Noc1OutWest),
            LinkName::Noc1InSouth => (Loc::new(loc.x, (loc.y + 1) % rows), LinkName::Noc1OutNorth),
            _ => (loc, name),
        };
        let uid = self.node_uid_from_loc(loc)?;
        let id = node_link_id(uid, name);
        if !self.links.contains_key(&id) {
            return malformed!("Node {uid} has no {name} link");
        }
        Ok(id)
    }

    /// Id of a DRAM bank link owned by a whole channel.
    pub fn channel_link_id(&self, channel: u32, name: LinkName) -> Result<String, FusionError> {
        let id = channel_link_id(self.chip_id, channel, name);
        if !self.links.contains_key(&id) {
            return malformed!("DRAM channel {channel} has no {name} link");
        }
        Ok(id)
    }

    /// Route `pipe_id` over `link_id`, adding `bytes` the first time the pair
    /// is seen.
    pub(crate) fn map_pipe(&mut self, link_id: &str, pipe_id: &str, bytes: u64) -> FusionResult {
        let Some(link) = self.links.get_mut(link_id) else {
            return malformed!("No link '{link_id}'");
        };
        if link.pipes.contains(pipe_id) {
            return Ok(());
        }
        let Some(total) = link.total_data_bytes.checked_add(bytes) else {
            return malformed!("Link {link_id} data volume overflows");
        };
        link.pipes.insert(pipe_id.to_string());
        link.total_data_bytes = total;

        let pipe = self
            .pipes
            .entry(pipe_id.to_string())
            .or_insert_with(|| Pipe {
                id: pipe_id.to_string(),
                route: Vec::new(),
            });
        pipe.route.push(link_id.to_string());
        Ok(())
    }

    pub(crate) fn operation_entry(&mut self, name: &str) -> &mut Operation {
        self.operations
            .entry(name.to_string())
            .or_insert_with(|| Operation::new(name))
    }

    pub(crate) fn operation_mut(&mut self, name: &str) -> Option<&mut Operation> {
        self.operations.get_mut(name)
    }

    pub(crate) fn queue_entry(&mut self, name: &str) -> &mut Queue {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| Queue::new(name))
    }

    pub(crate) fn set_total_workload_cycles(&mut self, cycles: u64) {
        self.total_workload_cycles = cycles;
    }

    pub(crate) fn set_max_bw_limited_factor(&mut self, factor: f64) {
        self.max_bw_limited_factor = factor;
    }

    /// Apply `f` to every link of `kind`.
    pub(crate) fn update_links(&mut self, kind: LinkKind, mut f: impl FnMut(&mut Link)) {
        if let Some(ids) = self.link_ids_by_kind.get(&kind) {
            for id in ids {
                if let Some(link) = self.links.get_mut(id) {
                    f(link);
                }
            }
        }
    }
}

impl Display for ChipGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Chip {} epoch {} ({}, {}x{})",
            self.chip_id, self.epoch, self.arch, self.columns, self.rows
        )?;
        writeln!(f, "  total workload cycles: {}", self.total_workload_cycles)?;
        writeln!(f, "  nodes: {}", self.nodes.len())?;
        for kind in LinkKind::ALL {
            let num_links = self.link_ids_by_kind.get(&kind).map_or(0, Vec::len);
            writeln!(f, "  {kind} links: {num_links}")?;
        }
        writeln!(f, "  pipes: {}", self.pipes.len())?;
        writeln!(f, "  operations: {}", self.operations.len())?;
        write!(f, "  queues: {}", self.queues.len())
    }
}

#[must_use]
pub(crate) fn node_link_id(uid: &str, name: LinkName) -> String {
    format!("{uid}-{name}")
}

#[must_use]
pub(crate) fn channel_link_id(chip_id: u32, channel: u32, name: LinkName) -> String {
    format!("{chip_id}-ch{channel}-{name}")
}
