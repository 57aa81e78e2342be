// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The ordered augmentation stages that turn a skeleton into a fused graph.
//!
//! Every stage takes the graph by value and hands it back only on success,
//! so a failing stage never leaves a half-augmented graph behind. Stages must
//! run in the order netlist, queues, core performance, op performance.

use std::collections::BTreeSet;

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::ChipGraph;
use crate::arch::Architecture;
use crate::builder::load_architecture;
use crate::entity::{
    LinkKind, Loc, NodeKind, Operand, OperandKind, QueueAllocation, QueueLocation,
};
use crate::l1_layout::{L1Layout, MemoryChunk};
use crate::malformed;
use crate::sources::{
    BufferRecord, CorePerfRecord, LinkRecord, NetlistRecord, OpPerfRecord, OperandRecord,
    QueueDescriptor,
};
use crate::types::{FusionError, FusionResult, LoadError, Stage};

/// Assign operations to cores and route pipes over links.
pub fn apply_netlist(
    mut graph: ChipGraph,
    netlist: &NetlistRecord,
) -> Result<ChipGraph, FusionError> {
    if let Some(chip_id) = netlist.chip_id
        && chip_id != graph.chip_id()
    {
        return malformed!(
            "Netlist for chip {chip_id} applied to chip {}",
            graph.chip_id()
        );
    }
    if let Some(arch_name) = &netlist.arch {
        let arch: Architecture = arch_name.parse()?;
        if arch != graph.arch() {
            return malformed!("Netlist for {arch} applied to a {} chip", graph.arch());
        }
    }

    for record in &netlist.nodes {
        let loc = Loc::new(record.location[0], record.location[1]);
        let uid = graph.node_uid_from_loc(loc)?.to_string();

        let node = graph.node_mut(&uid)?;
        if let Some(kind) = record.kind
            && kind != node.kind
            && !matches!(node.kind, NodeKind::Arc | NodeKind::Router)
        {
            return malformed!("Node {uid} is {} but the netlist says {kind}", node.kind);
        }
        node.op_cycles = record.op_cycles;

        if let Some(op_name) = record.op_name.as_deref().filter(|name| !name.is_empty()) {
            node.op_name = Some(op_name.to_string());
            graph.operation_entry(op_name).nodes.insert(uid.clone());
        }

        for (name, link_record) in &record.links {
            let link_id = graph.link_id_from_name(loc, *name)?;
            apply_link_record(&mut graph, &link_id, link_record)?;
        }
    }

    for channel in &netlist.dram_channels {
        let uids = graph.dram_channel_nodes(channel.channel_id)?.to_vec();
        if channel.subchannels.len() > uids.len() {
            return malformed!(
                "DRAM channel {} has {} subchannels, netlist reports {}",
                channel.channel_id,
                uids.len(),
                channel.subchannels.len()
            );
        }
        for (uid, links) in uids.iter().zip(&channel.subchannels) {
            let loc = graph.node_from_uid(uid)?.loc;
            for (name, link_record) in links {
                let link_id = graph.link_id_from_name(loc, *name)?;
                apply_link_record(&mut graph, &link_id, link_record)?;
            }
        }
        for (name, link_record) in channel.bank_links() {
            let link_id = graph.channel_link_id(channel.channel_id, name)?;
            apply_link_record(&mut graph, &link_id, link_record)?;
        }
    }

    for (op_name, op_record) in &netlist.operations {
        for operand in op_record.inputs.iter().chain(&op_record.outputs) {
            if operand.kind == OperandKind::Queue {
                graph.queue_entry(&operand.name);
            }
        }
        let operation = graph.operation_entry(op_name);
        operation.op_type.clone_from(&op_record.op_type);
        operation.inputs = op_record.inputs.iter().map(operand).collect();
        operation.outputs = op_record.outputs.iter().map(operand).collect();
    }

    let total_cycles = netlist.slowest_op_cycles.min(netlist.bw_limited_op_cycles);
    if total_cycles == 0 {
        warn!(
            "Chip {} epoch {}: total op cycles is zero",
            graph.chip_id(),
            graph.epoch()
        );
    }
    graph.set_total_workload_cycles(total_cycles);

    graph.check_integrity()?;
    info!(
        "Chip {} epoch {}: netlist applied, {} pipes, {} operations",
        graph.chip_id(),
        graph.epoch(),
        graph.num_pipes(),
        graph.operations().count()
    );
    Ok(graph)
}

fn apply_link_record(graph: &mut ChipGraph, link_id: &str, record: &LinkRecord) -> FusionResult {
    if record.max_link_bw > 0.0
        && let Some(link) = graph.link_mut(link_id)
        && matches!(link.kind, LinkKind::Noc0 | LinkKind::Noc1)
    {
        link.set_nominal_bandwidth(record.max_link_bw);
    }
    for (pipe_id, bytes) in &record.mapped_pipes {
        graph.map_pipe(link_id, pipe_id, *bytes)?;
    }

    let pipe_bytes = record
        .mapped_pipes
        .values()
        .fold(0_u64, |total, bytes| total.saturating_add(*bytes));
    if record.total_data_in_bytes != 0 && record.total_data_in_bytes != pipe_bytes {
        debug!(
            "{link_id}: reported {} bytes, pipes carry {pipe_bytes}",
            record.total_data_in_bytes
        );
    }
    Ok(())
}

fn operand(record: &OperandRecord) -> Operand {
    Operand {
        name: record.name.clone(),
        kind: record.kind,
    }
}

/// Place queues on the DRAM nodes of the channels they are allocated in.
pub fn apply_queues(
    mut graph: ChipGraph,
    descriptor: &QueueDescriptor,
) -> Result<ChipGraph, FusionError> {
    for (name, record) in &descriptor.queues {
        let location = record.queue_location();

        let mut uids = BTreeSet::new();
        if location == QueueLocation::Dram {
            for allocation in &record.allocation_info {
                let nodes = graph
                    .dram_channel_nodes(allocation.channel)
                    .map_err(|e| in_context(&format!("Queue {name}"), e))?;
                uids.extend(nodes.iter().cloned());
            }
        }
        for uid in &uids {
            graph.node_mut(uid)?.queues.insert(name.clone());
        }

        let queue = graph.queue_entry(name);
        queue.location = location;
        queue.entries = record.entries;
        queue.data_format.clone_from(&record.data_format);
        queue.allocations = record
            .allocation_info
            .iter()
            .map(|a| QueueAllocation {
                address: a.address,
                channel: a.channel,
                subchannel: a.subchannel,
            })
            .collect();
        queue.nodes.extend(uids);
        debug!("Queue {name}: {:?} on {} nodes", location, queue.nodes.len());
    }

    graph.check_integrity()?;
    info!(
        "Chip {} epoch {}: {} queues applied",
        graph.chip_id(),
        graph.epoch(),
        descriptor.queues.len()
    );
    Ok(graph)
}

/// Fill in the L1 layout and timing of each profiled core.
pub fn apply_core_perf(
    mut graph: ChipGraph,
    record: &CorePerfRecord,
) -> Result<ChipGraph, FusionError> {
    for (key, core) in &record.worker_cores {
        let uid = core_uid(&graph, key)?;
        let capacity = core
            .core_attributes
            .as_ref()
            .and_then(|attributes| attributes.l1_size_bytes)
            .unwrap_or(graph.l1_capacity());

        let mut layout = L1Layout::new(capacity);
        for buffer in &core.binary_buffers {
            layout
                .insert_binary(chunk(buffer))
                .map_err(|e| in_context(&format!("Node {uid}"), e))?;
        }
        for buffer in &core.data_buffers {
            layout
                .insert_data(chunk(buffer))
                .map_err(|e| in_context(&format!("Node {uid}"), e))?;
        }
        layout
            .check_capacity()
            .map_err(|e| in_context(&format!("Node {uid}"), e))?;

        graph.node_mut(&uid)?.l1 = Some(layout);
    }

    let mut max_factor = graph.max_bw_limited_factor();
    for (key, measurements) in &record.core_measurements {
        let uid = core_uid(&graph, key)?;
        let timing = measurements.to_measurements()?;
        max_factor = max_factor.max(timing.bw_limited_factor);
        graph.node_mut(&uid)?.timing = Some(timing);
    }
    graph.set_max_bw_limited_factor(max_factor);

    info!(
        "Chip {} epoch {}: performance of {} cores applied",
        graph.chip_id(),
        graph.epoch(),
        record.worker_cores.len()
    );
    Ok(graph)
}

fn core_uid(graph: &ChipGraph, key: &str) -> Result<String, FusionError> {
    let loc: Loc = key.parse()?;
    let node = graph.node_at(loc)?;
    if node.kind != NodeKind::Core {
        return malformed!("Node {} is {}, not a core", node.uid, node.kind);
    }
    Ok(node.uid.clone())
}

fn chunk(buffer: &BufferRecord) -> MemoryChunk {
    MemoryChunk {
        name: buffer.buffer_name.clone(),
        address: buffer.start_address,
        size: buffer.reserved_size_bytes,
        consumed: buffer.consumed_size_bytes,
    }
}

fn in_context(context: &str, error: FusionError) -> FusionError {
    match error {
        FusionError::MalformedSource(msg) => {
            FusionError::MalformedSource(format!("{context}: {msg}"))
        }
        FusionError::Configuration(msg) => {
            FusionError::Configuration(format!("{context}: {msg}"))
        }
    }
}

/// Attach the aggregate analyzer results to operations on this chip.
///
/// Reports cover the whole graph, so operations mapped to other chips are
/// skipped.
pub fn apply_op_perf(
    mut graph: ChipGraph,
    record: &OpPerfRecord,
) -> Result<ChipGraph, FusionError> {
    let mut max_factor = graph.max_bw_limited_factor();
    for (op_name, entry) in &record.operations {
        let measurements = entry.op_measurements.to_measurements()?;
        match graph.operation_mut(op_name) {
            Some(operation) => {
                max_factor = max_factor.max(measurements.bw_limited_factor);
                operation.performance = Some(measurements);
            }
            None => debug!("Operation {op_name} is not on chip {}", graph.chip_id()),
        }
    }
    graph.set_max_bw_limited_factor(max_factor);
    Ok(graph)
}

/// Parsed sources of one chip. Only the netlist is required.
#[derive(Debug, Default)]
pub struct ChipSources {
    pub netlist: Option<NetlistRecord>,
    pub queues: Option<QueueDescriptor>,
    pub core_perf: Option<CorePerfRecord>,
    pub op_perf: Option<OpPerfRecord>,
}

#[derive(Debug)]
pub struct ChipRequest {
    pub arch: String,
    pub chip_id: u32,
    pub epoch: u32,
    pub sources: ChipSources,
}

/// Build and fuse the graph of one chip.
///
/// Any failure discards the graph and reports the stage it happened in.
pub fn load_chip(request: &ChipRequest) -> Result<ChipGraph, LoadError> {
    let tag = |stage: Stage| {
        move |error: FusionError| LoadError {
            chip_id: request.chip_id,
            epoch: request.epoch,
            stage,
            error,
        }
    };
    let sources = &request.sources;

    let graph = load_architecture(&request.arch, request.chip_id, request.epoch)
        .map_err(tag(Stage::Architecture))?;

    let Some(netlist) = &sources.netlist else {
        return Err(tag(Stage::Netlist)(FusionError::MalformedSource(
            "Missing netlist".to_string(),
        )));
    };
    let mut graph = apply_netlist(graph, netlist).map_err(tag(Stage::Netlist))?;

    if let Some(queues) = &sources.queues {
        graph = apply_queues(graph, queues).map_err(tag(Stage::Queues))?;
    }
    if let Some(core_perf) = &sources.core_perf {
        graph = apply_core_perf(graph, core_perf).map_err(tag(Stage::CorePerf))?;
    }
    if let Some(op_perf) = &sources.op_perf {
        graph = apply_op_perf(graph, op_perf).map_err(tag(Stage::OpPerf))?;
    }
    Ok(graph)
}

/// Load independent chips in parallel. Results are in request order.
pub fn load_chips(requests: &[ChipRequest]) -> Vec<Result<ChipGraph, LoadError>> {
    requests.par_iter().map(load_chip).collect()
}
