// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Construction of skeleton graphs from architecture templates.

use log::debug;

use crate::arch::{ArchTemplate, Architecture};
use crate::bandwidth::ETHERNET_BANDWIDTH_BYTES_PER_CYCLE;
use crate::entity::{ComputeNode, Link, LinkName, Loc, NodeKind, node_uid};
use crate::types::{FusionError, FusionResult};
use crate::{ChipGraph, channel_link_id, node_link_id};

/// Build the skeleton graph of chip `chip_id` for `arch`.
///
/// Only nodes and static links are created. Identical arguments always give
/// equal graphs.
pub fn build_skeleton(
    arch: Architecture,
    chip_id: u32,
    epoch: u32,
) -> Result<ChipGraph, FusionError> {
    let template = ArchTemplate::for_arch(arch)?;
    build_from_template(&template, chip_id, epoch)
}

/// Parse `arch_name` and build the skeleton for it.
pub fn load_architecture(
    arch_name: &str,
    chip_id: u32,
    epoch: u32,
) -> Result<ChipGraph, FusionError> {
    let arch: Architecture = arch_name.parse()?;
    build_skeleton(arch, chip_id, epoch)
}

pub fn build_from_template(
    template: &ArchTemplate,
    chip_id: u32,
    epoch: u32,
) -> Result<ChipGraph, FusionError> {
    let mut graph = ChipGraph::new(
        chip_id,
        epoch,
        template.arch_name,
        template.grid.x_size,
        template.grid.y_size,
        template.l1_size_bytes,
    );

    build_nodes(&mut graph, template)?;
    build_noc_links(&mut graph, template)?;
    build_dram_links(&mut graph, template)?;
    build_port_links(&mut graph)?;

    debug!(
        "Built {} skeleton for chip {chip_id}: {} nodes, {} links",
        template.arch_name,
        graph.num_nodes(),
        graph.num_links()
    );
    Ok(graph)
}

fn build_nodes(graph: &mut ChipGraph, template: &ArchTemplate) -> FusionResult {
    let chip_id = graph.chip_id();
    for (loc, kind) in template.node_kinds()? {
        graph.add_node(ComputeNode::new(node_uid(chip_id, loc), kind, loc))?;
    }

    let mut channels = Vec::new();
    for (channel, subchannels) in template.dram_channels()?.iter().enumerate() {
        let mut uids = Vec::new();
        for (subchannel, loc) in subchannels.iter().enumerate() {
            let uid = node_uid(chip_id, *loc);
            let node = graph.node_mut(&uid)?;
            node.dram_channel = Some(channel as u32);
            node.dram_subchannel = Some(subchannel as u32);
            uids.push(uid);
        }
        channels.push(uids);
    }
    graph.set_dram_channels(channels);
    Ok(())
}

/// Every router drives one link to each of its downstream neighbours on
/// both NOCs, wrapping at the grid edges, plus a port in each direction to
/// its own tile.
fn build_noc_links(graph: &mut ChipGraph, template: &ArchTemplate) -> FusionResult {
    let chip_id = graph.chip_id();
    let columns = template.grid.x_size;
    let rows = template.grid.y_size;
    let bandwidth = template.noc_link_bandwidth;

    for y in 0..rows {
        for x in 0..columns {
            let uid = node_uid(chip_id, Loc::new(x, y));
            let neighbours = [
                (LinkName::Noc0OutEast, Loc::new((x + 1) % columns, y)),
                (LinkName::Noc0OutSouth, Loc::new(x, (y + 1) % rows)),
                (LinkName::Noc1OutWest, Loc::new((x + columns - 1) % columns, y)),
                (LinkName::Noc1OutNorth, Loc::new(x, (y + rows - 1) % rows)),
            ];
            for (name, neighbour) in neighbours {
                let endpoints = vec![uid.clone(), node_uid(chip_id, neighbour)];
                let link = Link::new(node_link_id(&uid, name), name, endpoints, bandwidth);
                graph.add_link(link)?;
            }

            for name in [
                LinkName::Noc0LinkIn,
                LinkName::Noc0LinkOut,
                LinkName::Noc1LinkIn,
                LinkName::Noc1LinkOut,
            ] {
                let link = Link::new(node_link_id(&uid, name), name, vec![uid.clone()], bandwidth);
                graph.add_link(link)?;
            }
        }
    }
    Ok(())
}

fn build_dram_links(graph: &mut ChipGraph, template: &ArchTemplate) -> FusionResult {
    let chip_id = graph.chip_id();
    let bandwidth = template.noc_link_bandwidth;
    let banks: &[LinkName] = if template.dram_banks_per_channel == 1 {
        &[LinkName::DramInout]
    } else {
        &[LinkName::Dram0Inout, LinkName::Dram1Inout]
    };

    for (channel, subchannels) in template.dram_channels()?.iter().enumerate() {
        for loc in subchannels {
            let uid = node_uid(chip_id, *loc);
            for name in [LinkName::Noc0Noc2axi, LinkName::Noc1Noc2axi] {
                let link = Link::new(node_link_id(&uid, name), name, vec![uid.clone()], bandwidth);
                graph.add_link(link)?;
            }
        }

        // Bank links belong to the channel and hang off its first subchannel
        let Some(first) = subchannels.first() else {
            continue;
        };
        let anchor = node_uid(chip_id, *first);
        for name in banks {
            let id = channel_link_id(chip_id, channel as u32, *name);
            graph.add_link(Link::new(id, *name, vec![anchor.clone()], 0.0))?;
        }
    }
    Ok(())
}

fn build_port_links(graph: &mut ChipGraph) -> FusionResult {
    let ports: Vec<(String, NodeKind)> = graph
        .nodes()
        .filter(|node| matches!(node.kind, NodeKind::Ethernet | NodeKind::Pcie))
        .map(|node| (node.uid.clone(), node.kind))
        .collect();

    for (uid, kind) in ports {
        let names: &[LinkName] = match kind {
            NodeKind::Ethernet => &[LinkName::ToEthernet, LinkName::FromEthernet],
            _ => &[LinkName::PcieInout],
        };
        for name in names {
            let nominal = if kind == NodeKind::Ethernet {
                ETHERNET_BANDWIDTH_BYTES_PER_CYCLE
            } else {
                0.0
            };
            let link = Link::new(node_link_id(&uid, *name), *name, vec![uid.clone()], nominal);
            graph.add_link(link)?;
        }
    }
    Ok(())
}
