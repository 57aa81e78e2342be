// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use std::io::{self, Write};

use perfmesh::ChipGraph;
use perfmesh::bandwidth::congested_links;
use perfmesh::cluster::{ClusterTopology, PipeEntry};

pub fn write_graph<W: Write>(
    out: &mut W,
    name: &str,
    graph: &ChipGraph,
    threshold_percent: f64,
) -> io::Result<()> {
    writeln!(out, "{name}: {graph}")?;
    writeln!(
        out,
        "  max bandwidth-limited factor: {:.2}",
        graph.max_bw_limited_factor()
    )?;

    let congested = congested_links(graph, threshold_percent);
    if congested.is_empty() {
        return writeln!(out, "  no links at or above {threshold_percent:.1}%");
    }
    writeln!(out, "  links at or above {threshold_percent:.1}%:")?;
    for link in congested {
        write!(
            out,
            "    {:<28} {:<8} {:>10} bytes {:>8.3} B/cycle {:>8.2}%",
            link.id,
            link.kind.to_string(),
            link.total_data_bytes,
            link.bytes_per_cycle(),
            link.saturation_percent()
        )?;
        match link.normalized_saturation_percent() {
            Some(normalized) => writeln!(out, " ({normalized:.2}% of epoch)")?,
            None => writeln!(out)?,
        }
    }
    Ok(())
}

pub fn write_topology<W: Write>(out: &mut W, topology: &ClusterTopology) -> io::Result<()> {
    writeln!(out, "Epoch {} cluster:", topology.epoch)?;
    for (chip_id, buckets) in &topology.directions {
        for (direction, uids) in buckets {
            writeln!(out, "  chip {chip_id} {direction}: {}", uids.join(", "))?;
        }
    }
    write_pipes(out, "ethernet", &topology.pipes.ethernet)?;
    write_pipes(out, "PCIe", &topology.pipes.pcie)
}

fn write_pipes<W: Write>(out: &mut W, label: &str, pipes: &[PipeEntry]) -> io::Result<()> {
    writeln!(out, "  {} {label} pipes", pipes.len())?;
    for pipe in pipes {
        writeln!(out, "    {} (chip {})", pipe.id, pipe.chip_id)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use perfmesh::arch::Architecture;
    use perfmesh::bandwidth::{BandwidthParams, set_workload_cycles};
    use perfmesh::cluster::Cluster;
    use perfmesh::fusion::load_chip;
    use perfmesh::test_helpers::{cluster_descriptor, wormhole_request};

    use super::*;

    #[test]
    fn congested_links_listed() {
        let mut graph = load_chip(&wormhole_request(0, 0).unwrap()).unwrap();
        set_workload_cycles(&mut graph, 100, &BandwidthParams::default());

        let mut out = Vec::new();
        write_graph(&mut out, "fwd_0", &graph, 75.0).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("fwd_0: Chip 0 epoch 0"));
        assert!(text.contains("0-ch0-dram0_inout"));
        assert!(!text.contains("0-0-3-pcie_inout"));
    }

    #[test]
    fn quiet_graph() {
        let graph = load_chip(&wormhole_request(0, 0).unwrap()).unwrap();
        let mut out = Vec::new();
        write_graph(&mut out, "fwd_0", &graph, 75.0).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("no links at or above 75.0%"));
    }

    #[test]
    fn topology_lists_directions_and_pipes() {
        let graphs = vec![load_chip(&wormhole_request(0, 0).unwrap()).unwrap()];
        let cluster =
            Cluster::from_descriptor(&cluster_descriptor().unwrap(), Architecture::Wormhole)
                .unwrap();
        let topology = ClusterTopology::assemble(0, &graphs, &cluster).unwrap();

        let mut out = Vec::new();
        write_topology(&mut out, &topology).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("chip 0 right: 0-9-0"));
        assert!(text.contains("1 ethernet pipes"));
        assert!(text.contains("P42 (chip 0)"));
    }
}
