// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use perfmesh::entity::{OperandKind, QueueLocation, SlowestOperand};
use perfmesh::fusion::{
    ChipRequest, ChipSources, apply_core_perf, apply_netlist, apply_queues, load_chip,
    load_chips,
};
use perfmesh::sources::from_yaml;
use perfmesh::test_helpers::{NETLIST_YAML, QUEUES_YAML, wormhole_request, wormhole_sources};
use perfmesh::types::{FusionError, Stage};
use perfmesh::{ChipGraph, builder};

fn request_with_netlist(netlist: &str) -> ChipRequest {
    let mut request = wormhole_request(0, 0).unwrap();
    request.sources.netlist = Some(from_yaml(netlist).unwrap());
    request
}

fn netlist_only() -> ChipGraph {
    let skeleton = builder::load_architecture("wormhole", 0, 0).unwrap();
    apply_netlist(skeleton, &from_yaml(NETLIST_YAML).unwrap()).unwrap()
}

#[test]
fn fused_graph_is_consistent() {
    let graph = load_chip(&wormhole_request(0, 0).unwrap()).unwrap();
    graph.check_integrity().unwrap();

    assert_eq!(graph.total_workload_cycles(), 100_000);
    assert_eq!(graph.num_pipes(), 4);
    for pipe in graph.pipes() {
        for link_id in &pipe.route {
            assert!(graph.link(link_id).unwrap().pipes.contains(&pipe.id));
        }
    }
}

#[test]
fn both_ends_of_a_wire_count_once() {
    let graph = netlist_only();
    let link = graph.link("0-1-1-noc0_out_east").unwrap();
    assert_eq!(link.total_data_bytes, 2048);
    assert_eq!(link.endpoints, vec!["0-1-1", "0-2-1"]);
    assert_eq!(graph.pipe("100").unwrap().route, vec!["0-1-1-noc0_out_east"]);
}

#[test]
fn dram_pipe_route() {
    let graph = netlist_only();
    assert_eq!(
        graph.pipe("101").unwrap().route,
        vec![
            "0-0-0-noc0_noc2axi",
            "0-0-0-noc1_noc2axi",
            "0-ch0-dram0_inout"
        ]
    );
    assert_eq!(graph.link("0-ch0-dram0_inout").unwrap().total_data_bytes, 24000);
}

#[test]
fn operations_and_operands() {
    let graph = load_chip(&wormhole_request(0, 0).unwrap()).unwrap();

    let matmul = graph.operation("matmul0").unwrap();
    assert_eq!(matmul.op_type.as_deref(), Some("matmul"));
    assert_eq!(
        matmul.nodes.iter().collect::<Vec<_>>(),
        vec!["0-1-1", "0-2-1"]
    );
    assert_eq!(matmul.inputs[0].name, "input0");
    assert_eq!(matmul.inputs[0].kind, OperandKind::Queue);
    assert_eq!(matmul.outputs[0].kind, OperandKind::Operation);

    let node = graph.node("0-1-2").unwrap();
    assert_eq!(node.op_name.as_deref(), Some("add0"));
    assert_eq!(node.op_cycles, 40_000);
}

#[test]
fn queues_follow_dram_channels() {
    let graph = load_chip(&wormhole_request(0, 0).unwrap()).unwrap();

    let input = graph.queue("input0").unwrap();
    assert_eq!(input.location, QueueLocation::Dram);
    assert_eq!(input.entries, Some(4));
    assert_eq!(input.allocations[0].address, 0x3000_0000);
    assert_eq!(
        input.nodes.iter().collect::<Vec<_>>(),
        vec!["0-0-0", "0-0-1", "0-0-11"]
    );
    for uid in &input.nodes {
        assert!(graph.node(uid).unwrap().queues.contains("input0"));
    }

    let output = graph.queue("host_out").unwrap();
    assert_eq!(output.location, QueueLocation::Host);
    assert!(output.nodes.is_empty());
}

#[test]
fn queue_assignment_is_idempotent() {
    let descriptor = from_yaml(QUEUES_YAML).unwrap();
    let once = apply_queues(netlist_only(), &descriptor).unwrap();
    let twice = apply_queues(once.clone(), &descriptor).unwrap();

    assert_eq!(twice.queue("input0").unwrap().nodes, once.queue("input0").unwrap().nodes);
    assert_eq!(twice.node("0-0-0").unwrap().queues, once.node("0-0-0").unwrap().queues);
    assert_eq!(twice.node("0-0-0").unwrap().queues.len(), 1);

    let doubled = from_yaml(
        "
input0:
  location: LOCATION::DRAM
  allocation-info:
    - {address: 0x100, channel: 0, subchannel: 0}
    - {address: 0x200, channel: 0, subchannel: 1}
",
    )
    .unwrap();
    let graph = apply_queues(netlist_only(), &doubled).unwrap();
    assert_eq!(graph.queue("input0").unwrap().nodes.len(), 3);
    assert_eq!(graph.node("0-0-1").unwrap().queues.len(), 1);
}

#[test]
fn core_performance() {
    let graph = load_chip(&wormhole_request(0, 0).unwrap()).unwrap();
    let node = graph.node("0-1-1").unwrap();

    let l1 = node.l1.as_ref().unwrap();
    assert_eq!(l1.capacity(), 1_499_136);
    assert_eq!(l1.consumed_bytes(), 0x8000 + 16 * 1024);
    assert_eq!(l1.binary_buffers().len(), 1);
    assert_eq!(
        l1.lookup(0x2_0100).unwrap().name.as_deref(),
        Some("input0")
    );

    let timing = node.timing.as_ref().unwrap();
    assert_eq!(timing.slowest_operand, Some(SlowestOperand::Input(0)));
    assert_eq!(timing.inputs[0].available, 12.0);
    assert_eq!(timing.inputs[0].required, 18.0);
}

#[test]
fn op_performance_on_this_chip_only() {
    let graph = load_chip(&wormhole_request(0, 0).unwrap()).unwrap();

    let performance = graph.operation("matmul0").unwrap().performance.as_ref().unwrap();
    assert_eq!(performance.bw_limited_factor, 2.25);
    assert_eq!(performance.slowest_operand, Some(SlowestOperand::Output));
    assert_eq!(performance.warnings, vec!["slow input", "check tiling"]);
    assert_eq!(performance.outputs[0].available, 6.5);
    assert_eq!(performance.outputs[0].required, 0.0);

    assert!(graph.operation("matmul_on_another_chip").is_none());
    assert_eq!(graph.max_bw_limited_factor(), 2.25);
}

#[test]
fn stages_compose_in_order() {
    let sources = wormhole_sources().unwrap();
    let skeleton = builder::load_architecture("wormhole", 0, 0).unwrap();
    let graph = apply_netlist(skeleton, sources.netlist.as_ref().unwrap()).unwrap();
    let graph = apply_queues(graph, sources.queues.as_ref().unwrap()).unwrap();
    let graph = apply_core_perf(graph, sources.core_perf.as_ref().unwrap()).unwrap();
    assert!(graph.node("0-1-1").unwrap().l1.is_some());
    assert_eq!(graph.max_bw_limited_factor(), 1.5);
}

#[test]
fn absent_coordinate_fails_the_load() {
    let request = request_with_netlist(
        "
slowest_op_cycles: 10
bw_limited_op_cycles: 10
nodes:
  - location: [40, 3]
    op_name: lost
",
    );
    let error = load_chip(&request).unwrap_err();
    assert_eq!(error.stage, Stage::Netlist);
    assert!(matches!(error.error, FusionError::MalformedSource(_)));
}

#[test]
#[should_panic(expected = "Node 0-1-1 has no to_ethernet link")]
fn ethernet_pipe_on_a_core() {
    let request = request_with_netlist(
        "
nodes:
  - location: [1, 1]
    links:
      to_ethernet:
        mapped_pipes:
          P1: 64
",
    );
    load_chip(&request).unwrap();
}

#[test]
#[should_panic(expected = "Netlist for chip 3 applied to chip 0")]
fn netlist_for_another_chip() {
    load_chip(&request_with_netlist("chip_id: 3\nnodes: []\n")).unwrap();
}

#[test]
#[should_panic(expected = "Node 0-9-0 is eth but the netlist says core")]
fn node_kind_mismatch() {
    load_chip(&request_with_netlist(
        "nodes:\n  - location: [9, 0]\n    type: core\n",
    ))
    .unwrap();
}

#[test]
#[should_panic(expected = "Link 0-1-1-noc0_out_east data volume overflows")]
fn link_volume_overflow() {
    let skeleton = builder::load_architecture("wormhole", 0, 0).unwrap();
    let netlist = from_yaml(
        "
nodes:
  - location: [1, 1]
    links:
      noc0_out_east:
        mapped_pipes:
          A: 18446744073709551615
          B: 1
",
    )
    .unwrap();
    apply_netlist(skeleton, &netlist).unwrap();
}

#[test]
fn reported_volume_does_not_override_pipes() {
    let graph = load_chip(&request_with_netlist(
        "
nodes:
  - location: [1, 1]
    links:
      noc0_out_east:
        num_occupants: 2
        total_data_in_bytes: 9999
        mapped_pipes:
          '7': 100
",
    ))
    .unwrap();
    assert_eq!(graph.link("0-1-1-noc0_out_east").unwrap().total_data_bytes, 100);
}

#[test]
fn zero_cycles_is_tolerated() {
    let mut request = request_with_netlist("nodes: []\n");
    request.sources = ChipSources {
        netlist: request.sources.netlist.take(),
        ..Default::default()
    };
    let graph = load_chip(&request).unwrap();
    assert_eq!(graph.total_workload_cycles(), 0);
}

#[test]
fn missing_netlist() {
    let request = ChipRequest {
        arch: "wormhole".to_string(),
        chip_id: 4,
        epoch: 2,
        sources: ChipSources::default(),
    };
    let error = load_chip(&request).unwrap_err();
    assert_eq!(error.stage, Stage::Netlist);
    assert_eq!(
        error.to_string(),
        "chip 4 epoch 2: netlist stage failed: Malformed source: Missing netlist"
    );
}

#[test]
fn unknown_architecture_stage() {
    let mut request = wormhole_request(1, 0).unwrap();
    request.arch = "blackhole".to_string();
    let error = load_chip(&request).unwrap_err();
    assert_eq!(error.stage, Stage::Architecture);
    assert!(matches!(error.error, FusionError::Configuration(_)));
}

#[test]
#[should_panic(expected = "Queue lost: No DRAM channel 7 on chip 0")]
fn queue_on_unknown_channel() {
    let mut request = wormhole_request(0, 0).unwrap();
    request.sources.queues = Some(
        from_yaml(
            "
lost:
  location: LOCATION::DRAM
  allocation-info:
    - {address: 0x100, channel: 7}
",
        )
        .unwrap(),
    );
    load_chip(&request).unwrap();
}

#[test]
#[should_panic(expected = "Node 0-1-1: Chunk at 0x10000 of 32768 bytes exceeds L1 capacity 65536")]
fn chunk_beyond_capacity() {
    let mut request = wormhole_request(0, 0).unwrap();
    request.sources.core_perf = Some(
        from_yaml(
            "
worker-cores:
  1-1:
    data-buffers:
      - {start-address: '0x1_0000', reserved-size-bytes: 32KiB}
    core-attributes:
      l1-size-bytes: 64KiB
",
        )
        .unwrap(),
    );
    load_chip(&request).unwrap();
}

#[test]
#[should_panic(expected = "Consumed size 98304 exceeds L1 capacity 65536")]
fn consumed_beyond_capacity() {
    let mut request = wormhole_request(0, 0).unwrap();
    request.sources.core_perf = Some(
        from_yaml(
            "
worker-cores:
  1-1:
    binary-buffers:
      - {start-address: 0, reserved-size-bytes: 64KiB, consumed-size-bytes: 48KiB}
    data-buffers:
      - {start-address: 0, reserved-size-bytes: 64KiB, consumed-size-bytes: 48KiB}
    core-attributes:
      l1-size-bytes: 64KiB
",
        )
        .unwrap(),
    );
    load_chip(&request).unwrap();
}

#[test]
#[should_panic(expected = "Node 0-0-0 is dram, not a core")]
fn core_perf_on_dram() {
    let mut request = wormhole_request(0, 0).unwrap();
    request.sources.core_perf =
        Some(from_yaml("worker-cores:\n  0-0:\n    binary-buffers: []\n").unwrap());
    load_chip(&request).unwrap();
}

#[test]
fn failed_stage_leaves_no_graph() {
    let skeleton = builder::load_architecture("wormhole", 0, 0).unwrap();
    let graph = apply_netlist(skeleton, &from_yaml(NETLIST_YAML).unwrap()).unwrap();
    let broken = from_yaml(
        "
q:
  location: LOCATION::DRAM
  allocation-info:
    - {address: 0, channel: 99}
",
    )
    .unwrap();
    assert!(apply_queues(graph, &broken).is_err());

    let graph = netlist_only();
    let graph = apply_queues(graph, &from_yaml(QUEUES_YAML).unwrap()).unwrap();
    assert!(graph.queue("input0").is_some());
}

#[test]
fn parallel_loads_keep_request_order() {
    let mut requests: Vec<ChipRequest> = (0..4)
        .map(|chip_id| wormhole_request(chip_id, 1).unwrap())
        .collect();
    requests[2].sources.netlist = Some(from_yaml("chip_id: 9\nnodes: []\n").unwrap());

    let results = load_chips(&requests);
    assert_eq!(results.len(), 4);
    for (chip_id, result) in results.iter().enumerate() {
        match result {
            Ok(graph) => assert_eq!(graph.chip_id(), chip_id as u32),
            Err(error) => {
                assert_eq!(chip_id, 2);
                assert_eq!(error.stage, Stage::Netlist);
            }
        }
    }
    assert!(results[2].is_err());
}
